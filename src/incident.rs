//! Incident state machine and alert fan-out for fresh check results

use crate::config::Config;
use crate::errors::Result;
use crate::models::{
    AlertRequest, CertificateCheckResult, ChannelKind, EventType, Incident, Service, ServiceStatus,
    UptimeCheckResult,
};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DOWN_SUBJECT: &str = "[DOWN] {{serviceName}}";
const DOWN_BODY: &str = "{{serviceName}} ({{url}}) is DOWN since {{startedAt}}.\nError: {{errorMessage}}";
const RECOVERED_SUBJECT: &str = "[RECOVERED] {{serviceName}}";
const RECOVERED_BODY: &str =
    "{{serviceName}} ({{url}}) is back UP at {{recoveredAt}} after {{duration}} of downtime.";
const EXPIRING_SUBJECT: &str = "[CERT] {{domain}} expires in {{daysRemaining}} days";
const EXPIRING_BODY: &str = "The certificate for {{serviceName}} ({{domain}}) expires on {{validTo}}, \
     {{daysRemaining}} days from now.\nIssuer: {{issuer}}";
const EXPIRED_SUBJECT: &str = "[CERT EXPIRED] {{domain}}";
const EXPIRED_BODY: &str =
    "The certificate for {{serviceName}} ({{domain}}) expired on {{validTo}}.\nIssuer: {{issuer}}";

/// What a probe result did to the service's incident record
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Opened(Incident),
    /// DOWN again while an incident was already open
    Reused(Incident),
    Resolved(Incident),
    Unchanged,
}

/// An alert addressed to one recipient group through its channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundAlert {
    pub channel: ChannelKind,
    pub request: AlertRequest,
}

#[derive(Debug, Clone)]
pub struct UptimeOutcome {
    pub previous: ServiceStatus,
    pub current: ServiceStatus,
    pub transition: Transition,
    pub alerts: Vec<OutboundAlert>,
}

#[derive(Debug, Clone)]
pub struct CertificateOutcome {
    pub event: Option<EventType>,
    pub alerts: Vec<OutboundAlert>,
}

pub struct IncidentCoordinator {
    store: Arc<dyn Store>,
    /// Strictly descending
    thresholds: Vec<u32>,
}

impl IncidentCoordinator {
    /// Create a coordinator; thresholds are sorted descending and deduplicated
    pub fn new(store: Arc<dyn Store>, thresholds: &[u32]) -> Self {
        let mut thresholds = thresholds.to_vec();
        thresholds.sort_unstable_by(|a, b| b.cmp(a));
        thresholds.dedup();
        Self { store, thresholds }
    }

    /// Create a coordinator with the configured expiry thresholds
    pub fn from_config(store: Arc<dyn Store>, config: &Config) -> Self {
        Self::new(store, &config.expiry_thresholds_days)
    }

    pub fn thresholds(&self) -> &[u32] {
        &self.thresholds
    }

    /// Apply one fresh probe result. The result is persisted and the
    /// service's status/last-checked fields are updated even when the
    /// incident write fails.
    pub async fn process_uptime(
        &self,
        service: &Service,
        result: &UptimeCheckResult,
    ) -> Result<UptimeOutcome> {
        self.store.save_uptime_result(result).await?;

        let previous = service.current_status;
        let current = result.status;
        let transition = self.transition(service, previous, result).await;

        self.store
            .update_service_status(service.id, current, result.checked_at)
            .await?;

        let transition = transition?;
        let alerts = match &transition {
            Transition::Opened(incident) => {
                let vars = incident_variables(service, incident, result);
                self.fan_out(service, EventType::ServiceDown, DOWN_SUBJECT, DOWN_BODY, vars)
                    .await?
            }
            Transition::Resolved(incident) => {
                let vars = incident_variables(service, incident, result);
                self.fan_out(service, EventType::ServiceRecovered, RECOVERED_SUBJECT, RECOVERED_BODY, vars)
                    .await?
            }
            Transition::Reused(_) | Transition::Unchanged => Vec::new(),
        };

        Ok(UptimeOutcome {
            previous,
            current,
            transition,
            alerts,
        })
    }

    /// Decide the transition from the result and the incident record. The
    /// open incident, not the stored status, decides whether one is opened
    /// or resolved, so a storage failure in an earlier cycle is repaired by
    /// the next result.
    async fn transition(
        &self,
        service: &Service,
        previous: ServiceStatus,
        result: &UptimeCheckResult,
    ) -> Result<Transition> {
        let open = match result.status {
            ServiceStatus::Down | ServiceStatus::Up => {
                self.store.find_active_incident(service.id).await?
            }
            ServiceStatus::Unknown => return Ok(Transition::Unchanged),
        };

        match (result.status, open) {
            (ServiceStatus::Down, Some(open)) if previous == ServiceStatus::Down => {
                debug!("Service {} still DOWN, incident {} open", service.name, open.id);
                Ok(Transition::Unchanged)
            }
            (ServiceStatus::Down, Some(open)) => Ok(Transition::Reused(open)),
            (ServiceStatus::Down, None) => {
                if previous == ServiceStatus::Down {
                    warn!("Service {} was DOWN without an open incident", service.name);
                }

                let mut incident = Incident::open(service.id, result.error_message.clone());
                incident.started_at = result.checked_at;
                self.store.create_incident(&incident).await?;
                info!(
                    "Service {} is DOWN, opened incident {}: {}",
                    service.name,
                    incident.id,
                    incident.error_message.as_deref().unwrap_or("unknown error")
                );
                Ok(Transition::Opened(incident))
            }
            (ServiceStatus::Up, Some(mut incident)) => {
                incident.resolve(result.checked_at.max(incident.started_at));
                self.store.resolve_incident(&incident).await?;
                info!(
                    "Service {} recovered, resolved incident {} after {}s",
                    service.name,
                    incident.id,
                    incident.duration_secs.unwrap_or_default()
                );
                Ok(Transition::Resolved(incident))
            }
            (ServiceStatus::Up, None) => {
                if previous == ServiceStatus::Down {
                    warn!("Service {} recovered without an open incident", service.name);
                }
                Ok(Transition::Unchanged)
            }
            _ => Ok(Transition::Unchanged),
        }
    }

    /// Persist a certificate result and raise an expiry event when it sits
    /// at or under a threshold. Repeats are held back by the alert cooldown.
    pub async fn process_certificate(
        &self,
        service: &Service,
        result: &CertificateCheckResult,
    ) -> Result<CertificateOutcome> {
        self.store.save_certificate_result(result).await?;

        let event = result
            .days_remaining
            .filter(|_| result.has_certificate())
            .and_then(|days| self.threshold_event(days));

        let alerts = match &event {
            Some(event) => {
                let (subject, body) = match event {
                    EventType::CertificateExpired => (EXPIRED_SUBJECT, EXPIRED_BODY),
                    _ => (EXPIRING_SUBJECT, EXPIRING_BODY),
                };
                let vars = certificate_variables(service, result);
                self.fan_out(service, event.clone(), subject, body, vars).await?
            }
            None => Vec::new(),
        };

        Ok(CertificateOutcome { event, alerts })
    }

    /// Expired certificates raise `CERT_EXPIRED`; otherwise the smallest
    /// threshold the remaining days fall within
    pub fn threshold_event(&self, days_remaining: i64) -> Option<EventType> {
        if days_remaining < 0 {
            return Some(EventType::CertificateExpired);
        }

        self.thresholds
            .iter()
            .rev()
            .find(|threshold| days_remaining <= i64::from(**threshold))
            .map(|threshold| EventType::CertificateExpiring(*threshold))
    }

    /// Latest certificate per service that is within the largest threshold,
    /// soonest expiry first
    pub async fn certificate_warnings(&self) -> Result<Vec<CertificateCheckResult>> {
        let Some(widest) = self.thresholds.first().copied() else {
            return Ok(Vec::new());
        };

        let mut warnings: Vec<CertificateCheckResult> = self
            .store
            .latest_certificate_results()
            .await?
            .into_iter()
            .filter(|r| r.days_remaining.is_some_and(|days| days <= i64::from(widest)))
            .collect();
        warnings.sort_by_key(|r| r.days_remaining);
        Ok(warnings)
    }

    async fn fan_out(
        &self,
        service: &Service,
        event: EventType,
        subject: &str,
        body: &str,
        variables: HashMap<String, String>,
    ) -> Result<Vec<OutboundAlert>> {
        let groups = self.store.recipient_groups(service.id).await?;
        if groups.is_empty() {
            warn!("Service {} has no recipient groups for {}", service.name, event);
        }

        Ok(groups
            .into_iter()
            .map(|group| OutboundAlert {
                channel: group.channel,
                request: AlertRequest::new(group.recipient, subject, body, event.clone())
                    .for_service(service.id)
                    .for_group(group.id)
                    .with_variables(variables.clone())
                    .with_variable("groupName", group.name),
            })
            .collect())
    }
}

fn service_variables(service: &Service) -> HashMap<String, String> {
    HashMap::from([
        ("serviceId".to_string(), service.id.to_string()),
        ("serviceName".to_string(), service.name.clone()),
        ("url".to_string(), service.url.clone()),
    ])
}

fn incident_variables(
    service: &Service,
    incident: &Incident,
    result: &UptimeCheckResult,
) -> HashMap<String, String> {
    let mut vars = service_variables(service);
    vars.insert("status".to_string(), result.status.to_string());
    vars.insert("checkedAt".to_string(), timestamp(result.checked_at));
    vars.insert("startedAt".to_string(), timestamp(incident.started_at));

    if let Some(error) = incident.error_message.as_ref().or(result.error_message.as_ref()) {
        vars.insert("errorMessage".to_string(), error.clone());
    }
    if let Some(code) = result.http_code {
        vars.insert("httpCode".to_string(), code.to_string());
    }
    if let Some(ms) = result.response_time_ms {
        vars.insert("responseTime".to_string(), ms.to_string());
    }
    if let Some(recovered_at) = incident.recovered_at {
        vars.insert("recoveredAt".to_string(), timestamp(recovered_at));
    }
    if let Some(secs) = incident.duration_secs {
        vars.insert("duration".to_string(), format_duration(secs));
        vars.insert("durationSeconds".to_string(), secs.to_string());
    }
    vars
}

fn certificate_variables(service: &Service, result: &CertificateCheckResult) -> HashMap<String, String> {
    let mut vars = service_variables(service);
    vars.insert("domain".to_string(), result.domain.clone());

    if let Some(days) = result.days_remaining {
        vars.insert("daysRemaining".to_string(), days.to_string());
    }
    if let Some(valid_to) = result.valid_to {
        vars.insert("validTo".to_string(), timestamp(valid_to));
    }
    if let Some(issuer) = &result.issuer {
        vars.insert("issuer".to_string(), issuer.clone());
    }
    if let Some(subject) = &result.subject {
        vars.insert("subject".to_string(), subject.clone());
    }
    vars
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Render whole seconds as e.g. `1h 2m 5s`
pub fn format_duration(total_secs: i64) -> String {
    let total = total_secs.max(0);
    let (hours, minutes, seconds) = (total / 3600, (total % 3600) / 60, total % 60);

    match (hours, minutes) {
        (0, 0) => format!("{}s", seconds),
        (0, _) => format!("{}m {}s", minutes, seconds),
        _ => format!("{}h {}m {}s", hours, minutes, seconds),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::template::render;
    use crate::models::RecipientGroup;
    use crate::errors::JanuscopeError;
    use crate::models::{CooldownKey, NotificationCooldown};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Memory store whose incident writes can be made to fail once
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_create: AtomicBool,
        fail_resolve: AtomicBool,
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn active_services(&self) -> Result<Vec<Service>> {
            self.inner.active_services().await
        }

        async fn update_service_status(
            &self,
            service_id: i64,
            status: ServiceStatus,
            checked_at: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.update_service_status(service_id, status, checked_at).await
        }

        async fn recipient_groups(&self, service_id: i64) -> Result<Vec<RecipientGroup>> {
            self.inner.recipient_groups(service_id).await
        }

        async fn save_uptime_result(&self, result: &UptimeCheckResult) -> Result<()> {
            self.inner.save_uptime_result(result).await
        }

        async fn uptime_history(&self, service_id: i64) -> Result<Vec<UptimeCheckResult>> {
            self.inner.uptime_history(service_id).await
        }

        async fn save_certificate_result(&self, result: &CertificateCheckResult) -> Result<()> {
            self.inner.save_certificate_result(result).await
        }

        async fn latest_certificate_results(&self) -> Result<Vec<CertificateCheckResult>> {
            self.inner.latest_certificate_results().await
        }

        async fn find_active_incident(&self, service_id: i64) -> Result<Option<Incident>> {
            self.inner.find_active_incident(service_id).await
        }

        async fn create_incident(&self, incident: &Incident) -> Result<()> {
            if self.fail_create.swap(false, Ordering::SeqCst) {
                return Err(JanuscopeError::Storage("insert failed".to_string()));
            }
            self.inner.create_incident(incident).await
        }

        async fn resolve_incident(&self, incident: &Incident) -> Result<()> {
            if self.fail_resolve.swap(false, Ordering::SeqCst) {
                return Err(JanuscopeError::Storage("update failed".to_string()));
            }
            self.inner.resolve_incident(incident).await
        }

        async fn find_cooldown(&self, key: &CooldownKey) -> Result<Option<NotificationCooldown>> {
            self.inner.find_cooldown(key).await
        }

        async fn upsert_cooldown(&self, cooldown: &NotificationCooldown) -> Result<()> {
            self.inner.upsert_cooldown(cooldown).await
        }
    }

    async fn flaky_setup() -> (IncidentCoordinator, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        store
            .inner
            .add_service(Service::new(1, "api", "https://api.example.com").with_recipient_groups(vec![10]))
            .await;
        store.inner.add_group(group(10, ChannelKind::Console)).await;
        let coordinator = IncidentCoordinator::new(store.clone(), &[30, 7]);
        (coordinator, store)
    }

    fn group(id: i64, channel: ChannelKind) -> RecipientGroup {
        RecipientGroup {
            id,
            name: format!("group-{}", id),
            channel,
            recipient: format!("recipient-{}", id),
        }
    }

    fn setup(status: ServiceStatus) -> (IncidentCoordinator, Arc<MemoryStore>, Service) {
        let service = Service::new(1, "api", "https://api.example.com")
            .with_status(status)
            .with_recipient_groups(vec![10, 20]);
        let store = Arc::new(MemoryStore::with_data(
            vec![service.clone()],
            vec![group(10, ChannelKind::Console), group(20, ChannelKind::ChatBot)],
        ));
        let coordinator = IncidentCoordinator::new(store.clone(), &[30, 14, 7, 3]);
        (coordinator, store, service)
    }

    #[tokio::test]
    async fn test_up_to_down_opens_exactly_one_incident() {
        let (coordinator, store, service) = setup(ServiceStatus::Up);

        let outcome = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 503"))
            .await
            .unwrap();
        assert!(matches!(outcome.transition, Transition::Opened(_)));
        assert_eq!(outcome.alerts.len(), 2);
        assert_eq!(outcome.alerts[0].request.event_type, EventType::ServiceDown);
        assert_eq!(outcome.alerts[0].request.recipient_group_id, Some(10));
        assert_eq!(outcome.alerts[1].channel, ChannelKind::ChatBot);

        // Second DOWN in a row, as seen from the persisted status
        let service = store.service(1).await.unwrap();
        assert_eq!(service.current_status, ServiceStatus::Down);
        let outcome = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 503"))
            .await
            .unwrap();
        assert_eq!(outcome.transition, Transition::Unchanged);
        assert!(outcome.alerts.is_empty());

        assert_eq!(store.incidents_for(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_down_with_stale_status_reuses_open_incident() {
        let (coordinator, store, service) = setup(ServiceStatus::Unknown);
        let existing = Incident::open(1, Some("earlier".to_string()));
        store.create_incident(&existing).await.unwrap();

        let outcome = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 500"))
            .await
            .unwrap();

        assert_eq!(outcome.transition, Transition::Reused(existing));
        assert!(outcome.alerts.is_empty());
        assert_eq!(store.incidents_for(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_down_to_up_resolves_with_whole_second_duration() {
        let (coordinator, store, service) = setup(ServiceStatus::Down);
        let mut open = Incident::open(1, Some("HTTP 502".to_string()));
        open.started_at = Utc::now() - Duration::milliseconds(125_400);
        store.create_incident(&open).await.unwrap();

        let outcome = coordinator
            .process_uptime(&service, &UptimeCheckResult::up(1, 200, 42))
            .await
            .unwrap();

        let Transition::Resolved(incident) = outcome.transition else {
            panic!("expected a resolved incident");
        };
        assert!(incident.resolved);
        let expected = (incident.recovered_at.unwrap() - open.started_at).num_seconds();
        assert_eq!(incident.duration_secs, Some(expected));
        assert!(expected >= 125);

        assert_eq!(outcome.alerts.len(), 2);
        let request = &outcome.alerts[0].request;
        assert_eq!(request.event_type, EventType::ServiceRecovered);
        let body = render(&request.body, &request.variables);
        assert!(body.starts_with("api (https://api.example.com) is back UP"));
        assert!(!body.contains("{{"));

        assert!(store.find_active_incident(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_to_up_is_silent_without_open_incident() {
        let (coordinator, store, service) = setup(ServiceStatus::Unknown);

        let outcome = coordinator
            .process_uptime(&service, &UptimeCheckResult::up(1, 200, 10))
            .await
            .unwrap();

        assert_eq!(outcome.transition, Transition::Unchanged);
        assert!(outcome.alerts.is_empty());
        assert_eq!(store.service(1).await.unwrap().current_status, ServiceStatus::Up);
    }

    #[tokio::test]
    async fn test_status_updated_on_every_result() {
        let (coordinator, store, service) = setup(ServiceStatus::Up);
        let result = UptimeCheckResult::up(1, 200, 10);

        coordinator.process_uptime(&service, &result).await.unwrap();

        let stored = store.service(1).await.unwrap();
        assert_eq!(stored.current_status, ServiceStatus::Up);
        assert_eq!(stored.last_checked, Some(result.checked_at));
        assert_eq!(store.uptime_history(1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_down_alert_renders_completely() {
        let (coordinator, _, service) = setup(ServiceStatus::Up);
        let outcome = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "Connection failed: refused"))
            .await
            .unwrap();

        let request = &outcome.alerts[0].request;
        assert_eq!(render(&request.subject, &request.variables), "[DOWN] api");
        let body = render(&request.body, &request.variables);
        assert!(body.contains("Error: Connection failed: refused"));
        assert!(!body.contains("{{"));
    }

    #[tokio::test]
    async fn test_failed_incident_insert_is_repaired_by_next_down() {
        let (coordinator, store) = flaky_setup().await;
        store.fail_create.store(true, Ordering::SeqCst);

        let service = store.inner.service(1).await.unwrap();
        let first = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 503"))
            .await;
        assert!(first.is_err());

        let service = store.inner.service(1).await.unwrap();
        assert_eq!(service.current_status, ServiceStatus::Down);
        assert!(store.inner.incidents_for(1).await.is_empty());

        let second = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 503"))
            .await
            .unwrap();
        assert!(matches!(second.transition, Transition::Opened(_)));
        assert_eq!(second.alerts.len(), 1);
        assert_eq!(second.alerts[0].request.event_type, EventType::ServiceDown);
        assert_eq!(store.inner.incidents_for(1).await.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_resolve_is_repaired_by_next_up() {
        let (coordinator, store) = flaky_setup().await;

        let service = store.inner.service(1).await.unwrap();
        let opened = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 503"))
            .await
            .unwrap();
        assert!(matches!(opened.transition, Transition::Opened(_)));

        store.fail_resolve.store(true, Ordering::SeqCst);
        let service = store.inner.service(1).await.unwrap();
        let failed = coordinator
            .process_uptime(&service, &UptimeCheckResult::up(1, 200, 10))
            .await;
        assert!(failed.is_err());

        let service = store.inner.service(1).await.unwrap();
        assert_eq!(service.current_status, ServiceStatus::Up);
        assert!(store.inner.find_active_incident(1).await.unwrap().is_some());

        let recovered = coordinator
            .process_uptime(&service, &UptimeCheckResult::up(1, 200, 10))
            .await
            .unwrap();
        assert!(matches!(recovered.transition, Transition::Resolved(_)));
        assert_eq!(recovered.alerts[0].request.event_type, EventType::ServiceRecovered);
        assert!(store.inner.find_active_incident(1).await.unwrap().is_none());

        let service = store.inner.service(1).await.unwrap();
        let next_outage = coordinator
            .process_uptime(&service, &UptimeCheckResult::down(1, "HTTP 500"))
            .await
            .unwrap();
        assert!(matches!(next_outage.transition, Transition::Opened(_)));
        assert_eq!(next_outage.alerts.len(), 1);
        assert_eq!(store.inner.incidents_for(1).await.len(), 2);
    }

    #[test]
    fn test_threshold_selection() {
        let coordinator = IncidentCoordinator::new(Arc::new(MemoryStore::new()), &[7, 30, 3, 14, 7]);
        assert_eq!(coordinator.thresholds(), &[30, 14, 7, 3]);

        assert_eq!(coordinator.threshold_event(45), None);
        assert_eq!(coordinator.threshold_event(30), Some(EventType::CertificateExpiring(30)));
        assert_eq!(coordinator.threshold_event(20), Some(EventType::CertificateExpiring(30)));
        assert_eq!(coordinator.threshold_event(6), Some(EventType::CertificateExpiring(7)));
        assert_eq!(coordinator.threshold_event(0), Some(EventType::CertificateExpiring(3)));
        assert_eq!(coordinator.threshold_event(-2), Some(EventType::CertificateExpired));
    }

    fn certificate(days: i64) -> CertificateCheckResult {
        CertificateCheckResult {
            service_id: 1,
            domain: "api.example.com".to_string(),
            issuer: Some("CN=Example CA".to_string()),
            valid_to: Some(Utc::now() + Duration::days(days)),
            days_remaining: Some(days),
            valid: days >= 0,
            checked_at: Utc::now(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_certificate_within_threshold_raises_event() {
        let (coordinator, _, service) = setup(ServiceStatus::Up);

        let outcome = coordinator.process_certificate(&service, &certificate(5)).await.unwrap();
        assert_eq!(outcome.event, Some(EventType::CertificateExpiring(7)));
        assert_eq!(outcome.alerts.len(), 2);
        let request = &outcome.alerts[0].request;
        assert_eq!(
            render(&request.subject, &request.variables),
            "[CERT] api.example.com expires in 5 days"
        );

        let outcome = coordinator.process_certificate(&service, &certificate(90)).await.unwrap();
        assert!(outcome.event.is_none());
        assert!(outcome.alerts.is_empty());
    }

    #[tokio::test]
    async fn test_failed_inspection_raises_nothing() {
        let (coordinator, _, service) = setup(ServiceStatus::Up);
        let failed = CertificateCheckResult::failure(1, "api.example.com", "handshake failed");

        let outcome = coordinator.process_certificate(&service, &failed).await.unwrap();
        assert!(outcome.event.is_none());
    }

    #[tokio::test]
    async fn test_certificate_warnings_sorted_by_urgency() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = IncidentCoordinator::new(store.clone(), &[30, 7]);

        for (service_id, days) in [(1, 20), (2, 90), (3, -1)] {
            let mut result = certificate(days);
            result.service_id = service_id;
            store.save_certificate_result(&result).await.unwrap();
        }

        let warnings = coordinator.certificate_warnings().await.unwrap();
        let ids: Vec<i64> = warnings.iter().map(|r| r.service_id).collect();
        assert_eq!(ids, vec![3, 1]);
    }

    #[test]
    fn test_duration_formatting() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(3725), "1h 2m 5s");
        assert_eq!(format_duration(-5), "0s");
    }
}
