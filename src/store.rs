//! Storage collaborator contract and an in-memory implementation

use crate::errors::{JanuscopeError, Result};
use crate::models::{
    CertificateCheckResult, CooldownKey, Incident, NotificationCooldown, RecipientGroup, Service,
    ServiceStatus, UptimeCheckResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Persistence operations the pipeline calls
#[async_trait]
pub trait Store: Send + Sync {
    async fn active_services(&self) -> Result<Vec<Service>>;
    async fn update_service_status(
        &self,
        service_id: i64,
        status: ServiceStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()>;
    async fn recipient_groups(&self, service_id: i64) -> Result<Vec<RecipientGroup>>;

    async fn save_uptime_result(&self, result: &UptimeCheckResult) -> Result<()>;
    async fn uptime_history(&self, service_id: i64) -> Result<Vec<UptimeCheckResult>>;
    async fn save_certificate_result(&self, result: &CertificateCheckResult) -> Result<()>;
    /// Most recent certificate result per service
    async fn latest_certificate_results(&self) -> Result<Vec<CertificateCheckResult>>;

    async fn find_active_incident(&self, service_id: i64) -> Result<Option<Incident>>;
    async fn create_incident(&self, incident: &Incident) -> Result<()>;
    async fn resolve_incident(&self, incident: &Incident) -> Result<()>;

    async fn find_cooldown(&self, key: &CooldownKey) -> Result<Option<NotificationCooldown>>;
    async fn upsert_cooldown(&self, cooldown: &NotificationCooldown) -> Result<()>;
}

/// Thread-safe in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    services: Arc<RwLock<HashMap<i64, Service>>>,
    groups: Arc<RwLock<HashMap<i64, RecipientGroup>>>,
    uptime_results: Arc<RwLock<Vec<UptimeCheckResult>>>,
    certificate_results: Arc<RwLock<Vec<CertificateCheckResult>>>,
    incidents: Arc<RwLock<Vec<Incident>>>,
    cooldowns: Arc<RwLock<HashMap<CooldownKey, NotificationCooldown>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with services and recipient groups
    pub fn with_data(services: Vec<Service>, groups: Vec<RecipientGroup>) -> Self {
        Self {
            services: Arc::new(RwLock::new(services.into_iter().map(|s| (s.id, s)).collect())),
            groups: Arc::new(RwLock::new(groups.into_iter().map(|g| (g.id, g)).collect())),
            ..Self::default()
        }
    }

    /// Insert or replace a service
    pub async fn add_service(&self, service: Service) {
        self.services.write().await.insert(service.id, service);
    }

    /// Insert or replace a recipient group
    pub async fn add_group(&self, group: RecipientGroup) {
        self.groups.write().await.insert(group.id, group);
    }

    pub async fn service(&self, service_id: i64) -> Option<Service> {
        self.services.read().await.get(&service_id).cloned()
    }

    /// Every incident ever recorded for a service, oldest first
    pub async fn incidents_for(&self, service_id: i64) -> Vec<Incident> {
        self.incidents
            .read()
            .await
            .iter()
            .filter(|i| i.service_id == service_id)
            .cloned()
            .collect()
    }

    pub async fn cooldown_count(&self) -> usize {
        self.cooldowns.read().await.len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn active_services(&self) -> Result<Vec<Service>> {
        let services = self.services.read().await;
        let mut active: Vec<Service> = services.values().filter(|s| s.active).cloned().collect();
        active.sort_by_key(|s| s.id);
        Ok(active)
    }

    async fn update_service_status(
        &self,
        service_id: i64,
        status: ServiceStatus,
        checked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut services = self.services.write().await;
        let service = services
            .get_mut(&service_id)
            .ok_or_else(|| JanuscopeError::Storage(format!("unknown service {}", service_id)))?;
        service.current_status = status;
        service.last_checked = Some(checked_at);
        Ok(())
    }

    async fn recipient_groups(&self, service_id: i64) -> Result<Vec<RecipientGroup>> {
        let group_ids = match self.services.read().await.get(&service_id) {
            Some(service) => service.recipient_group_ids.clone(),
            None => return Ok(Vec::new()),
        };

        let groups = self.groups.read().await;
        Ok(group_ids
            .iter()
            .filter_map(|id| groups.get(id).cloned())
            .collect())
    }

    async fn save_uptime_result(&self, result: &UptimeCheckResult) -> Result<()> {
        self.uptime_results.write().await.push(result.clone());
        Ok(())
    }

    async fn uptime_history(&self, service_id: i64) -> Result<Vec<UptimeCheckResult>> {
        Ok(self
            .uptime_results
            .read()
            .await
            .iter()
            .filter(|r| r.service_id == service_id)
            .cloned()
            .collect())
    }

    async fn save_certificate_result(&self, result: &CertificateCheckResult) -> Result<()> {
        self.certificate_results.write().await.push(result.clone());
        Ok(())
    }

    async fn latest_certificate_results(&self) -> Result<Vec<CertificateCheckResult>> {
        let results = self.certificate_results.read().await;
        let mut latest: HashMap<i64, &CertificateCheckResult> = HashMap::new();

        for result in results.iter() {
            match latest.get(&result.service_id) {
                Some(existing) if existing.checked_at > result.checked_at => {}
                _ => {
                    latest.insert(result.service_id, result);
                }
            }
        }

        let mut latest: Vec<CertificateCheckResult> = latest.into_values().cloned().collect();
        latest.sort_by_key(|r| r.service_id);
        Ok(latest)
    }

    async fn find_active_incident(&self, service_id: i64) -> Result<Option<Incident>> {
        Ok(self
            .incidents
            .read()
            .await
            .iter()
            .find(|i| i.service_id == service_id && !i.resolved)
            .cloned())
    }

    async fn create_incident(&self, incident: &Incident) -> Result<()> {
        let mut incidents = self.incidents.write().await;

        if incidents
            .iter()
            .any(|i| i.service_id == incident.service_id && !i.resolved)
        {
            return Err(JanuscopeError::Storage(format!(
                "service {} already has an unresolved incident",
                incident.service_id
            )));
        }

        incidents.push(incident.clone());
        debug!("Stored incident {} for service {}", incident.id, incident.service_id);
        Ok(())
    }

    async fn resolve_incident(&self, incident: &Incident) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        let stored = incidents
            .iter_mut()
            .find(|i| i.id == incident.id)
            .ok_or_else(|| JanuscopeError::Storage(format!("unknown incident {}", incident.id)))?;
        *stored = incident.clone();
        Ok(())
    }

    async fn find_cooldown(&self, key: &CooldownKey) -> Result<Option<NotificationCooldown>> {
        Ok(self.cooldowns.read().await.get(key).cloned())
    }

    async fn upsert_cooldown(&self, cooldown: &NotificationCooldown) -> Result<()> {
        self.cooldowns
            .write()
            .await
            .insert(cooldown.key.clone(), cooldown.clone());
        Ok(())
    }
}
