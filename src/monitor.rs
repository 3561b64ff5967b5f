//! Check-cycle engine: probe due services, apply incident transitions,
//! dispatch the resulting alerts

use crate::alerts::{AlertDispatcher, DispatcherStats, IN_COOLDOWN};
use crate::config::Config;
use crate::errors::Result;
use crate::incident::{IncidentCoordinator, OutboundAlert, Transition};
use crate::lifecycle::{Lifecycle, LifecycleCell, LifecycleState};
use crate::models::{AlertResult, Service, ServiceStatus};
use crate::orchestrator::CheckOrchestrator;
use crate::pool::PoolStats;
use crate::store::Store;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

/// Tally of one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub checked: usize,
    pub up: usize,
    pub down: usize,
    pub certificates_checked: usize,
    pub certificate_events: usize,
    pub incidents_opened: usize,
    pub incidents_resolved: usize,
    pub alerts_sent: usize,
    pub alerts_suppressed: usize,
    pub alerts_failed: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub state: LifecycleState,
    pub healthy: bool,
    pub probe_pool: Option<PoolStats>,
    pub alerts: DispatcherStats,
}

pub struct Monitor {
    store: Arc<dyn Store>,
    orchestrator: CheckOrchestrator,
    coordinator: IncidentCoordinator,
    dispatcher: AlertDispatcher,
    lifecycle: LifecycleCell,
    certificate_interval: Duration,
    alert_wait: Duration,
    certificate_checked_at: Mutex<HashMap<i64, DateTime<Utc>>>,
}

impl Monitor {
    /// Create a monitor with channels built from configuration
    pub fn new(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let dispatcher = AlertDispatcher::from_config(config, Arc::clone(&store))?;
        Self::with_dispatcher(config, store, dispatcher)
    }

    /// Create a monitor around an existing dispatcher
    pub fn with_dispatcher(
        config: &Config,
        store: Arc<dyn Store>,
        dispatcher: AlertDispatcher,
    ) -> Result<Self> {
        Ok(Self {
            orchestrator: CheckOrchestrator::new(config)?,
            coordinator: IncidentCoordinator::from_config(Arc::clone(&store), config),
            dispatcher,
            store,
            lifecycle: LifecycleCell::new("monitor"),
            certificate_interval: config.certificate_check_interval(),
            alert_wait: config.batch_wait_ceiling(),
            certificate_checked_at: Mutex::new(HashMap::new()),
        })
    }

    pub fn orchestrator(&self) -> &CheckOrchestrator {
        &self.orchestrator
    }

    pub fn coordinator(&self) -> &IncidentCoordinator {
        &self.coordinator
    }

    pub fn dispatcher(&self) -> &AlertDispatcher {
        &self.dispatcher
    }

    /// Run one full cycle over the services that are due
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.lifecycle.ensure_running()?;

        let now = Utc::now();
        let services = self.store.active_services().await?;
        let due: Vec<Service> = services.iter().filter(|s| is_due(s, now)).cloned().collect();

        let mut report = CycleReport::default();
        self.check_uptime(&due, &mut report).await?;

        let certificates_due = self.certificates_due(&services, now).await;
        self.check_certificates(&certificates_due, now, &mut report).await?;

        info!(
            "Cycle done: {} checked ({} up, {} down), {} incidents opened, {} resolved, {} alerts sent",
            report.checked,
            report.up,
            report.down,
            report.incidents_opened,
            report.incidents_resolved,
            report.alerts_sent
        );
        Ok(report)
    }

    async fn check_uptime(&self, services: &[Service], report: &mut CycleReport) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }

        let results = self.orchestrator.check_all_uptime(services).await?;

        for (service, result) in services.iter().zip(results) {
            report.checked += 1;
            match result.status {
                ServiceStatus::Up => report.up += 1,
                _ => report.down += 1,
            }

            let outcome = match self.coordinator.process_uptime(service, &result).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Could not process result for {}: {}", service.name, e);
                    continue;
                }
            };

            match outcome.transition {
                Transition::Opened(_) => report.incidents_opened += 1,
                Transition::Resolved(_) => report.incidents_resolved += 1,
                Transition::Reused(_) | Transition::Unchanged => {}
            }

            self.dispatch(outcome.alerts, report).await;
        }

        Ok(())
    }

    async fn check_certificates(
        &self,
        services: &[Service],
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        if services.is_empty() {
            return Ok(());
        }

        let results = self.orchestrator.check_all_certificates(services).await?;

        let mut checked_at = self.certificate_checked_at.lock().await;
        for service in services {
            checked_at.insert(service.id, now);
        }
        drop(checked_at);

        for (service, result) in services.iter().zip(results) {
            report.certificates_checked += 1;

            match self.coordinator.process_certificate(service, &result).await {
                Ok(outcome) => {
                    if outcome.event.is_some() {
                        report.certificate_events += 1;
                    }
                    self.dispatch(outcome.alerts, report).await;
                }
                Err(e) => error!("Could not process certificate for {}: {}", service.name, e),
            }
        }

        Ok(())
    }

    /// HTTPS services whose certificate has not been looked at within the
    /// certificate interval
    async fn certificates_due(&self, services: &[Service], now: DateTime<Utc>) -> Vec<Service> {
        let checked_at = self.certificate_checked_at.lock().await;
        services
            .iter()
            .filter(|s| s.is_https())
            .filter(|s| match checked_at.get(&s.id) {
                Some(last) => elapsed_at_least(*last, now, self.certificate_interval),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Send every alert through the alert pool and wait for all of them
    async fn dispatch(&self, alerts: Vec<OutboundAlert>, report: &mut CycleReport) {
        let sends = alerts.into_iter().map(|alert| async move {
            let channel = alert.channel.as_str();
            match self.dispatcher.send_async(channel, alert.request.clone()) {
                Ok(pending) => pending
                    .wait(self.alert_wait)
                    .await
                    .unwrap_or_else(|e| AlertResult::failure(channel, e.to_string())),
                Err(e) => {
                    warn!("Alert pool unavailable ({}), sending inline", e);
                    self.dispatcher.send(channel, &alert.request).await
                }
            }
        });

        for result in join_all(sends).await {
            if result.success {
                report.alerts_sent += 1;
            } else if result.error_message.as_deref() == Some(IN_COOLDOWN) {
                report.alerts_suppressed += 1;
            } else {
                debug!("Alert via {} failed: {:?}", result.channel, result.error_message);
                report.alerts_failed += 1;
            }
        }
    }

    /// Lifecycle, health and pool telemetry
    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            state: self.lifecycle.get(),
            healthy: self.is_healthy(),
            probe_pool: self.orchestrator.stats(),
            alerts: self.dispatcher.stats(),
        }
    }
}

/// Never checked, or the check interval has passed since the last check
pub fn is_due(service: &Service, now: DateTime<Utc>) -> bool {
    match service.last_checked {
        None => true,
        Some(last) => elapsed_at_least(last, now, service.check_interval),
    }
}

fn elapsed_at_least(since: DateTime<Utc>, now: DateTime<Utc>, interval: Duration) -> bool {
    match (now - since).to_std() {
        Ok(elapsed) => elapsed >= interval,
        // Clock went backwards; treat as due
        Err(_) => true,
    }
}

#[async_trait]
impl Lifecycle for Monitor {
    fn name(&self) -> &str {
        self.lifecycle.component()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    async fn initialize(&self) -> Result<()> {
        self.lifecycle
            .transition(&[LifecycleState::Uninitialized], LifecycleState::Initialized)?;

        let result = async {
            self.orchestrator.initialize().await?;
            self.dispatcher.initialize().await
        }
        .await;

        if let Err(e) = result {
            error!("Monitor failed to initialize: {}", e);
            self.lifecycle.fail();
            return Err(e);
        }
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.lifecycle
            .transition(&[LifecycleState::Initialized], LifecycleState::Running)?;
        self.orchestrator.start().await?;
        self.dispatcher.start().await?;
        info!("Monitor running");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.transition(
            &[LifecycleState::Initialized, LifecycleState::Running],
            LifecycleState::Stopped,
        )?;

        // Stop probing first so no new alerts are produced
        if let Err(e) = self.orchestrator.stop().await {
            warn!("Check orchestrator did not stop cleanly: {}", e);
        }
        if let Err(e) = self.dispatcher.stop().await {
            warn!("Alert dispatcher did not stop cleanly: {}", e);
        }
        info!("Monitor stopped");
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.lifecycle.get() == LifecycleState::Running
            && self.orchestrator.is_healthy()
            && self.dispatcher.is_healthy()
    }
}
