//! Single-target and batch checks on top of a bounded probe pool

use crate::config::Config;
use crate::errors::{JanuscopeError, Result};
use crate::inspector::CertificateInspector;
use crate::lifecycle::{Lifecycle, LifecycleCell, LifecycleState};
use crate::models::{CertificateCheckResult, Service, UptimeCheckResult};
use crate::pool::{PendingResult, PoolStats, WaitError, WorkerPool};
use crate::prober::AvailabilityProber;
use async_trait::async_trait;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Runs probes and inspections, alone or as isolated batches
pub struct CheckOrchestrator {
    prober: Arc<AvailabilityProber>,
    inspector: Arc<CertificateInspector>,
    pool: RwLock<Option<Arc<WorkerPool>>>,
    lifecycle: LifecycleCell,
    pool_size: usize,
    wait_ceiling: Duration,
    shutdown_grace: Duration,
}

impl CheckOrchestrator {
    /// Create an orchestrator; the pool is created at `initialize`
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self {
            prober: Arc::new(AvailabilityProber::new(config)?),
            inspector: Arc::new(CertificateInspector::new(config.certificate_timeout())?),
            pool: RwLock::new(None),
            lifecycle: LifecycleCell::new("check-orchestrator"),
            pool_size: config.probe_pool_size,
            wait_ceiling: config.batch_wait_ceiling(),
            shutdown_grace: config.shutdown_grace(),
        })
    }

    /// Probe one service inline
    pub async fn check_uptime(&self, service: &Service) -> UptimeCheckResult {
        self.prober.probe(service).await
    }

    /// Inspect one service's certificate inline
    pub async fn check_certificate(&self, service: &Service) -> CertificateCheckResult {
        self.inspector.inspect(service).await
    }

    /// Probe every service through the pool. Returns exactly one result per
    /// service, in input order; a check that misses the wait ceiling is
    /// recorded as DOWN.
    #[instrument(skip(self, services), fields(count = services.len()))]
    pub async fn check_all_uptime(&self, services: &[Service]) -> Result<Vec<UptimeCheckResult>> {
        let pool = self.running_pool()?;

        let pending: Vec<_> = services
            .iter()
            .map(|service| {
                let prober = Arc::clone(&self.prober);
                let owned = service.clone();
                pool.submit(async move { prober.probe(&owned).await })
            })
            .collect();

        let mut results = Vec::with_capacity(services.len());
        for (service, submitted) in services.iter().zip(pending) {
            let result = match self.collect(service, submitted).await {
                Ok(result) => result,
                Err(reason) => UptimeCheckResult::down(service.id, reason),
            };
            results.push(result);
        }

        Ok(results)
    }

    /// Inspect every HTTPS service through the pool, one result per input
    #[instrument(skip(self, services), fields(count = services.len()))]
    pub async fn check_all_certificates(
        &self,
        services: &[Service],
    ) -> Result<Vec<CertificateCheckResult>> {
        let pool = self.running_pool()?;

        let pending: Vec<_> = services
            .iter()
            .map(|service| {
                let inspector = Arc::clone(&self.inspector);
                let owned = service.clone();
                pool.submit(async move { inspector.inspect(&owned).await })
            })
            .collect();

        let mut results = Vec::with_capacity(services.len());
        for (service, submitted) in services.iter().zip(pending) {
            let result = match self.collect(service, submitted).await {
                Ok(result) => result,
                Err(reason) => CertificateCheckResult::failure(service.id, host_of(&service.url), reason),
            };
            results.push(result);
        }

        Ok(results)
    }

    /// Wait on one submitted check, converting every way it can go missing
    /// into a failure message
    async fn collect<T>(
        &self,
        service: &Service,
        submitted: Result<PendingResult<T>>,
    ) -> std::result::Result<T, String> {
        let pending = submitted.map_err(|e| {
            warn!("Could not submit check for {}: {}", service.name, e);
            format!("Check was not scheduled: {}", e)
        })?;

        pending.wait(self.wait_ceiling).await.map_err(|e| {
            warn!("Lost check result for {}: {}", service.name, e);
            match e {
                WaitError::TimedOut(ceiling) => {
                    format!("Check timed out after {}s", ceiling.as_secs())
                }
                other => format!("Check did not complete: {}", other),
            }
        })
    }

    fn running_pool(&self) -> Result<Arc<WorkerPool>> {
        self.lifecycle.ensure_running()?;
        self.pool
            .read()
            .ok()
            .and_then(|pool| pool.clone())
            .ok_or_else(|| JanuscopeError::Pool("probe pool is not available".to_string()))
    }

    /// Probe pool counters, once initialized
    pub fn stats(&self) -> Option<PoolStats> {
        self.pool
            .read()
            .ok()
            .and_then(|pool| pool.as_ref().map(|p| p.stats()))
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url.trim())
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

#[async_trait]
impl Lifecycle for CheckOrchestrator {
    fn name(&self) -> &str {
        self.lifecycle.component()
    }

    fn state(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    async fn initialize(&self) -> Result<()> {
        self.lifecycle
            .transition(&[LifecycleState::Uninitialized], LifecycleState::Initialized)?;

        let pool = match WorkerPool::new("probe", self.pool_size) {
            Ok(pool) => pool,
            Err(e) => {
                self.lifecycle.fail();
                return Err(e);
            }
        };

        let mut slot = self
            .pool
            .write()
            .map_err(|_| JanuscopeError::Lifecycle("probe pool lock poisoned".to_string()))?;
        *slot = Some(Arc::new(pool));

        info!("Check orchestrator initialized with {} workers", self.pool_size);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.lifecycle
            .transition(&[LifecycleState::Initialized], LifecycleState::Running)
    }

    async fn stop(&self) -> Result<()> {
        self.lifecycle.transition(
            &[LifecycleState::Initialized, LifecycleState::Running],
            LifecycleState::Stopped,
        )?;

        let pool = self.pool.read().ok().and_then(|pool| pool.clone());
        if let Some(pool) = pool {
            pool.shutdown(self.shutdown_grace).await;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.lifecycle.get() == LifecycleState::Running
            && self
                .pool
                .read()
                .ok()
                .and_then(|pool| pool.as_ref().map(|p| p.is_healthy()))
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inspector::NOT_HTTPS;
    use crate::models::ServiceStatus;
    use tokio_test::assert_err;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn running(config: Config) -> CheckOrchestrator {
        let orchestrator = CheckOrchestrator::new(&config).unwrap();
        orchestrator.initialize().await.unwrap();
        orchestrator.start().await.unwrap();
        orchestrator
    }

    fn quick(id: i64, url: String) -> Service {
        Service::new(id, format!("svc-{}", id), url)
            .with_timeout(Duration::from_secs(5))
            .with_retries(1, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_batch_requires_running_state() {
        let orchestrator = CheckOrchestrator::new(&Config::default()).unwrap();
        assert_err!(orchestrator.check_all_uptime(&[]).await);
        assert!(!orchestrator.is_healthy());
        assert!(orchestrator.stats().is_none());
    }

    #[tokio::test]
    async fn test_zero_pool_is_fatal_at_initialize() {
        let config = Config {
            probe_pool_size: 0,
            ..Config::default()
        };
        let orchestrator = CheckOrchestrator::new(&config).unwrap();

        assert!(orchestrator.initialize().await.is_err());
        assert_eq!(orchestrator.state(), LifecycleState::Failed);
    }

    #[tokio::test]
    async fn test_hung_target_does_not_stall_batch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fast"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/hung"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let config = Config {
            batch_wait_ceiling_secs: 1,
            ..Config::default()
        };
        let orchestrator = running(config).await;
        let services = vec![
            quick(1, format!("{}/fast", server.uri())),
            quick(2, format!("{}/hung", server.uri())),
            quick(3, format!("{}/fast", server.uri())),
        ];

        let started = std::time::Instant::now();
        let results = orchestrator.check_all_uptime(&services).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, ServiceStatus::Up);
        assert_eq!(results[1].status, ServiceStatus::Down);
        assert_eq!(results[1].service_id, 2);
        assert!(results[1].error_message.as_deref().unwrap().contains("timed out"));
        assert_eq!(results[2].status, ServiceStatus::Up);
    }

    #[tokio::test]
    async fn test_certificate_batch_covers_every_service() {
        let orchestrator = running(Config::default()).await;
        let services = vec![
            quick(1, "http://plain.example.com".to_string()),
            quick(2, "https://127.0.0.1:9".to_string()),
        ];

        let results = orchestrator.check_all_certificates(&services).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].error_message.as_deref(), Some(NOT_HTTPS));
        assert!(!results[1].valid);
    }

    #[tokio::test]
    async fn test_stats_and_stop() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let orchestrator = running(Config::default()).await;
        orchestrator
            .check_all_uptime(&[quick(1, server.uri())])
            .await
            .unwrap();

        let stats = orchestrator.stats().unwrap();
        assert_eq!(stats.pool_size, 10);
        assert_eq!(stats.completed, 1);
        assert!(orchestrator.is_healthy());

        orchestrator.stop().await.unwrap();
        assert!(!orchestrator.is_healthy());
        assert_eq!(orchestrator.state(), LifecycleState::Stopped);
    }
}
