use januscope::config::Config;
use januscope::models::{ChannelKind, RecipientGroup, ServiceStatus};
use januscope::{Lifecycle, MemoryStore, Monitor, Service, Store};
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ops_group() -> RecipientGroup {
    RecipientGroup {
        id: 1,
        name: "ops".to_string(),
        channel: ChannelKind::Console,
        recipient: "ops-room".to_string(),
    }
}

fn always_due(id: i64, url: String) -> Service {
    Service::new(id, format!("svc-{}", id), url)
        .with_check_interval(Duration::ZERO)
        .with_timeout(Duration::from_secs(2))
        .with_retries(1, Duration::ZERO)
        .with_recipient_groups(vec![1])
}

async fn serve(server: &MockServer, status: u16) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

async fn running_monitor(config: Config, store: Arc<MemoryStore>) -> Monitor {
    let monitor = Monitor::new(&config, store).unwrap();
    monitor.initialize().await.unwrap();
    monitor.start().await.unwrap();
    monitor
}

#[tokio::test]
async fn outage_opens_one_incident_and_recovery_resolves_it() {
    let server = MockServer::start().await;
    let service = always_due(1, format!("{}/health", server.uri()));
    let store = Arc::new(MemoryStore::with_data(vec![service], vec![ops_group()]));
    let monitor = running_monitor(Config::default(), store.clone()).await;

    serve(&server, 503).await;
    let first = monitor.run_cycle().await.unwrap();
    assert_eq!(first.checked, 1);
    assert_eq!(first.down, 1);
    assert_eq!(first.incidents_opened, 1);
    assert_eq!(first.alerts_sent, 1);
    assert_eq!(store.service(1).await.unwrap().current_status, ServiceStatus::Down);

    let second = monitor.run_cycle().await.unwrap();
    assert_eq!(second.down, 1);
    assert_eq!(second.incidents_opened, 0);
    assert_eq!(second.alerts_sent, 0);
    assert_eq!(store.incidents_for(1).await.len(), 1);

    serve(&server, 200).await;
    let third = monitor.run_cycle().await.unwrap();
    assert_eq!(third.up, 1);
    assert_eq!(third.incidents_resolved, 1);
    assert_eq!(third.alerts_sent, 1);

    let incidents = store.incidents_for(1).await;
    assert!(incidents[0].resolved);
    assert!(incidents[0].duration_secs.unwrap() >= 0);
    assert!(store.find_active_incident(1).await.unwrap().is_none());
    assert_eq!(store.uptime_history(1).await.unwrap().len(), 3);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn repeat_outage_alert_is_held_by_cooldown() {
    let server = MockServer::start().await;
    let service = always_due(1, format!("{}/health", server.uri()));
    let store = Arc::new(MemoryStore::with_data(vec![service], vec![ops_group()]));
    let monitor = running_monitor(Config::default(), store.clone()).await;

    serve(&server, 500).await;
    assert_eq!(monitor.run_cycle().await.unwrap().alerts_sent, 1);

    serve(&server, 200).await;
    assert_eq!(monitor.run_cycle().await.unwrap().incidents_resolved, 1);

    serve(&server, 500).await;
    let flapped = monitor.run_cycle().await.unwrap();
    assert_eq!(flapped.incidents_opened, 1);
    assert_eq!(flapped.alerts_sent, 0);
    assert_eq!(flapped.alerts_suppressed, 1);

    assert_eq!(store.incidents_for(1).await.len(), 2);
    assert_eq!(monitor.dispatcher().stats().suppressed, 1);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn hung_service_does_not_stall_the_cycle() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hung"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let hung = always_due(2, format!("{}/hung", server.uri())).with_timeout(Duration::from_secs(60));
    let store = Arc::new(MemoryStore::with_data(
        vec![always_due(1, format!("{}/health", server.uri())), hung],
        vec![ops_group()],
    ));
    let config = Config {
        batch_wait_ceiling_secs: 1,
        ..Config::default()
    };
    let monitor = running_monitor(config, store.clone()).await;

    let started = Instant::now();
    let report = monitor.run_cycle().await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(report.checked, 2);
    assert_eq!(report.up, 1);
    assert_eq!(report.down, 1);
    assert_eq!(store.service(2).await.unwrap().current_status, ServiceStatus::Down);

    let stats = monitor.stats();
    assert!(stats.healthy);
    assert_eq!(stats.probe_pool.unwrap().pool_size, 10);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn services_are_only_probed_when_due() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = always_due(1, server.uri()).with_check_interval(Duration::from_secs(3600));
    let store = Arc::new(MemoryStore::with_data(vec![service], vec![ops_group()]));
    let monitor = running_monitor(Config::default(), store).await;

    assert_eq!(monitor.run_cycle().await.unwrap().checked, 1);
    assert_eq!(monitor.run_cycle().await.unwrap().checked, 0);

    monitor.stop().await.unwrap();
}
