//! Januscope monitoring daemon and one-shot checks

use clap::{Parser, Subcommand, ValueEnum};
use januscope::alerts::AlertDispatcher;
use januscope::{
    AvailabilityProber, CertificateInspector, Config, JanuscopeError, Lifecycle, MemoryStore,
    Monitor, Result, Service,
};
use rand::Rng;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "januscope")]
#[command(about = "HTTP availability and TLS certificate monitor")]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "json", env = "JANUSCOPE_LOG_FORMAT", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Json,
    Pretty,
}

#[derive(Subcommand)]
enum Commands {
    /// Run check cycles until interrupted
    Run {
        /// Configuration file (JSON); environment only when omitted
        #[arg(short, long, env = "JANUSCOPE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Probe one URL and inspect its certificate
    Check {
        url: String,

        /// Per-attempt timeout in milliseconds
        #[arg(long, default_value = "10000")]
        timeout_ms: u64,

        /// Number of attempts
        #[arg(long, default_value = "1")]
        retries: u32,
    },

    /// Run the connectivity test of every configured alert channel
    TestChannels {
        #[arg(short, long, env = "JANUSCOPE_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(cli.log_format);

    match cli.command {
        Commands::Run { config } => run(load_config(config)?).await,
        Commands::Check {
            url,
            timeout_ms,
            retries,
        } => check(url, timeout_ms, retries).await,
        Commands::TestChannels { config } => test_channels(load_config(config)?).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env(),
    };

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        std::process::exit(1);
    }

    Ok(config)
}

async fn run(config: Config) -> Result<()> {
    info!("Starting Januscope v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Monitoring {} services, probe pool {}, alert pool {}, cycle every {}s",
        config.services.len(),
        config.probe_pool_size,
        config.alert_pool_size,
        config.cycle_interval_secs
    );

    let store = Arc::new(MemoryStore::with_data(
        config.seed_services(),
        config.recipient_groups.clone(),
    ));
    let monitor = Monitor::new(&config, store)?;

    monitor.initialize().await?;
    monitor.start().await?;

    let interval = config.cycle_interval();
    let max_jitter_ms = (interval.as_millis() / 10).min(5_000) as u64;

    loop {
        match monitor.run_cycle().await {
            Ok(report) => info!(
                checked = report.checked,
                down = report.down,
                alerts_sent = report.alerts_sent,
                alerts_suppressed = report.alerts_suppressed,
                alerts_failed = report.alerts_failed,
                "Cycle complete"
            ),
            Err(e) => error!("Cycle failed: {}", e),
        }

        let jitter = Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms));
        tokio::select! {
            _ = tokio::time::sleep(interval + jitter) => {}
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("Failed to wait for shutdown signal: {}", e);
                }
                info!("Shutdown signal received");
                break;
            }
        }
    }

    monitor.stop().await
}

async fn check(url: String, timeout_ms: u64, retries: u32) -> Result<()> {
    let config = Config::from_env();
    let service = Service::new(0, "adhoc", url)
        .with_timeout(Duration::from_millis(timeout_ms))
        .with_retries(retries, Duration::from_millis(config.default_retry_delay_ms));

    let prober = AvailabilityProber::new(&config)?;
    let uptime = prober.probe(&service).await;

    let certificate = if service.is_https() {
        let inspector = CertificateInspector::new(config.certificate_timeout())?;
        Some(inspector.inspect(&service).await)
    } else {
        None
    };

    let report = json!({
        "url": service.url,
        "uptime": uptime,
        "certificate": certificate,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn test_channels(config: Config) -> Result<()> {
    let dispatcher = AlertDispatcher::from_config(&config, Arc::new(MemoryStore::new()))?;

    let mut failures = 0;
    for channel in dispatcher.available_channels() {
        let result = dispatcher.test_channel(&channel).await;
        if !result.success {
            failures += 1;
        }
        println!("{}", serde_json::to_string(&result)?);
    }

    if failures > 0 {
        return Err(JanuscopeError::Channel(format!(
            "{} channel(s) failed the connectivity test",
            failures
        )));
    }
    Ok(())
}

/// Initialize structured logging
fn initialize_tracing(format: LogFormat) {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        LogFormat::Json => {
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .with_file(false)
                .with_line_number(false)
                .json();

            tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter_layer)
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .init();
        }
    }
}
