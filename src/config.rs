//! Configuration management for the check-and-alert engine

use crate::errors::{JanuscopeError, Result};
use crate::models::{ChannelKind, RecipientGroup, Service};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum concurrent probes against third-party hosts
    pub probe_pool_size: usize,

    /// Maximum concurrent asynchronous alert sends
    pub alert_pool_size: usize,

    /// Hard ceiling for waiting on one batch result
    pub batch_wait_ceiling_secs: u64,

    /// Defaults applied to services that do not set their own values
    pub default_timeout_ms: u64,
    pub default_max_retries: u32,
    pub default_retry_delay_ms: u64,
    pub default_check_interval_secs: u64,

    /// Connect + handshake timeout for certificate inspection
    pub certificate_timeout_ms: u64,

    /// Remaining-days thresholds for certificate expiry events
    pub expiry_thresholds_days: Vec<u32>,

    /// Cooldown applied after a successful availability alert
    pub alert_cooldown_secs: u64,

    /// Cooldown applied after a successful certificate alert
    pub certificate_alert_cooldown_secs: u64,

    /// Bounded wait for in-flight work when a pool shuts down
    pub shutdown_grace_secs: u64,

    /// Tick of the binary's run loop
    pub cycle_interval_secs: u64,

    /// Minimum spacing between certificate inspections of one service
    pub certificate_check_interval_secs: u64,

    /// Identifying user agent sent with every probe
    pub user_agent: String,

    pub channels: ChannelsConfig,

    /// Seed data for the in-memory store
    pub services: Vec<ServiceDefinition>,
    pub recipient_groups: Vec<RecipientGroup>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            probe_pool_size: 10,
            alert_pool_size: 4,
            batch_wait_ceiling_secs: 30,
            default_timeout_ms: 10_000,
            default_max_retries: 3,
            default_retry_delay_ms: 2_000,
            default_check_interval_secs: 60,
            certificate_timeout_ms: 10_000,
            expiry_thresholds_days: vec![30, 14, 7, 3],
            alert_cooldown_secs: 30 * 60,
            certificate_alert_cooldown_secs: 24 * 60 * 60,
            shutdown_grace_secs: 10,
            cycle_interval_secs: 60,
            certificate_check_interval_secs: 6 * 60 * 60,
            user_agent: format!("Januscope/{}", env!("CARGO_PKG_VERSION")),
            channels: ChannelsConfig::default(),
            services: Vec::new(),
            recipient_groups: Vec::new(),
        }
    }
}

/// Alert channel configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelsConfig {
    pub email: Option<EmailConfig>,
    pub chat_bot: Option<ChatBotConfig>,
    pub console: ConsoleConfig,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            email: None,
            chat_bot: None,
            console: ConsoleConfig { enabled: true },
        }
    }
}

impl ChannelsConfig {
    /// Whether a channel of this kind has configuration to build from
    pub fn is_configured(&self, kind: ChannelKind) -> bool {
        match kind {
            ChannelKind::Email => self.email.is_some(),
            ChannelKind::ChatBot => self.chat_bot.is_some(),
            ChannelKind::Console => true,
        }
    }
}

/// SMTP configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub enabled: bool,
    pub smtp_server: String,
    pub smtp_port: u16,
    pub from_address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub use_tls: bool,
    /// Connect and command timeout for the SMTP session
    #[serde(default = "default_smtp_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_smtp_timeout_ms() -> u64 {
    10_000
}

/// Bot messaging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatBotConfig {
    pub enabled: bool,
    #[serde(default = "default_bot_api_url")]
    pub api_url: String,
    pub bot_token: String,
    #[serde(default = "default_bot_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_bot_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_bot_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
}

/// Service entry as written in a config file; unset values fall back to the
/// global defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub check_interval_secs: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub recipient_group_ids: Vec<i64>,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env();
        config
    }

    /// Load configuration from a JSON file, then apply environment overrides
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            JanuscopeError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|e| {
            JanuscopeError::Config(format!("cannot parse {}: {}", path.display(), e))
        })?;
        config.apply_env();
        Ok(config)
    }

    /// Override fields from `JANUSCOPE_*` environment variables
    pub fn apply_env(&mut self) {
        if let Some(size) = env_parse("JANUSCOPE_PROBE_POOL_SIZE") {
            self.probe_pool_size = size;
        }

        if let Some(size) = env_parse("JANUSCOPE_ALERT_POOL_SIZE") {
            self.alert_pool_size = size;
        }

        if let Some(secs) = env_parse("JANUSCOPE_BATCH_WAIT_CEILING_SECS") {
            self.batch_wait_ceiling_secs = secs;
        }

        if let Some(ms) = env_parse("JANUSCOPE_DEFAULT_TIMEOUT_MS") {
            self.default_timeout_ms = ms;
        }

        if let Some(retries) = env_parse("JANUSCOPE_DEFAULT_MAX_RETRIES") {
            self.default_max_retries = retries;
        }

        if let Some(ms) = env_parse("JANUSCOPE_DEFAULT_RETRY_DELAY_MS") {
            self.default_retry_delay_ms = ms;
        }

        if let Ok(thresholds) = env::var("JANUSCOPE_EXPIRY_THRESHOLDS") {
            let parsed: Vec<u32> = thresholds
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                self.expiry_thresholds_days = parsed;
            }
        }

        if let Some(secs) = env_parse("JANUSCOPE_ALERT_COOLDOWN_SECS") {
            self.alert_cooldown_secs = secs;
        }

        if let Some(secs) = env_parse("JANUSCOPE_CYCLE_INTERVAL_SECS") {
            self.cycle_interval_secs = secs;
        }

        if let (Ok(token), Some(bot)) = (env::var("JANUSCOPE_CHAT_BOT_TOKEN"), self.channels.chat_bot.as_mut()) {
            bot.bot_token = token;
        }

        if let (Ok(password), Some(email)) = (env::var("JANUSCOPE_SMTP_PASSWORD"), self.channels.email.as_mut()) {
            email.password = password;
        }
    }

    /// Validate the configuration and normalise the threshold list
    pub fn validate(&mut self) -> std::result::Result<(), String> {
        if self.probe_pool_size == 0 {
            return Err("probe_pool_size must be greater than 0".to_string());
        }

        if self.alert_pool_size == 0 {
            return Err("alert_pool_size must be greater than 0".to_string());
        }

        if self.batch_wait_ceiling_secs == 0 {
            return Err("batch_wait_ceiling_secs must be greater than 0".to_string());
        }

        if self.expiry_thresholds_days.is_empty() {
            return Err("at least one expiry threshold must be specified".to_string());
        }

        if self.expiry_thresholds_days.contains(&0) {
            return Err("expiry thresholds must be greater than 0".to_string());
        }

        // Channel sends must finish inside the alert wait ceiling
        let ceiling_ms = self.batch_wait_ceiling_secs.saturating_mul(1000);
        if let Some(email) = &self.channels.email
            && email.timeout_ms >= ceiling_ms
        {
            return Err("email timeout_ms must be below batch_wait_ceiling_secs".to_string());
        }
        if let Some(bot) = &self.channels.chat_bot
            && bot.timeout_ms >= ceiling_ms
        {
            return Err("chat_bot timeout_ms must be below batch_wait_ceiling_secs".to_string());
        }

        self.expiry_thresholds_days.sort_unstable_by(|a, b| b.cmp(a));
        self.expiry_thresholds_days.dedup();

        let mut group_ids = HashSet::new();
        for group in &self.recipient_groups {
            if !group_ids.insert(group.id) {
                return Err(format!("duplicate recipient group id {}", group.id));
            }
            if !self.channels.is_configured(group.channel) {
                return Err(format!(
                    "recipient group '{}' uses channel '{}' which is not configured",
                    group.name, group.channel
                ));
            }
        }

        let mut service_ids = HashSet::new();
        for service in &self.services {
            if !service_ids.insert(service.id) {
                return Err(format!("duplicate service id {}", service.id));
            }
            if service.url.trim().is_empty() {
                return Err(format!("service '{}' has an empty url", service.name));
            }
            if let Some(missing) = service
                .recipient_group_ids
                .iter()
                .find(|id| !group_ids.contains(id))
            {
                return Err(format!(
                    "service '{}' references unknown recipient group {}",
                    service.name, missing
                ));
            }
        }

        Ok(())
    }

    pub fn batch_wait_ceiling(&self) -> Duration {
        Duration::from_secs(self.batch_wait_ceiling_secs)
    }

    pub fn certificate_timeout(&self) -> Duration {
        Duration::from_millis(self.certificate_timeout_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.alert_cooldown_secs)
    }

    pub fn certificate_alert_cooldown(&self) -> Duration {
        Duration::from_secs(self.certificate_alert_cooldown_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }

    pub fn certificate_check_interval(&self) -> Duration {
        Duration::from_secs(self.certificate_check_interval_secs)
    }

    /// Resolve the seed service definitions against the defaults
    pub fn seed_services(&self) -> Vec<Service> {
        self.services
            .iter()
            .map(|definition| {
                let mut service = Service::new(definition.id, &definition.name, &definition.url)
                    .with_check_interval(Duration::from_secs(
                        definition
                            .check_interval_secs
                            .unwrap_or(self.default_check_interval_secs),
                    ))
                    .with_timeout(Duration::from_millis(
                        definition.timeout_ms.unwrap_or(self.default_timeout_ms),
                    ))
                    .with_retries(
                        definition.max_retries.unwrap_or(self.default_max_retries),
                        Duration::from_millis(
                            definition.retry_delay_ms.unwrap_or(self.default_retry_delay_ms),
                        ),
                    )
                    .with_recipient_groups(definition.recipient_group_ids.clone());
                service.headers = definition.headers.clone();
                service.active = definition.active;
                service
            })
            .collect()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|value| value.trim().parse().ok())
}
