//! Data model shared by the probers, the incident coordinator and the alert path

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Availability state of a monitored service
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    Up,
    Down,
    #[default]
    Unknown,
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceStatus::Up => write!(f, "UP"),
            ServiceStatus::Down => write!(f, "DOWN"),
            ServiceStatus::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

impl From<&str> for ServiceStatus {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "UP" => ServiceStatus::Up,
            "DOWN" => ServiceStatus::Down,
            _ => ServiceStatus::Unknown,
        }
    }
}

/// A monitored HTTP(S) endpoint
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub check_interval: Duration,
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub current_status: ServiceStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub headers: HashMap<String, String>,
    pub recipient_group_ids: Vec<i64>,
    pub active: bool,
}

impl Service {
    pub fn new(id: i64, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            check_interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            current_status: ServiceStatus::Unknown,
            last_checked: None,
            headers: HashMap::new(),
            recipient_group_ids: Vec::new(),
            active: true,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: ServiceStatus) -> Self {
        self.current_status = status;
        self
    }

    pub fn with_recipient_groups(mut self, group_ids: Vec<i64>) -> Self {
        self.recipient_group_ids = group_ids;
        self
    }

    pub fn is_https(&self) -> bool {
        self.url.trim_start().to_lowercase().starts_with("https://")
    }
}

/// Outcome of one availability probe (the final attempt when retried)
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct UptimeCheckResult {
    pub id: Uuid,
    pub service_id: i64,
    pub status: ServiceStatus,
    pub response_time_ms: Option<u64>,
    pub http_code: Option<u16>,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl UptimeCheckResult {
    pub fn up(service_id: i64, http_code: u16, response_time_ms: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            status: ServiceStatus::Up,
            response_time_ms: Some(response_time_ms),
            http_code: Some(http_code),
            error_message: None,
            checked_at: Utc::now(),
        }
    }

    pub fn down(service_id: i64, error_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            status: ServiceStatus::Down,
            response_time_ms: None,
            http_code: None,
            error_message: Some(error_message.into()),
            checked_at: Utc::now(),
        }
    }

    pub fn with_http_code(mut self, http_code: u16) -> Self {
        self.http_code = Some(http_code);
        self
    }

    pub fn with_response_time(mut self, response_time_ms: u64) -> Self {
        self.response_time_ms = Some(response_time_ms);
        self
    }

    pub fn is_up(&self) -> bool {
        self.status == ServiceStatus::Up
    }
}

/// Certificate health facts for one TLS inspection
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct CertificateCheckResult {
    pub id: Uuid,
    pub service_id: i64,
    pub domain: String,
    pub issuer: Option<String>,
    pub subject: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    /// Calendar days until `valid_to`; negative once the certificate has expired
    pub days_remaining: Option<i64>,
    pub serial_number: Option<String>,
    pub fingerprint: Option<String>,
    pub algorithm: Option<String>,
    pub key_size: Option<u32>,
    pub self_signed: bool,
    pub valid: bool,
    pub error_message: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl CertificateCheckResult {
    pub fn failure(service_id: i64, domain: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            domain: domain.into(),
            valid: false,
            error_message: Some(error_message.into()),
            checked_at: Utc::now(),
            ..Default::default()
        }
    }

    /// True when the leaf certificate was actually read
    pub fn has_certificate(&self) -> bool {
        self.valid_to.is_some()
    }
}

/// A continuous DOWN period for one service
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: Uuid,
    pub service_id: i64,
    pub started_at: DateTime<Utc>,
    pub recovered_at: Option<DateTime<Utc>>,
    /// Whole seconds between `started_at` and `recovered_at`
    pub duration_secs: Option<i64>,
    pub error_message: Option<String>,
    pub resolved: bool,
}

impl Incident {
    pub fn open(service_id: i64, error_message: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            service_id,
            started_at: Utc::now(),
            recovered_at: None,
            duration_secs: None,
            error_message,
            resolved: false,
        }
    }

    pub fn resolve(&mut self, recovered_at: DateTime<Utc>) {
        self.recovered_at = Some(recovered_at);
        self.duration_secs = Some((recovered_at - self.started_at).num_seconds());
        self.resolved = true;
    }
}

/// Kind of customer-visible event an alert is raised for
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum EventType {
    ServiceDown,
    ServiceRecovered,
    /// Certificate crossed below this many remaining days
    CertificateExpiring(u32),
    CertificateExpired,
    Manual,
}

impl EventType {
    pub fn is_certificate_event(&self) -> bool {
        matches!(self, EventType::CertificateExpiring(_) | EventType::CertificateExpired)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::ServiceDown => write!(f, "SERVICE_DOWN"),
            EventType::ServiceRecovered => write!(f, "SERVICE_RECOVERED"),
            EventType::CertificateExpiring(days) => write!(f, "CERT_EXPIRY_{}D", days),
            EventType::CertificateExpired => write!(f, "CERT_EXPIRED"),
            EventType::Manual => write!(f, "MANUAL"),
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SERVICE_DOWN" => Ok(EventType::ServiceDown),
            "SERVICE_RECOVERED" => Ok(EventType::ServiceRecovered),
            "CERT_EXPIRED" => Ok(EventType::CertificateExpired),
            "MANUAL" => Ok(EventType::Manual),
            other => other
                .strip_prefix("CERT_EXPIRY_")
                .and_then(|rest| rest.strip_suffix('D'))
                .and_then(|days| days.parse().ok())
                .map(EventType::CertificateExpiring)
                .ok_or_else(|| format!("unknown event type: {}", s)),
        }
    }
}

impl From<EventType> for String {
    fn from(event: EventType) -> Self {
        event.to_string()
    }
}

impl TryFrom<String> for EventType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Key of the cooldown table
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CooldownKey {
    pub service_id: i64,
    pub recipient_group_id: Option<i64>,
    pub event_type: EventType,
}

/// Persisted cooldown row, one per `CooldownKey`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NotificationCooldown {
    pub key: CooldownKey,
    pub last_notified_at: DateTime<Utc>,
    pub cooldown_until: DateTime<Utc>,
}

impl NotificationCooldown {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        now < self.cooldown_until
    }
}

/// Alert delivery mechanism. The set is closed so that configuration can
/// reject unknown names at load time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Email,
    #[serde(rename = "chatbot")]
    ChatBot,
    Console,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [ChannelKind::Email, ChannelKind::ChatBot, ChannelKind::Console];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Email => "email",
            ChannelKind::ChatBot => "chatbot",
            ChannelKind::Console => "console",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "email" => Ok(ChannelKind::Email),
            "chatbot" => Ok(ChannelKind::ChatBot),
            "console" => Ok(ChannelKind::Console),
            _ => Err(format!("unknown channel: {}", s)),
        }
    }
}

/// Set of people notified together through one channel
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RecipientGroup {
    pub id: i64,
    pub name: String,
    pub channel: ChannelKind,
    /// Channel-specific address: mail addresses (comma separated) or chat id
    pub recipient: String,
}

/// One message to deliver
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AlertRequest {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub event_type: EventType,
    pub service_id: Option<i64>,
    pub recipient_group_id: Option<i64>,
    pub variables: HashMap<String, String>,
}

impl AlertRequest {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            event_type,
            service_id: None,
            recipient_group_id: None,
            variables: HashMap::new(),
        }
    }

    pub fn for_service(mut self, service_id: i64) -> Self {
        self.service_id = Some(service_id);
        self
    }

    pub fn for_group(mut self, recipient_group_id: i64) -> Self {
        self.recipient_group_id = Some(recipient_group_id);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_variables(mut self, variables: HashMap<String, String>) -> Self {
        self.variables.extend(variables);
        self
    }

    /// Cooldown key, or `None` for requests not tied to a service
    pub fn cooldown_key(&self) -> Option<CooldownKey> {
        self.service_id.map(|service_id| CooldownKey {
            service_id,
            recipient_group_id: self.recipient_group_id,
            event_type: self.event_type.clone(),
        })
    }
}

/// Outcome of one delivery attempt through one channel
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AlertResult {
    pub channel: String,
    pub success: bool,
    pub error_message: Option<String>,
}

impl AlertResult {
    pub fn success(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            success: true,
            error_message: None,
        }
    }

    pub fn failure(channel: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            success: false,
            error_message: Some(error_message.into()),
        }
    }
}
