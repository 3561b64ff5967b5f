//! Januscope availability and certificate monitoring library
//!
//! Probes HTTP(S) services through a bounded worker pool, inspects their TLS
//! certificates, turns status changes into incidents and routes the
//! resulting alerts through cooldown-gated channels.

pub mod alerts;
pub mod config;
pub mod errors;
pub mod incident;
pub mod inspector;
pub mod lifecycle;
pub mod models;
pub mod monitor;
pub mod orchestrator;
pub mod pool;
pub mod prober;
pub mod store;

pub use alerts::{AlertChannel, AlertDispatcher};
pub use config::Config;
pub use errors::{JanuscopeError, Result};
pub use incident::IncidentCoordinator;
pub use inspector::CertificateInspector;
pub use lifecycle::{Lifecycle, LifecycleState};
pub use models::{
    AlertRequest, AlertResult, CertificateCheckResult, ChannelKind, EventType, Incident,
    RecipientGroup, Service, ServiceStatus, UptimeCheckResult,
};
pub use monitor::{CycleReport, Monitor};
pub use orchestrator::CheckOrchestrator;
pub use prober::AvailabilityProber;
pub use store::{MemoryStore, Store};
