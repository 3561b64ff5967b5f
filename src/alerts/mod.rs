//! Alert dispatch: channel registry, cooldown gating and rendering

pub mod channel;
pub mod chatbot;
pub mod cooldown;
pub mod console;
pub mod email;
pub mod template;

pub use channel::AlertChannel;
pub use chatbot::ChatBotChannel;
pub use console::ConsoleChannel;
pub use cooldown::CooldownGate;
pub use email::EmailChannel;

use crate::config::Config;
use crate::errors::{JanuscopeError, Result};
use crate::lifecycle::{Lifecycle, LifecycleCell, LifecycleState};
use crate::models::{AlertRequest, AlertResult, ChannelKind};
use crate::pool::{PendingResult, PoolStats, WorkerPool};
use crate::store::Store;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const CHANNEL_NOT_FOUND: &str = "channel not found";
pub const CHANNEL_DISABLED: &str = "channel is disabled";
pub const IN_COOLDOWN: &str = "in cooldown period";

/// Routes alert requests to channels. Cheap to clone; clones share the
/// registry, cooldown gate and pool.
#[derive(Clone)]
pub struct AlertDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    channels: HashMap<ChannelKind, Arc<dyn AlertChannel>>,
    cooldowns: CooldownGate,
    pool: RwLock<Option<Arc<WorkerPool>>>,
    lifecycle: LifecycleCell,
    pool_size: usize,
    shutdown_grace: Duration,
    sent: AtomicU64,
    failed: AtomicU64,
    suppressed: AtomicU64,
}

/// Delivery counters plus alert pool telemetry
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStats {
    pub sent: u64,
    pub failed: u64,
    pub suppressed: u64,
    pub enabled_channels: Vec<String>,
    pub pool: Option<PoolStats>,
}

impl AlertDispatcher {
    /// Register every channel that has configuration
    pub fn from_config(config: &Config, store: Arc<dyn Store>) -> Result<Self> {
        let mut channels: Vec<Arc<dyn AlertChannel>> = Vec::new();

        if let Some(email) = &config.channels.email {
            channels.push(Arc::new(EmailChannel::new(email.clone())?));
        }

        if let Some(chat_bot) = &config.channels.chat_bot {
            channels.push(Arc::new(ChatBotChannel::new(chat_bot.clone())?));
        }

        channels.push(Arc::new(ConsoleChannel::new(config.channels.console.enabled)));

        Ok(Self::with_channels(config, store, channels))
    }

    /// Build a dispatcher over an explicit channel list
    pub fn with_channels(
        config: &Config,
        store: Arc<dyn Store>,
        channels: Vec<Arc<dyn AlertChannel>>,
    ) -> Self {
        let channels = channels
            .into_iter()
            .map(|channel| (channel.kind(), channel))
            .collect();

        Self {
            inner: Arc::new(DispatcherInner {
                channels,
                cooldowns: CooldownGate::new(
                    store,
                    config.alert_cooldown(),
                    config.certificate_alert_cooldown(),
                ),
                pool: RwLock::new(None),
                lifecycle: LifecycleCell::new("alert-dispatcher"),
                pool_size: config.alert_pool_size,
                shutdown_grace: config.shutdown_grace(),
                sent: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                suppressed: AtomicU64::new(0),
            }),
        }
    }

    /// Send through one named channel
    pub async fn send(&self, channel: &str, request: &AlertRequest) -> AlertResult {
        match self.lookup(channel) {
            Ok(channel) => {
                let name = channel.name();
                self.deliver(&[channel], request)
                    .await
                    .pop()
                    .unwrap_or_else(|| AlertResult::failure(name, "no result"))
            }
            Err(result) => result,
        }
    }

    /// Broadcast to every enabled channel. The cooldown is checked once for
    /// the request and recorded when at least one channel succeeds.
    pub async fn send_to_all(&self, request: &AlertRequest) -> Vec<AlertResult> {
        let channels: Vec<Arc<dyn AlertChannel>> = ChannelKind::ALL
            .iter()
            .filter_map(|kind| self.inner.channels.get(kind))
            .filter(|channel| channel.is_enabled())
            .cloned()
            .collect();

        if channels.is_empty() {
            warn!("No enabled channels to broadcast {}", request.event_type);
            return Vec::new();
        }

        self.deliver(&channels, request).await
    }

    /// Hand the send to the alert pool. Concurrent async sends carry no
    /// ordering guarantee.
    pub fn send_async(&self, channel: &str, request: AlertRequest) -> Result<PendingResult<AlertResult>> {
        self.inner.lifecycle.ensure_running()?;
        let pool = self
            .inner
            .pool
            .read()
            .ok()
            .and_then(|pool| pool.clone())
            .ok_or_else(|| JanuscopeError::Pool("alert pool is not available".to_string()))?;

        let dispatcher = self.clone();
        let channel = channel.to_string();
        pool.submit(async move { dispatcher.send(&channel, &request).await })
    }

    /// Run one channel's connectivity test
    pub async fn test_channel(&self, channel: &str) -> AlertResult {
        match self.lookup(channel) {
            Ok(channel) => channel.test_connection().await,
            Err(result) => result,
        }
    }

    /// Names of the channels that are configured and enabled
    pub fn enabled_channels(&self) -> Vec<String> {
        ChannelKind::ALL
            .iter()
            .filter(|kind| {
                self.inner
                    .channels
                    .get(kind)
                    .is_some_and(|channel| channel.is_enabled())
            })
            .map(|kind| kind.to_string())
            .collect()
    }

    /// Names of every registered channel
    pub fn available_channels(&self) -> Vec<String> {
        ChannelKind::ALL
            .iter()
            .filter(|kind| self.inner.channels.contains_key(kind))
            .map(|kind| kind.to_string())
            .collect()
    }

    /// Delivery counters and pool telemetry
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            sent: self.inner.sent.load(Ordering::SeqCst),
            failed: self.inner.failed.load(Ordering::SeqCst),
            suppressed: self.inner.suppressed.load(Ordering::SeqCst),
            enabled_channels: self.enabled_channels(),
            pool: self
                .inner
                .pool
                .read()
                .ok()
                .and_then(|pool| pool.as_ref().map(|p| p.stats())),
        }
    }

    fn lookup(&self, name: &str) -> std::result::Result<Arc<dyn AlertChannel>, AlertResult> {
        let channel = name
            .parse::<ChannelKind>()
            .ok()
            .and_then(|kind| self.inner.channels.get(&kind))
            .ok_or_else(|| AlertResult::failure(name, CHANNEL_NOT_FOUND))?;

        if !channel.is_enabled() {
            return Err(AlertResult::failure(name, CHANNEL_DISABLED));
        }

        Ok(Arc::clone(channel))
    }

    /// Cooldown check, render, send, record. The per-key lock is held across
    /// the whole sequence so concurrent sends for one key cannot both pass.
    async fn deliver(&self, channels: &[Arc<dyn AlertChannel>], request: &AlertRequest) -> Vec<AlertResult> {
        let key = request.cooldown_key();
        let _guard = match &key {
            Some(key) => Some(self.inner.cooldowns.lock(key).await),
            None => None,
        };

        if let Some(key) = &key {
            match self.inner.cooldowns.is_active(key, Utc::now()).await {
                Ok(false) => {}
                Ok(true) => {
                    self.inner.suppressed.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        "Suppressed {} for service {} (group {:?}): in cooldown",
                        key.event_type, key.service_id, key.recipient_group_id
                    );
                    return channels
                        .iter()
                        .map(|channel| AlertResult::failure(channel.name(), IN_COOLDOWN))
                        .collect();
                }
                Err(e) => {
                    error!("Cooldown lookup failed for service {}: {}", key.service_id, e);
                    return channels
                        .iter()
                        .map(|channel| AlertResult::failure(channel.name(), format!("cooldown lookup failed: {}", e)))
                        .collect();
                }
            }
        }

        let rendered = render_request(request);
        let results = join_all(channels.iter().map(|channel| channel.send(&rendered))).await;

        let successes = results.iter().filter(|r| r.success).count() as u64;
        self.inner.sent.fetch_add(successes, Ordering::SeqCst);
        self.inner
            .failed
            .fetch_add(results.len() as u64 - successes, Ordering::SeqCst);

        if successes > 0
            && let Some(key) = &key
            && let Err(e) = self.inner.cooldowns.record(key, Utc::now()).await
        {
            error!("Could not record cooldown for service {}: {}", key.service_id, e);
        }

        results
    }
}

/// Substitute the request's variables into its subject and body
pub fn render_request(request: &AlertRequest) -> AlertRequest {
    AlertRequest {
        subject: template::render(&request.subject, &request.variables),
        body: template::render(&request.body, &request.variables),
        ..request.clone()
    }
}

#[async_trait]
impl Lifecycle for AlertDispatcher {
    fn name(&self) -> &str {
        self.inner.lifecycle.component()
    }

    fn state(&self) -> LifecycleState {
        self.inner.lifecycle.get()
    }

    async fn initialize(&self) -> Result<()> {
        self.inner
            .lifecycle
            .transition(&[LifecycleState::Uninitialized], LifecycleState::Initialized)?;

        let pool = match WorkerPool::new("alerts", self.inner.pool_size) {
            Ok(pool) => pool,
            Err(e) => {
                self.inner.lifecycle.fail();
                return Err(e);
            }
        };

        let mut slot = self
            .inner
            .pool
            .write()
            .map_err(|_| JanuscopeError::Lifecycle("alert pool lock poisoned".to_string()))?;
        *slot = Some(Arc::new(pool));

        info!(
            "Alert dispatcher initialized with channels {:?}",
            self.enabled_channels()
        );
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.inner
            .lifecycle
            .transition(&[LifecycleState::Initialized], LifecycleState::Running)
    }

    async fn stop(&self) -> Result<()> {
        self.inner.lifecycle.transition(
            &[LifecycleState::Initialized, LifecycleState::Running],
            LifecycleState::Stopped,
        )?;

        let pool = self.inner.pool.read().ok().and_then(|pool| pool.clone());
        if let Some(pool) = pool {
            pool.shutdown(self.inner.shutdown_grace).await;
        }
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.inner.lifecycle.get() == LifecycleState::Running
            && self
                .inner
                .pool
                .read()
                .ok()
                .and_then(|pool| pool.as_ref().map(|p| p.is_healthy()))
                .unwrap_or(false)
    }
}
