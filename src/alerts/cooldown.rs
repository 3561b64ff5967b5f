//! Per-key cooldown gate over the store's cooldown rows

use crate::errors::Result;
use crate::models::{CooldownKey, EventType, NotificationCooldown};
use crate::store::Store;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serialises check-then-record per (service, group, event) key. Holders of
/// the guard returned by [`CooldownGate::lock`] have exclusive use of that
/// key's row until the guard drops.
pub struct CooldownGate {
    store: Arc<dyn Store>,
    window: Duration,
    certificate_window: Duration,
    locks: Mutex<HashMap<CooldownKey, Arc<AsyncMutex<()>>>>,
}

impl CooldownGate {
    pub fn new(store: Arc<dyn Store>, window: Duration, certificate_window: Duration) -> Self {
        Self {
            store,
            window,
            certificate_window,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Take the exclusive lock for one key
    pub async fn lock(&self, key: &CooldownKey) -> OwnedMutexGuard<()> {
        let lock = match self.locks.lock() {
            Ok(mut locks) => {
                // Drop entries nobody is holding or waiting on
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
                Arc::clone(locks.entry(key.clone()).or_default())
            }
            Err(poisoned) => {
                let mut locks = poisoned.into_inner();
                Arc::clone(locks.entry(key.clone()).or_default())
            }
        };
        lock.lock_owned().await
    }

    /// Whether a window for `key` is still open at `now`
    pub async fn is_active(&self, key: &CooldownKey, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .find_cooldown(key)
            .await?
            .is_some_and(|row| row.is_active_at(now)))
    }

    /// Start a fresh window for `key` beginning at `now`
    pub async fn record(&self, key: &CooldownKey, now: DateTime<Utc>) -> Result<NotificationCooldown> {
        let window = chrono::Duration::from_std(self.window_for(&key.event_type))
            .unwrap_or_else(|_| chrono::Duration::days(1));
        let row = NotificationCooldown {
            key: key.clone(),
            last_notified_at: now,
            cooldown_until: now + window,
        };
        self.store.upsert_cooldown(&row).await?;
        Ok(row)
    }

    /// Cooldown length for an event type
    pub fn window_for(&self, event: &EventType) -> Duration {
        if event.is_certificate_event() {
            self.certificate_window
        } else {
            self.window
        }
    }
}
