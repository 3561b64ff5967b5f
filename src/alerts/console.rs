//! Log-only channel, always enabled

use super::channel::AlertChannel;
use crate::models::{AlertRequest, AlertResult, ChannelKind};
use async_trait::async_trait;
use tracing::info;

#[derive(Debug, Clone)]
pub struct ConsoleChannel {
    enabled: bool,
}

impl ConsoleChannel {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }
}

impl Default for ConsoleChannel {
    fn default() -> Self {
        Self::new(true)
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Console
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, request: &AlertRequest) -> AlertResult {
        info!(
            recipient = %request.recipient,
            event = %request.event_type,
            service_id = ?request.service_id,
            "ALERT {}: {}",
            request.subject,
            request.body
        );
        AlertResult::success(self.name())
    }
}
