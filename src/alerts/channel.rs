//! Capability contract every alert channel satisfies

use crate::models::{AlertRequest, AlertResult, ChannelKind};
use async_trait::async_trait;

/// A delivery mechanism. Implementations only translate an already rendered
/// request into a transport call; they never fail with an error, every
/// problem is reported through the returned [`AlertResult`].
#[async_trait]
pub trait AlertChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    fn is_enabled(&self) -> bool;

    async fn send(&self, request: &AlertRequest) -> AlertResult;

    /// Lightweight connectivity check
    async fn test_connection(&self) -> AlertResult {
        AlertResult::success(self.name())
    }
}
