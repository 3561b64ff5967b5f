//! Chat-bot channel posting to a bot messaging HTTP API

use super::channel::AlertChannel;
use crate::config::ChatBotConfig;
use crate::errors::{JanuscopeError, Result};
use crate::models::{AlertRequest, AlertResult, ChannelKind};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::error;

pub struct ChatBotChannel {
    config: ChatBotConfig,
    client: Client,
}

impl ChatBotChannel {
    /// Create a chat bot channel with its own HTTP client
    pub fn new(config: ChatBotConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(JanuscopeError::Http)?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, method: &str) -> String {
        format!(
            "{}/bot{}/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.bot_token,
            method
        )
    }

    fn format_message(request: &AlertRequest) -> String {
        if request.subject.is_empty() {
            request.body.clone()
        } else {
            format!("{}\n\n{}", request.subject, request.body)
        }
    }
}

#[async_trait]
impl AlertChannel for ChatBotChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::ChatBot
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.bot_token.is_empty()
    }

    async fn send(&self, request: &AlertRequest) -> AlertResult {
        let payload = json!({
            "chat_id": request.recipient,
            "text": Self::format_message(request),
        });

        let response = self
            .client
            .post(self.endpoint("sendMessage"))
            .json(&payload)
            .send()
            .await;

        match response {
            Ok(response) if response.status() == StatusCode::OK => AlertResult::success(self.name()),
            Ok(response) => {
                let status = response.status();
                error!("Chat bot API returned status {} for {}", status, request.recipient);
                AlertResult::failure(self.name(), format!("chat bot API returned status {}", status))
            }
            Err(e) => {
                error!("Chat bot request failed: {}", e);
                AlertResult::failure(self.name(), format!("chat bot request failed: {}", e))
            }
        }
    }

    async fn test_connection(&self) -> AlertResult {
        match self.client.get(self.endpoint("getMe")).send().await {
            Ok(response) if response.status() == StatusCode::OK => AlertResult::success(self.name()),
            Ok(response) => AlertResult::failure(
                self.name(),
                format!("chat bot identity check returned status {}", response.status()),
            ),
            Err(e) => AlertResult::failure(self.name(), format!("chat bot unreachable: {}", e)),
        }
    }
}
