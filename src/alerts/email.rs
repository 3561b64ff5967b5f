//! SMTP channel using lettre

use super::channel::AlertChannel;
use crate::config::EmailConfig;
use crate::errors::{JanuscopeError, Result};
use crate::models::{AlertRequest, AlertResult, ChannelKind};
use async_trait::async_trait;
use lettre::message::{Mailbox, header};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::time::Duration;
use tracing::error;

pub struct EmailChannel {
    config: EmailConfig,
}

impl EmailChannel {
    /// Create an SMTP channel, rejecting an invalid from address
    pub fn new(config: EmailConfig) -> Result<Self> {
        config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| JanuscopeError::Config(format!("invalid from address: {}", e)))?;
        Ok(Self { config })
    }

    /// Build a plain-text message. `recipient` may hold several comma
    /// separated addresses.
    fn build_message(&self, request: &AlertRequest) -> Result<Message> {
        let from = self
            .config
            .from_address
            .parse::<Mailbox>()
            .map_err(|e| JanuscopeError::Channel(format!("invalid from address: {}", e)))?;

        let mut builder = Message::builder()
            .from(from)
            .subject(request.subject.clone())
            .header(header::ContentType::TEXT_PLAIN);

        let mut recipients = 0;
        for address in request.recipient.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            let mailbox = address
                .parse::<Mailbox>()
                .map_err(|e| JanuscopeError::Channel(format!("invalid recipient {}: {}", address, e)))?;
            builder = builder.to(mailbox);
            recipients += 1;
        }

        if recipients == 0 {
            return Err(JanuscopeError::Channel("no recipient address".to_string()));
        }

        builder
            .body(request.body.clone())
            .map_err(|e| JanuscopeError::Channel(format!("could not build message: {}", e)))
    }

    fn transport(&self) -> Result<SmtpTransport> {
        let builder = if self.config.use_tls {
            SmtpTransport::starttls_relay(&self.config.smtp_server)
                .map_err(|e| JanuscopeError::Channel(format!("SMTP relay setup failed: {}", e)))?
        } else {
            SmtpTransport::builder_dangerous(&self.config.smtp_server)
        };

        let builder = builder
            .port(self.config.smtp_port)
            .timeout(Some(self.timeout()));
        let builder = if self.config.username.is_empty() {
            builder
        } else {
            builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ))
        };

        Ok(builder.build())
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    async fn deliver(&self, request: &AlertRequest) -> Result<()> {
        let message = self.build_message(request)?;
        let transport = self.transport()?;

        tokio::task::spawn_blocking(move || transport.send(&message))
            .await
            .map_err(|e| JanuscopeError::Channel(format!("SMTP task failed: {}", e)))?
            .map_err(|e| JanuscopeError::Channel(format!("SMTP send failed: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl AlertChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    async fn send(&self, request: &AlertRequest) -> AlertResult {
        match self.deliver(request).await {
            Ok(()) => AlertResult::success(self.name()),
            Err(e) => {
                error!("Email to {} failed: {}", request.recipient, e);
                AlertResult::failure(self.name(), e.to_string())
            }
        }
    }

    async fn test_connection(&self) -> AlertResult {
        let transport = match self.transport() {
            Ok(transport) => transport,
            Err(e) => return AlertResult::failure(self.name(), e.to_string()),
        };

        match tokio::task::spawn_blocking(move || transport.test_connection()).await {
            Ok(Ok(true)) => AlertResult::success(self.name()),
            Ok(Ok(false)) => AlertResult::failure(self.name(), "SMTP server did not accept the connection"),
            Ok(Err(e)) => AlertResult::failure(self.name(), format!("SMTP connection test failed: {}", e)),
            Err(e) => AlertResult::failure(self.name(), format!("SMTP task failed: {}", e)),
        }
    }
}
