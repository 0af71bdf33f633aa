//! Notification sinks
//!
//! The alert dispatcher renders a subject and a body and hands them to a
//! [`NotificationSink`] together with the rule's recipients. Delivery is
//! fire-and-forget from the dispatcher's point of view: failures are logged,
//! never retried.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::model::{NotificationTransport, Recipient};

pub mod email;
pub mod webhook;

pub use email::SmtpSink;
pub use webhook::WebhookSink;

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("email build error: {0}")]
    Build(String),

    #[error("webhook request failed: {0}")]
    Webhook(#[from] reqwest::Error),

    #[error("webhook answered with status {0}")]
    WebhookStatus(u16),

    #[error("no enabled recipients")]
    NoRecipients,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(
        &self,
        recipients: &[Recipient],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError>;
}

pub type SharedSink = Arc<dyn NotificationSink>;

impl std::fmt::Debug for dyn NotificationSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("NotificationSink")
    }
}

/// Build the sink for a transport configuration
pub fn sink_for(transport: &NotificationTransport) -> Result<SharedSink, NotificationError> {
    Ok(match transport {
        NotificationTransport::Smtp {
            host,
            port,
            from,
            username,
            password,
        } => Arc::new(SmtpSink::new(
            host,
            *port,
            from,
            username.clone(),
            password.clone(),
        )?),
        NotificationTransport::Webhook { url } => Arc::new(WebhookSink::new(url.clone())),
        NotificationTransport::Log => Arc::new(LogSink),
    })
}

/// Sink that only writes notifications to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn send(
        &self,
        recipients: &[Recipient],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let to: Vec<&str> = recipients.iter().map(|r| r.email.as_str()).collect();
        info!(?to, "notification: {subject}\n{body}");
        Ok(())
    }
}
