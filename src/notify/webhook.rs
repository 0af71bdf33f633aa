use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use tracing::{error, info, instrument};

use super::{NotificationError, NotificationSink};
use crate::model::Recipient;

/// Posts notifications as JSON to a webhook endpoint
#[derive(Debug, Clone)]
pub struct WebhookSink {
    client: Client,
    url: String,
}

impl WebhookSink {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
        }
    }
}

#[async_trait]
impl NotificationSink for WebhookSink {
    #[instrument(skip_all, fields(url = %self.url))]
    async fn send(
        &self,
        recipients: &[Recipient],
        subject: &str,
        body: &str,
    ) -> Result<(), NotificationError> {
        let to: Vec<&str> = recipients
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.email.as_str())
            .collect();

        let payload = json!({
            "subject": subject,
            "message": body,
            "recipients": to,
            "timestamp": Utc::now().to_rfc3339()
        });

        let response = self.client.post(&self.url).json(&payload).send().await?;

        if response.status().is_success() {
            info!("Successfully sent webhook notification");
            Ok(())
        } else {
            error!("Webhook notification failed with status: {}", response.status());
            Err(NotificationError::WebhookStatus(response.status().as_u16()))
        }
    }
}
