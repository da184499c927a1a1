//! services/api/src/adapters/messaging.rs
//!
//! Delivery channel for a messaging provider reached over a webhook.
//! Network problems and provider 5xx responses are transient (the
//! Dispatcher retries them); 4xx responses mean the request itself is bad
//! and will never succeed, so they are permanent.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use care_scheduling_core::domain::ChannelKind;
use care_scheduling_core::ports::{DeliveryChannel, DeliveryError};

/// An adapter that implements the `DeliveryChannel` port against a
/// messaging provider's webhook endpoint.
pub struct MessagingChannel {
    client: reqwest::Client,
    webhook_url: String,
}

impl MessagingChannel {
    pub fn new(client: reqwest::Client, webhook_url: String) -> Self {
        Self {
            client,
            webhook_url,
        }
    }
}

#[async_trait]
impl DeliveryChannel for MessagingChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Messaging
    }

    async fn deliver(&self, recipient: Uuid, message: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "recipient": recipient,
            "text": message,
        });
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(DeliveryError::Permanent(format!(
                "messaging provider rejected the request: {status}"
            )))
        } else {
            Err(DeliveryError::Transient(format!(
                "messaging provider returned {status}"
            )))
        }
    }
}
