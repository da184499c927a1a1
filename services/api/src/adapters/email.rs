//! services/api/src/adapters/email.rs
//!
//! Delivery channel for an email provider's REST API. Uses the same
//! transient/permanent mapping as the messaging channel.

use async_trait::async_trait;
use serde_json::json;
use uuid::Uuid;

use care_scheduling_core::domain::ChannelKind;
use care_scheduling_core::ports::{DeliveryChannel, DeliveryError};

/// An adapter that implements the `DeliveryChannel` port against an email
/// provider's HTTP API. The recipient's address is resolved provider-side
/// from the opaque user id.
pub struct EmailChannel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl EmailChannel {
    pub fn new(client: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Email
    }

    async fn deliver(&self, recipient: Uuid, message: &str) -> Result<(), DeliveryError> {
        let payload = json!({
            "to_user": recipient,
            "subject": "Your care reminder",
            "body": message,
        });
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DeliveryError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(DeliveryError::Permanent(format!(
                "email provider rejected the request: {status}"
            )))
        } else {
            Err(DeliveryError::Transient(format!(
                "email provider returned {status}"
            )))
        }
    }
}
