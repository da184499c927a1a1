//! services/api/src/adapters/in_app.rs
//!
//! The in-app delivery channel: an in-process inbox per recipient, polled
//! by the UI through the notifications endpoint. Delivery into it cannot
//! meaningfully fail, which also makes it the default channel.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use care_scheduling_core::domain::ChannelKind;
use care_scheduling_core::ports::{Clock, DeliveryChannel, DeliveryError};
use std::sync::Arc;

/// One message sitting in a recipient's in-app inbox.
#[derive(Debug, Clone)]
pub struct InAppMessage {
    pub message: String,
    pub received_at: DateTime<Utc>,
}

/// An adapter that implements the `DeliveryChannel` port as an in-process
/// inbox.
pub struct InAppChannel {
    clock: Arc<dyn Clock>,
    inboxes: Mutex<HashMap<Uuid, Vec<InAppMessage>>>,
}

impl InAppChannel {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            inboxes: Mutex::new(HashMap::new()),
        }
    }

    /// Snapshot of a recipient's inbox, newest last.
    pub fn inbox_for(&self, recipient: Uuid) -> Vec<InAppMessage> {
        let inboxes = self.inboxes.lock().expect("inbox lock poisoned");
        inboxes.get(&recipient).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl DeliveryChannel for InAppChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::InApp
    }

    async fn deliver(&self, recipient: Uuid, message: &str) -> Result<(), DeliveryError> {
        let mut inboxes = self.inboxes.lock().expect("inbox lock poisoned");
        inboxes.entry(recipient).or_default().push(InAppMessage {
            message: message.to_string(),
            received_at: self.clock.now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use care_scheduling_core::ports::SystemClock;

    #[tokio::test]
    async fn delivery_lands_in_the_recipient_inbox() {
        let channel = InAppChannel::new(Arc::new(SystemClock));
        let recipient = Uuid::new_v4();
        channel.deliver(recipient, "see you soon").await.unwrap();
        channel.deliver(recipient, "how did it go?").await.unwrap();

        let inbox = channel.inbox_for(recipient);
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].message, "see you soon");
        assert!(channel.inbox_for(Uuid::new_v4()).is_empty());
    }
}
