//! crates/care_scheduling_core/src/dispatch.rs
//!
//! Sends reminders through their delivery channel with retry. Transient
//! failures back off exponentially up to a fixed attempt budget; permanent
//! failures stop immediately. Every attempt is recorded on the Notification
//! Store, success or not, so the record doubles as an audit trail. Nothing
//! here ever propagates back into the scheduling path: a reminder stuck
//! Failed never blocks its session.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, error, warn};

use crate::domain::{ChannelKind, DeliveryStatus, Reminder};
use crate::ports::{Clock, DeliveryChannel, DeliveryError, NotificationStore};

//=========================================================================================
// Retry policy
//=========================================================================================

/// Retry configuration with the documented defaults. Delay for attempt `n`
/// (1-based) is `base_delay * 2^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// A single attempt exceeding this is treated as a transient failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        // Shift capped to keep the multiplication sane for large budgets.
        let exponent = (attempt.saturating_sub(1)).min(16);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}

//=========================================================================================
// Dispatcher
//=========================================================================================

pub struct Dispatcher {
    channels: HashMap<ChannelKind, Arc<dyn DeliveryChannel>>,
    notifications: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl Dispatcher {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            channels: HashMap::new(),
            notifications,
            clock,
            policy,
        }
    }

    pub fn register(&mut self, channel: Arc<dyn DeliveryChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    /// Delivers one reminder, retrying transient failures, and returns the
    /// final delivery status. Store bookkeeping failures are logged and do
    /// not abort the delivery loop.
    pub async fn send(&self, reminder: &Reminder) -> DeliveryStatus {
        let Some(channel) = self.channels.get(&reminder.channel) else {
            warn!(
                reminder_id = %reminder.id,
                channel = reminder.channel.as_str(),
                "no channel registered; marking reminder failed"
            );
            // No attempt was made, so the attempt counter stays put.
            if let Err(e) = self.notifications.mark_failed(reminder.id).await {
                error!(reminder_id = %reminder.id, %e, "failed to mark reminder failed");
            }
            return DeliveryStatus::Failed;
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let outcome = match timeout(
                self.policy.attempt_timeout,
                channel.deliver(reminder.recipient_id, &reminder.message),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(DeliveryError::Transient("attempt timed out".to_string())),
            };

            match outcome {
                Ok(()) => {
                    debug!(reminder_id = %reminder.id, attempt, "reminder delivered");
                    self.record(reminder, DeliveryStatus::Delivered).await;
                    return DeliveryStatus::Delivered;
                }
                Err(DeliveryError::Permanent(msg)) => {
                    warn!(reminder_id = %reminder.id, attempt, %msg, "permanent delivery failure");
                    self.record(reminder, DeliveryStatus::Failed).await;
                    return DeliveryStatus::Failed;
                }
                Err(DeliveryError::Transient(msg)) => {
                    if attempt >= self.policy.max_attempts {
                        warn!(
                            reminder_id = %reminder.id,
                            attempt,
                            %msg,
                            "attempt budget exhausted; marking reminder failed"
                        );
                        self.record(reminder, DeliveryStatus::Failed).await;
                        return DeliveryStatus::Failed;
                    }
                    debug!(reminder_id = %reminder.id, attempt, %msg, "transient failure, will retry");
                    self.record(reminder, DeliveryStatus::Pending).await;
                    sleep(self.policy.backoff(attempt)).await;
                }
            }
        }
    }

    async fn record(&self, reminder: &Reminder, status: DeliveryStatus) {
        if let Err(e) = self
            .notifications
            .record_attempt(reminder.id, status, self.clock.now())
            .await
        {
            error!(reminder_id = %reminder.id, %e, "failed to record delivery attempt");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{reminder_id, ReminderStage, TherapyType};
    use crate::memory::{FixedClock, InMemoryNotificationStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use uuid::Uuid;

    /// A channel scripted to fail a fixed number of times before
    /// succeeding (or to always fail permanently).
    struct ScriptedChannel {
        kind: ChannelKind,
        transient_failures: u32,
        permanent: bool,
        calls: Mutex<u32>,
    }

    impl ScriptedChannel {
        fn transient_then_ok(failures: u32) -> Self {
            Self {
                kind: ChannelKind::InApp,
                transient_failures: failures,
                permanent: false,
                calls: Mutex::new(0),
            }
        }

        fn always_permanent() -> Self {
            Self {
                kind: ChannelKind::InApp,
                transient_failures: 0,
                permanent: true,
                calls: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl DeliveryChannel for ScriptedChannel {
        fn kind(&self) -> ChannelKind {
            self.kind
        }

        async fn deliver(&self, _recipient: Uuid, _message: &str) -> Result<(), DeliveryError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if self.permanent {
                return Err(DeliveryError::Permanent("invalid recipient".to_string()));
            }
            if *calls <= self.transient_failures {
                Err(DeliveryError::Transient("provider unavailable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn pending_reminder() -> Reminder {
        let session_id = Uuid::new_v4();
        Reminder {
            id: reminder_id(session_id, ReminderStage::Pre),
            session_id,
            stage: ReminderStage::Pre,
            recipient_id: Uuid::new_v4(),
            channel: ChannelKind::InApp,
            therapy_type: TherapyType::Physiotherapy,
            session_date: chrono::NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
            session_time: chrono::NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            message: "reminder".to_string(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            delivered_at: None,
            created_at: Utc::now(),
        }
    }

    async fn dispatch_with(
        channel: Arc<dyn DeliveryChannel>,
        max_attempts: u32,
    ) -> (Arc<InMemoryNotificationStore>, Reminder, DeliveryStatus) {
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let mut dispatcher = Dispatcher::new(
            notifications.clone(),
            clock,
            RetryPolicy {
                max_attempts,
                ..RetryPolicy::default()
            },
        );
        dispatcher.register(channel);

        let reminder = pending_reminder();
        notifications
            .insert_if_absent(reminder.clone())
            .await
            .unwrap();
        let status = dispatcher.send(&reminder).await;
        (notifications, reminder, status)
    }

    #[tokio::test(start_paused = true)]
    async fn third_attempt_succeeds() {
        let channel = Arc::new(ScriptedChannel::transient_then_ok(2));
        let (notifications, reminder, status) = dispatch_with(channel, 5).await;
        assert_eq!(status, DeliveryStatus::Delivered);

        let stored = notifications.get(reminder.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Delivered);
        assert_eq!(stored.attempt_count, 3);
        assert!(stored.delivered_at.is_some());
        assert!(stored.last_attempt_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_mark_failed() {
        let channel = Arc::new(ScriptedChannel::transient_then_ok(u32::MAX));
        let (notifications, reminder, status) = dispatch_with(channel, 5).await;
        assert_eq!(status, DeliveryStatus::Failed);

        let stored = notifications.get(reminder.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempt_count, 5);
        assert!(stored.delivered_at.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_skips_retry() {
        let channel = Arc::new(ScriptedChannel::always_permanent());
        let (notifications, reminder, status) = dispatch_with(channel, 5).await;
        assert_eq!(status, DeliveryStatus::Failed);

        let stored = notifications.get(reminder.id).await.unwrap();
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn unregistered_channel_is_a_failure() {
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(FixedClock::at(Utc::now()));
        let dispatcher = Dispatcher::new(notifications.clone(), clock, RetryPolicy::default());

        let reminder = pending_reminder();
        notifications
            .insert_if_absent(reminder.clone())
            .await
            .unwrap();
        let status = dispatcher.send(&reminder).await;
        assert_eq!(status, DeliveryStatus::Failed);
        let stored = notifications.get(reminder.id).await.unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        // No delivery was ever attempted, so the audit trail shows none.
        assert_eq!(stored.attempt_count, 0);
        assert!(stored.last_attempt_at.is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(4),
            attempt_timeout: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_secs(1));
        assert_eq!(policy.backoff(3), Duration::from_secs(2));
        assert_eq!(policy.backoff(4), Duration::from_secs(4));
        assert_eq!(policy.backoff(7), Duration::from_secs(4));
    }
}
