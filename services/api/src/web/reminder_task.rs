//! services/api/src/web/reminder_task.rs
//!
//! The process-wide reminder sweep. One spawned task owns the loop: it
//! wakes on a periodic tick, on a nudge from a mutating handler, or on
//! shutdown. Each pass runs a derivation against the session set and hands
//! the newly created reminders to the Dispatcher. Because derivation is
//! idempotent, waking too often is harmless.

use std::sync::Arc;
use std::time::Duration;

use care_scheduling_core::dispatch::Dispatcher;
use care_scheduling_core::reminder::ReminderEngine;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Handed to the handlers so session mutations trigger an immediate sweep
/// instead of waiting for the next tick.
#[derive(Clone)]
pub struct SweepHandle {
    trigger: Arc<Notify>,
}

impl SweepHandle {
    pub fn nudge(&self) {
        self.trigger.notify_one();
    }
}

/// Spawns the sweep task. It runs until `true` arrives on the shutdown
/// channel; dropping the sender also stops it.
pub fn spawn_reminder_task(
    engine: Arc<ReminderEngine>,
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> (SweepHandle, JoinHandle<()>) {
    let trigger = Arc::new(Notify::new());
    let handle = SweepHandle {
        trigger: trigger.clone(),
    };

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately, giving one pass at startup.
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = trigger.notified() => {
                    debug!("reminder sweep nudged");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reminder sweep stopping");
                        break;
                    }
                    continue;
                }
            }
            run_pass(&engine, &dispatcher).await;
        }
    });

    (handle, task)
}

async fn run_pass(engine: &ReminderEngine, dispatcher: &Dispatcher) {
    match engine.run_once().await {
        Ok(new_reminders) => {
            for reminder in &new_reminders {
                dispatcher.send(reminder).await;
            }
        }
        Err(e) => error!(%e, "reminder derivation pass failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InAppChannel;
    use care_scheduling_core::dispatch::RetryPolicy;
    use care_scheduling_core::domain::{DeliveryStatus, TherapyType};
    use care_scheduling_core::memory::{
        FixedClock, InMemoryNotificationStore, InMemorySessionStore,
    };
    use care_scheduling_core::ports::{NotificationStore, SessionStore};
    use care_scheduling_core::reminder::ReminderConfig;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use uuid::Uuid;

    #[tokio::test(start_paused = true)]
    async fn nudge_triggers_a_pass_and_shutdown_stops_the_task() {
        let sessions = Arc::new(InMemorySessionStore::new());
        let notifications = Arc::new(InMemoryNotificationStore::new());
        let clock = Arc::new(FixedClock::at(
            Utc.with_ymd_and_hms(2025, 9, 6, 8, 0, 0).unwrap(),
        ));
        let engine = Arc::new(ReminderEngine::new(
            sessions.clone(),
            notifications.clone(),
            clock.clone(),
            ReminderConfig::default(),
        ));
        let in_app = Arc::new(InAppChannel::new(clock.clone()));
        let mut dispatcher =
            Dispatcher::new(notifications.clone(), clock, RetryPolicy::default());
        dispatcher.register(in_app.clone());

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        // A long tick so only the startup pass and the nudge fire.
        let (sweep, task) = spawn_reminder_task(
            engine,
            Arc::new(dispatcher),
            Duration::from_secs(3600),
            shutdown_rx,
        );
        // Let the startup pass run against the empty session set.
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Two days out: inside the default pre window.
        let patient = Uuid::new_v4();
        let session = sessions
            .create(
                patient,
                Uuid::new_v4(),
                TherapyType::Physiotherapy,
                NaiveDate::from_ymd_opt(2025, 9, 8).unwrap(),
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            )
            .await
            .unwrap();

        sweep.nudge();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let reminders = notifications
            .list_by_sessions(&[session.id])
            .await
            .unwrap();
        assert_eq!(reminders.len(), 1);
        assert_eq!(reminders[0].status, DeliveryStatus::Delivered);
        assert_eq!(in_app.inbox_for(patient).len(), 1);

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("sweep task did not stop on shutdown")
            .unwrap();
    }
}
