//! crates/care_scheduling_core/src/reminder.rs
//!
//! Derives pre- and post-care reminders from the live session set. The
//! derivation is re-run freely (periodic sweep plus a nudge after every
//! session mutation); the deterministic reminder id makes every pass
//! idempotent, so "at most one reminder per (session, stage)" is the only
//! hard guarantee and no pass needs to run exactly once.

use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use tracing::{debug, info};

use crate::domain::{
    reminder_id, ChannelKind, DeliveryStatus, Reminder, ReminderStage, Session, SessionStatus,
    TherapyType,
};
use crate::ports::{Clock, CoreResult, NotificationStore, SessionStore};

//=========================================================================================
// Configuration
//=========================================================================================

/// Reminder window configuration. The horizons default to the documented
/// three days either side of the session date but are injected, not baked
/// in.
#[derive(Debug, Clone)]
pub struct ReminderConfig {
    /// A Pre reminder exists once `0 < days_until <= pre_window_days`.
    pub pre_window_days: i64,
    /// A Post reminder exists once `-post_window_days <= days_until < 0`.
    pub post_window_days: i64,
    /// Channel newly derived reminders are addressed to.
    pub default_channel: ChannelKind,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            pre_window_days: 3,
            post_window_days: 3,
            default_channel: ChannelKind::InApp,
        }
    }
}

//=========================================================================================
// Content lookup
//=========================================================================================

/// Fixed reminder copy per (therapy, stage). Therapies without a specific
/// entry fall back to the generic message; that is expected, not an error.
pub fn message_for(therapy: TherapyType, stage: ReminderStage) -> &'static str {
    match (therapy, stage) {
        (TherapyType::Physiotherapy, ReminderStage::Pre) => {
            "Your physiotherapy session is coming up. Wear comfortable clothing and bring your exercise log."
        }
        (TherapyType::Physiotherapy, ReminderStage::Post) => {
            "How are you feeling after physiotherapy? Keep up your home exercises and note any soreness."
        }
        (TherapyType::SpeechTherapy, ReminderStage::Pre) => {
            "Your speech therapy session is coming up. Review your practice words beforehand."
        }
        (TherapyType::SpeechTherapy, ReminderStage::Post) => {
            "Nice work in speech therapy. A few minutes of daily practice keeps the progress going."
        }
        (TherapyType::Counseling, ReminderStage::Pre) => {
            "Your counseling session is coming up. Take a moment to think about what you'd like to discuss."
        }
        (TherapyType::Counseling, ReminderStage::Post) => {
            "Checking in after your counseling session. Remember the coping strategies you worked on."
        }
        (_, ReminderStage::Pre) => {
            "You have a therapy session coming up. See your appointment details for time and place."
        }
        (_, ReminderStage::Post) => {
            "Checking in after your recent therapy session. Follow your care plan and reach out with any concerns."
        }
    }
}

//=========================================================================================
// Pure derivation
//=========================================================================================

/// Whole days from `today` to the session date; negative once the session
/// is in the past.
pub fn days_until(session_date: NaiveDate, today: NaiveDate) -> i64 {
    (session_date - today).num_days()
}

/// Which reminder stage, if any, the session is inside the window for.
///
/// Pre applies only while the session is still Scheduled; Post also covers
/// Completed sessions. Cancelled sessions derive nothing.
pub fn stage_due(config: &ReminderConfig, session: &Session, today: NaiveDate) -> Option<ReminderStage> {
    if session.status == SessionStatus::Cancelled {
        return None;
    }
    let days = days_until(session.date, today);
    if days > 0 && days <= config.pre_window_days {
        (session.status == SessionStatus::Scheduled).then_some(ReminderStage::Pre)
    } else if days < 0 && -days <= config.post_window_days {
        Some(ReminderStage::Post)
    } else {
        None
    }
}

//=========================================================================================
// Engine
//=========================================================================================

/// Runs derivation passes against the stores and persists whatever is new.
pub struct ReminderEngine {
    sessions: Arc<dyn SessionStore>,
    notifications: Arc<dyn NotificationStore>,
    clock: Arc<dyn Clock>,
    config: ReminderConfig,
}

impl ReminderEngine {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        notifications: Arc<dyn NotificationStore>,
        clock: Arc<dyn Clock>,
        config: ReminderConfig,
    ) -> Self {
        Self {
            sessions,
            notifications,
            clock,
            config,
        }
    }

    /// One derivation pass. Returns only the reminders that were newly
    /// persisted this pass; the caller hands those to the Dispatcher.
    pub async fn run_once(&self) -> CoreResult<Vec<Reminder>> {
        let today = self.clock.today();
        let from = today - Duration::days(self.config.post_window_days);
        let to = today + Duration::days(self.config.pre_window_days);

        let sessions = self.sessions.list_in_date_range(from, to).await?;
        let mut new_reminders = Vec::new();

        for session in &sessions {
            let Some(stage) = stage_due(&self.config, session, today) else {
                continue;
            };
            let reminder = self.build(session, stage);
            if self.notifications.insert_if_absent(reminder.clone()).await? {
                debug!(
                    session_id = %session.id,
                    stage = stage.as_str(),
                    "derived new reminder"
                );
                new_reminders.push(reminder);
            }
        }

        if !new_reminders.is_empty() {
            info!(count = new_reminders.len(), "reminder derivation pass produced new reminders");
        }
        Ok(new_reminders)
    }

    /// Builds the reminder for a (session, stage) pair, snapshotting the
    /// session fields the message references.
    fn build(&self, session: &Session, stage: ReminderStage) -> Reminder {
        Reminder {
            id: reminder_id(session.id, stage),
            session_id: session.id,
            stage,
            recipient_id: session.patient_id,
            channel: self.config.default_channel,
            therapy_type: session.therapy_type,
            session_date: session.date,
            session_time: session.start_time,
            message: message_for(session.therapy_type, stage).to_string(),
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            delivered_at: None,
            created_at: self.clock.now(),
        }
    }
}
