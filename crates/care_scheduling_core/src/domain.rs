//! crates/care_scheduling_core/src/domain.rs
//!
//! Defines the pure, core data structures for the scheduling engine.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

/// Namespace for deriving deterministic reminder ids (UUID v5).
/// One reminder per (session, stage) pair, forever, by construction.
pub const REMINDER_ID_NAMESPACE: Uuid = Uuid::from_u128(0x7d3b2a9e41c64f0a9b5d8e21c44a6f17);

//=========================================================================================
// Actors
//=========================================================================================

/// The two actor roles the engine distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Patient,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Patient => "patient",
            Role::Provider => "provider",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "patient" => Some(Role::Patient),
            "provider" => Some(Role::Provider),
            _ => None,
        }
    }
}

/// The authenticated identity attached to every scheduling call.
/// Authentication itself happens outside the core; the engine only checks
/// that the requester matches the entity being acted on.
#[derive(Debug, Clone, Copy)]
pub struct Requester {
    pub user_id: Uuid,
    pub role: Role,
}

//=========================================================================================
// Slots
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Open,
    Booked,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotState::Open => "open",
            SlotState::Booked => "booked",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(SlotState::Open),
            "booked" => Some(SlotState::Booked),
            _ => None,
        }
    }
}

/// One bookable (provider, date, time) unit of availability.
///
/// `booked_by` is set iff `state` is `Booked`. The slot never holds a
/// session id; the session side of the binding is found by matching
/// (provider, date, time), which keeps the Scheduler the only writer of
/// cross-entity consistency.
#[derive(Debug, Clone)]
pub struct Slot {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub booked_by: Option<Uuid>,
    pub state: SlotState,
}

impl Slot {
    pub fn is_open(&self) -> bool {
        self.state == SlotState::Open
    }
}

//=========================================================================================
// Sessions
//=========================================================================================

/// The fixed set of therapies a session can be booked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TherapyType {
    Physiotherapy,
    OccupationalTherapy,
    SpeechTherapy,
    CognitiveTherapy,
    Counseling,
}

impl TherapyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TherapyType::Physiotherapy => "physiotherapy",
            TherapyType::OccupationalTherapy => "occupational_therapy",
            TherapyType::SpeechTherapy => "speech_therapy",
            TherapyType::CognitiveTherapy => "cognitive_therapy",
            TherapyType::Counseling => "counseling",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "physiotherapy" => Some(TherapyType::Physiotherapy),
            "occupational_therapy" => Some(TherapyType::OccupationalTherapy),
            "speech_therapy" => Some(TherapyType::SpeechTherapy),
            "cognitive_therapy" => Some(TherapyType::CognitiveTherapy),
            "counseling" => Some(TherapyType::Counseling),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Scheduled => "scheduled",
            SessionStatus::Completed => "completed",
            SessionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(SessionStatus::Scheduled),
            "completed" => Some(SessionStatus::Completed),
            "cancelled" => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether the status machine allows the edge `self -> next`.
    /// `Scheduled -> Scheduled` is the reschedule edge; terminal states
    /// accept nothing.
    pub fn can_transition(&self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (SessionStatus::Scheduled, SessionStatus::Scheduled)
                | (SessionStatus::Scheduled, SessionStatus::Completed)
                | (SessionStatus::Scheduled, SessionStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One confirmed therapy occurrence for one patient.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub therapy_type: TherapyType,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub status: SessionStatus,
    /// Informational only (0–100), editable by patient or provider.
    pub progress_percent: u8,
    pub created_at: DateTime<Utc>,
}

/// Clamps a requested progress value into the valid 0–100 range.
pub fn clamp_progress(percent: u8) -> u8 {
    percent.min(100)
}

//=========================================================================================
// Reminders
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReminderStage {
    Pre,
    Post,
}

impl ReminderStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReminderStage::Pre => "pre",
            ReminderStage::Post => "post",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pre" => Some(ReminderStage::Pre),
            "post" => Some(ReminderStage::Post),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeliveryStatus::Pending),
            "delivered" => Some(DeliveryStatus::Delivered),
            "failed" => Some(DeliveryStatus::Failed),
            _ => None,
        }
    }
}

/// A delivery mechanism for reminders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    InApp,
    Messaging,
    Email,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::InApp => "in_app",
            ChannelKind::Messaging => "messaging",
            ChannelKind::Email => "email",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "in_app" => Some(ChannelKind::InApp),
            "messaging" => Some(ChannelKind::Messaging),
            "email" => Some(ChannelKind::Email),
            _ => None,
        }
    }
}

/// Derives the deterministic id for the reminder of a (session, stage) pair.
pub fn reminder_id(session_id: Uuid, stage: ReminderStage) -> Uuid {
    let key = format!("{}:{}", session_id, stage.as_str());
    Uuid::new_v5(&REMINDER_ID_NAMESPACE, key.as_bytes())
}

/// A derived notification instance for one (session, stage) pair.
///
/// Content fields are a snapshot taken at derivation time, so later session
/// edits never retroactively change an already-queued reminder. Only the
/// delivery bookkeeping (`status`, `attempt_count`, `last_attempt_at`,
/// `delivered_at`) is ever mutated, and only by the Dispatcher.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: Uuid,
    pub session_id: Uuid,
    pub stage: ReminderStage,
    pub recipient_id: Uuid,
    pub channel: ChannelKind,
    pub therapy_type: TherapyType,
    pub session_date: NaiveDate,
    pub session_time: NaiveTime,
    pub message: String,
    pub status: DeliveryStatus,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reminder_id_is_deterministic_per_stage() {
        let session = Uuid::new_v4();
        assert_eq!(
            reminder_id(session, ReminderStage::Pre),
            reminder_id(session, ReminderStage::Pre)
        );
        assert_ne!(
            reminder_id(session, ReminderStage::Pre),
            reminder_id(session, ReminderStage::Post)
        );
        assert_ne!(
            reminder_id(session, ReminderStage::Pre),
            reminder_id(Uuid::new_v4(), ReminderStage::Pre)
        );
    }

    #[test]
    fn cancelled_and_completed_are_terminal() {
        assert!(SessionStatus::Scheduled.can_transition(SessionStatus::Scheduled));
        assert!(SessionStatus::Scheduled.can_transition(SessionStatus::Completed));
        assert!(SessionStatus::Scheduled.can_transition(SessionStatus::Cancelled));
        assert!(!SessionStatus::Cancelled.can_transition(SessionStatus::Scheduled));
        assert!(!SessionStatus::Completed.can_transition(SessionStatus::Cancelled));
        assert!(!SessionStatus::Cancelled.can_transition(SessionStatus::Cancelled));
    }

    #[test]
    fn progress_is_clamped() {
        assert_eq!(clamp_progress(0), 0);
        assert_eq!(clamp_progress(100), 100);
        assert_eq!(clamp_progress(250), 100);
    }

    #[test]
    fn enum_string_round_trips() {
        for therapy in [
            TherapyType::Physiotherapy,
            TherapyType::OccupationalTherapy,
            TherapyType::SpeechTherapy,
            TherapyType::CognitiveTherapy,
            TherapyType::Counseling,
        ] {
            assert_eq!(TherapyType::parse(therapy.as_str()), Some(therapy));
        }
        assert_eq!(TherapyType::parse("hydrotherapy"), None);
        assert_eq!(ChannelKind::parse("email"), Some(ChannelKind::Email));
        assert_eq!(Role::parse("provider"), Some(Role::Provider));
    }
}
