//! crates/care_scheduling_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the scheduling engine.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or
//! messaging providers.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::domain::{
    ChannelKind, DeliveryStatus, Reminder, Session, SessionStatus, Slot, TherapyType,
};

//=========================================================================================
// Error Taxonomy
//=========================================================================================

/// Failure modes of the scheduling core. Store implementations must map
/// their backend errors onto these variants so the Scheduler can react
/// uniformly (compensate or forward).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Slot {0} not found")]
    SlotNotFound(Uuid),
    #[error("A slot already exists for this provider, date and time")]
    DuplicateSlot,
    /// The benign race outcome: someone else won the slot first.
    #[error("Slot is already booked")]
    SlotAlreadyBooked,
    /// A session can only move between slots of its own provider.
    #[error("Slot belongs to a different provider")]
    ProviderMismatch,
    #[error("Slot is not booked")]
    SlotNotBooked,
    #[error("Session {0} not found")]
    SessionNotFound(Uuid),
    #[error("Invalid session transition: {from} -> {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Storage error: {0}")]
    Storage(String),
}

/// A convenience type alias for `Result<T, CoreError>`.
pub type CoreResult<T> = Result<T, CoreError>;

/// Outcome of a single channel delivery attempt. Transient failures are
/// retried by the Dispatcher; permanent ones are not.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Transient delivery failure: {0}")]
    Transient(String),
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),
}

//=========================================================================================
// Clock
//=========================================================================================

/// Injectable time source. Production uses [`SystemClock`]; tests swap in a
/// fixed clock to make reminder windows deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//=========================================================================================
// Store Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Publishes a new Open slot. Fails with [`CoreError::DuplicateSlot`]
    /// if any slot already exists for (provider, date, time).
    async fn publish(&self, provider_id: Uuid, date: NaiveDate, time: NaiveTime)
        -> CoreResult<Slot>;

    async fn get(&self, slot_id: Uuid) -> CoreResult<Slot>;

    /// Looks a slot up by its natural key. Used for the weak
    /// session -> slot back-reference.
    async fn find(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> CoreResult<Option<Slot>>;

    /// Atomic check-and-set: of N concurrent callers, exactly one gets the
    /// slot, the rest get [`CoreError::SlotAlreadyBooked`].
    async fn book(&self, slot_id: Uuid, patient_id: Uuid) -> CoreResult<Slot>;

    /// Returns a Booked slot to Open.
    async fn release(&self, slot_id: Uuid) -> CoreResult<()>;

    /// Deletes a slot, allowed only while it is Open.
    async fn delete_open(&self, slot_id: Uuid) -> CoreResult<()>;

    /// Point-in-time snapshot of Open slots; not linearizable with
    /// concurrent bookings (stale entries are rejected at book time).
    async fn list_open(
        &self,
        provider_id: Option<Uuid>,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> CoreResult<Vec<Slot>>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
        therapy_type: TherapyType,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> CoreResult<Session>;

    async fn get(&self, session_id: Uuid) -> CoreResult<Session>;

    /// The reschedule edge: keeps the session Scheduled under a new
    /// date/time. Fails with [`CoreError::InvalidTransition`] unless the
    /// session is currently Scheduled.
    async fn update_schedule(
        &self,
        session_id: Uuid,
        new_date: NaiveDate,
        new_start_time: NaiveTime,
    ) -> CoreResult<Session>;

    async fn cancel(&self, session_id: Uuid) -> CoreResult<Session>;

    async fn complete(&self, session_id: Uuid) -> CoreResult<Session>;

    async fn set_progress(&self, session_id: Uuid, percent: u8) -> CoreResult<Session>;

    async fn list_by_patient(&self, patient_id: Uuid) -> CoreResult<Vec<Session>>;

    async fn list_by_provider(&self, provider_id: Uuid) -> CoreResult<Vec<Session>>;

    /// Sessions dated within `[from, to]` inclusive, any status. The
    /// reminder engine uses this to bound a derivation pass.
    async fn list_in_date_range(&self, from: NaiveDate, to: NaiveDate)
        -> CoreResult<Vec<Session>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Inserts the reminder unless one with the same id already exists.
    /// Returns `true` when the reminder was newly inserted. This is the
    /// primitive that makes repeated derivation passes idempotent.
    async fn insert_if_absent(&self, reminder: Reminder) -> CoreResult<bool>;

    async fn get(&self, reminder_id: Uuid) -> CoreResult<Reminder>;

    /// Records one delivery attempt: bumps `attempt_count`, stamps
    /// `last_attempt_at`, sets the new status, and stamps `delivered_at`
    /// when the status is Delivered.
    async fn record_attempt(
        &self,
        reminder_id: Uuid,
        status: DeliveryStatus,
        attempted_at: DateTime<Utc>,
    ) -> CoreResult<()>;

    /// Marks a reminder Failed when no delivery could be attempted at all
    /// (e.g. its channel is not registered). Leaves the attempt counter
    /// and timestamps untouched.
    async fn mark_failed(&self, reminder_id: Uuid) -> CoreResult<()>;

    async fn list_by_sessions(&self, session_ids: &[Uuid]) -> CoreResult<Vec<Reminder>>;
}

//=========================================================================================
// Delivery Port
//=========================================================================================

/// A single delivery mechanism (in-app inbox, messaging provider, email).
/// New channels implement this trait; the Dispatcher routes on `kind()` and
/// never needs to change.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelKind;

    async fn deliver(&self, recipient: Uuid, message: &str) -> Result<(), DeliveryError>;
}
