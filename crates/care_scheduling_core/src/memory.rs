//! crates/care_scheduling_core/src/memory.rs
//!
//! In-memory implementations of the store ports. These are the reference
//! stores: the test suites run on them, and the API service falls back to
//! them when no database is configured. Every mutation happens inside one
//! mutex critical section, which gives each store the per-entity atomicity
//! the contracts require (`book` in particular is a check-and-set under the
//! slot map lock).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use crate::domain::{
    clamp_progress, DeliveryStatus, Reminder, Session, SessionStatus, Slot, SlotState, TherapyType,
};
use crate::ports::{
    Clock, CoreError, CoreResult, NotificationStore, SessionStore, SlotStore,
};

//=========================================================================================
// Slot Store
//=========================================================================================

#[derive(Default)]
pub struct InMemorySlotStore {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl InMemorySlotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SlotStore for InMemorySlotStore {
    async fn publish(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> CoreResult<Slot> {
        let mut slots = self.slots.lock().expect("slot store lock poisoned");
        // Unique index on (provider, date, time), regardless of state.
        if slots
            .values()
            .any(|s| s.provider_id == provider_id && s.date == date && s.time == time)
        {
            return Err(CoreError::DuplicateSlot);
        }
        let slot = Slot {
            id: Uuid::new_v4(),
            provider_id,
            date,
            time,
            booked_by: None,
            state: SlotState::Open,
        };
        slots.insert(slot.id, slot.clone());
        Ok(slot)
    }

    async fn get(&self, slot_id: Uuid) -> CoreResult<Slot> {
        let slots = self.slots.lock().expect("slot store lock poisoned");
        slots
            .get(&slot_id)
            .cloned()
            .ok_or(CoreError::SlotNotFound(slot_id))
    }

    async fn find(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> CoreResult<Option<Slot>> {
        let slots = self.slots.lock().expect("slot store lock poisoned");
        Ok(slots
            .values()
            .find(|s| s.provider_id == provider_id && s.date == date && s.time == time)
            .cloned())
    }

    async fn book(&self, slot_id: Uuid, patient_id: Uuid) -> CoreResult<Slot> {
        let mut slots = self.slots.lock().expect("slot store lock poisoned");
        let slot = slots
            .get_mut(&slot_id)
            .ok_or(CoreError::SlotNotFound(slot_id))?;
        match slot.state {
            SlotState::Open => {
                slot.state = SlotState::Booked;
                slot.booked_by = Some(patient_id);
                Ok(slot.clone())
            }
            SlotState::Booked => Err(CoreError::SlotAlreadyBooked),
        }
    }

    async fn release(&self, slot_id: Uuid) -> CoreResult<()> {
        let mut slots = self.slots.lock().expect("slot store lock poisoned");
        let slot = slots
            .get_mut(&slot_id)
            .ok_or(CoreError::SlotNotFound(slot_id))?;
        match slot.state {
            SlotState::Booked => {
                slot.state = SlotState::Open;
                slot.booked_by = None;
                Ok(())
            }
            SlotState::Open => Err(CoreError::SlotNotBooked),
        }
    }

    async fn delete_open(&self, slot_id: Uuid) -> CoreResult<()> {
        let mut slots = self.slots.lock().expect("slot store lock poisoned");
        let slot = slots
            .get(&slot_id)
            .ok_or(CoreError::SlotNotFound(slot_id))?;
        if slot.state == SlotState::Booked {
            return Err(CoreError::SlotAlreadyBooked);
        }
        slots.remove(&slot_id);
        Ok(())
    }

    async fn list_open(
        &self,
        provider_id: Option<Uuid>,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> CoreResult<Vec<Slot>> {
        let slots = self.slots.lock().expect("slot store lock poisoned");
        let mut open: Vec<Slot> = slots
            .values()
            .filter(|s| s.is_open())
            .filter(|s| provider_id.map_or(true, |p| s.provider_id == p))
            .filter(|s| date_range.map_or(true, |(from, to)| s.date >= from && s.date <= to))
            .cloned()
            .collect();
        open.sort_by_key(|s| (s.date, s.time));
        Ok(open)
    }
}

//=========================================================================================
// Session Store
//=========================================================================================

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn transition(session: &mut Session, next: SessionStatus) -> CoreResult<()> {
    if !session.status.can_transition(next) {
        return Err(CoreError::InvalidTransition {
            from: session.status,
            to: next,
        });
    }
    session.status = next;
    Ok(())
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
        therapy_type: TherapyType,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> CoreResult<Session> {
        let session = Session {
            id: Uuid::new_v4(),
            patient_id,
            provider_id,
            therapy_type,
            date,
            start_time,
            status: SessionStatus::Scheduled,
            progress_percent: 0,
            created_at: Utc::now(),
        };
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> CoreResult<Session> {
        let sessions = self.sessions.lock().expect("session store lock poisoned");
        sessions
            .get(&session_id)
            .cloned()
            .ok_or(CoreError::SessionNotFound(session_id))
    }

    async fn update_schedule(
        &self,
        session_id: Uuid,
        new_date: NaiveDate,
        new_start_time: NaiveTime,
    ) -> CoreResult<Session> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or(CoreError::SessionNotFound(session_id))?;
        transition(session, SessionStatus::Scheduled)?;
        session.date = new_date;
        session.start_time = new_start_time;
        Ok(session.clone())
    }

    async fn cancel(&self, session_id: Uuid) -> CoreResult<Session> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or(CoreError::SessionNotFound(session_id))?;
        transition(session, SessionStatus::Cancelled)?;
        Ok(session.clone())
    }

    async fn complete(&self, session_id: Uuid) -> CoreResult<Session> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or(CoreError::SessionNotFound(session_id))?;
        transition(session, SessionStatus::Completed)?;
        Ok(session.clone())
    }

    async fn set_progress(&self, session_id: Uuid, percent: u8) -> CoreResult<Session> {
        let mut sessions = self.sessions.lock().expect("session store lock poisoned");
        let session = sessions
            .get_mut(&session_id)
            .ok_or(CoreError::SessionNotFound(session_id))?;
        session.progress_percent = clamp_progress(percent);
        Ok(session.clone())
    }

    async fn list_by_patient(&self, patient_id: Uuid) -> CoreResult<Vec<Session>> {
        let sessions = self.sessions.lock().expect("session store lock poisoned");
        let mut result: Vec<Session> = sessions
            .values()
            .filter(|s| s.patient_id == patient_id)
            .cloned()
            .collect();
        result.sort_by_key(|s| (s.date, s.start_time));
        Ok(result)
    }

    async fn list_by_provider(&self, provider_id: Uuid) -> CoreResult<Vec<Session>> {
        let sessions = self.sessions.lock().expect("session store lock poisoned");
        let mut result: Vec<Session> = sessions
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect();
        result.sort_by_key(|s| (s.date, s.start_time));
        Ok(result)
    }

    async fn list_in_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CoreResult<Vec<Session>> {
        let sessions = self.sessions.lock().expect("session store lock poisoned");
        Ok(sessions
            .values()
            .filter(|s| s.date >= from && s.date <= to)
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Notification Store
//=========================================================================================

#[derive(Default)]
pub struct InMemoryNotificationStore {
    reminders: Mutex<HashMap<Uuid, Reminder>>,
}

impl InMemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for InMemoryNotificationStore {
    async fn insert_if_absent(&self, reminder: Reminder) -> CoreResult<bool> {
        let mut reminders = self
            .reminders
            .lock()
            .expect("notification store lock poisoned");
        match reminders.entry(reminder.id) {
            std::collections::hash_map::Entry::Occupied(_) => Ok(false),
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(reminder);
                Ok(true)
            }
        }
    }

    async fn get(&self, reminder_id: Uuid) -> CoreResult<Reminder> {
        let reminders = self
            .reminders
            .lock()
            .expect("notification store lock poisoned");
        reminders
            .get(&reminder_id)
            .cloned()
            .ok_or_else(|| CoreError::Storage(format!("reminder {reminder_id} not found")))
    }

    async fn record_attempt(
        &self,
        reminder_id: Uuid,
        status: DeliveryStatus,
        attempted_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        let mut reminders = self
            .reminders
            .lock()
            .expect("notification store lock poisoned");
        let reminder = reminders
            .get_mut(&reminder_id)
            .ok_or_else(|| CoreError::Storage(format!("reminder {reminder_id} not found")))?;
        reminder.attempt_count += 1;
        reminder.last_attempt_at = Some(attempted_at);
        reminder.status = status;
        if status == DeliveryStatus::Delivered {
            reminder.delivered_at = Some(attempted_at);
        }
        Ok(())
    }

    async fn mark_failed(&self, reminder_id: Uuid) -> CoreResult<()> {
        let mut reminders = self
            .reminders
            .lock()
            .expect("notification store lock poisoned");
        let reminder = reminders
            .get_mut(&reminder_id)
            .ok_or_else(|| CoreError::Storage(format!("reminder {reminder_id} not found")))?;
        reminder.status = DeliveryStatus::Failed;
        Ok(())
    }

    async fn list_by_sessions(&self, session_ids: &[Uuid]) -> CoreResult<Vec<Reminder>> {
        let reminders = self
            .reminders
            .lock()
            .expect("notification store lock poisoned");
        let mut result: Vec<Reminder> = reminders
            .values()
            .filter(|r| session_ids.contains(&r.session_id))
            .cloned()
            .collect();
        result.sort_by_key(|r| r.created_at);
        Ok(result)
    }
}

//=========================================================================================
// Fixed Clock (deterministic time for tests and demos)
//=========================================================================================

/// A clock whose time only moves when told to.
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}
