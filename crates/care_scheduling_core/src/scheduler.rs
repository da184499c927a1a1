//! crates/care_scheduling_core/src/scheduler.rs
//!
//! Orchestrates the Slot Store and Session Store as a single logical unit
//! of work. The two stores are peers, never nested under one lock;
//! cross-store consistency comes from the compensating-action protocol
//! implemented here: a partial failure must never leave a Booked slot
//! without a live Session.

use std::sync::Arc;

use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::domain::{Requester, Role, Session, SessionStatus, TherapyType};
use crate::ports::{CoreError, CoreResult, SessionStore, SlotStore};

pub struct Scheduler {
    slots: Arc<dyn SlotStore>,
    sessions: Arc<dyn SessionStore>,
}

impl Scheduler {
    pub fn new(slots: Arc<dyn SlotStore>, sessions: Arc<dyn SessionStore>) -> Self {
        Self { slots, sessions }
    }

    /// Books a slot and creates the session bound to it.
    ///
    /// If session creation fails after the slot was won, the slot is
    /// released again before the error is returned, so the caller observes
    /// all-or-nothing behavior.
    pub async fn book_session(
        &self,
        slot_id: Uuid,
        patient_id: Uuid,
        therapy_type: TherapyType,
        requester: &Requester,
    ) -> CoreResult<Session> {
        if requester.role != Role::Patient || requester.user_id != patient_id {
            return Err(CoreError::Unauthorized);
        }

        let slot = self.slots.book(slot_id, patient_id).await?;
        debug!(%slot_id, %patient_id, "slot booked, creating session");

        match self
            .sessions
            .create(patient_id, slot.provider_id, therapy_type, slot.date, slot.time)
            .await
        {
            Ok(session) => Ok(session),
            Err(create_err) => {
                // Compensating action: give the slot back.
                if let Err(release_err) = self.slots.release(slot_id).await {
                    // The slot stays Booked against a missing session; this
                    // needs operator attention, so it is the one place we
                    // log at error level for a storage problem.
                    error!(
                        %slot_id,
                        %release_err,
                        "failed to release slot after session creation failure"
                    );
                }
                Err(create_err)
            }
        }
    }

    /// Moves a session to a new slot: books the new slot, updates the
    /// session, then releases the old slot. If booking the new slot fails,
    /// nothing changes; if the session update fails, the new slot is
    /// released again.
    pub async fn reschedule(
        &self,
        session_id: Uuid,
        new_slot_id: Uuid,
        requester: &Requester,
    ) -> CoreResult<Session> {
        let session = self.sessions.get(session_id).await?;
        authorize_party(&session, requester)?;
        if session.status != SessionStatus::Scheduled {
            return Err(CoreError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Scheduled,
            });
        }

        let old_date = session.date;
        let old_time = session.start_time;

        // The session keeps its provider across a reschedule, and the
        // slot lookup in `cancel` keys on it; a cross-provider move would
        // strand the new slot as Booked forever.
        let new_slot = self.slots.get(new_slot_id).await?;
        if new_slot.provider_id != session.provider_id {
            return Err(CoreError::ProviderMismatch);
        }

        let new_slot = self.slots.book(new_slot_id, session.patient_id).await?;

        let updated = match self
            .sessions
            .update_schedule(session_id, new_slot.date, new_slot.time)
            .await
        {
            Ok(updated) => updated,
            Err(update_err) => {
                if let Err(release_err) = self.slots.release(new_slot_id).await {
                    error!(
                        slot_id = %new_slot_id,
                        %release_err,
                        "failed to release new slot after reschedule failure"
                    );
                }
                return Err(update_err);
            }
        };

        // The session now points at the new slot; returning the old slot to
        // Open is cleanup and is idempotent on retry.
        match self
            .slots
            .find(session.provider_id, old_date, old_time)
            .await
        {
            Ok(Some(old_slot)) if !old_slot.is_open() => {
                if let Err(e) = self.slots.release(old_slot.id).await {
                    warn!(slot_id = %old_slot.id, %e, "could not release old slot after reschedule");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%session_id, %e, "old slot lookup failed after reschedule"),
        }

        Ok(updated)
    }

    /// Cancels a session, then releases its bound slot. Both steps are
    /// idempotent on retry, so ordering only matters for error reporting.
    pub async fn cancel(&self, session_id: Uuid, requester: &Requester) -> CoreResult<Session> {
        let session = self.sessions.get(session_id).await?;
        authorize_party(&session, requester)?;

        let cancelled = self.sessions.cancel(session_id).await?;

        match self
            .slots
            .find(session.provider_id, session.date, session.start_time)
            .await
        {
            Ok(Some(slot)) if !slot.is_open() => {
                if let Err(e) = self.slots.release(slot.id).await {
                    warn!(slot_id = %slot.id, %e, "could not release slot after cancellation");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(%session_id, %e, "slot lookup failed after cancellation"),
        }

        Ok(cancelled)
    }

    /// Marks a session Completed. Provider-only.
    pub async fn complete(&self, session_id: Uuid, requester: &Requester) -> CoreResult<Session> {
        let session = self.sessions.get(session_id).await?;
        if requester.role != Role::Provider || requester.user_id != session.provider_id {
            return Err(CoreError::Unauthorized);
        }
        self.sessions.complete(session_id).await
    }

    /// Updates the informational progress percentage. Patient or provider
    /// of the session may edit it.
    pub async fn set_progress(
        &self,
        session_id: Uuid,
        percent: u8,
        requester: &Requester,
    ) -> CoreResult<Session> {
        let session = self.sessions.get(session_id).await?;
        authorize_party(&session, requester)?;
        self.sessions.set_progress(session_id, percent).await
    }
}

/// A requester may act on a session iff they are its patient (as a patient)
/// or its provider (as a provider).
fn authorize_party(session: &Session, requester: &Requester) -> CoreResult<()> {
    let allowed = match requester.role {
        Role::Patient => requester.user_id == session.patient_id,
        Role::Provider => requester.user_id == session.provider_id,
    };
    if allowed {
        Ok(())
    } else {
        Err(CoreError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SlotState, TherapyType};
    use crate::memory::{InMemorySessionStore, InMemorySlotStore};
    use async_trait::async_trait;
    use chrono::{NaiveDate, NaiveTime};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn time(h: u32, min: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, min, 0).unwrap()
    }

    fn patient_requester(patient_id: Uuid) -> Requester {
        Requester {
            user_id: patient_id,
            role: Role::Patient,
        }
    }

    fn setup() -> (Arc<InMemorySlotStore>, Arc<InMemorySessionStore>, Scheduler) {
        let slots = Arc::new(InMemorySlotStore::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let scheduler = Scheduler::new(slots.clone(), sessions.clone());
        (slots, sessions, scheduler)
    }

    #[tokio::test]
    async fn booking_creates_a_session_bound_to_the_slot() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();

        let session = scheduler
            .book_session(
                slot.id,
                patient,
                TherapyType::Physiotherapy,
                &patient_requester(patient),
            )
            .await
            .unwrap();

        assert_eq!(session.patient_id, patient);
        assert_eq!(session.provider_id, provider);
        assert_eq!(session.date, date(2025, 9, 8));
        assert_eq!(session.status, SessionStatus::Scheduled);

        let booked = slots.get(slot.id).await.unwrap();
        assert_eq!(booked.state, SlotState::Booked);
        assert_eq!(booked.booked_by, Some(patient));
    }

    #[tokio::test]
    async fn second_booker_loses_the_race() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();

        scheduler
            .book_session(slot.id, a, TherapyType::Counseling, &patient_requester(a))
            .await
            .unwrap();
        let err = scheduler
            .book_session(slot.id, b, TherapyType::Counseling, &patient_requester(b))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotAlreadyBooked));
    }

    #[tokio::test]
    async fn concurrent_bookers_yield_exactly_one_success() {
        let slots = Arc::new(InMemorySlotStore::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let scheduler = Arc::new(Scheduler::new(slots.clone(), sessions.clone()));
        let provider = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let scheduler = scheduler.clone();
            let slot_id = slot.id;
            tasks.spawn(async move {
                let patient = Uuid::new_v4();
                scheduler
                    .book_session(
                        slot_id,
                        patient,
                        TherapyType::SpeechTherapy,
                        &patient_requester(patient),
                    )
                    .await
            });
        }

        let mut successes = 0;
        let mut already_booked = 0;
        while let Some(result) = tasks.join_next().await {
            match result.unwrap() {
                Ok(_) => successes += 1,
                Err(CoreError::SlotAlreadyBooked) => already_booked += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(already_booked, 7);
    }

    /// A session store whose create always fails, to force the
    /// compensation path.
    struct FailingSessionStore {
        inner: InMemorySessionStore,
    }

    #[async_trait]
    impl SessionStore for FailingSessionStore {
        async fn create(
            &self,
            _patient_id: Uuid,
            _provider_id: Uuid,
            _therapy_type: TherapyType,
            _date: NaiveDate,
            _start_time: NaiveTime,
        ) -> CoreResult<Session> {
            Err(CoreError::Storage("induced create failure".to_string()))
        }

        async fn get(&self, session_id: Uuid) -> CoreResult<Session> {
            self.inner.get(session_id).await
        }

        async fn update_schedule(
            &self,
            session_id: Uuid,
            new_date: NaiveDate,
            new_start_time: NaiveTime,
        ) -> CoreResult<Session> {
            self.inner
                .update_schedule(session_id, new_date, new_start_time)
                .await
        }

        async fn cancel(&self, session_id: Uuid) -> CoreResult<Session> {
            self.inner.cancel(session_id).await
        }

        async fn complete(&self, session_id: Uuid) -> CoreResult<Session> {
            self.inner.complete(session_id).await
        }

        async fn set_progress(&self, session_id: Uuid, percent: u8) -> CoreResult<Session> {
            self.inner.set_progress(session_id, percent).await
        }

        async fn list_by_patient(&self, patient_id: Uuid) -> CoreResult<Vec<Session>> {
            self.inner.list_by_patient(patient_id).await
        }

        async fn list_by_provider(&self, provider_id: Uuid) -> CoreResult<Vec<Session>> {
            self.inner.list_by_provider(provider_id).await
        }

        async fn list_in_date_range(
            &self,
            from: NaiveDate,
            to: NaiveDate,
        ) -> CoreResult<Vec<Session>> {
            self.inner.list_in_date_range(from, to).await
        }
    }

    #[tokio::test]
    async fn failed_session_creation_releases_the_slot() {
        let slots = Arc::new(InMemorySlotStore::new());
        let sessions = Arc::new(FailingSessionStore {
            inner: InMemorySessionStore::new(),
        });
        let scheduler = Scheduler::new(slots.clone(), sessions);
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();

        let err = scheduler
            .book_session(
                slot.id,
                patient,
                TherapyType::Physiotherapy,
                &patient_requester(patient),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Storage(_)));

        // End state indistinguishable from "never booked".
        let after = slots.get(slot.id).await.unwrap();
        assert!(after.is_open());
        assert_eq!(after.booked_by, None);
    }

    #[tokio::test]
    async fn reschedule_moves_session_and_swaps_slots() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let old_slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();
        let new_slot = slots
            .publish(provider, date(2025, 9, 10), time(14, 0))
            .await
            .unwrap();

        let session = scheduler
            .book_session(
                old_slot.id,
                patient,
                TherapyType::CognitiveTherapy,
                &patient_requester(patient),
            )
            .await
            .unwrap();

        let moved = scheduler
            .reschedule(session.id, new_slot.id, &patient_requester(patient))
            .await
            .unwrap();
        assert_eq!(moved.id, session.id);
        assert_eq!(moved.date, date(2025, 9, 10));
        assert_eq!(moved.start_time, time(14, 0));
        assert_eq!(moved.status, SessionStatus::Scheduled);

        assert!(slots.get(old_slot.id).await.unwrap().is_open());
        let new_state = slots.get(new_slot.id).await.unwrap();
        assert_eq!(new_state.state, SlotState::Booked);
        assert_eq!(new_state.booked_by, Some(patient));
    }

    #[tokio::test]
    async fn failed_reschedule_changes_nothing() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let other = Uuid::new_v4();
        let old_slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();
        let contested = slots
            .publish(provider, date(2025, 9, 10), time(14, 0))
            .await
            .unwrap();

        let session = scheduler
            .book_session(
                old_slot.id,
                patient,
                TherapyType::Counseling,
                &patient_requester(patient),
            )
            .await
            .unwrap();
        // Someone else takes the target slot first.
        slots.book(contested.id, other).await.unwrap();

        let err = scheduler
            .reschedule(session.id, contested.id, &patient_requester(patient))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::SlotAlreadyBooked));

        // Old binding untouched.
        let unchanged = scheduler
            .sessions
            .get(session.id)
            .await
            .unwrap();
        assert_eq!(unchanged.date, date(2025, 9, 8));
        assert_eq!(unchanged.start_time, time(10, 0));
        let old_state = slots.get(old_slot.id).await.unwrap();
        assert_eq!(old_state.state, SlotState::Booked);
        assert_eq!(old_state.booked_by, Some(patient));
    }

    #[tokio::test]
    async fn reschedule_onto_another_providers_slot_is_rejected() {
        let (slots, _, scheduler) = setup();
        let provider_a = Uuid::new_v4();
        let provider_b = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let slot_a = slots
            .publish(provider_a, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();
        let slot_b = slots
            .publish(provider_b, date(2025, 9, 10), time(14, 0))
            .await
            .unwrap();

        let session = scheduler
            .book_session(
                slot_a.id,
                patient,
                TherapyType::Physiotherapy,
                &patient_requester(patient),
            )
            .await
            .unwrap();

        let err = scheduler
            .reschedule(session.id, slot_b.id, &patient_requester(patient))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ProviderMismatch));

        // Nothing moved: the other provider's slot stays open and the
        // session keeps its original binding.
        assert!(slots.get(slot_b.id).await.unwrap().is_open());
        let unchanged = scheduler.sessions.get(session.id).await.unwrap();
        assert_eq!(unchanged.date, date(2025, 9, 8));

        // Cancelling still finds and releases the bound slot.
        scheduler
            .cancel(session.id, &patient_requester(patient))
            .await
            .unwrap();
        assert!(slots.get(slot_a.id).await.unwrap().is_open());
    }

    #[tokio::test]
    async fn cancel_releases_the_bound_slot() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();
        let session = scheduler
            .book_session(
                slot.id,
                patient,
                TherapyType::Physiotherapy,
                &patient_requester(patient),
            )
            .await
            .unwrap();

        let cancelled = scheduler
            .cancel(session.id, &patient_requester(patient))
            .await
            .unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
        assert!(slots.get(slot.id).await.unwrap().is_open());

        // Cancelling twice is an invalid transition, not a panic.
        let err = scheduler
            .cancel(session.id, &patient_requester(patient))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn strangers_are_rejected() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();
        let session = scheduler
            .book_session(
                slot.id,
                patient,
                TherapyType::Counseling,
                &patient_requester(patient),
            )
            .await
            .unwrap();

        let err = scheduler
            .cancel(session.id, &patient_requester(stranger))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized));

        // A provider can only complete their own sessions.
        let err = scheduler
            .complete(
                session.id,
                &Requester {
                    user_id: stranger,
                    role: Role::Provider,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized));

        // The patient cannot complete a session at all.
        let err = scheduler
            .complete(session.id, &patient_requester(patient))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Unauthorized));

        scheduler
            .complete(
                session.id,
                &Requester {
                    user_id: provider,
                    role: Role::Provider,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn progress_is_editable_by_both_parties_and_clamped() {
        let (slots, _, scheduler) = setup();
        let provider = Uuid::new_v4();
        let patient = Uuid::new_v4();
        let slot = slots
            .publish(provider, date(2025, 9, 8), time(10, 0))
            .await
            .unwrap();
        let session = scheduler
            .book_session(
                slot.id,
                patient,
                TherapyType::OccupationalTherapy,
                &patient_requester(patient),
            )
            .await
            .unwrap();

        let updated = scheduler
            .set_progress(session.id, 40, &patient_requester(patient))
            .await
            .unwrap();
        assert_eq!(updated.progress_percent, 40);

        let updated = scheduler
            .set_progress(
                session.id,
                200,
                &Requester {
                    user_id: provider,
                    role: Role::Provider,
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.progress_percent, 100);
    }
}
