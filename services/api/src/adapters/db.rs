//! services/api/src/adapters/db.rs
//!
//! PostgreSQL implementations of the three store ports from the `core`
//! crate, using `sqlx`. Queries are runtime-bound so the service builds
//! without a live database. The booking check-and-set is a single
//! conditional UPDATE, so concurrent bookers serialize on the slot row and
//! exactly one of them wins.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use care_scheduling_core::domain::{
    clamp_progress, ChannelKind, DeliveryStatus, Reminder, ReminderStage, Session, SessionStatus,
    Slot, SlotState, TherapyType,
};
use care_scheduling_core::ports::{
    CoreError, CoreResult, NotificationStore, SessionStore, SlotStore,
};

/// A helper function to run database migrations at startup.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

fn storage_err(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct SlotRecord {
    id: Uuid,
    provider_id: Uuid,
    date: NaiveDate,
    time: NaiveTime,
    state: String,
    booked_by: Option<Uuid>,
}

impl SlotRecord {
    fn to_domain(self) -> CoreResult<Slot> {
        let state = SlotState::parse(&self.state)
            .ok_or_else(|| CoreError::Storage(format!("unknown slot state '{}'", self.state)))?;
        Ok(Slot {
            id: self.id,
            provider_id: self.provider_id,
            date: self.date,
            time: self.time,
            booked_by: self.booked_by,
            state,
        })
    }
}

#[derive(FromRow)]
struct SessionRecord {
    id: Uuid,
    patient_id: Uuid,
    provider_id: Uuid,
    therapy_type: String,
    date: NaiveDate,
    start_time: NaiveTime,
    status: String,
    progress_percent: i16,
    created_at: DateTime<Utc>,
}

impl SessionRecord {
    fn to_domain(self) -> CoreResult<Session> {
        let therapy_type = TherapyType::parse(&self.therapy_type).ok_or_else(|| {
            CoreError::Storage(format!("unknown therapy type '{}'", self.therapy_type))
        })?;
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| CoreError::Storage(format!("unknown session status '{}'", self.status)))?;
        Ok(Session {
            id: self.id,
            patient_id: self.patient_id,
            provider_id: self.provider_id,
            therapy_type,
            date: self.date,
            start_time: self.start_time,
            status,
            progress_percent: self.progress_percent.clamp(0, 100) as u8,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct ReminderRecord {
    id: Uuid,
    session_id: Uuid,
    stage: String,
    recipient_id: Uuid,
    channel: String,
    therapy_type: String,
    session_date: NaiveDate,
    session_time: NaiveTime,
    message: String,
    status: String,
    attempt_count: i32,
    last_attempt_at: Option<DateTime<Utc>>,
    delivered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl ReminderRecord {
    fn to_domain(self) -> CoreResult<Reminder> {
        let stage = ReminderStage::parse(&self.stage)
            .ok_or_else(|| CoreError::Storage(format!("unknown stage '{}'", self.stage)))?;
        let channel = ChannelKind::parse(&self.channel)
            .ok_or_else(|| CoreError::Storage(format!("unknown channel '{}'", self.channel)))?;
        let therapy_type = TherapyType::parse(&self.therapy_type).ok_or_else(|| {
            CoreError::Storage(format!("unknown therapy type '{}'", self.therapy_type))
        })?;
        let status = DeliveryStatus::parse(&self.status)
            .ok_or_else(|| CoreError::Storage(format!("unknown delivery status '{}'", self.status)))?;
        Ok(Reminder {
            id: self.id,
            session_id: self.session_id,
            stage,
            recipient_id: self.recipient_id,
            channel,
            therapy_type,
            session_date: self.session_date,
            session_time: self.session_time,
            message: self.message,
            status,
            attempt_count: self.attempt_count.max(0) as u32,
            last_attempt_at: self.last_attempt_at,
            delivered_at: self.delivered_at,
            created_at: self.created_at,
        })
    }
}

//=========================================================================================
// Slot Store
//=========================================================================================

const SLOT_COLUMNS: &str = "id, provider_id, date, time, state, booked_by";

#[derive(Clone)]
pub struct PgSlotStore {
    pool: PgPool,
}

impl PgSlotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SlotStore for PgSlotStore {
    async fn publish(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> CoreResult<Slot> {
        let sql = format!(
            "INSERT INTO slots (id, provider_id, date, time, state) \
             VALUES ($1, $2, $3, $4, 'open') \
             ON CONFLICT (provider_id, date, time) DO NOTHING \
             RETURNING {SLOT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SlotRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(provider_id)
            .bind(date)
            .bind(time)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match record {
            Some(record) => record.to_domain(),
            None => Err(CoreError::DuplicateSlot),
        }
    }

    async fn get(&self, slot_id: Uuid) -> CoreResult<Slot> {
        let sql = format!("SELECT {SLOT_COLUMNS} FROM slots WHERE id = $1");
        let record = sqlx::query_as::<_, SlotRecord>(&sql)
            .bind(slot_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        record
            .ok_or(CoreError::SlotNotFound(slot_id))?
            .to_domain()
    }

    async fn find(
        &self,
        provider_id: Uuid,
        date: NaiveDate,
        time: NaiveTime,
    ) -> CoreResult<Option<Slot>> {
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM slots WHERE provider_id = $1 AND date = $2 AND time = $3"
        );
        let record = sqlx::query_as::<_, SlotRecord>(&sql)
            .bind(provider_id)
            .bind(date)
            .bind(time)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        record.map(SlotRecord::to_domain).transpose()
    }

    async fn book(&self, slot_id: Uuid, patient_id: Uuid) -> CoreResult<Slot> {
        // The whole booking race rides on this conditional UPDATE: the row
        // lock serializes concurrent bookers and only one matches
        // state = 'open'.
        let sql = format!(
            "UPDATE slots SET state = 'booked', booked_by = $2 \
             WHERE id = $1 AND state = 'open' \
             RETURNING {SLOT_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SlotRecord>(&sql)
            .bind(slot_id)
            .bind(patient_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match record {
            Some(record) => record.to_domain(),
            // Distinguish the loser of the race from a bogus id.
            None => match self.get(slot_id).await {
                Ok(_) => Err(CoreError::SlotAlreadyBooked),
                Err(e) => Err(e),
            },
        }
    }

    async fn release(&self, slot_id: Uuid) -> CoreResult<()> {
        let result = sqlx::query(
            "UPDATE slots SET state = 'open', booked_by = NULL \
             WHERE id = $1 AND state = 'booked'",
        )
        .bind(slot_id)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(slot_id).await {
            Ok(_) => Err(CoreError::SlotNotBooked),
            Err(e) => Err(e),
        }
    }

    async fn delete_open(&self, slot_id: Uuid) -> CoreResult<()> {
        let result = sqlx::query("DELETE FROM slots WHERE id = $1 AND state = 'open'")
            .bind(slot_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        if result.rows_affected() == 1 {
            return Ok(());
        }
        match self.get(slot_id).await {
            Ok(_) => Err(CoreError::SlotAlreadyBooked),
            Err(e) => Err(e),
        }
    }

    async fn list_open(
        &self,
        provider_id: Option<Uuid>,
        date_range: Option<(NaiveDate, NaiveDate)>,
    ) -> CoreResult<Vec<Slot>> {
        let (from, to) = match date_range {
            Some((from, to)) => (Some(from), Some(to)),
            None => (None, None),
        };
        let sql = format!(
            "SELECT {SLOT_COLUMNS} FROM slots \
             WHERE state = 'open' \
             AND ($1::uuid IS NULL OR provider_id = $1) \
             AND ($2::date IS NULL OR date >= $2) \
             AND ($3::date IS NULL OR date <= $3) \
             ORDER BY date, time"
        );
        let records = sqlx::query_as::<_, SlotRecord>(&sql)
            .bind(provider_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        records.into_iter().map(SlotRecord::to_domain).collect()
    }
}

//=========================================================================================
// Session Store
//=========================================================================================

const SESSION_COLUMNS: &str = "id, patient_id, provider_id, therapy_type, date, start_time, \
                               status, progress_percent, created_at";

#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies a guarded status transition and reports
    /// [`CoreError::InvalidTransition`] with the actual current status when
    /// the guard did not match.
    async fn guarded_transition(
        &self,
        session_id: Uuid,
        next: SessionStatus,
    ) -> CoreResult<Session> {
        let sql = format!(
            "UPDATE sessions SET status = $2 \
             WHERE id = $1 AND status = 'scheduled' \
             RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(next.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match record {
            Some(record) => record.to_domain(),
            None => {
                let current = self.get(session_id).await?;
                Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: next,
                })
            }
        }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(
        &self,
        patient_id: Uuid,
        provider_id: Uuid,
        therapy_type: TherapyType,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> CoreResult<Session> {
        let sql = format!(
            "INSERT INTO sessions \
             (id, patient_id, provider_id, therapy_type, date, start_time, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, 'scheduled', now()) \
             RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(patient_id)
            .bind(provider_id)
            .bind(therapy_type.as_str())
            .bind(date)
            .bind(start_time)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;
        record.to_domain()
    }

    async fn get(&self, session_id: Uuid) -> CoreResult<Session> {
        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = $1");
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        record
            .ok_or(CoreError::SessionNotFound(session_id))?
            .to_domain()
    }

    async fn update_schedule(
        &self,
        session_id: Uuid,
        new_date: NaiveDate,
        new_start_time: NaiveTime,
    ) -> CoreResult<Session> {
        let sql = format!(
            "UPDATE sessions SET date = $2, start_time = $3 \
             WHERE id = $1 AND status = 'scheduled' \
             RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(new_date)
            .bind(new_start_time)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        match record {
            Some(record) => record.to_domain(),
            None => {
                let current = self.get(session_id).await?;
                Err(CoreError::InvalidTransition {
                    from: current.status,
                    to: SessionStatus::Scheduled,
                })
            }
        }
    }

    async fn cancel(&self, session_id: Uuid) -> CoreResult<Session> {
        self.guarded_transition(session_id, SessionStatus::Cancelled)
            .await
    }

    async fn complete(&self, session_id: Uuid) -> CoreResult<Session> {
        self.guarded_transition(session_id, SessionStatus::Completed)
            .await
    }

    async fn set_progress(&self, session_id: Uuid, percent: u8) -> CoreResult<Session> {
        let sql = format!(
            "UPDATE sessions SET progress_percent = $2 WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        );
        let record = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(session_id)
            .bind(clamp_progress(percent) as i16)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        record
            .ok_or(CoreError::SessionNotFound(session_id))?
            .to_domain()
    }

    async fn list_by_patient(&self, patient_id: Uuid) -> CoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE patient_id = $1 ORDER BY date, start_time"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(patient_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        records.into_iter().map(SessionRecord::to_domain).collect()
    }

    async fn list_by_provider(&self, provider_id: Uuid) -> CoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE provider_id = $1 ORDER BY date, start_time"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(provider_id)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        records.into_iter().map(SessionRecord::to_domain).collect()
    }

    async fn list_in_date_range(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> CoreResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE date >= $1 AND date <= $2"
        );
        let records = sqlx::query_as::<_, SessionRecord>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        records.into_iter().map(SessionRecord::to_domain).collect()
    }
}

//=========================================================================================
// Notification Store
//=========================================================================================

const REMINDER_COLUMNS: &str = "id, session_id, stage, recipient_id, channel, therapy_type, \
                                session_date, session_time, message, status, attempt_count, \
                                last_attempt_at, delivered_at, created_at";

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: PgPool,
}

impl PgNotificationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn insert_if_absent(&self, reminder: Reminder) -> CoreResult<bool> {
        // The primary key is the deterministic (session, stage) id, so the
        // conflict target makes re-derivation a no-op.
        let result = sqlx::query(
            "INSERT INTO reminders \
             (id, session_id, stage, recipient_id, channel, therapy_type, session_date, \
              session_time, message, status, attempt_count, last_attempt_at, delivered_at, \
              created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(reminder.id)
        .bind(reminder.session_id)
        .bind(reminder.stage.as_str())
        .bind(reminder.recipient_id)
        .bind(reminder.channel.as_str())
        .bind(reminder.therapy_type.as_str())
        .bind(reminder.session_date)
        .bind(reminder.session_time)
        .bind(&reminder.message)
        .bind(reminder.status.as_str())
        .bind(reminder.attempt_count as i32)
        .bind(reminder.last_attempt_at)
        .bind(reminder.delivered_at)
        .bind(reminder.created_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, reminder_id: Uuid) -> CoreResult<Reminder> {
        let sql = format!("SELECT {REMINDER_COLUMNS} FROM reminders WHERE id = $1");
        let record = sqlx::query_as::<_, ReminderRecord>(&sql)
            .bind(reminder_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;
        record
            .ok_or_else(|| CoreError::Storage(format!("reminder {reminder_id} not found")))?
            .to_domain()
    }

    async fn record_attempt(
        &self,
        reminder_id: Uuid,
        status: DeliveryStatus,
        attempted_at: DateTime<Utc>,
    ) -> CoreResult<()> {
        sqlx::query(
            "UPDATE reminders SET \
               attempt_count = attempt_count + 1, \
               last_attempt_at = $3, \
               status = $2, \
               delivered_at = CASE WHEN $2 = 'delivered' THEN $3 ELSE delivered_at END \
             WHERE id = $1",
        )
        .bind(reminder_id)
        .bind(status.as_str())
        .bind(attempted_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    async fn mark_failed(&self, reminder_id: Uuid) -> CoreResult<()> {
        sqlx::query("UPDATE reminders SET status = 'failed' WHERE id = $1")
            .bind(reminder_id)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn list_by_sessions(&self, session_ids: &[Uuid]) -> CoreResult<Vec<Reminder>> {
        if session_ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {REMINDER_COLUMNS} FROM reminders \
             WHERE session_id = ANY($1) ORDER BY created_at"
        );
        let records = sqlx::query_as::<_, ReminderRecord>(&sql)
            .bind(session_ids)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;
        records.into_iter().map(ReminderRecord::to_domain).collect()
    }
}
