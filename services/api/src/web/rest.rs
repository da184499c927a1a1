//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.
//!
//! The authenticated (requester id, role) pair arrives in the
//! `x-user-id` / `x-user-role` headers, set by the external auth layer in
//! front of this service.

use crate::web::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use care_scheduling_core::domain::{
    Reminder, Requester, Role, Session, Slot, TherapyType,
};
use care_scheduling_core::ports::CoreError;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};
use utoipa::{IntoParams, OpenApi, ToSchema};
use uuid::Uuid;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_open_slots_handler,
        publish_slot_handler,
        delete_slot_handler,
        book_session_handler,
        reschedule_session_handler,
        cancel_session_handler,
        complete_session_handler,
        update_progress_handler,
        list_sessions_handler,
        list_notifications_handler,
    ),
    components(
        schemas(
            SlotResponse,
            PublishSlotRequest,
            SessionResponse,
            BookSessionRequest,
            RescheduleRequest,
            ProgressRequest,
            ReminderResponse,
            InAppMessageResponse,
            NotificationsResponse,
        )
    ),
    tags(
        (name = "Care Scheduling API", description = "Therapy session scheduling and care reminders.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

#[derive(Serialize, ToSchema)]
pub struct SlotResponse {
    pub id: Uuid,
    pub provider_id: Uuid,
    pub date: NaiveDate,
    pub time: NaiveTime,
    pub state: String,
}

impl From<Slot> for SlotResponse {
    fn from(slot: Slot) -> Self {
        Self {
            id: slot.id,
            provider_id: slot.provider_id,
            date: slot.date,
            time: slot.time,
            state: slot.state.as_str().to_string(),
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct SessionResponse {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub therapy_type: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub status: String,
    pub progress_percent: u8,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            id: session.id,
            patient_id: session.patient_id,
            provider_id: session.provider_id,
            therapy_type: session.therapy_type.as_str().to_string(),
            date: session.date,
            start_time: session.start_time,
            status: session.status.as_str().to_string(),
            progress_percent: session.progress_percent,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct ReminderResponse {
    pub id: Uuid,
    pub session_id: Uuid,
    pub stage: String,
    pub channel: String,
    pub message: String,
    pub status: String,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub session_date: NaiveDate,
    pub session_time: NaiveTime,
}

impl From<Reminder> for ReminderResponse {
    fn from(reminder: Reminder) -> Self {
        Self {
            id: reminder.id,
            session_id: reminder.session_id,
            stage: reminder.stage.as_str().to_string(),
            channel: reminder.channel.as_str().to_string(),
            message: reminder.message,
            status: reminder.status.as_str().to_string(),
            attempt_count: reminder.attempt_count,
            last_attempt_at: reminder.last_attempt_at,
            delivered_at: reminder.delivered_at,
            session_date: reminder.session_date,
            session_time: reminder.session_time,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct InAppMessageResponse {
    pub message: String,
    pub received_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema)]
pub struct NotificationsResponse {
    /// Reminder records for the user's sessions (all channels).
    pub reminders: Vec<ReminderResponse>,
    /// Messages delivered to the user's in-app inbox.
    pub in_app: Vec<InAppMessageResponse>,
}

#[derive(Deserialize, ToSchema)]
pub struct PublishSlotRequest {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

#[derive(Deserialize, ToSchema)]
pub struct BookSessionRequest {
    pub slot_id: Uuid,
    pub patient_id: Uuid,
    /// One of: physiotherapy, occupational_therapy, speech_therapy,
    /// cognitive_therapy, counseling.
    pub therapy_type: String,
}

#[derive(Deserialize, ToSchema)]
pub struct RescheduleRequest {
    pub new_slot_id: Uuid,
}

#[derive(Deserialize, ToSchema)]
pub struct ProgressRequest {
    pub percent: u8,
}

#[derive(Deserialize, IntoParams)]
pub struct OpenSlotsQuery {
    pub provider_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

//=========================================================================================
// Requester Extraction and Error Mapping
//=========================================================================================

type HandlerError = (StatusCode, String);

/// Reads the authenticated identity from the `x-user-id` / `x-user-role`
/// headers.
pub fn requester_from_headers(headers: &HeaderMap) -> Result<Requester, HandlerError> {
    let user_id_str = headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "x-user-id header is required".to_string(),
            )
        })?;
    let user_id = Uuid::parse_str(user_id_str).map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            "Invalid x-user-id format".to_string(),
        )
    })?;

    let role_str = headers
        .get("x-user-role")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                "x-user-role header is required".to_string(),
            )
        })?;
    let role = Role::parse(role_str).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            "x-user-role must be 'patient' or 'provider'".to_string(),
        )
    })?;

    Ok(Requester { user_id, role })
}

fn parse_therapy(raw: &str) -> Result<TherapyType, HandlerError> {
    TherapyType::parse(raw).ok_or_else(|| {
        (
            StatusCode::BAD_REQUEST,
            format!("Unknown therapy type '{raw}'"),
        )
    })
}

/// Maps a core failure to a transport status. `SlotAlreadyBooked` is the
/// expected outcome of losing a booking race and is never logged as an
/// error.
pub fn core_error_response(e: CoreError) -> HandlerError {
    match &e {
        CoreError::SlotAlreadyBooked => {
            debug!("booking race lost: {e}");
            (StatusCode::CONFLICT, e.to_string())
        }
        CoreError::DuplicateSlot | CoreError::SlotNotBooked | CoreError::ProviderMismatch => {
            debug!("slot conflict: {e}");
            (StatusCode::CONFLICT, e.to_string())
        }
        CoreError::InvalidTransition { .. } => {
            debug!("rejected transition: {e}");
            (StatusCode::CONFLICT, e.to_string())
        }
        CoreError::SlotNotFound(_) | CoreError::SessionNotFound(_) => {
            (StatusCode::NOT_FOUND, e.to_string())
        }
        CoreError::Unauthorized => {
            warn!("unauthorized scheduling request");
            (StatusCode::FORBIDDEN, "Access denied".to_string())
        }
        CoreError::Storage(_) => {
            error!("storage failure: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Operation failed".to_string(),
            )
        }
    }
}

//=========================================================================================
// Slot Handlers
//=========================================================================================

/// List open slots, optionally filtered by provider and date range.
#[utoipa::path(
    get,
    path = "/slots/open",
    params(OpenSlotsQuery),
    responses(
        (status = 200, description = "Open slots", body = [SlotResponse]),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn list_open_slots_handler(
    State(app_state): State<Arc<AppState>>,
    Query(query): Query<OpenSlotsQuery>,
) -> Result<impl IntoResponse, HandlerError> {
    let range = match (query.from, query.to) {
        (Some(from), Some(to)) => Some((from, to)),
        (None, None) => None,
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "from and to must be given together".to_string(),
            ))
        }
    };
    let slots = app_state
        .slots
        .list_open(query.provider_id, range)
        .await
        .map_err(core_error_response)?;
    let payload: Vec<SlotResponse> = slots.into_iter().map(SlotResponse::from).collect();
    Ok(Json(payload))
}

/// Publish one unit of availability for the requesting provider.
#[utoipa::path(
    post,
    path = "/slots",
    request_body = PublishSlotRequest,
    responses(
        (status = 201, description = "Slot published", body = SlotResponse),
        (status = 403, description = "Requester is not a provider"),
        (status = 409, description = "A slot already exists at this time")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn publish_slot_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<PublishSlotRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    if requester.role != Role::Provider {
        return Err((
            StatusCode::FORBIDDEN,
            "Only providers publish availability".to_string(),
        ));
    }
    let slot = app_state
        .slots
        .publish(requester.user_id, body.date, body.time)
        .await
        .map_err(core_error_response)?;
    Ok((StatusCode::CREATED, Json(SlotResponse::from(slot))))
}

/// Delete an open slot belonging to the requesting provider.
#[utoipa::path(
    delete,
    path = "/slots/{slot_id}",
    responses(
        (status = 204, description = "Slot deleted"),
        (status = 404, description = "Slot not found"),
        (status = 409, description = "Slot is booked")
    ),
    params(
        ("slot_id" = Uuid, Path, description = "The slot to delete."),
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn delete_slot_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(slot_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let slot = app_state
        .slots
        .get(slot_id)
        .await
        .map_err(core_error_response)?;
    if requester.role != Role::Provider || requester.user_id != slot.provider_id {
        return Err((StatusCode::FORBIDDEN, "Access denied".to_string()));
    }
    app_state
        .slots
        .delete_open(slot_id)
        .await
        .map_err(core_error_response)?;
    Ok(StatusCode::NO_CONTENT)
}

//=========================================================================================
// Session Handlers
//=========================================================================================

/// Book a session into an open slot.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = BookSessionRequest,
    responses(
        (status = 201, description = "Session booked", body = SessionResponse),
        (status = 403, description = "Requester does not match the patient"),
        (status = 404, description = "Slot not found"),
        (status = 409, description = "This time is no longer available")
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn book_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<BookSessionRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let therapy_type = parse_therapy(&body.therapy_type)?;
    let session = app_state
        .scheduler
        .book_session(body.slot_id, body.patient_id, therapy_type, &requester)
        .await
        .map_err(core_error_response)?;
    app_state.sweep.nudge();
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// Move a session to a new slot.
#[utoipa::path(
    put,
    path = "/sessions/{session_id}/schedule",
    request_body = RescheduleRequest,
    responses(
        (status = 200, description = "Session rescheduled", body = SessionResponse),
        (status = 404, description = "Session or slot not found"),
        (status = 409, description = "The new slot is no longer available")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The session to move."),
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn reschedule_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(body): Json<RescheduleRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let session = app_state
        .scheduler
        .reschedule(session_id, body.new_slot_id, &requester)
        .await
        .map_err(core_error_response)?;
    app_state.sweep.nudge();
    Ok(Json(SessionResponse::from(session)))
}

/// Cancel a session and release its slot.
#[utoipa::path(
    delete,
    path = "/sessions/{session_id}",
    responses(
        (status = 200, description = "Session cancelled", body = SessionResponse),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Session is already cancelled or completed")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The session to cancel."),
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn cancel_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let session = app_state
        .scheduler
        .cancel(session_id, &requester)
        .await
        .map_err(core_error_response)?;
    app_state.sweep.nudge();
    Ok(Json(SessionResponse::from(session)))
}

/// Mark a session completed (provider only).
#[utoipa::path(
    post,
    path = "/sessions/{session_id}/complete",
    responses(
        (status = 200, description = "Session completed", body = SessionResponse),
        (status = 403, description = "Only the session's provider may complete it"),
        (status = 409, description = "Session is not in a completable state")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The session to complete."),
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn complete_session_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let session = app_state
        .scheduler
        .complete(session_id, &requester)
        .await
        .map_err(core_error_response)?;
    app_state.sweep.nudge();
    Ok(Json(SessionResponse::from(session)))
}

/// Update the informational progress percentage of a session.
#[utoipa::path(
    put,
    path = "/sessions/{session_id}/progress",
    request_body = ProgressRequest,
    responses(
        (status = 200, description = "Progress updated", body = SessionResponse),
        (status = 404, description = "Session not found")
    ),
    params(
        ("session_id" = Uuid, Path, description = "The session to update."),
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn update_progress_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(session_id): Path<Uuid>,
    Json(body): Json<ProgressRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let session = app_state
        .scheduler
        .set_progress(session_id, body.percent, &requester)
        .await
        .map_err(core_error_response)?;
    Ok(Json(SessionResponse::from(session)))
}

/// List the requester's sessions (as patient or provider, per their role).
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "The requester's sessions", body = [SessionResponse])
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn list_sessions_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let sessions = sessions_for(&app_state, &requester).await?;
    let payload: Vec<SessionResponse> = sessions.into_iter().map(SessionResponse::from).collect();
    Ok(Json(payload))
}

//=========================================================================================
// Notification Handler
//=========================================================================================

/// Notifications for the requester: reminder records for their sessions
/// plus their in-app inbox.
#[utoipa::path(
    get,
    path = "/notifications",
    responses(
        (status = 200, description = "The requester's notifications", body = NotificationsResponse)
    ),
    params(
        ("x-user-id" = Uuid, Header, description = "Authenticated user id."),
        ("x-user-role" = String, Header, description = "patient or provider.")
    )
)]
pub async fn list_notifications_handler(
    State(app_state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HandlerError> {
    let requester = requester_from_headers(&headers)?;
    let sessions = sessions_for(&app_state, &requester).await?;
    let session_ids: Vec<Uuid> = sessions.iter().map(|s| s.id).collect();

    let reminders = app_state
        .notifications
        .list_by_sessions(&session_ids)
        .await
        .map_err(core_error_response)?;

    let in_app = app_state
        .in_app
        .inbox_for(requester.user_id)
        .into_iter()
        .map(|m| InAppMessageResponse {
            message: m.message,
            received_at: m.received_at,
        })
        .collect();

    Ok(Json(NotificationsResponse {
        reminders: reminders.into_iter().map(ReminderResponse::from).collect(),
        in_app,
    }))
}

async fn sessions_for(
    app_state: &AppState,
    requester: &Requester,
) -> Result<Vec<Session>, HandlerError> {
    let result = match requester.role {
        Role::Patient => app_state.sessions.list_by_patient(requester.user_id).await,
        Role::Provider => app_state.sessions.list_by_provider(requester.user_id).await,
    };
    result.map_err(core_error_response)
}
