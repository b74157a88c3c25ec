//! Rotas HTTP do serviço de agendamento

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{NaiveDate, NaiveTime, Utc};
use common_db::models::{Appointment, AvailabilitySlot, NewSlot, Role, User};
use common_db::DbError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::limit::ConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::auth::AuthUser;
use crate::booking::{SideEffectReport, SideEffectWarning};
use crate::build_info;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router(state: AppState, max_concurrent_requests: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/slots", post(create_slot))
        .route("/slots/:slot_id", delete(delete_slot))
        .route("/slots/:slot_id/book", post(book_slot))
        .route("/doctors/:doctor_id/slots", get(list_doctor_slots))
        .route("/appointments", get(list_appointments))
        .route("/calendar/authorize", get(calendar_authorize))
        .route("/calendar/callback", get(calendar_callback))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(ConcurrencyLimitLayer::new(max_concurrent_requests)),
        )
        .with_state(state)
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct BookSlotRequest {
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSlotResponse {
    pub appointment: Appointment,
    pub side_effects: SideEffectReport,
    pub calendar_warnings: Vec<SideEffectWarning>,
    pub notification_warnings: Vec<SideEffectWarning>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationResponse {
    pub authorization_url: String,
}

/// Parâmetros com que o Google redireciona de volta após o consentimento
#[derive(Debug, Deserialize)]
pub struct CalendarCallback {
    pub state: String,
    pub code: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[validate(schema(function = "validate_slot_interval"))]
pub struct CreateSlotRequest {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

fn validate_slot_interval(request: &CreateSlotRequest) -> Result<(), ValidationError> {
    if request.end_time <= request.start_time {
        return Err(ValidationError::new("end_time_before_start_time"));
    }
    if request.date < Utc::now().date_naive() {
        return Err(ValidationError::new("date_in_past"));
    }
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": build_info::PKG_VERSION,
        "profile": build_info::PROFILE,
    }))
}

/// Carrega o participante do token e confere o papel gravado
async fn caller(state: &AppState, auth: AuthUser, role: Role) -> ApiResult<User> {
    auth.require(role)?;
    let user = state.users.get(auth.id).await.map_err(|e| match e {
        DbError::NotFound(_) => ApiError::unauthorized("Usuário desconhecido"),
        other => other.into(),
    })?;
    if user.role != role {
        return Err(ApiError::forbidden(format!("Acesso restrito ao papel {}", role)));
    }
    Ok(user)
}

async fn book_slot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(slot_id): Path<Uuid>,
    Json(request): Json<BookSlotRequest>,
) -> ApiResult<(StatusCode, Json<BookSlotResponse>)> {
    request.validate()?;
    let patient = caller(&state, auth, Role::Patient).await?;

    let outcome = state
        .coordinator
        .book(&patient, slot_id, request.notes.as_deref().unwrap_or_default())
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(BookSlotResponse {
            appointment: outcome.appointment,
            side_effects: outcome.side_effects,
            calendar_warnings: outcome.calendar_warnings,
            notification_warnings: outcome.notification_warnings,
        }),
    ))
}

async fn create_slot(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(request): Json<CreateSlotRequest>,
) -> ApiResult<(StatusCode, Json<AvailabilitySlot>)> {
    request.validate()?;
    let doctor = caller(&state, auth, Role::Doctor).await?;

    let slot = state
        .slots
        .create(NewSlot {
            doctor_id: doctor.id,
            date: request.date,
            start_time: request.start_time,
            end_time: request.end_time,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

async fn delete_slot(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(slot_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let doctor = caller(&state, auth, Role::Doctor).await?;
    state.slots.delete(slot_id, doctor.id).await?;
    info!(slot_id = %slot_id, doctor_id = %doctor.id, "Horário removido pelo médico");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_doctor_slots(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(doctor_id): Path<Uuid>,
) -> ApiResult<Json<Vec<AvailabilitySlot>>> {
    let slots = state
        .slots
        .list_for_doctor(doctor_id, Utc::now().date_naive())
        .await?;
    Ok(Json(slots))
}

async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<Vec<Appointment>>> {
    let user = caller(&state, auth, auth.role).await?;
    let appointments = match user.role {
        Role::Doctor => state.appointments.list_for_doctor(user.id).await?,
        Role::Patient => state.appointments.list_for_patient(user.id).await?,
    };
    Ok(Json(appointments))
}

async fn calendar_authorize(
    State(state): State<AppState>,
    auth: AuthUser,
) -> ApiResult<Json<AuthorizationResponse>> {
    let user = caller(&state, auth, auth.role).await?;
    let link_state = state.auth.issue_link_state(user.id)?;
    let authorization_url = state.calendar_link.authorization_url(&link_state)?;
    Ok(Json(AuthorizationResponse { authorization_url }))
}

/// Callback do consentimento; quem iniciou vem do `state` assinado
async fn calendar_callback(
    State(state): State<AppState>,
    Query(callback): Query<CalendarCallback>,
) -> ApiResult<Json<serde_json::Value>> {
    let link_state = state.auth.verify_link_state(&callback.state)?;
    if let Some(reason) = callback.error {
        info!(user_id = %link_state.sub, reason = %reason, "Vinculação de agenda recusada pelo usuário");
        return Err(ApiError::bad_request(format!("Consentimento negado: {}", reason)));
    }
    let code = callback
        .code
        .ok_or_else(|| ApiError::bad_request("Parâmetro code ausente"))?;

    let user = state.users.get(link_state.sub).await?;
    state.calendar_link.link(user.id, &code).await?;
    Ok(Json(json!({ "linked": true, "userId": user.id })))
}
