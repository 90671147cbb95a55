use crate::api::AppState;
use crate::error::{AppError, Result};
use crate::models::{
    keys, BusinessHoursConfig, CallAttempt, CallResult, DeclineReason, Incident, IncidentEvent,
    IncidentStatus, LadderConfig, Outcome, Period, RingDuration, Role, ScheduleEntry, Site, User,
};
use crate::state::IncidentFilter;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

/// Health check endpoint
pub async fn health_check() -> Result<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// ----- telephony callbacks -----

/// Inbound emergency call from the telephony provider
pub async fn incoming_call(
    State(state): State<AppState>,
    Json(request): Json<IncomingCallRequest>,
) -> Result<(StatusCode, Json<IncidentResponse>)> {
    request.validate()?;

    let incident = state
        .engine
        .on_incoming_call(request.caller_id, request.external_id)
        .await?;

    Ok((StatusCode::CREATED, Json(IncidentResponse::from(incident))))
}

#[derive(Debug, Deserialize, Validate)]
pub struct IncomingCallRequest {
    #[validate(length(min = 1))]
    pub caller_id: String,
    pub external_id: Option<String>,
}

/// A rung target picked up. Identity is the target's phone number.
pub async fn call_answered(
    State(state): State<AppState>,
    Json(request): Json<AnsweredRequest>,
) -> Result<Json<IncidentResponse>> {
    request.validate()?;

    let user = resolve_identity(&state, &request.identity).await?;
    let incident = state.engine.on_answered(request.incident_id, user.id).await?;

    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnsweredRequest {
    pub incident_id: i64,
    #[validate(length(min = 1))]
    pub identity: String,
}

/// A rung target's call ended without an answer
pub async fn attempt_result(
    State(state): State<AppState>,
    Json(request): Json<AttemptResultRequest>,
) -> Result<StatusCode> {
    request.validate()?;

    let user = resolve_identity(&state, &request.identity).await?;
    state
        .engine
        .on_terminal_result(
            request.incident_id,
            user.id,
            request.result,
            request.decline_reason,
            request.decline_reason_text,
        )
        .await?;

    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
pub struct AttemptResultRequest {
    pub incident_id: i64,
    #[validate(length(min = 1))]
    pub identity: String,
    pub result: CallResult,
    pub decline_reason: Option<DeclineReason>,
    pub decline_reason_text: Option<String>,
}

async fn resolve_identity(state: &AppState, identity: &str) -> Result<User> {
    state
        .store
        .find_user_by_phone(identity)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("no user with phone {}", identity)))
}

// ----- incident reads -----

/// List incidents
pub async fn list_incidents(
    State(state): State<AppState>,
    Query(params): Query<ListIncidentsQuery>,
) -> Result<Json<ListIncidentsResponse>> {
    let filter = IncidentFilter {
        statuses: params.status.into_iter().collect(),
        assigned_user_id: params.assigned_user_id,
        unclaimed_only: params.unclaimed_only.unwrap_or(false),
        critical_only: params.critical_only.unwrap_or(false),
    };

    let incidents = state.store.list_incidents(&filter).await?;
    let total = incidents.len();

    Ok(Json(ListIncidentsResponse {
        incidents: incidents.into_iter().map(IncidentResponse::from).collect(),
        total,
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListIncidentsQuery {
    pub status: Option<IncidentStatus>,
    pub assigned_user_id: Option<i64>,
    pub unclaimed_only: Option<bool>,
    pub critical_only: Option<bool>,
}

/// Get an incident with its full attempt and event trail
pub async fn get_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<IncidentDetailResponse>> {
    let incident = state
        .store
        .get_incident(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("incident {}", id)))?;

    let attempts = state.store.attempts_for_incident(id).await?;
    let events = state.store.events_for_incident(id).await?;

    Ok(Json(IncidentDetailResponse {
        incident: IncidentResponse::from(incident),
        attempts,
        events,
    }))
}

// ----- incident mutations -----

pub async fn accept_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<ActorRequest>,
) -> Result<Json<IncidentResponse>> {
    let incident = state.engine.accept(id, request.user_id).await?;
    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub user_id: i64,
}

pub async fn decline_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<DeclineRequest>,
) -> Result<Json<IncidentResponse>> {
    let incident = state
        .engine
        .decline(id, request.user_id, request.reason, request.reason_text)
        .await?;
    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize)]
pub struct DeclineRequest {
    pub user_id: i64,
    pub reason: Option<DeclineReason>,
    pub reason_text: Option<String>,
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<IncidentResponse>> {
    let incident = state
        .engine
        .update_status(id, request.user_id, request.status)
        .await?;
    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub user_id: i64,
    pub status: IncidentStatus,
}

pub async fn close_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<CloseRequest>,
) -> Result<Json<IncidentResponse>> {
    request.validate()?;

    let incident = state
        .engine
        .close(
            id,
            request.user_id,
            request.outcome,
            request.notes,
            request.follow_up_required.unwrap_or(false),
        )
        .await?;
    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CloseRequest {
    pub user_id: i64,
    pub outcome: Outcome,
    #[validate(length(max = 2000))]
    pub notes: Option<String>,
    pub follow_up_required: Option<bool>,
}

pub async fn assign_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<AssignRequest>,
) -> Result<Json<IncidentResponse>> {
    let incident = state
        .engine
        .manual_assign(id, request.user_id, request.acting_user_id)
        .await?;
    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    /// User the incident is handed to
    pub user_id: i64,
    pub acting_user_id: i64,
}

pub async fn escalate_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<EscalateRequest>,
) -> Result<Json<IncidentResponse>> {
    let incident = state
        .engine
        .manual_escalate(id, request.acting_user_id)
        .await?;
    Ok(Json(IncidentResponse::from(incident)))
}

#[derive(Debug, Deserialize)]
pub struct EscalateRequest {
    pub acting_user_id: i64,
}

// ----- directory administration -----

pub async fn create_user(
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>)> {
    request.validate()?;

    let mut user = User::new(request.name, request.phone, request.role);
    let id = state.store.create_user(&user).await?;
    user.id = id;

    Ok((StatusCode::CREATED, Json(UserResponse::from(user))))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1))]
    pub phone: Option<String>,
    pub role: Role,
}

pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserResponse>>> {
    let users = state.store.list_users().await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>> {
    let mut user = state
        .store
        .get_user(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", id)))?;

    if let Some(name) = request.name {
        user.name = name;
    }
    if let Some(phone) = request.phone {
        user.phone = if phone.is_empty() { None } else { Some(phone) };
    }
    if let Some(role) = request.role {
        user.role = role;
    }
    if let Some(active) = request.active {
        user.active = active;
    }
    if let Some(available) = request.available {
        user.available = available;
    }
    user.updated_at = Utc::now();

    state.store.update_user(&user).await?;
    Ok(Json(UserResponse::from(user)))
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub phone: Option<String>,
    pub role: Option<Role>,
    pub active: Option<bool>,
    pub available: Option<bool>,
}

pub async fn create_site(
    State(state): State<AppState>,
    Json(request): Json<CreateSiteRequest>,
) -> Result<(StatusCode, Json<Site>)> {
    request.validate()?;

    let mut site = Site::new(request.name, request.address);
    site.notes = request.notes;
    site.phone_match_rules = request.phone_match_rules;
    let id = state.store.create_site(&site).await?;
    site.id = id;

    Ok((StatusCode::CREATED, Json(site)))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSiteRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub address: String,
    pub notes: Option<String>,
    #[serde(default)]
    pub phone_match_rules: Vec<String>,
}

pub async fn list_sites(State(state): State<AppState>) -> Result<Json<Vec<Site>>> {
    Ok(Json(state.store.list_sites().await?))
}

pub async fn create_schedule_entry(
    State(state): State<AppState>,
    Json(request): Json<CreateScheduleRequest>,
) -> Result<(StatusCode, Json<ScheduleEntry>)> {
    if request.end_time <= request.start_time {
        return Err(AppError::Validation(
            "end_time must be after start_time".to_string(),
        ));
    }
    state
        .store
        .get_user(request.user_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("user {}", request.user_id)))?;

    let mut entry = ScheduleEntry::new(request.user_id, request.start_time, request.end_time);
    entry.is_primary = request.is_primary.unwrap_or(false);
    entry.is_secondary = request.is_secondary.unwrap_or(false);
    entry.pool_eligible = request.pool_eligible.unwrap_or(true);
    let id = state.store.create_schedule_entry(&entry).await?;
    entry.id = id;

    Ok((StatusCode::CREATED, Json(entry)))
}

#[derive(Debug, Deserialize)]
pub struct CreateScheduleRequest {
    pub user_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_primary: Option<bool>,
    pub is_secondary: Option<bool>,
    pub pool_eligible: Option<bool>,
}

// ----- runtime configuration -----

pub async fn get_business_hours(
    State(state): State<AppState>,
) -> Result<Json<BusinessHoursConfig>> {
    Ok(Json(state.settings.business_hours().await?))
}

pub async fn put_business_hours(
    State(state): State<AppState>,
    Json(request): Json<BusinessHoursConfig>,
) -> Result<Json<BusinessHoursConfig>> {
    if request.days.iter().any(|d| *d > 6) {
        return Err(AppError::Validation(
            "days must be 0 (Sunday) through 6 (Saturday)".to_string(),
        ));
    }
    if request.start_hour > 23
        || request.end_hour > 23
        || request.start_minute > 59
        || request.end_minute > 59
    {
        return Err(AppError::Validation(
            "hours must be 0-23 and minutes 0-59".to_string(),
        ));
    }
    if request.timezone.parse::<chrono_tz::Tz>().is_err() {
        return Err(AppError::Validation(format!(
            "unknown timezone: {}",
            request.timezone
        )));
    }

    state
        .store
        .set_config(keys::BUSINESS_HOURS, serde_json::to_value(&request)?)
        .await?;
    Ok(Json(request))
}

pub async fn get_ring_duration(State(state): State<AppState>) -> Result<Json<RingDuration>> {
    Ok(Json(state.settings.ring_duration().await?))
}

pub async fn put_ring_duration(
    State(state): State<AppState>,
    Json(request): Json<RingDuration>,
) -> Result<Json<RingDuration>> {
    let clamped = RingDuration::clamped(request.seconds);
    state
        .store
        .set_config(keys::RING_DURATION, serde_json::to_value(&clamped)?)
        .await?;
    Ok(Json(clamped))
}

pub async fn get_ladders(State(state): State<AppState>) -> Result<Json<LaddersResponse>> {
    Ok(Json(LaddersResponse {
        business_hours: state.settings.ladder(Period::BusinessHours).await?,
        after_hours: state.settings.ladder(Period::AfterHours).await?,
    }))
}

pub async fn put_ladders(
    State(state): State<AppState>,
    Json(request): Json<PutLaddersRequest>,
) -> Result<Json<LaddersResponse>> {
    if let Some(ref ladder) = request.business_hours {
        validate_ladder(ladder)?;
        state
            .store
            .set_config(keys::BUSINESS_HOURS_LADDER, serde_json::to_value(ladder)?)
            .await?;
    }
    if let Some(ref ladder) = request.after_hours {
        validate_ladder(ladder)?;
        state
            .store
            .set_config(keys::AFTER_HOURS_LADDER, serde_json::to_value(ladder)?)
            .await?;
    }

    Ok(Json(LaddersResponse {
        business_hours: state.settings.ladder(Period::BusinessHours).await?,
        after_hours: state.settings.ladder(Period::AfterHours).await?,
    }))
}

fn validate_ladder(ladder: &LadderConfig) -> Result<()> {
    if ladder.steps.is_empty() {
        return Err(AppError::Validation(
            "a ladder needs at least one step".to_string(),
        ));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct LaddersResponse {
    pub business_hours: LadderConfig,
    pub after_hours: LadderConfig,
}

#[derive(Debug, Deserialize)]
pub struct PutLaddersRequest {
    pub business_hours: Option<LadderConfig>,
    pub after_hours: Option<LadderConfig>,
}

// ----- response DTOs -----

/// Incident response DTO
#[derive(Debug, Serialize)]
pub struct IncidentResponse {
    pub id: i64,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub period: Period,
    pub caller_id: String,
    pub site_id: Option<i64>,
    pub status: IncidentStatus,
    pub assigned_user_id: Option<i64>,
    pub critical: bool,
    pub answered_unclaimed: bool,
    pub outcome: Option<Outcome>,
    pub outcome_notes: Option<String>,
    pub follow_up_required: bool,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl From<Incident> for IncidentResponse {
    fn from(incident: Incident) -> Self {
        Self {
            id: incident.id,
            external_id: incident.external_id,
            created_at: incident.created_at,
            updated_at: incident.updated_at,
            period: incident.period,
            caller_id: incident.caller_id,
            site_id: incident.site_id,
            status: incident.status,
            assigned_user_id: incident.assigned_user_id,
            critical: incident.critical,
            answered_unclaimed: incident.answered_unclaimed,
            outcome: incident.outcome,
            outcome_notes: incident.outcome_notes,
            follow_up_required: incident.follow_up_required,
            resolved_at: incident.resolved_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct IncidentDetailResponse {
    pub incident: IncidentResponse,
    pub attempts: Vec<CallAttempt>,
    pub events: Vec<IncidentEvent>,
}

#[derive(Debug, Serialize)]
pub struct ListIncidentsResponse {
    pub incidents: Vec<IncidentResponse>,
    pub total: usize,
}

/// User response DTO
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub role: Role,
    pub active: bool,
    pub available: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            name: user.name,
            phone: user.phone,
            role: user.role,
            active: user.active,
            available: user.available,
        }
    }
}
