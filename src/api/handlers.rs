//! HTTP request handlers

use super::auth::{AdminKey, AuthUser};
use super::types::{
    AdminSendRequest, ApprovalResult, ApprovalsResponse, ApproveRequest, ApproveResponse,
    CircleResponse, CirclesResponse, CreateCircleRequest, CreateEventRequest,
    CreateEventResponse, ErrorResponse, EventsResponse, JoinCircleRequest, LeaveResponse,
    LiffMessageRequest, MeResponse, MembersQuery, MembersResponse, RegisterRequest,
    RegisterResponse, ReminderRunResponse, RemoveMemberRequest, SearchQuery, SearchResponse,
    StatusResponse,
};
use super::webhook::handle_webhook;
use super::AppState;
use crate::circles::{NamedJoin, ResolvedCircle, SEARCH_LIMIT};
use crate::db::{DbError, User};
use crate::error::{ErrorKind, ServiceError};
use crate::ledger::{ApprovalOutcome, NewEvent};
use crate::notify::{Content, Delivery};
use crate::runtime::{sanitize_input, ReceivedMessage};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Chat platform
        .route("/webhook", post(handle_webhook))
        // Mini-app: profile and registration
        .route("/api/liff/me", get(get_me))
        .route("/api/liff/register", post(register))
        .route("/api/liff/message", post(post_message))
        // Mini-app: events and approvals
        .route("/api/liff/events", get(list_events).post(create_event))
        .route("/api/liff/approvals", get(list_approvals).post(approve_payments))
        // Mini-app: circles
        .route("/api/liff/circle/members", get(current_circle_members))
        .route("/api/liff/circles", get(list_my_circles).post(create_circle))
        .route("/api/liff/circles/join", post(join_circle))
        .route("/api/liff/circles/search", get(search_circles))
        .route("/api/liff/circles/:id/members", get(circle_members))
        .route("/api/liff/circles/:id/leave", post(leave_circle))
        .route("/api/liff/circles/:id/remove", post(remove_member))
        .route("/api/liff/circles/:id/primary", post(set_primary_circle))
        // Admin
        .route("/api/admin/users", get(admin_users))
        .route("/api/admin/messages", get(admin_messages))
        .route("/api/admin/send", post(admin_send))
        .route("/api/admin/reminders/run", post(admin_run_reminders))
        // Version
        .route("/version", get(get_version))
        .with_state(state)
}

// ============================================================
// Mini-app: profile and registration
// ============================================================

async fn get_me(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<MeResponse>, AppError> {
    let Some(user) = state.db.get_user(&identity.user_id)? else {
        return Ok(Json(MeResponse::unregistered(
            identity.user_id,
            identity.display_name,
        )));
    };
    let circle = match state.circles.resolve_circle_membership(&user)? {
        ResolvedCircle::Member(circle) => Some(circle.name),
        ResolvedCircle::Legacy(name) => Some(name),
        ResolvedCircle::Unaffiliated => None,
    };
    Ok(Json(MeResponse {
        registered: user.is_registered(),
        name: Some(user.name),
        circle,
        step: Some(user.step),
        primary_circle_id: user.primary_circle_id,
        ..MeResponse::unregistered(user.user_id, identity.display_name)
    }))
}

/// Completes registration in one request: get-or-create the circle, join it,
/// and make it primary unless the user already has one.
async fn register(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, AppError> {
    let circle_name = sanitize_input(&req.circle);
    if circle_name.is_empty() {
        return Err(AppError::BadRequest("Circle is required".to_string()));
    }

    let circle = state
        .circles
        .get_or_create_circle(&circle_name, &identity.user_id)?;
    match state.circles.join_circle(&identity.user_id, circle.id) {
        Ok(_) | Err(ServiceError::AlreadyMember) => {}
        Err(e) => return Err(e.into()),
    }
    state.db.complete_registration(
        &identity.user_id,
        &identity.display_name,
        &circle.name,
        Some(circle.id),
    )?;

    tracing::info!(user_id = %identity.user_id, circle_id = circle.id, "Registered through mini-app");
    Ok(Json(RegisterResponse::new(
        identity.user_id,
        identity.display_name,
        circle,
    )))
}

async fn post_message(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<LiffMessageRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    let message = sanitize_input(&req.message);
    if message.is_empty() {
        return Err(AppError::BadRequest("Message is required".to_string()));
    }
    state.recent.push(identity.user_id, message);
    Ok(Json(StatusResponse::ok_with("Message received")))
}

// ============================================================
// Mini-app: events and approvals
// ============================================================

async fn list_events(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<EventsResponse>, AppError> {
    let events = state.ledger.events_by_organizer(&identity.user_id)?;
    Ok(Json(EventsResponse::new(events)))
}

async fn create_event(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateEventRequest>,
) -> Result<Json<CreateEventResponse>, AppError> {
    let organizer = require_user(&state, &identity.user_id)?;

    let circle = match req.circle_id {
        Some(circle_id) => {
            state.circles.require_member(&organizer.user_id, circle_id)?;
            state.circles.get(circle_id)?.name
        }
        None => match state.circles.resolve_circle_membership(&organizer)? {
            ResolvedCircle::Member(circle) => circle.name,
            ResolvedCircle::Legacy(name) => name,
            ResolvedCircle::Unaffiliated => String::new(),
        },
    };

    let created = state.ledger.create_event(NewEvent {
        name: sanitize_input(&req.event_name),
        organizer_id: organizer.user_id,
        circle,
        total_amount: req.total_amount,
        participant_ids: req.participant_ids,
    })?;

    Ok(Json(CreateEventResponse::new(
        created.event.id,
        created.event.split_amount,
        created.event.remainder,
        created.participants.len(),
        created.skipped,
    )))
}

async fn list_approvals(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<ApprovalsResponse>, AppError> {
    let approvals = state.ledger.pending_approvals(&identity.user_id)?;
    Ok(Json(ApprovalsResponse::new(approvals)))
}

/// Each participant is approved independently; one failure does not abort
/// the rest of the batch.
async fn approve_payments(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<ApproveRequest>,
) -> Result<Json<ApproveResponse>, AppError> {
    if req.participant_ids.is_empty() {
        return Err(AppError::BadRequest(
            "No participants specified".to_string(),
        ));
    }

    let results = req
        .participant_ids
        .into_iter()
        .map(|participant_id| {
            match state
                .ledger
                .approve_participant(participant_id, &identity.user_id)
            {
                Ok(ApprovalOutcome::Approved) => ApprovalResult {
                    participant_id,
                    outcome: "approved",
                    error: None,
                },
                Ok(ApprovalOutcome::AlreadyApproved) => ApprovalResult {
                    participant_id,
                    outcome: "already_approved",
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(participant_id, error = %e, "Approval failed");
                    ApprovalResult {
                        participant_id,
                        outcome: "failed",
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .collect();

    Ok(Json(ApproveResponse::new(results)))
}

// ============================================================
// Mini-app: circles
// ============================================================

async fn list_my_circles(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<CirclesResponse>, AppError> {
    let circles = state.circles.user_circles(&identity.user_id)?;
    let primary = state
        .db
        .get_user(&identity.user_id)?
        .and_then(|u| u.primary_circle_id);
    Ok(Json(CirclesResponse::new(circles, primary)))
}

async fn create_circle(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<CreateCircleRequest>,
) -> Result<Json<CircleResponse>, AppError> {
    let name = sanitize_input(&req.name);
    if name.is_empty() {
        return Err(AppError::BadRequest(
            "Circle name cannot be empty".to_string(),
        ));
    }
    let circle = state.circles.create_and_join(&name, &identity.user_id)?;
    Ok(Json(CircleResponse::new("Circle created", circle)))
}

/// Join by id or exact name. Does not change the primary circle.
async fn join_circle(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Json(req): Json<JoinCircleRequest>,
) -> Result<Json<CircleResponse>, AppError> {
    let circle = if let Some(circle_id) = req.circle_id {
        state.circles.join_circle(&identity.user_id, circle_id)?;
        state.circles.get(circle_id)?
    } else {
        let name = req
            .circle_name
            .as_deref()
            .map(sanitize_input)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| AppError::BadRequest("Circle name or ID is required".to_string()))?;
        match state
            .circles
            .join_by_name(&identity.user_id, &name, SEARCH_LIMIT)?
        {
            NamedJoin::Joined { circle, .. } => circle,
            NamedJoin::NotFound { .. } => {
                return Err(AppError::NotFound(format!("Circle not found: {name}")))
            }
        }
    };
    Ok(Json(CircleResponse::new("Joined circle", circle)))
}

async fn search_circles(
    State(state): State<AppState>,
    AuthUser(_identity): AuthUser,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    if query.q.trim().is_empty() {
        return Err(AppError::BadRequest(
            "Search query is required".to_string(),
        ));
    }
    let circles = state.circles.search(&query.q, SEARCH_LIMIT)?;
    Ok(Json(SearchResponse::new(circles)))
}

async fn circle_members(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(circle_id): Path<i64>,
    Query(query): Query<MembersQuery>,
) -> Result<Json<MembersResponse>, AppError> {
    let circle = state.circles.get(circle_id)?;
    state.circles.require_member(&identity.user_id, circle_id)?;
    let exclude = query.exclude_myself.then_some(identity.user_id.as_str());
    let members = state.circles.members(circle_id, exclude)?;
    Ok(Json(MembersResponse::new(Some(circle), members)))
}

/// Members of the caller's current circle, excluding the caller
async fn current_circle_members(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
) -> Result<Json<MembersResponse>, AppError> {
    let user = require_user(&state, &identity.user_id)?;
    match state.circles.resolve_circle_membership(&user)? {
        ResolvedCircle::Member(circle) => {
            let members = state.circles.members(circle.id, Some(&user.user_id))?;
            Ok(Json(MembersResponse::new(Some(circle), members)))
        }
        ResolvedCircle::Legacy(name) => {
            let members = state.db.legacy_circle_members(&name, &user.user_id)?;
            Ok(Json(MembersResponse::new(None, members)))
        }
        ResolvedCircle::Unaffiliated => Ok(Json(MembersResponse::new(None, Vec::new()))),
    }
}

async fn leave_circle(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(circle_id): Path<i64>,
) -> Result<Json<LeaveResponse>, AppError> {
    state.circles.leave_circle(&identity.user_id, circle_id)?;
    let primary = state.circles.release_primary(&identity.user_id, circle_id)?;
    Ok(Json(LeaveResponse::new("Left circle", primary)))
}

async fn remove_member(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(circle_id): Path<i64>,
    Json(req): Json<RemoveMemberRequest>,
) -> Result<Json<LeaveResponse>, AppError> {
    state.circles.require_member(&identity.user_id, circle_id)?;
    if req.target_user_id == identity.user_id {
        return Err(ServiceError::SelfRemoval.into());
    }

    match state.circles.remove_from_circle(&req.target_user_id, circle_id) {
        Ok(()) => {}
        Err(ServiceError::NotAMember) => {
            return Err(AppError::NotFound(
                "User is not a member of this circle".to_string(),
            ))
        }
        Err(e) => return Err(e.into()),
    }
    let primary = state.circles.release_primary(&req.target_user_id, circle_id)?;
    tracing::info!(circle_id, by = %identity.user_id, target = %req.target_user_id, "Member removed");
    Ok(Json(LeaveResponse::new("Member removed", primary)))
}

async fn set_primary_circle(
    State(state): State<AppState>,
    AuthUser(identity): AuthUser,
    Path(circle_id): Path<i64>,
) -> Result<Json<StatusResponse>, AppError> {
    state.circles.require_member(&identity.user_id, circle_id)?;
    state.circles.set_primary_circle(&identity.user_id, circle_id)?;
    Ok(Json(StatusResponse::ok_with("Primary circle set")))
}

// ============================================================
// Admin
// ============================================================

async fn admin_users(
    State(state): State<AppState>,
    _admin: AdminKey,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.db.list_users()?))
}

async fn admin_messages(
    State(state): State<AppState>,
    _admin: AdminKey,
) -> Json<Vec<ReceivedMessage>> {
    Json(state.recent.snapshot())
}

async fn admin_send(
    State(state): State<AppState>,
    _admin: AdminKey,
    Json(req): Json<AdminSendRequest>,
) -> Result<Json<StatusResponse>, AppError> {
    if req.message.trim().is_empty() {
        return Err(AppError::BadRequest("Message is required".to_string()));
    }
    let delivery = match (req.broadcast, req.user_id, req.user_ids.is_empty()) {
        (true, None, true) => Delivery::Broadcast,
        (false, Some(user_id), true) => Delivery::Push { to: user_id },
        (false, None, false) => Delivery::Multicast { to: req.user_ids },
        _ => {
            return Err(AppError::BadRequest(
                "Specify exactly one of userID, userIDs or broadcast".to_string(),
            ))
        }
    };

    state
        .notifier
        .send(&delivery, &[Content::text(req.message)])
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    tracing::info!(delivery = delivery.kind(), "Admin message sent");
    Ok(Json(StatusResponse::ok()))
}

async fn admin_run_reminders(
    State(state): State<AppState>,
    _admin: AdminKey,
) -> Result<Json<ReminderRunResponse>, AppError> {
    let dispatched = state.reminders.tick().await?;
    Ok(Json(ReminderRunResponse::new(dispatched)))
}

async fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

// ============================================================
// Helpers
// ============================================================

fn require_user(state: &AppState, user_id: &str) -> Result<User, AppError> {
    state
        .db
        .get_user(user_id)?
        .ok_or_else(|| AppError::BadRequest("User not found".to_string()))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    Unavailable(String),
    Internal(String),
}

impl From<ServiceError> for AppError {
    fn from(e: ServiceError) -> Self {
        let message = e.to_string();
        match e.kind() {
            ErrorKind::Conflict => AppError::Conflict(message),
            ErrorKind::NotFound => AppError::NotFound(message),
            ErrorKind::Forbidden => AppError::Forbidden(message),
            ErrorKind::Invalid => AppError::BadRequest(message),
            ErrorKind::InvalidState | ErrorKind::Transient => {
                tracing::error!(error = %message, "Request failed");
                AppError::Internal("Internal server error".to_string())
            }
        }
    }
}

impl From<DbError> for AppError {
    fn from(e: DbError) -> Self {
        ServiceError::from(e).into()
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse::new(message));
        (status, body).into_response()
    }
}
