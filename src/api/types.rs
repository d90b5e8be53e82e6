//! API request and response types
//!
//! Field names are camelCase on the wire, matching the mini-app client.

use crate::db::{Circle, CircleMember, CircleSummary, EventSummary, PendingApproval};
use serde::{Deserialize, Serialize};

const OK: &str = "ok";

// ============================================================
// Requests
// ============================================================

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub circle: String,
}

#[derive(Debug, Deserialize)]
pub struct LiffMessageRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub event_name: String,
    pub total_amount: i64,
    pub participant_ids: Vec<String>,
    /// Defaults to the caller's primary circle
    #[serde(default)]
    pub circle_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApproveRequest {
    pub participant_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCircleRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinCircleRequest {
    #[serde(default)]
    pub circle_name: Option<String>,
    #[serde(default)]
    pub circle_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberRequest {
    pub target_user_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersQuery {
    #[serde(default)]
    pub exclude_myself: bool,
}

/// Admin push: one user, many users, or everyone
#[derive(Debug, Deserialize)]
pub struct AdminSendRequest {
    #[serde(rename = "userID", default)]
    pub user_id: Option<String>,
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
    #[serde(default)]
    pub broadcast: bool,
    pub message: String,
}

// ============================================================
// Responses
// ============================================================

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self {
            status: OK,
            message: None,
        }
    }

    pub fn ok_with(message: impl Into<String>) -> Self {
        Self {
            status: OK,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub status: &'static str,
    pub user_id: String,
    pub display_name: String,
    pub registered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_circle_id: Option<i64>,
}

impl MeResponse {
    pub fn unregistered(user_id: String, display_name: String) -> Self {
        Self {
            status: OK,
            user_id,
            display_name,
            registered: false,
            name: None,
            circle: None,
            step: None,
            primary_circle_id: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub status: &'static str,
    pub user_id: String,
    pub display_name: String,
    pub circle: Circle,
}

impl RegisterResponse {
    pub fn new(user_id: String, display_name: String, circle: Circle) -> Self {
        Self {
            status: OK,
            user_id,
            display_name,
            circle,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EventsResponse {
    pub status: &'static str,
    pub events: Vec<EventSummary>,
}

impl EventsResponse {
    pub fn new(events: Vec<EventSummary>) -> Self {
        Self { status: OK, events }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventResponse {
    pub status: &'static str,
    pub event_id: i64,
    pub split_amount: i64,
    /// Absorbed by the organizer
    pub remainder: i64,
    pub participant_count: usize,
    /// Requested participant ids with no user record
    pub skipped: Vec<String>,
}

impl CreateEventResponse {
    pub fn new(event_id: i64, split_amount: i64, remainder: i64, participant_count: usize, skipped: Vec<String>) -> Self {
        Self {
            status: OK,
            event_id,
            split_amount,
            remainder,
            participant_count,
            skipped,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ApprovalsResponse {
    pub status: &'static str,
    pub approvals: Vec<PendingApproval>,
}

impl ApprovalsResponse {
    pub fn new(approvals: Vec<PendingApproval>) -> Self {
        Self {
            status: OK,
            approvals,
        }
    }
}

/// Per-participant result of a batch approval
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    pub participant_id: i64,
    /// `approved`, `already_approved` or `failed`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApproveResponse {
    pub status: &'static str,
    pub results: Vec<ApprovalResult>,
}

impl ApproveResponse {
    pub fn new(results: Vec<ApprovalResult>) -> Self {
        Self {
            status: OK,
            results,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CirclesResponse {
    pub status: &'static str,
    pub circles: Vec<CircleSummary>,
    pub primary_circle_id: Option<i64>,
}

impl CirclesResponse {
    pub fn new(circles: Vec<CircleSummary>, primary_circle_id: Option<i64>) -> Self {
        Self {
            status: OK,
            circles,
            primary_circle_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CircleResponse {
    pub status: &'static str,
    pub message: String,
    pub circle: Circle,
}

impl CircleResponse {
    pub fn new(message: impl Into<String>, circle: Circle) -> Self {
        Self {
            status: OK,
            message: message.into(),
            circle,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub status: &'static str,
    pub circles: Vec<Circle>,
}

impl SearchResponse {
    pub fn new(circles: Vec<Circle>) -> Self {
        Self {
            status: OK,
            circles,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MembersResponse {
    pub status: &'static str,
    pub circle: Option<Circle>,
    pub members: Vec<CircleMember>,
}

impl MembersResponse {
    pub fn new(circle: Option<Circle>, members: Vec<CircleMember>) -> Self {
        Self {
            status: OK,
            circle,
            members,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveResponse {
    pub status: &'static str,
    pub message: String,
    /// Primary circle of the departing user afterwards
    pub primary_circle_id: Option<i64>,
}

impl LeaveResponse {
    pub fn new(message: impl Into<String>, primary_circle_id: Option<i64>) -> Self {
        Self {
            status: OK,
            message: message.into(),
            primary_circle_id,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReminderRunResponse {
    pub status: &'static str,
    pub dispatched: usize,
}

impl ReminderRunResponse {
    pub fn new(dispatched: usize) -> Self {
        Self {
            status: OK,
            dispatched,
        }
    }
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
