//! Database schema and record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    circle TEXT NOT NULL DEFAULT '',
    primary_circle_id INTEGER,
    step INTEGER NOT NULL DEFAULT 0,
    circle_mode INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (primary_circle_id) REFERENCES circles(id) ON DELETE SET NULL
);

CREATE TABLE IF NOT EXISTS circles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_circles_name_nocase ON circles(name COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS memberships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    circle_id INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    joined_at TEXT NOT NULL,
    left_at TEXT,

    UNIQUE (user_id, circle_id),
    FOREIGN KEY (circle_id) REFERENCES circles(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_memberships_circle ON memberships(circle_id, status);
CREATE INDEX IF NOT EXISTS idx_memberships_user ON memberships(user_id, status);

CREATE TABLE IF NOT EXISTS events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    organizer_id TEXT NOT NULL,
    circle TEXT NOT NULL DEFAULT '',
    circle_id INTEGER,
    total_amount INTEGER NOT NULL,
    split_amount INTEGER NOT NULL,
    remainder INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'confirmed',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    FOREIGN KEY (circle_id) REFERENCES circles(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_events_organizer ON events(organizer_id, created_at DESC);

CREATE TABLE IF NOT EXISTS participants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_id INTEGER NOT NULL,
    user_id TEXT NOT NULL,
    user_name TEXT NOT NULL,
    paid BOOLEAN NOT NULL DEFAULT 0,
    reported_at TEXT,
    approved_at TEXT,
    created_at TEXT NOT NULL,

    UNIQUE (event_id, user_id),
    FOREIGN KEY (event_id) REFERENCES events(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_participants_user ON participants(user_id, paid);

CREATE TABLE IF NOT EXISTS app_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// Meta key recording that legacy circle names were folded into memberships
pub const META_LEGACY_CIRCLES_MIGRATED: &str = "legacy_circles_migrated";

/// Onboarding sub-mode while the user is choosing a circle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CircleMode {
    #[default]
    Unset,
    Create,
    Join,
}

impl CircleMode {
    pub fn as_i64(self) -> i64 {
        match self {
            CircleMode::Unset => 0,
            CircleMode::Create => 1,
            CircleMode::Join => 2,
        }
    }

    /// Unknown codes fall back to `Unset`, which is the legacy path.
    pub fn from_i64(code: i64) -> Self {
        match code {
            1 => CircleMode::Create,
            2 => CircleMode::Join,
            _ => CircleMode::Unset,
        }
    }
}

/// User record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub user_id: String,
    pub name: String,
    /// Free-text circle name from before memberships existed
    pub circle: String,
    pub primary_circle_id: Option<i64>,
    pub step: i64,
    pub circle_mode: CircleMode,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn is_registered(&self) -> bool {
        self.step == 3
    }
}

/// Circle record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Circle {
    pub id: i64,
    pub name: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// Membership lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Active,
    Left,
    Removed,
}

impl MembershipStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            MembershipStatus::Active => "active",
            MembershipStatus::Left => "left",
            MembershipStatus::Removed => "removed",
        }
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MembershipStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(MembershipStatus::Active),
            "left" => Ok(MembershipStatus::Left),
            "removed" => Ok(MembershipStatus::Removed),
            other => Err(format!("unknown membership status: {other}")),
        }
    }
}

/// Membership record (user x circle)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    pub id: i64,
    pub user_id: String,
    pub circle_id: i64,
    pub status: MembershipStatus,
    pub joined_at: DateTime<Utc>,
    pub left_at: Option<DateTime<Utc>>,
}

/// Active member of a circle, for listings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CircleMember {
    pub user_id: String,
    pub name: String,
    pub joined_at: DateTime<Utc>,
}

/// A circle together with its active member count
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CircleSummary {
    #[serde(flatten)]
    pub circle: Circle,
    pub member_count: i64,
}

/// Event lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    /// Present in stored data but never produced by event creation
    Selecting,
    Confirmed,
    Completed,
}

impl EventStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Selecting => "selecting",
            EventStatus::Confirmed => "confirmed",
            EventStatus::Completed => "completed",
        }
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "selecting" => Ok(EventStatus::Selecting),
            "confirmed" => Ok(EventStatus::Confirmed),
            "completed" => Ok(EventStatus::Completed),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Expense-split event record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i64,
    pub name: String,
    pub organizer_id: String,
    /// Circle name snapshot, also used to backfill `circle_id`
    pub circle: String,
    pub circle_id: Option<i64>,
    pub total_amount: i64,
    pub split_amount: i64,
    /// `total_amount - split_amount * participants`, absorbed by the organizer
    pub remainder: i64,
    pub status: EventStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Participant record (event x user)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub id: i64,
    pub event_id: i64,
    pub user_id: String,
    pub user_name: String,
    pub paid: bool,
    pub reported_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Participant to enroll when an event is inserted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewParticipant {
    pub user_id: String,
    pub user_name: String,
}

/// Participant row that has neither reported nor been approved
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnpaidParticipant {
    pub participant_id: i64,
    pub user_id: String,
    pub user_name: String,
    pub event_id: i64,
    pub event_name: String,
    pub split_amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Reported payment waiting for the organizer
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PendingApproval {
    pub participant_id: i64,
    pub event_id: i64,
    pub event_name: String,
    pub user_id: String,
    pub user_name: String,
    pub amount: i64,
    pub reported_at: Option<DateTime<Utc>>,
}

/// An event the user still owes money for
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnpaidEvent {
    pub event_id: i64,
    pub event_name: String,
    pub amount: i64,
}

/// One line of a user's payment status
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatus {
    pub event_id: i64,
    pub event_name: String,
    pub amount: i64,
    pub paid: bool,
    pub approved: bool,
}

/// Organizer-side event listing row
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    #[serde(flatten)]
    pub event: Event,
    pub participant_count: i64,
    pub paid_count: i64,
    pub approved_count: i64,
}

/// Counts produced by the legacy circle backfill
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub skipped: bool,
    pub circles_created: usize,
    pub memberships_created: usize,
    pub users_updated: usize,
    pub events_updated: usize,
}
