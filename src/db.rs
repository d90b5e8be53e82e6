//! Database module for `CirclePay`
//!
//! Typed persistence for users, circles, memberships, events and
//! participants. No business rules live here: callers decide what an
//! affected-row count of zero means.

mod schema;

pub use schema::*;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Circle name already taken: {0}")]
    CircleNameTaken(String),
    #[error("Membership already exists: user {user_id} in circle {circle_id}")]
    DuplicateMembership { user_id: String, circle_id: i64 },
    #[error("Database lock poisoned")]
    LockPoisoned,
}

impl DbError {
    /// True when the error came from a UNIQUE or PRIMARY KEY constraint
    pub fn is_unique_violation(&self) -> bool {
        match self {
            DbError::CircleNameTaken(_) | DbError::DuplicateMembership { .. } => true,
            DbError::Sqlite(e) => is_unique_violation(e),
            DbError::LockPoisoned => false,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

const USER_COLUMNS: &str =
    "user_id, name, circle, primary_circle_id, step, circle_mode, created_at, updated_at";
const CIRCLE_COLUMNS: &str = "id, name, created_by, created_at";
const MEMBERSHIP_COLUMNS: &str = "id, user_id, circle_id, status, joined_at, left_at";
const EVENT_COLUMNS: &str = "id, name, organizer_id, circle, circle_id, total_amount, split_amount, remainder, status, created_at, updated_at";
const PARTICIPANT_COLUMNS: &str =
    "id, event_id, user_id, user_name, paid, reported_at, approved_at, created_at";

/// Event row to insert
#[derive(Debug, Clone)]
pub struct NewEventRecord<'a> {
    pub name: &'a str,
    pub organizer_id: &'a str,
    pub circle: &'a str,
    pub circle_id: Option<i64>,
    pub total_amount: i64,
    pub split_amount: i64,
    pub remainder: i64,
}

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    // ==================== User Operations ====================

    /// Get a user by platform id, `None` if unknown
    pub fn get_user(&self, user_id: &str) -> DbResult<Option<User>> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
                params![user_id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Insert a user at the given step. A concurrent insert for the same id wins
    /// silently and the stored row is returned.
    pub fn insert_user(&self, user_id: &str, step: i64) -> DbResult<User> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT OR IGNORE INTO users (user_id, step, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![user_id, step, now],
        )?;
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            user_from_row,
        )?;
        Ok(user)
    }

    /// Persist onboarding progress. The row is only touched when the stored step
    /// is not ahead of `step`, so a stale write can never move a user backwards.
    /// Returns the number of rows updated.
    pub fn update_user_progress(
        &self,
        user_id: &str,
        step: i64,
        mode: CircleMode,
    ) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET step = ?1, circle_mode = ?2, updated_at = ?3
             WHERE user_id = ?4 AND step <= ?1",
            params![step, mode.as_i64(), timestamp(Utc::now()), user_id],
        )?;
        Ok(updated)
    }

    #[cfg(test)]
    pub fn set_user_name(&self, user_id: &str, name: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET name = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![name, timestamp(Utc::now()), user_id],
        )?;
        Ok(updated)
    }

    /// Store the display name and advance onboarding in a single write, with
    /// the same backwards guard as `update_user_progress`. Returns rows updated.
    pub fn save_name_and_progress(
        &self,
        user_id: &str,
        name: &str,
        step: i64,
        mode: CircleMode,
    ) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET name = ?1, step = ?2, circle_mode = ?3, updated_at = ?4
             WHERE user_id = ?5 AND step <= ?2",
            params![name, step, mode.as_i64(), timestamp(Utc::now()), user_id],
        )?;
        Ok(updated)
    }

    /// Point the user's primary circle at `circle_id`, or clear it
    pub fn set_primary_circle(&self, user_id: &str, circle_id: Option<i64>) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE users SET primary_circle_id = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![circle_id, timestamp(Utc::now()), user_id],
        )?;
        Ok(updated)
    }

    /// Complete registration in one write (mini-app path)
    pub fn complete_registration(
        &self,
        user_id: &str,
        name: &str,
        circle: &str,
        primary_circle_id: Option<i64>,
    ) -> DbResult<User> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO users (user_id, name, circle, primary_circle_id, step, circle_mode, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 3, 0, ?5, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                name = excluded.name,
                circle = excluded.circle,
                primary_circle_id = COALESCE(users.primary_circle_id, excluded.primary_circle_id),
                step = 3,
                circle_mode = 0,
                updated_at = excluded.updated_at",
            params![user_id, name, circle, primary_circle_id, now],
        )?;
        let user = conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = ?1"),
            params![user_id],
            user_from_row,
        )?;
        Ok(user)
    }

    /// All users, newest first
    pub fn list_users(&self) -> DbResult<Vec<User>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC, user_id"
        ))?;
        let rows = stmt.query_map([], user_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Registered users sharing a legacy free-text circle, ordered by name
    pub fn legacy_circle_members(
        &self,
        circle: &str,
        exclude_user_id: &str,
    ) -> DbResult<Vec<CircleMember>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT user_id, name, created_at FROM users
             WHERE circle = ?1 AND step = 3 AND user_id != ?2
             ORDER BY name, user_id",
        )?;
        let rows = stmt.query_map(params![circle, exclude_user_id], |row| {
            Ok(CircleMember {
                user_id: row.get(0)?,
                name: row.get(1)?,
                joined_at: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Circle Operations ====================

    /// Insert a circle. Fails with `CircleNameTaken` on an exact-name collision.
    pub fn insert_circle(&self, name: &str, created_by: &str) -> DbResult<Circle> {
        let conn = self.conn()?;
        insert_circle_in(&conn, name, created_by)
    }

    /// Create a circle, enroll its creator and make it the creator's primary
    /// circle, all in one transaction.
    pub fn create_circle_with_member(&self, name: &str, creator_id: &str) -> DbResult<Circle> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let circle = insert_circle_in(&tx, name, creator_id)?;
        insert_membership_in(&tx, creator_id, circle.id)?;
        tx.execute(
            "UPDATE users SET primary_circle_id = ?1, updated_at = ?2 WHERE user_id = ?3",
            params![circle.id, timestamp(Utc::now()), creator_id],
        )?;
        tx.commit()?;
        Ok(circle)
    }

    /// Chat registration by creating a circle: insert the circle, enroll the
    /// user, make it primary, record the legacy field and mark the user
    /// registered, all in one transaction.
    pub fn register_with_new_circle(&self, user_id: &str, name: &str) -> DbResult<Circle> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let circle = insert_circle_in(&tx, name, user_id)?;
        insert_membership_in(&tx, user_id, circle.id)?;
        finish_registration_in(&tx, user_id, &circle)?;
        tx.commit()?;
        Ok(circle)
    }

    /// Chat registration into an existing circle. The membership is inserted,
    /// reactivated, or left as is when already active; registration is
    /// finished in the same transaction.
    pub fn register_with_circle(&self, user_id: &str, circle: &Circle) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO memberships (user_id, circle_id, status, joined_at) VALUES (?1, ?2, 'active', ?3)
             ON CONFLICT(user_id, circle_id) DO UPDATE SET
                status = 'active',
                joined_at = CASE WHEN memberships.status = 'active'
                                 THEN memberships.joined_at ELSE excluded.joined_at END,
                left_at = NULL",
            params![user_id, circle.id, timestamp(Utc::now())],
        )?;
        finish_registration_in(&tx, user_id, circle)?;
        tx.commit()?;
        Ok(())
    }

    pub fn get_circle(&self, id: i64) -> DbResult<Option<Circle>> {
        let conn = self.conn()?;
        let circle = conn
            .query_row(
                &format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE id = ?1"),
                params![id],
                circle_from_row,
            )
            .optional()?;
        Ok(circle)
    }

    /// Exact-name lookup
    pub fn get_circle_by_name(&self, name: &str) -> DbResult<Option<Circle>> {
        let conn = self.conn()?;
        let circle = conn
            .query_row(
                &format!("SELECT {CIRCLE_COLUMNS} FROM circles WHERE name = ?1"),
                params![name],
                circle_from_row,
            )
            .optional()?;
        Ok(circle)
    }

    /// Case-insensitive substring search, ordered by name
    pub fn search_circles(&self, query: &str, limit: usize) -> DbResult<Vec<Circle>> {
        let conn = self.conn()?;
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = conn.prepare(&format!(
            "SELECT {CIRCLE_COLUMNS} FROM circles
             WHERE name LIKE ?1 ESCAPE '\\'
             ORDER BY name
             LIMIT ?2"
        ))?;
        let rows = stmt.query_map(params![pattern, limit_param(limit)], circle_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    #[allow(dead_code)] // Used in tests
    pub fn count_circles(&self) -> DbResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row("SELECT COUNT(*) FROM circles", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Membership Operations ====================

    pub fn get_membership(&self, user_id: &str, circle_id: i64) -> DbResult<Option<Membership>> {
        let conn = self.conn()?;
        let membership = conn
            .query_row(
                &format!(
                    "SELECT {MEMBERSHIP_COLUMNS} FROM memberships WHERE user_id = ?1 AND circle_id = ?2"
                ),
                params![user_id, circle_id],
                membership_from_row,
            )
            .optional()?;
        Ok(membership)
    }

    /// Insert an active membership. Fails with `DuplicateMembership` if any row
    /// for the pair exists.
    pub fn insert_membership(&self, user_id: &str, circle_id: i64) -> DbResult<()> {
        let conn = self.conn()?;
        insert_membership_in(&conn, user_id, circle_id)
    }

    /// Flip a left/removed membership back to active. Returns rows affected;
    /// zero means the row is missing or already active.
    pub fn reactivate_membership(&self, user_id: &str, circle_id: i64) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE memberships SET status = 'active', joined_at = ?1, left_at = NULL
             WHERE user_id = ?2 AND circle_id = ?3 AND status != 'active'",
            params![timestamp(Utc::now()), user_id, circle_id],
        )?;
        Ok(updated)
    }

    /// End an active membership with the given terminal status. Returns rows
    /// affected; zero means there was no active membership.
    pub fn end_membership(
        &self,
        user_id: &str,
        circle_id: i64,
        status: MembershipStatus,
    ) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE memberships SET status = ?1, left_at = ?2
             WHERE user_id = ?3 AND circle_id = ?4 AND status = 'active'",
            params![status.as_str(), timestamp(Utc::now()), user_id, circle_id],
        )?;
        Ok(updated)
    }

    /// Circles the user is an active member of, most recently joined first
    pub fn user_circles(&self, user_id: &str) -> DbResult<Vec<Circle>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT c.id, c.name, c.created_by, c.created_at
             FROM circles c
             JOIN memberships m ON m.circle_id = c.id
             WHERE m.user_id = ?1 AND m.status = 'active'
             ORDER BY m.joined_at DESC, m.id DESC",
        )?;
        let rows = stmt.query_map(params![user_id], circle_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn member_count(&self, circle_id: i64) -> DbResult<i64> {
        let conn = self.conn()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM memberships WHERE circle_id = ?1 AND status = 'active'",
            params![circle_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Active, fully registered members ordered by name
    pub fn circle_members(
        &self,
        circle_id: i64,
        exclude_user_id: Option<&str>,
    ) -> DbResult<Vec<CircleMember>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT u.user_id, u.name, m.joined_at
             FROM users u
             JOIN memberships m ON m.user_id = u.user_id
             WHERE m.circle_id = ?1 AND m.status = 'active' AND u.step = 3
               AND u.user_id != COALESCE(?2, '')
             ORDER BY u.name, u.user_id",
        )?;
        let rows = stmt.query_map(params![circle_id, exclude_user_id], |row| {
            Ok(CircleMember {
                user_id: row.get(0)?,
                name: row.get(1)?,
                joined_at: parse_datetime(&row.get::<_, String>(2)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    pub fn is_member(&self, user_id: &str, circle_id: i64) -> DbResult<bool> {
        let conn = self.conn()?;
        let exists = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM memberships WHERE user_id = ?1 AND circle_id = ?2 AND status = 'active')",
            params![user_id, circle_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    // ==================== Event Operations ====================

    /// Insert a confirmed event and its participants in one transaction
    pub fn insert_event_with_participants(
        &self,
        event: &NewEventRecord<'_>,
        participants: &[NewParticipant],
    ) -> DbResult<Event> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());

        tx.execute(
            "INSERT INTO events (name, organizer_id, circle, circle_id, total_amount, split_amount, remainder, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'confirmed', ?8, ?8)",
            params![
                event.name,
                event.organizer_id,
                event.circle,
                event.circle_id,
                event.total_amount,
                event.split_amount,
                event.remainder,
                now
            ],
        )?;
        let event_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO participants (event_id, user_id, user_name, paid, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
            )?;
            for participant in participants {
                stmt.execute(params![event_id, participant.user_id, participant.user_name, now])?;
            }
        }

        let stored = tx.query_row(
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
            params![event_id],
            event_from_row,
        )?;
        tx.commit()?;
        Ok(stored)
    }

    pub fn get_event(&self, id: i64) -> DbResult<Option<Event>> {
        let conn = self.conn()?;
        let event = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![id],
                event_from_row,
            )
            .optional()?;
        Ok(event)
    }

    pub fn get_participant(&self, id: i64) -> DbResult<Option<Participant>> {
        let conn = self.conn()?;
        let participant = conn
            .query_row(
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"),
                params![id],
                participant_from_row,
            )
            .optional()?;
        Ok(participant)
    }

    pub fn find_participant(&self, event_id: i64, user_id: &str) -> DbResult<Option<Participant>> {
        let conn = self.conn()?;
        let participant = conn
            .query_row(
                &format!(
                    "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = ?1 AND user_id = ?2"
                ),
                params![event_id, user_id],
                participant_from_row,
            )
            .optional()?;
        Ok(participant)
    }

    pub fn list_participants(&self, event_id: i64) -> DbResult<Vec<Participant>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE event_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map(params![event_id], participant_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Mark an unpaid participant row as reported. Returns rows affected.
    pub fn mark_reported(&self, event_id: i64, user_id: &str) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE participants SET paid = 1, reported_at = ?1
             WHERE event_id = ?2 AND user_id = ?3 AND paid = 0",
            params![timestamp(Utc::now()), event_id, user_id],
        )?;
        Ok(updated)
    }

    /// Approve a reported, not yet approved participant row. Returns rows affected.
    pub fn mark_approved(&self, participant_id: i64) -> DbResult<usize> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE participants SET approved_at = ?1
             WHERE id = ?2 AND paid = 1 AND approved_at IS NULL",
            params![timestamp(Utc::now()), participant_id],
        )?;
        Ok(updated)
    }

    /// Confirmed events the user has not reported yet, newest first
    pub fn unpaid_events_for(&self, user_id: &str, limit: usize) -> DbResult<Vec<UnpaidEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.split_amount
             FROM events e
             JOIN participants p ON p.event_id = e.id
             WHERE p.user_id = ?1 AND p.paid = 0 AND e.status = 'confirmed'
             ORDER BY e.created_at DESC, e.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit_param(limit)], |row| {
            Ok(UnpaidEvent {
                event_id: row.get(0)?,
                event_name: row.get(1)?,
                amount: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Every event the user participates in, newest first
    pub fn payment_status_for(&self, user_id: &str, limit: usize) -> DbResult<Vec<PaymentStatus>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.split_amount, p.paid, p.approved_at IS NOT NULL
             FROM events e
             JOIN participants p ON p.event_id = e.id
             WHERE p.user_id = ?1
             ORDER BY e.created_at DESC, e.id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![user_id, limit_param(limit)], |row| {
            Ok(PaymentStatus {
                event_id: row.get(0)?,
                event_name: row.get(1)?,
                amount: row.get(2)?,
                paid: row.get(3)?,
                approved: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Participants that neither reported nor were approved, on open events,
    /// oldest first. Uncapped.
    pub fn unpaid_participants(&self) -> DbResult<Vec<UnpaidParticipant>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, p.user_id, p.user_name, e.id, e.name, e.split_amount, p.created_at
             FROM participants p
             JOIN events e ON e.id = p.event_id
             WHERE p.paid = 0 AND p.approved_at IS NULL
               AND e.status IN ('confirmed', 'selecting')
             ORDER BY p.created_at ASC, p.id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UnpaidParticipant {
                participant_id: row.get(0)?,
                user_id: row.get(1)?,
                user_name: row.get(2)?,
                event_id: row.get(3)?,
                event_name: row.get(4)?,
                split_amount: row.get(5)?,
                created_at: parse_datetime(&row.get::<_, String>(6)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Reported payments on the organizer's events, most recent report first
    pub fn pending_approvals(&self, organizer_id: &str) -> DbResult<Vec<PendingApproval>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT p.id, e.id, e.name, p.user_id, p.user_name, e.split_amount, p.reported_at
             FROM participants p
             JOIN events e ON e.id = p.event_id
             WHERE e.organizer_id = ?1 AND p.paid = 1 AND p.approved_at IS NULL
             ORDER BY p.reported_at DESC, p.id DESC",
        )?;
        let rows = stmt.query_map(params![organizer_id], |row| {
            Ok(PendingApproval {
                participant_id: row.get(0)?,
                event_id: row.get(1)?,
                event_name: row.get(2)?,
                user_id: row.get(3)?,
                user_name: row.get(4)?,
                amount: row.get(5)?,
                reported_at: parse_optional_datetime(row.get(6)?),
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Events the organizer created, newest first, with payment counts
    pub fn events_by_organizer(&self, organizer_id: &str) -> DbResult<Vec<EventSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT e.id, e.name, e.organizer_id, e.circle, e.circle_id, e.total_amount,
                    e.split_amount, e.remainder, e.status, e.created_at, e.updated_at,
                    (SELECT COUNT(*) FROM participants p WHERE p.event_id = e.id),
                    (SELECT COUNT(*) FROM participants p WHERE p.event_id = e.id AND p.paid = 1),
                    (SELECT COUNT(*) FROM participants p WHERE p.event_id = e.id AND p.approved_at IS NOT NULL)
             FROM events e
             WHERE e.organizer_id = ?1
             ORDER BY e.created_at DESC, e.id DESC",
        )?;
        let rows = stmt.query_map(params![organizer_id], |row| {
            Ok(EventSummary {
                event: event_from_row(row)?,
                participant_count: row.get(11)?,
                paid_count: row.get(12)?,
                approved_count: row.get(13)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Meta / Migration ====================

    pub fn get_meta(&self, key: &str) -> DbResult<Option<String>> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM app_meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Fold the free-text `users.circle` field into circles and memberships.
    ///
    /// Runs only while the circles table is empty. Creates one circle per
    /// distinct legacy name of a registered user (creator = smallest user id),
    /// one active membership per user, then backfills primary circles and
    /// event circle references by name. The completion flag is recorded in
    /// both the skipped and the executed case.
    pub fn migrate_legacy_circles(&self) -> DbResult<MigrationReport> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = timestamp(Utc::now());

        let existing: i64 = tx.query_row("SELECT COUNT(*) FROM circles", [], |row| row.get(0))?;
        if existing > 0 {
            mark_migrated(&tx)?;
            tx.commit()?;
            return Ok(MigrationReport {
                skipped: true,
                ..MigrationReport::default()
            });
        }

        let circles_created = tx.execute(
            "INSERT OR IGNORE INTO circles (name, created_by, created_at)
             SELECT circle, MIN(user_id), ?1
             FROM users
             WHERE step = 3 AND circle != ''
             GROUP BY circle",
            params![now],
        )?;

        let memberships_created = tx.execute(
            "INSERT OR IGNORE INTO memberships (user_id, circle_id, status, joined_at)
             SELECT u.user_id, c.id, 'active', ?1
             FROM users u
             JOIN circles c ON c.name = u.circle
             WHERE u.step = 3",
            params![now],
        )?;

        let users_updated = tx.execute(
            "UPDATE users
             SET primary_circle_id = (SELECT c.id FROM circles c WHERE c.name = users.circle),
                 updated_at = ?1
             WHERE step = 3 AND primary_circle_id IS NULL
               AND circle IN (SELECT name FROM circles)",
            params![now],
        )?;

        let events_updated = tx.execute(
            "UPDATE events
             SET circle_id = (SELECT c.id FROM circles c WHERE c.name = events.circle)
             WHERE circle_id IS NULL AND circle IN (SELECT name FROM circles)",
            [],
        )?;

        mark_migrated(&tx)?;
        tx.commit()?;

        Ok(MigrationReport {
            skipped: false,
            circles_created,
            memberships_created,
            users_updated,
            events_updated,
        })
    }

    /// Seed a user row the way the single-circle schema stored it
    /// Run raw SQL against the connection, for tests that install triggers
    #[cfg(test)]
    pub fn execute_batch(&self, sql: &str) -> DbResult<()> {
        self.conn()?.execute_batch(sql)?;
        Ok(())
    }

    #[cfg(test)]
    pub fn seed_legacy_user(&self, user_id: &str, name: &str, circle: &str, step: i64) -> DbResult<()> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO users (user_id, name, circle, step, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![user_id, name, circle, step, now],
        )?;
        Ok(())
    }

    /// Seed an event row carrying only a legacy circle name
    #[cfg(test)]
    pub fn seed_legacy_event(&self, name: &str, organizer_id: &str, circle: &str) -> DbResult<i64> {
        let conn = self.conn()?;
        let now = timestamp(Utc::now());
        conn.execute(
            "INSERT INTO events (name, organizer_id, circle, total_amount, split_amount, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, 1000, 500, 'confirmed', ?4, ?4)",
            params![name, organizer_id, circle, now],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

fn insert_circle_in(conn: &Connection, name: &str, created_by: &str) -> DbResult<Circle> {
    let now = Utc::now();
    conn.execute(
        "INSERT INTO circles (name, created_by, created_at) VALUES (?1, ?2, ?3)",
        params![name, created_by, timestamp(now)],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::CircleNameTaken(name.to_string())
        } else {
            DbError::Sqlite(e)
        }
    })?;

    Ok(Circle {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        created_by: created_by.to_string(),
        created_at: parse_datetime(&timestamp(now)),
    })
}

fn insert_membership_in(conn: &Connection, user_id: &str, circle_id: i64) -> DbResult<()> {
    conn.execute(
        "INSERT INTO memberships (user_id, circle_id, status, joined_at) VALUES (?1, ?2, 'active', ?3)",
        params![user_id, circle_id, timestamp(Utc::now())],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            DbError::DuplicateMembership {
                user_id: user_id.to_string(),
                circle_id,
            }
        } else {
            DbError::Sqlite(e)
        }
    })?;
    Ok(())
}

fn finish_registration_in(conn: &Connection, user_id: &str, circle: &Circle) -> DbResult<()> {
    conn.execute(
        "INSERT INTO users (user_id, circle, primary_circle_id, step, circle_mode, created_at, updated_at)
         VALUES (?1, ?2, ?3, 3, 0, ?4, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            circle = excluded.circle,
            primary_circle_id = excluded.primary_circle_id,
            step = 3,
            circle_mode = 0,
            updated_at = excluded.updated_at",
        params![user_id, circle.name, circle.id, timestamp(Utc::now())],
    )?;
    Ok(())
}

fn mark_migrated(conn: &Connection) -> DbResult<()> {
    conn.execute(
        "INSERT INTO app_meta (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        params![META_LEGACY_CIRCLES_MIGRATED, timestamp(Utc::now())],
    )?;
    Ok(())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        user_id: row.get(0)?,
        name: row.get(1)?,
        circle: row.get(2)?,
        primary_circle_id: row.get(3)?,
        step: row.get(4)?,
        circle_mode: CircleMode::from_i64(row.get(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn circle_from_row(row: &Row<'_>) -> rusqlite::Result<Circle> {
    Ok(Circle {
        id: row.get(0)?,
        name: row.get(1)?,
        created_by: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
    })
}

fn membership_from_row(row: &Row<'_>) -> rusqlite::Result<Membership> {
    let status: String = row.get(3)?;
    Ok(Membership {
        id: row.get(0)?,
        user_id: row.get(1)?,
        circle_id: row.get(2)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        joined_at: parse_datetime(&row.get::<_, String>(4)?),
        left_at: parse_optional_datetime(row.get(5)?),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    let status: String = row.get(8)?;
    Ok(Event {
        id: row.get(0)?,
        name: row.get(1)?,
        organizer_id: row.get(2)?,
        circle: row.get(3)?,
        circle_id: row.get(4)?,
        total_amount: row.get(5)?,
        split_amount: row.get(6)?,
        remainder: row.get(7)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(8, rusqlite::types::Type::Text, e.into())
        })?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
    })
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get(0)?,
        event_id: row.get(1)?,
        user_id: row.get(2)?,
        user_name: row.get(3)?,
        paid: row.get(4)?,
        reported_at: parse_optional_datetime(row.get(5)?),
        approved_at: parse_optional_datetime(row.get(6)?),
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

/// Fixed-width RFC 3339 so text ordering matches time ordering
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}
