//! HTTP API: chat webhook, mini-app endpoints and admin endpoints

mod auth;
mod handlers;
mod types;
mod webhook;

pub use auth::{IdentityVerifier, LineTokenVerifier};
pub use handlers::create_router;
#[allow(unused_imports)] // Public API re-exports
pub use types::*;

use crate::circles::CircleService;
use crate::db::Database;
use crate::ledger::Ledger;
use crate::notify::Notifier;
use crate::reminder::ReminderScheduler;
use crate::runtime::{MessageRuntime, RecentMessages};
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub circles: CircleService,
    pub ledger: Ledger,
    pub runtime: Arc<MessageRuntime>,
    pub notifier: Notifier,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub recent: Arc<RecentMessages>,
    pub reminders: Arc<ReminderScheduler>,
    pub admin_api_key: Option<String>,
}
