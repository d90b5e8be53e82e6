//! Events that drive conversation transitions

use crate::db::{Circle, CircleSummary, PaymentStatus, UnpaidEvent};
use crate::ledger::ReportOutcome;

/// Outcome of a circle create/join effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CircleOutcome {
    Created { circle: Circle },
    Joined { circle: Circle, member_count: i64 },
    /// Registration without an explicit create/join choice
    Adopted { circle: Circle },
    NameTaken { name: String },
    NotFound { name: String, suggestions: Vec<String> },
    AlreadyMember,
}

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Sanitized, non-empty inbound text
    Message { text: String },

    // Results of effects, fed back into the machine
    CircleSettled(CircleOutcome),
    UnpaidEventsLoaded { events: Vec<UnpaidEvent> },
    PaymentStatusLoaded { statuses: Vec<PaymentStatus> },
    CirclesLoaded { circles: Vec<CircleSummary> },
    PaymentReported { event_id: i64, outcome: ReportOutcome },
}

impl Event {
    pub fn message(text: impl Into<String>) -> Self {
        Event::Message { text: text.into() }
    }
}
