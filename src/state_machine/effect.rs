//! Effects produced by state transitions

use crate::notify::Content;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Persist the new step and circle mode
    PersistState,

    /// Store the name together with the new step
    SaveName { name: String },

    /// Registration: create a circle and finish onboarding in one write
    CreateCircle { name: String },

    /// Join by exact name. A registration join also finishes onboarding in
    /// the same write and accepts an existing active membership.
    JoinCircle { name: String, registering: bool },

    /// Registration: get-or-create, join and finish onboarding
    AdoptCircle { name: String },

    ReportPayment { event_id: i64 },

    LoadUnpaidEvents,
    LoadPaymentStatus,
    LoadCircles,

    /// The synchronous answer to the inbound message
    Reply(Content),
}

impl Effect {
    pub fn reply(content: Content) -> Self {
        Effect::Reply(content)
    }

    /// Effects that only make sense for a fully registered user
    #[allow(dead_code)] // Used in tests
    pub fn requires_registration(&self) -> bool {
        matches!(
            self,
            Effect::ReportPayment { .. }
                | Effect::LoadUnpaidEvents
                | Effect::LoadPaymentStatus
                | Effect::LoadCircles
                | Effect::JoinCircle {
                    registering: false,
                    ..
                }
        )
    }
}
