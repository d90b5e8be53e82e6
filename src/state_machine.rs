//! Registration and chat command state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions.

mod effect;
pub mod event;
pub mod replies;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::Effect;
pub use event::{CircleOutcome, Event};
pub use state::{ConvContext, ConvState};
pub use transition::{transition, TransitionError, TransitionResult};
