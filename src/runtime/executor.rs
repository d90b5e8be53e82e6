//! Effect execution for one inbound message

use crate::circles::{CircleService, NamedJoin, CHAT_SUGGESTION_LIMIT};
use crate::db::Database;
use crate::error::{ErrorKind, ServiceError};
use crate::ledger::Ledger;
use crate::notify::Content;
use crate::state_machine::{
    transition, CircleOutcome, ConvContext, ConvState, Effect, Event, TransitionError,
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("Message produced no reply")]
    NoReply,
}

impl ExecutorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::Service(e) => e.kind(),
            ExecutorError::Transition(_) | ExecutorError::NoReply => ErrorKind::InvalidState,
        }
    }
}

/// Drives the state machine for a single message, feeding effect outcomes
/// back in as events until no work is left.
pub struct MessageExecutor<'a> {
    db: &'a Database,
    circles: &'a CircleService,
    ledger: &'a Ledger,
    state: ConvState,
    context: ConvContext,
    reply: Option<Content>,
}

impl<'a> MessageExecutor<'a> {
    pub fn new(
        db: &'a Database,
        circles: &'a CircleService,
        ledger: &'a Ledger,
        state: ConvState,
        context: ConvContext,
    ) -> Self {
        Self {
            db,
            circles,
            ledger,
            state,
            context,
            reply: None,
        }
    }

    /// Run to completion and return the reply
    pub fn run(mut self, event: Event) -> Result<Content, ExecutorError> {
        let mut events_to_process = vec![event];

        while let Some(current_event) = events_to_process.pop() {
            let result = transition(&self.state, &self.context, current_event)?;
            self.state = result.new_state;

            for effect in result.effects {
                if let Some(generated_event) = self.execute_effect(effect)? {
                    events_to_process.push(generated_event);
                }
            }
        }

        self.reply.ok_or(ExecutorError::NoReply)
    }

    fn execute_effect(&mut self, effect: Effect) -> Result<Option<Event>, ExecutorError> {
        let user_id = self.context.user_id.as_str();
        match effect {
            Effect::PersistState => {
                let step = self.state.step();
                self.db.insert_user(user_id, step).map_err(ServiceError::from)?;
                let updated = self
                    .db
                    .update_user_progress(user_id, step, self.state.circle_mode())
                    .map_err(ServiceError::from)?;
                if updated == 0 {
                    tracing::warn!(user_id = %user_id, step, "Stored step is ahead, progress not written");
                }
                tracing::debug!(user_id = %user_id, state = ?self.state, "State persisted");
                Ok(None)
            }

            Effect::SaveName { name } => {
                let step = self.state.step();
                let updated = self
                    .db
                    .save_name_and_progress(user_id, &name, step, self.state.circle_mode())
                    .map_err(ServiceError::from)?;
                if updated == 0 {
                    tracing::warn!(user_id = %user_id, step, "Stored step is ahead, name not written");
                }
                self.context.name = name;
                Ok(None)
            }

            Effect::CreateCircle { name } => {
                let outcome = match self.circles.register_new_circle(user_id, &name) {
                    Ok(circle) => {
                        self.context.primary_circle_id = Some(circle.id);
                        CircleOutcome::Created { circle }
                    }
                    Err(ServiceError::CircleNameTaken(name)) => CircleOutcome::NameTaken { name },
                    Err(e) => return Err(e.into()),
                };
                Ok(Some(Event::CircleSettled(outcome)))
            }

            Effect::JoinCircle { name, registering } => {
                // One extra row tells the reply whether the list was cut
                let limit = CHAT_SUGGESTION_LIMIT + 1;
                let joined = if registering {
                    self.circles.register_by_name(user_id, &name, limit)
                } else {
                    self.circles.join_by_name(user_id, &name, limit)
                };
                let outcome = match joined {
                    Ok(NamedJoin::Joined {
                        circle,
                        member_count,
                    }) => {
                        if registering {
                            self.context.primary_circle_id = Some(circle.id);
                        }
                        CircleOutcome::Joined {
                            circle,
                            member_count,
                        }
                    }
                    Ok(NamedJoin::NotFound { suggestions }) => {
                        CircleOutcome::NotFound { name, suggestions }
                    }
                    Err(ServiceError::AlreadyMember) => CircleOutcome::AlreadyMember,
                    Err(e) => return Err(e.into()),
                };
                Ok(Some(Event::CircleSettled(outcome)))
            }

            Effect::AdoptCircle { name } => {
                let circle = self.circles.adopt_circle(user_id, &name)?;
                self.context.primary_circle_id = Some(circle.id);
                Ok(Some(Event::CircleSettled(CircleOutcome::Adopted { circle })))
            }

            Effect::ReportPayment { event_id } => {
                let outcome = self.ledger.report_payment(event_id, user_id)?;
                Ok(Some(Event::PaymentReported { event_id, outcome }))
            }

            Effect::LoadUnpaidEvents => {
                let events = self.ledger.unpaid_events_for(user_id)?;
                Ok(Some(Event::UnpaidEventsLoaded { events }))
            }

            Effect::LoadPaymentStatus => {
                let statuses = self.ledger.payment_status_for(user_id)?;
                Ok(Some(Event::PaymentStatusLoaded { statuses }))
            }

            Effect::LoadCircles => {
                let circles = self.circles.user_circles(user_id)?;
                Ok(Some(Event::CirclesLoaded { circles }))
            }

            Effect::Reply(content) => {
                if self.reply.replace(content).is_some() {
                    tracing::warn!(user_id = %user_id, "More than one reply produced, keeping the last");
                }
                Ok(None)
            }
        }
    }
}
