//! Pure state transition function
//!
//! Every inbound message resolves to exactly one `Effect::Reply`, possibly
//! after a round trip through a service effect whose outcome comes back as
//! a follow-up event.

use super::replies::{
    self, CHOOSE_CREATE, CHOOSE_JOIN, CMD_ADD_CIRCLE, CMD_I_PAID, CMD_MY_CIRCLES, CMD_MY_PAYMENTS,
    CMD_ORGANIZER, JOIN_PREFIX, REPORT_PREFIX,
};
use super::{CircleOutcome, ConvContext, ConvState, Effect, Event};
use crate::db::CircleMode;
use crate::ledger::ReportOutcome;
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: ConvState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: ConvState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

/// Steady-state commands recognised in chat
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command<'a> {
    Report(Option<i64>),
    Join(&'a str),
    ShowUnpaid,
    ShowPayments,
    ShowCircles,
    Organizer,
    AddCircle,
    Menu,
}

fn parse_command(text: &str) -> Command<'_> {
    if let Some(id) = text.strip_prefix(REPORT_PREFIX) {
        return Command::Report(id.trim().parse().ok());
    }
    if let Some(name) = text.strip_prefix(JOIN_PREFIX) {
        return Command::Join(name.trim());
    }
    match text {
        CMD_I_PAID => Command::ShowUnpaid,
        CMD_MY_PAYMENTS => Command::ShowPayments,
        CMD_MY_CIRCLES => Command::ShowCircles,
        CMD_ORGANIZER => Command::Organizer,
        CMD_ADD_CIRCLE => Command::AddCircle,
        _ => Command::Menu,
    }
}

/// Pure transition function
pub fn transition(
    state: &ConvState,
    context: &ConvContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    let state = *state;
    match (state, event) {
        // ============================================================
        // Onboarding
        // ============================================================
        (ConvState::New, Event::Message { .. }) => Ok(TransitionResult::new(
            ConvState::AwaitingName,
        )
        .with_effects([Effect::PersistState, Effect::reply(replies::ask_name())])),

        (ConvState::AwaitingName, Event::Message { text }) => {
            let reply = replies::choose_circle(&text);
            Ok(TransitionResult::new(ConvState::AwaitingCircle {
                mode: CircleMode::Unset,
            })
            .with_effects([Effect::SaveName { name: text }, Effect::reply(reply)]))
        }

        (ConvState::AwaitingCircle { .. }, Event::Message { text }) if text == CHOOSE_CREATE => {
            Ok(TransitionResult::new(ConvState::AwaitingCircle {
                mode: CircleMode::Create,
            })
            .with_effects([
                Effect::PersistState,
                Effect::reply(replies::ask_new_circle_name()),
            ]))
        }

        (ConvState::AwaitingCircle { .. }, Event::Message { text }) if text == CHOOSE_JOIN => {
            Ok(TransitionResult::new(ConvState::AwaitingCircle {
                mode: CircleMode::Join,
            })
            .with_effects([
                Effect::PersistState,
                Effect::reply(replies::ask_existing_circle_name()),
            ]))
        }

        (ConvState::AwaitingCircle { mode }, Event::Message { text }) => {
            let effect = match mode {
                CircleMode::Unset => Effect::AdoptCircle { name: text },
                CircleMode::Create => Effect::CreateCircle { name: text },
                CircleMode::Join => Effect::JoinCircle {
                    name: text,
                    registering: true,
                },
            };
            Ok(TransitionResult::new(state).with_effect(effect))
        }

        (ConvState::AwaitingCircle { .. }, Event::CircleSettled(outcome)) => {
            Ok(settle_registration(state, context, outcome))
        }

        // ============================================================
        // Steady state
        // ============================================================
        (ConvState::Registered, Event::Message { text }) => {
            Ok(dispatch_command(context, parse_command(&text)))
        }

        (ConvState::Registered, Event::CircleSettled(outcome)) => {
            let reply = match outcome {
                CircleOutcome::Joined {
                    circle,
                    member_count,
                } => replies::joined_additional(&circle.name, member_count),
                CircleOutcome::NotFound { name, suggestions } => {
                    replies::circle_not_found(&name, &suggestions, false)
                }
                CircleOutcome::AlreadyMember => replies::already_member(),
                other => {
                    return Err(TransitionError::InvalidTransition(format!(
                        "circle outcome {other:?} after registration"
                    )))
                }
            };
            Ok(TransitionResult::new(state).with_effect(Effect::reply(reply)))
        }

        (ConvState::Registered, Event::UnpaidEventsLoaded { events }) => Ok(
            TransitionResult::new(state).with_effect(Effect::reply(replies::unpaid_events(&events))),
        ),

        (ConvState::Registered, Event::PaymentStatusLoaded { statuses }) => {
            Ok(TransitionResult::new(state)
                .with_effect(Effect::reply(replies::payment_status(&statuses))))
        }

        (ConvState::Registered, Event::CirclesLoaded { circles }) => {
            Ok(TransitionResult::new(state).with_effect(Effect::reply(replies::circle_list(
                &circles,
                context.primary_circle_id,
            ))))
        }

        (ConvState::Registered, Event::PaymentReported { outcome, .. }) => {
            let reply = match outcome {
                ReportOutcome::Reported | ReportOutcome::AlreadyReported => {
                    replies::payment_reported()
                }
                ReportOutcome::NotParticipant => replies::not_a_participant(),
            };
            Ok(TransitionResult::new(state).with_effect(Effect::reply(reply)))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "{event:?} in state {state:?}"
        ))),
    }
}

fn settle_registration(
    state: ConvState,
    context: &ConvContext,
    outcome: CircleOutcome,
) -> TransitionResult {
    // The circle effect already stored the step, primary and legacy field
    let complete = |circle_line: String| {
        TransitionResult::new(ConvState::Registered).with_effect(Effect::reply(
            replies::registered(&context.name, &circle_line, &context.organizer_url),
        ))
    };

    match outcome {
        CircleOutcome::Created { circle } => complete(format!("{} (new)", circle.name)),
        CircleOutcome::Joined {
            circle,
            member_count,
        } => complete(format!("{} ({member_count} members)", circle.name)),
        CircleOutcome::Adopted { circle } => complete(circle.name),
        CircleOutcome::NameTaken { name } => {
            TransitionResult::new(state).with_effect(Effect::reply(replies::circle_name_taken(&name)))
        }
        CircleOutcome::NotFound { name, suggestions } => TransitionResult::new(state)
            .with_effect(Effect::reply(replies::circle_not_found(&name, &suggestions, true))),
        CircleOutcome::AlreadyMember => {
            TransitionResult::new(state).with_effect(Effect::reply(replies::already_member()))
        }
    }
}

fn dispatch_command(context: &ConvContext, command: Command<'_>) -> TransitionResult {
    let stay = TransitionResult::new(ConvState::Registered);
    match command {
        Command::Report(Some(event_id)) => stay.with_effect(Effect::ReportPayment { event_id }),
        Command::Report(None) => stay.with_effect(Effect::reply(replies::invalid_event_id())),
        Command::Join("") => stay.with_effect(Effect::reply(replies::missing_circle_name())),
        Command::Join(name) => stay.with_effect(Effect::JoinCircle {
            name: name.to_string(),
            registering: false,
        }),
        Command::ShowUnpaid => stay.with_effect(Effect::LoadUnpaidEvents),
        Command::ShowPayments => stay.with_effect(Effect::LoadPaymentStatus),
        Command::ShowCircles => stay.with_effect(Effect::LoadCircles),
        Command::Organizer => {
            stay.with_effect(Effect::reply(replies::organizer_menu(&context.organizer_url)))
        }
        Command::AddCircle => stay.with_effect(Effect::reply(replies::add_circle_help())),
        Command::Menu => stay.with_effect(Effect::reply(replies::greeting_menu(
            &context.name,
            &context.organizer_url,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Circle;
    use crate::notify::Content;
    use chrono::Utc;

    fn ctx() -> ConvContext {
        let mut context = ConvContext::new("U1", "https://liff.example");
        context.name = "Aki".to_string();
        context
    }

    fn circle(name: &str) -> Circle {
        Circle {
            id: 1,
            name: name.to_string(),
            created_by: "U1".to_string(),
            created_at: Utc::now(),
        }
    }

    fn only_reply(result: &TransitionResult) -> &Content {
        let replies: Vec<_> = result
            .effects
            .iter()
            .filter_map(|e| match e {
                Effect::Reply(c) => Some(c),
                _ => None,
            })
            .collect();
        assert_eq!(replies.len(), 1, "effects: {:?}", result.effects);
        replies[0]
    }

    #[test]
    fn test_new_user_is_asked_for_name() {
        let result = transition(&ConvState::New, &ctx(), Event::message("hello")).unwrap();
        assert_eq!(result.new_state, ConvState::AwaitingName);
        assert_eq!(result.effects[0], Effect::PersistState);
        assert!(only_reply(&result).body().contains("name"));
    }

    #[test]
    fn test_name_is_saved_and_circle_choice_offered() {
        let result = transition(&ConvState::AwaitingName, &ctx(), Event::message("Ben")).unwrap();
        assert_eq!(
            result.new_state,
            ConvState::AwaitingCircle {
                mode: CircleMode::Unset
            }
        );
        assert_eq!(
            result.effects[0],
            Effect::SaveName {
                name: "Ben".to_string()
            }
        );
        // The name and the step go out in one write
        assert!(!result.effects.contains(&Effect::PersistState));
        assert!(matches!(only_reply(&result), Content::Choices { text, .. } if text.contains("Ben")));
    }

    #[test]
    fn test_mode_selection() {
        let state = ConvState::AwaitingCircle {
            mode: CircleMode::Unset,
        };
        let create = transition(&state, &ctx(), Event::message(CHOOSE_CREATE)).unwrap();
        assert_eq!(
            create.new_state,
            ConvState::AwaitingCircle {
                mode: CircleMode::Create
            }
        );
        let join = transition(&create.new_state, &ctx(), Event::message(CHOOSE_JOIN)).unwrap();
        assert_eq!(
            join.new_state,
            ConvState::AwaitingCircle {
                mode: CircleMode::Join
            }
        );
    }

    #[test]
    fn test_circle_name_routes_by_mode() {
        let cases = [
            (CircleMode::Unset, Effect::AdoptCircle { name: "Go".into() }),
            (CircleMode::Create, Effect::CreateCircle { name: "Go".into() }),
            (
                CircleMode::Join,
                Effect::JoinCircle {
                    name: "Go".into(),
                    registering: true,
                },
            ),
        ];
        for (mode, expected) in cases {
            let state = ConvState::AwaitingCircle { mode };
            let result = transition(&state, &ctx(), Event::message("Go")).unwrap();
            assert_eq!(result.new_state, state);
            assert_eq!(result.effects, vec![expected]);
        }
    }

    #[test]
    fn test_conflicts_keep_state() {
        let state = ConvState::AwaitingCircle {
            mode: CircleMode::Create,
        };
        for outcome in [
            CircleOutcome::NameTaken { name: "Go".into() },
            CircleOutcome::AlreadyMember,
            CircleOutcome::NotFound {
                name: "Go".into(),
                suggestions: vec!["Go Club".into()],
            },
        ] {
            let result = transition(&state, &ctx(), Event::CircleSettled(outcome)).unwrap();
            assert_eq!(result.new_state, state);
            assert!(!result.effects.contains(&Effect::PersistState));
            only_reply(&result);
        }
    }

    #[test]
    fn test_join_completes_registration_with_menu() {
        let state = ConvState::AwaitingCircle {
            mode: CircleMode::Join,
        };
        let outcome = CircleOutcome::Joined {
            circle: circle("Tennis"),
            member_count: 4,
        };
        let result = transition(&state, &ctx(), Event::CircleSettled(outcome)).unwrap();
        assert_eq!(result.new_state, ConvState::Registered);
        // Completion was already stored by the circle effect
        assert_eq!(result.effects.len(), 1);
        let Content::Choices { text, choices } = only_reply(&result) else {
            panic!("expected menu");
        };
        assert!(text.contains("Tennis (4 members)"));
        assert_eq!(choices.len(), 4);
    }

    #[test]
    fn test_commands_dispatch() {
        let state = ConvState::Registered;
        let cases = [
            ("report:12", Effect::ReportPayment { event_id: 12 }),
            (CMD_I_PAID, Effect::LoadUnpaidEvents),
            (CMD_MY_PAYMENTS, Effect::LoadPaymentStatus),
            (CMD_MY_CIRCLES, Effect::LoadCircles),
            (
                "join: Chess ",
                Effect::JoinCircle {
                    name: "Chess".into(),
                    registering: false,
                },
            ),
        ];
        for (text, expected) in cases {
            let result = transition(&state, &ctx(), Event::message(text)).unwrap();
            assert_eq!(result.new_state, state);
            assert_eq!(result.effects, vec![expected], "command {text}");
        }
    }

    #[test]
    fn test_bad_report_id_and_unknown_text() {
        let state = ConvState::Registered;
        let bad = transition(&state, &ctx(), Event::message("report:abc")).unwrap();
        assert_eq!(only_reply(&bad), &replies::invalid_event_id());

        let menu = transition(&state, &ctx(), Event::message("what?")).unwrap();
        assert!(only_reply(&menu).body().contains("Hi Aki"));

        let empty_join = transition(&state, &ctx(), Event::message("join:")).unwrap();
        assert_eq!(only_reply(&empty_join), &replies::missing_circle_name());
    }

    #[test]
    fn test_report_outcomes_reply() {
        let state = ConvState::Registered;
        let reported = transition(
            &state,
            &ctx(),
            Event::PaymentReported {
                event_id: 1,
                outcome: ReportOutcome::AlreadyReported,
            },
        )
        .unwrap();
        assert_eq!(only_reply(&reported), &replies::payment_reported());

        let stranger = transition(
            &state,
            &ctx(),
            Event::PaymentReported {
                event_id: 1,
                outcome: ReportOutcome::NotParticipant,
            },
        )
        .unwrap();
        assert_eq!(only_reply(&stranger), &replies::not_a_participant());
    }

    #[test]
    fn test_steady_state_events_rejected_during_onboarding() {
        let err = transition(
            &ConvState::AwaitingName,
            &ctx(),
            Event::UnpaidEventsLoaded { events: vec![] },
        )
        .unwrap_err();
        assert!(matches!(err, TransitionError::InvalidTransition(_)));

        assert!(transition(
            &ConvState::Registered,
            &ctx(),
            Event::CircleSettled(CircleOutcome::Created {
                circle: circle("X")
            }),
        )
        .is_err());
    }
}
