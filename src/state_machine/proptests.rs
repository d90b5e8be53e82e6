//! Property-based tests for the state machine
//!
//! Drives the pure transition function the way the executor does, feeding
//! arbitrary effect outcomes back in.

use super::replies::{
    CHOOSE_CREATE, CHOOSE_JOIN, CMD_ADD_CIRCLE, CMD_I_PAID, CMD_MY_CIRCLES, CMD_MY_PAYMENTS,
    CMD_ORGANIZER,
};
use super::*;
use crate::db::{Circle, CircleMode, PaymentStatus, UnpaidEvent};
use crate::ledger::ReportOutcome;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context() -> ConvContext {
    ConvContext::new("U-prop", "https://liff.example")
}

fn circle(name: &str) -> Circle {
    Circle {
        id: 1,
        name: name.to_string(),
        created_by: "U-prop".to_string(),
        created_at: Utc.timestamp_opt(0, 0).unwrap(),
    }
}

/// How a simulated service answers a circle effect
#[derive(Debug, Clone, Copy)]
enum CircleAnswer {
    Success,
    Taken,
    Missing,
    Duplicate,
}

fn circle_outcome(effect: &Effect, answer: CircleAnswer) -> Option<CircleOutcome> {
    let (name, is_create) = match effect {
        Effect::CreateCircle { name } => (name, true),
        Effect::JoinCircle { name, .. } => (name, false),
        Effect::AdoptCircle { name } => {
            return Some(CircleOutcome::Adopted {
                circle: circle(name),
            })
        }
        _ => return None,
    };
    Some(match (answer, is_create) {
        (CircleAnswer::Success, true) => CircleOutcome::Created {
            circle: circle(name),
        },
        (CircleAnswer::Success, false) => CircleOutcome::Joined {
            circle: circle(name),
            member_count: 2,
        },
        (CircleAnswer::Taken, true) => CircleOutcome::NameTaken { name: name.clone() },
        (CircleAnswer::Missing, false) | (CircleAnswer::Taken, false) => CircleOutcome::NotFound {
            name: name.clone(),
            suggestions: vec![],
        },
        _ => CircleOutcome::AlreadyMember,
    })
}

/// Outcome of one simulated message: all effects seen plus the final state
struct Trace {
    state: ConvState,
    effects: Vec<(ConvState, Effect)>,
}

fn run_message(state: ConvState, text: &str, answer: CircleAnswer) -> Trace {
    let context = test_context();
    let mut current = state;
    let mut trace = Vec::new();
    let mut pending = vec![Event::message(text)];

    while let Some(event) = pending.pop() {
        let result = transition(&current, &context, event).expect("message must be accepted");
        let before = current;
        current = result.new_state;
        for effect in result.effects {
            let follow_up = match &effect {
                Effect::CreateCircle { .. }
                | Effect::JoinCircle { .. }
                | Effect::AdoptCircle { .. } => {
                    circle_outcome(&effect, answer).map(Event::CircleSettled)
                }
                Effect::ReportPayment { event_id } => Some(Event::PaymentReported {
                    event_id: *event_id,
                    outcome: ReportOutcome::Reported,
                }),
                Effect::LoadUnpaidEvents => Some(Event::UnpaidEventsLoaded {
                    events: vec![UnpaidEvent {
                        event_id: 1,
                        event_name: "Dinner".into(),
                        amount: 10,
                    }],
                }),
                Effect::LoadPaymentStatus => Some(Event::PaymentStatusLoaded {
                    statuses: vec![PaymentStatus {
                        event_id: 1,
                        event_name: "Dinner".into(),
                        amount: 10,
                        paid: false,
                        approved: false,
                    }],
                }),
                Effect::LoadCircles => Some(Event::CirclesLoaded { circles: vec![] }),
                _ => None,
            };
            trace.push((before, effect));
            if let Some(event) = follow_up {
                pending.push(event);
            }
        }
    }

    Trace {
        state: current,
        effects: trace,
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_state() -> impl Strategy<Value = ConvState> {
    prop_oneof![
        Just(ConvState::New),
        Just(ConvState::AwaitingName),
        Just(ConvState::AwaitingCircle {
            mode: CircleMode::Unset
        }),
        Just(ConvState::AwaitingCircle {
            mode: CircleMode::Create
        }),
        Just(ConvState::AwaitingCircle {
            mode: CircleMode::Join
        }),
        Just(ConvState::Registered),
    ]
}

fn arb_text() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(CMD_I_PAID.to_string()),
        Just(CMD_MY_PAYMENTS.to_string()),
        Just(CMD_MY_CIRCLES.to_string()),
        Just(CMD_ORGANIZER.to_string()),
        Just(CMD_ADD_CIRCLE.to_string()),
        Just(CHOOSE_CREATE.to_string()),
        Just(CHOOSE_JOIN.to_string()),
        (0i64..100).prop_map(|id| format!("report:{id}")),
        "[a-z]{0,5}".prop_map(|s| format!("report:{s}")),
        "[A-Za-z ]{0,12}".prop_map(|s| format!("join:{s}")),
        "[A-Za-z0-9 ]{1,20}",
    ]
}

fn arb_answer() -> impl Strategy<Value = CircleAnswer> {
    prop_oneof![
        Just(CircleAnswer::Success),
        Just(CircleAnswer::Taken),
        Just(CircleAnswer::Missing),
        Just(CircleAnswer::Duplicate),
    ]
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_every_message_gets_exactly_one_reply(
        state in arb_state(),
        text in arb_text(),
        answer in arb_answer(),
    ) {
        let trace = run_message(state, &text, answer);
        let replies = trace
            .effects
            .iter()
            .filter(|(_, e)| matches!(e, Effect::Reply(_)))
            .count();
        prop_assert_eq!(replies, 1);
    }

    #[test]
    fn prop_step_never_decreases(
        start in arb_state(),
        script in proptest::collection::vec((arb_text(), arb_answer()), 1..12),
    ) {
        let mut state = start;
        for (text, answer) in script {
            let trace = run_message(state, &text, answer);
            prop_assert!(trace.state.step() >= state.step());
            state = trace.state;
        }
    }

    #[test]
    fn prop_steady_state_effects_only_when_registered(
        state in arb_state(),
        text in arb_text(),
        answer in arb_answer(),
    ) {
        let trace = run_message(state, &text, answer);
        for (from, effect) in &trace.effects {
            if effect.requires_registration() {
                prop_assert!(from.is_registered(), "{:?} emitted from {:?}", effect, from);
            }
        }
    }

    #[test]
    fn prop_registered_users_stay_registered(text in arb_text(), answer in arb_answer()) {
        let trace = run_message(ConvState::Registered, &text, answer);
        prop_assert_eq!(trace.state, ConvState::Registered);
        prop_assert!(!trace.effects.iter().any(|(_, e)| *e == Effect::PersistState));
    }

    #[test]
    fn prop_registration_completes_in_the_circle_effect(
        mode in prop_oneof![
            Just(CircleMode::Unset),
            Just(CircleMode::Create),
            Just(CircleMode::Join),
        ],
        name in "[A-Za-z]{1,10}",
    ) {
        let state = ConvState::AwaitingCircle { mode };
        let trace = run_message(state, &name, CircleAnswer::Success);
        prop_assert_eq!(trace.state, ConvState::Registered);
        let writes: Vec<_> = trace
            .effects
            .iter()
            .filter(|(_, e)| !matches!(e, Effect::Reply(_)))
            .collect();
        prop_assert_eq!(writes.len(), 1, "{:?}", writes);
        prop_assert!(!writes[0].1.requires_registration());
        let circle = trace.effects.iter().position(|(_, e)| !matches!(e, Effect::Reply(_)));
        let reply = trace.effects.iter().position(|(_, e)| matches!(e, Effect::Reply(_)));
        prop_assert!(circle < reply);
    }

    #[test]
    fn prop_name_is_saved_without_a_separate_progress_write(name in "[A-Za-z]{1,10}") {
        let trace = run_message(ConvState::AwaitingName, &name, CircleAnswer::Success);
        prop_assert_eq!(trace.state.step(), 2);
        let effects: Vec<_> = trace.effects.into_iter().map(|(_, e)| e).collect();
        prop_assert_eq!(effects.len(), 2);
        prop_assert_eq!(&effects[0], &Effect::SaveName { name });
    }
}
