//! User-facing chat texts and menus

use crate::circles::CHAT_SUGGESTION_LIMIT;
use crate::db::{CircleSummary, PaymentStatus, UnpaidEvent};
use crate::notify::{Choice, Content};
use std::fmt::Write as _;

pub const CMD_I_PAID: &str = "💰 I paid";
pub const CMD_MY_PAYMENTS: &str = "📊 My payments";
pub const CMD_MY_CIRCLES: &str = "📋 My circles";
pub const CMD_ORGANIZER: &str = "👤 Organizer";
pub const CMD_ADD_CIRCLE: &str = "🔄 Add circle";

pub const CHOOSE_CREATE: &str = "circle:create";
pub const CHOOSE_JOIN: &str = "circle:join";

pub const REPORT_PREFIX: &str = "report:";
pub const JOIN_PREFIX: &str = "join:";

pub fn no_content() -> Content {
    Content::text("The message was empty.")
}

pub fn retry_later() -> Content {
    Content::text("Something went wrong. Please try again in a little while.")
}

pub fn generic_error() -> Content {
    Content::text("Something went wrong.")
}

pub fn ask_name() -> Content {
    Content::text("Nice to meet you! What's your name?")
}

pub fn choose_circle(name: &str) -> Content {
    Content::choices(
        format!(
            "Thanks, {name}!\n\nWould you like to create a new circle, or join an existing one?"
        ),
        vec![
            Choice::send_text("🆕 Create new", CHOOSE_CREATE),
            Choice::send_text("🔍 Join existing", CHOOSE_JOIN),
        ],
    )
}

pub fn ask_new_circle_name() -> Content {
    Content::text("Let's create a new circle!\nPlease send its name:")
}

pub fn ask_existing_circle_name() -> Content {
    Content::text("Please send the name of the circle to join:\n(names must match exactly)")
}

pub fn circle_name_taken(name: &str) -> Content {
    Content::text(format!(
        "The circle name \"{name}\" is already taken.\nSend another name, or send \"{CHOOSE_JOIN}\" to join it instead."
    ))
}

pub fn already_member() -> Content {
    Content::text("You are already a member of this circle.")
}

/// Exact-name miss, with suggestions when there are any
pub fn circle_not_found(name: &str, suggestions: &[String], registering: bool) -> Content {
    let mut text = format!("No circle named \"{name}\" was found.");
    if suggestions.is_empty() {
        if registering {
            let _ = write!(
                text,
                "\n\nSend the exact name, or send \"{CHOOSE_CREATE}\" to create a new one."
            );
        }
        return Content::text(text);
    }

    text.push_str("\n\nSimilar circles:\n");
    for suggestion in suggestions.iter().take(CHAT_SUGGESTION_LIMIT) {
        let _ = writeln!(text, "・{suggestion}");
    }
    if suggestions.len() > CHAT_SUGGESTION_LIMIT {
        text.push_str("...\n");
    }
    if registering {
        text.push_str("\nPlease send the exact circle name.");
    }
    Content::text(text.trim_end().to_string())
}

/// Registration completed: welcome plus the main menu
pub fn registered(name: &str, circle_line: &str, organizer_url: &str) -> Content {
    main_menu(
        format!(
            "Registration complete!\n\nName: {name}\nCircle: {circle_line}\n\nYou can start using CirclePay now!"
        ),
        organizer_url,
    )
}

pub fn main_menu(text: impl Into<String>, organizer_url: &str) -> Content {
    Content::choices(
        text,
        vec![
            Choice::echo(CMD_I_PAID),
            Choice::echo(CMD_MY_PAYMENTS),
            Choice::echo(CMD_MY_CIRCLES),
            Choice::open_uri(CMD_ORGANIZER, organizer_url),
        ],
    )
}

pub fn greeting_menu(name: &str, organizer_url: &str) -> Content {
    main_menu(format!("Hi {name}!\nWhat would you like to do?"), organizer_url)
}

pub fn organizer_menu(organizer_url: &str) -> Content {
    let base = organizer_url.trim_end_matches('/');
    Content::choices(
        "Organizer menu:",
        vec![
            Choice::open_uri("📝 Create event", format!("{base}/create")),
            Choice::open_uri("✅ Approve payments", format!("{base}/approve")),
            Choice::open_uri("📊 Manage events", format!("{base}/events")),
        ],
    )
}

pub fn add_circle_help() -> Content {
    Content::text(format!(
        "Send the name of another circle to join as \"{JOIN_PREFIX}<name>\".\nExample: {JOIN_PREFIX}Tennis Club"
    ))
}

pub fn missing_circle_name() -> Content {
    Content::text("Please include a circle name.")
}

pub fn joined_additional(name: &str, member_count: i64) -> Content {
    Content::text(format!("Joined \"{name}\"! ({member_count} members)"))
}

pub fn invalid_event_id() -> Content {
    Content::text("That event ID is not valid.")
}

pub fn unpaid_events(events: &[UnpaidEvent]) -> Content {
    if events.is_empty() {
        return Content::text("You have no unpaid events.");
    }
    let choices = events
        .iter()
        .map(|e| {
            Choice::send_text(
                format!("{} (¥{})", e.event_name, e.amount),
                format!("{REPORT_PREFIX}{}", e.event_id),
            )
        })
        .collect();
    Content::choices("Which event did you pay for?", choices)
}

pub fn payment_reported() -> Content {
    Content::text("Payment reported! Please wait for the organizer's approval.")
}

pub fn not_a_participant() -> Content {
    Content::text("You are not a participant of that event.")
}

pub fn payment_status(statuses: &[PaymentStatus]) -> Content {
    if statuses.is_empty() {
        return Content::text("You are not part of any events.");
    }
    let mut text = String::from("[Your payments]\n");
    for s in statuses {
        let label = match (s.paid, s.approved) {
            (_, true) => "✅ approved",
            (true, false) => "🕒 reported",
            (false, false) => "⏳ unpaid",
        };
        let _ = write!(text, "\n・{}: ¥{} {label}", s.event_name, s.amount);
    }
    Content::text(text)
}

pub fn circle_list(circles: &[CircleSummary], primary: Option<i64>) -> Content {
    if circles.is_empty() {
        return Content::text("You are not a member of any circle.");
    }
    let mut text = String::from("[Your circles]\n");
    for (i, c) in circles.iter().enumerate() {
        let star = if primary == Some(c.circle.id) { " ⭐" } else { "" };
        let _ = write!(
            text,
            "\n{}. {} ({} members){star}",
            i + 1,
            c.circle.name,
            c.member_count
        );
    }
    text.push_str("\n\n⭐ = primary circle\nManage circles from the mini-app.");
    Content::text(text)
}
