//! Daily payment reminders
//!
//! One long-lived task sleeps until the configured local hour, then pushes a
//! reminder to every participant who has neither reported nor been approved.
//! Sends are fire-and-forget and paced to stay under the platform rate limit.

use crate::config::ReminderConfig;
use crate::db::UnpaidParticipant;
use crate::error::ServiceResult;
use crate::ledger::Ledger;
use crate::notify::{Content, Notifier};
use chrono::{DateTime, Days, Local, TimeDelta, TimeZone};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ReminderScheduler {
    ledger: Ledger,
    notifier: Notifier,
    config: ReminderConfig,
}

impl ReminderScheduler {
    pub fn new(ledger: Ledger, notifier: Notifier, config: ReminderConfig) -> Self {
        Self {
            ledger,
            notifier,
            config,
        }
    }

    /// Run until `cancel` fires. A failed round is logged and the loop waits
    /// for the next day.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(hour = self.config.hour, "Reminder scheduler started");
        loop {
            let now = Local::now();
            let next = next_fire_after(&now, self.config.hour);
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            tracing::info!(next = %next, wait_secs = wait.as_secs(), "Next reminder round scheduled");

            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(wait) => {}
            }

            if let Err(e) = self.tick().await {
                tracing::error!(error = %e, "Reminder round failed");
            }
        }
        tracing::info!("Reminder scheduler stopped");
    }

    /// One reminder round. Returns how many reminders were dispatched; the
    /// sends themselves complete in the background.
    pub async fn tick(&self) -> ServiceResult<usize> {
        let participants = self.ledger.unpaid_participants()?;
        if participants.is_empty() {
            tracing::info!("No unpaid participants, nothing to remind");
            return Ok(0);
        }

        tracing::info!(count = participants.len(), "Sending payment reminders");
        for (i, participant) in participants.iter().enumerate() {
            if i > 0 && !self.config.pacing.is_zero() {
                tokio::time::sleep(self.config.pacing).await;
            }
            self.notifier
                .spawn_push(&participant.user_id, reminder_message(participant));
        }
        Ok(participants.len())
    }
}

/// The first occurrence of `hour:00` local time strictly after `now`.
///
/// Skips dates where that wall-clock time does not exist (DST gaps) and takes
/// the earlier instant where it is ambiguous.
pub fn next_fire_after<Tz: TimeZone>(now: &DateTime<Tz>, hour: u32) -> DateTime<Tz> {
    let tz = now.timezone();
    let today = now.date_naive();
    for offset in 0..=2 {
        let Some(date) = today.checked_add_days(Days::new(offset)) else {
            continue;
        };
        let Some(wall_clock) = date.and_hms_opt(hour, 0, 0) else {
            break;
        };
        if let Some(candidate) = tz.from_local_datetime(&wall_clock).earliest() {
            if candidate > *now {
                return candidate;
            }
        }
    }
    now.clone() + TimeDelta::hours(24)
}

fn reminder_message(participant: &UnpaidParticipant) -> Content {
    Content::text(format!(
        "⏰ Payment reminder\n\n[Event] {}\n[Amount] ¥{}\n\nWe have not received your payment yet.\nIf you already paid, report it with the \"💰 I paid\" button.",
        participant.event_name,
        format_amount(participant.split_amount)
    ))
}

/// Thousands separators, e.g. `12,345`
fn format_amount(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if amount < 0 {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
