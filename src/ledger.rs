//! Event ledger service
//!
//! Event creation with an even split, participant enrollment, and the
//! `unpaid -> reported -> approved` payment lifecycle. Every committed
//! transition fans out a best-effort notification.

use crate::db::{
    Database, Event, EventSummary, NewEventRecord, NewParticipant, Participant, PaymentStatus,
    PendingApproval, UnpaidEvent, UnpaidParticipant,
};
use crate::error::{ServiceError, ServiceResult};
use crate::notify::{Content, Notifier};
use std::collections::HashSet;

/// Cap on the user-facing chat lists
pub const USER_LIST_LIMIT: usize = 10;

/// Per-head share of a total
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    pub per_head: i64,
    /// Uncollected part of the total, absorbed by the organizer
    pub remainder: i64,
}

/// Integer-division split of `total` over `count` heads. `None` when there
/// is nothing to split or no one to split it between.
pub fn split_even(total: i64, count: usize) -> Option<Split> {
    let count = i64::try_from(count).ok().filter(|c| *c > 0)?;
    if total <= 0 {
        return None;
    }
    let per_head = total / count;
    Some(Split {
        per_head,
        remainder: total - per_head * count,
    })
}

/// Request to create an event
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub name: String,
    pub organizer_id: String,
    /// Circle name; linked to the circle row when one exists
    pub circle: String,
    pub total_amount: i64,
    pub participant_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedEvent {
    pub event: Event,
    pub participants: Vec<Participant>,
    /// Requested ids with no user record
    pub skipped: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    Reported,
    /// Duplicate report; nothing changed
    AlreadyReported,
    /// The user has no participant row on that event
    NotParticipant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    AlreadyApproved,
}

#[derive(Clone)]
pub struct Ledger {
    db: Database,
    notifier: Notifier,
}

impl Ledger {
    pub fn new(db: Database, notifier: Notifier) -> Self {
        Self { db, notifier }
    }

    /// Create a confirmed event and enroll every participant id that resolves
    /// to a user. The split divides by the number of requested ids.
    pub fn create_event(&self, request: NewEvent) -> ServiceResult<CreatedEvent> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ServiceError::invalid("event name must not be empty"));
        }
        let split = split_even(request.total_amount, request.participant_ids.len()).ok_or_else(
            || ServiceError::invalid("total amount must be positive and at least one participant is required"),
        )?;

        let mut seen = HashSet::new();
        if let Some(dup) = request
            .participant_ids
            .iter()
            .find(|id| !seen.insert(id.as_str()))
        {
            return Err(ServiceError::invalid(format!("duplicate participant: {dup}")));
        }

        let organizer = self
            .db
            .get_user(&request.organizer_id)?
            .ok_or_else(|| ServiceError::UserNotFound(request.organizer_id.clone()))?;

        let mut enrolled = Vec::with_capacity(request.participant_ids.len());
        let mut skipped = Vec::new();
        for id in &request.participant_ids {
            match self.db.get_user(id)? {
                Some(user) => enrolled.push(NewParticipant {
                    user_id: user.user_id,
                    user_name: user.name,
                }),
                None => {
                    tracing::warn!(user_id = %id, "Unknown participant skipped");
                    skipped.push(id.clone());
                }
            }
        }

        let circle_id = if request.circle.is_empty() {
            None
        } else {
            self.db.get_circle_by_name(&request.circle)?.map(|c| c.id)
        };

        let event = self.db.insert_event_with_participants(
            &NewEventRecord {
                name,
                organizer_id: &organizer.user_id,
                circle: &request.circle,
                circle_id,
                total_amount: request.total_amount,
                split_amount: split.per_head,
                remainder: split.remainder,
            },
            &enrolled,
        )?;
        let participants = self.db.list_participants(event.id)?;

        tracing::info!(
            event_id = event.id,
            organizer = %organizer.user_id,
            total = event.total_amount,
            split = event.split_amount,
            remainder = event.remainder,
            participants = participants.len(),
            skipped = skipped.len(),
            "Event created"
        );

        for participant in &participants {
            self.notifier.spawn_push(
                &participant.user_id,
                Content::text(format!(
                    "📢 New expense: {}\n\nOrganizer: {}\nYour share: ¥{}\n\nSend \"💰 I paid\" once you have paid.",
                    event.name, organizer.name, event.split_amount
                )),
            );
        }

        Ok(CreatedEvent {
            event,
            participants,
            skipped,
        })
    }

    /// Self-report payment. Idempotent: duplicates and unknown pairs change
    /// nothing and notify no one.
    pub fn report_payment(&self, event_id: i64, user_id: &str) -> ServiceResult<ReportOutcome> {
        let Some(event) = self.db.get_event(event_id)? else {
            return Ok(ReportOutcome::NotParticipant);
        };
        let Some(participant) = self.db.find_participant(event_id, user_id)? else {
            return Ok(ReportOutcome::NotParticipant);
        };
        if participant.paid || self.db.mark_reported(event_id, user_id)? == 0 {
            return Ok(ReportOutcome::AlreadyReported);
        }

        tracing::info!(event_id, user_id = %user_id, "Payment reported");
        self.notifier.spawn_push(
            &event.organizer_id,
            Content::text(format!(
                "💰 Payment reported\n\n{} reported paying for \"{}\".\n\nPlease review it on the approval screen.",
                participant.user_name, event.name
            )),
        );
        Ok(ReportOutcome::Reported)
    }

    /// Approve a reported payment. Only the event's organizer may approve.
    pub fn approve_participant(
        &self,
        participant_id: i64,
        organizer_id: &str,
    ) -> ServiceResult<ApprovalOutcome> {
        let participant = self
            .db
            .get_participant(participant_id)?
            .ok_or(ServiceError::ParticipantNotFound(participant_id))?;
        let event = self
            .db
            .get_event(participant.event_id)?
            .ok_or(ServiceError::EventNotFound(participant.event_id))?;

        if event.organizer_id != organizer_id {
            tracing::warn!(participant_id, requester = %organizer_id, "Approval by non-organizer rejected");
            return Err(ServiceError::NotOrganizer);
        }
        if participant.approved_at.is_some() {
            return Ok(ApprovalOutcome::AlreadyApproved);
        }
        if !participant.paid {
            return Err(ServiceError::invalid("payment has not been reported yet"));
        }
        if self.db.mark_approved(participant_id)? == 0 {
            return Ok(ApprovalOutcome::AlreadyApproved);
        }

        tracing::info!(participant_id, event_id = event.id, "Payment approved");
        self.notifier.spawn_push(
            &participant.user_id,
            Content::text(format!(
                "✅ Payment approved\n\nYour payment for \"{}\" (¥{}) was approved.",
                event.name, event.split_amount
            )),
        );
        Ok(ApprovalOutcome::Approved)
    }

    pub fn unpaid_events_for(&self, user_id: &str) -> ServiceResult<Vec<UnpaidEvent>> {
        Ok(self.db.unpaid_events_for(user_id, USER_LIST_LIMIT)?)
    }

    pub fn payment_status_for(&self, user_id: &str) -> ServiceResult<Vec<PaymentStatus>> {
        Ok(self.db.payment_status_for(user_id, USER_LIST_LIMIT)?)
    }

    /// Everyone who has neither reported nor been approved, system-wide
    pub fn unpaid_participants(&self) -> ServiceResult<Vec<UnpaidParticipant>> {
        Ok(self.db.unpaid_participants()?)
    }

    pub fn pending_approvals(&self, organizer_id: &str) -> ServiceResult<Vec<PendingApproval>> {
        Ok(self.db.pending_approvals(organizer_id)?)
    }

    pub fn events_by_organizer(&self, organizer_id: &str) -> ServiceResult<Vec<EventSummary>> {
        Ok(self.db.events_by_organizer(organizer_id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::testing::{FailingSink, RecordingSink};
    use proptest::prelude::*;
    use std::sync::Arc;

    fn setup() -> (Database, Ledger, Arc<RecordingSink>) {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("ORG", "Olive"), ("A", "Aki"), ("B", "Ben"), ("C", "Cai")] {
            db.insert_user(id, 3).unwrap();
            db.set_user_name(id, name).unwrap();
        }
        let sink = Arc::new(RecordingSink::new());
        let ledger = Ledger::new(db.clone(), Notifier::new(sink.clone()));
        (db, ledger, sink)
    }

    fn new_event(total: i64, ids: &[&str]) -> NewEvent {
        NewEvent {
            name: "Dinner".to_string(),
            organizer_id: "ORG".to_string(),
            circle: String::new(),
            total_amount: total,
            participant_ids: ids.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn test_split_even() {
        assert_eq!(
            split_even(100, 3),
            Some(Split {
                per_head: 33,
                remainder: 1
            })
        );
        assert_eq!(split_even(90, 3).map(|s| s.remainder), Some(0));
        assert_eq!(split_even(0, 3), None);
        assert_eq!(split_even(-5, 1), None);
        assert_eq!(split_even(100, 0), None);
    }

    proptest! {
        #[test]
        fn prop_split_accounts_for_whole_total(total in 1i64..10_000_000, count in 1usize..200) {
            let split = split_even(total, count).unwrap();
            let heads = i64::try_from(count).unwrap();
            prop_assert_eq!(split.per_head * heads + split.remainder, total);
            prop_assert!(split.remainder >= 0 && split.remainder < heads);
        }
    }

    #[tokio::test]
    async fn test_create_event_splits_and_notifies() {
        let (_db, ledger, sink) = setup();
        let created = ledger.create_event(new_event(100, &["A", "B", "C"])).unwrap();

        assert_eq!(created.event.split_amount, 33);
        assert_eq!(created.event.remainder, 1);
        assert_eq!(created.participants.len(), 3);
        assert!(created.participants.iter().all(|p| !p.paid));
        assert_eq!(created.participants[0].user_name, "Aki");

        sink.wait_for(3).await;
        let mut recipients = sink.pushed_to();
        recipients.sort();
        assert_eq!(recipients, vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_create_event_skips_unknown_participants() {
        let (_db, ledger, sink) = setup();
        let created = ledger.create_event(new_event(100, &["A", "ghost"])).unwrap();

        // Denominator is the requested count
        assert_eq!(created.event.split_amount, 50);
        assert_eq!(created.participants.len(), 1);
        assert_eq!(created.skipped, vec!["ghost"]);
        sink.wait_for(1).await;
    }

    #[test]
    fn test_create_event_validation() {
        let (_db, ledger, _sink) = setup();
        let invalid = |e: ServiceError| e.kind() == ErrorKind::Invalid;

        assert!(invalid(ledger.create_event(new_event(0, &["A"])).unwrap_err()));
        assert!(invalid(ledger.create_event(new_event(100, &[])).unwrap_err()));
        assert!(invalid(ledger.create_event(new_event(100, &["A", "A"])).unwrap_err()));

        let mut unnamed = new_event(100, &["A"]);
        unnamed.name = "  ".to_string();
        assert!(invalid(ledger.create_event(unnamed).unwrap_err()));

        let mut orphan = new_event(100, &["A"]);
        orphan.organizer_id = "nobody".to_string();
        assert!(matches!(
            ledger.create_event(orphan),
            Err(ServiceError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_report_then_approve() {
        let (db, ledger, sink) = setup();
        let created = ledger.create_event(new_event(100, &["A", "B"])).unwrap();
        sink.wait_for(2).await;
        sink.clear();
        let event_id = created.event.id;

        assert_eq!(ledger.report_payment(event_id, "A").unwrap(), ReportOutcome::Reported);
        sink.wait_for(1).await;
        assert_eq!(sink.pushed_to(), vec!["ORG"]);

        assert_eq!(
            ledger.report_payment(event_id, "A").unwrap(),
            ReportOutcome::AlreadyReported
        );
        assert_eq!(
            ledger.report_payment(event_id, "ORG").unwrap(),
            ReportOutcome::NotParticipant
        );
        assert_eq!(
            ledger.report_payment(9999, "A").unwrap(),
            ReportOutcome::NotParticipant
        );

        let a = db.find_participant(event_id, "A").unwrap().unwrap();
        assert_eq!(
            ledger.approve_participant(a.id, "ORG").unwrap(),
            ApprovalOutcome::Approved
        );
        assert_eq!(
            ledger.approve_participant(a.id, "ORG").unwrap(),
            ApprovalOutcome::AlreadyApproved
        );

        let a = db.get_participant(a.id).unwrap().unwrap();
        assert!(a.paid && a.approved_at.is_some());

        sink.wait_for(2).await;
        assert_eq!(sink.pushed_to(), vec!["ORG", "A"]);
    }

    #[tokio::test]
    async fn test_notification_failures_do_not_fail_ledger_writes() {
        let db = Database::open_in_memory().unwrap();
        for (id, name) in [("ORG", "Olive"), ("A", "Aki")] {
            db.insert_user(id, 3).unwrap();
            db.set_user_name(id, name).unwrap();
        }
        let sink = Arc::new(FailingSink::always());
        let ledger = Ledger::new(db.clone(), Notifier::new(sink.clone()));

        let created = ledger.create_event(new_event(100, &["A"])).unwrap();
        sink.wait_for_attempts(1).await;
        let event_id = created.event.id;
        assert!(db.get_event(event_id).unwrap().is_some());

        assert_eq!(ledger.report_payment(event_id, "A").unwrap(), ReportOutcome::Reported);
        sink.wait_for_attempts(2).await;

        let a = db.find_participant(event_id, "A").unwrap().unwrap();
        assert!(a.paid);
        assert_eq!(
            ledger.approve_participant(a.id, "ORG").unwrap(),
            ApprovalOutcome::Approved
        );
        sink.wait_for_attempts(3).await;

        let a = db.get_participant(a.id).unwrap().unwrap();
        assert!(a.approved_at.is_some());
        assert!(sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn test_non_organizer_cannot_approve() {
        let (db, ledger, _sink) = setup();
        let created = ledger.create_event(new_event(100, &["A", "B"])).unwrap();
        ledger.report_payment(created.event.id, "A").unwrap();
        let a = db.find_participant(created.event.id, "A").unwrap().unwrap();

        for requester in ["A", "B", "C", "stranger"] {
            let err = ledger.approve_participant(a.id, requester).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Forbidden);
        }
        assert!(db.get_participant(a.id).unwrap().unwrap().approved_at.is_none());
    }

    #[tokio::test]
    async fn test_approve_requires_report() {
        let (db, ledger, _sink) = setup();
        let created = ledger.create_event(new_event(100, &["A"])).unwrap();
        let a = db.find_participant(created.event.id, "A").unwrap().unwrap();

        assert_eq!(
            ledger.approve_participant(a.id, "ORG").unwrap_err().kind(),
            ErrorKind::Invalid
        );
        assert!(matches!(
            ledger.approve_participant(4242, "ORG"),
            Err(ServiceError::ParticipantNotFound(4242))
        ));
    }

    #[tokio::test]
    async fn test_reminder_query_excludes_reporters() {
        let (_db, ledger, _sink) = setup();
        let created = ledger.create_event(new_event(100, &["A", "B"])).unwrap();
        ledger.report_payment(created.event.id, "A").unwrap();

        let unpaid = ledger.unpaid_participants().unwrap();
        assert_eq!(unpaid.len(), 1);
        assert_eq!(unpaid[0].user_id, "B");
        assert_eq!(unpaid[0].split_amount, 50);

        let pending = ledger.pending_approvals("ORG").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].user_id, "A");
    }

    #[tokio::test]
    async fn test_user_lists_capped_and_newest_first() {
        let (_db, ledger, _sink) = setup();
        for i in 0..12 {
            let mut request = new_event(100 + i, &["A"]);
            request.name = format!("Event {i}");
            ledger.create_event(request).unwrap();
        }

        let unpaid = ledger.unpaid_events_for("A").unwrap();
        assert_eq!(unpaid.len(), USER_LIST_LIMIT);
        assert_eq!(unpaid[0].event_name, "Event 11");

        let status = ledger.payment_status_for("A").unwrap();
        assert_eq!(status.len(), USER_LIST_LIMIT);
        assert!(status.iter().all(|s| !s.paid && !s.approved));

        let organized = ledger.events_by_organizer("ORG").unwrap();
        assert_eq!(organized.len(), 12);
        assert_eq!(organized[0].participant_count, 1);
    }
}
