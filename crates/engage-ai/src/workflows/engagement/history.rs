use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::domain::{
    CommunicationOutcome, CommunicationRecord, CommunicationRecordId, CourseId, DeliveryStatus,
    RecipientId, RecordSource, RuleId, StatisticBag,
};
use super::repository::{CommunicationHistoryRepository, RepositoryError};

static RECORD_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_record_id() -> CommunicationRecordId {
    let id = RECORD_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    CommunicationRecordId(format!("comm-{id:06}"))
}

/// Error raised by the communication log.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("illegal delivery status transition {from} -> {to}")]
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
}

/// Audit writer enforcing the append-versus-update invariant: every new
/// apply is a new record, while later events for the same apply mutate the
/// record they belong to.
#[derive(Debug)]
pub struct CommunicationLog<H> {
    history: Arc<H>,
}

impl<H> Clone for CommunicationLog<H> {
    fn clone(&self) -> Self {
        Self {
            history: Arc::clone(&self.history),
        }
    }
}

impl<H> CommunicationLog<H>
where
    H: CommunicationHistoryRepository,
{
    pub fn new(history: Arc<H>) -> Self {
        Self { history }
    }

    /// Appends exactly one record for an executed tag application, with the
    /// statistic snapshot captured at decision time.
    #[allow(clippy::too_many_arguments)]
    pub fn record_application(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        rule: Option<&RuleId>,
        applied_tag: &str,
        snapshot: StatisticBag,
        source: RecordSource,
        sent_at: DateTime<Utc>,
    ) -> Result<CommunicationRecord, HistoryError> {
        let record = CommunicationRecord {
            id: next_record_id(),
            recipient_id: recipient.clone(),
            course_id: course.clone(),
            rule_id: rule.cloned(),
            applied_tag: applied_tag.to_string(),
            status: DeliveryStatus::Sent,
            sent_at,
            last_event_at: None,
            snapshot,
            outcome: None,
            source,
        };

        Ok(self.history.append(record)?)
    }

    /// Moves an existing record along the delivery lifecycle. Terminal
    /// statuses also settle the outcome.
    pub fn advance_status(
        &self,
        id: &CommunicationRecordId,
        next: DeliveryStatus,
        at: DateTime<Utc>,
    ) -> Result<CommunicationRecord, HistoryError> {
        let mut record = self.history.fetch(id)?.ok_or(RepositoryError::NotFound)?;

        if !record.status.can_advance_to(next) {
            return Err(HistoryError::IllegalTransition {
                from: record.status.label(),
                to: next.label(),
            });
        }

        record.status = next;
        record.last_event_at = Some(at);
        record.outcome = match next {
            DeliveryStatus::Bounced => Some(CommunicationOutcome::Bounced),
            DeliveryStatus::Unsubscribed => Some(CommunicationOutcome::Unsubscribed),
            _ => record.outcome,
        };

        self.history.update(record.clone())?;
        Ok(record)
    }

    pub fn record_outcome(
        &self,
        id: &CommunicationRecordId,
        outcome: CommunicationOutcome,
        at: DateTime<Utc>,
    ) -> Result<CommunicationRecord, HistoryError> {
        let mut record = self.history.fetch(id)?.ok_or(RepositoryError::NotFound)?;
        record.outcome = Some(outcome);
        record.last_event_at = Some(at);
        self.history.update(record.clone())?;
        Ok(record)
    }

    /// Marks the most recent record for this tag as a success when the tag
    /// is removed again — the recipient came back. Returns the updated
    /// record, or `None` when no prior apply exists.
    pub fn mark_reengaged(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        tag: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<CommunicationRecord>, HistoryError> {
        let Some(mut record) = self.history.latest_for_tag(recipient, course, tag)? else {
            return Ok(None);
        };

        record.outcome = Some(CommunicationOutcome::Success);
        record.last_event_at = Some(at);
        self.history.update(record.clone())?;
        Ok(Some(record))
    }
}
