use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::client::{with_retries, ContactId, ContactTagClient, RetryPolicy, TagServiceError};
use super::mirror::{ContactTagState, TagStateRepository};
use super::naming::TagName;
use crate::workflows::engagement::domain::{
    CommunicationRecordId, Course, Recipient, RecordSource,
};
use crate::workflows::engagement::history::CommunicationLog;
use crate::workflows::engagement::repository::{
    CommunicationHistoryRepository, RepositoryError,
};

/// Non-fatal side effects that did not land. The primary tag change took
/// external effect; callers decide whether to surface these in monitoring.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncWarning {
    #[error("tag mirror write failed: {0}")]
    MirrorWrite(String),
    #[error("audit outcome update failed: {0}")]
    HistoryOutcome(String),
}

/// Error for the primary tag change itself (after retries).
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Service(#[from] TagServiceError),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Result of a successful apply, carrying any best-effort warnings.
#[derive(Debug)]
pub struct TagApplication {
    pub contact_id: ContactId,
    pub tag: TagName,
    pub warnings: Vec<SyncWarning>,
}

/// Result of a successful removal. `reengaged_record` names the audit
/// record whose outcome flipped to success, when one existed.
#[derive(Debug)]
pub struct TagRemoval {
    pub contact_id: ContactId,
    pub tag: TagName,
    pub reengaged_record: Option<CommunicationRecordId>,
    pub warnings: Vec<SyncWarning>,
}

/// Synchronizes tag changes with the external service and keeps the local
/// engagement mirror and audit outcomes in step, best-effort.
#[derive(Debug)]
pub struct TagOrchestrator<C, H, M> {
    client: Arc<C>,
    log: CommunicationLog<H>,
    mirror: Arc<M>,
    retry: RetryPolicy,
}

impl<C, H, M> Clone for TagOrchestrator<C, H, M> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            log: self.log.clone(),
            mirror: Arc::clone(&self.mirror),
            retry: self.retry,
        }
    }
}

impl<C, H, M> TagOrchestrator<C, H, M>
where
    C: ContactTagClient,
    H: CommunicationHistoryRepository,
    M: TagStateRepository,
{
    pub fn new(
        client: Arc<C>,
        log: CommunicationLog<H>,
        mirror: Arc<M>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            log,
            mirror,
            retry,
        }
    }

    /// Applies a tag to the recipient's contact, normalized against the
    /// course code. Idempotent from the caller's perspective.
    pub async fn apply(
        &self,
        recipient: &Recipient,
        course: &Course,
        tag: &str,
        source: RecordSource,
        now: DateTime<Utc>,
    ) -> Result<TagApplication, OrchestrationError> {
        let contact = self.resolve_contact(&recipient.email).await?;
        let tag = TagName::normalize(tag, &course.code);

        with_retries(&self.retry, "apply_tag", || {
            self.client.apply_tag(&contact, tag.raw())
        })
        .await?;
        debug!(recipient = %recipient.id.0, tag = tag.full(), "tag applied");

        let mut warnings = Vec::new();
        if let Err(err) = self.mirror_apply(&contact, recipient, &tag, source, now) {
            warnings.push(SyncWarning::MirrorWrite(err.to_string()));
        }

        Ok(TagApplication {
            contact_id: contact,
            tag,
            warnings,
        })
    }

    /// Removes a tag from the recipient's contact and marks the latest
    /// matching audit record as re-engaged.
    pub async fn remove(
        &self,
        recipient: &Recipient,
        course: &Course,
        tag: &str,
        now: DateTime<Utc>,
    ) -> Result<TagRemoval, OrchestrationError> {
        let contact = self.resolve_contact(&recipient.email).await?;
        let tag = TagName::normalize(tag, &course.code);

        with_retries(&self.retry, "remove_tag", || {
            self.client.remove_tag(&contact, tag.raw())
        })
        .await?;
        debug!(recipient = %recipient.id.0, tag = tag.full(), "tag removed");

        let mut warnings = Vec::new();
        if let Err(err) = self.mirror_remove(&contact, &tag, now) {
            warnings.push(SyncWarning::MirrorWrite(err.to_string()));
        }

        let reengaged_record =
            match self
                .log
                .mark_reengaged(&recipient.id, &course.id, tag.full(), now)
            {
                Ok(record) => record.map(|record| record.id),
                Err(err) => {
                    warnings.push(SyncWarning::HistoryOutcome(err.to_string()));
                    None
                }
            };

        Ok(TagRemoval {
            contact_id: contact,
            tag,
            reengaged_record,
            warnings,
        })
    }

    /// Rebuilds the mirror from the external service's view; the remote tag
    /// list is authoritative.
    pub async fn refresh_mirror(
        &self,
        recipient: &Recipient,
        now: DateTime<Utc>,
    ) -> Result<ContactTagState, OrchestrationError> {
        let contact = self.resolve_contact(&recipient.email).await?;
        let remote = with_retries(&self.retry, "list_tags", || self.client.list_tags(&contact))
            .await?;

        let mut state = ContactTagState::new(contact, recipient.id.clone(), now);
        for tag in remote {
            state.apply_tag(&tag.name, RecordSource::Automatic, tag.applied_at.unwrap_or(now));
        }
        state.refreshed_at = now;

        self.mirror.upsert(state.clone())?;
        Ok(state)
    }

    /// Drops mirror states unrefreshed since `cutoff`.
    pub fn purge_stale_mirrors(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        self.mirror.purge_stale(cutoff)
    }

    async fn resolve_contact(&self, email: &str) -> Result<ContactId, OrchestrationError> {
        Ok(with_retries(&self.retry, "find_or_create_contact", || {
            self.client.find_or_create_contact(email)
        })
        .await?)
    }

    fn mirror_apply(
        &self,
        contact: &ContactId,
        recipient: &Recipient,
        tag: &TagName,
        source: RecordSource,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut state = self.mirror.fetch(contact)?.unwrap_or_else(|| {
            ContactTagState::new(contact.clone(), recipient.id.clone(), now)
        });
        state.apply_tag(tag.full(), source, now);
        self.mirror.upsert(state)
    }

    fn mirror_remove(
        &self,
        contact: &ContactId,
        tag: &TagName,
        now: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let Some(mut state) = self.mirror.fetch(contact)? else {
            return Ok(());
        };
        state.remove_tag(tag.full(), now);
        self.mirror.upsert(state)
    }
}
