use chrono::{DateTime, Utc};

use super::domain::{
    CommunicationRecord, CommunicationRecordId, Course, CourseId, Recipient, RecipientId, Rule,
    RuleId,
};

/// Error enumeration shared by every storage trait; the document store
/// itself stays abstract.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Course configuration lookups. Failing to list courses is the only error
/// that aborts a sweep outright.
pub trait CourseRepository: Send + Sync {
    fn fetch(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError>;
    fn all(&self) -> Result<Vec<Course>, RepositoryError>;
}

/// Recipient lookups; retrieval order of `enrolled_in` is the order the
/// engine evaluates recipients in.
pub trait RecipientRepository: Send + Sync {
    fn fetch(&self, id: &RecipientId) -> Result<Option<Recipient>, RepositoryError>;
    fn enrolled_in(&self, course: &CourseId) -> Result<Vec<Recipient>, RepositoryError>;
}

/// Range queries over raw engagement signals. Counts are computed by the
/// store so statistics never load full event histories.
pub trait EngagementEventRepository: Send + Sync {
    fn last_login_at(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;
    fn last_action_at(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError>;
    fn actions_since(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError>;
    fn total_actions(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<u64, RepositoryError>;
}

/// Rule storage. `record_execution` is the engine's only write path into a
/// rule; everything else belongs to admin tooling.
pub trait RuleRepository: Send + Sync {
    fn fetch(&self, id: &RuleId) -> Result<Option<Rule>, RepositoryError>;
    fn active_for_course(&self, course: &CourseId) -> Result<Vec<Rule>, RepositoryError>;
    fn record_execution(&self, id: &RuleId, at: DateTime<Utc>) -> Result<(), RepositoryError>;
}

/// Append-plus-update store for communication audit records.
pub trait CommunicationHistoryRepository: Send + Sync {
    fn append(&self, record: CommunicationRecord) -> Result<CommunicationRecord, RepositoryError>;
    fn fetch(
        &self,
        id: &CommunicationRecordId,
    ) -> Result<Option<CommunicationRecord>, RepositoryError>;
    /// Most recent record for a (recipient, course, tag) triple, by `sent_at`.
    fn latest_for_tag(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        tag: &str,
    ) -> Result<Option<CommunicationRecord>, RepositoryError>;
    /// Whether the tag was applied to the recipient at or after `since`.
    fn tag_applied_since(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        tag: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;
    fn update(&self, record: CommunicationRecord) -> Result<(), RepositoryError>;
}
