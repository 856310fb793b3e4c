use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::client::ContactId;
use crate::workflows::engagement::domain::{RecipientId, RecordSource};
use crate::workflows::engagement::repository::RepositoryError;

/// One tag as cached locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirroredTag {
    pub name: String,
    pub applied_at: DateTime<Utc>,
    pub source: RecordSource,
}

/// Local cache of the external service's per-contact tag set. The external
/// service stays the source of truth; this mirror only feeds reporting.
/// `tag_count` and `course_codes` are derived and refreshed on every
/// mutation so they never drift from the tag list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactTagState {
    pub contact_id: ContactId,
    pub recipient_id: RecipientId,
    pub tags: Vec<MirroredTag>,
    pub course_codes: Vec<String>,
    pub tag_count: usize,
    pub refreshed_at: DateTime<Utc>,
}

impl ContactTagState {
    pub fn new(contact_id: ContactId, recipient_id: RecipientId, now: DateTime<Utc>) -> Self {
        Self {
            contact_id,
            recipient_id,
            tags: Vec::new(),
            course_codes: Vec::new(),
            tag_count: 0,
            refreshed_at: now,
        }
    }

    /// Upserts a full-form tag; re-applying an existing tag refreshes its
    /// timestamp instead of duplicating the entry.
    pub fn apply_tag(&mut self, full_name: &str, source: RecordSource, now: DateTime<Utc>) {
        match self.tags.iter_mut().find(|tag| tag.name == full_name) {
            Some(existing) => {
                existing.applied_at = now;
                existing.source = source;
            }
            None => self.tags.push(MirroredTag {
                name: full_name.to_string(),
                applied_at: now,
                source,
            }),
        }
        self.refresh(now);
    }

    pub fn remove_tag(&mut self, full_name: &str, now: DateTime<Utc>) {
        self.tags.retain(|tag| tag.name != full_name);
        self.refresh(now);
    }

    fn refresh(&mut self, now: DateTime<Utc>) {
        self.tag_count = self.tags.len();

        let mut codes: Vec<String> = self
            .tags
            .iter()
            .filter_map(|tag| tag.name.split('_').next())
            .filter(|code| !code.is_empty())
            .map(str::to_string)
            .collect();
        codes.sort();
        codes.dedup();

        self.course_codes = codes;
        self.refreshed_at = now;
    }
}

/// Storage for the tag-state mirror. States past the retention window are
/// purged rather than refreshed.
pub trait TagStateRepository: Send + Sync {
    fn fetch(&self, contact: &ContactId) -> Result<Option<ContactTagState>, RepositoryError>;
    fn upsert(&self, state: ContactTagState) -> Result<(), RepositoryError>;
    /// Deletes states whose `refreshed_at` predates `cutoff`, returning how
    /// many were dropped.
    fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn state() -> ContactTagState {
        let now = Utc.with_ymd_and_hms(2025, 11, 3, 9, 0, 0).unwrap();
        ContactTagState::new(
            ContactId("contact-1".to_string()),
            RecipientId("r-1".to_string()),
            now,
        )
    }

    #[test]
    fn derived_metadata_tracks_tag_mutations() {
        let mut state = state();
        let now = state.refreshed_at;

        state.apply_tag("OGI_Inativo_7d", RecordSource::Automatic, now);
        state.apply_tag("CEM_Ativo", RecordSource::Manual, now);
        assert_eq!(state.tag_count, 2);
        assert_eq!(state.course_codes, vec!["CEM", "OGI"]);

        state.remove_tag("CEM_Ativo", now);
        assert_eq!(state.tag_count, 1);
        assert_eq!(state.course_codes, vec!["OGI"]);
    }

    #[test]
    fn reapplying_a_tag_refreshes_instead_of_duplicating() {
        let mut state = state();
        let first = state.refreshed_at;
        let later = first + chrono::Duration::hours(2);

        state.apply_tag("OGI_Ativo", RecordSource::Automatic, first);
        state.apply_tag("OGI_Ativo", RecordSource::Automatic, later);

        assert_eq!(state.tag_count, 1);
        assert_eq!(state.tags[0].applied_at, later);
    }
}
