use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;

use engage_ai::config::EngineSettings;
use engage_ai::workflows::engagement::{
    CommunicationHistoryRepository, CommunicationLog, CommunicationRecord, CommunicationRecordId,
    Course, CourseId, CourseRepository, EngagementEvent, EngagementEventRepository,
    EngagementRuleEngine, Recipient, RecipientId, RecipientRepository, RepositoryError, Rule,
    RuleId, RuleRepository,
};
use engage_ai::workflows::tagging::{
    ContactId, ContactTagClient, ContactTagState, RemoteTag, TagOrchestrator, TagServiceError,
    TagStateRepository,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

#[derive(Default)]
pub(crate) struct InMemoryCourseRepository {
    courses: Mutex<Vec<Course>>,
}

impl InMemoryCourseRepository {
    pub(crate) fn insert(&self, course: Course) {
        self.courses
            .lock()
            .expect("course mutex poisoned")
            .push(course);
    }
}

impl CourseRepository for InMemoryCourseRepository {
    fn fetch(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        let guard = self.courses.lock().expect("course mutex poisoned");
        Ok(guard.iter().find(|course| &course.id == id).cloned())
    }

    fn all(&self) -> Result<Vec<Course>, RepositoryError> {
        Ok(self.courses.lock().expect("course mutex poisoned").clone())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryRecipientRepository {
    records: Mutex<Vec<Recipient>>,
    enrollments: Mutex<HashMap<CourseId, Vec<RecipientId>>>,
}

impl InMemoryRecipientRepository {
    pub(crate) fn insert(&self, recipient: Recipient, course: &CourseId) {
        self.enrollments
            .lock()
            .expect("enrollment mutex poisoned")
            .entry(course.clone())
            .or_default()
            .push(recipient.id.clone());
        let mut guard = self.records.lock().expect("recipient mutex poisoned");
        if !guard.iter().any(|existing| existing.id == recipient.id) {
            guard.push(recipient);
        }
    }
}

impl RecipientRepository for InMemoryRecipientRepository {
    fn fetch(&self, id: &RecipientId) -> Result<Option<Recipient>, RepositoryError> {
        let guard = self.records.lock().expect("recipient mutex poisoned");
        Ok(guard.iter().find(|recipient| &recipient.id == id).cloned())
    }

    fn enrolled_in(&self, course: &CourseId) -> Result<Vec<Recipient>, RepositoryError> {
        let enrolled = self
            .enrollments
            .lock()
            .expect("enrollment mutex poisoned")
            .get(course)
            .cloned()
            .unwrap_or_default();
        let guard = self.records.lock().expect("recipient mutex poisoned");
        Ok(enrolled
            .iter()
            .filter_map(|id| guard.iter().find(|recipient| &recipient.id == id).cloned())
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryEventRepository {
    events: Mutex<Vec<EngagementEvent>>,
}

impl InMemoryEventRepository {
    pub(crate) fn insert(&self, event: EngagementEvent) {
        self.events
            .lock()
            .expect("event mutex poisoned")
            .push(event);
    }

    fn latest(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        action: bool,
    ) -> Option<DateTime<Utc>> {
        let guard = self.events.lock().expect("event mutex poisoned");
        guard
            .iter()
            .filter(|event| {
                &event.recipient_id == recipient
                    && &event.course_id == course
                    && event.kind.is_action() == action
            })
            .map(|event| event.occurred_at)
            .max()
    }
}

impl EngagementEventRepository for InMemoryEventRepository {
    fn last_login_at(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(self.latest(recipient, course, false))
    }

    fn last_action_at(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        Ok(self.latest(recipient, course, true))
    }

    fn actions_since(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        let guard = self.events.lock().expect("event mutex poisoned");
        Ok(guard
            .iter()
            .filter(|event| {
                &event.recipient_id == recipient
                    && &event.course_id == course
                    && event.kind.is_action()
                    && event.occurred_at >= since
            })
            .count() as u64)
    }

    fn total_actions(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<u64, RepositoryError> {
        let guard = self.events.lock().expect("event mutex poisoned");
        Ok(guard
            .iter()
            .filter(|event| {
                &event.recipient_id == recipient
                    && &event.course_id == course
                    && event.kind.is_action()
            })
            .count() as u64)
    }
}

#[derive(Default)]
pub(crate) struct InMemoryRuleRepository {
    rules: Mutex<Vec<Rule>>,
}

impl InMemoryRuleRepository {
    pub(crate) fn insert(&self, rule: Rule) {
        self.rules.lock().expect("rule mutex poisoned").push(rule);
    }
}

impl RuleRepository for InMemoryRuleRepository {
    fn fetch(&self, id: &RuleId) -> Result<Option<Rule>, RepositoryError> {
        let guard = self.rules.lock().expect("rule mutex poisoned");
        Ok(guard.iter().find(|rule| &rule.id == id).cloned())
    }

    fn active_for_course(&self, course: &CourseId) -> Result<Vec<Rule>, RepositoryError> {
        let guard = self.rules.lock().expect("rule mutex poisoned");
        Ok(guard
            .iter()
            .filter(|rule| &rule.course_id == course && rule.is_active)
            .cloned()
            .collect())
    }

    fn record_execution(&self, id: &RuleId, at: DateTime<Utc>) -> Result<(), RepositoryError> {
        let mut guard = self.rules.lock().expect("rule mutex poisoned");
        let rule = guard
            .iter_mut()
            .find(|rule| &rule.id == id)
            .ok_or(RepositoryError::NotFound)?;
        rule.last_executed_at = Some(at);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryHistoryRepository {
    records: Mutex<Vec<CommunicationRecord>>,
}

impl InMemoryHistoryRepository {
    pub(crate) fn all(&self) -> Vec<CommunicationRecord> {
        self.records.lock().expect("history mutex poisoned").clone()
    }
}

impl CommunicationHistoryRepository for InMemoryHistoryRepository {
    fn append(&self, record: CommunicationRecord) -> Result<CommunicationRecord, RepositoryError> {
        self.records
            .lock()
            .expect("history mutex poisoned")
            .push(record.clone());
        Ok(record)
    }

    fn fetch(
        &self,
        id: &CommunicationRecordId,
    ) -> Result<Option<CommunicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("history mutex poisoned");
        Ok(guard.iter().find(|record| &record.id == id).cloned())
    }

    fn latest_for_tag(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        tag: &str,
    ) -> Result<Option<CommunicationRecord>, RepositoryError> {
        let guard = self.records.lock().expect("history mutex poisoned");
        Ok(guard
            .iter()
            .filter(|record| {
                &record.recipient_id == recipient
                    && &record.course_id == course
                    && record.applied_tag == tag
            })
            .max_by_key(|record| record.sent_at)
            .cloned())
    }

    fn tag_applied_since(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        tag: &str,
        since: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let guard = self.records.lock().expect("history mutex poisoned");
        Ok(guard.iter().any(|record| {
            &record.recipient_id == recipient
                && &record.course_id == course
                && record.applied_tag == tag
                && record.sent_at >= since
        }))
    }

    fn update(&self, record: CommunicationRecord) -> Result<(), RepositoryError> {
        let mut guard = self.records.lock().expect("history mutex poisoned");
        let existing = guard
            .iter_mut()
            .find(|candidate| candidate.id == record.id)
            .ok_or(RepositoryError::NotFound)?;
        *existing = record;
        Ok(())
    }
}

/// Stand-in for the external tag service so the binary runs end-to-end
/// without network credentials; swap for `HttpContactTagClient` in
/// production wiring.
#[derive(Default)]
pub(crate) struct InMemoryTagClient {
    contacts: Mutex<HashMap<String, String>>,
    tags: Mutex<HashMap<String, Vec<String>>>,
}

impl InMemoryTagClient {
    pub(crate) fn tags_for_email(&self, email: &str) -> Vec<String> {
        let contacts = self.contacts.lock().expect("contact mutex poisoned");
        let Some(contact) = contacts.get(email) else {
            return Vec::new();
        };
        self.tags
            .lock()
            .expect("tag mutex poisoned")
            .get(contact)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ContactTagClient for InMemoryTagClient {
    async fn find_or_create_contact(&self, email: &str) -> Result<ContactId, TagServiceError> {
        let mut contacts = self.contacts.lock().expect("contact mutex poisoned");
        let next = format!("contact-{}", contacts.len() + 1);
        let id = contacts.entry(email.to_string()).or_insert(next).clone();
        Ok(ContactId(id))
    }

    async fn apply_tag(&self, contact: &ContactId, tag: &str) -> Result<(), TagServiceError> {
        let mut tags = self.tags.lock().expect("tag mutex poisoned");
        let entry = tags.entry(contact.0.clone()).or_default();
        if !entry.iter().any(|existing| existing == tag) {
            entry.push(tag.to_string());
        }
        Ok(())
    }

    async fn remove_tag(&self, contact: &ContactId, tag: &str) -> Result<(), TagServiceError> {
        let mut tags = self.tags.lock().expect("tag mutex poisoned");
        if let Some(entry) = tags.get_mut(&contact.0) {
            entry.retain(|existing| existing != tag);
        }
        Ok(())
    }

    async fn list_tags(&self, contact: &ContactId) -> Result<Vec<RemoteTag>, TagServiceError> {
        let tags = self.tags.lock().expect("tag mutex poisoned");
        Ok(tags
            .get(&contact.0)
            .map(|entry| {
                entry
                    .iter()
                    .enumerate()
                    .map(|(index, name)| RemoteTag {
                        id: format!("tag-{index}"),
                        name: name.clone(),
                        applied_at: None,
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub(crate) struct InMemoryTagStateRepository {
    states: Mutex<HashMap<String, ContactTagState>>,
}

impl TagStateRepository for InMemoryTagStateRepository {
    fn fetch(&self, contact: &ContactId) -> Result<Option<ContactTagState>, RepositoryError> {
        Ok(self
            .states
            .lock()
            .expect("mirror mutex poisoned")
            .get(&contact.0)
            .cloned())
    }

    fn upsert(&self, state: ContactTagState) -> Result<(), RepositoryError> {
        self.states
            .lock()
            .expect("mirror mutex poisoned")
            .insert(state.contact_id.0.clone(), state);
        Ok(())
    }

    fn purge_stale(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut states = self.states.lock().expect("mirror mutex poisoned");
        let before = states.len();
        states.retain(|_, state| state.refreshed_at >= cutoff);
        Ok(before - states.len())
    }
}

pub(crate) type AppEngine = EngagementRuleEngine<
    InMemoryCourseRepository,
    InMemoryRecipientRepository,
    InMemoryEventRepository,
    InMemoryRuleRepository,
    InMemoryHistoryRepository,
    InMemoryTagClient,
    InMemoryTagStateRepository,
>;

pub(crate) type AppOrchestrator =
    TagOrchestrator<InMemoryTagClient, InMemoryHistoryRepository, InMemoryTagStateRepository>;

/// Fully wired engine plus handles to every in-memory collaborator so the
/// CLI demo and tests can seed and inspect state.
pub(crate) struct EngineInfra {
    pub(crate) courses: Arc<InMemoryCourseRepository>,
    pub(crate) recipients: Arc<InMemoryRecipientRepository>,
    pub(crate) events: Arc<InMemoryEventRepository>,
    pub(crate) rules: Arc<InMemoryRuleRepository>,
    pub(crate) history: Arc<InMemoryHistoryRepository>,
    pub(crate) tag_client: Arc<InMemoryTagClient>,
    pub(crate) orchestrator: AppOrchestrator,
    pub(crate) engine: Arc<AppEngine>,
}

pub(crate) fn build_engine(settings: &EngineSettings) -> EngineInfra {
    let courses = Arc::new(InMemoryCourseRepository::default());
    let recipients = Arc::new(InMemoryRecipientRepository::default());
    let events = Arc::new(InMemoryEventRepository::default());
    let rules = Arc::new(InMemoryRuleRepository::default());
    let history = Arc::new(InMemoryHistoryRepository::default());
    let tag_client = Arc::new(InMemoryTagClient::default());
    let mirror = Arc::new(InMemoryTagStateRepository::default());

    let orchestrator = TagOrchestrator::new(
        tag_client.clone(),
        CommunicationLog::new(history.clone()),
        mirror,
        settings.retry_policy(),
    );
    let engine = Arc::new(EngagementRuleEngine::new(
        courses.clone(),
        recipients.clone(),
        events.clone(),
        rules.clone(),
        history.clone(),
        orchestrator.clone(),
        settings.cooldown_policy(),
    ));

    EngineInfra {
        courses,
        recipients,
        events,
        rules,
        history,
        tag_client,
        orchestrator,
        engine,
    }
}
