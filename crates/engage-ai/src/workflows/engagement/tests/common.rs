use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::workflows::engagement::cooldown::CooldownPolicy;
use crate::workflows::engagement::domain::{
    CommunicationRecord, CommunicationRecordId, Condition, ConditionLogic, ConditionOperator,
    ConditionUnit, Course, CourseId, CourseProgress, EngagementEvent, EngagementEventKind,
    PlatformOrigin, Recipient, RecipientId, Rule, RuleActionSet, RuleCategory, RuleId,
    SimpleCondition, TrackingConfig, TrackingMode,
};
use crate::workflows::engagement::engine::EngagementRuleEngine;
use crate::workflows::engagement::history::CommunicationLog;
use crate::workflows::engagement::repository::{
    CommunicationHistoryRepository, CourseRepository, EngagementEventRepository,
    RecipientRepository, RepositoryError, RuleRepository,
};
use crate::workflows::tagging::{
    ContactId, ContactTagClient, ContactTagState, RemoteTag, RetryPolicy, TagOrchestrator,
    TagServiceError, TagStateRepository,
};

pub(super) fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 10, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

pub(super) fn login_course() -> Course {
    Course {
        id: CourseId("ogi".to_string()),
        code: "OGI".to_string(),
        name: "Orquestra Geral de Imersão".to_string(),
        tracking_mode: TrackingMode::LoginBased,
        tracking_config: TrackingConfig::default(),
    }
}

pub(super) fn action_course() -> Course {
    Course {
        id: CourseId("cem".to_string()),
        code: "CEM".to_string(),
        name: "Curso de Escrita Mensal".to_string(),
        tracking_mode: TrackingMode::ActionBased,
        tracking_config: TrackingConfig::default(),
    }
}

pub(super) fn recipient(suffix: &str) -> Recipient {
    Recipient {
        id: RecipientId(format!("r-{suffix}")),
        email: format!("{suffix}@example.com"),
        display_name: format!("Recipient {suffix}"),
        platform: PlatformOrigin::Hotmart {
            buyer_code: format!("HTM-{suffix}"),
        },
        registered_at: fixed_now() - Duration::days(365),
        progress: BTreeMap::new(),
    }
}

pub(super) fn recipient_with_progress(suffix: &str, course: &CourseId, percent: f32) -> Recipient {
    let mut recipient = recipient(suffix);
    recipient.progress.insert(
        course.clone(),
        CourseProgress {
            percent_complete: percent,
            module_index: 3,
        },
    );
    recipient
}

pub(super) fn simple(field: &str, operator: ConditionOperator, value: f64) -> Condition {
    Condition::Simple(SimpleCondition {
        field: field.to_string(),
        operator,
        value,
        unit: ConditionUnit::Days,
    })
}

pub(super) fn compound(logic: ConditionLogic, leaves: Vec<(&str, ConditionOperator, f64)>) -> Condition {
    Condition::Compound {
        logic,
        sub_conditions: leaves
            .into_iter()
            .map(|(field, operator, value)| SimpleCondition {
                field: field.to_string(),
                operator,
                value,
                unit: ConditionUnit::Days,
            })
            .collect(),
    }
}

pub(super) fn rule(
    id: &str,
    course: &CourseId,
    name: &str,
    priority: u8,
    conditions: Vec<Condition>,
    add_tag: &str,
) -> Rule {
    Rule {
        id: RuleId(id.to_string()),
        course_id: course.clone(),
        name: name.to_string(),
        description: String::new(),
        category: RuleCategory::Inactivity,
        priority,
        is_active: true,
        last_executed_at: None,
        conditions,
        actions: RuleActionSet {
            add_tag: add_tag.to_string(),
            remove_tags: Vec::new(),
            external_automation_id: None,
        },
        created_by: "seed".to_string(),
    }
}

#[derive(Default)]
pub(super) struct MemoryCourses {
    courses: Mutex<Vec<Course>>,
}

impl MemoryCourses {
    pub(super) fn insert(&self, course: Course) {
        self.courses.lock().expect("course mutex poisoned").push(course);
    }
}

impl CourseRepository for MemoryCourses {
    fn fetch(&self, id: &CourseId) -> Result<Option<Course>, RepositoryError> {
        let guard = self.courses.lock().expect("course mutex poisoned");
        Ok(guard.iter().find(|course| &course.id == id).cloned())
    }

    fn all(&self) -> Result<Vec<Course>, RepositoryError> {
        Ok(self.courses.lock().expect("course mutex poisoned").clone())
    }
}

#[derive(Default)]
pub(super) struct MemoryRecipients {
    records: Mutex<Vec<Recipient>>,
    enrollments: Mutex<HashMap<CourseId, Vec<RecipientId>>>,
}

impl MemoryRecipients {
    pub(super) fn insert(&self, recipient: Recipient, course: &CourseId) {
        self.enrollments
            .lock()
            .expect("enrollment mutex poisoned")
            .entry(course.clone())
            .or_default()
            .push(recipient.id.clone());
        self.records
            .lock()
            .expect("recipient mutex poisoned")
            .push(recipient);
    }
}

impl RecipientRepository for MemoryRecipients {
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
pub(super) struct MemoryEvents {
    events: Mutex<Vec<EngagementEvent>>,
    failing_recipients: Mutex<HashSet<RecipientId>>,
}

impl MemoryEvents {
    pub(super) fn insert(&self, event: EngagementEvent) {
        self.events.lock().expect("event mutex poisoned").push(event);
    }

    pub(super) fn login(&self, recipient: &RecipientId, course: &CourseId, at: DateTime<Utc>) {
        self.insert(EngagementEvent {
            recipient_id: recipient.clone(),
            course_id: course.clone(),
            kind: EngagementEventKind::Login,
            occurred_at: at,
        });
    }

    pub(super) fn action(&self, recipient: &RecipientId, course: &CourseId, at: DateTime<Utc>) {
        self.insert(EngagementEvent {
            recipient_id: recipient.clone(),
            course_id: course.clone(),
            kind: EngagementEventKind::Action {
                label: "lesson_completed".to_string(),
            },
            occurred_at: at,
        });
    }

    pub(super) fn fail_for(&self, recipient: &RecipientId) {
        self.failing_recipients
            .lock()
            .expect("failure mutex poisoned")
            .insert(recipient.clone());
    }

    fn check_failure(&self, recipient: &RecipientId) -> Result<(), RepositoryError> {
        let failing = self
            .failing_recipients
            .lock()
            .expect("failure mutex poisoned");
        if failing.contains(recipient) {
            return Err(RepositoryError::Unavailable(
                "event store offline".to_string(),
            ));
        }
        Ok(())
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

impl EngagementEventRepository for MemoryEvents {
    fn last_login_at(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        self.check_failure(recipient)?;
        Ok(self.latest(recipient, course, false))
    }

    fn last_action_at(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
    ) -> Result<Option<DateTime<Utc>>, RepositoryError> {
        self.check_failure(recipient)?;
        Ok(self.latest(recipient, course, true))
    }

    fn actions_since(
        &self,
        recipient: &RecipientId,
        course: &CourseId,
        since: DateTime<Utc>,
    ) -> Result<u64, RepositoryError> {
        self.check_failure(recipient)?;
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
        self.check_failure(recipient)?;
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
pub(super) struct MemoryRules {
    rules: Mutex<Vec<Rule>>,
}

impl MemoryRules {
    pub(super) fn insert(&self, rule: Rule) {
        self.rules.lock().expect("rule mutex poisoned").push(rule);
    }

    pub(super) fn last_executed_at(&self, id: &RuleId) -> Option<DateTime<Utc>> {
        let guard = self.rules.lock().expect("rule mutex poisoned");
        guard
            .iter()
            .find(|rule| &rule.id == id)
            .and_then(|rule| rule.last_executed_at)
    }
}

impl RuleRepository for MemoryRules {
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
pub(super) struct MemoryHistory {
    records: Mutex<Vec<CommunicationRecord>>,
}

impl MemoryHistory {
    pub(super) fn insert(&self, record: CommunicationRecord) {
        self.records
            .lock()
            .expect("history mutex poisoned")
            .push(record);
    }

    pub(super) fn all(&self) -> Vec<CommunicationRecord> {
        self.records.lock().expect("history mutex poisoned").clone()
    }
}

impl CommunicationHistoryRepository for MemoryHistory {
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

#[derive(Default)]
pub(super) struct MemoryTagService {
    contacts: Mutex<HashMap<String, String>>,
    tags: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryTagService {
    pub(super) fn tags_for_email(&self, email: &str) -> Vec<String> {
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
impl ContactTagClient for MemoryTagService {
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
pub(super) struct MemoryMirror {
    states: Mutex<HashMap<String, ContactTagState>>,
}

impl MemoryMirror {
    pub(super) fn fetch_by_contact(&self, contact: &ContactId) -> Option<ContactTagState> {
        self.states
            .lock()
            .expect("mirror mutex poisoned")
            .get(&contact.0)
            .cloned()
    }
}

impl TagStateRepository for MemoryMirror {
    fn fetch(&self, contact: &ContactId) -> Result<Option<ContactTagState>, RepositoryError> {
        Ok(self.fetch_by_contact(contact))
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

pub(super) type MemoryEngine = EngagementRuleEngine<
    MemoryCourses,
    MemoryRecipients,
    MemoryEvents,
    MemoryRules,
    MemoryHistory,
    MemoryTagService,
    MemoryMirror,
>;

pub(super) struct Harness {
    pub(super) courses: Arc<MemoryCourses>,
    pub(super) recipients: Arc<MemoryRecipients>,
    pub(super) events: Arc<MemoryEvents>,
    pub(super) rules: Arc<MemoryRules>,
    pub(super) history: Arc<MemoryHistory>,
    pub(super) tags: Arc<MemoryTagService>,
    pub(super) mirror: Arc<MemoryMirror>,
    pub(super) engine: MemoryEngine,
}

pub(super) fn harness() -> Harness {
    let courses = Arc::new(MemoryCourses::default());
    let recipients = Arc::new(MemoryRecipients::default());
    let events = Arc::new(MemoryEvents::default());
    let rules = Arc::new(MemoryRules::default());
    let history = Arc::new(MemoryHistory::default());
    let tags = Arc::new(MemoryTagService::default());
    let mirror = Arc::new(MemoryMirror::default());

    let orchestrator = TagOrchestrator::new(
        tags.clone(),
        CommunicationLog::new(history.clone()),
        mirror.clone(),
        RetryPolicy::new(1, StdDuration::from_millis(1)),
    );
    let engine = EngagementRuleEngine::new(
        courses.clone(),
        recipients.clone(),
        events.clone(),
        rules.clone(),
        history.clone(),
        orchestrator,
        CooldownPolicy::default(),
    );

    Harness {
        courses,
        recipients,
        events,
        rules,
        history,
        tags,
        mirror,
        engine,
    }
}
