use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for recipients (learners) under evaluation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecipientId(pub String);

/// Identifier wrapper for courses; a course doubles as the marketable product.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CourseId(pub String);

/// Identifier wrapper for lifecycle rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleId(pub String);

/// Identifier wrapper for communication audit records.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommunicationRecordId(pub String);

/// How a course measures engagement, deciding which statistic fields its
/// rules may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrackingMode {
    LoginBased,
    ActionBased,
}

impl TrackingMode {
    pub const fn label(self) -> &'static str {
        match self {
            TrackingMode::LoginBased => "login_based",
            TrackingMode::ActionBased => "action_based",
        }
    }
}

/// Per-course overrides for the engine's cooldown defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_cooldown_hours: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_cooldown_days: Option<i64>,
}

/// Course configuration consumed by the engine; `code` is the tag prefix
/// used when synchronizing with the external contact-tagging service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub code: String,
    pub name: String,
    pub tracking_mode: TrackingMode,
    #[serde(default)]
    pub tracking_config: TrackingConfig,
}

/// Which platform produced a recipient's data, resolved once at ingestion
/// time rather than re-derived from record shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "camelCase")]
pub enum PlatformOrigin {
    Hotmart { buyer_code: String },
    CursEduca { member_id: String },
    Unknown,
}

/// Progress snapshot a recipient has reached within one course.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CourseProgress {
    pub percent_complete: f32,
    pub module_index: u32,
}

/// A learner being evaluated for tag changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: RecipientId,
    pub email: String,
    pub display_name: String,
    pub platform: PlatformOrigin,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub progress: BTreeMap<CourseId, CourseProgress>,
}

/// Raw engagement signal emitted by a course platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub recipient_id: RecipientId,
    pub course_id: CourseId,
    pub kind: EngagementEventKind,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EngagementEventKind {
    Login,
    Action { label: String },
}

impl EngagementEventKind {
    pub const fn is_action(&self) -> bool {
        matches!(self, EngagementEventKind::Action { .. })
    }
}

/// Marketing intent behind a rule, used for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RuleCategory {
    Inactivity,
    Engagement,
    Progress,
    Completion,
}

impl RuleCategory {
    pub const fn label(self) -> &'static str {
        match self {
            RuleCategory::Inactivity => "inactivity",
            RuleCategory::Engagement => "engagement",
            RuleCategory::Progress => "progress",
            RuleCategory::Completion => "completion",
        }
    }
}

/// Tag changes executed when a rule matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleActionSet {
    pub add_tag: String,
    #[serde(default)]
    pub remove_tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_automation_id: Option<String>,
}

/// Declarative lifecycle rule owned by a course.
///
/// `last_executed_at` is mutated only by the engine; admin edits touch the
/// remaining fields. Deactivated rules stay in storage because history
/// records reference them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: RuleId,
    pub course_id: CourseId,
    pub name: String,
    pub description: String,
    pub category: RuleCategory,
    pub priority: u8,
    pub is_active: bool,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub conditions: Vec<Condition>,
    pub actions: RuleActionSet,
    pub created_by: String,
}

/// Typed condition tree: either a single comparison or a one-level
/// conjunction/disjunction of comparisons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Condition {
    Simple(SimpleCondition),
    #[serde(rename_all = "camelCase")]
    Compound {
        logic: ConditionLogic,
        sub_conditions: Vec<SimpleCondition>,
    },
}

/// Leaf comparison against one statistic field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: f64,
    #[serde(default)]
    pub unit: ConditionUnit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    /// Strictly greater than; `greaterThan` is the count-flavored alias.
    #[serde(alias = "greaterThan")]
    OlderThan,
    /// Strictly less than; `lessThan` is the count-flavored alias.
    #[serde(alias = "lessThan")]
    NewerThan,
    Equals,
}

impl ConditionOperator {
    pub fn matches(self, actual: f64, expected: f64) -> bool {
        match self {
            ConditionOperator::OlderThan => actual > expected,
            ConditionOperator::NewerThan => actual < expected,
            ConditionOperator::Equals => (actual - expected).abs() < f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionLogic {
    #[serde(rename = "and", alias = "all")]
    All,
    #[serde(rename = "or", alias = "any")]
    Any,
}

/// Unit attached to a condition's comparison value. Statistics are
/// day-granular, so `weeks` scales the value and the rest are descriptive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionUnit {
    #[default]
    Days,
    Weeks,
    Percent,
    Count,
}

impl ConditionUnit {
    pub fn scaled(self, value: f64) -> f64 {
        match self {
            ConditionUnit::Weeks => value * 7.0,
            ConditionUnit::Days | ConditionUnit::Percent | ConditionUnit::Count => value,
        }
    }
}

/// Flat, mode-appropriate statistic set computed per (recipient, course)
/// evaluation. Never persisted except as an audit snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticBag {
    pub days_since_last_login: Option<i64>,
    pub days_since_last_action: Option<i64>,
    pub actions_in_last_week: Option<u64>,
    pub actions_in_last_month: Option<u64>,
    pub total_actions: Option<u64>,
    pub current_progress_percent: Option<f32>,
    pub current_module_index: Option<u32>,
}

/// Delivery lifecycle of one outbound communication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Opened,
    Clicked,
    Bounced,
    Unsubscribed,
}

impl DeliveryStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Opened => "opened",
            DeliveryStatus::Clicked => "clicked",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Unsubscribed => "unsubscribed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Bounced | DeliveryStatus::Unsubscribed)
    }

    const fn rank(self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Delivered => 2,
            DeliveryStatus::Opened => 3,
            DeliveryStatus::Clicked => 4,
            DeliveryStatus::Bounced | DeliveryStatus::Unsubscribed => 5,
        }
    }

    /// Forward-only transitions; provider events may skip intermediate
    /// states but never rewind, and terminal states accept nothing.
    pub fn can_advance_to(self, next: DeliveryStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        next.rank() > self.rank()
    }
}

/// Final classification of how a communication played out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CommunicationOutcome {
    Success,
    NoResponse,
    Escalated,
    Bounced,
    Unsubscribed,
}

/// Whether a record originated from a sweep or an operator action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordSource {
    Automatic,
    Manual,
}

/// Append-only audit record: one per executed rule-match. Later events
/// (opens, clicks, re-engagement) update the same record in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunicationRecord {
    pub id: CommunicationRecordId,
    pub recipient_id: RecipientId,
    pub course_id: CourseId,
    pub rule_id: Option<RuleId>,
    pub applied_tag: String,
    pub status: DeliveryStatus,
    pub sent_at: DateTime<Utc>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub snapshot: StatisticBag,
    pub outcome: Option<CommunicationOutcome>,
    pub source: RecordSource,
}
