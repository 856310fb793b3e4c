//! Engagement rule evaluation: statistics normalization, condition
//! evaluation, cooldown guards, the sweep engine, and the communication
//! audit log.

pub mod cooldown;
pub mod domain;
pub mod engine;
pub mod evaluation;
pub mod history;
pub mod repository;
pub mod router;
pub mod statistics;

#[cfg(test)]
mod tests;

pub use cooldown::CooldownPolicy;
pub use domain::{
    CommunicationOutcome, CommunicationRecord, CommunicationRecordId, Condition, ConditionLogic,
    ConditionOperator, ConditionUnit, Course, CourseId, CourseProgress, DeliveryStatus,
    EngagementEvent, EngagementEventKind, PlatformOrigin, Recipient, RecipientId, RecordSource,
    Rule, RuleActionSet, RuleCategory, RuleId, SimpleCondition, StatisticBag, TrackingConfig,
    TrackingMode,
};
pub use engine::{
    EngagementRuleEngine, EngineRunError, ExecutionStatus, RuleExecutionResult, RuleRunReport,
    SkipReason, SkippedRule, SweepError, SweepSummary,
};
pub use history::{CommunicationLog, HistoryError};
pub use repository::{
    CommunicationHistoryRepository, CourseRepository, EngagementEventRepository,
    RecipientRepository, RepositoryError, RuleRepository,
};
pub use router::engagement_router;
pub use statistics::{compute_statistics, StatisticsError, NO_ACTION_SENTINEL_DAYS};
