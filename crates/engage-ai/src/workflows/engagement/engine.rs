use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::cooldown::{recipient_recently_tagged, rule_cooldown_elapsed, CooldownPolicy};
use super::domain::{
    Course, CourseId, Recipient, RecipientId, RecordSource, Rule, RuleId, StatisticBag,
};
use super::evaluation::{evaluate_conditions, rule_is_compatible};
use super::history::CommunicationLog;
use super::repository::{
    CommunicationHistoryRepository, CourseRepository, EngagementEventRepository,
    RecipientRepository, RepositoryError, RuleRepository,
};
use super::statistics::{compute_statistics, StatisticsError};
use crate::workflows::tagging::{ContactTagClient, TagName, TagOrchestrator, TagStateRepository};

/// Why a (recipient, rule) pair, or a whole rule, did not execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    ConditionsNotMet,
    RuleCooldown,
    RecipientCooldown,
    IncompatibleRule,
}

impl SkipReason {
    pub const fn label(self) -> &'static str {
        match self {
            SkipReason::ConditionsNotMet => "conditions_not_met",
            SkipReason::RuleCooldown => "rule_cooldown",
            SkipReason::RecipientCooldown => "recipient_cooldown",
            SkipReason::IncompatibleRule => "incompatible_rule",
        }
    }
}

/// Terminal state of one (recipient, rule) pair.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Executed { applied_tag: String },
    Skipped { reason: SkipReason },
}

/// One pair's outcome, as returned by targeted runs and collected by sweeps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleExecutionResult {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub course_id: CourseId,
    pub recipient_id: RecipientId,
    pub status: ExecutionStatus,
}

/// A rule set aside before any recipient was evaluated against it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedRule {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub course_id: CourseId,
    pub reason: SkipReason,
}

/// Caught, non-fatal failure attributed to one unit of sweep work.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepError {
    pub scope: String,
    pub message: String,
}

impl SweepError {
    fn new(scope: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            scope: scope.into(),
            message: message.to_string(),
        }
    }
}

/// Result of one full pass across all courses, rules, and recipients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SweepSummary {
    pub rules_found: usize,
    pub rules_executed: usize,
    pub recipients_evaluated: usize,
    pub executions: Vec<RuleExecutionResult>,
    pub skipped_rules: Vec<SkippedRule>,
    pub errors: Vec<SweepError>,
    pub duration_ms: u64,
}

/// Result of running a single rule on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleRunReport {
    pub rule_id: RuleId,
    pub rule_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    pub executions: Vec<RuleExecutionResult>,
    pub errors: Vec<SweepError>,
}

/// Error for targeted engine runs where the referenced configuration could
/// not be resolved at all.
#[derive(Debug, thiserror::Error)]
pub enum EngineRunError {
    #[error("course {0} not found")]
    UnknownCourse(String),
    #[error("recipient {0} not found")]
    UnknownRecipient(String),
    #[error("rule {0} not found")]
    UnknownRule(String),
    #[error("rule {0} is inactive")]
    InactiveRule(String),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

#[derive(Default)]
struct SweepAccumulator {
    rules_found: usize,
    rules_executed: usize,
    evaluated: HashSet<RecipientId>,
    executions: Vec<RuleExecutionResult>,
    skipped_rules: Vec<SkippedRule>,
    errors: Vec<SweepError>,
}

/// Orchestrates statistics, condition evaluation, compatibility, cooldowns,
/// tag orchestration, and audit writes per (recipient, rule) pair.
///
/// Evaluation is sequential by design: the cooldown guard's read-then-write
/// pattern stays race-free without locks, at the cost of sweep latency being
/// linear in recipients times rules.
pub struct EngagementRuleEngine<CO, RE, EV, RU, HI, CL, MI> {
    courses: Arc<CO>,
    recipients: Arc<RE>,
    events: Arc<EV>,
    rules: Arc<RU>,
    history: Arc<HI>,
    log: CommunicationLog<HI>,
    orchestrator: TagOrchestrator<CL, HI, MI>,
    cooldowns: CooldownPolicy,
}

impl<CO, RE, EV, RU, HI, CL, MI> EngagementRuleEngine<CO, RE, EV, RU, HI, CL, MI>
where
    CO: CourseRepository + 'static,
    RE: RecipientRepository + 'static,
    EV: EngagementEventRepository + 'static,
    RU: RuleRepository + 'static,
    HI: CommunicationHistoryRepository + 'static,
    CL: ContactTagClient + 'static,
    MI: TagStateRepository + 'static,
{
    pub fn new(
        courses: Arc<CO>,
        recipients: Arc<RE>,
        events: Arc<EV>,
        rules: Arc<RU>,
        history: Arc<HI>,
        orchestrator: TagOrchestrator<CL, HI, MI>,
        cooldowns: CooldownPolicy,
    ) -> Self {
        let log = CommunicationLog::new(Arc::clone(&history));
        Self {
            courses,
            recipients,
            events,
            rules,
            history,
            log,
            orchestrator,
            cooldowns,
        }
    }

    /// One full pass across every course. Only an unresolvable course list
    /// is fatal; everything else accumulates into the summary.
    pub async fn run_sweep(&self) -> Result<SweepSummary, RepositoryError> {
        self.run_sweep_at(Utc::now()).await
    }

    pub async fn run_sweep_at(&self, now: DateTime<Utc>) -> Result<SweepSummary, RepositoryError> {
        let started = Instant::now();
        let courses = self.courses.all()?;

        let mut acc = SweepAccumulator::default();
        for course in &courses {
            self.sweep_course(course, now, &mut acc).await;
        }

        let summary = SweepSummary {
            rules_found: acc.rules_found,
            rules_executed: acc.rules_executed,
            recipients_evaluated: acc.evaluated.len(),
            executions: acc.executions,
            skipped_rules: acc.skipped_rules,
            errors: acc.errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        info!(
            rules_found = summary.rules_found,
            rules_executed = summary.rules_executed,
            recipients_evaluated = summary.recipients_evaluated,
            executions = summary.executions.len(),
            errors = summary.errors.len(),
            duration_ms = summary.duration_ms,
            "engagement sweep finished"
        );

        Ok(summary)
    }

    /// Evaluates and executes every active rule of one course against one
    /// recipient, returning the terminal state of each pair.
    pub async fn run_for_recipient(
        &self,
        recipient_id: &RecipientId,
        course_id: &CourseId,
    ) -> Result<Vec<RuleExecutionResult>, EngineRunError> {
        self.run_for_recipient_at(recipient_id, course_id, Utc::now())
            .await
    }

    pub async fn run_for_recipient_at(
        &self,
        recipient_id: &RecipientId,
        course_id: &CourseId,
        now: DateTime<Utc>,
    ) -> Result<Vec<RuleExecutionResult>, EngineRunError> {
        let course = self
            .courses
            .fetch(course_id)?
            .ok_or_else(|| EngineRunError::UnknownCourse(course_id.0.clone()))?;
        let recipient = self
            .recipients
            .fetch(recipient_id)?
            .ok_or_else(|| EngineRunError::UnknownRecipient(recipient_id.0.clone()))?;

        let mut rules = self.rules.active_for_course(course_id)?;
        sort_rules(&mut rules);

        let policy = self.cooldowns.with_overrides(&course.tracking_config);
        let bag = compute_statistics(&recipient, &course, &*self.events, now)
            .map_err(|StatisticsError::Repository(err)| EngineRunError::Repository(err))?;

        let mut results = Vec::new();
        let mut errors = Vec::new();
        for rule in &rules {
            if !rule_is_compatible(rule, course.tracking_mode) {
                results.push(pair_result(
                    rule,
                    &recipient,
                    ExecutionStatus::Skipped {
                        reason: SkipReason::IncompatibleRule,
                    },
                ));
                continue;
            }
            if !rule_cooldown_elapsed(rule, now, &policy) {
                results.push(pair_result(
                    rule,
                    &recipient,
                    ExecutionStatus::Skipped {
                        reason: SkipReason::RuleCooldown,
                    },
                ));
                continue;
            }

            if let Some(result) = self
                .evaluate_pair(
                    &course,
                    &policy,
                    rule,
                    &recipient,
                    &bag,
                    RecordSource::Manual,
                    now,
                    &mut errors,
                )
                .await
            {
                if matches!(result.status, ExecutionStatus::Executed { .. }) {
                    if let Err(err) = self.rules.record_execution(&rule.id, now) {
                        errors.push(SweepError::new(format!("rule {}", rule.id.0), err));
                    }
                }
                results.push(result);
            }
        }

        for error in &errors {
            warn!(scope = %error.scope, "targeted evaluation error: {}", error.message);
        }

        Ok(results)
    }

    /// Runs one rule across its course's recipients on demand.
    pub async fn run_rule_manually(
        &self,
        rule_id: &RuleId,
    ) -> Result<RuleRunReport, EngineRunError> {
        self.run_rule_manually_at(rule_id, Utc::now()).await
    }

    pub async fn run_rule_manually_at(
        &self,
        rule_id: &RuleId,
        now: DateTime<Utc>,
    ) -> Result<RuleRunReport, EngineRunError> {
        let rule = self
            .rules
            .fetch(rule_id)?
            .ok_or_else(|| EngineRunError::UnknownRule(rule_id.0.clone()))?;
        if !rule.is_active {
            return Err(EngineRunError::InactiveRule(rule_id.0.clone()));
        }

        let course = self
            .courses
            .fetch(&rule.course_id)?
            .ok_or_else(|| EngineRunError::UnknownCourse(rule.course_id.0.clone()))?;
        let policy = self.cooldowns.with_overrides(&course.tracking_config);

        let mut report = RuleRunReport {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            skipped: None,
            executions: Vec::new(),
            errors: Vec::new(),
        };

        if !rule_is_compatible(&rule, course.tracking_mode) {
            report.skipped = Some(SkipReason::IncompatibleRule);
            return Ok(report);
        }
        if !rule_cooldown_elapsed(&rule, now, &policy) {
            report.skipped = Some(SkipReason::RuleCooldown);
            return Ok(report);
        }

        let recipients = self.recipients.enrolled_in(&course.id)?;
        let mut stats = HashMap::new();
        let mut executed_any = false;

        for recipient in &recipients {
            let Some(bag) =
                self.statistics_for(recipient, &course, &mut stats, now, &mut report.errors)
            else {
                continue;
            };

            if let Some(result) = self
                .evaluate_pair(
                    &course,
                    &policy,
                    &rule,
                    recipient,
                    &bag,
                    RecordSource::Manual,
                    now,
                    &mut report.errors,
                )
                .await
            {
                if matches!(result.status, ExecutionStatus::Executed { .. }) {
                    executed_any = true;
                    report.executions.push(result);
                }
            }
        }

        if executed_any {
            if let Err(err) = self.rules.record_execution(&rule.id, now) {
                report
                    .errors
                    .push(SweepError::new(format!("rule {}", rule.id.0), err));
            }
        }

        Ok(report)
    }

    async fn sweep_course(&self, course: &Course, now: DateTime<Utc>, acc: &mut SweepAccumulator) {
        let mut rules = match self.rules.active_for_course(&course.id) {
            Ok(rules) => rules,
            Err(err) => {
                acc.errors
                    .push(SweepError::new(format!("course {}", course.id.0), err));
                return;
            }
        };
        sort_rules(&mut rules);
        acc.rules_found += rules.len();

        let recipients = match self.recipients.enrolled_in(&course.id) {
            Ok(recipients) => recipients,
            Err(err) => {
                acc.errors
                    .push(SweepError::new(format!("course {}", course.id.0), err));
                return;
            }
        };

        let policy = self.cooldowns.with_overrides(&course.tracking_config);
        // Statistics are computed once per recipient; later rules observe
        // the same pre-sweep view, so ordering affects execution order only.
        let mut stats: HashMap<RecipientId, Option<StatisticBag>> = HashMap::new();

        for rule in &rules {
            if !rule_is_compatible(rule, course.tracking_mode) {
                warn!(
                    rule = %rule.id.0,
                    course = %course.id.0,
                    "rule references statistic fields incompatible with the course tracking mode; skipping"
                );
                acc.skipped_rules.push(SkippedRule {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    course_id: course.id.clone(),
                    reason: SkipReason::IncompatibleRule,
                });
                continue;
            }
            if !rule_cooldown_elapsed(rule, now, &policy) {
                acc.skipped_rules.push(SkippedRule {
                    rule_id: rule.id.clone(),
                    rule_name: rule.name.clone(),
                    course_id: course.id.clone(),
                    reason: SkipReason::RuleCooldown,
                });
                continue;
            }

            let mut executed_any = false;
            for recipient in &recipients {
                let Some(bag) =
                    self.statistics_for(recipient, course, &mut stats, now, &mut acc.errors)
                else {
                    continue;
                };
                acc.evaluated.insert(recipient.id.clone());

                if let Some(result) = self
                    .evaluate_pair(
                        course,
                        &policy,
                        rule,
                        recipient,
                        &bag,
                        RecordSource::Automatic,
                        now,
                        &mut acc.errors,
                    )
                    .await
                {
                    if matches!(result.status, ExecutionStatus::Executed { .. }) {
                        executed_any = true;
                        acc.executions.push(result);
                    }
                }
            }

            // One timestamp bump per rule per sweep, not one per recipient.
            if executed_any {
                acc.rules_executed += 1;
                if let Err(err) = self.rules.record_execution(&rule.id, now) {
                    acc.errors
                        .push(SweepError::new(format!("rule {}", rule.id.0), err));
                }
            }
        }
    }

    fn statistics_for(
        &self,
        recipient: &Recipient,
        course: &Course,
        cache: &mut HashMap<RecipientId, Option<StatisticBag>>,
        now: DateTime<Utc>,
        errors: &mut Vec<SweepError>,
    ) -> Option<StatisticBag> {
        if let Some(cached) = cache.get(&recipient.id) {
            return cached.clone();
        }

        let computed = match compute_statistics(recipient, course, &*self.events, now) {
            Ok(bag) => Some(bag),
            Err(err) => {
                errors.push(SweepError::new(
                    format!("recipient {}", recipient.id.0),
                    err,
                ));
                None
            }
        };
        cache.insert(recipient.id.clone(), computed.clone());
        computed
    }

    #[allow(clippy::too_many_arguments)]
    async fn evaluate_pair(
        &self,
        course: &Course,
        policy: &CooldownPolicy,
        rule: &Rule,
        recipient: &Recipient,
        bag: &StatisticBag,
        source: RecordSource,
        now: DateTime<Utc>,
        errors: &mut Vec<SweepError>,
    ) -> Option<RuleExecutionResult> {
        if !evaluate_conditions(&rule.conditions, course.tracking_mode, bag) {
            return Some(pair_result(
                rule,
                recipient,
                ExecutionStatus::Skipped {
                    reason: SkipReason::ConditionsNotMet,
                },
            ));
        }

        let tag = TagName::normalize(&rule.actions.add_tag, &course.code);
        match recipient_recently_tagged(
            &*self.history,
            &recipient.id,
            &course.id,
            tag.full(),
            now,
            policy,
        ) {
            Ok(true) => {
                return Some(pair_result(
                    rule,
                    recipient,
                    ExecutionStatus::Skipped {
                        reason: SkipReason::RecipientCooldown,
                    },
                ))
            }
            Ok(false) => {}
            Err(err) => {
                errors.push(SweepError::new(pair_scope(rule, recipient), err));
                return None;
            }
        }

        self.execute_match(course, rule, recipient, bag, source, now, errors)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_match(
        &self,
        course: &Course,
        rule: &Rule,
        recipient: &Recipient,
        bag: &StatisticBag,
        source: RecordSource,
        now: DateTime<Utc>,
        errors: &mut Vec<SweepError>,
    ) -> Option<RuleExecutionResult> {
        // Removals first so a reactivation rule clears its inactivity tags
        // before stamping the new state.
        for tag in &rule.actions.remove_tags {
            match self.orchestrator.remove(recipient, course, tag, now).await {
                Ok(removal) => {
                    for warning in &removal.warnings {
                        warn!(scope = %pair_scope(rule, recipient), "{warning}");
                    }
                }
                Err(err) => {
                    errors.push(SweepError::new(
                        pair_scope(rule, recipient),
                        format!("removing tag '{tag}': {err}"),
                    ));
                }
            }
        }

        let application = match self
            .orchestrator
            .apply(recipient, course, &rule.actions.add_tag, source, now)
            .await
        {
            Ok(application) => application,
            Err(err) => {
                errors.push(SweepError::new(
                    pair_scope(rule, recipient),
                    format!("applying tag '{}': {err}", rule.actions.add_tag),
                ));
                return None;
            }
        };

        for warning in &application.warnings {
            warn!(scope = %pair_scope(rule, recipient), "{warning}");
        }

        // The tag already took external effect; losing the audit row must
        // not roll it back.
        if let Err(err) = self.log.record_application(
            &recipient.id,
            &course.id,
            Some(&rule.id),
            application.tag.full(),
            bag.clone(),
            source,
            now,
        ) {
            errors.push(SweepError::new(
                pair_scope(rule, recipient),
                format!("audit write failed: {err}"),
            ));
        }

        Some(pair_result(
            rule,
            recipient,
            ExecutionStatus::Executed {
                applied_tag: application.tag.full().to_string(),
            },
        ))
    }
}

/// Descending priority, ties broken by name for deterministic audit order.
fn sort_rules(rules: &mut [Rule]) {
    rules.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
}

fn pair_result(rule: &Rule, recipient: &Recipient, status: ExecutionStatus) -> RuleExecutionResult {
    RuleExecutionResult {
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        course_id: rule.course_id.clone(),
        recipient_id: recipient.id.clone(),
        status,
    }
}

fn pair_scope(rule: &Rule, recipient: &Recipient) -> String {
    format!("rule {} recipient {}", rule.id.0, recipient.id.0)
}
