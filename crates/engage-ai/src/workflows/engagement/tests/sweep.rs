use chrono::Duration;

use super::common::*;
use crate::workflows::engagement::domain::{
    ConditionLogic, ConditionOperator, CourseId, DeliveryStatus, RecipientId, RecordSource,
    RuleId,
};
use crate::workflows::engagement::engine::{EngineRunError, ExecutionStatus, SkipReason};

fn inactivity_rule(course: &CourseId) -> crate::workflows::engagement::domain::Rule {
    rule(
        "rule-inactive-21",
        course,
        "Inatividade 21 dias",
        9,
        vec![simple(
            "daysSinceLastLogin",
            ConditionOperator::OlderThan,
            20.0,
        )],
        "Inativo 21d",
    )
}

#[tokio::test]
async fn matching_rule_applies_tag_and_audits_once() {
    let harness = harness();
    let course = login_course();
    let learner = recipient("ana");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness
        .events
        .login(&learner.id, &course.id, now - Duration::days(21));
    harness.rules.insert(inactivity_rule(&course.id));

    let summary = harness.engine.run_sweep_at(now).await.expect("sweep runs");

    assert_eq!(summary.rules_found, 1);
    assert_eq!(summary.rules_executed, 1);
    assert_eq!(summary.recipients_evaluated, 1);
    assert_eq!(summary.executions.len(), 1);
    assert!(summary.errors.is_empty());

    match &summary.executions[0].status {
        ExecutionStatus::Executed { applied_tag } => assert_eq!(applied_tag, "OGI_Inativo_21d"),
        other => panic!("expected executed status, got {other:?}"),
    }

    // The external service receives the raw form; the prefix is its job.
    assert_eq!(
        harness.tags.tags_for_email(&learner.email),
        vec!["Inativo 21d".to_string()]
    );

    let records = harness.history.all();
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.applied_tag, "OGI_Inativo_21d");
    assert_eq!(record.status, DeliveryStatus::Sent);
    assert_eq!(record.source, RecordSource::Automatic);
    assert_eq!(record.rule_id, Some(RuleId("rule-inactive-21".to_string())));
    assert_eq!(record.snapshot.days_since_last_login, Some(21));

    assert_eq!(
        harness.rules.last_executed_at(&RuleId("rule-inactive-21".to_string())),
        Some(now)
    );
}

#[tokio::test]
async fn resweeping_is_blocked_by_the_recipient_cooldown() {
    let harness = harness();
    let course = login_course();
    let learner = recipient("ana");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness
        .events
        .login(&learner.id, &course.id, now - Duration::days(21));
    harness.rules.insert(inactivity_rule(&course.id));

    let first = harness.engine.run_sweep_at(now).await.expect("first sweep");
    assert_eq!(first.executions.len(), 1);

    // Two hours later the rule-level cooldown has elapsed but the
    // recipient-level one still holds.
    let second = harness
        .engine
        .run_sweep_at(now + Duration::hours(2))
        .await
        .expect("second sweep");

    assert_eq!(second.executions.len(), 0);
    assert_eq!(second.rules_executed, 0);
    assert!(second.errors.is_empty());
    assert_eq!(harness.tags.tags_for_email(&learner.email).len(), 1);
    assert_eq!(harness.history.all().len(), 1);
}

#[tokio::test]
async fn immediate_resweep_is_blocked_by_the_rule_cooldown() {
    let harness = harness();
    let course = login_course();
    let learner = recipient("ana");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness
        .events
        .login(&learner.id, &course.id, now - Duration::days(21));
    harness.rules.insert(inactivity_rule(&course.id));

    harness.engine.run_sweep_at(now).await.expect("first sweep");
    let second = harness
        .engine
        .run_sweep_at(now + Duration::minutes(10))
        .await
        .expect("second sweep");

    assert!(second.executions.is_empty());
    assert_eq!(second.skipped_rules.len(), 1);
    assert_eq!(second.skipped_rules[0].reason, SkipReason::RuleCooldown);
}

#[tokio::test]
async fn rules_execute_in_descending_priority_with_stable_name_ties() {
    let harness = harness();
    let course = login_course();
    let learner = recipient("ana");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness
        .events
        .login(&learner.id, &course.id, now - Duration::days(21));

    let matching = vec![simple(
        "daysSinceLastLogin",
        ConditionOperator::OlderThan,
        5.0,
    )];
    harness.rules.insert(rule(
        "rule-low",
        &course.id,
        "Baixa prioridade",
        5,
        matching.clone(),
        "Alerta brando",
    ));
    harness.rules.insert(rule(
        "rule-high",
        &course.id,
        "Alta prioridade",
        9,
        matching.clone(),
        "Alerta firme",
    ));
    harness.rules.insert(rule(
        "rule-tie",
        &course.id,
        "Baixa chamada",
        5,
        matching,
        "Alerta médio",
    ));

    let summary = harness.engine.run_sweep_at(now).await.expect("sweep runs");

    let order: Vec<&str> = summary
        .executions
        .iter()
        .map(|execution| execution.rule_id.0.as_str())
        .collect();
    assert_eq!(order, vec!["rule-high", "rule-tie", "rule-low"]);

    // Audit order follows execution order.
    let audited: Vec<String> = harness
        .history
        .all()
        .iter()
        .map(|record| record.applied_tag.clone())
        .collect();
    assert_eq!(
        audited,
        vec!["OGI_Alerta_firme", "OGI_Alerta_médio", "OGI_Alerta_brando"]
    );
}

#[tokio::test]
async fn incompatible_rules_are_skipped_without_recipient_work() {
    let harness = harness();
    let course = login_course();
    let learner = recipient("ana");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness.rules.insert(rule(
        "rule-wrong-mode",
        &course.id,
        "Relatórios semanais",
        8,
        vec![simple(
            "reportsOpenedLastWeek",
            ConditionOperator::OlderThan,
            1.0,
        )],
        "Sem relatório",
    ));

    let summary = harness.engine.run_sweep_at(now).await.expect("sweep runs");

    assert_eq!(summary.rules_found, 1);
    assert!(summary.executions.is_empty());
    assert!(summary.errors.is_empty(), "skipped, not errored");
    assert_eq!(summary.recipients_evaluated, 0);
    assert_eq!(summary.skipped_rules.len(), 1);
    assert_eq!(
        summary.skipped_rules[0].reason,
        SkipReason::IncompatibleRule
    );
}

#[tokio::test]
async fn reactivation_removes_tags_and_marks_the_prior_record_successful() {
    let harness = harness();
    let course = login_course();
    let mut learner = recipient("ana");
    learner.progress.insert(
        course.id.clone(),
        crate::workflows::engagement::domain::CourseProgress {
            percent_complete: 35.0,
            module_index: 2,
        },
    );
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness
        .events
        .login(&learner.id, &course.id, now - Duration::days(21));
    harness.rules.insert(inactivity_rule(&course.id));

    let mut reactivation = rule(
        "rule-reactivated",
        &course.id,
        "Reativação",
        7,
        vec![compound(
            ConditionLogic::All,
            vec![
                ("daysSinceLastLogin", ConditionOperator::NewerThan, 2.0),
                (
                    "currentProgressPercent",
                    ConditionOperator::OlderThan,
                    0.0,
                ),
            ],
        )],
        "Ativo",
    );
    reactivation.actions.remove_tags = vec!["Inativo 21d".to_string()];
    harness.rules.insert(reactivation);

    let first = harness.engine.run_sweep_at(now).await.expect("first sweep");
    assert_eq!(first.executions.len(), 1);
    assert!(harness
        .tags
        .tags_for_email(&learner.email)
        .contains(&"Inativo 21d".to_string()));

    // Five days later the learner logs back in.
    let later = now + Duration::days(5);
    harness.events.login(&learner.id, &course.id, later);

    let second = harness
        .engine
        .run_sweep_at(later)
        .await
        .expect("second sweep");
    assert_eq!(second.executions.len(), 1);
    assert_eq!(second.executions[0].rule_id.0, "rule-reactivated");

    let tags = harness.tags.tags_for_email(&learner.email);
    assert!(!tags.contains(&"Inativo 21d".to_string()));
    assert!(tags.contains(&"Ativo".to_string()));

    // The local mirror follows the external state.
    let contact = crate::workflows::tagging::ContactId("contact-1".to_string());
    let state = harness
        .mirror
        .fetch_by_contact(&contact)
        .expect("mirror state exists");
    assert_eq!(state.tag_count, 1);
    assert_eq!(state.tags[0].name, "OGI_Ativo");

    let records = harness.history.all();
    let inactivity_record = records
        .iter()
        .find(|record| record.applied_tag == "OGI_Inativo_21d")
        .expect("inactivity record exists");
    assert_eq!(
        inactivity_record.outcome,
        Some(crate::workflows::engagement::domain::CommunicationOutcome::Success)
    );
}

#[tokio::test]
async fn one_failing_recipient_does_not_abort_the_sweep() {
    let harness = harness();
    let course = login_course();
    let healthy = recipient("ana");
    let broken = recipient("bia");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(broken.clone(), &course.id);
    harness.recipients.insert(healthy.clone(), &course.id);
    harness
        .events
        .login(&healthy.id, &course.id, now - Duration::days(21));
    harness.events.fail_for(&broken.id);
    harness.rules.insert(inactivity_rule(&course.id));

    let summary = harness.engine.run_sweep_at(now).await.expect("sweep runs");

    assert_eq!(summary.executions.len(), 1);
    assert_eq!(summary.executions[0].recipient_id, healthy.id);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].scope.contains("r-bia"));
    assert_eq!(summary.recipients_evaluated, 1);
}

#[tokio::test]
async fn targeted_runs_report_every_pair_state() {
    let harness = harness();
    let course = login_course();
    let learner = recipient("ana");
    let now = fixed_now();

    harness.courses.insert(course.clone());
    harness.recipients.insert(learner.clone(), &course.id);
    harness
        .events
        .login(&learner.id, &course.id, now - Duration::days(10));

    harness.rules.insert(inactivity_rule(&course.id));
    harness.rules.insert(rule(
        "rule-inactive-7",
        &course.id,
        "Inatividade 7 dias",
        6,
        vec![simple(
            "daysSinceLastLogin",
            ConditionOperator::OlderThan,
            7.0,
        )],
        "Inativo 7d",
    ));

    let results = harness
        .engine
        .run_for_recipient_at(&learner.id, &course.id, now)
        .await
        .expect("targeted run");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].rule_id.0, "rule-inactive-21");
    assert_eq!(
        results[0].status,
        ExecutionStatus::Skipped {
            reason: SkipReason::ConditionsNotMet
        }
    );
    match &results[1].status {
        ExecutionStatus::Executed { applied_tag } => assert_eq!(applied_tag, "OGI_Inativo_7d"),
        other => panic!("expected execution, got {other:?}"),
    }

    // Operator-triggered runs audit as manual.
    let records = harness.history.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].source, RecordSource::Manual);
}

#[tokio::test]
async fn manual_rule_runs_validate_their_target() {
    let harness = harness();
    let course = login_course();
    harness.courses.insert(course.clone());

    let missing = harness
        .engine
        .run_rule_manually(&RuleId("rule-ghost".to_string()))
        .await;
    assert!(matches!(missing, Err(EngineRunError::UnknownRule(_))));

    let mut dormant = inactivity_rule(&course.id);
    dormant.is_active = false;
    harness.rules.insert(dormant);

    let inactive = harness
        .engine
        .run_rule_manually(&RuleId("rule-inactive-21".to_string()))
        .await;
    assert!(matches!(inactive, Err(EngineRunError::InactiveRule(_))));
}

#[tokio::test]
async fn unresolvable_recipients_fail_targeted_runs() {
    let harness = harness();
    let course = login_course();
    harness.courses.insert(course.clone());

    let result = harness
        .engine
        .run_for_recipient_at(&RecipientId("r-ghost".to_string()), &course.id, fixed_now())
        .await;

    assert!(matches!(result, Err(EngineRunError::UnknownRecipient(_))));
}
