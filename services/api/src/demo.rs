use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{Duration, Utc};
use clap::Args;

use crate::infra::{build_engine, EngineInfra};
use engage_ai::config::EngineSettings;
use engage_ai::error::AppError;
use engage_ai::workflows::activity::ActivityImporter;
use engage_ai::workflows::engagement::{
    Condition, ConditionLogic, ConditionOperator, ConditionUnit, Course, CourseId, CourseProgress,
    EngagementEvent, EngagementEventKind, PlatformOrigin, Recipient, RecipientId,
    RecipientRepository, Rule, RuleActionSet, RuleCategory, RuleId, SimpleCondition, SweepSummary,
    TrackingConfig, TrackingMode,
};

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Optional platform activity CSV export to hydrate recipients and events
    #[arg(long)]
    pub(crate) activity_csv: Option<PathBuf>,
    /// Include the full communication history in the output
    #[arg(long)]
    pub(crate) list_history: bool,
}

pub(crate) async fn run_sweep_demo(args: SweepArgs) -> Result<(), AppError> {
    let settings = EngineSettings::default();
    let infra = build_engine(&settings);

    seed_courses(&infra);
    seed_rules(&infra);

    let imported = match &args.activity_csv {
        Some(path) => {
            seed_from_export(&infra, path)?;
            true
        }
        None => {
            seed_sample_population(&infra);
            false
        }
    };

    let summary = infra.engine.run_sweep().await?;

    render_summary(&infra, &summary, imported, args.list_history);

    let purged = infra
        .orchestrator
        .purge_stale_mirrors(Utc::now() - settings.mirror_retention())?;
    if purged > 0 {
        println!("\nPurged {purged} stale mirror state(s)");
    }

    Ok(())
}

fn seed_courses(infra: &EngineInfra) {
    infra.courses.insert(Course {
        id: CourseId("ogi".to_string()),
        code: "OGI".to_string(),
        name: "Orquestra Geral de Imersão".to_string(),
        tracking_mode: TrackingMode::LoginBased,
        tracking_config: TrackingConfig::default(),
    });
    infra.courses.insert(Course {
        id: CourseId("cem".to_string()),
        code: "CEM".to_string(),
        name: "Curso de Escrita Mensal".to_string(),
        tracking_mode: TrackingMode::ActionBased,
        tracking_config: TrackingConfig::default(),
    });
}

fn simple(field: &str, operator: ConditionOperator, value: f64) -> Condition {
    Condition::Simple(SimpleCondition {
        field: field.to_string(),
        operator,
        value,
        unit: ConditionUnit::Days,
    })
}

fn seed_rules(infra: &EngineInfra) {
    let ogi = CourseId("ogi".to_string());
    let cem = CourseId("cem".to_string());

    infra.rules.insert(Rule {
        id: RuleId("ogi-inactive-21".to_string()),
        course_id: ogi.clone(),
        name: "Inatividade 21 dias".to_string(),
        description: "Três semanas sem login".to_string(),
        category: RuleCategory::Inactivity,
        priority: 9,
        is_active: true,
        last_executed_at: None,
        conditions: vec![simple(
            "daysSinceLastLogin",
            ConditionOperator::OlderThan,
            20.0,
        )],
        actions: RuleActionSet {
            add_tag: "Inativo 21d".to_string(),
            remove_tags: vec!["Inativo 7d".to_string()],
            external_automation_id: None,
        },
        created_by: "demo".to_string(),
    });

    infra.rules.insert(Rule {
        id: RuleId("ogi-reactivated".to_string()),
        course_id: ogi.clone(),
        name: "Reativação".to_string(),
        description: "Voltou a acessar com progresso registrado".to_string(),
        category: RuleCategory::Engagement,
        priority: 8,
        is_active: true,
        last_executed_at: None,
        conditions: vec![Condition::Compound {
            logic: ConditionLogic::All,
            sub_conditions: vec![
                SimpleCondition {
                    field: "daysSinceLastLogin".to_string(),
                    operator: ConditionOperator::NewerThan,
                    value: 2.0,
                    unit: ConditionUnit::Days,
                },
                SimpleCondition {
                    field: "currentProgressPercent".to_string(),
                    operator: ConditionOperator::OlderThan,
                    value: 0.0,
                    unit: ConditionUnit::Percent,
                },
            ],
        }],
        actions: RuleActionSet {
            add_tag: "Ativo".to_string(),
            remove_tags: vec!["Inativo 7d".to_string(), "Inativo 21d".to_string()],
            external_automation_id: None,
        },
        created_by: "demo".to_string(),
    });

    infra.rules.insert(Rule {
        id: RuleId("ogi-inactive-7".to_string()),
        course_id: ogi,
        name: "Inatividade 7 dias".to_string(),
        description: "Uma semana sem login".to_string(),
        category: RuleCategory::Inactivity,
        priority: 6,
        is_active: true,
        last_executed_at: None,
        conditions: vec![simple(
            "daysSinceLastLogin",
            ConditionOperator::OlderThan,
            7.0,
        )],
        actions: RuleActionSet {
            add_tag: "Inativo 7d".to_string(),
            remove_tags: Vec::new(),
            external_automation_id: None,
        },
        created_by: "demo".to_string(),
    });

    infra.rules.insert(Rule {
        id: RuleId("cem-silent-week".to_string()),
        course_id: cem,
        name: "Sem ações na semana".to_string(),
        description: "Nenhuma ação nos últimos sete dias".to_string(),
        category: RuleCategory::Inactivity,
        priority: 7,
        is_active: true,
        last_executed_at: None,
        conditions: vec![simple(
            "actionsInLastWeek",
            ConditionOperator::Equals,
            0.0,
        )],
        actions: RuleActionSet {
            add_tag: "Sem ação 7d".to_string(),
            remove_tags: Vec::new(),
            external_automation_id: None,
        },
        created_by: "demo".to_string(),
    });
}

fn seed_from_export(infra: &EngineInfra, path: &PathBuf) -> Result<(), AppError> {
    let imported = ActivityImporter::from_path(path)?;

    let mut enrollments: BTreeMap<RecipientId, BTreeSet<CourseId>> = BTreeMap::new();
    for event in &imported.events {
        enrollments
            .entry(event.recipient_id.clone())
            .or_default()
            .insert(event.course_id.clone());
    }

    for recipient in imported.recipients {
        let courses = enrollments.remove(&recipient.id).unwrap_or_default();
        for course in &courses {
            infra.recipients.insert(recipient.clone(), course);
        }
    }
    for event in imported.events {
        infra.events.insert(event);
    }

    Ok(())
}

fn seed_sample_population(infra: &EngineInfra) {
    let now = Utc::now();
    let ogi = CourseId("ogi".to_string());
    let cem = CourseId("cem".to_string());

    let mut ana = sample_recipient("ana", "Ana Prado", &ogi, 42.0);
    ana.platform = PlatformOrigin::Hotmart {
        buyer_code: "HTM-001".to_string(),
    };
    infra.recipients.insert(ana.clone(), &ogi);
    infra.events.insert(EngagementEvent {
        recipient_id: ana.id.clone(),
        course_id: ogi.clone(),
        kind: EngagementEventKind::Login,
        occurred_at: now - Duration::days(25),
    });

    let bruno = sample_recipient("bruno", "Bruno Sales", &ogi, 55.0);
    infra.recipients.insert(bruno.clone(), &ogi);
    infra.events.insert(EngagementEvent {
        recipient_id: bruno.id.clone(),
        course_id: ogi.clone(),
        kind: EngagementEventKind::Login,
        occurred_at: now - Duration::hours(6),
    });

    // Carla never logged in; registration is the inactivity anchor.
    let mut carla = sample_recipient("carla", "Carla Dias", &ogi, 0.0);
    carla.registered_at = now - Duration::days(60);
    infra.recipients.insert(carla, &ogi);

    let diego = sample_recipient("diego", "Diego Luz", &cem, 15.0);
    infra.recipients.insert(diego.clone(), &cem);
    infra.events.insert(EngagementEvent {
        recipient_id: diego.id.clone(),
        course_id: cem.clone(),
        kind: EngagementEventKind::Action {
            label: "essay_submitted".to_string(),
        },
        occurred_at: now - Duration::days(12),
    });
}

fn sample_recipient(suffix: &str, name: &str, course: &CourseId, percent: f32) -> Recipient {
    let mut progress = BTreeMap::new();
    progress.insert(
        course.clone(),
        CourseProgress {
            percent_complete: percent,
            module_index: 1,
        },
    );

    Recipient {
        id: RecipientId(format!("r-{suffix}")),
        email: format!("{suffix}@example.com"),
        display_name: name.to_string(),
        platform: PlatformOrigin::CursEduca {
            member_id: format!("CE-{suffix}"),
        },
        registered_at: Utc::now() - Duration::days(180),
        progress,
    }
}

fn render_summary(infra: &EngineInfra, summary: &SweepSummary, imported: bool, list_history: bool) {
    println!("Engagement sweep demo");
    if imported {
        println!("Data source: platform activity CSV import");
    } else {
        println!("Data source: built-in sample population");
    }

    println!(
        "\nRules found: {} | executed: {} | recipients evaluated: {} | duration: {} ms",
        summary.rules_found,
        summary.rules_executed,
        summary.recipients_evaluated,
        summary.duration_ms
    );

    if summary.executions.is_empty() {
        println!("\nExecutions: none");
    } else {
        println!("\nExecutions");
        for execution in &summary.executions {
            println!(
                "- {} -> {} ({:?})",
                execution.rule_name, execution.recipient_id.0, execution.status
            );
        }
    }

    if !summary.skipped_rules.is_empty() {
        println!("\nSkipped rules");
        for skipped in &summary.skipped_rules {
            println!("- {}: {}", skipped.rule_name, skipped.reason.label());
        }
    }

    if summary.errors.is_empty() {
        println!("\nErrors: none");
    } else {
        println!("\nErrors");
        for error in &summary.errors {
            println!("- [{}] {}", error.scope, error.message);
        }
    }

    let mut tagged: BTreeSet<RecipientId> = BTreeSet::new();
    for record in infra.history.all() {
        tagged.insert(record.recipient_id.clone());
    }

    println!("\nExternal tag state");
    if tagged.is_empty() {
        println!("- no tags applied");
    }
    for recipient_id in tagged {
        let Ok(Some(recipient)) = infra.recipients.fetch(&recipient_id) else {
            continue;
        };
        let tags = infra.tag_client.tags_for_email(&recipient.email);
        if !tags.is_empty() {
            println!("- {}: {}", recipient.email, tags.join(", "));
        }
    }

    if list_history {
        println!("\nCommunication history");
        for record in infra.history.all() {
            println!(
                "- {} | {} | {} | {} | sent {}",
                record.id.0,
                record.recipient_id.0,
                record.applied_tag,
                record.status.label(),
                record.sent_at
            );
        }
    }
}
