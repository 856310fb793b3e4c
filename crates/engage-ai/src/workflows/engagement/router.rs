use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use serde_json::json;

use super::domain::{CourseId, RecipientId, RuleId};
use super::engine::{EngagementRuleEngine, EngineRunError};
use super::repository::{
    CommunicationHistoryRepository, CourseRepository, EngagementEventRepository,
    RecipientRepository, RuleRepository,
};
use crate::workflows::tagging::{ContactTagClient, TagStateRepository};

/// Router builder exposing the engine's sweep and targeted-run endpoints.
pub fn engagement_router<CO, RE, EV, RU, HI, CL, MI>(
    engine: Arc<EngagementRuleEngine<CO, RE, EV, RU, HI, CL, MI>>,
) -> Router
where
    CO: CourseRepository + 'static,
    RE: RecipientRepository + 'static,
    EV: EngagementEventRepository + 'static,
    RU: RuleRepository + 'static,
    HI: CommunicationHistoryRepository + 'static,
    CL: ContactTagClient + 'static,
    MI: TagStateRepository + 'static,
{
    Router::new()
        .route(
            "/api/v1/engagement/sweep",
            post(sweep_handler::<CO, RE, EV, RU, HI, CL, MI>),
        )
        .route(
            "/api/v1/engagement/rules/:rule_id/run",
            post(run_rule_handler::<CO, RE, EV, RU, HI, CL, MI>),
        )
        .route(
            "/api/v1/engagement/recipients/:recipient_id/courses/:course_id/evaluate",
            post(evaluate_recipient_handler::<CO, RE, EV, RU, HI, CL, MI>),
        )
        .with_state(engine)
}

pub(crate) async fn sweep_handler<CO, RE, EV, RU, HI, CL, MI>(
    State(engine): State<Arc<EngagementRuleEngine<CO, RE, EV, RU, HI, CL, MI>>>,
) -> Response
where
    CO: CourseRepository + 'static,
    RE: RecipientRepository + 'static,
    EV: EngagementEventRepository + 'static,
    RU: RuleRepository + 'static,
    HI: CommunicationHistoryRepository + 'static,
    CL: ContactTagClient + 'static,
    MI: TagStateRepository + 'static,
{
    match engine.run_sweep().await {
        Ok(summary) => (StatusCode::OK, axum::Json(summary)).into_response(),
        Err(err) => {
            let payload = json!({ "error": format!("could not resolve course list: {err}") });
            (StatusCode::INTERNAL_SERVER_ERROR, axum::Json(payload)).into_response()
        }
    }
}

pub(crate) async fn run_rule_handler<CO, RE, EV, RU, HI, CL, MI>(
    State(engine): State<Arc<EngagementRuleEngine<CO, RE, EV, RU, HI, CL, MI>>>,
    Path(rule_id): Path<String>,
) -> Response
where
    CO: CourseRepository + 'static,
    RE: RecipientRepository + 'static,
    EV: EngagementEventRepository + 'static,
    RU: RuleRepository + 'static,
    HI: CommunicationHistoryRepository + 'static,
    CL: ContactTagClient + 'static,
    MI: TagStateRepository + 'static,
{
    match engine.run_rule_manually(&RuleId(rule_id)).await {
        Ok(report) => (StatusCode::OK, axum::Json(report)).into_response(),
        Err(err) => run_error_response(err),
    }
}

pub(crate) async fn evaluate_recipient_handler<CO, RE, EV, RU, HI, CL, MI>(
    State(engine): State<Arc<EngagementRuleEngine<CO, RE, EV, RU, HI, CL, MI>>>,
    Path((recipient_id, course_id)): Path<(String, String)>,
) -> Response
where
    CO: CourseRepository + 'static,
    RE: RecipientRepository + 'static,
    EV: EngagementEventRepository + 'static,
    RU: RuleRepository + 'static,
    HI: CommunicationHistoryRepository + 'static,
    CL: ContactTagClient + 'static,
    MI: TagStateRepository + 'static,
{
    match engine
        .run_for_recipient(&RecipientId(recipient_id), &CourseId(course_id))
        .await
    {
        Ok(results) => (StatusCode::OK, axum::Json(results)).into_response(),
        Err(err) => run_error_response(err),
    }
}

fn run_error_response(err: EngineRunError) -> Response {
    let status = match &err {
        EngineRunError::UnknownCourse(_)
        | EngineRunError::UnknownRecipient(_)
        | EngineRunError::UnknownRule(_) => StatusCode::NOT_FOUND,
        EngineRunError::InactiveRule(_) => StatusCode::CONFLICT,
        EngineRunError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let payload = json!({ "error": err.to_string() });
    (status, axum::Json(payload)).into_response()
}
