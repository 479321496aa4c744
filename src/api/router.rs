//! Route handlers and router assembly.

use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::types::{AppContext, DecisionList, ServiceStatus};
use crate::config::{APP_NAME, APP_VERSION};
use crate::models::{DecisionInput, DecisionRecord, ReflectionInput};

/// Build the API router with CORS and request tracing.
pub fn api_router(ctx: AppContext, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(service_status))
        .route("/health", get(service_status))
        .route("/api/decisions", post(create_decision).get(list_decisions))
        .route("/api/decisions/:id", get(get_decision))
        .route("/api/decisions/:id/reflect", post(add_reflection))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(ctx)
}

/// `GET /` and `GET /health`: service probe.
async fn service_status() -> Json<ServiceStatus> {
    Json(ServiceStatus {
        service: APP_NAME,
        version: APP_VERSION,
        status: "operational",
    })
}

/// `POST /api/decisions`: run the full analysis pipeline and persist.
async fn create_decision(
    State(ctx): State<AppContext>,
    Json(input): Json<DecisionInput>,
) -> Result<(StatusCode, Json<DecisionRecord>), ApiError> {
    input.validate()?;
    tracing::info!(title = %input.title, "create decision request");

    let record = ctx.pipeline.process_decision(input).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// `GET /api/decisions`: summaries, newest first.
async fn list_decisions(State(ctx): State<AppContext>) -> Result<Json<DecisionList>, ApiError> {
    let decisions = ctx.store.list()?;
    Ok(Json(DecisionList { decisions }))
}

/// `GET /api/decisions/{id}`: full decision with all stage outputs.
async fn get_decision(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<DecisionRecord>, ApiError> {
    let id = parse_decision_id(&id)?;
    let record = ctx
        .store
        .find_by_id(&id)?
        .ok_or_else(|| ApiError::NotFound(format!("Decision {id} not found")))?;
    Ok(Json(record))
}

/// `POST /api/decisions/{id}/reflect`: run the deferred reflection stage.
async fn add_reflection(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Json(input): Json<ReflectionInput>,
) -> Result<Json<DecisionRecord>, ApiError> {
    let id = parse_decision_id(&id)?;
    input.validate()?;
    tracing::info!(decision_id = %id, "add reflection request");

    let record = ctx.pipeline.add_reflection(id, &input.actual_outcome).await?;
    Ok(Json(record))
}

fn parse_decision_id(raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw)
        .map_err(|_| ApiError::BadRequest(format!("'{raw}' is not a valid decision id")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GenerationConfig;
    use crate::db::SqliteDecisionStore;
    use crate::pipeline::generation::{CallError, GenerationClient, ModelCaller};
    use crate::pipeline::orchestrator::DecisionPipeline;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tower::ServiceExt;

    const STRUCTURED: &str = r#"{
        "decision_goal": "Decide whether to accept the relocation offer",
        "constraints": ["Must relocate"],
        "options": ["Accept", "Decline"],
        "assumptions": ["Current job stays stable"],
        "missing_information": ["Relocation costs"]
    }"#;

    const BIASES: &str = r#"{
        "detected_biases": ["Anchoring bias"],
        "evidence": {"Anchoring bias": "The raise dominates the framing."},
        "severity_score": 0.4
    }"#;

    const SIMULATION: &str = r#"{"scenarios": [
        {"scenario": "best_case", "description": "The move works out well within a year.", "risks": ["Burnout"], "confidence": 0.3, "timeframe_months": 12},
        {"scenario": "worst_case", "description": "The role disappoints and a new search begins.", "risks": ["Financial strain"], "confidence": 0.2, "timeframe_months": 6},
        {"scenario": "most_likely", "description": "A mixed transition that settles after some months.", "risks": ["Adjustment period"], "confidence": 0.5, "timeframe_months": 18}
    ]}"#;

    const REFLECTION: &str = r#"{
        "accuracy_score": 0.75,
        "lessons_learned": ["Research the destination city earlier"],
        "repeated_patterns": []
    }"#;

    struct ScriptedCaller {
        script: Vec<String>,
        cursor: AtomicUsize,
    }

    impl ScriptedCaller {
        fn new(script: Vec<&str>) -> Self {
            Self {
                script: script.into_iter().map(String::from).collect(),
                cursor: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelCaller for ScriptedCaller {
        async fn call(&self, _model: &str, _prompt: &str) -> Result<String, CallError> {
            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            self.script
                .get(index)
                .cloned()
                .ok_or_else(|| CallError::Other("script exhausted".to_string()))
        }
    }

    fn test_router(script: Vec<&str>) -> Router {
        let store = Arc::new(SqliteDecisionStore::open_in_memory().unwrap());
        let client = GenerationClient::new(
            Arc::new(ScriptedCaller::new(script)),
            GenerationConfig::default(),
        );
        let pipeline = DecisionPipeline::new(client, store.clone());
        api_router(AppContext::new(pipeline, store), &[])
    }

    fn valid_input_body() -> Body {
        Body::from(
            r#"{
                "title": "Relocate for new job?",
                "context": "Offer in hand with a 20% raise, requires moving cities.",
                "constraints": ["Must relocate"],
                "options": ["Accept", "Decline"]
            }"#,
        )
    }

    fn post_json(uri: &str, body: Body) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_operational() {
        let response = test_router(vec![]).oneshot(get_req("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "operational");
        assert_eq!(json["service"], "DecisionTrace");
    }

    #[tokio::test]
    async fn create_decision_returns_full_analysis() {
        let router = test_router(vec![STRUCTURED, BIASES, SIMULATION]);
        let response = router
            .oneshot(post_json("/api/decisions", valid_input_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let json = body_json(response).await;
        assert_eq!(json["title"], "Relocate for new job?");
        assert_eq!(json["execution_log"].as_array().unwrap().len(), 3);
        assert_eq!(
            json["outcome_simulation"]["scenarios"]
                .as_array()
                .unwrap()
                .len(),
            3
        );
        assert!(json["id"].as_str().is_some());
        assert!(json["reflection_insight"].is_null());
    }

    #[tokio::test]
    async fn create_decision_rejects_short_title() {
        let router = test_router(vec![]);
        let body = Body::from(r#"{"title": "Hm", "context": "Long enough context here."}"#);
        let response = router
            .oneshot(post_json("/api/decisions", body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn failed_analysis_returns_500() {
        let not_json = "no structure here";
        let router = test_router(vec![not_json, not_json, not_json, not_json]);
        let response = router
            .oneshot(post_json("/api/decisions", valid_input_body()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "ANALYSIS_FAILED");
    }

    #[tokio::test]
    async fn get_unknown_decision_returns_404() {
        let router = test_router(vec![]);
        let uri = format!("/api/decisions/{}", Uuid::new_v4());
        let response = router.oneshot(get_req(&uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn get_invalid_id_returns_400() {
        let router = test_router(vec![]);
        let response = router
            .oneshot(get_req("/api/decisions/not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_includes_created_decision() {
        let router = test_router(vec![STRUCTURED, BIASES, SIMULATION]);
        let created = router
            .clone()
            .oneshot(post_json("/api/decisions", valid_input_body()))
            .await
            .unwrap();
        assert_eq!(created.status(), StatusCode::CREATED);

        let response = router.oneshot(get_req("/api/decisions")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        let decisions = json["decisions"].as_array().unwrap();
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0]["title"], "Relocate for new job?");
        assert_eq!(decisions[0]["has_reflection"], false);
    }

    #[tokio::test]
    async fn reflect_on_unknown_decision_returns_404() {
        let router = test_router(vec![]);
        let uri = format!("/api/decisions/{}/reflect", Uuid::new_v4());
        let body = Body::from(
            r#"{"actual_outcome": "The move went through and worked out fine overall."}"#,
        );
        let response = router.oneshot(post_json(&uri, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn reflect_rejects_short_outcome() {
        let router = test_router(vec![]);
        let uri = format!("/api/decisions/{}/reflect", Uuid::new_v4());
        let body = Body::from(r#"{"actual_outcome": "fine"}"#);
        let response = router.oneshot(post_json(&uri, body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn reflect_round_trip_updates_decision() {
        let router = test_router(vec![STRUCTURED, BIASES, SIMULATION, REFLECTION]);
        let created = router
            .clone()
            .oneshot(post_json("/api/decisions", valid_input_body()))
            .await
            .unwrap();
        let created_json = body_json(created).await;
        let id = created_json["id"].as_str().unwrap().to_string();

        let uri = format!("/api/decisions/{id}/reflect");
        let body = Body::from(
            r#"{"actual_outcome": "Accepted the offer; adaptation took longer than predicted."}"#,
        );
        let response = router
            .clone()
            .oneshot(post_json(&uri, body))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["reflection_insight"]["accuracy_score"], 0.75);
        assert_eq!(json["execution_log"].as_array().unwrap().len(), 4);

        // The stored record reflects the update.
        let fetched = router
            .oneshot(get_req(&format!("/api/decisions/{id}")))
            .await
            .unwrap();
        let fetched_json = body_json(fetched).await;
        assert!(fetched_json["actual_outcome"]
            .as_str()
            .unwrap()
            .contains("Accepted"));
    }
}
