//! The HTTP facade.
//!
//! Thin handlers over the batch coordinator and job manager: parse and
//! validate input, thread the correlation id, map failures onto the wire
//! taxonomy. Every response carries `X-Correlation-ID`.

pub mod wire;

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{DefaultBodyLimit, Extension, Path, State};
use axum::http::{HeaderValue, Request, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::batch::BatchCoordinator;
use crate::config::Settings;
use crate::correlation::{CorrelationId, RequestContext};
use crate::error::{ErrorKind, JobError};
use crate::graph::CancelFlag;
use crate::jobs::JobManager;
use crate::registry::ProviderRegistry;
use crate::server::wire::{
    FailureEnvelope, IngestError, StatusResponse, SubmitResponse, WireItem, WireResult,
    ingest_items,
};

pub const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub registry: Arc<ProviderRegistry>,
    pub coordinator: Arc<BatchCoordinator>,
    pub manager: Arc<JobManager>,
}

/// A failure mapped onto the wire taxonomy, ready to serialize.
#[derive(Debug)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub correlation_id: CorrelationId,
}

impl ApiError {
    fn new(kind: ErrorKind, message: impl Into<String>, ctx: &RequestContext) -> Self {
        Self {
            kind,
            message: message.into(),
            correlation_id: ctx.correlation_id.clone(),
        }
    }

    fn from_job_error(error: JobError, ctx: &RequestContext) -> Self {
        let kind = match &error {
            JobError::NotFound { .. } => ErrorKind::NotFound,
            JobError::NotReady { .. } => ErrorKind::NotReady,
            JobError::Busy { .. } => ErrorKind::Busy,
            JobError::Failed { kind, .. } => *kind,
            JobError::CancelNotPermitted { .. } => ErrorKind::BadRequest,
            JobError::Store(_) => ErrorKind::Internal,
        };
        Self::new(kind, error.to_string(), ctx)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.kind.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = FailureEnvelope::new(self.kind, self.message, self.correlation_id);
        (status, Json(envelope)).into_response()
    }
}

/// Echo or generate the correlation id; stash the request context for
/// handlers; stamp the response header.
async fn correlation_middleware(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let correlation_id = req
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map(CorrelationId::from_header)
        .unwrap_or_else(CorrelationId::generate);

    req.extensions_mut()
        .insert(RequestContext::new(correlation_id.clone()));

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(correlation_id.as_str()) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Build the service router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.settings.server.max_body_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/config", get(show_config))
        .route("/evaluate", post(evaluate))
        .route("/evaluate/submit", post(submit))
        .route("/evaluate/status/{id}", get(job_status))
        .route("/evaluate/results/{id}", get(job_results))
        .route("/evaluate/cancel/{id}", post(job_cancel))
        .layer(middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Serve until ctrl-c.
pub async fn start(state: AppState) -> anyhow::Result<()> {
    let addr = format!(
        "{}:{}",
        state.settings.server.host, state.settings.server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "attestor listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

// -- Handlers --

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let usage = state.registry.usage();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "llm": {
            "provider": state.settings.llm.provider.as_str(),
            "configured": state.settings.llm.configured(),
        },
        "ocr": {
            "provider": state.settings.ocr.provider.as_str(),
            "configured": state.settings.ocr.configured(),
        },
        "usage": usage,
    }))
}

async fn show_config(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(state.settings.redacted())
}

fn parse_batch(
    payload: Result<Json<Vec<WireItem>>, JsonRejection>,
    ctx: &RequestContext,
) -> Result<Vec<WireItem>, ApiError> {
    payload
        .map(|Json(items)| items)
        .map_err(|e| ApiError::new(ErrorKind::BadRequest, e.to_string(), ctx))
}

fn map_ingest_error(error: IngestError, ctx: &RequestContext) -> ApiError {
    ApiError::new(ErrorKind::BadRequest, error.to_string(), ctx)
}

/// Synchronous evaluation, bounded by the wall-clock guard tuned below
/// typical gateway limits. On expiry the spawned batch keeps running; its
/// output is discarded and the caller is told to switch to async mode.
async fn evaluate(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<Vec<WireItem>>, JsonRejection>,
) -> Result<Json<Vec<WireResult>>, ApiError> {
    let wire = parse_batch(payload, &ctx)?;

    if wire.len() > state.settings.batch.max_sync_batch_size {
        return Err(ApiError::new(
            ErrorKind::RequestTooLarge,
            format!(
                "batch of {} exceeds maxSyncBatchSize {}",
                wire.len(),
                state.settings.batch.max_sync_batch_size
            ),
            &ctx,
        ));
    }

    let items =
        ingest_items(wire, &state.settings.evidence).map_err(|e| map_ingest_error(e, &ctx))?;

    tracing::info!(
        correlation_id = %ctx.correlation_id,
        items = items.len(),
        "synchronous evaluation started"
    );

    let coordinator = Arc::clone(&state.coordinator);
    let task_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        coordinator
            .run_batch(items, &task_ctx, &CancelFlag::new(), None, None)
            .await
    });

    match tokio::time::timeout(state.settings.batch.sync_wall_clock, handle).await {
        Ok(Ok(Ok(results))) => Ok(Json(results.into_iter().map(WireResult::from).collect())),
        Ok(Ok(Err(e))) => Err(ApiError::new(e.kind(), e.to_string(), &ctx)),
        Ok(Err(e)) => Err(ApiError::new(
            ErrorKind::Internal,
            format!("evaluation worker failed: {e}"),
            &ctx,
        )),
        Err(_) => Err(ApiError::new(
            ErrorKind::Timeout,
            format!(
                "synchronous evaluation exceeded {}s; use /evaluate/submit for large batches",
                state.settings.batch.sync_wall_clock.as_secs()
            ),
            &ctx,
        )),
    }
}

async fn submit(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    payload: Result<Json<Vec<WireItem>>, JsonRejection>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let wire = parse_batch(payload, &ctx)?;
    let items =
        ingest_items(wire, &state.settings.evidence).map_err(|e| map_ingest_error(e, &ctx))?;

    let (job_id, estimated_duration_seconds) = state
        .manager
        .submit(items, &ctx)
        .await
        .map_err(|e| ApiError::from_job_error(e, &ctx))?;

    Ok(Json(SubmitResponse {
        job_id,
        estimated_duration_seconds,
    }))
}

async fn job_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let status = state
        .manager
        .status(&id)
        .await
        .map_err(|e| ApiError::from_job_error(e, &ctx))?;
    Ok(Json(StatusResponse::from(status)))
}

async fn job_results(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<Vec<WireResult>>, ApiError> {
    let results = state
        .manager
        .results(&id)
        .await
        .map_err(|e| ApiError::from_job_error(e, &ctx))?;
    Ok(Json(results.into_iter().map(WireResult::from).collect()))
}

async fn job_cancel(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .manager
        .cancel(&id)
        .await
        .map_err(|e| ApiError::from_job_error(e, &ctx))?;
    Ok(Json(json!({ "jobId": id, "cancelRequested": true })))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::graph::{GraphRunner, RetryPolicy};
    use crate::jobs::MemoryJobStore;
    use crate::llm::{LlmProvider, MockFailure, MockLlmProvider};
    use crate::ocr::NoneOcrClient;

    use super::*;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            jitter: 0.0,
        }
    }

    /// Build a router plus its background worker and reaper.
    fn service(llm: Arc<dyn LlmProvider>, settings: Settings) -> Router {
        let registry = Arc::new(ProviderRegistry::with_clients(
            llm,
            Arc::new(NoneOcrClient),
            20,
        ));
        let runner = Arc::new(
            GraphRunner::new(registry.llm(), registry.ocr(), settings.clone())
                .with_retry_policy(fast_retry()),
        );
        let coordinator = Arc::new(BatchCoordinator::new(runner, &settings));
        let manager = Arc::new(JobManager::new(
            Arc::new(MemoryJobStore::new()),
            Arc::clone(&coordinator),
            settings.jobs.clone(),
        ));

        tokio::spawn(Arc::clone(&manager).run_worker());
        tokio::spawn(Arc::clone(&manager).run_reaper());

        router(AppState {
            settings,
            registry,
            coordinator,
            manager,
        })
    }

    fn default_service() -> Router {
        service(Arc::new(MockLlmProvider::new()), Settings::for_tests())
    }

    fn item(id: &str) -> Value {
        json!({
            "ID": id,
            "Category": "Financial close",
            "ControlDescription": "monthly reconciliation is approved",
            "TestProcedure": "inspect signed report",
        })
    }

    async fn send(
        app: &Router,
        method: &str,
        path: &str,
        body: Option<Value>,
    ) -> Response<Body> {
        let mut builder = Request::builder().method(method).uri(path);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        app.clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn body_json(response: Response<Body>) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Poll the status endpoint until the predicate holds or the deadline
    /// hits.
    async fn wait_for_status(
        app: &Router,
        job_id: &str,
        predicate: impl Fn(&str) -> bool,
    ) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
        loop {
            let response = send(app, "GET", &format!("/evaluate/status/{job_id}"), None).await;
            if response.status() == StatusCode::OK {
                let status = body_json(response).await;
                if predicate(status["status"].as_str().unwrap_or_default()) {
                    return status;
                }
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for job {job_id} status"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn health_reports_providers() {
        let app = default_service();
        let response = send(&app, "GET", "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["llm"]["provider"], "MOCK");
        assert_eq!(body["llm"]["configured"], true);
        assert_eq!(body["ocr"]["provider"], "NONE");
    }

    #[tokio::test]
    async fn config_redacts_secrets() {
        let mut settings = Settings::for_tests();
        settings.llm.api_key = Some(secrecy::SecretString::from("super-secret".to_string()));
        let app = service(Arc::new(MockLlmProvider::new()), settings);

        let response = send(&app, "GET", "/config", None).await;
        let body = body_json(response).await;
        assert_eq!(body["llm"]["apiKey"], "***");
        assert_eq!(body["orchestrator"]["maxPlanRevisions"], 1);
    }

    #[tokio::test]
    async fn sync_happy_path_echoes_correlation() {
        let app = default_service();

        let request = Request::builder()
            .method("POST")
            .uri("/evaluate")
            .header("content-type", "application/json")
            .header("X-Correlation-ID", "macro-run-77")
            .body(Body::from(json!([item("IC-001")]).to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("X-Correlation-ID").unwrap(),
            "macro-run-77"
        );

        let body = body_json(response).await;
        assert_eq!(body[0]["ID"], "IC-001");
        assert_eq!(body[0]["evaluationResult"], true);
        assert!(!body[0]["judgmentBasis"].as_str().unwrap().is_empty());
        assert!(!body[0]["documentReference"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn generated_correlation_id_has_expected_shape() {
        let app = default_service();
        let response = send(&app, "GET", "/health", None).await;
        let header = response
            .headers()
            .get("X-Correlation-ID")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        let parts: Vec<&str> = header.split('_').collect();
        assert_eq!(parts.len(), 3, "unexpected correlation id {header}");
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[2].len(), 4);
    }

    #[tokio::test]
    async fn sync_results_preserve_input_order() {
        let app = default_service();
        let ids = ["IC-9", "IC-1", "IC-5", "IC-3", "IC-7"];
        let batch: Vec<Value> = ids.iter().map(|id| item(id)).collect();

        let response = send(&app, "POST", "/evaluate", Some(json!(batch))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let got: Vec<&str> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["ID"].as_str().unwrap())
            .collect();
        assert_eq!(got, ids);
    }

    #[tokio::test]
    async fn empty_batch_is_bad_request() {
        let app = default_service();
        let response = send(&app, "POST", "/evaluate", Some(json!([]))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = body_json(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["errorKind"], "BAD_REQUEST");
        assert!(body["correlationId"].as_str().is_some());
    }

    #[tokio::test]
    async fn sync_batch_size_boundary() {
        let mut settings = Settings::for_tests();
        settings.batch.max_sync_batch_size = 3;
        let app = service(Arc::new(MockLlmProvider::new()), settings);

        let exactly: Vec<Value> = (0..3).map(|i| item(&format!("IC-{i}"))).collect();
        let response = send(&app, "POST", "/evaluate", Some(json!(exactly))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let over: Vec<Value> = (0..4).map(|i| item(&format!("IC-{i}"))).collect();
        let response = send(&app, "POST", "/evaluate", Some(json!(over))).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "REQUEST_TOO_LARGE");
    }

    #[tokio::test]
    async fn invalid_items_are_bad_request() {
        let app = default_service();

        let missing_procedure = json!([{
            "ID": "IC-001",
            "ControlDescription": "something",
            "TestProcedure": ""
        }]);
        let response = send(&app, "POST", "/evaluate", Some(missing_procedure)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let duplicate = json!([item("IC-001"), item("IC-001")]);
        let response = send(&app, "POST", "/evaluate", Some(duplicate)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(&app, "POST", "/evaluate", Some(json!({"not": "an array"}))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn evidence_produces_annotated_artifacts() {
        use base64::Engine;
        let app = default_service();

        let evidence_text =
            "Ledger extract: monthly reconciliation approved by CFO on 2026-03-31.";
        let mut with_evidence = item("IC-001");
        with_evidence["EvidenceLink"] = json!("audit/2026/Q1");
        with_evidence["EvidenceFiles"] = json!([{
            "fileName": "ledger.txt",
            "mimeType": "text/plain",
            "extension": ".txt",
            "base64": base64::engine::general_purpose::STANDARD.encode(evidence_text),
        }]);

        let response = send(&app, "POST", "/evaluate", Some(json!([with_evidence]))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let artifact = &body[0]["evidenceFiles"][0];
        assert_eq!(artifact["fileName"], "highlighted_ledger.txt");
        assert_eq!(artifact["originalFileName"], "ledger.txt");
        assert_eq!(artifact["filePath"], "audit/2026/Q1");
        assert!(!artifact["base64"].as_str().unwrap().is_empty());
        // The mock's document reference appears in the evidence, so a span
        // highlight must be present.
        assert_eq!(artifact["highlights"][0]["type"], "span");
        assert_eq!(body[0]["fileName"], "ledger.txt");
    }

    #[tokio::test]
    async fn oversized_evidence_rejected() {
        use base64::Engine;
        let mut settings = Settings::for_tests();
        settings.evidence.max_file_bytes = 8;
        let app = service(Arc::new(MockLlmProvider::new()), settings);

        let mut with_evidence = item("IC-001");
        with_evidence["EvidenceFiles"] = json!([{
            "fileName": "big.txt",
            "mimeType": "text/plain",
            "extension": ".txt",
            "base64": base64::engine::general_purpose::STANDARD
                .encode("way more than eight bytes"),
        }]);

        let response = send(&app, "POST", "/evaluate", Some(json!([with_evidence]))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn async_lifecycle_completes_in_order() {
        let app = default_service();
        let batch = json!([item("IC-a"), item("IC-b"), item("IC-c")]);

        let response = send(&app, "POST", "/evaluate/submit", Some(batch)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let envelope = body_json(response).await;
        let job_id = envelope["jobId"].as_str().unwrap().to_string();
        assert_eq!(job_id.len(), 32);
        assert!(envelope["estimatedDurationSeconds"].as_u64().unwrap() >= 1);

        let status = wait_for_status(&app, &job_id, |s| s == "completed").await;
        assert_eq!(status["progress"], 100);
        assert!(status["startedAt"].as_str().is_some());
        assert!(status["completedAt"].as_str().is_some());

        let response = send(&app, "GET", &format!("/evaluate/results/{job_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);
        let results = body_json(response).await;
        let got: Vec<&str> = results
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["ID"].as_str().unwrap())
            .collect();
        assert_eq!(got, ["IC-a", "IC-b", "IC-c"]);
    }

    #[tokio::test]
    async fn results_before_completion_not_ready() {
        // A slow mock keeps the job processing while we poll results.
        let slow = MockLlmProvider::new().with_delay(Duration::from_millis(400));
        let app = service(Arc::new(slow), Settings::for_tests());

        let response =
            send(&app, "POST", "/evaluate/submit", Some(json!([item("IC-1")]))).await;
        let job_id = body_json(response).await["jobId"]
            .as_str()
            .unwrap()
            .to_string();

        let response = send(&app, "GET", &format!("/evaluate/results/{job_id}"), None).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "NOT_READY");
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let app = default_service();
        let response = send(&app, "GET", "/evaluate/status/deadbeef", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let response = send(&app, "GET", "/evaluate/results/deadbeef", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submitting_twice_yields_distinct_jobs() {
        let app = default_service();
        let batch = json!([item("IC-1")]);

        let first =
            body_json(send(&app, "POST", "/evaluate/submit", Some(batch.clone())).await).await;
        let second = body_json(send(&app, "POST", "/evaluate/submit", Some(batch)).await).await;
        assert_ne!(first["jobId"], second["jobId"]);
    }

    #[tokio::test]
    async fn saturated_queue_is_busy() {
        let mut settings = Settings::for_tests();
        settings.jobs.max_queue_depth = 0;
        let app = service(Arc::new(MockLlmProvider::new()), settings);

        let response =
            send(&app, "POST", "/evaluate/submit", Some(json!([item("IC-1")]))).await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "BUSY");
    }

    #[tokio::test]
    async fn per_item_timeout_spares_fast_sibling() {
        let mut settings = Settings::for_tests();
        settings.orchestrator.item_timeout = Duration::from_millis(300);
        let slow = MockLlmProvider::new()
            .with_delay_matching("glacial reconciliation", Duration::from_secs(5));
        let app = service(Arc::new(slow), settings);

        let mut slow_item = item("IC-slow");
        slow_item["ControlDescription"] = json!("glacial reconciliation is approved");
        let batch = json!([item("IC-fast"), slow_item]);

        let response = send(&app, "POST", "/evaluate", Some(batch)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;

        assert_eq!(body[0]["ID"], "IC-fast");
        assert_eq!(body[0]["evaluationResult"], true);

        assert_eq!(body[1]["ID"], "IC-slow");
        assert!(body[1].get("evaluationResult").is_none());
        assert_eq!(body[1]["error"]["errorKind"], "TIMEOUT");
    }

    #[tokio::test]
    async fn upstream_exhaustion_fails_single_task_plan() {
        // The only planned task fails permanently: item fails with UPSTREAM.
        let mut settings = Settings::for_tests();
        settings.orchestrator.skip_plan_creation = true; // default plan = A5 only
        let failing = MockLlmProvider::new().with_failures(
            "Infer whether the evidence satisfies",
            u32::MAX,
            MockFailure::Unavailable,
        );
        let app = service(Arc::new(failing), settings);

        let response = send(&app, "POST", "/evaluate", Some(json!([item("IC-1")]))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body[0]["error"]["errorKind"], "UPSTREAM");
    }

    #[tokio::test]
    async fn cancellation_discards_partial_results() {
        let slow = MockLlmProvider::new().with_delay(Duration::from_millis(150));
        let app = service(Arc::new(slow), Settings::for_tests());

        let batch: Vec<Value> = (0..10).map(|i| item(&format!("IC-{i}"))).collect();
        let response = send(&app, "POST", "/evaluate/submit", Some(json!(batch))).await;
        let job_id = body_json(response).await["jobId"]
            .as_str()
            .unwrap()
            .to_string();

        wait_for_status(&app, &job_id, |s| s == "processing").await;

        let response = send(&app, "POST", &format!("/evaluate/cancel/{job_id}"), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let status = wait_for_status(&app, &job_id, |s| s == "cancelled").await;
        assert_eq!(status["status"], "cancelled");

        let response = send(&app, "GET", &format!("/evaluate/results/{job_id}"), None).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "CANCELLED");
    }

    /// A backend that panics instead of answering. The resulting worker
    /// panic cannot be attributed to any item, so the whole job must land
    /// in the FAILED terminal state.
    struct PanickingLlm;

    #[async_trait::async_trait]
    impl LlmProvider for PanickingLlm {
        async fn complete(
            &self,
            _req: crate::llm::CompletionRequest,
        ) -> Result<crate::llm::CompletionResponse, crate::error::LlmError> {
            panic!("provider blew up");
        }

        fn provider_name(&self) -> &str {
            "panicking"
        }

        fn model_name(&self) -> &str {
            "panicking"
        }

        fn cost_per_token(&self) -> (rust_decimal::Decimal, rust_decimal::Decimal) {
            (rust_decimal::Decimal::ZERO, rust_decimal::Decimal::ZERO)
        }
    }

    #[tokio::test]
    async fn job_level_failure_reaches_failed_state() {
        let app = service(Arc::new(PanickingLlm), Settings::for_tests());

        let response =
            send(&app, "POST", "/evaluate/submit", Some(json!([item("IC-1")]))).await;
        assert_eq!(response.status(), StatusCode::OK);
        let job_id = body_json(response).await["jobId"]
            .as_str()
            .unwrap()
            .to_string();

        let status = wait_for_status(&app, &job_id, |s| s == "error").await;
        assert_eq!(status["status"], "error");

        let response = send(&app, "GET", &format!("/evaluate/results/{job_id}"), None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], true);
        assert_eq!(body["errorKind"], "INTERNAL");
        assert!(
            body["message"]
                .as_str()
                .unwrap()
                .contains("panicked")
        );
    }

    #[tokio::test]
    async fn sync_worker_panic_maps_to_internal() {
        let app = service(Arc::new(PanickingLlm), Settings::for_tests());

        let response = send(&app, "POST", "/evaluate", Some(json!([item("IC-1")]))).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["errorKind"], "INTERNAL");
    }

    #[tokio::test]
    async fn retention_reaper_forgets_completed_jobs() {
        let mut settings = Settings::for_tests();
        settings.jobs.retention = Duration::from_millis(200);
        settings.jobs.reaper_interval = Duration::from_millis(100);
        let app = service(Arc::new(MockLlmProvider::new()), settings);

        let response =
            send(&app, "POST", "/evaluate/submit", Some(json!([item("IC-1")]))).await;
        let job_id = body_json(response).await["jobId"]
            .as_str()
            .unwrap()
            .to_string();

        wait_for_status(&app, &job_id, |s| s == "completed").await;

        // Wait out retention plus a reaper pass.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let response = send(&app, "GET", &format!("/evaluate/status/{job_id}"), None).await;
            if response.status() == StatusCode::NOT_FOUND {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job was never reaped"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}
