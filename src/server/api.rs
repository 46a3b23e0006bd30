use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::artifacts::{ArtifactError, ArtifactStore};
use crate::config::{StorageSection, TopomapToml};
use crate::errors::{DEFAULT_JOB_ERROR, JobError, TrackerError, ValidationError};
use crate::job::{JobDescriptor, JobKind, Origin, is_valid_run_id, validate_request};
use crate::limiter::ConcurrencyLimiter;
use crate::progress::{RunHandle, RunState, Trackers};
use crate::worker::WorkerRunner;

pub const STARTED_MESSAGE: &str = "Processing started";
pub const CACHED_MESSAGE: &str = "Map has already been created";

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub trackers: Trackers,
    pub limiter: ConcurrencyLimiter,
    pub artifacts: ArtifactStore,
    pub storage: StorageSection,
    pub in_flight: InFlight,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(runner: Arc<dyn WorkerRunner>, config: &TopomapToml) -> Self {
        Self {
            trackers: Trackers::new(config.progress.tracker_config()),
            limiter: ConcurrencyLimiter::new(runner, config.worker.max_concurrent),
            artifacts: ArtifactStore::new(&config.storage.temp_folder),
            storage: config.storage.clone(),
            in_flight: InFlight::default(),
        }
    }
}

/// Outcome of a running job, `None` until it ends.
type JobOutcome = watch::Receiver<Option<bool>>;

/// Jobs currently running, keyed by kind and run id.
///
/// Identical requests share a run id. A request for a run that is already
/// in flight joins it instead of resetting its progress and starting a
/// second worker.
#[derive(Debug, Default)]
pub struct InFlight {
    jobs: Mutex<HashMap<(JobKind, String), JobOutcome>>,
}

enum Claim {
    Started(watch::Sender<Option<bool>>),
    Joined(JobOutcome),
}

impl InFlight {
    fn claim(&self, kind: JobKind, id: &str) -> Claim {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        let key = (kind, id.to_string());
        // A closed channel means the job's task died without reporting.
        if let Some(outcome) = jobs.get(&key)
            && outcome.has_changed().is_ok()
        {
            return Claim::Joined(outcome.clone());
        }
        let (tx, rx) = watch::channel(None);
        jobs.insert(key, rx);
        Claim::Started(tx)
    }

    fn release(&self, kind: JobKind, id: &str) {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&(kind, id.to_string()));
    }

    pub fn contains(&self, kind: JobKind, id: &str) -> bool {
        self.jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&(kind, id.to_string()))
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CreateQuery {
    #[serde(default)]
    pub preflight: bool,
}

// ── Error type ────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Timeout(String),
    TooManyRequests(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Timeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg),
            ApiError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<TrackerError> for ApiError {
    fn from(err: TrackerError) -> Self {
        let msg = err.to_string();
        match err {
            TrackerError::MissingRun => ApiError::NotFound(msg),
            TrackerError::WaitTimeout => ApiError::Timeout(msg),
            TrackerError::AlreadyWaiting => ApiError::TooManyRequests(msg),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl From<ArtifactError> for ApiError {
    fn from(err: ArtifactError) -> Self {
        match err {
            ArtifactError::NotFound => ApiError::NotFound(err.to_string()),
            ArtifactError::Traversal => ApiError::BadRequest(err.to_string()),
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health))
        .route("/api/{kind}", post(create_job))
        .route("/api/{kind}/{id}/progress", post(poll_progress))
        .route("/maps/{id}/{file}", get(get_map_file))
}

fn parse_kind(kind: &str) -> Result<JobKind, ApiError> {
    kind.parse()
        .map_err(|_| ApiError::NotFound(format!("Unknown job kind '{}'", kind)))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health() -> &'static str {
    "ok"
}

async fn create_job(
    State(state): State<SharedState>,
    Path(kind): Path<String>,
    Query(query): Query<CreateQuery>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let kind = parse_kind(&kind)?;
    let job = validate_request(kind, &body, &state.storage, Origin::Remote).inspect_err(|e| {
        info!(kind = %kind, error = %e, "Bad request");
    })?;
    let id = job.run_id().to_string();

    if query.preflight {
        info!(run_id = %id, kind = %kind, "Preflight");
        return Ok(id.into_response());
    }

    let outcome = match state.in_flight.claim(kind, &id) {
        Claim::Started(outcome) => outcome,
        Claim::Joined(mut outcome) => {
            info!(run_id = %id, kind = %kind, "Joining job already in flight");
            let succeeded = outcome
                .wait_for(Option::is_some)
                .await
                .is_ok_and(|done| *done == Some(true));
            return if succeeded {
                artifact_response(kind, &id, &state.artifacts.path_for(kind, &id)).await
            } else {
                Err(ApiError::Internal(DEFAULT_JOB_ERROR.to_string()))
            };
        }
    };

    if let Some(path) = state.artifacts.cached(kind, &id) {
        info!(run_id = %id, kind = %kind, "Using cached artifact");
        state.in_flight.release(kind, &id);
        outcome.send_replace(Some(true));

        let run = state.trackers.get(kind).add_run(&id);
        run.set_message(STARTED_MESSAGE);
        if kind != JobKind::CreateMap {
            run.set_progress(90.0);
        }
        run.set_message(CACHED_MESSAGE);
        let response = artifact_response(kind, &id, &path).await;
        run.set_progress(100.0);
        run.finish();
        return response;
    }

    let run = state.trackers.get(kind).add_run(&id);
    run.set_message(STARTED_MESSAGE);
    info!(run_id = %id, kind = %kind, "Job requested");

    // Detached so a client disconnect never cancels the job.
    let task = tokio::spawn(run_job(Arc::clone(&state), job, run, outcome));
    match task.await {
        Ok(Ok(())) => {
            artifact_response(kind, &id, &state.artifacts.path_for(kind, &id)).await
        }
        Ok(Err(_)) => Err(ApiError::Internal(DEFAULT_JOB_ERROR.to_string())),
        Err(e) => {
            error!(run_id = %id, error = %e, "Job task panicked");
            Err(ApiError::Internal(DEFAULT_JOB_ERROR.to_string()))
        }
    }
}

/// Schedule the job, record a failure on the run, then finish the run and
/// tell any joined requests how it ended.
async fn run_job(
    state: SharedState,
    job: JobDescriptor,
    run: RunHandle,
    outcome: watch::Sender<Option<bool>>,
) -> Result<(), JobError> {
    let result = state.limiter.schedule(&job, &run).await;
    match &result {
        Ok(()) => info!(run_id = job.run_id(), "Job completed"),
        Err(e) => {
            warn!(run_id = job.run_id(), error = %e, "Job failed");
            if run.snapshot().is_some_and(|s| s.error.is_none()) {
                run.set_error(e.user_message());
            }
        }
    }
    run.finish();
    state.in_flight.release(job.kind(), job.run_id());
    outcome.send_replace(Some(result.is_ok()));
    result
}

async fn artifact_response(
    kind: JobKind,
    id: &str,
    path: &std::path::Path,
) -> Result<Response, ApiError> {
    if kind == JobKind::CreateMap {
        return Ok(id.to_string().into_response());
    }
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        error!(run_id = id, path = %path.display(), error = %e, "Artifact missing after job");
        ApiError::Internal(DEFAULT_JOB_ERROR.to_string())
    })?;
    Ok((
        [(header::CONTENT_TYPE, ArtifactStore::content_type(kind))],
        bytes,
    )
        .into_response())
}

async fn poll_progress(
    State(state): State<SharedState>,
    Path((kind, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<RunState>, ApiError> {
    let kind = parse_kind(&kind)?;
    if !is_valid_run_id(&id) {
        return Err(ApiError::NotFound(format!("Unknown run '{}'", id)));
    }

    let last_seen = RunState::from_body(&body);
    if last_seen.is_none() && !body.iter().all(u8::is_ascii_whitespace) {
        debug!(run_id = %id, "Progress with bad format, treating as no snapshot");
    }

    let snapshot = state
        .trackers
        .get(kind)
        .wait(&id, last_seen.as_ref())
        .await?;
    Ok(Json(snapshot))
}

async fn get_map_file(
    State(state): State<SharedState>,
    Path((id, file)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let path = state.artifacts.map_file(&id, &file)?;
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        warn!(path = %path.display(), error = %e, "Failed to read map file");
        ApiError::NotFound(ArtifactError::NotFound.to_string())
    })?;
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], bytes).into_response())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tokio::sync::Notify;
    use tower::ServiceExt;

    use super::*;
    use crate::worker::ProgressSink;

    /// Writes the artifact the job asks for, optionally after a gate opens.
    #[derive(Default)]
    struct FakeWorker {
        calls: AtomicUsize,
        fail_with: Option<String>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl WorkerRunner for FakeWorker {
        async fn run(&self, job: &JobDescriptor, sink: &dyn ProgressSink) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            sink.progress(50.0);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if let Some(message) = &self.fail_with {
                sink.error(message);
                return Err(JobError::JobFailed {
                    exit_code: Some(1),
                    message: message.clone(),
                });
            }
            let store = ArtifactStore::new(&job.area().output_folder);
            let path = store.path_for(job.kind(), job.run_id());
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, b"artifact").unwrap();
            sink.progress(100.0);
            Ok(())
        }
    }

    struct TestApp {
        router: Router,
        state: SharedState,
        worker: Arc<FakeWorker>,
        _dir: TempDir,
    }

    fn test_app_with(worker: FakeWorker, wait_timeout_ms: u64) -> TestApp {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TopomapToml::default();
        config.storage.temp_folder = dir.path().to_path_buf();
        let worker = Arc::new(worker);
        let mut state = AppState::new(worker.clone(), &config);
        let mut tracker_config = config.progress.tracker_config();
        tracker_config.wait_timeout = Duration::from_millis(wait_timeout_ms);
        state.trackers = Trackers::new(tracker_config);
        let state = Arc::new(state);
        TestApp {
            router: api_router().with_state(Arc::clone(&state)),
            state,
            worker,
            _dir: dir,
        }
    }

    fn test_app() -> TestApp {
        test_app_with(FakeWorker::default(), 30_000)
    }

    fn preview_body() -> String {
        serde_json::json!({
            "map_w": 458000, "map_s": 96000, "map_e": 462000, "map_n": 100000,
            "epsg": "EPSG:3794", "raster_type": "osm",
            "map_size_w_m": 0.297, "map_size_h_m": 0.21
        })
        .to_string()
    }

    fn sheet_body() -> String {
        let mut v: serde_json::Value = serde_json::from_str(&preview_body()).unwrap();
        v["target_scale"] = serde_json::json!(10000);
        v["naslov1"] = serde_json::json!("Test");
        v.to_string()
    }

    fn post(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    async fn preflight_id(app: &TestApp, kind: &str, body: String) -> String {
        let resp = app
            .router
            .clone()
            .oneshot(post(&format!("/api/{}?preflight=true", kind), body))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        body_string(resp).await
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "ok");
    }

    #[tokio::test]
    async fn test_preflight_returns_id_without_running() {
        let app = test_app();
        let id = preflight_id(&app, "map_preview", preview_body()).await;

        assert!(is_valid_run_id(&id));
        assert!(!app.state.trackers.get(JobKind::MapPreview).has_run(&id));
        assert_eq!(app.worker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_bad_request() {
        let app = test_app();
        let resp = app
            .router
            .oneshot(post("/api/map_preview", r#"{"map_w": 1}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Malformed"));
    }

    #[tokio::test]
    async fn test_unknown_kind_is_not_found() {
        let app = test_app();
        let resp = app
            .router
            .oneshot(post("/api/render_everything", preview_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_map_returns_id_and_finishes_run() {
        let app = test_app();
        let expected = preflight_id(&app, "create_map", sheet_body()).await;

        let resp = app
            .router
            .clone()
            .oneshot(post("/api/create_map", sheet_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, expected);
        assert_eq!(app.worker.calls.load(Ordering::SeqCst), 1);
        assert!(!app.state.trackers.get(JobKind::CreateMap).has_run(&expected));
    }

    #[tokio::test]
    async fn test_preview_returns_png_bytes() {
        let app = test_app();
        let resp = app
            .router
            .oneshot(post("/api/map_preview", preview_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "image/png");
        assert_eq!(body_string(resp).await, "artifact");
    }

    #[tokio::test]
    async fn test_cached_artifact_skips_worker() {
        let app = test_app();
        let id = preflight_id(&app, "map_reambulation", preview_body()).await;
        let path = app.state.artifacts.path_for(JobKind::MapReambulation, &id);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"cached zip").unwrap();

        let resp = app
            .router
            .clone()
            .oneshot(post("/api/map_reambulation", preview_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "application/zip");
        assert_eq!(body_string(resp).await, "cached zip");
        assert_eq!(app.worker.calls.load(Ordering::SeqCst), 0);
        assert!(!app.state.trackers.get(JobKind::MapReambulation).has_run(&id));
    }

    #[tokio::test]
    async fn test_worker_failure_is_generic_internal_error() {
        let worker = FakeWorker {
            fail_with: Some("tile server unreachable".into()),
            ..FakeWorker::default()
        };
        let app = test_app_with(worker, 30_000);
        let resp = app
            .router
            .oneshot(post("/api/create_map", sheet_body()))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["error"], DEFAULT_JOB_ERROR);
    }

    #[tokio::test]
    async fn test_poll_unknown_run_is_not_found() {
        let app = test_app();
        let id = "0123456789abcdef0123456789abcdef";
        let resp = app
            .router
            .clone()
            .oneshot(post(&format!("/api/create_map/{}/progress", id), "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = app
            .router
            .oneshot(post("/api/create_map/not-an-id/progress", ""))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_poll_snapshot_and_malformed_body() {
        let app = test_app();
        let id = "0123456789abcdef0123456789abcdef";
        let run = app.state.trackers.get(JobKind::MapPreview).add_run(id);
        run.set_message("Rendering");

        for body in ["", "{not json"] {
            let resp = app
                .router
                .clone()
                .oneshot(post(&format!("/api/map_preview/{}/progress", id), body))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let json: serde_json::Value =
                serde_json::from_str(&body_string(resp).await).unwrap();
            assert_eq!(json["message"], "Rendering");
            assert!(json.get("progress").is_none());
        }
    }

    #[tokio::test]
    async fn test_poll_timeout_and_concurrent_poll() {
        let app = test_app_with(FakeWorker::default(), 200);
        let id = "0123456789abcdef0123456789abcdef";
        app.state.trackers.get(JobKind::CreateMap).add_run(id);
        let uri = format!("/api/create_map/{}/progress", id);

        let first = tokio::spawn(app.router.clone().oneshot(post(&uri, "{}")));
        while !app.state.trackers.get(JobKind::CreateMap).has_waiter(id) {
            tokio::task::yield_now().await;
        }

        let second = app.router.clone().oneshot(post(&uri, "{}")).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

        let first = first.await.unwrap().unwrap();
        assert_eq!(first.status(), StatusCode::REQUEST_TIMEOUT);
        assert!(app.state.trackers.get(JobKind::CreateMap).has_run(id));
    }

    #[tokio::test]
    async fn test_poll_sees_terminal_state_when_job_finishes() {
        let gate = Arc::new(Notify::new());
        let worker = FakeWorker {
            gate: Some(Arc::clone(&gate)),
            ..FakeWorker::default()
        };
        let app = test_app_with(worker, 30_000);
        let id = preflight_id(&app, "create_map", sheet_body()).await;
        let tracker = app.state.trackers.get(JobKind::CreateMap).clone();

        let create = tokio::spawn(app.router.clone().oneshot(post("/api/create_map", sheet_body())));
        while app.worker.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        let poll = tokio::spawn(
            app.router
                .clone()
                .oneshot(post(&format!("/api/create_map/{}/progress", id), "{}")),
        );
        while !tracker.has_waiter(&id) {
            tokio::task::yield_now().await;
        }
        gate.notify_one();

        let resp = poll.await.unwrap().unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(json["progress"], 100.0);
        assert!(json.get("error").is_none());

        let created = create.await.unwrap().unwrap();
        assert_eq!(created.status(), StatusCode::OK);
        assert!(!tracker.has_run(&id));
    }

    #[tokio::test]
    async fn test_identical_request_joins_job_in_flight() {
        let gate = Arc::new(Notify::new());
        let worker = FakeWorker {
            gate: Some(Arc::clone(&gate)),
            ..FakeWorker::default()
        };
        let app = test_app_with(worker, 30_000);
        let id = preflight_id(&app, "map_preview", preview_body()).await;
        let tracker = app.state.trackers.get(JobKind::MapPreview).clone();

        let first = tokio::spawn(app.router.clone().oneshot(post("/api/map_preview", preview_body())));
        while tracker.get_run(&id).and_then(|s| s.progress) != Some(50.0) {
            tokio::task::yield_now().await;
        }
        assert!(app.state.in_flight.contains(JobKind::MapPreview, &id));

        let second = tokio::spawn(app.router.clone().oneshot(post("/api/map_preview", preview_body())));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second.is_finished());
        assert_eq!(app.worker.calls.load(Ordering::SeqCst), 1);
        // Joining must not reset the running job's progress.
        assert_eq!(tracker.get_run(&id).and_then(|s| s.progress), Some(50.0));

        gate.notify_one();
        for resp in [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()] {
            assert_eq!(resp.status(), StatusCode::OK);
            assert_eq!(body_string(resp).await, "artifact");
        }
        assert_eq!(app.worker.calls.load(Ordering::SeqCst), 1);
        assert!(!app.state.in_flight.contains(JobKind::MapPreview, &id));
        assert!(!tracker.has_run(&id));
    }

    #[tokio::test]
    async fn test_joined_request_shares_failure() {
        let gate = Arc::new(Notify::new());
        let worker = FakeWorker {
            gate: Some(Arc::clone(&gate)),
            fail_with: Some("no tiles".into()),
            ..FakeWorker::default()
        };
        let app = test_app_with(worker, 30_000);
        let id = preflight_id(&app, "map_preview", preview_body()).await;

        let first = tokio::spawn(app.router.clone().oneshot(post("/api/map_preview", preview_body())));
        while app.worker.calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        let second = tokio::spawn(app.router.clone().oneshot(post("/api/map_preview", preview_body())));
        tokio::time::sleep(Duration::from_millis(50)).await;

        gate.notify_one();
        for resp in [first.await.unwrap().unwrap(), second.await.unwrap().unwrap()] {
            assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        }
        assert_eq!(app.worker.calls.load(Ordering::SeqCst), 1);
        assert!(!app.state.in_flight.contains(JobKind::MapPreview, &id));
    }

    #[tokio::test]
    async fn test_map_file_route() {
        let app = test_app();
        let id = "0123456789abcdef0123456789abcdef";
        let map_dir = app.state.artifacts.root().join("maps").join(id);
        std::fs::create_dir_all(&map_dir).unwrap();
        std::fs::write(map_dir.join("map.pdf"), b"%PDF-1.7").unwrap();

        let req = Request::builder()
            .uri(format!("/maps/{}/map.pdf", id))
            .body(Body::empty())
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["content-type"], "application/pdf");

        let req = Request::builder()
            .uri(format!("/maps/{}/..%2F..%2Fsecret", id))
            .body(Body::empty())
            .unwrap();
        let resp = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = Request::builder()
            .uri(format!("/maps/{}/missing.pdf", id))
            .body(Body::empty())
            .unwrap();
        let resp = app.router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
