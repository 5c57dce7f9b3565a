//! HTTP surface over the [`Scheduler`].
//!
//! Handlers only translate between HTTP and scheduler calls. Caller identity
//! comes from the `x-caller-id` header, which the fronting auth layer is
//! expected to set; worker-facing routes additionally require the shared
//! worker secret (see [`auth`]).

pub mod auth;

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::SchedulerError;
use crate::scheduler::{Job, JobInfo, JobStatus, OutputWrite, PollRequest, PollResponse, Scheduler};
use crate::store::{OutputChunk, WorkerRecord};

pub const CALLER_ID_HEADER: &str = "x-caller-id";
pub const ANONYMOUS_CALLER: &str = "anonymous";

#[derive(Clone)]
pub struct ApiState {
    pub scheduler: Scheduler,
    pub worker_secret: Option<Arc<str>>,
}

impl ApiState {
    pub fn new(scheduler: Scheduler, worker_secret: Option<String>) -> Self {
        Self {
            scheduler,
            worker_secret: worker_secret.map(Arc::from),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for SchedulerError {
    fn into_response(self) -> Response {
        let status = match &self {
            SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            SchedulerError::Invalid(_) => StatusCode::BAD_REQUEST,
            SchedulerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<JobStatus>,
}

#[derive(Deserialize)]
struct OutputQuery {
    start: Option<u64>,
    end: Option<u64>,
}

#[derive(Deserialize)]
struct CancelRequest {
    secret: String,
}

#[derive(Serialize, Deserialize)]
pub struct OutputAck {
    pub matched: u64,
}

pub fn router(state: ApiState) -> Router {
    let worker_routes = Router::new()
        .route("/api/worker/poll/:worker_id", post(poll_worker_handler))
        .route("/api/worker/jobs/:hash", patch(update_job_handler))
        .route("/api/worker/jobs/:hash/output", post(post_output_handler))
        .route_layer(middleware::from_fn_with_state(
            state.worker_secret.clone(),
            auth::require_worker_secret,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/:hash", get(job_info_handler).put(create_job_handler))
        .route("/api/jobs/:hash/cancel", post(cancel_job_handler))
        .route("/api/jobs/:hash/output", get(get_output_handler))
        .route("/api/workers", get(list_workers_handler))
        .merge(worker_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the API until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: ApiState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    tracing::info!(addr = ?listener.local_addr().ok(), "Starting API server");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}

fn caller_id(headers: &HeaderMap) -> String {
    headers
        .get(CALLER_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(ANONYMOUS_CALLER)
        .to_string()
}

/// The path names the job; a body naming a different hash is rejected.
fn with_path_hash(hash: String, mut info: JobInfo) -> Result<JobInfo, SchedulerError> {
    if let Some(body_hash) = info.hash.as_deref() {
        if body_hash != hash {
            return Err(SchedulerError::Invalid(format!(
                "body hash {} does not match path hash {}",
                body_hash, hash
            )));
        }
    }
    info.hash = Some(hash);
    Ok(info)
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn list_jobs_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Json<BTreeMap<String, Job>> {
    Json(state.scheduler.list(&caller_id(&headers), query.status).await)
}

async fn job_info_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
) -> Result<Json<Job>, SchedulerError> {
    Ok(Json(state.scheduler.info(&caller_id(&headers), &hash).await?))
}

async fn create_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
    Json(info): Json<JobInfo>,
) -> Result<(StatusCode, Json<Job>), SchedulerError> {
    let info = with_path_hash(hash, info)?;
    let job = state.scheduler.create_job(&caller_id(&headers), info).await?;
    // Only a fresh record carries the secret.
    let status = if job.secret.is_some() {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(job)))
}

async fn update_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
    Json(info): Json<JobInfo>,
) -> Result<StatusCode, SchedulerError> {
    let info = with_path_hash(hash, info)?;
    state.scheduler.update_job(&caller_id(&headers), info).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn cancel_job_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
    Json(body): Json<CancelRequest>,
) -> Result<StatusCode, SchedulerError> {
    state
        .scheduler
        .cancel_job(&caller_id(&headers), &hash, &body.secret)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_output_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
    Query(query): Query<OutputQuery>,
) -> Result<Json<Vec<OutputChunk>>, SchedulerError> {
    let chunks = state
        .scheduler
        .get_job_output(&caller_id(&headers), &hash, query.start, query.end)
        .await?;
    Ok(Json(chunks))
}

async fn post_output_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(hash): Path<String>,
    Json(write): Json<OutputWrite>,
) -> Result<Json<OutputAck>, SchedulerError> {
    let matched = state
        .scheduler
        .update_job_output(&caller_id(&headers), &hash, write)
        .await?;
    Ok(Json(OutputAck { matched }))
}

async fn poll_worker_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(worker_id): Path<String>,
    Json(request): Json<PollRequest>,
) -> Result<Json<PollResponse>, SchedulerError> {
    let response = state
        .scheduler
        .poll_worker(&caller_id(&headers), &worker_id, request)
        .await?;
    Ok(Json(response))
}

async fn list_workers_handler(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Json<Vec<WorkerRecord>> {
    Json(state.scheduler.list_workers(&caller_id(&headers)).await)
}
