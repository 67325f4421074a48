//! HTTP protocol spoken between the dispatcher and its workers.
//!
//! Every dispatcher request targets `/` and is selected by query parameters:
//!
//! | Request                        | Response                                   |
//! |--------------------------------|--------------------------------------------|
//! | `GET /`                        | HTML overview of every job                 |
//! | `GET /?a=status`               | `waiting/running/committed` counts         |
//! | `GET /?a=dequeue`              | job JSON, or 204 when no job is waiting    |
//! | `GET /?j=<id>[&output=html]`   | job JSON (or HTML page), 404 if unknown    |
//! | `POST /?a=commit&j=<id>`       | 200 once the job in the body is committed  |
//! | `GET\|POST /?a=stop`           | 200, then graceful shutdown                |
//!
//! Any other path is served from the resource directory, if one is set.
//! Missing files and methods other than GET/HEAD get a 404.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    handler::HandlerWithoutStateExt,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::dashboard::{render_job_report, render_jobs_report};
use crate::dispatcher::{Dispatcher, Job};
use crate::error::DispatchError;

pub const PARAM_ACTION: &str = "a";
pub const PARAM_JOB: &str = "j";
pub const PARAM_OUTPUT: &str = "output";

pub const ACTION_STATUS: &str = "status";
pub const ACTION_DEQUEUE: &str = "dequeue";
pub const ACTION_COMMIT: &str = "commit";
pub const ACTION_STOP: &str = "stop";

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    /// Cancelled by the stop action.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(dispatcher: Arc<Dispatcher>, shutdown: CancellationToken) -> Self {
        Self {
            dispatcher,
            shutdown,
        }
    }
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        let status = match self {
            DispatchError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            DispatchError::DuplicateJobId(_) | DispatchError::UnknownOrNotRunningJob(_) => {
                StatusCode::CONFLICT
            }
            // the job is committed: success class, but not a plain OK
            DispatchError::CallbackFailure { .. } => StatusCode::ACCEPTED,
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the dispatcher router, serving `resource_root` for other paths.
pub fn router(state: AppState, resource_root: Option<&Path>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let router = Router::new().route(
        "/",
        get(handle_get).post(handle_post).fallback(not_found),
    );

    let router = match resource_root {
        Some(root) => router.fallback_service(
            ServeDir::new(root)
                .call_fallback_on_method_not_allowed(true)
                .fallback(not_found.into_service()),
        ),
        None => router.fallback(not_found),
    };

    router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn handle_get(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if params.is_empty() {
        let overview = state.dispatcher.overview().await;
        return Html(render_jobs_report(&overview)).into_response();
    }

    if let Some(action) = params.get(PARAM_ACTION) {
        return match action.as_str() {
            ACTION_STATUS => state.dispatcher.counts().await.to_string().into_response(),
            ACTION_DEQUEUE => handle_dequeue(&state).await,
            ACTION_STOP => handle_stop(&state),
            other => {
                tracing::debug!(action = other, "Unsupported action");
                StatusCode::NOT_FOUND.into_response()
            }
        };
    }

    if params.contains_key(PARAM_JOB) {
        let id = match job_id_param(&params) {
            Ok(id) => id,
            Err(e) => return e.into_response(),
        };
        let Some(job) = state.dispatcher.get_job(id).await else {
            return StatusCode::NOT_FOUND.into_response();
        };
        return match params.get(PARAM_OUTPUT).map(String::as_str) {
            Some("html") => Html(render_job_report(&job)).into_response(),
            _ => Json(job).into_response(),
        };
    }

    tracing::debug!(params = ?params, "Unhandled GET request");
    StatusCode::NOT_FOUND.into_response()
}

async fn handle_post(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    match params.get(PARAM_ACTION).map(String::as_str) {
        Some(ACTION_COMMIT) => match handle_commit(&state, &params, &body).await {
            Ok(()) => StatusCode::OK.into_response(),
            Err(e) => e.into_response(),
        },
        Some(ACTION_STOP) => handle_stop(&state),
        _ => {
            tracing::debug!(params = ?params, "Unhandled POST request");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

async fn handle_dequeue(state: &AppState) -> Response {
    match state.dispatcher.dequeue().await {
        Some(job) => Json(job).into_response(),
        None => {
            tracing::debug!("No more waiting jobs");
            StatusCode::NO_CONTENT.into_response()
        }
    }
}

async fn handle_commit(
    state: &AppState,
    params: &HashMap<String, String>,
    body: &[u8],
) -> Result<(), DispatchError> {
    let id = job_id_param(params)?;
    let job: Job = serde_json::from_slice(body)
        .map_err(|e| DispatchError::MalformedPayload(e.to_string()))?;
    if job.id() != id {
        return Err(DispatchError::MalformedPayload(format!(
            "body holds job {} but job {} was requested",
            job.id(),
            id
        )));
    }
    state.dispatcher.commit(&job).await.map(|_| ())
}

fn handle_stop(state: &AppState) -> Response {
    tracing::info!("Stop requested");
    state.shutdown.cancel();
    StatusCode::OK.into_response()
}

fn job_id_param(params: &HashMap<String, String>) -> Result<u64, DispatchError> {
    let raw = params
        .get(PARAM_JOB)
        .ok_or_else(|| DispatchError::MalformedPayload("missing job id".to_string()))?;
    raw.trim()
        .parse()
        .map_err(|_| DispatchError::MalformedPayload(format!("invalid job id '{}'", raw)))
}
