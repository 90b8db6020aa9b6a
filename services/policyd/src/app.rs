//! Ops HTTP surface for the policy service.
//!
//! # Purpose
//! Lets probes, operators and sidecar callers see and drive the policy
//! pipeline: health, the live generation, a manual reload, a change-signal
//! bump for writers in other processes, and the authorization decision itself.
//!
//! # Notes
//! Metrics are served on their own listener by `observability`.
use crate::policy::PolicyError;
use crate::policy::authorize::{Authorizer, Decision};
use crate::policy::reload::{PolicySync, ReloadOutcome};
use crate::store::RbacStore;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router};
use gatehouse_cache::{Cacher, ChangeSignal};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

#[derive(Clone)]
pub struct AppState {
    pub sync: Arc<PolicySync>,
    pub authorizer: Authorizer,
    pub store: Arc<dyn RbacStore>,
    pub cache: Arc<dyn Cacher>,
    pub signal: ChangeSignal,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::ReloadInProgress => {
                ApiError::new(StatusCode::CONFLICT, "reload_in_progress", err.to_string())
            }
            other => {
                tracing::error!(error = %other, "policy request failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "internal error",
                )
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub store: &'static str,
    pub cache: &'static str,
    pub policy_loaded: bool,
}

#[derive(Debug, Serialize)]
pub struct PolicyStatus {
    pub enforcement_enabled: bool,
    pub loaded: bool,
    pub generation: Option<u64>,
    pub signal: Option<i64>,
    pub last_applied: Option<i64>,
    pub lines: Option<usize>,
    pub built_at_unix_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub swapped: bool,
    pub generation: Option<u64>,
    pub lines: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SignalResponse {
    pub signal: i64,
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeRequest {
    pub subjects: Vec<String>,
    pub path: String,
    pub method: String,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", axum::routing::get(health))
        .route("/v1/policy", axum::routing::get(policy_status))
        .route("/v1/policy/reload", axum::routing::post(reload_policy))
        .route("/v1/signal/bump", axum::routing::post(bump_signal))
        .route("/v1/authorize", axum::routing::post(authorize))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthStatus>) {
    let store_ok = state.store.health_check().await.is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();
    let status = if store_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthStatus {
        status: if status == StatusCode::OK { "ok" } else { "degraded" },
        store: state.store.backend_name(),
        cache: state.cache.backend_name(),
        policy_loaded: state.sync.handle().is_loaded(),
    };
    (status, Json(body))
}

async fn policy_status(State(state): State<AppState>) -> Json<PolicyStatus> {
    let generation = state.sync.handle().get();
    Json(PolicyStatus {
        enforcement_enabled: state.authorizer.is_enabled(),
        loaded: generation.is_some(),
        generation: generation.as_ref().map(|generation| generation.id),
        signal: generation.as_ref().and_then(|generation| generation.signal),
        last_applied: state.sync.last_applied(),
        lines: generation.as_ref().map(|generation| generation.lines),
        built_at_unix_ms: generation.as_ref().and_then(|generation| {
            generation
                .built_at
                .duration_since(UNIX_EPOCH)
                .ok()
                .map(|elapsed| elapsed.as_millis() as u64)
        }),
    })
}

async fn reload_policy(State(state): State<AppState>) -> Result<Json<ReloadResponse>, ApiError> {
    let response = match state.sync.reload().await? {
        ReloadOutcome::Swapped(generation) => ReloadResponse {
            swapped: true,
            generation: Some(generation.id),
            lines: Some(generation.lines),
        },
        ReloadOutcome::Empty => ReloadResponse {
            swapped: false,
            generation: state.sync.handle().get().map(|generation| generation.id),
            lines: None,
        },
    };
    Ok(Json(response))
}

async fn bump_signal(State(state): State<AppState>) -> Result<Json<SignalResponse>, ApiError> {
    let signal = state.signal.bump().await.map_err(|err| {
        tracing::warn!(error = %err, "change signal bump failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "signal_unavailable",
            "change signal unavailable",
        )
    })?;
    Ok(Json(SignalResponse { signal }))
}

async fn authorize(
    State(state): State<AppState>,
    Json(request): Json<AuthorizeRequest>,
) -> Result<(StatusCode, Json<Decision>), ApiError> {
    let decision = state
        .authorizer
        .authorize(&request.subjects, &request.path, &request.method)?;
    let status = if decision.is_allowed() {
        StatusCode::OK
    } else {
        StatusCode::FORBIDDEN
    };
    Ok((status, Json(decision)))
}
