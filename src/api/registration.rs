//! Registration API endpoints
//!
//! Endpoints:
//!   POST /bind                 -> Bind a worker to an identity
//!   POST /unbind               -> Release one worker
//!   POST /unbind_all           -> Release every worker of an identity (confirm=true)
//!   GET  /workers/{identity}   -> Workers bound to an identity, oldest first
//!   GET  /mappings             -> Every binding on this validator
//!   GET  /metrics              -> Fresh telemetry per identity (503 if unavailable)
//!   GET  /health               -> Liveness check
//!
//! Every 4xx/5xx produced here carries `{"reason", "message"}`, including
//! bodies that fail to parse.

use axum::{
    Json, Router,
    extract::{FromRequest, Path, Request, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::database::{WorkerMapping, group_by_identity};
use crate::registrar::{
    BindOutcome, BindRequest, Registrar, RejectReason, UnbindAllRequest, UnbindRequest,
};
use crate::telemetry::{TelemetrySource, WorkerSample};

// ============================================================================
// State
// ============================================================================

#[derive(Clone)]
pub struct RegistrationApiState {
    pub registrar: Arc<Registrar>,
    /// Source for `/metrics`; the endpoint answers 503 without one
    pub telemetry: Option<Arc<dyn TelemetrySource>>,
    pub fetch_timeout: Duration,
}

impl RegistrationApiState {
    pub fn new(registrar: Arc<Registrar>) -> Self {
        Self {
            registrar,
            telemetry: None,
            fetch_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_telemetry(
        mut self,
        telemetry: Arc<dyn TelemetrySource>,
        fetch_timeout: Duration,
    ) -> Self {
        self.telemetry = Some(telemetry);
        self.fetch_timeout = fetch_timeout;
        self
    }
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct BindResponse {
    pub status: String,
    pub outcome: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnbindResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnbindAllResponse {
    pub status: String,
    pub removed_count: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WorkersResponse {
    pub identity: String,
    pub workers: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MappingsResponse {
    pub count: usize,
    pub mappings: Vec<WorkerMapping>,
}

/// Telemetry view of one identity
#[derive(Debug, Serialize, Deserialize)]
pub struct IdentityMetrics {
    pub identity: String,
    /// Sampled workers with non-zero uptime
    pub active_workers: usize,
    /// Workers bound to the identity
    pub total_workers: usize,
    pub is_active: bool,
    /// Samples for the bound workers the telemetry source reported
    pub workers: Vec<WorkerSample>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

/// Error body: `{"reason": "<Name>", "message": "<text>"}`
#[derive(Debug, Serialize, Deserialize)]
pub struct RejectionBody {
    pub reason: String,
    pub message: String,
}

/// Maps a registrar rejection onto an HTTP response
#[derive(Debug)]
pub struct ApiRejection(pub RejectReason);

impl ApiRejection {
    pub fn status(&self) -> StatusCode {
        match self.0 {
            RejectReason::NamingViolation
            | RejectReason::StaleTimestamp
            | RejectReason::ConfirmationRequired => StatusCode::BAD_REQUEST,
            RejectReason::InvalidSignature => StatusCode::UNAUTHORIZED,
            RejectReason::WorkerTaken => StatusCode::CONFLICT,
            RejectReason::NotFound => StatusCode::NOT_FOUND,
            RejectReason::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<RejectReason> for ApiRejection {
    fn from(reason: RejectReason) -> Self {
        Self(reason)
    }
}

impl IntoResponse for ApiRejection {
    fn into_response(self) -> Response {
        let body = RejectionBody {
            reason: self.0.as_str().to_string(),
            message: self.0.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// JSON body extractor whose failures use the rejection body shape
pub struct ApiJson<T>(pub T);

/// A request body that could not be read or parsed
#[derive(Debug)]
pub struct BodyRejection(pub JsonRejection);

impl IntoResponse for BodyRejection {
    fn into_response(self) -> Response {
        let status = self.0.status();
        warn!(status = status.as_u16(), error = %self.0.body_text(), "Malformed request body");
        let body = RejectionBody {
            reason: "MalformedRequest".to_string(),
            message: self.0.body_text(),
        };
        (status, Json(body)).into_response()
    }
}

impl<S, T> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = BodyRejection;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(BodyRejection)?;
        Ok(Self(value))
    }
}

// ============================================================================
// Handlers
// ============================================================================

async fn bind(
    State(state): State<RegistrationApiState>,
    ApiJson(request): ApiJson<BindRequest>,
) -> Result<Json<BindResponse>, ApiRejection> {
    let outcome = state.registrar.bind(&request).await?;
    let outcome = match outcome {
        BindOutcome::Bound => "bound",
        BindOutcome::AlreadyBound => "already_bound",
    };

    Ok(Json(BindResponse {
        status: "accepted".to_string(),
        outcome: outcome.to_string(),
    }))
}

async fn unbind(
    State(state): State<RegistrationApiState>,
    ApiJson(request): ApiJson<UnbindRequest>,
) -> Result<Json<UnbindResponse>, ApiRejection> {
    state.registrar.unbind(&request).await?;
    Ok(Json(UnbindResponse {
        status: "accepted".to_string(),
    }))
}

async fn unbind_all(
    State(state): State<RegistrationApiState>,
    ApiJson(request): ApiJson<UnbindAllRequest>,
) -> Result<Json<UnbindAllResponse>, ApiRejection> {
    let removed_count = state.registrar.unbind_all(&request).await?;
    Ok(Json(UnbindAllResponse {
        status: "accepted".to_string(),
        removed_count,
    }))
}

async fn list_workers(
    State(state): State<RegistrationApiState>,
    Path(identity): Path<String>,
) -> Result<Json<WorkersResponse>, ApiRejection> {
    let workers = state.registrar.list_workers(&identity).await?;
    Ok(Json(WorkersResponse { identity, workers }))
}

async fn list_mappings(
    State(state): State<RegistrationApiState>,
) -> Result<Json<MappingsResponse>, ApiRejection> {
    let mappings = state.registrar.mappings().await?;
    Ok(Json(MappingsResponse {
        count: mappings.len(),
        mappings,
    }))
}

async fn metrics(
    State(state): State<RegistrationApiState>,
) -> Result<Json<Vec<IdentityMetrics>>, ApiRejection> {
    let Some(telemetry) = state.telemetry.as_ref() else {
        warn!("Metrics requested but no telemetry source is configured");
        return Err(ApiRejection(RejectReason::Unavailable));
    };

    let workers_by_identity = group_by_identity(state.registrar.mappings().await?);
    if workers_by_identity.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let worker_names: Vec<String> = workers_by_identity.values().flatten().cloned().collect();
    let samples = match timeout(state.fetch_timeout, telemetry.fetch_samples(&worker_names)).await {
        Ok(Ok(samples)) => samples,
        Ok(Err(e)) => {
            error!(error = %e, "Telemetry fetch for metrics failed");
            return Err(ApiRejection(RejectReason::Unavailable));
        }
        Err(_) => {
            error!(
                timeout_secs = state.fetch_timeout.as_secs(),
                "Telemetry fetch for metrics timed out"
            );
            return Err(ApiRejection(RejectReason::Unavailable));
        }
    };

    let view = workers_by_identity
        .into_iter()
        .map(|(identity, workers)| {
            let total_workers = workers.len();
            let sampled: Vec<WorkerSample> = workers
                .iter()
                .filter_map(|w| samples.get(w).cloned())
                .collect();
            let active_workers = sampled.iter().filter(|s| s.uptime_fraction > 0.0).count();
            IdentityMetrics {
                identity,
                active_workers,
                total_workers,
                is_active: active_workers > 0,
                workers: sampled,
            }
        })
        .collect();

    Ok(Json(view))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
    })
}

// ============================================================================
// Router
// ============================================================================

pub fn create_router(state: RegistrationApiState) -> Router {
    Router::new()
        .route("/bind", post(bind))
        .route("/unbind", post(unbind))
        .route("/unbind_all", post(unbind_all))
        .route("/workers/{identity}", get(list_workers))
        .route("/mappings", get(list_mappings))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .with_state(state)
}
