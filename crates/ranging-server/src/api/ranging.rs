//! Ranging API endpoints.
//!
//! Thin HTTP surface over the process-wide [`BeaconRangingCoordinator`]:
//! a POST joins (or starts) the shared session and waits for its outcome,
//! GET reports the active session, DELETE stops it.
//!
//! [`BeaconRangingCoordinator`]: ranging_core::BeaconRangingCoordinator

use std::time::Instant;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use ranging_core::{BeaconTarget, Outcome, RangingState, SessionSnapshot};
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Ranging request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "targets": [
        {
            "id": "lobby-east",
            "uuid": "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6",
            "major": 100,
            "minor": 1
        }
    ]
}))]
pub struct RangeRequest {
    /// Beacons to range. Ignored if a session is already active; the
    /// request then waits on that session instead.
    pub targets: Vec<BeaconTarget>,
}

/// Ranging response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RangeResponse {
    /// Aggregated result of the session this request waited on.
    pub outcome: Outcome,

    /// When the outcome was delivered.
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub completed_at_utc: String,

    /// How long the request waited, in milliseconds.
    #[schema(example = 1200)]
    pub duration_ms: u64,
}

/// Coordinator status response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RangingStatusResponse {
    /// Lifecycle state.
    pub state: RangingState,

    /// The active session, when ranging.
    #[schema(nullable)]
    pub session: Option<SessionSnapshot>,

    /// Per-request timeout in seconds.
    #[schema(example = 5)]
    pub timeout_secs: u64,
}

/// Stop response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StopResponse {
    /// Whether a session was active and has been stopped.
    pub stopped: bool,

    /// Lifecycle state after the stop.
    pub state: RangingState,
}

/// Creates the ranging router.
pub fn router() -> Router<SharedState> {
    Router::new().route(
        "/",
        get(get_status).post(request_ranging).delete(stop_ranging),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// Range a set of beacons and wait for the aggregated outcome.
#[utoipa::path(
    post,
    path = "/api/ranging",
    tag = "ranging",
    operation_id = "requestRanging",
    summary = "Range beacons",
    description = "Starts a ranging session for the given targets, or joins the \
        session already in progress, and waits until every target has been heard \
        or has failed, the request times out, or ranging is stopped. A timeout \
        still returns success with whatever was heard so far.",
    request_body = RangeRequest,
    responses(
        (status = 200, description = "Ranging finished", body = RangeResponse),
        (status = 400, description = "Invalid target list", body = crate::api::ErrorResponse),
        (status = 403, description = "Location permission not granted", body = crate::api::ErrorResponse),
        (status = 503, description = "Beacon ranging unavailable", body = crate::api::ErrorResponse)
    )
)]
pub async fn request_ranging(
    State(state): State<SharedState>,
    Json(request): Json<RangeRequest>,
) -> ApiResult<Json<RangeResponse>> {
    validate_targets(&request.targets)?;

    let started = Instant::now();
    let outcome = state.coordinator.range(request.targets).await;
    if !outcome.is_success() {
        return Err(ApiError::rejected(outcome.status));
    }

    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        resolved = outcome.resolved_ids.len(),
        failed = outcome.failed_ids.len(),
        duration_ms,
        "Ranging request finished"
    );

    Ok(Json(RangeResponse {
        outcome,
        completed_at_utc: Utc::now().to_rfc3339(),
        duration_ms,
    }))
}

/// Report the coordinator's state and active session.
#[utoipa::path(
    get,
    path = "/api/ranging",
    tag = "ranging",
    operation_id = "getRangingStatus",
    summary = "Get ranging status",
    responses(
        (status = 200, description = "Current status", body = RangingStatusResponse)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<RangingStatusResponse> {
    let session = state.coordinator.snapshot();
    Json(RangingStatusResponse {
        state: if session.is_some() {
            RangingState::Ranging
        } else {
            RangingState::Idle
        },
        session,
        timeout_secs: state.coordinator.timeout().as_secs(),
    })
}

/// Stop the active session, delivering partial results to every waiter.
#[utoipa::path(
    delete,
    path = "/api/ranging",
    tag = "ranging",
    operation_id = "stopRanging",
    summary = "Stop ranging",
    description = "Stops the active session. Every pending request receives the \
        data gathered so far. Does nothing when idle.",
    responses(
        (status = 200, description = "Stop processed", body = StopResponse)
    )
)]
pub async fn stop_ranging(State(state): State<SharedState>) -> Json<StopResponse> {
    let stopped = state.coordinator.stop_ranging();

    Json(StopResponse {
        stopped,
        state: state.coordinator.state(),
    })
}

/// Duplicate ids are allowed; the coordinator ranges each distinct id once.
fn validate_targets(targets: &[BeaconTarget]) -> ApiResult<()> {
    if targets.iter().any(|t| t.id.trim().is_empty()) {
        return Err(ApiError::BadRequest {
            error_code: "invalid_target".to_string(),
            message: "Target id must not be empty".to_string(),
        });
    }
    Ok(())
}
