//! Simulated radio endpoints.
//!
//! Lets a client play the part of the platform radio stack: inject
//! ranging/monitoring callbacks and inspect the start/stop commands the
//! coordinator issued. Only meaningful with `radio.backend = "simulated"`;
//! every route answers 409 otherwise.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use ranging_core::{RadioCommand, RadioEvent, SimulatedRadio};
use serde::{Deserialize, Serialize};
use tracing::debug;
use utoipa::ToSchema;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Command log response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RadioCommandsResponse {
    /// Most recent commands issued, oldest first. The log is bounded.
    pub commands: Vec<RadioCommand>,

    /// Regions currently being ranged, sorted.
    #[schema(example = json!(["lobby-east"]))]
    pub active_regions: Vec<String>,
}

/// Radio availability toggle.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RadioAvailability {
    /// Whether the radio reports ranging as available.
    #[schema(example = true)]
    pub available: bool,
}

/// Creates the radio router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/events", post(inject_event))
        .route("/commands", get(get_commands).delete(clear_commands))
        .route("/availability", put(set_availability))
}

fn simulated(state: &SharedState) -> ApiResult<&Arc<SimulatedRadio>> {
    state.simulated.as_ref().ok_or_else(|| ApiError::Conflict {
        error_code: "radio_not_simulated".to_string(),
        message: "The configured radio backend does not accept injected events".to_string(),
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// Inject a radio event as if the platform had raised it.
#[utoipa::path(
    post,
    path = "/api/radio/events",
    tag = "radio",
    operation_id = "injectRadioEvent",
    summary = "Inject a radio event",
    description = "Delivers a ranging update, raw ranged-beacons list, ranging \
        failure, or monitoring failure to the coordinator. Events for regions \
        outside the active session are ignored.",
    request_body = RadioEvent,
    responses(
        (status = 202, description = "Event queued"),
        (status = 409, description = "Radio backend is not simulated", body = crate::api::ErrorResponse)
    )
)]
pub async fn inject_event(
    State(state): State<SharedState>,
    Json(event): Json<RadioEvent>,
) -> ApiResult<StatusCode> {
    let radio = simulated(&state)?;
    debug!(region_id = event.region_id(), "Injecting radio event");

    if radio.emit(event) {
        Ok(StatusCode::ACCEPTED)
    } else {
        Err(ApiError::InternalError {
            error_code: "event_pump_closed".to_string(),
            message: "Radio event stream is closed".to_string(),
            details: None,
        })
    }
}

/// List the commands the coordinator issued to the radio.
#[utoipa::path(
    get,
    path = "/api/radio/commands",
    tag = "radio",
    operation_id = "getRadioCommands",
    summary = "Get radio command log",
    responses(
        (status = 200, description = "Command log", body = RadioCommandsResponse),
        (status = 409, description = "Radio backend is not simulated", body = crate::api::ErrorResponse)
    )
)]
pub async fn get_commands(
    State(state): State<SharedState>,
) -> ApiResult<Json<RadioCommandsResponse>> {
    let radio = simulated(&state)?;
    Ok(Json(RadioCommandsResponse {
        commands: radio.commands(),
        active_regions: radio.active_regions(),
    }))
}

/// Forget the recorded command log. Active regions are unaffected.
#[utoipa::path(
    delete,
    path = "/api/radio/commands",
    tag = "radio",
    operation_id = "clearRadioCommands",
    summary = "Clear radio command log",
    responses(
        (status = 204, description = "Command log cleared"),
        (status = 409, description = "Radio backend is not simulated", body = crate::api::ErrorResponse)
    )
)]
pub async fn clear_commands(State(state): State<SharedState>) -> ApiResult<StatusCode> {
    let radio = simulated(&state)?;
    radio.clear_commands();
    Ok(StatusCode::NO_CONTENT)
}

/// Toggle whether the simulated radio can range.
#[utoipa::path(
    put,
    path = "/api/radio/availability",
    tag = "radio",
    operation_id = "setRadioAvailability",
    summary = "Set radio availability",
    request_body = RadioAvailability,
    responses(
        (status = 200, description = "Availability updated", body = RadioAvailability),
        (status = 409, description = "Radio backend is not simulated", body = crate::api::ErrorResponse)
    )
)]
pub async fn set_availability(
    State(state): State<SharedState>,
    Json(request): Json<RadioAvailability>,
) -> ApiResult<Json<RadioAvailability>> {
    let radio = simulated(&state)?;
    radio.set_available(request.available);
    Ok(Json(request))
}
