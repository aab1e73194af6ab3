//! OpenAPI specification generation for the ranging API.
//!
//! Served at `/api/openapi.json` and written to disk by the `gen-openapi`
//! binary for client generation.

use axum::Json;
use utoipa::OpenApi;

use ranging_core::{
    AuthorizationStatus, BeaconRegion, BeaconTarget, Outcome, Proximity, RadioCommand,
    RadioEvent, RangedBeacon, RangingState, RangingStatus, SessionSnapshot,
};

use super::error::ErrorResponse;
use super::health::HealthResponse;
use super::radio::{RadioAvailability, RadioCommandsResponse};
use super::ranging::{RangeRequest, RangeResponse, RangingStatusResponse, StopResponse};

/// Serve the OpenAPI specification as JSON.
pub async fn get_openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Returns the OpenAPI specification as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> serde_json::Result<String> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Beacon Ranging API",
        version = "0.1.0",
        description = r#"
# Beacon Ranging API

Ranges proximity beacons on demand and reports which of them were heard.

## Overview

- **One shared session**: concurrent requests join the session in progress
  instead of starting another one.
- **Bounded waits**: every request times out independently; the first timeout
  stops the session and every waiter receives the partial result.
- **Preconditions**: requests fail fast with 403 when location permission is
  not granted and 503 when the radio cannot range.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local ranging server")
    ),
    tags(
        (name = "system", description = "Health checks"),
        (name = "ranging", description = "Beacon ranging sessions"),
        (name = "radio", description = "Simulated radio control")
    ),
    paths(
        super::health::health_check,
        super::ranging::request_ranging,
        super::ranging::get_status,
        super::ranging::stop_ranging,
        super::radio::inject_event,
        super::radio::get_commands,
        super::radio::clear_commands,
        super::radio::set_availability,
    ),
    components(
        schemas(
            ErrorResponse,
            HealthResponse,
            RangeRequest,
            RangeResponse,
            RangingStatusResponse,
            StopResponse,
            RadioCommandsResponse,
            RadioAvailability,
            BeaconTarget,
            BeaconRegion,
            Outcome,
            Proximity,
            RangingStatus,
            RangingState,
            SessionSnapshot,
            AuthorizationStatus,
            RadioEvent,
            RangedBeacon,
            RadioCommand,
        )
    )
)]
pub struct ApiDoc;
