//! # ranging-core
//!
//! Proximity-beacon ranging coordination.
//!
//! This crate provides:
//! - A ranging coordinator that aggregates asynchronous per-region radio
//!   events into one outcome per session, with per-request timeouts
//! - Radio and permission seams for plugging in a platform stack
//! - A simulated radio for hosts without hardware, and a BlueZ adapter
//! - Layered configuration loading and validation
//!
//! ## Architecture
//!
//! - [`coordinator`] - Session lifecycle, event aggregation, timeouts
//! - [`radio`] - `RadioAdapter` / `PermissionProvider` traits, radio events, iBeacon parsing
//! - [`observer`] - Lifecycle trace and failure observers
//! - [`simulated`] - In-process radio adapter
//! - `bluez` - BlueZ radio adapter (feature `bluez`)
//! - [`config`] - Configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Targets, regions, outcomes, and OpenAPI schemas
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ranging_core::{
//!     AuthorizationStatus, BeaconRangingCoordinator, BeaconTarget, SimulatedRadio,
//!     StaticPermission,
//! };
//!
//! # async fn run() -> ranging_core::Result<()> {
//! let (radio, events) = SimulatedRadio::new(true);
//! let coordinator = BeaconRangingCoordinator::builder(
//!     Arc::new(radio),
//!     Arc::new(StaticPermission(AuthorizationStatus::Always)),
//! )
//! .build()?;
//! coordinator.spawn_event_pump(events);
//!
//! let target = BeaconTarget::new("lobby", uuid::Uuid::nil(), 1, 1);
//! let outcome = coordinator.range(vec![target]).await;
//! println!("{:?}", outcome.resolved_ids);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

#[cfg(feature = "bluez")]
pub mod bluez;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod observer;
pub mod radio;
pub mod simulated;
pub mod types;

// Re-export primary types for convenience
#[cfg(feature = "bluez")]
pub use bluez::BluezRadio;
pub use config::{
    default_config_path, ConfigError, ConfigResult, LoggingSettings, PermissionSettings,
    RadioBackend, RadioSettings, RangingConfig, RangingSettings, ServerSettings,
};
pub use coordinator::{BeaconRangingCoordinator, Completion, CoordinatorBuilder, DEFAULT_TIMEOUT};
pub use error::{RangingError, Result};
pub use observer::{
    EventSink, FailureObserver, LifecycleEvent, StopReason, TracingEventSink,
    TracingFailureObserver,
};
pub use radio::{
    parse_ibeacon, IBeaconFrame, PermissionProvider, RadioAdapter, RadioEvent, RangedBeacon,
    StaticPermission,
};
pub use simulated::{RadioCommand, SimulatedRadio, COMMAND_LOG_CAPACITY};
pub use types::{
    AuthorizationStatus, BeaconRegion, BeaconTarget, Outcome, Proximity, RangingState,
    RangingStatus, SessionSnapshot,
};
