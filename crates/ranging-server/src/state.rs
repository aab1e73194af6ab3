//! Application state shared across handlers.

use std::sync::Arc;
use std::time::Instant;

use ranging_core::{
    BeaconRangingCoordinator, RadioAdapter, RadioBackend, RangingConfig, SimulatedRadio,
    StaticPermission,
};
use tracing::info;

/// Shared state handle passed to every handler.
pub type SharedState = Arc<AppState>;

/// Application state.
pub struct AppState {
    /// Loaded configuration.
    pub config: RangingConfig,

    /// The one coordinator for this process.
    pub coordinator: Arc<BeaconRangingCoordinator>,

    /// The simulated radio, when that backend is selected.
    pub simulated: Option<Arc<SimulatedRadio>>,

    /// Process start, for uptime reporting.
    pub started_at: Instant,
}

impl AppState {
    /// Build state for the configured radio backend.
    ///
    /// Must be called inside a tokio runtime; the coordinator and the radio
    /// event pump are bound to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the radio backend cannot be opened.
    pub async fn new(config: RangingConfig) -> anyhow::Result<SharedState> {
        match config.radio.backend {
            RadioBackend::Simulated => Ok(Self::simulated(config)?),
            RadioBackend::Bluez => Self::bluez(config).await,
        }
    }

    /// Build state around a [`SimulatedRadio`].
    ///
    /// # Errors
    ///
    /// Returns an error if no tokio runtime is current.
    pub fn simulated(config: RangingConfig) -> ranging_core::Result<SharedState> {
        let (radio, events) = SimulatedRadio::new(config.radio.available);
        let radio = Arc::new(radio);
        let coordinator = build_coordinator(radio.clone(), &config)?;
        coordinator.spawn_event_pump(events);
        info!(available = config.radio.available, "Using simulated radio");

        Ok(Arc::new(Self {
            config,
            coordinator,
            simulated: Some(radio),
            started_at: Instant::now(),
        }))
    }

    #[cfg(feature = "bluez")]
    async fn bluez(config: RangingConfig) -> anyhow::Result<SharedState> {
        let (radio, events) = ranging_core::BluezRadio::connect().await?;
        let coordinator = build_coordinator(Arc::new(radio), &config)?;
        coordinator.spawn_event_pump(events);
        info!("Using BlueZ radio");

        Ok(Arc::new(Self {
            config,
            coordinator,
            simulated: None,
            started_at: Instant::now(),
        }))
    }

    #[cfg(not(feature = "bluez"))]
    #[allow(clippy::unused_async)]
    async fn bluez(_config: RangingConfig) -> anyhow::Result<SharedState> {
        anyhow::bail!("radio.backend = \"bluez\" requires building with the `bluez` feature")
    }
}

fn build_coordinator(
    radio: Arc<dyn RadioAdapter>,
    config: &RangingConfig,
) -> ranging_core::Result<Arc<BeaconRangingCoordinator>> {
    BeaconRangingCoordinator::builder(
        radio,
        Arc::new(StaticPermission(config.permission.authorization)),
    )
    .timeout(config.ranging.timeout())
    .build()
}
