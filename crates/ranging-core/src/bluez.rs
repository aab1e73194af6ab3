//! BlueZ radio adapter (Linux, feature `bluez`).
//!
//! Ranging is emulated on top of LE discovery: while at least one region is
//! active a single discovery task runs, parses iBeacon manufacturer data
//! from every advertisement, and emits a [`RadioEvent::RangingUpdate`] for
//! each active region the advertisement matches. Proximity is estimated
//! from RSSI and the frame's calibrated TX power.
//!
//! Adapter power is tracked by a background task following BlueZ property
//! changes, so `is_ranging_available` reflects the adapter being switched
//! on or off after startup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bluer::{Adapter, AdapterEvent, AdapterProperty, Session};
use futures::{pin_mut, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RangingError, Result};
use crate::radio::{parse_ibeacon, RadioAdapter, RadioEvent};
use crate::types::{BeaconRegion, Proximity};

type Regions = Arc<Mutex<HashMap<String, BeaconRegion>>>;

/// Radio adapter backed by the default BlueZ adapter.
pub struct BluezRadio {
    adapter: Adapter,
    powered: Arc<AtomicBool>,
    power_watch: JoinHandle<()>,
    runtime: Handle,
    regions: Regions,
    discovery: Mutex<Option<JoinHandle<()>>>,
    events: mpsc::UnboundedSender<RadioEvent>,
}

impl BluezRadio {
    /// Connect to BlueZ and open the default adapter.
    ///
    /// # Errors
    ///
    /// Returns [`RangingError::RadioUnavailable`] if no D-Bus session or
    /// adapter can be opened.
    pub async fn connect() -> Result<(Self, mpsc::UnboundedReceiver<RadioEvent>)> {
        let session = Session::new().await.map_err(|e| {
            warn!(error = %e, "Failed to open BlueZ session");
            RangingError::RadioUnavailable
        })?;
        let adapter = session.default_adapter().await.map_err(|e| {
            warn!(error = %e, "No default Bluetooth adapter");
            RangingError::RadioUnavailable
        })?;
        let powered = adapter.is_powered().await.unwrap_or(false);
        info!(adapter = adapter.name(), powered, "BlueZ adapter ready");

        let powered = Arc::new(AtomicBool::new(powered));
        let runtime = Handle::current();
        let power_watch = runtime.spawn(watch_power(adapter.clone(), powered.clone()));

        let (events, receiver) = mpsc::unbounded_channel();
        let radio = Self {
            adapter,
            powered,
            power_watch,
            runtime,
            regions: Arc::new(Mutex::new(HashMap::new())),
            discovery: Mutex::new(None),
            events,
        };
        Ok((radio, receiver))
    }

    fn ensure_discovery(&self) {
        let mut discovery = self.discovery.lock();
        if discovery.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let adapter = self.adapter.clone();
        let regions = self.regions.clone();
        let events = self.events.clone();
        *discovery = Some(self.runtime.spawn(async move {
            if let Err(e) = discover(&adapter, &regions, &events).await {
                warn!(error = %e, "BlueZ discovery failed");
                let failed: Vec<String> = regions.lock().keys().cloned().collect();
                for region_id in failed {
                    let _ = events.send(RadioEvent::RangingFailed { region_id });
                }
            }
        }));
    }
}

impl Drop for BluezRadio {
    fn drop(&mut self) {
        self.power_watch.abort();
        if let Some(task) = self.discovery.get_mut().take() {
            task.abort();
        }
    }
}

/// Follow adapter property changes for the lifetime of the radio.
async fn watch_power(adapter: Adapter, powered: Arc<AtomicBool>) {
    let stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "Cannot watch Bluetooth adapter power state");
            return;
        }
    };
    pin_mut!(stream);

    // The adapter may have changed state between connect and subscribing.
    if let Ok(now) = adapter.is_powered().await {
        apply_power(&powered, now);
    }

    while let Some(event) = stream.next().await {
        if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(now)) = event {
            apply_power(&powered, now);
        }
    }
    debug!("Adapter event stream ended");
}

fn apply_power(powered: &AtomicBool, now: bool) {
    if powered.swap(now, Ordering::SeqCst) != now {
        info!(powered = now, "Bluetooth adapter power changed");
    }
}

async fn discover(
    adapter: &Adapter,
    regions: &Regions,
    events: &mpsc::UnboundedSender<RadioEvent>,
) -> bluer::Result<()> {
    let stream = adapter.discover_devices_with_changes().await?;
    pin_mut!(stream);

    while let Some(event) = stream.next().await {
        let AdapterEvent::DeviceAdded(address) = event else {
            continue;
        };
        let device = adapter.device(address)?;
        let (Some(data), Some(rssi)) = (device.manufacturer_data().await?, device.rssi().await?)
        else {
            continue;
        };

        for (company_id, payload) in data {
            let Some(frame) = parse_ibeacon(company_id, &payload) else {
                continue;
            };
            let proximity = Proximity::from_rssi(rssi, i16::from(frame.tx_power));
            let matched: Vec<String> = regions
                .lock()
                .values()
                .filter(|r| r.matches(frame.uuid, frame.major, frame.minor))
                .map(|r| r.identifier.clone())
                .collect();

            for region_id in matched {
                debug!(%address, %region_id, rssi, %proximity, "iBeacon heard");
                let _ = events.send(RadioEvent::RangingUpdate {
                    region_id,
                    rssi,
                    proximity,
                });
            }
        }
    }

    Ok(())
}

impl RadioAdapter for BluezRadio {
    fn is_ranging_available(&self) -> bool {
        self.powered.load(Ordering::SeqCst)
    }

    fn start_ranging(&self, region: &BeaconRegion) -> Result<()> {
        self.regions
            .lock()
            .insert(region.identifier.clone(), region.clone());
        self.ensure_discovery();
        Ok(())
    }

    fn stop_ranging(&self, region: &BeaconRegion) {
        let now_empty = {
            let mut regions = self.regions.lock();
            regions.remove(&region.identifier);
            regions.is_empty()
        };

        if now_empty {
            if let Some(task) = self.discovery.lock().take() {
                task.abort();
                debug!("No active regions, BlueZ discovery stopped");
            }
        }
    }
}
