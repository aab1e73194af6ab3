//! In-process radio adapter.
//!
//! [`SimulatedRadio`] records every command it receives and forwards
//! injected [`RadioEvent`]s through a channel, exactly the way a platform
//! adapter would deliver its callbacks. Hosts without Bluetooth hardware use
//! it to drive the coordinator end-to-end; tests use it to assert on the
//! command stream.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::error::{RangingError, Result};
use crate::radio::{RadioAdapter, RadioEvent};
use crate::types::BeaconRegion;

/// A command the coordinator issued to the radio.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum RadioCommand {
    /// `start_ranging` was called.
    StartRanging {
        /// Region descriptor.
        region: BeaconRegion,
    },
    /// `stop_ranging` was called.
    StopRanging {
        /// Region descriptor.
        region: BeaconRegion,
    },
}

impl RadioCommand {
    /// Region identifier the command targeted.
    #[must_use]
    pub fn region_id(&self) -> &str {
        match self {
            Self::StartRanging { region } | Self::StopRanging { region } => &region.identifier,
        }
    }

    /// Whether this is a start command.
    #[must_use]
    pub const fn is_start(&self) -> bool {
        matches!(self, Self::StartRanging { .. })
    }
}

/// Most recent commands kept by [`SimulatedRadio`]. Older entries are dropped.
pub const COMMAND_LOG_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct RadioLog {
    commands: VecDeque<RadioCommand>,
    active: BTreeSet<String>,
    refused: BTreeSet<String>,
}

impl RadioLog {
    fn record(&mut self, command: RadioCommand) {
        if self.commands.len() == COMMAND_LOG_CAPACITY {
            self.commands.pop_front();
        }
        self.commands.push_back(command);
    }
}

/// Radio adapter backed by memory.
#[derive(Debug)]
pub struct SimulatedRadio {
    available: AtomicBool,
    log: Mutex<RadioLog>,
    events: mpsc::UnboundedSender<RadioEvent>,
}

impl SimulatedRadio {
    /// Create a radio and the event stream to hand to
    /// [`BeaconRangingCoordinator::spawn_event_pump`](crate::BeaconRangingCoordinator::spawn_event_pump).
    #[must_use]
    pub fn new(available: bool) -> (Self, mpsc::UnboundedReceiver<RadioEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let radio = Self {
            available: AtomicBool::new(available),
            log: Mutex::new(RadioLog::default()),
            events,
        };
        (radio, receiver)
    }

    /// Toggle ranging capability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Make subsequent `start_ranging` calls for `region_id` fail.
    pub fn refuse_region(&self, region_id: impl Into<String>) {
        self.log.lock().refused.insert(region_id.into());
    }

    /// Deliver an event as if the platform had raised it.
    ///
    /// Returns `false` if nothing is listening any more.
    pub fn emit(&self, event: RadioEvent) -> bool {
        self.events.send(event).is_ok()
    }

    /// The last [`COMMAND_LOG_CAPACITY`] commands received, oldest first.
    #[must_use]
    pub fn commands(&self) -> Vec<RadioCommand> {
        self.log.lock().commands.iter().cloned().collect()
    }

    /// Number of start commands issued for `region_id`.
    #[must_use]
    pub fn start_count(&self, region_id: &str) -> usize {
        self.count(region_id, true)
    }

    /// Number of stop commands issued for `region_id`.
    #[must_use]
    pub fn stop_count(&self, region_id: &str) -> usize {
        self.count(region_id, false)
    }

    /// Regions currently being ranged, sorted.
    #[must_use]
    pub fn active_regions(&self) -> Vec<String> {
        self.log.lock().active.iter().cloned().collect()
    }

    /// Forget recorded commands. Active regions are kept.
    pub fn clear_commands(&self) {
        self.log.lock().commands.clear();
    }

    fn count(&self, region_id: &str, start: bool) -> usize {
        self.log
            .lock()
            .commands
            .iter()
            .filter(|c| c.is_start() == start && c.region_id() == region_id)
            .count()
    }
}

impl RadioAdapter for SimulatedRadio {
    fn is_ranging_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn start_ranging(&self, region: &BeaconRegion) -> Result<()> {
        let mut log = self.log.lock();
        log.record(RadioCommand::StartRanging {
            region: region.clone(),
        });

        if log.refused.contains(&region.identifier) {
            return Err(RangingError::RadioCommandFailed {
                region_id: region.identifier.clone(),
                message: "region refused by simulated radio".to_string(),
            });
        }

        log.active.insert(region.identifier.clone());
        Ok(())
    }

    fn stop_ranging(&self, region: &BeaconRegion) {
        let mut log = self.log.lock();
        log.record(RadioCommand::StopRanging {
            region: region.clone(),
        });
        log.active.remove(&region.identifier);
    }
}
