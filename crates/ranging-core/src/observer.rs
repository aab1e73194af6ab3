//! Passive observers of coordinator activity.
//!
//! Two seams, both purely observational and called outside the coordinator's
//! critical section:
//!
//! - [`EventSink`] receives a [`LifecycleEvent`] for every state transition
//!   (session start, per-region updates, timeouts, stops).
//! - [`FailureObserver`] is told once per rejected request, when the
//!   permission or radio precondition fails.
//!
//! The defaults, [`TracingEventSink`] and [`TracingFailureObserver`], write to
//! `tracing`.

use tracing::{debug, info, warn};

use crate::error::RangingError;
use crate::types::{Proximity, RangingStatus};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Every target reported resolved or failed.
    Completed,
    /// A pending completion's timeout elapsed.
    TimedOut,
    /// `stop_ranging` was called.
    Stopped,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::TimedOut => write!(f, "timed_out"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Coordinator lifecycle trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// A request was rejected before touching any session.
    RequestRejected {
        /// The negative status delivered to the caller.
        status: RangingStatus,
    },
    /// A new session started and radio commands were issued.
    SessionStarted {
        /// Session counter.
        generation: u64,
        /// Distinct targets in the session.
        targets: usize,
    },
    /// A request joined the already active session.
    CompletionAttached {
        /// Session counter.
        generation: u64,
        /// Completions now waiting.
        pending: usize,
    },
    /// A region was heard.
    RegionResolved {
        /// Region identifier.
        region_id: String,
        /// Signal strength in dBm.
        rssi: i16,
        /// Proximity classification.
        proximity: Proximity,
    },
    /// A region failed (ranging, monitoring, or start command).
    RegionFailed {
        /// Region identifier.
        region_id: String,
    },
    /// A pending completion's timeout elapsed while its session was active.
    TimeoutFired {
        /// Completion whose timer fired.
        completion_id: u64,
    },
    /// The session ended and all completions were flushed.
    SessionStopped {
        /// Session counter.
        generation: u64,
        /// Why it ended.
        reason: StopReason,
        /// Targets heard.
        resolved: usize,
        /// Targets failed.
        failed: usize,
        /// Completions delivered.
        delivered: usize,
    },
}

/// Receives lifecycle trace events.
pub trait EventSink: Send + Sync {
    /// Record one event. Must not block.
    fn record(&self, event: &LifecycleEvent);
}

/// Told about requests rejected by a failed precondition.
pub trait FailureObserver: Send + Sync {
    /// Called once per offending request.
    fn on_failure(&self, error: &RangingError);
}

/// [`EventSink`] that writes to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn record(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::RequestRejected { status } => {
                warn!(%status, "Ranging request rejected");
            }
            LifecycleEvent::SessionStarted {
                generation,
                targets,
            } => {
                info!(generation, targets, "Ranging session started");
            }
            LifecycleEvent::CompletionAttached {
                generation,
                pending,
            } => {
                debug!(generation, pending, "Attached to active ranging session");
            }
            LifecycleEvent::RegionResolved {
                region_id,
                rssi,
                proximity,
            } => {
                debug!(%region_id, rssi, %proximity, "Region ranged");
            }
            LifecycleEvent::RegionFailed { region_id } => {
                debug!(%region_id, "Region failed");
            }
            LifecycleEvent::TimeoutFired { completion_id } => {
                warn!(completion_id, "Ranging timeout fired, stopping session");
            }
            LifecycleEvent::SessionStopped {
                generation,
                reason,
                resolved,
                failed,
                delivered,
            } => {
                info!(
                    generation,
                    %reason,
                    resolved,
                    failed,
                    delivered,
                    "Ranging session stopped"
                );
            }
        }
    }
}

/// [`FailureObserver`] that writes to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingFailureObserver;

impl FailureObserver for TracingFailureObserver {
    fn on_failure(&self, error: &RangingError) {
        warn!(error_code = error.error_code(), %error, "Ranging precondition failed");
    }
}
