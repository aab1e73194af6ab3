//! Shared value types for beacon ranging.
//!
//! Targets and regions describe *what* to range, [`Outcome`] describes what a
//! finished session observed. All of them are plain data: serializable, and
//! exposed as OpenAPI schemas so the server can reuse them directly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A beacon the caller wants ranged.
///
/// Identified by an opaque `id` chosen by the caller, plus the iBeacon
/// triple (proximity UUID, major, minor) the radio actually listens for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "id": "lobby-east",
    "uuid": "2f234454-cf6d-4a0f-adf2-f4911ba9ffa6",
    "major": 100,
    "minor": 1
}))]
pub struct BeaconTarget {
    /// Caller-chosen identifier, used as the region identifier.
    #[schema(example = "lobby-east")]
    pub id: String,

    /// Proximity UUID broadcast by the beacon.
    pub uuid: Uuid,

    /// Major value broadcast by the beacon.
    #[schema(example = 100)]
    pub major: u16,

    /// Minor value broadcast by the beacon.
    #[schema(example = 1)]
    pub minor: u16,
}

impl BeaconTarget {
    /// Create a new target.
    pub fn new(id: impl Into<String>, uuid: Uuid, major: u16, minor: u16) -> Self {
        Self {
            id: id.into(),
            uuid,
            major,
            minor,
        }
    }

    /// The region descriptor the radio is commanded with for this target.
    #[must_use]
    pub fn region(&self) -> BeaconRegion {
        BeaconRegion::from(self)
    }
}

/// Region descriptor passed to the radio on start/stop commands.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct BeaconRegion {
    /// Region identifier. Events from the radio are keyed by this value.
    pub identifier: String,

    /// Proximity UUID.
    pub uuid: Uuid,

    /// Major value.
    pub major: u16,

    /// Minor value.
    pub minor: u16,
}

impl BeaconRegion {
    /// Whether an advertisement with this triple belongs to the region.
    #[must_use]
    pub fn matches(&self, uuid: Uuid, major: u16, minor: u16) -> bool {
        self.uuid == uuid && self.major == major && self.minor == minor
    }
}

impl From<&BeaconTarget> for BeaconRegion {
    fn from(target: &BeaconTarget) -> Self {
        Self {
            identifier: target.id.clone(),
            uuid: target.uuid,
            major: target.major,
            minor: target.minor,
        }
    }
}

/// Coarse distance bucket reported for a ranged beacon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Proximity {
    /// The radio could not classify the distance.
    #[default]
    Unknown,
    /// Within roughly half a metre.
    Immediate,
    /// Within a few metres.
    Near,
    /// Further away but still heard.
    Far,
}

impl Proximity {
    /// Distance (metres) below which a beacon is `Immediate`.
    pub const IMMEDIATE_METRES: f64 = 0.5;

    /// Distance (metres) below which a beacon is `Near`.
    pub const NEAR_METRES: f64 = 3.0;

    /// Estimate a proximity bucket from a signal reading.
    ///
    /// `tx_power` is the calibrated RSSI at one metre, as broadcast in the
    /// iBeacon frame. An RSSI of zero means "no reading" and yields
    /// `Unknown`.
    #[must_use]
    pub fn from_rssi(rssi: i16, tx_power: i16) -> Self {
        if rssi == 0 || tx_power == 0 {
            return Self::Unknown;
        }

        let ratio = f64::from(rssi) / f64::from(tx_power);
        let distance = if ratio < 1.0 {
            ratio.powi(10)
        } else {
            0.899_76 * ratio.powf(7.7095) + 0.111
        };

        if distance < Self::IMMEDIATE_METRES {
            Self::Immediate
        } else if distance < Self::NEAR_METRES {
            Self::Near
        } else {
            Self::Far
        }
    }

    /// Ordering rank, closest first. `Unknown` sorts last.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Immediate => 0,
            Self::Near => 1,
            Self::Far => 2,
            Self::Unknown => 3,
        }
    }
}

impl std::fmt::Display for Proximity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::Immediate => write!(f, "immediate"),
            Self::Near => write!(f, "near"),
            Self::Far => write!(f, "far"),
        }
    }
}

/// Location authorization state reported by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationStatus {
    /// The user has not been asked yet.
    NotDetermined,
    /// The user refused location access.
    Denied,
    /// Access is blocked by policy (parental controls, MDM).
    Restricted,
    /// Access granted while the host app is in use.
    WhenInUse,
    /// Access granted at all times.
    Always,
}

impl AuthorizationStatus {
    /// Whether ranging is permitted in this state.
    #[inline]
    #[must_use]
    pub const fn is_authorized(self) -> bool {
        matches!(self, Self::WhenInUse | Self::Always)
    }
}

impl std::fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NotDetermined => "not_determined",
            Self::Denied => "denied",
            Self::Restricted => "restricted",
            Self::WhenInUse => "when_in_use",
            Self::Always => "always",
        };
        f.write_str(name)
    }
}

/// Status code carried by every [`Outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RangingStatus {
    /// The session ran (fully, partially, or it timed out).
    Success,
    /// Location authorization was insufficient at request time.
    PermissionDenied,
    /// The platform has no ranging capability.
    RadioUnavailable,
}

impl RangingStatus {
    /// Machine-readable code, matching the serialized form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PermissionDenied => "permission_denied",
            Self::RadioUnavailable => "radio_unavailable",
        }
    }
}

impl std::fmt::Display for RangingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated result delivered to every pending completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "status": "success",
    "resolved_ids": ["lobby-east"],
    "failed_ids": ["lobby-west"],
    "rssi": { "lobby-east": -60 },
    "proximity": { "lobby-east": "near" }
}))]
pub struct Outcome {
    /// How the request ended.
    pub status: RangingStatus,

    /// Targets that were heard, in the order they were requested.
    pub resolved_ids: Vec<String>,

    /// Targets the radio reported as failed.
    pub failed_ids: Vec<String>,

    /// Last RSSI reading (dBm) per resolved target.
    pub rssi: BTreeMap<String, i16>,

    /// Last proximity classification per resolved target.
    pub proximity: BTreeMap<String, Proximity>,
}

impl Outcome {
    /// An outcome with the given status and no data.
    #[must_use]
    pub const fn empty(status: RangingStatus) -> Self {
        Self {
            status,
            resolved_ids: Vec::new(),
            failed_ids: Vec::new(),
            rssi: BTreeMap::new(),
            proximity: BTreeMap::new(),
        }
    }

    /// Whether the request ran rather than being rejected up front.
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == RangingStatus::Success
    }
}

/// Coordinator lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RangingState {
    /// No session.
    Idle,
    /// A session is active and waiting on radio events.
    Ranging,
}

/// Point-in-time view of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionSnapshot {
    /// Session counter, incremented each time a session starts.
    pub generation: u64,

    /// Target ids in request order.
    pub target_ids: Vec<String>,

    /// Target ids heard so far.
    pub resolved_ids: Vec<String>,

    /// Target ids reported failed so far.
    pub failed_ids: Vec<String>,

    /// Completions waiting on this session.
    pub pending_completions: usize,
}
