//! Radio and permission seams.
//!
//! The coordinator never touches platform APIs directly. It issues
//! start/stop commands through a [`RadioAdapter`], asks a
//! [`PermissionProvider`] for the authorization state, and consumes a stream
//! of [`RadioEvent`]s keyed by region identifier.
//!
//! Adapters must not call back into the coordinator synchronously from
//! `start_ranging`/`stop_ranging`: those run inside the coordinator's
//! critical section. Deliver events through a channel or a spawned task.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::Result;
use crate::types::{AuthorizationStatus, BeaconRegion, Proximity};

/// Bluetooth SIG company identifier carried by iBeacon advertisements.
pub const IBEACON_COMPANY_ID: u16 = 0x004C;

const IBEACON_TYPE: u8 = 0x02;
const IBEACON_LENGTH: u8 = 0x15;
const IBEACON_FRAME_LEN: usize = 23;

/// Platform beacon-ranging stack.
pub trait RadioAdapter: Send + Sync {
    /// Whether the platform can range beacons at all.
    fn is_ranging_available(&self) -> bool;

    /// Begin ranging `region`. Results arrive later as [`RadioEvent`]s.
    ///
    /// # Errors
    ///
    /// Returns an error if the command was refused outright. The coordinator
    /// counts the region as failed.
    fn start_ranging(&self, region: &BeaconRegion) -> Result<()>;

    /// Stop ranging `region`. Must be idempotent.
    fn stop_ranging(&self, region: &BeaconRegion);
}

/// Source of the current location authorization state.
pub trait PermissionProvider: Send + Sync {
    /// Current authorization state.
    fn authorization_status(&self) -> AuthorizationStatus;
}

/// A permission provider that always reports the same state.
///
/// Useful for hosts (daemons, tests) with no interactive permission model.
#[derive(Debug, Clone, Copy)]
pub struct StaticPermission(pub AuthorizationStatus);

impl PermissionProvider for StaticPermission {
    fn authorization_status(&self) -> AuthorizationStatus {
        self.0
    }
}

/// Asynchronous notification from the radio stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RadioEvent {
    /// A single reading for a region.
    RangingUpdate {
        /// Region identifier.
        region_id: String,
        /// Signal strength in dBm.
        rssi: i16,
        /// Proximity classification.
        proximity: Proximity,
    },

    /// Raw ranging callback carrying every beacon heard in the region.
    /// Translated to a `RangingUpdate` for the strongest beacon; an empty
    /// list carries no information and is ignored.
    BeaconsRanged {
        /// Region identifier.
        region_id: String,
        /// Beacons heard in this ranging pass.
        beacons: Vec<RangedBeacon>,
    },

    /// Ranging could not be performed for the region.
    RangingFailed {
        /// Region identifier.
        region_id: String,
    },

    /// Region monitoring failed for the region.
    MonitoringFailed {
        /// Region identifier.
        region_id: String,
    },
}

impl RadioEvent {
    /// The region this event refers to.
    #[must_use]
    pub fn region_id(&self) -> &str {
        match self {
            Self::RangingUpdate { region_id, .. }
            | Self::BeaconsRanged { region_id, .. }
            | Self::RangingFailed { region_id }
            | Self::MonitoringFailed { region_id } => region_id,
        }
    }

    /// Collapse a raw `BeaconsRanged` callback into a single update.
    ///
    /// Other variants are returned unchanged. `None` means the event carries
    /// nothing actionable.
    #[must_use]
    pub fn translate(self) -> Option<Self> {
        match self {
            Self::BeaconsRanged { region_id, beacons } => RangedBeacon::strongest(&beacons)
                .map(|beacon| Self::RangingUpdate {
                    region_id,
                    rssi: beacon.rssi,
                    proximity: beacon.proximity,
                }),
            other => Some(other),
        }
    }
}

/// One beacon reading from a ranging pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RangedBeacon {
    /// Signal strength in dBm. Zero means the platform had no reading.
    pub rssi: i16,
    /// Proximity classification.
    pub proximity: Proximity,
}

impl RangedBeacon {
    /// Pick the beacon to report for a region: the closest proximity bucket,
    /// ties broken by the strongest signal. Readings with RSSI 0 are only
    /// chosen when nothing better exists.
    #[must_use]
    pub fn strongest(beacons: &[Self]) -> Option<&Self> {
        beacons.iter().min_by_key(|b| {
            let no_reading = b.rssi == 0;
            (no_reading, b.proximity.rank(), -i32::from(b.rssi))
        })
    }
}

/// Decoded iBeacon advertisement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IBeaconFrame {
    /// Proximity UUID.
    pub uuid: Uuid,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
    /// Calibrated RSSI at one metre.
    pub tx_power: i8,
}

/// Parse manufacturer-specific advertisement data as an iBeacon frame.
///
/// Returns `None` unless `company_id` is Apple's and the payload has the
/// iBeacon type/length prefix.
#[must_use]
pub fn parse_ibeacon(company_id: u16, data: &[u8]) -> Option<IBeaconFrame> {
    if company_id != IBEACON_COMPANY_ID || data.len() < IBEACON_FRAME_LEN {
        return None;
    }
    if data[0] != IBEACON_TYPE || data[1] != IBEACON_LENGTH {
        return None;
    }

    let uuid = Uuid::from_slice(&data[2..18]).ok()?;
    let major = u16::from_be_bytes([data[18], data[19]]);
    let minor = u16::from_be_bytes([data[20], data[21]]);
    let tx_power = i8::from_be_bytes([data[22]]);

    Some(IBeaconFrame {
        uuid,
        major,
        minor,
        tx_power,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ibeacon_payload(uuid: Uuid, major: u16, minor: u16, tx_power: i8) -> Vec<u8> {
        let mut data = vec![IBEACON_TYPE, IBEACON_LENGTH];
        data.extend_from_slice(uuid.as_bytes());
        data.extend_from_slice(&major.to_be_bytes());
        data.extend_from_slice(&minor.to_be_bytes());
        data.extend_from_slice(&tx_power.to_be_bytes());
        data
    }

    #[test]
    fn test_parse_ibeacon() {
        let uuid = Uuid::from_u128(0x2f23_4454_cf6d_4a0f_adf2_f491_1ba9_ffa6);
        let data = ibeacon_payload(uuid, 100, 7, -59);

        let frame = parse_ibeacon(IBEACON_COMPANY_ID, &data).unwrap();
        assert_eq!(frame.uuid, uuid);
        assert_eq!(frame.major, 100);
        assert_eq!(frame.minor, 7);
        assert_eq!(frame.tx_power, -59);
    }

    #[test]
    fn test_parse_ibeacon_rejects_other_frames() {
        let data = ibeacon_payload(Uuid::nil(), 1, 1, -59);
        assert!(parse_ibeacon(0x0006, &data).is_none());
        assert!(parse_ibeacon(IBEACON_COMPANY_ID, &data[..10]).is_none());

        let mut wrong_type = data;
        wrong_type[0] = 0x10;
        assert!(parse_ibeacon(IBEACON_COMPANY_ID, &wrong_type).is_none());
    }

    #[test]
    fn test_strongest_prefers_closest_bucket() {
        let beacons = vec![
            RangedBeacon {
                rssi: -50,
                proximity: Proximity::Far,
            },
            RangedBeacon {
                rssi: -70,
                proximity: Proximity::Near,
            },
            RangedBeacon {
                rssi: -65,
                proximity: Proximity::Near,
            },
        ];
        let best = RangedBeacon::strongest(&beacons).unwrap();
        assert_eq!(best.rssi, -65);
        assert_eq!(best.proximity, Proximity::Near);
    }

    #[test]
    fn test_strongest_skips_missing_readings() {
        let beacons = vec![
            RangedBeacon {
                rssi: 0,
                proximity: Proximity::Immediate,
            },
            RangedBeacon {
                rssi: -80,
                proximity: Proximity::Far,
            },
        ];
        assert_eq!(RangedBeacon::strongest(&beacons).unwrap().rssi, -80);
        assert!(RangedBeacon::strongest(&[]).is_none());
    }

    #[test]
    fn test_translate_beacons_ranged() {
        let event = RadioEvent::BeaconsRanged {
            region_id: "a".into(),
            beacons: vec![RangedBeacon {
                rssi: -61,
                proximity: Proximity::Near,
            }],
        };
        assert_eq!(
            event.translate(),
            Some(RadioEvent::RangingUpdate {
                region_id: "a".into(),
                rssi: -61,
                proximity: Proximity::Near,
            })
        );

        let empty = RadioEvent::BeaconsRanged {
            region_id: "a".into(),
            beacons: vec![],
        };
        assert_eq!(empty.translate(), None);
    }

    #[test]
    fn test_event_deserializes_from_tagged_json() {
        let event: RadioEvent =
            serde_json::from_str(r#"{"type":"ranging_failed","region_id":"b"}"#).unwrap();
        assert_eq!(event.region_id(), "b");
        assert!(matches!(event, RadioEvent::RangingFailed { .. }));
    }

    #[test]
    fn test_static_permission() {
        let provider = StaticPermission(AuthorizationStatus::Denied);
        assert_eq!(provider.authorization_status(), AuthorizationStatus::Denied);
    }
}
