//! Response blocks sent by the pod.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{MessageError, PULSES_PER_UNIT};
use crate::pod::fault::DETAILED_STATUS_SUBTYPE;
use crate::pod::{AlertSet, DeliveryStatus, DetailedStatus, FaultEventCode, PodProgressStatus};

use super::MessageBlockType;

/// Error code the pod uses for a nonce it did not expect.
pub const BAD_NONCE_ERROR_CODE: u8 = 0x14;

const STATUS_RESPONSE_LENGTH: usize = 10;
const VERSION_SHORT_BODY: u8 = 0x15;
const VERSION_LONG_BODY: u8 = 0x1B;

fn units(pulses: u16) -> f64 {
    f64::from(pulses) / PULSES_PER_UNIT
}

fn pulses(units: f64) -> u16 {
    (units * PULSES_PER_UNIT).round() as u16
}

fn be32(data: &[u8]) -> u32 {
    u32::from_be_bytes([data[0], data[1], data[2], data[3]])
}

/// Routine pod status.
///
/// ```text
/// 1d SS 0PPP SN NN AA AA TT TR RR
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct StatusResponse {
    /// What the pod is delivering.
    pub delivery_status: DeliveryStatus,
    /// Pod lifecycle progress.
    pub pod_progress_status: PodProgressStatus,
    /// Pod age, minute resolution.
    pub time_active: Duration,
    /// Reservoir level; 51.15 means above 50 U.
    pub reservoir_level: f64,
    /// Total units delivered, setup included.
    pub insulin_delivered: f64,
    /// Units of the last bolus not yet delivered.
    pub bolus_not_delivered: f64,
    /// Message number of the last programming command the pod accepted.
    pub last_programming_message_seq: u8,
    /// Active alert slots.
    pub alerts: AlertSet,
}

impl StatusResponse {
    /// Decode from block bytes, type byte first.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < STATUS_RESPONSE_LENGTH {
            return Err(MessageError::NotEnoughData);
        }
        let delivered = (u16::from(data[2] & 0x0F) << 9) | (u16::from(data[3]) << 1) | u16::from(data[4] >> 7);
        let not_delivered = (u16::from(data[4] & 0x07) << 8) | u16::from(data[5]);
        let alert_bits = (u16::from(data[6]) << 1) | u16::from(data[7] >> 7);
        let minutes = (u16::from(data[7] & 0x7F) << 6) | u16::from(data[8] >> 2);
        let reservoir = (u16::from(data[8] & 0x03) << 8) | u16::from(data[9]);

        Ok(Self {
            delivery_status: DeliveryStatus::from_byte(data[1] >> 4)?,
            pod_progress_status: PodProgressStatus::from_byte(data[1] & 0x0F)?,
            time_active: Duration::from_secs(u64::from(minutes) * 60),
            reservoir_level: units(reservoir),
            insulin_delivered: units(delivered),
            bolus_not_delivered: units(not_delivered),
            last_programming_message_seq: (data[4] >> 3) & 0x0F,
            alerts: AlertSet::from_bits(alert_bits as u8),
        })
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let delivered = pulses(self.insulin_delivered) & 0x1FFF;
        let not_delivered = pulses(self.bolus_not_delivered) & 0x07FF;
        let alerts = u16::from(self.alerts.bits());
        let minutes = (self.time_active.as_secs() / 60) as u16 & 0x1FFF;
        let reservoir = pulses(self.reservoir_level) & 0x03FF;

        vec![
            MessageBlockType::StatusResponse as u8,
            (self.delivery_status.as_byte() << 4) | self.pod_progress_status.as_byte(),
            (delivered >> 9) as u8,
            (delivered >> 1) as u8,
            ((delivered & 1) << 7) as u8
                | ((self.last_programming_message_seq & 0x0F) << 3)
                | (not_delivered >> 8) as u8,
            not_delivered as u8,
            (alerts >> 1) as u8,
            ((alerts & 1) << 7) as u8 | (minutes >> 6) as u8,
            ((minutes & 0x3F) << 2) as u8 | (reservoir >> 8) as u8,
            reservoir as u8,
        ]
    }
}

impl From<&DetailedStatus> for StatusResponse {
    fn from(status: &DetailedStatus) -> Self {
        Self {
            delivery_status: status.delivery_status,
            pod_progress_status: status.pod_progress_status,
            time_active: status.time_active,
            reservoir_level: status.reservoir_level,
            insulin_delivered: status.total_insulin_delivered,
            bolus_not_delivered: status.bolus_not_delivered,
            last_programming_message_seq: status.last_programming_message_seq,
            alerts: status.unacknowledged_alerts,
        }
    }
}

/// Three-part firmware version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Major.
    pub major: u8,
    /// Minor.
    pub minor: u8,
    /// Patch.
    pub patch: u8,
}

impl FirmwareVersion {
    fn decode(data: &[u8]) -> Self {
        Self {
            major: data[0],
            minor: data[1],
            patch: data[2],
        }
    }

    fn encode(&self) -> [u8; 3] {
        [self.major, self.minor, self.patch]
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Physical constants a pod reports in reply to `SetupPod`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetupConstants {
    /// Units per pulse.
    pub pulse_size: f64,
    /// Seconds between bolus pulses.
    pub seconds_per_bolus_pulse: f64,
    /// Seconds between prime pulses.
    pub seconds_per_prime_pulse: f64,
    /// Units used to prime.
    pub prime_units: f64,
    /// Units used to insert the cannula.
    pub cannula_insertion_units: f64,
    /// Service life.
    pub service_duration: Duration,
}

/// Pod identity and firmware.
///
/// The short form answers `AssignAddress`; the long form answers `SetupPod`
/// and also carries the pod's [`SetupConstants`].
#[derive(Debug, Clone, PartialEq)]
pub struct VersionResponse {
    /// Pod main firmware.
    pub pm_version: FirmwareVersion,
    /// Pod interface firmware.
    pub pi_version: FirmwareVersion,
    /// Product id.
    pub product_id: u8,
    /// Pod lifecycle progress.
    pub pod_progress_status: PodProgressStatus,
    /// Lot number.
    pub lot: u32,
    /// Serial number.
    pub tid: u32,
    /// Pod address.
    pub address: u32,
    /// Receiver gain; short form only.
    pub gain: Option<u8>,
    /// Signal strength; short form only.
    pub rssi: Option<u8>,
    /// Physical constants; long form only.
    pub setup_constants: Option<SetupConstants>,
}

impl VersionResponse {
    /// Decode from block bytes, type byte first.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let length = *data.get(1).ok_or(MessageError::NotEnoughData)?;
        if data.len() < usize::from(length) + 2 {
            return Err(MessageError::NotEnoughData);
        }
        match length {
            VERSION_SHORT_BODY => Ok(Self {
                pm_version: FirmwareVersion::decode(&data[2..5]),
                pi_version: FirmwareVersion::decode(&data[5..8]),
                product_id: data[8],
                pod_progress_status: PodProgressStatus::from_byte(data[9])?,
                lot: be32(&data[10..14]),
                tid: be32(&data[14..18]),
                gain: Some(data[18] >> 6),
                rssi: Some(data[18] & 0x3F),
                address: be32(&data[19..23]),
                setup_constants: None,
            }),
            VERSION_LONG_BODY => Ok(Self {
                setup_constants: Some(SetupConstants {
                    pulse_size: f64::from(u16::from_be_bytes([data[2], data[3]])) / 100_000.0,
                    seconds_per_bolus_pulse: f64::from(data[4]) / 8.0,
                    seconds_per_prime_pulse: f64::from(data[5]) / 8.0,
                    prime_units: f64::from(data[6]) / PULSES_PER_UNIT,
                    cannula_insertion_units: f64::from(data[7]) / PULSES_PER_UNIT,
                    service_duration: Duration::from_secs(u64::from(data[8]) * 3600),
                }),
                pm_version: FirmwareVersion::decode(&data[9..12]),
                pi_version: FirmwareVersion::decode(&data[12..15]),
                product_id: data[15],
                pod_progress_status: PodProgressStatus::from_byte(data[16])?,
                lot: be32(&data[17..21]),
                tid: be32(&data[21..25]),
                address: be32(&data[25..29]),
                gain: None,
                rssi: None,
            }),
            value => Err(MessageError::UnknownValue {
                value,
                type_name: "VersionResponse length",
            }),
        }
    }

    /// Encode to block bytes; long form when setup constants are present.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![MessageBlockType::VersionResponse as u8];
        match &self.setup_constants {
            Some(constants) => {
                out.push(VERSION_LONG_BODY);
                out.extend_from_slice(&((constants.pulse_size * 100_000.0).round() as u16).to_be_bytes());
                out.push((constants.seconds_per_bolus_pulse * 8.0).round() as u8);
                out.push((constants.seconds_per_prime_pulse * 8.0).round() as u8);
                out.push((constants.prime_units * PULSES_PER_UNIT).round() as u8);
                out.push((constants.cannula_insertion_units * PULSES_PER_UNIT).round() as u8);
                out.push((constants.service_duration.as_secs() / 3600) as u8);
                out.extend_from_slice(&self.pm_version.encode());
                out.extend_from_slice(&self.pi_version.encode());
                out.push(self.product_id);
                out.push(self.pod_progress_status.as_byte());
                out.extend_from_slice(&self.lot.to_be_bytes());
                out.extend_from_slice(&self.tid.to_be_bytes());
            }
            None => {
                out.push(VERSION_SHORT_BODY);
                out.extend_from_slice(&self.pm_version.encode());
                out.extend_from_slice(&self.pi_version.encode());
                out.push(self.product_id);
                out.push(self.pod_progress_status.as_byte());
                out.extend_from_slice(&self.lot.to_be_bytes());
                out.extend_from_slice(&self.tid.to_be_bytes());
                out.push((self.gain.unwrap_or(0) << 6) | (self.rssi.unwrap_or(0) & 0x3F));
            }
        }
        out.extend_from_slice(&self.address.to_be_bytes());
        out
    }

    /// Check if the two hour activation window has passed.
    pub fn is_activation_time_exceeded(&self) -> bool {
        self.pod_progress_status == PodProgressStatus::ActivationTimeExceeded
    }
}

/// Command rejection.
///
/// ```text
/// 06 03 EE WW WW   bad nonce (EE = 0x14), WWWW = resync word
/// 06 03 EE FF PP   other rejection: fault code, progress
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorResponse {
    /// The pod expected a different nonce.
    BadNonce {
        /// Word to resync the nonce generator with.
        nonce_resync_key: u16,
    },
    /// Any other rejection; retrying will not help.
    Nonretryable {
        /// Error code.
        code: u8,
        /// Fault code reported alongside.
        fault_event_code: FaultEventCode,
        /// Pod progress at the time.
        pod_progress: PodProgressStatus,
    },
}

impl ErrorResponse {
    /// Decode from block bytes, type byte first.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < 5 {
            return Err(MessageError::NotEnoughData);
        }
        if data[2] == BAD_NONCE_ERROR_CODE {
            Ok(Self::BadNonce {
                nonce_resync_key: u16::from_be_bytes([data[3], data[4]]),
            })
        } else {
            Ok(Self::Nonretryable {
                code: data[2],
                fault_event_code: FaultEventCode(data[3]),
                pod_progress: PodProgressStatus::from_byte(data[4])?,
            })
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![MessageBlockType::ErrorResponse as u8, 0x03];
        match self {
            Self::BadNonce { nonce_resync_key } => {
                out.push(BAD_NONCE_ERROR_CODE);
                out.extend_from_slice(&nonce_resync_key.to_be_bytes());
            }
            Self::Nonretryable {
                code,
                fault_event_code,
                pod_progress,
            } => {
                out.extend_from_slice(&[*code, fault_event_code.raw(), pod_progress.as_byte()]);
            }
        }
        out
    }
}

/// Pod info subtypes, used both in `GetStatus` requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PodInfoType {
    /// Plain [`StatusResponse`].
    Normal = 0x00,
    /// Alert trigger times.
    TriggeredAlerts = 0x01,
    /// [`DetailedStatus`].
    DetailedStatus = DETAILED_STATUS_SUBTYPE,
    /// Pulse log with extra header.
    PulseLogPlus = 0x03,
    /// Activation time.
    ActivationTime = 0x05,
    /// Most recent pulse log entries.
    PulseLogRecent = 0x50,
    /// Previous pulse log entries.
    PulseLogPrevious = 0x51,
}

impl PodInfoType {
    /// Parse a subtype byte.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0x00 => Self::Normal,
            0x01 => Self::TriggeredAlerts,
            DETAILED_STATUS_SUBTYPE => Self::DetailedStatus,
            0x03 => Self::PulseLogPlus,
            0x05 => Self::ActivationTime,
            0x50 => Self::PulseLogRecent,
            0x51 => Self::PulseLogPrevious,
            value => {
                return Err(MessageError::UnknownValue {
                    value,
                    type_name: "PodInfoType",
                })
            }
        })
    }
}

/// Reply to a `GetStatus` asking for anything but the normal status.
#[derive(Debug, Clone, PartialEq)]
pub enum PodInfoResponse {
    /// Detailed status, which also reports faults.
    DetailedStatus(DetailedStatus),
    /// Any other subtype, kept raw.
    Other {
        /// Subtype.
        info_type: PodInfoType,
        /// Body after the subtype byte.
        data: Vec<u8>,
    },
}

impl PodInfoResponse {
    /// Decode from block bytes, type byte first.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let length = usize::from(*data.get(1).ok_or(MessageError::NotEnoughData)?);
        let body = data.get(2..2 + length).ok_or(MessageError::NotEnoughData)?;
        let info_type = PodInfoType::from_byte(*body.first().ok_or(MessageError::NotEnoughData)?)?;
        match info_type {
            PodInfoType::DetailedStatus => Ok(Self::DetailedStatus(DetailedStatus::decode(body)?)),
            _ => Ok(Self::Other {
                info_type,
                data: body[1..].to_vec(),
            }),
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body = match self {
            Self::DetailedStatus(status) => status.encode().to_vec(),
            Self::Other { info_type, data } => {
                let mut body = vec![*info_type as u8];
                body.extend_from_slice(data);
                body
            }
        };
        let mut out = vec![MessageBlockType::PodInfoResponse as u8, body.len() as u8];
        out.extend_from_slice(&body);
        out
    }

    /// Subtype of this response.
    pub fn info_type(&self) -> PodInfoType {
        match self {
            Self::DetailedStatus(_) => PodInfoType::DetailedStatus,
            Self::Other { info_type, .. } => *info_type,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::AlertSlot;

    #[test]
    fn test_status_response_decode() {
        let data = hex::decode("1d18003f1800004297ff").unwrap();
        let status = StatusResponse::decode(&data).unwrap();
        assert_eq!(status.delivery_status, DeliveryStatus::ScheduledBasal);
        assert_eq!(status.pod_progress_status, PodProgressStatus::AboveFiftyUnits);
        assert_eq!(status.time_active, Duration::from_secs(4261 * 60));
        assert_eq!(status.reservoir_level, 51.15);
        assert_eq!(status.insulin_delivered, 6.3);
        assert_eq!(status.bolus_not_delivered, 0.0);
        assert_eq!(status.last_programming_message_seq, 3);
        assert!(status.alerts.is_empty());
        assert_eq!(status.encode(), data);
    }

    #[test]
    fn test_status_response_alert_bits() {
        let status = StatusResponse::decode(&hex::decode("1d28008200004446ebff").unwrap()).unwrap();
        assert!(status.alerts.contains(AlertSlot::Slot3ExpirationReminder));
        assert!(status.alerts.contains(AlertSlot::Slot7Expired));
        assert_eq!(status.alerts.iter().count(), 2);
    }

    #[test]
    fn test_version_response_short() {
        let data = hex::decode("0115031b0008080004020812a011000c175700ffffffff").unwrap();
        let version = VersionResponse::decode(&data).unwrap();
        assert_eq!(version.pm_version.to_string(), "3.27.0");
        assert_eq!(version.pi_version.to_string(), "8.8.0");
        assert_eq!(version.pod_progress_status, PodProgressStatus::ReminderInitialized);
        assert_eq!(version.lot, 0x0812_a011);
        assert_eq!(version.tid, 0x000c_1757);
        assert_eq!(version.address, 0xFFFF_FFFF);
        assert!(version.setup_constants.is_none());
        assert_eq!(version.encode(), data);
    }

    #[test]
    fn test_version_response_long() {
        let data = hex::decode("011b13881008340a50031b0008080004030812a011000c175717244389").unwrap();
        let version = VersionResponse::decode(&data).unwrap();
        let constants = version.setup_constants.unwrap();
        assert_eq!(constants.pulse_size, 0.05);
        assert_eq!(constants.seconds_per_bolus_pulse, 2.0);
        assert_eq!(constants.seconds_per_prime_pulse, 1.0);
        assert_eq!(constants.prime_units, 2.6);
        assert_eq!(constants.cannula_insertion_units, 0.5);
        assert_eq!(constants.service_duration, Duration::from_secs(80 * 3600));
        assert_eq!(version.pod_progress_status, PodProgressStatus::PairingCompleted);
        assert_eq!(version.address, 0x1724_4389);
        assert_eq!(version.encode(), data);
    }

    #[test]
    fn test_version_response_activation_time_exceeded() {
        let data = hex::decode("0115020700020700020e0000a5ad00053030971f086863").unwrap();
        let version = VersionResponse::decode(&data).unwrap();
        assert!(version.is_activation_time_exceeded());
        assert_eq!(version.gain, Some(2));
        assert_eq!(version.rssi, Some(0x17));
    }

    #[test]
    fn test_error_response() {
        let bad_nonce = ErrorResponse::decode(&hex::decode("0603142ea6").unwrap()).unwrap();
        assert_eq!(bad_nonce, ErrorResponse::BadNonce { nonce_resync_key: 0x2ea6 });

        let data = hex::decode("0603070008").unwrap();
        let other = ErrorResponse::decode(&data).unwrap();
        assert_eq!(
            other,
            ErrorResponse::Nonretryable {
                code: 7,
                fault_event_code: FaultEventCode(0),
                pod_progress: PodProgressStatus::AboveFiftyUnits,
            }
        );
        assert_eq!(other.encode(), data);
    }

    #[test]
    fn test_pod_info_other_kept_raw() {
        let data = hex::decode("020350aabb").unwrap();
        let info = PodInfoResponse::decode(&data).unwrap();
        assert_eq!(info.info_type(), PodInfoType::PulseLogRecent);
        assert_eq!(info.encode(), data);
    }
}
