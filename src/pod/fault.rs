//! Pod faults: event codes, the detailed status report and the reference
//! string printed on the manufacturer's handheld.
//!
//! A faulted pod answers any command with a `PodInfoResponse` carrying a
//! [`DetailedStatus`]:
//!
//! ```text
//! 02 16 02 0J 0K LLLL MM NNNN PP QQQQ RRRR SSSS TT UU VV WW XX YYYY
//!          │  │  │    │  │    │  │    │    │    │  │  │  │  │  └ possible fault calling address
//!          │  │  │    │  │    │  │    │    │    │  │  │  │  └ unused
//!          │  │  │    │  │    │  │    │    │    │  │  │  └ gain / rssi
//!          │  │  │    │  │    │  │    │    │    │  │  └ error event info
//!          │  │  │    │  │    │  │    │    │    │  └ bit 1: fault accessing tables
//!          │  │  │    │  │    │  │    │    │    └ unacknowledged alerts
//!          │  │  │    │  │    │  │    │    └ minutes active
//!          │  │  │    │  │    │  │    └ reservoir pulses
//!          │  │  │    │  │    │  └ minutes since activation at fault (ffff = none)
//!          │  │  │    │  │    └ fault event code
//!          │  │  │    │  └ total pulses delivered
//!          │  │  │    └ last programming message seq
//!          │  │  └ bolus pulses not delivered
//!          │  └ delivery status
//!          └ pod progress
//! ```

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use super::alerts::AlertSet;
use super::status::{DeliveryStatus, PodProgressStatus};
use crate::core::{MessageError, PULSES_PER_UNIT, RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER};

/// Length of the detailed status body, subtype byte included.
pub const DETAILED_STATUS_LENGTH: usize = 22;

/// Pod info subtype of the detailed status.
pub const DETAILED_STATUS_SUBTYPE: u8 = 0x02;

/// Fault event code reported by the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FaultEventCode(pub u8);

impl FaultEventCode {
    /// No fault.
    pub const NO_FAULTS: Self = Self(0x00);
    /// Flash erase failed.
    pub const FAILED_FLASH_ERASE: Self = Self(0x01);
    /// Flash store failed.
    pub const FAILED_FLASH_STORE: Self = Self(0x02);
    /// Basal subcommand table corruption.
    pub const TABLE_CORRUPTION_BASAL_SUBCOMMAND: Self = Self(0x03);
    /// Basal pulse table corruption.
    pub const BASAL_PULSE_TABLE_CORRUPTION: Self = Self(0x04);
    /// RTC interrupt handler called in an inconsistent state.
    pub const RTC_INTERRUPT_HANDLER_INCONSISTENT_STATE: Self = Self(0x07);
    /// Temp basal subcommand table corruption.
    pub const TABLE_CORRUPTION_TEMP_BASAL_SUBCOMMAND: Self = Self(0x0B);
    /// Reset due to COP.
    pub const RESET_DUE_TO_COP: Self = Self(0x0D);
    /// Reset due to low voltage.
    pub const RESET_DUE_TO_LVD: Self = Self(0x12);
    /// Message length too long.
    pub const MESSAGE_LENGTH_TOO_LONG: Self = Self(0x13);
    /// Occlusion detected.
    pub const OCCLUDED: Self = Self(0x14);
    /// Corruption in a validated table.
    pub const CORRUPTION_IN_A_VALIDATED_TABLE: Self = Self(0x17);
    /// Reservoir empty or maximum pulses delivered.
    pub const RESERVOIR_EMPTY: Self = Self(0x18);
    /// Exceeded maximum pod life of 80 hours.
    pub const EXCEEDED_MAXIMUM_POD_LIFE_80_HRS: Self = Self(0x1C);
    /// Sum mismatch in a validated table.
    pub const WRONG_SUMMARY_FOR_TABLE_129: Self = Self(0x1F);
    /// Validate encoder count error while bolusing.
    pub const VALIDATE_COUNT_ERROR_WHEN_BOLUSING: Self = Self(0x20);
    /// Bad timer variable state.
    pub const BAD_TIMER_VARIABLE_STATE: Self = Self(0x21);
    /// Tick failure.
    pub const TICK_FAILURE: Self = Self(0x25);
    /// Failed to set up the 2 hour fill alert.
    pub const MISSING_2_HOUR_ALERT_TO_FILL_TANK: Self = Self(0x27);
    /// Bad argument or state during setup.
    pub const FAULT_EVENT_SETUP_POD: Self = Self(0x28);
    /// Alert 0 auto-off timeout.
    pub const AUTO_OFF_0: Self = Self(0x29);
    /// Alert 7 auto-off timeout.
    pub const AUTO_OFF_7: Self = Self(0x30);
    /// Incorrect pod state for an insulin command.
    pub const INSULIN_DELIVERY_COMMAND_ERROR: Self = Self(0x31);
    /// Bad value during startup testing.
    pub const BAD_VALUE_STARTUP_TEST: Self = Self(0x32);
    /// Connected pod command timeout.
    pub const CONNECTED_POD_COMMAND_TIMEOUT: Self = Self(0x33);
    /// Reset from unknown cause.
    pub const RESET_FROM_UNKNOWN_CAUSE: Self = Self(0x34);
    /// Problem with the pump anchor.
    pub const PROBLEM_WITH_PUMP_ANCHOR: Self = Self(0x3D);
    /// Encoder count too high.
    pub const ENCODER_COUNT_TOO_HIGH: Self = Self(0x40);
    /// Encoder count too low.
    pub const ENCODER_COUNT_TOO_LOW: Self = Self(0x42);
    /// Bad timer calibration.
    pub const BAD_TIMER_CALIBRATION: Self = Self(0x48);
    /// Unexpected RF error flag during reset.
    pub const UNEXPECTED_RF_ERROR_FLAG_DURING_RESET: Self = Self(0x4F);
    /// Tick count error.
    pub const TICKCNT_ERROR: Self = Self(0x51);
    /// Bad RFM crystal start.
    pub const BAD_RFM_XTAL_START: Self = Self(0x52);
    /// Bad receive sensitivity.
    pub const BAD_RX_SENSITIVITY: Self = Self(0x53);
    /// Packet frame length too long.
    pub const PACKET_FRAME_LENGTH_TOO_LONG: Self = Self(0x54);
    /// Occlusion check value too high.
    pub const OCCLUSION_CHECK_VALUE_TOO_HIGH: Self = Self(0x5A);
    /// Prime open count too low.
    pub const PRIME_OPEN_COUNT_TOO_LOW: Self = Self(0x5C);
    /// Occlusion check above threshold.
    pub const OCCLUSION_CHECK_ABOVE_THRESHOLD: Self = Self(0x6A);
    /// Basal under infusion.
    pub const BASAL_UNDER_INFUSION: Self = Self(0x80);
    /// Basal over infusion.
    pub const BASAL_OVER_INFUSION: Self = Self(0x81);
    /// Bolus under infusion.
    pub const BOLUS_UNDER_INFUSION: Self = Self(0x84);
    /// Bolus over infusion.
    pub const BOLUS_OVER_INFUSION: Self = Self(0x85);
    /// Corruption of the delivery tables.
    pub const CORRUPTION_OF_TABLES: Self = Self(0x8B);
    /// Bad state clearing bolus variables.
    pub const BAD_STATE_IN_CLEAR_BOLUS_IST2_AND_VARS: Self = Self(0x96);
    /// Bad state in an internal counter.
    pub const BAD_STATE_IN_MAYBE_INC_33D: Self = Self(0x97);

    /// Get the raw value.
    pub fn raw(self) -> u8 {
        self.0
    }

    /// Check if this code reports a fault.
    pub fn is_fault(self) -> bool {
        self != Self::NO_FAULTS
    }

    /// Human readable description.
    pub fn description(self) -> &'static str {
        match self.0 {
            0x00 => "No fault",
            0x01 => "Flash erase failed",
            0x02 => "Flash store failed",
            0x03 => "Basal subcommand table corruption",
            0x04 => "Basal pulse table corruption",
            0x07 => "RTC interrupt handler called with inconsistent state",
            0x0B => "Temp basal subcommand table corruption",
            0x0D => "Reset due to COP",
            0x12 => "Reset due to LVD",
            0x13 => "Message length too long",
            0x14 => "Occluded",
            0x17 => "Corruption in a validated table",
            0x18 => "Reservoir empty or exceeded maximum pulse delivery",
            0x1C => "Exceeded maximum Pod life of 80 hours",
            0x1F => "Sum mismatch for word_129 table",
            0x20 => "Validate encoder count error when bolusing",
            0x21 => "Bad timer variable state",
            0x25 => "Tick failure",
            0x27 => "Failed to set up 2 hour alert for tank fill operation",
            0x28 => "Bad arg or state during pod setup",
            0x29..=0x30 => "Alert auto-off timeout",
            0x31 => "Incorrect pod state for command or error during insulin command setup",
            0x32 => "Bad value during startup testing",
            0x33 => "Connected Pod command timeout",
            0x34 => "Reset from unknown cause",
            0x3D => "Problem with pump anchor",
            0x40 => "Encoder count too high",
            0x42 => "Encoder count too low",
            0x48 => "Bad timer calibration",
            0x4F => "Unexpected RF error flag set during reset",
            0x51 => "Bad tick count state before starting pump",
            0x52 => "Bad RFM crystal start",
            0x53 => "Bad Rx sensitivity value",
            0x54 => "Packet frame length too long",
            0x5A => "Occlusion check value too high for detection",
            0x5C => "Prime open count too low",
            0x6A => "Occlusion check above threshold",
            0x80 => "Basal under infusion",
            0x81 => "Basal over infusion",
            0x84 => "Bolus under infusion",
            0x85 => "Bolus over infusion",
            0x8B => "Corruption of delivery tables",
            0x96 => "Bad variable state in clear_Bolus_IST2_and_vars",
            0x97 => "Bad variable state in maybe_inc_33D",
            _ => "Unknown fault code",
        }
    }

    /// Two-digit category shown at the start of the reference string.
    pub fn pdm_category(self) -> u8 {
        match self.0 {
            0x01..=0x06 | 0x08..=0x0B | 0x11 | 0x15..=0x17 | 0x1F | 0x8B => 1,
            0x07 | 0x21..=0x26 | 0x48..=0x4A | 0x51 => 7,
            0x18 => 14,
            0x29..=0x30 => 15,
            0x1C => 16,
            0x14 => 17,
            0x33 | 0x4F | 0x52..=0x54 => 20,
            _ => 19,
        }
    }
}

impl fmt::Display for FaultEventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fault Event Code {:#04x}: {}", self.0, self.description())
    }
}

/// The `VV` byte of a detailed status, valid only after a fault.
///
/// ```text
/// a bb c dddd
/// │ │  │ └ pod progress at the first logged fault
/// │ │  └ immediate bolus in progress
/// │ └ occlusion type
/// └ insulin state table corruption
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEventInfo(pub u8);

impl ErrorEventInfo {
    /// Insulin state table corruption found while logging the error.
    pub fn insulin_state_table_corruption(self) -> bool {
        self.0 & 0x80 != 0
    }

    /// Internal 2-bit occlusion type.
    pub fn occlusion_type(self) -> u8 {
        (self.0 & 0x60) >> 5
    }

    /// An immediate bolus was running at the time of the error.
    pub fn immediate_bolus_in_progress(self) -> bool {
        self.0 & 0x10 != 0
    }

    /// Pod progress when the fault was first logged.
    pub fn pod_progress_status(self) -> Result<PodProgressStatus, MessageError> {
        PodProgressStatus::from_byte(self.0 & 0x0F)
    }
}

/// Detailed pod status (pod info subtype 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStatus {
    /// Pod progress.
    pub pod_progress_status: PodProgressStatus,
    /// Delivery status.
    pub delivery_status: DeliveryStatus,
    /// Units of the last bolus that were not delivered.
    pub bolus_not_delivered: f64,
    /// Message number of the last programming command the pod accepted.
    pub last_programming_message_seq: u8,
    /// Total units delivered, setup included.
    pub total_insulin_delivered: f64,
    /// Fault event code.
    pub fault_event_code: FaultEventCode,
    /// Pod age when the fault happened.
    pub fault_event_time_since_activation: Option<Duration>,
    /// Reservoir level in units; the above-threshold sentinel above 50 U.
    pub reservoir_level: f64,
    /// Pod age.
    pub time_active: Duration,
    /// Alerts waiting for acknowledgement.
    pub unacknowledged_alerts: AlertSet,
    /// The fault happened while accessing the delivery tables.
    pub fault_accessing_tables: bool,
    /// Fault details from the `VV` byte.
    pub error_event_info: Option<ErrorEventInfo>,
    /// Receiver low gain (2 bits).
    pub receiver_low_gain: u8,
    /// Radio RSSI (6 bits).
    pub radio_rssi: u8,
    /// Possible calling address of the fault routine.
    pub possible_fault_calling_address: Option<u16>,
}

fn units_from_pulses(pulses: u16) -> f64 {
    f64::from(pulses) / PULSES_PER_UNIT
}

fn pulses_from_units(units: f64) -> u16 {
    (units * PULSES_PER_UNIT).round() as u16
}

impl DetailedStatus {
    /// Decode from the pod info body (subtype byte first).
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < DETAILED_STATUS_LENGTH {
            return Err(MessageError::NotEnoughData);
        }

        let fault_minutes = u16::from_be_bytes([data[9], data[10]]);
        let fault_event_code = FaultEventCode(data[8]);

        Ok(Self {
            pod_progress_status: PodProgressStatus::from_byte(data[1])?,
            delivery_status: DeliveryStatus::from_byte(data[2] & 0x0F)?,
            bolus_not_delivered: units_from_pulses((u16::from(data[3] & 0x03) << 8) | u16::from(data[4])),
            last_programming_message_seq: data[5],
            total_insulin_delivered: units_from_pulses(u16::from_be_bytes([data[6], data[7]])),
            fault_event_code,
            fault_event_time_since_activation: (fault_minutes != 0xFFFF)
                .then(|| Duration::from_secs(u64::from(fault_minutes) * 60)),
            reservoir_level: units_from_pulses((u16::from(data[11] & 0x03) << 8) | u16::from(data[12])),
            time_active: Duration::from_secs(u64::from(u16::from_be_bytes([data[13], data[14]])) * 60),
            unacknowledged_alerts: AlertSet::from_bits(data[15]),
            fault_accessing_tables: data[16] & 0x02 != 0,
            error_event_info: (data[17] != 0).then_some(ErrorEventInfo(data[17])),
            receiver_low_gain: data[18] >> 6,
            radio_rssi: data[18] & 0x3F,
            possible_fault_calling_address: fault_event_code
                .is_fault()
                .then(|| u16::from_be_bytes([data[20], data[21]])),
        })
    }

    /// Encode the pod info body (subtype byte first).
    pub fn encode(&self) -> [u8; DETAILED_STATUS_LENGTH] {
        let mut d = [0u8; DETAILED_STATUS_LENGTH];
        let not_delivered = pulses_from_units(self.bolus_not_delivered);
        let reservoir = pulses_from_units(self.reservoir_level);
        let fault_minutes = self
            .fault_event_time_since_activation
            .map_or(0xFFFF, |t| (t.as_secs() / 60) as u16);

        d[0] = DETAILED_STATUS_SUBTYPE;
        d[1] = self.pod_progress_status.as_byte();
        d[2] = self.delivery_status.as_byte();
        d[3] = ((not_delivered >> 8) & 0x03) as u8;
        d[4] = not_delivered as u8;
        d[5] = self.last_programming_message_seq;
        d[6..8].copy_from_slice(&pulses_from_units(self.total_insulin_delivered).to_be_bytes());
        d[8] = self.fault_event_code.0;
        d[9..11].copy_from_slice(&fault_minutes.to_be_bytes());
        d[11] = ((reservoir >> 8) & 0x03) as u8;
        d[12] = reservoir as u8;
        d[13..15].copy_from_slice(&((self.time_active.as_secs() / 60) as u16).to_be_bytes());
        d[15] = self.unacknowledged_alerts.bits();
        d[16] = u8::from(self.fault_accessing_tables) << 1;
        d[17] = self.error_event_info.map_or(0, |info| info.0);
        d[18] = (self.receiver_low_gain << 6) | (self.radio_rssi & 0x3F);
        d[20..22].copy_from_slice(&self.possible_fault_calling_address.unwrap_or(0).to_be_bytes());
        d
    }

    /// Check if the pod is faulted or timed out during activation.
    pub fn is_faulted(&self) -> bool {
        self.fault_event_code.is_fault()
            || self.pod_progress_status == PodProgressStatus::ActivationTimeExceeded
    }

    /// Reference string `TT-VVVHH-IIIRR-FFF` shown by the handheld.
    ///
    /// `None` when the pod has no fault.
    pub fn pdm_ref(&self) -> Option<String> {
        let code = self.fault_event_code;
        if !code.is_fault() {
            return None;
        }
        if code == FaultEventCode::INSULIN_DELIVERY_COMMAND_ERROR {
            return Some("11-144-0018-00049".to_string());
        }

        let category = code.pdm_category();
        let (value, fault) = if code == FaultEventCode::OCCLUDED {
            (0, 0)
        } else {
            (
                u16::from(self.error_event_info.map_or(0, |info| info.0)),
                u16::from(code.0),
            )
        };
        let hours = self.time_active.as_secs() / 3600;
        let delivered = self.total_insulin_delivered.trunc() as u32;
        let reservoir = if self.reservoir_level >= RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER {
            51
        } else {
            self.reservoir_level.trunc() as u32
        };

        Some(format!(
            "{category:02}-{value:03}{hours:02}-{delivered:03}{reservoir:02}-{fault:03}"
        ))
    }
}

/// A captured fault. Never changes once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultRecord {
    /// Status report that carried the fault.
    pub status: DetailedStatus,
    /// When the controller captured it.
    pub captured_at: SystemTime,
}

impl FaultRecord {
    /// Capture a fault report.
    pub fn new(status: DetailedStatus, captured_at: SystemTime) -> Self {
        Self {
            status,
            captured_at,
        }
    }

    /// Fault event code.
    pub fn code(&self) -> FaultEventCode {
        self.status.fault_event_code
    }

    /// Pod progress at fault time.
    pub fn pod_progress(&self) -> PodProgressStatus {
        self.status.pod_progress_status
    }

    /// Units of the running bolus that were not delivered.
    pub fn insulin_not_delivered(&self) -> f64 {
        self.status.bolus_not_delivered
    }

    /// Reference string for the handheld.
    pub fn pdm_ref(&self) -> Option<String> {
        self.status.pdm_ref()
    }
}
