//! Pod-reported progress and delivery enumerations.

use serde::{Deserialize, Serialize};

use crate::core::MessageError;

/// Pod-side lifecycle progress (the `0J` nibble of status responses).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PodProgressStatus {
    /// Freshly powered.
    Initialized = 0,
    /// Memory initialized.
    MemoryInitialized = 1,
    /// Waiting-for-pairing reminder armed.
    ReminderInitialized = 2,
    /// Address assigned and setup accepted.
    PairingCompleted = 3,
    /// Prime bolus running.
    Priming = 4,
    /// Prime bolus finished.
    PrimingCompleted = 5,
    /// Initial basal schedule programmed.
    BasalInitialized = 6,
    /// Cannula insertion bolus running.
    InsertingCannula = 7,
    /// Delivering, reservoir above 50 U.
    AboveFiftyUnits = 8,
    /// Delivering, reservoir at or below 50 U.
    FiftyOrLessUnits = 9,
    /// Unused.
    OneNotUsed = 10,
    /// Unused.
    TwoNotUsed = 11,
    /// Unused.
    ThreeNotUsed = 12,
    /// A fault event occurred.
    FaultEventOccurred = 13,
    /// Setup did not complete within the activation window.
    ActivationTimeExceeded = 14,
    /// Deactivated.
    Inactive = 15,
}

impl PodProgressStatus {
    /// Parse from the low nibble.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0 => Self::Initialized,
            1 => Self::MemoryInitialized,
            2 => Self::ReminderInitialized,
            3 => Self::PairingCompleted,
            4 => Self::Priming,
            5 => Self::PrimingCompleted,
            6 => Self::BasalInitialized,
            7 => Self::InsertingCannula,
            8 => Self::AboveFiftyUnits,
            9 => Self::FiftyOrLessUnits,
            10 => Self::OneNotUsed,
            11 => Self::TwoNotUsed,
            12 => Self::ThreeNotUsed,
            13 => Self::FaultEventOccurred,
            14 => Self::ActivationTimeExceeded,
            15 => Self::Inactive,
            value => {
                return Err(MessageError::UnknownValue {
                    value,
                    type_name: "PodProgressStatus",
                })
            }
        })
    }

    /// Get the raw value.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Setup is complete and the pod is delivering.
    pub fn ready_for_delivery(self) -> bool {
        matches!(self, Self::AboveFiftyUnits | Self::FiftyOrLessUnits)
    }
}

/// What the pod is currently delivering (the delivery nibble).
///
/// Bits 1 and 2 (basal, temp) are exclusive, as are bits 4 and 8 (bolus,
/// extended bolus); these are all reachable combinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeliveryStatus {
    /// Nothing running.
    Suspended = 0,
    /// Scheduled basal running.
    ScheduledBasal = 1,
    /// Temp basal running.
    TempBasalRunning = 2,
    /// Bolus while suspended; only seen while priming.
    Priming = 4,
    /// Bolus on top of scheduled basal.
    BolusInProgress = 5,
    /// Bolus on top of a temp basal.
    BolusAndTempBasal = 6,
    /// Extended bolus while suspended.
    ExtendedBolusWhileSuspended = 8,
    /// Extended bolus on top of scheduled basal.
    ExtendedBolusRunning = 9,
    /// Extended bolus on top of a temp basal.
    ExtendedBolusAndTempBasal = 10,
}

impl DeliveryStatus {
    /// Parse from the delivery nibble.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0 => Self::Suspended,
            1 => Self::ScheduledBasal,
            2 => Self::TempBasalRunning,
            4 => Self::Priming,
            5 => Self::BolusInProgress,
            6 => Self::BolusAndTempBasal,
            8 => Self::ExtendedBolusWhileSuspended,
            9 => Self::ExtendedBolusRunning,
            10 => Self::ExtendedBolusAndTempBasal,
            value => {
                return Err(MessageError::UnknownValue {
                    value,
                    type_name: "DeliveryStatus",
                })
            }
        })
    }

    /// Get the raw value.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// No basal is running.
    pub fn suspended(self) -> bool {
        matches!(
            self,
            Self::Suspended | Self::Priming | Self::ExtendedBolusWhileSuspended
        )
    }

    /// Some bolus is running.
    pub fn bolusing(self) -> bool {
        matches!(
            self,
            Self::BolusInProgress
                | Self::BolusAndTempBasal
                | Self::ExtendedBolusRunning
                | Self::ExtendedBolusAndTempBasal
                | Self::Priming
                | Self::ExtendedBolusWhileSuspended
        )
    }

    /// A temp basal is running.
    pub fn temp_basal_running(self) -> bool {
        matches!(
            self,
            Self::TempBasalRunning | Self::BolusAndTempBasal | Self::ExtendedBolusAndTempBasal
        )
    }
}

/// Set of delivery kinds, used as the cancel mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DeliveryType(u8);

impl DeliveryType {
    /// Nothing; a cancel with this mask only beeps.
    pub const NONE: Self = Self(0);
    /// Scheduled basal.
    pub const BASAL: Self = Self(0x01);
    /// Temp basal.
    pub const TEMP_BASAL: Self = Self(0x02);
    /// Bolus.
    pub const BOLUS: Self = Self(0x04);
    /// Everything; used for suspend.
    pub const ALL: Self = Self(0x07);

    /// Create from the raw mask.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0x07)
    }

    /// Get the raw mask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check if every kind in `other` is included.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    /// Union of two masks.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

/// Beep patterns the pod can play.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum BeepType {
    /// No beep; cancels a running beep.
    NoBeepCancel = 0x0,
    /// Four beeps.
    BeepBeepBeepBeep = 0x1,
    /// Alternating bips and beeps.
    BipBeepBipBeepBipBeepBipBeep = 0x2,
    /// Two bips.
    BipBip = 0x3,
    /// One beep.
    Beep = 0x4,
    /// Three beeps.
    BeepBeepBeep = 0x5,
    /// One long beep.
    Beeeeeep = 0x6,
    /// Six bips.
    BipBipBipbipBipBip = 0x7,
    /// Two long beeps.
    BeeepBeeep = 0x8,
    /// No beep; leaves a running beep alone.
    #[default]
    NoBeepNonCancel = 0xF,
}

impl BeepType {
    /// Parse from the raw nibble.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0x0 => Self::NoBeepCancel,
            0x1 => Self::BeepBeepBeepBeep,
            0x2 => Self::BipBeepBipBeepBipBeepBipBeep,
            0x3 => Self::BipBip,
            0x4 => Self::Beep,
            0x5 => Self::BeepBeepBeep,
            0x6 => Self::Beeeeeep,
            0x7 => Self::BipBipBipbipBipBip,
            0x8 => Self::BeeepBeeep,
            0xF => Self::NoBeepNonCancel,
            value => {
                return Err(MessageError::UnknownValue {
                    value,
                    type_name: "BeepType",
                })
            }
        })
    }

    /// Get the raw value.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// How much confirmation beeping the user wants for commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BeepPreference {
    /// Never beep.
    #[default]
    Silent,
    /// Beep for commands the user initiated.
    Manual,
    /// Beep for every command, including automatic ones.
    Extended,
}

impl BeepPreference {
    /// Whether a command should request a completion beep.
    pub fn should_beep_for(self, automatic: bool) -> bool {
        match self {
            BeepPreference::Silent => false,
            BeepPreference::Manual => !automatic,
            BeepPreference::Extended => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_status_flags() {
        assert!(DeliveryStatus::Suspended.suspended());
        assert!(DeliveryStatus::Priming.suspended());
        assert!(DeliveryStatus::Priming.bolusing());
        assert!(!DeliveryStatus::ScheduledBasal.bolusing());
        assert!(DeliveryStatus::BolusAndTempBasal.bolusing());
        assert!(DeliveryStatus::BolusAndTempBasal.temp_basal_running());
        assert!(!DeliveryStatus::BolusInProgress.temp_basal_running());
    }

    #[test]
    fn test_delivery_status_rejects_exclusive_bits() {
        assert!(DeliveryStatus::from_byte(3).is_err());
        assert!(DeliveryStatus::from_byte(12).is_err());
        assert_eq!(DeliveryStatus::from_byte(9).unwrap(), DeliveryStatus::ExtendedBolusRunning);
    }

    #[test]
    fn test_progress_ordering() {
        assert!(PodProgressStatus::PairingCompleted < PodProgressStatus::Priming);
        assert!(PodProgressStatus::AboveFiftyUnits.ready_for_delivery());
        assert!(!PodProgressStatus::InsertingCannula.ready_for_delivery());
        assert!(PodProgressStatus::from_byte(16).is_err());
    }

    #[test]
    fn test_delivery_type_mask() {
        let mask = DeliveryType::TEMP_BASAL.union(DeliveryType::BOLUS);
        assert!(mask.contains(DeliveryType::BOLUS));
        assert!(!mask.contains(DeliveryType::BASAL));
        assert!(DeliveryType::ALL.contains(mask));
        assert!(!DeliveryType::ALL.contains(DeliveryType::NONE));
    }

    #[test]
    fn test_beep_preference() {
        assert!(!BeepPreference::Silent.should_beep_for(false));
        assert!(BeepPreference::Manual.should_beep_for(false));
        assert!(!BeepPreference::Manual.should_beep_for(true));
        assert!(BeepPreference::Extended.should_beep_for(true));
    }
}
