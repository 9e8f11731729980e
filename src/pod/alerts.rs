//! Pod alert slots and their configuration encoding.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::status::BeepType;
use crate::core::{
    MessageError, END_OF_SERVICE_IMMINENT_WINDOW, EXPIRATION_ADVISORY_WINDOW, NOMINAL_POD_LIFE,
    PULSE_SIZE, PULSES_PER_UNIT, SERVICE_DURATION,
};

/// Encoded size of one alert configuration.
pub const ALERT_CONFIGURATION_LENGTH: usize = 6;

const MAX_DURATION_MINUTES: u64 = 0x1FF;

/// One of the pod's eight alert slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AlertSlot {
    /// Auto-off timer.
    Slot0AutoOff = 0,
    /// Unused.
    Slot1NotUsed = 1,
    /// One hour before the end of service.
    Slot2ShutdownImminent = 2,
    /// User reminder before expiry.
    Slot3ExpirationReminder = 3,
    /// Reservoir below the configured level.
    Slot4LowReservoir = 4,
    /// Periodic reminder while suspended.
    Slot5SuspendedReminder = 5,
    /// Suspend time ran out.
    Slot6SuspendTimeExpired = 6,
    /// Expiry, and the setup reminders before activation.
    Slot7Expired = 7,
}

impl AlertSlot {
    /// All slots in order.
    pub const ALL: [AlertSlot; 8] = [
        AlertSlot::Slot0AutoOff,
        AlertSlot::Slot1NotUsed,
        AlertSlot::Slot2ShutdownImminent,
        AlertSlot::Slot3ExpirationReminder,
        AlertSlot::Slot4LowReservoir,
        AlertSlot::Slot5SuspendedReminder,
        AlertSlot::Slot6SuspendTimeExpired,
        AlertSlot::Slot7Expired,
    ];

    /// Parse from the slot number.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Self::ALL
            .get(usize::from(byte))
            .copied()
            .ok_or(MessageError::UnknownValue {
                value: byte,
                type_name: "AlertSlot",
            })
    }

    /// Get the slot number.
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Bit for this slot in an [`AlertSet`].
    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of alert slots, as reported in status responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct AlertSet(u8);

impl AlertSet {
    /// No alerts.
    pub const NONE: Self = Self(0);

    /// Create from the raw bitmask.
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Create from a list of slots.
    pub fn from_slots(slots: &[AlertSlot]) -> Self {
        Self(slots.iter().fold(0, |acc, slot| acc | slot.bit()))
    }

    /// Get the raw bitmask.
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Check if `slot` is set.
    pub fn contains(self, slot: AlertSlot) -> bool {
        self.0 & slot.bit() != 0
    }

    /// Check if no slot is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate over the set slots.
    pub fn iter(self) -> impl Iterator<Item = AlertSlot> {
        AlertSlot::ALL.into_iter().filter(move |slot| self.contains(*slot))
    }
}

impl fmt::Display for AlertSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots: Vec<String> = self.iter().map(|slot| slot.as_byte().to_string()).collect();
        write!(f, "[{}]", slots.join(","))
    }
}

/// How often an alert repeats its beeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BeepRepeat {
    /// Beep once.
    Once = 0,
    /// Every minute for 3 minutes, then every 60 minutes.
    Every1MinuteFor3MinutesAndRepeatEvery60Minutes = 1,
    /// Every minute for 15 minutes.
    Every1MinuteFor15Minutes = 2,
    /// Every minute for 3 minutes, then every 15 minutes.
    Every1MinuteFor3MinutesAndRepeatEvery15Minutes = 3,
    /// Every 3 minutes for an hour, starting at 2 minutes.
    Every3MinutesFor60MinutesStartingAt2Minutes = 4,
    /// Every 60 minutes.
    Every60Minutes = 5,
    /// Every 15 minutes.
    Every15Minutes = 6,
    /// Every 15 minutes for an hour, starting at 14 minutes.
    Every15MinutesFor60MinutesStartingAt14Minutes = 7,
    /// Every 5 minutes.
    Every5Minutes = 8,
}

impl BeepRepeat {
    /// Parse from the raw value.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0 => Self::Once,
            1 => Self::Every1MinuteFor3MinutesAndRepeatEvery60Minutes,
            2 => Self::Every1MinuteFor15Minutes,
            3 => Self::Every1MinuteFor3MinutesAndRepeatEvery15Minutes,
            4 => Self::Every3MinutesFor60MinutesStartingAt2Minutes,
            5 => Self::Every60Minutes,
            6 => Self::Every15Minutes,
            7 => Self::Every15MinutesFor60MinutesStartingAt14Minutes,
            8 => Self::Every5Minutes,
            value => {
                return Err(MessageError::UnknownValue {
                    value,
                    type_name: "BeepRepeat",
                })
            }
        })
    }
}

/// What fires an alert.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AlertTrigger {
    /// Reservoir drops to this many units.
    UnitsRemaining(f64),
    /// This much time passes.
    TimeUntilAlert(Duration),
}

/// Wire configuration of one alert slot.
///
/// ```text
/// byte 0: slot(4) | active | units trigger | auto-off | duration bit 8
/// byte 1: duration minutes, low byte
/// byte 2..4: trigger (minutes, or units as half-pulse ticks), 14 bits
/// byte 4: beep repeat
/// byte 5: beep type
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertConfiguration {
    /// Slot being configured.
    pub slot: AlertSlot,
    /// Arm or disarm the slot.
    pub active: bool,
    /// How long the alert keeps beeping.
    pub duration: Duration,
    /// Trigger condition.
    pub trigger: AlertTrigger,
    /// Repeat pattern.
    pub beep_repeat: BeepRepeat,
    /// Beep pattern.
    pub beep_type: BeepType,
    /// Suppress audible beeps.
    pub silent: bool,
    /// Auto-off modifier.
    pub auto_off_modifier: bool,
}

impl AlertConfiguration {
    /// Encode to the 6-byte wire form.
    pub fn encode(&self) -> [u8; ALERT_CONFIGURATION_LENGTH] {
        let duration_minutes = (self.duration.as_secs() / 60).min(MAX_DURATION_MINUTES) as u16;

        let mut first = self.slot.as_byte() << 4;
        if self.active {
            first |= 1 << 3;
        }
        if matches!(self.trigger, AlertTrigger::UnitsRemaining(_)) {
            first |= 1 << 2;
        }
        if self.auto_off_modifier {
            first |= 1 << 1;
        }
        first |= ((duration_minutes >> 8) & 0x01) as u8;

        let trigger = match self.trigger {
            AlertTrigger::UnitsRemaining(units) => (units / PULSE_SIZE / 2.0).round() as u16,
            // Rounded to the nearest minute.
            AlertTrigger::TimeUntilAlert(t) => ((t.as_secs() + 30) / 60) as u16,
        };
        let beep_type = if self.silent {
            BeepType::NoBeepNonCancel
        } else {
            self.beep_type
        };

        let [t_hi, t_lo] = trigger.to_be_bytes();
        [
            first,
            duration_minutes as u8,
            t_hi,
            t_lo,
            self.beep_repeat as u8,
            beep_type.as_byte(),
        ]
    }

    /// Decode from the 6-byte wire form.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < ALERT_CONFIGURATION_LENGTH {
            return Err(MessageError::NotEnoughData);
        }

        let slot = AlertSlot::from_byte(data[0] >> 4)?;
        let duration_minutes = (u64::from(data[0] & 0x01) << 8) | u64::from(data[1]);
        let raw_trigger = u16::from_be_bytes([data[2], data[3]]) & 0x3FFF;
        let trigger = if data[0] & 0b100 != 0 {
            AlertTrigger::UnitsRemaining(f64::from(raw_trigger) * 2.0 / PULSES_PER_UNIT)
        } else {
            AlertTrigger::TimeUntilAlert(Duration::from_secs(u64::from(raw_trigger) * 60))
        };
        let beep_type = BeepType::from_byte(data[5])?;

        Ok(Self {
            slot,
            active: data[0] & 0b1000 != 0,
            duration: Duration::from_secs(duration_minutes * 60),
            trigger,
            beep_repeat: BeepRepeat::from_byte(data[4])?,
            beep_type,
            silent: beep_type == BeepType::NoBeepNonCancel,
            auto_off_modifier: data[0] & 0b10 != 0,
        })
    }
}

/// Alerts the controller configures on the pod.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PodAlert {
    /// Beep every 5 minutes for up to 2 hours until pairing starts.
    WaitingForPairingReminder,
    /// Beep every 5 minutes for up to 1 hour until setup completes.
    FinishSetupReminder,
    /// User reminder ahead of expiry.
    ExpirationReminder {
        /// Pod age when the alert was programmed.
        offset: Duration,
        /// Pod age at which to alert; zero disables.
        abs_alert_time: Duration,
        /// Silence the beeps.
        silent: bool,
    },
    /// Nominal life reached; beeps through the advisory window.
    ExpirationAdvisory {
        /// Pod age when the alert was programmed.
        offset: Duration,
        /// Pod age at which to alert; zero disables.
        abs_alert_time: Duration,
        /// Silence the beeps.
        silent: bool,
    },
    /// One hour before the pod shuts down.
    ShutdownImminent {
        /// Pod age when the alert was programmed.
        offset: Duration,
        /// Pod age at which to alert; zero disables.
        abs_alert_time: Duration,
        /// Silence the beeps.
        silent: bool,
    },
    /// Reservoir at or below `units`; zero disables.
    LowReservoir {
        /// Threshold.
        units: f64,
        /// Silence the beeps.
        silent: bool,
    },
    /// Periodic reminder while suspended.
    SuspendedReminder {
        /// Arm or disarm.
        active: bool,
        /// Length of the suspend; zero for an untimed suspend.
        suspend_time: Duration,
        /// Silence the beeps.
        silent: bool,
    },
    /// Suspend time ran out; zero disables.
    SuspendTimeExpired {
        /// Length of the suspend.
        suspend_time: Duration,
        /// Silence the beeps.
        silent: bool,
    },
}

fn until(offset: Duration, abs_alert_time: Duration) -> (bool, Duration) {
    if abs_alert_time.is_zero() {
        (false, Duration::ZERO)
    } else {
        (true, abs_alert_time.saturating_sub(offset))
    }
}

impl PodAlert {
    /// Default shutdown-imminent alert for a pod of the given age.
    pub fn default_shutdown_imminent(offset: Duration) -> Self {
        PodAlert::ShutdownImminent {
            offset,
            abs_alert_time: SERVICE_DURATION - END_OF_SERVICE_IMMINENT_WINDOW,
            silent: false,
        }
    }

    /// Default expiration advisory for a pod of the given age.
    pub fn default_expiration_advisory(offset: Duration) -> Self {
        PodAlert::ExpirationAdvisory {
            offset,
            abs_alert_time: NOMINAL_POD_LIFE,
            silent: false,
        }
    }

    /// Slot this alert occupies.
    pub fn slot(&self) -> AlertSlot {
        match self {
            PodAlert::WaitingForPairingReminder
            | PodAlert::FinishSetupReminder
            | PodAlert::ExpirationAdvisory { .. } => AlertSlot::Slot7Expired,
            PodAlert::ExpirationReminder { .. } => AlertSlot::Slot3ExpirationReminder,
            PodAlert::ShutdownImminent { .. } => AlertSlot::Slot2ShutdownImminent,
            PodAlert::LowReservoir { .. } => AlertSlot::Slot4LowReservoir,
            PodAlert::SuspendedReminder { .. } => AlertSlot::Slot5SuspendedReminder,
            PodAlert::SuspendTimeExpired { .. } => AlertSlot::Slot6SuspendTimeExpired,
        }
    }

    /// Wire configuration for this alert.
    pub fn configuration(&self) -> AlertConfiguration {
        let loud = BeepType::BipBeepBipBeepBipBeepBipBeep;
        let config = |active, duration, trigger, beep_repeat, beep_type, silent| AlertConfiguration {
            slot: self.slot(),
            active,
            duration,
            trigger,
            beep_repeat,
            beep_type,
            silent,
            auto_off_modifier: false,
        };

        match *self {
            PodAlert::WaitingForPairingReminder => config(
                true,
                Duration::from_secs(110 * 60),
                AlertTrigger::TimeUntilAlert(Duration::from_secs(10 * 60)),
                BeepRepeat::Every5Minutes,
                loud,
                false,
            ),
            PodAlert::FinishSetupReminder => config(
                true,
                Duration::from_secs(55 * 60),
                AlertTrigger::TimeUntilAlert(Duration::from_secs(5 * 60)),
                BeepRepeat::Every5Minutes,
                loud,
                false,
            ),
            PodAlert::ExpirationReminder {
                offset,
                abs_alert_time,
                silent,
            } => {
                let (active, trigger) = until(offset, abs_alert_time);
                config(
                    active,
                    Duration::ZERO,
                    AlertTrigger::TimeUntilAlert(trigger),
                    BeepRepeat::Every1MinuteFor3MinutesAndRepeatEvery15Minutes,
                    loud,
                    silent,
                )
            }
            PodAlert::ExpirationAdvisory {
                offset,
                abs_alert_time,
                silent,
            } => {
                let (active, trigger) = until(offset, abs_alert_time);
                config(
                    active,
                    EXPIRATION_ADVISORY_WINDOW,
                    AlertTrigger::TimeUntilAlert(trigger),
                    BeepRepeat::Every60Minutes,
                    loud,
                    silent,
                )
            }
            PodAlert::ShutdownImminent {
                offset,
                abs_alert_time,
                silent,
            } => {
                let (active, trigger) = until(offset, abs_alert_time);
                config(
                    active,
                    Duration::ZERO,
                    AlertTrigger::TimeUntilAlert(trigger),
                    BeepRepeat::Every15Minutes,
                    loud,
                    silent,
                )
            }
            PodAlert::LowReservoir { units, silent } => config(
                units != 0.0,
                Duration::ZERO,
                AlertTrigger::UnitsRemaining(units),
                BeepRepeat::Every1MinuteFor3MinutesAndRepeatEvery60Minutes,
                loud,
                silent,
            ),
            PodAlert::SuspendedReminder {
                active,
                suspend_time,
                silent,
            } => {
                let interval = if suspend_time.is_zero() || suspend_time >= Duration::from_secs(30 * 60) {
                    Duration::from_secs(15 * 60)
                } else {
                    Duration::from_secs(5 * 60)
                };
                let active = active && (suspend_time.is_zero() || suspend_time > interval);
                if active {
                    let repeat = if interval == Duration::from_secs(15 * 60) {
                        BeepRepeat::Every15Minutes
                    } else {
                        BeepRepeat::Every5Minutes
                    };
                    config(
                        true,
                        suspend_time.saturating_sub(interval),
                        AlertTrigger::TimeUntilAlert(interval),
                        repeat,
                        BeepType::Beep,
                        silent,
                    )
                } else {
                    config(
                        false,
                        Duration::ZERO,
                        AlertTrigger::TimeUntilAlert(Duration::ZERO),
                        BeepRepeat::Once,
                        BeepType::NoBeepCancel,
                        silent,
                    )
                }
            }
            PodAlert::SuspendTimeExpired {
                suspend_time,
                silent,
            } => {
                if suspend_time.is_zero() {
                    config(
                        false,
                        Duration::ZERO,
                        AlertTrigger::TimeUntilAlert(Duration::ZERO),
                        BeepRepeat::Once,
                        BeepType::NoBeepCancel,
                        silent,
                    )
                } else {
                    config(
                        true,
                        Duration::ZERO,
                        AlertTrigger::TimeUntilAlert(suspend_time),
                        BeepRepeat::Every15Minutes,
                        loud,
                        silent,
                    )
                }
            }
        }
    }
}
