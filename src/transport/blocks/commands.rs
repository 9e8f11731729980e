//! Command blocks sent to the pod.
//!
//! Every command encodes as `type ‖ length ‖ body`. Decoders are used by
//! the simulated pod and by diagnostics; they accept the full block, type
//! byte first.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::{MessageError, PULSE_SIZE, PULSES_PER_UNIT};
use crate::pod::alerts::ALERT_CONFIGURATION_LENGTH;
use crate::pod::{AlertConfiguration, AlertSet, BasalSchedule, BeepType, DeliveryType};

use super::insulin_table::{
    self, InsulinTableEntry, RATE_ENTRY_LENGTH, RateEntry, round_to_supported_basal_timing_rate,
    SEGMENT_SECONDS,
};
use super::responses::PodInfoType;
use super::MessageBlockType;

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

/// Slice out one block, checking the type byte and declared length.
fn block_body(data: &[u8], block_type: MessageBlockType, min_body: usize) -> Result<&[u8], MessageError> {
    let length = usize::from(*data.get(1).ok_or(MessageError::NotEnoughData)?);
    if data[0] != block_type as u8 {
        return Err(MessageError::UnknownBlockType(data[0]));
    }
    if length < min_body || data.len() < length + 2 {
        return Err(MessageError::NotEnoughData);
    }
    Ok(&data[..length + 2])
}

fn header(block_type: MessageBlockType, body_len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(body_len + 2);
    out.push(block_type as u8);
    out.push(body_len as u8);
    out
}

fn options_byte(acknowledgement_beep: bool, completion_beep: bool, reminder: Duration) -> u8 {
    (u8::from(acknowledgement_beep) << 7)
        | (u8::from(completion_beep) << 6)
        | ((reminder.as_secs() / 60) as u8 & 0x3F)
}

fn decode_options(byte: u8) -> (bool, bool, Duration) {
    (
        byte & 0x80 != 0,
        byte & 0x40 != 0,
        Duration::from_secs(u64::from(byte & 0x3F) * 60),
    )
}

/// Assign the pod its address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignAddressCommand {
    /// New address.
    pub address: u32,
}

impl AssignAddressCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::AssignAddress, 4);
        out.extend_from_slice(&self.address.to_be_bytes());
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::AssignAddress, 4)?;
        Ok(Self {
            address: be32(data, 2),
        })
    }
}

/// Calendar date and time as the pod stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodDateTime {
    /// Full year, 2000 or later.
    pub year: u16,
    /// Month, 1 to 12.
    pub month: u8,
    /// Day of month.
    pub day: u8,
    /// Hour.
    pub hour: u8,
    /// Minute.
    pub minute: u8,
}

impl PodDateTime {
    /// UTC calendar time of `time`, shifted by `utc_offset`.
    pub fn from_system_time(time: SystemTime, utc_offset: i64) -> Self {
        let secs = time
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs() as i64)
            + utc_offset;
        let days = secs.div_euclid(86_400);
        let of_day = secs.rem_euclid(86_400);

        // Civil-from-days over 400-year eras.
        let z = days + 719_468;
        let era = z.div_euclid(146_097);
        let doe = z.rem_euclid(146_097);
        let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let day = doy - (153 * mp + 2) / 5 + 1;
        let month = if mp < 10 { mp + 3 } else { mp - 9 };
        let year = yoe + era * 400 + i64::from(month <= 2);

        Self {
            year: year as u16,
            month: month as u8,
            day: day as u8,
            hour: (of_day / 3600) as u8,
            minute: (of_day % 3600 / 60) as u8,
        }
    }
}

/// Final pairing step: address, clock, lot and serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPodCommand {
    /// Address assigned earlier.
    pub address: u32,
    /// Pod clock.
    pub date_time: PodDateTime,
    /// Lot number.
    pub lot: u32,
    /// Serial number.
    pub tid: u32,
    /// Packet timeout, in units the pod defines; zero for default.
    pub packet_timeout: u8,
}

impl SetupPodCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::SetupPod, 0x13);
        out.extend_from_slice(&self.address.to_be_bytes());
        out.push(0x14);
        out.push(self.packet_timeout);
        out.extend_from_slice(&[
            self.date_time.month,
            self.date_time.day,
            self.date_time.year.saturating_sub(2000) as u8,
            self.date_time.hour,
            self.date_time.minute,
        ]);
        out.extend_from_slice(&self.lot.to_be_bytes());
        out.extend_from_slice(&self.tid.to_be_bytes());
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::SetupPod, 0x13)?;
        Ok(Self {
            address: be32(data, 2),
            packet_timeout: data[7],
            date_time: PodDateTime {
                month: data[8],
                day: data[9],
                year: 2000 + u16::from(data[10]),
                hour: data[11],
                minute: data[12],
            },
            lot: be32(data, 13),
            tid: be32(data, 17),
        })
    }
}

/// Configure pod fault handling tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultConfigCommand {
    /// Nonce.
    pub nonce: u32,
    /// Table 5, subtable 16.
    pub tab5_sub16: u8,
    /// Table 5, subtable 17.
    pub tab5_sub17: u8,
}

impl FaultConfigCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::FaultConfig, 6);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.extend_from_slice(&[self.tab5_sub16, self.tab5_sub17]);
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::FaultConfig, 6)?;
        Ok(Self {
            nonce: be32(data, 2),
            tab5_sub16: data[6],
            tab5_sub17: data[7],
        })
    }
}

/// Ask for a status or pod info response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetStatusCommand {
    /// Which response to send back.
    pub pod_info_type: PodInfoType,
}

impl GetStatusCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::GetStatus, 1);
        out.push(self.pod_info_type as u8);
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::GetStatus, 1)?;
        Ok(Self {
            pod_info_type: PodInfoType::from_byte(data[2])?,
        })
    }
}

/// Silence alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcknowledgeAlertCommand {
    /// Nonce.
    pub nonce: u32,
    /// Slots to acknowledge.
    pub alerts: AlertSet,
}

impl AcknowledgeAlertCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::AcknowledgeAlert, 5);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.push(self.alerts.bits());
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::AcknowledgeAlert, 5)?;
        Ok(Self {
            nonce: be32(data, 2),
            alerts: AlertSet::from_bits(data[6]),
        })
    }
}

/// Configure one or more alert slots; order is preserved on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigureAlertsCommand {
    /// Nonce.
    pub nonce: u32,
    /// Slot configurations.
    pub configurations: Vec<AlertConfiguration>,
}

impl ConfigureAlertsCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = 4 + self.configurations.len() * ALERT_CONFIGURATION_LENGTH;
        let mut out = header(MessageBlockType::ConfigureAlerts, body_len);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        for configuration in &self.configurations {
            out.extend_from_slice(&configuration.encode());
        }
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::ConfigureAlerts, 4)?;
        let configurations = data[6..]
            .chunks_exact(ALERT_CONFIGURATION_LENGTH)
            .map(AlertConfiguration::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            nonce: be32(data, 2),
            configurations,
        })
    }
}

/// What a `SetInsulinSchedule` programs.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliverySchedule {
    /// Daily basal schedule, entered partway through a segment.
    BasalSchedule {
        /// Segment the pod is in now.
        current_segment: u8,
        /// Seconds left in that segment.
        seconds_remaining: u16,
        /// Pulses left in that segment.
        pulses_remaining: u16,
        /// Segment table for the whole day.
        table: Vec<InsulinTableEntry>,
    },
    /// Temporary basal.
    TempBasal {
        /// Seconds in the first segment.
        seconds_remaining: u16,
        /// Pulses in the first segment.
        first_segment_pulses: u16,
        /// Segment table.
        table: Vec<InsulinTableEntry>,
    },
    /// Immediate bolus or prime.
    Bolus {
        /// Units to deliver.
        units: f64,
        /// Time between pulses.
        time_between_pulses: Duration,
        /// Segment table.
        table: Vec<InsulinTableEntry>,
    },
}

impl DeliverySchedule {
    fn type_code(&self) -> u8 {
        match self {
            Self::BasalSchedule { .. } => 0,
            Self::TempBasal { .. } => 1,
            Self::Bolus { .. } => 2,
        }
    }

    fn table(&self) -> &[InsulinTableEntry] {
        match self {
            Self::BasalSchedule { table, .. }
            | Self::TempBasal { table, .. }
            | Self::Bolus { table, .. } => table,
        }
    }

    /// The five header bytes preceding the table.
    fn header_data(&self) -> [u8; 5] {
        let (first, field_a, field_b) = match self {
            Self::BasalSchedule {
                current_segment,
                seconds_remaining,
                pulses_remaining,
                ..
            } => (*current_segment, seconds_remaining << 3, *pulses_remaining),
            Self::TempBasal {
                seconds_remaining,
                first_segment_pulses,
                table,
            } => {
                let segments: u16 = table.iter().map(|e| u16::from(e.segments)).sum();
                (segments as u8, seconds_remaining << 3, *first_segment_pulses)
            }
            Self::Bolus {
                units,
                time_between_pulses,
                ..
            } => {
                let pulses = (units / PULSE_SIZE).round() as u16;
                let eighths = (time_between_pulses.as_secs_f64() * 8.0).round() as u16;
                (1, pulses.wrapping_mul(eighths), pulses)
            }
        };
        let [a_hi, a_lo] = field_a.to_be_bytes();
        let [b_hi, b_lo] = field_b.to_be_bytes();
        [first, a_hi, a_lo, b_hi, b_lo]
    }

    /// Checksum over the header bytes and every table entry.
    pub fn checksum(&self) -> u16 {
        let header: u16 = self.header_data().iter().map(|b| u16::from(*b)).sum();
        self.table()
            .iter()
            .fold(header, |sum, entry| sum.wrapping_add(entry.checksum()))
    }
}

/// Program basal, temp basal or bolus delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct SetInsulinScheduleCommand {
    /// Nonce.
    pub nonce: u32,
    /// What to deliver.
    pub schedule: DeliverySchedule,
}

impl SetInsulinScheduleCommand {
    /// Daily basal schedule, entered at `schedule_offset` past midnight.
    pub fn basal_schedule(nonce: u32, schedule: &BasalSchedule, schedule_offset: Duration) -> Self {
        let offset = schedule_offset.as_secs_f64().round();
        let rate = round_to_supported_basal_timing_rate(
            schedule.rate_at(Duration::from_secs_f64(offset)),
        );
        let current_segment = (offset / SEGMENT_SECONDS) as u8;
        let seconds_remaining = SEGMENT_SECONDS - (offset % SEGMENT_SECONDS).round();
        let time_between_pulses = 3600.0 / (rate / PULSE_SIZE);
        let tenth = time_between_pulses / 10.0;
        let offset_to_next_tenth = seconds_remaining % tenth;
        let pulses_remaining =
            ((seconds_remaining + tenth - offset_to_next_tenth) / time_between_pulses) as u16;

        Self {
            nonce,
            schedule: DeliverySchedule::BasalSchedule {
                current_segment,
                seconds_remaining: seconds_remaining as u16,
                pulses_remaining,
                table: insulin_table::basal_table(schedule),
            },
        }
    }

    /// Temp basal of `rate` U/h.
    pub fn temp_basal(nonce: u32, rate: f64, duration: Duration) -> Self {
        let pulses_per_hour = (rate / PULSE_SIZE).round() as u16;
        Self {
            nonce,
            schedule: DeliverySchedule::TempBasal {
                seconds_remaining: SEGMENT_SECONDS as u16,
                first_segment_pulses: pulses_per_hour / 2,
                table: insulin_table::temp_basal_table(rate, duration.as_secs_f64()),
            },
        }
    }

    /// Immediate bolus of `units`.
    pub fn bolus(nonce: u32, units: f64, time_between_pulses: Duration) -> Self {
        Self {
            nonce,
            schedule: DeliverySchedule::Bolus {
                units,
                time_between_pulses,
                table: insulin_table::bolus_table(units),
            },
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let table = self.schedule.table();
        let body_len = 4 + 1 + 2 + 5 + table.len() * 2;
        let mut out = header(MessageBlockType::SetInsulinSchedule, body_len);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.push(self.schedule.type_code());
        out.extend_from_slice(&self.schedule.checksum().to_be_bytes());
        out.extend_from_slice(&self.schedule.header_data());
        for entry in table {
            out.extend_from_slice(&entry.encode());
        }
        out
    }

    /// Decode from block bytes, verifying the checksum.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::SetInsulinSchedule, 12)?;
        let length = usize::from(data[1]);
        let table = data[14..length + 2]
            .chunks_exact(2)
            .map(InsulinTableEntry::decode)
            .collect::<Result<Vec<_>, _>>()?;

        let schedule = match data[6] {
            0 => DeliverySchedule::BasalSchedule {
                current_segment: data[9],
                seconds_remaining: be16(data, 10) >> 3,
                pulses_remaining: be16(data, 12),
                table,
            },
            1 => DeliverySchedule::TempBasal {
                seconds_remaining: be16(data, 10) >> 3,
                first_segment_pulses: be16(data, 12),
                table,
            },
            2 => {
                let pulses = be16(data, 12) & 0x03FF;
                let eighths = if pulses == 0 { 0 } else { be16(data, 10) / pulses };
                DeliverySchedule::Bolus {
                    units: f64::from(pulses) / PULSES_PER_UNIT,
                    time_between_pulses: Duration::from_secs_f64(f64::from(eighths) / 8.0),
                    table,
                }
            }
            value => {
                return Err(MessageError::UnknownValue {
                    value,
                    type_name: "DeliverySchedule",
                })
            }
        };

        let actual = be16(data, 7);
        let expected = schedule.checksum();
        if actual != expected {
            return Err(MessageError::InvalidChecksum { expected, actual });
        }

        Ok(Self {
            nonce: be32(data, 2),
            schedule,
        })
    }
}

/// Pulse timing for a daily basal schedule, sent after `SetInsulinSchedule`.
#[derive(Debug, Clone, PartialEq)]
pub struct BasalScheduleExtraCommand {
    /// Beep when accepted.
    pub acknowledgement_beep: bool,
    /// Beep when done.
    pub completion_beep: bool,
    /// Reminder interval, whole minutes up to 63.
    pub program_reminder_interval: Duration,
    /// Rate entry the pod is in now.
    pub current_entry_index: u8,
    /// Pulses left in that entry.
    pub remaining_pulses: f64,
    /// Seconds until the next tenth of a pulse.
    pub delay_until_next_tenth_of_pulse: f64,
    /// Rate entries for the whole day.
    pub rate_entries: Vec<RateEntry>,
}

impl BasalScheduleExtraCommand {
    /// Pulse timing for `schedule`, entered at `schedule_offset`.
    ///
    /// Returns `None` for an empty schedule.
    pub fn from_schedule(
        schedule: &BasalSchedule,
        schedule_offset: Duration,
        acknowledgement_beep: bool,
        completion_beep: bool,
        program_reminder_interval: Duration,
    ) -> Option<Self> {
        let rate_entries: Vec<RateEntry> = schedule
            .adjacent_equal_rates_merged()
            .durations()
            .into_iter()
            .flat_map(|(rate, duration)| RateEntry::make_entries(rate, duration.as_secs_f64()))
            .collect();

        let offset = schedule_offset.as_secs_f64().round();
        let mut start = 0.0;
        for (index, entry) in rate_entries.iter().enumerate() {
            let duration = entry.duration_secs();
            if start <= offset && offset <= start + duration {
                let time_remaining = start + duration - offset;
                let delay = time_remaining % (entry.delay_between_pulses / 10.0);
                let pulses = entry.total_pulses * (time_remaining / duration);
                let remaining_pulses = if pulses == 0.0 {
                    0.1
                } else {
                    (pulses * 10.0).ceil() / 10.0
                };
                return Some(Self {
                    acknowledgement_beep,
                    completion_beep,
                    program_reminder_interval,
                    current_entry_index: index as u8,
                    remaining_pulses,
                    delay_until_next_tenth_of_pulse: delay,
                    rate_entries,
                });
            }
            start += duration;
        }
        None
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = 8 + self.rate_entries.len() * RATE_ENTRY_LENGTH;
        let mut out = header(MessageBlockType::BasalScheduleExtra, body_len);
        out.push(options_byte(
            self.acknowledgement_beep,
            self.completion_beep,
            self.program_reminder_interval,
        ));
        out.push(self.current_entry_index);
        out.extend_from_slice(&((self.remaining_pulses * 10.0).round() as u16).to_be_bytes());
        out.extend_from_slice(
            &((self.delay_until_next_tenth_of_pulse * 1_000_000.0).round() as u32).to_be_bytes(),
        );
        for entry in &self.rate_entries {
            out.extend_from_slice(&entry.encode());
        }
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::BasalScheduleExtra, 8)?;
        let (acknowledgement_beep, completion_beep, program_reminder_interval) = decode_options(data[2]);
        let rate_entries = data[10..]
            .chunks_exact(RATE_ENTRY_LENGTH)
            .map(RateEntry::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            acknowledgement_beep,
            completion_beep,
            program_reminder_interval,
            current_entry_index: data[3],
            remaining_pulses: f64::from(be16(data, 4)) / 10.0,
            delay_until_next_tenth_of_pulse: f64::from(be32(data, 6)) / 1_000_000.0,
            rate_entries,
        })
    }
}

/// Pulse timing for a temp basal, sent after `SetInsulinSchedule`.
#[derive(Debug, Clone, PartialEq)]
pub struct TempBasalExtraCommand {
    /// Beep when accepted.
    pub acknowledgement_beep: bool,
    /// Beep when done.
    pub completion_beep: bool,
    /// Reminder interval, whole minutes up to 63.
    pub program_reminder_interval: Duration,
    /// Pulses in the first entry.
    pub remaining_pulses: f64,
    /// Seconds until the first pulse.
    pub delay_until_first_pulse: f64,
    /// Rate entries.
    pub rate_entries: Vec<RateEntry>,
}

impl TempBasalExtraCommand {
    /// Pulse timing for `rate` U/h over `duration`.
    pub fn new(
        rate: f64,
        duration: Duration,
        acknowledgement_beep: bool,
        completion_beep: bool,
        program_reminder_interval: Duration,
    ) -> Self {
        let rate_entries = RateEntry::make_entries(rate, duration.as_secs_f64());
        let (remaining_pulses, delay_until_first_pulse) = rate_entries
            .first()
            .map_or((0.0, 0.0), |e| (e.total_pulses, e.delay_between_pulses));
        Self {
            acknowledgement_beep,
            completion_beep,
            program_reminder_interval,
            remaining_pulses,
            delay_until_first_pulse,
            rate_entries,
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let body_len = 8 + self.rate_entries.len() * RATE_ENTRY_LENGTH;
        let mut out = header(MessageBlockType::TempBasalExtra, body_len);
        out.push(options_byte(
            self.acknowledgement_beep,
            self.completion_beep,
            self.program_reminder_interval,
        ));
        out.push(0);
        out.extend_from_slice(&((self.remaining_pulses * 10.0).round() as u16).to_be_bytes());
        out.extend_from_slice(&((self.delay_until_first_pulse * 100_000.0) as u32).to_be_bytes());
        for entry in &self.rate_entries {
            out.extend_from_slice(&entry.encode());
        }
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::TempBasalExtra, 8)?;
        let (acknowledgement_beep, completion_beep, program_reminder_interval) = decode_options(data[2]);
        let rate_entries = data[10..]
            .chunks_exact(RATE_ENTRY_LENGTH)
            .map(RateEntry::decode)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            acknowledgement_beep,
            completion_beep,
            program_reminder_interval,
            remaining_pulses: f64::from(be16(data, 4)) / 10.0,
            delay_until_first_pulse: f64::from(be32(data, 6)) / 100_000.0,
            rate_entries,
        })
    }

    /// Rate of the first entry, in U/h.
    pub fn rate(&self) -> f64 {
        self.rate_entries.first().map_or(0.0, RateEntry::rate)
    }
}

/// Pulse timing for a bolus, sent after `SetInsulinSchedule`.
#[derive(Debug, Clone, PartialEq)]
pub struct BolusExtraCommand {
    /// Beep when accepted.
    pub acknowledgement_beep: bool,
    /// Beep when done.
    pub completion_beep: bool,
    /// Reminder interval, whole minutes up to 63.
    pub program_reminder_interval: Duration,
    /// Immediate units.
    pub units: f64,
    /// Time between immediate pulses.
    pub time_between_pulses: Duration,
    /// Extended units.
    pub extended_units: f64,
    /// Extended delivery duration.
    pub extended_duration: Duration,
}

impl BolusExtraCommand {
    /// Immediate bolus of `units`.
    pub fn new(
        units: f64,
        time_between_pulses: Duration,
        acknowledgement_beep: bool,
        completion_beep: bool,
        program_reminder_interval: Duration,
    ) -> Self {
        Self {
            acknowledgement_beep,
            completion_beep,
            program_reminder_interval,
            units,
            time_between_pulses,
            extended_units: 0.0,
            extended_duration: Duration::ZERO,
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let pulses = (self.units * PULSES_PER_UNIT).round();
        let extended_pulses = (self.extended_units * PULSES_PER_UNIT).round();
        let extended_delay = if extended_pulses > 0.0 {
            (self.extended_duration.as_secs_f64() / extended_pulses * 100_000.0) as u32
        } else {
            0
        };

        let mut out = header(MessageBlockType::BolusExtra, 0x0D);
        out.push(options_byte(
            self.acknowledgement_beep,
            self.completion_beep,
            self.program_reminder_interval,
        ));
        out.extend_from_slice(&((pulses * 10.0) as u16).to_be_bytes());
        out.extend_from_slice(&((self.time_between_pulses.as_secs_f64() * 100_000.0) as u32).to_be_bytes());
        out.extend_from_slice(&((extended_pulses * 10.0) as u16).to_be_bytes());
        out.extend_from_slice(&extended_delay.to_be_bytes());
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::BolusExtra, 0x0D)?;
        let (acknowledgement_beep, completion_beep, program_reminder_interval) = decode_options(data[2]);
        let extended_pulses = f64::from(be16(data, 9)) / 10.0;
        let extended_delay = f64::from(be32(data, 11)) / 100_000.0;
        Ok(Self {
            acknowledgement_beep,
            completion_beep,
            program_reminder_interval,
            units: f64::from(be16(data, 3)) / 10.0 / PULSES_PER_UNIT,
            time_between_pulses: Duration::from_secs_f64(f64::from(be32(data, 5)) / 100_000.0),
            extended_units: extended_pulses / PULSES_PER_UNIT,
            extended_duration: Duration::from_secs_f64(extended_delay * extended_pulses),
        })
    }
}

/// Beep now and configure completion/reminder beeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeepConfigCommand {
    /// Beep to play now.
    pub beep_type: BeepType,
    /// Beep when a basal program ends.
    pub basal_completion_beep: bool,
    /// Basal reminder interval.
    pub basal_interval_beep: Duration,
    /// Beep when a temp basal ends.
    pub temp_basal_completion_beep: bool,
    /// Temp basal reminder interval.
    pub temp_basal_interval_beep: Duration,
    /// Beep when a bolus ends.
    pub bolus_completion_beep: bool,
    /// Bolus reminder interval.
    pub bolus_interval_beep: Duration,
}

impl BeepConfigCommand {
    /// Play `beep_type` without changing any reminders.
    pub fn beep(beep_type: BeepType) -> Self {
        Self {
            beep_type,
            basal_completion_beep: false,
            basal_interval_beep: Duration::ZERO,
            temp_basal_completion_beep: false,
            temp_basal_interval_beep: Duration::ZERO,
            bolus_completion_beep: false,
            bolus_interval_beep: Duration::ZERO,
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::BeepConfig, 4);
        out.push(self.beep_type.as_byte());
        out.push(options_byte(false, self.basal_completion_beep, self.basal_interval_beep));
        out.push(options_byte(false, self.temp_basal_completion_beep, self.temp_basal_interval_beep));
        out.push(options_byte(false, self.bolus_completion_beep, self.bolus_interval_beep));
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::BeepConfig, 4)?;
        let (_, basal_completion_beep, basal_interval_beep) = decode_options(data[3]);
        let (_, temp_basal_completion_beep, temp_basal_interval_beep) = decode_options(data[4]);
        let (_, bolus_completion_beep, bolus_interval_beep) = decode_options(data[5]);
        Ok(Self {
            beep_type: BeepType::from_byte(data[2])?,
            basal_completion_beep,
            basal_interval_beep,
            temp_basal_completion_beep,
            temp_basal_interval_beep,
            bolus_completion_beep,
            bolus_interval_beep,
        })
    }
}

/// Permanently shut the pod down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeactivatePodCommand {
    /// Nonce.
    pub nonce: u32,
}

impl DeactivatePodCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::DeactivatePod, 4);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::DeactivatePod, 4)?;
        Ok(Self {
            nonce: be32(data, 2),
        })
    }
}

/// Stop some or all delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelDeliveryCommand {
    /// Nonce.
    pub nonce: u32,
    /// Delivery to stop.
    pub delivery_type: DeliveryType,
    /// Beep to play.
    pub beep_type: BeepType,
}

impl CancelDeliveryCommand {
    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = header(MessageBlockType::CancelDelivery, 5);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out.push((self.beep_type.as_byte() << 4) | self.delivery_type.bits());
        out
    }

    /// Decode from block bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let data = block_body(data, MessageBlockType::CancelDelivery, 5)?;
        Ok(Self {
            nonce: be32(data, 2),
            delivery_type: DeliveryType::from_bits(data[6] & 0x0F),
            beep_type: BeepType::from_byte(data[6] >> 4)?,
        })
    }
}
