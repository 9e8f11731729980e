//! Insulin delivery tables and pulse timing entries.
//!
//! Two encodings describe the same delivery:
//!
//! - the half-hour segment table carried by `SetInsulinSchedule`
//!   ([`InsulinTableEntry`]), and
//! - the pulse timing entries carried by the extra commands ([`RateEntry`]).

use crate::core::{MessageError, PULSE_SIZE, PULSES_PER_UNIT};
use crate::pod::BasalSchedule;

/// Length of one table segment, in seconds.
pub const SEGMENT_SECONDS: f64 = 30.0 * 60.0;

/// Segments in a day.
pub const SEGMENTS_PER_DAY: usize = 48;

/// Most segments one table entry can cover.
pub const MAX_SEGMENTS_PER_ENTRY: usize = 16;

/// Longest pulse interval, used for near-zero rates, in seconds.
pub const MAX_TIME_BETWEEN_PULSES: f64 = 5.0 * 60.0 * 60.0;

/// Stand-in for a zero basal rate; pods cannot run an empty program.
pub const NEAR_ZERO_BASAL_RATE: f64 = 0.01;

/// Marks a near-zero rate in the pulse interval field.
pub const NEAR_ZERO_BASAL_RATE_FLAG: u32 = 0x8000_0000;

/// Encoded size of one rate entry.
pub const RATE_ENTRY_LENGTH: usize = 6;

/// Round a rate down to a whole number of pulses per hour.
///
/// Rates within 0.01 U/h below a pulse boundary round up to it.
pub fn round_to_supported_basal_rate(rate: f64) -> f64 {
    (0..=600)
        .map(|i| f64::from(i) / PULSES_PER_UNIT)
        .filter(|supported| *supported <= rate + 0.01)
        .last()
        .unwrap_or(0.0)
}

/// Rate used for pulse timing; zero becomes [`NEAR_ZERO_BASAL_RATE`].
pub fn round_to_supported_basal_timing_rate(rate: f64) -> f64 {
    let rounded = round_to_supported_basal_rate(rate);
    if rounded == 0.0 {
        NEAR_ZERO_BASAL_RATE
    } else {
        rounded
    }
}

/// One run of half-hour segments with the same pulse count.
///
/// ```text
/// bits 15..12: segments - 1
/// bit  11:     alternate segments carry one extra pulse
/// bits 9..0:   pulses per segment
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsulinTableEntry {
    /// Number of segments, 1 to 16.
    pub segments: u8,
    /// Pulses in each segment.
    pub pulses: u16,
    /// Every second segment delivers one more pulse.
    pub alternate_segment_pulse: bool,
}

impl InsulinTableEntry {
    /// Create an entry.
    pub fn new(segments: u8, pulses: u16, alternate_segment_pulse: bool) -> Self {
        Self {
            segments,
            pulses,
            alternate_segment_pulse,
        }
    }

    /// Encode to the 2-byte wire form.
    pub fn encode(&self) -> [u8; 2] {
        let word = (u16::from(self.segments.saturating_sub(1)) << 12)
            | (u16::from(self.alternate_segment_pulse) << 11)
            | (self.pulses & 0x03FF);
        word.to_be_bytes()
    }

    /// Decode from the 2-byte wire form.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        let [hi, lo] = data.get(..2).and_then(|b| <[u8; 2]>::try_from(b).ok()).ok_or(MessageError::NotEnoughData)?;
        let word = u16::from_be_bytes([hi, lo]);
        Ok(Self {
            segments: (word >> 12) as u8 + 1,
            pulses: word & 0x03FF,
            alternate_segment_pulse: word & 0x0800 != 0,
        })
    }

    /// Contribution to the schedule checksum.
    pub fn checksum(&self) -> u16 {
        let segments = u16::from(self.segments);
        let per_segment = (self.pulses & 0xFF) + (self.pulses >> 8);
        let alternate = if self.alternate_segment_pulse {
            segments / 2
        } else {
            0
        };
        per_segment.wrapping_mul(segments).wrapping_add(alternate)
    }
}

/// Segment table for a daily basal schedule.
///
/// Half pulses carry over so alternating segments absorb an odd hourly
/// pulse count; runs of identical (or alternating) segments are merged.
pub fn basal_table(schedule: &BasalSchedule) -> Vec<InsulinTableEntry> {
    let mut half_pulse_remainder = false;
    let expanded: Vec<u16> = (0..SEGMENTS_PER_DAY)
        .map(|index| {
            let offset = std::time::Duration::from_secs(index as u64 * SEGMENT_SECONDS as u64);
            let pulses_per_hour = (schedule.rate_at(offset) / PULSE_SIZE).round() as u16;
            let half_pulse = pulses_per_hour & 1 != 0;
            let pulses = (pulses_per_hour >> 1) + u16::from(half_pulse_remainder && half_pulse);
            half_pulse_remainder = half_pulse_remainder != half_pulse;
            pulses
        })
        .collect();

    let mut entries = Vec::new();
    let mut alternate = false;
    let mut run: Vec<u16> = Vec::with_capacity(MAX_SEGMENTS_PER_ENTRY);

    for pulses in expanded {
        let Some(&first) = run.first() else {
            run.push(pulses);
            continue;
        };
        let delta = i32::from(pulses) - i32::from(first);
        if run.len() == 1 {
            alternate = delta == 1;
        }
        let expected = if alternate { (run.len() % 2) as i32 } else { 0 };
        if delta != expected || run.len() == MAX_SEGMENTS_PER_ENTRY {
            entries.push(InsulinTableEntry::new(run.len() as u8, first, alternate));
            run.clear();
        }
        run.push(pulses);
    }
    if let Some(&first) = run.first() {
        entries.push(InsulinTableEntry::new(run.len() as u8, first, alternate));
    }
    entries
}

/// Segment table for a temp basal.
pub fn temp_basal_table(rate: f64, duration_secs: f64) -> Vec<InsulinTableEntry> {
    let pulses_per_hour = (rate / PULSE_SIZE).round() as u16;
    let pulses_per_segment = pulses_per_hour >> 1;
    let alternate = pulses_per_hour & 1 != 0;

    let mut remaining = (duration_secs / SEGMENT_SECONDS).round() as usize;
    let mut entries = Vec::new();
    while remaining > 0 {
        let segments = remaining.min(MAX_SEGMENTS_PER_ENTRY);
        entries.push(InsulinTableEntry::new(
            segments as u8,
            pulses_per_segment,
            segments > 1 && alternate,
        ));
        remaining -= segments;
    }
    entries
}

/// Segment table for an immediate bolus.
pub fn bolus_table(units: f64) -> Vec<InsulinTableEntry> {
    let pulses = (units / PULSE_SIZE).round() as u16;
    vec![InsulinTableEntry::new(1, pulses, false)]
}

/// A run of evenly spaced pulses.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateEntry {
    /// Pulses in the run, in tenths.
    pub total_pulses: f64,
    /// Seconds between pulses.
    pub delay_between_pulses: f64,
}

impl RateEntry {
    /// Create an entry.
    pub fn new(total_pulses: f64, delay_between_pulses: f64) -> Self {
        Self {
            total_pulses,
            delay_between_pulses,
        }
    }

    /// Rate in U/h, to two decimals.
    pub fn rate(&self) -> f64 {
        if self.total_pulses == 0.0 {
            return 0.0;
        }
        ((3600.0 / self.delay_between_pulses / PULSES_PER_UNIT) * 100.0).round() / 100.0
    }

    /// Length of the run in whole seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.total_pulses == 0.0 {
            return SEGMENT_SECONDS;
        }
        (self.delay_between_pulses * self.total_pulses).round()
    }

    /// Encode: tenths of pulses, then the interval in hundredths of a
    /// millisecond (truncated), flagged for near-zero rates.
    pub fn encode(&self) -> [u8; RATE_ENTRY_LENGTH] {
        let mut interval = (self.delay_between_pulses * 100_000.0) as u32;
        if self.delay_between_pulses == MAX_TIME_BETWEEN_PULSES && self.total_pulses != 0.0 {
            interval |= NEAR_ZERO_BASAL_RATE_FLAG;
        }
        let mut out = [0u8; RATE_ENTRY_LENGTH];
        out[..2].copy_from_slice(&((self.total_pulses * 10.0).round() as u16).to_be_bytes());
        out[2..].copy_from_slice(&interval.to_be_bytes());
        out
    }

    /// Decode from the 6-byte wire form.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < RATE_ENTRY_LENGTH {
            return Err(MessageError::NotEnoughData);
        }
        let tenths = u16::from_be_bytes([data[0], data[1]]);
        let interval = u32::from_be_bytes([data[2], data[3], data[4], data[5]]) & !NEAR_ZERO_BASAL_RATE_FLAG;
        Ok(Self {
            total_pulses: f64::from(tenths) / 10.0,
            delay_between_pulses: f64::from(interval) / 100_000.0,
        })
    }

    /// Entries delivering `rate` U/h for `duration_secs`.
    ///
    /// Each entry holds at most 0xFFFF tenths of a pulse. Near-zero rates
    /// collapse to one entry of a tenth of a pulse per half hour.
    pub fn make_entries(rate: f64, duration_secs: f64) -> Vec<RateEntry> {
        const MAX_PULSES_PER_ENTRY: f64 = 65535.0 / 10.0;

        let rrate = round_to_supported_basal_timing_rate(rate);
        let half_hours = ((duration_secs / 60.0 / 30.0).round() as usize).max(1);
        let pulses_per_segment = (rrate / PULSE_SIZE).round() / 2.0;
        let max_segments_per_entry = if pulses_per_segment > 0.0 {
            (MAX_PULSES_PER_ENTRY / pulses_per_segment) as usize
        } else {
            1
        };

        let mut remaining_segments = half_hours;
        let mut remaining_pulses = rrate * half_hours as f64 / 2.0 / PULSE_SIZE;
        let mut entries = Vec::new();

        while remaining_segments > 0 {
            if rrate == NEAR_ZERO_BASAL_RATE {
                entries.push(RateEntry::new(
                    remaining_segments as f64 / 10.0,
                    MAX_TIME_BETWEEN_PULSES,
                ));
                break;
            }
            let segments = max_segments_per_entry
                .min((remaining_pulses / pulses_per_segment).round() as usize)
                .max(1)
                .min(remaining_segments);
            let pulses = pulses_per_segment * segments as f64;
            entries.push(RateEntry::new(pulses, 3600.0 / rrate * PULSE_SIZE));
            remaining_segments -= segments;
            remaining_pulses -= pulses;
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::BasalScheduleEntry;
    use std::time::Duration;

    fn hours(h: f64) -> Duration {
        Duration::from_secs_f64(h * 3600.0)
    }

    #[test]
    fn test_table_entry_bits() {
        let entry = InsulinTableEntry::new(16, 0, true);
        assert_eq!(entry.encode(), [0xF8, 0x00]);
        assert_eq!(InsulinTableEntry::decode(&[0xF8, 0x00]).unwrap(), entry);
        assert_eq!(InsulinTableEntry::new(3, 20, false).checksum(), 60);
    }

    #[test]
    fn test_basal_table_merges_segments() {
        let schedule = BasalSchedule::new(vec![
            BasalScheduleEntry::new(0.8, Duration::ZERO),
            BasalScheduleEntry::new(0.9, hours(3.0)),
            BasalScheduleEntry::new(0.85, hours(5.0)),
            BasalScheduleEntry::new(0.85, hours(7.5)),
            BasalScheduleEntry::new(0.85, hours(12.5)),
            BasalScheduleEntry::new(0.7, hours(15.0)),
            BasalScheduleEntry::new(0.9, hours(18.0)),
            BasalScheduleEntry::new(1.1, hours(20.0)),
        ]);
        let encoded: Vec<u8> = basal_table(&schedule).iter().flat_map(|e| e.encode()).collect();
        assert_eq!(hex::encode(encoded), "50083009f808380850073009700b");
    }

    #[test]
    fn test_temp_basal_table_splits_long_durations() {
        let table = temp_basal_table(0.05, hours(16.5).as_secs_f64());
        assert_eq!(
            table,
            vec![
                InsulinTableEntry::new(16, 0, true),
                InsulinTableEntry::new(16, 0, true),
                InsulinTableEntry::new(1, 0, false),
            ]
        );
    }

    #[test]
    fn test_supported_rate_rounding() {
        assert_eq!(round_to_supported_basal_rate(1.049), 1.05);
        assert_eq!(round_to_supported_basal_rate(1.03), 1.0);
        assert_eq!(round_to_supported_basal_rate(0.0), 0.0);
        assert_eq!(round_to_supported_basal_timing_rate(0.0), NEAR_ZERO_BASAL_RATE);
    }

    #[test]
    fn test_make_entries_splits_at_entry_capacity() {
        let entries = RateEntry::make_entries(30.0, hours(12.0).as_secs_f64());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].total_pulses, 6300.0);
        assert_eq!(entries[1].total_pulses, 900.0);
        assert_eq!(entries[0].delay_between_pulses, 6.0);
        assert_eq!(entries[0].rate(), 30.0);
        assert_eq!(entries[0].duration_secs(), hours(10.5).as_secs_f64());
    }

    #[test]
    fn test_make_entries_near_zero() {
        let entries = RateEntry::make_entries(0.0, hours(2.0).as_secs_f64());
        assert_eq!(entries, vec![RateEntry::new(0.4, MAX_TIME_BETWEEN_PULSES)]);
        assert_eq!(hex::encode(entries[0].encode()), "0004eb49d200");
    }

    #[test]
    fn test_rate_entry_interval_truncates() {
        let entry = RateEntry::make_entries(29.95, 1800.0)[0];
        assert_eq!(hex::encode(entry.encode()), "0bb300092ba9");
        let decoded = RateEntry::decode(&entry.encode()).unwrap();
        assert_eq!(decoded.total_pulses, 299.5);
        assert_eq!(decoded.rate(), 29.95);
    }
}
