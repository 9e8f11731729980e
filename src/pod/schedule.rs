//! Daily basal schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Length of the repeating schedule.
pub const SCHEDULE_LENGTH: Duration = Duration::from_secs(24 * 60 * 60);

/// Pods index the schedule in half-hour segments.
pub const SEGMENT_DURATION: Duration = Duration::from_secs(30 * 60);

/// One rate change, effective from `start_offset` past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BasalScheduleEntry {
    /// Rate in U/h.
    pub rate: f64,
    /// Offset from midnight.
    pub start_offset: Duration,
}

impl BasalScheduleEntry {
    /// Create an entry.
    pub fn new(rate: f64, start_offset: Duration) -> Self {
        Self { rate, start_offset }
    }
}

/// Basal rates for a 24 hour day, ordered by start offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasalSchedule {
    /// Entries; the first must start at zero.
    pub entries: Vec<BasalScheduleEntry>,
}

impl BasalSchedule {
    /// Create a schedule from `entries`, sorting by start offset.
    pub fn new(mut entries: Vec<BasalScheduleEntry>) -> Self {
        entries.sort_by_key(|e| e.start_offset);
        Self { entries }
    }

    /// Rate in effect at `offset` past midnight.
    pub fn rate_at(&self, offset: Duration) -> f64 {
        self.entries
            .iter()
            .take_while(|e| e.start_offset <= offset)
            .last()
            .or(self.entries.first())
            .map_or(0.0, |e| e.rate)
    }

    /// Each entry with how long it runs.
    pub fn durations(&self) -> Vec<(f64, Duration)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let end = self
                    .entries
                    .get(i + 1)
                    .map_or(SCHEDULE_LENGTH, |next| next.start_offset);
                (entry.rate, end.saturating_sub(entry.start_offset))
            })
            .collect()
    }

    /// The same schedule with consecutive equal rates collapsed.
    pub fn adjacent_equal_rates_merged(&self) -> Self {
        let mut merged: Vec<BasalScheduleEntry> = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            match merged.last() {
                Some(last) if last.rate == entry.rate => {}
                _ => merged.push(*entry),
            }
        }
        Self { entries: merged }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hours(h: f64) -> Duration {
        Duration::from_secs_f64(h * 3600.0)
    }

    fn three_rates() -> BasalSchedule {
        BasalSchedule::new(vec![
            BasalScheduleEntry::new(1.05, Duration::ZERO),
            BasalScheduleEntry::new(0.9, hours(10.5)),
            BasalScheduleEntry::new(1.0, hours(18.5)),
        ])
    }

    #[test]
    fn test_rate_at() {
        let schedule = three_rates();
        assert_eq!(schedule.rate_at(Duration::ZERO), 1.05);
        assert_eq!(schedule.rate_at(hours(10.49)), 1.05);
        assert_eq!(schedule.rate_at(hours(10.5)), 0.9);
        assert_eq!(schedule.rate_at(hours(23.9)), 1.0);
    }

    #[test]
    fn test_durations_cover_day() {
        let durations = three_rates().durations();
        assert_eq!(
            durations,
            vec![(1.05, hours(10.5)), (0.9, hours(8.0)), (1.0, hours(5.5))]
        );
        let total: Duration = durations.iter().map(|(_, d)| *d).sum();
        assert_eq!(total, SCHEDULE_LENGTH);
    }

    #[test]
    fn test_merge_equal_neighbours() {
        let schedule = BasalSchedule::new(vec![
            BasalScheduleEntry::new(0.85, Duration::ZERO),
            BasalScheduleEntry::new(0.85, hours(5.0)),
            BasalScheduleEntry::new(0.7, hours(7.5)),
            BasalScheduleEntry::new(0.85, hours(12.0)),
        ]);
        let merged = schedule.adjacent_equal_rates_merged();
        let rates: Vec<f64> = merged.entries.iter().map(|e| e.rate).collect();
        assert_eq!(rates, vec![0.85, 0.7, 0.85]);
        assert_eq!(merged.durations()[0].1, hours(7.5));
    }
}
