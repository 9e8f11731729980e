//! In-flight and finalized dose records.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::core::{BOLUS_DELIVERY_RATE, PULSES_PER_UNIT};

/// Insulin formulation loaded in the pod.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InsulinType {
    /// Insulin aspart.
    #[default]
    Novolog,
    /// Insulin lispro.
    Humalog,
    /// Insulin glulisine.
    Apidra,
    /// Fast-acting insulin aspart.
    Fiasp,
    /// Insulin lispro-aabc.
    Lyumjev,
}

/// Kind of delivery action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DoseType {
    /// Immediate bolus.
    Bolus,
    /// Temporary basal rate.
    TempBasal,
    /// Delivery suspended.
    Suspend,
    /// Scheduled basal resumed.
    Resume,
}

/// Whether the pod is known to have accepted a dose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledCertainty {
    /// Confirmed by the pod.
    Certain,
    /// The exchange broke off; confirm with a status query before trusting.
    Uncertain,
}

/// A delivery action that is in progress or not yet archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnfinalizedDose {
    /// Kind of dose.
    pub dose_type: DoseType,
    /// Units delivered (or scheduled, until cancelled).
    pub units: f64,
    /// Units originally scheduled, once cancellation has changed `units`.
    pub scheduled_units: Option<f64>,
    /// Temp basal rate originally requested.
    pub scheduled_temp_rate: Option<f64>,
    /// Start of delivery.
    pub start_time: SystemTime,
    /// Length of delivery; `None` for suspend and resume.
    pub duration: Option<Duration>,
    /// Confirmation status.
    pub scheduled_certainty: ScheduledCertainty,
    /// Temp basal above the scheduled rate.
    pub is_high_temp: bool,
    /// Issued by an automatic dosing loop.
    pub automatic: bool,
    /// Insulin in the pod.
    pub insulin_type: Option<InsulinType>,
}

impl UnfinalizedDose {
    /// A bolus starting at `start_time`.
    pub fn bolus(
        units: f64,
        start_time: SystemTime,
        scheduled_certainty: ScheduledCertainty,
        insulin_type: InsulinType,
        automatic: bool,
    ) -> Self {
        Self {
            dose_type: DoseType::Bolus,
            units,
            scheduled_units: None,
            scheduled_temp_rate: None,
            start_time,
            duration: Some(Duration::from_secs_f64(units.max(0.0) / BOLUS_DELIVERY_RATE)),
            scheduled_certainty,
            is_high_temp: false,
            automatic,
            insulin_type: Some(insulin_type),
        }
    }

    /// A temp basal of `rate` U/h for `duration`.
    pub fn temp_basal(
        rate: f64,
        start_time: SystemTime,
        duration: Duration,
        is_high_temp: bool,
        automatic: bool,
        scheduled_certainty: ScheduledCertainty,
        insulin_type: InsulinType,
    ) -> Self {
        Self {
            dose_type: DoseType::TempBasal,
            units: rate * duration.as_secs_f64() / 3600.0,
            scheduled_units: None,
            scheduled_temp_rate: None,
            start_time,
            duration: Some(duration),
            scheduled_certainty,
            is_high_temp,
            automatic,
            insulin_type: Some(insulin_type),
        }
    }

    /// Delivery suspended at `start_time`.
    pub fn suspend(start_time: SystemTime, scheduled_certainty: ScheduledCertainty) -> Self {
        Self {
            dose_type: DoseType::Suspend,
            units: 0.0,
            scheduled_units: None,
            scheduled_temp_rate: None,
            start_time,
            duration: None,
            scheduled_certainty,
            is_high_temp: false,
            automatic: false,
            insulin_type: None,
        }
    }

    /// Scheduled basal resumed at `start_time`.
    pub fn resume(
        start_time: SystemTime,
        scheduled_certainty: ScheduledCertainty,
        insulin_type: InsulinType,
    ) -> Self {
        Self {
            dose_type: DoseType::Resume,
            units: 0.0,
            scheduled_units: None,
            scheduled_temp_rate: None,
            start_time,
            duration: None,
            scheduled_certainty,
            is_high_temp: false,
            automatic: false,
            insulin_type: Some(insulin_type),
        }
    }

    /// When delivery ends, if it has a duration.
    pub fn finish_time(&self) -> Option<SystemTime> {
        self.duration.map(|d| self.start_time + d)
    }

    /// Fraction delivered at `at`, clamped to 1.
    pub fn progress(&self, at: SystemTime) -> f64 {
        let Some(duration) = self.duration else {
            return 0.0;
        };
        if duration.is_zero() {
            return 1.0;
        }
        let elapsed = at.duration_since(self.start_time).unwrap_or(Duration::ZERO);
        (elapsed.as_secs_f64() / duration.as_secs_f64()).min(1.0)
    }

    /// Check if delivery has completed at `at`.
    pub fn is_finished(&self, at: SystemTime) -> bool {
        self.progress(at) >= 1.0
    }

    /// Rate in units per hour.
    pub fn rate(&self) -> f64 {
        match self.duration {
            Some(d) if !d.is_zero() => self.units / (d.as_secs_f64() / 3600.0),
            _ => 0.0,
        }
    }

    /// Units delivered once finished.
    pub fn finalized_units(&self, at: SystemTime) -> Option<f64> {
        self.is_finished(at).then_some(self.units)
    }

    /// Check if the dose can still change (a running bolus or temp basal).
    pub fn is_mutable(&self, at: SystemTime) -> bool {
        match self.dose_type {
            DoseType::Bolus | DoseType::TempBasal => !self.is_finished(at),
            DoseType::Suspend | DoseType::Resume => false,
        }
    }

    /// Cut the dose short at `at`.
    ///
    /// For a bolus, `remaining` is the pod's undelivered figure; without it
    /// the delivered amount is prorated. Temp basals are rounded down to
    /// whole pulses. A dose that already finished is left alone.
    pub fn cancel(&mut self, at: SystemTime, remaining: Option<f64>) {
        let Some(finish) = self.finish_time() else {
            return;
        };
        if at >= finish {
            return;
        }

        self.scheduled_units = Some(self.units);
        let new_duration = at.duration_since(self.start_time).unwrap_or(Duration::ZERO);
        let hours = new_duration.as_secs_f64() / 3600.0;

        match self.dose_type {
            DoseType::Bolus => {
                self.units = match remaining {
                    Some(remaining) => self.units - remaining,
                    None => self.rate() * hours,
                };
            }
            DoseType::TempBasal => {
                let rate = self.rate();
                self.scheduled_temp_rate = Some(rate);
                self.units = (rate * hours * PULSES_PER_UNIT).floor() / PULSES_PER_UNIT;
            }
            DoseType::Suspend | DoseType::Resume => {}
        }
        self.duration = Some(new_duration);
    }
}

impl fmt::Display for UnfinalizedDose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let certainty = match self.scheduled_certainty {
            ScheduledCertainty::Certain => "certain",
            ScheduledCertainty::Uncertain => "uncertain",
        };
        match self.dose_type {
            DoseType::Bolus => match self.scheduled_units {
                Some(scheduled) => write!(
                    f,
                    "InterruptedBolus: {:.3} U ({scheduled:.3} U scheduled) {certainty}",
                    self.units
                ),
                None => write!(f, "Bolus: {:.3} U {certainty}", self.units),
            },
            DoseType::TempBasal => write!(
                f,
                "TempBasal: {:.3} U/hour {:.3} U {certainty}",
                self.scheduled_temp_rate.unwrap_or_else(|| self.rate()),
                self.units
            ),
            DoseType::Suspend => write!(f, "Suspend {certainty}"),
            DoseType::Resume => write!(f, "Resume {certainty}"),
        }
    }
}

/// What a delivery command asked the pod to start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DoseProgram {
    /// Immediate bolus.
    Bolus {
        /// Units.
        volume: f64,
        /// Issued automatically.
        automatic: bool,
    },
    /// Temp basal.
    TempBasal {
        /// Rate in U/h.
        units_per_hour: f64,
        /// Length.
        duration: Duration,
        /// Above the scheduled rate.
        is_high_temp: bool,
        /// Issued automatically.
        automatic: bool,
    },
    /// Scheduled basal program (resume or initial program).
    BasalProgram,
}

impl DoseProgram {
    /// Dose record this program produces when started at `at`.
    pub fn unfinalized_dose(
        &self,
        at: SystemTime,
        certainty: ScheduledCertainty,
        insulin_type: InsulinType,
    ) -> UnfinalizedDose {
        match *self {
            DoseProgram::Bolus { volume, automatic } => {
                UnfinalizedDose::bolus(volume, at, certainty, insulin_type, automatic)
            }
            DoseProgram::TempBasal {
                units_per_hour,
                duration,
                is_high_temp,
                automatic,
            } => UnfinalizedDose::temp_basal(
                units_per_hour,
                at,
                duration,
                is_high_temp,
                automatic,
                certainty,
                insulin_type,
            ),
            DoseProgram::BasalProgram => UnfinalizedDose::resume(at, certainty, insulin_type),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_bolus_duration() {
        let bolus = UnfinalizedDose::bolus(2.5, t0(), ScheduledCertainty::Certain, InsulinType::Novolog, false);
        assert_eq!(bolus.duration, Some(Duration::from_secs(100)));
        assert!(!bolus.is_finished(t0() + Duration::from_secs(99)));
        assert!(bolus.is_finished(t0() + Duration::from_secs(100)));
    }

    #[test]
    fn test_cancel_bolus_with_remaining() {
        let mut bolus = UnfinalizedDose::bolus(2.5, t0(), ScheduledCertainty::Certain, InsulinType::Novolog, false);
        bolus.cancel(t0() + Duration::from_secs(20), Some(2.0));
        assert!((bolus.units - 0.5).abs() < 1e-9);
        assert_eq!(bolus.scheduled_units, Some(2.5));
        assert_eq!(bolus.duration, Some(Duration::from_secs(20)));
    }

    #[test]
    fn test_cancel_bolus_prorated() {
        let mut bolus = UnfinalizedDose::bolus(1.0, t0(), ScheduledCertainty::Certain, InsulinType::Novolog, false);
        bolus.cancel(t0() + Duration::from_secs(20), None);
        assert!((bolus.units - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_temp_basal_rounds_to_pulses() {
        let mut temp = UnfinalizedDose::temp_basal(
            1.0,
            t0(),
            Duration::from_secs(3600),
            false,
            true,
            ScheduledCertainty::Certain,
            InsulinType::Novolog,
        );
        temp.cancel(t0() + Duration::from_secs(10 * 60), None);
        // 1/6 U rounds down to 3 pulses
        assert!((temp.units - 0.15).abs() < 1e-9);
        assert_eq!(temp.scheduled_temp_rate, Some(1.0));
    }

    #[test]
    fn test_cancel_after_finish_is_noop() {
        let mut bolus = UnfinalizedDose::bolus(1.0, t0(), ScheduledCertainty::Certain, InsulinType::Novolog, false);
        let before = bolus.clone();
        bolus.cancel(t0() + Duration::from_secs(60), Some(0.5));
        assert_eq!(bolus, before);
    }

    #[test]
    fn test_suspend_is_never_mutable() {
        let suspend = UnfinalizedDose::suspend(t0(), ScheduledCertainty::Certain);
        assert!(!suspend.is_mutable(t0()));
        assert_eq!(suspend.finish_time(), None);
    }
}
