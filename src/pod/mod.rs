//! Pod model: lifecycle, dose bookkeeping, faults and alerts.
//!
//! [`PodState`] is the aggregate root. Everything else in this module is a
//! value type it records or a decoded report it folds in.

pub mod alerts;
pub mod dose;
pub mod fault;
pub mod pending;
pub mod schedule;
pub mod state;
pub mod status;

pub use alerts::{AlertConfiguration, AlertSet, AlertSlot, AlertTrigger, BeepRepeat, PodAlert};
pub use dose::{DoseProgram, DoseType, InsulinType, ScheduledCertainty, UnfinalizedDose};
pub use fault::{DetailedStatus, ErrorEventInfo, FaultEventCode, FaultRecord};
pub use pending::PendingCommand;
pub use schedule::{BasalSchedule, BasalScheduleEntry};
pub use state::{InsulinMeasurements, PodState, SetupProgress, SuspendState};
pub use status::{BeepPreference, BeepType, DeliveryStatus, DeliveryType, PodProgressStatus};
