//! Authoritative record of one physical pod.
//!
//! `PodState` is mutated only by the session that holds the pod lock. Every
//! method that depends on wall-clock time takes `now` explicitly so the
//! bookkeeping stays deterministic under test.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::alerts::{AlertSet, AlertSlot, PodAlert};
use super::dose::{DoseProgram, DoseType, InsulinType, ScheduledCertainty, UnfinalizedDose};
use super::fault::{DetailedStatus, FaultRecord};
use super::pending::PendingCommand;
use super::status::{DeliveryStatus, DeliveryType, PodProgressStatus};
use crate::core::{
    CANNULA_INSERTION_UNITS, CANNULA_INSERTION_UNITS_EXTRA, LTK_SIZE, NOMINAL_POD_LIFE,
    PRIME_UNITS, RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER,
};
use crate::crypto::NonceState;
use crate::transport::{MessageTransportState, StatusResponse};

/// Controller-side setup lifecycle, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SetupProgress {
    /// The pod accepted its address.
    AddressAssigned = 0,
    /// Setup command accepted.
    PodPaired,
    /// Prime command about to be sent.
    StartingPrime,
    /// Prime bolus running.
    Priming,
    /// Initial basal program about to be sent.
    SettingInitialBasalSchedule,
    /// Initial basal program accepted.
    InitialBasalScheduleSet,
    /// Cannula insertion command about to be sent.
    StartingInsertCannula,
    /// Cannula insertion bolus running.
    CannulaInserting,
    /// Ready for delivery.
    Completed,
    /// Setup ran past the activation window.
    ActivationTimeout,
    /// Pod reported constants this controller cannot drive.
    PodIncompatible,
}

impl SetupProgress {
    /// Check if the setup command was accepted.
    pub fn is_paired(self) -> bool {
        self >= SetupProgress::PodPaired
    }

    /// Check if no prime was ever sent.
    pub fn priming_never_attempted(self) -> bool {
        self < SetupProgress::StartingPrime
    }

    /// Check if the prime has not been confirmed yet.
    pub fn priming_needed(self) -> bool {
        self < SetupProgress::Priming
    }

    /// Check if the initial basal program has not been confirmed yet.
    pub fn needs_initial_basal_schedule(self) -> bool {
        self < SetupProgress::InitialBasalScheduleSet
    }

    /// Check if the cannula still needs inserting.
    pub fn needs_cannula_insertion(self) -> bool {
        self < SetupProgress::Completed
    }

    /// Check if the pod confirmed the insertion bolus.
    pub fn cannula_insertion_successfully_started(self) -> bool {
        self > SetupProgress::StartingInsertCannula
    }

    /// Check if setup ended in an error state.
    pub fn is_terminal(self) -> bool {
        matches!(self, SetupProgress::ActivationTimeout | SetupProgress::PodIncompatible)
    }
}

/// Basal delivery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuspendState {
    /// Suspended since.
    Suspended(SystemTime),
    /// Running since.
    Resumed(SystemTime),
}

/// Delivery counters from the last status.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InsulinMeasurements {
    /// Units delivered since setup completed. Never decreases.
    pub delivered: f64,
    /// Reservoir level; `None` while above the reporting threshold.
    pub reservoir_level: Option<f64>,
    /// When the status was received.
    pub valid_time: SystemTime,
}

/// Everything known about one paired pod.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodState {
    /// Pod address.
    pub address: u32,
    /// Command nonce generator.
    pub nonce_state: NonceState,
    /// Derived activation time.
    pub activated_at: Option<SystemTime>,
    /// Derived expiry; tracks pod clock drift.
    pub expires_at: Option<SystemTime>,
    /// Pod age when it faulted or was deactivated.
    pub active_time: Option<Duration>,
    /// Pod age from the last response, whole minutes.
    pub pod_time: Duration,
    /// When `pod_time` was last updated.
    pub pod_time_updated: Option<SystemTime>,
    /// Units delivered during setup, once known.
    pub setup_units_delivered: Option<f64>,
    /// Main processor firmware version.
    pub pm_version: String,
    /// Interface processor firmware version.
    pub pi_version: String,
    /// Lot number.
    pub lot: u32,
    /// Serial number.
    pub tid: u32,
    /// Alerts the pod is currently sounding.
    pub active_alert_slots: AlertSet,
    /// Delivery counters from the last status.
    pub last_insulin_measurements: Option<InsulinMeasurements>,
    /// Delivery command sent without a confirmed outcome.
    pub unacknowledged_command: Option<PendingCommand>,
    /// Bolus not yet archived.
    pub unfinalized_bolus: Option<UnfinalizedDose>,
    /// Temp basal not yet archived.
    pub unfinalized_temp_basal: Option<UnfinalizedDose>,
    /// Suspend awaiting its resume.
    pub unfinalized_suspend: Option<UnfinalizedDose>,
    /// Resume awaiting archival.
    pub unfinalized_resume: Option<UnfinalizedDose>,
    /// Archived doses not yet handed to storage.
    pub finalized_doses: Vec<UnfinalizedDose>,
    /// Basal delivery state.
    pub suspend_state: SuspendState,
    /// First fault seen. Never cleared.
    pub fault: Option<FaultRecord>,
    /// Transport counters and session keys.
    pub message_transport_state: MessageTransportState,
    /// When the prime bolus should be done.
    pub prime_finish_time: Option<SystemTime>,
    /// Setup lifecycle.
    pub setup_progress: SetupProgress,
    /// Alerts programmed into each slot.
    pub configured_alerts: BTreeMap<AlertSlot, PodAlert>,
    /// Insulin in the reservoir.
    pub insulin_type: InsulinType,
    /// Long-term key from pairing.
    pub ltk: [u8; LTK_SIZE],
    /// Delivery status from the last response this run.
    #[serde(skip)]
    pub last_delivery_status_received: Option<DeliveryStatus>,
}

impl PodState {
    /// Fresh state for a pod that just accepted its address.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        address: u32,
        pm_version: String,
        pi_version: String,
        lot: u32,
        tid: u32,
        ltk: [u8; LTK_SIZE],
        message_transport_state: MessageTransportState,
        insulin_type: InsulinType,
        now: SystemTime,
    ) -> Self {
        Self {
            address,
            nonce_state: NonceState::new(lot, tid, 0),
            activated_at: None,
            expires_at: None,
            active_time: None,
            pod_time: Duration::ZERO,
            pod_time_updated: None,
            setup_units_delivered: None,
            pm_version,
            pi_version,
            lot,
            tid,
            active_alert_slots: AlertSet::NONE,
            last_insulin_measurements: None,
            unacknowledged_command: None,
            unfinalized_bolus: None,
            unfinalized_temp_basal: None,
            unfinalized_suspend: None,
            unfinalized_resume: None,
            finalized_doses: Vec::new(),
            suspend_state: SuspendState::Resumed(now),
            fault: None,
            message_transport_state,
            prime_finish_time: None,
            setup_progress: SetupProgress::AddressAssigned,
            configured_alerts: BTreeMap::from([(
                AlertSlot::Slot7Expired,
                PodAlert::WaitingForPairingReminder,
            )]),
            insulin_type,
            ltk,
            last_delivery_status_received: None,
        }
    }

    /// Check if basal delivery is suspended.
    pub fn is_suspended(&self) -> bool {
        matches!(self.suspend_state, SuspendState::Suspended(_))
    }

    /// Check if a pending command needs a status query to resolve.
    ///
    /// A command still on the wire does not count.
    pub fn needs_comms_recovery(&self) -> bool {
        self.unacknowledged_command
            .as_ref()
            .is_some_and(|cmd| !cmd.is_in_flight())
    }

    /// Archived doses plus the ones still running.
    pub fn doses_to_store(&self) -> Vec<UnfinalizedDose> {
        self.finalized_doses
            .iter()
            .chain(self.unfinalized_temp_basal.iter())
            .chain(self.unfinalized_suspend.iter())
            .chain(self.unfinalized_bolus.iter())
            .cloned()
            .collect()
    }

    /// Check if setup has not completed.
    pub fn unfinished_setup(&self) -> bool {
        self.setup_progress != SetupProgress::Completed
    }

    /// Check if the prime bolus is done and the cannula can go in.
    pub fn ready_for_cannula_insertion(&self, now: SystemTime) -> bool {
        self.prime_finish_time
            .is_some_and(|finish| !self.setup_progress.priming_needed() && finish < now)
    }

    /// Check if the pod is set up and not faulted.
    pub fn is_active(&self) -> bool {
        self.setup_progress == SetupProgress::Completed && self.fault.is_none()
    }

    /// Check if setup completed, faulted or not.
    pub fn is_setup_complete(&self) -> bool {
        self.setup_progress == SetupProgress::Completed
    }

    /// Check if the pod can no longer deliver.
    pub fn is_faulted(&self) -> bool {
        self.fault.is_some() || self.setup_progress.is_terminal()
    }

    /// Nonce the next nonce-bearing command must carry.
    pub fn current_nonce(&self) -> u32 {
        self.nonce_state.current()
    }

    /// Consume the current nonce.
    pub fn advance_to_next_nonce(&mut self) {
        self.nonce_state.advance();
    }

    /// Rebuild the nonce table from the pod's sync word.
    pub fn resync_nonce(&mut self, sync_word: u16, sent_nonce: u32, message_seq: u8) {
        self.nonce_state.resync(sync_word, sent_nonce, message_seq);
    }

    /// Move setup forward.
    ///
    /// Backward moves are ignored. Terminal states are never left, and are
    /// only entered before setup completes.
    pub fn advance_setup(&mut self, progress: SetupProgress) {
        if self.setup_progress.is_terminal() {
            warn!(current = ?self.setup_progress, requested = ?progress, "setup is terminal; ignoring");
            return;
        }
        if progress < self.setup_progress
            || (progress.is_terminal() && self.setup_progress == SetupProgress::Completed)
        {
            warn!(current = ?self.setup_progress, requested = ?progress, "setup cannot move back; ignoring");
            return;
        }
        if progress != self.setup_progress {
            info!(from = ?self.setup_progress, to = ?progress, "setup progress");
            self.setup_progress = progress;
        }
    }

    /// Remember the alert programmed into `slot`.
    pub fn register_configured_alert(&mut self, slot: AlertSlot, alert: PodAlert) {
        self.configured_alerts.insert(slot, alert);
    }

    // Pod age only ever moves forward; a step back means the pod reset.
    fn update_pod_times(&mut self, time_active: Duration, now: SystemTime) {
        if time_active < self.pod_time {
            warn!(
                pod_time = ?self.pod_time,
                reported = ?time_active,
                "pod time went backwards"
            );
            return;
        }
        self.pod_time = time_active;
        self.pod_time_updated = Some(now);

        let activated_at = now.checked_sub(time_active).unwrap_or(now);
        if self.activated_at.is_none() {
            self.activated_at = Some(activated_at);
        }
        let computed = activated_at + NOMINAL_POD_LIFE;
        match self.expires_at {
            None => self.expires_at = Some(computed),
            Some(expires_at)
                if computed < expires_at || computed > expires_at + Duration::from_secs(60) =>
            {
                debug!(?computed, ?expires_at, "re-basing expiry");
                self.expires_at = Some(computed);
            }
            Some(_) => {}
        }
    }

    /// Fold a status response into the record.
    pub fn update_from_status(&mut self, status: &StatusResponse, now: SystemTime) {
        self.update_pod_times(status.time_active, now);
        self.update_delivery_status(
            status.delivery_status,
            status.pod_progress_status,
            status.bolus_not_delivered,
            now,
        );

        let setup_units = self
            .setup_units_delivered
            .unwrap_or(PRIME_UNITS + CANNULA_INSERTION_UNITS + CANNULA_INSERTION_UNITS_EXTRA);
        let previous = self.last_insulin_measurements.map_or(0.0, |m| m.delivered);
        let delivered = (status.insulin_delivered - setup_units).max(previous);
        let reservoir_level = (status.reservoir_level < RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER)
            .then_some(status.reservoir_level);

        self.last_insulin_measurements = Some(InsulinMeasurements {
            delivered,
            reservoir_level,
            valid_time: now,
        });
        self.active_alert_slots = status.alerts;
    }

    fn update_delivery_status(
        &mut self,
        delivery_status: DeliveryStatus,
        progress: PodProgressStatus,
        bolus_not_delivered: f64,
        now: SystemTime,
    ) {
        self.last_delivery_status_received = Some(delivery_status);

        if delivery_status.bolusing() && self.unfinalized_bolus.is_none() && progress.ready_for_delivery() {
            warn!(bolus_not_delivered, "pod is bolusing with no tracked bolus");
            self.unfinalized_bolus = Some(UnfinalizedDose::bolus(
                bolus_not_delivered,
                now,
                ScheduledCertainty::Certain,
                self.insulin_type,
                false,
            ));
        }

        if delivery_status != DeliveryStatus::Suspended && self.is_suspended() {
            debug!("pod is delivering basal while marked suspended");
            self.suspend_state = SuspendState::Resumed(now);
            self.unfinalized_resume = Some(UnfinalizedDose::resume(
                now,
                ScheduledCertainty::Certain,
                self.insulin_type,
            ));
        }

        if !delivery_status.bolusing()
            && let Some(mut bolus) = self.unfinalized_bolus.take()
        {
            if !bolus.is_finished(now) {
                bolus.cancel(now, Some(bolus_not_delivered));
            }
            debug!(%bolus, "finalizing bolus");
            self.finalized_doses.push(bolus);
        }

        if !delivery_status.temp_basal_running()
            && let Some(mut temp_basal) = self.unfinalized_temp_basal.take()
        {
            if !temp_basal.is_finished(now) {
                temp_basal.cancel(now, None);
            }
            debug!(%temp_basal, "finalizing temp basal");
            self.finalized_doses.push(temp_basal);
        }

        if let (Some(suspend), Some(resume)) = (&self.unfinalized_suspend, &self.unfinalized_resume)
            && suspend.start_time < resume.start_time
        {
            self.finalized_doses.push(suspend.clone());
            self.finalized_doses.push(resume.clone());
            self.unfinalized_suspend = None;
            self.unfinalized_resume = None;
        }
    }

    /// Record a cancellation of the kinds in `mask` at `now`.
    ///
    /// Only doses still running are cut short. Returns the last dose that
    /// was interrupted.
    pub fn handle_cancel_dosing(
        &mut self,
        mask: DeliveryType,
        bolus_not_delivered: f64,
        now: SystemTime,
    ) -> Option<UnfinalizedDose> {
        let mut canceled = None;

        if mask.contains(DeliveryType::BASAL) {
            self.unfinalized_suspend = Some(UnfinalizedDose::suspend(now, ScheduledCertainty::Certain));
            self.suspend_state = SuspendState::Suspended(now);
        }

        if mask.contains(DeliveryType::TEMP_BASAL)
            && let Some(temp_basal) = self.unfinalized_temp_basal.as_mut()
            && temp_basal.finish_time().is_some_and(|finish| finish > now)
        {
            temp_basal.cancel(now, None);
            if !mask.contains(DeliveryType::BASAL) {
                self.suspend_state = SuspendState::Resumed(now);
            }
            info!(%temp_basal, "interrupted temp basal");
            canceled = Some(temp_basal.clone());
        }

        if mask.contains(DeliveryType::BOLUS)
            && let Some(bolus) = self.unfinalized_bolus.as_mut()
            && bolus.finish_time().is_some_and(|finish| finish > now)
        {
            bolus.cancel(now, Some(bolus_not_delivered));
            info!(%bolus, "interrupted bolus");
            canceled = Some(bolus.clone());
        }

        canceled
    }

    /// Archive the bolus and temp basal.
    pub fn finalize_all_doses(&mut self) {
        if let Some(bolus) = self.unfinalized_bolus.take() {
            self.finalized_doses.push(bolus);
        }
        if let Some(temp_basal) = self.unfinalized_temp_basal.take() {
            self.finalized_doses.push(temp_basal);
        }
    }

    /// Settle the pending command against a status from the pod.
    ///
    /// The pod echoes the message number of the last programming command it
    /// accepted; a match means the command took effect.
    pub fn recover_unacknowledged_command(&mut self, status: &StatusResponse) {
        let Some(pending) = self.unacknowledged_command.take() else {
            return;
        };
        if status.last_programming_message_seq != pending.sequence() {
            warn!(%pending, "unacknowledged command was not received by the pod");
            return;
        }
        warn!(%pending, "unacknowledged command was received by the pod");

        match pending {
            PendingCommand::Program {
                program,
                command_date,
                ..
            } => {
                let dose = program.unfinalized_dose(command_date, ScheduledCertainty::Certain, self.insulin_type);
                match dose.dose_type {
                    DoseType::Bolus => self.unfinalized_bolus = Some(dose),
                    DoseType::TempBasal => self.unfinalized_temp_basal = Some(dose),
                    DoseType::Resume => self.suspend_state = SuspendState::Resumed(command_date),
                    DoseType::Suspend => {}
                }
            }
            PendingCommand::StopProgram {
                stop, command_date, ..
            } => {
                if stop.contains(DeliveryType::BOLUS)
                    && let Some(bolus) = self.unfinalized_bolus.as_mut()
                    && !bolus.is_finished(command_date)
                {
                    bolus.cancel(command_date, Some(status.bolus_not_delivered));
                }
                if stop.contains(DeliveryType::TEMP_BASAL)
                    && let Some(temp_basal) = self.unfinalized_temp_basal.as_mut()
                    && !temp_basal.is_finished(command_date)
                {
                    temp_basal.cancel(command_date, None);
                }
                if stop.contains(DeliveryType::BASAL) {
                    self.finalized_doses
                        .push(UnfinalizedDose::suspend(command_date, ScheduledCertainty::Certain));
                    self.suspend_state = SuspendState::Suspended(command_date);
                }
            }
        }
    }

    /// Give up on the pending command, erring towards more insulin delivered.
    ///
    /// Boluses and high temps are assumed to have started; stops are assumed
    /// to have failed, except when stopping a high temp.
    pub fn resolve_any_pending_command_with_uncertainty(&mut self, now: SystemTime) {
        let Some(pending) = self.unacknowledged_command.take() else {
            return;
        };
        warn!(%pending, "resolving pending command with uncertainty");

        match pending {
            PendingCommand::Program {
                program,
                command_date,
                ..
            } => {
                let dose = program.unfinalized_dose(command_date, ScheduledCertainty::Uncertain, self.insulin_type);
                match dose.dose_type {
                    DoseType::Bolus => {
                        if dose.is_finished(now) {
                            self.finalized_doses.push(dose);
                        } else {
                            self.unfinalized_bolus = Some(dose);
                        }
                    }
                    DoseType::TempBasal => {
                        if let DoseProgram::TempBasal { is_high_temp: true, .. } = program {
                            if dose.is_finished(now) {
                                self.finalized_doses.push(dose);
                            } else {
                                self.unfinalized_temp_basal = Some(dose);
                            }
                        }
                    }
                    DoseType::Resume => self.finalized_doses.push(dose),
                    DoseType::Suspend => {}
                }
            }
            PendingCommand::StopProgram {
                stop, command_date, ..
            } => {
                if stop.contains(DeliveryType::TEMP_BASAL)
                    && let Some(temp_basal) = self.unfinalized_temp_basal.as_mut()
                    && temp_basal.is_high_temp
                    && !temp_basal.is_finished(command_date)
                {
                    temp_basal.cancel(command_date, None);
                }
            }
        }
    }

    /// Record a pod fault.
    ///
    /// Only the first fault is kept. Capturing stops every dose, settles any
    /// pending command from the fault report and archives what was running,
    /// using the pod's undelivered figure for the bolus. Returns whether this
    /// call captured the fault.
    pub fn capture_fault(&mut self, fault: DetailedStatus, now: SystemTime) -> bool {
        if self.fault.is_some() {
            debug!(code = %fault.fault_event_code, "fault already captured");
            return false;
        }

        self.active_time = Some(match self.activated_at {
            Some(activated_at) => now.duration_since(activated_at).unwrap_or(fault.time_active),
            None => fault.fault_event_time_since_activation.unwrap_or(fault.time_active),
        });
        self.handle_cancel_dosing(DeliveryType::ALL, fault.bolus_not_delivered, now);

        let derived = StatusResponse::from(&fault);
        self.recover_unacknowledged_command(&derived);
        self.update_from_status(&derived, now);
        self.finalize_all_doses();

        info!(
            code = %fault.fault_event_code,
            pdm_ref = fault.pdm_ref().as_deref().unwrap_or("-"),
            "captured pod fault"
        );
        self.fault = Some(FaultRecord::new(fault, now));
        true
    }
}

impl fmt::Display for PodState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "### PodState")?;
        writeln!(f, "* address: {:08X}", self.address)?;
        writeln!(f, "* lot: {} tid: {}", self.lot, self.tid)?;
        writeln!(f, "* pm: {} pi: {}", self.pm_version, self.pi_version)?;
        writeln!(f, "* setupProgress: {:?}", self.setup_progress)?;
        writeln!(f, "* suspendState: {:?}", self.suspend_state)?;
        if let Some(pending) = &self.unacknowledged_command {
            writeln!(f, "* unacknowledgedCommand: {pending}")?;
        }
        for dose in self
            .unfinalized_bolus
            .iter()
            .chain(self.unfinalized_temp_basal.iter())
        {
            writeln!(f, "* unfinalized: {dose}")?;
        }
        writeln!(f, "* finalizedDoses: {}", self.finalized_doses.len())?;
        writeln!(f, "* activeAlerts: {}", self.active_alert_slots)?;
        match self.fault.as_ref().and_then(FaultRecord::pdm_ref) {
            Some(pdm_ref) => write!(f, "* pdmRef: {pdm_ref}"),
            None => write!(f, "* pdmRef: none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::fault::FaultEventCode;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn active_pod() -> PodState {
        let mut pod = PodState::new(
            0x1F01_482A,
            "2.7.0".into(),
            "2.7.0".into(),
            42_560,
            661_771,
            [0u8; LTK_SIZE],
            MessageTransportState::default(),
            InsulinType::Novolog,
            t0(),
        );
        pod.setup_progress = SetupProgress::Completed;
        pod.setup_units_delivered = Some(3.1);
        pod
    }

    fn status(delivery_status: DeliveryStatus, not_delivered: f64) -> StatusResponse {
        StatusResponse {
            delivery_status,
            pod_progress_status: PodProgressStatus::AboveFiftyUnits,
            time_active: secs(60 * 60),
            reservoir_level: RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER,
            insulin_delivered: 10.0,
            bolus_not_delivered: not_delivered,
            last_programming_message_seq: 0,
            alerts: AlertSet::NONE,
        }
    }

    fn fault_report(not_delivered: f64) -> DetailedStatus {
        DetailedStatus {
            pod_progress_status: PodProgressStatus::FaultEventOccurred,
            delivery_status: DeliveryStatus::Suspended,
            bolus_not_delivered: not_delivered,
            last_programming_message_seq: 9,
            total_insulin_delivered: 20.0,
            fault_event_code: FaultEventCode::OCCLUDED,
            fault_event_time_since_activation: Some(secs(60 * 60)),
            reservoir_level: 30.0,
            time_active: secs(61 * 60),
            unacknowledged_alerts: AlertSet::NONE,
            fault_accessing_tables: false,
            error_event_info: None,
            receiver_low_gain: 0,
            radio_rssi: 0,
            possible_fault_calling_address: Some(0),
        }
    }

    #[test]
    fn test_setup_progress_helpers() {
        assert!(!SetupProgress::AddressAssigned.is_paired());
        assert!(SetupProgress::PodPaired.is_paired());
        assert!(SetupProgress::PodPaired.priming_never_attempted());
        assert!(SetupProgress::StartingPrime.priming_needed());
        assert!(!SetupProgress::Priming.priming_needed());
        assert!(SetupProgress::SettingInitialBasalSchedule.needs_initial_basal_schedule());
        assert!(!SetupProgress::StartingInsertCannula.cannula_insertion_successfully_started());
        assert!(SetupProgress::CannulaInserting.cannula_insertion_successfully_started());
        assert!(!SetupProgress::Completed.needs_cannula_insertion());
    }

    #[test]
    fn test_terminal_setup_is_absorbing() {
        let mut pod = active_pod();
        pod.setup_progress = SetupProgress::Priming;
        pod.advance_setup(SetupProgress::ActivationTimeout);
        pod.advance_setup(SetupProgress::Completed);
        assert_eq!(pod.setup_progress, SetupProgress::ActivationTimeout);
        assert!(pod.is_faulted());
        assert!(!pod.is_active());
    }

    #[test]
    fn test_setup_progress_never_moves_back() {
        let mut pod = active_pod();
        assert_eq!(pod.setup_progress, SetupProgress::Completed);
        pod.advance_setup(SetupProgress::AddressAssigned);
        pod.advance_setup(SetupProgress::Priming);
        pod.advance_setup(SetupProgress::ActivationTimeout);
        pod.advance_setup(SetupProgress::PodIncompatible);
        assert_eq!(pod.setup_progress, SetupProgress::Completed);
        assert!(pod.is_active());

        pod.setup_progress = SetupProgress::CannulaInserting;
        pod.advance_setup(SetupProgress::StartingInsertCannula);
        assert_eq!(pod.setup_progress, SetupProgress::CannulaInserting);
        pod.advance_setup(SetupProgress::PodIncompatible);
        assert_eq!(pod.setup_progress, SetupProgress::PodIncompatible);
    }

    #[test]
    fn test_ready_for_cannula_insertion() {
        let mut pod = active_pod();
        pod.setup_progress = SetupProgress::Priming;
        pod.prime_finish_time = Some(t0() + secs(55));
        assert!(!pod.ready_for_cannula_insertion(t0()));
        assert!(pod.ready_for_cannula_insertion(t0() + secs(56)));

        pod.setup_progress = SetupProgress::StartingPrime;
        assert!(!pod.ready_for_cannula_insertion(t0() + secs(56)));
    }

    #[test]
    fn test_pod_times_ignore_backwards_steps() {
        let mut pod = active_pod();
        let now = t0() + secs(3600);
        pod.update_from_status(&status(DeliveryStatus::ScheduledBasal, 0.0), now);
        assert_eq!(pod.activated_at, Some(t0()));
        assert_eq!(pod.expires_at, Some(t0() + NOMINAL_POD_LIFE));

        let mut earlier = status(DeliveryStatus::ScheduledBasal, 0.0);
        earlier.time_active = secs(60);
        pod.update_from_status(&earlier, now + secs(60));
        assert_eq!(pod.pod_time, secs(3600));
        assert_eq!(pod.pod_time_updated, Some(now));
    }

    #[test]
    fn test_expiry_rebases_on_drift() {
        let mut pod = active_pod();
        pod.update_from_status(&status(DeliveryStatus::ScheduledBasal, 0.0), t0() + secs(3600));

        // 30 s late: within tolerance
        let mut s = status(DeliveryStatus::ScheduledBasal, 0.0);
        s.time_active = secs(2 * 3600);
        pod.update_from_status(&s, t0() + secs(2 * 3600 + 30));
        assert_eq!(pod.expires_at, Some(t0() + NOMINAL_POD_LIFE));

        // 5 min late: re-based
        s.time_active = secs(3 * 3600);
        pod.update_from_status(&s, t0() + secs(3 * 3600 + 300));
        assert_eq!(pod.expires_at, Some(t0() + secs(300) + NOMINAL_POD_LIFE));
    }

    #[test]
    fn test_delivered_never_decreases() {
        let mut pod = active_pod();
        pod.update_from_status(&status(DeliveryStatus::ScheduledBasal, 0.0), t0());
        let first = pod.last_insulin_measurements.map(|m| m.delivered);
        assert!((first.unwrap_or_default() - 6.9).abs() < 1e-9);

        let mut lower = status(DeliveryStatus::ScheduledBasal, 0.0);
        lower.insulin_delivered = 1.0;
        pod.update_from_status(&lower, t0() + secs(60));
        let measurements = pod.last_insulin_measurements.unwrap();
        assert!((measurements.delivered - 6.9).abs() < 1e-9);
        assert_eq!(measurements.reservoir_level, None);
    }

    #[test]
    fn test_untracked_bolus_is_synthesized() {
        let mut pod = active_pod();
        pod.update_from_status(&status(DeliveryStatus::BolusInProgress, 1.5), t0());
        let bolus = pod.unfinalized_bolus.as_ref().unwrap();
        assert_eq!(bolus.units, 1.5);
        assert_eq!(bolus.scheduled_certainty, ScheduledCertainty::Certain);
    }

    #[test]
    fn test_stopped_bolus_finalized_with_remaining() {
        let mut pod = active_pod();
        pod.unfinalized_bolus = Some(UnfinalizedDose::bolus(
            2.5,
            t0(),
            ScheduledCertainty::Certain,
            InsulinType::Novolog,
            false,
        ));
        pod.update_from_status(&status(DeliveryStatus::ScheduledBasal, 2.0), t0() + secs(20));

        assert!(pod.unfinalized_bolus.is_none());
        let bolus = pod.finalized_doses.last().unwrap();
        assert!((bolus.units - 0.5).abs() < 1e-9);
        assert_eq!(bolus.scheduled_units, Some(2.5));
    }

    #[test]
    fn test_cancel_temp_basal_leaves_bolus() {
        let mut pod = active_pod();
        pod.unfinalized_bolus = Some(UnfinalizedDose::bolus(
            5.0,
            t0(),
            ScheduledCertainty::Certain,
            InsulinType::Novolog,
            false,
        ));
        pod.unfinalized_temp_basal = Some(UnfinalizedDose::temp_basal(
            2.0,
            t0(),
            secs(1800),
            true,
            false,
            ScheduledCertainty::Certain,
            InsulinType::Novolog,
        ));
        let bolus_before = pod.unfinalized_bolus.clone();

        let canceled = pod.handle_cancel_dosing(DeliveryType::TEMP_BASAL, 0.0, t0() + secs(900));
        let temp = canceled.unwrap();
        assert_eq!(temp.dose_type, DoseType::TempBasal);
        assert_eq!(temp.duration, Some(secs(900)));
        assert_eq!(temp.finish_time(), Some(t0() + secs(900)));
        assert_eq!(pod.unfinalized_bolus, bolus_before);
        assert!(!pod.is_suspended());
    }

    #[test]
    fn test_cancel_basal_suspends() {
        let mut pod = active_pod();
        pod.handle_cancel_dosing(DeliveryType::ALL, 0.0, t0());
        assert_eq!(pod.suspend_state, SuspendState::Suspended(t0()));
        assert!(pod.unfinalized_suspend.is_some());
    }

    #[test]
    fn test_suspend_resume_pair_finalized_in_order() {
        let mut pod = active_pod();
        pod.handle_cancel_dosing(DeliveryType::ALL, 0.0, t0());
        pod.update_from_status(&status(DeliveryStatus::ScheduledBasal, 0.0), t0() + secs(600));

        assert!(pod.unfinalized_suspend.is_none());
        assert!(pod.unfinalized_resume.is_none());
        let kinds: Vec<DoseType> = pod.finalized_doses.iter().map(|d| d.dose_type).collect();
        assert_eq!(kinds, vec![DoseType::Suspend, DoseType::Resume]);
    }

    #[test]
    fn test_recover_received_bolus() {
        let mut pod = active_pod();
        pod.unacknowledged_command = Some(
            PendingCommand::program(
                DoseProgram::Bolus {
                    volume: 1.0,
                    automatic: false,
                },
                6,
                t0(),
            )
            .comms_finished(),
        );
        assert!(pod.needs_comms_recovery());

        let mut s = status(DeliveryStatus::BolusInProgress, 0.8);
        s.last_programming_message_seq = 6;
        pod.recover_unacknowledged_command(&s);
        assert!(pod.unacknowledged_command.is_none());
        assert_eq!(pod.unfinalized_bolus.as_ref().map(|b| b.units), Some(1.0));
    }

    #[test]
    fn test_recover_unreceived_command_is_dropped() {
        let mut pod = active_pod();
        pod.unacknowledged_command = Some(PendingCommand::stop_program(DeliveryType::ALL, 6, t0()));
        assert!(!pod.needs_comms_recovery());

        let mut s = status(DeliveryStatus::ScheduledBasal, 0.0);
        s.last_programming_message_seq = 5;
        pod.recover_unacknowledged_command(&s);
        assert!(pod.unacknowledged_command.is_none());
        assert!(!pod.is_suspended());
    }

    #[test]
    fn test_uncertain_resolution_assumes_more_insulin() {
        let mut pod = active_pod();
        pod.unacknowledged_command = Some(PendingCommand::program(
            DoseProgram::TempBasal {
                units_per_hour: 0.0,
                duration: secs(1800),
                is_high_temp: false,
                automatic: true,
            },
            3,
            t0(),
        ));
        pod.resolve_any_pending_command_with_uncertainty(t0() + secs(10));
        assert!(pod.unfinalized_temp_basal.is_none());

        pod.unacknowledged_command = Some(PendingCommand::program(
            DoseProgram::Bolus {
                volume: 2.0,
                automatic: false,
            },
            4,
            t0(),
        ));
        pod.resolve_any_pending_command_with_uncertainty(t0() + secs(10));
        let bolus = pod.unfinalized_bolus.as_ref().unwrap();
        assert_eq!(bolus.scheduled_certainty, ScheduledCertainty::Uncertain);
    }

    #[test]
    fn test_fault_is_permanent() {
        let mut pod = active_pod();
        pod.activated_at = Some(t0());
        pod.unfinalized_bolus = Some(UnfinalizedDose::bolus(
            4.0,
            t0(),
            ScheduledCertainty::Certain,
            InsulinType::Novolog,
            false,
        ));

        let now = t0() + secs(40);
        assert!(pod.capture_fault(fault_report(3.0), now));
        assert!(pod.unfinalized_bolus.is_none());
        let bolus = pod
            .finalized_doses
            .iter()
            .find(|d| d.dose_type == DoseType::Bolus)
            .unwrap();
        assert!((bolus.units - 1.0).abs() < 1e-9);
        assert!(pod.is_suspended());
        assert_eq!(pod.active_time, Some(secs(40)));

        let mut second = fault_report(0.0);
        second.fault_event_code = FaultEventCode::RESERVOIR_EMPTY;
        assert!(!pod.capture_fault(second, now + secs(60)));
        let fault = pod.fault.as_ref().unwrap();
        assert_eq!(fault.code(), FaultEventCode::OCCLUDED);
        assert_eq!(fault.captured_at, now);
        assert!(pod.is_faulted());
    }

    #[test]
    fn test_doses_to_store_order() {
        let mut pod = active_pod();
        pod.finalized_doses.push(UnfinalizedDose::suspend(t0(), ScheduledCertainty::Certain));
        pod.unfinalized_bolus = Some(UnfinalizedDose::bolus(
            1.0,
            t0(),
            ScheduledCertainty::Certain,
            InsulinType::Novolog,
            false,
        ));
        let kinds: Vec<DoseType> = pod.doses_to_store().iter().map(|d| d.dose_type).collect();
        assert_eq!(kinds, vec![DoseType::Suspend, DoseType::Bolus]);
    }
}
