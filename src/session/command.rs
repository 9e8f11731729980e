//! One exclusive command session with a paired pod.

use std::future::Future;
use std::time::{Duration, SystemTime};

use tracing::{debug, error, info, warn};

use crate::core::{
    Clock, MessageCipher, PodChannel, CANNULA_INSERTION_UNITS, CANNULA_INSERTION_UNITS_EXTRA,
    END_OF_SERVICE_IMMINENT_WINDOW, NOMINAL_POD_LIFE, NONCE_RESYNC_ATTEMPTS, PRIME_DELIVERY_RATE,
    PRIME_EXTRA_WAIT, PRIME_UNITS, SECONDS_PER_BOLUS_PULSE, SECONDS_PER_PRIME_PULSE,
    SERVICE_DURATION,
};
use crate::pod::{
    AlertSet, AlertSlot, BasalSchedule, BeepPreference, BeepType, DeliveryType, DetailedStatus,
    DoseProgram, PendingCommand, PodAlert, PodProgressStatus, PodState, ScheduledCertainty,
    SetupProgress, SuspendState, UnfinalizedDose,
};
use crate::transport::blocks::{
    AcknowledgeAlertCommand, BasalScheduleExtraCommand, BeepConfigCommand, BolusExtraCommand,
    CancelDeliveryCommand, ConfigureAlertsCommand, DeactivatePodCommand, FaultConfigCommand,
    GetStatusCommand, SetInsulinScheduleCommand, TempBasalExtraCommand,
};
use crate::transport::{
    ErrorResponse, Message, MessageBlock, MessageBlockType, MessageTransport, PodInfoResponse,
    PodInfoType, ResponseBlock, StatusResponse,
};

use super::error::{PodCommsError, PodCommsResult};
use super::results::{CancelDeliveryResult, DeliveryCommandResult};

/// Beeps and reminders attached to a delivery command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryOptions {
    /// Beep when the pod accepts the command.
    pub acknowledgement_beep: bool,
    /// Beep when the delivery finishes.
    pub completion_beep: bool,
    /// Reminder beep interval while the delivery runs; zero disables.
    pub program_reminder_interval: Duration,
}

impl DeliveryOptions {
    /// Options for a command under the user's beep preference.
    pub fn for_preference(preference: BeepPreference, automatic: bool) -> Self {
        let beep = preference.should_beep_for(automatic);
        Self {
            acknowledgement_beep: beep,
            completion_beep: beep,
            program_reminder_interval: Duration::ZERO,
        }
    }
}

/// Commands against one pod while its state is exclusively borrowed.
///
/// Every operation folds the pod's reply into [`PodState`] before
/// returning, so the record always reflects the last thing the pod said.
pub struct CommandSession<'a, C: PodChannel> {
    channel: &'a mut C,
    cipher: &'a dyn MessageCipher,
    clock: &'a dyn Clock,
    pod_state: &'a mut PodState,
    my_id: u32,
}

impl<'a, C: PodChannel> CommandSession<'a, C> {
    /// Start a session as controller `my_id`.
    pub fn new(
        channel: &'a mut C,
        cipher: &'a dyn MessageCipher,
        clock: &'a dyn Clock,
        pod_state: &'a mut PodState,
        my_id: u32,
    ) -> Self {
        Self {
            channel,
            cipher,
            clock,
            pod_state,
            my_id,
        }
    }

    /// The pod record this session mutates.
    pub fn pod_state(&self) -> &PodState {
        self.pod_state
    }

    fn now(&self) -> SystemTime {
        self.clock.now()
    }

    // Pod age extrapolated from the last status.
    fn pod_time_now(&self) -> Duration {
        let elapsed = self
            .pod_state
            .pod_time_updated
            .and_then(|updated| self.now().duration_since(updated).ok())
            .unwrap_or_default();
        self.pod_state.pod_time + elapsed
    }

    async fn exchange(&mut self, blocks: Vec<MessageBlock>, message_number: u8) -> PodCommsResult<Message> {
        let address = self.pod_state.address;
        let message = Message::new(address, blocks, message_number);
        let mut transport = MessageTransport::new(
            &mut *self.channel,
            self.cipher,
            &mut self.pod_state.message_transport_state,
            self.my_id,
            address,
        );
        Ok(transport.send(&message).await?)
    }

    /// Send `blocks` as one message and return the reply block of type `R`.
    ///
    /// Nonce-bearing blocks share the current nonce. A bad-nonce reply
    /// resyncs the generator and retries; at most [`NONCE_RESYNC_ATTEMPTS`]
    /// exchanges happen in total. A fault reply is captured into the pod
    /// state and surfaces as [`PodCommsError::PodFault`].
    pub async fn send<R: ResponseBlock>(
        &mut self,
        mut blocks: Vec<MessageBlock>,
        beep_block: Option<MessageBlock>,
    ) -> PodCommsResult<R> {
        if let Some(beep) = beep_block
            && !self.pod_state.is_faulted()
        {
            blocks.push(beep);
        }

        let mut sent_nonce = blocks.iter().find_map(MessageBlock::nonce);
        if blocks.iter().any(MessageBlock::is_nonce_resyncable) {
            self.pod_state.advance_to_next_nonce();
        }
        let message_number = self.pod_state.message_transport_state.message_number;

        for attempt in 0..NONCE_RESYNC_ATTEMPTS {
            self.pod_state.last_delivery_status_received = None;
            let response = self.exchange(blocks.clone(), message_number).await?;

            let Some(first) = response.message_blocks.first().cloned() else {
                return Err(PodCommsError::NoResponse);
            };
            if let Some(reply) = R::from_block(first.clone()) {
                return Ok(reply);
            }
            if let Some(fault) = response.fault() {
                return Err(self.handle_pod_fault(fault.clone()));
            }

            match first {
                MessageBlock::ErrorResponse(ErrorResponse::BadNonce { nonce_resync_key }) => {
                    let Some(sent) = sent_nonce else {
                        error!(?first, "bad nonce for a message without a nonce");
                        return Err(PodCommsError::UnexpectedResponse(MessageBlockType::ErrorResponse));
                    };
                    self.pod_state.resync_nonce(nonce_resync_key, sent, message_number);
                    let nonce = self.pod_state.current_nonce();
                    warn!(
                        attempt,
                        sync_word = format_args!("{nonce_resync_key:#06x}"),
                        sent = format_args!("{sent:#010x}"),
                        nonce = format_args!("{nonce:#010x}"),
                        "bad nonce; resynced"
                    );
                    for block in &mut blocks {
                        block.set_nonce(nonce);
                    }
                    sent_nonce = Some(nonce);
                    self.pod_state.advance_to_next_nonce();
                }
                MessageBlock::ErrorResponse(ErrorResponse::Nonretryable {
                    code,
                    fault_event_code,
                    pod_progress,
                }) => {
                    error!(code, %fault_event_code, ?pod_progress, "command rejected");
                    return Err(PodCommsError::RejectedMessage(code));
                }
                other => {
                    error!(expected = ?R::BLOCK_TYPE, got = ?other.block_type(), "unexpected response");
                    return Err(PodCommsError::UnexpectedResponse(other.block_type()));
                }
            }
        }
        Err(PodCommsError::NonceResyncFailed)
    }

    fn handle_pod_fault(&mut self, fault: DetailedStatus) -> PodCommsError {
        let now = self.now();
        if self.pod_state.capture_fault(fault.clone(), now) {
            error!(code = %fault.fault_event_code, progress = ?fault.pod_progress_status, "pod fault");
        }
        if fault.pod_progress_status == PodProgressStatus::ActivationTimeExceeded {
            self.pod_state.advance_setup(SetupProgress::ActivationTimeout);
            return PodCommsError::ActivationTimeExceeded;
        }
        PodCommsError::PodFault(Box::new(fault))
    }

    async fn get_status_block(&mut self, beep_block: Option<MessageBlock>) -> PodCommsResult<StatusResponse> {
        self.send(
            vec![GetStatusCommand {
                pod_info_type: PodInfoType::Normal,
            }
            .into()],
            beep_block,
        )
        .await
    }

    fn update(&mut self, status: &StatusResponse) {
        let now = self.now();
        self.pod_state.update_from_status(status, now);
    }

    // Setup

    // Setup steps only run until setup has moved past them.
    fn require_setup_at_most(&self, step: SetupProgress) -> PodCommsResult<()> {
        let progress = self.pod_state.setup_progress;
        if progress > step {
            warn!(?progress, ?step, "setup step already passed");
            return Err(PodCommsError::SetupStepPassed(progress));
        }
        Ok(())
    }

    /// Start priming; returns how long until the prime bolus finishes.
    ///
    /// A repeated call after an interrupted attempt asks the pod whether
    /// priming already started instead of priming twice.
    pub async fn prime(&mut self) -> PodCommsResult<Duration> {
        self.require_setup_at_most(SetupProgress::Priming)?;
        let prime_duration = Duration::from_secs_f64(PRIME_UNITS / PRIME_DELIVERY_RATE) + PRIME_EXTRA_WAIT;

        if self.pod_state.setup_progress.priming_never_attempted() {
            // Only accepted before the prime bolus.
            let fault_config = FaultConfigCommand {
                nonce: self.pod_state.current_nonce(),
                tab5_sub16: 0,
                tab5_sub17: 0,
            };
            let _: StatusResponse = self.send(vec![fault_config.into()], None).await?;
            self.configure_alerts(&[PodAlert::FinishSetupReminder], false, None)
                .await?;
        } else {
            let status = self.get_status_block(None).await?;
            self.update(&status);
            if matches!(
                status.pod_progress_status,
                PodProgressStatus::Priming | PodProgressStatus::PrimingCompleted
            ) {
                info!("prime already started");
                self.pod_state.advance_setup(SetupProgress::Priming);
                let now = self.now();
                return Ok(self
                    .pod_state
                    .prime_finish_time
                    .map_or(prime_duration, |finish| finish.duration_since(now).unwrap_or_default()));
            }
        }

        let now = self.now();
        self.pod_state.prime_finish_time = Some(now + prime_duration);
        self.pod_state.advance_setup(SetupProgress::StartingPrime);

        let time_between_pulses = Duration::from_secs_f64(SECONDS_PER_PRIME_PULSE);
        let schedule = SetInsulinScheduleCommand::bolus(self.pod_state.current_nonce(), PRIME_UNITS, time_between_pulses);
        let extra = BolusExtraCommand::new(PRIME_UNITS, time_between_pulses, false, false, Duration::ZERO);
        let status: StatusResponse = self.send(vec![schedule.into(), extra.into()], None).await?;
        self.update(&status);
        self.pod_state.advance_setup(SetupProgress::Priming);
        Ok(prime_duration)
    }

    /// Program the first basal schedule during setup.
    pub async fn program_initial_basal_schedule(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
    ) -> PodCommsResult<()> {
        self.require_setup_at_most(SetupProgress::SettingInitialBasalSchedule)?;
        if self.pod_state.setup_progress == SetupProgress::SettingInitialBasalSchedule {
            let status = self.get_status_block(None).await?;
            self.update(&status);
            if status.pod_progress_status == PodProgressStatus::BasalInitialized {
                info!("initial basal schedule already set");
                self.finish_initial_basal();
                return Ok(());
            }
        }

        self.pod_state.advance_setup(SetupProgress::SettingInitialBasalSchedule);
        self.set_basal_schedule(schedule, schedule_offset, DeliveryOptions::default())
            .await?;
        self.finish_initial_basal();
        Ok(())
    }

    fn finish_initial_basal(&mut self) {
        self.pod_state.advance_setup(SetupProgress::InitialBasalScheduleSet);
        let now = self.now();
        let insulin_type = self.pod_state.insulin_type;
        self.pod_state
            .finalized_doses
            .push(UnfinalizedDose::resume(now, ScheduledCertainty::Certain, insulin_type));
    }

    /// Insert the cannula; returns how long until insertion finishes.
    ///
    /// Programs the expiration advisory and shutdown-imminent alerts, plus
    /// `optional_alerts`, before the insertion bolus.
    pub async fn insert_cannula(&mut self, optional_alerts: &[PodAlert], silent: bool) -> PodCommsResult<Duration> {
        self.require_setup_at_most(SetupProgress::CannulaInserting)?;
        let insertion_units = CANNULA_INSERTION_UNITS + CANNULA_INSERTION_UNITS_EXTRA;

        if self.pod_state.activated_at.is_none() {
            return Err(PodCommsError::NoPodPaired);
        }

        if matches!(
            self.pod_state.setup_progress,
            SetupProgress::StartingInsertCannula | SetupProgress::CannulaInserting
        ) {
            let status = self.get_status_block(None).await?;
            if status.pod_progress_status == PodProgressStatus::InsertingCannula {
                self.pod_state.advance_setup(SetupProgress::CannulaInserting);
                self.update(&status);
                return Ok(Duration::from_secs_f64(status.bolus_not_delivered / PRIME_DELIVERY_RATE + 1.0));
            }
            if status.pod_progress_status.ready_for_delivery() {
                self.mark_setup_completed(&status);
                self.update(&status);
                return Ok(Duration::ZERO);
            }
            self.update(&status);
        } else {
            let pod_time = self.pod_time_now();
            let mut alerts = vec![
                PodAlert::ExpirationAdvisory {
                    offset: pod_time,
                    abs_alert_time: NOMINAL_POD_LIFE,
                    silent,
                },
                PodAlert::ShutdownImminent {
                    offset: pod_time,
                    abs_alert_time: SERVICE_DURATION - END_OF_SERVICE_IMMINENT_WINDOW,
                    silent,
                },
            ];
            alerts.extend_from_slice(optional_alerts);
            self.configure_alerts(&alerts, false, None).await?;
        }

        let time_between_pulses = Duration::from_secs_f64(SECONDS_PER_PRIME_PULSE);
        let schedule = SetInsulinScheduleCommand::bolus(self.pod_state.current_nonce(), insertion_units, time_between_pulses);
        let extra = BolusExtraCommand::new(insertion_units, time_between_pulses, false, false, Duration::ZERO);
        self.pod_state.advance_setup(SetupProgress::StartingInsertCannula);
        let status: StatusResponse = self.send(vec![schedule.into(), extra.into()], None).await?;
        self.update(&status);
        self.pod_state.advance_setup(SetupProgress::CannulaInserting);
        Ok(Duration::from_secs_f64(status.bolus_not_delivered / PRIME_DELIVERY_RATE))
    }

    /// Ask the pod whether cannula insertion finished.
    pub async fn check_insertion_completed(&mut self) -> PodCommsResult<()> {
        if self.pod_state.setup_progress == SetupProgress::CannulaInserting {
            let status = self.get_status_block(None).await?;
            if status.pod_progress_status.ready_for_delivery() {
                self.mark_setup_completed(&status);
            }
            self.update(&status);
        }
        Ok(())
    }

    fn mark_setup_completed(&mut self, status: &StatusResponse) {
        if self.pod_state.setup_progress != SetupProgress::Completed {
            self.pod_state.advance_setup(SetupProgress::Completed);
            self.pod_state.setup_units_delivered = Some(status.insulin_delivered);
            info!(units = status.insulin_delivered, "setup completed");
        }
    }

    // Alerts and beeps

    /// Program `alerts` and register them.
    ///
    /// With `acknowledge_all`, every pending alert is cleared first.
    pub async fn configure_alerts(
        &mut self,
        alerts: &[PodAlert],
        acknowledge_all: bool,
        beep_block: Option<MessageBlock>,
    ) -> PodCommsResult<StatusResponse> {
        let nonce = self.pod_state.current_nonce();
        let configure = ConfigureAlertsCommand {
            nonce,
            configurations: alerts.iter().map(PodAlert::configuration).collect(),
        };
        let blocks = if acknowledge_all {
            vec![
                AcknowledgeAlertCommand {
                    nonce,
                    alerts: AlertSet::from_bits(0xFF),
                }
                .into(),
                configure.into(),
            ]
        } else {
            vec![configure.into()]
        };

        let status: StatusResponse = self.send(blocks, beep_block).await?;
        for alert in alerts {
            self.pod_state.register_configured_alert(alert.slot(), *alert);
        }
        self.update(&status);
        Ok(status)
    }

    /// Beep and set completion beep flags. Skipped on a faulted pod.
    pub async fn beep_config(&mut self, command: BeepConfigCommand) -> PodCommsResult<StatusResponse> {
        if let Some(fault) = &self.pod_state.fault {
            info!("skipping beep config on a faulted pod");
            return Err(PodCommsError::PodFault(Box::new(fault.status.clone())));
        }
        let status: StatusResponse = self.send(vec![command.into()], None).await?;
        self.update(&status);
        Ok(status)
    }

    /// Acknowledge `alerts`; returns the alerts still active.
    pub async fn acknowledge_alerts(
        &mut self,
        alerts: AlertSet,
        beep_block: Option<MessageBlock>,
    ) -> PodCommsResult<AlertSet> {
        let command = AcknowledgeAlertCommand {
            nonce: self.pod_state.current_nonce(),
            alerts,
        };
        let status: StatusResponse = self.send(vec![command.into()], beep_block).await?;
        self.update(&status);
        Ok(self.pod_state.active_alert_slots)
    }

    // Delivery

    /// Deliver an immediate bolus of `units`.
    ///
    /// If the exchange breaks off after the write, a status query decides:
    /// a bolusing pod means the bolus started, an idle one means it did not.
    /// If that query fails too the outcome stays uncertain and the command
    /// stays pending.
    pub async fn bolus(&mut self, units: f64, automatic: bool, options: DeliveryOptions) -> DeliveryCommandResult {
        if self.pod_state.unacknowledged_command.is_some() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::UnacknowledgedCommandPending);
        }
        if !self.pod_state.is_setup_complete() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::SetupNotComplete);
        }
        if self.pod_state.is_suspended() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::PodSuspended);
        }

        let last_status_bolusing = self
            .pod_state
            .last_delivery_status_received
            .is_none_or(|status| status.bolusing());
        if self.pod_state.unfinalized_bolus.is_some() || last_status_bolusing {
            // A bolus may still be running; never send another blind.
            match self.get_status_block(None).await {
                Ok(status) => {
                    self.update(&status);
                    if self.pod_state.unfinalized_bolus.is_some() {
                        return DeliveryCommandResult::CertainFailure(PodCommsError::UnfinalizedBolus);
                    }
                }
                Err(err) => {
                    warn!(%err, "status before bolus failed");
                    return DeliveryCommandResult::CertainFailure(err);
                }
            }
        }

        let time_between_pulses = Duration::from_secs_f64(SECONDS_PER_BOLUS_PULSE);
        let schedule = SetInsulinScheduleCommand::bolus(self.pod_state.current_nonce(), units, time_between_pulses);
        let extra = BolusExtraCommand::new(
            units,
            time_between_pulses,
            options.acknowledgement_beep,
            options.completion_beep,
            options.program_reminder_interval,
        );

        let start = self.now();
        self.pod_state.unacknowledged_command = Some(PendingCommand::program(
            DoseProgram::Bolus {
                volume: units,
                automatic,
            },
            self.pod_state.message_transport_state.message_number,
            start,
        ));

        match self.send::<StatusResponse>(vec![schedule.into(), extra.into()], None).await {
            Ok(status) => {
                self.pod_state.unacknowledged_command = None;
                let insulin_type = self.pod_state.insulin_type;
                self.pod_state.unfinalized_bolus = Some(UnfinalizedDose::bolus(
                    units,
                    start,
                    ScheduledCertainty::Certain,
                    insulin_type,
                    automatic,
                ));
                self.update(&status);
                info!(units, automatic, "bolus started");
                DeliveryCommandResult::Success(status)
            }
            Err(err) if err.is_rejection() || err.is_certain_failure() || err.is_fault_or_terminal() => {
                self.pod_state.unacknowledged_command = None;
                warn!(%err, "bolus failed");
                DeliveryCommandResult::CertainFailure(err)
            }
            Err(err) => self.reconcile_bolus(err).await,
        }
    }

    async fn reconcile_bolus(&mut self, err: PodCommsError) -> DeliveryCommandResult {
        warn!(%err, "bolus outcome unknown; checking pod status");
        self.pod_state.unacknowledged_command = self
            .pod_state
            .unacknowledged_command
            .take()
            .map(PendingCommand::comms_finished);

        match self.get_status(None).await {
            Ok(status) if status.delivery_status.bolusing() => {
                if let Some(bolus) = self.pod_state.unfinalized_bolus.as_mut() {
                    bolus.scheduled_certainty = ScheduledCertainty::Certain;
                }
                info!("pod is bolusing; bolus confirmed");
                DeliveryCommandResult::Success(status)
            }
            Ok(_) => {
                info!("pod is not bolusing; bolus did not start");
                DeliveryCommandResult::CertainFailure(err)
            }
            Err(status_err) if status_err.is_fault_or_terminal() => {
                DeliveryCommandResult::CertainFailure(status_err)
            }
            Err(status_err) => {
                warn!(%status_err, "status check failed; bolus left uncertain");
                DeliveryCommandResult::UncertainFailure(err)
            }
        }
    }

    /// Start a temp basal of `rate` U/h for `duration`.
    pub async fn set_temp_basal(
        &mut self,
        rate: f64,
        duration: Duration,
        is_high_temp: bool,
        automatic: bool,
        options: DeliveryOptions,
    ) -> DeliveryCommandResult {
        if self.pod_state.unacknowledged_command.is_some() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::UnacknowledgedCommandPending);
        }
        if !self.pod_state.is_setup_complete() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::SetupNotComplete);
        }
        if self.pod_state.is_suspended() {
            return DeliveryCommandResult::CertainFailure(PodCommsError::PodSuspended);
        }

        let schedule = SetInsulinScheduleCommand::temp_basal(self.pod_state.current_nonce(), rate, duration);
        let extra = TempBasalExtraCommand::new(
            rate,
            duration,
            options.acknowledgement_beep,
            options.completion_beep,
            options.program_reminder_interval,
        );

        let now = self.now();
        if self
            .pod_state
            .unfinalized_bolus
            .as_ref()
            .is_some_and(|bolus| !bolus.is_finished(now))
        {
            return DeliveryCommandResult::CertainFailure(PodCommsError::UnfinalizedBolus);
        }

        self.pod_state.unacknowledged_command = Some(PendingCommand::program(
            DoseProgram::TempBasal {
                units_per_hour: rate,
                duration,
                is_high_temp,
                automatic,
            },
            self.pod_state.message_transport_state.message_number,
            now,
        ));

        match self.send::<StatusResponse>(vec![schedule.into(), extra.into()], None).await {
            Ok(status) => {
                self.pod_state.unacknowledged_command = None;
                let insulin_type = self.pod_state.insulin_type;
                self.pod_state.unfinalized_temp_basal = Some(UnfinalizedDose::temp_basal(
                    rate,
                    now,
                    duration,
                    is_high_temp,
                    automatic,
                    ScheduledCertainty::Certain,
                    insulin_type,
                ));
                self.update(&status);
                info!(rate, ?duration, "temp basal started");
                DeliveryCommandResult::Success(status)
            }
            Err(err) if err.is_uncertain() => {
                warn!(%err, "temp basal outcome unknown");
                self.mark_pending_comms_finished();
                DeliveryCommandResult::UncertainFailure(err)
            }
            Err(err) => {
                self.pod_state.unacknowledged_command = None;
                DeliveryCommandResult::CertainFailure(err)
            }
        }
    }

    fn mark_pending_comms_finished(&mut self) {
        self.pod_state.unacknowledged_command = self
            .pod_state
            .unacknowledged_command
            .take()
            .map(PendingCommand::comms_finished);
    }

    /// Stop the delivery kinds in `delivery_type`.
    ///
    /// Only doses of a cancelled kind whose finish time is still ahead are
    /// cut short.
    pub async fn cancel_delivery(
        &mut self,
        delivery_type: DeliveryType,
        beep_type: BeepType,
        beep_block: Option<MessageBlock>,
    ) -> CancelDeliveryResult {
        if self.pod_state.unacknowledged_command.is_some() {
            return CancelDeliveryResult::CertainFailure(PodCommsError::UnacknowledgedCommandPending);
        }
        // The pod faults on a cancel before setup completes.
        if !self.pod_state.is_setup_complete() {
            return CancelDeliveryResult::CertainFailure(PodCommsError::SetupNotComplete);
        }

        let command = CancelDeliveryCommand {
            nonce: self.pod_state.current_nonce(),
            delivery_type,
            beep_type,
        };
        self.stop_delivery(delivery_type, vec![command.into()], beep_block)
            .await
    }

    async fn stop_delivery(
        &mut self,
        delivery_type: DeliveryType,
        blocks: Vec<MessageBlock>,
        beep_block: Option<MessageBlock>,
    ) -> CancelDeliveryResult {
        let now = self.now();
        self.pod_state.unacknowledged_command = Some(PendingCommand::stop_program(
            delivery_type,
            self.pod_state.message_transport_state.message_number,
            now,
        ));

        match self.send::<StatusResponse>(blocks, beep_block).await {
            Ok(status) => {
                self.pod_state.unacknowledged_command = None;
                let canceled_dose = self
                    .pod_state
                    .handle_cancel_dosing(delivery_type, status.bolus_not_delivered, now);
                self.update(&status);
                debug!(mask = delivery_type.bits(), "delivery cancelled");
                CancelDeliveryResult::Success {
                    status,
                    canceled_dose,
                }
            }
            Err(err) if err.is_uncertain() => {
                warn!(%err, "cancel outcome unknown");
                self.mark_pending_comms_finished();
                CancelDeliveryResult::UncertainFailure(err)
            }
            Err(err) => {
                self.pod_state.unacknowledged_command = None;
                CancelDeliveryResult::CertainFailure(err)
            }
        }
    }

    /// Suspend all delivery.
    ///
    /// `reminder` is the planned suspend length; `Some(ZERO)` means an
    /// untimed suspend with periodic reminders.
    pub async fn suspend(
        &mut self,
        reminder: Option<Duration>,
        silent: bool,
        beep_block: Option<MessageBlock>,
    ) -> CancelDeliveryResult {
        if self.pod_state.unacknowledged_command.is_some() {
            return CancelDeliveryResult::CertainFailure(PodCommsError::UnacknowledgedCommandPending);
        }
        if !self.pod_state.is_setup_complete() {
            return CancelDeliveryResult::CertainFailure(PodCommsError::SetupNotComplete);
        }

        let suspend_time = reminder.unwrap_or_default();
        let nonce = self.pod_state.current_nonce();
        let mut alerts = Vec::new();
        if reminder.is_some() && (suspend_time.is_zero() || suspend_time > Duration::from_secs(5 * 60)) {
            alerts.push(PodAlert::SuspendedReminder {
                active: true,
                suspend_time,
                silent,
            });
        }
        if !suspend_time.is_zero() {
            alerts.push(PodAlert::SuspendTimeExpired { suspend_time, silent });
        }

        let mut blocks: Vec<MessageBlock> = vec![CancelDeliveryCommand {
            nonce,
            delivery_type: DeliveryType::ALL,
            beep_type: BeepType::NoBeepCancel,
        }
        .into()];
        if !alerts.is_empty() {
            blocks.push(
                ConfigureAlertsCommand {
                    nonce,
                    configurations: alerts.iter().map(PodAlert::configuration).collect(),
                }
                .into(),
            );
        }

        let result = self.stop_delivery(DeliveryType::ALL, blocks, beep_block).await;
        if result.is_success() {
            for alert in alerts {
                self.pod_state.register_configured_alert(alert.slot(), alert);
            }
            info!(?reminder, "delivery suspended");
        }
        result
    }

    /// Disarm the suspended reminder and suspend-time-expired alerts.
    pub async fn cancel_suspend_alerts(&mut self) -> PodCommsResult<StatusResponse> {
        let alerts = [
            PodAlert::SuspendedReminder {
                active: false,
                suspend_time: Duration::ZERO,
                silent: false,
            },
            PodAlert::SuspendTimeExpired {
                suspend_time: Duration::ZERO,
                silent: false,
            },
        ];
        self.configure_alerts(&alerts, false, None).await
    }

    fn has_active_suspend_alert(&self) -> bool {
        self.pod_state.configured_alerts.iter().any(|(slot, alert)| {
            matches!(
                slot,
                AlertSlot::Slot5SuspendedReminder | AlertSlot::Slot6SuspendTimeExpired
            ) && alert.configuration().active
        })
    }

    /// Cancel nothing; validates the nonce and returns a status.
    pub async fn cancel_none(&mut self, beep_block: Option<MessageBlock>) -> PodCommsResult<StatusResponse> {
        let status = self
            .cancel_delivery(DeliveryType::NONE, BeepType::NoBeepCancel, beep_block)
            .await
            .into_status()?;
        self.update(&status);
        Ok(status)
    }

    /// Program the daily basal schedule, entered at `schedule_offset`.
    ///
    /// A running pod is stopped first, since programming basal over active
    /// delivery faults it.
    pub async fn set_basal_schedule(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
        options: DeliveryOptions,
    ) -> PodCommsResult<StatusResponse> {
        if self.pod_state.unacknowledged_command.is_some() {
            return Err(PodCommsError::UnacknowledgedCommandPending);
        }
        let extra = BasalScheduleExtraCommand::from_schedule(
            schedule,
            schedule_offset,
            options.acknowledgement_beep,
            options.completion_beep,
            options.program_reminder_interval,
        )
        .ok_or(PodCommsError::InvalidData)?;

        match self.program_basal(schedule, schedule_offset, extra).await {
            Ok(status) => Ok(status),
            Err(err) if err.is_rejection() => Err(err),
            Err(err) => {
                let now = self.now();
                let insulin_type = self.pod_state.insulin_type;
                self.pod_state.unfinalized_resume =
                    Some(UnfinalizedDose::resume(now, ScheduledCertainty::Uncertain, insulin_type));
                Err(err)
            }
        }
    }

    async fn program_basal(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
        extra: BasalScheduleExtraCommand,
    ) -> PodCommsResult<StatusResponse> {
        let pod_suspended = self.pod_state.is_suspended()
            && self
                .pod_state
                .last_delivery_status_received
                .is_some_and(|status| status.suspended());
        if !pod_suspended && self.pod_state.is_setup_complete() {
            let cancel = CancelDeliveryCommand {
                nonce: self.pod_state.current_nonce(),
                delivery_type: DeliveryType::ALL,
                beep_type: BeepType::NoBeepCancel,
            };
            let _: StatusResponse = self.send(vec![cancel.into()], None).await?;
        }

        let command = SetInsulinScheduleCommand::basal_schedule(self.pod_state.current_nonce(), schedule, schedule_offset);
        let mut status: StatusResponse = self.send(vec![command.into(), extra.into()], None).await?;

        let now = self.now();
        let insulin_type = self.pod_state.insulin_type;
        self.pod_state.suspend_state = SuspendState::Resumed(now);
        self.pod_state.unfinalized_resume =
            Some(UnfinalizedDose::resume(now, ScheduledCertainty::Certain, insulin_type));
        if self.has_active_suspend_alert()
            && let Ok(cancel_status) = self.cancel_suspend_alerts().await
        {
            status = cancel_status;
        }
        self.update(&status);
        info!(?schedule_offset, "basal schedule set");
        Ok(status)
    }

    /// Resume basal delivery with `schedule`.
    pub async fn resume_basal(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
        options: DeliveryOptions,
    ) -> PodCommsResult<StatusResponse> {
        if self.pod_state.unacknowledged_command.is_some() {
            return Err(PodCommsError::UnacknowledgedCommandPending);
        }
        let status = self.set_basal_schedule(schedule, schedule_offset, options).await?;
        self.pod_state.suspend_state = SuspendState::Resumed(self.now());
        Ok(status)
    }

    /// Move the pod to a new time of day by re-entering `schedule`.
    pub async fn set_time(
        &mut self,
        schedule: &BasalSchedule,
        schedule_offset: Duration,
        acknowledgement_beep: bool,
    ) -> PodCommsResult<StatusResponse> {
        if self.pod_state.unacknowledged_command.is_some() {
            return Err(PodCommsError::UnacknowledgedCommandPending);
        }
        self.cancel_delivery(DeliveryType::ALL, BeepType::NoBeepCancel, None)
            .await
            .into_status()?;
        let options = DeliveryOptions {
            acknowledgement_beep,
            ..Default::default()
        };
        self.set_basal_schedule(schedule, schedule_offset, options).await
    }

    // Status

    /// Query status, settling any pending command against it.
    pub async fn get_status(&mut self, beep_block: Option<MessageBlock>) -> PodCommsResult<StatusResponse> {
        let status = self.get_status_block(beep_block).await?;
        if self.pod_state.unacknowledged_command.is_some() {
            self.pod_state.recover_unacknowledged_command(&status);
        }
        self.update(&status);
        Ok(status)
    }

    /// Query detailed status.
    ///
    /// A fault seen here for the first time is captured but not raised.
    pub async fn get_detailed_status(&mut self, beep_block: Option<MessageBlock>) -> PodCommsResult<DetailedStatus> {
        let info = self.read_pod_info(PodInfoType::DetailedStatus, beep_block).await?;
        let PodInfoResponse::DetailedStatus(status) = info else {
            return Err(PodCommsError::UnexpectedResponse(MessageBlockType::PodInfoResponse));
        };

        if status.is_faulted() && self.pod_state.fault.is_none() {
            let _ = self.handle_pod_fault(status.clone());
        } else {
            let derived = StatusResponse::from(&status);
            if self.pod_state.unacknowledged_command.is_some() {
                self.pod_state.recover_unacknowledged_command(&derived);
            }
            self.update(&derived);
        }
        Ok(status)
    }

    /// Read one pod info page.
    pub async fn read_pod_info(
        &mut self,
        info_type: PodInfoType,
        beep_block: Option<MessageBlock>,
    ) -> PodCommsResult<PodInfoResponse> {
        self.send(
            vec![GetStatusCommand {
                pod_info_type: info_type,
            }
            .into()],
            beep_block,
        )
        .await
    }

    /// Deactivate the pod.
    ///
    /// A running pod is stopped first. Pulse logs are read on the way for
    /// later analysis; failures there are ignored.
    pub async fn deactivate_pod(&mut self) -> PodCommsResult<()> {
        // Before setup completes a cancel either goes unanswered or faults the pod.
        if self.pod_state.is_setup_complete() && self.pod_state.fault.is_none() && !self.pod_state.is_suspended() {
            self.cancel_delivery(DeliveryType::ALL, BeepType::NoBeepCancel, None)
                .await
                .into_status()?;
        }

        if let Err(err) = self.read_pod_info(PodInfoType::PulseLogRecent, None).await {
            debug!(%err, "could not read recent pulse log");
        }
        if self.pod_state.fault.is_some()
            && let Err(err) = self.read_pod_info(PodInfoType::PulseLogPrevious, None).await
        {
            debug!(%err, "could not read previous pulse log");
        }

        let command = DeactivatePodCommand {
            nonce: self.pod_state.current_nonce(),
        };
        match self.send::<StatusResponse>(vec![command.into()], None).await {
            Ok(status) => {
                if self.pod_state.unacknowledged_command.is_some() {
                    self.pod_state.recover_unacknowledged_command(&status);
                }
                self.update(&status);
                if self.pod_state.active_time.is_none()
                    && let Some(activated_at) = self.pod_state.activated_at
                {
                    self.pod_state.active_time = self.now().duration_since(activated_at).ok();
                }
                info!("pod deactivated");
                Ok(())
            }
            Err(
                PodCommsError::PodFault(_)
                | PodCommsError::ActivationTimeExceeded
                | PodCommsError::UnexpectedResponse(_),
            ) => {
                info!("pod deactivated (faulted)");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Hand archived and running doses to `handler`.
    ///
    /// Archived doses are dropped only once the handler reports they are
    /// stored.
    pub async fn doses_for_storage<F, Fut>(&mut self, handler: F)
    where
        F: FnOnce(Vec<UnfinalizedDose>) -> Fut,
        Fut: Future<Output = bool>,
    {
        let doses = self.pod_state.doses_to_store();
        let count = doses.len();
        if handler(doses).await {
            debug!(count, "stored doses");
            self.pod_state.finalized_doses.clear();
        }
    }
}
