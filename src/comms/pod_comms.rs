//! The per-pod orchestrator.

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::core::{
    Clock, MessageCipher, PodChannel, CANNULA_INSERTION_UNITS, LTK_SIZE, PAIRING_ADDRESS,
    PRIME_UNITS, PULSE_SIZE, SECONDS_PER_BOLUS_PULSE, SECONDS_PER_PRIME_PULSE, SERVICE_DURATION,
};
use crate::pairing::{KeyExchange, NegotiatedSession, SessionNegotiation};
use crate::pod::{InsulinType, PodProgressStatus, PodState, SetupProgress};
use crate::session::{CommandSession, DeliveryOptions, PodCommsError, PodCommsResult};
use crate::transport::blocks::{AssignAddressCommand, PodDateTime, SetupConstants, SetupPodCommand};
use crate::transport::{
    Message, MessageBlock, MessageTransport, MessageTransportState, VersionResponse,
};

use super::config::{PodCommsBuilder, PodCommsConfig};

// Negotiation attempts per session: the first, and one after a resync.
const SESSION_NEGOTIATION_ATTEMPTS: usize = 2;

// Packet timeout sent with SetupPod; zero keeps the pod default.
const SETUP_PACKET_TIMEOUT: u8 = 0;

struct Inner<C> {
    channel: C,
    pod_state: Option<PodState>,
    needs_session: bool,
}

/// Owns the channel and the pod record of one physical pod.
///
/// All access goes through one lock held for a whole exchange: pairing,
/// session negotiation, or a [`SessionHandle`] for as long as it lives.
pub struct PodComms<C: PodChannel, K: KeyExchange<C>> {
    inner: Mutex<Inner<C>>,
    config: PodCommsConfig,
    key_exchange: K,
    cipher: Arc<dyn MessageCipher>,
    clock: Arc<dyn Clock>,
}

/// Exclusive access to a paired pod.
///
/// The pod lock is held until the handle is dropped; sessions obtained from
/// it borrow the handle, so only one can exist at a time.
pub struct SessionHandle<'a, C: PodChannel> {
    inner: MutexGuard<'a, Inner<C>>,
    cipher: &'a dyn MessageCipher,
    clock: &'a dyn Clock,
    config: &'a PodCommsConfig,
    name: String,
}

impl<C: PodChannel> SessionHandle<'_, C> {
    /// Start issuing commands.
    pub fn session(&mut self) -> PodCommsResult<CommandSession<'_, C>> {
        let Inner {
            channel, pod_state, ..
        } = &mut *self.inner;
        let pod_state = pod_state.as_mut().ok_or(PodCommsError::NoPodPaired)?;
        Ok(CommandSession::new(
            channel,
            self.cipher,
            self.clock,
            pod_state,
            self.config.my_id,
        ))
    }

    /// The pod record as of now.
    pub fn pod_state(&self) -> Option<&PodState> {
        self.inner.pod_state.as_ref()
    }

    /// Beep options for a command under the configured preference.
    pub fn delivery_options(&self, automatic: bool) -> DeliveryOptions {
        DeliveryOptions::for_preference(self.config.confirmation_beeps, automatic)
    }

    /// Check if alerts should be programmed silently.
    pub fn silent_pod(&self) -> bool {
        self.config.silent_pod
    }
}

impl<C: PodChannel> Drop for SessionHandle<'_, C> {
    fn drop(&mut self) {
        debug!(name = %self.name, "session finished");
    }
}

impl<C: PodChannel, K: KeyExchange<C>> PodComms<C, K> {
    /// Start configuring an orchestrator.
    pub fn builder() -> PodCommsBuilder<C, K> {
        PodCommsBuilder::new()
    }

    pub(super) fn new(
        config: PodCommsConfig,
        channel: C,
        key_exchange: K,
        cipher: Arc<dyn MessageCipher>,
        clock: Arc<dyn Clock>,
        pod_state: Option<PodState>,
    ) -> Self {
        let needs_session = pod_state.is_some();
        Self {
            inner: Mutex::new(Inner {
                channel,
                pod_state,
                needs_session,
            }),
            config,
            key_exchange,
            cipher,
            clock,
        }
    }

    /// The configuration in use.
    pub fn config(&self) -> &PodCommsConfig {
        &self.config
    }

    fn handle<'a>(&'a self, inner: MutexGuard<'a, Inner<C>>, name: &str) -> SessionHandle<'a, C> {
        debug!(name, "session started");
        SessionHandle {
            inner,
            cipher: &*self.cipher,
            clock: &*self.clock,
            config: &self.config,
            name: name.to_owned(),
        }
    }

    /// Pair with a new pod, or finish pairing one that was interrupted.
    ///
    /// Agrees on a long-term key, negotiates a session and sends the two
    /// setup commands. The returned handle keeps the pod locked for the
    /// commands that follow.
    pub async fn pair(&self, insulin_type: InsulinType) -> PodCommsResult<SessionHandle<'_, C>> {
        let mut inner = self.inner.lock().await;
        info!(
            my_id = format_args!("{:#010x}", self.config.my_id),
            pod_id = format_args!("{:#010x}", self.config.pod_id),
            "pairing"
        );

        if !inner.channel.is_connected() {
            inner
                .channel
                .connect()
                .await
                .map_err(PodCommsError::CommsError)?;
        }

        match inner.pod_state.as_ref().map(|state| state.setup_progress) {
            Some(SetupProgress::ActivationTimeout) => return Err(PodCommsError::ActivationTimeExceeded),
            Some(SetupProgress::PodIncompatible) => {
                return Err(PodCommsError::PodIncompatible(
                    "pod reported incompatible constants during setup".into(),
                ));
            }
            _ => {}
        }

        if inner.pod_state.is_none() {
            self.pair_pod(&mut inner, insulin_type).await?;
        } else {
            self.establish_new_session(&mut inner).await?;
        }

        let paired = inner
            .pod_state
            .as_ref()
            .map(|state| state.setup_progress.is_paired())
            .ok_or(PodCommsError::NoPodPaired)?;
        if !paired {
            self.setup_pod(&mut inner).await?;
        }

        let Some(state) = inner.pod_state.as_ref() else {
            return Err(PodCommsError::NoPodPaired);
        };
        if !state.setup_progress.is_paired() {
            error!(progress = ?state.setup_progress, "unexpected setup progress after pairing");
            return Err(PodCommsError::InvalidData);
        }
        Ok(self.handle(inner, "pair and setup pod"))
    }

    /// Lock the pod for a series of commands.
    ///
    /// A session is negotiated first when the link came up since the last
    /// one.
    pub async fn run_session(&self, name: &str) -> PodCommsResult<SessionHandle<'_, C>> {
        let mut inner = self.inner.lock().await;
        if !inner.channel.is_connected() {
            return Err(PodCommsError::PodNotConnected);
        }
        if inner.pod_state.is_none() {
            return Err(PodCommsError::NoPodPaired);
        }
        if inner.needs_session {
            self.establish_new_session(&mut inner).await?;
        }
        Ok(self.handle(inner, name))
    }

    /// Bring the link up and negotiate a session with the paired pod.
    pub async fn connect(&self) -> PodCommsResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .channel
            .connect()
            .await
            .map_err(PodCommsError::CommsError)?;
        inner.needs_session = true;
        if inner.pod_state.is_some() {
            self.establish_new_session(&mut inner).await?;
        }
        Ok(())
    }

    /// Note that the link dropped; the next session renegotiates keys.
    pub async fn disconnected(&self) {
        let mut inner = self.inner.lock().await;
        debug!("link down");
        inner.needs_session = true;
    }

    /// Snapshot of the pod record.
    pub async fn current_state(&self) -> Option<PodState> {
        self.inner.lock().await.pod_state.clone()
    }

    /// Change the insulin recorded for future doses.
    pub async fn update_insulin_type(&self, insulin_type: InsulinType) {
        if let Some(state) = self.inner.lock().await.pod_state.as_mut() {
            state.insulin_type = insulin_type;
        }
    }

    /// Let go of the current pod.
    ///
    /// Pending commands are settled with uncertainty and running doses
    /// archived; the final record is returned for storage.
    pub async fn forget(&self) -> Option<PodState> {
        let mut inner = self.inner.lock().await;
        let mut state = inner.pod_state.take()?;
        state.resolve_any_pending_command_with_uncertainty(self.clock.now());
        state.finalize_all_doses();
        inner.needs_session = false;
        info!(address = format_args!("{:#010x}", state.address), "pod forgotten");
        Some(state)
    }

    async fn pair_pod(&self, inner: &mut Inner<C>, insulin_type: InsulinType) -> PodCommsResult<()> {
        let ltk_result = self
            .key_exchange
            .exchange_ltk(&mut inner.channel, self.config.my_id, self.config.pod_id, 0)
            .await?;
        if ltk_result.address != self.config.pod_id {
            error!(
                address = format_args!("{:#010x}", ltk_result.address),
                expected = format_args!("{:#010x}", self.config.pod_id),
                "pod answered from an unexpected address"
            );
            return Err(PodCommsError::InvalidAddress {
                address: ltk_result.address,
                expected: self.config.pod_id,
            });
        }

        info!("establishing session");
        let (session, eap_seq) = self
            .negotiate(&mut inner.channel, &ltk_result.ltk, 1, ltk_result.msg_seq)
            .await?;
        let mut transport_state = MessageTransportState::new_session(session.ck, session.nonce_prefix, 0, eap_seq);
        transport_state.msg_seq = session.msg_seq;

        let message = Message::new(
            PAIRING_ADDRESS,
            vec![AssignAddressCommand {
                address: PAIRING_ADDRESS,
            }
            .into()],
            transport_state.message_number,
        );
        let version = self
            .send_pair_message(&mut inner.channel, &mut transport_state, None, &message)
            .await?;

        let mut state = PodState::new(
            self.config.pod_id,
            version.pm_version.to_string(),
            version.pi_version.to_string(),
            version.lot,
            version.tid,
            ltk_result.ltk,
            transport_state,
            insulin_type,
            self.clock.now(),
        );
        info!(
            lot = version.lot,
            tid = version.tid,
            pm = %version.pm_version,
            pi = %version.pi_version,
            "address assigned"
        );

        if version.is_activation_time_exceeded() {
            error!("activation window expired");
            state.advance_setup(SetupProgress::ActivationTimeout);
            inner.pod_state = Some(state);
            return Err(PodCommsError::ActivationTimeExceeded);
        }
        inner.pod_state = Some(state);
        inner.needs_session = false;
        Ok(())
    }

    async fn setup_pod(&self, inner: &mut Inner<C>) -> PodCommsResult<()> {
        let Inner {
            channel, pod_state, ..
        } = inner;
        let state = pod_state.as_mut().ok_or(PodCommsError::NoPodPaired)?;

        let command = SetupPodCommand {
            address: state.address,
            date_time: PodDateTime::from_system_time(self.clock.now(), self.config.utc_offset),
            lot: state.lot,
            tid: state.tid,
            packet_timeout: SETUP_PACKET_TIMEOUT,
        };
        let message = Message::new(
            PAIRING_ADDRESS,
            vec![command.into()],
            state.message_transport_state.message_number,
        );

        let mut transport_state = state.message_transport_state.clone();
        let sent = self
            .send_pair_message(channel, &mut transport_state, Some(&mut *state), &message)
            .await;
        state.message_transport_state = transport_state;
        let version = sent?;

        if let Some(constants) = &version.setup_constants
            && let Err(reason) = check_setup_constants(constants)
        {
            error!(%reason, "pod is incompatible");
            state.advance_setup(SetupProgress::PodIncompatible);
            return Err(PodCommsError::PodIncompatible(reason));
        }

        if version.is_activation_time_exceeded() {
            error!("activation window expired");
            state.advance_setup(SetupProgress::ActivationTimeout);
            return Err(PodCommsError::ActivationTimeExceeded);
        }
        if version.pod_progress_status == PodProgressStatus::PairingCompleted
            && !state.setup_progress.is_paired()
        {
            info!("pod pairing complete");
            state.advance_setup(SetupProgress::PodPaired);
        }
        Ok(())
    }

    // Sends AssignAddress or SetupPod and unwraps the version reply.
    async fn send_pair_message(
        &self,
        channel: &mut C,
        transport_state: &mut MessageTransportState,
        pod_state: Option<&mut PodState>,
        message: &Message,
    ) -> PodCommsResult<VersionResponse> {
        let mut transport = MessageTransport::new(
            channel,
            &*self.cipher,
            transport_state,
            self.config.my_id,
            self.config.pod_id,
        );
        let response = transport.send(message).await?;

        if let Some(fault) = response.fault() {
            error!(code = %fault.fault_event_code, "pod fault during pairing");
            if let Some(state) = pod_state {
                state.capture_fault(fault.clone(), self.clock.now());
            }
            return Err(PodCommsError::PodFault(Box::new(fault.clone())));
        }

        match response.message_blocks.into_iter().next() {
            Some(MessageBlock::VersionResponse(version)) => Ok(version),
            Some(other) => {
                error!(got = ?other.block_type(), "unexpected pairing response");
                Err(PodCommsError::UnexpectedResponse(other.block_type()))
            }
            None => Err(PodCommsError::NoResponse),
        }
    }

    // Negotiates a session for the paired pod with the next EAP sequence.
    async fn establish_new_session(&self, inner: &mut Inner<C>) -> PodCommsResult<()> {
        let Inner {
            channel,
            pod_state,
            needs_session,
        } = inner;
        let state = pod_state.as_mut().ok_or(PodCommsError::NoPodPaired)?;

        let previous = &state.message_transport_state;
        let (session, eap_seq) = self
            .negotiate(channel, &state.ltk, previous.eap_seq + 1, previous.msg_seq)
            .await?;

        let mut transport_state =
            MessageTransportState::new_session(session.ck, session.nonce_prefix, previous.message_number, eap_seq);
        transport_state.msg_seq = session.msg_seq;
        debug!(eap_seq, message_number = transport_state.message_number, "new session");
        state.message_transport_state = transport_state;
        *needs_session = false;
        Ok(())
    }

    // Runs the negotiation, retrying once from the sequence the pod reports.
    async fn negotiate(
        &self,
        channel: &mut C,
        ltk: &[u8; LTK_SIZE],
        first_eap_seq: u64,
        msg_seq: u8,
    ) -> PodCommsResult<(NegotiatedSession, u64)> {
        let mut eap_seq = first_eap_seq;
        let mut msg_seq = msg_seq;
        for attempt in 0..SESSION_NEGOTIATION_ATTEMPTS {
            let negotiation = self
                .key_exchange
                .negotiate_session(channel, ltk, eap_seq, self.config.my_id, self.config.pod_id, msg_seq)
                .await?;
            match negotiation {
                SessionNegotiation::Established(session) => return Ok((session, eap_seq)),
                SessionNegotiation::Resynchronization {
                    synchronized_eap_seq,
                } => {
                    warn!(attempt, eap_seq, synchronized_eap_seq, "EAP sequence resynchronization");
                    eap_seq = synchronized_eap_seq + 1;
                    msg_seq = msg_seq.wrapping_add(1);
                }
            }
        }
        Err(PodCommsError::DiagnosticMessage(
            "Received resynchronization SQN for the second time".into(),
        ))
    }
}

fn check_setup_constants(constants: &SetupConstants) -> Result<(), String> {
    fn differs(reported: f64, expected: f64) -> bool {
        (reported - expected).abs() > 1e-9
    }

    let mut problems = Vec::new();
    if differs(constants.pulse_size, PULSE_SIZE) {
        problems.push(format!(
            "pulse size {:.3}U, expected {PULSE_SIZE:.3}U",
            constants.pulse_size
        ));
    }
    if differs(constants.seconds_per_bolus_pulse, SECONDS_PER_BOLUS_PULSE) {
        problems.push(format!(
            "{:.1}s per bolus pulse, expected {SECONDS_PER_BOLUS_PULSE:.1}s",
            constants.seconds_per_bolus_pulse
        ));
    }
    if differs(constants.seconds_per_prime_pulse, SECONDS_PER_PRIME_PULSE) {
        problems.push(format!(
            "{:.1}s per prime pulse, expected {SECONDS_PER_PRIME_PULSE:.1}s",
            constants.seconds_per_prime_pulse
        ));
    }
    if differs(constants.prime_units, PRIME_UNITS) {
        problems.push(format!(
            "prime bolus {:.2}U, expected {PRIME_UNITS:.2}U",
            constants.prime_units
        ));
    }
    if differs(constants.cannula_insertion_units, CANNULA_INSERTION_UNITS) {
        problems.push(format!(
            "cannula insertion bolus {:.2}U, expected {CANNULA_INSERTION_UNITS:.2}U",
            constants.cannula_insertion_units
        ));
    }

    let hours = |d: std::time::Duration| d.as_secs() / 3600;
    if constants.service_duration < SERVICE_DURATION {
        problems.push(format!(
            "service duration {}h, expected {}h",
            hours(constants.service_duration),
            hours(SERVICE_DURATION)
        ));
    } else if constants.service_duration > SERVICE_DURATION {
        info!(
            reported_hours = hours(constants.service_duration),
            limit_hours = hours(SERVICE_DURATION),
            "service duration limited"
        );
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}
