//! In-process pod for tests.
//!
//! [`SimulatedPod`] is a [`PodChannel`] that answers like a pod: it runs the
//! pod side of pairing and session negotiation, decrypts commands, checks
//! nonces and keeps a small delivery model. Faults and link failures can be
//! injected one exchange at a time.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::core::{
    ChannelError, Clock, PacketNonce, PodChannel, WriteOutcome, CANNULA_INSERTION_UNITS, CK_SIZE,
    EAP_SQN_SIZE, LTK_SIZE, NOMINAL_POD_LIFE, NONCE_DIR_CONTROLLER, NONCE_DIR_POD,
    NONCE_PREFIX_SIZE, PAIRING_NONCE_SIZE, PRIME_UNITS, PULSE_SIZE, RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER,
    SECONDS_PER_BOLUS_PULSE, SECONDS_PER_PRIME_PULSE, SERVICE_DURATION,
};
use crate::crypto::aead::ChaChaCipher;
use crate::crypto::keys::{
    confirmation, derive_ltk, derive_res, derive_session_keys, random_bytes, sqn_bytes,
    sqn_from_bytes, PairingKeypair, IV_SIZE,
};
use crate::crypto::{NonceState, CRC16_TABLE};
use crate::pairing::eap::{EapAttribute, EapCode, EapMessage, EapSubtype};
use crate::pairing::exchange::{
    split_key_material, transcript, P0, P0_ACK, POD_LABEL, SP0GP0, SP1, SPS1, SPS1_CONTROLLER,
    SPS2,
};
use crate::pod::{
    AlertSet, AlertSlot, DeliveryStatus, DeliveryType, DetailedStatus, FaultEventCode,
    InsulinType, PodProgressStatus, PodState, SetupProgress,
};
use crate::transport::blocks::{DeliverySchedule, FirmwareVersion, SetupConstants};
use crate::transport::prefix::{format_keys, parse_keys, unwrap_command, wrap_response};
use crate::transport::{
    open_packet, seal_packet, ErrorResponse, Message, MessageBlock, MessageBlockType,
    MessagePacket, MessageTransportState, PacketType, PodInfoResponse, PodInfoType,
    StatusResponse, VersionResponse,
};

// How far ahead of the last controller nonce the pod looks.
const NONCE_WINDOW: u64 = 8;

/// Clock that only moves when told to.
#[derive(Debug)]
pub(crate) struct ManualClock {
    now: Mutex<SystemTime>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(UNIX_EPOCH + Duration::from_secs(1_700_000_000))
    }
}

impl ManualClock {
    pub(crate) fn new(now: SystemTime) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().unwrap()
    }
}

/// Identity and behavior of a simulated pod.
#[derive(Debug, Clone)]
pub(crate) struct SimulatedPodOptions {
    pub(crate) address: u32,
    pub(crate) lot: u32,
    pub(crate) tid: u32,
    /// EAP sequence the pod has already seen.
    pub(crate) eap_seq: u64,
    pub(crate) setup_constants: SetupConstants,
    pub(crate) activation_time_exceeded: bool,
    pub(crate) pm_version: FirmwareVersion,
    pub(crate) pi_version: FirmwareVersion,
}

impl Default for SimulatedPodOptions {
    fn default() -> Self {
        Self {
            address: 0x1700_0001,
            lot: 0x0000_A10B,
            tid: 0x000C_0FFE,
            eap_seq: 0,
            setup_constants: SetupConstants {
                pulse_size: PULSE_SIZE,
                seconds_per_bolus_pulse: SECONDS_PER_BOLUS_PULSE,
                seconds_per_prime_pulse: SECONDS_PER_PRIME_PULSE,
                prime_units: PRIME_UNITS,
                cannula_insertion_units: CANNULA_INSERTION_UNITS,
                service_duration: SERVICE_DURATION,
            },
            activation_time_exceeded: false,
            pm_version: FirmwareVersion {
                major: 4,
                minor: 10,
                patch: 0,
            },
            pi_version: FirmwareVersion {
                major: 2,
                minor: 7,
                patch: 0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PodSession {
    ck: [u8; CK_SIZE],
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

/// A pod behind a [`PodChannel`].
pub(crate) struct SimulatedPod {
    options: SimulatedPodOptions,
    cipher: ChaChaCipher,
    connected: bool,
    outbox: VecDeque<Vec<u8>>,
    msg_seq: u8,

    ltk: Option<[u8; LTK_SIZE]>,
    pairing_transcript: Vec<u8>,
    eap_seq: u64,
    session: Option<PodSession>,
    last_nonce_seq: u64,

    nonce: NonceState,
    progress: PodProgressStatus,
    basal_running: bool,
    temp_basal_running: bool,
    bolusing: bool,
    bolus_not_delivered: f64,
    insulin_delivered: f64,
    last_programming_seq: u8,
    alerts: AlertSet,
    time_active: Duration,
    fault: Option<FaultEventCode>,
    received: Vec<MessageBlockType>,

    next_write: Option<WriteOutcome>,
    ignore_next: bool,
    drop_responses: usize,
    skew_next: bool,
    reject_nonces: usize,
    reject_next: Option<u8>,
    fault_next: Option<FaultEventCode>,

    commands_accepted: usize,
    bad_nonce_replies: usize,
}

impl SimulatedPod {
    /// An unpaired pod.
    pub(crate) fn new(options: SimulatedPodOptions) -> Self {
        Self {
            cipher: ChaChaCipher,
            connected: true,
            outbox: VecDeque::new(),
            msg_seq: 0,
            ltk: None,
            pairing_transcript: Vec::new(),
            eap_seq: options.eap_seq,
            session: None,
            last_nonce_seq: 0,
            nonce: NonceState::new(options.lot, options.tid, 0),
            progress: PodProgressStatus::Initialized,
            basal_running: false,
            temp_basal_running: false,
            bolusing: false,
            bolus_not_delivered: 0.0,
            insulin_delivered: 0.0,
            last_programming_seq: 0,
            alerts: AlertSet::NONE,
            time_active: Duration::ZERO,
            fault: None,
            received: Vec::new(),
            next_write: None,
            ignore_next: false,
            drop_responses: 0,
            skew_next: false,
            reject_nonces: 0,
            reject_next: None,
            fault_next: None,
            commands_accepted: 0,
            bad_nonce_replies: 0,
            options,
        }
    }

    /// A paired pod with a session already up; returns the controller's
    /// side of the session.
    pub(crate) fn with_session(options: SimulatedPodOptions) -> (Self, MessageTransportState) {
        let mut pod = Self::new(options);
        let ck: [u8; CK_SIZE] = random_bytes();
        let nonce_prefix: [u8; NONCE_PREFIX_SIZE] = random_bytes();
        pod.ltk = Some(random_bytes());
        pod.eap_seq = pod.eap_seq.max(1);
        pod.session = Some(PodSession { ck, nonce_prefix });
        pod.progress = PodProgressStatus::PairingCompleted;
        let state = MessageTransportState::new_session(ck, nonce_prefix, 0, pod.eap_seq);
        (pod, state)
    }

    /// A pod that finished setup and runs scheduled basal, with the matching
    /// controller record.
    pub(crate) fn active(options: SimulatedPodOptions, now: SystemTime) -> (Self, PodState) {
        let (mut pod, transport_state) = Self::with_session(options);
        pod.progress = PodProgressStatus::AboveFiftyUnits;
        pod.basal_running = true;
        pod.insulin_delivered = PRIME_UNITS + CANNULA_INSERTION_UNITS;

        let mut state = PodState::new(
            pod.options.address,
            pod.options.pm_version.to_string(),
            pod.options.pi_version.to_string(),
            pod.options.lot,
            pod.options.tid,
            pod.ltk.unwrap_or_default(),
            transport_state,
            InsulinType::Novolog,
            now,
        );
        state.setup_progress = SetupProgress::Completed;
        state.activated_at = Some(now);
        state.expires_at = Some(now + NOMINAL_POD_LIFE);
        state.setup_units_delivered = Some(pod.insulin_delivered);
        state.last_delivery_status_received = Some(DeliveryStatus::ScheduledBasal);
        (pod, state)
    }

    pub(crate) fn address(&self) -> u32 {
        self.options.address
    }

    pub(crate) fn ltk(&self) -> Option<[u8; LTK_SIZE]> {
        self.ltk
    }

    pub(crate) fn session_ck(&self) -> Option<[u8; CK_SIZE]> {
        self.session.map(|s| s.ck)
    }

    pub(crate) fn eap_seq(&self) -> u64 {
        self.eap_seq
    }

    pub(crate) fn progress(&self) -> PodProgressStatus {
        self.progress
    }

    pub(crate) fn delivery_status(&self) -> DeliveryStatus {
        match (self.bolusing, self.temp_basal_running, self.basal_running) {
            (true, true, _) => DeliveryStatus::BolusAndTempBasal,
            (true, false, _) => DeliveryStatus::BolusInProgress,
            (false, true, _) => DeliveryStatus::TempBasalRunning,
            (false, false, true) => DeliveryStatus::ScheduledBasal,
            (false, false, false) => DeliveryStatus::Suspended,
        }
    }

    /// Block types of every command the pod acted on, in order.
    pub(crate) fn received(&self) -> &[MessageBlockType] {
        &self.received
    }

    pub(crate) fn commands_accepted(&self) -> usize {
        self.commands_accepted
    }

    pub(crate) fn bad_nonce_replies(&self) -> usize {
        self.bad_nonce_replies
    }

    pub(crate) fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Report `outcome` for the next write.
    ///
    /// `Unacked` writes never reach the pod; `AckedWithError` writes are
    /// acted on but the reply is lost.
    pub(crate) fn fail_next_write(&mut self, outcome: WriteOutcome) {
        self.next_write = Some(outcome);
    }

    /// Let the next written frame vanish before the pod sees it.
    pub(crate) fn ignore_next_command(&mut self) {
        self.ignore_next = true;
    }

    /// Act on the next command but lose the reply.
    pub(crate) fn drop_next_response(&mut self) {
        self.drop_responses(1);
    }

    /// Act on the next `count` commands but lose their replies.
    pub(crate) fn drop_responses(&mut self, count: usize) {
        self.drop_responses = count;
    }

    /// Answer the next command with the wrong message number.
    pub(crate) fn skew_next_response_sequence(&mut self) {
        self.skew_next = true;
    }

    /// Answer the next `count` nonce-bearing commands with a bad nonce.
    pub(crate) fn reject_nonces(&mut self, count: usize) {
        self.reject_nonces = count;
    }

    /// Reject the next command with `code`.
    pub(crate) fn reject_next(&mut self, code: u8) {
        self.reject_next = Some(code);
    }

    /// Fault with `code` when the next command arrives.
    pub(crate) fn fault_on_next_command(&mut self, code: FaultEventCode) {
        self.fault_next = Some(code);
    }

    pub(crate) fn raise_alert(&mut self, slot: AlertSlot) {
        self.alerts = AlertSet::from_bits(self.alerts.bits() | slot.bit());
    }

    /// Deliver the rest of the running bolus.
    pub(crate) fn finish_bolus(&mut self) {
        self.insulin_delivered += self.bolus_not_delivered;
        self.bolus_not_delivered = 0.0;
        self.bolusing = false;
    }

    /// Deliver up to `units` of the running bolus.
    pub(crate) fn deliver_bolus_units(&mut self, units: f64) {
        let units = units.min(self.bolus_not_delivered);
        self.bolus_not_delivered -= units;
        self.insulin_delivered += units;
    }

    pub(crate) fn advance_time(&mut self, by: Duration) {
        self.time_active += by;
    }

    fn next_msg_seq(&mut self) -> u8 {
        self.msg_seq = self.msg_seq.wrapping_add(1);
        self.msg_seq
    }

    fn packet(&mut self, packet_type: PacketType, destination: u32, payload: Vec<u8>) -> Option<Vec<u8>> {
        let seq = self.next_msg_seq();
        MessagePacket::new(packet_type, self.options.address, destination, seq, payload)
            .encode()
            .ok()
    }

    fn handle_frame(&mut self, frame: &[u8]) -> Option<Vec<u8>> {
        let packet = MessagePacket::parse(frame).ok()?;
        match packet.packet_type {
            PacketType::Pairing => self.handle_pairing(&packet),
            PacketType::SessionEstablishment => self.handle_eap(&packet),
            PacketType::Encrypted => self.handle_encrypted(frame, &packet),
            PacketType::Clear => None,
        }
    }

    fn handle_pairing(&mut self, packet: &MessagePacket) -> Option<Vec<u8>> {
        if let Ok(fields) = parse_keys(&packet.payload, &[SP1, SPS1_CONTROLLER]) {
            let (controller_public, controller_nonce) = split_key_material(&fields[1])?;
            let keypair = PairingKeypair::generate();
            let pod_nonce: [u8; PAIRING_NONCE_SIZE] = random_bytes();
            let mut material = keypair.public_key().to_vec();
            material.extend_from_slice(&pod_nonce);

            let shared = keypair.diffie_hellman(&controller_public);
            self.ltk = Some(derive_ltk(&shared, &controller_nonce, &pod_nonce).ok()?);
            self.pairing_transcript = transcript(&fields[1], &material);
            let payload = format_keys(&[(SPS1, &material[..])]);
            return self.packet(PacketType::Pairing, packet.source, payload);
        }

        if parse_keys(&packet.payload, &[SPS2]).is_ok() {
            let ours = confirmation(&self.ltk?, POD_LABEL, &self.pairing_transcript).ok()?;
            let payload = format_keys(&[(SPS2, &ours[..])]);
            return self.packet(PacketType::Pairing, packet.source, payload);
        }

        if packet.payload == SP0GP0.as_bytes() {
            let payload = format_keys(&[(P0, &[P0_ACK][..])]);
            return self.packet(PacketType::Pairing, packet.source, payload);
        }
        None
    }

    fn handle_eap(&mut self, packet: &MessagePacket) -> Option<Vec<u8>> {
        let message = EapMessage::decode(&packet.payload).ok()?;
        if message.code != EapCode::Request {
            return None;
        }
        let ltk = self.ltk?;
        let rand = *message.rand()?;
        let autn = message.autn()?;
        let controller_iv = *message.custom_iv()?;
        let sqn: [u8; EAP_SQN_SIZE] = autn[..EAP_SQN_SIZE].try_into().ok()?;

        let reply = if self.eap_seq > 0 && sqn_from_bytes(&sqn) <= self.eap_seq {
            let pod_sqn = sqn_bytes(self.eap_seq);
            let mac = derive_res(&ltk, &rand, &pod_sqn).ok()?;
            let mut auts = [0u8; 14];
            auts[..EAP_SQN_SIZE].copy_from_slice(&pod_sqn);
            auts[EAP_SQN_SIZE..].copy_from_slice(&mac);
            EapMessage {
                code: EapCode::Response,
                identifier: message.identifier,
                subtype: Some(EapSubtype::SynchronizationFailure),
                attributes: vec![EapAttribute::Auts(auts)],
            }
        } else {
            let pod_iv: [u8; IV_SIZE] = random_bytes();
            let res = derive_res(&ltk, &rand, &sqn).ok()?;
            let keys = derive_session_keys(&ltk, &rand, &sqn, &controller_iv, &pod_iv).ok()?;
            self.eap_seq = sqn_from_bytes(&sqn);
            self.session = Some(PodSession {
                ck: keys.ck,
                nonce_prefix: keys.nonce_prefix,
            });
            self.last_nonce_seq = 0;
            EapMessage {
                code: EapCode::Response,
                identifier: message.identifier,
                subtype: Some(EapSubtype::Challenge),
                attributes: vec![EapAttribute::Res(res), EapAttribute::CustomIv(pod_iv)],
            }
        };
        self.packet(PacketType::SessionEstablishment, packet.source, reply.encode())
    }

    fn handle_encrypted(&mut self, frame: &[u8], packet: &MessagePacket) -> Option<Vec<u8>> {
        let session = self.session?;
        let nonce = |sequence, direction| PacketNonce {
            prefix: session.nonce_prefix,
            sequence,
            direction,
        };

        let (incoming, plaintext, nonce_seq) = (self.last_nonce_seq + 1..=self.last_nonce_seq + NONCE_WINDOW)
            .find_map(|seq| {
                open_packet(&self.cipher, &session.ck, frame, nonce(seq, NONCE_DIR_CONTROLLER))
                    .ok()
                    .map(|(p, data)| (p, data, seq))
            })?;
        self.last_nonce_seq = nonce_seq;
        if incoming.ack {
            return None;
        }

        let command = Message::decode(&unwrap_command(&plaintext).ok()?, true).ok()?;
        let blocks = self.handle_message(&command);
        let mut number = command.sequence_num.wrapping_add(1);
        if std::mem::take(&mut self.skew_next) {
            number = number.wrapping_add(1);
        }
        let response = Message::new(self.options.address, blocks, number);

        let seq = self.next_msg_seq();
        let mut reply = MessagePacket::new(PacketType::Encrypted, self.options.address, packet.source, seq, Vec::new());
        reply.eqos = 1;
        let reply = seal_packet(
            &self.cipher,
            &session.ck,
            reply,
            nonce(nonce_seq + 1, NONCE_DIR_POD),
            &wrap_response(&response.encode()),
        )
        .ok()?;
        reply.encode().ok()
    }

    fn handle_message(&mut self, message: &Message) -> Vec<MessageBlock> {
        if let Some(code) = self.fault_next.take() {
            self.fault = Some(code);
            self.basal_running = false;
            self.temp_basal_running = false;
            self.bolusing = false;
        }

        let info_type = match message.message_blocks.first() {
            Some(MessageBlock::GetStatus(request)) => Some(request.pod_info_type),
            _ => None,
        };

        if self.fault.is_some() {
            return match info_type {
                Some(PodInfoType::Normal | PodInfoType::DetailedStatus) | None => {
                    vec![PodInfoResponse::DetailedStatus(self.detailed_status()).into()]
                }
                Some(other) => vec![self.pod_info(other).into()],
            };
        }

        if let Some(code) = self.reject_next.take() {
            return vec![ErrorResponse::Nonretryable {
                code,
                fault_event_code: FaultEventCode::NO_FAULTS,
                pod_progress: self.progress,
            }
            .into()];
        }

        if let Some(sent) = message.message_blocks.iter().find_map(MessageBlock::nonce) {
            if self.reject_nonces > 0 || sent != self.nonce.current() {
                self.reject_nonces = self.reject_nonces.saturating_sub(1);
                return vec![self.bad_nonce(sent, message.sequence_num)];
            }
            self.nonce.advance();
            self.commands_accepted += 1;
        }

        for block in &message.message_blocks {
            self.received.push(block.block_type());
            self.apply(block, message.sequence_num);
        }

        match message.message_blocks.first() {
            Some(MessageBlock::AssignAddress(_)) => vec![self.version(false).into()],
            Some(MessageBlock::SetupPod(_)) => vec![self.version(true).into()],
            _ => match info_type {
                None | Some(PodInfoType::Normal) => vec![self.status().into()],
                Some(PodInfoType::DetailedStatus) => {
                    vec![PodInfoResponse::DetailedStatus(self.detailed_status()).into()]
                }
                Some(other) => vec![self.pod_info(other).into()],
            },
        }
    }

    fn bad_nonce(&mut self, sent: u32, message_seq: u8) -> MessageBlock {
        let seed = u16::from_be_bytes(random_bytes());
        let sum = (sent & 0xFFFF)
            .wrapping_add(u32::from(CRC16_TABLE[usize::from(message_seq)]))
            .wrapping_add(self.options.lot & 0xFFFF)
            .wrapping_add(self.options.tid & 0xFFFF);
        self.nonce = NonceState::new(self.options.lot, self.options.tid, seed);
        self.bad_nonce_replies += 1;
        ErrorResponse::BadNonce {
            nonce_resync_key: (sum & 0xFFFF) as u16 ^ seed,
        }
        .into()
    }

    fn apply(&mut self, block: &MessageBlock, message_seq: u8) {
        match block {
            MessageBlock::AssignAddress(_) => {
                self.progress = if self.options.activation_time_exceeded {
                    PodProgressStatus::ActivationTimeExceeded
                } else {
                    PodProgressStatus::ReminderInitialized
                };
            }
            MessageBlock::SetupPod(_) => {
                if self.progress == PodProgressStatus::ReminderInitialized {
                    self.progress = PodProgressStatus::PairingCompleted;
                }
            }
            MessageBlock::AcknowledgeAlert(ack) => {
                self.alerts = AlertSet::from_bits(self.alerts.bits() & !ack.alerts.bits());
            }
            MessageBlock::SetInsulinSchedule(command) => {
                self.last_programming_seq = message_seq;
                match &command.schedule {
                    DeliverySchedule::Bolus { units, .. } => match self.progress {
                        PodProgressStatus::PairingCompleted => {
                            self.progress = PodProgressStatus::PrimingCompleted;
                            self.insulin_delivered += units;
                        }
                        PodProgressStatus::BasalInitialized => {
                            self.progress = PodProgressStatus::AboveFiftyUnits;
                            self.insulin_delivered += units;
                        }
                        progress if progress.ready_for_delivery() => {
                            self.bolusing = true;
                            self.bolus_not_delivered = *units;
                        }
                        _ => {}
                    },
                    DeliverySchedule::BasalSchedule { .. } => {
                        if self.progress == PodProgressStatus::PrimingCompleted {
                            self.progress = PodProgressStatus::BasalInitialized;
                        }
                        self.basal_running = true;
                    }
                    DeliverySchedule::TempBasal { .. } => self.temp_basal_running = true,
                }
            }
            MessageBlock::CancelDelivery(cancel) => {
                self.last_programming_seq = message_seq;
                if cancel.delivery_type.contains(DeliveryType::BOLUS) {
                    self.bolusing = false;
                }
                if cancel.delivery_type.contains(DeliveryType::TEMP_BASAL) {
                    self.temp_basal_running = false;
                }
                if cancel.delivery_type.contains(DeliveryType::BASAL) {
                    self.basal_running = false;
                }
            }
            MessageBlock::DeactivatePod(_) => {
                self.progress = PodProgressStatus::Inactive;
                self.basal_running = false;
                self.temp_basal_running = false;
                self.bolusing = false;
            }
            _ => {}
        }
    }

    fn status(&self) -> StatusResponse {
        StatusResponse {
            delivery_status: self.delivery_status(),
            pod_progress_status: self.progress,
            time_active: self.time_active,
            reservoir_level: RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER,
            insulin_delivered: self.insulin_delivered,
            bolus_not_delivered: self.bolus_not_delivered,
            last_programming_message_seq: self.last_programming_seq,
            alerts: self.alerts,
        }
    }

    fn detailed_status(&self) -> DetailedStatus {
        let faulted = self.fault.is_some();
        DetailedStatus {
            pod_progress_status: if faulted {
                PodProgressStatus::FaultEventOccurred
            } else {
                self.progress
            },
            delivery_status: self.delivery_status(),
            bolus_not_delivered: self.bolus_not_delivered,
            last_programming_message_seq: self.last_programming_seq,
            total_insulin_delivered: self.insulin_delivered,
            fault_event_code: self.fault.unwrap_or(FaultEventCode::NO_FAULTS),
            fault_event_time_since_activation: self.fault.map(|_| self.time_active),
            reservoir_level: RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER,
            time_active: self.time_active,
            unacknowledged_alerts: self.alerts,
            fault_accessing_tables: false,
            error_event_info: None,
            receiver_low_gain: 0,
            radio_rssi: 0,
            possible_fault_calling_address: None,
        }
    }

    fn pod_info(&self, info_type: PodInfoType) -> PodInfoResponse {
        PodInfoResponse::Other {
            info_type,
            data: vec![0; 8],
        }
    }

    fn version(&self, long: bool) -> VersionResponse {
        VersionResponse {
            pm_version: self.options.pm_version,
            pi_version: self.options.pi_version,
            product_id: 4,
            pod_progress_status: self.progress,
            lot: self.options.lot,
            tid: self.options.tid,
            address: self.options.address,
            gain: (!long).then_some(0),
            rssi: (!long).then_some(0x20),
            setup_constants: long.then_some(self.options.setup_constants),
        }
    }
}

impl PodChannel for SimulatedPod {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.connected = true;
        Ok(())
    }

    async fn write(&mut self, frame: Vec<u8>) -> WriteOutcome {
        if !self.connected {
            return WriteOutcome::Unacked(ChannelError::Disconnected);
        }
        let outcome = self.next_write.take().unwrap_or(WriteOutcome::AckedOk);
        if matches!(outcome, WriteOutcome::Unacked(_)) || std::mem::take(&mut self.ignore_next) {
            return outcome;
        }

        let reply = self.handle_frame(&frame);
        if let Some(reply) = reply
            && outcome == WriteOutcome::AckedOk
        {
            if self.drop_responses > 0 {
                self.drop_responses -= 1;
            } else {
                self.outbox.push_back(reply);
            }
        }
        outcome
    }

    async fn read(&mut self) -> Option<Vec<u8>> {
        self.outbox.pop_front()
    }
}
