//! Encrypted, sequenced message exchange.
//!
//! One [`MessageTransport::send`] is one round trip:
//!
//! ```text
//! controller                                   pod
//!     |-- Encrypted(msg_seq, "S0.0=" cmd ",G0.0") -->|
//!     |<-- Encrypted(seq, "0.0=" response) ----------|
//!     |-- Encrypted ack(ack_number = seq + 1) ------>|
//! ```
//!
//! Three counters advance: the 8-bit packet sequence, the nonce sequence
//! (once per encrypted packet either way, never wrapping), and the 4-bit
//! protocol message number (once for the command, once for the response).

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::{
    CK_SIZE, MessageCipher, NONCE_DIR_CONTROLLER, NONCE_DIR_POD, NONCE_PREFIX_SIZE, PacketNonce,
    PodChannel, WriteOutcome, AEAD_TAG_SIZE, PACKET_HEADER_SIZE,
};

use super::error::{TransportError, TransportResult};
use super::message::Message;
use super::packet::{MessagePacket, PacketType};
use super::prefix;

/// Counters and keys of one session; persisted with the pod state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTransportState {
    /// Session confidentiality key.
    pub ck: [u8; CK_SIZE],
    /// Controller IV followed by pod IV.
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    /// Packet sequence number, wraps at 256.
    pub msg_seq: u8,
    /// Nonce sequence; never wraps within a session.
    pub nonce_seq: u64,
    /// Next protocol message number, wraps at 16.
    pub message_number: u8,
    /// EAP sequence for session negotiation.
    pub eap_seq: u64,
}

impl Default for MessageTransportState {
    fn default() -> Self {
        Self {
            ck: [0; CK_SIZE],
            nonce_prefix: [0; NONCE_PREFIX_SIZE],
            msg_seq: 0,
            nonce_seq: 0,
            message_number: 0,
            eap_seq: 1,
        }
    }
}

impl MessageTransportState {
    /// Fresh counters for a newly negotiated session.
    pub fn new_session(
        ck: [u8; CK_SIZE],
        nonce_prefix: [u8; NONCE_PREFIX_SIZE],
        message_number: u8,
        eap_seq: u64,
    ) -> Self {
        Self {
            ck,
            nonce_prefix,
            msg_seq: 0,
            nonce_seq: 0,
            message_number: message_number & 0x0F,
            eap_seq,
        }
    }

    fn increment_msg_seq(&mut self) -> u8 {
        self.msg_seq = self.msg_seq.wrapping_add(1);
        self.msg_seq
    }

    fn increment_nonce_seq(&mut self) -> u64 {
        self.nonce_seq += 1;
        self.nonce_seq
    }

    fn increment_message_number(&mut self) -> u8 {
        self.message_number = (self.message_number + 1) & 0x0F;
        self.message_number
    }
}

/// Encrypt `plaintext` into a packet, with the header as AAD.
pub fn seal_packet(
    cipher: &dyn MessageCipher,
    ck: &[u8],
    mut packet: MessagePacket,
    nonce: PacketNonce,
    plaintext: &[u8],
) -> TransportResult<MessagePacket> {
    packet.payload = vec![0; plaintext.len() + AEAD_TAG_SIZE];
    let header = packet.header()?;
    packet.payload = cipher.encrypt(ck, &nonce, &header, plaintext)?;
    Ok(packet)
}

/// Decrypt a received frame, with its header as AAD.
pub fn open_packet(
    cipher: &dyn MessageCipher,
    ck: &[u8],
    frame: &[u8],
    nonce: PacketNonce,
) -> TransportResult<(MessagePacket, Vec<u8>)> {
    let packet = MessagePacket::parse(frame)?;
    let aad = &frame[..PACKET_HEADER_SIZE];
    let plaintext = cipher.decrypt(ck, &nonce, aad, &packet.payload)?;
    Ok((packet, plaintext))
}

/// Round trips over one pod channel.
///
/// Borrows the channel, cipher and persisted counters for the length of a
/// command session.
pub struct MessageTransport<'a, C: PodChannel> {
    channel: &'a mut C,
    cipher: &'a dyn MessageCipher,
    state: &'a mut MessageTransportState,
    my_id: u32,
    pod_id: u32,
}

impl<'a, C: PodChannel> MessageTransport<'a, C> {
    /// Create a transport between `my_id` and `pod_id`.
    pub fn new(
        channel: &'a mut C,
        cipher: &'a dyn MessageCipher,
        state: &'a mut MessageTransportState,
        my_id: u32,
        pod_id: u32,
    ) -> Self {
        Self {
            channel,
            cipher,
            state,
            my_id,
            pod_id,
        }
    }

    /// Protocol message number the next command must carry.
    pub fn message_number(&self) -> u8 {
        self.state.message_number
    }

    fn nonce(&self, sequence: u64, direction: u8) -> PacketNonce {
        PacketNonce {
            prefix: self.state.nonce_prefix,
            sequence,
            direction,
        }
    }

    /// Send `message` and wait for the pod's reply.
    ///
    /// The protocol message number restarts from the one `message` carries,
    /// so a retried command may reuse its number.
    pub async fn send(&mut self, message: &Message) -> TransportResult<Message> {
        if !self.channel.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let sequence = message.sequence_num;
        self.state.message_number = sequence & 0x0F;
        let unacknowledged = |cause: String| TransportError::UnacknowledgedMessage { sequence, cause };

        let encoded = message.encode();
        debug!(seq = sequence, data = %hex::encode(&encoded), "send message");

        let msg_seq = self.state.increment_msg_seq();
        let nonce_seq = self.state.increment_nonce_seq();
        let mut packet = MessagePacket::new(PacketType::Encrypted, self.my_id, self.pod_id, msg_seq, Vec::new());
        packet.eqos = 1;
        let packet = seal_packet(
            self.cipher,
            &self.state.ck,
            packet,
            self.nonce(nonce_seq, NONCE_DIR_CONTROLLER),
            &prefix::wrap_command(&encoded),
        )?;

        match self.channel.write(packet.encode()?).await {
            WriteOutcome::AckedOk => {}
            WriteOutcome::AckedWithError(cause) => {
                warn!(seq = sequence, %cause, "write acknowledged with error");
                return Err(unacknowledged(cause.to_string()));
            }
            WriteOutcome::Unacked(cause) => return Err(TransportError::CommsError(cause)),
        }
        let expected = self.state.increment_message_number();

        let Some(frame) = self.channel.read().await else {
            return Err(unacknowledged("no response".into()));
        };
        let nonce_seq = self.state.increment_nonce_seq();
        let (incoming, plaintext) = open_packet(self.cipher, &self.state.ck, &frame, self.nonce(nonce_seq, NONCE_DIR_POD))
            .map_err(|e| unacknowledged(e.to_string()))?;
        let response_data = prefix::unwrap_response(&plaintext).map_err(|e| unacknowledged(e.to_string()))?;
        debug!(data = %hex::encode(&response_data), "received message");

        self.acknowledge(&incoming).await.map_err(|e| unacknowledged(e.to_string()))?;

        let response = Message::decode(&response_data, false).map_err(|e| unacknowledged(e.to_string()))?;
        if response.sequence_num != expected {
            return Err(TransportError::InvalidSequence {
                expected,
                actual: response.sequence_num,
            });
        }
        self.state.increment_message_number();
        Ok(response)
    }

    async fn acknowledge(&mut self, incoming: &MessagePacket) -> TransportResult<()> {
        let msg_seq = self.state.increment_msg_seq();
        let nonce_seq = self.state.increment_nonce_seq();
        let mut ack = MessagePacket::new(PacketType::Encrypted, incoming.destination, incoming.source, msg_seq, Vec::new());
        ack.ack = true;
        ack.ack_number = incoming.sequence_number.wrapping_add(1);
        let ack = seal_packet(
            self.cipher,
            &self.state.ck,
            ack,
            self.nonce(nonce_seq, NONCE_DIR_CONTROLLER),
            &[],
        )?;

        match self.channel.write(ack.encode()?).await {
            WriteOutcome::AckedOk => Ok(()),
            WriteOutcome::AckedWithError(cause) | WriteOutcome::Unacked(cause) => {
                Err(TransportError::IoException(format!("ack failed: {cause}")))
            }
        }
    }
}

#[cfg(all(test, feature = "crypto"))]
mod tests {
    use super::*;
    use crate::core::ChannelError;
    use crate::crypto::ChaChaCipher;
    use crate::testing::{SimulatedPod, SimulatedPodOptions};
    use crate::transport::blocks::{GetStatusCommand, MessageBlock, PodInfoType};

    fn get_status(address: u32, seq: u8) -> Message {
        Message::new(
            address,
            vec![GetStatusCommand {
                pod_info_type: PodInfoType::Normal,
            }
            .into()],
            seq,
        )
    }

    #[test]
    fn test_default_state() {
        let state = MessageTransportState::default();
        assert_eq!(state.eap_seq, 1);
        assert_eq!(state.nonce_seq, 0);
    }

    #[test]
    fn test_counters_wrap() {
        let mut state = MessageTransportState {
            msg_seq: 255,
            message_number: 15,
            ..Default::default()
        };
        assert_eq!(state.increment_msg_seq(), 0);
        assert_eq!(state.increment_message_number(), 0);
        state.nonce_seq = u64::from(u32::MAX);
        assert_eq!(state.increment_nonce_seq(), u64::from(u32::MAX) + 1);
    }

    #[tokio::test]
    async fn test_round_trip_advances_counters() {
        let (mut pod, mut state) = SimulatedPod::with_session(SimulatedPodOptions::default());
        let cipher = ChaChaCipher;
        let address = pod.address();
        let mut transport = MessageTransport::new(&mut pod, &cipher, &mut state, 0x1700_0000, address);

        let seq = transport.message_number();
        let response = transport.send(&get_status(address, seq)).await.unwrap();
        assert!(matches!(response.message_blocks[0], MessageBlock::StatusResponse(_)));
        assert_eq!(response.sequence_num, (seq + 1) & 0x0F);
        assert_eq!(transport.message_number(), (seq + 2) & 0x0F);

        drop(transport);
        assert_eq!(state.msg_seq, 2);
        assert_eq!(state.nonce_seq, 3);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let (mut pod, mut state) = SimulatedPod::with_session(SimulatedPodOptions::default());
        pod.disconnect();
        let cipher = ChaChaCipher;
        let mut transport = MessageTransport::new(&mut pod, &cipher, &mut state, 0x1700_0000, 1);
        assert_eq!(
            transport.send(&get_status(1, 0)).await.unwrap_err(),
            TransportError::NotConnected
        );
    }

    #[tokio::test]
    async fn test_unacked_write_is_certain() {
        let (mut pod, mut state) = SimulatedPod::with_session(SimulatedPodOptions::default());
        pod.fail_next_write(WriteOutcome::Unacked(ChannelError::Timeout));
        let cipher = ChaChaCipher;
        let address = pod.address();
        let mut transport = MessageTransport::new(&mut pod, &cipher, &mut state, 0x1700_0000, address);
        let err = transport.send(&get_status(address, 0)).await.unwrap_err();
        assert!(err.is_certain_failure());
    }

    #[tokio::test]
    async fn test_dropped_response_is_unacknowledged() {
        let (mut pod, mut state) = SimulatedPod::with_session(SimulatedPodOptions::default());
        pod.drop_next_response();
        let cipher = ChaChaCipher;
        let address = pod.address();
        let seq = state.message_number;
        let mut transport = MessageTransport::new(&mut pod, &cipher, &mut state, 0x1700_0000, address);
        let err = transport.send(&get_status(address, seq)).await.unwrap_err();
        assert!(matches!(err, TransportError::UnacknowledgedMessage { sequence, .. } if sequence == seq));
        assert!(!err.is_certain_failure());
    }

    #[tokio::test]
    async fn test_sequence_mismatch() {
        let (mut pod, mut state) = SimulatedPod::with_session(SimulatedPodOptions::default());
        pod.skew_next_response_sequence();
        let cipher = ChaChaCipher;
        let address = pod.address();
        let seq = state.message_number;
        let mut transport = MessageTransport::new(&mut pod, &cipher, &mut state, 0x1700_0000, address);
        let err = transport.send(&get_status(address, seq)).await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidSequence { .. }));
    }
}
