//! [`KeyExchange`] over the pod channel.

use tracing::{debug, info, warn};

use crate::core::{
    PodChannel, WriteOutcome, EAP_SQN_SIZE, LTK_SIZE, PAIRING_ADDRESS, PAIRING_NONCE_SIZE,
    PUBLIC_KEY_SIZE,
};
use crate::crypto::keys::{
    confirmation, derive_ltk, derive_res, derive_session_keys, random_bytes, sqn_bytes,
    sqn_from_bytes, PairingKeypair, IV_SIZE, RAND_SIZE,
};
use crate::transport::prefix::{format_keys, parse_keys};
use crate::transport::{MessagePacket, PacketType, TransportError};

use super::eap::{identifier_for, EapAttribute, EapCode, EapMessage, EapSubtype};
use super::{
    KeyExchange, LtkExchangeResult, NegotiatedSession, PairingError, SessionNegotiation,
};

pub(crate) const SP1: &str = "SP1=";
pub(crate) const SPS1_CONTROLLER: &str = ",SPS1=";
pub(crate) const SPS1: &str = "SPS1=";
pub(crate) const SPS2: &str = "SPS2=";
pub(crate) const SP0GP0: &str = "SP0,GP0";
pub(crate) const P0: &str = "P0=";
pub(crate) const P0_ACK: u8 = 0xA5;

pub(crate) const CONTROLLER_LABEL: &[u8] = b"controller";
pub(crate) const POD_LABEL: &[u8] = b"pod";

const KEY_MATERIAL_SIZE: usize = PUBLIC_KEY_SIZE + PAIRING_NONCE_SIZE;

/// Key exchange with fresh OS randomness for every pairing and session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelKeyExchange;

/// Send one frame and wait for the pod's reply packet of `expected` type.
async fn round_trip<C: PodChannel>(
    channel: &mut C,
    packet: MessagePacket,
    expected: PacketType,
) -> Result<MessagePacket, PairingError> {
    let frame = packet.encode().map_err(TransportError::from)?;
    match channel.write(frame).await {
        WriteOutcome::AckedOk => {}
        WriteOutcome::AckedWithError(cause) => {
            return Err(TransportError::IoException(cause.to_string()).into());
        }
        WriteOutcome::Unacked(cause) => return Err(TransportError::CommsError(cause).into()),
    }

    let frame = channel
        .read()
        .await
        .ok_or_else(|| TransportError::IoException("no response".into()))?;
    let reply = MessagePacket::parse(&frame).map_err(TransportError::from)?;
    if reply.packet_type != expected {
        return Err(PairingError::UnexpectedPacket(format!(
            "{:?}, expected {expected:?}",
            reply.packet_type
        )));
    }
    Ok(reply)
}

fn field(payload: &[u8], key: &'static str) -> Result<Vec<u8>, PairingError> {
    let mut fields = parse_keys(payload, &[key]).map_err(TransportError::from)?;
    Ok(fields.remove(0))
}

/// Transcript both sides confirm: controller key material then the pod's.
pub(crate) fn transcript(controller: &[u8], pod: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(controller.len() + pod.len());
    out.extend_from_slice(controller);
    out.extend_from_slice(pod);
    out
}

/// Split `public key ‖ nonce`.
pub(crate) fn split_key_material(
    data: &[u8],
) -> Option<([u8; PUBLIC_KEY_SIZE], [u8; PAIRING_NONCE_SIZE])> {
    if data.len() != KEY_MATERIAL_SIZE {
        return None;
    }
    let public = data[..PUBLIC_KEY_SIZE].try_into().ok()?;
    let nonce = data[PUBLIC_KEY_SIZE..].try_into().ok()?;
    Some((public, nonce))
}

impl<C: PodChannel> KeyExchange<C> for ChannelKeyExchange {
    async fn exchange_ltk(
        &self,
        channel: &mut C,
        my_id: u32,
        pod_id: u32,
        msg_seq: u8,
    ) -> Result<LtkExchangeResult, PairingError> {
        let keypair = PairingKeypair::generate();
        let nonce: [u8; PAIRING_NONCE_SIZE] = random_bytes();
        let mut material = Vec::with_capacity(KEY_MATERIAL_SIZE);
        material.extend_from_slice(keypair.public_key());
        material.extend_from_slice(&nonce);

        let mut seq = msg_seq;
        let mut next_seq = || {
            seq = seq.wrapping_add(1);
            seq
        };

        info!(pod_id = format_args!("{pod_id:#010x}"), "starting LTK exchange");
        let payload = format_keys(&[
            (SP1, &pod_id.to_be_bytes()[..]),
            (SPS1_CONTROLLER, &material[..]),
        ]);
        let packet = MessagePacket::new(PacketType::Pairing, my_id, PAIRING_ADDRESS, next_seq(), payload);
        let reply = round_trip(channel, packet, PacketType::Pairing).await?;
        let address = reply.source;
        let pod_material = field(&reply.payload, SPS1)?;
        let (pod_public, pod_nonce) = split_key_material(&pod_material)
            .ok_or_else(|| PairingError::KeyAgreementFailed(format!("{} bytes of key material", pod_material.len())))?;

        let shared = keypair.diffie_hellman(&pod_public);
        let ltk = derive_ltk(&shared, &nonce, &pod_nonce)?;
        let transcript = transcript(&material, &pod_material);

        let ours = confirmation(&ltk, CONTROLLER_LABEL, &transcript)?;
        let packet = MessagePacket::new(
            PacketType::Pairing,
            my_id,
            address,
            next_seq(),
            format_keys(&[(SPS2, &ours[..])]),
        );
        let reply = round_trip(channel, packet, PacketType::Pairing).await?;
        let theirs = field(&reply.payload, SPS2)?;
        if theirs[..] != confirmation(&ltk, POD_LABEL, &transcript)?[..] {
            warn!("pod key confirmation mismatch");
            return Err(PairingError::ConfirmationMismatch);
        }

        let packet = MessagePacket::new(
            PacketType::Pairing,
            my_id,
            address,
            next_seq(),
            format_keys(&[(SP0GP0, &[][..])]),
        );
        let reply = round_trip(channel, packet, PacketType::Pairing).await?;
        if field(&reply.payload, P0)? != [P0_ACK] {
            return Err(PairingError::UnexpectedPacket("P0 value".into()));
        }

        debug!(address = format_args!("{address:#010x}"), "LTK agreed");
        Ok(LtkExchangeResult {
            ltk,
            address,
            msg_seq: next_seq(),
        })
    }

    async fn negotiate_session(
        &self,
        channel: &mut C,
        ltk: &[u8; LTK_SIZE],
        eap_seq: u64,
        my_id: u32,
        pod_id: u32,
        msg_seq: u8,
    ) -> Result<SessionNegotiation, PairingError> {
        let rand: [u8; RAND_SIZE] = random_bytes();
        let controller_iv: [u8; IV_SIZE] = random_bytes();
        let sqn = sqn_bytes(eap_seq);
        let mut autn = [0u8; 16];
        autn[..EAP_SQN_SIZE].copy_from_slice(&sqn);

        let mut seq = msg_seq.wrapping_add(1);
        let challenge = EapMessage::challenge(
            identifier_for(seq),
            vec![
                EapAttribute::Rand(rand),
                EapAttribute::Autn(autn),
                EapAttribute::CustomIv(controller_iv),
            ],
        );
        debug!(eap_seq, "sending session challenge");
        let packet = MessagePacket::new(PacketType::SessionEstablishment, my_id, pod_id, seq, challenge.encode());
        let reply = round_trip(channel, packet, PacketType::SessionEstablishment).await?;
        let response = EapMessage::decode(&reply.payload).map_err(TransportError::from)?;
        if response.code != EapCode::Response {
            return Err(PairingError::UnexpectedPacket(format!("EAP {:?}", response.code)));
        }

        if response.subtype == Some(EapSubtype::SynchronizationFailure) {
            let auts = response
                .auts()
                .ok_or_else(|| PairingError::UnexpectedPacket("missing AUTS".into()))?;
            let pod_sqn: [u8; EAP_SQN_SIZE] = auts[..EAP_SQN_SIZE]
                .try_into()
                .map_err(|_| PairingError::AuthenticationFailed)?;
            if auts[EAP_SQN_SIZE..] != derive_res(ltk, &rand, &pod_sqn)?[..] {
                return Err(PairingError::AuthenticationFailed);
            }
            let synchronized_eap_seq = sqn_from_bytes(&pod_sqn);
            info!(eap_seq, synchronized_eap_seq, "pod requested EAP resynchronization");
            return Ok(SessionNegotiation::Resynchronization { synchronized_eap_seq });
        }

        let (Some(res), Some(pod_iv)) = (response.res(), response.custom_iv()) else {
            return Err(PairingError::UnexpectedPacket("missing RES or IV".into()));
        };
        if *res != derive_res(ltk, &rand, &sqn)? {
            warn!(eap_seq, "session challenge response mismatch");
            return Err(PairingError::AuthenticationFailed);
        }
        let keys = derive_session_keys(ltk, &rand, &sqn, &controller_iv, pod_iv)?;

        seq = seq.wrapping_add(1);
        let success = EapMessage::notice(EapCode::Success, identifier_for(seq));
        let packet = MessagePacket::new(PacketType::SessionEstablishment, my_id, pod_id, seq, success.encode());
        let frame = packet.encode().map_err(TransportError::from)?;
        match channel.write(frame).await {
            WriteOutcome::AckedOk => {}
            WriteOutcome::AckedWithError(cause) | WriteOutcome::Unacked(cause) => {
                return Err(TransportError::IoException(cause.to_string()).into());
            }
        }

        info!(eap_seq, "session established");
        Ok(SessionNegotiation::Established(NegotiatedSession {
            ck: keys.ck,
            nonce_prefix: keys.nonce_prefix,
            msg_seq: seq,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimulatedPod, SimulatedPodOptions};

    const MY_ID: u32 = 0x1700_0000;

    #[tokio::test]
    async fn test_ltk_exchange() {
        let options = SimulatedPodOptions::default();
        let mut pod = SimulatedPod::new(options.clone());
        let exchange = ChannelKeyExchange;

        let result = exchange
            .exchange_ltk(&mut pod, MY_ID, options.address, 0)
            .await
            .unwrap();
        assert_eq!(result.address, options.address);
        assert_eq!(Some(result.ltk), pod.ltk());
        assert_eq!(result.msg_seq, 4);
    }

    #[tokio::test]
    async fn test_session_negotiation() {
        let options = SimulatedPodOptions::default();
        let mut pod = SimulatedPod::new(options.clone());
        let exchange = ChannelKeyExchange;
        let ltk = exchange
            .exchange_ltk(&mut pod, MY_ID, options.address, 0)
            .await
            .unwrap()
            .ltk;

        let negotiation = exchange
            .negotiate_session(&mut pod, &ltk, 1, MY_ID, options.address, 4)
            .await
            .unwrap();
        let SessionNegotiation::Established(session) = negotiation else {
            panic!("expected an established session");
        };
        assert_eq!(session.msg_seq, 6);
        assert_eq!(Some(session.ck), pod.session_ck());
    }

    #[tokio::test]
    async fn test_session_resynchronization() {
        let options = SimulatedPodOptions {
            eap_seq: 9,
            ..Default::default()
        };
        let mut pod = SimulatedPod::new(options.clone());
        let exchange = ChannelKeyExchange;
        let ltk = exchange
            .exchange_ltk(&mut pod, MY_ID, options.address, 0)
            .await
            .unwrap()
            .ltk;

        let negotiation = exchange
            .negotiate_session(&mut pod, &ltk, 2, MY_ID, options.address, 4)
            .await
            .unwrap();
        assert_eq!(
            negotiation,
            SessionNegotiation::Resynchronization {
                synchronized_eap_seq: 9
            }
        );

        let negotiation = exchange
            .negotiate_session(&mut pod, &ltk, 10, MY_ID, options.address, 6)
            .await
            .unwrap();
        assert!(matches!(negotiation, SessionNegotiation::Established(_)));
    }

    #[tokio::test]
    async fn test_wrong_ltk_fails_authentication() {
        let options = SimulatedPodOptions::default();
        let mut pod = SimulatedPod::new(options.clone());
        let exchange = ChannelKeyExchange;
        exchange
            .exchange_ltk(&mut pod, MY_ID, options.address, 0)
            .await
            .unwrap();

        let err = exchange
            .negotiate_session(&mut pod, &[0u8; LTK_SIZE], 1, MY_ID, options.address, 4)
            .await
            .unwrap_err();
        assert_eq!(err, PairingError::AuthenticationFailed);
    }

    #[test]
    fn test_split_key_material() {
        let mut data = vec![1u8; PUBLIC_KEY_SIZE];
        data.extend_from_slice(&[2u8; PAIRING_NONCE_SIZE]);
        let (public, nonce) = split_key_material(&data).unwrap();
        assert_eq!(public, [1u8; PUBLIC_KEY_SIZE]);
        assert_eq!(nonce, [2u8; PAIRING_NONCE_SIZE]);
        assert!(split_key_material(&data[1..]).is_none());
    }
}
