//! Pairing and session negotiation.
//!
//! Pairing runs once per pod and produces the long-term key (LTK). Every
//! connection afterwards negotiates a fresh session from the LTK and the EAP
//! sequence number:
//!
//! ```text
//! controller                                   pod
//!     |== Pairing: SP1= id, SPS1= pub‖nonce ==>|
//!     |<= SPS1= pub‖nonce =====================|    X25519 → LTK
//!     |== SPS2= confirmation =================>|
//!     |<= SPS2= confirmation ==================|
//!     |== SP0,GP0 ============================>|
//!     |<= P0= 0xa5 ============================|
//!
//!     |-- Session: Request/Challenge RAND AUTN IV -->|
//!     |<- Response/Challenge RES IV -----------------|  or AUTS (resync)
//!     |-- Success ---------------------------------->|
//! ```
//!
//! The engine talks to both phases through [`KeyExchange`], so tests and
//! alternative radios can plug in their own.

pub mod eap;
#[cfg(feature = "crypto")]
pub(crate) mod exchange;

use std::future::Future;

use thiserror::Error;

use crate::core::{CryptoError, PodChannel, CK_SIZE, LTK_SIZE, NONCE_PREFIX_SIZE};
use crate::transport::TransportError;

#[cfg(feature = "crypto")]
pub use exchange::ChannelKeyExchange;

/// Pairing and negotiation errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PairingError {
    /// The key agreement could not complete.
    #[error("key agreement failed: {0}")]
    KeyAgreementFailed(String),

    /// The pod's key confirmation did not match ours.
    #[error("key confirmation mismatch")]
    ConfirmationMismatch,

    /// The pod's challenge response was wrong.
    #[error("session authentication failed")]
    AuthenticationFailed,

    /// The pod answered with something other than the expected packet.
    #[error("unexpected packet: {0}")]
    UnexpectedPacket(String),

    /// Key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The channel failed underneath the exchange.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Outcome of the LTK exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LtkExchangeResult {
    /// Long-term key shared with the pod.
    pub ltk: [u8; LTK_SIZE],
    /// Address the pod answered from.
    pub address: u32,
    /// Packet sequence number the exchange ended on.
    pub msg_seq: u8,
}

/// Keys of a negotiated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSession {
    /// Confidentiality key.
    pub ck: [u8; CK_SIZE],
    /// Controller IV followed by pod IV.
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    /// Packet sequence number the negotiation ended on.
    pub msg_seq: u8,
}

/// Outcome of one session negotiation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNegotiation {
    /// The session is up.
    Established(NegotiatedSession),
    /// The pod's EAP sequence is ahead of ours; retry from this value.
    Resynchronization {
        /// Sequence number the pod reported.
        synchronized_eap_seq: u64,
    },
}

/// Pairing and session negotiation over a channel.
pub trait KeyExchange<C: PodChannel>: Send + Sync {
    /// Agree on a long-term key with an unpaired pod.
    fn exchange_ltk(
        &self,
        channel: &mut C,
        my_id: u32,
        pod_id: u32,
        msg_seq: u8,
    ) -> impl Future<Output = Result<LtkExchangeResult, PairingError>> + Send;

    /// Negotiate session keys for `eap_seq`.
    fn negotiate_session(
        &self,
        channel: &mut C,
        ltk: &[u8; LTK_SIZE],
        eap_seq: u64,
        my_id: u32,
        pod_id: u32,
        msg_seq: u8,
    ) -> impl Future<Output = Result<SessionNegotiation, PairingError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ChannelError;

    #[test]
    fn test_error_display() {
        assert_eq!(
            PairingError::ConfirmationMismatch.to_string(),
            "key confirmation mismatch"
        );
        let err = PairingError::from(TransportError::CommsError(ChannelError::Timeout));
        assert_eq!(err.to_string(), "transport error: comms error: channel timed out");
    }
}
