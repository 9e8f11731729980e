//! # pod-protocol
//!
//! Command-and-control engine for patch insulin pods over a reliable
//! Bluetooth-style link. It provides:
//!
//! - **Pairing**: long-term key agreement and per-connection session
//!   negotiation with EAP sequence resynchronization
//! - **Transport**: encrypted, sequenced round trips with exact accounting of
//!   which commands may or may not have reached the pod
//! - **Sessions**: every delivery, alert, status and lifecycle command, with
//!   a three-way `Success / CertainFailure / UncertainFailure` result
//! - **State**: an authoritative pod record with dose bookkeeping, fault
//!   capture and a versioned storage format
//!
//! ## Feature Flags
//!
//! - `crypto` (default): XChaCha20-Poly1305 packet cipher, X25519 pairing
//!   and HKDF key derivation. Without it, callers bring their own
//!   [`MessageCipher`] and [`pairing::KeyExchange`].
//!
//! ## Modules
//!
//! - [`core`]: constants, error types and collaborator traits
//! - [`crypto`]: nonce generator, CRC-16 and (with `crypto`) the cipher
//! - [`transport`]: packets, messages, blocks and round trips
//! - [`pod`]: the pod record and everything it tracks
//! - [`session`]: command sessions
//! - [`pairing`]: key agreement and session negotiation
//! - [`comms`]: the per-pod orchestrator
//! - [`persist`]: versioned storage of the pod record
//!
//! ## Example
//!
//! The controller and the pod walk the same nonce table:
//!
//! ```rust
//! use pod_protocol::prelude::*;
//!
//! let mut controller = NonceState::new(0x0000_A10B, 0x000C_0FFE, 0);
//! let mut pod = NonceState::new(0x0000_A10B, 0x000C_0FFE, 0);
//! for _ in 0..8 {
//!     assert_eq!(controller.current(), pod.current());
//!     controller.advance();
//!     pod.advance();
//! }
//! ```
//!
//! Pairing and a first command, given some `channel: impl PodChannel`:
//!
//! ```rust,ignore
//! use pod_protocol::prelude::*;
//!
//! let comms = PodComms::builder()
//!     .channel(channel)
//!     .key_exchange(ChannelKeyExchange)
//!     .build()?;
//!
//! let mut handle = comms.pair(InsulinType::Novolog).await?;
//! let mut session = handle.session()?;
//! let prime_wait = session.prime().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod comms;
pub mod core;
pub mod crypto;
pub mod pairing;
pub mod persist;
pub mod pod;
pub mod session;
pub mod transport;

#[cfg(all(test, feature = "crypto"))]
mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::crypto::NonceState;
    #[cfg(feature = "crypto")]
    pub use crate::crypto::ChaChaCipher;

    pub use crate::transport::{
        Message, MessageBlock, MessageBlockType, MessageTransport, MessageTransportState,
        StatusResponse, TransportError, TransportResult,
    };

    pub use crate::pod::{
        AlertSlot, BasalSchedule, BasalScheduleEntry, BeepPreference, BeepType, DeliveryStatus,
        DeliveryType, DetailedStatus, FaultEventCode, InsulinType, PodAlert, PodState,
        ScheduledCertainty, SetupProgress, UnfinalizedDose,
    };

    pub use crate::session::{
        CancelDeliveryResult, CommandSession, DeliveryCommandResult, DeliveryOptions,
        PodCommsError, PodCommsResult,
    };

    #[cfg(feature = "crypto")]
    pub use crate::pairing::ChannelKeyExchange;
    pub use crate::pairing::{KeyExchange, PairingError};

    pub use crate::comms::{PodComms, PodCommsBuilder, PodCommsConfig, SessionHandle};
}

// Re-export commonly used items at crate root
pub use crate::core::{Clock, MessageCipher, PodChannel, WriteOutcome};
pub use comms::{PodComms, PodCommsBuilder, PodCommsConfig, SessionHandle};
pub use pod::PodState;
pub use session::{CancelDeliveryResult, CommandSession, DeliveryCommandResult, PodCommsError};
