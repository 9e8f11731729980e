//! Cryptographic building blocks.
//!
//! - [`nonce`]: the deterministic per-command nonce generator shared with the
//!   pod, and the CRC-16 table used by message framing and nonce resync.
//! - `aead` (feature `crypto`): the session packet cipher.
//! - `keys` (feature `crypto`): pairing key agreement and session key
//!   derivation.

pub mod nonce;

#[cfg(feature = "crypto")]
pub mod aead;
#[cfg(feature = "crypto")]
pub mod keys;

pub use nonce::{crc16, NonceState, CRC16_TABLE};

#[cfg(feature = "crypto")]
pub use aead::{ChaChaCipher, SessionKey};
#[cfg(feature = "crypto")]
pub use keys::{derive_ltk, derive_session_keys, PairingKeypair, SessionKeys};
