//! Collaborator traits.
//!
//! The engine owns no radio, no cipher implementation and no wall clock of
//! its own. These traits are the seams where those are plugged in:
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  CommandSession / PodComms   │
//! ├──────────────────────────────┤
//! │  MessageTransport            │──► MessageCipher
//! ├──────────────────────────────┤
//! │  PodChannel (reliable link)  │
//! └──────────────────────────────┘
//!              Clock ◄── dose timestamps, prime/insertion waits
//! ```

use std::future::Future;
use std::time::SystemTime;

use super::constants::NONCE_PREFIX_SIZE;
use super::error::{ChannelError, CryptoError};

/// Outcome of writing one frame to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The peer acknowledged the frame.
    AckedOk,
    /// The frame went out but the peer's acknowledgement carried an error.
    /// Whether the pod acted on it is unknown.
    AckedWithError(ChannelError),
    /// The frame never left the controller.
    Unacked(ChannelError),
}

/// Reliable, ordered frame delivery to one pod.
///
/// `read` has an implicit per-call timeout and yields `None` when it expires
/// or the link drops.
pub trait PodChannel: Send {
    /// Check if the link is currently up.
    fn is_connected(&self) -> bool;

    /// Bring the link up.
    fn connect(&mut self) -> impl Future<Output = Result<(), ChannelError>> + Send;

    /// Write one frame.
    fn write(&mut self, frame: Vec<u8>) -> impl Future<Output = WriteOutcome> + Send;

    /// Read one frame.
    fn read(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

/// Source of wall-clock time for dose bookkeeping.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> SystemTime;
}

/// [`Clock`] backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Per-packet nonce material handed to the cipher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketNonce {
    /// Controller IV followed by pod IV, fixed for the session.
    pub prefix: [u8; NONCE_PREFIX_SIZE],
    /// Transport nonce sequence counter.
    pub sequence: u64,
    /// Which side produced the packet.
    pub direction: u8,
}

/// Symmetric authenticated cipher used for every encrypted packet.
///
/// `key` is the 16-byte session confidentiality key; `aad` is the packet
/// header, which travels in the clear but is authenticated.
pub trait MessageCipher: Send + Sync {
    /// Encrypt and authenticate `plaintext`.
    fn encrypt(
        &self,
        key: &[u8],
        nonce: &PacketNonce,
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Verify and decrypt `ciphertext`.
    fn decrypt(
        &self,
        key: &[u8],
        nonce: &PacketNonce,
        aad: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;
}
