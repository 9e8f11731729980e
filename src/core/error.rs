//! Error types shared across the protocol layers.

use thiserror::Error;

/// Errors reported by the reliable channel underneath the transport.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// No reply arrived within the channel's own timeout.
    #[error("channel timed out")]
    Timeout,

    /// The peer disconnected.
    #[error("peer disconnected")]
    Disconnected,

    /// The peer acknowledged the write with an error status.
    #[error("write rejected with status {0}")]
    WriteRejected(u8),

    /// Any other native error, carried as text.
    #[error("channel i/o error: {0}")]
    Io(String),
}

/// Errors in the crypto layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// AEAD encryption failed.
    #[error("AEAD encryption failed")]
    EncryptionFailed,

    /// AEAD decryption failed (invalid tag or corrupted).
    #[error("AEAD decryption failed (invalid tag or corrupted)")]
    DecryptionFailed,

    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Key material has the wrong length or is otherwise unusable.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(&'static str),
}

/// Errors decoding pod messages, blocks and packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// Input ended before the structure was complete.
    #[error("not enough data")]
    NotEnoughData,

    /// Message CRC did not match.
    #[error("invalid CRC: expected {expected:#06x}, got {actual:#06x}")]
    InvalidCrc {
        /// CRC computed over the received bytes.
        expected: u16,
        /// CRC carried by the message.
        actual: u16,
    },

    /// Block type byte is not one this engine understands.
    #[error("unknown block type {0:#04x}")]
    UnknownBlockType(u8),

    /// A field held a value outside its enumeration.
    #[error("unknown value {value:#04x} for {type_name}")]
    UnknownValue {
        /// Raw value received.
        value: u8,
        /// Name of the type being decoded.
        type_name: &'static str,
    },

    /// A string-length-prefixed key was missing.
    #[error("missing prefix {0:?}")]
    MissingPrefix(&'static str),

    /// Packet did not start with the magic pattern.
    #[error("magic pattern mismatch")]
    MagicMismatch,

    /// Packet header carried a version this engine does not speak.
    #[error("unsupported packet version {0}")]
    UnsupportedVersion(u8),

    /// A command's embedded checksum did not match its contents.
    #[error("invalid checksum: expected {expected:#06x}, got {actual:#06x}")]
    InvalidChecksum {
        /// Checksum computed over the received fields.
        expected: u16,
        /// Checksum carried by the command.
        actual: u16,
    },

    /// Payload too large for the packet size field.
    #[error("payload of {0} bytes does not fit in a packet")]
    PayloadTooLarge(usize),
}

/// Errors loading or storing persisted state.
#[derive(Debug, Error)]
pub enum PersistError {
    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Persisted record carries a schema version newer than this build.
    #[error("unsupported persisted schema version {0}")]
    UnsupportedVersion(u32),
}

impl ChannelError {
    /// Check if the channel dropped the link entirely.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ChannelError::Disconnected)
    }
}
