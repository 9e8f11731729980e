//! Transport layer error types.
//!
//! Everything here surfaces to the session layer unchanged; the transport
//! never retries on its own.

use thiserror::Error;

use crate::core::{ChannelError, CryptoError, MessageError};

/// Message transport errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The channel is not connected.
    #[error("pod not connected")]
    NotConnected,

    /// The command may or may not have reached the pod.
    ///
    /// Raised when the write went out but no usable reply came back, or when
    /// the write itself was acknowledged with an error.
    #[error("unacknowledged message (seq {sequence}): {cause}")]
    UnacknowledgedMessage {
        /// Protocol message number of the command.
        sequence: u8,
        /// What went wrong after the write.
        cause: String,
    },

    /// The channel refused the write; the command never left.
    #[error("comms error: {0}")]
    CommsError(ChannelError),

    /// Reply carried a different protocol message number than expected.
    #[error("invalid sequence: expected {expected}, got {actual}")]
    InvalidSequence {
        /// Message number the controller expected.
        expected: u8,
        /// Message number carried by the reply.
        actual: u8,
    },

    /// Read timed out, the link dropped, or the reply acknowledgement failed.
    #[error("i/o exception: {0}")]
    IoException(String),

    /// Packet encryption or decryption failed.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Reply could not be decoded.
    #[error("message error: {0}")]
    Message(#[from] MessageError),
}

impl TransportError {
    /// Check if the command definitely did not reach the pod.
    pub fn is_certain_failure(&self) -> bool {
        matches!(
            self,
            TransportError::NotConnected | TransportError::CommsError(_)
        )
    }

    /// Check if the link is gone and must be re-established.
    pub fn is_fatal(&self) -> bool {
        match self {
            TransportError::NotConnected => true,
            TransportError::CommsError(cause) => cause.is_disconnect(),
            _ => false,
        }
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_certain_failures() {
        assert!(TransportError::NotConnected.is_certain_failure());
        assert!(TransportError::CommsError(ChannelError::Timeout).is_certain_failure());

        assert!(
            !TransportError::UnacknowledgedMessage {
                sequence: 3,
                cause: "no response".into()
            }
            .is_certain_failure()
        );
        assert!(!TransportError::IoException("timeout".into()).is_certain_failure());
        assert!(
            !TransportError::InvalidSequence {
                expected: 1,
                actual: 2
            }
            .is_certain_failure()
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(TransportError::NotConnected.is_fatal());
        assert!(TransportError::CommsError(ChannelError::Disconnected).is_fatal());
        assert!(!TransportError::CommsError(ChannelError::Timeout).is_fatal());
        assert!(!TransportError::Crypto(CryptoError::DecryptionFailed).is_fatal());
    }

    #[test]
    fn test_from_conversions() {
        let err: TransportError = MessageError::NotEnoughData.into();
        assert_eq!(err, TransportError::Message(MessageError::NotEnoughData));
        assert_eq!(
            err.to_string(),
            "message error: not enough data"
        );
    }
}
