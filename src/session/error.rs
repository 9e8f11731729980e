//! Session and orchestrator error types.

use thiserror::Error;

use crate::core::ChannelError;
use crate::pairing::PairingError;
use crate::pod::{DetailedStatus, SetupProgress};
use crate::transport::{MessageBlockType, TransportError};

/// Errors raised by command sessions and the pod orchestrator.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PodCommsError {
    /// No pod is paired.
    #[error("no pod paired")]
    NoPodPaired,

    /// The pod is not connected.
    #[error("pod not connected")]
    PodNotConnected,

    /// Data from the pod could not be interpreted.
    #[error("invalid data")]
    InvalidData,

    /// The pod did not answer.
    #[error("no response from pod")]
    NoResponse,

    /// The pod answered with a block the command does not expect.
    #[error("unexpected response {0:?}")]
    UnexpectedResponse(MessageBlockType),

    /// The pod reported a different address than expected.
    #[error("invalid address {address:#010x}, expected {expected:#010x}")]
    InvalidAddress {
        /// Address the pod reported.
        address: u32,
        /// Address the controller expected.
        expected: u32,
    },

    /// A bolus is still running.
    #[error("bolus in progress")]
    UnfinalizedBolus,

    /// A temp basal is still running.
    #[error("temp basal in progress")]
    UnfinalizedTempBasal,

    /// The pod rejected the nonce again after a resync.
    #[error("nonce resync failed")]
    NonceResyncFailed,

    /// Delivery is suspended.
    #[error("pod is suspended")]
    PodSuspended,

    /// The pod faulted.
    #[error("pod fault {}", .0.fault_event_code)]
    PodFault(Box<DetailedStatus>),

    /// The channel refused the command; it never reached the pod.
    #[error("comms error: {0}")]
    CommsError(ChannelError),

    /// The command may or may not have reached the pod.
    #[error("unacknowledged message (seq {sequence}): {cause}")]
    UnacknowledgedMessage {
        /// Protocol message number of the command.
        sequence: u8,
        /// What went wrong after the write.
        cause: String,
    },

    /// A previous delivery command still awaits confirmation.
    #[error("unacknowledged command pending")]
    UnacknowledgedCommandPending,

    /// The pod rejected the command.
    #[error("command rejected with code {0:#04x}")]
    RejectedMessage(u8),

    /// Setup did not finish within the activation window.
    #[error("activation time exceeded")]
    ActivationTimeExceeded,

    /// Unexpected condition with a description.
    #[error("{0}")]
    DiagnosticMessage(String),

    /// The pod reported constants this controller cannot drive.
    #[error("pod incompatible: {0}")]
    PodIncompatible(String),

    /// Delivery commands need a completed setup.
    #[error("pod setup not complete")]
    SetupNotComplete,

    /// A setup step was requested after setup moved past it.
    #[error("setup already at {0:?}")]
    SetupStepPassed(SetupProgress),

    /// Other transport failure.
    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Pairing or session negotiation failed.
    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    /// Missing or invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<TransportError> for PodCommsError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => PodCommsError::PodNotConnected,
            TransportError::CommsError(cause) => PodCommsError::CommsError(cause),
            TransportError::UnacknowledgedMessage { sequence, cause } => {
                PodCommsError::UnacknowledgedMessage { sequence, cause }
            }
            other => PodCommsError::Transport(other),
        }
    }
}

impl PodCommsError {
    /// Check if the pod can no longer be driven.
    pub fn is_fault_or_terminal(&self) -> bool {
        matches!(
            self,
            PodCommsError::PodFault(_)
                | PodCommsError::ActivationTimeExceeded
                | PodCommsError::PodIncompatible(_)
        )
    }

    /// Check if the command definitely did not reach the pod.
    pub fn is_certain_failure(&self) -> bool {
        matches!(
            self,
            PodCommsError::PodNotConnected | PodCommsError::CommsError(_)
        )
    }

    /// Check if whether the pod acted on the command is unknown.
    pub fn is_uncertain(&self) -> bool {
        matches!(
            self,
            PodCommsError::UnacknowledgedMessage { .. }
                | PodCommsError::Transport(TransportError::InvalidSequence { .. })
        )
    }

    /// Check if the pod refused the command outright.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PodCommsError::NonceResyncFailed | PodCommsError::RejectedMessage(_)
        )
    }
}

/// Result type for session operations.
pub type PodCommsResult<T> = Result<T, PodCommsError>;
