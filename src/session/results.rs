//! Three-way outcomes of delivery commands.
//!
//! A delivery command either certainly happened, certainly did not, or
//! left the pod in an unknown state. The last case must be reconciled with
//! a status query before the dose is trusted either way; treating it as a
//! plain failure can double-dose.

use std::fmt;

use crate::pod::UnfinalizedDose;
use crate::transport::StatusResponse;

use super::error::PodCommsError;

/// Outcome of a bolus or temp basal command.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryCommandResult {
    /// The pod accepted the command.
    Success(StatusResponse),
    /// The command did not take effect.
    CertainFailure(PodCommsError),
    /// The command may have taken effect.
    UncertainFailure(PodCommsError),
}

impl DeliveryCommandResult {
    /// Check if the command was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Check if the outcome still needs reconciling.
    pub fn is_uncertain(&self) -> bool {
        matches!(self, Self::UncertainFailure(_))
    }

    /// Status reported with the acceptance.
    pub fn status(&self) -> Option<&StatusResponse> {
        match self {
            Self::Success(status) => Some(status),
            _ => None,
        }
    }

    /// The failure, certain or not.
    pub fn error(&self) -> Option<&PodCommsError> {
        match self {
            Self::Success(_) => None,
            Self::CertainFailure(err) | Self::UncertainFailure(err) => Some(err),
        }
    }
}

/// Outcome of a cancel or suspend command.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelDeliveryResult {
    /// The pod stopped the requested delivery.
    Success {
        /// Status after the cancel.
        status: StatusResponse,
        /// Dose the cancel cut short, if any.
        canceled_dose: Option<UnfinalizedDose>,
    },
    /// Delivery was not stopped.
    CertainFailure(PodCommsError),
    /// Delivery may have been stopped.
    UncertainFailure(PodCommsError),
}

impl CancelDeliveryResult {
    /// Check if the cancel was accepted.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if the outcome still needs reconciling.
    pub fn is_uncertain(&self) -> bool {
        matches!(self, Self::UncertainFailure(_))
    }

    /// Status after the cancel, or the failure.
    pub fn into_status(self) -> Result<StatusResponse, PodCommsError> {
        match self {
            Self::Success { status, .. } => Ok(status),
            Self::CertainFailure(err) | Self::UncertainFailure(err) => Err(err),
        }
    }
}

impl fmt::Display for DeliveryCommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(status) => write!(f, "success ({:?})", status.delivery_status),
            Self::CertainFailure(err) => write!(f, "certain failure: {err}"),
            Self::UncertainFailure(err) => write!(f, "uncertain failure: {err}"),
        }
    }
}

impl fmt::Display for CancelDeliveryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success { status, canceled_dose } => match canceled_dose {
                Some(dose) => write!(f, "success ({:?}, canceled {dose})", status.delivery_status),
                None => write!(f, "success ({:?})", status.delivery_status),
            },
            Self::CertainFailure(err) => write!(f, "certain failure: {err}"),
            Self::UncertainFailure(err) => write!(f, "uncertain failure: {err}"),
        }
    }
}
