//! Delivery commands whose outcome the pod has not confirmed.
//!
//! A delivery command is recorded here right before it is written to the
//! channel. If the exchange breaks off after the write, the record survives
//! (and is persisted) so the next status response can tell whether the pod
//! acted on it: the pod reports the message number of the last programming
//! command it accepted.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use super::dose::DoseProgram;
use super::status::DeliveryType;

/// A delivery command awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PendingCommand {
    /// Start a bolus, temp basal or basal program.
    Program {
        /// What was started.
        program: DoseProgram,
        /// Message number the command was sent with.
        message_number: u8,
        /// When the command was issued.
        command_date: SystemTime,
        /// The exchange is still on the wire.
        in_flight: bool,
    },
    /// Stop the delivery kinds in the mask.
    StopProgram {
        /// Delivery kinds being stopped.
        stop: DeliveryType,
        /// Message number the command was sent with.
        message_number: u8,
        /// When the command was issued.
        command_date: SystemTime,
        /// The exchange is still on the wire.
        in_flight: bool,
    },
}

impl PendingCommand {
    /// A start command about to be written.
    pub fn program(program: DoseProgram, message_number: u8, command_date: SystemTime) -> Self {
        PendingCommand::Program {
            program,
            message_number,
            command_date,
            in_flight: true,
        }
    }

    /// A stop command about to be written.
    pub fn stop_program(stop: DeliveryType, message_number: u8, command_date: SystemTime) -> Self {
        PendingCommand::StopProgram {
            stop,
            message_number,
            command_date,
            in_flight: true,
        }
    }

    /// Message number the command was sent with.
    pub fn sequence(&self) -> u8 {
        match self {
            PendingCommand::Program { message_number, .. }
            | PendingCommand::StopProgram { message_number, .. } => *message_number,
        }
    }

    /// When the command was issued.
    pub fn command_date(&self) -> SystemTime {
        match self {
            PendingCommand::Program { command_date, .. }
            | PendingCommand::StopProgram { command_date, .. } => *command_date,
        }
    }

    /// Check if the exchange is still on the wire.
    pub fn is_in_flight(&self) -> bool {
        match self {
            PendingCommand::Program { in_flight, .. }
            | PendingCommand::StopProgram { in_flight, .. } => *in_flight,
        }
    }

    /// The same command with the exchange marked as over.
    pub fn comms_finished(self) -> Self {
        match self {
            PendingCommand::Program {
                program,
                message_number,
                command_date,
                ..
            } => PendingCommand::Program {
                program,
                message_number,
                command_date,
                in_flight: false,
            },
            PendingCommand::StopProgram {
                stop,
                message_number,
                command_date,
                ..
            } => PendingCommand::StopProgram {
                stop,
                message_number,
                command_date,
                in_flight: false,
            },
        }
    }
}

impl fmt::Display for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingCommand::Program {
                program,
                message_number,
                ..
            } => write!(f, "Program({program:?}, seq {message_number})"),
            PendingCommand::StopProgram {
                stop,
                message_number,
                ..
            } => write!(f, "StopProgram({:#04x}, seq {message_number})", stop.bits()),
        }
    }
}
