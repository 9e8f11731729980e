//! Message blocks.
//!
//! A message carries one or more blocks, each `type ‖ length ‖ body`
//! (the status response alone has no length byte).

mod commands;
pub mod insulin_table;
mod responses;

pub use commands::*;
pub use insulin_table::{InsulinTableEntry, RateEntry};
pub use responses::*;

use crate::core::MessageError;

/// Block type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageBlockType {
    /// Pod identity and firmware.
    VersionResponse = 0x01,
    /// Pod info, including detailed status.
    PodInfoResponse = 0x02,
    /// Final pairing step.
    SetupPod = 0x03,
    /// Command rejection.
    ErrorResponse = 0x06,
    /// Address assignment.
    AssignAddress = 0x07,
    /// Fault table configuration.
    FaultConfig = 0x08,
    /// Status request.
    GetStatus = 0x0E,
    /// Alert acknowledgement.
    AcknowledgeAlert = 0x11,
    /// Basal schedule pulse timing.
    BasalScheduleExtra = 0x13,
    /// Temp basal pulse timing.
    TempBasalExtra = 0x16,
    /// Bolus pulse timing.
    BolusExtra = 0x17,
    /// Alert configuration.
    ConfigureAlerts = 0x19,
    /// Delivery program.
    SetInsulinSchedule = 0x1A,
    /// Deactivation.
    DeactivatePod = 0x1C,
    /// Routine status.
    StatusResponse = 0x1D,
    /// Beep and reminder configuration.
    BeepConfig = 0x1E,
    /// Delivery cancellation.
    CancelDelivery = 0x1F,
}

impl MessageBlockType {
    /// Parse a block type byte.
    pub fn from_byte(byte: u8) -> Result<Self, MessageError> {
        Ok(match byte {
            0x01 => Self::VersionResponse,
            0x02 => Self::PodInfoResponse,
            0x03 => Self::SetupPod,
            0x06 => Self::ErrorResponse,
            0x07 => Self::AssignAddress,
            0x08 => Self::FaultConfig,
            0x0E => Self::GetStatus,
            0x11 => Self::AcknowledgeAlert,
            0x13 => Self::BasalScheduleExtra,
            0x16 => Self::TempBasalExtra,
            0x17 => Self::BolusExtra,
            0x19 => Self::ConfigureAlerts,
            0x1A => Self::SetInsulinSchedule,
            0x1C => Self::DeactivatePod,
            0x1D => Self::StatusResponse,
            0x1E => Self::BeepConfig,
            0x1F => Self::CancelDelivery,
            other => return Err(MessageError::UnknownBlockType(other)),
        })
    }
}

/// Any block that can appear in a message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageBlock {
    /// See [`VersionResponse`].
    VersionResponse(VersionResponse),
    /// See [`PodInfoResponse`].
    PodInfoResponse(PodInfoResponse),
    /// See [`SetupPodCommand`].
    SetupPod(SetupPodCommand),
    /// See [`ErrorResponse`].
    ErrorResponse(ErrorResponse),
    /// See [`AssignAddressCommand`].
    AssignAddress(AssignAddressCommand),
    /// See [`FaultConfigCommand`].
    FaultConfig(FaultConfigCommand),
    /// See [`GetStatusCommand`].
    GetStatus(GetStatusCommand),
    /// See [`AcknowledgeAlertCommand`].
    AcknowledgeAlert(AcknowledgeAlertCommand),
    /// See [`BasalScheduleExtraCommand`].
    BasalScheduleExtra(BasalScheduleExtraCommand),
    /// See [`TempBasalExtraCommand`].
    TempBasalExtra(TempBasalExtraCommand),
    /// See [`BolusExtraCommand`].
    BolusExtra(BolusExtraCommand),
    /// See [`ConfigureAlertsCommand`].
    ConfigureAlerts(ConfigureAlertsCommand),
    /// See [`SetInsulinScheduleCommand`].
    SetInsulinSchedule(SetInsulinScheduleCommand),
    /// See [`DeactivatePodCommand`].
    DeactivatePod(DeactivatePodCommand),
    /// See [`StatusResponse`].
    StatusResponse(StatusResponse),
    /// See [`BeepConfigCommand`].
    BeepConfig(BeepConfigCommand),
    /// See [`CancelDeliveryCommand`].
    CancelDelivery(CancelDeliveryCommand),
}

macro_rules! block_from {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for MessageBlock {
                fn from(block: $ty) -> Self {
                    MessageBlock::$variant(block)
                }
            }
        )*
    };
}

block_from! {
    VersionResponse => VersionResponse,
    PodInfoResponse => PodInfoResponse,
    SetupPod => SetupPodCommand,
    ErrorResponse => ErrorResponse,
    AssignAddress => AssignAddressCommand,
    FaultConfig => FaultConfigCommand,
    GetStatus => GetStatusCommand,
    AcknowledgeAlert => AcknowledgeAlertCommand,
    BasalScheduleExtra => BasalScheduleExtraCommand,
    TempBasalExtra => TempBasalExtraCommand,
    BolusExtra => BolusExtraCommand,
    ConfigureAlerts => ConfigureAlertsCommand,
    SetInsulinSchedule => SetInsulinScheduleCommand,
    DeactivatePod => DeactivatePodCommand,
    StatusResponse => StatusResponse,
    BeepConfig => BeepConfigCommand,
    CancelDelivery => CancelDeliveryCommand,
}

impl MessageBlock {
    /// Type byte of this block.
    pub fn block_type(&self) -> MessageBlockType {
        match self {
            Self::VersionResponse(_) => MessageBlockType::VersionResponse,
            Self::PodInfoResponse(_) => MessageBlockType::PodInfoResponse,
            Self::SetupPod(_) => MessageBlockType::SetupPod,
            Self::ErrorResponse(_) => MessageBlockType::ErrorResponse,
            Self::AssignAddress(_) => MessageBlockType::AssignAddress,
            Self::FaultConfig(_) => MessageBlockType::FaultConfig,
            Self::GetStatus(_) => MessageBlockType::GetStatus,
            Self::AcknowledgeAlert(_) => MessageBlockType::AcknowledgeAlert,
            Self::BasalScheduleExtra(_) => MessageBlockType::BasalScheduleExtra,
            Self::TempBasalExtra(_) => MessageBlockType::TempBasalExtra,
            Self::BolusExtra(_) => MessageBlockType::BolusExtra,
            Self::ConfigureAlerts(_) => MessageBlockType::ConfigureAlerts,
            Self::SetInsulinSchedule(_) => MessageBlockType::SetInsulinSchedule,
            Self::DeactivatePod(_) => MessageBlockType::DeactivatePod,
            Self::StatusResponse(_) => MessageBlockType::StatusResponse,
            Self::BeepConfig(_) => MessageBlockType::BeepConfig,
            Self::CancelDelivery(_) => MessageBlockType::CancelDelivery,
        }
    }

    /// Encode to block bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::VersionResponse(b) => b.encode(),
            Self::PodInfoResponse(b) => b.encode(),
            Self::SetupPod(b) => b.encode(),
            Self::ErrorResponse(b) => b.encode(),
            Self::AssignAddress(b) => b.encode(),
            Self::FaultConfig(b) => b.encode(),
            Self::GetStatus(b) => b.encode(),
            Self::AcknowledgeAlert(b) => b.encode(),
            Self::BasalScheduleExtra(b) => b.encode(),
            Self::TempBasalExtra(b) => b.encode(),
            Self::BolusExtra(b) => b.encode(),
            Self::ConfigureAlerts(b) => b.encode(),
            Self::SetInsulinSchedule(b) => b.encode(),
            Self::DeactivatePod(b) => b.encode(),
            Self::StatusResponse(b) => b.encode(),
            Self::BeepConfig(b) => b.encode(),
            Self::CancelDelivery(b) => b.encode(),
        }
    }

    /// Decode the block at the start of `data`.
    ///
    /// Returns the block and the number of bytes it occupied.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), MessageError> {
        let block_type = MessageBlockType::from_byte(*data.first().ok_or(MessageError::NotEnoughData)?)?;
        let length = match block_type {
            MessageBlockType::StatusResponse => 10,
            _ => usize::from(*data.get(1).ok_or(MessageError::NotEnoughData)?) + 2,
        };
        let data = data.get(..length).ok_or(MessageError::NotEnoughData)?;

        let block = match block_type {
            MessageBlockType::VersionResponse => VersionResponse::decode(data)?.into(),
            MessageBlockType::PodInfoResponse => PodInfoResponse::decode(data)?.into(),
            MessageBlockType::SetupPod => SetupPodCommand::decode(data)?.into(),
            MessageBlockType::ErrorResponse => ErrorResponse::decode(data)?.into(),
            MessageBlockType::AssignAddress => AssignAddressCommand::decode(data)?.into(),
            MessageBlockType::FaultConfig => FaultConfigCommand::decode(data)?.into(),
            MessageBlockType::GetStatus => GetStatusCommand::decode(data)?.into(),
            MessageBlockType::AcknowledgeAlert => AcknowledgeAlertCommand::decode(data)?.into(),
            MessageBlockType::BasalScheduleExtra => BasalScheduleExtraCommand::decode(data)?.into(),
            MessageBlockType::TempBasalExtra => TempBasalExtraCommand::decode(data)?.into(),
            MessageBlockType::BolusExtra => BolusExtraCommand::decode(data)?.into(),
            MessageBlockType::ConfigureAlerts => ConfigureAlertsCommand::decode(data)?.into(),
            MessageBlockType::SetInsulinSchedule => SetInsulinScheduleCommand::decode(data)?.into(),
            MessageBlockType::DeactivatePod => DeactivatePodCommand::decode(data)?.into(),
            MessageBlockType::StatusResponse => StatusResponse::decode(data)?.into(),
            MessageBlockType::BeepConfig => BeepConfigCommand::decode(data)?.into(),
            MessageBlockType::CancelDelivery => CancelDeliveryCommand::decode(data)?.into(),
        };
        Ok((block, length))
    }

    /// Nonce carried by this block, if it carries one.
    pub fn nonce(&self) -> Option<u32> {
        match self {
            Self::SetInsulinSchedule(b) => Some(b.nonce),
            Self::CancelDelivery(b) => Some(b.nonce),
            Self::ConfigureAlerts(b) => Some(b.nonce),
            Self::AcknowledgeAlert(b) => Some(b.nonce),
            Self::DeactivatePod(b) => Some(b.nonce),
            Self::FaultConfig(b) => Some(b.nonce),
            _ => None,
        }
    }

    /// Replace the nonce; no-op for blocks without one.
    pub fn set_nonce(&mut self, nonce: u32) {
        match self {
            Self::SetInsulinSchedule(b) => b.nonce = nonce,
            Self::CancelDelivery(b) => b.nonce = nonce,
            Self::ConfigureAlerts(b) => b.nonce = nonce,
            Self::AcknowledgeAlert(b) => b.nonce = nonce,
            Self::DeactivatePod(b) => b.nonce = nonce,
            Self::FaultConfig(b) => b.nonce = nonce,
            _ => {}
        }
    }

    /// Check if this block carries a nonce the pod can reject.
    pub fn is_nonce_resyncable(&self) -> bool {
        self.nonce().is_some()
    }
}

/// A block type a command session can expect as its reply.
pub trait ResponseBlock: Sized {
    /// Type byte of the expected block.
    const BLOCK_TYPE: MessageBlockType;

    /// Take the expected block out of a decoded one.
    fn from_block(block: MessageBlock) -> Option<Self>;
}

impl ResponseBlock for StatusResponse {
    const BLOCK_TYPE: MessageBlockType = MessageBlockType::StatusResponse;

    fn from_block(block: MessageBlock) -> Option<Self> {
        match block {
            MessageBlock::StatusResponse(status) => Some(status),
            _ => None,
        }
    }
}

impl ResponseBlock for VersionResponse {
    const BLOCK_TYPE: MessageBlockType = MessageBlockType::VersionResponse;

    fn from_block(block: MessageBlock) -> Option<Self> {
        match block {
            MessageBlock::VersionResponse(version) => Some(version),
            _ => None,
        }
    }
}

impl ResponseBlock for PodInfoResponse {
    const BLOCK_TYPE: MessageBlockType = MessageBlockType::PodInfoResponse;

    fn from_block(block: MessageBlock) -> Option<Self> {
        match block {
            MessageBlock::PodInfoResponse(info) => Some(info),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::{BeepType, DeliveryType};

    #[test]
    fn test_decode_reports_consumed_length() {
        let data = hex::decode("1d18003f1800004297ff0e0100").unwrap();
        let (first, used) = MessageBlock::decode(&data).unwrap();
        assert_eq!(first.block_type(), MessageBlockType::StatusResponse);
        assert_eq!(used, 10);
        let (second, used) = MessageBlock::decode(&data[10..]).unwrap();
        assert_eq!(second.block_type(), MessageBlockType::GetStatus);
        assert_eq!(used, 3);
    }

    #[test]
    fn test_unknown_block_type() {
        assert_eq!(
            MessageBlock::decode(&[0x42, 0x00]).unwrap_err(),
            MessageError::UnknownBlockType(0x42)
        );
    }

    #[test]
    fn test_truncated_block() {
        assert_eq!(
            MessageBlock::decode(&hex::decode("1f05f76d34").unwrap()).unwrap_err(),
            MessageError::NotEnoughData
        );
    }

    #[test]
    fn test_nonce_patching() {
        let mut block: MessageBlock = CancelDeliveryCommand {
            nonce: 1,
            delivery_type: DeliveryType::BOLUS,
            beep_type: BeepType::NoBeepCancel,
        }
        .into();
        assert!(block.is_nonce_resyncable());
        block.set_nonce(0xdeadbeef);
        assert_eq!(block.nonce(), Some(0xdeadbeef));

        let mut status: MessageBlock = GetStatusCommand {
            pod_info_type: PodInfoType::Normal,
        }
        .into();
        assert!(!status.is_nonce_resyncable());
        status.set_nonce(7);
        assert_eq!(status.nonce(), None);
    }
}
