//! Pod message codec.
//!
//! ```text
//! +-----------+----+-----+--------+---------+
//! | address   | b9 | len | blocks | crc16   |
//! | 4 (BE32)  | 1  | 1   | len    | 2 (BE)  |
//! +-----------+----+-----+--------+---------+
//!
//! b9: follow-on bit 7, sequence bits 5..2, length bits 9..8 in bits 1..0
//! ```

use std::fmt;

use crate::core::MessageError;
use crate::crypto::crc16;
use crate::pod::DetailedStatus;

use super::blocks::{MessageBlock, PodInfoResponse};

const MIN_MESSAGE_LENGTH: usize = 10;

/// One message to or from the pod.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Pod address.
    pub address: u32,
    /// Blocks, in order.
    pub message_blocks: Vec<MessageBlock>,
    /// Protocol message number, 4 bits.
    pub sequence_num: u8,
    /// More messages follow.
    pub expect_follow_on: bool,
}

impl Message {
    /// Create a message.
    pub fn new(address: u32, message_blocks: Vec<MessageBlock>, sequence_num: u8) -> Self {
        Self {
            address,
            message_blocks,
            sequence_num: sequence_num & 0x0F,
            expect_follow_on: false,
        }
    }

    /// Encode, appending the CRC.
    pub fn encode(&self) -> Vec<u8> {
        let body: Vec<u8> = self.message_blocks.iter().flat_map(MessageBlock::encode).collect();
        let length = body.len();

        let mut out = Vec::with_capacity(length + 8);
        out.extend_from_slice(&self.address.to_be_bytes());
        out.push(
            (u8::from(self.expect_follow_on) << 7)
                | ((self.sequence_num & 0x0F) << 2)
                | ((length >> 8) & 0x03) as u8,
        );
        out.push(length as u8);
        out.extend_from_slice(&body);
        out.extend_from_slice(&crc16(&out).to_be_bytes());
        out
    }

    /// Decode a message.
    ///
    /// The CRC is only verified when `check_crc` is set.
    pub fn decode(data: &[u8], check_crc: bool) -> Result<Self, MessageError> {
        if data.len() < MIN_MESSAGE_LENGTH {
            return Err(MessageError::NotEnoughData);
        }
        let b9 = data[4];
        let body_length = (usize::from(b9 & 0x03) << 8) | usize::from(data[5]);
        if body_length > data.len() - 8 {
            return Err(MessageError::NotEnoughData);
        }

        let crc_at = data.len() - 2;
        if check_crc {
            let expected = crc16(&data[..crc_at]);
            let actual = u16::from_be_bytes([data[crc_at], data[crc_at + 1]]);
            if expected != actual {
                return Err(MessageError::InvalidCrc { expected, actual });
            }
        }

        let mut message_blocks = Vec::new();
        let mut pos = 6;
        while pos < crc_at {
            let (block, used) = MessageBlock::decode(&data[pos..crc_at])?;
            message_blocks.push(block);
            pos += used;
        }

        Ok(Self {
            address: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
            message_blocks,
            sequence_num: (b9 >> 2) & 0x0F,
            expect_follow_on: b9 & 0x80 != 0,
        })
    }

    /// Detailed status of a faulted pod, if that is what this message reports.
    pub fn fault(&self) -> Option<&DetailedStatus> {
        match self.message_blocks.first() {
            Some(MessageBlock::PodInfoResponse(PodInfoResponse::DetailedStatus(status)))
                if status.is_faulted() =>
            {
                Some(status)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Message({:08x} seq:{} [", self.address, self.sequence_num)?;
        for (i, block) in self.message_blocks.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", block.block_type())?;
        }
        write!(f, "])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pod::{DeliveryStatus, PodProgressStatus};
    use crate::transport::blocks::{GetStatusCommand, PodInfoType};

    #[test]
    fn test_encode_get_status() {
        let message = Message::new(
            0x1f01482a,
            vec![GetStatusCommand {
                pod_info_type: PodInfoType::Normal,
            }
            .into()],
            4,
        );
        assert_eq!(hex::encode(message.encode()), "1f01482a10030e0100802c");
        assert_eq!(Message::decode(&message.encode(), true).unwrap(), message);
    }

    #[test]
    fn test_decode_status_response() {
        let data = hex::decode("1f00ee84300a1d18003f1800004297ff8128").unwrap();
        let message = Message::decode(&data, false).unwrap();
        assert_eq!(message.address, 0x1f00ee84);
        assert_eq!(message.sequence_num, 12);
        assert!(message.fault().is_none());
        match &message.message_blocks[0] {
            MessageBlock::StatusResponse(status) => {
                assert_eq!(status.delivery_status, DeliveryStatus::ScheduledBasal);
                assert_eq!(status.pod_progress_status, PodProgressStatus::AboveFiftyUnits);
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn test_crc_check_is_optional() {
        let mut data = hex::decode("1f01482a10030e0100802c").unwrap();
        data[10] ^= 0xFF;
        assert!(matches!(
            Message::decode(&data, true),
            Err(MessageError::InvalidCrc { .. })
        ));
        assert!(Message::decode(&data, false).is_ok());
    }

    #[test]
    fn test_decode_version_response_message() {
        let data = hex::decode(
            "ffffffff0c1d011b13881008340a50031b0008080004030812a011000c175717244389816c",
        )
        .unwrap();
        let message = Message::decode(&data, false).unwrap();
        assert_eq!(message.sequence_num, 3);
        assert!(matches!(
            message.message_blocks[0],
            MessageBlock::VersionResponse(_)
        ));
    }

    #[test]
    fn test_decode_short_input() {
        assert_eq!(
            Message::decode(&[0; 9], false).unwrap_err(),
            MessageError::NotEnoughData
        );
    }
}
