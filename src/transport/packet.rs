//! Packet framing.
//!
//! Every frame on the channel is one packet: a 16-byte clear header followed
//! by the payload (ciphertext plus tag for encrypted packets).
//!
//! ```text
//! +------+----+----+-----+-----+----------+-----------+-----------+---------+
//! | "TW" | f1 | f2 | seq | ack | size(11) | source    | dest      | payload |
//! | 2    | 1  | 1  | 1   | 1   | 2        | 4 (BE32)  | 4 (BE32)  | ...     |
//! +------+----+----+-----+-----+----------+-----------+-----------+---------+
//!
//! f1: version bits 0..2, sas bit 3, tfs bit 4, eqos bits 5..7
//! f2: ack bit 0, priority bit 1, last message bit 2, gateway bit 3, type bits 4..7
//! ```

use crate::core::{MessageError, MAX_PACKET_PAYLOAD, PACKET_HEADER_SIZE, PACKET_MAGIC};

/// Packet type carried in the high nibble of the second flag byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Unencrypted packet; used for transport acknowledgements.
    Clear = 0,
    /// Encrypted command or response.
    Encrypted = 1,
    /// Session-key negotiation.
    SessionEstablishment = 2,
    /// Pairing key agreement.
    Pairing = 3,
}

impl PacketType {
    /// Parse a packet type from its nibble.
    pub fn from_nibble(nibble: u8) -> Option<Self> {
        match nibble {
            0 => Some(Self::Clear),
            1 => Some(Self::Encrypted),
            2 => Some(Self::SessionEstablishment),
            3 => Some(Self::Pairing),
            _ => None,
        }
    }

    /// Get the nibble value.
    pub fn as_nibble(self) -> u8 {
        self as u8
    }
}

/// One channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePacket {
    /// Packet type.
    pub packet_type: PacketType,
    /// Sender id.
    pub source: u32,
    /// Receiver id.
    pub destination: u32,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Packet sequence number.
    pub sequence_number: u8,
    /// Whether this packet acknowledges `ack_number`.
    pub ack: bool,
    /// Sequence number being acknowledged.
    pub ack_number: u8,
    /// Encryption quality-of-service; 1 for encrypted traffic.
    pub eqos: u8,
    /// Priority flag.
    pub priority: bool,
    /// Last packet of a message.
    pub last_message: bool,
    /// Gateway flag.
    pub gateway: bool,
    /// Source address set flag.
    pub sas: bool,
    /// Transport flow flag.
    pub tfs: bool,
    /// Header version; always 0.
    pub version: u8,
}

impl MessagePacket {
    /// Create a packet with default flags.
    pub fn new(
        packet_type: PacketType,
        source: u32,
        destination: u32,
        sequence_number: u8,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            packet_type,
            source,
            destination,
            payload,
            sequence_number,
            ack: false,
            ack_number: 0,
            eqos: 0,
            priority: false,
            last_message: false,
            gateway: false,
            sas: true,
            tfs: false,
            version: 0,
        }
    }

    /// Serialize just the header; this is the AAD for encrypted packets.
    pub fn header(&self) -> Result<[u8; PACKET_HEADER_SIZE], MessageError> {
        let size = self.payload.len();
        if size > MAX_PACKET_PAYLOAD {
            return Err(MessageError::PayloadTooLarge(size));
        }

        let mut buf = [0u8; PACKET_HEADER_SIZE];
        buf[..2].copy_from_slice(PACKET_MAGIC);
        buf[2] = (self.version & 0x07)
            | (u8::from(self.sas) << 3)
            | (u8::from(self.tfs) << 4)
            | ((self.eqos & 0x07) << 5);
        buf[3] = u8::from(self.ack)
            | (u8::from(self.priority) << 1)
            | (u8::from(self.last_message) << 2)
            | (u8::from(self.gateway) << 3)
            | (self.packet_type.as_nibble() << 4);
        buf[4] = self.sequence_number;
        buf[5] = self.ack_number;
        buf[6] = (size >> 3) as u8;
        buf[7] = ((size & 0x07) << 5) as u8;
        buf[8..12].copy_from_slice(&self.source.to_be_bytes());
        buf[12..16].copy_from_slice(&self.destination.to_be_bytes());
        Ok(buf)
    }

    /// Serialize header and payload.
    pub fn encode(&self) -> Result<Vec<u8>, MessageError> {
        let header = self.header()?;
        let mut out = Vec::with_capacity(PACKET_HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.payload);
        Ok(out)
    }

    /// Parse a frame.
    pub fn parse(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < PACKET_HEADER_SIZE {
            return Err(MessageError::NotEnoughData);
        }
        if &data[..2] != PACKET_MAGIC {
            return Err(MessageError::MagicMismatch);
        }

        let f1 = data[2];
        let f2 = data[3];
        let version = f1 & 0x07;
        if version != 0 {
            return Err(MessageError::UnsupportedVersion(version));
        }

        let type_nibble = f2 >> 4;
        let packet_type = PacketType::from_nibble(type_nibble).ok_or(MessageError::UnknownValue {
            value: type_nibble,
            type_name: "PacketType",
        })?;

        let size = (usize::from(data[6]) << 3) | (usize::from(data[7]) >> 5);
        let end = PACKET_HEADER_SIZE + size;
        if data.len() < end {
            return Err(MessageError::NotEnoughData);
        }

        Ok(Self {
            packet_type,
            source: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            destination: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            payload: data[PACKET_HEADER_SIZE..end].to_vec(),
            sequence_number: data[4],
            ack: f2 & 0x01 != 0,
            ack_number: data[5],
            eqos: (f1 >> 5) & 0x07,
            priority: f2 & 0x02 != 0,
            last_message: f2 & 0x04 != 0,
            gateway: f2 & 0x08 != 0,
            sas: f1 & 0x08 != 0,
            tfs: f1 & 0x10 != 0,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let mut packet = MessagePacket::new(
            PacketType::Encrypted,
            0x1700_0000,
            0x1700_0001,
            0x2a,
            vec![0xAB; 300],
        );
        packet.eqos = 1;
        packet.ack = true;
        packet.ack_number = 0x11;

        let header = packet.header().unwrap();
        assert_eq!(&header[..2], b"TW");
        assert_eq!(header[2], 0b0010_1000);
        assert_eq!(header[3], 0b0001_0001);
        assert_eq!(header[4], 0x2a);
        assert_eq!(header[5], 0x11);
        assert_eq!(header[6], (300 >> 3) as u8);
        assert_eq!(header[7], ((300 & 7) << 5) as u8);
        assert_eq!(&header[8..12], &[0x17, 0, 0, 0]);
        assert_eq!(&header[12..16], &[0x17, 0, 0, 1]);
    }

    #[test]
    fn test_parse_encoded() {
        let mut packet = MessagePacket::new(PacketType::Pairing, 1, 2, 255, b"SP1=".to_vec());
        packet.last_message = true;
        packet.gateway = true;

        let parsed = MessagePacket::parse(&packet.encode().unwrap()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_parse_rejects_bad_magic() {
        let mut frame = MessagePacket::new(PacketType::Clear, 1, 2, 0, vec![])
            .encode()
            .unwrap();
        frame[0] = b'X';
        assert_eq!(MessagePacket::parse(&frame), Err(MessageError::MagicMismatch));
    }

    #[test]
    fn test_parse_rejects_truncated_payload() {
        let mut frame = MessagePacket::new(PacketType::Clear, 1, 2, 0, vec![1, 2, 3])
            .encode()
            .unwrap();
        frame.pop();
        assert_eq!(MessagePacket::parse(&frame), Err(MessageError::NotEnoughData));
    }

    #[test]
    fn test_parse_rejects_unknown_version() {
        let mut frame = MessagePacket::new(PacketType::Clear, 1, 2, 0, vec![])
            .encode()
            .unwrap();
        frame[2] |= 0x02;
        assert_eq!(
            MessagePacket::parse(&frame),
            Err(MessageError::UnsupportedVersion(2))
        );
    }

    #[test]
    fn test_payload_too_large() {
        let packet = MessagePacket::new(PacketType::Clear, 1, 2, 0, vec![0; MAX_PACKET_PAYLOAD + 1]);
        assert_eq!(
            packet.encode(),
            Err(MessageError::PayloadTooLarge(MAX_PACKET_PAYLOAD + 1))
        );
    }
}
