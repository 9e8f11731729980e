//! EAP-AKA style messages for session negotiation.
//!
//! ```text
//! +------+----+--------+------+---------+-------+------------+
//! | code | id | length | type | subtype | rsvd  | attributes |
//! | 1    | 1  | 2 (BE) | 0x17 | 1       | 2     | ...        |
//! +------+----+--------+------+---------+-------+------------+
//!
//! attribute: type(1) | length in 4-byte words(1) | payload
//! ```

use crate::core::MessageError;
use crate::crypto::CRC16_TABLE;

const EAP_HEADER_SIZE: usize = 8;
const EAP_TYPE_AKA: u8 = 0x17;

const AT_RAND: u8 = 1;
const AT_AUTN: u8 = 2;
const AT_RES: u8 = 3;
const AT_AUTS: u8 = 4;
const AT_CUSTOM_IV: u8 = 126;

/// EAP packet code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapCode {
    /// Controller challenge.
    Request = 1,
    /// Pod answer.
    Response = 2,
    /// Negotiation accepted.
    Success = 3,
    /// Negotiation refused.
    Failure = 4,
}

impl EapCode {
    fn from_byte(byte: u8) -> Result<Self, MessageError> {
        match byte {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::Success),
            4 => Ok(Self::Failure),
            value => Err(MessageError::UnknownValue {
                value,
                type_name: "EapCode",
            }),
        }
    }
}

/// AKA subtype.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EapSubtype {
    /// Challenge and its response.
    Challenge = 1,
    /// The pod's sequence number is ahead; carries `AUTS`.
    SynchronizationFailure = 4,
}

impl EapSubtype {
    fn from_byte(byte: u8) -> Result<Self, MessageError> {
        match byte {
            1 => Ok(Self::Challenge),
            4 => Ok(Self::SynchronizationFailure),
            value => Err(MessageError::UnknownValue {
                value,
                type_name: "EapSubtype",
            }),
        }
    }
}

/// One AKA attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EapAttribute {
    /// Controller random challenge.
    Rand([u8; 16]),
    /// Authentication token; starts with the 6-byte sequence number.
    Autn([u8; 16]),
    /// Pod challenge response.
    Res([u8; 8]),
    /// Resynchronization token; starts with the pod's sequence number.
    Auts([u8; 14]),
    /// One side's half of the nonce prefix.
    CustomIv([u8; 4]),
}

impl EapAttribute {
    fn encode(&self, out: &mut Vec<u8>) {
        let (kind, head, body): (u8, [u8; 2], &[u8]) = match self {
            Self::Rand(rand) => (AT_RAND, [0, 0], rand),
            Self::Autn(autn) => (AT_AUTN, [0, 0], autn),
            Self::Res(res) => (AT_RES, ((res.len() * 8) as u16).to_be_bytes(), res),
            Self::Auts(auts) => (AT_AUTS, [auts[0], auts[1]], &auts[2..]),
            Self::CustomIv(iv) => (AT_CUSTOM_IV, [0, 0], iv),
        };
        out.push(kind);
        out.push(((4 + body.len()) / 4) as u8);
        out.extend_from_slice(&head);
        out.extend_from_slice(body);
    }

    fn decode(kind: u8, payload: &[u8]) -> Result<Self, MessageError> {
        fn fixed<const N: usize>(data: &[u8]) -> Result<[u8; N], MessageError> {
            data.get(..N)
                .and_then(|d| d.try_into().ok())
                .ok_or(MessageError::NotEnoughData)
        }

        match kind {
            AT_RAND => Ok(Self::Rand(fixed(&payload[2..])?)),
            AT_AUTN => Ok(Self::Autn(fixed(&payload[2..])?)),
            AT_RES => Ok(Self::Res(fixed(&payload[2..])?)),
            AT_AUTS => Ok(Self::Auts(fixed(payload)?)),
            AT_CUSTOM_IV => Ok(Self::CustomIv(fixed(&payload[2..])?)),
            value => Err(MessageError::UnknownValue {
                value,
                type_name: "EapAttribute",
            }),
        }
    }
}

/// One negotiation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EapMessage {
    /// Packet code.
    pub code: EapCode,
    /// Matches responses to requests.
    pub identifier: u8,
    /// AKA subtype; absent on success and failure.
    pub subtype: Option<EapSubtype>,
    /// Attributes, in order.
    pub attributes: Vec<EapAttribute>,
}

impl EapMessage {
    /// A challenge request.
    pub fn challenge(identifier: u8, attributes: Vec<EapAttribute>) -> Self {
        Self {
            code: EapCode::Request,
            identifier,
            subtype: Some(EapSubtype::Challenge),
            attributes,
        }
    }

    /// A bare success or failure notice.
    pub fn notice(code: EapCode, identifier: u8) -> Self {
        Self {
            code,
            identifier,
            subtype: None,
            attributes: Vec::new(),
        }
    }

    /// Encode to bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![self.code as u8, self.identifier, 0, 0];
        if let Some(subtype) = self.subtype {
            out.extend_from_slice(&[EAP_TYPE_AKA, subtype as u8, 0, 0]);
            for attribute in &self.attributes {
                attribute.encode(&mut out);
            }
        }
        let length = (out.len() as u16).to_be_bytes();
        out[2..4].copy_from_slice(&length);
        out
    }

    /// Decode from bytes.
    pub fn decode(data: &[u8]) -> Result<Self, MessageError> {
        if data.len() < 4 {
            return Err(MessageError::NotEnoughData);
        }
        let code = EapCode::from_byte(data[0])?;
        let identifier = data[1];
        let length = usize::from(u16::from_be_bytes([data[2], data[3]]));
        if length > data.len() {
            return Err(MessageError::NotEnoughData);
        }
        if length == 4 {
            return Ok(Self::notice(code, identifier));
        }
        if length < EAP_HEADER_SIZE {
            return Err(MessageError::NotEnoughData);
        }
        if data[4] != EAP_TYPE_AKA {
            return Err(MessageError::UnknownValue {
                value: data[4],
                type_name: "EapType",
            });
        }
        let subtype = EapSubtype::from_byte(data[5])?;

        let mut attributes = Vec::new();
        let mut pos = EAP_HEADER_SIZE;
        while pos + 2 <= length {
            let kind = data[pos];
            let size = usize::from(data[pos + 1]) * 4;
            if size < 4 || pos + size > length {
                return Err(MessageError::NotEnoughData);
            }
            attributes.push(EapAttribute::decode(kind, &data[pos + 2..pos + size])?);
            pos += size;
        }

        Ok(Self {
            code,
            identifier,
            subtype: Some(subtype),
            attributes,
        })
    }

    /// First `Rand` attribute.
    pub fn rand(&self) -> Option<&[u8; 16]> {
        self.attributes.iter().find_map(|a| match a {
            EapAttribute::Rand(rand) => Some(rand),
            _ => None,
        })
    }

    /// First `Autn` attribute.
    pub fn autn(&self) -> Option<&[u8; 16]> {
        self.attributes.iter().find_map(|a| match a {
            EapAttribute::Autn(autn) => Some(autn),
            _ => None,
        })
    }

    /// First `Res` attribute.
    pub fn res(&self) -> Option<&[u8; 8]> {
        self.attributes.iter().find_map(|a| match a {
            EapAttribute::Res(res) => Some(res),
            _ => None,
        })
    }

    /// First `Auts` attribute.
    pub fn auts(&self) -> Option<&[u8; 14]> {
        self.attributes.iter().find_map(|a| match a {
            EapAttribute::Auts(auts) => Some(auts),
            _ => None,
        })
    }

    /// First `CustomIv` attribute.
    pub fn custom_iv(&self) -> Option<&[u8; 4]> {
        self.attributes.iter().find_map(|a| match a {
            EapAttribute::CustomIv(iv) => Some(iv),
            _ => None,
        })
    }
}

/// Identifier for the `n`th negotiation message of a session.
pub fn identifier_for(seq: u8) -> u8 {
    (CRC16_TABLE[usize::from(seq)] & 0xFF) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_layout() {
        let message = EapMessage::challenge(
            0x2a,
            vec![
                EapAttribute::Rand([0x11; 16]),
                EapAttribute::Autn([0x22; 16]),
                EapAttribute::CustomIv([1, 2, 3, 4]),
            ],
        );
        let encoded = message.encode();
        assert_eq!(encoded.len(), 8 + 20 + 20 + 8);
        assert_eq!(&encoded[..8], &[0x01, 0x2a, 0x00, 0x38, 0x17, 0x01, 0x00, 0x00]);
        assert_eq!(&encoded[8..12], &[AT_RAND, 5, 0, 0]);
        assert_eq!(&encoded[48..], &[AT_CUSTOM_IV, 2, 0, 0, 1, 2, 3, 4]);
        assert_eq!(EapMessage::decode(&encoded).unwrap(), message);
    }

    #[test]
    fn test_response_with_res() {
        let message = EapMessage {
            code: EapCode::Response,
            identifier: 7,
            subtype: Some(EapSubtype::Challenge),
            attributes: vec![EapAttribute::Res([9; 8]), EapAttribute::CustomIv([5; 4])],
        };
        let encoded = message.encode();
        assert_eq!(&encoded[8..12], &[AT_RES, 3, 0x00, 0x40]);
        let decoded = EapMessage::decode(&encoded).unwrap();
        assert_eq!(decoded.res(), Some(&[9; 8]));
        assert_eq!(decoded.custom_iv(), Some(&[5; 4]));
        assert_eq!(decoded.rand(), None);
    }

    #[test]
    fn test_synchronization_failure() {
        let mut auts = [0u8; 14];
        auts[5] = 0x09;
        let message = EapMessage {
            code: EapCode::Response,
            identifier: 1,
            subtype: Some(EapSubtype::SynchronizationFailure),
            attributes: vec![EapAttribute::Auts(auts)],
        };
        let decoded = EapMessage::decode(&message.encode()).unwrap();
        assert_eq!(decoded.subtype, Some(EapSubtype::SynchronizationFailure));
        assert_eq!(decoded.auts(), Some(&auts));
    }

    #[test]
    fn test_notice() {
        let success = EapMessage::notice(EapCode::Success, 3);
        assert_eq!(success.encode(), vec![0x03, 0x03, 0x00, 0x04]);
        assert_eq!(EapMessage::decode(&success.encode()).unwrap(), success);
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            EapMessage::decode(&[0x01, 0x00, 0x00, 0x20, 0x17]).unwrap_err(),
            MessageError::NotEnoughData
        );
        assert!(matches!(
            EapMessage::decode(&[0x09, 0x00, 0x00, 0x04]),
            Err(MessageError::UnknownValue { value: 9, .. })
        ));
    }
}
