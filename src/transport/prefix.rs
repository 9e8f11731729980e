//! String-length-prefix encoding.
//!
//! The pod's line protocol frames every field as an ASCII key, then (only
//! when the field is non-empty) a big-endian u16 length and the bytes.
//!
//! ```text
//! "S0.0=" | len | message | ",G0.0"      command
//! "0.0="  | len | message                response
//! ```

use crate::core::{MessageError, COMMAND_PREFIX, COMMAND_SUFFIX, RESPONSE_PREFIX};

/// Encode `(key, payload)` pairs.
pub fn format_keys(fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (key, payload) in fields {
        out.extend_from_slice(key.as_bytes());
        if !payload.is_empty() {
            out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
            out.extend_from_slice(payload);
        }
    }
    out
}

/// Parse consecutive length-prefixed fields, in order.
pub fn parse_keys(data: &[u8], keys: &[&'static str]) -> Result<Vec<Vec<u8>>, MessageError> {
    let mut pos = 0;
    let mut fields = Vec::with_capacity(keys.len());
    for key in keys {
        let end = pos + key.len();
        if data.get(pos..end) != Some(key.as_bytes()) {
            return Err(MessageError::MissingPrefix(key));
        }
        pos = end;
        let length = data
            .get(pos..pos + 2)
            .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
            .ok_or(MessageError::NotEnoughData)?;
        pos += 2;
        let payload = data.get(pos..pos + length).ok_or(MessageError::NotEnoughData)?;
        fields.push(payload.to_vec());
        pos += length;
    }
    Ok(fields)
}

/// Wrap an encoded message as a command.
pub fn wrap_command(message: &[u8]) -> Vec<u8> {
    format_keys(&[(COMMAND_PREFIX, message), (COMMAND_SUFFIX, &[])])
}

/// Extract the encoded message from a command; used by the simulated pod.
pub fn unwrap_command(data: &[u8]) -> Result<Vec<u8>, MessageError> {
    let mut fields = parse_keys(data, &[COMMAND_PREFIX])?;
    Ok(fields.remove(0))
}

/// Wrap an encoded message as a response.
pub fn wrap_response(message: &[u8]) -> Vec<u8> {
    format_keys(&[(RESPONSE_PREFIX, message)])
}

/// Extract the encoded message from a response.
pub fn unwrap_response(data: &[u8]) -> Result<Vec<u8>, MessageError> {
    let mut fields = parse_keys(data, &[RESPONSE_PREFIX])?;
    Ok(fields.remove(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wrapping() {
        let wrapped = wrap_command(&[0xAA, 0xBB]);
        assert_eq!(wrapped, b"S0.0=\x00\x02\xAA\xBB,G0.0".to_vec());
        assert_eq!(unwrap_command(&wrapped).unwrap(), vec![0xAA, 0xBB]);
    }

    #[test]
    fn test_response_wrapping() {
        let wrapped = wrap_response(&[1, 2, 3]);
        assert_eq!(unwrap_response(&wrapped).unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_parse_multiple_keys() {
        let data = format_keys(&[("SP1=", &[1, 2]), (",SP2=", &[3])]);
        let fields = parse_keys(&data, &["SP1=", ",SP2="]).unwrap();
        assert_eq!(fields, vec![vec![1, 2], vec![3]]);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_keys(b"XX", &["0.0="]).unwrap_err(),
            MessageError::MissingPrefix("0.0=")
        );
        assert_eq!(
            parse_keys(b"0.0=\x00\x05ab", &["0.0="]).unwrap_err(),
            MessageError::NotEnoughData
        );
    }
}
