//! Hex encode/decode for the 32-byte [`Address`] values configuration files
//! and admin endpoints exchange as plain strings.

use concord_types::{Address, ADDRESS_SIZE};

use crate::error::NodeError;

pub fn decode_address(s: &str) -> Result<Address, NodeError> {
    let s = s.trim();
    if s.len() != ADDRESS_SIZE * 2 {
        return Err(NodeError::MalformedFrame(format!(
            "address {s:?} is not {} hex characters",
            ADDRESS_SIZE * 2
        )));
    }
    let mut bytes = [0u8; ADDRESS_SIZE];
    for (i, byte) in bytes.iter_mut().enumerate() {
        let hi = s.as_bytes()[i * 2];
        let lo = s.as_bytes()[i * 2 + 1];
        *byte = (hex_nibble(hi)? << 4) | hex_nibble(lo)?;
    }
    Ok(Address::new(bytes))
}

fn hex_nibble(c: u8) -> Result<u8, NodeError> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(NodeError::MalformedFrame(format!(
            "invalid hex character {}",
            c as char
        ))),
    }
}

pub fn encode_address(address: &Address) -> String {
    format!("{address}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_hex() {
        let mut bytes = [0u8; 32];
        for (i, b) in bytes.iter_mut().enumerate() {
            *b = i as u8;
        }
        let address = Address::new(bytes);
        let encoded = encode_address(&address);
        let decoded = decode_address(&encoded).unwrap();
        assert_eq!(address, decoded);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(decode_address("abcd").is_err());
    }

    #[test]
    fn rejects_non_hex_characters() {
        assert!(decode_address(&"zz".repeat(32)).is_err());
    }
}
