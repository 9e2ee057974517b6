//! Bulk status bitmaps
//!
//! `^G` and `^H` are answered with ASCII hex. Loads come in groups of six
//! digits (three bytes, 24 loads), switches in groups of four digits (two
//! bytes, 16 switches). Within a group bytes are taken in wire order and
//! each byte is read least-significant bit first, so index 1 is bit 0 of
//! the first byte.

use std::collections::BTreeMap;

use super::ProtocolError;

/// Device index (1-based) to on/off
pub type DeviceStates = BTreeMap<u16, bool>;

/// Hex digits per load group
pub const LOAD_GROUP_DIGITS: usize = 6;
/// Hex digits per switch group
pub const SWITCH_GROUP_DIGITS: usize = 4;

/// Largest input whose indices still fit a u16 (multiple of both group sizes)
const MAX_DIGITS: usize = 16380;

/// Decode a `^G` reply into load states
pub fn decode_loads(hex: &str) -> Result<DeviceStates, ProtocolError> {
    decode_groups(hex, LOAD_GROUP_DIGITS)
}

/// Decode a `^H` reply into switch states
pub fn decode_switches(hex: &str) -> Result<DeviceStates, ProtocolError> {
    decode_groups(hex, SWITCH_GROUP_DIGITS)
}

/// Encode load states as a 48 digit `^G` reply
pub fn encode_loads(states: &DeviceStates) -> String {
    encode_bits(states, 48)
}

/// Encode switch states as a 96 digit `^H` reply
pub fn encode_switches(states: &DeviceStates) -> String {
    encode_bits(states, 96)
}

fn decode_groups(hex: &str, group_digits: usize) -> Result<DeviceStates, ProtocolError> {
    let hex = hex.trim();
    let usable = (hex.len() / group_digits * group_digits).min(MAX_DIGITS);
    if usable < hex.len() {
        tracing::debug!(
            "decode_groups: {} digits with groups of {}, ignoring {} trailing",
            hex.len(),
            group_digits,
            hex.len() - usable
        );
    }

    let bytes = hex.as_bytes();
    let mut states = DeviceStates::new();
    let mut index: u16 = 1;

    // Groups are contiguous bytes, so walking byte pairs in order covers
    // every group in sequence.
    for offset in (0..usable).step_by(2) {
        let high = hex_value(bytes[offset], offset)?;
        let low = hex_value(bytes[offset + 1], offset + 1)?;
        let value = (high << 4) | low;
        for bit in 0..8 {
            states.insert(index, value & (1 << bit) != 0);
            index += 1;
        }
    }

    Ok(states)
}

fn hex_value(digit: u8, offset: usize) -> Result<u8, ProtocolError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(ProtocolError::InvalidHex {
            digit: digit as char,
            offset,
        }),
    }
}

fn encode_bits(states: &DeviceStates, digits: usize) -> String {
    let mut bytes = vec![0u8; digits / 2];
    for (&index, &on) in states {
        if !on || index == 0 {
            continue;
        }
        let bit = usize::from(index - 1);
        if let Some(byte) = bytes.get_mut(bit / 8) {
            *byte |= 1 << (bit % 8);
        }
    }
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_all_zero_loads() {
        let states = decode_loads(&"0".repeat(48)).unwrap();
        assert_eq!(states.len(), 192);
        assert!((1..=24).all(|i| !states[&i]));
        assert!(states.values().all(|on| !on));
    }

    #[test]
    fn test_load_indices_are_contiguous() {
        let states = decode_loads(&"F".repeat(48)).unwrap();
        let keys: Vec<u16> = states.keys().copied().collect();
        assert_eq!(keys, (1..=192).collect::<Vec<u16>>());
        assert!(states.values().all(|&on| on));
    }

    #[test]
    fn test_switch_indices_are_contiguous() {
        let states = decode_switches(&"0".repeat(96)).unwrap();
        let keys: Vec<u16> = states.keys().copied().collect();
        assert_eq!(keys, (1..=384).collect::<Vec<u16>>());
    }

    #[test]
    fn test_lsb_first_within_byte() {
        // 0x01 in the first byte: load 1 only
        let mut hex = String::from("010000");
        hex.push_str(&"0".repeat(42));
        let states = decode_loads(&hex).unwrap();
        assert!(states[&1]);
        assert!((2..=192).all(|i| !states[&i]));

        // 0x80 in the first byte: load 8
        let states = decode_loads("800000").unwrap();
        assert!(states[&8]);
        assert!(!states[&1]);
    }

    #[test]
    fn test_bytes_in_wire_order_across_groups() {
        // Second byte of first group -> loads 9..16, first byte of second group -> 25..32
        let states = decode_loads("000300").unwrap();
        assert_eq!(
            states.iter().filter(|(_, on)| **on).map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![9, 10]
        );

        let states = decode_loads("000000400000").unwrap();
        assert_eq!(
            states.iter().filter(|(_, on)| **on).map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![31]
        );
    }

    #[test]
    fn test_switch_groups() {
        let states = decode_switches("00010200").unwrap();
        assert_eq!(states.len(), 32);
        assert_eq!(
            states.iter().filter(|(_, on)| **on).map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![9, 18]
        );
    }

    #[test]
    fn test_lowercase_and_whitespace() {
        let states = decode_loads(" ff0000\n").unwrap();
        assert!((1..=8).all(|i| states[&i]));
        assert!((9..=24).all(|i| !states[&i]));
    }

    #[test]
    fn test_partial_group_truncated() {
        let states = decode_loads("FFFFFFFF").unwrap();
        assert_eq!(states.len(), 24);

        let states = decode_switches("FFFFF").unwrap();
        assert_eq!(states.len(), 16);

        assert!(decode_loads("ABC").unwrap().is_empty());
        assert!(decode_loads("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_hex_digit() {
        match decode_loads("00G000") {
            Err(ProtocolError::InvalidHex { digit, offset }) => {
                assert_eq!(digit, 'G');
                assert_eq!(offset, 2);
            }
            other => panic!("expected InvalidHex, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_matches_decode_mapping() {
        let mut states = DeviceStates::new();
        states.insert(1, true);
        states.insert(10, true);
        states.insert(25, true);
        states.insert(192, true);
        states.insert(3, false);

        let hex = encode_loads(&states);
        assert_eq!(hex.len(), 48);
        assert!(hex.starts_with("01020001"));
        assert!(hex.ends_with("80"));

        let on: Vec<u16> = decode_loads(&hex)
            .unwrap()
            .into_iter()
            .filter(|(_, on)| *on)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(on, vec![1, 10, 25, 192]);
    }

    #[test]
    fn test_encode_ignores_out_of_range_indices() {
        let mut states = DeviceStates::new();
        states.insert(0, true);
        states.insert(500, true);
        assert_eq!(encode_switches(&states), "0".repeat(96));
    }
}
