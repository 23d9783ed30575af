//! Static numeric views of byte strings: script-numbers (little-endian
//! sign-magnitude with the sign in the high bit of the last byte), LE64
//! (8-byte two's complement), and `CastToBool`.

pub const MAX_SCRIPT_ELEMENT_SIZE: usize = 520;
pub const MAX_SCRIPTNUM_SIZE: usize = 4;
pub const MAX_STACK_SIZE: usize = 1000;
pub const MAX_PUBKEYS_PER_MULTISIG: i64 = 20;
pub const LOCKTIME_THRESHOLD: i64 = 500_000_000;
pub const SEQUENCE_LOCKTIME_DISABLE_FLAG: i64 = 1 << 31;
pub const SEQUENCE_LOCKTIME_TYPE_FLAG: i64 = 1 << 22;
pub const SEQUENCE_LOCKTIME_MASK: i64 = 0x0000_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptnumError {
    TooLong,
    NonMinimal,
    Overflow,
}

/// Decode a script-number. `max_size` bounds the accepted encoding length;
/// callers pass 4 for arithmetic operands and 5 for values that are only
/// moved around.
pub fn decode_scriptnum(
    bytes: &[u8],
    require_minimal: bool,
    max_size: usize,
) -> Result<i64, ScriptnumError> {
    if bytes.len() > max_size {
        return Err(ScriptnumError::TooLong);
    }
    if bytes.is_empty() {
        return Ok(0);
    }
    if require_minimal && !is_minimal_scriptnum(bytes) {
        return Err(ScriptnumError::NonMinimal);
    }
    let mut magnitude: i128 = 0;
    for (i, &b) in bytes.iter().enumerate() {
        let byte = if i == bytes.len() - 1 { b & 0x7f } else { b };
        magnitude |= (byte as i128) << (8 * i);
    }
    let value = if bytes[bytes.len() - 1] & 0x80 != 0 {
        -magnitude
    } else {
        magnitude
    };
    i64::try_from(value).map_err(|_| ScriptnumError::Overflow)
}

/// A minimal encoding never has a redundant trailing byte: the last byte
/// must carry payload bits beyond the sign, unless it is the sign marker for
/// a magnitude whose own high bit is set.
pub fn is_minimal_scriptnum(bytes: &[u8]) -> bool {
    match bytes.last() {
        None => true,
        Some(&last) => {
            if last & 0x7f != 0 {
                true
            } else if bytes.len() == 1 {
                false
            } else {
                bytes[bytes.len() - 2] & 0x80 != 0
            }
        }
    }
}

pub fn encode_scriptnum(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }
    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut out = Vec::with_capacity(9);
    while magnitude > 0 {
        out.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }
    if out[out.len() - 1] & 0x80 != 0 {
        out.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        let last = out.len() - 1;
        out[last] |= 0x80;
    }
    out
}

/// Byte length of the minimal script-number encoding of `value`.
pub fn scriptnum_encoded_size(value: i64) -> usize {
    if value == 0 {
        return 0;
    }
    let magnitude = value.unsigned_abs();
    let bits = 64 - magnitude.leading_zeros() as usize;
    // One extra sign bit on top of the magnitude bits.
    bits / 8 + 1
}

/// Exact 8-byte little-endian two's complement.
pub fn decode_le64(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(i64::from_le_bytes(arr))
}

pub fn encode_le64(value: i64) -> [u8; 8] {
    value.to_le_bytes()
}

/// 4-byte little-endian unsigned (transaction field width).
pub fn decode_le32(bytes: &[u8]) -> Option<u32> {
    let arr: [u8; 4] = bytes.try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}

pub fn encode_le32(value: u32) -> [u8; 4] {
    value.to_le_bytes()
}

/// Script truth: false iff empty, all-zero, or all-zero ending in 0x80.
pub fn cast_to_bool(bytes: &[u8]) -> bool {
    for (i, &b) in bytes.iter().enumerate() {
        if b != 0 {
            return !(i == bytes.len() - 1 && b == 0x80);
        }
    }
    false
}
