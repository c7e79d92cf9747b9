//! Modified UTF-8 as used by JNI.
//!
//! Modified UTF-8 differs from standard UTF-8 in two ways: `U+0000` is encoded
//! as the two bytes `C0 80`, and supplementary characters are encoded as a
//! surrogate pair of two three-byte sequences rather than one four-byte sequence.
//! Conversion goes through UTF-16, which is also what `GetStringChars` exposes.

use widestring::U16Str;

/// Encodes a string as Modified UTF-8, without a terminator.
#[must_use]
pub fn encode(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        push_unit(&mut out, unit);
    }
    out
}

/// Returns the Modified UTF-8 length of `value` in bytes.
#[must_use]
pub fn encoded_len(value: &str) -> usize {
    value
        .encode_utf16()
        .map(|unit| match unit {
            0x0001..=0x007F => 1,
            0x0000 | 0x0080..=0x07FF => 2,
            _ => 3,
        })
        .sum()
}

fn push_unit(out: &mut Vec<u8>, unit: u16) {
    match unit {
        0x0001..=0x007F => out.push(unit as u8),
        0x0000 | 0x0080..=0x07FF => {
            out.push(0xC0 | (unit >> 6) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
        _ => {
            out.push(0xE0 | (unit >> 12) as u8);
            out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
            out.push(0x80 | (unit & 0x3F) as u8);
        }
    }
}

/// Decodes Modified UTF-8 into UTF-16 code units.
///
/// Standard four-byte sequences are accepted as well, since native code often
/// passes plain UTF-8 to `NewStringUTF`. Returns `None` on malformed input.
#[must_use]
pub fn decode_utf16(bytes: &[u8]) -> Option<Vec<u16>> {
    let mut units = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let b0 = bytes[i];
        match b0 {
            0x00..=0x7F => {
                units.push(u16::from(b0));
                i += 1;
            }
            0xC0..=0xDF => {
                let b1 = continuation(bytes, i + 1)?;
                units.push(u16::from(b0 & 0x1F) << 6 | b1);
                i += 2;
            }
            0xE0..=0xEF => {
                let b1 = continuation(bytes, i + 1)?;
                let b2 = continuation(bytes, i + 2)?;
                units.push(u16::from(b0 & 0x0F) << 12 | b1 << 6 | b2);
                i += 3;
            }
            0xF0..=0xF7 => {
                let b1 = u32::from(continuation(bytes, i + 1)?);
                let b2 = u32::from(continuation(bytes, i + 2)?);
                let b3 = u32::from(continuation(bytes, i + 3)?);
                let scalar = u32::from(b0 & 0x07) << 18 | b1 << 12 | b2 << 6 | b3;
                let c = char::from_u32(scalar)?;
                let mut buf = [0u16; 2];
                units.extend_from_slice(c.encode_utf16(&mut buf));
                i += 4;
            }
            _ => return None,
        }
    }
    Some(units)
}

fn continuation(bytes: &[u8], index: usize) -> Option<u16> {
    match bytes.get(index) {
        Some(&b) if b & 0xC0 == 0x80 => Some(u16::from(b & 0x3F)),
        _ => None,
    }
}

/// Decodes Modified UTF-8 into a Rust string.
///
/// Unpaired surrogates are replaced with `U+FFFD`.
#[must_use]
pub fn decode(bytes: &[u8]) -> Option<String> {
    let units = decode_utf16(bytes)?;
    Some(U16Str::from_slice(&units).to_string_lossy())
}
