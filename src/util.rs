//! # MQTT Serialization Utilities
//!
//! This module provides helper functions for reading and writing MQTT-specific data types
//! from and to byte buffers, such as variable-byte integers and length-prefixed strings.
//!
//! Every reader is bounds-checked: a truncated or oversized field is reported as
//! `ProtocolError::MalformedPacket` instead of panicking on a short buffer.

use crate::error::ProtocolError;

/// Largest value a variable-byte integer can carry (four bytes).
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Decodes a variable-byte integer at the start of `buf`.
///
/// Returns `Ok(None)` when `buf` ends before the integer is complete, and
/// `Ok(Some((value, bytes_used)))` otherwise.
pub fn decode_variable_byte_integer(buf: &[u8]) -> Result<Option<(usize, usize)>, ProtocolError> {
    let mut multiplier = 1;
    let mut value = 0;
    for (i, encoded_byte) in buf.iter().enumerate() {
        if i >= 4 {
            return Err(ProtocolError::MalformedPacket);
        }
        value += (encoded_byte & 127) as usize * multiplier;
        if (encoded_byte & 128) == 0 {
            return Ok(Some((value, i + 1)));
        }
        multiplier *= 128;
    }
    if buf.len() >= 4 {
        return Err(ProtocolError::MalformedPacket);
    }
    Ok(None)
}

/// Reads a variable-byte integer from the buffer, advancing the cursor.
pub fn read_variable_byte_integer(cursor: &mut usize, buf: &[u8]) -> Result<usize, ProtocolError> {
    let rest = buf.get(*cursor..).ok_or(ProtocolError::MalformedPacket)?;
    let (value, used) =
        decode_variable_byte_integer(rest)?.ok_or(ProtocolError::MalformedPacket)?;
    *cursor += used;
    Ok(value)
}

/// Number of bytes `val` occupies once encoded as a variable-byte integer.
pub fn variable_byte_integer_len(val: usize) -> usize {
    match val {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

/// Writes a variable-byte integer to the buffer, advancing the cursor.
pub fn write_variable_byte_integer(
    cursor: &mut usize,
    buf: &mut [u8],
    mut val: usize,
) -> Result<(), ProtocolError> {
    if val > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::PacketTooLarge);
    }
    loop {
        let mut encoded_byte = (val % 128) as u8;
        val /= 128;
        if val > 0 {
            encoded_byte |= 128;
        }
        *buf.get_mut(*cursor).ok_or(ProtocolError::PacketTooLarge)? = encoded_byte;
        *cursor += 1;
        if val == 0 {
            break;
        }
    }
    Ok(())
}

/// Reads a big-endian `u16`, advancing the cursor.
pub fn read_u16(cursor: &mut usize, buf: &[u8]) -> Result<u16, ProtocolError> {
    let bytes = buf
        .get(*cursor..*cursor + 2)
        .ok_or(ProtocolError::MalformedPacket)?;
    *cursor += 2;
    Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Writes a big-endian `u16`, advancing the cursor.
pub fn write_u16(cursor: &mut usize, buf: &mut [u8], val: u16) -> Result<(), ProtocolError> {
    buf.get_mut(*cursor..*cursor + 2)
        .ok_or(ProtocolError::PacketTooLarge)?
        .copy_from_slice(&val.to_be_bytes());
    *cursor += 2;
    Ok(())
}

/// Reads a UTF-8 encoded string (prefixed with a 2-byte length) from the buffer.
pub fn read_utf8_string<'a>(cursor: &mut usize, buf: &'a [u8]) -> Result<&'a str, ProtocolError> {
    let len = read_u16(cursor, buf)? as usize;
    let bytes = buf
        .get(*cursor..*cursor + len)
        .ok_or(ProtocolError::MalformedPacket)?;
    let s = core::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8String)?;
    *cursor += len;
    Ok(s)
}

/// Encoded size of a length-prefixed string.
pub fn utf8_string_len(s: &str) -> usize {
    2 + s.len()
}

/// Writes a UTF-8 encoded string (prefixed with a 2-byte length) to the buffer.
pub fn write_utf8_string(cursor: &mut usize, buf: &mut [u8], s: &str) -> Result<(), ProtocolError> {
    let len = u16::try_from(s.len()).map_err(|_| ProtocolError::PacketTooLarge)?;
    write_u16(cursor, buf, len)?;
    buf.get_mut(*cursor..*cursor + s.len())
        .ok_or(ProtocolError::PacketTooLarge)?
        .copy_from_slice(s.as_bytes());
    *cursor += s.len();
    Ok(())
}
