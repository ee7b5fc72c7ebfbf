//! Packed response codec
//!
//! A block carries its answers as one byte string: the responses of its
//! requests, in request order, each encoded at the width of the request's
//! declared type. Bool is one byte (0 or 1); Uint is a 32-byte big-endian
//! word that must fit in 128 bits.

use sibyl_core::{SibylError, SibylResult};
use sibyl_state::registry::{ResponseType, ResponseValue};

const WORD: usize = 32;

/// Total payload length for the given response types
pub fn packed_len(types: &[ResponseType]) -> usize {
    types.iter().map(|t| t.width()).sum()
}

/// Decode `bytes` against the declared types, validating the length first
pub fn decode_responses(bytes: &[u8], types: &[ResponseType]) -> SibylResult<Vec<ResponseValue>> {
    let expected = packed_len(types);
    if bytes.len() != expected {
        return Err(SibylError::MalformedResponse(format!(
            "expected {} bytes for {} responses, got {}",
            expected,
            types.len(),
            bytes.len()
        )));
    }

    let mut offset = 0;
    let mut values = Vec::with_capacity(types.len());
    for (index, ty) in types.iter().enumerate() {
        let chunk = &bytes[offset..offset + ty.width()];
        let value = match ty {
            ResponseType::Bool => ResponseValue::Bool(decode_bool(chunk[0], index)?),
            ResponseType::Uint => ResponseValue::Uint(decode_word(chunk, index)?),
        };
        values.push(value);
        offset += ty.width();
    }
    Ok(values)
}

/// Decode `count` one-byte booleans
pub fn decode_bools(bytes: &[u8], count: usize) -> SibylResult<Vec<bool>> {
    let values = decode_responses(bytes, &vec![ResponseType::Bool; count])?;
    Ok(values.iter().map(|v| v.as_bool()).collect())
}

/// Decode `count` 32-byte words
pub fn decode_uints(bytes: &[u8], count: usize) -> SibylResult<Vec<u128>> {
    let values = decode_responses(bytes, &vec![ResponseType::Uint; count])?;
    Ok(values.iter().map(|v| v.as_uint()).collect())
}

/// Tight packing of `values`, the inverse of [`decode_responses`]
pub fn pack_responses(values: &[ResponseValue]) -> Vec<u8> {
    let mut out = Vec::with_capacity(values.len() * WORD);
    for value in values {
        match value {
            ResponseValue::Bool(b) => out.push(*b as u8),
            ResponseValue::Uint(v) => {
                out.extend_from_slice(&[0u8; WORD - 16]);
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
    }
    out
}

fn decode_bool(byte: u8, index: usize) -> SibylResult<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(SibylError::MalformedResponse(format!(
            "response {} is not a boolean: {:#04x}",
            index, other
        ))),
    }
}

fn decode_word(word: &[u8], index: usize) -> SibylResult<u128> {
    let (high, low) = word.split_at(WORD - 16);
    if high.iter().any(|b| *b != 0) {
        return Err(SibylError::MalformedResponse(format!(
            "response {} exceeds 128 bits",
            index
        )));
    }
    let mut buf = [0u8; 16];
    buf.copy_from_slice(low);
    Ok(u128::from_be_bytes(buf))
}
