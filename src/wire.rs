//! Wire primitives: tag layout, varint, zig-zag, little-endian fixed-width
//! values and length-delimited framing.
//!
//! Readers work on a `Cursor<&[u8]>` and report short input as
//! [`CodecError::Truncated`]; writers append to a `Vec<u8>`.

use std::convert::TryFrom;
use std::io::Cursor;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::codec::CodecError;

/// Longest varint accepted (a full 64-bit value).
pub const MAX_VARINT_LEN: usize = 10;

/// 3-bit wire class carried in the low bits of every tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    LengthDelimited = 2,
    Fixed32 = 5,
}

impl WireType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = u8;

    /// Groups (3, 4) and the unassigned classes (6, 7) are rejected.
    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            5 => Ok(WireType::Fixed32),
            other => Err(other),
        }
    }
}

pub fn make_tag(index: u32, wire_type: WireType) -> u64 {
    (u64::from(index) << 3) | u64::from(wire_type.as_u8())
}

/// Split a raw tag into `(index, wire type bits)`.
pub fn split_tag(tag: u64) -> (u64, u8) {
    (tag >> 3, (tag & 0x7) as u8)
}

pub fn encode_varint(out: &mut Vec<u8>, mut v: u64) {
    while v >= 0x80 {
        out.push((v as u8 & 0x7f) | 0x80);
        v >>= 7;
    }
    out.push(v as u8);
}

pub fn varint_len(mut v: u64) -> usize {
    let mut n = 1;
    while v >= 0x80 {
        v >>= 7;
        n += 1;
    }
    n
}

pub fn decode_varint(r: &mut Cursor<&[u8]>) -> Result<u64, CodecError> {
    let mut value = 0u64;
    for i in 0..MAX_VARINT_LEN {
        let byte = r.read_u8().map_err(|_| CodecError::Truncated("varint"))?;
        // The tenth byte may only contribute the top bit.
        if i == MAX_VARINT_LEN - 1 && byte > 1 {
            return Err(CodecError::VarintOverflow);
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
    Err(CodecError::VarintOverflow)
}

pub fn zigzag_encode32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

pub fn zigzag_decode32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ -((n & 1) as i32)
}

pub fn zigzag_encode64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

pub fn zigzag_decode64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

pub fn write_fixed32(out: &mut Vec<u8>, v: u32) {
    // Writes into a Vec cannot fail.
    let _ = out.write_u32::<LittleEndian>(v);
}

pub fn write_fixed64(out: &mut Vec<u8>, v: u64) {
    let _ = out.write_u64::<LittleEndian>(v);
}

pub fn read_fixed32(r: &mut Cursor<&[u8]>) -> Result<u32, CodecError> {
    r.read_u32::<LittleEndian>()
        .map_err(|_| CodecError::Truncated("fixed32"))
}

pub fn read_fixed64(r: &mut Cursor<&[u8]>) -> Result<u64, CodecError> {
    r.read_u64::<LittleEndian>()
        .map_err(|_| CodecError::Truncated("fixed64"))
}

/// Length prefix followed by `payload`.
pub fn write_length_delimited(out: &mut Vec<u8>, payload: &[u8]) {
    encode_varint(out, payload.len() as u64);
    out.extend_from_slice(payload);
}

/// Read a length prefix and borrow that many bytes from the input.
pub fn read_length_delimited<'a>(r: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], CodecError> {
    let len = decode_varint(r)?;
    let buf: &'a [u8] = *r.get_ref();
    let start = r.position() as usize;
    let remaining = buf.len().saturating_sub(start);
    if len > remaining as u64 {
        return Err(CodecError::Truncated("length-delimited payload"));
    }
    let end = start + len as usize;
    r.set_position(end as u64);
    Ok(&buf[start..end])
}

/// Skip one value of the given class (fields the reading schema does not know).
pub fn skip_value(r: &mut Cursor<&[u8]>, wire_type: WireType) -> Result<(), CodecError> {
    match wire_type {
        WireType::Varint => decode_varint(r).map(|_| ()),
        WireType::Fixed64 => read_fixed64(r).map(|_| ()),
        WireType::Fixed32 => read_fixed32(r).map(|_| ()),
        WireType::LengthDelimited => read_length_delimited(r).map(|_| ()),
    }
}
