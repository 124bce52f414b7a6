#![forbid(unsafe_code)]
//! Little-endian packing and varint helpers shared by the log, the pages and the value pool.

pub mod le {
    //! Fixed-width little-endian integers of arbitrary byte width (1..=8).

    /// Reads a `width`-byte little-endian unsigned integer from the front of `src`.
    pub fn get_uint(src: &[u8], width: usize) -> u64 {
        debug_assert!(width <= 8, "uint width out of range");
        let mut buf = [0u8; 8];
        buf[..width].copy_from_slice(&src[..width]);
        u64::from_le_bytes(buf)
    }

    /// Writes the low `width` bytes of `v` to the front of `dst`.
    pub fn put_uint(dst: &mut [u8], v: u64, width: usize) {
        debug_assert!(width <= 8, "uint width out of range");
        dst[..width].copy_from_slice(&v.to_le_bytes()[..width]);
    }

    /// Reads a signed 64-bit integer.
    pub fn get_i64(src: &[u8]) -> i64 {
        get_uint(src, 8) as i64
    }

    /// Reads a signed 32-bit integer.
    pub fn get_i32(src: &[u8]) -> i32 {
        get_uint(src, 4) as u32 as i32
    }

    /// Reads a 48-bit page id.
    pub fn get_u48(src: &[u8]) -> u64 {
        get_uint(src, 6)
    }

    /// Writes a 48-bit page id.
    pub fn put_u48(dst: &mut [u8], v: u64) {
        put_uint(dst, v, 6)
    }
}

pub mod var {
    //! Unsigned LEB128 varints.

    use crate::types::{BurrowError, Result};

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a varint from `src` starting at `*off`, advancing the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for _ in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(BurrowError::Corruption("varint truncated"))?;
            *off += 1;
            result |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(BurrowError::Corruption("varint longer than 10 bytes"))
    }

    /// Number of bytes `encode_u64(v)` produces.
    pub fn encoded_len(v: u64) -> usize {
        let bits = 64 - v.leading_zeros() as usize;
        bits.max(1).div_ceil(7)
    }
}
