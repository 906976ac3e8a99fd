//! Variable-length integer and message tag encoding.

use crate::error::{
    Result,
    ensure,
};
use std::io::{
    Read,
    Write,
};


const MORE_BIT: u8  = 0b10000000;
const LO_7_BITS: u8 = 0b01111111;

const ENCODED_SIGN_BIT: u8 = 0b01000000;
const LO_6_BITS: u8        = 0b00111111;


/// Number of bytes needed to encode a tag based on the number of variants.
fn tag_byte_len(num_variants: usize) -> usize {
    let max_tag = num_variants.saturating_sub(1);
    let mut mask = !0;
    let mut bytes = 0;

    while (mask & max_tag) != 0 {
        mask <<= 8;
        bytes += 1;
    }

    bytes
}

/// Write a message type tag. Assumes `tag` < `num_variants`.
pub fn write_tag<W>(write: &mut W, tag: usize, num_variants: usize) -> Result<()>
where
    W: Write,
{
    debug_assert!(tag < num_variants, "message tag out of bounds");
    let all_bytes = u64::to_le_bytes(tag as u64);
    let used_bytes = &all_bytes[..tag_byte_len(num_variants)];
    write.write_all(used_bytes)?;
    Ok(())
}

/// Read a message type tag, validating it against the number of variants.
pub fn read_tag<R>(read: &mut R, num_variants: usize) -> Result<usize>
where
    R: Read,
{
    ensure!(num_variants > 0, MalformedData, "no message variants to read a tag for");
    let mut all_bytes = [0; 8];
    let used_bytes = &mut all_bytes[..tag_byte_len(num_variants)];
    read.read_exact(used_bytes)?;
    let tag = u64::from_le_bytes(all_bytes);
    ensure!(
        tag < num_variants as u64,
        MalformedData,
        "message tag {} out of range 0..{}",
        tag,
        num_variants,
    );
    Ok(tag as usize)
}

/// Write a variable length unsigned int.
pub fn write_var_len_uint<W>(write: &mut W, mut n: u64) -> Result<()>
where
    W: Write,
{
    let mut more = true;
    while more {
        let curr_7_bits = (n & (LO_7_BITS as u64)) as u8;
        n >>= 7;
        more = n != 0;
        let curr_byte = ((more as u8) << 7) | curr_7_bits;
        write.write_all(&[curr_byte])?;
    }
    Ok(())
}

/// Read a variable length unsigned int.
pub fn read_var_len_uint<R>(read: &mut R) -> Result<u64>
where
    R: Read,
{
    let mut n: u64 = 0;
    let mut shift = 0;
    let mut more = true;
    while more {
        ensure!(shift < 64, MalformedData, "too many bytes in var len uint");

        let mut buf = [0];
        read.read_exact(&mut buf)?;
        let [curr_byte] = buf;

        n |= ((curr_byte & LO_7_BITS) as u64) << shift;
        shift += 7;
        more = (curr_byte & MORE_BIT) != 0;
    }
    Ok(n)
}

/// Write a variable length signed int.
pub fn write_var_len_sint<W>(write: &mut W, mut n: i64) -> Result<()>
where
    W: Write,
{
    let neg = n < 0;
    if neg {
        n = !n;
    }
    let curr_7_bits =
        ((neg as u8) << 6)
        | (n & (LO_6_BITS as i64)) as u8;
    n >>= 6;
    let mut more = n != 0;
    let curr_byte = ((more as u8) << 7) | curr_7_bits;
    write.write_all(&[curr_byte])?;

    while more {
        let curr_7_bits = (n & (LO_7_BITS as i64)) as u8;
        n >>= 7;
        more = n != 0;
        let curr_byte = ((more as u8) << 7) | curr_7_bits;
        write.write_all(&[curr_byte])?;
    }

    Ok(())
}

/// Read a variable length signed int.
pub fn read_var_len_sint<R>(read: &mut R) -> Result<i64>
where
    R: Read,
{
    let mut buf = [0];
    read.read_exact(&mut buf)?;
    let [curr_byte] = buf;

    let neg = (curr_byte & ENCODED_SIGN_BIT) != 0;
    let mut n = (curr_byte & LO_6_BITS) as i64;
    let mut more = (curr_byte & MORE_BIT) != 0;
    let mut shift = 6;

    while more {
        ensure!(shift < 64, MalformedData, "too many bytes in var len sint");

        let mut buf = [0];
        read.read_exact(&mut buf)?;
        let [curr_byte] = buf;

        n |= ((curr_byte & LO_7_BITS) as i64) << shift;
        shift += 7;
        more = (curr_byte & MORE_BIT) != 0;
    }

    if neg {
        n = !n;
    }

    Ok(n)
}


#[test]
fn test_var_len_uint() {
    let mut buf = Vec::new();
    for n in (0..2 << 10).chain([u32::MAX as u64, u64::MAX]) {
        buf.clear();
        write_var_len_uint(&mut buf, n).unwrap();
        let n2 = read_var_len_uint(&mut buf.as_slice()).unwrap();
        assert_eq!(n, n2);
    }
}

#[test]
fn test_var_len_sint() {
    let mut buf = Vec::new();
    for n in (-(2 << 10)..2 << 10).chain([i32::MIN as i64, i64::MIN, i64::MAX]) {
        buf.clear();
        write_var_len_sint(&mut buf, n).unwrap();
        let n2 = read_var_len_sint(&mut buf.as_slice()).unwrap();
        assert_eq!(n, n2);
    }
}

#[test]
fn test_tag() {
    let mut buf = Vec::new();
    write_tag(&mut buf, 8, 9).unwrap();
    assert_eq!(buf, [8]);
    assert_eq!(read_tag(&mut buf.as_slice(), 9).unwrap(), 8);
    assert!(read_tag(&mut [9u8].as_slice(), 9).is_err());
}

#[test]
fn test_truncated_is_malformed() {
    let e = read_var_len_uint(&mut [0x80u8].as_slice()).unwrap_err();
    assert_eq!(e.kind(), crate::error::ErrorKind::MalformedData);
}
