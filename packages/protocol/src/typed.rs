//! Materialization of little-endian byte buffers into typed numeric arrays.

use crate::error::{
    Result,
    ensure,
};
use chunk_data::OwnedBuf;
use std::mem::size_of;


/// Numeric element type of a typed array.
pub trait Element: Copy + Default + Send + 'static {
    fn from_le_slice(bytes: &[u8]) -> Self;

    fn extend_le_bytes(self, out: &mut Vec<u8>);
}

macro_rules! element_impls {
    ($($t:ident,)*)=>{$(
        impl Element for $t {
            fn from_le_slice(bytes: &[u8]) -> Self {
                let mut buf = [0; size_of::<$t>()];
                buf.copy_from_slice(bytes);
                $t::from_le_bytes(buf)
            }

            fn extend_le_bytes(self, out: &mut Vec<u8>) {
                out.extend(self.to_le_bytes());
            }
        }
    )*};
}

element_impls!(
    u16,
    u32,
    i32,
    f32,
);

/// Convert decompressed little-endian bytes into an owned typed array.
///
/// Errors if the byte length is not a multiple of the element size.
pub fn from_le_bytes<T: Element>(bytes: &[u8]) -> Result<OwnedBuf<T>> {
    let elem_size = size_of::<T>();
    ensure!(
        bytes.len() % elem_size == 0,
        MalformedData,
        "typed array byte length {} not a multiple of element size {}",
        bytes.len(),
        elem_size,
    );
    Ok(bytes
        .chunks_exact(elem_size)
        .map(T::from_le_slice)
        .collect::<Vec<T>>()
        .into())
}

/// Convert a typed array into little-endian bytes.
pub fn to_le_bytes<T: Element>(elems: &[T]) -> Vec<u8> {
    let mut out = Vec::with_capacity(elems.len() * size_of::<T>());
    for &elem in elems {
        elem.extend_le_bytes(&mut out);
    }
    out
}


#[test]
fn test_typed_arrays() {
    let bytes = [0x05, 0x00, 0x00, 0x00, 0xff, 0xff, 0x0f, 0x00];
    let voxels = from_le_bytes::<u32>(&bytes).unwrap();
    assert_eq!(voxels.as_slice(), &[5, 0x000fffff]);
    let indices = from_le_bytes::<u16>(&bytes).unwrap();
    assert_eq!(indices.as_slice(), &[5, 0, 0xffff, 0x000f]);
    assert_eq!(to_le_bytes(voxels.as_slice()), bytes);

    let positions = [0.5f32, -3.0];
    let round = from_le_bytes::<f32>(&to_le_bytes(&positions)).unwrap();
    assert_eq!(round.as_slice(), &positions);
}

#[test]
fn test_typed_array_bad_length() {
    let e = from_le_bytes::<i32>(&[1, 2, 3]).unwrap_err();
    assert_eq!(e.kind(), crate::error::ErrorKind::MalformedData);
}
