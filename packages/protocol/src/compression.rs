//! Detection and handling of compressed frames and sub-buffers.
//!
//! Compressed data is recognized purely by its leading magic bytes. Anything that matches
//! neither signature is taken to be already decompressed.

use crate::error::{
    Result,
    Error,
    ErrorKind,
};
use std::{
    borrow::Cow,
    io::{
        Read,
        Write,
    },
};
use flate2::{
    read::ZlibDecoder,
    write::ZlibEncoder,
};
use lz4_flex::frame::{
    FrameDecoder,
    FrameEncoder,
};


/// LZ4 frame format magic number, little-endian `0x184D2204`.
pub const LZ4_MAGIC: [u8; 4] = [0x04, 0x22, 0x4d, 0x18];

/// Header of a zlib stream at the default compression level. Other zlib headers are not
/// recognized, since those byte pairs also begin plenty of uncompressed buffers.
pub const ZLIB_MAGIC: [u8; 2] = [0x78, 0x9c];


/// Compression format of some bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Not compressed.
    None,
    /// zlib-wrapped deflate.
    Zlib,
    /// LZ4 frame format.
    Lz4,
}

impl Compression {
    /// Detect the compression of some bytes by their magic header.
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.starts_with(&LZ4_MAGIC) {
            Compression::Lz4
        } else if bytes.starts_with(&ZLIB_MAGIC) {
            Compression::Zlib
        } else {
            Compression::None
        }
    }
}

/// Decompress bytes according to their detected compression. Borrows if not compressed.
pub fn decompress(bytes: &[u8]) -> Result<Cow<[u8]>> {
    Ok(match Compression::detect(bytes) {
        Compression::None => Cow::Borrowed(bytes),
        Compression::Zlib => {
            let mut out = Vec::new();
            ZlibDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| Error::new(ErrorKind::Decompress, e))?;
            Cow::Owned(out)
        }
        Compression::Lz4 => {
            let mut out = Vec::new();
            FrameDecoder::new(bytes)
                .read_to_end(&mut out)
                .map_err(|e| Error::new(ErrorKind::Decompress, e))?;
            Cow::Owned(out)
        }
    })
}

/// Compress bytes with the given compression.
pub fn compress(bytes: &[u8], compression: Compression) -> Result<Vec<u8>> {
    Ok(match compression {
        Compression::None => bytes.to_vec(),
        Compression::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(bytes)?;
            encoder.finish()?
        }
        Compression::Lz4 => {
            let mut encoder = FrameEncoder::new(Vec::new());
            encoder.write_all(bytes)?;
            encoder.finish().map_err(Error::other)?
        }
    })
}


#[test]
fn test_detect() {
    let data = (0..1000u32).flat_map(|n| (n % 7).to_le_bytes()).collect::<Vec<u8>>();
    for compression in [Compression::None, Compression::Zlib, Compression::Lz4] {
        let compressed = compress(&data, compression).unwrap();
        assert_eq!(Compression::detect(&compressed), compression);
        assert_eq!(&*decompress(&compressed).unwrap(), data.as_slice());
    }
}

#[test]
fn test_zlib_default_header() {
    assert_eq!(&compress(&[0; 64], Compression::Zlib).unwrap()[..2], &ZLIB_MAGIC);
    assert_eq!(Compression::detect(&[0x78, 0x9c, 0]), Compression::Zlib);
    assert_eq!(Compression::detect(&[0x78, 0x01, 0]), Compression::None);
    assert_eq!(Compression::detect(&[0x78, 0xda, 0]), Compression::None);
    assert_eq!(Compression::detect(&[0x78]), Compression::None);
}

#[test]
fn test_uncompressed_buffer_like_zlib() {
    // little-endian 0x0178 and 0xda78 words begin with other zlib headers
    let data = [0x0178u32, 0xda78, 0, 7]
        .iter()
        .flat_map(|n| n.to_le_bytes())
        .collect::<Vec<u8>>();
    assert_eq!(Compression::detect(&data), Compression::None);
    assert_eq!(&*decompress(&data).unwrap(), data.as_slice());
    assert_eq!(&*decompress(&data[4..]).unwrap(), &data[4..]);
}

#[test]
fn test_corrupt_compressed_data() {
    let mut compressed = compress(&[1, 2, 3, 4, 5, 6, 7, 8], Compression::Lz4).unwrap();
    compressed.truncate(LZ4_MAGIC.len() + 2);
    let e = decompress(&compressed).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Decompress);
}
