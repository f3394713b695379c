//! Zlib wrappers
//!
//! Whole-buffer helpers for loose objects plus a bounded streaming
//! decoder for pack entries, which need to know how many compressed
//! bytes were consumed so the next entry offset can be located.

use crate::errors::PackError;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::{Read, Write};

/// Compress a buffer with the default zlib level.
pub fn deflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompress a complete zlib stream.
pub fn inflate(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Result of a bounded pack-entry inflation.
#[derive(Debug)]
pub struct InflatedEntry {
    /// The decompressed payload.
    pub data: Vec<u8>,
    /// Compressed bytes consumed from the input, including the stream
    /// terminator.
    pub consumed: usize,
}

/// Inflate one zlib stream starting at `data[offset..]`, expecting
/// exactly `expected` decompressed bytes.
///
/// Errors if the stream is truncated, malformed, or inflates to a
/// different size than the entry header declared.
pub fn inflate_entry(
    data: &[u8],
    offset: usize,
    expected: usize,
) -> Result<InflatedEntry, PackError> {
    let mut decompress = Decompress::new(true);
    let mut out = Vec::with_capacity(expected);

    loop {
        let consumed = decompress.total_in() as usize;
        let input = data
            .get(offset + consumed..)
            .ok_or(PackError::Truncated { offset })?;

        let status = decompress
            .decompress_vec(input, &mut out, FlushDecompress::None)
            .map_err(|e| PackError::Inflate {
                offset,
                reason: e.to_string(),
            })?;

        match status {
            Status::StreamEnd => break,
            Status::Ok | Status::BufError => {
                if out.len() == out.capacity() {
                    // Undershot capacity estimate; the size check below
                    // still rejects oversized streams.
                    out.reserve(4096);
                } else if input.is_empty() {
                    return Err(PackError::Truncated {
                        offset: offset + consumed,
                    });
                }
            }
        }

        if out.len() > expected {
            return Err(PackError::Inflate {
                offset,
                reason: format!("stream inflates past declared size {expected}"),
            });
        }
    }

    if out.len() != expected {
        return Err(PackError::Inflate {
            offset,
            reason: format!("inflated {} bytes, header declared {expected}", out.len()),
        });
    }

    Ok(InflatedEntry {
        data: out,
        consumed: decompress.total_in() as usize,
    })
}

/// True when `data` begins with a zlib stream header.
///
/// Distinguishes the standard loose-object form (a single zlib stream)
/// from the headerless legacy form, whose first bytes are a plaintext
/// type-and-size varint.
pub fn sniff_zlib(data: &[u8]) -> bool {
    if data.len() < 2 {
        return false;
    }
    let word = u16::from_be_bytes([data[0], data[1]]);
    data[0] & 0x8f == 0x08 && word % 31 == 0
}
