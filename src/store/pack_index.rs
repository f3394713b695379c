//! Pack index reader and writer
//!
//! The index is the sorted-id side file that maps object ids to offsets
//! in a packfile.
//!
//! ## Format
//!
//! v1: 256×u32 fanout (cumulative counts by first id byte), then `N`
//! entries of `u32 offset || 20-byte id` sorted by id, then the pack
//! SHA-1 and an index SHA-1 over all preceding bytes.
//!
//! v2: 8-byte magic `\377tOc\0\0\0\2`, the fanout, `N` raw ids, `N` u32
//! CRC32s of each object's compressed pack bytes, `N` u32 offsets (high
//! bit set means an index into a trailing u64 large-offset table), the
//! optional large-offset table, then the two SHA-1s as in v1.
//!
//! Ingest always emits v2.

use crate::errors::PackError;
use crate::objects::{ObjectId, object_id};
use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};
use sha1::{Digest, Sha1};
use std::fs;
use std::io::Cursor;
use std::path::Path;

const V2_MAGIC: [u8; 4] = [0xff, b't', b'O', b'c'];
const FANOUT_ENTRIES: usize = 256;
const LARGE_OFFSET_FLAG: u32 = 0x8000_0000;

/// Parsed pack index, either version, fully materialized.
#[derive(Debug, Clone)]
pub struct PackIndex {
    version: u32,
    fanout: [u32; FANOUT_ENTRIES],
    ids: Vec<ObjectId>,
    offsets: Vec<u64>,
    /// Per-object CRC32 of the compressed pack bytes; empty for v1.
    crc32: Vec<u32>,
    pack_checksum: ObjectId,
}

impl PackIndex {
    pub fn open(path: &Path) -> Result<Self, PackError> {
        let data = fs::read(path).map_err(|_| PackError::IndexTruncated)?;
        Self::parse(&data)
    }

    pub fn parse(data: &[u8]) -> Result<Self, PackError> {
        if data.len() < 2 * object_id::RAW_LENGTH {
            return Err(PackError::IndexTruncated);
        }

        // The trailing SHA-1 covers everything before it.
        let body_len = data.len() - object_id::RAW_LENGTH;
        let stored = ObjectId::from_raw_slice(&data[body_len..]).expect("20 bytes");
        let computed = ObjectId::for_bytes(&data[..body_len]);
        if stored != computed {
            return Err(PackError::IndexChecksumMismatch);
        }

        if data[..4] == V2_MAGIC {
            Self::parse_v2(data, body_len)
        } else {
            Self::parse_v1(data, body_len)
        }
    }

    fn parse_v1(data: &[u8], body_len: usize) -> Result<Self, PackError> {
        let mut cursor = Cursor::new(&data[..body_len]);
        let fanout = read_fanout(&mut cursor)?;
        let count = fanout[FANOUT_ENTRIES - 1] as usize;

        let expected = 4 * FANOUT_ENTRIES
            + count * (4 + object_id::RAW_LENGTH)
            + object_id::RAW_LENGTH;
        if body_len != expected {
            return Err(PackError::IndexTruncated);
        }

        let mut ids = Vec::with_capacity(count);
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            let offset = cursor
                .read_u32::<NetworkEndian>()
                .map_err(|_| PackError::IndexTruncated)?;
            offsets.push(offset as u64);
            ids.push(read_id(&mut cursor)?);
        }
        let pack_checksum = read_id(&mut cursor)?;

        let index = Self {
            version: 1,
            fanout,
            ids,
            offsets,
            crc32: Vec::new(),
            pack_checksum,
        };
        index.check_sorted()?;
        Ok(index)
    }

    fn parse_v2(data: &[u8], body_len: usize) -> Result<Self, PackError> {
        let mut cursor = Cursor::new(&data[..body_len]);
        cursor.set_position(4);
        let version = cursor
            .read_u32::<NetworkEndian>()
            .map_err(|_| PackError::IndexTruncated)?;
        if version != 2 {
            return Err(PackError::UnsupportedIndexVersion(version));
        }

        let fanout = read_fanout(&mut cursor)?;
        let count = fanout[FANOUT_ENTRIES - 1] as usize;

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            ids.push(read_id(&mut cursor)?);
        }
        let mut crc32 = Vec::with_capacity(count);
        for _ in 0..count {
            crc32.push(
                cursor
                    .read_u32::<NetworkEndian>()
                    .map_err(|_| PackError::IndexTruncated)?,
            );
        }

        let mut raw_offsets = Vec::with_capacity(count);
        let mut large_count = 0usize;
        for _ in 0..count {
            let raw = cursor
                .read_u32::<NetworkEndian>()
                .map_err(|_| PackError::IndexTruncated)?;
            if raw & LARGE_OFFSET_FLAG != 0 {
                large_count = large_count.max((raw & !LARGE_OFFSET_FLAG) as usize + 1);
            }
            raw_offsets.push(raw);
        }

        let mut large = Vec::with_capacity(large_count);
        for _ in 0..large_count {
            large.push(
                cursor
                    .read_u64::<NetworkEndian>()
                    .map_err(|_| PackError::IndexTruncated)?,
            );
        }

        let mut offsets = Vec::with_capacity(count);
        for raw in raw_offsets {
            if raw & LARGE_OFFSET_FLAG != 0 {
                let slot = (raw & !LARGE_OFFSET_FLAG) as usize;
                offsets.push(*large.get(slot).ok_or(PackError::IndexTruncated)?);
            } else {
                offsets.push(raw as u64);
            }
        }

        let pack_checksum = read_id(&mut cursor)?;
        if cursor.position() as usize != body_len {
            return Err(PackError::IndexTruncated);
        }

        let index = Self {
            version: 2,
            fanout,
            ids,
            offsets,
            crc32,
            pack_checksum,
        };
        index.check_sorted()?;
        Ok(index)
    }

    fn check_sorted(&self) -> Result<(), PackError> {
        for pair in self.ids.windows(2) {
            if pair[0] >= pair[1] {
                return Err(PackError::IndexTruncated);
            }
        }
        for window in self.fanout.windows(2) {
            if window[0] > window[1] {
                return Err(PackError::IndexTruncated);
            }
        }
        Ok(())
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn object_count(&self) -> usize {
        self.ids.len()
    }

    pub fn pack_checksum(&self) -> &ObjectId {
        &self.pack_checksum
    }

    /// Bracket of the sorted id table holding ids with the given first
    /// byte.
    fn bucket(&self, first_byte: u8) -> (usize, usize) {
        let start = if first_byte == 0 {
            0
        } else {
            self.fanout[first_byte as usize - 1] as usize
        };
        (start, self.fanout[first_byte as usize] as usize)
    }

    /// Pack offset of an object, by fanout-bracketed binary search.
    pub fn find(&self, id: &ObjectId) -> Option<u64> {
        let (start, end) = self.bucket(id.first_byte());
        let slot = self.ids[start..end]
            .binary_search_by(|probe| probe.as_bytes().cmp(id.as_bytes()))
            .ok()?;
        Some(self.offsets[start + slot])
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.find(id).is_some()
    }

    /// CRC32 of an object's compressed pack bytes. `None` for v1
    /// indexes, which do not record checksums.
    pub fn crc32(&self, id: &ObjectId) -> Option<u32> {
        if self.crc32.is_empty() {
            return None;
        }
        let (start, end) = self.bucket(id.first_byte());
        let slot = self.ids[start..end]
            .binary_search_by(|probe| probe.as_bytes().cmp(id.as_bytes()))
            .ok()?;
        Some(self.crc32[start + slot])
    }

    pub fn ids(&self) -> &[ObjectId] {
        &self.ids
    }

    /// Ids sharing a first byte, for abbreviated-id resolution.
    pub fn ids_with_first_byte(&self, first_byte: u8) -> &[ObjectId] {
        let (start, end) = self.bucket(first_byte);
        &self.ids[start..end]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ObjectId, u64)> {
        self.ids.iter().zip(self.offsets.iter().copied())
    }

    /// Serialize a v2 index for the given `(id, crc32, offset)` entries.
    pub fn write_v2(mut entries: Vec<(ObjectId, u32, u64)>, pack_checksum: &ObjectId) -> Vec<u8> {
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = Vec::new();
        out.extend_from_slice(&V2_MAGIC);
        out.write_u32::<NetworkEndian>(2).expect("vec write");

        let mut fanout = [0u32; FANOUT_ENTRIES];
        for (id, _, _) in &entries {
            fanout[id.first_byte() as usize] += 1;
        }
        let mut running = 0u32;
        for slot in fanout.iter_mut() {
            running += *slot;
            *slot = running;
        }
        for count in fanout {
            out.write_u32::<NetworkEndian>(count).expect("vec write");
        }

        for (id, _, _) in &entries {
            out.extend_from_slice(id.as_bytes());
        }
        for (_, crc, _) in &entries {
            out.write_u32::<NetworkEndian>(*crc).expect("vec write");
        }

        let mut large = Vec::new();
        for (_, _, offset) in &entries {
            if *offset < LARGE_OFFSET_FLAG as u64 {
                out.write_u32::<NetworkEndian>(*offset as u32)
                    .expect("vec write");
            } else {
                let slot = large.len() as u32;
                large.push(*offset);
                out.write_u32::<NetworkEndian>(LARGE_OFFSET_FLAG | slot)
                    .expect("vec write");
            }
        }
        for offset in large {
            out.write_u64::<NetworkEndian>(offset).expect("vec write");
        }

        out.extend_from_slice(pack_checksum.as_bytes());
        let trailer: [u8; 20] = Sha1::digest(&out).into();
        out.extend_from_slice(&trailer);
        out
    }
}

fn read_fanout(cursor: &mut Cursor<&[u8]>) -> Result<[u32; FANOUT_ENTRIES], PackError> {
    let mut fanout = [0u32; FANOUT_ENTRIES];
    for slot in fanout.iter_mut() {
        *slot = cursor
            .read_u32::<NetworkEndian>()
            .map_err(|_| PackError::IndexTruncated)?;
    }
    Ok(fanout)
}

fn read_id(cursor: &mut Cursor<&[u8]>) -> Result<ObjectId, PackError> {
    let mut raw = [0u8; object_id::RAW_LENGTH];
    std::io::Read::read_exact(cursor, &mut raw).map_err(|_| PackError::IndexTruncated)?;
    Ok(ObjectId::from_raw(raw))
}
