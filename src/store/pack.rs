//! Packfile reader
//!
//! A pack is a 12-byte header (`"PACK" || u32 version || u32 count`),
//! that many entries, and a trailing SHA-1 over everything before it.
//! Entries are full objects (kinds 1..4) or deltas: ofs-delta (6)
//! against a base earlier in the same pack, ref-delta (7) against a
//! base named by id, which may live in another pack or loose.
//!
//! Delta chains are resolved with an explicit stack rather than host
//! recursion, and reconstructed bases land in a per-pack LRU so long
//! chains stay affordable. Ref-delta bases outside this pack come from
//! an injected [`BaseResolver`] — in practice the composite store.

use crate::codec::{varint, zlib};
use crate::errors::{DeltaError, Error, PackError, Result};
use crate::objects::{ObjectId, ObjectType, RawObject, object_id};
use crate::store::base_cache::{BaseCache, DEFAULT_BUDGET};
use crate::store::delta;
use crate::store::pack_index::PackIndex;
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

pub(crate) const PACK_MAGIC: &[u8; 4] = b"PACK";
pub(crate) const PACK_HEADER_LEN: usize = 12;

/// Ref-delta chains are cycle-prone (ofs-delta chains are not, since
/// base offsets strictly decrease); cap their depth.
pub const MAX_REF_DELTA_DEPTH: usize = 50;

/// Source of ref-delta bases that live outside the pack being read.
pub trait BaseResolver {
    /// Returns the base object, or `None` when this resolver does not
    /// have it.
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<RawObject>>;
}

/// Resolver for packs read in isolation: every external base is absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBases;

impl BaseResolver for NoBases {
    fn resolve_base(&self, _id: &ObjectId) -> Result<Option<RawObject>> {
        Ok(None)
    }
}

/// One decoded entry header.
#[derive(Debug, Clone)]
pub(crate) enum PackEntry {
    Full {
        kind: ObjectType,
        size: u64,
        data_offset: usize,
    },
    OfsDelta {
        base_offset: u64,
        size: u64,
        data_offset: usize,
    },
    RefDelta {
        base: ObjectId,
        size: u64,
        data_offset: usize,
    },
}

/// Raw pack bytes with entry decoding. Shared between the mounted
/// [`Pack`] and the ingest indexer, which has no index yet.
#[derive(Debug, Clone)]
pub(crate) struct PackData {
    data: Bytes,
}

impl PackData {
    /// Validate the header and trailer length; returns the data and the
    /// declared object count. The trailer hash itself is only checked
    /// by [`PackData::verify_trailer`].
    pub(crate) fn parse(data: Bytes) -> Result<(Self, u32), PackError> {
        if data.len() < PACK_HEADER_LEN + object_id::RAW_LENGTH {
            return Err(PackError::Truncated { offset: data.len() });
        }
        if &data[..4] != PACK_MAGIC {
            let mut found = [0u8; 4];
            found.copy_from_slice(&data[..4]);
            return Err(PackError::BadMagic { found });
        }

        let version = u32::from_be_bytes(data[4..8].try_into().expect("4 bytes"));
        if version != 2 && version != 3 {
            return Err(PackError::UnsupportedVersion(version));
        }
        let count = u32::from_be_bytes(data[8..12].try_into().expect("4 bytes"));

        Ok((Self { data }, count))
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    /// The SHA-1 stored in the trailer.
    pub(crate) fn stored_trailer(&self) -> ObjectId {
        let start = self.data.len() - object_id::RAW_LENGTH;
        ObjectId::from_raw_slice(&self.data[start..]).expect("20 bytes")
    }

    pub(crate) fn verify_trailer(&self) -> Result<(), PackError> {
        let body = &self.data[..self.data.len() - object_id::RAW_LENGTH];
        let computed = ObjectId::for_bytes(body);
        let stored = self.stored_trailer();
        if computed != stored {
            return Err(PackError::TrailerMismatch { computed, stored });
        }
        Ok(())
    }

    /// Decode the entry header at a pack offset.
    pub(crate) fn entry_at(&self, offset: u64) -> Result<PackEntry, PackError> {
        let body_end = self.data.len() - object_id::RAW_LENGTH;
        if offset < PACK_HEADER_LEN as u64 || offset >= body_end as u64 {
            return Err(PackError::BadOffset(offset));
        }

        let mut pos = offset as usize;
        let header = varint::read_entry_header(&self.data, &mut pos)?;

        match header.kind_code {
            1..=4 => {
                let kind = ObjectType::from_pack_code(header.kind_code)
                    .expect("codes 1..=4 are object kinds");
                Ok(PackEntry::Full {
                    kind,
                    size: header.size,
                    data_offset: pos,
                })
            }
            6 => {
                let distance = varint::read_ofs_distance(&self.data, &mut pos)?;
                let base_offset = offset
                    .checked_sub(distance)
                    .filter(|_| distance != 0)
                    .ok_or(PackError::BadOffset(offset))?;
                Ok(PackEntry::OfsDelta {
                    base_offset,
                    size: header.size,
                    data_offset: pos,
                })
            }
            7 => {
                let end = pos + object_id::RAW_LENGTH;
                let raw = self
                    .data
                    .get(pos..end)
                    .ok_or(PackError::Truncated { offset: pos })?;
                let base = ObjectId::from_raw_slice(raw).expect("20 bytes");
                Ok(PackEntry::RefDelta {
                    base,
                    size: header.size,
                    data_offset: end,
                })
            }
            code => Err(PackError::UnknownEntryKind {
                code,
                offset: offset as usize,
            }),
        }
    }

    /// CRC32 over an entry's raw pack bytes (header plus compressed
    /// payload), as recorded in a v2 index.
    pub(crate) fn crc32_of(&self, start: usize, end: usize) -> u32 {
        let mut crc = flate2::Crc::new();
        crc.update(&self.data[start..end]);
        crc.sum()
    }

    /// Inflate the payload following an entry header.
    ///
    /// Returns the data and the compressed length, which locates the
    /// end of the entry for sequential scans.
    pub(crate) fn inflate_at(
        &self,
        data_offset: usize,
        size: u64,
    ) -> Result<zlib::InflatedEntry, PackError> {
        zlib::inflate_entry(&self.data, data_offset, size as usize)
    }

    /// Reconstruct the object at `offset`, resolving delta chains with
    /// an explicit stack.
    ///
    /// `in_pack` maps a ref-delta base id to its offset within this
    /// pack when present; `bases` answers for everything else. The
    /// cache lock is taken per access, never across a `bases` call,
    /// since external resolution may descend into other packs.
    pub(crate) fn resolve(
        &self,
        offset: u64,
        in_pack: &dyn Fn(&ObjectId) -> Option<u64>,
        bases: &dyn BaseResolver,
        cache: &Mutex<BaseCache>,
    ) -> Result<(ObjectType, Bytes)> {
        // Deltas collected on the way down, outermost first.
        let mut chain: Vec<(u64, Vec<u8>)> = Vec::new();
        let mut ref_hops = 0usize;
        let mut cursor = offset;

        let (kind, mut data) = loop {
            if let Some(hit) = lock(cache).get(cursor) {
                break hit;
            }

            match self.entry_at(cursor)? {
                PackEntry::Full {
                    kind,
                    size,
                    data_offset,
                } => {
                    let inflated = self.inflate_at(data_offset, size)?;
                    let bytes = Bytes::from(inflated.data);
                    lock(cache).insert(cursor, kind, bytes.clone());
                    break (kind, bytes);
                }
                PackEntry::OfsDelta {
                    base_offset,
                    size,
                    data_offset,
                } => {
                    let inflated = self.inflate_at(data_offset, size)?;
                    chain.push((cursor, inflated.data));
                    cursor = base_offset;
                }
                PackEntry::RefDelta {
                    base,
                    size,
                    data_offset,
                } => {
                    ref_hops += 1;
                    if ref_hops > MAX_REF_DELTA_DEPTH {
                        return Err(Error::Delta(DeltaError::DepthExceeded(
                            MAX_REF_DELTA_DEPTH,
                        )));
                    }

                    let inflated = self.inflate_at(data_offset, size)?;
                    chain.push((cursor, inflated.data));

                    if let Some(base_offset) = in_pack(&base) {
                        cursor = base_offset;
                    } else {
                        let raw = bases
                            .resolve_base(&base)?
                            .ok_or(PackError::MissingBase(base))?;
                        break (raw.kind(), raw.payload().clone());
                    }
                }
            }
        };

        for (slot, delta_bytes) in chain.iter().rev() {
            data = Bytes::from(delta::apply(&data, delta_bytes)?);
            lock(cache).insert(*slot, kind, data.clone());
        }

        Ok((kind, data))
    }
}

fn lock(cache: &Mutex<BaseCache>) -> std::sync::MutexGuard<'_, BaseCache> {
    cache.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A mounted packfile: pack bytes plus the side index, with a per-pack
/// base cache behind a mutex so concurrent readers can share it.
#[derive(Debug)]
pub struct Pack {
    pack_path: PathBuf,
    data: PackData,
    index: PackIndex,
    cache: Mutex<BaseCache>,
}

impl Pack {
    /// Mount `<name>.pack` together with its `<name>.idx`.
    pub fn open(pack_path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_budget(pack_path, DEFAULT_BUDGET)
    }

    // TODO: memory-map the packfile instead of reading it whole
    pub fn open_with_budget(pack_path: impl AsRef<Path>, cache_budget: usize) -> Result<Self> {
        let pack_path = pack_path.as_ref().to_path_buf();
        let idx_path = pack_path.with_extension("idx");

        let bytes = Bytes::from(fs::read(&pack_path)?);
        let (data, count) = PackData::parse(bytes)?;
        let index = PackIndex::open(&idx_path)?;

        if count as usize != index.object_count() {
            return Err(PackError::CountMismatch {
                pack: count,
                index: index.object_count() as u32,
            }
            .into());
        }

        Ok(Self {
            pack_path,
            data,
            index,
            cache: Mutex::new(BaseCache::new(cache_budget)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.pack_path
    }

    pub fn index(&self) -> &PackIndex {
        &self.index
    }

    pub fn object_count(&self) -> usize {
        self.index.object_count()
    }

    /// The pack's own id: the SHA-1 stored in its trailer.
    pub fn checksum(&self) -> ObjectId {
        self.data.stored_trailer()
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.index.contains(id)
    }

    pub fn find(&self, id: &ObjectId) -> Option<u64> {
        self.index.find(id)
    }

    pub fn iter_ids(&self) -> impl Iterator<Item = &ObjectId> {
        self.index.ids().iter()
    }

    /// Load an object by id, or `None` when this pack does not hold it.
    pub fn read(&self, id: &ObjectId, bases: &dyn BaseResolver) -> Result<Option<RawObject>> {
        let Some(offset) = self.index.find(id) else {
            return Ok(None);
        };
        let (kind, data) = self.read_at(offset, bases)?;
        Ok(Some(RawObject::new(kind, data)))
    }

    /// Reconstruct the object stored at a pack offset.
    pub fn read_at(&self, offset: u64, bases: &dyn BaseResolver) -> Result<(ObjectType, Bytes)> {
        self.data.resolve(
            offset,
            &|id: &ObjectId| self.index.find(id),
            bases,
            &self.cache,
        )
    }

    /// Full verification: trailer hash, then every object reconstructed
    /// and re-hashed against its index entry.
    pub fn verify(&self, bases: &dyn BaseResolver) -> Result<()> {
        self.data.verify_trailer()?;

        for (id, offset) in self.index.iter() {
            let (kind, data) = self.read_at(offset, bases)?;
            let actual = ObjectId::for_object(kind, &data);
            if actual != *id {
                return Err(PackError::ObjectMismatch {
                    offset,
                    expected: *id,
                    actual,
                }
                .into());
            }
        }
        Ok(())
    }
}
