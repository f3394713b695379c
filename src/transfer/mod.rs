//! Fetch-side pack ingest
//!
//! The transport hands over a byte stream that is exactly a packfile.
//! It is spooled to `pack/tmp_pack_*` with a running SHA-1 (the last
//! twenty bytes are the trailer and stay out of the hash), verified,
//! scanned object by object, and indexed: full objects hash directly,
//! in-pack delta bases resolve through an offset-to-id map, and
//! unresolved ref-delta bases fall back to the existing store. The
//! `.pack` is renamed into place first; the atomic rename of the `.idx`
//! publishes the pack.
//!
//! Failure at any step drops the temp files and leaves the store
//! untouched.

use crate::errors::{Error, PackError, Result};
use crate::objects::{ObjectId, object_id};
use crate::progress::{CancellationToken, Progress};
use crate::store::base_cache::{BaseCache, DEFAULT_BUDGET};
use crate::store::pack::{Pack, PackData, PackEntry};
use crate::store::pack_index::PackIndex;
use crate::store::ObjectStore;
use bytes::Bytes;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info};

/// Result of a successful ingest.
#[derive(Debug)]
pub struct IngestOutcome {
    /// The pack's id: the SHA-1 from its trailer.
    pub pack_id: ObjectId,
    pub object_count: u32,
    pub pack_path: PathBuf,
    pub index_path: PathBuf,
}

/// One scanned entry: its extent in the pack and its CRC32.
struct ScannedEntry {
    offset: u64,
    crc32: u32,
    is_delta: bool,
}

/// Stream a packfile into the store: spool, verify, index, publish.
pub fn ingest_pack<R: Read>(
    input: R,
    store: &mut ObjectStore,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<IngestOutcome> {
    let pack_dir = store.pack_dir();
    fs::create_dir_all(&pack_dir)?;

    let mut spool = tempfile::Builder::new()
        .prefix("tmp_pack_")
        .suffix(".pack")
        .tempfile_in(&pack_dir)?;
    let computed = spool_with_hash(input, spool.as_file_mut(), cancel)?;
    spool.as_file().sync_all()?;

    let (data, count) = PackData::parse(Bytes::from(fs::read(spool.path())?))?;
    let stored = data.stored_trailer();
    if computed != stored {
        return Err(PackError::TrailerMismatch { computed, stored }.into());
    }
    debug!(objects = count, pack = %stored, "pack stream verified");

    progress.begin(Some(count));
    let scanned = scan_entries(&data, count, progress, cancel)?;
    let ids = resolve_ids(&data, &scanned, store, cancel)?;

    let entries: Vec<(ObjectId, u32, u64)> = scanned
        .iter()
        .map(|entry| (ids[&entry.offset], entry.crc32, entry.offset))
        .collect();
    let index_bytes = PackIndex::write_v2(entries, &stored);

    // Publish: the pack first, then the index that makes it visible.
    let pack_path = pack_dir.join(format!("pack-{}.pack", stored.to_hex()));
    let index_path = pack_path.with_extension("idx");
    spool.persist(&pack_path).map_err(|e| Error::Io(e.error))?;

    let mut index_spool = tempfile::Builder::new()
        .prefix("tmp_idx_")
        .tempfile_in(&pack_dir)?;
    index_spool.write_all(&index_bytes)?;
    index_spool.as_file().sync_all()?;
    index_spool
        .persist(&index_path)
        .map_err(|e| Error::Io(e.error))?;

    let pack = Pack::open(&pack_path)?;
    store.add_pack(pack);
    info!(pack = %stored, objects = count, "pack ingested");

    Ok(IngestOutcome {
        pack_id: stored,
        object_count: count,
        pack_path,
        index_path,
    })
}

/// Copy the stream to disk while hashing everything but the trailing
/// twenty bytes.
fn spool_with_hash<R: Read>(
    mut input: R,
    out: &mut fs::File,
    cancel: &CancellationToken,
) -> Result<ObjectId> {
    let mut hasher = Sha1::new();
    let mut tail: Vec<u8> = Vec::with_capacity(2 * object_id::RAW_LENGTH);
    let mut buffer = [0u8; 64 * 1024];

    loop {
        cancel.check()?;
        let n = input.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        out.write_all(&buffer[..n])?;
        tail.extend_from_slice(&buffer[..n]);
        if tail.len() > object_id::RAW_LENGTH {
            let keep_from = tail.len() - object_id::RAW_LENGTH;
            hasher.update(&tail[..keep_from]);
            tail.drain(..keep_from);
        }
    }

    if tail.len() < object_id::RAW_LENGTH {
        return Err(PackError::Truncated { offset: tail.len() }.into());
    }
    Ok(ObjectId::from_raw(
        hasher.finalize().into(),
    ))
}

/// Walk the pack sequentially, recording each entry's offset, extent
/// and CRC32 over its raw bytes.
fn scan_entries(
    data: &PackData,
    count: u32,
    progress: &mut dyn Progress,
    cancel: &CancellationToken,
) -> Result<Vec<ScannedEntry>> {
    let mut scanned = Vec::with_capacity(count as usize);
    let mut offset = crate::store::pack::PACK_HEADER_LEN as u64;

    for done in 0..count {
        cancel.check()?;

        let (data_offset, size, is_delta) = match data.entry_at(offset)? {
            PackEntry::Full {
                size, data_offset, ..
            } => (data_offset, size, false),
            PackEntry::OfsDelta {
                size, data_offset, ..
            } => (data_offset, size, true),
            PackEntry::RefDelta {
                size, data_offset, ..
            } => (data_offset, size, true),
        };
        let inflated = data.inflate_at(data_offset, size)?;
        let end = data_offset + inflated.consumed;

        scanned.push(ScannedEntry {
            offset,
            crc32: data.crc32_of(offset as usize, end),
            is_delta,
        });
        offset = end as u64;
        progress.tick(done + 1);
    }

    let body_end = (data.len() - object_id::RAW_LENGTH) as u64;
    if offset != body_end {
        // Bytes between the last entry and the trailer.
        return Err(PackError::Truncated {
            offset: offset as usize,
        }
        .into());
    }
    Ok(scanned)
}

/// Compute every entry's object id. Full objects hash directly;
/// deltas resolve against in-pack bases via a lazily grown
/// offset-to-id map, or against the existing store for external
/// ref-delta bases. Deltas whose in-pack base is itself unresolved
/// are retried until a round makes no progress.
fn resolve_ids(
    data: &PackData,
    scanned: &[ScannedEntry],
    store: &ObjectStore,
    cancel: &CancellationToken,
) -> Result<HashMap<u64, ObjectId>> {
    let cache = Mutex::new(BaseCache::new(DEFAULT_BUDGET));
    let mut id_by_offset: HashMap<u64, ObjectId> = HashMap::new();
    let mut offset_by_id: HashMap<ObjectId, u64> = HashMap::new();
    let mut pending: Vec<u64> = Vec::new();

    for entry in scanned {
        cancel.check()?;
        if entry.is_delta {
            pending.push(entry.offset);
            continue;
        }
        let (kind, payload) = data.resolve(entry.offset, &|_| None, store, &cache)?;
        let id = ObjectId::for_object(kind, &payload);
        id_by_offset.insert(entry.offset, id);
        offset_by_id.insert(id, entry.offset);
    }

    while !pending.is_empty() {
        let round_size = pending.len();
        let mut deferred = Vec::new();
        let mut first_miss: Option<Error> = None;

        for offset in pending {
            cancel.check()?;
            let lookup = |id: &ObjectId| offset_by_id.get(id).copied();
            match data.resolve(offset, &lookup, store, &cache) {
                Ok((kind, payload)) => {
                    let id = ObjectId::for_object(kind, &payload);
                    id_by_offset.insert(offset, id);
                    offset_by_id.insert(id, offset);
                }
                Err(error @ Error::Pack(PackError::MissingBase(_))) => {
                    // The base may be a delta later in the pack; retry
                    // next round.
                    first_miss.get_or_insert(error);
                    deferred.push(offset);
                }
                Err(error) => return Err(error),
            }
        }

        if deferred.len() == round_size {
            // A full round without progress: the remaining bases are
            // genuinely absent everywhere.
            match first_miss {
                Some(error) => return Err(error),
                None => break,
            }
        }
        pending = deferred;
    }

    Ok(id_by_offset)
}
