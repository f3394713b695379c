#![allow(dead_code)]

//! Shared helpers: scratch repositories, hand-assembled packs and
//! deltas.

use flate2::Compression;
use flate2::write::ZlibEncoder;
use packrat::{ObjectId, ObjectType, Repository};
use sha1::{Digest, Sha1};
use std::io::Write;

/// A scratch repository in a temp directory.
pub fn scratch_repo() -> (assert_fs::TempDir, Repository) {
    let dir = assert_fs::TempDir::new().unwrap();
    let repo = Repository::init(dir.path()).unwrap();
    (dir, repo)
}

pub fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// One entry of a hand-assembled pack.
pub enum PackEntrySpec {
    Full(ObjectType, Vec<u8>),
    /// Delta against the entry at the given index of the spec list.
    OfsDelta(usize, Vec<u8>),
    /// Delta against an object identified by id (possibly external).
    RefDelta(ObjectId, Vec<u8>),
}

/// Assemble a syntactically valid pack stream, returning the bytes and
/// the offset of every entry.
pub fn build_pack(entries: &[PackEntrySpec]) -> (Vec<u8>, Vec<u64>) {
    let mut pack = Vec::new();
    pack.extend_from_slice(b"PACK");
    pack.extend_from_slice(&2u32.to_be_bytes());
    pack.extend_from_slice(&(entries.len() as u32).to_be_bytes());

    let mut offsets: Vec<u64> = Vec::new();
    for entry in entries {
        let offset = pack.len() as u64;
        match entry {
            PackEntrySpec::Full(kind, payload) => {
                pack.extend_from_slice(&entry_header(pack_code(*kind), payload.len()));
                pack.extend_from_slice(&deflate(payload));
            }
            PackEntrySpec::OfsDelta(base_index, delta) => {
                pack.extend_from_slice(&entry_header(6, delta.len()));
                pack.extend_from_slice(&ofs_distance(offset - offsets[*base_index]));
                pack.extend_from_slice(&deflate(delta));
            }
            PackEntrySpec::RefDelta(base, delta) => {
                pack.extend_from_slice(&entry_header(7, delta.len()));
                pack.extend_from_slice(base.as_bytes());
                pack.extend_from_slice(&deflate(delta));
            }
        }
        offsets.push(offset);
    }

    let trailer: [u8; 20] = Sha1::digest(&pack).into();
    pack.extend_from_slice(&trailer);
    (pack, offsets)
}

fn pack_code(kind: ObjectType) -> u8 {
    match kind {
        ObjectType::Commit => 1,
        ObjectType::Tree => 2,
        ObjectType::Blob => 3,
        ObjectType::Tag => 4,
    }
}

/// Pack entry header: kind in bits 4..6 of the first byte, size as
/// little-endian base-128 starting with the low four bits.
pub fn entry_header(kind_code: u8, size: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = size >> 4;
    let mut byte = (kind_code << 4) | (size & 0x0f) as u8;
    while rest > 0 {
        out.push(byte | 0x80);
        byte = (rest & 0x7f) as u8;
        rest >>= 7;
    }
    out.push(byte);
    out
}

/// Big-endian base-128 with the +1 continuation bias.
pub fn ofs_distance(mut distance: u64) -> Vec<u8> {
    let mut out = vec![(distance & 0x7f) as u8];
    distance >>= 7;
    while distance > 0 {
        distance -= 1;
        out.insert(0, 0x80 | (distance & 0x7f) as u8);
        distance >>= 7;
    }
    out
}

/// Minimal delta builder: size headers plus copy/insert ops.
pub struct DeltaBuilder {
    out: Vec<u8>,
}

impl DeltaBuilder {
    pub fn new(src_size: usize, dst_size: usize) -> Self {
        let mut out = Vec::new();
        push_size(&mut out, src_size);
        push_size(&mut out, dst_size);
        Self { out }
    }

    pub fn copy(mut self, offset: usize, len: usize) -> Self {
        let mut opcode = 0x80u8;
        let mut tail = Vec::new();
        for bit in 0..4 {
            let byte = ((offset >> (8 * bit)) & 0xff) as u8;
            if byte != 0 {
                opcode |= 1 << bit;
                tail.push(byte);
            }
        }
        for bit in 0..3 {
            let byte = ((len >> (8 * bit)) & 0xff) as u8;
            if byte != 0 {
                opcode |= 1 << (4 + bit);
                tail.push(byte);
            }
        }
        self.out.push(opcode);
        self.out.extend_from_slice(&tail);
        self
    }

    pub fn insert(mut self, data: &[u8]) -> Self {
        for chunk in data.chunks(0x7f) {
            self.out.push(chunk.len() as u8);
            self.out.extend_from_slice(chunk);
        }
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.out
    }
}

fn push_size(out: &mut Vec<u8>, mut size: usize) {
    loop {
        let byte = (size & 0x7f) as u8;
        size >>= 7;
        if size == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}
