//! Loose object store
//!
//! One zlib-compressed file per object at `<root>/<xx>/<yyyy…>`.
//!
//! ## Format
//!
//! The standard form is a single zlib stream inflating to
//! `<kind> <size>\0<payload>`. A headerless legacy form is also read:
//! the file starts with a plaintext pack-style type-and-size varint,
//! followed by a zlib stream of the payload alone. Sniffing the leading
//! bytes for the zlib magic tells the two apart. All writes use the
//! standard form.
//!
//! Writes are idempotent and atomic: the compressed stream goes to a
//! temp file in the fanout directory, is fsynced, then renamed into
//! place.

use crate::codec::{varint, zlib};
use crate::errors::{Error, ObjectFormatError, Result};
use crate::objects::{ObjectId, ObjectType, RawObject};
use bytes::Bytes;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Store of one-file-per-object loose objects under a single root
/// (typically `objects/`).
#[derive(Debug, Clone)]
pub struct LooseStore {
    root: PathBuf,
}

impl LooseStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, id: &ObjectId) -> PathBuf {
        self.root.join(id.loose_path())
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.object_path(id).is_file()
    }

    /// Load an object, or `None` when the file does not exist. The
    /// composite store decides when absence becomes [`Error::Missing`].
    pub fn get(&self, id: &ObjectId) -> Result<Option<RawObject>> {
        let path = self.object_path(id);
        let compressed = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let raw = if zlib::sniff_zlib(&compressed) {
            parse_standard(&compressed)?
        } else {
            parse_legacy(&compressed)?
        };
        Ok(Some(raw))
    }

    /// Write an object, returning its id. A no-op when the object is
    /// already present.
    pub fn put(&self, kind: ObjectType, payload: &[u8]) -> Result<ObjectId> {
        self.put_raw(&RawObject::new(kind, Bytes::copy_from_slice(payload)))
    }

    pub fn put_raw(&self, raw: &RawObject) -> Result<ObjectId> {
        let id = raw.id();
        let path = self.object_path(&id);
        if path.exists() {
            return Ok(id);
        }

        let dir = path
            .parent()
            .expect("loose path always has a fanout directory");
        fs::create_dir_all(dir)?;

        let compressed = zlib::deflate(&raw.framed())?;
        let mut tmp = tempfile::Builder::new()
            .prefix("tmp_obj_")
            .tempfile_in(dir)?;
        tmp.write_all(&compressed)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;

        Ok(id)
    }

    /// Scan the two-level directory layout for every stored id.
    pub fn iter_ids(&self) -> Result<Vec<ObjectId>> {
        let mut ids = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };

        for dir_entry in entries {
            let dir_entry = dir_entry?;
            let dir_name = dir_entry.file_name();
            let Some(prefix) = dir_name.to_str() else {
                continue;
            };
            if prefix.len() != 2 || !prefix.bytes().all(|b| b.is_ascii_hexdigit()) {
                continue;
            }

            for file_entry in fs::read_dir(dir_entry.path())? {
                let file_entry = file_entry?;
                let file_name = file_entry.file_name();
                let Some(rest) = file_name.to_str() else {
                    continue;
                };
                if let Ok(id) = ObjectId::from_hex(&format!("{prefix}{rest}")) {
                    ids.push(id);
                }
            }
        }

        Ok(ids)
    }

    /// All stored ids whose hex form starts with `prefix`.
    ///
    /// Prefixes of at least two characters only touch one fanout
    /// directory; shorter ones scan the whole store.
    pub fn find_prefix(&self, prefix: &str) -> Result<Vec<ObjectId>> {
        if prefix.len() >= 2 {
            let dir_path = self.root.join(&prefix[..2]);
            let file_prefix = &prefix[2..];
            let mut matches = Vec::new();

            let entries = match fs::read_dir(&dir_path) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(matches),
                Err(e) => return Err(e.into()),
            };
            for entry in entries {
                let entry = entry?;
                let file_name = entry.file_name();
                let Some(rest) = file_name.to_str() else {
                    continue;
                };
                if rest.starts_with(file_prefix) {
                    if let Ok(id) = ObjectId::from_hex(&format!("{}{rest}", &prefix[..2])) {
                        matches.push(id);
                    }
                }
            }
            Ok(matches)
        } else {
            Ok(self
                .iter_ids()?
                .into_iter()
                .filter(|id| id.to_hex().starts_with(prefix))
                .collect())
        }
    }
}

fn parse_standard(compressed: &[u8]) -> Result<RawObject> {
    let inflated = zlib::inflate(compressed)?;
    let nul = inflated
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| object_err("header missing NUL terminator"))?;

    let header = &inflated[..nul];
    let space = header
        .iter()
        .position(|&b| b == b' ')
        .ok_or_else(|| object_err("header missing space"))?;

    let kind = ObjectType::from_wire(&header[..space])?;
    let size = parse_decimal(&header[space + 1..])
        .ok_or_else(|| object_err("header size is not a decimal integer"))?;

    let payload = &inflated[nul + 1..];
    if payload.len() != size {
        return Err(object_err(format!(
            "header declares {size} bytes, payload has {}",
            payload.len()
        )));
    }

    Ok(RawObject::new(kind, Bytes::copy_from_slice(payload)))
}

fn parse_legacy(data: &[u8]) -> Result<RawObject> {
    let mut pos = 0;
    let header = varint::read_entry_header(data, &mut pos)
        .map_err(|_| object_err("truncated legacy header"))?;
    let kind = ObjectType::from_pack_code(header.kind_code)
        .ok_or_else(|| object_err(format!("legacy header kind {}", header.kind_code)))?;

    let entry = zlib::inflate_entry(data, pos, header.size as usize)
        .map_err(|e| object_err(format!("legacy payload: {e}")))?;
    if pos + entry.consumed != data.len() {
        return Err(object_err("trailing bytes after legacy payload"));
    }

    Ok(RawObject::new(kind, Bytes::from(entry.data)))
}

fn object_err(reason: impl Into<String>) -> Error {
    Error::Object(ObjectFormatError::BadLooseHeader(reason.into()))
}

fn parse_decimal(text: &[u8]) -> Option<usize> {
    if text.is_empty() {
        return None;
    }
    let mut value = 0usize;
    for &byte in text {
        if !byte.is_ascii_digit() {
            return None;
        }
        value = value
            .checked_mul(10)?
            .checked_add((byte - b'0') as usize)?;
    }
    Some(value)
}
