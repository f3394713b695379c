//! Tree object
//!
//! Trees are directory snapshots: a flat list of named entries pointing
//! at blobs and subtrees.
//!
//! ## Format
//!
//! Each entry is `<octal-mode> SP <name> NUL <20-byte-sha>`, with no
//! separator between entries. Names are raw bytes containing neither `/`
//! nor `NUL`, and must be unique within a tree.
//!
//! ## Ordering
//!
//! Entries are sorted byte-wise by name with a synthetic `/` appended to
//! directory entries, so `a.txt` sorts before the directory `a`. A pure
//! byte-wise "name order" view is provided for the diff engine, which
//! merges trees by path.

use crate::errors::ObjectFormatError;
use crate::objects::{EntryMode, Object, ObjectId, ObjectType, ParseMode, object_id};
use bytes::Bytes;
use std::cmp::Ordering;

/// One tree entry: mode, name, and the id of the referenced object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub mode: EntryMode,
    pub name: Bytes,
    pub oid: ObjectId,
}

impl TreeEntry {
    pub fn new(mode: EntryMode, name: impl Into<Bytes>, oid: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            oid,
        }
    }

    fn validate_name(&self) -> Result<(), ObjectFormatError> {
        if self.name.is_empty() {
            return Err(ObjectFormatError::malformed("tree", 0, "empty entry name"));
        }
        if self.name.contains(&b'/') || self.name.contains(&b'\0') {
            return Err(ObjectFormatError::malformed(
                "tree",
                0,
                format!(
                    "entry name {:?} contains a path separator or NUL",
                    String::from_utf8_lossy(&self.name)
                ),
            ));
        }
        Ok(())
    }
}

/// Canonical tree-entry comparator: byte-wise on the name, with `/`
/// appended to directory entries.
pub fn canonical_cmp(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    cmp_with_suffix(&a.name, a.mode.is_tree(), &b.name, b.mode.is_tree())
}

fn cmp_with_suffix(a: &[u8], a_dir: bool, b: &[u8], b_dir: bool) -> Ordering {
    let common = a.len().min(b.len());
    match a[..common].cmp(&b[..common]) {
        Ordering::Equal => {}
        other => return other,
    }

    // One name is a prefix of the other; compare the next effective byte.
    let a_next = a.get(common).copied().or(if a_dir { Some(b'/') } else { None });
    let b_next = b.get(common).copied().or(if b_dir { Some(b'/') } else { None });
    match (a_next, b_next) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(x), Some(y)) => x.cmp(&y).then_with(|| {
            // Identical up to the synthetic suffix: shorter sorts first.
            (a.len() + a_dir as usize).cmp(&(b.len() + b_dir as usize))
        }),
    }
}

/// Directory snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// Build a tree from entries, sorting them canonically.
    ///
    /// Rejects duplicate or malformed names.
    pub fn new(mut entries: Vec<TreeEntry>) -> Result<Self, ObjectFormatError> {
        for entry in &entries {
            entry.validate_name()?;
        }
        entries.sort_by(canonical_cmp);
        let tree = Self { entries };
        tree.check_duplicates()?;
        Ok(tree)
    }

    /// Parse a tree payload.
    ///
    /// Strict mode requires canonical ordering, unique names, and modes
    /// without a leading zero. Tolerant mode accepts legacy orderings
    /// and zero-padded modes for read-only ingestion; entries keep their
    /// on-disk order so re-serialization is byte-identical.
    pub fn parse(payload: &[u8], mode: ParseMode) -> Result<Self, ObjectFormatError> {
        let mut entries = Vec::new();
        let mut pos = 0;

        while pos < payload.len() {
            let entry_start = pos;
            let space = find(payload, pos, b' ').ok_or_else(|| {
                ObjectFormatError::malformed("tree", entry_start, "unterminated mode")
            })?;
            let entry_mode = EntryMode::parse(&payload[pos..space], mode)
                .map_err(|e| at_offset(e, entry_start))?;

            let nul = find(payload, space + 1, b'\0').ok_or_else(|| {
                ObjectFormatError::malformed("tree", entry_start, "unterminated name")
            })?;
            let name = &payload[space + 1..nul];
            if name.is_empty() {
                return Err(ObjectFormatError::malformed(
                    "tree",
                    entry_start,
                    "empty entry name",
                ));
            }
            if name.contains(&b'/') {
                return Err(ObjectFormatError::malformed(
                    "tree",
                    entry_start,
                    "entry name contains a path separator",
                ));
            }

            let sha_end = nul + 1 + object_id::RAW_LENGTH;
            if sha_end > payload.len() {
                return Err(ObjectFormatError::malformed(
                    "tree",
                    entry_start,
                    "truncated object id",
                ));
            }
            let oid = ObjectId::from_raw_slice(&payload[nul + 1..sha_end])?;

            entries.push(TreeEntry::new(
                entry_mode,
                Bytes::copy_from_slice(name),
                oid,
            ));
            pos = sha_end;
        }

        let tree = Self { entries };
        if mode == ParseMode::Strict {
            tree.check_order()?;
        }
        // A file and a directory sharing a name are not adjacent in
        // canonical order, so the duplicate scan is separate.
        tree.check_duplicates()?;
        Ok(tree)
    }

    fn check_order(&self) -> Result<(), ObjectFormatError> {
        for pair in self.entries.windows(2) {
            match canonical_cmp(&pair[0], &pair[1]) {
                Ordering::Less => {}
                Ordering::Equal => {
                    return Err(ObjectFormatError::malformed(
                        "tree",
                        0,
                        format!(
                            "duplicate entry name {:?}",
                            String::from_utf8_lossy(&pair[0].name)
                        ),
                    ));
                }
                Ordering::Greater => {
                    return Err(ObjectFormatError::malformed(
                        "tree",
                        0,
                        format!(
                            "entries {:?} and {:?} are out of order",
                            String::from_utf8_lossy(&pair[0].name),
                            String::from_utf8_lossy(&pair[1].name)
                        ),
                    ));
                }
            }
        }
        Ok(())
    }

    fn check_duplicates(&self) -> Result<(), ObjectFormatError> {
        let mut names: Vec<&[u8]> = self.entries.iter().map(|e| e.name.as_ref()).collect();
        names.sort_unstable();
        for pair in names.windows(2) {
            if pair[0] == pair[1] {
                return Err(ObjectFormatError::malformed(
                    "tree",
                    0,
                    format!(
                        "duplicate entry name {:?}",
                        String::from_utf8_lossy(pair[0])
                    ),
                ));
            }
        }
        Ok(())
    }

    pub fn serialize(&self) -> Bytes {
        let mut out = Vec::new();
        for entry in &self.entries {
            out.extend_from_slice(entry.mode.to_octal().as_bytes());
            out.push(b' ');
            out.extend_from_slice(&entry.name);
            out.push(0);
            out.extend_from_slice(entry.oid.as_bytes());
        }
        Bytes::from(out)
    }

    pub fn id(&self) -> ObjectId {
        ObjectId::for_object(ObjectType::Tree, &self.serialize())
    }

    /// Entries in stored (canonical) order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, name: &[u8]) -> Option<&TreeEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries sorted by pure byte-wise name order, the order in which
    /// the diff engine merges two trees by path.
    pub fn entries_name_order(&self) -> Vec<&TreeEntry> {
        let mut refs: Vec<&TreeEntry> = self.entries.iter().collect();
        refs.sort_by(|a, b| a.name.cmp(&b.name));
        refs
    }
}

impl From<Tree> for Object {
    fn from(tree: Tree) -> Self {
        Object::Tree(tree)
    }
}

fn find(data: &[u8], from: usize, needle: u8) -> Option<usize> {
    data[from..].iter().position(|&b| b == needle).map(|i| from + i)
}

fn at_offset(err: ObjectFormatError, offset: usize) -> ObjectFormatError {
    match err {
        ObjectFormatError::Malformed { kind, reason, .. } => {
            ObjectFormatError::Malformed { kind, offset, reason }
        }
        other => other,
    }
}
