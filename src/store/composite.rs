//! Composite object store
//!
//! The union of one writable loose store, any number of mounted packs,
//! and read-only alternate loose roots. Lookups consult packs in
//! most-recently-added order, then loose, then alternates; writes always
//! go loose. A corrupt pack is logged and skipped so it never masks a
//! hit elsewhere; [`Error::Missing`] surfaces only after every component
//! has answered.

use crate::errors::{DeltaError, Error, ObjectFormatError, Result};
use crate::objects::{
    Blob, Commit, Object, ObjectId, ObjectType, ParseMode, RawObject, Tag, Tree, object_id,
};
use crate::store::loose::LooseStore;
use crate::store::pack::{BaseResolver, MAX_REF_DELTA_DEPTH, Pack};
use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Union of loose objects, packs, and alternates.
#[derive(Debug)]
pub struct ObjectStore {
    loose: LooseStore,
    alternates: Vec<LooseStore>,
    /// Most recently added first.
    packs: Vec<Arc<Pack>>,
    parse_mode: ParseMode,
    verify_reads: bool,
}

impl ObjectStore {
    /// Open the store rooted at an `objects/` directory, mounting every
    /// pack under `pack/` that has a readable index.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let mut store = Self {
            loose: LooseStore::new(root.into()),
            alternates: Vec::new(),
            packs: Vec::new(),
            parse_mode: ParseMode::Strict,
            verify_reads: false,
        };
        store.rescan_packs()?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        self.loose.root()
    }

    pub fn pack_dir(&self) -> PathBuf {
        self.loose.root().join("pack")
    }

    /// Additional loose roots consulted for reads only
    /// (`GIT_ALTERNATE_OBJECT_DIRECTORIES`).
    pub fn add_alternate(&mut self, root: impl Into<PathBuf>) {
        self.alternates.push(LooseStore::new(root.into()));
    }

    /// Parse mode for typed loads; strict by default.
    pub fn set_parse_mode(&mut self, mode: ParseMode) {
        self.parse_mode = mode;
    }

    /// When set, every read is re-hashed against the id it was asked
    /// for.
    pub fn set_verify_reads(&mut self, verify: bool) {
        self.verify_reads = verify;
    }

    /// Mount every `pack/*.idx` with its packfile. Unreadable packs are
    /// skipped with a warning; they do not fail the scan.
    pub fn rescan_packs(&mut self) -> Result<()> {
        let pack_dir = self.pack_dir();
        let entries = match fs::read_dir(&pack_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let mounted: BTreeSet<PathBuf> =
            self.packs.iter().map(|p| p.path().to_path_buf()).collect();

        for entry in entries {
            let entry = entry?;
            let idx_path = entry.path();
            if idx_path.extension().and_then(|e| e.to_str()) != Some("idx") {
                continue;
            }
            let pack_path = idx_path.with_extension("pack");
            if mounted.contains(&pack_path) || !pack_path.is_file() {
                continue;
            }

            match Pack::open(&pack_path) {
                Ok(pack) => self.packs.push(Arc::new(pack)),
                Err(e) => warn!(pack = %pack_path.display(), error = %e, "skipping unreadable pack"),
            }
        }
        Ok(())
    }

    /// Register a freshly written pack ahead of the existing ones.
    pub fn add_pack(&mut self, pack: Pack) {
        self.packs.insert(0, Arc::new(pack));
    }

    pub fn packs(&self) -> &[Arc<Pack>] {
        &self.packs
    }

    /// Store a new loose object.
    pub fn put(&self, kind: ObjectType, payload: &[u8]) -> Result<ObjectId> {
        self.loose.put(kind, payload)
    }

    pub fn put_object(&self, object: &Object) -> Result<ObjectId> {
        self.loose.put(object.kind(), &object.serialize())
    }

    pub fn contains(&self, id: &ObjectId) -> bool {
        self.packs.iter().any(|pack| pack.contains(id))
            || self.loose.contains(id)
            || self.alternates.iter().any(|alt| alt.contains(id))
    }

    /// Load the raw form of an object.
    pub fn get_raw(&self, id: &ObjectId) -> Result<RawObject> {
        let bases = ChainBases {
            store: self,
            depth: Cell::new(0),
        };
        match self.lookup_raw(id, &bases)? {
            Some(raw) => Ok(raw),
            None => Err(Error::Missing(*id)),
        }
    }

    /// Load and decode an object.
    pub fn get(&self, id: &ObjectId) -> Result<Object> {
        let raw = self.get_raw(id)?;
        Ok(raw.decode(self.parse_mode)?)
    }

    pub fn blob(&self, id: &ObjectId) -> Result<Blob> {
        match self.get(id)? {
            Object::Blob(blob) => Ok(blob),
            other => Err(unexpected(id, "blob", &other)),
        }
    }

    pub fn tree(&self, id: &ObjectId) -> Result<Tree> {
        match self.get(id)? {
            Object::Tree(tree) => Ok(tree),
            other => Err(unexpected(id, "tree", &other)),
        }
    }

    pub fn commit(&self, id: &ObjectId) -> Result<Commit> {
        match self.get(id)? {
            Object::Commit(commit) => Ok(commit),
            other => Err(unexpected(id, "commit", &other)),
        }
    }

    pub fn tag(&self, id: &ObjectId) -> Result<Tag> {
        match self.get(id)? {
            Object::Tag(tag) => Ok(tag),
            other => Err(unexpected(id, "tag", &other)),
        }
    }

    /// Every id in the store, deduplicated across components.
    pub fn iter_ids(&self) -> Result<BTreeSet<ObjectId>> {
        let mut ids = BTreeSet::new();
        for pack in &self.packs {
            ids.extend(pack.iter_ids().copied());
        }
        ids.extend(self.loose.iter_ids()?);
        for alt in &self.alternates {
            ids.extend(alt.iter_ids()?);
        }
        Ok(ids)
    }

    /// Resolve an abbreviated hex id to the unique object it names.
    pub fn resolve_prefix(&self, prefix: &str) -> Result<ObjectId> {
        if prefix.len() < 2
            || prefix.len() > object_id::HEX_LENGTH
            || !prefix.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
        {
            return Err(ObjectFormatError::BadId(prefix.to_string()).into());
        }

        if prefix.len() == object_id::HEX_LENGTH {
            let id = ObjectId::from_hex(prefix)?;
            return if self.contains(&id) {
                Ok(id)
            } else {
                Err(Error::Missing(id))
            };
        }

        let first_byte = u8::from_str_radix(&prefix[..2], 16).expect("validated hex");
        let mut matches: BTreeSet<ObjectId> = BTreeSet::new();

        for pack in &self.packs {
            for id in pack.index().ids_with_first_byte(first_byte) {
                if id.to_hex().starts_with(prefix) {
                    matches.insert(*id);
                }
            }
        }
        matches.extend(self.loose.find_prefix(prefix)?);
        for alt in &self.alternates {
            matches.extend(alt.find_prefix(prefix)?);
        }

        let mut iter = matches.into_iter();
        match (iter.next(), iter.next()) {
            (Some(id), None) => Ok(id),
            (Some(_), Some(_)) => Err(Error::AmbiguousPrefix(prefix.to_string())),
            (None, _) => Err(Error::MissingPrefix(prefix.to_string())),
        }
    }

    /// The fetch-side want computation: ids advertised by a remote that
    /// are not already resolvable locally.
    pub fn determine_wants_all(&self, refs: &BTreeMap<String, ObjectId>) -> Vec<ObjectId> {
        let mut wants = BTreeSet::new();
        for (name, id) in refs {
            if id.is_zero() || name.ends_with("^{}") {
                // Deletions and peeled annotations carry no new objects.
                continue;
            }
            if !self.contains(id) {
                wants.insert(*id);
            }
        }
        wants.into_iter().collect()
    }

    /// Walk the components in precedence order. Pack failures are
    /// recorded and the search continues; the first recorded error
    /// surfaces only if nothing else can serve the object.
    fn lookup_raw(&self, id: &ObjectId, bases: &dyn BaseResolver) -> Result<Option<RawObject>> {
        let mut deferred: Option<Error> = None;

        for pack in &self.packs {
            match pack.read(id, bases) {
                Ok(Some(raw)) => return self.checked(id, raw).map(Some),
                Ok(None) => {}
                Err(e) => {
                    warn!(pack = %pack.path().display(), id = %id, error = %e,
                          "pack lookup failed, trying other stores");
                    deferred.get_or_insert(e);
                }
            }
        }

        if let Some(raw) = self.loose.get(id)? {
            return self.checked(id, raw).map(Some);
        }
        for alt in &self.alternates {
            if let Some(raw) = alt.get(id)? {
                return self.checked(id, raw).map(Some);
            }
        }

        match deferred {
            Some(error) => Err(error),
            None => Ok(None),
        }
    }

    fn checked(&self, id: &ObjectId, raw: RawObject) -> Result<RawObject> {
        if self.verify_reads {
            let actual = raw.id();
            if actual != *id {
                return Err(ObjectFormatError::HashMismatch {
                    expected: *id,
                    actual,
                }
                .into());
            }
        }
        Ok(raw)
    }
}

impl BaseResolver for ObjectStore {
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<RawObject>> {
        let bases = ChainBases {
            store: self,
            depth: Cell::new(0),
        };
        self.lookup_raw(id, &bases)
    }
}

/// Depth-guarded resolver threaded through nested pack lookups, so a
/// cross-pack ref-delta cycle terminates instead of recursing forever.
struct ChainBases<'a> {
    store: &'a ObjectStore,
    depth: Cell<usize>,
}

impl BaseResolver for ChainBases<'_> {
    fn resolve_base(&self, id: &ObjectId) -> Result<Option<RawObject>> {
        let depth = self.depth.get() + 1;
        if depth > MAX_REF_DELTA_DEPTH {
            return Err(DeltaError::DepthExceeded(MAX_REF_DELTA_DEPTH).into());
        }
        self.depth.set(depth);
        let result = self.store.lookup_raw(id, self);
        self.depth.set(depth - 1);
        result
    }
}

fn unexpected(id: &ObjectId, expected: &'static str, got: &Object) -> Error {
    ObjectFormatError::UnexpectedKind {
        id: *id,
        expected,
        actual: got.kind().as_str(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use pretty_assertions::assert_eq;

    fn scratch() -> (assert_fs::TempDir, ObjectStore) {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn put_get_roundtrip() {
        let (_dir, store) = scratch();
        let id = store.put(ObjectType::Blob, b"content").unwrap();
        let raw = store.get_raw(&id).unwrap();
        assert_eq!(raw.payload().as_ref(), b"content");
        assert!(store.contains(&id));
    }

    #[test]
    fn missing_is_distinct() {
        let (_dir, store) = scratch();
        let absent = ObjectId::from_raw([9; 20]);
        assert!(matches!(store.get_raw(&absent), Err(Error::Missing(id)) if id == absent));
    }

    #[test]
    fn typed_load_rejects_kind_mismatch() {
        let (_dir, store) = scratch();
        let id = store.put(ObjectType::Blob, b"content").unwrap();
        assert!(store.blob(&id).is_ok());
        assert!(matches!(
            store.tree(&id),
            Err(Error::Object(ObjectFormatError::UnexpectedKind { .. }))
        ));
    }

    #[test]
    fn alternates_serve_reads_only() {
        let alt_dir = assert_fs::TempDir::new().unwrap();
        let alt = LooseStore::new(alt_dir.path());
        let id = alt.put(ObjectType::Blob, b"elsewhere").unwrap();

        let (_dir, mut store) = scratch();
        assert!(!store.contains(&id));
        store.add_alternate(alt_dir.path());
        assert!(store.contains(&id));
        assert_eq!(store.get_raw(&id).unwrap().payload().as_ref(), b"elsewhere");
        // The object is not copied into the primary store.
        assert!(store.loose.get(&id).unwrap().is_none());
    }

    #[test]
    fn verify_reads_catches_corruption() {
        let (_dir, mut store) = scratch();
        let id = store.put(ObjectType::Blob, b"honest").unwrap();

        // Rewrite the loose file under the same path with other content.
        let path = store.root().join(id.loose_path());
        let forged = RawObject::new(ObjectType::Blob, Bytes::from_static(b"forged"));
        std::fs::write(&path, crate::codec::zlib::deflate(&forged.framed()).unwrap()).unwrap();

        assert!(store.get_raw(&id).is_ok());
        store.set_verify_reads(true);
        assert!(matches!(
            store.get_raw(&id),
            Err(Error::Object(ObjectFormatError::HashMismatch { .. }))
        ));
    }

    #[test]
    fn prefix_resolution() {
        let (_dir, store) = scratch();
        let id = store.put(ObjectType::Blob, b"hello\n").unwrap();

        assert_eq!(store.resolve_prefix("ce0136").unwrap(), id);
        assert_eq!(store.resolve_prefix(&id.to_hex()).unwrap(), id);
        assert!(matches!(
            store.resolve_prefix("dead"),
            Err(Error::MissingPrefix(_))
        ));
        assert!(matches!(store.resolve_prefix("x"), Err(Error::Object(_))));
    }

    #[test]
    fn ambiguous_prefix_is_reported() {
        let (dir, store) = scratch();
        // Two loose files sharing a fanout directory and first hex char.
        for fill in [0x10u8, 0x1f] {
            let mut raw = [fill; 20];
            raw[0] = 0xab;
            let id = ObjectId::from_raw(raw);
            let path = dir.path().join(id.loose_path());
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(&path, crate::codec::zlib::deflate(b"blob 0\0").unwrap()).unwrap();
        }

        assert!(matches!(
            store.resolve_prefix("ab"),
            Err(Error::AmbiguousPrefix(_))
        ));
    }

    #[test]
    fn wants_excludes_known_zero_and_peeled() {
        let (_dir, store) = scratch();
        let known = store.put(ObjectType::Blob, b"known").unwrap();
        let wanted = ObjectId::from_raw([0x42; 20]);

        let refs = BTreeMap::from([
            ("refs/heads/main".to_string(), wanted),
            ("refs/heads/old".to_string(), known),
            ("refs/tags/v1^{}".to_string(), ObjectId::from_raw([0x43; 20])),
            ("refs/heads/gone".to_string(), ObjectId::zero()),
        ]);

        assert_eq!(store.determine_wants_all(&refs), vec![wanted]);
    }
}
