//! Reference store
//!
//! References are human-readable names mapping to object ids. A ref is
//! either direct (file contains `<40-hex>\n`) or symbolic (`ref: <name>\n`,
//! `HEAD` being the usual case). Loose refs live as files under the git
//! directory; `packed-refs` holds a read-only snapshot that loose files
//! shadow.
//!
//! Writes go to loose refs only, by atomic temp-file rename; this store
//! never rewrites `packed-refs`. Deleting a ref that also has a packed
//! entry therefore un-shadows the packed value.

pub mod packed;

use crate::errors::{Error, RefError, Result};
use crate::objects::ObjectId;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub use packed::PackedRef;

/// Name of the symbolic head reference.
pub const HEAD: &str = "HEAD";

/// Symbolic chains longer than this are treated as cycles.
pub const MAX_SYMREF_DEPTH: usize = 5;

/// Value of a single reference file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Direct(ObjectId),
    Symbolic(String),
}

/// Reference store rooted at a git directory.
#[derive(Debug, Clone)]
pub struct RefStore {
    root: PathBuf,
}

impl RefStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Read one level of a reference: its direct id or symbolic target.
    /// Loose shadows packed.
    pub fn read_target(&self, name: &str) -> Result<Option<RefTarget>> {
        validate_name(name)?;

        let path = self.root.join(name);
        match fs::read_to_string(&path) {
            Ok(content) => {
                let content = content.trim_end();
                if let Some(target) = content.strip_prefix("ref: ") {
                    return Ok(Some(RefTarget::Symbolic(target.to_string())));
                }
                let id = ObjectId::from_hex(content).map_err(|e| RefError::Malformed {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(Some(RefTarget::Direct(id)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(self.packed_lookup(name)?.map(RefTarget::Direct))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Resolve a name to an id, following symbolic refs to at most
    /// [`MAX_SYMREF_DEPTH`] levels.
    pub fn read(&self, name: &str) -> Result<Option<ObjectId>> {
        let mut current = name.to_string();
        for _ in 0..=MAX_SYMREF_DEPTH {
            match self.read_target(&current)? {
                Some(RefTarget::Direct(id)) => return Ok(Some(id)),
                Some(RefTarget::Symbolic(next)) => current = next,
                None => return Ok(None),
            }
        }
        Err(RefError::DepthExceeded(MAX_SYMREF_DEPTH).into())
    }

    /// Point a ref directly at an object, atomically.
    pub fn write(&self, name: &str, id: &ObjectId) -> Result<()> {
        self.write_contents(name, &format!("{}\n", id.to_hex()))
    }

    /// Make `name` a symbolic ref to `target` (`HEAD` onto a branch,
    /// typically).
    pub fn write_symbolic(&self, name: &str, target: &str) -> Result<()> {
        validate_name(target)?;
        self.write_contents(name, &format!("ref: {target}\n"))
    }

    fn write_contents(&self, name: &str, contents: &str) -> Result<()> {
        validate_name(name)?;

        let path = self.root.join(name);
        let dir = path.parent().ok_or_else(|| RefError::BadName(name.to_string()))?;
        fs::create_dir_all(dir)?;

        let mut tmp = tempfile::Builder::new()
            .prefix("tmp_ref_")
            .tempfile_in(dir)?;
        tmp.write_all(contents.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Remove a loose ref. Absent files are fine; a packed entry of the
    /// same name is left in place and becomes visible again.
    pub fn delete(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        let path = self.root.join(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                self.prune_empty_parents(&path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// All refs under `refs/`, fully resolved, packed entries shadowed
    /// by loose ones. Broken refs are skipped.
    pub fn iter(&self) -> Result<BTreeMap<String, ObjectId>> {
        let mut refs = BTreeMap::new();

        for packed_ref in self.packed()? {
            refs.insert(packed_ref.name, packed_ref.id);
        }

        let refs_dir = self.root.join("refs");
        if refs_dir.is_dir() {
            for entry in WalkDir::new(&refs_dir)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.path().is_file())
            {
                let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                    continue;
                };
                let Some(name) = relative.to_str() else {
                    continue;
                };
                let name = name.replace('\\', "/");
                if let Ok(Some(id)) = self.read(&name) {
                    refs.insert(name, id);
                }
            }
        }

        Ok(refs)
    }

    /// The parsed packed-refs file, or empty when absent.
    pub fn packed(&self) -> Result<Vec<PackedRef>> {
        match fs::read_to_string(self.root.join("packed-refs")) {
            Ok(content) => Ok(packed::parse(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn packed_lookup(&self, name: &str) -> Result<Option<ObjectId>> {
        Ok(self
            .packed()?
            .into_iter()
            .find(|packed_ref| packed_ref.name == name)
            .map(|packed_ref| packed_ref.id))
    }

    /// Deleting `refs/heads/topic/deep` leaves empty directories behind;
    /// sweep them up without touching the standard layout directories.
    fn prune_empty_parents(&self, path: &Path) {
        let keep = [
            self.root.clone(),
            self.root.join("refs"),
            self.root.join("refs/heads"),
            self.root.join("refs/tags"),
            self.root.join("refs/remotes"),
        ];
        let mut current = path.parent();
        while let Some(dir) = current {
            if keep.iter().any(|kept| kept == dir) {
                break;
            }
            if fs::remove_dir(dir).is_err() {
                break;
            }
            current = dir.parent();
        }
    }
}

fn validate_name(name: &str) -> Result<(), RefError> {
    let bad = name.is_empty()
        || name.starts_with('/')
        || name.ends_with('/')
        || name.contains("..")
        || name.contains('\0')
        || name.ends_with(".lock");
    if bad {
        return Err(RefError::BadName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch() -> (assert_fs::TempDir, RefStore) {
        let dir = assert_fs::TempDir::new().unwrap();
        let refs = RefStore::new(dir.path());
        (dir, refs)
    }

    fn oid(fill: u8) -> ObjectId {
        ObjectId::from_raw([fill; 20])
    }

    #[test]
    fn write_then_read_is_identity() {
        let (_dir, refs) = scratch();
        refs.write("refs/heads/main", &oid(1)).unwrap();
        assert_eq!(refs.read("refs/heads/main").unwrap(), Some(oid(1)));
    }

    #[test]
    fn head_resolves_through_symref() {
        let (_dir, refs) = scratch();
        refs.write("refs/heads/main", &oid(2)).unwrap();
        refs.write_symbolic(HEAD, "refs/heads/main").unwrap();

        assert_eq!(
            refs.read_target(HEAD).unwrap(),
            Some(RefTarget::Symbolic("refs/heads/main".to_string()))
        );
        assert_eq!(refs.read(HEAD).unwrap(), Some(oid(2)));
    }

    #[test]
    fn symref_cycle_is_cut_at_depth() {
        let (_dir, refs) = scratch();
        refs.write_symbolic("refs/heads/a", "refs/heads/b").unwrap();
        refs.write_symbolic("refs/heads/b", "refs/heads/a").unwrap();

        assert!(matches!(
            refs.read("refs/heads/a"),
            Err(Error::Ref(RefError::DepthExceeded(MAX_SYMREF_DEPTH)))
        ));
    }

    #[test]
    fn dangling_symref_reads_as_none() {
        let (_dir, refs) = scratch();
        refs.write_symbolic(HEAD, "refs/heads/unborn").unwrap();
        assert_eq!(refs.read(HEAD).unwrap(), None);
    }

    #[test]
    fn loose_shadows_packed() {
        let (dir, refs) = scratch();
        let packed_id = oid(3);
        let loose_id = oid(4);
        std::fs::write(
            dir.path().join("packed-refs"),
            format!("{} refs/heads/main\n", packed_id.to_hex()),
        )
        .unwrap();

        assert_eq!(refs.read("refs/heads/main").unwrap(), Some(packed_id));
        refs.write("refs/heads/main", &loose_id).unwrap();
        assert_eq!(refs.read("refs/heads/main").unwrap(), Some(loose_id));

        // Deleting the loose file un-shadows the packed entry.
        refs.delete("refs/heads/main").unwrap();
        assert_eq!(refs.read("refs/heads/main").unwrap(), Some(packed_id));
    }

    #[test]
    fn iter_merges_and_shadows() {
        let (dir, refs) = scratch();
        std::fs::write(
            dir.path().join("packed-refs"),
            format!(
                "{} refs/heads/main\n{} refs/tags/v1\n",
                oid(5).to_hex(),
                oid(6).to_hex()
            ),
        )
        .unwrap();
        refs.write("refs/heads/main", &oid(7)).unwrap();
        refs.write("refs/heads/topic", &oid(8)).unwrap();

        let map = refs.iter().unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map["refs/heads/main"], oid(7));
        assert_eq!(map["refs/heads/topic"], oid(8));
        assert_eq!(map["refs/tags/v1"], oid(6));
    }

    #[test]
    fn delete_prunes_empty_directories() {
        let (dir, refs) = scratch();
        refs.write("refs/heads/feature/deep/name", &oid(9)).unwrap();
        refs.delete("refs/heads/feature/deep/name").unwrap();

        assert!(!dir.path().join("refs/heads/feature").exists());
        assert!(dir.path().join("refs").exists());
    }

    #[test]
    fn delete_of_absent_ref_is_ok() {
        let (_dir, refs) = scratch();
        refs.delete("refs/heads/nothing").unwrap();
    }

    #[test]
    fn bad_names_are_rejected() {
        let (_dir, refs) = scratch();
        for name in ["", "/abs", "trail/", "a/../b", "a.lock"] {
            assert!(refs.write(name, &oid(1)).is_err(), "{name:?}");
        }
    }

    #[test]
    fn malformed_ref_file_is_an_error() {
        let (dir, refs) = scratch();
        std::fs::create_dir_all(dir.path().join("refs/heads")).unwrap();
        std::fs::write(dir.path().join("refs/heads/bad"), "not an id\n").unwrap();
        assert!(matches!(
            refs.read("refs/heads/bad"),
            Err(Error::Ref(RefError::Malformed { .. }))
        ));
    }
}
