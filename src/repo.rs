//! Repository surface
//!
//! Wires the reference store and the composite object store together
//! from the on-disk layout of a git directory, honoring the
//! environment overrides `GIT_OBJECT_DIRECTORY` (replacement for
//! `objects/`) and `GIT_ALTERNATE_OBJECT_DIRECTORIES` (extra read-only
//! loose roots, colon- or semicolon-separated).

use crate::errors::{Error, Result};
use crate::objects::{ObjectId, object_id};
use crate::refs::{HEAD, RefStore};
use crate::store::ObjectStore;
use std::fs;
use std::path::{Path, PathBuf};

pub const OBJECT_DIR_ENV: &str = "GIT_OBJECT_DIRECTORY";
pub const ALTERNATES_ENV: &str = "GIT_ALTERNATE_OBJECT_DIRECTORIES";

/// An opened repository: its git directory, references, and objects.
#[derive(Debug)]
pub struct Repository {
    git_dir: PathBuf,
    objects: ObjectStore,
    refs: RefStore,
}

impl Repository {
    /// Open an existing git directory.
    pub fn open(git_dir: impl Into<PathBuf>) -> Result<Self> {
        let git_dir = git_dir.into();

        let objects_dir = match std::env::var_os(OBJECT_DIR_ENV) {
            Some(dir) => PathBuf::from(dir),
            None => git_dir.join("objects"),
        };
        let mut objects = ObjectStore::open(objects_dir)?;

        if let Some(alternates) = std::env::var_os(ALTERNATES_ENV) {
            for root in alternates
                .to_string_lossy()
                .split([':', ';'])
                .filter(|root| !root.is_empty())
            {
                objects.add_alternate(root);
            }
        }

        let refs = RefStore::new(&git_dir);
        Ok(Self {
            git_dir,
            objects,
            refs,
        })
    }

    /// Create the minimal repository layout and open it: `objects/`,
    /// `refs/heads`, `refs/tags`, and a `HEAD` pointing at an unborn
    /// `master`.
    pub fn init(git_dir: impl Into<PathBuf>) -> Result<Self> {
        let git_dir: PathBuf = git_dir.into();
        fs::create_dir_all(git_dir.join("objects/pack"))?;
        fs::create_dir_all(git_dir.join("refs/heads"))?;
        fs::create_dir_all(git_dir.join("refs/tags"))?;

        let refs = RefStore::new(&git_dir);
        if !git_dir.join(HEAD).exists() {
            refs.write_symbolic(HEAD, "refs/heads/master")?;
        }
        Self::open(git_dir)
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    pub fn objects_mut(&mut self) -> &mut ObjectStore {
        &mut self.objects
    }

    pub fn refs(&self) -> &RefStore {
        &self.refs
    }

    /// Resolve a name to an object id: `HEAD`, a full ref name, a
    /// shorthand under `refs/heads` or `refs/tags`, full hex, or an
    /// unambiguous hex prefix.
    pub fn resolve(&self, name: &str) -> Result<ObjectId> {
        for candidate in [
            name.to_string(),
            format!("refs/{name}"),
            format!("refs/heads/{name}"),
            format!("refs/tags/{name}"),
        ] {
            if let Ok(Some(id)) = self.refs.read(&candidate) {
                return Ok(id);
            }
        }

        if name.len() == object_id::HEX_LENGTH {
            if let Ok(id) = ObjectId::from_hex(name) {
                return if self.objects.contains(&id) {
                    Ok(id)
                } else {
                    Err(Error::Missing(id))
                };
            }
        }

        self.objects.resolve_prefix(name)
    }
}
