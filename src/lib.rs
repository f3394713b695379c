//! packrat — reader and writer for the object database of
//! git-compatible repositories.
//!
//! The crate covers the storage half of a version-control system: the
//! content-addressed object model (blobs, trees, commits, tags), loose
//! and packed on-disk storage with delta reconstruction, references,
//! a tree-diff engine with rename detection, a commit-graph walker for
//! fetch negotiation, and ingest of packs received from a remote.
//!
//! ```no_run
//! use packrat::{Repository, ObjectType};
//!
//! # fn main() -> packrat::Result<()> {
//! let repo = Repository::open(".git")?;
//! let id = repo.objects().put(ObjectType::Blob, b"hello\n")?;
//! let blob = repo.objects().blob(&id)?;
//! assert_eq!(blob.content().as_ref(), b"hello\n");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod diff;
pub mod errors;
pub mod objects;
pub mod progress;
pub mod refs;
pub mod repo;
pub mod store;
pub mod transfer;
pub mod walk;

pub use errors::{DeltaError, Error, ObjectFormatError, PackError, RefError, Result};
pub use objects::{
    Blob, Commit, EntryMode, Object, ObjectId, ObjectType, ParseMode, RawObject, Signature, Tag,
    Tree, TreeEntry,
};
pub use progress::{CancellationToken, NoProgress, Progress};
pub use refs::{RefStore, RefTarget};
pub use repo::Repository;
pub use store::{BaseResolver, LooseStore, NoBases, ObjectStore, Pack, PackIndex};
pub use transfer::{IngestOutcome, ingest_pack};
pub use walk::GraphWalker;

pub use diff::{Change, ChangeEntry, ChangeKind, RenameOptions, TreeDiffOptions, tree_changes};
