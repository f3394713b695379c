//! In-memory object model and canonical serialization
//!
//! An object is a pair `(kind, payload)`; its identity is
//! `SHA-1("<wire-name> <decimal-size>\0" || payload)`. Parsing is strict
//! by default and `parse` ∘ `serialize` is the identity on well-formed
//! objects.

pub mod blob;
pub mod commit;
pub mod entry_mode;
pub mod object;
pub mod object_id;
pub mod object_type;
pub mod tag;
pub mod tree;

pub use blob::Blob;
pub use commit::{Commit, Signature};
pub use entry_mode::EntryMode;
pub use object::{Object, ParseMode, RawObject};
pub use object_id::ObjectId;
pub use object_type::ObjectType;
pub use tag::Tag;
pub use tree::{Tree, TreeEntry, canonical_cmp};
