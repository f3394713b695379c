//! Tree diff engine: two-tree merge plus rename detection.

pub mod rename;
pub mod tree_changes;

pub use rename::{
    BLOCK_SIZE, DEFAULT_MAX_FILES, DEFAULT_RENAME_THRESHOLD, RenameDetector, RenameOptions,
};
pub use tree_changes::{Change, ChangeEntry, ChangeKind, TreeDiffOptions, tree_changes};
