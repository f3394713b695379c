//! Two-tree diff
//!
//! ## Algorithm
//!
//! Load both trees and merge their entries in pure byte-wise name order,
//! recursing into subtrees with the path prefix carried along. Matched
//! subtrees with equal ids are pruned; a directory replaced by a file
//! (or vice versa) is reported as the recursive deletion of one side
//! plus the addition of the other, leaf by leaf.
//!
//! Rename detection is a post-pass over the resulting Delete/Add lists
//! (see [`rename`](crate::diff::rename)).

use crate::diff::rename::{RenameDetector, RenameOptions};
use crate::errors::Result;
use crate::objects::{EntryMode, ObjectId, Tree, TreeEntry};
use crate::progress::CancellationToken;
use crate::store::ObjectStore;

/// Kind of a reported change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ChangeKind {
    Add,
    Delete,
    Modify,
    Unchanged,
    Rename,
    Copy,
}

/// One side of a change: full path from the tree root, mode, id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEntry {
    pub path: Vec<u8>,
    pub mode: EntryMode,
    pub oid: ObjectId,
}

impl ChangeEntry {
    fn new(prefix: &[u8], entry: &TreeEntry) -> Self {
        Self {
            path: join_path(prefix, &entry.name),
            mode: entry.mode,
            oid: entry.oid,
        }
    }
}

/// A single file-level difference between two trees.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub kind: ChangeKind,
    pub old: Option<ChangeEntry>,
    pub new: Option<ChangeEntry>,
    /// Content similarity for renames and copies, in `[0, 1]`.
    pub similarity: Option<f64>,
}

impl Change {
    pub fn add(new: ChangeEntry) -> Self {
        Self {
            kind: ChangeKind::Add,
            old: None,
            new: Some(new),
            similarity: None,
        }
    }

    pub fn delete(old: ChangeEntry) -> Self {
        Self {
            kind: ChangeKind::Delete,
            old: Some(old),
            new: None,
            similarity: None,
        }
    }

    pub fn modify(old: ChangeEntry, new: ChangeEntry) -> Self {
        Self {
            kind: ChangeKind::Modify,
            old: Some(old),
            new: Some(new),
            similarity: None,
        }
    }

    pub fn unchanged(old: ChangeEntry, new: ChangeEntry) -> Self {
        Self {
            kind: ChangeKind::Unchanged,
            old: Some(old),
            new: Some(new),
            similarity: None,
        }
    }

    pub fn rename(old: ChangeEntry, new: ChangeEntry, similarity: f64) -> Self {
        Self {
            kind: ChangeKind::Rename,
            old: Some(old),
            new: Some(new),
            similarity: Some(similarity),
        }
    }

    pub fn copy(old: ChangeEntry, new: ChangeEntry, similarity: f64) -> Self {
        Self {
            kind: ChangeKind::Copy,
            old: Some(old),
            new: Some(new),
            similarity: Some(similarity),
        }
    }

    /// The path this change is filed under: the new side when present.
    pub fn path(&self) -> &[u8] {
        self.new
            .as_ref()
            .or(self.old.as_ref())
            .map(|entry| entry.path.as_slice())
            .unwrap_or_default()
    }
}

/// Knobs for [`tree_changes`].
#[derive(Debug, Clone, Default)]
pub struct TreeDiffOptions {
    /// Also report files present and identical on both sides.
    pub include_unchanged: bool,
    /// Run rename detection over the Delete/Add lists.
    pub renames: Option<RenameOptions>,
    pub cancel: CancellationToken,
}

/// Diff two tree snapshots. Either side may be absent, meaning an empty
/// tree.
pub fn tree_changes(
    store: &ObjectStore,
    old: Option<&ObjectId>,
    new: Option<&ObjectId>,
    options: &TreeDiffOptions,
) -> Result<Vec<Change>> {
    let mut changes = Vec::new();

    if old == new && !options.include_unchanged {
        return Ok(changes);
    }

    let old_tree = load_tree(store, old)?;
    let new_tree = load_tree(store, new)?;
    diff_trees(
        store,
        b"",
        old_tree.as_ref(),
        new_tree.as_ref(),
        options,
        &mut changes,
    )?;

    if let Some(rename_options) = &options.renames {
        let detector = RenameDetector::new(store, rename_options.clone());
        changes = detector.detect(changes, &options.cancel)?;
    }
    Ok(changes)
}

fn load_tree(store: &ObjectStore, id: Option<&ObjectId>) -> Result<Option<Tree>> {
    match id {
        Some(id) => Ok(Some(store.tree(id)?)),
        None => Ok(None),
    }
}

fn diff_trees(
    store: &ObjectStore,
    prefix: &[u8],
    old: Option<&Tree>,
    new: Option<&Tree>,
    options: &TreeDiffOptions,
    out: &mut Vec<Change>,
) -> Result<()> {
    options.cancel.check()?;

    let old_entries = old.map(Tree::entries_name_order).unwrap_or_default();
    let new_entries = new.map(Tree::entries_name_order).unwrap_or_default();

    let mut i = 0;
    let mut j = 0;
    while i < old_entries.len() && j < new_entries.len() {
        let old_entry = old_entries[i];
        let new_entry = new_entries[j];
        match old_entry.name.cmp(&new_entry.name) {
            std::cmp::Ordering::Equal => {
                diff_pair(store, prefix, Some(old_entry), Some(new_entry), options, out)?;
                i += 1;
                j += 1;
            }
            std::cmp::Ordering::Less => {
                diff_pair(store, prefix, Some(old_entry), None, options, out)?;
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                diff_pair(store, prefix, None, Some(new_entry), options, out)?;
                j += 1;
            }
        }
    }
    for old_entry in &old_entries[i..] {
        diff_pair(store, prefix, Some(old_entry), None, options, out)?;
    }
    for new_entry in &new_entries[j..] {
        diff_pair(store, prefix, None, Some(new_entry), options, out)?;
    }

    Ok(())
}

fn diff_pair(
    store: &ObjectStore,
    prefix: &[u8],
    old: Option<&TreeEntry>,
    new: Option<&TreeEntry>,
    options: &TreeDiffOptions,
    out: &mut Vec<Change>,
) -> Result<()> {
    match (old, new) {
        (Some(old_entry), Some(new_entry)) => {
            match (old_entry.mode.is_tree(), new_entry.mode.is_tree()) {
                (true, true) => {
                    if old_entry.oid == new_entry.oid && !options.include_unchanged {
                        return Ok(());
                    }
                    let path = join_path(prefix, &old_entry.name);
                    let old_subtree = store.tree(&old_entry.oid)?;
                    let new_subtree = store.tree(&new_entry.oid)?;
                    diff_trees(
                        store,
                        &path,
                        Some(&old_subtree),
                        Some(&new_subtree),
                        options,
                        out,
                    )?;
                }
                (false, false) => {
                    let old_side = ChangeEntry::new(prefix, old_entry);
                    let new_side = ChangeEntry::new(prefix, new_entry);
                    if old_entry.oid == new_entry.oid && old_entry.mode == new_entry.mode {
                        if options.include_unchanged {
                            out.push(Change::unchanged(old_side, new_side));
                        }
                    } else {
                        out.push(Change::modify(old_side, new_side));
                    }
                }
                (true, false) => {
                    // Directory replaced by a file: delete the subtree
                    // leaf by leaf, then add the file.
                    walk_all(store, prefix, old_entry, options, Side::Old, out)?;
                    out.push(Change::add(ChangeEntry::new(prefix, new_entry)));
                }
                (false, true) => {
                    out.push(Change::delete(ChangeEntry::new(prefix, old_entry)));
                    walk_all(store, prefix, new_entry, options, Side::New, out)?;
                }
            }
        }
        (Some(old_entry), None) => {
            if old_entry.mode.is_tree() {
                walk_all(store, prefix, old_entry, options, Side::Old, out)?;
            } else {
                out.push(Change::delete(ChangeEntry::new(prefix, old_entry)));
            }
        }
        (None, Some(new_entry)) => {
            if new_entry.mode.is_tree() {
                walk_all(store, prefix, new_entry, options, Side::New, out)?;
            } else {
                out.push(Change::add(ChangeEntry::new(prefix, new_entry)));
            }
        }
        (None, None) => {}
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Side {
    Old,
    New,
}

/// Report every leaf under a one-sided subtree as deleted or added.
fn walk_all(
    store: &ObjectStore,
    prefix: &[u8],
    entry: &TreeEntry,
    options: &TreeDiffOptions,
    side: Side,
    out: &mut Vec<Change>,
) -> Result<()> {
    let subtree = store.tree(&entry.oid)?;
    let path = join_path(prefix, &entry.name);
    match side {
        Side::Old => diff_trees(store, &path, Some(&subtree), None, options, out),
        Side::New => diff_trees(store, &path, None, Some(&subtree), options, out),
    }
}

fn join_path(prefix: &[u8], name: &[u8]) -> Vec<u8> {
    if prefix.is_empty() {
        name.to_vec()
    } else {
        let mut path = Vec::with_capacity(prefix.len() + 1 + name.len());
        path.extend_from_slice(prefix);
        path.push(b'/');
        path.extend_from_slice(name);
        path
    }
}
