//! Commit-graph walker for fetch negotiation
//!
//! Yields local commit ids in approximately reverse-chronological order
//! so the remote can be asked "do you have X?" from newest to oldest.
//! When the remote acknowledges an id, that commit and — lazily — its
//! ancestry are marked common: a common commit is never yielded, and
//! popping one only propagates the flag to its parents instead.

use crate::errors::Result;
use crate::objects::ObjectId;
use crate::store::ObjectStore;
use bitflags::bitflags;
use std::collections::{BinaryHeap, HashMap};
use tracing::debug;

bitflags! {
    /// Per-commit traversal state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    struct WalkFlags: u8 {
        /// Enqueued at least once.
        const SEEN = 0b01;
        /// Known to exist on the remote.
        const COMMON = 0b10;
    }
}

/// Priority-queue key: committer timestamp, ties broken by id so the
/// order is deterministic.
#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    when: i64,
    id: ObjectId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.when
            .cmp(&other.when)
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Lazy commit-ancestry walker over the composite store.
pub struct GraphWalker<'a> {
    store: &'a ObjectStore,
    queue: BinaryHeap<QueueEntry>,
    states: HashMap<ObjectId, WalkFlags>,
}

impl<'a> GraphWalker<'a> {
    /// Start a walk from the given head commits. Heads that are missing
    /// locally or are not commits are skipped.
    pub fn new(store: &'a ObjectStore, heads: impl IntoIterator<Item = ObjectId>) -> Self {
        let mut walker = Self {
            store,
            queue: BinaryHeap::new(),
            states: HashMap::new(),
        };
        for head in heads {
            walker.enqueue(&head);
        }
        walker
    }

    /// Next id to offer the remote, oldest descendants first, or `None`
    /// when the local graph is exhausted.
    pub fn next(&mut self) -> Result<Option<ObjectId>> {
        while let Some(entry) = self.queue.pop() {
            let flags = self.states.get(&entry.id).copied().unwrap_or_default();
            let commit = match self.store.commit(&entry.id) {
                Ok(commit) => commit,
                Err(_) => continue,
            };

            if flags.contains(WalkFlags::COMMON) {
                // Do not yield; push the flag one generation down so
                // whole common subtrees drop out of the walk.
                for parent in commit.parents() {
                    self.mark_common(parent);
                    self.enqueue(parent);
                }
                continue;
            }

            for parent in commit.parents() {
                self.enqueue(parent);
            }
            return Ok(Some(entry.id));
        }
        Ok(None)
    }

    /// The remote has `id`: mark it and (lazily) its ancestry common.
    pub fn ack(&mut self, id: &ObjectId) -> Result<()> {
        debug!(id = %id, "negotiation ack");
        self.mark_common(id);
        if let Ok(commit) = self.store.commit(id) {
            for parent in commit.parents() {
                self.mark_common(parent);
                self.enqueue(parent);
            }
        }
        Ok(())
    }

    fn mark_common(&mut self, id: &ObjectId) {
        self.states.entry(*id).or_default().insert(WalkFlags::COMMON);
    }

    fn enqueue(&mut self, id: &ObjectId) {
        let flags = self.states.entry(*id).or_default();
        if flags.contains(WalkFlags::SEEN) {
            return;
        }
        flags.insert(WalkFlags::SEEN);

        if let Ok(commit) = self.store.commit(id) {
            self.queue.push(QueueEntry {
                when: commit.committer().timestamp(),
                id: *id,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{Commit, Object, Signature, Tree};
    use pretty_assertions::assert_eq;

    /// Build a chain of commits with ascending timestamps; returns the
    /// ids oldest-first.
    fn commit_chain(store: &ObjectStore, count: usize) -> Vec<ObjectId> {
        let tree = Tree::default();
        let tree_id = store.put_object(&Object::Tree(tree)).unwrap();

        let mut ids = Vec::new();
        for i in 0..count {
            let when = chrono::DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
                .unwrap()
                + chrono::Duration::seconds(i as i64);
            let signature = Signature::new("A", "a@x", when);
            let parents = ids.last().copied().into_iter().collect();
            let commit = Commit::new(
                tree_id,
                parents,
                signature.clone(),
                signature,
                format!("c{i}\n"),
            );
            ids.push(store.put_object(&Object::Commit(commit)).unwrap());
        }
        ids
    }

    fn scratch() -> (assert_fs::TempDir, ObjectStore) {
        let dir = assert_fs::TempDir::new().unwrap();
        let store = ObjectStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn yields_newest_first() {
        let (_dir, store) = scratch();
        let ids = commit_chain(&store, 3);

        let mut walker = GraphWalker::new(&store, [ids[2]]);
        assert_eq!(walker.next().unwrap(), Some(ids[2]));
        assert_eq!(walker.next().unwrap(), Some(ids[1]));
        assert_eq!(walker.next().unwrap(), Some(ids[0]));
        assert_eq!(walker.next().unwrap(), None);
    }

    #[test]
    fn ack_prunes_ancestry() {
        let (_dir, store) = scratch();
        let ids = commit_chain(&store, 4);

        let mut walker = GraphWalker::new(&store, [ids[3]]);
        assert_eq!(walker.next().unwrap(), Some(ids[3]));

        // The remote has c2, so c2, c1, c0 are all common.
        walker.ack(&ids[2]).unwrap();
        assert_eq!(walker.next().unwrap(), None);
    }

    #[test]
    fn two_heads_interleave_by_timestamp() {
        let (_dir, store) = scratch();
        let ids = commit_chain(&store, 2);

        // A second root, newer than both chain commits.
        let tree_id = store.put_object(&Object::Tree(Tree::default())).unwrap();
        let when = chrono::DateTime::parse_from_rfc3339("2024-06-01T00:00:00Z").unwrap();
        let signature = Signature::new("B", "b@x", when);
        let other = Commit::new(tree_id, Vec::new(), signature.clone(), signature, "root\n");
        let other_id = store.put_object(&Object::Commit(other)).unwrap();

        let mut walker = GraphWalker::new(&store, [ids[1], other_id]);
        assert_eq!(walker.next().unwrap(), Some(other_id));
        assert_eq!(walker.next().unwrap(), Some(ids[1]));
        assert_eq!(walker.next().unwrap(), Some(ids[0]));
        assert_eq!(walker.next().unwrap(), None);
    }

    #[test]
    fn missing_heads_are_skipped() {
        let (_dir, store) = scratch();
        let absent = ObjectId::from_raw([0xcd; 20]);
        let mut walker = GraphWalker::new(&store, [absent]);
        assert_eq!(walker.next().unwrap(), None);
    }
}
