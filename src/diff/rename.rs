//! Similarity-based rename and copy detection
//!
//! A post-pass over a change list that pairs deletions with additions.
//! Exact id matches pair first; the rest are scored by content
//! similarity over hashed blocks: bytes accumulate into a block that is
//! flushed at 64 bytes or a newline, and each flushed block contributes
//! its 32-bit hash weighted by its byte length into a multiset. The
//! similarity of two blobs is
//!
//! ```text
//! 2 · Σ_h min(a[h], b[h]) / (|A| + |B|)
//! ```
//!
//! Candidate pairs at or above the threshold are sorted best-first and
//! assigned greedily, each path used at most once. The pass abandons
//! itself wholesale above a pair-count cap rather than returning
//! partial results.

use crate::diff::tree_changes::{Change, ChangeEntry, ChangeKind};
use crate::errors::Result;
use crate::objects::{EntryMode, ObjectId};
use crate::progress::CancellationToken;
use crate::store::ObjectStore;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Block accumulator limit; a newline also flushes.
pub const BLOCK_SIZE: usize = 64;

/// Minimum similarity for a rename, as a fraction.
pub const DEFAULT_RENAME_THRESHOLD: f64 = 0.50;

/// Rename detection is abandoned above `max_files²` candidate pairs.
pub const DEFAULT_MAX_FILES: usize = 200;

/// Knobs for the rename pass.
#[derive(Debug, Clone)]
pub struct RenameOptions {
    pub threshold: f64,
    pub max_files: usize,
    /// Also match additions against unchanged files, reporting copies.
    /// Sources are not consumed by a copy.
    pub find_copies: bool,
}

impl Default for RenameOptions {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_RENAME_THRESHOLD,
            max_files: DEFAULT_MAX_FILES,
            find_copies: false,
        }
    }
}

/// Pairs deletions with additions on a change list.
pub struct RenameDetector<'a> {
    store: &'a ObjectStore,
    options: RenameOptions,
}

/// Where a candidate source comes from: a deletion (consumed by a
/// match, producing a rename) or an unchanged file (reusable,
/// producing a copy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Source {
    Deleted(usize),
    Unchanged(usize),
}

#[derive(Debug)]
struct Candidate {
    score: f64,
    source: Source,
    add_index: usize,
}

impl<'a> RenameDetector<'a> {
    pub fn new(store: &'a ObjectStore, options: RenameOptions) -> Self {
        Self { store, options }
    }

    /// Transform a change list, replacing matched Delete/Add pairs with
    /// Rename (and optionally Copy) entries.
    pub fn detect(&self, changes: Vec<Change>, cancel: &CancellationToken) -> Result<Vec<Change>> {
        let mut deletes: Vec<ChangeEntry> = Vec::new();
        let mut adds: Vec<ChangeEntry> = Vec::new();
        let mut others: Vec<Change> = Vec::new();
        let mut unchanged: Vec<ChangeEntry> = Vec::new();

        for change in changes {
            match change.kind {
                ChangeKind::Delete => {
                    deletes.push(change.old.clone().expect("delete has an old side"))
                }
                ChangeKind::Add => adds.push(change.new.clone().expect("add has a new side")),
                ChangeKind::Unchanged => {
                    unchanged.push(change.old.clone().expect("unchanged has an old side"));
                    others.push(change);
                }
                _ => others.push(change),
            }
        }

        // Deterministic assignment order.
        deletes.sort_by(|a, b| a.path.cmp(&b.path));
        adds.sort_by(|a, b| a.path.cmp(&b.path));

        let mut delete_used = vec![false; deletes.len()];
        let mut add_used = vec![false; adds.len()];
        let mut matched: Vec<Change> = Vec::new();

        self.match_exact(
            &deletes,
            &adds,
            &unchanged,
            &mut delete_used,
            &mut add_used,
            &mut matched,
        );

        let pending_pairs = count_pending(&delete_used) * count_pending(&add_used);
        let cap = self.options.max_files * self.options.max_files;
        if pending_pairs > 0 && pending_pairs <= cap {
            self.match_content(
                &deletes,
                &adds,
                &unchanged,
                &mut delete_used,
                &mut add_used,
                &mut matched,
                cancel,
            )?;
        }
        // Above the cap the content pass is skipped entirely: partial
        // rename results would be misleading.

        let mut result = others;
        result.extend(matched);
        for (index, used) in delete_used.iter().enumerate() {
            if !used {
                result.push(Change::delete(deletes[index].clone()));
            }
        }
        for (index, used) in add_used.iter().enumerate() {
            if !used {
                result.push(Change::add(adds[index].clone()));
            }
        }

        result.sort_by(|a, b| a.path().cmp(b.path()).then_with(|| kind_rank(a.kind).cmp(&kind_rank(b.kind))));
        Ok(result)
    }

    /// First pass: identical ids are renames (or copies) of similarity
    /// 1.0 without looking at content.
    fn match_exact(
        &self,
        deletes: &[ChangeEntry],
        adds: &[ChangeEntry],
        unchanged: &[ChangeEntry],
        delete_used: &mut [bool],
        add_used: &mut [bool],
        matched: &mut Vec<Change>,
    ) {
        let mut by_id: HashMap<ObjectId, Vec<usize>> = HashMap::new();
        for (index, delete) in deletes.iter().enumerate() {
            by_id.entry(delete.oid).or_default().push(index);
        }
        let unchanged_by_id: HashMap<ObjectId, usize> = unchanged
            .iter()
            .enumerate()
            .map(|(index, entry)| (entry.oid, index))
            .collect();

        for (add_index, add) in adds.iter().enumerate() {
            if let Some(candidates) = by_id.get_mut(&add.oid) {
                if let Some(delete_index) = candidates.iter().position(|&i| !delete_used[i]) {
                    let delete_index = candidates[delete_index];
                    delete_used[delete_index] = true;
                    add_used[add_index] = true;
                    matched.push(Change::rename(
                        deletes[delete_index].clone(),
                        add.clone(),
                        1.0,
                    ));
                    continue;
                }
            }
            if self.options.find_copies {
                if let Some(&source) = unchanged_by_id.get(&add.oid) {
                    add_used[add_index] = true;
                    matched.push(Change::copy(unchanged[source].clone(), add.clone(), 1.0));
                }
            }
        }
    }

    /// Second pass: score remaining pairs by block-hash similarity and
    /// assign greedily, best score first.
    #[allow(clippy::too_many_arguments)]
    fn match_content(
        &self,
        deletes: &[ChangeEntry],
        adds: &[ChangeEntry],
        unchanged: &[ChangeEntry],
        delete_used: &mut [bool],
        add_used: &mut [bool],
        matched: &mut Vec<Change>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut profiles: HashMap<ObjectId, BlockProfile> = HashMap::new();
        let mut candidates: Vec<Candidate> = Vec::new();

        for (add_index, add) in adds.iter().enumerate() {
            if add_used[add_index] || !scoreable(add) {
                continue;
            }
            for (delete_index, delete) in deletes.iter().enumerate() {
                if delete_used[delete_index] || !scoreable(delete) {
                    continue;
                }
                cancel.check()?;
                let score = self.score(&mut profiles, delete, add)?;
                if score >= self.options.threshold {
                    candidates.push(Candidate {
                        score,
                        source: Source::Deleted(delete_index),
                        add_index,
                    });
                }
            }

            if self.options.find_copies {
                for (source_index, source) in unchanged.iter().enumerate() {
                    if !scoreable(source) {
                        continue;
                    }
                    cancel.check()?;
                    let score = self.score(&mut profiles, source, add)?;
                    if score >= self.options.threshold {
                        candidates.push(Candidate {
                            score,
                            source: Source::Unchanged(source_index),
                            add_index,
                        });
                    }
                }
            }
        }

        // Best score first; ties broken by old path, then new path.
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    let a_path = source_path(a.source, deletes, unchanged);
                    let b_path = source_path(b.source, deletes, unchanged);
                    a_path.cmp(b_path)
                })
                .then_with(|| adds[a.add_index].path.cmp(&adds[b.add_index].path))
        });

        for candidate in candidates {
            if add_used[candidate.add_index] {
                continue;
            }
            match candidate.source {
                Source::Deleted(delete_index) => {
                    if delete_used[delete_index] {
                        continue;
                    }
                    delete_used[delete_index] = true;
                    add_used[candidate.add_index] = true;
                    matched.push(Change::rename(
                        deletes[delete_index].clone(),
                        adds[candidate.add_index].clone(),
                        candidate.score,
                    ));
                }
                Source::Unchanged(source_index) => {
                    add_used[candidate.add_index] = true;
                    matched.push(Change::copy(
                        unchanged[source_index].clone(),
                        adds[candidate.add_index].clone(),
                        candidate.score,
                    ));
                }
            }
        }
        Ok(())
    }

    fn score(
        &self,
        profiles: &mut HashMap<ObjectId, BlockProfile>,
        old: &ChangeEntry,
        new: &ChangeEntry,
    ) -> Result<f64> {
        let old_profile = self.profile(profiles, &old.oid)?;
        let new_profile = self.profile(profiles, &new.oid)?;
        Ok(similarity(&old_profile, &new_profile))
    }

    fn profile(
        &self,
        profiles: &mut HashMap<ObjectId, BlockProfile>,
        id: &ObjectId,
    ) -> Result<BlockProfile> {
        if let Some(profile) = profiles.get(id) {
            return Ok(profile.clone());
        }
        let blob = self.store.blob(id)?;
        let profile = BlockProfile::of(blob.content());
        profiles.insert(*id, profile.clone());
        Ok(profile)
    }
}

/// Multiset of block hashes weighted by byte length, plus total size.
#[derive(Debug, Clone)]
struct BlockProfile {
    len: u64,
    counts: HashMap<u32, u64>,
}

impl BlockProfile {
    fn of(data: &[u8]) -> Self {
        Self {
            len: data.len() as u64,
            counts: count_blocks(data),
        }
    }
}

/// Chunk `data` into newline- or size-bounded blocks and accumulate
/// `hash -> summed byte length`.
fn count_blocks(data: &[u8]) -> HashMap<u32, u64> {
    let mut counts: HashMap<u32, u64> = HashMap::new();
    let mut block_start = 0usize;

    for (position, &byte) in data.iter().enumerate() {
        let block_len = position - block_start + 1;
        if byte == b'\n' || block_len == BLOCK_SIZE {
            let block = &data[block_start..=position];
            *counts.entry(block_hash(block)).or_default() += block.len() as u64;
            block_start = position + 1;
        }
    }
    if block_start < data.len() {
        let block = &data[block_start..];
        *counts.entry(block_hash(block)).or_default() += block.len() as u64;
    }
    counts
}

fn block_hash(block: &[u8]) -> u32 {
    let mut hasher = DefaultHasher::new();
    block.hash(&mut hasher);
    hasher.finish() as u32
}

fn similarity(a: &BlockProfile, b: &BlockProfile) -> f64 {
    if a.len == 0 && b.len == 0 {
        return 1.0;
    }
    if a.len == 0 || b.len == 0 {
        return 0.0;
    }

    let mut common = 0u64;
    for (hash, a_weight) in &a.counts {
        if let Some(b_weight) = b.counts.get(hash) {
            common += (*a_weight).min(*b_weight);
        }
    }
    2.0 * common as f64 / (a.len + b.len) as f64
}

fn count_pending(used: &[bool]) -> usize {
    used.iter().filter(|&&u| !u).count()
}

/// Gitlink entries name commits in other repositories; there is no
/// blob to read, so they never participate in content scoring.
fn scoreable(entry: &ChangeEntry) -> bool {
    entry.mode != EntryMode::GITLINK
}

fn source_path<'a>(source: Source, deletes: &'a [ChangeEntry], unchanged: &'a [ChangeEntry]) -> &'a [u8] {
    match source {
        Source::Deleted(index) => &deletes[index].path,
        Source::Unchanged(index) => &unchanged[index].path,
    }
}

/// Stable order for changes filed under the same path.
fn kind_rank(kind: ChangeKind) -> u8 {
    match kind {
        ChangeKind::Delete => 0,
        ChangeKind::Rename => 1,
        ChangeKind::Copy => 2,
        ChangeKind::Modify => 3,
        ChangeKind::Unchanged => 4,
        ChangeKind::Add => 5,
    }
}
