// SPDX-License-Identifier: Apache-2.0

//! Worker-side `BlockCache`: reference-counted block storage with an
//! eviction heap ordered so shared prefixes survive as long as possible.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::error::CoreError;
use crate::hash::BlockHash;

#[derive(Debug, Clone)]
struct BlockRecord {
    ref_count: u32,
    last_used: u64,
    sequence_id: u64,
    block_index_in_sequence: usize,
}

/// Eviction priority key: oldest `last_used` first; among ties, the block
/// further into its sequence (a tail, less useful as a shared prefix) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EvictKey {
    last_used: u64,
    block_index_in_sequence: usize,
}

impl PartialOrd for EvictKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.last_used
            .cmp(&other.last_used)
            .then_with(|| other.block_index_in_sequence.cmp(&self.block_index_in_sequence))
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    key: EvictKey,
    hash: BlockHash,
    sequence_id: u64,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

/// Outcome of [`BlockCache::allocate`].
#[derive(Debug, Clone, Default)]
pub struct AllocateOutcome {
    /// Blocks that were already cached and are now pinned for this sequence.
    pub cached: Vec<BlockHash>,
    /// Blocks that were missing and have just been inserted.
    pub newly_allocated: Vec<BlockHash>,
    /// Blocks evicted to make room for `newly_allocated`.
    pub evicted: Vec<BlockHash>,
}

/// Block-level KV cache held by one worker.
///
/// All operations execute under a single logical exclusion region (spec §5);
/// this type itself is `!Sync`-agnostic — callers wrap it in a mutex.
pub struct BlockCache {
    max_blocks: usize,
    blocks: HashMap<BlockHash, BlockRecord>,
    evictable: BinaryHeap<Reverse<HeapEntry>>,
    /// Ordered block sequence last registered for each sequence id, retained
    /// even after `complete` so `snapshot_sequences` can still report it
    /// (filtered to blocks that are still held).
    sequences: HashMap<u64, Vec<BlockHash>>,
    clock: u64,
}

impl BlockCache {
    pub fn new(max_blocks: usize) -> Self {
        Self {
            max_blocks,
            blocks: HashMap::new(),
            evictable: BinaryHeap::new(),
            sequences: HashMap::new(),
            clock: 0,
        }
    }

    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn tick_clock(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Pin every block in `block_hashes` for `seq_id`, evicting as needed to
    /// make room for blocks not already cached.
    pub fn allocate(
        &mut self,
        seq_id: u64,
        block_hashes: &[BlockHash],
    ) -> Result<AllocateOutcome, CoreError> {
        let mut outcome = AllocateOutcome::default();

        for (index, hash) in block_hashes.iter().enumerate() {
            if let Some(record) = self.blocks.get_mut(hash) {
                record.ref_count += 1;
                record.last_used = self.clock;
                self.clock += 1;
                outcome.cached.push(*hash);
                continue;
            }

            while self.blocks.len() >= self.max_blocks {
                match self.evict_one()? {
                    Some(evicted) => outcome.evicted.push(evicted),
                    None => {
                        return Err(CoreError::CapacityExceeded {
                            max_blocks: self.max_blocks,
                        });
                    }
                }
            }

            let last_used = self.tick_clock();
            self.blocks.insert(
                *hash,
                BlockRecord {
                    ref_count: 1,
                    last_used,
                    sequence_id: seq_id,
                    block_index_in_sequence: index,
                },
            );
            outcome.newly_allocated.push(*hash);
        }

        self.sequences.insert(seq_id, block_hashes.to_vec());
        Ok(outcome)
    }

    /// Pop the evictable heap until a still-valid, still-unpinned candidate
    /// is found; remove it from the cache. Returns `None` if nothing is
    /// evictable (a [`CoreError::CapacityExceeded`] fault at the call site).
    fn evict_one(&mut self) -> Result<Option<BlockHash>, CoreError> {
        while let Some(Reverse(candidate)) = self.evictable.pop() {
            let Some(record) = self.blocks.get(&candidate.hash) else {
                continue; // block already gone
            };
            if record.ref_count > 0 {
                continue; // repinned since this entry was queued
            }
            if record.sequence_id != candidate.sequence_id
                || record.last_used != candidate.key.last_used
            {
                continue; // stale entry for a block that was reused
            }
            self.blocks.remove(&candidate.hash);
            return Ok(Some(candidate.hash));
        }
        Ok(None)
    }

    /// Decrement `ref_count` on every block of `seq_id`; blocks reaching zero
    /// become evictable. Returns the blocks that just became evictable (they
    /// are NOT removed from the cache; eviction only happens under pressure
    /// in `allocate`).
    pub fn complete(&mut self, seq_id: u64) -> Vec<BlockHash> {
        let Some(hashes) = self.sequences.get(&seq_id).cloned() else {
            return Vec::new();
        };

        let mut freed = Vec::new();
        for hash in hashes {
            if let Some(record) = self.blocks.get_mut(&hash) {
                if record.ref_count == 0 {
                    continue;
                }
                record.ref_count -= 1;
                if record.ref_count == 0 {
                    self.evictable.push(Reverse(HeapEntry {
                        key: EvictKey {
                            last_used: record.last_used,
                            block_index_in_sequence: record.block_index_in_sequence,
                        },
                        hash,
                        sequence_id: record.sequence_id,
                    }));
                    freed.push(hash);
                }
            }
        }
        freed
    }

    /// All currently-held sequences in block order, with evicted blocks
    /// removed from each.
    pub fn snapshot_sequences(&self) -> Vec<Vec<BlockHash>> {
        self.sequences
            .values()
            .map(|seq| {
                seq.iter()
                    .copied()
                    .filter(|h| self.blocks.contains_key(h))
                    .collect::<Vec<_>>()
            })
            .filter(|seq| !seq.is_empty())
            .collect()
    }

    pub fn snapshot_hashes(&self) -> std::collections::HashSet<BlockHash> {
        self.blocks.keys().copied().collect()
    }

    #[cfg(test)]
    fn ref_count(&self, hash: &BlockHash) -> Option<u32> {
        self.blocks.get(hash).map(|r| r.ref_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> BlockHash {
        BlockHash::from_bytes([byte; 32])
    }

    #[test]
    fn allocate_reports_cached_vs_new() {
        let mut cache = BlockCache::new(10);
        let out = cache.allocate(1, &[h(1), h(2)]).unwrap();
        assert_eq!(out.newly_allocated, vec![h(1), h(2)]);
        assert!(out.cached.is_empty());

        let out2 = cache.allocate(2, &[h(1), h(3)]).unwrap();
        assert_eq!(out2.cached, vec![h(1)]);
        assert_eq!(out2.newly_allocated, vec![h(3)]);
        assert_eq!(cache.ref_count(&h(1)), Some(2));
    }

    #[test]
    fn complete_unpins_without_evicting() {
        let mut cache = BlockCache::new(10);
        cache.allocate(1, &[h(1), h(2)]).unwrap();
        let freed = cache.complete(1);
        assert_eq!(freed, vec![h(1), h(2)]);
        assert_eq!(cache.len(), 2); // still held, just evictable
        assert_eq!(cache.ref_count(&h(1)), Some(0));
    }

    #[test]
    fn eviction_never_touches_pinned_blocks() {
        let mut cache = BlockCache::new(2);
        cache.allocate(1, &[h(1), h(2)]).unwrap(); // both pinned
        let err = cache.allocate(2, &[h(3)]).unwrap_err();
        assert!(matches!(err, CoreError::CapacityExceeded { .. }));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn eviction_prefers_oldest_then_tail_of_sequence() {
        let mut cache = BlockCache::new(2);
        // seq 1 lays down two blocks, h1 at index 0 (head), h2 at index 1 (tail)
        cache.allocate(1, &[h(1), h(2)]).unwrap();
        cache.complete(1); // both now evictable, h1 older than h2 (allocated first)

        // Capacity is 2 and full; allocating a third must evict exactly one.
        let out = cache.allocate(2, &[h(3)]).unwrap();
        assert_eq!(out.evicted.len(), 1);
        // h1 has the smaller last_used (it was recorded first), so it evicts
        // first regardless of sequence position.
        assert_eq!(out.evicted[0], h(1));
    }

    #[test]
    fn evict_key_breaks_ties_by_later_sequence_position() {
        let older_head = EvictKey {
            last_used: 1,
            block_index_in_sequence: 0,
        };
        let older_tail = EvictKey {
            last_used: 1,
            block_index_in_sequence: 5,
        };
        // same last_used: the later position in its sequence sorts smaller,
        // so a min-heap (via Reverse) pops it first.
        assert!(older_tail < older_head);

        let newer_head = EvictKey {
            last_used: 2,
            block_index_in_sequence: 0,
        };
        assert!(older_head < newer_head);
    }

    #[test]
    fn snapshot_sequences_drops_evicted_members() {
        let mut cache = BlockCache::new(2);
        cache.allocate(1, &[h(1), h(2)]).unwrap();
        cache.complete(1);
        cache.allocate(2, &[h(3)]).unwrap(); // evicts h(1)
        let snaps = cache.snapshot_sequences();
        assert!(snaps.iter().any(|s| s == &vec![h(2)]));
    }

    #[test]
    fn snapshot_hashes_matches_held_blocks() {
        let mut cache = BlockCache::new(5);
        cache.allocate(1, &[h(1), h(2)]).unwrap();
        let set = cache.snapshot_hashes();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&h(1)) && set.contains(&h(2)));
    }
}
