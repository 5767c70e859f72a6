//! Read cache.
//!
//! Holds recently appended and recently fetched byte ranges, keyed by
//! segment and offset. The cache is an optimization only: a miss always
//! falls through to the long-term tier. The one exception is data the
//! storage writer has not flushed yet, which lives nowhere else in memory;
//! those blocks are pinned and never evicted.
//!
//! Each segment has its own block map behind its own mutex. The segment
//! directory is a read-mostly `RwLock`, so work on different segments does
//! not contend.

use crate::types::SegmentId;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug)]
struct Block {
    data: Bytes,
    last_access: u64,
}

#[derive(Debug, Default)]
struct SegmentBlocks {
    blocks: BTreeMap<u64, Block>,
    flushed: u64,
}

impl SegmentBlocks {
    /// Returns the start of the block containing `offset`.
    fn block_at(&self, offset: u64) -> Option<u64> {
        self.blocks
            .range(..=offset)
            .next_back()
            .filter(|(start, block)| **start + block.data.len() as u64 > offset)
            .map(|(start, _)| *start)
    }

    /// Inserts the parts of `data` at `offset` that no block covers yet.
    /// Returns the number of bytes added.
    fn fill_gaps(&mut self, offset: u64, data: &Bytes, stamp: u64) -> u64 {
        let end = offset + data.len() as u64;
        let mut cursor = offset;
        let mut added = 0;
        while cursor < end {
            if let Some(start) = self.block_at(cursor) {
                let len = self.blocks[&start].data.len() as u64;
                cursor = start + len;
                continue;
            }
            let gap_end = self
                .blocks
                .range(cursor + 1..)
                .next()
                .map_or(end, |(start, _)| (*start).min(end));
            let slice = data.slice((cursor - offset) as usize..(gap_end - offset) as usize);
            added += slice.len() as u64;
            self.blocks.insert(
                cursor,
                Block {
                    data: slice,
                    last_access: stamp,
                },
            );
            cursor = gap_end;
        }
        added
    }
}

/// Counters describing cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Bytes currently held.
    pub size: u64,
    /// Number of blocks currently held.
    pub blocks: u64,
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Blocks evicted over the cache's lifetime.
    pub evictions: u64,
}

/// Bounded segment/offset-addressed cache of byte ranges.
#[derive(Debug)]
pub struct ReadCache {
    segments: RwLock<HashMap<SegmentId, Arc<Mutex<SegmentBlocks>>>>,
    max_size: u64,
    size: AtomicU64,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ReadCache {
    /// Creates a cache that evicts flushed data above `max_size` bytes.
    #[must_use]
    pub fn new(max_size: u64) -> Self {
        Self {
            segments: RwLock::new(HashMap::new()),
            max_size,
            size: AtomicU64::new(0),
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn segment(&self, id: SegmentId) -> Option<Arc<Mutex<SegmentBlocks>>> {
        self.segments.read().get(&id).cloned()
    }

    fn segment_or_insert(&self, id: SegmentId) -> Arc<Mutex<SegmentBlocks>> {
        if let Some(blocks) = self.segment(id) {
            return blocks;
        }
        Arc::clone(self.segments.write().entry(id).or_default())
    }

    /// Caches `data` at `offset`.
    ///
    /// Ranges already cached are left alone; only the gaps are filled.
    pub fn put(&self, segment: SegmentId, offset: u64, data: Bytes) {
        if data.is_empty() {
            return;
        }
        let stamp = self.tick();
        let added = self
            .segment_or_insert(segment)
            .lock()
            .fill_gaps(offset, &data, stamp);
        if added > 0 {
            let total = self.size.fetch_add(added, Ordering::Relaxed) + added;
            if total > self.max_size {
                self.evict();
            }
        }
    }

    /// Returns up to `max_len` bytes starting at `offset` from the single
    /// block that contains it, or `None` on a miss.
    pub fn get(&self, segment: SegmentId, offset: u64, max_len: usize) -> Option<Bytes> {
        let found = self.segment(segment).and_then(|blocks| {
            let mut blocks = blocks.lock();
            let start = blocks.block_at(offset)?;
            let stamp = self.tick();
            let block = blocks.blocks.get_mut(&start)?;
            block.last_access = stamp;
            let from = (offset - start) as usize;
            let to = block.data.len().min(from.saturating_add(max_len));
            Some(block.data.slice(from..to))
        });
        let counter = if found.is_some() { &self.hits } else { &self.misses };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    /// Marks everything below `offset` in `segment` as present in the
    /// long-term tier, making it evictable.
    pub fn mark_flushed(&self, segment: SegmentId, offset: u64) {
        if let Some(blocks) = self.segment(segment) {
            let mut blocks = blocks.lock();
            blocks.flushed = blocks.flushed.max(offset);
        }
        if self.size.load(Ordering::Relaxed) > self.max_size {
            self.evict();
        }
    }

    /// Drops every block of `segment`.
    pub fn remove_segment(&self, segment: SegmentId) {
        if let Some(blocks) = self.segments.write().remove(&segment) {
            let freed: u64 = blocks
                .lock()
                .blocks
                .values()
                .map(|b| b.data.len() as u64)
                .sum();
            self.size.fetch_sub(freed, Ordering::Relaxed);
        }
    }

    /// Drops blocks of `segment` that end at or before `offset`.
    pub fn truncate_before(&self, segment: SegmentId, offset: u64) {
        let Some(blocks) = self.segment(segment) else {
            return;
        };
        let mut blocks = blocks.lock();
        let doomed: Vec<u64> = blocks
            .blocks
            .iter()
            .take_while(|(start, _)| **start < offset)
            .filter(|(start, block)| **start + block.data.len() as u64 <= offset)
            .map(|(start, _)| *start)
            .collect();
        let mut freed = 0;
        for start in doomed {
            if let Some(block) = blocks.blocks.remove(&start) {
                freed += block.data.len() as u64;
            }
        }
        self.size.fetch_sub(freed, Ordering::Relaxed);
    }

    /// Re-keys all blocks of `from` into `to`, shifted by `base`.
    ///
    /// Used once a merged batch has been concatenated into its parent.
    pub fn move_segment(&self, from: SegmentId, to: SegmentId, base: u64) {
        let Some(source) = self.segments.write().remove(&from) else {
            return;
        };
        let source = std::mem::take(&mut source.lock().blocks);
        let target = self.segment_or_insert(to);
        let mut target = target.lock();
        let mut moved = 0;
        let mut dropped = 0;
        for (start, block) in source {
            let len = block.data.len() as u64;
            let added = target.fill_gaps(base + start, &block.data, block.last_access);
            moved += added;
            dropped += len - added;
        }
        self.size.fetch_sub(dropped, Ordering::Relaxed);
        debug!(%from, %to, base, bytes = moved, "moved cached blocks");
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let blocks = self
            .segments
            .read()
            .values()
            .map(|b| b.lock().blocks.len() as u64)
            .sum();
        CacheStats {
            size: self.size.load(Ordering::Relaxed),
            blocks,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Evicts least-recently-used flushed blocks until the cache fits.
    fn evict(&self) {
        let over = self
            .size
            .load(Ordering::Relaxed)
            .saturating_sub(self.max_size);
        if over == 0 {
            return;
        }

        let segments: Vec<(SegmentId, Arc<Mutex<SegmentBlocks>>)> = self
            .segments
            .read()
            .iter()
            .map(|(id, b)| (*id, Arc::clone(b)))
            .collect();

        let mut candidates: Vec<(u64, SegmentId, u64)> = Vec::new();
        for (id, blocks) in &segments {
            let blocks = blocks.lock();
            for (start, block) in &blocks.blocks {
                if start + block.data.len() as u64 <= blocks.flushed {
                    candidates.push((block.last_access, *id, *start));
                }
            }
        }
        candidates.sort_unstable();

        let mut freed = 0;
        let mut evicted = 0;
        for (_, id, start) in candidates {
            if freed >= over {
                break;
            }
            let Some((_, blocks)) = segments.iter().find(|(s, _)| *s == id) else {
                continue;
            };
            if let Some(block) = blocks.lock().blocks.remove(&start) {
                freed += block.data.len() as u64;
                evicted += 1;
            }
        }
        self.size.fetch_sub(freed, Ordering::Relaxed);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        if evicted > 0 {
            debug!(blocks = evicted, bytes = freed, "evicted cache blocks");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEG: SegmentId = SegmentId(1);

    #[test]
    fn get_returns_prefix_of_one_block() {
        let cache = ReadCache::new(1024);
        cache.put(SEG, 0, Bytes::from_static(b"hello"));
        cache.put(SEG, 5, Bytes::from_static(b"world"));

        assert_eq!(cache.get(SEG, 0, 100).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(cache.get(SEG, 2, 2).unwrap(), Bytes::from_static(b"ll"));
        assert_eq!(cache.get(SEG, 7, 100).unwrap(), Bytes::from_static(b"rld"));
        assert!(cache.get(SEG, 10, 1).is_none());
        assert!(cache.get(SegmentId(2), 0, 1).is_none());
    }

    #[test]
    fn put_fills_only_gaps() {
        let cache = ReadCache::new(1024);
        cache.put(SEG, 2, Bytes::from_static(b"cd"));
        cache.put(SEG, 0, Bytes::from_static(b"abcdef"));

        assert_eq!(cache.stats().size, 6);
        assert_eq!(cache.get(SEG, 0, 10).unwrap(), Bytes::from_static(b"ab"));
        assert_eq!(cache.get(SEG, 2, 10).unwrap(), Bytes::from_static(b"cd"));
        assert_eq!(cache.get(SEG, 4, 10).unwrap(), Bytes::from_static(b"ef"));
    }

    #[test]
    fn unflushed_blocks_are_never_evicted() {
        let cache = ReadCache::new(8);
        cache.put(SEG, 0, Bytes::from(vec![1u8; 8]));
        cache.put(SEG, 8, Bytes::from(vec![2u8; 8]));

        assert_eq!(cache.stats().size, 16);
        assert!(cache.get(SEG, 0, 8).is_some());
        assert!(cache.get(SEG, 8, 8).is_some());
    }

    #[test]
    fn flushed_blocks_evicted_lru_first() {
        let cache = ReadCache::new(16);
        cache.put(SEG, 0, Bytes::from(vec![1u8; 8]));
        cache.put(SEG, 8, Bytes::from(vec![2u8; 8]));
        cache.mark_flushed(SEG, 16);
        cache.get(SEG, 0, 1);

        cache.put(SEG, 16, Bytes::from(vec![3u8; 8]));

        let stats = cache.stats();
        assert_eq!(stats.size, 16);
        assert_eq!(stats.evictions, 1);
        assert!(cache.get(SEG, 0, 1).is_some());
        assert!(cache.get(SEG, 8, 1).is_none());
        assert!(cache.get(SEG, 16, 1).is_some());
    }

    #[test]
    fn truncate_and_remove_free_space() {
        let cache = ReadCache::new(1024);
        cache.put(SEG, 0, Bytes::from_static(b"aaaa"));
        cache.put(SEG, 4, Bytes::from_static(b"bbbb"));
        cache.truncate_before(SEG, 5);
        assert!(cache.get(SEG, 0, 1).is_none());
        assert!(cache.get(SEG, 4, 1).is_some());
        assert_eq!(cache.stats().size, 4);

        cache.remove_segment(SEG);
        assert_eq!(cache.stats().size, 0);
    }

    #[test]
    fn move_segment_rekeys_blocks() {
        let cache = ReadCache::new(1024);
        let batch = SegmentId(2);
        cache.put(SEG, 0, Bytes::from_static(b"head"));
        cache.put(batch, 0, Bytes::from_static(b"tx"));
        cache.move_segment(batch, SEG, 4);

        assert!(cache.get(batch, 0, 2).is_none());
        assert_eq!(cache.get(SEG, 4, 10).unwrap(), Bytes::from_static(b"tx"));
        assert_eq!(cache.stats().size, 6);
    }

    #[test]
    fn concurrent_puts_on_disjoint_segments() {
        let cache = Arc::new(ReadCache::new(u64::MAX));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for n in 0..100u64 {
                        cache.put(SegmentId(i), n * 4, Bytes::from(vec![i as u8; 4]));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(cache.stats().size, 8 * 400);
    }
}
