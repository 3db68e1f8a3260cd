use crate::{
    osm_data::WayId,
    utils::locks::{read_or_recover, write_or_recover},
};
use std::sync::RwLock;

/// Growth margin when marking a way beyond the current end, in 64-bit words (256 ids).
const OVERALLOCATION_WORDS: usize = 4;
/// Way ids in the full planet stay below 2^31 for the foreseeable future (~0.25GB of bits).
const FULL_WAY_ID_SPACE: usize = 1 << 31;
/// In compact mode there are roughly 1/9 as many ways as nodes. 1/8 leaves some headroom.
const COMPACT_WAYS_PER_NODE_DIVISOR: usize = 8;

/// The set of ways that are members of at least one relation.
///
/// Noting these during the relation scan means the main pass only needs to keep
/// the node lists of these ways, instead of every way in the input.
#[derive(Default)]
pub struct UsedWaySet {
    bits: RwLock<UsedWayBits>,
}

#[derive(Default)]
struct UsedWayBits {
    words: Vec<u64>,
    reserved: bool,
}

impl UsedWaySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size the set once for the expected number of ways, to avoid resizing on the fly.
    ///
    /// Only the first call after construction (or [clear](UsedWaySet::clear)) has any effect.
    pub fn reserve(&self, estimated_node_count: usize, compact: bool) {
        let mut guard = write_or_recover(&self.bits, "used ways");
        if guard.reserved {
            return;
        }
        guard.reserved = true;
        let expected_ids = if compact {
            estimated_node_count / COMPACT_WAYS_PER_NODE_DIVISOR
        } else {
            FULL_WAY_ID_SPACE
        };
        let expected_words = expected_ids.div_ceil(64);
        let additional = expected_words.saturating_sub(guard.words.len());
        guard.words.reserve_exact(additional);
        log::debug!("Reserved used way set for {expected_ids} way ids");
    }

    /// Mark `way_id` as used by some relation.
    pub fn mark(&self, way_id: WayId) {
        if way_id < 0 {
            log::debug!("Ignoring synthetic way id {way_id} in used way set");
            return;
        }
        if way_id as u64 >= FULL_WAY_ID_SPACE as u64 {
            log::warn!("Ignoring way id {way_id} beyond the supported id space");
            return;
        }
        let (word, mask) = position(way_id);
        let mut guard = write_or_recover(&self.bits, "used ways");
        if word >= guard.words.len() {
            guard.words.resize(word + 1 + OVERALLOCATION_WORDS, 0);
        }
        guard.words[word] |= mask;
    }

    /// Was `way_id` marked since the last [clear](UsedWaySet::clear)?
    pub fn query(&self, way_id: WayId) -> bool {
        if way_id < 0 {
            return false;
        }
        let (word, mask) = position(way_id);
        let guard = read_or_recover(&self.bits, "used ways");
        guard
            .words
            .get(word)
            .map(|bits| bits & mask != 0)
            .unwrap_or(false)
    }

    /// Number of ways currently marked.
    pub fn count(&self) -> usize {
        let guard = read_or_recover(&self.bits, "used ways");
        guard.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Heap bytes currently held by the set.
    pub fn heap_size(&self) -> usize {
        read_or_recover(&self.bits, "used ways").words.capacity() * std::mem::size_of::<u64>()
    }

    /// Forget all marks and allow the next [reserve](UsedWaySet::reserve) to size the set again.
    pub fn clear(&self) {
        let mut guard = write_or_recover(&self.bits, "used ways");
        guard.words = Vec::new();
        guard.reserved = false;
    }
}

fn position(way_id: WayId) -> (usize, u64) {
    let id = way_id as u64;
    ((id / 64) as usize, 1u64 << (id % 64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, thread};

    #[test]
    fn test_mark_and_query() {
        let used = UsedWaySet::new();
        for id in [0, 1, 63, 64, 1000, 123_456] {
            assert!(!used.query(id));
        }
        used.mark(64);
        used.mark(123_456);
        used.mark(123_456);
        assert!(used.query(64));
        assert!(used.query(123_456));
        assert!(!used.query(63));
        assert!(!used.query(65));
        assert!(!used.query(123_457));
        assert!(!used.query(i64::MAX));
        assert_eq!(used.count(), 2);
    }

    #[test]
    fn test_synthetic_ids_are_never_used() {
        let used = UsedWaySet::new();
        used.mark(-5);
        assert!(!used.query(-5));
        assert_eq!(used.count(), 0);
    }

    #[test]
    fn test_ids_beyond_id_space_are_ignored() {
        let used = UsedWaySet::new();
        used.mark(1 << 50);
        used.mark(FULL_WAY_ID_SPACE as i64);
        assert!(!used.query(1 << 50));
        assert_eq!(used.count(), 0);
        assert_eq!(used.heap_size(), 0);
        used.mark(7);
        assert!(used.query(7));
    }

    #[test]
    fn test_growth_overallocates() {
        let used = UsedWaySet::new();
        used.mark(10);
        let size_after_first = used.heap_size();
        assert!(size_after_first >= (1 + OVERALLOCATION_WORDS) * 8);
        // within the margin, no further growth
        used.mark(200);
        assert_eq!(used.heap_size(), size_after_first);
        assert!(used.query(10));
        assert!(used.query(200));
    }

    #[test]
    fn test_reserve_only_once() {
        let used = UsedWaySet::new();
        used.reserve(64 * 8 * 100, true);
        let reserved = used.heap_size();
        assert!(reserved >= 100 * 8);
        used.reserve(64 * 8 * 10_000, true);
        assert_eq!(used.heap_size(), reserved);
        used.mark(3);
        used.clear();
        assert!(!used.query(3));
        assert_eq!(used.heap_size(), 0);
        // re-armed after clear
        used.reserve(64 * 8 * 200, true);
        assert!(used.heap_size() >= 200 * 8);
    }

    #[test]
    fn test_concurrent_marking() {
        let used = Arc::new(UsedWaySet::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let used = used.clone();
                thread::spawn(move || {
                    // interleaved ids, so threads race on the same words and on growth
                    for i in 0..2_000i64 {
                        used.mark(i * 8 + t);
                    }
                })
            })
            .collect();
        for handle in threads {
            handle.join().expect("marking thread");
        }
        for id in 0..16_000i64 {
            assert!(used.query(id), "lost update for {id}");
        }
        assert!(!used.query(16_000));
        assert_eq!(used.count(), 16_000);
    }
}
