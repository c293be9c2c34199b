//! Run-fingerprint → GPU tile reservation cache.
//!
//! An open-addressed hash array maps fingerprints to entries in a fixed
//! arena. Every entry owns one atlas tile forever (`gpu_index` never
//! changes); only the *meaning* of the tile is recycled, by popping the LRU
//! tail, removing its old fingerprint, and re-keying it. LRU links are
//! arena indices, so there are no pointer cycles to manage.

use ahash::RandomState;
use std::hash::{BuildHasher, Hash, Hasher};

/// Atlas tile 0 is reserved as "empty" in case the space glyph has coverage.
pub const EMPTY_TILE: u32 = 0;

/// Direct codepoints: printable ASCII, mapped to pre-rasterized tiles whose
/// indices are fixed for the lifetime of the font.
pub const MIN_DIRECT_CODEPOINT: u8 = 32;
pub const MAX_DIRECT_CODEPOINT: u8 = 126;
pub const DIRECT_CODEPOINT_COUNT: usize =
    (MAX_DIRECT_CODEPOINT - MIN_DIRECT_CODEPOINT + 1) as usize;

/// Reserved tiles: the empty tile plus one per direct codepoint.
pub const RESERVED_TILE_COUNT: u32 = DIRECT_CODEPOINT_COUNT as u32 + 1;

/// Fingerprint seeds are build constants; collisions across fonts are not
/// mitigated (the cache is cleared on font refresh).
fn seeded_state() -> RandomState {
    RandomState::with_seeds(0x6d73_a1ef, 0x9e37_79b9_7f4a_7c15, 0x2545_f491_4f6c_dd1d, 0x64)
}

fn fingerprint<T: Hash>(value: T) -> u64 {
    let mut hasher = seeded_state().build_hasher();
    value.hash(&mut hasher);
    hasher.finish()
}

/// Fingerprint of a shaping run's codepoints.
pub fn run_fingerprint(codepoints: &[char]) -> u64 {
    fingerprint(codepoints)
}

/// Fingerprint of one tile of a multi-tile run.
pub fn tile_fingerprint(run: u64, tile_index: u32) -> u64 {
    fingerprint((run, tile_index))
}

/// Fixed direct-codepoint → tile-index table, assigned once per font.
pub struct ReservedTiles {
    table: [u32; DIRECT_CODEPOINT_COUNT],
}

impl ReservedTiles {
    pub fn new(first_index: u32) -> Self {
        let mut table = [0u32; DIRECT_CODEPOINT_COUNT];
        for (i, slot) in table.iter_mut().enumerate() {
            *slot = first_index + i as u32;
        }
        Self { table }
    }

    pub fn get(&self, codepoint: u8) -> u32 {
        debug_assert!((MIN_DIRECT_CODEPOINT..=MAX_DIRECT_CODEPOINT).contains(&codepoint));
        self.table[(codepoint - MIN_DIRECT_CODEPOINT) as usize]
    }
}

impl Default for ReservedTiles {
    fn default() -> Self {
        // Tile 0 stays empty; direct tiles start right after it.
        Self::new(EMPTY_TILE + 1)
    }
}

pub fn is_direct_codepoint(c: char) -> bool {
    (MIN_DIRECT_CODEPOINT as u32..=MAX_DIRECT_CODEPOINT as u32).contains(&(c as u32))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlyphState {
    None,
    Sized,
    Rasterized,
}

const NIL: u32 = u32::MAX;

#[derive(Debug, Clone)]
struct GlyphEntry {
    hash: u64,
    keyed: bool,
    state: GlyphState,
    gpu_index: u32,
    dim_x: u16,
    dim_y: u16,
    lru_prev: u32,
    lru_next: u32,
}

/// Result of a cache probe: stable tile plus lifecycle state. The tile is
/// valid for the caller's rendering work this frame.
#[derive(Debug, Clone, Copy)]
pub struct FoundGlyph {
    pub id: u32,
    pub gpu_index: u32,
    pub state: GlyphState,
    pub dim_x: u16,
    pub dim_y: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GlyphStats {
    pub hits: u64,
    pub misses: u64,
    pub recycles: u64,
}

pub struct GlyphTable {
    /// Entry id + 1 per slot; 0 marks a vacant slot.
    slots: Vec<u32>,
    entries: Vec<GlyphEntry>,
    mask: u64,
    lru_head: u32,
    lru_tail: u32,
    stats: GlyphStats,
}

impl GlyphTable {
    /// `entry_count` entries covering the atlas tiles starting at
    /// `first_gpu_index`. The slot array is grown past `hash_count` if
    /// needed to keep the open addressing sparse.
    pub fn new(entry_count: usize, hash_count: usize, first_gpu_index: u32) -> Self {
        let entry_count = entry_count.max(1);
        let hash_count = hash_count
            .next_power_of_two()
            .max((entry_count * 2).next_power_of_two());

        let mut table = Self {
            slots: vec![0u32; hash_count],
            entries: Vec::with_capacity(entry_count),
            mask: hash_count as u64 - 1,
            lru_head: NIL,
            lru_tail: NIL,
            stats: GlyphStats::default(),
        };

        for i in 0..entry_count as u32 {
            table.entries.push(GlyphEntry {
                hash: 0,
                keyed: false,
                state: GlyphState::None,
                gpu_index: first_gpu_index + i,
                dim_x: 0,
                dim_y: 0,
                lru_prev: NIL,
                lru_next: NIL,
            });
            table.link_head(i);
        }

        table
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Probe for a fingerprint. A hit touches the entry; a miss recycles the
    /// LRU tail under the new fingerprint with `state` reset to `None`.
    pub fn find(&mut self, hash: u64) -> FoundGlyph {
        if let Some(id) = self.probe(hash) {
            self.stats.hits += 1;
            self.touch(id);
            return self.found(id);
        }

        self.stats.misses += 1;
        let victim = self.lru_tail;
        if self.entries[victim as usize].keyed {
            let old = self.entries[victim as usize].hash;
            self.remove_slot(old);
            self.stats.recycles += 1;
        }

        let entry = &mut self.entries[victim as usize];
        entry.hash = hash;
        entry.keyed = true;
        entry.state = GlyphState::None;
        entry.dim_x = 0;
        entry.dim_y = 0;
        self.insert_slot(hash, victim);
        self.touch(victim);
        self.found(victim)
    }

    /// Promote an entry's lifecycle state and record its tile dimensions.
    pub fn update(&mut self, id: u32, state: GlyphState, dim_x: u16, dim_y: u16) {
        let entry = &mut self.entries[id as usize];
        entry.state = state;
        entry.dim_x = dim_x;
        entry.dim_y = dim_y;
    }

    /// Take and clear the counters.
    pub fn stats(&mut self) -> GlyphStats {
        std::mem::take(&mut self.stats)
    }

    fn found(&self, id: u32) -> FoundGlyph {
        let entry = &self.entries[id as usize];
        FoundGlyph {
            id,
            gpu_index: entry.gpu_index,
            state: entry.state,
            dim_x: entry.dim_x,
            dim_y: entry.dim_y,
        }
    }

    fn probe(&self, hash: u64) -> Option<u32> {
        let mut i = (hash & self.mask) as usize;
        loop {
            let slot = self.slots[i];
            if slot == 0 {
                return None;
            }
            let id = slot - 1;
            if self.entries[id as usize].hash == hash {
                return Some(id);
            }
            i = (i + 1) & self.mask as usize;
        }
    }

    fn insert_slot(&mut self, hash: u64, id: u32) {
        let mut i = (hash & self.mask) as usize;
        while self.slots[i] != 0 {
            i = (i + 1) & self.mask as usize;
        }
        self.slots[i] = id + 1;
    }

    /// Backward-shift deletion keeps probe chains intact without tombstones.
    fn remove_slot(&mut self, hash: u64) {
        let mut i = (hash & self.mask) as usize;
        loop {
            let slot = self.slots[i];
            if slot == 0 {
                return;
            }
            if self.entries[(slot - 1) as usize].hash == hash {
                break;
            }
            i = (i + 1) & self.mask as usize;
        }

        self.slots[i] = 0;
        let mut j = (i + 1) & self.mask as usize;
        while self.slots[j] != 0 {
            let id = self.slots[j] - 1;
            let h = self.entries[id as usize].hash;
            self.slots[j] = 0;
            self.insert_slot(h, id);
            j = (j + 1) & self.mask as usize;
        }
    }

    fn touch(&mut self, id: u32) {
        self.unlink(id);
        self.link_head(id);
    }

    fn unlink(&mut self, id: u32) {
        let (prev, next) = {
            let entry = &self.entries[id as usize];
            (entry.lru_prev, entry.lru_next)
        };
        if prev != NIL {
            self.entries[prev as usize].lru_next = next;
        } else if self.lru_head == id {
            self.lru_head = next;
        }
        if next != NIL {
            self.entries[next as usize].lru_prev = prev;
        } else if self.lru_tail == id {
            self.lru_tail = prev;
        }
        let entry = &mut self.entries[id as usize];
        entry.lru_prev = NIL;
        entry.lru_next = NIL;
    }

    fn link_head(&mut self, id: u32) {
        let old = self.lru_head;
        self.entries[id as usize].lru_next = old;
        self.entries[id as usize].lru_prev = NIL;
        if old != NIL {
            self.entries[old as usize].lru_prev = id;
        }
        self.lru_head = id;
        if self.lru_tail == NIL {
            self.lru_tail = id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_is_idempotent_within_a_frame() {
        let mut table = GlyphTable::new(8, 32, RESERVED_TILE_COUNT);
        let a = table.find(run_fingerprint(&['क']));
        let b = table.find(run_fingerprint(&['क']));
        assert_eq!(a.gpu_index, b.gpu_index);
        let stats = table.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.recycles, 0);
    }

    #[test]
    fn gpu_indices_start_after_reserved_and_never_change() {
        let mut table = GlyphTable::new(4, 32, RESERVED_TILE_COUNT);
        let mut seen = Vec::new();
        for c in ['a', 'b', 'c', 'd'] {
            let found = table.find(run_fingerprint(&[c]));
            assert!(found.gpu_index >= RESERVED_TILE_COUNT);
            seen.push(found.gpu_index);
        }
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn within_capacity_nothing_recycles() {
        let mut table = GlyphTable::new(16, 64, 1);
        for i in 0u32..16 {
            table.find(tile_fingerprint(99, i));
        }
        assert_eq!(table.stats().recycles, 0);
    }

    #[test]
    fn over_capacity_recycles_lru_first() {
        let capacity = 8u32;
        let mut table = GlyphTable::new(capacity as usize, 64, 1);
        let extra = 3u32;
        for i in 0..capacity + extra {
            table.find(tile_fingerprint(7, i));
        }
        let stats = table.stats();
        assert_eq!(stats.misses as u32, capacity + extra);
        assert_eq!(stats.recycles as u32, extra);

        // Second pass over the same inputs: the early entries were evicted,
        // so every lookup misses again and recycles.
        for i in 0..capacity + extra {
            table.find(tile_fingerprint(7, i));
        }
        let stats = table.stats();
        assert!(stats.recycles as u32 >= extra);
    }

    #[test]
    fn recycle_reuses_the_tile_under_a_new_key() {
        let mut table = GlyphTable::new(1, 16, 5);
        let first = table.find(1111);
        table.update(first.id, GlyphState::Rasterized, 1, 1);

        let second = table.find(2222);
        assert_eq!(second.gpu_index, first.gpu_index);
        assert_eq!(second.state, GlyphState::None);

        // The old key no longer resolves to a rasterized entry.
        let back = table.find(1111);
        assert_eq!(back.state, GlyphState::None);
    }

    #[test]
    fn update_promotes_state_and_dims() {
        let mut table = GlyphTable::new(4, 16, 1);
        let found = table.find(42);
        assert_eq!(found.state, GlyphState::None);
        table.update(found.id, GlyphState::Sized, 3, 1);
        let again = table.find(42);
        assert_eq!(again.state, GlyphState::Sized);
        assert_eq!((again.dim_x, again.dim_y), (3, 1));
    }

    #[test]
    fn hit_refreshes_lru_position() {
        let mut table = GlyphTable::new(2, 16, 1);
        let a = table.find(1);
        let _b = table.find(2);
        let a_again = table.find(1); // touch: 2 is now the tail
        assert_eq!(a.gpu_index, a_again.gpu_index);

        let c = table.find(3); // evicts 2, not 1
        assert_ne!(c.gpu_index, a.gpu_index);
        let a_third = table.find(1);
        assert_eq!(a_third.gpu_index, a.gpu_index);
        assert_eq!(a_third.state, GlyphState::None);
    }

    #[test]
    fn reserved_table_is_dense_and_disjoint_from_empty() {
        let reserved = ReservedTiles::default();
        assert_eq!(reserved.get(b' '), 1);
        assert_eq!(reserved.get(b'~'), 95);
        for c in MIN_DIRECT_CODEPOINT..=MAX_DIRECT_CODEPOINT {
            assert_ne!(reserved.get(c), EMPTY_TILE);
        }
    }

    #[test]
    fn fingerprints_differ_per_tile() {
        let run = run_fingerprint(&['क', 'ख']);
        assert_ne!(tile_fingerprint(run, 0), tile_fingerprint(run, 1));
        assert_ne!(tile_fingerprint(run, 0), run);
    }
}
