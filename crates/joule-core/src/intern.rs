//! Content-addressed string intern store.
//!
//! Strings are immutable once interned; equality of string values reduces to
//! equality of [`StringHandle`]s. Handles are indices into a growable table
//! rather than raw pointers -- strings never move once inserted and the
//! whole table is swept as a unit by the collector, so a plain index is
//! simpler than a pointer without giving anything up (the payload is 48
//! bits regardless; an index wastes none of them).

/// Stable handle into the intern table. `0` is a valid handle (the empty
/// string is free to land there); handles are never reused once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StringHandle(pub u32);

struct Slot {
    hash: u64,
    index: u32,
    occupied: bool,
}

/// Open-addressed hash set over interned byte strings, keyed by a rolling
/// polynomial hash, with a linear-probed index table pointing into a flat
/// backing store of the actual bytes.
pub struct StringInterner {
    storage: Vec<Box<[u8]>>,
    // strings interned via `intern_static` (source constants) are never
    // swept; everything else may be collected once unreferenced.
    collectible: Vec<bool>,
    slots: Vec<Slot>,
    len: usize,
}

const LOAD_FACTOR_PCT: usize = 70;

fn rolling_hash(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(0x0000_0100_0000_01B3);
    }
    h
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner {
            storage: Vec::new(),
            collectible: Vec::new(),
            slots: (0..17).map(|_| Slot { hash: 0, index: 0, occupied: false }).collect(),
            len: 0,
        }
    }

    fn cap(&self) -> usize {
        self.slots.len()
    }

    fn find_slot(&self, hash: u64, bytes: &[u8]) -> Result<usize, usize> {
        let cap = self.cap() as u64;
        let mut i = (hash % cap) as usize;
        loop {
            let slot = &self.slots[i];
            if !slot.occupied {
                return Err(i);
            }
            if slot.hash == hash && &*self.storage[slot.index as usize] == bytes {
                return Ok(i);
            }
            i = (i + 1) % self.slots.len();
        }
    }

    fn maybe_grow(&mut self) {
        if self.len * 100 >= self.cap() * LOAD_FACTOR_PCT {
            let new_cap = self.cap() * 2 + 1;
            let mut new_slots: Vec<Slot> = (0..new_cap)
                .map(|_| Slot { hash: 0, index: 0, occupied: false })
                .collect();
            for slot in &self.slots {
                if !slot.occupied {
                    continue;
                }
                let mut i = (slot.hash % new_cap as u64) as usize;
                while new_slots[i].occupied {
                    i = (i + 1) % new_cap;
                }
                new_slots[i] = Slot {
                    hash: slot.hash,
                    index: slot.index,
                    occupied: true,
                };
            }
            self.slots = new_slots;
        }
    }

    fn intern_inner(&mut self, bytes: &[u8], collectible: bool) -> StringHandle {
        let hash = rolling_hash(bytes);
        match self.find_slot(hash, bytes) {
            Ok(i) => StringHandle(self.slots[i].index),
            Err(i) => {
                let idx = self.storage.len() as u32;
                self.storage.push(bytes.to_vec().into_boxed_slice());
                self.collectible.push(collectible);
                self.slots[i] = Slot { hash, index: idx, occupied: true };
                self.len += 1;
                self.maybe_grow();
                StringHandle(idx)
            }
        }
    }

    /// Idempotent: byte-identical inputs return identical handles.
    pub fn intern(&mut self, bytes: &[u8]) -> StringHandle {
        self.intern_inner(bytes, true)
    }

    /// Intern a string that must never be collected (source-level constants,
    /// the 17 canonical metamethod event names).
    pub fn intern_static(&mut self, bytes: &[u8]) -> StringHandle {
        self.intern_inner(bytes, false)
    }

    pub fn bytes_of(&self, handle: StringHandle) -> &[u8] {
        &self.storage[handle.0 as usize]
    }

    pub fn str_of(&self, handle: StringHandle) -> &str {
        std::str::from_utf8(self.bytes_of(handle)).unwrap_or("<invalid utf8>")
    }

    pub fn is_collectible(&self, handle: StringHandle) -> bool {
        self.collectible[handle.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Collector finalization hook (§4.5 "strings are removed from the
    /// intern store"): drop the probe-table mapping for every collectible
    /// handle not present in `reachable`. The backing storage slot is left
    /// as a tombstone (re-interning identical bytes later simply allocates
    /// a fresh handle) rather than compacted, since handles elsewhere in
    /// the heap are plain indices and must not be invalidated by a shift.
    pub fn sweep(&mut self, reachable: &std::collections::HashSet<u32>) {
        for slot in &mut self.slots {
            if !slot.occupied {
                continue;
            }
            let idx = slot.index;
            if self.collectible[idx as usize] && !reachable.contains(&idx) {
                slot.occupied = false;
                self.len -= 1;
                self.storage[idx as usize] = Box::from([]);
            }
        }
    }
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_bytes_yields_same_handle() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"hello");
        let b = interner.intern(b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn interning_different_bytes_yields_different_handles() {
        let mut interner = StringInterner::new();
        let a = interner.intern(b"hello");
        let b = interner.intern(b"world");
        assert_ne!(a, b);
    }

    #[test]
    fn bytes_of_roundtrips() {
        let mut interner = StringInterner::new();
        let h = interner.intern(b"roundtrip");
        assert_eq!(interner.bytes_of(h), b"roundtrip");
    }

    #[test]
    fn grows_past_load_factor() {
        let mut interner = StringInterner::new();
        let mut handles = Vec::new();
        for i in 0..500 {
            handles.push(interner.intern(format!("str-{i}").as_bytes()));
        }
        for (i, h) in handles.iter().enumerate() {
            assert_eq!(interner.bytes_of(*h), format!("str-{i}").as_bytes());
        }
    }

    #[test]
    fn empty_string_is_a_valid_handle() {
        let mut interner = StringInterner::new();
        let h = interner.intern(b"");
        assert_eq!(interner.bytes_of(h), b"");
        let h2 = interner.intern(b"");
        assert_eq!(h, h2);
    }

    #[test]
    fn sweep_removes_unreachable_collectible_handles() {
        let mut interner = StringInterner::new();
        let keep = interner.intern_static(b"kept");
        let drop_me = interner.intern(b"dropped");
        let mut reachable = std::collections::HashSet::new();
        reachable.insert(keep.0);
        interner.sweep(&reachable);
        assert_eq!(interner.bytes_of(keep), b"kept");
        // content now un-mapped: interning the same bytes again allocates fresh
        let again = interner.intern(b"dropped");
        assert_ne!(again, drop_me);
    }

    #[test]
    fn static_strings_tracked_as_non_collectible() {
        let mut interner = StringInterner::new();
        let h = interner.intern_static(b"index");
        assert!(!interner.is_collectible(h));
        let h2 = interner.intern(b"dynamic");
        assert!(interner.is_collectible(h2));
    }
}
