//! # String Pooling
//!
//! Per-column deduplication of string values to small integer refs.
//!
//! ## Refs
//!
//! Refs are dense and 1-based; 0 is reserved to mean missing. Insertion
//! assigns the next ref, so the ref order is the insertion order — a
//! property the parallel merge relies on for deterministic ref assignment.
//!
//! ## Canonical Keys
//!
//! The canonical key is the un-escaped byte string: two spellings of the
//! same value (escaped and not) must map to one ref.
//!
//! ## Lifecycle
//!
//! Maps live only during parsing. Afterwards each pooled column is
//! flattened into a `Vec` of keys indexed by `ref − 1` and the map is
//! discarded. When a pool's cardinality outgrows `threshold × estimated
//! rows`, the column is promoted to plain strings and the map dropped early.

use hashbrown::HashMap;

/// One column's string→ref map during parsing.
#[derive(Debug, Default)]
pub(crate) struct StringPool {
    map: HashMap<Box<[u8]>, u64>,
}

impl StringPool {
    pub fn new() -> StringPool {
        StringPool { map: HashMap::new() }
    }

    /// Returns the ref for `key`, inserting the next dense ref when new.
    pub fn intern(&mut self, key: &[u8]) -> u64 {
        if let Some(&r) = self.map.get(key) {
            return r;
        }
        let next = self.map.len() as u64 + 1;
        self.map.insert(key.into(), next);
        next
    }

    /// Distinct-key count.
    pub fn cardinality(&self) -> usize {
        self.map.len()
    }

    /// Flattens the map into the ref table: keys in ref order, indexed by
    /// `ref − 1`. Consumes the pool.
    pub fn into_refs(self) -> Vec<Box<[u8]>> {
        let mut pairs: Vec<(u64, Box<[u8]>)> =
            self.map.into_iter().map(|(k, r)| (r, k)).collect();
        pairs.sort_unstable_by_key(|(r, _)| *r);
        pairs.into_iter().map(|(_, k)| k).collect()
    }
}
