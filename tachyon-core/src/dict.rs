//! Set-membership dictionaries (spec C5 / §4.5): per category (info,
//! format, filter) a block needs a global-id → local-id map and a
//! pattern → local-pattern-id map, plus the per-pattern bit-vector that
//! lets a reader know, from one small integer, exactly which local streams
//! a given variant references.

use std::collections::HashMap;

use tachyon_base::{digest64, BitSet};

use crate::error::{err, ErrorKind, Result};

/// A fixed seed folded into the pattern hash so the hash is stable across
/// runs (spec §6 "Pattern hash... fixed seed chosen once"); collisions
/// degrade to full vector comparison rather than being treated as fatal.
const PATTERN_HASH_SEED: u64 = 0x5bd1_e995_9e37_79b9;

#[derive(Debug, Clone)]
pub struct Pattern {
    pub global_ids: Vec<u32>,
    pub bits: BitSet,
}

#[derive(Debug, Clone, Default)]
pub struct StreamDict {
    /// local id -> global id, in allocation order.
    local_to_global: Vec<u32>,
    global_to_local: HashMap<u32, u32>,
    patterns: Vec<Pattern>,
    pattern_by_hash: HashMap<u64, Vec<u32>>,
}

impl StreamDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_streams(&self) -> usize {
        self.local_to_global.len()
    }

    pub fn n_patterns(&self) -> usize {
        self.patterns.len()
    }

    pub fn local_to_global(&self) -> &[u32] {
        &self.local_to_global
    }

    pub fn patterns(&self) -> &[Pattern] {
        &self.patterns
    }

    pub fn add_stream(&mut self, global_id: u32) -> u32 {
        if let Some(&local) = self.global_to_local.get(&global_id) {
            return local;
        }
        let local = self.local_to_global.len() as u32;
        self.local_to_global.push(global_id);
        self.global_to_local.insert(global_id, local);
        local
    }

    pub fn local_id_of(&self, global_id: u32) -> Option<u32> {
        self.global_to_local.get(&global_id).copied()
    }

    fn pattern_hash(sorted_global_ids: &[u32]) -> u64 {
        let mut bytes = Vec::with_capacity(sorted_global_ids.len() * 4 + 8);
        bytes.extend_from_slice(&PATTERN_HASH_SEED.to_le_bytes());
        for id in sorted_global_ids {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        digest64(&bytes)
    }

    /// Registers a pattern from an (unsorted, possibly unsorted by caller)
    /// set of global ids. Global ids not yet known to the dictionary are
    /// implicitly registered via `add_stream` first, so the pattern's
    /// bit-vector always indexes valid local ids.
    pub fn add_pattern(&mut self, global_ids: &[u32]) -> u32 {
        let mut sorted: Vec<u32> = global_ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        for &g in &sorted {
            self.add_stream(g);
        }
        let hash = Self::pattern_hash(&sorted);
        if let Some(candidates) = self.pattern_by_hash.get(&hash) {
            for &pid in candidates {
                if self.patterns[pid as usize].global_ids == sorted {
                    return pid;
                }
            }
        }
        let mut bits = BitSet::new(self.n_streams());
        for &g in &sorted {
            let local = self.global_to_local[&g];
            bits.set(local as usize, true);
        }
        let pid = self.patterns.len() as u32;
        self.patterns.push(Pattern {
            global_ids: sorted,
            bits,
        });
        self.pattern_by_hash.entry(hash).or_default().push(pid);
        pid
    }

    /// Called once the block is finalized and `n_streams` is final: every
    /// pattern's bit-vector is rebuilt at the final width, since streams
    /// registered after a pattern was interned would otherwise leave its
    /// bit-vector too short.
    pub fn rebuild_bitvectors(&mut self) {
        let n_streams = self.n_streams();
        for pattern in &mut self.patterns {
            let mut bits = BitSet::new(n_streams);
            for &g in &pattern.global_ids {
                if let Some(local) = self.global_to_local.get(&g) {
                    bits.set(*local as usize, true);
                }
            }
            pattern.bits = bits;
        }
    }

    /// Local ids referenced by pattern `pattern_id`, in ascending local-id
    /// order -- the canonical order the spec's set-membership-soundness
    /// property is defined against.
    pub fn locals_for_pattern(&self, pattern_id: u32) -> Result<Vec<u32>> {
        let pattern = self.patterns.get(pattern_id as usize).ok_or_else(|| {
            err(ErrorKind::InputMalformed, format!("unknown pattern id {pattern_id}"))
        })?;
        Ok(pattern.bits.iter_set().map(|i| i as u32).collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn repeated_pattern_interns_to_same_id() {
        let mut d = StreamDict::new();
        let p1 = d.add_pattern(&[10, 20]);
        let p2 = d.add_pattern(&[20, 10]);
        assert_eq!(p1, p2);
        assert_eq!(d.n_patterns(), 1);
    }

    #[test]
    fn distinct_patterns_get_distinct_ids() {
        let mut d = StreamDict::new();
        let p1 = d.add_pattern(&[10, 20]);
        let p2 = d.add_pattern(&[10]);
        assert_ne!(p1, p2);
        assert_eq!(d.n_patterns(), 2);
    }

    #[test]
    fn pattern_bitvector_matches_local_ids_in_order() {
        let mut d = StreamDict::new();
        let dp = d.add_stream(1);
        let af = d.add_stream(2);
        let p = d.add_pattern(&[2, 1]);
        let mut locals = d.locals_for_pattern(p).unwrap();
        locals.sort_unstable();
        let mut expected = vec![dp, af];
        expected.sort_unstable();
        assert_eq!(locals, expected);
    }

    #[test]
    fn rebuild_bitvectors_picks_up_later_streams() {
        let mut d = StreamDict::new();
        let p = d.add_pattern(&[5]);
        d.add_stream(6);
        d.rebuild_bitvectors();
        assert_eq!(d.patterns()[p as usize].bits.count(), 1);
    }
}
