//! Sample permutation engine (spec C3): at ingestion time samples within a
//! block are reordered so that runs of identical genotypes get longer
//! (better RLE ratios downstream in `genotype.rs`), and the permutation
//! itself is stored so a reader can invert it back to original sample
//! order.

use crate::error::{err, ErrorKind, Result};

#[derive(Debug, Clone)]
pub struct Permutation {
    /// `forward[i]` is the original sample index now occupying position
    /// `i` in permuted order.
    forward: Vec<u32>,
}

impl Permutation {
    pub fn identity(n: usize) -> Self {
        Permutation {
            forward: (0..n as u32).collect(),
        }
    }

    pub fn from_forward(forward: Vec<u32>) -> Result<Self> {
        let n = forward.len();
        let mut seen = vec![false; n];
        for &idx in &forward {
            let idx = idx as usize;
            if idx >= n || seen[idx] {
                return Err(err(
                    ErrorKind::InputMalformed,
                    "permutation is not a bijection on the sample range",
                ));
            }
            seen[idx] = true;
        }
        Ok(Permutation { forward })
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    pub fn forward(&self) -> &[u32] {
        &self.forward
    }

    /// `inverse()[original_index]` gives the permuted position that sample
    /// now sits at.
    pub fn inverse(&self) -> Vec<u32> {
        let mut inv = vec![0u32; self.forward.len()];
        for (pos, &orig) in self.forward.iter().enumerate() {
            inv[orig as usize] = pos as u32;
        }
        inv
    }

    pub fn apply<T: Clone>(&self, original_order: &[T]) -> Vec<T> {
        self.forward
            .iter()
            .map(|&orig| original_order[orig as usize].clone())
            .collect()
    }

    pub fn invert<T: Clone>(&self, permuted_order: &[T]) -> Vec<T> {
        let inv = self.inverse();
        inv.iter().map(|&pos| permuted_order[pos as usize].clone()).collect()
    }
}

/// Greedily groups samples by their genotype key at a block so that
/// identical consecutive runs get as long as possible. Genotype keys are
/// opaque to this function -- the caller (block builder) computes a stable
/// per-sample key, typically the concatenation of genotype codes across all
/// variants currently buffered in the block.
pub fn sort_by_key<K: Ord + Clone>(keys: &[K]) -> Permutation {
    let mut order: Vec<u32> = (0..keys.len() as u32).collect();
    order.sort_by(|&a, &b| keys[a as usize].cmp(&keys[b as usize]));
    Permutation { forward: order }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn identity_permutation_inverts_to_itself() {
        let p = Permutation::identity(5);
        assert_eq!(p.inverse(), p.forward());
    }

    #[test]
    fn apply_then_invert_round_trips() {
        let p = Permutation::from_forward(vec![2, 0, 1]).unwrap();
        let original = vec!["a", "b", "c"];
        let permuted = p.apply(&original);
        assert_eq!(permuted, vec!["c", "a", "b"]);
        let restored = p.invert(&permuted);
        assert_eq!(restored, original);
    }

    #[test]
    fn non_bijective_forward_is_rejected() {
        assert!(Permutation::from_forward(vec![0, 0]).is_err());
        assert!(Permutation::from_forward(vec![0, 2]).is_err());
    }

    #[test]
    fn sort_by_key_groups_equal_keys_contiguously() {
        let keys = vec![3, 1, 3, 2, 1];
        let p = sort_by_key(&keys);
        let sorted: Vec<i32> = p.forward().iter().map(|&i| keys[i as usize]).collect();
        assert_eq!(sorted, vec![1, 1, 2, 3, 3]);
    }
}
