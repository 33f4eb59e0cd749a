mod bitset;
mod error;

pub use bitset::BitSet;
pub use error::{err, Error, Result};

/// Fixed-seed 64-bit content digest used throughout the engine: pattern
/// interning, per-container integrity digests, and checksum-table
/// entries. A single hash keeps pattern interning, container digests, and
/// checksums on one primitive instead of pulling in a second, unrelated
/// hashing crate just for CRC-equivalent checks.
pub fn digest64(bytes: &[u8]) -> u64 {
    rapidhash::rapidhash(bytes)
}

#[cfg(test)]
mod test {
    use super::digest64;

    #[test]
    fn digest_is_deterministic() {
        assert_eq!(digest64(b"hello"), digest64(b"hello"));
        assert_ne!(digest64(b"hello"), digest64(b"world"));
    }
}
