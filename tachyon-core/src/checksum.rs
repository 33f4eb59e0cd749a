//! Checksum manager (spec C8): per-stream content digests, recorded as the
//! archive is built and validated again as it's read, independent of the
//! per-container CRC already carried in `container.rs` (that one guards a
//! single container's bytes against corruption; this one gives the archive
//! a flat, block-order table a reader can sanity-check in one pass before
//! trusting the footer at all).

use tachyon_base::digest64;

use crate::error::{err, ErrorKind, Result};
use crate::ioutil::{LeReadExt, LeWriteExt, MemReader, MemWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumEntry {
    pub block_id: u64,
    pub digest: u64,
}

#[derive(Debug, Clone, Default)]
pub struct ChecksumTable {
    entries: Vec<ChecksumEntry>,
}

impl ChecksumTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, block_id: u64, block_bytes: &[u8]) {
        self.entries.push(ChecksumEntry {
            block_id,
            digest: digest64(block_bytes),
        });
    }

    pub fn entries(&self) -> &[ChecksumEntry] {
        &self.entries
    }

    pub fn verify(&self, block_id: u64, block_bytes: &[u8]) -> Result<()> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.block_id == block_id)
            .ok_or_else(|| {
                err(
                    ErrorKind::Integrity,
                    format!("no checksum table entry for block {block_id}"),
                )
            })?;
        if entry.digest != digest64(block_bytes) {
            return Err(err(
                ErrorKind::Integrity,
                format!("checksum mismatch for block {block_id}"),
            ));
        }
        Ok(())
    }

    /// Serialises the table for the archive's EOF region, alongside the
    /// variant index (spec §6).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = MemWriter::new();
        w.write_u64(self.entries.len() as u64).unwrap();
        for e in &self.entries {
            w.write_u64(e.block_id).unwrap();
            w.write_u64(e.digest).unwrap();
        }
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = MemReader::from(bytes.to_vec());
        let n = r.read_u64()? as usize;
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            entries.push(ChecksumEntry {
                block_id: r.read_u64()?,
                digest: r.read_u64()?,
            });
        }
        Ok(ChecksumTable { entries })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn verify_accepts_recorded_bytes() {
        let mut table = ChecksumTable::new();
        table.record(0, b"block zero bytes");
        assert!(table.verify(0, b"block zero bytes").is_ok());
    }

    #[test]
    fn verify_rejects_tampered_bytes() {
        let mut table = ChecksumTable::new();
        table.record(0, b"block zero bytes");
        assert!(table.verify(0, b"tampered bytes!!").is_err());
    }

    #[test]
    fn verify_rejects_unknown_block() {
        let table = ChecksumTable::new();
        assert!(table.verify(7, b"whatever").is_err());
    }

    #[test]
    fn table_round_trips_through_bytes() {
        let mut table = ChecksumTable::new();
        table.record(0, b"block zero");
        table.record(1, b"block one");
        let restored = ChecksumTable::from_bytes(&table.to_bytes()).unwrap();
        assert!(restored.verify(0, b"block zero").is_ok());
        assert!(restored.verify(1, b"block one").is_ok());
    }
}
