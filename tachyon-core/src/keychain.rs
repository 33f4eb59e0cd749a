//! Keychain (spec C12): a mapping from `(block id, container local id)` to
//! the AEAD key/nonce/tag used to encrypt that container, persisted
//! separately from the archive itself (spec §6 "Keychain file. Separate
//! file with MAGIC prefix, version triple, and a serialised mapping").
//!
//! Built up incrementally as blocks are sealed; spec §5 notes it's
//! append-only while building and shared across consumer threads, so the
//! map itself is guarded by a mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::aead::KEY_LEN;
use crate::error::{err, ErrorKind, Result};
use crate::ioutil::{LeReadExt, LeWriteExt, Reader, Writer};

pub const KEYCHAIN_MAGIC: &[u8; 8] = b"TCYNKEY\0";
pub const KEYCHAIN_VERSION: (u16, u16, u16) = (0, 1, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContainerLocus {
    pub block_id: u64,
    pub local_id: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct KeyEntry {
    pub key: [u8; KEY_LEN],
    pub nonce: [u8; 12],
}

#[derive(Default)]
pub struct Keychain {
    entries: Mutex<HashMap<ContainerLocus, KeyEntry>>,
}

impl Keychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, locus: ContainerLocus, entry: KeyEntry) {
        self.entries.lock().unwrap().insert(locus, entry);
    }

    pub fn get(&self, locus: ContainerLocus) -> Option<KeyEntry> {
        self.entries.lock().unwrap().get(&locus).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn write(&self, w: &mut impl Writer) -> Result<()> {
        w.write_all(KEYCHAIN_MAGIC).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        w.write_u16(KEYCHAIN_VERSION.0)?;
        w.write_u16(KEYCHAIN_VERSION.1)?;
        w.write_u16(KEYCHAIN_VERSION.2)?;
        let entries = self.entries.lock().unwrap();
        w.write_u64(entries.len() as u64)?;
        for (locus, entry) in entries.iter() {
            w.write_u64(locus.block_id)?;
            w.write_u32(locus.local_id)?;
            w.write_bytes(&entry.key)?;
            w.write_bytes(&entry.nonce)?;
        }
        Ok(())
    }

    pub fn read(r: &mut impl Reader) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        if &magic != KEYCHAIN_MAGIC {
            return Err(err(ErrorKind::InputMalformed, "bad keychain magic"));
        }
        let major = r.read_u16()?;
        let minor = r.read_u16()?;
        let _patch = r.read_u16()?;
        if (major, minor) > (KEYCHAIN_VERSION.0, KEYCHAIN_VERSION.1) {
            return Err(err(
                ErrorKind::Unsupported,
                format!("keychain version {major}.{minor} is newer than supported"),
            ));
        }
        let n = r.read_u64()?;
        let mut map = HashMap::with_capacity(n as usize);
        for _ in 0..n {
            let block_id = r.read_u64()?;
            let local_id = r.read_u32()?;
            let key_bytes = r.read_bytes()?;
            let nonce_bytes = r.read_bytes()?;
            let key: [u8; KEY_LEN] = key_bytes
                .try_into()
                .map_err(|_| err(ErrorKind::InputMalformed, "keychain key has wrong length"))?;
            let nonce: [u8; 12] = nonce_bytes
                .try_into()
                .map_err(|_| err(ErrorKind::InputMalformed, "keychain nonce has wrong length"))?;
            map.insert(ContainerLocus { block_id, local_id }, KeyEntry { key, nonce });
        }
        Ok(Keychain {
            entries: Mutex::new(map),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ioutil::MemWriter;

    #[test]
    fn keychain_round_trips_through_bytes() {
        let kc = Keychain::new();
        kc.insert(
            ContainerLocus { block_id: 0, local_id: 3 },
            KeyEntry { key: [1u8; KEY_LEN], nonce: [2u8; 12] },
        );
        kc.insert(
            ContainerLocus { block_id: 0, local_id: 4 },
            KeyEntry { key: [3u8; KEY_LEN], nonce: [4u8; 12] },
        );

        let mut w = MemWriter::new();
        kc.write(&mut w).unwrap();
        let mut r = w.try_into_reader().unwrap();
        let restored = Keychain::read(&mut r).unwrap();

        assert_eq!(restored.len(), 2);
        let e = restored
            .get(ContainerLocus { block_id: 0, local_id: 3 })
            .unwrap();
        assert_eq!(e.key, [1u8; KEY_LEN]);
        assert_eq!(e.nonce, [2u8; 12]);
    }

    #[test]
    fn unknown_locus_returns_none() {
        let kc = Keychain::new();
        assert!(kc.get(ContainerLocus { block_id: 9, local_id: 9 }).is_none());
    }
}
