//! Block-level encryption envelope (spec §4.1 encrypted/encryption_kind
//! fields, §12.4: "AEAD = ring AES-256-GCM"). A keychain (`keychain.rs`)
//! owns keys; this module only wraps/unwraps container bytes given a key,
//! nonce, and additional authenticated data the caller has already decided
//! on (typically the container's global id and block id, so a ciphertext
//! can't be silently moved to another container's slot).

use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};

use crate::error::{err, ErrorKind, Result};

pub const KEY_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum EncryptionKind {
    None = 0,
    Aes256Gcm = 1,
}

impl EncryptionKind {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(EncryptionKind::None),
            1 => Ok(EncryptionKind::Aes256Gcm),
            other => Err(err(
                ErrorKind::Unsupported,
                format!("unknown encryption kind {other}"),
            )),
        }
    }
}

/// Encrypts `plaintext` in place, appending ring's authentication tag, and
/// returns the nonce that was used (the keychain is responsible for making
/// sure a (key, nonce) pair is never reused).
pub fn seal(key: &[u8; KEY_LEN], nonce: [u8; NONCE_LEN], aad: &[u8], mut plaintext: Vec<u8>) -> Result<Vec<u8>> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| err(ErrorKind::Integrity, "invalid AEAD key length"))?;
    let key = LessSafeKey::new(unbound);
    let nonce = Nonce::assume_unique_for_key(nonce);
    key.seal_in_place_append_tag(nonce, Aad::from(aad), &mut plaintext)
        .map_err(|_| err(ErrorKind::Integrity, "AEAD seal failed"))?;
    Ok(plaintext)
}

/// Decrypts `ciphertext` (tag included at the tail) in place and returns the
/// plaintext slice length; callers should truncate the buffer afterwards, or
/// use [`open_to_vec`] for a simpler owning API.
pub fn open_to_vec(
    key: &[u8; KEY_LEN],
    nonce: [u8; NONCE_LEN],
    aad: &[u8],
    mut ciphertext: Vec<u8>,
) -> Result<Vec<u8>> {
    let unbound = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| err(ErrorKind::Integrity, "invalid AEAD key length"))?;
    let key = LessSafeKey::new(unbound);
    let nonce = Nonce::assume_unique_for_key(nonce);
    let plaintext_len = key
        .open_in_place(nonce, Aad::from(aad), &mut ciphertext)
        .map_err(|_| err(ErrorKind::Integrity, "AEAD authentication failed"))?
        .len();
    ciphertext.truncate(plaintext_len);
    Ok(ciphertext)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [7u8; KEY_LEN];
        let nonce = [1u8; NONCE_LEN];
        let aad = b"block=3,stream=5";
        let plain = b"column bytes go here".to_vec();
        let sealed = seal(&key, nonce, aad, plain.clone()).unwrap();
        assert_ne!(sealed[..plain.len()], plain[..]);
        let opened = open_to_vec(&key, nonce, aad, sealed).unwrap();
        assert_eq!(opened, plain);
    }

    #[test]
    fn tampered_aad_is_rejected() {
        let key = [7u8; KEY_LEN];
        let nonce = [2u8; NONCE_LEN];
        let plain = b"column bytes".to_vec();
        let sealed = seal(&key, nonce, b"aad-a", plain).unwrap();
        assert!(open_to_vec(&key, nonce, b"aad-b", sealed).is_err());
    }

    #[test]
    fn encryption_kind_unknown_is_hard_error() {
        assert!(EncryptionKind::from_u8(9).is_err());
    }
}
