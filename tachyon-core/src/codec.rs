//! Byte-stream compression for sub-stream containers (spec §4.1, §12.4:
//! "byte codec = flate2/deflate"). A container never assumes a single
//! algorithm is wired in forever: `ByteCodec` is the seam, `Deflate` is the
//! one implementation shipped today.

use std::io::{Read, Write};

use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{err, ErrorKind, Result};

pub trait ByteCodec: Send + Sync {
    fn compress(&self, level: u32, input: &[u8]) -> Result<Vec<u8>>;
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Deflate;

impl ByteCodec for Deflate {
    fn compress(&self, level: u32, input: &[u8]) -> Result<Vec<u8>> {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::new(level.min(9)));
        enc.write_all(input).map_err(|e| {
            err(ErrorKind::Io, format!("deflate compress write failed: {e}"))
        })?;
        enc.finish()
            .map_err(|e| err(ErrorKind::Io, format!("deflate compress finish failed: {e}")))
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        let mut dec = DeflateDecoder::new(input);
        let mut out = Vec::with_capacity(expected_len);
        dec.read_to_end(&mut out).map_err(|e| {
            err(ErrorKind::Integrity, format!("deflate decompress failed: {e}"))
        })?;
        if out.len() != expected_len {
            return Err(err(
                ErrorKind::Integrity,
                format!(
                    "deflate decompress length mismatch: expected {expected_len}, got {}",
                    out.len()
                ),
            ));
        }
        Ok(out)
    }
}

/// A no-op codec for streams the caller has determined aren't worth
/// compressing (e.g. already-compressed struct blobs, or tiny containers
/// where the deflate header overhead would net negative).
#[derive(Debug, Clone, Copy, Default)]
pub struct Store;

impl ByteCodec for Store {
    fn compress(&self, _level: u32, input: &[u8]) -> Result<Vec<u8>> {
        Ok(input.to_vec())
    }
    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if input.len() != expected_len {
            return Err(err(
                ErrorKind::Integrity,
                format!(
                    "store codec length mismatch: expected {expected_len}, got {}",
                    input.len()
                ),
            ));
        }
        Ok(input.to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn deflate_round_trip() {
        let codec = Deflate;
        let data = b"the quick brown fox jumps over the lazy dog".repeat(8);
        let compressed = codec.compress(6, &data).unwrap();
        let restored = codec.decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }

    #[test]
    fn deflate_rejects_truncated_input() {
        let codec = Deflate;
        let data = b"some data that compresses".repeat(4);
        let mut compressed = codec.compress(6, &data).unwrap();
        compressed.truncate(compressed.len() / 2);
        assert!(codec.decompress(&compressed, data.len()).is_err());
    }

    #[test]
    fn store_round_trip() {
        let codec = Store;
        let data = b"raw bytes".to_vec();
        let compressed = codec.compress(0, &data).unwrap();
        let restored = codec.decompress(&compressed, data.len()).unwrap();
        assert_eq!(restored, data);
    }
}
