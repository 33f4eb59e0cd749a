//! Builder configuration (spec §6 "Configuration (builder)"). Mirrors the
//! teacher's preference for a plain `serde`-derived struct with a
//! `Default` impl and an explicit `validate()` entry point (SPEC_FULL
//! §10.3) rather than validating scattered across call sites.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{err, ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub input_path: PathBuf,
    pub output_prefix: PathBuf,
    pub verbose: bool,
    pub permute_genotypes: bool,
    pub encrypt_data: bool,
    pub checkpoint_n_variants: u32,
    pub checkpoint_bases: i64,
    pub worker_threads: usize,
    pub codec_threads_for_external_vcf: usize,
    pub compression_level: u32,
    pub info_end_key: Option<u32>,
    pub info_svlen_key: Option<u32>,
}

impl Default for Config {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Config {
            input_path: PathBuf::new(),
            output_prefix: PathBuf::new(),
            verbose: false,
            permute_genotypes: true,
            encrypt_data: false,
            checkpoint_n_variants: 1000,
            checkpoint_bases: 10_000_000,
            worker_threads: parallelism,
            codec_threads_for_external_vcf: parallelism.saturating_sub(1).max(1),
            compression_level: 6,
            info_end_key: None,
            info_svlen_key: None,
        }
    }
}

impl Config {
    /// Field validation (SPEC_FULL §10.3), called once at builder
    /// construction rather than re-checked at every use site.
    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(err(ErrorKind::Capacity, "worker_threads must be >= 1"));
        }
        if self.checkpoint_n_variants == 0 {
            return Err(err(ErrorKind::Capacity, "checkpoint_n_variants must be >= 1"));
        }
        if self.checkpoint_bases <= 0 {
            return Err(err(ErrorKind::Capacity, "checkpoint_bases must be > 0"));
        }
        if self.compression_level > 9 {
            return Err(err(ErrorKind::Capacity, "compression_level must be <= 9"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn zero_worker_threads_rejected() {
        let mut cfg = Config::default();
        cfg.worker_threads = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_checkpoint_variants_rejected() {
        let mut cfg = Config::default();
        cfg.checkpoint_n_variants = 0;
        assert!(cfg.validate().is_err());
    }
}
