//! Tachyon: a columnar storage engine for cohort-scale variant-call data.
//!
//! A block (`block`) packs a batch of VCF-like records into fixed base
//! containers (`container`) plus dynamic INFO/FORMAT containers, with
//! sample genotypes run-length encoded (`genotype`) over a positionally
//! sorted sample permutation (`permutation`) and per-variant field
//! presence interned into set-membership dictionaries (`dict`). Blocks are
//! produced concurrently (`pipeline`) and serialised in strict id order by
//! a single writer (`writer`) into an archive indexed for interval queries
//! (`index`) and optionally AEAD-encrypted per container (`aead`,
//! `keychain`). `reader` is the inverse: open an archive, seek by interval
//! or stream sequentially, and materialise records back out.

mod aead;
mod block;
mod checksum;
mod codec;
mod config;
mod container;
mod dict;
mod error;
mod footer;
mod genotype;
mod index;
mod ioutil;
mod keychain;
mod permutation;
mod pipeline;
mod primitive;
mod primitive_value;
mod reader;
mod variant;
pub mod vcf;
mod writer;

pub use aead::EncryptionKind;
pub use block::{Block, BlockBuilder, BlockHeader, BuiltBlock, ControllerFlags, FieldSelection};
pub use checksum::{ChecksumEntry, ChecksumTable};
pub use codec::{ByteCodec, Deflate, Store};
pub use config::Config;
pub use container::{Container, ContainerFlags, ContainerHeader};
pub use dict::{Pattern, StreamDict};
pub use error::{err, ErrorKind, Locus, Result, TachyonError};
pub use footer::{BaseRole, Footer};
pub use genotype::{
    AlleleCall, GenotypeEncoding, GenotypeForm, GenotypeParams, GenotypeSummary, SampleGenotype,
};
pub use index::{bin_for, bins_overlapping, IndexEntry, VariantIndex};
pub use ioutil::{FileReader, FileWriter, MemReader, MemWriter, Reader, Writer as SinkWriter};
pub use keychain::{ContainerLocus, KeyEntry, Keychain};
pub use permutation::Permutation;
pub use pipeline::{run as run_pipeline, PipelineStats};
pub use primitive::{PrimitiveTag, Sentinels};
pub use primitive_value::Value;
pub use reader::{
    write_archive_header, write_eof_region, Archive, Trailer, ARCHIVE_MAGIC, TRAILER_MAGIC_TAIL,
};
pub use variant::{
    canonical_base_code, canonical_base_for_code, ContigDef, FieldDef, FieldType, FieldValue,
    FormatEntry, InfoEntry, Schema, VariantRecord,
};
pub use writer::Writer;
