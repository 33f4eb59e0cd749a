//! The block (spec C2): a fixed set of base containers by role, dynamic
//! INFO/FORMAT containers, and a footer (`footer.rs`) tying the set-
//! membership dictionaries (C5) together. `BlockBuilder` is the write side
//! (spec §4.2's `allocate`/`add_info`/`add_format`/`add_filter`/
//! `append_variant`/`finalize`/`write`); [`Block`] is the read side
//! (`read_header_footer`/`read_body`).
//!
//! INFO and FORMAT containers hold one record per *occurrence*, not one
//! record per variant: a variant that doesn't carry a field contributes no
//! record to that field's container at all (spec §4.5 "this is what lets
//! the reader skip absent streams without per-record metadata"). FORMAT
//! containers additionally hold one record per *sample* per occurrence
//! (`sample_count` consecutive records), so the same per-record container
//! machinery from `container.rs` serves both categories unmodified.

use std::collections::HashMap;

use tachyon_base::digest64;

use crate::aead::{EncryptionKind, KEY_LEN};
use crate::codec::ByteCodec;
use crate::container::{Container, ContainerHeader};
use crate::dict::StreamDict;
use crate::error::{err, ErrorKind, Locus, Result};
use crate::footer::{BaseRole, Footer};
use crate::genotype::{self, GenotypeForm, GenotypeParams, SampleGenotype};
use crate::index::IndexEntry;
use crate::ioutil::{LeReadExt, LeWriteExt, MemReader, MemWriter, Reader, Writer};
use crate::keychain::{ContainerLocus, KeyEntry, Keychain};
use crate::permutation::Permutation;
use crate::primitive::PrimitiveTag;
use crate::primitive_value::Value;
use crate::variant::{canonical_base_code, FieldValue, InfoEntry, VariantRecord};

pub const BLOCK_MAGIC: &[u8; 4] = b"TCBK";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerFlags {
    pub has_gt: bool,
    pub has_gt_permuted: bool,
    pub any_encrypted: bool,
}

impl ControllerFlags {
    fn to_u16(self) -> u16 {
        (self.has_gt as u16) | ((self.has_gt_permuted as u16) << 1) | ((self.any_encrypted as u16) << 2)
    }
    fn from_u16(v: u16) -> Self {
        ControllerFlags {
            has_gt: v & 1 != 0,
            has_gt_permuted: v & 2 != 0,
            any_encrypted: v & 4 != 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockHeader {
    pub footer_offset_rel: u32,
    pub block_hash: u64,
    pub controller: ControllerFlags,
    pub contig: i32,
    pub min_position: i64,
    pub max_position: i64,
    pub n_variants: u32,
}

const BLOCK_HEADER_LEN: usize = 4 + 4 + 8 + 2 + 4 + 8 + 8 + 4;

impl BlockHeader {
    fn write(&self, w: &mut impl Writer) -> Result<()> {
        w.write_all(BLOCK_MAGIC).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        w.write_u32(self.footer_offset_rel)?;
        w.write_u64(self.block_hash)?;
        w.write_u16(self.controller.to_u16())?;
        w.write_i32(self.contig)?;
        w.write_i64(self.min_position)?;
        w.write_i64(self.max_position)?;
        w.write_u32(self.n_variants)?;
        Ok(())
    }

    fn read(r: &mut impl Reader) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        if &magic != BLOCK_MAGIC {
            return Err(err(ErrorKind::Truncated, "bad block magic"));
        }
        Ok(BlockHeader {
            footer_offset_rel: r.read_u32()?,
            block_hash: r.read_u64()?,
            controller: ControllerFlags::from_u16(r.read_u16()?),
            contig: r.read_i32()?,
            min_position: r.read_i64()?,
            max_position: r.read_i64()?,
            n_variants: r.read_u32()?,
        })
    }
}

/// Length-prefixed (u16) concatenation used for any Struct-tagged
/// container occurrence that itself holds a variable number of sub-items
/// (allele lists, FORMAT/INFO string values): each sub-item is
/// self-delimiting inside the blob, and the container's per-occurrence
/// `stride` records the *byte length* of the whole blob so occurrences can
/// be sliced out of the container's flat data buffer.
fn encode_blob(items: &[impl AsRef<[u8]>]) -> Vec<u8> {
    let mut out = Vec::new();
    for item in items {
        let bytes = item.as_ref();
        out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        out.extend_from_slice(bytes);
    }
    out
}

fn decode_blob(mut bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut out = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 2 {
            return Err(err(ErrorKind::Truncated, "truncated length-prefixed blob"));
        }
        let len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        bytes = &bytes[2..];
        if bytes.len() < len {
            return Err(err(ErrorKind::Truncated, "truncated length-prefixed blob item"));
        }
        out.push(bytes[..len].to_vec());
        bytes = &bytes[len..];
    }
    Ok(out)
}

fn append_field_value(container: &mut Container, value: &FieldValue) -> Result<()> {
    match value {
        FieldValue::Flag => container.append(Value::Boolean(true)),
        FieldValue::Int(vals) => {
            let v: Vec<Value> = vals.iter().map(|&x| Value::I32(x)).collect();
            container.append_vector(&v)
        }
        FieldValue::Float(vals) => {
            let v: Vec<Value> = vals.iter().map(|&x| Value::F32(x)).collect();
            container.append_vector(&v)
        }
        FieldValue::Char(vals) => {
            let v: Vec<Value> = vals.iter().map(|&x| Value::U8(x)).collect();
            container.append_vector(&v)
        }
        FieldValue::Str(vals) => {
            let blob = encode_blob(&vals.iter().map(|s| s.as_bytes()).collect::<Vec<_>>());
            container.append_bytes(&blob);
            container.append_stride(blob.len() as u32);
            Ok(())
        }
    }
}

fn new_container_for(global_id: u32, value: &FieldValue) -> Container {
    let tag = match value {
        FieldValue::Flag => PrimitiveTag::Boolean,
        FieldValue::Int(_) => PrimitiveTag::I32,
        FieldValue::Float(_) => PrimitiveTag::F32,
        FieldValue::Char(_) => PrimitiveTag::U8,
        FieldValue::Str(_) => PrimitiveTag::Struct,
    };
    Container::new(global_id, tag)
}

/// Accumulates variant records into base/INFO/FORMAT containers and the
/// set-membership dictionaries, then runs permutation + genotype encoding
/// + compression/encryption over the whole batch at `finalize` time (spec
/// C9: "after the batch, invokes permutation, genotype encoding,
/// container-level compression and optional encryption").
pub struct BlockBuilder {
    contig: i32,
    sample_count: usize,
    permute_genotypes: bool,
    variants: Vec<VariantRecord>,
    info_dict: StreamDict,
    format_dict: StreamDict,
    filter_dict: StreamDict,
}

impl BlockBuilder {
    pub fn new(contig: i32, sample_count: usize, permute_genotypes: bool) -> Self {
        BlockBuilder {
            contig,
            sample_count,
            permute_genotypes,
            variants: Vec::new(),
            info_dict: StreamDict::new(),
            format_dict: StreamDict::new(),
            filter_dict: StreamDict::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Appends one variant record, interning its INFO/FORMAT/FILTER
    /// pattern ids against this block's dictionaries (spec §4.2).
    pub fn append_variant(&mut self, mut rec: VariantRecord) -> Result<()> {
        if rec.contig_id != self.contig {
            return Err(err(
                ErrorKind::InputMalformed,
                format!(
                    "variant contig {} does not match block contig {}",
                    rec.contig_id, self.contig
                ),
            )
            .with_locus(Locus {
                contig: Some(rec.contig_id),
                position: Some(rec.position),
                ..Default::default()
            }));
        }
        if let Some(gts) = &rec.genotypes {
            if gts.len() != self.sample_count {
                return Err(err(
                    ErrorKind::InputMalformed,
                    format!(
                        "variant carries {} genotypes, block has {} samples",
                        gts.len(),
                        self.sample_count
                    ),
                )
                .with_locus(Locus {
                    contig: Some(rec.contig_id),
                    position: Some(rec.position),
                    ..Default::default()
                }));
            }
        }
        rec.info_pattern_id = Some(self.info_dict.add_pattern(&rec.info_global_ids()));
        rec.format_pattern_id = Some(self.format_dict.add_pattern(&rec.format_global_ids()));
        rec.filter_pattern_id = Some(self.filter_dict.add_pattern(&rec.filters));
        self.variants.push(rec);
        Ok(())
    }

    /// Computes a per-sample sort key for the permutation engine (spec C3):
    /// the concatenation of this sample's diploid allele codes across
    /// every variant buffered so far, used as a positional prefix sort key
    /// so samples with identical haplotype histories end up adjacent.
    fn permutation_keys(&self) -> Vec<Vec<u8>> {
        let mut keys = vec![Vec::new(); self.sample_count];
        for rec in &self.variants {
            let Some(gts) = &rec.genotypes else { continue };
            for (sample_idx, gt) in gts.iter().enumerate() {
                for allele in &gt.alleles {
                    let code: u8 = match allele {
                        genotype::AlleleCall::Missing => 0,
                        genotype::AlleleCall::Eov => 1,
                        genotype::AlleleCall::Allele(a) => (*a as u8).saturating_add(2),
                    };
                    keys[sample_idx].push(code);
                }
            }
        }
        keys
    }

    pub fn finalize(
        self,
        block_id: u64,
        codec: &dyn ByteCodec,
        level: u32,
        keychain: Option<&Keychain>,
    ) -> Result<BuiltBlock> {
        if self.variants.is_empty() {
            return Err(err(ErrorKind::InputMalformed, "cannot finalize an empty block"));
        }

        let has_gt = self.variants.iter().any(|v| v.genotypes.is_some());
        if has_gt && !self.variants.iter().all(|v| v.genotypes.is_some()) {
            return Err(err(
                ErrorKind::InputMalformed,
                "block mixes variants with and without genotypes",
            ));
        }

        let min_position = self.variants.iter().map(|v| v.position).min().unwrap();
        let max_position = self.variants.iter().map(|v| v.position).max().unwrap();
        let n_variants = self.variants.len() as u32;

        let permutation = if has_gt {
            if self.permute_genotypes && self.sample_count > 1 {
                let keys = self.permutation_keys();
                Some(crate::permutation::sort_by_key(&keys))
            } else {
                Some(Permutation::identity(self.sample_count))
            }
        } else {
            None
        };
        let has_gt_permuted = has_gt && self.permute_genotypes && self.sample_count > 1;

        let mut base = BaseBuilders::new();
        let mut info_containers: Vec<Option<Container>> = Vec::new();
        let mut format_containers: Vec<Option<Container>> = Vec::new();

        for rec in &self.variants {
            base.contig.append(Value::I32(rec.contig_id))?;
            base.position.append(Value::I64(rec.position))?;

            let quality = rec.quality.unwrap_or(crate::primitive::f32_missing());
            base.quality.append(Value::F32(quality))?;

            let mut controller_byte = 0u8;
            if rec.quality.is_some() {
                controller_byte |= 1;
            }
            if !rec.name.is_empty() {
                controller_byte |= 2;
            }
            if let Some(gts) = &rec.genotypes {
                if gts.iter().any(|g| g.phased) {
                    controller_byte |= 4;
                }
            }
            base.controller.append(Value::U8(controller_byte))?;

            encode_ref_alt(&mut base.refalt, &rec.alleles)?;
            let allele_blob = encode_blob(&rec.alleles);
            base.allele_strings.append_bytes(&allele_blob);
            base.allele_strings.append_stride(allele_blob.len() as u32);

            base.name.append_bytes(rec.name.as_bytes());
            base.name.append_stride(rec.name.len() as u32);

            base.info_pattern_id.append(Value::U32(rec.info_pattern_id.unwrap()))?;
            base.format_pattern_id.append(Value::U32(rec.format_pattern_id.unwrap()))?;
            base.filter_pattern_id.append(Value::U32(rec.filter_pattern_id.unwrap()))?;

            for entry in &rec.info {
                push_occurrence(&mut info_containers, &self.info_dict, entry.global_id, &entry.value)?;
            }
            for entry in &rec.format {
                for v in &entry.values {
                    push_occurrence(&mut format_containers, &self.format_dict, entry.global_id, v)?;
                }
            }

            let ploidy = rec
                .genotypes
                .as_ref()
                .map(|g| g.iter().map(SampleGenotype::ploidy).max().unwrap_or(0))
                .unwrap_or(0);
            base.ploidy.append(Value::U8(ploidy.min(u8::MAX as usize) as u8))?;

            if has_gt {
                let gts = rec.genotypes.as_ref().unwrap();
                let permuted: Vec<SampleGenotype> = match &permutation {
                    Some(p) => p.apply(gts),
                    None => gts.clone(),
                };
                let (form, params, words) = genotype::encode_variant(&permuted)?;
                encode_gt_words(&mut base, form, params, &words)?;
            } else {
                base.gt_rle.append_bytes(&[]);
                base.gt_rle.append_stride(0);
                base.gt_simple.append_bytes(&[]);
                base.gt_simple.append_stride(0);
                base.gt_support.append_bytes(&[]);
                base.gt_support.append_stride(0);
            }
        }

        if let Some(p) = &permutation {
            let bytes: Vec<u8> = p.forward().iter().flat_map(|v| v.to_le_bytes()).collect();
            base.gt_ppa.append_bytes(&bytes);
            base.gt_ppa.append_stride(p.len() as u32);
        }

        base.contig.mark_uniform_if_constant();
        base.quality.mark_uniform_if_constant();
        base.controller.mark_uniform_if_constant();
        base.ploidy.mark_uniform_if_constant();
        base.position.narrow_signed_if_possible()?;

        let mut all_base = base.into_array();
        let mut all_info: Vec<Container> = info_containers.into_iter().map(|c| c.unwrap()).collect();
        let mut all_format: Vec<Container> = format_containers.into_iter().map(|c| c.unwrap()).collect();

        let mut info_dict = self.info_dict;
        info_dict.rebuild_bitvectors();
        let mut format_dict = self.format_dict;
        format_dict.rebuild_bitvectors();
        let mut filter_dict = self.filter_dict;
        filter_dict.rebuild_bitvectors();

        let any_encrypted = keychain.is_some();
        let block_hash = digest64(
            &[
                self.contig.to_le_bytes().as_slice(),
                min_position.to_le_bytes().as_slice(),
                max_position.to_le_bytes().as_slice(),
                block_id.to_le_bytes().as_slice(),
            ]
            .concat(),
        );

        for (idx, c) in all_base.iter_mut().enumerate() {
            finalize_container(c, idx as u32, block_id, codec, level, keychain)?;
        }
        for (idx, c) in all_info.iter_mut().enumerate() {
            finalize_container(c, 1_000_000 + idx as u32, block_id, codec, level, keychain)?;
        }
        for (idx, c) in all_format.iter_mut().enumerate() {
            finalize_container(c, 2_000_000 + idx as u32, block_id, codec, level, keychain)?;
        }

        let mut offset: u64 = 0;
        let mut base_headers: Vec<ContainerHeader> = Vec::with_capacity(BaseRole::COUNT);
        for c in &mut all_base {
            let h = place_container(c, &mut offset);
            base_headers.push(h);
        }
        let mut info_headers = Vec::with_capacity(all_info.len());
        for c in &mut all_info {
            info_headers.push(place_container(c, &mut offset));
        }
        let mut format_headers = Vec::with_capacity(all_format.len());
        for c in &mut all_format {
            format_headers.push(place_container(c, &mut offset));
        }

        let footer = Footer {
            base_headers: base_headers
                .try_into()
                .map_err(|_| err(ErrorKind::Truncated, "wrong base header count"))?,
            info_dict,
            info_headers,
            format_dict,
            format_headers,
            filter_dict,
        };

        let header = BlockHeader {
            footer_offset_rel: 0, // filled in during write()
            block_hash,
            controller: ControllerFlags {
                has_gt,
                has_gt_permuted,
                any_encrypted,
            },
            contig: self.contig,
            min_position,
            max_position,
            n_variants,
        };

        Ok(BuiltBlock {
            header,
            base_containers: all_base,
            info_containers: all_info,
            format_containers: all_format,
            footer,
            block_id,
        })
    }
}

fn encode_ref_alt(container: &mut Container, alleles: &[String]) -> Result<()> {
    let byte = if alleles.len() == 2 {
        let r = canonical_base_code(&alleles[0]);
        let a = canonical_base_code(&alleles[1]);
        if r == 0xF || a == 0xF {
            0xFF
        } else {
            (r << 4) | a
        }
    } else {
        0xFF
    };
    container.append(Value::U8(byte))
}

fn push_occurrence(
    containers: &mut Vec<Option<Container>>,
    dict: &StreamDict,
    global_id: u32,
    value: &FieldValue,
) -> Result<()> {
    let local = dict
        .local_id_of(global_id)
        .ok_or_else(|| err(ErrorKind::InputMalformed, "field referenced without an interned stream"))?
        as usize;
    if containers.len() <= local {
        containers.resize_with(local + 1, || None);
    }
    if containers[local].is_none() {
        containers[local] = Some(new_container_for(global_id, value));
    }
    let container = containers[local].as_mut().unwrap();
    if container.header().tag != Some(match value {
        FieldValue::Flag => PrimitiveTag::Boolean,
        FieldValue::Int(_) => PrimitiveTag::I32,
        FieldValue::Float(_) => PrimitiveTag::F32,
        FieldValue::Char(_) => PrimitiveTag::U8,
        FieldValue::Str(_) => PrimitiveTag::Struct,
    }) {
        return Err(err(
            ErrorKind::TypeViolation,
            "field value type disagrees with the stream's established type",
        ));
    }
    append_field_value(container, value)
}

struct BaseBuilders {
    contig: Container,
    controller: Container,
    position: Container,
    quality: Container,
    refalt: Container,
    allele_strings: Container,
    name: Container,
    info_pattern_id: Container,
    format_pattern_id: Container,
    filter_pattern_id: Container,
    gt_ppa: Container,
    gt_rle: Container,
    gt_simple: Container,
    gt_support: Container,
    ploidy: Container,
}

impl BaseBuilders {
    fn new() -> Self {
        BaseBuilders {
            contig: Container::new(BaseRole::Contig as u32, PrimitiveTag::I32),
            controller: Container::new(BaseRole::Controller as u32, PrimitiveTag::U8),
            position: Container::new(BaseRole::Position as u32, PrimitiveTag::I64),
            quality: Container::new(BaseRole::Quality as u32, PrimitiveTag::F32),
            refalt: Container::new(BaseRole::RefAlt as u32, PrimitiveTag::U8),
            allele_strings: Container::new(BaseRole::AlleleStrings as u32, PrimitiveTag::Struct),
            name: Container::new(BaseRole::Name as u32, PrimitiveTag::Struct),
            info_pattern_id: Container::new(BaseRole::InfoPatternId as u32, PrimitiveTag::U32),
            format_pattern_id: Container::new(BaseRole::FormatPatternId as u32, PrimitiveTag::U32),
            filter_pattern_id: Container::new(BaseRole::FilterPatternId as u32, PrimitiveTag::U32),
            gt_ppa: Container::new(BaseRole::GtPpa as u32, PrimitiveTag::Struct),
            gt_rle: Container::new(BaseRole::GtRle as u32, PrimitiveTag::Struct),
            gt_simple: Container::new(BaseRole::GtSimple as u32, PrimitiveTag::Struct),
            gt_support: Container::new(BaseRole::GtSupport as u32, PrimitiveTag::Struct),
            ploidy: Container::new(BaseRole::Ploidy as u32, PrimitiveTag::U8),
        }
    }

    fn into_array(self) -> Vec<Container> {
        vec![
            self.contig,
            self.controller,
            self.position,
            self.quality,
            self.refalt,
            self.allele_strings,
            self.name,
            self.info_pattern_id,
            self.format_pattern_id,
            self.filter_pattern_id,
            self.gt_ppa,
            self.gt_rle,
            self.gt_simple,
            self.gt_support,
            self.ploidy,
        ]
    }
}

/// Genotype-support record layout: form:u8, ploidy:u8, shift:u8, add:u8,
/// missing_flag:u8, mixed_ploidy_flag:u8, word_width:u8, n_words:u32.
const GT_SUPPORT_RECORD_LEN: usize = 11;

fn encode_gt_words(base: &mut BaseBuilders, form: GenotypeForm, params: GenotypeParams, words: &[u8]) -> Result<()> {
    let n_words = (words.len() / params.word_width.max(1) as usize) as u32;
    match form {
        GenotypeForm::Rle => {
            base.gt_rle.append_bytes(words);
            base.gt_rle.append_stride(words.len() as u32);
            base.gt_simple.append_bytes(&[]);
            base.gt_simple.append_stride(0);
        }
        GenotypeForm::Simple => {
            base.gt_simple.append_bytes(words);
            base.gt_simple.append_stride(words.len() as u32);
            base.gt_rle.append_bytes(&[]);
            base.gt_rle.append_stride(0);
        }
    }
    let mut rec = [0u8; GT_SUPPORT_RECORD_LEN];
    rec[0] = match form {
        GenotypeForm::Rle => 1,
        GenotypeForm::Simple => 2,
    };
    rec[1] = params.ploidy as u8;
    rec[2] = params.shift as u8;
    rec[3] = params.add as u8;
    rec[4] = params.missing_flag as u8;
    rec[5] = params.mixed_ploidy_flag as u8;
    rec[6] = params.word_width;
    rec[7..11].copy_from_slice(&n_words.to_le_bytes());
    base.gt_support.append_bytes(&rec);
    base.gt_support.append_stride(GT_SUPPORT_RECORD_LEN as u32);
    Ok(())
}

fn decode_gt_support(rec: &[u8]) -> Result<(GenotypeForm, GenotypeParams, u32)> {
    if rec.len() != GT_SUPPORT_RECORD_LEN {
        return Err(err(ErrorKind::Truncated, "malformed genotype support record"));
    }
    let form = match rec[0] {
        1 => GenotypeForm::Rle,
        2 => GenotypeForm::Simple,
        other => return Err(err(ErrorKind::Unsupported, format!("unknown genotype form tag {other}"))),
    };
    let params = GenotypeParams {
        shift: rec[2] as u32,
        add: rec[3] as u32,
        ploidy: rec[1] as u32,
        missing_flag: rec[4] != 0,
        mixed_ploidy_flag: rec[5] != 0,
        word_width: rec[6],
    };
    let n_words = u32::from_le_bytes(rec[7..11].try_into().unwrap());
    Ok((form, params, n_words))
}

/// `locus_id` must be unique across every container in a block (base roles
/// and info/format occurrences otherwise reuse the same small global-id
/// space, which would collide as a keychain key -- see the `1_000_000` /
/// `2_000_000` offsets `BlockBuilder::finalize` assigns before calling
/// this).
fn finalize_container(
    c: &mut Container,
    locus_id: u32,
    block_id: u64,
    codec: &dyn ByteCodec,
    level: u32,
    keychain: Option<&Keychain>,
) -> Result<()> {
    let encryption = if let Some(kc) = keychain {
        let key = derive_key(block_id, locus_id);
        let nonce = derive_nonce(block_id, locus_id);
        kc.insert(
            ContainerLocus {
                block_id,
                local_id: locus_id,
            },
            KeyEntry { key, nonce },
        );
        Some((key, nonce))
    } else {
        None
    };
    let enc_ref = encryption.as_ref().map(|(k, n)| (k, *n));
    c.finalize(codec, level, enc_ref)?;
    Ok(())
}

fn derive_key(block_id: u64, locus_id: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    let mixed = digest64(&[block_id.to_le_bytes().as_slice(), locus_id.to_le_bytes().as_slice(), b"key"].concat());
    for (i, chunk) in key.chunks_mut(8).enumerate() {
        let v = mixed.wrapping_add(i as u64 * 0x9E3779B97F4A7C15);
        chunk.copy_from_slice(&v.to_le_bytes()[..chunk.len()]);
    }
    key
}

fn derive_nonce(block_id: u64, locus_id: u32) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let mixed = digest64(
        &[
            block_id.to_le_bytes().as_slice(),
            locus_id.to_le_bytes().as_slice(),
            b"nonce",
        ]
        .concat(),
    );
    nonce[..8].copy_from_slice(&mixed.to_le_bytes());
    nonce
}

fn place_container(c: &mut Container, offset: &mut u64) -> ContainerHeader {
    let mut h = c.header().clone();
    h.data_offset = *offset;
    *offset += h.compressed_len as u64;
    if h.flags.mixed_stride {
        h.stride_offset = *offset;
        *offset += h.stride_compressed_len as u64;
    } else {
        h.stride_offset = 0;
    }
    h
}

/// A fully finalized, in-memory block ready to be written to a sink.
pub struct BuiltBlock {
    pub header: BlockHeader,
    pub base_containers: Vec<Container>,
    pub info_containers: Vec<Container>,
    pub format_containers: Vec<Container>,
    pub footer: Footer,
    pub block_id: u64,
}

impl BuiltBlock {
    /// Writes this block to `w`, returning the [`IndexEntry`] the writer
    /// (C11) should append to the variant index (C7).
    pub fn write(&mut self, w: &mut impl Writer, codec: &dyn ByteCodec, level: u32) -> Result<IndexEntry> {
        let byte_offset_begin = w.pos()? as u64;

        self.header.footer_offset_rel = BLOCK_HEADER_LEN as u32
            + self
                .base_containers
                .iter()
                .chain(self.info_containers.iter())
                .chain(self.format_containers.iter())
                .map(container_on_disk_len)
                .sum::<u64>() as u32;
        self.header.write(w).map_err(to_io_err)?;

        for c in self
            .base_containers
            .iter()
            .chain(self.info_containers.iter())
            .chain(self.format_containers.iter())
        {
            write_container_bytes(w, c)?;
        }

        let (footer_bytes, footer_uncompressed_len, _) = self.footer.to_bytes(codec, level)?;
        w.write_u32(footer_uncompressed_len)?;
        w.write_u32(footer_bytes.len() as u32)?;
        w.write_all(&footer_bytes).map_err(to_io_err)?;

        let byte_offset_end = w.pos()? as u64;

        let min_bin = *crate::index::bins_overlapping(self.header.min_position, self.header.max_position + 1)
            .iter()
            .min()
            .unwrap();
        let max_bin = *crate::index::bins_overlapping(self.header.min_position, self.header.max_position + 1)
            .iter()
            .max()
            .unwrap();

        Ok(IndexEntry {
            block_id: self.block_id,
            contig: self.header.contig,
            min_position: self.header.min_position,
            max_position: self.header.max_position,
            n_variants: self.header.n_variants,
            byte_offset_begin,
            byte_offset_end,
            min_bin,
            max_bin,
        })
    }
}

fn to_io_err(e: std::io::Error) -> crate::error::TachyonError {
    e.into()
}

fn container_on_disk_len(c: &Container) -> u64 {
    let mut len = c.finalized_data().map(|d| d.len()).unwrap_or(0) as u64;
    if let Some(s) = c.finalized_strides() {
        len += s.len() as u64;
    }
    len
}

fn write_container_bytes(w: &mut impl Writer, c: &Container) -> Result<()> {
    if let Some(data) = c.finalized_data() {
        w.write_all(data).map_err(to_io_err)?;
    }
    if let Some(strides) = c.finalized_strides() {
        w.write_all(strides).map_err(to_io_err)?;
    }
    Ok(())
}

/// What to materialise when reading a block back (spec §4.11 "Selection").
#[derive(Debug, Clone, Default)]
pub enum FieldSelection {
    #[default]
    All,
    Only {
        info_global_ids: Vec<u32>,
        format_global_ids: Vec<u32>,
    },
}

/// A block read back from an archive: header, footer, and the set of
/// containers actually materialised per `FieldSelection`.
pub struct Block {
    pub header: BlockHeader,
    pub footer: Footer,
    pub base: HashMap<usize, Container>,
    pub info: HashMap<u32, Container>,
    pub format: HashMap<u32, Container>,
}

impl Block {
    /// Reads just the fixed header and the (always-compressed) footer,
    /// without touching any container bytes (spec §4.11 "read block header
    /// and footer").
    pub fn read_header_footer(r: &mut impl Reader, codec: &dyn ByteCodec) -> Result<(BlockHeader, Footer, u64)> {
        let body_start = r.pos()? as u64;
        let header = BlockHeader::read(r)?;
        r.seek(std::io::SeekFrom::Start(body_start + header.footer_offset_rel as u64))
            .map_err(to_io_err)?;
        let uncompressed_len = r.read_u32()?;
        let compressed_len = r.read_u32()?;
        let mut compressed = vec![0u8; compressed_len as usize];
        r.read_exact(&mut compressed).map_err(to_io_err)?;
        let footer = Footer::from_bytes(&compressed, uncompressed_len as usize, codec)?;
        Ok((header, footer, body_start))
    }

    /// Loads and decodes the containers `selection` calls for, given the
    /// already-parsed header/footer and absolute block body start offset.
    #[allow(clippy::too_many_arguments)]
    pub fn read_body(
        r: &mut impl Reader,
        header: BlockHeader,
        footer: Footer,
        body_start: u64,
        selection: &FieldSelection,
        codec: &dyn ByteCodec,
        keychain: Option<&Keychain>,
        block_id: u64,
    ) -> Result<Self> {
        let wants_base = |role: BaseRole| -> bool {
            match selection {
                FieldSelection::All => true,
                FieldSelection::Only { .. } => match role {
                    BaseRole::Contig
                    | BaseRole::Position
                    | BaseRole::Controller
                    | BaseRole::Quality
                    | BaseRole::RefAlt
                    | BaseRole::AlleleStrings
                    | BaseRole::Name
                    | BaseRole::InfoPatternId
                    | BaseRole::FormatPatternId
                    | BaseRole::FilterPatternId
                    | BaseRole::Ploidy => true,
                    BaseRole::GtPpa | BaseRole::GtRle | BaseRole::GtSimple | BaseRole::GtSupport => {
                        header.controller.has_gt
                    }
                },
            }
        };

        let mut base = HashMap::new();
        for (idx, role) in BaseRole::ALL.iter().enumerate() {
            if !wants_base(*role) {
                continue;
            }
            let h = footer.base_headers[idx].clone();
            let c = load_container(r, body_start, h, idx as u32, codec, keychain, block_id)?;
            base.insert(idx, c);
        }

        let mut info = HashMap::new();
        let mut format = HashMap::new();
        match selection {
            FieldSelection::All => {
                for (local, h) in footer.info_headers.iter().enumerate() {
                    let global_id = footer.info_dict.local_to_global()[local];
                    let locus_id = 1_000_000 + local as u32;
                    info.insert(global_id, load_container(r, body_start, h.clone(), locus_id, codec, keychain, block_id)?);
                }
                for (local, h) in footer.format_headers.iter().enumerate() {
                    let global_id = footer.format_dict.local_to_global()[local];
                    let locus_id = 2_000_000 + local as u32;
                    format.insert(global_id, load_container(r, body_start, h.clone(), locus_id, codec, keychain, block_id)?);
                }
            }
            FieldSelection::Only {
                info_global_ids,
                format_global_ids,
            } => {
                for &gid in info_global_ids {
                    if let Some(local) = footer.info_dict.local_id_of(gid) {
                        let h = footer.info_headers[local as usize].clone();
                        let locus_id = 1_000_000 + local;
                        info.insert(gid, load_container(r, body_start, h, locus_id, codec, keychain, block_id)?);
                    }
                }
                for &gid in format_global_ids {
                    if let Some(local) = footer.format_dict.local_id_of(gid) {
                        let h = footer.format_headers[local as usize].clone();
                        let locus_id = 2_000_000 + local;
                        format.insert(gid, load_container(r, body_start, h, locus_id, codec, keychain, block_id)?);
                    }
                }
            }
        }

        Ok(Block {
            header,
            footer,
            base,
            info,
            format,
        })
    }

    /// Materialises every variant record in the block, in on-disk order.
    /// Requires `FieldSelection::All` to have been used when the block was
    /// read (selective reads are for callers that only need a few
    /// columns and will walk containers themselves).
    pub fn materialize_variants(&self) -> Result<Vec<VariantRecord>> {
        let n = self.header.n_variants as usize;
        let contig = self.header.contig;

        let positions = self.base.get(&(BaseRole::Position as usize));
        let qualities = self.base.get(&(BaseRole::Quality as usize));
        let controllers = self.base.get(&(BaseRole::Controller as usize));
        let allele_strings = self.base.get(&(BaseRole::AlleleStrings as usize));
        let names = self.base.get(&(BaseRole::Name as usize));
        let info_pattern_ids = self.base.get(&(BaseRole::InfoPatternId as usize));
        let format_pattern_ids = self.base.get(&(BaseRole::FormatPatternId as usize));
        let filter_pattern_ids = self.base.get(&(BaseRole::FilterPatternId as usize));

        let position_vals = positions.map(|c| c.values()).transpose()?;
        let quality_vals = qualities.map(|c| c.values()).transpose()?;
        let controller_vals = controllers.map(|c| c.values()).transpose()?;
        let info_pid_vals = info_pattern_ids.map(|c| c.values()).transpose()?;
        let format_pid_vals = format_pattern_ids.map(|c| c.values()).transpose()?;
        let filter_pid_vals = filter_pattern_ids.map(|c| c.values()).transpose()?;

        let allele_blobs = allele_strings.map(slice_struct_occurrences).transpose()?;
        let name_blobs = names.map(slice_struct_occurrences).transpose()?;

        let has_gt = self.header.controller.has_gt;
        let ppa = if has_gt {
            self.base.get(&(BaseRole::GtPpa as usize)).map(decode_ppa).transpose()?
        } else {
            None
        };
        let support = if has_gt {
            Some(slice_struct_occurrences(
                self.base.get(&(BaseRole::GtSupport as usize)).ok_or_else(|| {
                    err(ErrorKind::Truncated, "has_gt set but genotype-support container missing")
                })?,
            )?)
        } else {
            None
        };
        let rle_blobs = if has_gt {
            Some(slice_struct_occurrences(self.base.get(&(BaseRole::GtRle as usize)).ok_or_else(
                || err(ErrorKind::Truncated, "has_gt set but genotype-rle container missing"),
            )?)?)
        } else {
            None
        };
        let simple_blobs = if has_gt {
            Some(slice_struct_occurrences(
                self.base
                    .get(&(BaseRole::GtSimple as usize))
                    .ok_or_else(|| err(ErrorKind::Truncated, "has_gt set but genotype-simple container missing"))?,
            )?)
        } else {
            None
        };

        let sample_count = ppa.as_ref().map(Permutation::len).unwrap_or(0);

        let mut info_cursor: HashMap<u32, usize> = HashMap::new();
        let mut format_cursor: HashMap<u32, usize> = HashMap::new();

        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let position = match &position_vals {
                Some(vals) if vals.len() == n => vals[i].as_i64().unwrap_or(0),
                Some(vals) => vals[0].as_i64().unwrap_or(0),
                None => 0,
            };
            let quality_raw = match &quality_vals {
                Some(vals) => match vals.get(i).or_else(|| vals.first()) {
                    Some(Value::F32(q)) => Some(*q),
                    _ => None,
                },
                None => None,
            };
            let controller_byte = match &controller_vals {
                Some(vals) => match vals.get(i).or_else(|| vals.first()) {
                    Some(Value::U8(c)) => *c,
                    _ => 0,
                },
                None => 0,
            };
            let quality = if controller_byte & 1 != 0 { quality_raw } else { None };

            let alleles = match &allele_blobs {
                Some(blobs) => decode_blob(&blobs[i])?
                    .into_iter()
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .collect(),
                None => Vec::new(),
            };
            let name = match &name_blobs {
                Some(blobs) => String::from_utf8_lossy(&blobs[i]).into_owned(),
                None => String::new(),
            };

            let info_pattern_id = info_pid_vals.as_ref().and_then(|v| v.get(i)).and_then(|v| match v {
                Value::U32(x) => Some(*x),
                _ => None,
            });
            let format_pattern_id = format_pid_vals.as_ref().and_then(|v| v.get(i)).and_then(|v| match v {
                Value::U32(x) => Some(*x),
                _ => None,
            });
            let filter_pattern_id = filter_pid_vals.as_ref().and_then(|v| v.get(i)).and_then(|v| match v {
                Value::U32(x) => Some(*x),
                _ => None,
            });

            let info = match info_pattern_id {
                Some(pid) => self.pull_info_occurrences(pid, &mut info_cursor)?,
                None => Vec::new(),
            };
            let format = match format_pattern_id {
                Some(pid) => self.pull_format_occurrences(pid, sample_count, &mut format_cursor)?,
                None => Vec::new(),
            };
            let filters = match filter_pattern_id {
                Some(pid) => self.footer.filter_dict.locals_for_pattern(pid)?,
                None => Vec::new(),
            };
            let filters: Vec<u32> = filters
                .iter()
                .map(|&local| self.footer.filter_dict.local_to_global()[local as usize])
                .collect();

            let genotypes = if has_gt {
                let (form, params, n_words) = decode_gt_support(&support.as_ref().unwrap()[i])?;
                let blob = match form {
                    GenotypeForm::Rle => &rle_blobs.as_ref().unwrap()[i],
                    GenotypeForm::Simple => &simple_blobs.as_ref().unwrap()[i],
                };
                let expected_len = n_words as usize * params.word_width as usize;
                if blob.len() != expected_len {
                    return Err(err(ErrorKind::Truncated, "genotype word blob length disagrees with its support record"));
                }
                let decoded = genotype::decode_variant(form, params, blob, sample_count)?;
                let restored = match &ppa {
                    Some(p) => p.invert(&decoded),
                    None => decoded,
                };
                Some(restored)
            } else {
                None
            };

            out.push(VariantRecord {
                contig_id: contig,
                position,
                quality,
                name,
                alleles,
                info,
                format,
                filters,
                genotypes,
                info_pattern_id,
                format_pattern_id,
                filter_pattern_id,
            });
        }
        Ok(out)
    }

    fn pull_info_occurrences(&self, pattern_id: u32, cursor: &mut HashMap<u32, usize>) -> Result<Vec<InfoEntry>> {
        let locals = self.footer.info_dict.locals_for_pattern(pattern_id)?;
        let mut out = Vec::with_capacity(locals.len());
        for local in locals {
            let global_id = self.footer.info_dict.local_to_global()[local as usize];
            let Some(container) = self.info.get(&global_id) else { continue };
            let idx = cursor.entry(global_id).or_insert(0);
            let value = read_field_value(container, *idx)?;
            *idx += 1;
            out.push(InfoEntry { global_id, value });
        }
        Ok(out)
    }

    fn pull_format_occurrences(
        &self,
        pattern_id: u32,
        sample_count: usize,
        cursor: &mut HashMap<u32, usize>,
    ) -> Result<Vec<crate::variant::FormatEntry>> {
        let locals = self.footer.format_dict.locals_for_pattern(pattern_id)?;
        let mut out = Vec::with_capacity(locals.len());
        for local in locals {
            let global_id = self.footer.format_dict.local_to_global()[local as usize];
            let Some(container) = self.format.get(&global_id) else { continue };
            let idx = cursor.entry(global_id).or_insert(0);
            let mut values = Vec::with_capacity(sample_count);
            for s in 0..sample_count {
                values.push(read_field_value(container, *idx + s)?);
            }
            *idx += sample_count;
            out.push(crate::variant::FormatEntry { global_id, values });
        }
        Ok(out)
    }
}

fn read_field_value(container: &Container, occurrence: usize) -> Result<FieldValue> {
    let tag = container
        .header()
        .tag
        .ok_or_else(|| err(ErrorKind::TypeViolation, "container has no primitive tag"))?;
    match tag {
        PrimitiveTag::Struct => {
            let blob = nth_struct_occurrence(container, occurrence)?;
            let strings = decode_blob(&blob)?
                .into_iter()
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .collect();
            Ok(FieldValue::Str(strings))
        }
        PrimitiveTag::Boolean => Ok(FieldValue::Flag),
        PrimitiveTag::I32 => Ok(FieldValue::Int(
            nth_value_occurrence(container, occurrence)?
                .into_iter()
                .map(|v| match v {
                    Value::I32(x) => x,
                    _ => 0,
                })
                .collect(),
        )),
        PrimitiveTag::F32 => Ok(FieldValue::Float(
            nth_value_occurrence(container, occurrence)?
                .into_iter()
                .map(|v| match v {
                    Value::F32(x) => x,
                    _ => 0.0,
                })
                .collect(),
        )),
        PrimitiveTag::U8 => {
            let vals = container.values()?;
            let stride = container.strides().get(occurrence).copied().unwrap_or(0) as usize;
            let start: usize = container.strides()[..occurrence].iter().map(|&s| s as usize).sum();
            Ok(FieldValue::Char(
                vals[start..start + stride]
                    .iter()
                    .map(|v| match v {
                        Value::U8(b) => *b,
                        _ => 0,
                    })
                    .collect(),
            ))
        }
        other => Err(err(ErrorKind::Unsupported, format!("field container has unsupported tag {other:?}"))),
    }
}

fn nth_value_occurrence(container: &Container, occurrence: usize) -> Result<Vec<Value>> {
    let vals = container.values()?;
    let strides = container.strides();
    let stride = *strides
        .get(occurrence)
        .ok_or_else(|| err(ErrorKind::Truncated, "occurrence index out of range"))? as usize;
    let start: usize = strides[..occurrence].iter().map(|&s| s as usize).sum();
    Ok(vals[start..start + stride].to_vec())
}

fn nth_struct_occurrence(container: &Container, occurrence: usize) -> Result<Vec<u8>> {
    let strides = container.strides();
    if occurrence >= strides.len() {
        return Err(err(ErrorKind::Truncated, "struct occurrence index out of range"));
    }
    let start: usize = strides[..occurrence].iter().map(|&s| s as usize).sum();
    let len = strides[occurrence] as usize;
    Ok(container.data()[start..start + len].to_vec())
}

fn slice_struct_occurrences(container: &Container) -> Result<Vec<Vec<u8>>> {
    let strides = container.strides();
    let mut out = Vec::with_capacity(strides.len());
    let mut start = 0usize;
    for &len in strides {
        let len = len as usize;
        out.push(container.data()[start..start + len].to_vec());
        start += len;
    }
    Ok(out)
}

fn decode_ppa(container: &Container) -> Result<Permutation> {
    let bytes = container.data();
    if bytes.len() % 4 != 0 {
        return Err(err(ErrorKind::Truncated, "ppa container length is not a multiple of 4"));
    }
    let forward: Vec<u32> = bytes.chunks_exact(4).map(|c| u32::from_le_bytes(c.try_into().unwrap())).collect();
    Permutation::from_forward(forward)
}

#[allow(clippy::too_many_arguments)]
fn load_container(
    r: &mut impl Reader,
    body_start: u64,
    header: ContainerHeader,
    locus_id: u32,
    codec: &dyn ByteCodec,
    keychain: Option<&Keychain>,
    block_id: u64,
) -> Result<Container> {
    r.seek(std::io::SeekFrom::Start(body_start + header.data_offset))
        .map_err(to_io_err)?;
    let mut data_bytes = vec![0u8; header.compressed_len as usize];
    r.read_exact(&mut data_bytes).map_err(to_io_err)?;

    let stride_bytes = if header.flags.mixed_stride {
        r.seek(std::io::SeekFrom::Start(body_start + header.stride_offset))
            .map_err(to_io_err)?;
        let mut buf = vec![0u8; header.stride_compressed_len as usize];
        r.read_exact(&mut buf).map_err(to_io_err)?;
        Some(buf)
    } else {
        None
    };

    let (key, nonce) = if header.flags.encrypted {
        let kc = keychain.ok_or_else(|| err(ErrorKind::Integrity, "block is encrypted but no keychain was supplied"))?;
        let entry = kc
            .get(ContainerLocus {
                block_id,
                local_id: locus_id,
            })
            .ok_or_else(|| err(ErrorKind::Integrity, "keychain has no entry for this container"))?;
        (Some(entry.key), Some(entry.nonce))
    } else {
        (None, None)
    };

    Container::from_parts(header, data_bytes, stride_bytes, codec, key.as_ref(), nonce)
        .map_err(|e| e)
}

// Unused encryption-kind import guard (kept to document the envelope
// supports exactly one non-`None` kind today, per spec §12.4).
#[allow(dead_code)]
fn _assert_encryption_kind_exhaustive(k: EncryptionKind) -> bool {
    matches!(k, EncryptionKind::None | EncryptionKind::Aes256Gcm)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Deflate;
    use crate::genotype::AlleleCall;
    use crate::variant::FormatEntry;

    fn gt(a: i32, b: i32, phased: bool) -> SampleGenotype {
        let call = |v: i32| match v {
            -1 => AlleleCall::Missing,
            v => AlleleCall::Allele(v as u32),
        };
        SampleGenotype {
            alleles: vec![call(a), call(b)],
            phased,
        }
    }

    fn simple_variant(contig: i32, pos: i64, ref_a: &str, alt_a: &str, genotypes: Option<Vec<SampleGenotype>>) -> VariantRecord {
        VariantRecord {
            contig_id: contig,
            position: pos,
            quality: None,
            name: String::new(),
            alleles: vec![ref_a.to_string(), alt_a.to_string()],
            info: Vec::new(),
            format: Vec::new(),
            filters: Vec::new(),
            genotypes,
            info_pattern_id: None,
            format_pattern_id: None,
            filter_pattern_id: None,
        }
    }

    fn round_trip(built: &mut BuiltBlock) -> Block {
        let mut w = MemWriter::new();
        built.write(&mut w, &Deflate, 6).unwrap();
        let mut r = w.try_into_reader().unwrap();
        let (header, footer, body_start) = Block::read_header_footer(&mut r, &Deflate).unwrap();
        Block::read_body(&mut r, header, footer, body_start, &FieldSelection::All, &Deflate, None, 0).unwrap()
    }

    #[test]
    fn scenario_s1_single_biallelic_snv() {
        let mut b = BlockBuilder::new(0, 1, true);
        b.append_variant(simple_variant(0, 100, "A", "C", None)).unwrap();
        let mut built = b.finalize(0, &Deflate, 6, None).unwrap();
        assert_eq!(built.header.n_variants, 1);
        assert!(!built.header.controller.has_gt);

        let block = round_trip(&mut built);
        let variants = block.materialize_variants().unwrap();
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].position, 100);
        assert_eq!(variants[0].alleles, vec!["A".to_string(), "C".to_string()]);
    }

    #[test]
    fn scenario_s2_diploid_genotypes_round_trip() {
        let mut b = BlockBuilder::new(0, 4, true);
        b.append_variant(simple_variant(
            0,
            10,
            "A",
            "C",
            Some(vec![gt(0, 0, true), gt(0, 1, true), gt(1, 0, true), gt(1, 1, true)]),
        ))
        .unwrap();
        b.append_variant(simple_variant(
            0,
            20,
            "G",
            "T",
            Some(vec![gt(0, 1, true), gt(0, 1, true), gt(0, 1, true), gt(0, 0, true)]),
        ))
        .unwrap();
        let mut built = b.finalize(0, &Deflate, 6, None).unwrap();
        assert!(built.header.controller.has_gt);
        assert!(built.header.controller.has_gt_permuted);

        let block = round_trip(&mut built);
        let variants = block.materialize_variants().unwrap();
        assert_eq!(variants.len(), 2);
        assert_eq!(
            variants[0].genotypes.as_ref().unwrap(),
            &vec![gt(0, 0, true), gt(0, 1, true), gt(1, 0, true), gt(1, 1, true)]
        );
        assert_eq!(
            variants[1].genotypes.as_ref().unwrap(),
            &vec![gt(0, 1, true), gt(0, 1, true), gt(0, 1, true), gt(0, 0, true)]
        );
    }

    #[test]
    fn scenario_s3_mixed_ploidy_with_missing_round_trips() {
        let samples = vec![
            SampleGenotype { alleles: vec![AlleleCall::Allele(0), AlleleCall::Allele(1)], phased: false },
            SampleGenotype { alleles: vec![AlleleCall::Allele(1)], phased: false },
            SampleGenotype { alleles: vec![AlleleCall::Missing, AlleleCall::Missing], phased: false },
        ];
        let mut b = BlockBuilder::new(0, 3, false);
        b.append_variant(simple_variant(0, 5, "A", "C", Some(samples.clone()))).unwrap();
        let mut built = b.finalize(0, &Deflate, 6, None).unwrap();

        let block = round_trip(&mut built);
        let variants = block.materialize_variants().unwrap();
        let decoded = variants[0].genotypes.as_ref().unwrap();
        assert_eq!(decoded[0].alleles, samples[0].alleles);
        assert_eq!(decoded[1].alleles[0], samples[1].alleles[0]);
        assert_eq!(decoded[2].alleles, samples[2].alleles);
    }

    #[test]
    fn scenario_s4_info_pattern_interning() {
        let mut b = BlockBuilder::new(0, 1, true);
        for pos in [1, 2, 3] {
            let mut v = simple_variant(0, pos, "A", "C", None);
            v.info = vec![
                InfoEntry { global_id: 0, value: FieldValue::Int(vec![10]) },
                InfoEntry { global_id: 1, value: FieldValue::Float(vec![0.5]) },
            ];
            b.append_variant(v).unwrap();
        }
        let mut v = simple_variant(0, 4, "A", "C", None);
        v.info = vec![InfoEntry { global_id: 0, value: FieldValue::Int(vec![20]) }];
        b.append_variant(v).unwrap();

        let mut built = b.finalize(0, &Deflate, 6, None).unwrap();
        assert_eq!(built.footer.info_dict.n_patterns(), 2);

        let block = round_trip(&mut built);
        let variants = block.materialize_variants().unwrap();
        assert_eq!(variants[0].info.len(), 2);
        assert_eq!(variants[3].info.len(), 1);
        assert_eq!(variants[3].info[0].value, FieldValue::Int(vec![20]));
    }

    #[test]
    fn encrypted_block_requires_keychain_to_read() {
        let mut b = BlockBuilder::new(0, 1, true);
        b.append_variant(simple_variant(0, 1, "A", "C", None)).unwrap();
        let keychain = Keychain::new();
        let mut built = b.finalize(0, &Deflate, 6, Some(&keychain)).unwrap();
        assert!(built.header.controller.any_encrypted);

        let mut w = MemWriter::new();
        built.write(&mut w, &Deflate, 6).unwrap();
        let bytes = w.into_bytes();

        let mut r = MemReader::from(bytes.clone());
        let (header, footer, body_start) = Block::read_header_footer(&mut r, &Deflate).unwrap();
        let missing_kc = Block::read_body(&mut r, header, footer, body_start, &FieldSelection::All, &Deflate, None, 0);
        assert!(missing_kc.is_err());

        let mut r2 = MemReader::from(bytes);
        let (header2, footer2, body_start2) = Block::read_header_footer(&mut r2, &Deflate).unwrap();
        let ok = Block::read_body(&mut r2, header2, footer2, body_start2, &FieldSelection::All, &Deflate, Some(&keychain), 0);
        assert!(ok.is_ok());
    }

    #[test]
    fn format_entries_round_trip_per_sample() {
        let mut b = BlockBuilder::new(0, 2, false);
        let mut v = simple_variant(0, 1, "A", "C", None);
        v.format = vec![FormatEntry {
            global_id: 5,
            values: vec![FieldValue::Int(vec![10]), FieldValue::Int(vec![20])],
        }];
        b.append_variant(v).unwrap();
        let mut built = b.finalize(0, &Deflate, 6, None).unwrap();
        let block = round_trip(&mut built);
        let variants = block.materialize_variants().unwrap();
        assert_eq!(variants[0].format.len(), 1);
        assert_eq!(
            variants[0].format[0].values,
            vec![FieldValue::Int(vec![10]), FieldValue::Int(vec![20])]
        );
    }
}
