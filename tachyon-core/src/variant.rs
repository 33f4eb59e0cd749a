//! In-memory variant record and schema (spec §3 "Variant record (in-memory,
//! C9 intermediate)"): the shape a `VariantRecord` takes between being
//! pulled off the external VCF iterator (§6) and being folded into a block
//! by [`crate::block::BlockBuilder::append_variant`]. Lives only as long as
//! it takes to cross that boundary -- "constructed by C9 from an external
//! VCF record, consumed by C2, then discarded."

use crate::error::Result;
use crate::genotype::SampleGenotype;
use crate::ioutil::{LeReadExt, LeWriteExt, MemReader, MemWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    Float,
    Char,
    String,
    Flag,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Flag,
    Int(Vec<i32>),
    Float(Vec<f32>),
    Char(Vec<u8>),
    Str(Vec<String>),
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Flag => FieldType::Flag,
            FieldValue::Int(_) => FieldType::Int,
            FieldValue::Float(_) => FieldType::Float,
            FieldValue::Char(_) => FieldType::Char,
            FieldValue::Str(_) => FieldType::String,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ContigDef {
    pub name: String,
    pub length: i64,
    pub external_index: usize,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub id: String,
    pub global_id: u32,
    pub ty: FieldType,
    pub external_index: usize,
}

/// The external VCF header, translated once at open time into tachyon's
/// own global-id space. §4.10: "maps external global ids to tachyon global
/// ids via static reorder maps built at open time" -- `info_reorder` /
/// `format_reorder` / `filter_reorder` are exactly those maps, indexed by
/// the external field's own index.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub contigs: Vec<ContigDef>,
    pub info_fields: Vec<FieldDef>,
    pub format_fields: Vec<FieldDef>,
    pub filters: Vec<FieldDef>,
    pub samples: Vec<String>,
    pub literal_header: String,
    info_reorder: Vec<u32>,
    format_reorder: Vec<u32>,
    filter_reorder: Vec<u32>,
}

impl Schema {
    pub fn new(
        contigs: Vec<ContigDef>,
        info_fields: Vec<(String, FieldType)>,
        format_fields: Vec<(String, FieldType)>,
        filters: Vec<String>,
        samples: Vec<String>,
        literal_header: String,
    ) -> Self {
        let mut next_global_id = 0u32;
        let build = |fields: Vec<(String, FieldType)>, next: &mut u32| -> Vec<FieldDef> {
            fields
                .into_iter()
                .enumerate()
                .map(|(external_index, (id, ty))| {
                    let global_id = *next;
                    *next += 1;
                    FieldDef {
                        id,
                        global_id,
                        ty,
                        external_index,
                    }
                })
                .collect()
        };
        let info_fields = build(info_fields, &mut next_global_id);
        let format_fields = build(format_fields, &mut next_global_id);
        let filters: Vec<FieldDef> = filters
            .into_iter()
            .enumerate()
            .map(|(external_index, id)| {
                let global_id = next_global_id;
                next_global_id += 1;
                FieldDef {
                    id,
                    global_id,
                    ty: FieldType::Flag,
                    external_index,
                }
            })
            .collect();

        let info_reorder = info_fields.iter().map(|f| f.global_id).collect();
        let format_reorder = format_fields.iter().map(|f| f.global_id).collect();
        let filter_reorder = filters.iter().map(|f| f.global_id).collect();

        Schema {
            contigs,
            info_fields,
            format_fields,
            filters,
            samples,
            literal_header,
            info_reorder,
            format_reorder,
            filter_reorder,
        }
    }

    pub fn info_global_id(&self, external_index: usize) -> Option<u32> {
        self.info_reorder.get(external_index).copied()
    }

    pub fn format_global_id(&self, external_index: usize) -> Option<u32> {
        self.format_reorder.get(external_index).copied()
    }

    pub fn filter_global_id(&self, external_index: usize) -> Option<u32> {
        self.filter_reorder.get(external_index).copied()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Serialises the schema for the archive's provenance block (spec §6:
    /// "compressed(header literal and schema)"). Field definitions are
    /// written in external-index order and global ids are re-derived on
    /// read via [`Schema::new`], so a round trip always reproduces the same
    /// global-id assignment rather than trusting stored ids.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = MemWriter::new();
        w.write_u32(self.contigs.len() as u32).unwrap();
        for c in &self.contigs {
            w.write_str(&c.name).unwrap();
            w.write_i64(c.length).unwrap();
        }
        write_field_defs(&mut w, &self.info_fields);
        write_field_defs(&mut w, &self.format_fields);
        w.write_u32(self.filters.len() as u32).unwrap();
        for f in &self.filters {
            w.write_str(&f.id).unwrap();
        }
        w.write_u32(self.samples.len() as u32).unwrap();
        for s in &self.samples {
            w.write_str(s).unwrap();
        }
        w.write_str(&self.literal_header).unwrap();
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = MemReader::from(bytes.to_vec());
        let n_contigs = r.read_u32()? as usize;
        let mut contigs = Vec::with_capacity(n_contigs);
        for external_index in 0..n_contigs {
            contigs.push(ContigDef {
                name: r.read_string()?,
                length: r.read_i64()?,
                external_index,
            });
        }
        let info_fields = read_field_defs(&mut r)?;
        let format_fields = read_field_defs(&mut r)?;
        let n_filters = r.read_u32()? as usize;
        let mut filters = Vec::with_capacity(n_filters);
        for _ in 0..n_filters {
            filters.push(r.read_string()?);
        }
        let n_samples = r.read_u32()? as usize;
        let mut samples = Vec::with_capacity(n_samples);
        for _ in 0..n_samples {
            samples.push(r.read_string()?);
        }
        let literal_header = r.read_string()?;
        Ok(Schema::new(
            contigs,
            info_fields,
            format_fields,
            filters,
            samples,
            literal_header,
        ))
    }
}

fn write_field_type(w: &mut MemWriter, ty: FieldType) {
    let tag: u8 = match ty {
        FieldType::Int => 0,
        FieldType::Float => 1,
        FieldType::Char => 2,
        FieldType::String => 3,
        FieldType::Flag => 4,
    };
    w.write_u8(tag).unwrap();
}

fn read_field_type(r: &mut MemReader) -> crate::error::Result<FieldType> {
    Ok(match r.read_u8()? {
        0 => FieldType::Int,
        1 => FieldType::Float,
        2 => FieldType::Char,
        3 => FieldType::String,
        4 => FieldType::Flag,
        other => {
            return Err(crate::error::err(
                crate::error::ErrorKind::Unsupported,
                format!("unknown field type tag {other}"),
            ))
        }
    })
}

fn write_field_defs(w: &mut MemWriter, fields: &[FieldDef]) {
    w.write_u32(fields.len() as u32).unwrap();
    for f in fields {
        w.write_str(&f.id).unwrap();
        write_field_type(w, f.ty);
    }
}

fn read_field_defs(r: &mut MemReader) -> crate::error::Result<Vec<(String, FieldType)>> {
    let n = r.read_u32()? as usize;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let id = r.read_string()?;
        let ty = read_field_type(r)?;
        out.push((id, ty));
    }
    Ok(out)
}

#[derive(Debug, Clone)]
pub struct InfoEntry {
    pub global_id: u32,
    pub value: FieldValue,
}

#[derive(Debug, Clone)]
pub struct FormatEntry {
    pub global_id: u32,
    /// One value per sample, in schema sample order.
    pub values: Vec<FieldValue>,
}

/// One input variant, as parsed from the external VCF record (spec §3).
#[derive(Debug, Clone)]
pub struct VariantRecord {
    pub contig_id: i32,
    /// 0-based.
    pub position: i64,
    pub quality: Option<f32>,
    pub name: String,
    /// `alleles[0]` is REF, the rest are ALT, each length-prefixed on the
    /// wire; canonical single-base A/C/G/T alleles are additionally packed
    /// into 4-bit codes in the ref+alt base container (spec §3).
    pub alleles: Vec<String>,
    pub info: Vec<InfoEntry>,
    pub format: Vec<FormatEntry>,
    pub filters: Vec<u32>,
    pub genotypes: Option<Vec<SampleGenotype>>,
    pub info_pattern_id: Option<u32>,
    pub format_pattern_id: Option<u32>,
    pub filter_pattern_id: Option<u32>,
}

impl VariantRecord {
    pub fn n_info(&self) -> usize {
        self.info.len()
    }

    pub fn n_format(&self) -> usize {
        self.format.len()
    }

    pub fn info_global_ids(&self) -> Vec<u32> {
        self.info.iter().map(|e| e.global_id).collect()
    }

    pub fn format_global_ids(&self) -> Vec<u32> {
        self.format.iter().map(|e| e.global_id).collect()
    }
}

/// Packs a canonical single-base allele (A/C/G/T/N) into a 4-bit code;
/// non-canonical alleles (indels, symbolic `<DEL>`, breakends) get the
/// escape code `0xF` and are instead carried in full in the allele-strings
/// base container.
pub fn canonical_base_code(allele: &str) -> u8 {
    match allele {
        "A" => 0x0,
        "C" => 0x1,
        "G" => 0x2,
        "T" => 0x3,
        "N" => 0x4,
        "." => 0x5,
        _ => 0xF,
    }
}

pub fn canonical_base_for_code(code: u8) -> Option<&'static str> {
    Some(match code {
        0x0 => "A",
        0x1 => "C",
        0x2 => "G",
        0x3 => "T",
        0x4 => "N",
        0x5 => ".",
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn schema_assigns_disjoint_global_ids_across_categories() {
        let schema = Schema::new(
            vec![ContigDef { name: "chr1".into(), length: 1000, external_index: 0 }],
            vec![("DP".into(), FieldType::Int), ("AF".into(), FieldType::Float)],
            vec![("GT".into(), FieldType::String)],
            vec!["PASS".into()],
            vec!["s".into()],
            String::new(),
        );
        let mut ids: Vec<u32> = schema
            .info_fields
            .iter()
            .chain(schema.format_fields.iter())
            .chain(schema.filters.iter())
            .map(|f| f.global_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);
    }

    #[test]
    fn schema_round_trips_through_bytes() {
        let schema = Schema::new(
            vec![ContigDef { name: "chr1".into(), length: 1000, external_index: 0 }],
            vec![("DP".into(), FieldType::Int), ("AF".into(), FieldType::Float)],
            vec![("GT".into(), FieldType::String)],
            vec!["PASS".into(), "q10".into()],
            vec!["s1".into(), "s2".into()],
            "##fileformat=VCFv4.2".into(),
        );
        let restored = Schema::from_bytes(&schema.to_bytes()).unwrap();
        assert_eq!(restored.contigs.len(), 1);
        assert_eq!(restored.contigs[0].name, "chr1");
        assert_eq!(restored.info_fields.len(), 2);
        assert_eq!(restored.info_global_id(1), schema.info_global_id(1));
        assert_eq!(restored.samples, schema.samples);
        assert_eq!(restored.literal_header, schema.literal_header);
    }

    #[test]
    fn canonical_base_round_trips() {
        for base in ["A", "C", "G", "T", "N"] {
            let code = canonical_base_code(base);
            assert_eq!(canonical_base_for_code(code), Some(base));
        }
        assert_eq!(canonical_base_code("ACGT"), 0xF);
    }
}
