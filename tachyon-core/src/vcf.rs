//! External VCF collaborator boundary (spec §6, §1 "delegated to an
//! external VCF library that exposes a record iterator and a header
//! model"). `HeaderSource`/`RecordSource` are the seam: the core engine
//! (`variant.rs`, `pipeline.rs`) depends only on these traits, never on any
//! particular parser crate, so swapping the VCF library is a matter of
//! writing a new adapter module, not touching the storage engine. The
//! `noodles`-backed adapter below (gated behind the `noodles-vcf` feature)
//! is the one shipped implementation (SPEC_FULL §12.4).

use crate::error::Result;
use crate::genotype::SampleGenotype;
use crate::variant::{ContigDef, FieldType, FieldValue, FormatEntry, InfoEntry, Schema, VariantRecord};

/// A `VcfHeader` (spec §6): contigs, field dictionaries, sample names, and
/// the free-form literal text block carried into the archive's provenance
/// section verbatim.
pub trait HeaderSource {
    fn contigs(&self) -> Vec<ContigDef>;
    fn info_fields(&self) -> Vec<(String, FieldType)>;
    fn format_fields(&self) -> Vec<(String, FieldType)>;
    fn filters(&self) -> Vec<String>;
    fn samples(&self) -> Vec<String>;
    fn literal_text(&self) -> String;

    fn to_schema(&self) -> Schema {
        Schema::new(
            self.contigs(),
            self.info_fields(),
            self.format_fields(),
            self.filters(),
            self.samples(),
            self.literal_text(),
        )
    }
}

/// A `VcfRecord` (spec §6): contig index, position, alleles, QUAL, and the
/// per-category field lists keyed by the *external* index the header
/// assigned them (the schema's reorder maps translate those into tachyon
/// global ids).
pub trait RecordSource {
    fn contig_index(&self) -> usize;
    /// 0-based position.
    fn position(&self) -> i64;
    fn id(&self) -> Option<String>;
    fn ref_allele(&self) -> String;
    fn alt_alleles(&self) -> Vec<String>;
    fn quality(&self) -> Option<f32>;
    fn filter_indices(&self) -> Vec<usize>;
    fn info_entries(&self) -> Vec<(usize, FieldValue)>;
    /// Per-format-field, per-sample values, indexed by the external format
    /// field index (GT is excluded here; see [`RecordSource::genotypes`]).
    fn format_entries(&self) -> Vec<(usize, Vec<FieldValue>)>;
    /// The "special GT codec" spec §6 calls out, decoded by the external
    /// library into tachyon's own `SampleGenotype` shape. `None` if the
    /// record carries no FORMAT/GT column at all.
    fn genotypes(&self) -> Option<Vec<SampleGenotype>>;
}

/// Converts one external record into tachyon's in-memory `VariantRecord`,
/// remapping every field id through `schema`'s reorder maps (spec §4.10).
pub fn convert_record(rec: &impl RecordSource, schema: &Schema) -> Result<VariantRecord> {
    let mut alleles = Vec::with_capacity(1 + rec.alt_alleles().len());
    alleles.push(rec.ref_allele());
    alleles.extend(rec.alt_alleles());

    let info = rec
        .info_entries()
        .into_iter()
        .filter_map(|(idx, value)| {
            schema
                .info_global_id(idx)
                .map(|global_id| InfoEntry { global_id, value })
        })
        .collect();

    let format = rec
        .format_entries()
        .into_iter()
        .filter_map(|(idx, values)| {
            schema
                .format_global_id(idx)
                .map(|global_id| FormatEntry { global_id, values })
        })
        .collect();

    let filters = rec
        .filter_indices()
        .into_iter()
        .filter_map(|idx| schema.filter_global_id(idx))
        .collect();

    Ok(VariantRecord {
        contig_id: rec.contig_index() as i32,
        position: rec.position(),
        quality: rec.quality(),
        name: rec.id().unwrap_or_default(),
        alleles,
        info,
        format,
        filters,
        genotypes: rec.genotypes(),
        info_pattern_id: None,
        format_pattern_id: None,
        filter_pattern_id: None,
    })
}

/// Parses a BCF/VCF-style GT string (`"0/1"`, `"1|0"`, `".",` `"0/1/2"`,
/// `"."` per-allele for missing) into a [`SampleGenotype`]. Kept independent
/// of any particular VCF library's genotype type so it can be unit tested
/// without the `noodles-vcf` feature and reused by any future adapter.
pub fn parse_gt_string(s: &str) -> SampleGenotype {
    use crate::genotype::AlleleCall;

    if s.is_empty() || s == "." {
        return SampleGenotype {
            alleles: vec![AlleleCall::Missing],
            phased: false,
        };
    }
    let mut phased = false;
    let mut alleles = Vec::new();
    let mut current = String::new();
    let finish = |current: &str| -> AlleleCall {
        if current.is_empty() || current == "." {
            AlleleCall::Missing
        } else {
            current
                .parse::<u32>()
                .map(AlleleCall::Allele)
                .unwrap_or(AlleleCall::Missing)
        }
    };
    for c in s.chars() {
        match c {
            '/' | '|' => {
                alleles.push(finish(&current));
                current.clear();
                phased |= c == '|';
            }
            _ => current.push(c),
        }
    }
    alleles.push(finish(&current));
    SampleGenotype { alleles, phased }
}

#[cfg(feature = "noodles-vcf")]
pub mod noodles_adapter {
    //! Thin `noodles`-backed implementation of [`HeaderSource`]/
    //! [`RecordSource`]. This module is the one place in the crate that
    //! names a `noodles` type; everything above this line, and everything
    //! in `pipeline.rs`/`block.rs`, is generic over the trait pair instead.

    use super::*;
    use noodles::vcf as nvcf;

    pub struct Header<'h>(pub &'h nvcf::Header);

    impl HeaderSource for Header<'_> {
        fn contigs(&self) -> Vec<ContigDef> {
            self.0
                .contigs()
                .iter()
                .enumerate()
                .map(|(external_index, (name, map))| ContigDef {
                    name: name.to_string(),
                    length: map.length().map(|l| l as i64).unwrap_or(0),
                    external_index,
                })
                .collect()
        }

        fn info_fields(&self) -> Vec<(String, FieldType)> {
            self.0
                .infos()
                .iter()
                .map(|(id, info)| (id.to_string(), map_field_type(info.number_type())))
                .collect()
        }

        fn format_fields(&self) -> Vec<(String, FieldType)> {
            self.0
                .formats()
                .iter()
                .filter(|(id, _)| id.as_str() != "GT")
                .map(|(id, fmt)| (id.to_string(), map_field_type(fmt.number_type())))
                .collect()
        }

        fn filters(&self) -> Vec<String> {
            self.0.filters().iter().map(|(id, _)| id.to_string()).collect()
        }

        fn samples(&self) -> Vec<String> {
            self.0.sample_names().iter().map(|s| s.to_string()).collect()
        }

        fn literal_text(&self) -> String {
            self.0.to_string()
        }
    }

    fn map_field_type(kind: impl std::fmt::Display) -> FieldType {
        match kind.to_string().to_ascii_lowercase().as_str() {
            "integer" | "int" => FieldType::Int,
            "float" => FieldType::Float,
            "character" | "char" => FieldType::Char,
            "flag" => FieldType::Flag,
            _ => FieldType::String,
        }
    }

    /// Pairs a borrowed header with a borrowed record: several `noodles`
    /// record accessors need the header's string maps to resolve ids, so
    /// the adapter carries both rather than just the record.
    pub struct Record<'h> {
        pub header: &'h nvcf::Header,
        pub record: nvcf::Record,
    }

    impl RecordSource for Record<'_> {
        fn contig_index(&self) -> usize {
            self.header
                .contigs()
                .get_index_of(self.record.reference_sequence_name(self.header).unwrap_or_default().as_bytes())
                .unwrap_or(0)
        }

        fn position(&self) -> i64 {
            self.record
                .variant_start()
                .and_then(|r| r.ok())
                .map(|p| p.get() as i64 - 1)
                .unwrap_or(0)
        }

        fn id(&self) -> Option<String> {
            let ids = self.record.ids();
            if ids.is_empty() {
                None
            } else {
                Some(ids.to_string())
            }
        }

        fn ref_allele(&self) -> String {
            self.record.reference_bases().to_string()
        }

        fn alt_alleles(&self) -> Vec<String> {
            self.record
                .alternate_bases()
                .iter()
                .filter_map(|a| a.ok())
                .map(|a| a.to_string())
                .collect()
        }

        fn quality(&self) -> Option<f32> {
            self.record.quality_score().and_then(|q| q.ok())
        }

        fn filter_indices(&self) -> Vec<usize> {
            let filters = self.header.filters();
            self.record
                .filters()
                .iter(self.header)
                .filter_map(|f| f.ok())
                .filter_map(|name| filters.get_index_of(name.as_bytes()))
                .collect()
        }

        fn info_entries(&self) -> Vec<(usize, FieldValue)> {
            let infos = self.header.infos();
            self.record
                .info()
                .iter(self.header)
                .filter_map(|entry| entry.ok())
                .filter_map(|(key, value)| {
                    let idx = infos.get_index_of(key.as_bytes())?;
                    Some((idx, map_value(value)))
                })
                .collect()
        }

        fn format_entries(&self) -> Vec<(usize, Vec<FieldValue>)> {
            let formats = self.header.formats();
            let samples = self.record.samples();
            let mut out = Vec::new();
            for (series_idx, series) in samples.series().enumerate() {
                let Ok(series) = series else { continue };
                if series.name() == "GT" {
                    continue;
                }
                let Some(idx) = formats.get_index_of(series.name().as_bytes()) else {
                    continue;
                };
                let _ = series_idx;
                let values = series
                    .iter(self.header)
                    .filter_map(|v| v.ok().flatten())
                    .map(map_value)
                    .collect();
                out.push((idx, values));
            }
            out
        }

        fn genotypes(&self) -> Option<Vec<SampleGenotype>> {
            let samples = self.record.samples();
            let gt_series = samples
                .select("GT")
                .and_then(|s| s.ok())?;
            Some(
                gt_series
                    .iter(self.header)
                    .map(|v| match v.ok().flatten() {
                        Some(value) => parse_gt_string(&value.to_string()),
                        None => parse_gt_string("."),
                    })
                    .collect(),
            )
        }
    }

    fn map_value(value: nvcf::variant::record::info::field::Value) -> FieldValue {
        use nvcf::variant::record::info::field::Value as V;
        match value {
            V::Integer(i) => FieldValue::Int(vec![i]),
            V::Float(f) => FieldValue::Float(vec![f]),
            V::Flag => FieldValue::Flag,
            V::Character(c) => FieldValue::Char(vec![c as u8]),
            V::String(s) => FieldValue::Str(vec![s.to_string()]),
            V::Array(arr) => map_array(arr),
        }
    }

    fn map_array(arr: nvcf::variant::record::info::field::value::Array) -> FieldValue {
        use nvcf::variant::record::info::field::value::Array as A;
        match arr {
            A::Integer(values) => {
                FieldValue::Int(values.iter().filter_map(|v| v.ok().flatten()).collect())
            }
            A::Float(values) => {
                FieldValue::Float(values.iter().filter_map(|v| v.ok().flatten()).collect())
            }
            A::Character(values) => FieldValue::Char(
                values
                    .iter()
                    .filter_map(|v| v.ok().flatten())
                    .map(|c| c as u8)
                    .collect(),
            ),
            A::String(values) => FieldValue::Str(
                values
                    .iter()
                    .filter_map(|v| v.ok().flatten())
                    .map(|s| s.to_string())
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::genotype::AlleleCall;

    #[test]
    fn parse_simple_diploid_gt() {
        let g = parse_gt_string("0/1");
        assert_eq!(g.alleles, vec![AlleleCall::Allele(0), AlleleCall::Allele(1)]);
        assert!(!g.phased);
    }

    #[test]
    fn parse_phased_gt() {
        let g = parse_gt_string("1|0");
        assert_eq!(g.alleles, vec![AlleleCall::Allele(1), AlleleCall::Allele(0)]);
        assert!(g.phased);
    }

    #[test]
    fn parse_missing_gt() {
        let g = parse_gt_string("./.");
        assert_eq!(g.alleles, vec![AlleleCall::Missing, AlleleCall::Missing]);
    }

    #[test]
    fn parse_haploid_gt() {
        let g = parse_gt_string("1");
        assert_eq!(g.alleles, vec![AlleleCall::Allele(1)]);
    }
}
