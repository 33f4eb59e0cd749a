//! End-to-end archive-level scenarios, exercised through the public
//! `tachyon_core` API rather than any one module's internals: build a
//! block or two, serialise a full archive, open it back up, and check
//! what comes out the other side.

use tachyon_core::{
    write_archive_header, write_eof_region, AlleleCall, Archive, BlockBuilder, ContigDef, Deflate,
    EncryptionKind, FieldSelection, FieldType, FieldValue, InfoEntry, Keychain, MemReader, MemWriter,
    SampleGenotype, Schema, VariantRecord, Writer,
};

fn schema(
    contigs: Vec<(&str, i64)>,
    info_fields: Vec<(&str, FieldType)>,
    samples: Vec<&str>,
) -> Schema {
    Schema::new(
        contigs
            .into_iter()
            .enumerate()
            .map(|(i, (name, length))| ContigDef { name: name.into(), length, external_index: i })
            .collect(),
        info_fields.into_iter().map(|(name, ty)| (name.into(), ty)).collect(),
        Vec::new(),
        Vec::new(),
        samples.into_iter().map(String::from).collect(),
        "##fileformat=VCFv4.2".into(),
    )
}

fn no_gt_variant(contig: i32, position: i64, alleles: &[&str]) -> VariantRecord {
    VariantRecord {
        contig_id: contig,
        position,
        quality: None,
        name: String::new(),
        alleles: alleles.iter().map(|s| s.to_string()).collect(),
        info: Vec::new(),
        format: Vec::new(),
        filters: Vec::new(),
        genotypes: None,
        info_pattern_id: None,
        format_pattern_id: None,
        filter_pattern_id: None,
    }
}

/// Writes a complete archive -- header, every already-finalized block in
/// `blocks`, and the EOF region -- returning the raw bytes.
fn write_archive(schema: &Schema, blocks: Vec<tachyon_core::BuiltBlock>) -> Vec<u8> {
    let mut out = MemWriter::new();
    write_archive_header(&mut out, schema, &Deflate, 6).unwrap();
    let writer = Writer::new(out, Box::new(Deflate), 6);
    for block in blocks {
        writer.enqueue(block.block_id, block).unwrap();
    }
    let (mut sink, index, checksums, end) = writer.finish().unwrap();
    write_eof_region(&mut sink, &index, &checksums, end).unwrap();
    sink.into_bytes()
}

fn gt(alleles: &[u32], phased: bool) -> SampleGenotype {
    SampleGenotype {
        alleles: alleles.iter().map(|&a| AlleleCall::Allele(a)).collect(),
        phased,
    }
}

// S1: single biallelic SNV, no INFO/FORMAT, one sample, no genotype carried.
#[test]
fn s1_single_biallelic_snv_round_trips_exactly() {
    let schema = schema(vec![("chr1", 1000)], Vec::new(), vec!["s"]);

    let mut builder = BlockBuilder::new(0, 1, false);
    builder.append_variant(no_gt_variant(0, 100, &["A", "C"])).unwrap();
    let built = builder.finalize(0, &Deflate, 6, None).unwrap();
    assert!(!built.header.controller.has_gt);
    assert_eq!(built.header.n_variants, 1);

    let bytes = write_archive(&schema, vec![built]);
    let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();
    assert_eq!(archive.n_blocks(), 1);
    assert_eq!(archive.index().entries()[0].contig, 0);
    assert_eq!(archive.index().entries()[0].min_position, 100);
    assert_eq!(archive.index().entries()[0].max_position, 100);

    let block = archive.next_block(&FieldSelection::All).unwrap().unwrap();
    let variants = block.materialize_variants().unwrap();
    assert_eq!(variants.len(), 1);
    assert_eq!(variants[0].contig_id, 0);
    assert_eq!(variants[0].position, 100);
    assert_eq!(variants[0].alleles, vec!["A".to_string(), "C".to_string()]);
    assert!(variants[0].genotypes.is_none());
    assert!(archive.next_block(&FieldSelection::All).unwrap().is_none());
}

// S2: diploid genotypes, 4 samples, 2 variants -- the permutation engine
// runs and the reader must invert it before handing genotypes back.
#[test]
fn s2_diploid_genotypes_round_trip_through_permutation() {
    let schema = schema(vec![("chr1", 1000)], Vec::new(), vec!["a", "b", "c", "d"]);

    let v1_gts = vec![gt(&[0, 0], true), gt(&[0, 1], true), gt(&[1, 0], true), gt(&[1, 1], true)];
    let v2_gts = vec![gt(&[0, 1], true), gt(&[0, 1], true), gt(&[0, 1], true), gt(&[0, 0], true)];

    let mut v1 = no_gt_variant(0, 10, &["A", "C"]);
    v1.genotypes = Some(v1_gts.clone());
    let mut v2 = no_gt_variant(0, 20, &["G", "T"]);
    v2.genotypes = Some(v2_gts.clone());

    let mut builder = BlockBuilder::new(0, 4, true);
    builder.append_variant(v1).unwrap();
    builder.append_variant(v2).unwrap();
    let built = builder.finalize(0, &Deflate, 6, None).unwrap();
    assert!(built.header.controller.has_gt);
    assert!(built.header.controller.has_gt_permuted);

    let bytes = write_archive(&schema, vec![built]);
    let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();
    assert_eq!(archive.index().entries()[0].min_position, 10);
    assert_eq!(archive.index().entries()[0].max_position, 20);
    assert_eq!(archive.index().entries()[0].n_variants, 2);

    let block = archive.next_block(&FieldSelection::All).unwrap().unwrap();
    let variants = block.materialize_variants().unwrap();
    assert_eq!(variants[0].genotypes, Some(v1_gts));
    assert_eq!(variants[1].genotypes, Some(v2_gts));
}

// S3: mixed ploidy with a missing call -- diploid, haploid, and diploid
// missing, all in one variant, over three samples.
#[test]
fn s3_mixed_ploidy_with_missing_round_trips() {
    let schema = schema(vec![("chr1", 1000)], Vec::new(), vec!["x", "y", "z"]);

    let gts = vec![
        gt(&[0, 1], false),
        gt(&[1], false),
        SampleGenotype { alleles: vec![AlleleCall::Missing, AlleleCall::Missing], phased: false },
    ];
    let mut v = no_gt_variant(0, 5, &["A", "C"]);
    v.genotypes = Some(gts.clone());

    let mut builder = BlockBuilder::new(0, 3, false);
    builder.append_variant(v).unwrap();
    let built = builder.finalize(0, &Deflate, 6, None).unwrap();

    let bytes = write_archive(&schema, vec![built]);
    let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();
    let block = archive.next_block(&FieldSelection::All).unwrap().unwrap();
    let variants = block.materialize_variants().unwrap();

    let decoded = variants[0].genotypes.as_ref().unwrap();
    assert_eq!(decoded[0].ploidy(), 2);
    assert_eq!(decoded[1].ploidy(), 1);
    assert_eq!(decoded[2].alleles, vec![AlleleCall::Missing, AlleleCall::Missing]);
    assert_eq!(decoded, &gts);
}

// S4: INFO pattern interning -- three records share {DP, AF}, one carries
// only DP, and the footer should intern exactly two patterns for it.
#[test]
fn s4_info_pattern_interning() {
    let schema_def = schema(
        vec![("chr1", 1000)],
        vec![("DP", FieldType::Int), ("AF", FieldType::Float)],
        Vec::new(),
    );
    let dp_global = schema_def.info_fields[0].global_id;
    let af_global = schema_def.info_fields[1].global_id;

    let mut builder = BlockBuilder::new(0, 0, false);
    for pos in [10, 20, 30] {
        let mut v = no_gt_variant(0, pos, &["A", "C"]);
        v.info = vec![
            InfoEntry { global_id: dp_global, value: FieldValue::Int(vec![5]) },
            InfoEntry { global_id: af_global, value: FieldValue::Float(vec![0.1]) },
        ];
        builder.append_variant(v).unwrap();
    }
    let mut dp_only = no_gt_variant(0, 40, &["A", "C"]);
    dp_only.info = vec![InfoEntry { global_id: dp_global, value: FieldValue::Int(vec![9]) }];
    builder.append_variant(dp_only).unwrap();

    let built = builder.finalize(0, &Deflate, 6, None).unwrap();
    let bytes = write_archive(&schema_def, vec![built]);

    let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();
    let block = archive.next_block(&FieldSelection::All).unwrap().unwrap();
    assert_eq!(block.footer.info_dict.n_patterns(), 2);

    let variants = block.materialize_variants().unwrap();
    let shared_pid = variants[0].info_pattern_id.unwrap();
    assert_eq!(variants[1].info_pattern_id, Some(shared_pid));
    assert_eq!(variants[2].info_pattern_id, Some(shared_pid));
    assert_eq!(variants[0].info.len(), 2);

    let dp_only_pid = variants[3].info_pattern_id.unwrap();
    assert_ne!(dp_only_pid, shared_pid);
    assert_eq!(variants[3].info.len(), 1);

    let dp_local = block.footer.info_dict.local_id_of(dp_global).unwrap();
    let af_local = block.footer.info_dict.local_id_of(af_global).unwrap();

    let mut shared_locals = block.footer.info_dict.locals_for_pattern(shared_pid).unwrap();
    shared_locals.sort_unstable();
    let mut expected = vec![dp_local, af_local];
    expected.sort_unstable();
    assert_eq!(shared_locals, expected);

    assert_eq!(block.footer.info_dict.locals_for_pattern(dp_only_pid).unwrap(), vec![dp_local]);
}

// S5: encrypted block -- every container gets sealed, the keychain picks
// up one entry per container, and the block is only readable with it.
#[test]
fn s5_encrypted_block_requires_keychain() {
    let schema_def = schema(vec![("chr1", 1000)], Vec::new(), vec!["a", "b", "c", "d"]);

    let v1_gts = vec![gt(&[0, 0], true), gt(&[0, 1], true), gt(&[1, 0], true), gt(&[1, 1], true)];
    let mut v1 = no_gt_variant(0, 10, &["A", "C"]);
    v1.genotypes = Some(v1_gts.clone());

    let mut builder = BlockBuilder::new(0, 4, true);
    builder.append_variant(v1).unwrap();

    let keychain = Keychain::new();
    let built = builder.finalize(0, &Deflate, 6, Some(&keychain)).unwrap();
    assert!(built.base_containers[0].header().flags.encrypted);
    assert_eq!(built.base_containers[0].header().encryption_kind, Some(EncryptionKind::Aes256Gcm));
    assert!(keychain.len() > 0);

    let bytes = write_archive(&schema_def, vec![built]);

    let mut unkeyed = Archive::open(MemReader::from(bytes.clone()), None).unwrap();
    let result = unkeyed.next_block(&FieldSelection::All);
    assert!(result.is_err());

    let mut keyed = Archive::open(MemReader::from(bytes), Some(keychain)).unwrap();
    let block = keyed.next_block(&FieldSelection::All).unwrap().unwrap();
    let variants = block.materialize_variants().unwrap();
    assert_eq!(variants[0].genotypes, Some(v1_gts));
}

// S6: interval query across two contigs and five blocks.
#[test]
fn s6_interval_query_across_contigs() {
    let schema_def = schema(vec![("chr1", 3000), ("chr2", 2000)], Vec::new(), Vec::new());

    let mut blocks = Vec::new();

    // chr1 blocks at 500, 1500, 2500; chr2 blocks at 500, 1500.
    let positions = [(0i32, 500i64), (0, 1500), (0, 2500), (1, 500), (1, 1500)];
    for (id, &(contig, pos)) in positions.iter().enumerate() {
        let mut builder = BlockBuilder::new(contig, 0, false);
        builder.append_variant(no_gt_variant(contig, pos, &["A", "C"])).unwrap();
        let built = builder.finalize(id as u64, &Deflate, 6, None).unwrap();
        blocks.push(built);
    }

    let bytes = write_archive(&schema_def, blocks);
    let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();

    let hits = archive.seek_to_overlap(0, 1500, 2500, &FieldSelection::All).unwrap();
    let mut hit_positions: Vec<i64> = hits.iter().map(|b| b.header.min_position).collect();
    hit_positions.sort_unstable();
    assert_eq!(hit_positions, vec![1500, 2500]);

    let hits = archive.seek_to_overlap(1, 500, 1500, &FieldSelection::All).unwrap();
    let mut hit_positions: Vec<i64> = hits.iter().map(|b| b.header.min_position).collect();
    hit_positions.sort_unstable();
    assert_eq!(hit_positions, vec![500, 1500]);

    let hits = archive.seek_to_overlap(2, 0, 1000, &FieldSelection::All).unwrap();
    assert!(hits.is_empty());
}
