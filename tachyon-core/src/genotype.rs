//! Genotype encoder (spec C4). Two wire forms share one run-length word
//! layout inherited from the reference implementation's bit-packing macros:
//! from the low bit upward, an optional phase bit, then `ploidy` allele
//! slots of `shift` bits each, then the run length in the remaining high
//! bits. The *RLE form* fixes `ploidy == 2`; the *Simple packed* form
//! generalizes to arbitrary (possibly mixed) ploidy and reuses the same
//! reserved low allele code both as BCF's vector-end marker and, when
//! ploidy varies across samples, as the ploidy terminator that pads a
//! sample's genotype out to the block's maximum ploidy (SPEC_FULL §11).

use crate::error::{err, ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlleleCall {
    Missing,
    Eov,
    Allele(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGenotype {
    pub alleles: Vec<AlleleCall>,
    pub phased: bool,
}

impl SampleGenotype {
    pub fn ploidy(&self) -> usize {
        self.alleles.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenotypeForm {
    Rle,
    Simple,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenotypeParams {
    pub shift: u32,
    pub add: u32,
    pub ploidy: u32,
    pub missing_flag: bool,
    pub mixed_ploidy_flag: bool,
    pub word_width: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenotypeEncoding {
    pub form: GenotypeForm,
    pub params: GenotypeParams,
    pub words: Vec<u8>,
    /// One entry per variant: (form, n_words consumed) -- the "support"
    /// side container (spec C4).
    pub support: Vec<(GenotypeForm, u32)>,
}

fn ceil_log2(n: usize) -> u32 {
    if n <= 1 {
        return 0;
    }
    (usize::BITS - (n - 1).leading_zeros()).max(1)
}

fn bits_for_max_run(max_run: u64) -> u32 {
    64 - max_run.leading_zeros()
}

fn pick_word_width(payload_bits: u32, max_run: u64) -> Result<u8> {
    let run_bits = bits_for_max_run(max_run.max(1));
    let total = payload_bits + run_bits;
    for &w in &[8u32, 16, 32, 64] {
        if total <= w {
            return Ok((w / 8) as u8);
        }
    }
    Err(err(
        ErrorKind::Capacity,
        "genotype run word exceeds the largest supported width (64 bits)",
    ))
}

fn write_word(out: &mut Vec<u8>, value: u64, width: u8) {
    out.extend_from_slice(&value.to_le_bytes()[..width as usize]);
}

fn read_word(bytes: &[u8], width: u8) -> u64 {
    let mut buf = [0u8; 8];
    buf[..width as usize].copy_from_slice(bytes);
    u64::from_le_bytes(buf)
}

/// Groups a block's per-variant sample-genotype rows into maximal runs of
/// identical (allele codes, phase) across consecutive samples. Samples are
/// assumed to already be in permuted order (spec C3 runs before C4).
fn run_length_encode(codes: &[(Vec<u32>, bool)]) -> Vec<(Vec<u32>, bool, u64)> {
    let mut runs = Vec::new();
    let mut i = 0;
    while i < codes.len() {
        let mut j = i + 1;
        while j < codes.len() && codes[j] == codes[i] {
            j += 1;
        }
        runs.push((codes[i].0.clone(), codes[i].1, (j - i) as u64));
        i = j;
    }
    runs
}

fn encode_codes(
    codes: &[(Vec<u32>, bool)],
    shift: u32,
    add: u32,
    ploidy: u32,
) -> Result<(Vec<u8>, u8)> {
    let runs = run_length_encode(codes);
    let max_run = runs.iter().map(|(_, _, len)| *len).max().unwrap_or(1);
    let payload_bits = ploidy * shift + add;
    let width = pick_word_width(payload_bits, max_run)?;

    let mut out = Vec::new();
    for (alleles, phased, len) in runs {
        let mut word: u64 = 0;
        let mut bit = 0u32;
        if add == 1 {
            word |= (phased as u64) << bit;
            bit += 1;
        }
        for &code in &alleles {
            word |= (code as u64) << bit;
            bit += shift;
        }
        word |= len << (ploidy * shift + add);
        write_word(&mut out, word, width);
    }
    Ok((out, width))
}

fn decode_words(
    words: &[u8],
    width: u8,
    shift: u32,
    add: u32,
    ploidy: u32,
    n_records: usize,
) -> Result<Vec<(Vec<u32>, bool)>> {
    if words.len() % width as usize != 0 {
        return Err(err(
            ErrorKind::Truncated,
            "genotype word stream length is not a multiple of the word width",
        ));
    }
    let mask = (1u64 << shift) - 1;
    let mut out = Vec::with_capacity(n_records);
    for chunk in words.chunks(width as usize) {
        let word = read_word(chunk, width);
        let mut bit = 0u32;
        let phased = if add == 1 {
            let p = (word >> bit) & 1 == 1;
            bit += 1;
            p
        } else {
            false
        };
        let mut alleles = Vec::with_capacity(ploidy as usize);
        for _ in 0..ploidy {
            let code = (word >> bit) & mask;
            alleles.push(code as u32);
            bit += shift;
        }
        let length = word >> (ploidy * shift + add);
        for _ in 0..length {
            out.push((alleles.clone(), phased));
            if out.len() > n_records {
                return Err(err(
                    ErrorKind::Integrity,
                    "genotype run lengths overshoot the declared sample count",
                ));
            }
        }
    }
    if out.len() != n_records {
        return Err(err(
            ErrorKind::Integrity,
            format!(
                "genotype run lengths sum to {}, expected {n_records} samples",
                out.len()
            ),
        ));
    }
    Ok(out)
}

/// RLE form code map: with no reserved codes (the common, no-missing,
/// no-eov case) allele codes ARE the allele indices, full stop -- shift=1
/// covers exactly {allele 0, allele 1}. Once a missing or eov call appears
/// anywhere in the block, codes 0 and 1 are reserved for them and every
/// allele index shifts up by 2 (shift=2 covers {missing, eov, allele 0,
/// allele 1}), matching spec §3's "k≥2 → allele k-2".
fn rle_code_for(call: AlleleCall, reserved: bool) -> u32 {
    match call {
        AlleleCall::Missing => 0,
        AlleleCall::Eov => 1,
        AlleleCall::Allele(a) => {
            if reserved {
                a + 2
            } else {
                a
            }
        }
    }
}

fn rle_call_for(code: u32, reserved: bool) -> AlleleCall {
    if reserved {
        match code {
            0 => AlleleCall::Missing,
            1 => AlleleCall::Eov,
            k => AlleleCall::Allele(k - 2),
        }
    } else {
        AlleleCall::Allele(code)
    }
}

/// Simple-packed form code map: the formula in spec §4.3 always reserves
/// one code for eov/ploidy-terminator regardless of whether missing values
/// occur, plus a second one when missing values do occur.
fn simple_code_for(call: AlleleCall, missing_flag: bool, term_code: u32) -> u32 {
    match call {
        AlleleCall::Missing if missing_flag => 0,
        AlleleCall::Missing => term_code,
        AlleleCall::Eov => term_code,
        AlleleCall::Allele(a) => term_code + 1 + a,
    }
}

fn simple_call_for(code: u32, missing_flag: bool, term_code: u32) -> AlleleCall {
    if missing_flag && code == 0 {
        return AlleleCall::Missing;
    }
    if code == term_code {
        return AlleleCall::Eov;
    }
    AlleleCall::Allele(code - term_code - 1)
}

/// Encodes one variant's sample column. `samples` must already be in
/// permuted order. Chooses the RLE form when ploidy is uniformly 2 and the
/// allele alphabet is small enough to fit in the 2-bit (no missing) or
/// 1-or-2-bit RLE layout; otherwise falls back to the Simple packed form.
pub fn encode_variant(samples: &[SampleGenotype]) -> Result<(GenotypeForm, GenotypeParams, Vec<u8>)> {
    if samples.is_empty() {
        return Err(err(ErrorKind::InputMalformed, "genotype encoding requires at least one sample"));
    }
    let uniform_ploidy = samples
        .iter()
        .map(SampleGenotype::ploidy)
        .collect::<std::collections::HashSet<_>>()
        .len()
        == 1
        && samples[0].ploidy() != 0;
    let ploidy0 = samples[0].ploidy();
    let missing_flag = samples
        .iter()
        .any(|s| s.alleles.iter().any(|a| *a == AlleleCall::Missing));
    let rle_reserved = samples.iter().any(|s| {
        s.alleles
            .iter()
            .any(|a| matches!(a, AlleleCall::Missing | AlleleCall::Eov))
    });
    let max_allele = samples
        .iter()
        .flat_map(|s| s.alleles.iter())
        .filter_map(|a| match a {
            AlleleCall::Allele(v) => Some(*v),
            _ => None,
        })
        .max()
        .unwrap_or(0);
    let mixed_phasing = {
        let mut it = samples.iter().map(|s| s.phased);
        let first = it.next().unwrap();
        it.any(|p| p != first)
    };
    let add = mixed_phasing as u32;

    if uniform_ploidy && ploidy0 == 2 && max_allele <= 1 {
        let shift = if rle_reserved { 2 } else { 1 };
        let codes: Vec<(Vec<u32>, bool)> = samples
            .iter()
            .map(|s| {
                let a = rle_code_for(s.alleles[0], rle_reserved);
                let b = rle_code_for(s.alleles[1], rle_reserved);
                (vec![a, b], s.phased)
            })
            .collect();
        let (words, width) = encode_codes(&codes, shift, add, 2)?;
        let params = GenotypeParams {
            shift,
            add,
            ploidy: 2,
            missing_flag: rle_reserved,
            mixed_ploidy_flag: false,
            word_width: width,
        };
        return Ok((GenotypeForm::Rle, params, words));
    }

    let ploidy = samples.iter().map(SampleGenotype::ploidy).max().unwrap() as u32;
    let mixed_ploidy_flag = !uniform_ploidy;
    let n_alleles = max_allele as usize + 1;
    let alphabet = n_alleles + 1 + mixed_ploidy_flag as usize + missing_flag as usize;
    let shift = ceil_log2(alphabet).max(1);
    let term_code = if missing_flag { 1 } else { 0 };

    let codes: Vec<(Vec<u32>, bool)> = samples
        .iter()
        .map(|s| {
            let mut row = Vec::with_capacity(ploidy as usize);
            for i in 0..ploidy as usize {
                if i < s.alleles.len() {
                    row.push(simple_code_for(s.alleles[i], missing_flag, term_code));
                } else {
                    row.push(term_code);
                }
            }
            (row, s.phased)
        })
        .collect();
    let (words, width) = encode_codes(&codes, shift, add, ploidy)?;
    let params = GenotypeParams {
        shift,
        add,
        ploidy,
        missing_flag,
        mixed_ploidy_flag,
        word_width: width,
    };
    Ok((GenotypeForm::Simple, params, words))
}

/// Allocation-free accumulator fed one decoded sample at a time (SPEC_FULL
/// §11, "Block-level `GenotypeSummary` hook"): lets an external statistics
/// consumer track per-variant genotype composition without re-decoding the
/// RLE/Simple word stream itself. `allele_counts` is indexed by allele
/// number (0 = REF).
#[derive(Debug, Clone, Default)]
pub struct GenotypeSummary {
    pub ref_count: u64,
    pub het_count: u64,
    pub alt_hom_count: u64,
    pub missing_count: u64,
    pub allele_counts: Vec<u64>,
}

impl GenotypeSummary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, sample: &SampleGenotype) {
        if sample
            .alleles
            .iter()
            .any(|a| matches!(a, AlleleCall::Missing))
        {
            self.missing_count += 1;
            return;
        }
        let alleles: Vec<u32> = sample
            .alleles
            .iter()
            .filter_map(|a| match a {
                AlleleCall::Allele(v) => Some(*v),
                _ => None,
            })
            .collect();
        if alleles.is_empty() {
            self.missing_count += 1;
            return;
        }
        for &a in &alleles {
            let idx = a as usize;
            if idx >= self.allele_counts.len() {
                self.allele_counts.resize(idx + 1, 0);
            }
            self.allele_counts[idx] += 1;
        }
        if alleles.iter().all(|&a| a == 0) {
            self.ref_count += 1;
        } else if alleles.iter().all(|&a| a == alleles[0]) {
            self.alt_hom_count += 1;
        } else {
            self.het_count += 1;
        }
    }
}

pub fn decode_variant(
    form: GenotypeForm,
    params: GenotypeParams,
    words: &[u8],
    n_samples: usize,
) -> Result<Vec<SampleGenotype>> {
    let term_code = if params.missing_flag { 1 } else { 0 };
    let rows = decode_words(
        words,
        params.word_width,
        params.shift,
        params.add,
        params.ploidy,
        n_samples,
    )?;
    Ok(rows
        .into_iter()
        .map(|(codes, phased)| SampleGenotype {
            alleles: codes
                .into_iter()
                .map(|c| match form {
                    GenotypeForm::Rle => rle_call_for(c, params.missing_flag),
                    GenotypeForm::Simple => simple_call_for(c, params.missing_flag, term_code),
                })
                .collect(),
            phased,
        })
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

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

    #[test]
    fn scenario_s2_diploid_rle_round_trip() {
        let samples = vec![
            gt(0, 0, true),
            gt(0, 1, true),
            gt(1, 0, true),
            gt(1, 1, true),
        ];
        let (form, params, words) = encode_variant(&samples).unwrap();
        assert_eq!(form, GenotypeForm::Rle);
        assert!(!params.missing_flag);
        let decoded = decode_variant(form, params, &words, samples.len()).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn scenario_s3_mixed_ploidy_with_missing() {
        let samples = vec![
            SampleGenotype { alleles: vec![AlleleCall::Allele(0), AlleleCall::Allele(1)], phased: false },
            SampleGenotype { alleles: vec![AlleleCall::Allele(1)], phased: false },
            SampleGenotype { alleles: vec![AlleleCall::Missing, AlleleCall::Missing], phased: false },
        ];
        let (form, params, words) = encode_variant(&samples).unwrap();
        assert_eq!(form, GenotypeForm::Simple);
        assert!(params.mixed_ploidy_flag);
        assert!(params.missing_flag);
        let decoded = decode_variant(form, params, &words, samples.len()).unwrap();
        assert_eq!(decoded[0].alleles, vec![AlleleCall::Allele(0), AlleleCall::Allele(1)]);
        assert_eq!(decoded[1].alleles[0], AlleleCall::Allele(1));
        assert_eq!(decoded[1].alleles[1], AlleleCall::Eov);
        assert_eq!(decoded[2].alleles, vec![AlleleCall::Missing, AlleleCall::Missing]);
    }

    #[test]
    fn run_length_sum_matches_sample_count() {
        let samples: Vec<SampleGenotype> = (0..37).map(|i| gt(0, (i % 2) as i32, false)).collect();
        let (form, params, words) = encode_variant(&samples).unwrap();
        let decoded = decode_variant(form, params, &words, samples.len()).unwrap();
        assert_eq!(decoded.len(), 37);
    }

    #[test]
    fn truncated_run_length_is_rejected() {
        let samples = vec![gt(0, 0, false), gt(0, 1, false)];
        let (form, params, words) = encode_variant(&samples).unwrap();
        assert!(decode_variant(form, params, &words, 999).is_err());
    }

    #[test]
    fn summary_tallies_het_hom_and_missing() {
        let mut summary = GenotypeSummary::new();
        summary.accumulate(&gt(0, 0, false));
        summary.accumulate(&gt(0, 1, false));
        summary.accumulate(&gt(1, 1, false));
        summary.accumulate(&SampleGenotype {
            alleles: vec![AlleleCall::Missing, AlleleCall::Missing],
            phased: false,
        });
        assert_eq!(summary.ref_count, 1);
        assert_eq!(summary.het_count, 1);
        assert_eq!(summary.alt_hom_count, 1);
        assert_eq!(summary.missing_count, 1);
        assert_eq!(summary.allele_counts, vec![3, 3]);
    }
}
