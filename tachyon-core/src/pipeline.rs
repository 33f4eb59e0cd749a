//! Build pipeline (spec C9/C10): one producer thread pulls records from the
//! external VCF iterator and groups them into checkpoint-bounded batches; N
//! builder threads turn each batch into a finished block and hand it to the
//! writer (`crate::writer::Writer`, spec C11). The writer serialises the
//! builders' out-of-order completions back into strict block-id order, so
//! this module only has to get batches to *some* free builder as fast as
//! possible.
//!
//! REDESIGN FLAG (spec §9): the source's hand-rolled ring buffer with two
//! condition variables (`not_full`/`not_empty`) is replaced here by a
//! `crossbeam_channel::bounded` queue sized to the worker count, per the
//! flag's own suggestion. Shutdown no longer needs an explicit sentinel
//! value or `alive` flag on the queue: dropping every `Sender` closes the
//! channel, and `Receiver::iter` ends on its own once the queue drains --
//! the channel's built-in closing behaviour already *is* the "alive == false
//! && queue empty" exit condition spec §5 describes by hand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::bounded;

use crate::block::BlockBuilder;
use crate::codec::ByteCodec;
use crate::config::Config;
use crate::error::{err, ErrorKind, Result};
use crate::ioutil::Writer as SinkWriter;
use crate::keychain::Keychain;
use crate::variant::Schema;
use crate::vcf::{convert_record, RecordSource};
use crate::writer::Writer;

/// One checkpoint-bounded group of records destined for a single block
/// (spec §4.9's "batch payload {block_id, record container}").
struct Batch<R> {
    block_id: u64,
    contig: i32,
    records: Vec<R>,
}

/// Outcome of a full producer/consumer run (spec §11 fixes the source's
/// dead `n_records_loaded` counter: it's tallied here, per record pulled
/// off the external iterator, and actually reported back to the caller).
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub n_blocks: u64,
    pub n_records_loaded: u64,
}

/// Runs the producer and `config.worker_threads` builder threads to
/// completion against a single writer, returning once every record from
/// `records` has been either written or has caused an abort.
///
/// `records` yields already-parsed external records; any error from the
/// underlying VCF source is propagated as-is. Builder errors (malformed
/// records, schema violations) abort the whole run: remaining batches are
/// drained without being built, and any builder thread still waiting on
/// `writer.enqueue` is released via [`Writer::shutdown`] (spec §4.11
/// "Producer/consumer exceptions are routed to the writer as 'abort'
/// signals that cause ordered drain and shutdown").
pub fn run<R, I, W>(
    records: I,
    schema: &Schema,
    config: &Config,
    codec: &dyn ByteCodec,
    keychain: Option<&Keychain>,
    writer: &Writer<W>,
) -> Result<PipelineStats>
where
    R: RecordSource + Send,
    I: Iterator<Item = Result<R>> + Send,
    W: SinkWriter,
{
    let worker_threads = config.worker_threads.max(1);
    let (sender, receiver) = bounded::<Batch<R>>(worker_threads);
    let abort = AtomicBool::new(false);
    let n_records_loaded = AtomicU64::new(0);

    let (produced_blocks, worker_results) = thread::scope(|scope| {
        let producer = scope.spawn(|| {
            produce(
                records,
                config.checkpoint_n_variants,
                config.checkpoint_bases,
                sender,
                &abort,
                &n_records_loaded,
            )
        });

        let workers: Vec<_> = (0..worker_threads)
            .map(|_| {
                let receiver = receiver.clone();
                scope.spawn(|| {
                    consume(
                        receiver,
                        schema,
                        config.permute_genotypes,
                        codec,
                        config.compression_level,
                        keychain,
                        writer,
                        &abort,
                    )
                })
            })
            .collect();
        drop(receiver);

        let produced = producer
            .join()
            .map_err(|_| err(ErrorKind::Io, "producer thread panicked"))
            .and_then(|r| r);
        let results: Vec<Result<()>> = workers
            .into_iter()
            .map(|h| {
                h.join()
                    .map_err(|_| err(ErrorKind::Io, "builder thread panicked"))
                    .and_then(|r| r)
            })
            .collect();
        (produced, results)
    });

    for result in worker_results {
        result?;
    }
    let n_blocks = produced_blocks?;

    Ok(PipelineStats {
        n_blocks,
        n_records_loaded: n_records_loaded.load(Ordering::Relaxed),
    })
}

fn produce<R, I>(
    records: I,
    checkpoint_n_variants: u32,
    checkpoint_bases: i64,
    sender: crossbeam_channel::Sender<Batch<R>>,
    abort: &AtomicBool,
    n_records_loaded: &AtomicU64,
) -> Result<u64>
where
    R: RecordSource,
    I: Iterator<Item = Result<R>>,
{
    let mut next_block_id = 0u64;
    let mut current: Vec<R> = Vec::new();
    let mut current_contig: Option<usize> = None;
    let mut min_pos = 0i64;

    let flush = |current: &mut Vec<R>,
                 current_contig: &mut Option<usize>,
                 next_block_id: &mut u64|
     -> bool {
        if current.is_empty() {
            return true;
        }
        let contig = current_contig.take().unwrap() as i32;
        let batch = Batch {
            block_id: *next_block_id,
            contig,
            records: std::mem::take(current),
        };
        *next_block_id += 1;
        sender.send(batch).is_ok()
    };

    for item in records {
        if abort.load(Ordering::Acquire) {
            break;
        }
        let rec = item?;
        n_records_loaded.fetch_add(1, Ordering::Relaxed);

        let contig = rec.contig_index();
        let pos = rec.position();
        let contig_changed = matches!(current_contig, Some(c) if c != contig);
        let over_count = current.len() as u32 >= checkpoint_n_variants;
        let over_span =
            current_contig == Some(contig) && (pos - min_pos) > checkpoint_bases;

        if contig_changed || over_count || over_span {
            if !flush(&mut current, &mut current_contig, &mut next_block_id) {
                return Ok(next_block_id);
            }
        }
        if current.is_empty() {
            current_contig = Some(contig);
            min_pos = pos;
        }
        current.push(rec);
    }
    flush(&mut current, &mut current_contig, &mut next_block_id);
    Ok(next_block_id)
}

#[allow(clippy::too_many_arguments)]
fn consume<R, W>(
    receiver: crossbeam_channel::Receiver<Batch<R>>,
    schema: &Schema,
    permute_genotypes: bool,
    codec: &dyn ByteCodec,
    compression_level: u32,
    keychain: Option<&Keychain>,
    writer: &Writer<W>,
    abort: &AtomicBool,
) -> Result<()>
where
    R: RecordSource,
    W: SinkWriter,
{
    for batch in receiver.iter() {
        if abort.load(Ordering::Acquire) {
            break;
        }
        match build_and_enqueue(
            batch,
            schema,
            permute_genotypes,
            codec,
            compression_level,
            keychain,
            writer,
        ) {
            Ok(()) => {}
            Err(e) => {
                abort.store(true, Ordering::Release);
                writer.shutdown();
                return Err(e);
            }
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn build_and_enqueue<R, W>(
    batch: Batch<R>,
    schema: &Schema,
    permute_genotypes: bool,
    codec: &dyn ByteCodec,
    compression_level: u32,
    keychain: Option<&Keychain>,
    writer: &Writer<W>,
) -> Result<()>
where
    R: RecordSource,
    W: SinkWriter,
{
    let mut builder = BlockBuilder::new(batch.contig, schema.sample_count(), permute_genotypes);
    for rec in &batch.records {
        builder.append_variant(convert_record(rec, schema)?)?;
    }
    let built = builder.finalize(batch.block_id, codec, compression_level, keychain)?;
    writer.enqueue(batch.block_id, built)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Deflate;
    use crate::genotype::SampleGenotype;
    use crate::ioutil::MemWriter;
    use crate::variant::{ContigDef, FieldType, FieldValue};

    struct StubRecord {
        contig: usize,
        position: i64,
    }

    impl RecordSource for StubRecord {
        fn contig_index(&self) -> usize {
            self.contig
        }
        fn position(&self) -> i64 {
            self.position
        }
        fn id(&self) -> Option<String> {
            None
        }
        fn ref_allele(&self) -> String {
            "A".into()
        }
        fn alt_alleles(&self) -> Vec<String> {
            vec!["C".into()]
        }
        fn quality(&self) -> Option<f32> {
            None
        }
        fn filter_indices(&self) -> Vec<usize> {
            Vec::new()
        }
        fn info_entries(&self) -> Vec<(usize, FieldValue)> {
            Vec::new()
        }
        fn format_entries(&self) -> Vec<(usize, Vec<FieldValue>)> {
            Vec::new()
        }
        fn genotypes(&self) -> Option<Vec<SampleGenotype>> {
            None
        }
    }

    fn test_schema() -> Schema {
        Schema::new(
            vec![
                ContigDef { name: "chr1".into(), length: 1_000_000, external_index: 0 },
                ContigDef { name: "chr2".into(), length: 1_000_000, external_index: 1 },
            ],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            Vec::new(),
            String::new(),
        )
    }

    fn records(n: usize, contig: usize, start: i64, step: i64) -> Vec<Result<StubRecord>> {
        (0..n)
            .map(|i| Ok(StubRecord { contig, position: start + i as i64 * step }))
            .collect()
    }

    #[test]
    fn checkpoint_on_record_count_splits_into_multiple_blocks() {
        let schema = test_schema();
        let mut config = Config::default();
        config.worker_threads = 2;
        config.checkpoint_n_variants = 3;
        config.checkpoint_bases = i64::MAX;

        let writer = Writer::new(MemWriter::new(), Box::new(Deflate), 1);
        let stats = run(
            records(7, 0, 0, 1).into_iter(),
            &schema,
            &config,
            &Deflate,
            None,
            &writer,
        )
        .unwrap();

        assert_eq!(stats.n_records_loaded, 7);
        // 3 + 3 + 1 records per checkpoint => 3 blocks.
        assert_eq!(stats.n_blocks, 3);

        let (_sink, index, checksums, _end) = writer.finish().unwrap();
        let ids: Vec<u64> = index.entries().iter().map(|e| e.block_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(checksums.entries().len(), 3);
    }

    #[test]
    fn contig_change_forces_a_new_block() {
        let schema = test_schema();
        let mut config = Config::default();
        config.worker_threads = 2;
        config.checkpoint_n_variants = 1000;
        config.checkpoint_bases = i64::MAX;

        let mut recs = records(2, 0, 0, 100);
        recs.extend(records(2, 1, 0, 100));

        let writer = Writer::new(MemWriter::new(), Box::new(Deflate), 1);
        let stats = run(recs.into_iter(), &schema, &config, &Deflate, None, &writer).unwrap();

        assert_eq!(stats.n_blocks, 2);
        let (_sink, index, _checksums, _end) = writer.finish().unwrap();
        assert_eq!(index.entries()[0].contig, 0);
        assert_eq!(index.entries()[1].contig, 1);
    }

    #[test]
    fn malformed_record_aborts_the_run_without_hanging() {
        let schema = test_schema();
        let mut config = Config::default();
        config.worker_threads = 2;

        // contig index 9 has no matching ContigDef in the schema, but the
        // mismatch that actually trips is caught inside BlockBuilder: a
        // sample-count mismatch against a zero-sample schema forces
        // append_variant to error out.
        struct BadRecord;
        impl RecordSource for BadRecord {
            fn contig_index(&self) -> usize {
                0
            }
            fn position(&self) -> i64 {
                0
            }
            fn id(&self) -> Option<String> {
                None
            }
            fn ref_allele(&self) -> String {
                "A".into()
            }
            fn alt_alleles(&self) -> Vec<String> {
                vec!["C".into()]
            }
            fn quality(&self) -> Option<f32> {
                None
            }
            fn filter_indices(&self) -> Vec<usize> {
                Vec::new()
            }
            fn info_entries(&self) -> Vec<(usize, FieldValue)> {
                Vec::new()
            }
            fn format_entries(&self) -> Vec<(usize, Vec<FieldValue>)> {
                Vec::new()
            }
            fn genotypes(&self) -> Option<Vec<SampleGenotype>> {
                Some(vec![SampleGenotype {
                    alleles: vec![crate::genotype::AlleleCall::Allele(0)],
                    phased: false,
                }])
            }
        }

        let writer = Writer::new(MemWriter::new(), Box::new(Deflate), 1);
        let recs: Vec<Result<BadRecord>> = vec![Ok(BadRecord)];
        let result = run(recs.into_iter(), &schema, &config, &Deflate, None, &writer);
        assert!(result.is_err());
    }
}
