//! Archive reader (spec C13): the inverse of the writer (C11) plus the
//! block-builder's read side already implemented in `block.rs`. Opens an
//! archive, loads its schema and EOF region once, then hands out blocks
//! either sequentially (`next_block`) or by genomic interval
//! (`seek_to_overlap`).

use std::io::{Read, Seek, Write};

use crate::block::{Block, FieldSelection};
use crate::checksum::ChecksumTable;
use crate::codec::{ByteCodec, Deflate};
use crate::error::{err, ErrorKind, Result};
use crate::index::{IndexEntry, VariantIndex};
use crate::ioutil::{LeReadExt, LeWriteExt, Reader as SourceReader};
use crate::keychain::Keychain;
use crate::variant::Schema;

/// Fixed ASCII magic at the start of every archive (spec §6). Distinct from
/// `block::BLOCK_MAGIC`, which tags each individual block within it.
pub const ARCHIVE_MAGIC: &[u8; 8] = b"TCHYARC1";

/// Fixed ASCII tail written as the very last bytes of the file so a reader
/// can tell a clean close from mid-write truncation (spec §6 "magic tail").
pub const TRAILER_MAGIC_TAIL: &[u8; 8] = b"TCHYEOF1";

/// The archive-level trailer (spec §6 `Footer { offset_end_of_data: u64 |
/// counts... | magic-tail }`), written once after the variant index and
/// checksum table. Not to be confused with the per-block `footer::Footer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub offset_end_of_data: u64,
    pub n_blocks: u64,
    pub n_variants: u64,
    pub index_offset: u64,
    pub index_len: u64,
    pub checksum_offset: u64,
    pub checksum_len: u64,
}

impl Trailer {
    fn to_bytes(self) -> Vec<u8> {
        let mut w = crate::ioutil::MemWriter::new();
        w.write_u64(self.offset_end_of_data).unwrap();
        w.write_u64(self.n_blocks).unwrap();
        w.write_u64(self.n_variants).unwrap();
        w.write_u64(self.index_offset).unwrap();
        w.write_u64(self.index_len).unwrap();
        w.write_u64(self.checksum_offset).unwrap();
        w.write_u64(self.checksum_len).unwrap();
        w.into_bytes()
    }

    const ENCODED_LEN: u64 = 8 * 7;

    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut r = crate::ioutil::MemReader::from(bytes.to_vec());
        Ok(Trailer {
            offset_end_of_data: r.read_u64()?,
            n_blocks: r.read_u64()?,
            n_variants: r.read_u64()?,
            index_offset: r.read_u64()?,
            index_len: r.read_u64()?,
            checksum_offset: r.read_u64()?,
            checksum_len: r.read_u64()?,
        })
    }
}

/// Writes the archive's leading `MAGIC | schema` header (spec §6), the
/// counterpart `open` decompresses first. Returns the byte offset the first
/// block should start at, which is always just "wherever the sink's cursor
/// ended up" but is handed back so callers don't need to track it themselves.
pub fn write_archive_header(
    w: &mut impl crate::ioutil::Writer,
    schema: &Schema,
    codec: &dyn ByteCodec,
    level: u32,
) -> Result<u64> {
    w.write_all(ARCHIVE_MAGIC).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
    let header_bytes = schema.to_bytes();
    let compressed = codec.compress(level, &header_bytes)?;
    w.write_u32(header_bytes.len() as u32)?;
    w.write_u32(compressed.len() as u32)?;
    w.write_all(&compressed).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
    Ok(w.pos()? as u64)
}

/// Writes the EOF region -- `VariantIndex | ChecksumTable | Trailer` -- onto
/// an archive sink that has just finished the last `Block` (spec §6). The
/// companion of [`open`] on the read side.
pub fn write_eof_region(
    w: &mut impl crate::ioutil::Writer,
    index: &VariantIndex,
    checksums: &ChecksumTable,
    offset_end_of_data: u64,
) -> Result<()> {
    let index_bytes = index.to_bytes();
    let index_offset = w.pos()? as u64;
    w.write_all(&index_bytes).map_err(|e| err(ErrorKind::Io, e.to_string()))?;

    let checksum_bytes = checksums.to_bytes();
    let checksum_offset = w.pos()? as u64;
    w.write_all(&checksum_bytes).map_err(|e| err(ErrorKind::Io, e.to_string()))?;

    let trailer = Trailer {
        offset_end_of_data,
        n_blocks: index.entries().len() as u64,
        n_variants: index.entries().iter().map(|e| e.n_variants as u64).sum(),
        index_offset,
        index_len: index_bytes.len() as u64,
        checksum_offset,
        checksum_len: checksum_bytes.len() as u64,
    };
    w.write_all(&trailer.to_bytes()).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
    w.write_all(TRAILER_MAGIC_TAIL).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
    Ok(())
}

/// An open archive: schema, variant index, and checksum table loaded; ready
/// to stream blocks back.
pub struct Archive<R> {
    source: R,
    schema: Schema,
    index: VariantIndex,
    checksums: ChecksumTable,
    codec: Box<dyn ByteCodec>,
    keychain: Option<Keychain>,
    data_start: u64,
    cursor_block: usize,
}

impl<R: SourceReader> Archive<R> {
    /// Opens an archive: validates the magic, decompresses the header
    /// literal/schema, seeks to the known-size trailer suffix to load the
    /// variant index and checksum table, then rewinds to the start of data
    /// (spec §4.11 "Open").
    pub fn open(mut source: R, keychain: Option<Keychain>) -> Result<Self> {
        source
            .seek(std::io::SeekFrom::Start(0))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let mut magic = [0u8; 8];
        source.read_exact(&mut magic).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        if &magic != ARCHIVE_MAGIC {
            return Err(err(ErrorKind::Truncated, "bad archive magic"));
        }

        let header_uncompressed_len = source.read_u32()?;
        let header_compressed_len = source.read_u32()?;
        let mut header_compressed = vec![0u8; header_compressed_len as usize];
        source
            .read_exact(&mut header_compressed)
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let codec: Box<dyn ByteCodec> = Box::new(Deflate);
        let header_bytes = codec.decompress(&header_compressed, header_uncompressed_len as usize)?;
        let schema = Schema::from_bytes(&header_bytes)?;

        let data_start = source.pos()? as u64;

        let end = source
            .seek(std::io::SeekFrom::End(0))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        if end < Trailer::ENCODED_LEN + TRAILER_MAGIC_TAIL.len() as u64 {
            return Err(err(ErrorKind::Truncated, "archive too short to hold a trailer"));
        }

        source
            .seek(std::io::SeekFrom::End(-(TRAILER_MAGIC_TAIL.len() as i64)))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let mut tail = [0u8; 8];
        source.read_exact(&mut tail).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        if &tail != TRAILER_MAGIC_TAIL {
            return Err(err(ErrorKind::Truncated, "archive is missing its magic tail (truncated write)"));
        }

        let trailer_start = end - TRAILER_MAGIC_TAIL.len() as u64 - Trailer::ENCODED_LEN;
        source
            .seek(std::io::SeekFrom::Start(trailer_start))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let mut trailer_bytes = vec![0u8; Trailer::ENCODED_LEN as usize];
        source.read_exact(&mut trailer_bytes).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let trailer = Trailer::from_bytes(&trailer_bytes)?;

        if trailer.offset_end_of_data > trailer_start {
            return Err(err(ErrorKind::Truncated, "trailer claims more data than the file holds"));
        }

        source
            .seek(std::io::SeekFrom::Start(trailer.index_offset))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let mut index_bytes = vec![0u8; trailer.index_len as usize];
        source.read_exact(&mut index_bytes).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let index = VariantIndex::from_bytes(&index_bytes)?;

        source
            .seek(std::io::SeekFrom::Start(trailer.checksum_offset))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let mut checksum_bytes = vec![0u8; trailer.checksum_len as usize];
        source.read_exact(&mut checksum_bytes).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let checksums = ChecksumTable::from_bytes(&checksum_bytes)?;

        source
            .seek(std::io::SeekFrom::Start(data_start))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;

        Ok(Archive {
            source,
            schema,
            index,
            checksums,
            codec,
            keychain,
            data_start,
            cursor_block: 0,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn index(&self) -> &VariantIndex {
        &self.index
    }

    /// Reads the next block in on-disk order under `selection`, verifying
    /// its checksum against the archive's checksum table before handing it
    /// back. Returns `None` once every indexed block has been read.
    pub fn next_block(&mut self, selection: &FieldSelection) -> Result<Option<Block>> {
        if self.cursor_block >= self.index.entries().len() {
            return Ok(None);
        }
        let entry = self.index.entries()[self.cursor_block].clone();
        let block = self.read_block_at(&entry, selection)?;
        self.cursor_block += 1;
        Ok(Some(block))
    }

    /// Interval query against the variant index (spec C7), then reads each
    /// overlapping block in block-id order (spec §4.11 `seek_to_overlap`).
    pub fn seek_to_overlap(
        &mut self,
        contig: i32,
        p0: i64,
        p1: i64,
        selection: &FieldSelection,
    ) -> Result<Vec<Block>> {
        let entries: Vec<IndexEntry> = self
            .index
            .find_overlaps(contig, p0, p1)
            .into_iter()
            .cloned()
            .collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in &entries {
            out.push(self.read_block_at(entry, selection)?);
        }
        Ok(out)
    }

    fn read_block_at(&mut self, entry: &IndexEntry, selection: &FieldSelection) -> Result<Block> {
        self.source
            .seek(std::io::SeekFrom::Start(entry.byte_offset_begin))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;

        let mut raw = vec![0u8; (entry.byte_offset_end - entry.byte_offset_begin) as usize];
        self.source.read_exact(&mut raw).map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        self.checksums.verify(entry.block_id, &raw)?;

        self.source
            .seek(std::io::SeekFrom::Start(entry.byte_offset_begin))
            .map_err(|e| err(ErrorKind::Io, e.to_string()))?;
        let (header, footer, body_start) = Block::read_header_footer(&mut self.source, self.codec.as_ref())?;
        Block::read_body(
            &mut self.source,
            header,
            footer,
            body_start,
            selection,
            self.codec.as_ref(),
            self.keychain.as_ref(),
            entry.block_id,
        )
    }

    /// Rewinds `next_block` back to the first block (spec doesn't name this
    /// directly, but `seek_to_overlap` callers commonly want to resume
    /// sequential iteration afterwards without reopening the archive).
    pub fn rewind(&mut self) {
        self.cursor_block = 0;
    }

    pub fn n_blocks(&self) -> usize {
        self.index.entries().len()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::block::BlockBuilder;
    use crate::codec::Deflate as DeflateCodec;
    use crate::ioutil::{MemReader, MemWriter, Writer as SinkWriter};
    use crate::variant::{ContigDef, FieldType, FieldValue, InfoEntry, VariantRecord};
    use crate::writer::Writer;

    fn variant(contig: i32, pos: i64) -> VariantRecord {
        VariantRecord {
            contig_id: contig,
            position: pos,
            quality: None,
            name: String::new(),
            alleles: vec!["A".into(), "C".into()],
            info: vec![InfoEntry { global_id: 0, value: FieldValue::Int(vec![10]) }],
            format: Vec::new(),
            filters: Vec::new(),
            genotypes: None,
            info_pattern_id: None,
            format_pattern_id: None,
            filter_pattern_id: None,
        }
    }

    fn build_archive(entries: &[(u64, i32, i64)]) -> Vec<u8> {
        let schema = Schema::new(
            vec![
                ContigDef { name: "chr1".into(), length: 1_000_000, external_index: 0 },
                ContigDef { name: "chr2".into(), length: 1_000_000, external_index: 1 },
            ],
            vec![("DP".into(), FieldType::Int)],
            Vec::new(),
            Vec::new(),
            Vec::new(),
            "##fileformat=VCFv4.2".into(),
        );

        let mut out = MemWriter::new();
        write_archive_header(&mut out, &schema, &DeflateCodec, 6).unwrap();

        let writer = Writer::new(out, Box::new(DeflateCodec), 6);
        for &(block_id, contig, pos) in entries {
            let mut b = BlockBuilder::new(contig, 0, false);
            b.append_variant(variant(contig, pos)).unwrap();
            let built = b.finalize(block_id, &DeflateCodec, 6, None).unwrap();
            writer.enqueue(block_id, built).unwrap();
        }
        let (mut sink, index, checksums, end) = writer.finish().unwrap();
        write_eof_region(&mut sink, &index, &checksums, end).unwrap();
        sink.into_bytes()
    }

    #[test]
    fn open_reads_back_schema_and_all_blocks_in_order() {
        let bytes = build_archive(&[(0, 0, 100), (1, 0, 200), (2, 1, 50)]);
        let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();
        assert_eq!(archive.schema().samples.len(), 0);
        assert_eq!(archive.n_blocks(), 3);

        let mut seen = Vec::new();
        while let Some(block) = archive.next_block(&FieldSelection::All).unwrap() {
            let variants = block.materialize_variants().unwrap();
            seen.push((block.header.contig, variants[0].position));
        }
        assert_eq!(seen, vec![(0, 100), (0, 200), (1, 50)]);
        assert!(archive.next_block(&FieldSelection::All).unwrap().is_none());
    }

    #[test]
    fn seek_to_overlap_returns_only_matching_blocks() {
        let bytes = build_archive(&[(0, 0, 100), (1, 0, 5_000), (2, 1, 50)]);
        let mut archive = Archive::open(MemReader::from(bytes), None).unwrap();

        let hits = archive.seek_to_overlap(0, 0, 1000, &FieldSelection::All).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].header.min_position, 100);
    }

    #[test]
    fn truncated_archive_missing_magic_tail_is_rejected() {
        let mut bytes = build_archive(&[(0, 0, 100)]);
        bytes.truncate(bytes.len() - 2);
        let result = Archive::open(MemReader::from(bytes), None);
        assert!(result.is_err());
    }
}
