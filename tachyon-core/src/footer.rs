//! Block footer (spec C5 / §4.2 "Footer"): the compressed tail of a block
//! that carries, for each of {info, format, filter}, the stream/pattern
//! dictionaries, plus the per-stream [`ContainerHeader`]s a reader needs to
//! seek directly to any container's bytes without buffering the whole
//! block body (spec §4.2 "Finalization precomputes per-stream byte
//! offsets... so the writer can stream without buffering the whole
//! block").
//!
//! The footer is itself compressed as one opaque blob (spec §6 "repeated
//! Block: ... CompressedFooter"), using the same length-prefixed
//! uncompressed/compressed pair the top-level archive header uses for its
//! own literal+schema blob.

use crate::codec::ByteCodec;
use crate::container::ContainerHeader;
use crate::dict::StreamDict;
use crate::error::{err, ErrorKind, Result};
use crate::ioutil::{LeReadExt, LeWriteExt, MemReader, MemWriter};

/// Fixed base-container roles, in the order spec §3's Block lists them.
/// `BaseRole::COUNT` is the number of base containers every block carries
/// regardless of whether genotypes are present (unused roles are simply
/// empty containers, not omitted -- this keeps role indices stable across
/// blocks so the footer doesn't need to separately enumerate which base
/// roles exist).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BaseRole {
    Contig = 0,
    Controller = 1,
    Position = 2,
    Quality = 3,
    RefAlt = 4,
    AlleleStrings = 5,
    Name = 6,
    InfoPatternId = 7,
    FormatPatternId = 8,
    FilterPatternId = 9,
    GtPpa = 10,
    GtRle = 11,
    GtSimple = 12,
    GtSupport = 13,
    Ploidy = 14,
}

impl BaseRole {
    pub const COUNT: usize = 15;

    pub const ALL: [BaseRole; Self::COUNT] = [
        BaseRole::Contig,
        BaseRole::Controller,
        BaseRole::Position,
        BaseRole::Quality,
        BaseRole::RefAlt,
        BaseRole::AlleleStrings,
        BaseRole::Name,
        BaseRole::InfoPatternId,
        BaseRole::FormatPatternId,
        BaseRole::FilterPatternId,
        BaseRole::GtPpa,
        BaseRole::GtRle,
        BaseRole::GtSimple,
        BaseRole::GtSupport,
        BaseRole::Ploidy,
    ];
}

fn write_container_header(w: &mut MemWriter, h: &ContainerHeader) -> Result<()> {
    w.write_u32(h.global_id)?;
    w.write_u8(h.tag.map(|t| t as u8).unwrap_or(0xff))?;
    w.write_u8(h.signed as u8)?;
    w.write_u8(h.flags.uniform as u8)?;
    w.write_u8(h.flags.mixed_stride as u8)?;
    w.write_u8(h.flags.encrypted as u8)?;
    w.write_u8(h.encryption_kind.map(|k| k as u8).unwrap_or(0))?;
    w.write_u32(h.stride_value)?;
    w.write_u32(h.n_records)?;
    w.write_u32(h.uncompressed_len)?;
    w.write_u32(h.compressed_len)?;
    w.write_u64(h.crc)?;
    w.write_u32(h.stride_uncompressed_len)?;
    w.write_u32(h.stride_compressed_len)?;
    w.write_u64(h.stride_crc)?;
    w.write_u64(h.data_offset)?;
    w.write_u64(h.stride_offset)?;
    Ok(())
}

fn read_container_header(r: &mut MemReader) -> Result<ContainerHeader> {
    use crate::aead::EncryptionKind;
    use crate::primitive::PrimitiveTag;

    let global_id = r.read_u32()?;
    let tag_byte = r.read_u8()?;
    let tag = if tag_byte == 0xff {
        None
    } else {
        Some(PrimitiveTag::from_u8(tag_byte)?)
    };
    let signed = r.read_u8()? != 0;
    let uniform = r.read_u8()? != 0;
    let mixed_stride = r.read_u8()? != 0;
    let encrypted = r.read_u8()? != 0;
    let enc_kind_byte = r.read_u8()?;
    let encryption_kind = if enc_kind_byte == 0 {
        None
    } else {
        Some(EncryptionKind::from_u8(enc_kind_byte)?)
    };
    let stride_value = r.read_u32()?;
    let n_records = r.read_u32()?;
    let uncompressed_len = r.read_u32()?;
    let compressed_len = r.read_u32()?;
    let crc = r.read_u64()?;
    let stride_uncompressed_len = r.read_u32()?;
    let stride_compressed_len = r.read_u32()?;
    let stride_crc = r.read_u64()?;
    let data_offset = r.read_u64()?;
    let stride_offset = r.read_u64()?;

    Ok(ContainerHeader {
        global_id,
        tag,
        signed,
        flags: crate::container::ContainerFlags {
            uniform,
            mixed_stride,
            encrypted,
        },
        encryption_kind,
        stride_value,
        n_records,
        uncompressed_len,
        compressed_len,
        crc,
        stride_uncompressed_len,
        stride_compressed_len,
        stride_crc,
        data_offset,
        stride_offset,
    })
}

fn write_dict(w: &mut MemWriter, dict: &StreamDict, headers: Option<&[ContainerHeader]>) -> Result<()> {
    w.write_u32(dict.n_streams() as u32)?;
    w.write_bytes(
        &dict
            .local_to_global()
            .iter()
            .flat_map(|g| g.to_le_bytes())
            .collect::<Vec<u8>>(),
    )?;
    if let Some(headers) = headers {
        for h in headers {
            write_container_header(w, h)?;
        }
    }
    w.write_u32(dict.n_patterns() as u32)?;
    for pattern in dict.patterns() {
        w.write_u32(pattern.global_ids.len() as u32)?;
        for g in &pattern.global_ids {
            w.write_u32(*g)?;
        }
        w.write_bytes(&pattern.bits.bytes)?;
    }
    Ok(())
}

struct DictPayload {
    global_ids_in_local_order: Vec<u32>,
    headers: Vec<ContainerHeader>,
    patterns: Vec<(Vec<u32>, Vec<u8>)>,
}

fn read_dict(r: &mut MemReader, with_headers: bool) -> Result<DictPayload> {
    let n_streams = r.read_u32()? as usize;
    let raw = r.read_bytes()?;
    if raw.len() != n_streams * 4 {
        return Err(err(ErrorKind::Truncated, "footer dict global-id table truncated"));
    }
    let global_ids_in_local_order: Vec<u32> = raw
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();
    let mut headers = Vec::new();
    if with_headers {
        for _ in 0..n_streams {
            headers.push(read_container_header(r)?);
        }
    }
    let n_patterns = r.read_u32()? as usize;
    let mut patterns = Vec::with_capacity(n_patterns);
    for _ in 0..n_patterns {
        let n_ids = r.read_u32()? as usize;
        let mut ids = Vec::with_capacity(n_ids);
        for _ in 0..n_ids {
            ids.push(r.read_u32()?);
        }
        let bits = r.read_bytes()?;
        patterns.push((ids, bits));
    }
    Ok(DictPayload {
        global_ids_in_local_order,
        headers,
        patterns,
    })
}

/// Rebuilds a [`StreamDict`] (with its pattern table) from footer bytes.
/// Streams and patterns are re-interned in the same order they appear on
/// disk, so local/pattern ids read back identically to how they were
/// assigned at write time.
fn rebuild_dict(payload: &DictPayload) -> StreamDict {
    let mut dict = StreamDict::new();
    for &g in &payload.global_ids_in_local_order {
        dict.add_stream(g);
    }
    for (ids, _bits) in &payload.patterns {
        dict.add_pattern(ids);
    }
    dict
}

pub struct Footer {
    pub base_headers: [ContainerHeader; BaseRole::COUNT],
    pub info_dict: StreamDict,
    pub info_headers: Vec<ContainerHeader>,
    pub format_dict: StreamDict,
    pub format_headers: Vec<ContainerHeader>,
    pub filter_dict: StreamDict,
}

impl Footer {
    pub fn to_bytes(&self, codec: &dyn ByteCodec, level: u32) -> Result<(Vec<u8>, u32, u32)> {
        let mut w = MemWriter::new();
        for h in &self.base_headers {
            write_container_header(&mut w, h)?;
        }
        write_dict(&mut w, &self.info_dict, Some(&self.info_headers))?;
        write_dict(&mut w, &self.format_dict, Some(&self.format_headers))?;
        write_dict(&mut w, &self.filter_dict, None)?;
        let raw = w.into_bytes();
        let uncompressed_len = raw.len() as u32;
        let compressed = codec.compress(level, &raw)?;
        let compressed_len = compressed.len() as u32;
        Ok((compressed, uncompressed_len, compressed_len))
    }

    pub fn from_bytes(bytes: &[u8], uncompressed_len: usize, codec: &dyn ByteCodec) -> Result<Self> {
        let raw = codec.decompress(bytes, uncompressed_len)?;
        let mut r = MemReader::from(raw);

        let mut base_headers: Vec<ContainerHeader> = Vec::with_capacity(BaseRole::COUNT);
        for _ in 0..BaseRole::COUNT {
            base_headers.push(read_container_header(&mut r)?);
        }
        let base_headers: [ContainerHeader; BaseRole::COUNT] = base_headers
            .try_into()
            .map_err(|_| err(ErrorKind::Truncated, "wrong number of base container headers"))?;

        let info_payload = read_dict(&mut r, true)?;
        let info_headers = info_payload.headers.clone();
        let info_dict = rebuild_dict(&info_payload);

        let format_payload = read_dict(&mut r, true)?;
        let format_headers = format_payload.headers.clone();
        let format_dict = rebuild_dict(&format_payload);

        let filter_payload = read_dict(&mut r, false)?;
        let filter_dict = rebuild_dict(&filter_payload);

        Ok(Footer {
            base_headers,
            info_dict,
            info_headers,
            format_dict,
            format_headers,
            filter_dict,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Deflate;

    fn dummy_header(global_id: u32) -> ContainerHeader {
        ContainerHeader {
            global_id,
            ..Default::default()
        }
    }

    #[test]
    fn footer_round_trips_dicts_and_headers() {
        let base_headers: [ContainerHeader; BaseRole::COUNT] =
            std::array::from_fn(|i| dummy_header(i as u32));

        let mut info_dict = StreamDict::new();
        info_dict.add_pattern(&[10, 20]);
        info_dict.add_pattern(&[10]);
        let info_headers = vec![dummy_header(10), dummy_header(20)];

        let format_dict = StreamDict::new();
        let filter_dict = StreamDict::new();

        let footer = Footer {
            base_headers,
            info_dict,
            info_headers,
            format_dict,
            format_headers: Vec::new(),
            filter_dict,
        };

        let (bytes, uncompressed_len, _compressed_len) = footer.to_bytes(&Deflate, 6).unwrap();
        let restored = Footer::from_bytes(&bytes, uncompressed_len as usize, &Deflate).unwrap();
        assert_eq!(restored.info_dict.n_patterns(), 2);
        assert_eq!(restored.info_headers.len(), 2);
        assert_eq!(restored.info_headers[1].global_id, 20);
    }
}
