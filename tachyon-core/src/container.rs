//! The typed sub-stream container (spec C1 "Typed sub-stream container"):
//! the unit every block column is built from. A container owns one data
//! stream plus an optional stride stream, and knows how to collapse itself
//! into the three flags a reader needs before it can even look at the bytes:
//! uniform (data broadcasts to every record), mixed-stride (per-record
//! element counts vary), and encrypted.

use crate::aead::{self, EncryptionKind, KEY_LEN};
use crate::codec::ByteCodec;
use crate::error::{err, ErrorKind, Result};
use crate::primitive::PrimitiveTag;
use crate::primitive_value::Value;
use tachyon_base::digest64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContainerFlags {
    pub uniform: bool,
    pub mixed_stride: bool,
    pub encrypted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ContainerHeader {
    pub global_id: u32,
    pub tag: Option<PrimitiveTag>,
    pub signed: bool,
    pub flags: ContainerFlags,
    pub encryption_kind: Option<EncryptionKind>,
    /// Meaningful iff `!flags.mixed_stride`: the stride shared by every
    /// logical record.
    pub stride_value: u32,
    pub n_records: u32,
    pub uncompressed_len: u32,
    pub compressed_len: u32,
    pub crc: u64,
    pub stride_uncompressed_len: u32,
    pub stride_compressed_len: u32,
    pub stride_crc: u64,
    /// Per-block stream offset (spec C1): byte offset of this container's
    /// data blob, relative to the start of the block body, filled in by
    /// `Block::finalize` so a reader can seek directly to one container
    /// without buffering the whole block (spec §4.2).
    pub data_offset: u64,
    pub stride_offset: u64,
}

/// A sub-stream container in its working (decompressed, decrypted) state.
/// `Container::finalize` produces the on-disk byte payloads and a filled-in
/// [`ContainerHeader`]; `Container::from_parts` is the read-side inverse.
pub struct Container {
    header: ContainerHeader,
    data: Vec<u8>,
    strides: Vec<u32>,
    finalized_data: Option<Vec<u8>>,
    finalized_strides: Option<Vec<u8>>,
}

impl Container {
    pub fn new(global_id: u32, tag: PrimitiveTag) -> Self {
        Container {
            header: ContainerHeader {
                global_id,
                tag: Some(tag),
                signed: tag.is_signed(),
                ..Default::default()
            },
            data: Vec::new(),
            strides: Vec::new(),
            finalized_data: None,
            finalized_strides: None,
        }
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn n_records(&self) -> u32 {
        self.header.n_records
    }

    pub fn set_type(&mut self, tag: PrimitiveTag, signed: bool) {
        self.header.tag = Some(tag);
        self.header.signed = signed;
    }

    /// Appends one scalar value as one logical record of stride 1. Most
    /// fixed-cardinality columns (POS, a Number=1 INFO field, ...) only ever
    /// call this.
    pub fn append(&mut self, value: Value) -> Result<()> {
        let tag = self.header.tag.ok_or_else(|| {
            err(ErrorKind::TypeViolation, "container has no primitive tag set")
        })?;
        if value.tag() != tag {
            return Err(err(
                ErrorKind::TypeViolation,
                format!("container tag is {tag:?}, appended value is {:?}", value.tag()),
            ));
        }
        self.data.extend_from_slice(&value.to_le_bytes());
        self.strides.push(1);
        self.header.n_records += 1;
        Ok(())
    }

    /// Appends raw, already-encoded bytes for a single logical record
    /// without interpreting them as a `Value` (used by `Struct` containers
    /// and by callers, such as the genotype encoder, that pack multiple
    /// primitive elements into one record's bytes themselves). The record's
    /// stride must be supplied via [`Container::append_stride`].
    pub fn append_bytes(&mut self, buf: &[u8]) {
        self.data.extend_from_slice(buf);
        self.header.n_records += 1;
    }

    /// Records the per-record element count for a record populated through
    /// [`Container::append_bytes`].
    pub fn append_stride(&mut self, len: u32) {
        self.strides.push(len);
    }

    /// Appends a vector-valued record (e.g. a Number=A INFO field) in one
    /// call: pushes every element's bytes and records the stride.
    pub fn append_vector(&mut self, values: &[Value]) -> Result<()> {
        let tag = self.header.tag.ok_or_else(|| {
            err(ErrorKind::TypeViolation, "container has no primitive tag set")
        })?;
        for v in values {
            if v.tag() != tag {
                return Err(err(
                    ErrorKind::TypeViolation,
                    format!("container tag is {tag:?}, appended value is {:?}", v.tag()),
                ));
            }
            self.data.extend_from_slice(&v.to_le_bytes());
        }
        self.strides.push(values.len() as u32);
        self.header.n_records += 1;
        Ok(())
    }

    /// Scans the populated data buffer; if every element equals the first,
    /// collapses the buffer to that single element and sets the uniform
    /// flag. Only applicable to fixed-stride-1 containers (every record
    /// contributes exactly one element) -- the common case for scalar
    /// columns like QUAL or a constant FILTER. Containers with a mixed
    /// stride, or a fixed stride other than 1, are left untouched: "one
    /// element broadcast to N records" only has an unambiguous meaning when
    /// there is exactly one element per record to begin with.
    pub fn mark_uniform_if_constant(&mut self) {
        if self.header.n_records == 0 {
            return;
        }
        if !self.strides.iter().all(|&s| s == 1) {
            return;
        }
        let Some(tag) = self.header.tag else { return };
        let Some(width) = tag.width() else { return };
        if self.data.len() != width * self.header.n_records as usize {
            return;
        }
        let first = &self.data[..width];
        if self.data.chunks(width).all(|c| c == first) {
            self.data.truncate(width);
            self.header.flags.uniform = true;
        }
    }

    /// Determines whether the stride sequence is a single repeated value
    /// (spec: stride is a plain int unless it varies across records, in
    /// which case it becomes MIXED and gets its own sub-stream).
    fn resolve_stride(&mut self) {
        if self.strides.is_empty() {
            self.header.flags.mixed_stride = false;
            self.header.stride_value = 0;
            return;
        }
        let first = self.strides[0];
        if self.strides.iter().all(|&s| s == first) {
            self.header.flags.mixed_stride = false;
            self.header.stride_value = first;
        } else {
            self.header.flags.mixed_stride = true;
        }
    }

    /// Narrows the stride sub-stream to the smallest unsigned width that
    /// fits every value, mirroring the length-prefix convention used
    /// elsewhere in the format (spec §6).
    fn encode_strides(&self) -> Vec<u8> {
        let max = self.strides.iter().copied().max().unwrap_or(0);
        let mut out = Vec::new();
        if max <= u8::MAX as u32 {
            out.extend(self.strides.iter().map(|&s| s as u8));
        } else if max <= u16::MAX as u32 {
            for &s in &self.strides {
                out.extend_from_slice(&(s as u16).to_le_bytes());
            }
        } else {
            for &s in &self.strides {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
        out
    }

    fn stride_width(n_strides: usize, encoded_len: usize) -> usize {
        if n_strides == 0 {
            return 1;
        }
        encoded_len / n_strides
    }

    fn decode_strides(bytes: &[u8], n_records: usize) -> Result<Vec<u32>> {
        if n_records == 0 {
            return Ok(Vec::new());
        }
        let width = Self::stride_width(n_records, bytes.len());
        if width * n_records != bytes.len() {
            return Err(err(
                ErrorKind::Truncated,
                "stride sub-stream length is not a multiple of the record count",
            ));
        }
        let mut out = Vec::with_capacity(n_records);
        match width {
            1 => out.extend(bytes.iter().map(|&b| b as u32)),
            2 => {
                for chunk in bytes.chunks_exact(2) {
                    out.push(u16::from_le_bytes(chunk.try_into().unwrap()) as u32);
                }
            }
            4 => {
                for chunk in bytes.chunks_exact(4) {
                    out.push(u32::from_le_bytes(chunk.try_into().unwrap()));
                }
            }
            other => {
                return Err(err(
                    ErrorKind::Unsupported,
                    format!("unsupported stride element width {other}"),
                ))
            }
        }
        Ok(out)
    }

    /// If the container's tag is a signed integer width, rewrites it to the
    /// narrowest signed width that represents every stored value while
    /// keeping the sentinel set closed: a value equal to the source width's
    /// `missing`/`eov` sentinel is remapped to the destination width's
    /// sentinel of the same kind, rather than being treated as an ordinary
    /// value that happens to need fewer bits.
    pub fn narrow_signed_if_possible(&mut self) -> Result<()> {
        let Some(tag) = self.header.tag else { return Ok(()) };
        if !tag.is_signed() || matches!(tag, PrimitiveTag::F32 | PrimitiveTag::F64) {
            return Ok(());
        }
        let Some(width) = tag.width() else { return Ok(()) };
        if self.data.len() % width != 0 {
            return Err(err(
                ErrorKind::Integrity,
                "signed container data length is not a multiple of its element width",
            ));
        }
        let src_sentinels = crate::primitive::sentinels_for(tag);
        let values: Vec<i64> = self
            .data
            .chunks(width)
            .map(|c| sign_extend(c))
            .collect::<Result<_>>()?;

        let candidates = [PrimitiveTag::I8, PrimitiveTag::I16, PrimitiveTag::I32, PrimitiveTag::I64];
        for &candidate in &candidates {
            let cand_width = candidate.width().unwrap();
            if cand_width >= width {
                break;
            }
            let cand_sentinels = crate::primitive::sentinels_for(candidate).unwrap();
            let (lo, hi) = signed_range(cand_width);
            // Reserve the two smallest values of the candidate width for
            // missing/eov; an ordinary value may not collide with them.
            let usable_lo = lo + 2;
            let fits = values.iter().all(|&v| {
                if let Some(s) = src_sentinels {
                    if v == s.missing || v == s.eov {
                        return true;
                    }
                }
                v >= usable_lo && v <= hi
            });
            if !fits {
                continue;
            }
            let mut narrowed = Vec::with_capacity(values.len() * cand_width);
            for &v in &values {
                let out_v = if let Some(s) = src_sentinels {
                    if v == s.missing {
                        cand_sentinels.missing
                    } else if v == s.eov {
                        cand_sentinels.eov
                    } else {
                        v
                    }
                } else {
                    v
                };
                narrowed.extend_from_slice(&out_v.to_le_bytes()[..cand_width]);
            }
            self.data = narrowed;
            self.header.tag = Some(candidate);
            return Ok(());
        }
        Ok(())
    }

    /// Compresses (and optionally encrypts) the working buffers, filling in
    /// the header's length/crc fields. Must be called before the container
    /// is serialized to a block.
    pub fn finalize(
        &mut self,
        codec: &dyn ByteCodec,
        level: u32,
        encryption: Option<(&[u8; KEY_LEN], [u8; 12])>,
    ) -> Result<()> {
        self.resolve_stride();

        self.header.uncompressed_len = self.data.len() as u32;
        self.header.crc = digest64(&self.data);
        let mut data_bytes = codec.compress(level, &self.data)?;
        self.header.compressed_len = data_bytes.len() as u32;

        let mut stride_bytes = if self.header.flags.mixed_stride {
            let encoded = self.encode_strides();
            self.header.stride_uncompressed_len = encoded.len() as u32;
            self.header.stride_crc = digest64(&encoded);
            let compressed = codec.compress(level, &encoded)?;
            self.header.stride_compressed_len = compressed.len() as u32;
            Some(compressed)
        } else {
            None
        };

        if let Some((key, nonce)) = encryption {
            let aad = self.aad();
            data_bytes = aead::seal(key, nonce, &aad, data_bytes)?;
            if let Some(sb) = stride_bytes.take() {
                stride_bytes = Some(aead::seal(key, nonce, &aad, sb)?);
            }
            self.header.flags.encrypted = true;
            self.header.encryption_kind = Some(EncryptionKind::Aes256Gcm);
        }

        self.finalized_data = Some(data_bytes);
        self.finalized_strides = stride_bytes;
        Ok(())
    }

    fn aad(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(8);
        v.extend_from_slice(&self.header.global_id.to_le_bytes());
        v.extend_from_slice(&self.header.n_records.to_le_bytes());
        v
    }

    pub fn finalized_data(&self) -> Option<&[u8]> {
        self.finalized_data.as_deref()
    }

    pub fn finalized_strides(&self) -> Option<&[u8]> {
        self.finalized_strides.as_deref()
    }

    /// Rebuilds a working container from its on-disk parts: a header read
    /// off the block footer plus the (still compressed/encrypted) payload
    /// bytes for data and, if mixed-stride, strides.
    pub fn from_parts(
        header: ContainerHeader,
        data_bytes: Vec<u8>,
        stride_bytes: Option<Vec<u8>>,
        codec: &dyn ByteCodec,
        key: Option<&[u8; KEY_LEN]>,
        nonce: Option<[u8; 12]>,
    ) -> Result<Self> {
        let mut data_bytes = data_bytes;
        let mut stride_bytes = stride_bytes;

        if header.flags.encrypted {
            let (key, nonce) = match (key, nonce) {
                (Some(k), Some(n)) => (k, n),
                _ => {
                    return Err(err(
                        ErrorKind::Integrity,
                        "container is encrypted but no key/nonce was supplied",
                    ))
                }
            };
            let aad = {
                let mut v = Vec::with_capacity(8);
                v.extend_from_slice(&header.global_id.to_le_bytes());
                v.extend_from_slice(&header.n_records.to_le_bytes());
                v
            };
            data_bytes = aead::open_to_vec(key, nonce, &aad, data_bytes)?;
            if let Some(sb) = stride_bytes.take() {
                stride_bytes = Some(aead::open_to_vec(key, nonce, &aad, sb)?);
            }
        }

        let data = codec.decompress(&data_bytes, header.uncompressed_len as usize)?;
        if digest64(&data) != header.crc {
            return Err(err(ErrorKind::Integrity, "container data crc mismatch"));
        }

        let strides = if header.flags.mixed_stride {
            let raw_bytes = stride_bytes.ok_or_else(|| {
                err(ErrorKind::Truncated, "mixed-stride container is missing its stride stream")
            })?;
            let decoded = codec.decompress(&raw_bytes, header.stride_uncompressed_len as usize)?;
            if digest64(&decoded) != header.stride_crc {
                return Err(err(ErrorKind::Integrity, "container stride crc mismatch"));
            }
            Self::decode_strides(&decoded, header.n_records as usize)?
        } else if header.flags.uniform {
            vec![1; header.n_records as usize]
        } else {
            vec![header.stride_value; header.n_records as usize]
        };

        Ok(Container {
            header,
            data,
            strides,
            finalized_data: None,
            finalized_strides: None,
        })
    }

    /// Logical per-record strides, expanded regardless of how they were
    /// stored (fixed, mixed, or collapsed by uniformity).
    pub fn strides(&self) -> &[u32] {
        &self.strides
    }

    /// The working (decompressed, decrypted) data buffer. If `uniform` is
    /// set this holds exactly one element; callers must broadcast it across
    /// `n_records` themselves.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn values(&self) -> Result<Vec<Value>> {
        let tag = self.header.tag.ok_or_else(|| {
            err(ErrorKind::TypeViolation, "container has no primitive tag set")
        })?;
        let width = tag.width().ok_or_else(|| {
            err(ErrorKind::TypeViolation, "Struct containers have no scalar Value iteration")
        })?;
        if self.header.flags.uniform {
            let v = Value::from_le_bytes(tag, &self.data[..width])?;
            return Ok(vec![v; self.header.n_records as usize]);
        }
        self.data
            .chunks(width)
            .map(|c| Value::from_le_bytes(tag, c))
            .collect()
    }
}

fn sign_extend(bytes: &[u8]) -> Result<i64> {
    Ok(match bytes.len() {
        1 => bytes[0] as i8 as i64,
        2 => i16::from_le_bytes(bytes.try_into().unwrap()) as i64,
        4 => i32::from_le_bytes(bytes.try_into().unwrap()) as i64,
        8 => i64::from_le_bytes(bytes.try_into().unwrap()),
        other => {
            return Err(err(
                ErrorKind::Unsupported,
                format!("unsupported signed element width {other}"),
            ))
        }
    })
}

fn signed_range(width: usize) -> (i64, i64) {
    match width {
        1 => (i8::MIN as i64, i8::MAX as i64),
        2 => (i16::MIN as i64, i16::MAX as i64),
        4 => (i32::MIN as i64, i32::MAX as i64),
        8 => (i64::MIN, i64::MAX),
        _ => unreachable!("signed_range only called with a primitive width"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Deflate;

    #[test]
    fn uniform_collapse_round_trip() {
        let mut c = Container::new(1, PrimitiveTag::I32);
        for _ in 0..10 {
            c.append(Value::I32(42)).unwrap();
        }
        c.mark_uniform_if_constant();
        assert!(c.header().flags.uniform);
        assert_eq!(c.data().len(), 4);

        c.finalize(&Deflate, 6, None).unwrap();
        let header = c.header().clone();
        let rebuilt = Container::from_parts(
            header,
            c.finalized_data().unwrap().to_vec(),
            c.finalized_strides().map(|s| s.to_vec()),
            &Deflate,
            None,
            None,
        )
        .unwrap();
        let values = rebuilt.values().unwrap();
        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|v| *v == Value::I32(42)));
    }

    #[test]
    fn mixed_stride_round_trip() {
        let mut c = Container::new(2, PrimitiveTag::U16);
        c.append_vector(&[Value::U16(1), Value::U16(2)]).unwrap();
        c.append_vector(&[Value::U16(3)]).unwrap();
        c.append_vector(&[Value::U16(4), Value::U16(5), Value::U16(6)]).unwrap();

        c.finalize(&Deflate, 6, None).unwrap();
        assert!(c.header().flags.mixed_stride);

        let header = c.header().clone();
        let rebuilt = Container::from_parts(
            header,
            c.finalized_data().unwrap().to_vec(),
            c.finalized_strides().map(|s| s.to_vec()),
            &Deflate,
            None,
            None,
        )
        .unwrap();
        assert_eq!(rebuilt.strides(), &[2, 1, 3]);
    }

    #[test]
    fn encrypted_round_trip_requires_key() {
        let mut c = Container::new(3, PrimitiveTag::U8);
        c.append(Value::U8(9)).unwrap();
        c.append(Value::U8(10)).unwrap();
        let key = [5u8; KEY_LEN];
        let nonce = [9u8; 12];
        c.finalize(&Deflate, 6, Some((&key, nonce))).unwrap();

        let header = c.header().clone();
        let data_bytes = c.finalized_data().unwrap().to_vec();

        let missing_key = Container::from_parts(header.clone(), data_bytes.clone(), None, &Deflate, None, None);
        assert!(missing_key.is_err());

        let rebuilt =
            Container::from_parts(header, data_bytes, None, &Deflate, Some(&key), Some(nonce)).unwrap();
        assert_eq!(rebuilt.values().unwrap(), vec![Value::U8(9), Value::U8(10)]);
    }

    #[test]
    fn narrow_signed_preserves_sentinels() {
        let mut c = Container::new(4, PrimitiveTag::I32);
        let sentinels = crate::primitive::sentinels_for(PrimitiveTag::I32).unwrap();
        c.append(Value::I32(sentinels.missing as i32)).unwrap();
        c.append(Value::I32(sentinels.eov as i32)).unwrap();
        c.append(Value::I32(5)).unwrap();
        c.narrow_signed_if_possible().unwrap();
        assert_eq!(c.header().tag, Some(PrimitiveTag::I8));
        let i8_sentinels = crate::primitive::sentinels_for(PrimitiveTag::I8).unwrap();
        assert_eq!(c.data()[0] as i8 as i64, i8_sentinels.missing);
        assert_eq!(c.data()[1] as i8 as i64, i8_sentinels.eov);
        assert_eq!(c.data()[2] as i8 as i64, 5);
    }

    #[test]
    fn narrow_signed_skips_when_value_out_of_range() {
        let mut c = Container::new(5, PrimitiveTag::I32);
        c.append(Value::I32(100_000)).unwrap();
        c.narrow_signed_if_possible().unwrap();
        assert_eq!(c.header().tag, Some(PrimitiveTag::I32));
    }
}
