//! Sink/source abstractions for the archive format, plus little-endian
//! primitive helpers layered on top.
//!
//! The `Reader`/`Writer` trait pair and the `Mem`/`File` implementations are
//! carried over from the teacher's `submerge-coldb::ioutil` more or less
//! verbatim: a block builder or the top-level writer is generic over
//! `impl Writer` so the same code path serialises to memory (for tests) or
//! to a file (in production), and a finished `Writer` can be turned into its
//! paired `Reader` without reopening anything (used right after a block is
//! written, to let tests read back what was just built).

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use tachyon_base::{err, Result};

pub trait Reader: Read + Seek + Send {
    fn try_clone_independent(&self) -> io::Result<Self>
    where
        Self: Sized;

    fn pos(&mut self) -> Result<i64> {
        Ok(self.stream_position()? as i64)
    }
}

pub trait Writer: Write + Seek + Send {
    type PairedReader: Reader;
    fn try_into_reader(self) -> io::Result<Self::PairedReader>;

    fn pos(&mut self) -> Result<i64> {
        Ok(self.stream_position()? as i64)
    }
}

// ---------------------------------------------------------------- MemReader

pub struct MemReader {
    mem: Cursor<Arc<[u8]>>,
}

impl MemReader {
    pub fn new(mem: Arc<[u8]>) -> Self {
        Self {
            mem: Cursor::new(mem),
        }
    }
}

impl From<Vec<u8>> for MemReader {
    fn from(vec: Vec<u8>) -> Self {
        let rc: Arc<[u8]> = Arc::from(vec);
        Self::new(rc)
    }
}

impl Read for MemReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.mem.read(buf)
    }
}

impl Seek for MemReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.mem.seek(pos)
    }
}

impl Reader for MemReader {
    fn try_clone_independent(&self) -> io::Result<Self> {
        let rc = self.mem.get_ref().clone();
        Ok(Self::new(rc))
    }
}

// ---------------------------------------------------------------- MemWriter

#[derive(Default)]
pub struct MemWriter {
    mem: Cursor<Vec<u8>>,
}

impl MemWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.mem.into_inner()
    }

    pub fn bytes(&self) -> &[u8] {
        self.mem.get_ref()
    }
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.mem.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.mem.flush()
    }
}

impl Seek for MemWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.mem.seek(pos)
    }
}

impl Writer for MemWriter {
    type PairedReader = MemReader;
    fn try_into_reader(self) -> io::Result<Self::PairedReader> {
        let mem = self.mem.into_inner();
        let rc: Arc<[u8]> = Arc::from(mem);
        Ok(MemReader {
            mem: Cursor::new(rc),
        })
    }
}

// --------------------------------------------------------------- FileReader

pub struct FileReader {
    file: BufReader<File>,
    path: PathBuf,
}

impl FileReader {
    pub fn open_existing(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path)?;
        Ok(Self {
            file: BufReader::new(file),
            path,
        })
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Seek for FileReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Reader for FileReader {
    fn try_clone_independent(&self) -> io::Result<Self> {
        FileReader::open_existing(&self.path)
    }
}

// --------------------------------------------------------------- FileWriter

pub struct FileWriter {
    file: BufWriter<File>,
    path: PathBuf,
}

impl FileWriter {
    pub fn create_new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_owned();
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file: BufWriter::new(file),
            path,
        })
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl Seek for FileWriter {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file.seek(pos)
    }
}

impl Writer for FileWriter {
    type PairedReader = FileReader;
    fn try_into_reader(self) -> io::Result<Self::PairedReader> {
        let Self { mut file, path } = self;
        file.flush()?;
        let file = file.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);
        FileReader::open_existing(path)
    }
}

// ------------------------------------------------------- LE primitive I/O

/// Length-of-smallest-unsigned-width prefix, per spec §6: "Strings are
/// length-prefixed (length in the smallest unsigned width that fits)."
fn write_len_prefix(w: &mut impl Write, len: usize) -> Result<()> {
    if len <= 0xff {
        w.write_all(&[0u8])?;
        w.write_all(&(len as u8).to_le_bytes())?;
    } else if len <= 0xffff {
        w.write_all(&[1u8])?;
        w.write_all(&(len as u16).to_le_bytes())?;
    } else if len <= 0xffff_ffff {
        w.write_all(&[2u8])?;
        w.write_all(&(len as u32).to_le_bytes())?;
    } else {
        w.write_all(&[3u8])?;
        w.write_all(&(len as u64).to_le_bytes())?;
    }
    Ok(())
}

fn read_len_prefix(r: &mut impl Read) -> Result<usize> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    Ok(match tag[0] {
        0 => {
            let mut b = [0u8; 1];
            r.read_exact(&mut b)?;
            b[0] as usize
        }
        1 => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b)?;
            u16::from_le_bytes(b) as usize
        }
        2 => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            u32::from_le_bytes(b) as usize
        }
        3 => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            u64::from_le_bytes(b) as usize
        }
        other => return Err(err(format!("bad length-prefix width tag {other}"))),
    })
}

/// Write-side little-endian helpers. Split from the read side (below) since
/// `MemReader`/`FileReader` are `Read`-only -- a single trait bounded on
/// `Read + Write` would never apply to them.
pub trait LeWriteExt: Write {
    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_all(&[v])?;
        Ok(())
    }
    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }
    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }
    fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }
    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }
    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }
    fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_all(&v.to_le_bytes())?;
        Ok(())
    }
    fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        write_len_prefix(self, buf.len())?;
        self.write_all(buf)?;
        Ok(())
    }
    fn write_str(&mut self, s: &str) -> Result<()> {
        self.write_bytes(s.as_bytes())
    }
}

impl<T: Write + ?Sized> LeWriteExt for T {}

pub trait LeReadExt: Read {
    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_exact(&mut b)?;
        Ok(b[0])
    }
    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }
    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
    fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }
    fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }
    fn read_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_exact(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }
    fn read_f32(&mut self) -> Result<f32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(f32::from_le_bytes(b))
    }
    fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = read_len_prefix(self)?;
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
    fn read_string(&mut self) -> Result<String> {
        let buf = self.read_bytes()?;
        String::from_utf8(buf).map_err(|e| err(format!("invalid utf8 string: {e}")))
    }
}

impl<T: Read + ?Sized> LeReadExt for T {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mem_round_trip_numbers() {
        let mut w = MemWriter::new();
        w.write_u32(42).unwrap();
        w.write_i64(-7).unwrap();
        w.write_str("hello").unwrap();
        let mut r = w.try_into_reader().unwrap();
        assert_eq!(r.read_u32().unwrap(), 42);
        assert_eq!(r.read_i64().unwrap(), -7);
        assert_eq!(r.read_string().unwrap(), "hello");
    }

    #[test]
    fn len_prefix_picks_narrowest_width() {
        let mut w = MemWriter::new();
        w.write_bytes(&[0u8; 3]).unwrap();
        w.write_bytes(&[0u8; 300]).unwrap();
        let mut r = w.try_into_reader().unwrap();
        assert_eq!(r.read_bytes().unwrap().len(), 3);
        assert_eq!(r.read_bytes().unwrap().len(), 300);
    }
}
