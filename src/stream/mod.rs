//! 字节流层：带位置跟踪的基本类型读写
//!
//! - [`BinaryWriter`] — 先写内存，累计字节超过阈值后透明地溢出到临时文件；
//!   溢出前后 `position()` 语义一致，产出的字节完全相同
//! - [`BinaryReader`] — 读内存缓冲（共享 `Bytes`）或文件，支持按绝对偏移定位
//!
//! 所有整数均为大端序；浮点数按位重解释后按整数写入。

pub mod utf;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Cursor, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt};
use bytes::Bytes;
use tempfile::NamedTempFile;

use crate::common::{DataFileError, Result};

// ── 写入端 ────────────────────────────────────────────────────────────────────

enum Backing {
    Memory(Vec<u8>),
    File(BufWriter<NamedTempFile>),
}

/// 写入完成后的产物
#[derive(Debug)]
pub enum Finished {
    Memory(Bytes),
    /// 已落盘但尚未 persist 的临时文件
    File(NamedTempFile),
}

pub struct BinaryWriter {
    backing:      Backing,
    position:     u64,
    memory_limit: u64,
    spill_dir:    PathBuf,
    scratch:      Vec<u8>,
}

impl BinaryWriter {
    /// `memory_limit` 为字节数；超过后溢出到 `spill_dir` 下的临时文件
    pub fn new(memory_limit: u64, spill_dir: impl Into<PathBuf>) -> Self {
        Self {
            backing: Backing::Memory(Vec::new()),
            position: 0,
            memory_limit,
            spill_dir: spill_dir.into(),
            scratch: Vec::new(),
        }
    }

    /// 永不溢出的纯内存写入端（整行先编码到这里）
    pub fn memory() -> Self {
        Self::new(u64::MAX, PathBuf::new())
    }

    /// 内存写入端已写出的字节；溢出后为 None
    pub fn written(&self) -> Option<&[u8]> {
        match &self.backing {
            Backing::Memory(v) => Some(v),
            Backing::File(_)   => None,
        }
    }

    /// 清空内存写入端，位置归零；文件写入端不受影响
    pub(crate) fn clear(&mut self) {
        if let Backing::Memory(v) = &mut self.backing {
            v.clear();
            self.position = 0;
        }
    }

    /// 当前写入位置（= 已写出的总字节数）
    pub fn position(&self) -> u64 { self.position }

    pub fn is_file_backed(&self) -> bool {
        matches!(self.backing, Backing::File(_))
    }

    /// 溢出后的临时文件路径
    pub fn spill_path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(w) => Some(w.get_ref().path()),
            Backing::Memory(_) => None,
        }
    }

    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        match &mut self.backing {
            Backing::Memory(v) => v.extend_from_slice(buf),
            Backing::File(w)   => w.write_all(buf)?,
        }
        self.position += buf.len() as u64;
        if self.position > self.memory_limit && !self.is_file_backed() {
            self.spill()?;
        }
        Ok(())
    }

    pub fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_bytes(&[v as u8])
    }

    pub fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_bytes(&v.to_bits().to_be_bytes())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_bytes(&v.to_bits().to_be_bytes())
    }

    /// u16 长度前缀 + 编码字节，见 [`utf`]
    pub fn write_utf(&mut self, s: &str) -> Result<()> {
        let mut buf = std::mem::take(&mut self.scratch);
        buf.clear();
        let res = utf::encode_into(s, &mut buf).and_then(|_| self.write_bytes(&buf));
        self.scratch = buf;
        res
    }

    /// 覆盖写已写区域（头部二次提交用），不改变当前位置
    pub fn overwrite_at(&mut self, offset: u64, buf: &[u8]) -> Result<()> {
        let end = offset + buf.len() as u64;
        if end > self.position {
            return Err(DataFileError::Framing(format!(
                "overwrite [{offset}, {end}) runs past written length {}", self.position
            )));
        }
        match &mut self.backing {
            Backing::Memory(v) => {
                v[offset as usize..end as usize].copy_from_slice(buf);
            }
            Backing::File(w) => {
                w.seek(SeekFrom::Start(offset))?;
                w.write_all(buf)?;
                w.seek(SeekFrom::Start(self.position))?;
            }
        }
        Ok(())
    }

    pub fn finish(self) -> Result<Finished> {
        match self.backing {
            Backing::Memory(v) => Ok(Finished::Memory(Bytes::from(v))),
            Backing::File(w)   => {
                let file = w.into_inner().map_err(|e| DataFileError::Io(e.into_error()))?;
                file.as_file().sync_all()?;
                Ok(Finished::File(file))
            }
        }
    }

    fn spill(&mut self) -> Result<()> {
        let tmp = tempfile::Builder::new()
            .prefix(".datafile-")
            .suffix(".spill")
            .tempfile_in(&self.spill_dir)?;
        let mut w = BufWriter::with_capacity(64 * 1024, tmp);
        if let Backing::Memory(v) = &self.backing {
            w.write_all(v)?;
        }
        log::debug!(
            "data stream spilled to {} at {} bytes (limit {})",
            w.get_ref().path().display(), self.position, self.memory_limit
        );
        self.backing = Backing::File(w);
        Ok(())
    }
}

// ── 读取端 ────────────────────────────────────────────────────────────────────

pub(crate) enum Source {
    Memory(Cursor<Bytes>),
    File(BufReader<File>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Memory(c) => c.read(buf),
            Self::File(f)   => f.read(buf),
        }
    }
}

impl Seek for Source {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Self::Memory(c) => c.seek(pos),
            Self::File(f)   => f.seek(pos),
        }
    }
}

pub struct BinaryReader {
    src:      Source,
    position: u64,
    len:      u64,
}

impl BinaryReader {
    pub fn from_bytes(data: Bytes) -> Self {
        let len = data.len() as u64;
        Self { src: Source::Memory(Cursor::new(data)), position: 0, len }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let f   = File::open(path)?;
        let len = f.metadata()?.len();
        Ok(Self { src: Source::File(BufReader::with_capacity(64 * 1024, f)), position: 0, len })
    }

    pub fn position(&self) -> u64 { self.position }
    pub fn len(&self)      -> u64 { self.len }
    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(DataFileError::Framing(format!(
                "offset {offset} beyond end of stream ({} bytes)", self.len
            )));
        }
        self.src.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        Ok(())
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.src.read_exact(buf).map_err(DataFileError::from_read)?;
        self.position += buf.len() as u64;
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.src.read_u8().map_err(DataFileError::from_read)?;
        self.position += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let v = self.src.read_u16::<BigEndian>().map_err(DataFileError::from_read)?;
        self.position += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.src.read_u32::<BigEndian>().map_err(DataFileError::from_read)?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let v = self.src.read_i32::<BigEndian>().map_err(DataFileError::from_read)?;
        self.position += 4;
        Ok(v)
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        let v = self.src.read_i64::<BigEndian>().map_err(DataFileError::from_read)?;
        self.position += 8;
        Ok(v)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_i64()? as u64))
    }

    pub fn read_utf(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        if self.position + len as u64 > self.len {
            return Err(DataFileError::Framing(format!(
                "string length {len} at offset {} runs past end of stream", self.position - 2
            )));
        }
        let mut buf = vec![0u8; len];
        self.read_exact(&mut buf)?;
        utf::decode(&buf)
    }

    /// 读取 `[u32 长度][字节]` 块
    pub fn read_block(&mut self) -> Result<Vec<u8>> {
        let len = self.read_u32()? as u64;
        if self.position + len > self.len {
            return Err(DataFileError::Framing(format!(
                "block length {len} at offset {} runs past end of stream", self.position - 4
            )));
        }
        let mut buf = vec![0u8; len as usize];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// 给 `Vec<u8>` 追加大端基本类型（头部在内存里拼好再整体写出）
pub(crate) trait PutBigEndian {
    fn put_bool(&mut self, v: bool);
    fn put_u8(&mut self, v: u8);
    fn put_i64(&mut self, v: i64);
}

impl PutBigEndian for Vec<u8> {
    fn put_bool(&mut self, v: bool) { self.push(v as u8); }
    fn put_u8(&mut self, v: u8)     { self.push(v); }
    fn put_i64(&mut self, v: i64)   { self.extend_from_slice(&v.to_be_bytes()); }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_sample(w: &mut BinaryWriter) {
        w.write_bool(true).unwrap();
        w.write_i32(i32::MIN).unwrap();
        w.write_i64(-2).unwrap();
        w.write_f32(1.25).unwrap();
        w.write_f64(-0.5).unwrap();
        w.write_utf("Zoë").unwrap();
        w.write_u16(0xBEEF).unwrap();
    }

    fn read_sample(r: &mut BinaryReader) {
        assert!(r.read_bool().unwrap());
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.read_i64().unwrap(), -2);
        assert_eq!(r.read_f32().unwrap(), 1.25);
        assert_eq!(r.read_f64().unwrap(), -0.5);
        assert_eq!(r.read_utf().unwrap(), "Zoë");
        assert_eq!(r.read_u16().unwrap(), 0xBEEF);
    }

    #[test]
    fn big_endian_layout() {
        let dir = tempdir().unwrap();
        let mut w = BinaryWriter::new(1024, dir.path());
        w.write_i32(1).unwrap();
        w.write_i64(0x0102030405060708).unwrap();
        assert_eq!(w.position(), 12);
        let Finished::Memory(b) = w.finish().unwrap() else { panic!("expected memory") };
        assert_eq!(&b[..], &[0, 0, 0, 1, 1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn memory_round_trip_tracks_position() {
        let dir = tempdir().unwrap();
        let mut w = BinaryWriter::new(1 << 20, dir.path());
        write_sample(&mut w);
        let written = w.position();
        assert!(!w.is_file_backed());

        let Finished::Memory(b) = w.finish().unwrap() else { panic!("expected memory") };
        let mut r = BinaryReader::from_bytes(b);
        read_sample(&mut r);
        assert_eq!(r.position(), written);
    }

    #[test]
    fn spill_is_invisible_to_callers() {
        let dir = tempdir().unwrap();

        let mut mem = BinaryWriter::new(1 << 20, dir.path());
        let mut disk = BinaryWriter::new(8, dir.path());
        write_sample(&mut mem);
        write_sample(&mut disk);
        assert!(!mem.is_file_backed());
        assert!(disk.is_file_backed());
        assert_eq!(mem.position(), disk.position());

        mem.overwrite_at(1, &7i32.to_be_bytes()).unwrap();
        disk.overwrite_at(1, &7i32.to_be_bytes()).unwrap();
        assert_eq!(mem.position(), disk.position());

        let Finished::Memory(a) = mem.finish().unwrap() else { panic!("expected memory") };
        let Finished::File(f) = disk.finish().unwrap() else { panic!("expected file") };
        let b = std::fs::read(f.path()).unwrap();
        assert_eq!(&a[..], &b[..]);
    }

    #[test]
    fn dropped_spill_file_is_removed() {
        let dir = tempdir().unwrap();
        let mut w = BinaryWriter::new(0, dir.path());
        w.write_i64(1).unwrap();
        let path = w.spill_path().unwrap().to_path_buf();
        assert!(path.exists());
        drop(w);
        assert!(!path.exists());
    }

    #[test]
    fn scratch_writer_clears_between_uses() {
        let mut w = BinaryWriter::memory();
        w.write_i32(7).unwrap();
        w.write_utf("ab").unwrap();
        assert_eq!(w.written().unwrap(), &[0, 0, 0, 7, 0, 2, b'a', b'b']);

        w.clear();
        assert_eq!(w.position(), 0);
        assert_eq!(w.written().unwrap(), &[] as &[u8]);

        // 编码失败不留下半截字节
        assert!(w.write_utf(&"x".repeat(70_000)).is_err());
        assert_eq!(w.position(), 0);
        assert!(!w.is_file_backed());
    }

    #[test]
    fn overwrite_past_end_is_rejected() {
        let dir = tempdir().unwrap();
        let mut w = BinaryWriter::new(1024, dir.path());
        w.write_i32(0).unwrap();
        assert!(w.overwrite_at(2, &[0, 0, 0]).is_err());
    }

    #[test]
    fn truncated_read_is_framing_error() {
        let mut r = BinaryReader::from_bytes(Bytes::from_static(&[0, 0, 1]));
        assert!(matches!(r.read_i32(), Err(DataFileError::Framing(_))));

        // 长度前缀声称 10 字节，实际只有 2 字节
        let mut r = BinaryReader::from_bytes(Bytes::from_static(&[0, 10, b'h', b'i']));
        assert!(matches!(r.read_utf(), Err(DataFileError::Framing(_))));
    }

    #[test]
    fn file_reader_seeks() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("s.bin");
        std::fs::write(&path, [0u8, 0, 0, 5, 0, 0, 0, 9]).unwrap();
        let mut r = BinaryReader::open(&path).unwrap();
        r.seek_to(4).unwrap();
        assert_eq!(r.read_i32().unwrap(), 9);
        r.seek_to(0).unwrap();
        assert_eq!(r.read_i32().unwrap(), 5);
        assert_eq!(r.position(), 4);
        assert!(r.seek_to(9).is_err());
    }
}
