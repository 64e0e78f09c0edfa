//! 数据句柄：写完成后的不可变容器引用
//!
//! 句柄可以 clone 后交给任意多个 [`DataReader`](crate::reader::DataReader)，
//! 每个读取器有独立的游标。内存句柄共享同一块 `Bytes`，不复制数据。

use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::common::Result;
use crate::header::Header;
use crate::stream::BinaryReader;

#[derive(Debug, Clone)]
enum Backing {
    Memory(Bytes),
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct DataHandle {
    backing: Backing,
    header:  Header,
    size:    u64,
}

impl DataHandle {
    pub(crate) fn memory(buf: Bytes, header: Header) -> Self {
        let size = buf.len() as u64;
        Self { backing: Backing::Memory(buf), header, size }
    }

    pub(crate) fn file(path: PathBuf, header: Header, size: u64) -> Self {
        Self { backing: Backing::File(path), header, size }
    }

    /// 打开磁盘上已有的容器（解析并校验头部）
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut r = BinaryReader::open(path)?;
        let header = Header::read_from(&mut r)?;
        header.validate(r.len())?;
        log::debug!("opened data handle {} ({} bytes)", path.display(), r.len());
        Ok(Self::file(path.to_path_buf(), header, r.len()))
    }

    /// 包装一块已有的容器字节
    pub fn from_bytes(buf: impl Into<Bytes>) -> Result<Self> {
        let buf = buf.into();
        let mut r = BinaryReader::from_bytes(buf.clone());
        let header = Header::read_from(&mut r)?;
        header.validate(r.len())?;
        Ok(Self::memory(buf, header))
    }

    pub fn is_memory_backed(&self) -> bool {
        matches!(self.backing, Backing::Memory(_))
    }

    /// 文件句柄的路径；内存句柄为 None
    pub fn filename(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File(p)   => Some(p),
            Backing::Memory(_) => None,
        }
    }

    pub fn size_bytes(&self) -> u64 { self.size }

    pub fn header(&self) -> &Header { &self.header }

    /// 内存句柄的完整容器字节
    pub fn buffer(&self) -> Option<&Bytes> {
        match &self.backing {
            Backing::Memory(b) => Some(b),
            Backing::File(_)   => None,
        }
    }

    /// 为一个新的读取器打开独立的字节流
    pub(crate) fn open_stream(&self) -> Result<BinaryReader> {
        match &self.backing {
            Backing::Memory(b) => Ok(BinaryReader::from_bytes(b.clone())),
            Backing::File(p)   => BinaryReader::open(p),
        }
    }
}
