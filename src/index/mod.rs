//! 行索引：稀疏 行号 → 字节偏移 检查点
//!
//! 写入时每隔 `index_interval` 行记录一次 `(row_number, byte_offset)`，
//! 关闭时作为连续块写在行流之后：
//!
//! ```text
//! [row_number i64][byte_offset i64] × N
//! ```
//!
//! 索引只给出近似定位；行是变长的（String 列），精确定位仍需从最近的检查点
//! 逐行解码。

use crate::common::{ByteOffset, DataFileError, Result, RowNumber};
use crate::stream::{BinaryReader, BinaryWriter};

/// 单条索引记录的字节数
pub const INDEX_ENTRY_LEN: i64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub row_number: RowNumber,
    pub offset:     ByteOffset,
}

#[derive(Debug, Default, Clone)]
pub struct RowIndex {
    /// 行号严格递增；偏移不减（无逐行列时每行 0 字节）
    entries: Vec<IndexEntry>,
}

impl RowIndex {
    pub fn add(&mut self, row_number: RowNumber, offset: ByteOffset) -> Result<()> {
        if let Some(last) = self.entries.last() {
            if row_number <= last.row_number || offset < last.offset {
                return Err(DataFileError::Framing(format!(
                    "index entry ({row_number}, {offset}) does not advance past ({}, {})",
                    last.row_number, last.offset
                )));
            }
        }
        self.entries.push(IndexEntry { row_number, offset });
        Ok(())
    }

    /// row_number ≤ row 的最大检查点（二分查找）
    pub fn find(&self, row: RowNumber) -> Option<IndexEntry> {
        let pos = self.entries.partition_point(|e| e.row_number <= row);
        if pos == 0 { None } else { self.entries.get(pos - 1).copied() }
    }

    pub fn entries(&self) -> &[IndexEntry] { &self.entries }
    pub fn len(&self)      -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool  { self.entries.is_empty() }

    pub fn write_to(&self, out: &mut BinaryWriter) -> Result<()> {
        for e in &self.entries {
            out.write_i64(e.row_number)?;
            out.write_i64(e.offset)?;
        }
        Ok(())
    }

    /// 读取 `[start, end)` 区间内的索引块
    pub fn read_from(r: &mut BinaryReader, start: ByteOffset, end: ByteOffset) -> Result<Self> {
        let span = end - start;
        if span < 0 || span % INDEX_ENTRY_LEN != 0 {
            return Err(DataFileError::Framing(format!(
                "index block [{start}, {end}) is not a whole number of entries"
            )));
        }
        r.seek_to(start as u64)?;
        let mut index = Self::default();
        for _ in 0..span / INDEX_ENTRY_LEN {
            let row_number = r.read_i64()?;
            let offset     = r.read_i64()?;
            index.add(row_number, offset)?;
        }
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Finished;

    fn sample() -> RowIndex {
        let mut idx = RowIndex::default();
        idx.add(0, 100).unwrap();
        idx.add(10, 260).unwrap();
        idx.add(20, 415).unwrap();
        idx
    }

    #[test]
    fn find_nearest_checkpoint() {
        let idx = sample();
        assert_eq!(idx.find(0).unwrap().offset, 100);
        assert_eq!(idx.find(9).unwrap().row_number, 0);
        assert_eq!(idx.find(10).unwrap().offset, 260);
        assert_eq!(idx.find(15).unwrap().row_number, 10);
        assert_eq!(idx.find(1000).unwrap().row_number, 20);
        assert_eq!(idx.find(-1), None);
        assert_eq!(RowIndex::default().find(3), None);
    }

    #[test]
    fn rejects_non_monotonic_entries() {
        let mut idx = sample();
        assert!(idx.add(20, 500).is_err());
        assert!(idx.add(30, 414).is_err());
        assert!(idx.add(30, 415).is_ok());
        assert_eq!(idx.len(), 4);
    }

    #[test]
    fn block_round_trip() {
        let idx = sample();
        let mut w = BinaryWriter::new(1 << 20, std::env::temp_dir());
        w.write_bytes(&[0xAA; 4]).unwrap();
        idx.write_to(&mut w).unwrap();
        let end = w.position() as i64;
        let Finished::Memory(b) = w.finish().unwrap() else { panic!("expected memory") };

        let mut r = BinaryReader::from_bytes(b);
        let back = RowIndex::read_from(&mut r, 4, end).unwrap();
        assert_eq!(back.entries(), idx.entries());
        assert!(RowIndex::read_from(&mut r, 4, end - 3).is_err());
    }
}
