//! 容器头部
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │ file_kind            u8   0=data 1=view  │
//! │ is_encrypted         bool                │
//! │ fingerprint          utf  (UUID 文本)    │
//! │ source_filename      utf  ("" 非 view)   │
//! │ full_row_count_known bool                │
//! │ full_row_count       i64                 │
//! │ first_row            i64                 │
//! │ last_row             i64                 │
//! │ index_offset         i64                 │
//! │ schema_offset        i64                 │
//! │ date_created         i64  epoch 毫秒     │
//! │ date_expires         i64  epoch 毫秒     │
//! └──────────────────────────────────────────┘
//! ```
//!
//! 头部写两次：打开时写占位（计数/偏移/时间全为 0），关闭时原位覆盖为终值。
//! 变长字段（指纹、源文件名）在两次写入中相同，因此两次写入长度一致。

use uuid::Uuid;

use crate::common::{ByteOffset, DataFileError, Result, RowNumber};
use crate::stream::{utf, BinaryReader, PutBigEndian};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Data,
    /// 基于另一个容器的派生视图
    View,
}

impl FileKind {
    pub fn as_byte(self) -> u8 {
        match self { Self::Data => 0, Self::View => 1 }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(Self::Data),
            1 => Ok(Self::View),
            _ => Err(DataFileError::Framing(format!("unknown file kind byte {b}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub file_kind:            FileKind,
    pub encrypted:            bool,
    pub fingerprint:          String,
    pub source_filename:      String,
    pub full_row_count_known: bool,
    pub full_row_count:       i64,
    pub first_row:            RowNumber,
    pub last_row:             RowNumber,
    pub index_offset:         ByteOffset,
    pub schema_offset:        ByteOffset,
    pub date_created:         i64,
    pub date_expires:         i64,
}

impl Header {
    /// 占位头：只有身份字段有值
    pub fn placeholder(
        file_kind:       FileKind,
        encrypted:       bool,
        fingerprint:     Uuid,
        source_filename: &str,
    ) -> Self {
        Self {
            file_kind, encrypted,
            fingerprint:          fingerprint.hyphenated().to_string(),
            source_filename:      source_filename.into(),
            full_row_count_known: false,
            full_row_count:       0,
            first_row:            0,
            last_row:             0,
            index_offset:         0,
            schema_offset:        0,
            date_created:         0,
            date_expires:         0,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.put_u8(self.file_kind.as_byte());
        out.put_bool(self.encrypted);
        utf::encode_into(&self.fingerprint, &mut out)?;
        utf::encode_into(&self.source_filename, &mut out)?;
        out.put_bool(self.full_row_count_known);
        out.put_i64(self.full_row_count);
        out.put_i64(self.first_row);
        out.put_i64(self.last_row);
        out.put_i64(self.index_offset);
        out.put_i64(self.schema_offset);
        out.put_i64(self.date_created);
        out.put_i64(self.date_expires);
        Ok(out)
    }

    pub fn read_from(r: &mut BinaryReader) -> Result<Self> {
        Ok(Self {
            file_kind:            FileKind::from_byte(r.read_u8()?)?,
            encrypted:            r.read_bool()?,
            fingerprint:          r.read_utf()?,
            source_filename:      r.read_utf()?,
            full_row_count_known: r.read_bool()?,
            full_row_count:       r.read_i64()?,
            first_row:            r.read_i64()?,
            last_row:             r.read_i64()?,
            index_offset:         r.read_i64()?,
            schema_offset:        r.read_i64()?,
            date_created:         r.read_i64()?,
            date_expires:         r.read_i64()?,
        })
    }

    pub fn encoded_len(&self) -> usize {
        2 + (2 + utf::encoded_len(&self.fingerprint))
            + (2 + utf::encoded_len(&self.source_filename))
            + 1 + 8 * 8
    }

    /// 本容器内的行数；`last_row < first_row` 表示空容器
    pub fn row_count(&self) -> i64 {
        if self.last_row < self.first_row { 0 } else { self.last_row - self.first_row + 1 }
    }

    pub fn fingerprint_uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.fingerprint).map_err(|_| {
            DataFileError::Framing(format!("fingerprint {:?} is not a UUID", self.fingerprint))
        })
    }

    /// 打开容器时的结构校验：指纹合法、已完成终值提交、偏移落在流内且有序
    pub fn validate(&self, stream_len: u64) -> Result<()> {
        self.fingerprint_uuid()?;
        let header_len = self.encoded_len() as i64;
        let len        = stream_len as i64;
        if self.schema_offset == 0 {
            return Err(DataFileError::Framing(
                "header was never finalized; the container is incomplete".into(),
            ));
        }
        if !(header_len <= self.index_offset
            && self.index_offset <= self.schema_offset
            && self.schema_offset < len)
        {
            return Err(DataFileError::Framing(format!(
                "inconsistent block offsets: header {header_len}, index {}, schema {}, length {len}",
                self.index_offset, self.schema_offset
            )));
        }
        if (self.schema_offset - self.index_offset) % 16 != 0 {
            return Err(DataFileError::Framing("index block is not a whole number of entries".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn finished() -> Header {
        let mut h = Header::placeholder(FileKind::View, true, Uuid::new_v4(), "orders.dat");
        h.full_row_count_known = true;
        h.full_row_count = 10;
        h.first_row      = 0;
        h.last_row       = 9;
        h.index_offset   = 500;
        h.schema_offset  = 516;
        h.date_created   = 1_600_000_000_000;
        h.date_expires   = 1_600_086_400_000;
        h
    }

    #[test]
    fn placeholder_and_final_have_same_length() {
        let h = finished();
        let mut p = h.clone();
        p.full_row_count_known = false;
        p.full_row_count = 0;
        p.last_row = 0;
        p.index_offset = 0;
        p.schema_offset = 0;
        p.date_created = 0;
        p.date_expires = 0;

        let a = p.serialize().unwrap();
        let b = h.serialize().unwrap();
        assert_eq!(a.len(), b.len());
        assert_eq!(a.len(), h.encoded_len());
        // 身份字段字节相同
        let id_len = 2 + 2 + 36 + 2 + "orders.dat".len();
        assert_eq!(a[..id_len], b[..id_len]);
    }

    #[test]
    fn read_back() {
        let h = finished();
        let mut r = BinaryReader::from_bytes(Bytes::from(h.serialize().unwrap()));
        assert_eq!(Header::read_from(&mut r).unwrap(), h);
        assert_eq!(h.row_count(), 10);
    }

    #[test]
    fn validation() {
        let h = finished();
        assert!(h.validate(600).is_ok());
        assert!(h.validate(516).is_err());

        let mut bad = h.clone();
        bad.fingerprint = "not-a-uuid".into();
        assert!(matches!(bad.validate(600), Err(DataFileError::Framing(_))));

        let mut bad = h.clone();
        bad.schema_offset = 0;
        assert!(bad.validate(600).is_err());

        let mut bad = h;
        bad.index_offset = 501;
        assert!(bad.validate(600).is_err());
    }

    #[test]
    fn unknown_file_kind() {
        let mut bytes = finished().serialize().unwrap();
        bytes[0] = 7;
        let mut r = BinaryReader::from_bytes(Bytes::from(bytes));
        assert!(matches!(Header::read_from(&mut r), Err(DataFileError::Framing(_))));
    }
}
