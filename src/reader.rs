//! 容器读取端
//!
//! 打开时只解析头部；schema 块在第一次需要列信息时解析并缓存，索引块在
//! 第一次 `seek_to_row` 时解析。GlobalValue 列不占行流字节，读取时直接
//! 用 footer 中的常量填充。

use std::sync::Arc;

use crate::cipher::{StringCipher, XorHexCipher};
use crate::codec::FieldCodec;
use crate::common::{DataFileError, Result, RowNumber};
use crate::field_type::{LogicalType, NullEncoding, Value};
use crate::footer::Footer;
use crate::handle::DataHandle;
use crate::header::Header;
use crate::index::RowIndex;
use crate::schema::Schema;
use crate::stream::BinaryReader;

enum Slot {
    Stream(FieldCodec),
    Constant(Value),
}

struct Layout {
    footer: Footer,
    slots:  Vec<Slot>,
}

pub struct DataReader {
    stream:     Option<BinaryReader>,
    header:     Header,
    cipher:     Option<Arc<dyn StringCipher>>,
    layout:     Option<Layout>,
    index:      Option<RowIndex>,
    /// 下一次 `get_data_row` 将返回的行（容器内行号）
    next_row:   RowNumber,
    /// 流位置是否正好位于 `next_row` 的起点；解码出错后为 false
    aligned:    bool,
    row_count:  i64,
    row:        Vec<Value>,
}

impl DataReader {
    /// 加密容器使用默认 cipher
    pub fn open(handle: &DataHandle) -> Result<Self> {
        Self::open_inner(handle, None)
    }

    pub fn open_with_cipher(handle: &DataHandle, cipher: Arc<dyn StringCipher>) -> Result<Self> {
        Self::open_inner(handle, Some(cipher))
    }

    fn open_inner(handle: &DataHandle, cipher: Option<Arc<dyn StringCipher>>) -> Result<Self> {
        let mut stream = handle.open_stream()?;
        let header = Header::read_from(&mut stream)?;
        header.validate(stream.len())?;
        if header.fingerprint != handle.header().fingerprint {
            return Err(DataFileError::Framing(format!(
                "fingerprint mismatch: handle {} but stream {}",
                handle.header().fingerprint, header.fingerprint
            )));
        }
        let cipher = match (header.encrypted, cipher) {
            (false, _)      => None,
            (true, Some(c)) => Some(c),
            (true, None)    => Some(Arc::new(XorHexCipher::default()) as Arc<dyn StringCipher>),
        };
        log::debug!(
            "data reader opened: fingerprint={} rows={} encrypted={}",
            header.fingerprint, header.row_count(), header.encrypted
        );
        Ok(Self {
            stream:    Some(stream),
            row_count: header.row_count(),
            header, cipher,
            layout:    None,
            index:     None,
            next_row:  0,
            aligned:   true,
            row:       Vec::new(),
        })
    }

    // ── 元数据 ────────────────────────────────────────────────────────────────

    pub fn header(&self) -> &Header { &self.header }
    pub fn row_count(&self) -> i64 { self.row_count }
    pub fn current_row(&self) -> RowNumber { self.next_row }

    pub fn schema(&mut self) -> Result<&Schema> {
        Ok(&self.layout()?.footer.schema)
    }

    pub fn column_names(&mut self) -> Result<Vec<String>> {
        Ok(self.schema()?.column_names())
    }

    /// 声明类型
    pub fn column_types(&mut self) -> Result<Vec<LogicalType>> {
        Ok(self.schema()?.declared_types())
    }

    /// 落盘类型，即 `get_data_row` 返回值的类型
    pub fn storage_types(&mut self) -> Result<Vec<LogicalType>> {
        Ok(self.schema()?.storage_types())
    }

    pub fn null_encoding(&mut self) -> Result<NullEncoding> {
        Ok(self.layout()?.footer.null_encoding)
    }

    pub fn eof(&self) -> bool {
        self.next_row >= self.row_count
    }

    // ── 行 ────────────────────────────────────────────────────────────────────

    /// 解码下一行；返回的切片在下一次调用前有效
    ///
    /// 上一次解码出错后，先经由检查点重新定位到 `next_row` 再解码。
    pub fn get_data_row(&mut self) -> Result<&[Value]> {
        self.layout()?;
        if self.eof() {
            return Err(DataFileError::RowOutOfRange { row: self.next_row, rows: self.row_count });
        }
        if !self.aligned {
            self.seek_to_row(self.next_row)?;
        }
        let (Some(stream), Some(layout)) = (self.stream.as_mut(), self.layout.as_ref()) else {
            return Err(DataFileError::Closed);
        };

        self.row.clear();
        for slot in &layout.slots {
            let v = match slot {
                Slot::Stream(codec) => match codec.decode(stream) {
                    Ok(v)  => v,
                    Err(e) => {
                        self.aligned = false;
                        return Err(e);
                    }
                },
                Slot::Constant(v)   => v.clone(),
            };
            self.row.push(v);
        }
        self.next_row += 1;
        Ok(self.row.as_slice())
    }

    /// 逐行迭代剩余的行（拥有所有权的副本）
    pub fn rows(&mut self) -> Rows<'_> {
        Rows { reader: self }
    }

    /// 定位到容器内第 `row` 行，下一次 `get_data_row` 返回该行
    pub fn seek_to_row(&mut self, row: RowNumber) -> Result<()> {
        self.layout()?;
        if row < 0 || row >= self.row_count {
            return Err(DataFileError::RowOutOfRange { row, rows: self.row_count });
        }
        self.load_index()?;

        let checkpoint = self.index.as_ref().and_then(|idx| idx.find(row));
        let (start_row, start_offset) = match checkpoint {
            // 当前位置比检查点更近时直接向前解码
            Some(cp) if self.aligned && self.next_row <= row && self.next_row >= cp.row_number =>
                (self.next_row, None),
            Some(cp) => (cp.row_number, Some(cp.offset as u64)),
            None     => (0, Some(self.header.encoded_len() as u64)),
        };

        let (Some(stream), Some(layout)) = (self.stream.as_mut(), self.layout.as_ref()) else {
            return Err(DataFileError::Closed);
        };
        self.aligned = false;
        if let Some(offset) = start_offset {
            stream.seek_to(offset)?;
        }
        for _ in start_row..row {
            for slot in &layout.slots {
                if let Slot::Stream(codec) = slot {
                    codec.decode(stream)?;
                }
            }
        }
        log::debug!("seek to row {row}: started at row {start_row}, skipped {}", row - start_row);
        self.next_row = row;
        self.aligned = true;
        Ok(())
    }

    /// 释放底层流；之后的读取返回 Closed
    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn is_closed(&self) -> bool { self.stream.is_none() }

    // ── 懒加载 ────────────────────────────────────────────────────────────────

    fn layout(&mut self) -> Result<&Layout> {
        if self.layout.is_none() {
            let stream = self.stream.as_mut().ok_or(DataFileError::Closed)?;
            let resume = stream.position();
            let footer = Footer::read_from(
                stream, self.header.schema_offset as u64, self.cipher.as_deref(),
            )?;
            stream.seek_to(resume)?;

            if footer.row_count != self.row_count {
                return Err(DataFileError::Framing(format!(
                    "header says {} rows but schema block says {}", self.row_count, footer.row_count
                )));
            }
            let slots = footer.schema.columns().iter()
                .map(|c| match &c.global_value {
                    Some(v) if c.is_global() => Slot::Constant(v.clone().promote()),
                    _ => Slot::Stream(FieldCodec::new(
                        c.declared_type, footer.null_encoding, self.cipher.clone(),
                    )),
                })
                .collect();
            log::debug!(
                "schema block parsed: {} columns ({} per-row)",
                footer.schema.len(), footer.schema.per_row_count()
            );
            self.layout = Some(Layout { footer, slots });
        }
        self.layout.as_ref().ok_or(DataFileError::Closed)
    }

    fn load_index(&mut self) -> Result<()> {
        if self.index.is_some() {
            return Ok(());
        }
        let stream = self.stream.as_mut().ok_or(DataFileError::Closed)?;
        let resume = stream.position();
        let index = RowIndex::read_from(stream, self.header.index_offset, self.header.schema_offset)?;
        stream.seek_to(resume)?;
        self.index = Some(index);
        Ok(())
    }
}

pub struct Rows<'a> {
    reader: &'a mut DataReader,
}

impl Iterator for Rows<'_> {
    type Item = Result<Vec<Value>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_closed() || self.reader.eof() {
            return None;
        }
        Some(self.reader.get_data_row().map(<[Value]>::to_vec))
    }
}
