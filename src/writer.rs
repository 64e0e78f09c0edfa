//! 容器写入端
//!
//! ```text
//! open ──► [占位头部]
//!          │
//! write_row × N ──► [行流]       每 index_interval 行记录一次 (行号, 偏移)
//!          │
//! close ─┬► [索引块]
//!        ├► [schema 块]
//!        └► 回到偏移 0，以终值覆盖头部（长度与占位头部一致）
//! ```
//!
//! 状态：`Initializing → Writing → Closing → Closed`。第一行写出之前可以
//! 反复设置 schema；全局值与 profile 注解在关闭之前都可以追加。

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::cipher::StringCipher;
use crate::codec::FieldCodec;
use crate::common::{DataFileError, Result, RowNumber};
use crate::config::WriterOptions;
use crate::field_type::{LogicalType, Value};
use crate::footer::Footer;
use crate::handle::DataHandle;
use crate::header::{FileKind, Header};
use crate::index::RowIndex;
use crate::schema::{ColumnDefinition, ProfileEntry, Schema};
use crate::stream::{BinaryWriter, Finished};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterState {
    /// 已写占位头部，尚未写行
    Initializing,
    Writing,
    Closing,
    Closed,
    /// 行流写入失败或关闭失败；之后的写入与关闭都返回 Poisoned
    Failed,
}

pub struct DataWriter {
    target:      Option<PathBuf>,
    options:     WriterOptions,
    cipher:      Option<Arc<dyn StringCipher>>,
    stream:      Option<BinaryWriter>,
    state:       WriterState,
    header:      Header,
    header_len:  usize,
    created:     DateTime<Utc>,

    schema:      Schema,
    schema_set:  bool,
    /// 与 `schema` 中逐行列一一对应
    codecs:      Vec<FieldCodec>,
    /// 通过 `set_global_value` 追加的列，关闭时排在 schema 之后
    appended:    Vec<ColumnDefinition>,

    /// 整行先编码到这里，成功后再追加到 `stream`
    row_buf:     BinaryWriter,
    index:       RowIndex,
    rows:        i64,
    next_break:  RowNumber,
    handle:      Option<DataHandle>,
}

impl DataWriter {
    /// 写到 `path`；内存未超限时结果保持在内存中，不创建文件
    pub fn create(path: impl AsRef<Path>, options: WriterOptions) -> Result<Self> {
        Self::open(Some(path.as_ref().to_path_buf()), options)
    }

    /// 无目标文件；溢出时保留系统临时目录（或 `spill_dir`）下的文件
    pub fn in_memory(options: WriterOptions) -> Result<Self> {
        Self::open(None, options)
    }

    fn open(target: Option<PathBuf>, options: WriterOptions) -> Result<Self> {
        options.validate()?;
        let (kind, fingerprint, source) = match &options.view_of {
            Some(v) => (FileKind::View, v.fingerprint, v.source_filename.as_str()),
            None    => (FileKind::Data, Uuid::new_v4(), ""),
        };
        let cipher = options.resolved_cipher();
        let header = Header::placeholder(kind, cipher.is_some(), fingerprint, source);

        let spill_dir  = options.resolved_spill_dir(target.as_deref());
        let mut stream = BinaryWriter::new(options.memory_limit_bytes, spill_dir);
        let placeholder = header.serialize()?;
        stream.write_bytes(&placeholder)?;

        log::debug!(
            "data writer opened: fingerprint={} kind={:?} target={:?} memory_limit={}",
            header.fingerprint, kind, target, options.memory_limit_bytes
        );

        Ok(Self {
            target, cipher,
            stream:     Some(stream),
            state:      WriterState::Initializing,
            header_len: placeholder.len(),
            header,
            created:    Utc::now(),
            schema:     Schema::default(),
            schema_set: false,
            codecs:     Vec::new(),
            appended:   Vec::new(),
            row_buf:    BinaryWriter::memory(),
            index:      RowIndex::default(),
            rows:       0,
            next_break: 0,
            handle:     None,
            options,
        })
    }

    // ── Schema ────────────────────────────────────────────────────────────────

    /// 设置完整 schema；第一行写出之后调用返回 Schema 错误
    pub fn set_schema(&mut self, schema: Schema) -> Result<()> {
        self.ensure_open()?;
        if self.state != WriterState::Initializing {
            return Err(DataFileError::Schema(format!(
                "schema cannot change after {} rows were written", self.rows
            )));
        }
        if let Some(dup) = self.appended.iter().find(|c| schema.find(&c.name).is_some()) {
            return Err(DataFileError::Schema(format!(
                "column {:?} is already defined as a global value", dup.name
            )));
        }
        self.codecs = schema.per_row_columns()
            .map(|c| FieldCodec::new(c.declared_type, self.options.null_encoding, self.cipher.clone()))
            .collect();
        self.schema = schema;
        self.schema_set = true;
        Ok(())
    }

    pub fn set_data_columns(&mut self, names: &[&str], types: &[LogicalType]) -> Result<()> {
        self.set_schema(Schema::from_names_and_types(names, types)?)
    }

    /// `[[name, type_name], ...]`
    pub fn set_data_columns_matrix<S: AsRef<str>>(&mut self, matrix: &[[S; 2]]) -> Result<()> {
        self.set_schema(Schema::from_matrix(matrix)?)
    }

    /// 追加（或覆盖同名的）全局值列
    pub fn set_global_value(&mut self, name: &str, declared: LogicalType, value: Value) -> Result<()> {
        self.ensure_open()?;
        let col = ColumnDefinition::global(name, declared, value)?;

        if let Some(existing) = self.schema.column_mut(name) {
            if !existing.is_global() {
                return Err(DataFileError::Schema(format!(
                    "column {:?} is a per-row column and cannot hold a global value", existing.name
                )));
            }
            existing.declared_type = col.declared_type;
            existing.storage_type  = col.storage_type;
            existing.global_value  = col.global_value;
            return Ok(());
        }
        match self.appended.iter_mut().find(|c| c.name.eq_ignore_ascii_case(name)) {
            Some(existing) => {
                existing.declared_type = col.declared_type;
                existing.storage_type  = col.storage_type;
                existing.global_value  = col.global_value;
            }
            None => {
                if col.name.trim().is_empty() {
                    return Err(DataFileError::Schema("column name must not be empty".into()));
                }
                self.appended.push(col);
            }
        }
        Ok(())
    }

    /// 为已定义的列附加统计注解，替换之前的注解
    pub fn set_column_profile(&mut self, name: &str, profile: Vec<ProfileEntry>) -> Result<()> {
        self.ensure_open()?;
        let col = match self.schema.column_mut(name) {
            Some(c) => c,
            None => self.appended.iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| DataFileError::Schema(format!("no column named {name:?}")))?,
        };
        col.profile = profile;
        Ok(())
    }

    // ── 行 ────────────────────────────────────────────────────────────────────

    /// 按 schema 中逐行列的顺序写一行（不含全局值列）
    ///
    /// 整行编码成功后才追加到行流并记录检查点；编码失败时行流不变，
    /// 写入端仍可继续使用。追加本身失败时写入端进入 `Failed`。
    pub fn write_row(&mut self, values: &[Value]) -> Result<()> {
        self.ensure_open()?;
        if !self.schema_set {
            return Err(DataFileError::Schema("schema must be set before the first row".into()));
        }
        let width = self.codecs.len();
        if values.len() != width {
            return Err(DataFileError::Schema(format!(
                "row {} has {} values but the schema has {width} per-row columns",
                self.rows, values.len()
            )));
        }
        for (col, v) in self.schema.per_row_columns().zip(values) {
            col.check_value(v)?;
        }

        self.row_buf.clear();
        for (codec, v) in self.codecs.iter().zip(values) {
            match v.logical_type() {
                Some(t) if !t.is_canonical() => codec.encode(&mut self.row_buf, &v.clone().promote())?,
                _                            => codec.encode(&mut self.row_buf, v)?,
            }
        }
        let encoded = self.row_buf.written().ok_or_else(|| {
            DataFileError::Framing("row buffer unexpectedly spilled".into())
        })?;

        let stream = self.stream.as_mut().ok_or(DataFileError::Closed)?;
        let offset = stream.position() as i64;
        if let Err(e) = stream.write_bytes(encoded) {
            log::warn!("row {} could not be appended; writer is now unusable: {e}", self.rows);
            self.state = WriterState::Failed;
            return Err(e);
        }
        if self.rows == self.next_break {
            self.index.add(self.rows, offset)?;
            self.next_break += self.options.index_interval;
        }
        self.rows += 1;
        self.state = WriterState::Writing;
        Ok(())
    }

    // ── 关闭 ──────────────────────────────────────────────────────────────────

    /// 写索引块与 schema 块，以终值覆盖头部；重复调用无副作用
    pub fn close(&mut self) -> Result<()> {
        match self.state {
            WriterState::Closed => return Ok(()),
            WriterState::Failed => return Err(DataFileError::Poisoned),
            _ => {}
        }
        let mut stream = self.stream.take().ok_or(DataFileError::Closed)?;
        self.state = WriterState::Closing;
        let result = self.commit(&mut stream).and_then(|header| {
            let size = stream.position();
            let handle = match stream.finish()? {
                Finished::Memory(buf) => DataHandle::memory(buf, header.clone()),
                Finished::File(tmp)   => {
                    let path = persist(tmp, self.target.as_deref())?;
                    DataHandle::file(path, header.clone(), size)
                }
            };
            Ok((header, handle))
        });
        let (header, handle) = match result {
            Ok(done) => done,
            Err(e) => {
                self.state = WriterState::Failed;
                return Err(e);
            }
        };
        self.state = WriterState::Closed;
        log::debug!(
            "data writer closed: fingerprint={} rows={} checkpoints={} size={} file={:?}",
            header.fingerprint, self.rows, self.index.len(), handle.size_bytes(), handle.filename()
        );
        self.header = header;
        self.handle = Some(handle);
        Ok(())
    }

    fn commit(&mut self, stream: &mut BinaryWriter) -> Result<Header> {
        let index_offset = stream.position() as i64;
        self.index.write_to(stream)?;

        let schema_offset = stream.position() as i64;
        let mut schema = std::mem::take(&mut self.schema);
        for col in self.appended.drain(..) {
            schema.push(col)?;
        }
        let footer = Footer {
            schema,
            null_encoding: self.options.null_encoding,
            row_count:     self.rows,
        };
        footer.write_to(stream, self.cipher.as_deref())?;
        self.schema = footer.schema;

        let created = self.created.timestamp_millis();
        let mut header = self.header.clone();
        header.full_row_count_known = true;
        header.full_row_count       = self.options.full_row_count.unwrap_or(self.rows);
        header.first_row            = self.options.first_row;
        header.last_row             = self.options.first_row.checked_add(self.rows - 1)
            .ok_or_else(|| DataFileError::Config(format!(
                "first_row {} plus {} rows overflows the row number range",
                self.options.first_row, self.rows
            )))?;
        header.index_offset         = index_offset;
        header.schema_offset        = schema_offset;
        header.date_created         = created;
        header.date_expires         = created.saturating_add(self.options.expires_after_ms);

        let bytes = header.serialize()?;
        if bytes.len() != self.header_len {
            return Err(DataFileError::Framing(format!(
                "final header is {} bytes but the placeholder was {}", bytes.len(), self.header_len
            )));
        }
        stream.overwrite_at(0, &bytes)?;
        Ok(header)
    }

    /// 关闭（如尚未关闭）并返回数据句柄
    pub fn get_data_handle(&mut self) -> Result<DataHandle> {
        self.close()?;
        self.handle.clone().ok_or(DataFileError::Closed)
    }

    // ── 访问器 ────────────────────────────────────────────────────────────────

    /// 关闭前为占位头部，关闭后为终值
    pub fn header(&self) -> &Header { &self.header }
    pub fn state(&self) -> WriterState { self.state }
    pub fn rows_written(&self) -> i64 { self.rows }
    pub fn schema(&self) -> &Schema { &self.schema }

    /// 当前是否已溢出到文件
    pub fn is_file_backed(&self) -> bool {
        match (&self.stream, &self.handle) {
            (Some(s), _)    => s.is_file_backed(),
            (None, Some(h)) => !h.is_memory_backed(),
            (None, None)    => false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            WriterState::Closing | WriterState::Closed => Err(DataFileError::Closed),
            WriterState::Failed => Err(DataFileError::Poisoned),
            _ => Ok(()),
        }
    }
}

impl Drop for DataWriter {
    fn drop(&mut self) {
        if self.stream.is_some() {
            log::warn!(
                "data writer {} dropped before close; {} rows discarded",
                self.header.fingerprint, self.rows
            );
        }
    }
}

/// 溢出文件落到目标路径；跨文件系统 rename 失败时退回复制
fn persist(tmp: NamedTempFile, target: Option<&Path>) -> Result<PathBuf> {
    let Some(target) = target else {
        let (_, path) = tmp.keep().map_err(|e| DataFileError::Io(e.error))?;
        return Ok(path);
    };
    match tmp.persist(target) {
        Ok(_)  => Ok(target.to_path_buf()),
        Err(e) => {
            log::debug!("rename to {} failed ({}); copying instead", target.display(), e.error);
            fs::copy(e.file.path(), target)?;
            Ok(target.to_path_buf())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ViewSource;
    use tempfile::tempdir;

    fn writer() -> DataWriter {
        let mut w = DataWriter::in_memory(WriterOptions::default().with_index_interval(2)).unwrap();
        w.set_data_columns(&["Id", "Name"], &[LogicalType::Integer, LogicalType::String]).unwrap();
        w
    }

    fn row(id: i32, name: &str) -> Vec<Value> {
        vec![Value::Integer(id), Value::String(name.into())]
    }

    #[test]
    fn state_transitions() {
        let mut w = writer();
        assert_eq!(w.state(), WriterState::Initializing);
        w.write_row(&row(1, "a")).unwrap();
        assert_eq!(w.state(), WriterState::Writing);
        w.close().unwrap();
        assert_eq!(w.state(), WriterState::Closed);
        w.close().unwrap();
    }

    #[test]
    fn schema_is_frozen_after_first_row() {
        let mut w = writer();
        w.write_row(&row(1, "a")).unwrap();
        let err = w.set_data_columns(&["X"], &[LogicalType::Long]).unwrap_err();
        assert!(matches!(err, DataFileError::Schema(_)));
    }

    #[test]
    fn rows_are_validated_before_encoding() {
        let mut w = writer();
        assert!(w.write_row(&[Value::Integer(1)]).is_err());
        assert!(w.write_row(&[Value::Long(1), Value::String("x".into())]).is_err());
        assert_eq!(w.rows_written(), 0);

        let mut w = DataWriter::in_memory(WriterOptions::default()).unwrap();
        let err = w.write_row(&[]).unwrap_err();
        assert!(err.to_string().contains("schema must be set"));
    }

    #[test]
    fn writes_after_close_fail() {
        let mut w = writer();
        w.close().unwrap();
        assert!(matches!(w.write_row(&row(1, "a")), Err(DataFileError::Closed)));
        assert!(matches!(
            w.set_global_value("g", LogicalType::Integer, Value::Integer(1)),
            Err(DataFileError::Closed)
        ));
        assert!(matches!(w.set_column_profile("Id", vec![]), Err(DataFileError::Closed)));
    }

    #[test]
    fn checkpoints_every_interval() {
        let mut w = writer();
        for i in 0..5 {
            w.write_row(&row(i, "n")).unwrap();
        }
        let rows: Vec<_> = w.index.entries().iter().map(|e| e.row_number).collect();
        assert_eq!(rows, vec![0, 2, 4]);
    }

    #[test]
    fn failed_encode_leaves_stream_and_index_untouched() {
        let mut w = writer();
        w.write_row(&row(0, "a")).unwrap();
        let before = w.stream.as_ref().unwrap().position();

        // Id 已能编码，Name 超出 u16 长度前缀
        let err = w.write_row(&row(1, &"x".repeat(70_000))).unwrap_err();
        assert!(matches!(err, DataFileError::Framing(_)));
        assert_eq!(w.rows_written(), 1);
        assert_eq!(w.stream.as_ref().unwrap().position(), before);
        assert_eq!(w.index.len(), 1);
        assert_eq!(w.state(), WriterState::Writing);

        w.write_row(&row(1, "b")).unwrap();
        w.write_row(&row(2, "c")).unwrap();
        let rows: Vec<_> = w.index.entries().iter().map(|e| e.row_number).collect();
        assert_eq!(rows, vec![0, 2]);
    }

    #[test]
    fn last_row_overflow_fails_close_and_poisons_writer() {
        let mut w = DataWriter::in_memory(WriterOptions::default().with_first_row(i64::MAX)).unwrap();
        w.set_data_columns(&["Id"], &[LogicalType::Integer]).unwrap();
        w.write_row(&[Value::Integer(1)]).unwrap();
        w.write_row(&[Value::Integer(2)]).unwrap();

        assert!(matches!(w.close(), Err(DataFileError::Config(_))));
        assert_eq!(w.state(), WriterState::Failed);
        assert!(matches!(w.close(), Err(DataFileError::Poisoned)));
        assert!(matches!(w.write_row(&[Value::Integer(3)]), Err(DataFileError::Poisoned)));
        assert!(matches!(w.get_data_handle(), Err(DataFileError::Poisoned)));
    }

    #[test]
    fn single_row_at_max_first_row_fits() {
        let mut w = DataWriter::in_memory(WriterOptions::default().with_first_row(i64::MAX)).unwrap();
        w.set_data_columns(&["Id"], &[LogicalType::Integer]).unwrap();
        w.write_row(&[Value::Integer(1)]).unwrap();
        let h = w.get_data_handle().unwrap();
        assert_eq!(h.header().first_row, i64::MAX);
        assert_eq!(h.header().last_row, i64::MAX);
    }

    #[test]
    fn final_header_values() {
        let opts = WriterOptions::default()
            .with_first_row(100)
            .with_full_row_count(1000)
            .with_expires_after(std::time::Duration::from_secs(60));
        let mut w = DataWriter::in_memory(opts).unwrap();
        w.set_data_columns(&["Id"], &[LogicalType::Long]).unwrap();
        let placeholder = w.header().clone();
        assert_eq!(placeholder.schema_offset, 0);
        assert!(!placeholder.full_row_count_known);

        for i in 0..3 {
            w.write_row(&[Value::Long(i)]).unwrap();
        }
        let h = w.get_data_handle().unwrap();
        let hd = h.header();
        assert!(hd.full_row_count_known);
        assert_eq!(hd.full_row_count, 1000);
        assert_eq!((hd.first_row, hd.last_row), (100, 102));
        assert_eq!(hd.row_count(), 3);
        assert_eq!(hd.date_expires - hd.date_created, 60_000);
        assert_eq!(hd.fingerprint, placeholder.fingerprint);
        assert_eq!(h.size_bytes(), h.buffer().unwrap().len() as u64);
    }

    #[test]
    fn empty_container_header() {
        let mut w = DataWriter::in_memory(WriterOptions::default()).unwrap();
        let h = w.get_data_handle().unwrap();
        assert_eq!(h.header().row_count(), 0);
        assert!(h.header().last_row < h.header().first_row);
    }

    #[test]
    fn global_values_and_profiles() {
        let mut w = writer();
        w.set_global_value("Region", LogicalType::String, Value::String("EU".into())).unwrap();
        w.set_global_value("region", LogicalType::String, Value::String("US".into())).unwrap();
        assert!(w.set_global_value("Id", LogicalType::Integer, Value::Integer(3)).is_err());
        w.set_column_profile("Id", vec![ProfileEntry::new("Max", "Integer", 9)]).unwrap();
        w.set_column_profile("REGION", vec![ProfileEntry::new("Distinct", "Integer", 1)]).unwrap();
        assert!(w.set_column_profile("Missing", vec![]).is_err());

        w.write_row(&row(1, "a")).unwrap();
        w.close().unwrap();
        let s = w.schema();
        assert_eq!(s.column_names(), vec!["Id", "Name", "Region"]);
        assert_eq!(s.columns()[2].global_value, Some(Value::String("US".into())));
        assert_eq!(s.columns()[0].profile.len(), 1);
        assert_eq!(s.columns()[2].profile[0].name, "Distinct");
    }

    #[test]
    fn view_header_carries_source() {
        let fp = Uuid::new_v4();
        let mut opts = WriterOptions::default();
        opts.view_of = Some(ViewSource { source_filename: "orders.dat".into(), fingerprint: fp });
        let mut w = DataWriter::in_memory(opts).unwrap();
        let h = w.get_data_handle().unwrap();
        assert_eq!(h.header().file_kind, FileKind::View);
        assert_eq!(h.header().source_filename, "orders.dat");
        assert_eq!(h.header().fingerprint_uuid().unwrap(), fp);
    }

    #[test]
    fn spilled_writer_persists_to_target() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.dat");
        let mut w = DataWriter::create(&path, WriterOptions::default().with_memory_limit_bytes(64)).unwrap();
        w.set_data_columns(&["Name"], &[LogicalType::String]).unwrap();
        for i in 0..20 {
            w.write_row(&[Value::String(format!("row-{i}"))]).unwrap();
        }
        assert!(w.is_file_backed());
        let h = w.get_data_handle().unwrap();
        assert!(!h.is_memory_backed());
        assert_eq!(h.filename(), Some(path.as_path()));
        assert_eq!(fs::metadata(&path).unwrap().len(), h.size_bytes());
        // 临时文件已 rename 为目标文件
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn small_container_stays_in_memory() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("small.dat");
        let mut w = DataWriter::create(&path, WriterOptions::default()).unwrap();
        w.set_data_columns(&["Id"], &[LogicalType::Integer]).unwrap();
        w.write_row(&[Value::Integer(1)]).unwrap();
        let h = w.get_data_handle().unwrap();
        assert!(h.is_memory_backed());
        assert!(h.filename().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn dropped_writer_removes_spill_file() {
        let dir = tempdir().unwrap();
        let opts = WriterOptions::default().with_memory_limit_bytes(0).with_spill_dir(dir.path());
        let mut w = DataWriter::in_memory(opts).unwrap();
        w.set_data_columns(&["Id"], &[LogicalType::Integer]).unwrap();
        w.write_row(&[Value::Integer(1)]).unwrap();
        assert!(w.is_file_backed());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        drop(w);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
