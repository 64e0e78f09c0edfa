//! 写入端配置
//!
//! 可直接由流水线阶段的 JSON/TOML 配置反序列化（缺省字段取默认值），
//! 也可用 `with_*` 链式构建。环境变量 `DATAFILE_MEMORY_LIMIT_MB` /
//! `DATAFILE_INDEX_INTERVAL` 通过 [`WriterOptions::from_env`] 覆盖默认值。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

use crate::cipher::{StringCipher, XorHexCipher};
use crate::common::{DataFileError, Result, RowNumber, MEGABYTE};
use crate::field_type::NullEncoding;

pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 20;
pub const DEFAULT_INDEX_INTERVAL: i64  = 5000;
pub const DEFAULT_EXPIRES_AFTER_MS: i64 = 24 * 60 * 60 * 1000;

pub const ENV_MEMORY_LIMIT_MB: &str = "DATAFILE_MEMORY_LIMIT_MB";
pub const ENV_INDEX_INTERVAL: &str  = "DATAFILE_INDEX_INTERVAL";

/// 视图容器的来源
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ViewSource {
    /// 只保留文件名部分
    pub source_filename: String,
    /// 沿用源容器的指纹
    pub fingerprint:     Uuid,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WriterOptions {
    /// 超过该字节数后从内存溢出到文件；0 表示首次写入即落盘
    pub memory_limit_bytes: u64,
    /// 每隔多少行记录一个索引检查点
    pub index_interval:     i64,
    pub encrypted:          bool,
    pub null_encoding:      NullEncoding,
    /// 分区容器中首行的全局行号
    pub first_row:          RowNumber,
    /// 完整结果集的总行数；None 时取本容器写入的行数
    pub full_row_count:     Option<i64>,
    pub expires_after_ms:   i64,
    /// None 时使用目标文件所在目录；没有目标文件时用系统临时目录
    pub spill_dir:          Option<PathBuf>,
    pub view_of:            Option<ViewSource>,
    /// None 且 `encrypted` 时使用 [`XorHexCipher::default`]
    #[serde(skip)]
    pub cipher:             Option<Arc<dyn StringCipher>>,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            memory_limit_bytes: DEFAULT_MEMORY_LIMIT_MB * MEGABYTE,
            index_interval:     DEFAULT_INDEX_INTERVAL,
            encrypted:          false,
            null_encoding:      NullEncoding::Sentinel,
            first_row:          0,
            full_row_count:     None,
            expires_after_ms:   DEFAULT_EXPIRES_AFTER_MS,
            spill_dir:          None,
            view_of:            None,
            cipher:             None,
        }
    }
}

impl WriterOptions {
    /// 默认值 + 环境变量覆盖
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut opts = Self::default();
        for (k, v) in vars {
            let (k, v) = (k.as_ref(), v.as_ref().trim());
            match k {
                ENV_MEMORY_LIMIT_MB => {
                    let mb: u64 = v.parse().map_err(|_| invalid_var(k, v))?;
                    opts = opts.with_memory_limit_mb(mb);
                }
                ENV_INDEX_INTERVAL => {
                    opts.index_interval = v.parse().map_err(|_| invalid_var(k, v))?;
                }
                _ => {}
            }
        }
        opts.validate()?;
        Ok(opts)
    }

    pub fn with_memory_limit_mb(mut self, mb: u64) -> Self {
        self.memory_limit_bytes = mb.saturating_mul(MEGABYTE); self
    }
    pub fn with_memory_limit_bytes(mut self, bytes: u64) -> Self {
        self.memory_limit_bytes = bytes; self
    }
    pub fn with_index_interval(mut self, rows: i64) -> Self {
        self.index_interval = rows; self
    }
    pub fn encrypted(mut self) -> Self {
        self.encrypted = true; self
    }
    /// 指定 cipher 同时打开加密标记
    pub fn with_cipher(mut self, cipher: Arc<dyn StringCipher>) -> Self {
        self.encrypted = true;
        self.cipher = Some(cipher); self
    }
    pub fn with_null_encoding(mut self, nulls: NullEncoding) -> Self {
        self.null_encoding = nulls; self
    }
    pub fn with_first_row(mut self, row: RowNumber) -> Self {
        self.first_row = row; self
    }
    pub fn with_full_row_count(mut self, rows: i64) -> Self {
        self.full_row_count = Some(rows); self
    }
    pub fn with_expires_after(mut self, ttl: Duration) -> Self {
        self.expires_after_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX); self
    }
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into()); self
    }

    /// 作为 `source` 的视图写出；源路径只保留文件名
    pub fn view_of(mut self, source: impl AsRef<Path>, fingerprint: Uuid) -> Self {
        let source = source.as_ref();
        let source_filename = source.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| source.to_string_lossy().into_owned());
        self.view_of = Some(ViewSource { source_filename, fingerprint });
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_interval <= 0 {
            return Err(DataFileError::Config(format!(
                "index_interval must be positive, got {}", self.index_interval
            )));
        }
        if self.first_row < 0 {
            return Err(DataFileError::Config(format!(
                "first_row must not be negative, got {}", self.first_row
            )));
        }
        if matches!(self.full_row_count, Some(n) if n < 0) {
            return Err(DataFileError::Config("full_row_count must not be negative".into()));
        }
        if self.expires_after_ms < 0 {
            return Err(DataFileError::Config("expires_after_ms must not be negative".into()));
        }
        Ok(())
    }

    /// 加密时实际使用的 cipher
    pub(crate) fn resolved_cipher(&self) -> Option<Arc<dyn StringCipher>> {
        if !self.encrypted {
            return None;
        }
        Some(self.cipher.clone().unwrap_or_else(|| Arc::new(XorHexCipher::default())))
    }

    pub(crate) fn resolved_spill_dir(&self, target: Option<&Path>) -> PathBuf {
        if let Some(dir) = &self.spill_dir {
            return dir.clone();
        }
        match target.and_then(Path::parent) {
            // 相对路径的父目录为空串，即当前目录
            Some(p) if p.as_os_str().is_empty() => PathBuf::from("."),
            Some(p) => p.to_path_buf(),
            None    => std::env::temp_dir(),
        }
    }
}

fn invalid_var(name: &str, value: &str) -> DataFileError {
    DataFileError::Config(format!("{name}={value:?} is not a valid number"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let o = WriterOptions::default();
        assert_eq!(o.memory_limit_bytes, 20 * MEGABYTE);
        assert_eq!(o.index_interval, DEFAULT_INDEX_INTERVAL);
        assert!(o.validate().is_ok());
        assert!(o.resolved_cipher().is_none());
        assert!(o.encrypted().resolved_cipher().is_some());
    }

    #[test]
    fn env_overlay() {
        let o = WriterOptions::from_vars([
            (ENV_MEMORY_LIMIT_MB, "2"),
            (ENV_INDEX_INTERVAL, "500"),
            ("PATH", "/usr/bin"),
        ]).unwrap();
        assert_eq!(o.memory_limit_bytes, 2 * MEGABYTE);
        assert_eq!(o.index_interval, 500);

        assert!(WriterOptions::from_vars([(ENV_INDEX_INTERVAL, "0")]).is_err());
        assert!(WriterOptions::from_vars([(ENV_MEMORY_LIMIT_MB, "lots")]).is_err());
    }

    #[test]
    fn deserialize_partial_json() {
        let o: WriterOptions = serde_json::from_str(
            r#"{"index_interval": 100, "null_encoding": "tagged", "encrypted": true}"#,
        ).unwrap();
        assert_eq!(o.index_interval, 100);
        assert_eq!(o.null_encoding, NullEncoding::Tagged);
        assert!(o.encrypted);
        assert_eq!(o.memory_limit_bytes, DEFAULT_MEMORY_LIMIT_MB * MEGABYTE);
    }

    #[test]
    fn view_keeps_file_name_only() {
        let fp = Uuid::new_v4();
        let o = WriterOptions::default().view_of("/data/stage1/orders.dat", fp);
        let v = o.view_of.unwrap();
        assert_eq!(v.source_filename, "orders.dat");
        assert_eq!(v.fingerprint, fp);
    }

    #[test]
    fn spill_dir_resolution() {
        let o = WriterOptions::default();
        assert_eq!(o.resolved_spill_dir(Some(Path::new("/data/out.dat"))), PathBuf::from("/data"));
        assert_eq!(o.resolved_spill_dir(Some(Path::new("out.dat"))), PathBuf::from("."));
        assert_eq!(o.resolved_spill_dir(None), std::env::temp_dir());
        let o = o.with_spill_dir("/scratch");
        assert_eq!(o.resolved_spill_dir(None), PathBuf::from("/scratch"));
    }
}
