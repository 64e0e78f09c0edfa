//! 全局基础类型与错误定义

use std::io;

use thiserror::Error;

// ── 行号 / 偏移 类型别名 ──────────────────────────────────────────────────────

/// 容器内的行号（从 0 开始，局部于本容器）
pub type RowNumber  = i64;
/// 自流起点的绝对字节偏移
pub type ByteOffset = i64;

/// 1 MiB
pub const MEGABYTE: u64 = 1024 * 1024;

// ── 错误 ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum DataFileError {
    /// 列定义缺失/重复、首行之后再设 schema、行宽或值类型不符
    #[error("schema error: {0}")]
    Schema(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    /// 长度前缀损坏、续字节非法、流被截断、指纹不符
    #[error("framing error: {0}")]
    Framing(String),
    #[error("container is closed")]
    Closed,
    /// 写入端此前发生过无法回滚的错误，容器不可用
    #[error("writer failed earlier; the container is invalid")]
    Poisoned,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cipher error: {0}")]
    Cipher(String),
    #[error("row {row} out of range: container holds {rows} rows")]
    RowOutOfRange { row: RowNumber, rows: i64 },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DataFileError {
    /// 解码路径上的 I/O 错误：EOF 视为截断（Framing），其余原样保留
    pub(crate) fn from_read(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Self::Framing("truncated stream".into())
        } else {
            Self::Io(e)
        }
    }
}

pub type Result<T> = std::result::Result<T, DataFileError>;
