//! # etl-datafile
//!
//! ETL 流水线各阶段之间交换表格数据所用的二进制容器：行存、自带 schema、
//! 可随机定位、内存/磁盘自动切换。
//!
//! ## 整体架构
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │  DataWriter                          DataReader          │
//! │   set_schema / write_row / close      get_data_row       │
//! │          │                            seek_to_row        │
//! │          ▼                                 ▲             │
//! │   ┌──────────────┐   DataHandle    ┌──────────────┐      │
//! │   │ BinaryWriter │ ─(Bytes/文件)─► │ BinaryReader │      │
//! │   │ 内存 → 溢出  │                 │              │      │
//! │   └──────────────┘                 └──────────────┘      │
//! │          │ FieldCodec × N（按落盘类型，Sentinel/Tagged）  │
//! │          │ StringCipher（加密容器的 String 与 footer）    │
//! └──────────┼───────────────────────────────────────────────┘
//!            ▼
//!   ┌─────────────────────────────┐
//!   │ Header      (两阶段提交)    │
//!   │ Row stream                  │
//!   │ Index block (行号 → 偏移)   │
//!   │ Schema block (JSON + CRC32) │
//!   └─────────────────────────────┘
//! ```

// ── 基础 ──────────────────────────────────────────────────────────────────────
pub mod common;
pub mod config;
pub mod field_type;
pub mod cipher;

// ── 字节流 / 编解码 ───────────────────────────────────────────────────────────
pub mod stream;
pub mod codec;

// ── 容器结构 ──────────────────────────────────────────────────────────────────
pub mod schema;
pub mod header;
pub mod index;
pub mod footer;

// ── 读写 ──────────────────────────────────────────────────────────────────────
pub mod handle;
pub mod writer;
pub mod reader;

pub use cipher::{StringCipher, XorHexCipher};
pub use common::{DataFileError, Result};
pub use config::{ViewSource, WriterOptions};
pub use field_type::{LogicalType, NullEncoding, Value};
pub use handle::DataHandle;
pub use header::{FileKind, Header};
pub use reader::DataReader;
pub use schema::{ColumnDefinition, ColumnKind, ProfileEntry, Schema, SchemaBuilder};
pub use writer::{DataWriter, WriterState};
