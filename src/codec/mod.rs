//! 字段编解码（每个落盘类型一种）
//!
//! | 落盘类型 | 非空                       | 空值（Sentinel 模式）  |
//! |----------|----------------------------|------------------------|
//! | Boolean  | u8 0/1                     | `false`                |
//! | Char     | u16 UTF-16 码元            | `0`                    |
//! | Integer  | i32                        | `i32::MIN`             |
//! | Long     | i64                        | `0`                    |
//! | Date     | i64 epoch 毫秒             | `0`                    |
//! | Double   | `false` + f64 位模式       | `true`，无载荷         |
//! | String   | `false` + u16 长度前缀字符串 | `true`，无载荷       |
//! | UUID     | `false` + 16 字节          | `true`，无载荷         |
//!
//! Tagged 模式下，前五种也改为 `[is_null 标记][载荷]`，哨兵碰撞随之消失。
//! 后三种在两种模式下字节完全一致。

use std::sync::Arc;

use uuid::Uuid;

use crate::cipher::StringCipher;
use crate::common::{DataFileError, Result};
use crate::field_type::{datetime_from_millis, LogicalType, NullEncoding, Value};
use crate::stream::{BinaryReader, BinaryWriter};

/// Integer 族空值哨兵
pub const NULL_INTEGER: i32 = i32::MIN;
/// Long / Date 空值哨兵
pub const NULL_LONG: i64 = 0;

#[derive(Debug, Clone)]
pub struct FieldCodec {
    storage: LogicalType,
    nulls:   NullEncoding,
    cipher:  Option<Arc<dyn StringCipher>>,
}

impl FieldCodec {
    /// `declared` 先经类型提升再选编码；`cipher` 只对 String 生效
    pub fn new(
        declared: LogicalType,
        nulls:    NullEncoding,
        cipher:   Option<Arc<dyn StringCipher>>,
    ) -> Self {
        let storage = declared.promoted();
        let cipher  = if storage == LogicalType::String { cipher } else { None };
        Self { storage, nulls, cipher }
    }

    pub fn storage_type(&self) -> LogicalType { self.storage }

    /// 该类型是否带前置空值标记
    fn flagged(&self) -> bool {
        match self.storage {
            LogicalType::Double | LogicalType::String | LogicalType::Uuid => true,
            _ => self.nulls == NullEncoding::Tagged,
        }
    }

    /// 写入一个已提升的值（或 Null）
    pub fn encode(&self, out: &mut BinaryWriter, value: &Value) -> Result<()> {
        if self.flagged() {
            out.write_bool(value.is_null())?;
            if value.is_null() {
                return Ok(());
            }
        }

        match (self.storage, value) {
            (LogicalType::Boolean, Value::Null)       => out.write_bool(false),
            (LogicalType::Boolean, Value::Boolean(b)) => out.write_bool(*b),

            (LogicalType::Char, Value::Null)          => out.write_u16(0),
            (LogicalType::Char, Value::Char(c))       => {
                let unit = u16::try_from(*c as u32).map_err(|_| DataFileError::Schema(
                    format!("char {c:?} is outside the Basic Multilingual Plane"),
                ))?;
                out.write_u16(unit)
            }

            (LogicalType::Integer, Value::Null)       => out.write_i32(NULL_INTEGER),
            (LogicalType::Integer, Value::Integer(v)) => out.write_i32(*v),

            (LogicalType::Long, Value::Null)          => out.write_i64(NULL_LONG),
            (LogicalType::Long, Value::Long(v))       => out.write_i64(*v),

            (LogicalType::Date, Value::Null)          => out.write_i64(NULL_LONG),
            (LogicalType::Date, Value::Date(t))       => out.write_i64(t.timestamp_millis()),

            (LogicalType::Double, Value::Double(v))   => out.write_f64(*v),

            (LogicalType::String, Value::String(s))   => match &self.cipher {
                Some(c) => out.write_utf(&c.encrypt(s)?),
                None    => out.write_utf(s),
            },

            (LogicalType::Uuid, Value::Uuid(u))       => out.write_bytes(u.as_bytes()),

            (storage, v) => Err(DataFileError::Schema(format!(
                "value {v:?} cannot be stored as {storage}"
            ))),
        }
    }

    pub fn decode(&self, input: &mut BinaryReader) -> Result<Value> {
        if self.flagged() && input.read_bool()? {
            return Ok(Value::Null);
        }
        let tagged = self.nulls == NullEncoding::Tagged;

        let v = match self.storage {
            LogicalType::Boolean => Value::Boolean(input.read_bool()?),
            LogicalType::Char    => match input.read_u16()? {
                0 if !tagged => Value::Null,
                unit => Value::Char(char::from_u32(unit as u32).ok_or_else(|| {
                    DataFileError::Framing(format!("lone surrogate {unit:#06x} in char column"))
                })?),
            },
            LogicalType::Integer => match input.read_i32()? {
                NULL_INTEGER if !tagged => Value::Null,
                v => Value::Integer(v),
            },
            LogicalType::Long    => match input.read_i64()? {
                NULL_LONG if !tagged => Value::Null,
                v => Value::Long(v),
            },
            LogicalType::Date    => match input.read_i64()? {
                NULL_LONG if !tagged => Value::Null,
                ms => Value::Date(datetime_from_millis(ms).ok_or_else(|| {
                    DataFileError::Framing(format!("date millis {ms} out of range"))
                })?),
            },
            LogicalType::Double  => Value::Double(input.read_f64()?),
            LogicalType::String  => {
                let s = input.read_utf()?;
                match &self.cipher {
                    Some(c) => Value::String(c.decrypt(&s)?),
                    None    => Value::String(s),
                }
            }
            LogicalType::Uuid    => {
                let mut b = [0u8; 16];
                input.read_exact(&mut b)?;
                Value::Uuid(Uuid::from_bytes(b))
            }
            other => return Err(DataFileError::UnsupportedType(format!(
                "{other} has no on-disk codec; it is promoted to {}", other.promoted()
            ))),
        };
        Ok(v)
    }
}
