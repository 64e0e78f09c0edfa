//! 逻辑类型、落盘类型提升与运行时值

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::common::{DataFileError, Result};

/// 列的逻辑类型（写入端可见的完整集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogicalType {
    Boolean,
    Byte,
    Char,
    Short,
    Integer,
    Long,
    Float,
    Double,
    BigDecimal,
    Date,
    SqlTimestamp,
    String,
    #[serde(rename = "UUID")]
    Uuid,
}

impl LogicalType {
    pub const ALL: [LogicalType; 13] = [
        Self::Boolean, Self::Byte, Self::Char, Self::Short, Self::Integer,
        Self::Long, Self::Float, Self::Double, Self::BigDecimal, Self::Date,
        Self::SqlTimestamp, Self::String, Self::Uuid,
    ];

    /// 提升为落盘类型；读取端只会见到提升后的类型
    pub fn promoted(self) -> Self {
        match self {
            Self::Byte | Self::Short        => Self::Integer,
            Self::Float | Self::BigDecimal  => Self::Double,
            Self::SqlTimestamp              => Self::Date,
            other                           => other,
        }
    }

    pub fn is_canonical(self) -> bool {
        self.promoted() == self
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Boolean      => "Boolean",
            Self::Byte         => "Byte",
            Self::Char         => "Char",
            Self::Short        => "Short",
            Self::Integer      => "Integer",
            Self::Long         => "Long",
            Self::Float        => "Float",
            Self::Double       => "Double",
            Self::BigDecimal   => "BigDecimal",
            Self::Date         => "Date",
            Self::SqlTimestamp => "SqlTimestamp",
            Self::String       => "String",
            Self::Uuid         => "UUID",
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LogicalType {
    type Err = DataFileError;

    /// 大小写不敏感；兼容旧式 `IntegerData` 这类带 `Data` 后缀的写法
    fn from_str(s: &str) -> Result<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let key   = lower.strip_suffix("data").unwrap_or(&lower);
        let t = match key {
            "boolean" | "bool"              => Self::Boolean,
            "byte"                          => Self::Byte,
            "char"                          => Self::Char,
            "short"                         => Self::Short,
            "integer" | "int"               => Self::Integer,
            "long"                          => Self::Long,
            "float"                         => Self::Float,
            "double"                        => Self::Double,
            "bigdecimal" | "decimal"        => Self::BigDecimal,
            "date"                          => Self::Date,
            "sqltimestamp" | "timestamp"    => Self::SqlTimestamp,
            "string"                        => Self::String,
            "uuid"                          => Self::Uuid,
            _ => return Err(DataFileError::UnsupportedType(s.to_string())),
        };
        Ok(t)
    }
}

/// 空值在行流中的表示方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullEncoding {
    /// 哨兵值：Boolean→false、Integer→i32::MIN、Long/Date→0（与旧容器字节兼容）
    #[default]
    Sentinel,
    /// 每个值前加 1 字节存在标记，消除哨兵碰撞
    Tagged,
}

/// 列值（运行时表示）
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Byte(i8),
    Char(char),
    Short(i16),
    Integer(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal { digits: i128, scale: i16 },
    Date(DateTime<Utc>),
    SqlTimestamp(DateTime<Utc>),
    String(String),
    Uuid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// 值对应的逻辑类型；Null 无类型
    pub fn logical_type(&self) -> Option<LogicalType> {
        let t = match self {
            Self::Null            => return None,
            Self::Boolean(_)      => LogicalType::Boolean,
            Self::Byte(_)         => LogicalType::Byte,
            Self::Char(_)         => LogicalType::Char,
            Self::Short(_)        => LogicalType::Short,
            Self::Integer(_)      => LogicalType::Integer,
            Self::Long(_)         => LogicalType::Long,
            Self::Float(_)        => LogicalType::Float,
            Self::Double(_)       => LogicalType::Double,
            Self::Decimal { .. }  => LogicalType::BigDecimal,
            Self::Date(_)         => LogicalType::Date,
            Self::SqlTimestamp(_) => LogicalType::SqlTimestamp,
            Self::String(_)       => LogicalType::String,
            Self::Uuid(_)         => LogicalType::Uuid,
        };
        Some(t)
    }

    /// 转换为落盘类型的值（与 `LogicalType::promoted` 一一对应）
    pub fn promote(self) -> Value {
        match self {
            Self::Byte(v)                  => Self::Integer(v as i32),
            Self::Short(v)                 => Self::Integer(v as i32),
            Self::Float(v)                 => Self::Double(v as f64),
            Self::Decimal { digits, scale } => Self::Double(decimal_to_f64(digits, scale)),
            Self::SqlTimestamp(t)          => Self::Date(t),
            other                          => other,
        }
    }

    /// 按给定逻辑类型解析文本（全局值在 footer 中以文本保存）
    pub fn parse(logical_type: LogicalType, text: &str) -> Result<Value> {
        let bad = || DataFileError::Framing(format!("cannot parse {text:?} as {logical_type}"));
        let v = match logical_type {
            LogicalType::Boolean      => Self::Boolean(text.parse().map_err(|_| bad())?),
            LogicalType::Byte         => Self::Byte(text.parse().map_err(|_| bad())?),
            LogicalType::Char         => {
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Self::Char(c),
                    _               => return Err(bad()),
                }
            }
            LogicalType::Short        => Self::Short(text.parse().map_err(|_| bad())?),
            LogicalType::Integer      => Self::Integer(text.parse().map_err(|_| bad())?),
            LogicalType::Long         => Self::Long(text.parse().map_err(|_| bad())?),
            LogicalType::Float        => Self::Float(text.parse().map_err(|_| bad())?),
            LogicalType::Double       => Self::Double(text.parse().map_err(|_| bad())?),
            LogicalType::BigDecimal   => {
                let (digits, scale) = parse_decimal(text).ok_or_else(bad)?;
                Self::Decimal { digits, scale }
            }
            LogicalType::Date         => Self::Date(parse_datetime(text).ok_or_else(bad)?),
            LogicalType::SqlTimestamp => Self::SqlTimestamp(parse_datetime(text).ok_or_else(bad)?),
            LogicalType::String       => Self::String(text.to_string()),
            LogicalType::Uuid         => Self::Uuid(Uuid::parse_str(text).map_err(|_| bad())?),
        };
        Ok(v)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v)    => Some(*v as i64),
            Self::Short(v)   => Some(*v as i64),
            Self::Integer(v) => Some(*v as i64),
            Self::Long(v)    => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self { Self::String(s) => Some(s), _ => None }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null             => write!(f, "NULL"),
            Self::Boolean(v)       => write!(f, "{v}"),
            Self::Byte(v)          => write!(f, "{v}"),
            Self::Char(v)          => write!(f, "{v}"),
            Self::Short(v)         => write!(f, "{v}"),
            Self::Integer(v)       => write!(f, "{v}"),
            Self::Long(v)          => write!(f, "{v}"),
            Self::Float(v)         => write!(f, "{v}"),
            Self::Double(v)        => write!(f, "{v}"),
            Self::Decimal { digits, scale } => f.write_str(&format_decimal(*digits, *scale)),
            Self::Date(t) | Self::SqlTimestamp(t) =>
                f.write_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true)),
            Self::String(s)        => f.write_str(s),
            Self::Uuid(u)          => write!(f, "{}", u.hyphenated()),
        }
    }
}

// ── 时间 ──────────────────────────────────────────────────────────────────────

/// 落盘时间精度为毫秒
pub fn datetime_from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text).ok().map(|t| t.with_timezone(&Utc))
}

// ── Decimal ───────────────────────────────────────────────────────────────────

fn decimal_to_f64(digits: i128, scale: i16) -> f64 {
    digits as f64 / 10f64.powi(scale as i32)
}

fn format_decimal(digits: i128, scale: i16) -> String {
    if scale <= 0 {
        let zeros = "0".repeat(scale.unsigned_abs() as usize);
        return if digits == 0 { "0".into() } else { format!("{digits}{zeros}") };
    }
    let scale  = scale as usize;
    let sign   = if digits < 0 { "-" } else { "" };
    let abs    = digits.unsigned_abs().to_string();
    let padded = format!("{abs:0>width$}", width = scale + 1);
    let (int, frac) = padded.split_at(padded.len() - scale);
    format!("{sign}{int}.{frac}")
}

fn parse_decimal(text: &str) -> Option<(i128, i16)> {
    let text = text.trim();
    let (int, frac) = match text.split_once('.') {
        Some((i, f)) => (i, f),
        None         => (text, ""),
    };
    if frac.chars().any(|c| !c.is_ascii_digit()) {
        return None;
    }
    let digits: i128 = format!("{int}{frac}").parse().ok()?;
    Some((digits, i16::try_from(frac.len()).ok()?))
}
