//! Schema 块（footer）
//!
//! ```text
//! ┌────────────────────────────┐
//! │ doc_len   (u32 BE)         │
//! │ document  (JSON，可加密)   │
//! │ doc_crc32 (u32 BE)         │
//! └────────────────────────────┘
//! ```
//!
//! 文档按 schema 顺序列出每一列：名称、声明类型、落盘类型、列种类；
//! GlobalValue 列另带常量文本，任意列可带 profile 注解。

use serde::{Deserialize, Serialize};

use crate::cipher::StringCipher;
use crate::common::{DataFileError, Result};
use crate::field_type::{LogicalType, NullEncoding, Value};
use crate::schema::{ColumnDefinition, ColumnKind, ProfileEntry, Schema};
use crate::stream::{BinaryReader, BinaryWriter};

pub const FOOTER_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct FooterDoc {
    format_version: u32,
    null_encoding:  NullEncoding,
    row_count:      i64,
    columns:        Vec<ColumnDoc>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnDoc {
    name:          String,
    declared_type: LogicalType,
    stored_type:   LogicalType,
    kind:          ColumnKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    global_value:  Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    profile:       Vec<ProfileEntry>,
}

impl From<&ColumnDefinition> for ColumnDoc {
    fn from(c: &ColumnDefinition) -> Self {
        Self {
            name:          c.name.clone(),
            declared_type: c.declared_type,
            stored_type:   c.storage_type,
            kind:          c.kind,
            global_value:  c.global_value.as_ref()
                .filter(|v| !v.is_null())
                .map(Value::to_string),
            profile:       c.profile.clone(),
        }
    }
}

impl ColumnDoc {
    fn into_definition(self) -> Result<ColumnDefinition> {
        if self.stored_type != self.declared_type.promoted() {
            return Err(DataFileError::Framing(format!(
                "column {:?}: stored type {} does not match promotion of {}",
                self.name, self.stored_type, self.declared_type
            )));
        }
        let col = match self.kind {
            ColumnKind::PerRow => ColumnDefinition::per_row(&self.name, self.declared_type),
            ColumnKind::GlobalValue => {
                let value = match &self.global_value {
                    Some(text) => Value::parse(self.declared_type, text)?,
                    None       => Value::Null,
                };
                ColumnDefinition::global(&self.name, self.declared_type, value)?
            }
        };
        Ok(col.with_profile(self.profile))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Footer {
    pub schema:        Schema,
    pub null_encoding: NullEncoding,
    pub row_count:     i64,
}

impl Footer {
    pub fn write_to(&self, out: &mut BinaryWriter, cipher: Option<&dyn StringCipher>) -> Result<()> {
        let doc = FooterDoc {
            format_version: FOOTER_FORMAT_VERSION,
            null_encoding:  self.null_encoding,
            row_count:      self.row_count,
            columns:        self.schema.columns().iter().map(ColumnDoc::from).collect(),
        };
        let json = serde_json::to_string(&doc)
            .map_err(|e| DataFileError::Schema(format!("cannot serialize schema block: {e}")))?;
        let body = match cipher {
            Some(c) => c.encrypt(&json)?.into_bytes(),
            None    => json.into_bytes(),
        };
        let len = u32::try_from(body.len()).map_err(|_| {
            DataFileError::Schema(format!("schema block too large: {} bytes", body.len()))
        })?;

        out.write_u32(len)?;
        out.write_bytes(&body)?;
        out.write_u32(crc32fast::hash(&body))?;
        Ok(())
    }

    pub fn read_from(
        r:      &mut BinaryReader,
        offset: u64,
        cipher: Option<&dyn StringCipher>,
    ) -> Result<Self> {
        r.seek_to(offset)?;
        let body = r.read_block()?;
        let crc  = r.read_u32()?;
        if crc32fast::hash(&body) != crc {
            return Err(DataFileError::Framing("schema block checksum mismatch".into()));
        }

        let text = String::from_utf8(body)
            .map_err(|_| DataFileError::Framing("schema block is not UTF-8".into()))?;
        let json = match cipher {
            Some(c) => c.decrypt(&text)?,
            None    => text,
        };
        let doc: FooterDoc = serde_json::from_str(&json)
            .map_err(|e| DataFileError::Framing(format!("cannot parse schema block: {e}")))?;
        if doc.format_version != FOOTER_FORMAT_VERSION {
            return Err(DataFileError::Framing(format!(
                "unsupported schema block version {}", doc.format_version
            )));
        }

        let columns = doc.columns.into_iter()
            .map(ColumnDoc::into_definition)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema:        Schema::new(columns)?,
            null_encoding: doc.null_encoding,
            row_count:     doc.row_count,
        })
    }
}
