//! 列定义与 Schema
//!
//! Schema 是有序的列定义序列，决定整个容器的行形状。列分两种：
//! - **PerRow**      — 每行都携带一个值
//! - **GlobalValue** — 全部行共享一个常量，只在 footer 中存一次

use serde::{Deserialize, Serialize};

use crate::common::{DataFileError, Result};
use crate::field_type::{LogicalType, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnKind {
    PerRow,
    GlobalValue,
}

/// 列的统计注解（min/max/sum 等），原样传给下游
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub name:      String,
    pub data_type: String,
    pub value:     String,
}

impl ProfileEntry {
    pub fn new(name: &str, data_type: &str, value: impl ToString) -> Self {
        Self { name: name.into(), data_type: data_type.into(), value: value.to_string() }
    }
}

// ── 列定义 ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name:          String,
    pub declared_type: LogicalType,
    /// 提升后的落盘类型
    pub storage_type:  LogicalType,
    pub kind:          ColumnKind,
    /// 仅 GlobalValue 列有值（可以是 `Value::Null`）
    pub global_value:  Option<Value>,
    pub profile:       Vec<ProfileEntry>,
}

impl ColumnDefinition {
    /// 构建逐行列
    pub fn per_row(name: &str, declared_type: LogicalType) -> Self {
        Self {
            name: name.into(), declared_type,
            storage_type: declared_type.promoted(),
            kind: ColumnKind::PerRow,
            global_value: None, profile: Vec::new(),
        }
    }

    /// 构建全局值列
    pub fn global(name: &str, declared_type: LogicalType, value: Value) -> Result<Self> {
        let mut col = Self::per_row(name, declared_type);
        col.check_value(&value)?;
        col.kind = ColumnKind::GlobalValue;
        col.global_value = Some(value);
        Ok(col)
    }

    pub fn with_profile(mut self, profile: Vec<ProfileEntry>) -> Self {
        self.profile = profile; self
    }

    pub fn is_global(&self) -> bool { self.kind == ColumnKind::GlobalValue }

    /// 值必须与声明类型一致（Null 总是允许）
    pub fn check_value(&self, value: &Value) -> Result<()> {
        match value.logical_type() {
            None                                    => Ok(()),
            Some(t) if t == self.declared_type      => Ok(()),
            Some(t) => Err(DataFileError::Schema(format!(
                "column {:?} is declared {} but got a {} value", self.name, self.declared_type, t
            ))),
        }
    }
}

// ── Schema ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    columns: Vec<ColumnDefinition>,
}

impl Schema {
    /// 从完整列定义构建，校验列名唯一（大小写不敏感）
    pub fn new(columns: Vec<ColumnDefinition>) -> Result<Self> {
        let mut schema = Self { columns: Vec::with_capacity(columns.len()) };
        for col in columns {
            schema.push(col)?;
        }
        Ok(schema)
    }

    /// 平行的列名/类型数组
    pub fn from_names_and_types(names: &[&str], types: &[LogicalType]) -> Result<Self> {
        if names.len() != types.len() {
            return Err(DataFileError::Schema(format!(
                "{} column names but {} column types", names.len(), types.len()
            )));
        }
        let mut b = SchemaBuilder::with_width(names.len());
        for (i, (name, t)) in names.iter().zip(types).enumerate() {
            b.define_column(i, name, *t)?;
        }
        b.build()
    }

    /// `[[name, type_name], ...]` 矩阵，类型名见 `LogicalType::from_str`
    pub fn from_matrix<S: AsRef<str>>(matrix: &[[S; 2]]) -> Result<Self> {
        let mut b = SchemaBuilder::with_width(matrix.len());
        for (i, [name, type_name]) in matrix.iter().enumerate() {
            b.define_column(i, name.as_ref(), type_name.as_ref().parse()?)?;
        }
        b.build()
    }

    pub(crate) fn push(&mut self, col: ColumnDefinition) -> Result<()> {
        if col.name.trim().is_empty() {
            return Err(DataFileError::Schema("column name must not be empty".into()));
        }
        if self.find(&col.name).is_some() {
            return Err(DataFileError::Schema(format!("duplicate column {:?}", col.name)));
        }
        self.columns.push(col);
        Ok(())
    }

    pub fn columns(&self) -> &[ColumnDefinition] { &self.columns }
    pub fn len(&self)      -> usize { self.columns.len() }
    pub fn is_empty(&self) -> bool  { self.columns.is_empty() }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnDefinition> {
        self.find(name).map(move |i| &mut self.columns[i])
    }

    pub fn per_row_columns(&self) -> impl Iterator<Item = &ColumnDefinition> {
        self.columns.iter().filter(|c| !c.is_global())
    }

    pub fn per_row_count(&self) -> usize { self.per_row_columns().count() }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    pub fn declared_types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.declared_type).collect()
    }

    pub fn storage_types(&self) -> Vec<LogicalType> {
        self.columns.iter().map(|c| c.storage_type).collect()
    }
}

// ── SchemaBuilder ─────────────────────────────────────────────────────────────

/// 按下标逐列定义；`build` 时要求每个位置都已定义
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    slots: Vec<Option<ColumnDefinition>>,
}

impl SchemaBuilder {
    pub fn with_width(width: usize) -> Self {
        Self { slots: vec![None; width] }
    }

    pub fn define_column(&mut self, index: usize, name: &str, declared: LogicalType) -> Result<()> {
        self.define(index, ColumnDefinition::per_row(name, declared))
    }

    pub fn define_global(
        &mut self,
        index:    usize,
        name:     &str,
        declared: LogicalType,
        value:    Value,
    ) -> Result<()> {
        self.define(index, ColumnDefinition::global(name, declared, value)?)
    }

    fn define(&mut self, index: usize, col: ColumnDefinition) -> Result<()> {
        let width = self.slots.len();
        let slot = self.slots.get_mut(index).ok_or_else(|| DataFileError::Schema(format!(
            "column index {index} out of range for a {width}-column schema"
        )))?;
        if let Some(prev) = slot {
            return Err(DataFileError::Schema(format!(
                "column index {index} already defined as {:?}", prev.name
            )));
        }
        *slot = Some(col);
        Ok(())
    }

    pub fn build(self) -> Result<Schema> {
        let mut columns = Vec::with_capacity(self.slots.len());
        for (i, slot) in self.slots.into_iter().enumerate() {
            columns.push(slot.ok_or_else(|| {
                DataFileError::Schema(format!("column index {i} was never defined"))
            })?);
        }
        Schema::new(columns)
    }
}
