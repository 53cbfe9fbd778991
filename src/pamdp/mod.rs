//! pamDP (Passive Acoustic Monitoring Data Package) tables.
//!
//! Every entity is a [`PamSchema`]: an ordered list of [`ColumnSpec`]s carrying
//! the dtype, the mandatory flag, the uniqueness flag and, for enumerated
//! columns, the allowed values. [`PamSchema::validate`] runs the checks in a
//! fixed order (column set, dtype cast, nulls, duplicates, enumerations) and
//! returns the cast table in canonical column order.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use thiserror::Error;

use crate::data::model::{TIMESTAMP_FORMAT, Table, Value};

mod dataset;
pub mod deployments;
pub mod field_deployments;
pub mod media;
pub mod observations;
pub mod target_species;

pub use dataset::PamDataset;

// ---------------------------------------------------------------------------
// Column specifications
// ---------------------------------------------------------------------------

/// Target type of a pamDP column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dtype {
    Text,
    Float,
    Integer,
    Bool,
    Timestamp,
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dtype::Text => "str",
            Dtype::Float => "float64",
            Dtype::Integer => "int64",
            Dtype::Bool => "bool",
            Dtype::Timestamp => "datetime",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub dtype: Dtype,
    pub required: bool,
    pub unique: bool,
    pub allowed: Option<&'static [&'static str]>,
}

impl ColumnSpec {
    pub const fn new(name: &'static str, dtype: Dtype) -> Self {
        ColumnSpec { name, dtype, required: false, unique: false, allowed: None }
    }

    pub const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub const fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub const fn one_of(mut self, allowed: &'static [&'static str]) -> Self {
        self.allowed = Some(allowed);
        self
    }
}

/// A named, ordered set of column specs.
#[derive(Debug, Clone, Copy)]
pub struct PamSchema {
    pub name: &'static str,
    pub columns: &'static [ColumnSpec],
    /// When false only the listed columns are enforced; extra columns are kept.
    pub exact_columns: bool,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Sorted, comma-separated list for error messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnList(pub Vec<String>);

impl fmt::Display for ColumnList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum SchemaError {
    #[error("Missing columns for pamDP.{schema} format: {missing}")]
    MissingColumns { schema: &'static str, missing: ColumnList },

    #[error("Extra columns for pamDP.{schema} format, not part of the format: {extra}")]
    ExtraColumns { schema: &'static str, extra: ColumnList },

    #[error(
        "Column mismatch for pamDP.{schema} format. Missing columns: {missing}. Extra columns: {extra}"
    )]
    ColumnMismatch { schema: &'static str, missing: ColumnList, extra: ColumnList },

    #[error("Column {column} row {row}: cannot cast '{value}' to {dtype}")]
    TypeMismatch { column: String, row: usize, value: String, dtype: Dtype },

    #[error("Mandatory column {column} contains null values.")]
    NullInMandatory { column: String },

    #[error("Column {column} has duplicate values but should be unique (e.g. '{value}').")]
    DuplicateValues { column: String, value: String },

    #[error("Column {column} has value '{value}' outside the allowed set: {allowed}")]
    InvalidEnumValue { column: String, value: String, allowed: ColumnList },
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl PamSchema {
    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    /// Validate `table` and return it cast and in canonical column order.
    pub fn validate(&self, table: &Table, offset: FixedOffset) -> Result<Table, SchemaError> {
        self.check_columns(table)?;

        let mut ordered: Vec<String> = self.columns.iter().map(|c| c.name.to_string()).collect();
        if !self.exact_columns {
            ordered.extend(
                table
                    .columns()
                    .iter()
                    .filter(|c| !self.columns.iter().any(|s| s.name == c.as_str()))
                    .cloned(),
            );
        }
        let mut out = table.select(&ordered);

        for (idx, spec) in self.columns.iter().enumerate() {
            for (row, cells) in out.rows_mut().iter_mut().enumerate() {
                let cell = &mut cells[idx];
                *cell = cast(cell, spec.dtype, offset).map_err(|_| SchemaError::TypeMismatch {
                    column: spec.name.to_string(),
                    row,
                    value: cell.to_string(),
                    dtype: spec.dtype,
                })?;
            }
        }

        for spec in self.columns.iter().filter(|c| c.required) {
            if out.column(spec.name).any(Value::is_null) {
                return Err(SchemaError::NullInMandatory { column: spec.name.to_string() });
            }
        }

        for spec in self.columns.iter().filter(|c| c.unique) {
            if let Some(dup) = out.first_duplicate(spec.name) {
                return Err(SchemaError::DuplicateValues {
                    column: spec.name.to_string(),
                    value: dup.to_string(),
                });
            }
        }

        for spec in self.columns.iter() {
            let Some(allowed) = spec.allowed else { continue };
            let bad = out
                .column(spec.name)
                .filter_map(Value::as_text)
                .find(|v| !allowed.contains(&v.as_str()));
            if let Some(value) = bad {
                return Err(SchemaError::InvalidEnumValue {
                    column: spec.name.to_string(),
                    value,
                    allowed: ColumnList(allowed.iter().map(|s| s.to_string()).collect()),
                });
            }
        }

        Ok(out)
    }

    fn check_columns(&self, table: &Table) -> Result<(), SchemaError> {
        let expected: BTreeSet<&str> = self.columns.iter().map(|c| c.name).collect();
        let present: BTreeSet<&str> = table.columns().iter().map(String::as_str).collect();

        let missing = ColumnList(expected.difference(&present).map(|s| s.to_string()).collect());
        let extra = if self.exact_columns {
            ColumnList(present.difference(&expected).map(|s| s.to_string()).collect())
        } else {
            ColumnList(Vec::new())
        };

        match (missing.0.is_empty(), extra.0.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => Err(SchemaError::MissingColumns { schema: self.name, missing }),
            (true, false) => Err(SchemaError::ExtraColumns { schema: self.name, extra }),
            (false, false) => Err(SchemaError::ColumnMismatch { schema: self.name, missing, extra }),
        }
    }
}

// ---------------------------------------------------------------------------
// Casting
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct CastError;

/// Cast one cell to `dtype`. Nulls stay null.
pub fn cast(value: &Value, dtype: Dtype, offset: FixedOffset) -> Result<Value, CastError> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let out = match dtype {
        Dtype::Text => match value {
            Value::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        },
        Dtype::Float => match value {
            Value::Float(v) => Value::Float(*v),
            Value::Integer(i) => Value::Float(*i as f64),
            Value::String(s) => {
                let t = s.trim();
                if t.eq_ignore_ascii_case("nan") {
                    Value::Null
                } else {
                    Value::Float(t.parse().map_err(|_| CastError)?)
                }
            }
            _ => return Err(CastError),
        },
        Dtype::Integer => match value {
            Value::Integer(i) => Value::Integer(*i),
            Value::Float(v) if v.fract() == 0.0 => Value::Integer(*v as i64),
            Value::String(s) => {
                let t = s.trim();
                match t.parse::<i64>() {
                    Ok(i) => Value::Integer(i),
                    Err(_) => {
                        let v: f64 = t.parse().map_err(|_| CastError)?;
                        if v.fract() != 0.0 {
                            return Err(CastError);
                        }
                        Value::Integer(v as i64)
                    }
                }
            }
            _ => return Err(CastError),
        },
        Dtype::Bool => match value {
            Value::Bool(b) => Value::Bool(*b),
            Value::Integer(0) => Value::Bool(false),
            Value::Integer(1) => Value::Bool(true),
            Value::String(s) => Value::Bool(parse_bool(s).ok_or(CastError)?),
            _ => return Err(CastError),
        },
        Dtype::Timestamp => match value {
            Value::Timestamp(t) => Value::Timestamp(*t),
            Value::String(s) => Value::Timestamp(parse_timestamp(s, offset).ok_or(CastError)?),
            _ => return Err(CastError),
        },
    };
    Ok(out)
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "t" => Some(true),
        "false" | "0" | "no" | "n" | "f" => Some(false),
        _ => None,
    }
}

/// Parse a timestamp. Offset-aware text keeps its offset; naive date-times
/// and bare dates are localized to `offset`.
pub fn parse_timestamp(s: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    if let Ok(t) = DateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Some(t);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t);
    }
    if let Ok(t) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%z") {
        return Some(t);
    }
    const NAIVE: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
    ];
    for fmt in NAIVE {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return offset.from_local_datetime(&naive).single();
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|naive| offset.from_local_datetime(&naive).single())
}
