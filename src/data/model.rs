use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, FixedOffset};

/// Timestamp layout used in every pamDP file, e.g. `2024-01-01T08:00:00-0500`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

// ---------------------------------------------------------------------------
// Value – a single cell in a table column
// ---------------------------------------------------------------------------

/// A dynamically-typed cell value mirroring the dtypes used by pamDP tables.
/// Used as a key in `BTreeMap` / `BTreeSet`, so `Value` must be `Ord`.
#[derive(Debug, Clone)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<FixedOffset>),
    Null,
}

// -- Manual Eq/Ord so Value can live in a BTreeSet --
//
// Equality is defined by `Ord`: variants never compare equal across types and
// floats compare by `total_cmp`, which also keeps `Hash` consistent.

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use Value::*;
        fn discriminant(v: &Value) -> u8 {
            match v {
                Null => 0,
                Bool(_) => 1,
                Integer(_) => 2,
                Float(_) => 3,
                String(_) => 4,
                Timestamp(_) => 5,
            }
        }
        let da = discriminant(self);
        let db = discriminant(other);
        if da != db {
            return da.cmp(&db);
        }
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            _ => std::cmp::Ordering::Equal,
        }
    }
}

impl std::hash::Hash for Value {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::String(s) => s.hash(state),
            Value::Integer(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Bool(b) => b.hash(state),
            Value::Timestamp(t) => t.hash(state),
            Value::Null => {}
        }
    }
}

/// Cell text as written to CSV. `Null` renders as the empty string.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => write!(f, "{s}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Timestamp(t) => write!(f, "{}", t.format(TIMESTAMP_FORMAT)),
            Value::Null => Ok(()),
        }
    }
}

/// Format a float the way the pamDP files carry them: integral values keep
/// one decimal (`3.0`), everything else uses the shortest round-trip form.
pub fn format_float(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        format!("{v}")
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<DateTime<FixedOffset>> for Value {
    fn from(v: DateTime<FixedOffset>) -> Self {
        Value::Timestamp(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to interpret the value as an `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Integer(i) => Some(*i as f64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<FixedOffset>> {
        match self {
            Value::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Text form for string-keyed lookups; `None` for nulls.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Table – ordered columns and rows of cells
// ---------------------------------------------------------------------------

/// A small column-named table: the in-memory form of every CSV the pipeline
/// reads or writes. Rows always have exactly `columns.len()` cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Empty table with the given header.
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Table {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    /// Build a table from a header and rows. Short rows are padded with nulls
    /// and long rows are truncated.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        let mut table = Table { columns, rows: Vec::with_capacity(rows.len()) };
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Build a table from records keyed by column name, in the given column order.
    pub fn from_records(columns: &[&str], records: Vec<BTreeMap<String, Value>>) -> Self {
        let mut table = Table::new(columns.iter().copied());
        for mut rec in records {
            let row = columns
                .iter()
                .map(|c| rec.remove(*c).unwrap_or(Value::Null))
                .collect();
            table.rows.push(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn push_row(&mut self, mut row: Vec<Value>) {
        row.resize(self.columns.len(), Value::Null);
        self.rows.push(row);
    }

    /// Cell at `row` in column `name`; `Null` when the column does not exist.
    pub fn get(&self, row: usize, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        match self.column_index(name) {
            Some(idx) => &self.rows[row][idx],
            None => &NULL,
        }
    }

    /// Iterate over the values of one column. Empty when the column is absent.
    pub fn column(&self, name: &str) -> impl Iterator<Item = &Value> + '_ {
        let idx = self.column_index(name);
        self.rows.iter().filter_map(move |r| idx.map(|i| &r[i]))
    }

    /// Sorted set of unique values of a column.
    pub fn unique_values(&self, name: &str) -> BTreeSet<Value> {
        self.column(name).cloned().collect()
    }

    /// Add a column, or replace it when it already exists.
    pub fn set_column(&mut self, name: &str, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        match self.column_index(name) {
            Some(idx) => {
                for (row, v) in self.rows.iter_mut().zip(values) {
                    row[idx] = v;
                }
            }
            None => {
                self.columns.push(name.to_string());
                let mut values = values.into_iter();
                for row in &mut self.rows {
                    row.push(values.next().unwrap_or(Value::Null));
                }
            }
        }
    }

    /// Add or replace a column holding the same value on every row.
    pub fn fill_column(&mut self, name: &str, value: Value) {
        let values = vec![value; self.rows.len()];
        self.set_column(name, values);
    }

    /// Compute a new column from each row.
    pub fn derive_column<F>(&mut self, name: &str, f: F)
    where
        F: Fn(&Table, usize) -> Value,
    {
        let values: Vec<Value> = (0..self.rows.len()).map(|i| f(self, i)).collect();
        self.set_column(name, values);
    }

    /// Rename columns via `(old, new)` pairs. Unknown names are ignored.
    pub fn rename(&mut self, pairs: &[(&str, &str)]) {
        for (old, new) in pairs {
            if let Some(idx) = self.column_index(old) {
                self.columns[idx] = new.to_string();
            }
        }
    }

    /// Drop the named columns if present.
    pub fn drop_columns(&mut self, names: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|&i| row[i].clone()).collect();
        }
    }

    /// New table with exactly `names` as columns, in that order. Columns the
    /// source lacks come back as nulls.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Table {
        let idx: Vec<Option<usize>> = names.iter().map(|n| self.column_index(n.as_ref())).collect();
        let rows = self
            .rows
            .iter()
            .map(|r| {
                idx.iter()
                    .map(|i| i.map(|i| r[i].clone()).unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Table {
            columns: names.iter().map(|n| n.as_ref().to_string()).collect(),
            rows,
        }
    }

    /// New table holding the rows at `indices`, in that order.
    pub fn take_rows(&self, indices: &[usize]) -> Table {
        Table {
            columns: self.columns.clone(),
            rows: indices.iter().map(|&i| self.rows[i].clone()).collect(),
        }
    }

    /// Keep the rows for which `predicate` holds.
    pub fn filter<F>(&self, predicate: F) -> Table
    where
        F: Fn(&Table, usize) -> bool,
    {
        let indices: Vec<usize> = (0..self.rows.len()).filter(|&i| predicate(self, i)).collect();
        self.take_rows(&indices)
    }

    /// Stable sort by one column.
    pub fn sort_by_column(&mut self, name: &str, descending: bool) {
        let Some(idx) = self.column_index(name) else {
            return;
        };
        self.rows.sort_by(|a, b| {
            let ord = a[idx].cmp(&b[idx]);
            if descending { ord.reverse() } else { ord }
        });
    }

    /// Append the rows of `other`, matched by column name.
    pub fn append(&mut self, other: &Table) {
        let picked = other.select(&self.columns);
        self.rows.extend(picked.rows);
    }

    /// First repeated non-null value of a column, if any.
    pub fn first_duplicate(&self, name: &str) -> Option<&Value> {
        let mut seen = BTreeSet::new();
        self.column(name)
            .filter(|v| !v.is_null())
            .find(|v| !seen.insert(*v))
    }

    pub(crate) fn rows_mut(&mut self) -> &mut Vec<Vec<Value>> {
        &mut self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::from_rows(
            vec!["id".into(), "species".into(), "p".into()],
            vec![
                vec!["a".into(), "Canis lupus".into(), 0.5.into()],
                vec!["b".into(), "Ursus arctos".into(), 0.9.into()],
                vec!["c".into(), "Canis lupus".into(), Value::Null],
            ],
        )
    }

    #[test]
    fn select_reorders_and_pads_missing_columns() {
        let t = sample().select(&["p", "id", "missing"]);
        assert_eq!(t.columns(), &["p", "id", "missing"]);
        assert_eq!(t.get(1, "id"), &Value::from("b"));
        assert!(t.get(0, "missing").is_null());
    }

    #[test]
    fn set_column_replaces_or_appends() {
        let mut t = sample();
        t.fill_column("flag", Value::Bool(false));
        assert_eq!(t.columns().len(), 4);
        t.set_column("id", vec!["x".into(), "y".into(), "z".into()]);
        assert_eq!(t.get(2, "id"), &Value::from("z"));
    }

    #[test]
    fn sort_descending_puts_nulls_last() {
        let mut t = sample();
        t.sort_by_column("p", true);
        assert_eq!(t.get(0, "id"), &Value::from("b"));
        assert!(t.get(2, "p").is_null());
    }

    #[test]
    fn first_duplicate_ignores_nulls() {
        let t = sample();
        assert_eq!(t.first_duplicate("species"), Some(&Value::from("Canis lupus")));
        assert_eq!(t.first_duplicate("p"), None);
    }

    #[test]
    fn display_matches_csv_conventions() {
        assert_eq!(Value::Float(3.0).to_string(), "3.0");
        assert_eq!(Value::Float(0.125).to_string(), "0.125");
        assert_eq!(Value::Bool(false).to_string(), "False");
        assert_eq!(Value::Null.to_string(), "");
    }

    #[test]
    fn integer_and_float_stay_distinct_keys() {
        assert_ne!(Value::Integer(2), Value::Float(2.0));
        assert_ne!(Value::Integer(2).cmp(&Value::Float(2.0)), std::cmp::Ordering::Equal);
        let keys: BTreeSet<Value> = [Value::Integer(2), Value::Float(2.0), Value::Float(2.0)].into_iter().collect();
        assert_eq!(keys.len(), 2);
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn rename_and_drop_columns() {
        let mut t = sample();
        t.rename(&[("p", "probability"), ("absent", "x")]);
        assert_eq!(t.columns(), &["id", "species", "probability"]);
        t.drop_columns(&["species", "absent"]);
        assert_eq!(t.columns(), &["id", "probability"]);
        assert_eq!(t.get(1, "probability"), &Value::Float(0.9));
        assert_eq!(t.rows()[2].len(), 2);
    }
}
