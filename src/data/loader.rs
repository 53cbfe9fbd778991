use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array,
    StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use calamine::{Data, Reader, open_workbook_auto};
use chrono::{DateTime, Timelike};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde_json::Value as JsonValue;

use super::model::{TIMESTAMP_FORMAT, Table, Value};

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// Load a table from a file, inferring cell types. Dispatch by extension.
///
/// Supported formats:
/// * `.csv`     – header row plus one row per record
/// * `.json`    – `[{ "column": value, ... }, ...]` (pandas `orient='records'`)
/// * `.parquet` – flat columns of strings, ints, floats or bools
/// * `.xlsx`    – first worksheet, header row first (field sheet templates)
pub fn load_file(path: &Path) -> Result<Table> {
    match extension(path).as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path, guess_value_type),
        "xlsx" | "xlsm" | "xls" | "ods" => load_xlsx(path, guess_value_type),
        other => bail!("Unsupported file extension: .{other}"),
    }
}

/// Read a CSV or spreadsheet keeping every non-empty cell as text. Schema
/// validation casts from these raw strings so identifiers like `007`
/// survive untouched.
pub fn read_text(path: &Path) -> Result<Table> {
    let keep_text = |s: &str| {
        if s.is_empty() {
            Value::Null
        } else {
            Value::String(s.to_string())
        }
    };
    match extension(path).as_str() {
        "xlsx" | "xlsm" | "xls" | "ods" => load_xlsx(path, keep_text),
        _ => load_csv(path, keep_text),
    }
}

/// Write a table, dispatching on the extension (`.csv` or `.parquet`).
pub fn save_file(table: &Table, path: &Path) -> Result<()> {
    match extension(path).as_str() {
        "parquet" | "pq" => save_parquet(table, path),
        "csv" => save_csv(table, path),
        other => bail!("Unsupported output extension: .{other}"),
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating directory {}", parent.display()))?;
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Records-oriented JSON, the default `df.to_json(orient='records')`:
///
/// ```json
/// [
///   { "deploymentID": "S1", "latitude": 4.6, "longitude": -74.1 },
///   ...
/// ]
/// ```
///
/// Columns are ordered by first appearance.
fn load_json(path: &Path) -> Result<Table> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: JsonValue = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root.as_array().context("Expected top-level JSON array")?;

    let mut columns: Vec<String> = Vec::new();
    for (i, rec) in records.iter().enumerate() {
        let obj = rec
            .as_object()
            .with_context(|| format!("Row {i} is not a JSON object"))?;
        for key in obj.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns.clone());
    for rec in records {
        let row = columns
            .iter()
            .map(|c| rec.get(c).map(json_to_value).unwrap_or(Value::Null))
            .collect();
        table.push_row(row);
    }
    Ok(table)
}

fn json_to_value(val: &JsonValue) -> Value {
    match val {
        JsonValue::String(s) => guess_value_type(s),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i)
            } else if let Some(f) = n.as_f64() {
                Value::Float(f)
            } else {
                Value::String(n.to_string())
            }
        }
        JsonValue::Bool(b) => Value::Bool(*b),
        JsonValue::Null => Value::Null,
        other => Value::String(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Spreadsheet loader
// ---------------------------------------------------------------------------

/// First worksheet of a workbook. Every cell is rendered to text first so
/// spreadsheets go through the same `parse` as CSV cells.
fn load_xlsx(path: &Path, parse: impl Fn(&str) -> Value) -> Result<Table> {
    let mut workbook =
        open_workbook_auto(path).with_context(|| format!("opening workbook {}", path.display()))?;
    let range = workbook
        .worksheet_range_at(0)
        .with_context(|| format!("{} has no worksheets", path.display()))?
        .with_context(|| format!("reading first worksheet of {}", path.display()))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(header) => header.iter().map(cell_text).collect(),
        None => Vec::new(),
    };
    let mut table = Table::new(headers);
    for row in rows {
        if row.iter().all(|c| matches!(c, Data::Empty)) {
            continue;
        }
        table.push_row(row.iter().map(|c| parse(cell_text(c).trim())).collect());
    }
    Ok(table)
}

/// Spreadsheet cell as CSV-like text. Date cells become `YYYY-MM-DD`,
/// time-only cells `HH:MM:SS`.
fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => {
            let Some(when) = dt.as_datetime() else {
                return dt.as_f64().to_string();
            };
            if dt.as_f64() < 1.0 {
                when.format("%H:%M:%S").to_string()
            } else if when.num_seconds_from_midnight() == 0 {
                when.format("%Y-%m-%d").to_string()
            } else {
                when.format("%Y-%m-%d %H:%M:%S").to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CSV loader / writer
// ---------------------------------------------------------------------------

fn load_csv(path: &Path, parse: impl Fn(&str) -> Value) -> Result<Table> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening CSV {}", path.display()))?;
    let headers: Vec<String> = reader
        .headers()
        .context("reading CSV headers")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect();

    let mut table = Table::new(headers);
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        table.push_row(record.iter().map(|cell| parse(cell.trim())).collect());
    }
    Ok(table)
}

/// Write a table as CSV with a header row. Nulls become empty cells.
pub fn save_csv(table: &Table, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV {}", path.display()))?;
    writer.write_record(table.columns()).context("writing CSV header")?;
    for row in table.rows() {
        writer
            .write_record(row.iter().map(|v| v.to_string()))
            .context("writing CSV row")?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

/// Infer a cell type from CSV text. Timestamps in the pamDP layout or RFC 3339
/// are recognised; everything else that is not numeric or boolean stays text.
pub fn guess_value_type(s: &str) -> Value {
    if s.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = s.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(f) = s.parse::<f64>() {
        return Value::Float(f);
    }
    match s {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(t) = DateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
        return Value::Timestamp(t);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Value::Timestamp(t);
    }
    Value::String(s.to_string())
}

// ---------------------------------------------------------------------------
// Parquet loader / writer
// ---------------------------------------------------------------------------

/// Load a Parquet file with flat columns. Works with files written by both
/// **Pandas** (`df.to_parquet()`) and **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<Table> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build().context("building parquet reader")?;

    let mut table = Table::new(columns);
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        for row in 0..batch.num_rows() {
            let values = batch
                .columns()
                .iter()
                .map(|col| extract_value(col, row))
                .collect::<Result<Vec<_>>>()
                .with_context(|| format!("Row {row}"))?;
            table.push_row(values);
        }
    }
    Ok(table)
}

/// Extract a single cell from an Arrow column at a given row.
fn extract_value(col: &ArrayRef, row: usize) -> Result<Value> {
    if col.is_null(row) {
        return Ok(Value::Null);
    }
    let value = match col.data_type() {
        DataType::Utf8 => guess_value_type(col.as_string::<i32>().value(row)),
        DataType::LargeUtf8 => guess_value_type(col.as_string::<i64>().value(row)),
        DataType::Int32 => {
            let arr = col.as_any().downcast_ref::<Int32Array>().context("expected Int32Array")?;
            Value::Integer(arr.value(row) as i64)
        }
        DataType::Int64 => {
            let arr = col.as_any().downcast_ref::<Int64Array>().context("expected Int64Array")?;
            Value::Integer(arr.value(row))
        }
        DataType::Float32 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float32Array>()
                .context("expected Float32Array")?;
            Value::Float(arr.value(row) as f64)
        }
        DataType::Float64 => {
            let arr = col
                .as_any()
                .downcast_ref::<Float64Array>()
                .context("expected Float64Array")?;
            Value::Float(arr.value(row))
        }
        DataType::Boolean => {
            let arr = col
                .as_any()
                .downcast_ref::<BooleanArray>()
                .context("expected BooleanArray")?;
            Value::Bool(arr.value(row))
        }
        other => bail!("Unsupported parquet column type {other:?}"),
    };
    Ok(value)
}

/// Arrow type for a column: the narrowest type holding every non-null cell.
/// Mixed or timestamp columns are written as text.
fn column_type(table: &Table, name: &str) -> DataType {
    let mut ty: Option<DataType> = None;
    for v in table.column(name) {
        let cell = match v {
            Value::Null => continue,
            Value::Integer(_) => DataType::Int64,
            Value::Float(_) => DataType::Float64,
            Value::Bool(_) => DataType::Boolean,
            Value::String(_) | Value::Timestamp(_) => DataType::Utf8,
        };
        ty = Some(match (ty, cell) {
            (None, c) => c,
            (Some(a), b) if a == b => a,
            (Some(DataType::Int64), DataType::Float64) | (Some(DataType::Float64), DataType::Int64) => {
                DataType::Float64
            }
            _ => DataType::Utf8,
        });
    }
    ty.unwrap_or(DataType::Utf8)
}

/// Write a table as a single-batch Parquet file.
pub fn save_parquet(table: &Table, path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut fields = Vec::with_capacity(table.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(table.columns().len());

    for name in table.columns() {
        let ty = column_type(table, name);
        let array: ArrayRef = match ty {
            DataType::Int64 => Arc::new(Int64Array::from(
                table
                    .column(name)
                    .map(|v| match v {
                        Value::Integer(i) => Some(*i),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            DataType::Float64 => Arc::new(Float64Array::from(
                table.column(name).map(Value::as_f64).collect::<Vec<_>>(),
            )),
            DataType::Boolean => Arc::new(BooleanArray::from(
                table
                    .column(name)
                    .map(|v| match v {
                        Value::Bool(b) => Some(*b),
                        _ => None,
                    })
                    .collect::<Vec<_>>(),
            )),
            _ => Arc::new(StringArray::from(
                table.column(name).map(Value::as_text).collect::<Vec<_>>(),
            )),
        };
        fields.push(Field::new(name, array.data_type().clone(), true));
        arrays.push(array);
    }

    let schema = Arc::new(Schema::new(fields));
    let batch = RecordBatch::try_new(schema.clone(), arrays).context("building record batch")?;
    let file = std::fs::File::create(path)
        .with_context(|| format!("creating parquet file {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}
