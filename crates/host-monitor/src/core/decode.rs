//! Recursive decoder for schema-described query results.
//!
//! Every cell is decoded against the [`ColumnInfo`] at the same position in the
//! page schema. Text rendering follows a fixed punctuation contract:
//!
//! - null: `name=NULL` (or `NULL` for an unnamed column)
//! - time series: `name=[{time=t, value=v}, ...]`
//! - array: `name=[e1, e2, ...]`
//! - row: `{f1, f2, ...}` (never prefixed)
//! - scalar: `name=raw` (or `raw`)
//!
//! Children render themselves with their own names, a parent's name is never
//! pushed down into the brackets.

use serde_json::{Map, Number, Value};

use crate::core::schema::{ColumnInfo, ColumnType, ScalarType};
use crate::core::types::{Datum, Page, Row};
use crate::error::{AppError, AppResult};

pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Decoder {
    max_depth: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

impl Decoder {
    pub fn new(max_depth: usize) -> Self {
        Self { max_depth }
    }

    pub fn decode(&self, info: &ColumnInfo, datum: &Datum) -> AppResult<String> {
        self.datum_text(info, datum, 0)
    }

    pub fn decode_json(&self, info: &ColumnInfo, datum: &Datum) -> AppResult<Value> {
        self.datum_json(info, datum, 0)
    }

    /// Renders one row as `{c1, c2, ...}`.
    pub fn decode_row(&self, columns: &[ColumnInfo], row: &Row) -> AppResult<String> {
        check_arity(columns, &row.data)?;
        let cells = columns
            .iter()
            .zip(&row.data)
            .map(|(info, datum)| self.decode(info, datum))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(braced(&cells))
    }

    /// Renders one row as an object keyed by column name. Repeated names get
    /// a numeric suffix so no cell is lost.
    pub fn decode_row_json(&self, columns: &[ColumnInfo], row: &Row) -> AppResult<Value> {
        check_arity(columns, &row.data)?;
        let mut out = Map::with_capacity(columns.len());
        for (i, (info, datum)) in columns.iter().zip(&row.data).enumerate() {
            insert_unique(&mut out, field_key(info, i), self.decode_json(info, datum)?);
        }
        Ok(Value::Object(out))
    }

    /// One rendering per row, in page order. Aborts on the first malformed cell.
    pub fn decode_page(&self, page: &Page, format: OutputFormat) -> AppResult<Vec<String>> {
        page.rows
            .iter()
            .map(|row| match format {
                OutputFormat::Text => self.decode_row(&page.column_info, row),
                OutputFormat::Json => {
                    let v = self.decode_row_json(&page.column_info, row)?;
                    Ok(serde_json::to_string(&v)?)
                }
            })
            .collect()
    }

    fn check_depth(&self, info: &ColumnInfo, depth: usize) -> AppResult<()> {
        if depth > self.max_depth {
            return Err(AppError::malformed(format!(
                "nesting deeper than {} levels at column {}",
                self.max_depth,
                display_name(info)
            )));
        }
        Ok(())
    }

    fn datum_text(&self, info: &ColumnInfo, datum: &Datum, depth: usize) -> AppResult<String> {
        self.check_depth(info, depth)?;
        if let Datum::Null = datum {
            return Ok(format!("{}NULL", name_prefix(info)));
        }

        match (&info.column_type, datum) {
            (ColumnType::TimeSeries(value_info), Datum::TimeSeries(points)) => {
                let items = points
                    .iter()
                    .map(|p| {
                        let value = self.datum_text(value_info, &p.value, depth + 1)?;
                        Ok(format!("{{time={}, value={value}}}", p.time))
                    })
                    .collect::<AppResult<Vec<_>>>()?;
                Ok(format!("{}[{}]", name_prefix(info), items.join(", ")))
            }
            (ColumnType::Array(element_info), Datum::Array(elements)) => {
                let items = elements
                    .iter()
                    .map(|e| self.datum_text(element_info, e, depth + 1))
                    .collect::<AppResult<Vec<_>>>()?;
                Ok(format!("{}[{}]", name_prefix(info), items.join(", ")))
            }
            (ColumnType::Row(fields), Datum::Row(values)) => self.tuple_text(fields, values, depth + 1),
            (ColumnType::Scalar(_), Datum::Scalar(raw)) => Ok(format!("{}{raw}", name_prefix(info))),
            (_, other) => Err(shape_mismatch(info, other)),
        }
    }

    fn tuple_text(&self, fields: &[ColumnInfo], values: &[Datum], depth: usize) -> AppResult<String> {
        check_arity(fields, values)?;
        let cells = fields
            .iter()
            .zip(values)
            .map(|(info, datum)| self.datum_text(info, datum, depth))
            .collect::<AppResult<Vec<_>>>()?;
        Ok(braced(&cells))
    }

    fn datum_json(&self, info: &ColumnInfo, datum: &Datum, depth: usize) -> AppResult<Value> {
        self.check_depth(info, depth)?;
        if let Datum::Null = datum {
            return Ok(Value::Null);
        }

        match (&info.column_type, datum) {
            (ColumnType::TimeSeries(value_info), Datum::TimeSeries(points)) => points
                .iter()
                .map(|p| {
                    let value = self.datum_json(value_info, &p.value, depth + 1)?;
                    Ok(serde_json::json!({ "time": p.time, "value": value }))
                })
                .collect::<AppResult<Vec<_>>>()
                .map(Value::Array),
            (ColumnType::Array(element_info), Datum::Array(elements)) => elements
                .iter()
                .map(|e| self.datum_json(element_info, e, depth + 1))
                .collect::<AppResult<Vec<_>>>()
                .map(Value::Array),
            (ColumnType::Row(fields), Datum::Row(values)) => {
                self.tuple_json(fields, values, depth + 1).map(Value::Object)
            }
            (ColumnType::Scalar(scalar_type), Datum::Scalar(raw)) => Ok(scalar_json(*scalar_type, raw)),
            (_, other) => Err(shape_mismatch(info, other)),
        }
    }

    fn tuple_json(&self, fields: &[ColumnInfo], values: &[Datum], depth: usize) -> AppResult<Map<String, Value>> {
        check_arity(fields, values)?;
        let mut out = Map::with_capacity(fields.len());
        for (i, (info, datum)) in fields.iter().zip(values).enumerate() {
            insert_unique(&mut out, field_key(info, i), self.datum_json(info, datum, depth)?);
        }
        Ok(out)
    }
}

fn braced(cells: &[String]) -> String {
    format!("{{{}}}", cells.join(", "))
}

fn field_key(info: &ColumnInfo, index: usize) -> String {
    info.name.clone().unwrap_or_else(|| format!("_{index}"))
}

/// Inserts under `key`, or `key_1`, `key_2`, ... when the key is taken.
fn insert_unique(map: &mut Map<String, Value>, key: String, value: Value) {
    if !map.contains_key(&key) {
        map.insert(key, value);
        return;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{key}_{n}");
        if !map.contains_key(&candidate) {
            map.insert(candidate, value);
            return;
        }
        n += 1;
    }
}

fn name_prefix(info: &ColumnInfo) -> String {
    match &info.name {
        Some(name) => format!("{name}="),
        None => String::new(),
    }
}

fn display_name(info: &ColumnInfo) -> &str {
    info.name.as_deref().unwrap_or("<unnamed>")
}

fn shape_name(t: &ColumnType) -> &'static str {
    match t {
        ColumnType::Scalar(_) => "scalar",
        ColumnType::Array(_) => "array",
        ColumnType::Row(_) => "row",
        ColumnType::TimeSeries(_) => "timeseries",
    }
}

fn shape_mismatch(info: &ColumnInfo, datum: &Datum) -> AppError {
    AppError::malformed(format!(
        "{} value for {} column {}",
        datum.kind(),
        shape_name(&info.column_type),
        display_name(info)
    ))
}

fn check_arity(fields: &[ColumnInfo], values: &[Datum]) -> AppResult<()> {
    if fields.len() != values.len() {
        return Err(AppError::malformed(format!(
            "row has {} values, schema declares {} fields",
            values.len(),
            fields.len()
        )));
    }
    Ok(())
}

fn scalar_json(scalar_type: ScalarType, raw: &str) -> Value {
    let typed = match scalar_type {
        ScalarType::Bigint | ScalarType::Integer => raw.parse::<i64>().ok().map(Value::from),
        ScalarType::Double => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        ScalarType::Boolean => raw.parse::<bool>().ok().map(Value::Bool),
        _ => None,
    };
    typed.unwrap_or_else(|| Value::String(raw.to_string()))
}
