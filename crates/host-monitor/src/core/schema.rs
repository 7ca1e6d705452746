use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Self-describing metadata for one result column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ColumnInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "Type")]
    pub column_type: ColumnType,
}

impl ColumnInfo {
    pub fn named(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: Some(name.into()),
            column_type,
        }
    }

    #[cfg(test)]
    pub fn anonymous(column_type: ColumnType) -> Self {
        Self {
            name: None,
            column_type,
        }
    }
}

/// Shape of a column. Exactly one variant, nested children are owned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawColumnType", into = "RawColumnType")]
pub enum ColumnType {
    Scalar(ScalarType),
    Array(Box<ColumnInfo>),
    Row(Vec<ColumnInfo>),
    TimeSeries(Box<ColumnInfo>),
}

#[cfg(test)]
impl ColumnType {
    pub fn array(element: ColumnInfo) -> Self {
        ColumnType::Array(Box::new(element))
    }

    pub fn time_series(value: ColumnInfo) -> Self {
        ColumnType::TimeSeries(Box::new(value))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScalarType {
    Varchar,
    Boolean,
    Bigint,
    Integer,
    Double,
    Timestamp,
    Date,
    Time,
    IntervalDayToSecond,
    IntervalYearToMonth,
    Unknown,
}

impl ScalarType {
    pub fn as_str(self) -> &'static str {
        match self {
            ScalarType::Varchar => "VARCHAR",
            ScalarType::Boolean => "BOOLEAN",
            ScalarType::Bigint => "BIGINT",
            ScalarType::Integer => "INTEGER",
            ScalarType::Double => "DOUBLE",
            ScalarType::Timestamp => "TIMESTAMP",
            ScalarType::Date => "DATE",
            ScalarType::Time => "TIME",
            ScalarType::IntervalDayToSecond => "INTERVAL_DAY_TO_SECOND",
            ScalarType::IntervalYearToMonth => "INTERVAL_YEAR_TO_MONTH",
            ScalarType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Scalar(s) => write!(f, "{s}"),
            ColumnType::Array(element) => write!(f, "array({})", element.column_type),
            ColumnType::TimeSeries(value) => write!(f, "timeseries({})", value.column_type),
            ColumnType::Row(fields) => {
                f.write_str("row(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{field}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl fmt::Display for ColumnInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{name} {}", self.column_type),
            None => write!(f, "{}", self.column_type),
        }
    }
}

/// Wire form of [`ColumnType`]: an object with one populated key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawColumnType {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scalar_type: Option<ScalarType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    array_column_info: Option<Box<ColumnInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    row_column_info: Option<Vec<ColumnInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_series_measure_value_column_info: Option<Box<ColumnInfo>>,
}

impl TryFrom<RawColumnType> for ColumnType {
    type Error = AppError;

    // Multiply-tagged input resolves in decoder dispatch order.
    fn try_from(raw: RawColumnType) -> Result<Self, Self::Error> {
        if let Some(value) = raw.time_series_measure_value_column_info {
            return Ok(ColumnType::TimeSeries(value));
        }
        if let Some(element) = raw.array_column_info {
            return Ok(ColumnType::Array(element));
        }
        if let Some(fields) = raw.row_column_info {
            return Ok(ColumnType::Row(fields));
        }
        if let Some(scalar) = raw.scalar_type {
            return Ok(ColumnType::Scalar(scalar));
        }
        Err(AppError::malformed("column type declares no shape"))
    }
}

impl From<ColumnType> for RawColumnType {
    fn from(t: ColumnType) -> Self {
        match t {
            ColumnType::Scalar(s) => RawColumnType {
                scalar_type: Some(s),
                ..Default::default()
            },
            ColumnType::Array(element) => RawColumnType {
                array_column_info: Some(element),
                ..Default::default()
            },
            ColumnType::Row(fields) => RawColumnType {
                row_column_info: Some(fields),
                ..Default::default()
            },
            ColumnType::TimeSeries(value) => RawColumnType {
                time_series_measure_value_column_info: Some(value),
                ..Default::default()
            },
        }
    }
}

/// Database, table and dimension names are spliced into SQL, so they are
/// restricted to `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_safe_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else { return false };
    if !(first.is_ascii_alphabetic() || first == '_') {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn ensure_identifier(kind: &str, s: &str) -> Result<(), AppError> {
    if !is_safe_identifier(s) {
        return Err(AppError::InvalidRequest(format!("invalid {kind} identifier: {s}")));
    }
    Ok(())
}
