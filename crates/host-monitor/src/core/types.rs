use serde::{Deserialize, Serialize};

use crate::core::schema::ColumnInfo;
use crate::error::AppError;

/// One value of a result set, shaped like the [`ColumnInfo`] it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDatum", into = "RawDatum")]
pub enum Datum {
    Null,
    Scalar(String),
    Array(Vec<Datum>),
    Row(Vec<Datum>),
    TimeSeries(Vec<TimeSeriesDataPoint>),
}

impl Datum {
    #[cfg(test)]
    pub fn scalar(value: impl Into<String>) -> Self {
        Datum::Scalar(value.into())
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Datum::Null => "null",
            Datum::Scalar(_) => "scalar",
            Datum::Array(_) => "array",
            Datum::Row(_) => "row",
            Datum::TimeSeries(_) => "timeseries",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TimeSeriesDataPoint {
    pub time: String,
    pub value: Datum,
}

#[cfg(test)]
impl TimeSeriesDataPoint {
    pub fn new(time: impl Into<String>, value: Datum) -> Self {
        Self {
            time: time.into(),
            value,
        }
    }
}

/// Positional cells, aligned with the page's column list.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Row {
    pub data: Vec<Datum>,
}

impl Row {
    pub fn new(data: Vec<Datum>) -> Self {
        Self { data }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawDatum {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scalar_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_series_value: Option<Vec<TimeSeriesDataPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    array_value: Option<Vec<Datum>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    row_value: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    null_value: Option<bool>,
}

impl TryFrom<RawDatum> for Datum {
    type Error = AppError;

    fn try_from(raw: RawDatum) -> Result<Self, Self::Error> {
        if raw.null_value.unwrap_or(false) {
            return Ok(Datum::Null);
        }
        if let Some(points) = raw.time_series_value {
            return Ok(Datum::TimeSeries(points));
        }
        if let Some(items) = raw.array_value {
            return Ok(Datum::Array(items));
        }
        if let Some(row) = raw.row_value {
            return Ok(Datum::Row(row.data));
        }
        if let Some(s) = raw.scalar_value {
            return Ok(Datum::Scalar(s));
        }
        Err(AppError::malformed("datum carries no value"))
    }
}

impl From<Datum> for RawDatum {
    fn from(d: Datum) -> Self {
        match d {
            Datum::Null => RawDatum {
                null_value: Some(true),
                ..Default::default()
            },
            Datum::Scalar(s) => RawDatum {
                scalar_value: Some(s),
                ..Default::default()
            },
            Datum::Array(items) => RawDatum {
                array_value: Some(items),
                ..Default::default()
            },
            Datum::Row(data) => RawDatum {
                row_value: Some(Row { data }),
                ..Default::default()
            },
            Datum::TimeSeries(points) => RawDatum {
                time_series_value: Some(points),
                ..Default::default()
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryStatus {
    pub progress_percentage: f64,
    pub cumulative_bytes_scanned: u64,
    pub cumulative_bytes_metered: u64,
}

/// One fetched slice of a query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Page {
    pub query_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub rows: Vec<Row>,
    pub column_info: Vec<ColumnInfo>,
    #[serde(default)]
    pub query_status: QueryStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub query_string: String,
    pub next_token: Option<String>,
    pub max_rows: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CancelResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancellation_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasureValueType {
    Double,
    Bigint,
    Varchar,
    Boolean,
}

impl MeasureValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            MeasureValueType::Double => "DOUBLE",
            MeasureValueType::Bigint => "BIGINT",
            MeasureValueType::Varchar => "VARCHAR",
            MeasureValueType::Boolean => "BOOLEAN",
        }
    }

    /// Store column holding values of this type.
    pub fn column(self) -> &'static str {
        match self {
            MeasureValueType::Double => "measure_value::double",
            MeasureValueType::Bigint => "measure_value::bigint",
            MeasureValueType::Varchar => "measure_value::varchar",
            MeasureValueType::Boolean => "measure_value::boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Record {
    pub measure_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measure_value_type: Option<MeasureValueType>,
    pub measure_value: String,
}

impl Record {
    pub fn new(name: impl Into<String>, value_type: Option<MeasureValueType>, value: impl ToString) -> Self {
        Self {
            measure_name: name.into(),
            measure_value_type: value_type,
            measure_value: value.to_string(),
        }
    }

    /// Untyped records are stored as doubles.
    pub fn value_type(&self) -> MeasureValueType {
        self.measure_value_type.unwrap_or(MeasureValueType::Double)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommonAttributes {
    pub dimensions: Vec<Dimension>,
    /// Epoch milliseconds.
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteRequest {
    pub database_name: String,
    pub table_name: String,
    pub records: Vec<Record>,
    pub common_attributes: CommonAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WriteAck {
    pub records_ingested: u64,
}

#[derive(Debug, Clone)]
pub struct Limits {
    pub max_rows: usize,
}
