use rusqlite::{params_from_iter, types::Value, Connection};
use time::{macros::format_description, OffsetDateTime};

use crate::core::schema::ensure_identifier;
use crate::core::types::{MeasureValueType, Record, WriteAck, WriteRequest};
use crate::error::{AppError, AppResult};
use crate::store::schema::{ensure_dimension_columns, ensure_table};

pub const MAX_RECORDS_PER_WRITE: usize = 100;

/// Checks everything that can be checked without touching the store.
pub fn validate(req: &WriteRequest) -> AppResult<()> {
    ensure_identifier("database", &req.database_name)?;
    ensure_identifier("table", &req.table_name)?;

    if req.records.is_empty() {
        return Err(AppError::InvalidRequest("write contains no records".into()));
    }
    if req.records.len() > MAX_RECORDS_PER_WRITE {
        return Err(AppError::InvalidRequest(format!(
            "write contains {} records, at most {MAX_RECORDS_PER_WRITE} are accepted",
            req.records.len()
        )));
    }

    let dims = &req.common_attributes.dimensions;
    for (i, d) in dims.iter().enumerate() {
        ensure_identifier("dimension", &d.name)?;
        if dims[..i].iter().any(|prev| prev.name == d.name) {
            return Err(AppError::InvalidRequest(format!("duplicate dimension: {}", d.name)));
        }
    }

    for record in &req.records {
        if record.measure_name.trim().is_empty() {
            return Err(AppError::InvalidRequest("measure name is empty".into()));
        }
        measure_value(record)?;
    }

    store_time(&req.common_attributes.time)?;
    Ok(())
}

/// Inserts every record of `req` in one transaction, one row per record.
pub fn write_records(conn: &mut Connection, req: &WriteRequest) -> AppResult<WriteAck> {
    validate(req)?;
    let time = store_time(&req.common_attributes.time)?;
    let db = &req.database_name;
    let table = &req.table_name;
    let dims = &req.common_attributes.dimensions;
    let dim_names: Vec<&str> = dims.iter().map(|d| d.name.as_str()).collect();

    let tx = conn.transaction()?;
    ensure_table(&tx, db, table)?;
    ensure_dimension_columns(&tx, db, table, &dim_names)?;

    let mut ingested = 0u64;
    for record in &req.records {
        let mut columns = vec![
            "time".to_string(),
            "measure_name".to_string(),
            format!("\"{}\"", record.value_type().column()),
        ];
        columns.extend(dim_names.iter().map(|n| n.to_string()));
        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {db}.{table} ({}) VALUES ({placeholders})",
            columns.join(", ")
        );

        let mut values = vec![
            Value::Text(time.clone()),
            Value::Text(record.measure_name.clone()),
            measure_value(record)?,
        ];
        values.extend(dims.iter().map(|d| Value::Text(d.value.clone())));

        ingested += tx.execute(&sql, params_from_iter(values))? as u64;
    }
    tx.commit()?;

    tracing::debug!(table = %table, records = ingested, "records written");
    Ok(WriteAck {
        records_ingested: ingested,
    })
}

fn measure_value(record: &Record) -> AppResult<Value> {
    let raw = record.measure_value.trim();
    let t = record.value_type();
    let parsed = match t {
        MeasureValueType::Double => raw.parse::<f64>().ok().filter(|x| x.is_finite()).map(Value::Real),
        MeasureValueType::Bigint => raw.parse::<i64>().ok().map(Value::Integer),
        MeasureValueType::Boolean => raw
            .to_ascii_lowercase()
            .parse::<bool>()
            .ok()
            .map(|b| Value::Text(b.to_string())),
        MeasureValueType::Varchar => Some(Value::Text(record.measure_value.clone())),
    };
    parsed.ok_or_else(|| {
        AppError::InvalidRequest(format!(
            "measure {}: {:?} is not a valid {}",
            record.measure_name,
            record.measure_value,
            t.as_str()
        ))
    })
}

/// Epoch milliseconds to the stored `YYYY-MM-DD hh:mm:ss.fffffffff` UTC form.
pub fn store_time(epoch_millis: &str) -> AppResult<String> {
    let invalid = || AppError::InvalidRequest(format!("invalid record time: {epoch_millis:?}"));
    let ms: i64 = epoch_millis.trim().parse().map_err(|_| invalid())?;
    let at = OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000).map_err(|_| invalid())?;
    let fmt = format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:9]");
    at.format(fmt).map_err(|e| AppError::Internal(e.to_string()))
}
