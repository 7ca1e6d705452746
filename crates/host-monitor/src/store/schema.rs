use rusqlite::{Connection, Row};

use crate::core::schema::ensure_identifier;
use crate::core::types::MeasureValueType;
use crate::error::{AppError, AppResult};

const MEASURE_TYPES: [MeasureValueType; 4] = [
    MeasureValueType::Double,
    MeasureValueType::Bigint,
    MeasureValueType::Varchar,
    MeasureValueType::Boolean,
];

/// Creates the measurement table if it does not exist yet. Dimension columns
/// are added later, on first use.
pub fn ensure_table(conn: &Connection, database: &str, table: &str) -> AppResult<()> {
    ensure_identifier("database", database)?;
    ensure_identifier("table", table)?;

    let measure_columns = MEASURE_TYPES
        .iter()
        .map(|t| format!("\"{}\" {}", t.column(), t.as_str()))
        .collect::<Vec<_>>()
        .join(",\n    ");
    let sql = format!(
        "CREATE TABLE IF NOT EXISTS {database}.{table} (\n    \
         time TIMESTAMP NOT NULL,\n    \
         measure_name VARCHAR NOT NULL,\n    \
         {measure_columns}\n)"
    );
    conn.execute_batch(&sql)?;
    Ok(())
}

pub fn list_columns(conn: &Connection, database: &str, table: &str) -> AppResult<Vec<String>> {
    // PRAGMA arguments are not parameterizable; both names are validated identifiers.
    ensure_identifier("database", database)?;
    ensure_identifier("table", table)?;

    let sql = format!("PRAGMA {database}.table_info({table})");
    let mut stmt = conn.prepare(&sql)?;
    let cols = stmt
        .query_map([], |row: &Row<'_>| row.get::<_, String>("name"))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(cols)
}

pub fn is_reserved_column(name: &str) -> bool {
    name == "time" || name == "measure_name" || name.starts_with("measure_value")
}

/// Adds a `VARCHAR` column for every dimension the table does not have yet.
/// Returns how many columns were added.
pub fn ensure_dimension_columns(
    conn: &Connection,
    database: &str,
    table: &str,
    dimensions: &[&str],
) -> AppResult<usize> {
    let existing = list_columns(conn, database, table)?;
    let mut added = 0;
    for name in dimensions {
        ensure_identifier("dimension", name)?;
        if is_reserved_column(name) {
            return Err(AppError::InvalidRequest(format!(
                "dimension name is reserved: {name}"
            )));
        }
        if existing.iter().any(|c| c == name) {
            continue;
        }
        conn.execute_batch(&format!(
            "ALTER TABLE {database}.{table} ADD COLUMN {name} VARCHAR"
        ))?;
        tracing::debug!(table, dimension = name, "added dimension column");
        added += 1;
    }
    Ok(added)
}
