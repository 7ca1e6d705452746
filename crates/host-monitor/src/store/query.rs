use rusqlite::{types::ValueRef, Connection, Row as SqlRow};

use crate::core::schema::{ColumnInfo, ColumnType, ScalarType};
use crate::core::types::{Datum, Row};
use crate::error::{AppError, AppResult};

#[derive(Debug)]
pub struct PageRows {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
    /// Byte size of the returned values.
    pub bytes: u64,
}

/// Strips whitespace and trailing `;` so the text can be wrapped as a subquery.
pub fn normalize_sql(sql: &str) -> String {
    sql.trim().trim_end_matches(';').trim_end().to_string()
}

pub fn count_rows(conn: &Connection, sql: &str) -> AppResult<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM ({sql})"), [], |r| r.get(0))?;
    Ok(n.max(0) as u64)
}

/// Runs one page of `sql`. The statement is wrapped so the store controls
/// paging regardless of any LIMIT the caller already put in the query.
pub fn run_page(conn: &Connection, sql: &str, limit: usize, offset: usize) -> AppResult<PageRows> {
    let effective_sql = format!("SELECT * FROM ({sql}) LIMIT {limit} OFFSET {offset}");
    let mut stmt = conn.prepare(&effective_sql)?;
    let columns: Vec<ColumnInfo> = stmt
        .columns()
        .iter()
        .map(|c| ColumnInfo::named(c.name(), ColumnType::Scalar(scalar_type(c.decl_type()))))
        .collect();

    let mut rows = Vec::new();
    let mut bytes = 0u64;
    let mut r = stmt.query([])?;
    while let Some(row) = r.next()? {
        rows.push(row_to_datums(row, &columns, &mut bytes)?);
    }

    Ok(PageRows { columns, rows, bytes })
}

pub fn scalar_type(decl_type: Option<&str>) -> ScalarType {
    let Some(decl) = decl_type else {
        return ScalarType::Unknown;
    };
    let base = decl.split('(').next().unwrap_or(decl).trim().to_ascii_uppercase();
    match base.as_str() {
        "TIMESTAMP" | "DATETIME" => ScalarType::Timestamp,
        "BIGINT" | "INT" => ScalarType::Bigint,
        "INTEGER" => ScalarType::Integer,
        "DOUBLE" | "REAL" | "FLOAT" => ScalarType::Double,
        "VARCHAR" | "TEXT" | "CHAR" => ScalarType::Varchar,
        "BOOLEAN" => ScalarType::Boolean,
        "DATE" => ScalarType::Date,
        "TIME" => ScalarType::Time,
        _ => ScalarType::Unknown,
    }
}

fn row_to_datums(row: &SqlRow<'_>, columns: &[ColumnInfo], bytes: &mut u64) -> AppResult<Row> {
    let mut data = Vec::with_capacity(columns.len());
    for (i, info) in columns.iter().enumerate() {
        let d = match row.get_ref(i)? {
            ValueRef::Null => Datum::Null,
            ValueRef::Integer(x) => {
                *bytes += 8;
                Datum::Scalar(x.to_string())
            }
            ValueRef::Real(x) => {
                *bytes += 8;
                Datum::Scalar(format_double(x))
            }
            ValueRef::Text(t) => {
                *bytes += t.len() as u64;
                Datum::Scalar(String::from_utf8_lossy(t).into_owned())
            }
            ValueRef::Blob(_) => {
                return Err(AppError::malformed(format!(
                    "blob value in column {} has no scalar form",
                    info.name.as_deref().unwrap_or("?")
                )))
            }
        };
        data.push(d);
    }
    Ok(Row::new(data))
}

/// Whole doubles keep one decimal so they read as doubles (`21.0`, not `21`).
fn format_double(x: f64) -> String {
    if x.is_finite() && x.fract() == 0.0 {
        format!("{x:.1}")
    } else {
        x.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE m (time TIMESTAMP, measure_name VARCHAR, v DOUBLE, n BIGINT, b BLOB);
             INSERT INTO m VALUES ('2024-01-01 00:00:00.000000000', 'cpu_temp', 21.0, 3, NULL);
             INSERT INTO m VALUES ('2024-01-01 00:00:10.000000000', 'cpu_temp', 20.5, NULL, NULL);
             INSERT INTO m VALUES ('2024-01-01 00:00:20.000000000', 'cpu_temp', NULL, 7, x'00');",
        )
        .unwrap();
        conn
    }

    #[test]
    fn pages_through_wrapped_query() {
        let conn = seeded();
        let sql = normalize_sql("SELECT time, measure_name, v, n FROM m ORDER BY time; ");
        assert_eq!(count_rows(&conn, &sql).unwrap(), 3);

        let first = run_page(&conn, &sql, 2, 0).unwrap();
        assert_eq!(first.rows.len(), 2);
        assert_eq!(
            first.rows[0].data,
            vec![
                Datum::scalar("2024-01-01 00:00:00.000000000"),
                Datum::scalar("cpu_temp"),
                Datum::scalar("21.0"),
                Datum::scalar("3"),
            ]
        );
        assert_eq!(first.rows[1].data[3], Datum::Null);

        let second = run_page(&conn, &sql, 2, 2).unwrap();
        assert_eq!(second.rows.len(), 1);
        assert_eq!(second.rows[0].data[2], Datum::Null);
        assert_eq!(second.rows[0].data[3], Datum::scalar("7"));
    }

    #[test]
    fn counts_value_bytes() {
        let conn = seeded();
        let page = run_page(&conn, "SELECT measure_name, n FROM m", 10, 0).unwrap();
        // 3 * "cpu_temp" + two integers
        assert_eq!(page.bytes, 3 * 8 + 2 * 8);
    }

    #[test]
    fn blob_values_are_malformed() {
        let conn = seeded();
        let err = run_page(&conn, "SELECT b FROM m WHERE b IS NOT NULL", 10, 0).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_RESULT");
    }

    #[test]
    fn declared_types_map_to_scalar_types() {
        assert_eq!(scalar_type(Some("TIMESTAMP")), ScalarType::Timestamp);
        assert_eq!(scalar_type(Some("varchar(32)")), ScalarType::Varchar);
        assert_eq!(scalar_type(Some("DOUBLE")), ScalarType::Double);
        assert_eq!(scalar_type(Some("BIGINT")), ScalarType::Bigint);
        assert_eq!(scalar_type(Some("BOOLEAN")), ScalarType::Boolean);
        assert_eq!(scalar_type(Some("GEOMETRY")), ScalarType::Unknown);
        assert_eq!(scalar_type(None), ScalarType::Unknown);
    }
}
