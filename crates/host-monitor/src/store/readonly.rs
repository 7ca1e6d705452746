use rusqlite::Connection;

use crate::error::AppResult;

/// Whether `sql` compiles to a statement that cannot modify the store.
pub fn is_sql_readonly(conn: &Connection, sql: &str) -> AppResult<bool> {
    let stmt = conn.prepare(sql)?;
    Ok(stmt.readonly())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_statements() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (x INTEGER)").unwrap();
        assert!(is_sql_readonly(&conn, "SELECT * FROM t").unwrap());
        assert!(!is_sql_readonly(&conn, "DELETE FROM t").unwrap());
        assert!(!is_sql_readonly(&conn, "INSERT INTO t VALUES (1)").unwrap());
        assert!(is_sql_readonly(&conn, "SELECT * FROM missing").is_err());
    }
}
