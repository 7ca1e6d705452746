use super::types::Limits;

/// Largest page a store hands out in one response.
pub const MAX_PAGE_ROWS: usize = 1000;

pub fn effective_limit(requested: Option<usize>, max_rows: usize) -> Limits {
    let max_rows = requested.unwrap_or(max_rows).min(max_rows).max(1);
    Limits { max_rows }
}

/// Appends `LIMIT n` to a query, dropping any trailing `;`.
pub fn with_limit(query: &str, limit: usize) -> String {
    let base = query.trim_end().trim_end_matches(';').trim_end();
    format!("{base} LIMIT {limit}")
}
