use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Parse a string column into a typed id.
pub fn get_id<T: std::str::FromStr>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    let raw: String = get(row, idx, table, column)?;
    raw.parse().map_err(|_| StoreError::CorruptRow {
        table,
        column,
        detail: format!("invalid id: {raw}"),
    })
}

/// Parse a nullable string column into a typed id.
pub fn get_opt_id<T: std::str::FromStr>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<T>, StoreError> {
    let raw: Option<String> = get(row, idx, table, column)?;
    raw.map(|raw| {
        raw.parse().map_err(|_| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid id: {raw}"),
        })
    })
    .transpose()
}

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that string
/// ordering matches chronological ordering.
pub fn format_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a timestamp column.
pub fn get_ts(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<DateTime<Utc>, StoreError> {
    let raw: String = get(row, idx, table, column)?;
    parse_ts(&raw, table, column)
}

/// Parse a nullable timestamp column.
pub fn get_opt_ts(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<Option<DateTime<Utc>>, StoreError> {
    let raw: Option<String> = get(row, idx, table, column)?;
    raw.map(|raw| parse_ts(&raw, table, column)).transpose()
}

fn parse_ts(raw: &str, table: &'static str, column: &'static str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::CorruptRow {
            table,
            column,
            detail: format!("invalid timestamp {raw}: {e}"),
        })
}
