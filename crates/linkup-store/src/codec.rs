//! Column encoding shared by the CRUD modules.
//!
//! Timestamps are stored as RFC-3339 text with a fixed microsecond precision
//! so that lexical `ORDER BY` matches chronological order.

use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use linkup_shared::ValidationError;
use rusqlite::types::Type;
use serde::de::DeserializeOwned;

/// Current time at the precision the store keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

pub(crate) fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn decode_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

pub(crate) fn decode_opt_ts(raw: Option<String>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| decode_ts(&s, idx)).transpose()
}

pub(crate) fn decode_enum<T>(raw: &str, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = ValidationError>,
{
    raw.parse::<T>().map_err(|e| conversion_err(idx, e))
}

pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str, idx: usize) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn decode_uuid(raw: &str, idx: usize) -> rusqlite::Result<uuid::Uuid> {
    uuid::Uuid::parse_str(raw).map_err(|e| conversion_err(idx, e))
}

pub(crate) fn conversion_err<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

/// `?1, ?2, ... ?n` starting at `first`.
pub(crate) fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_lexically() {
        let earlier = now();
        let later = earlier + chrono::Duration::microseconds(1);
        assert!(encode_ts(&earlier) < encode_ts(&later));
        assert_eq!(decode_ts(&encode_ts(&earlier), 0).unwrap(), earlier);
    }

    #[test]
    fn placeholder_list() {
        assert_eq!(placeholders(2, 3), "?2, ?3, ?4");
        assert_eq!(placeholders(1, 0), "");
    }
}
