//! Repository layer: entity-scoped database operations.

mod document;
mod extraction;

use chrono::NaiveDateTime;

use super::DatabaseError;

pub use document::*;
pub use extraction::*;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub(crate) fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

pub(crate) fn parse_timestamp(field: &str, raw: &str) -> Result<NaiveDateTime, DatabaseError> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|e| DatabaseError::ConstraintViolation(format!("bad {field} timestamp '{raw}': {e}")))
}

pub(crate) fn parse_uuid(raw: &str) -> Result<uuid::Uuid, DatabaseError> {
    uuid::Uuid::parse_str(raw).map_err(|e| DatabaseError::ConstraintViolation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_round_trip_keeps_fraction() {
        let ts = NaiveDateTime::parse_from_str("2024-03-01 09:30:15.250", TIMESTAMP_FORMAT).unwrap();
        let back = parse_timestamp("uploaded_at", &format_timestamp(&ts)).unwrap();
        assert_eq!(ts, back);
    }

    #[test]
    fn timestamp_accepts_whole_seconds_and_iso() {
        assert!(parse_timestamp("t", "2024-03-01 09:30:15").is_ok());
        assert!(parse_timestamp("t", "2024-03-01T09:30:15").is_ok());
        assert!(parse_timestamp("t", "yesterday").is_err());
    }
}
