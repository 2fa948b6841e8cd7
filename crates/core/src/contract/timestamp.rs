//! UTC clock and on-disk timestamp encoding
//!
//! Creation times are stored as RFC 3339 strings with microsecond precision
//! and an explicit `+00:00` offset, e.g. `2025-03-01T12:00:00.000000+00:00`.
//! Parsing accepts any RFC 3339 offset and normalizes to UTC.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Current UTC time
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}

/// Encode a timestamp for storage
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Decode a stored timestamp
///
/// # Errors
///
/// Returns `InvalidDocument` if the string is not RFC 3339.
pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| Error::InvalidDocument(format!("bad timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_timestamp_format_is_utc_offset() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2025-03-01T12:00:00.000000+00:00");
    }

    #[test]
    fn test_timestamp_round_trip_keeps_micros() {
        let ts = utc_now();
        let back = parse_timestamp(&format_timestamp(&ts)).unwrap();
        assert_eq!(back.timestamp_micros(), ts.timestamp_micros());
    }

    #[test]
    fn test_timestamp_parse_normalizes_offset() {
        let ts = parse_timestamp("2025-03-01T14:00:00+02:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap());
    }

    #[test]
    fn test_timestamp_parse_rejects_garbage() {
        assert!(parse_timestamp("yesterday").is_err());
    }
}
