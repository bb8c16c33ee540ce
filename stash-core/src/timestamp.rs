//! Portable timestamp wire format.
//!
//! Timestamps are written as fixed-width RFC 3339 strings with microsecond
//! precision and a literal `Z` offset, e.g. `2024-11-27T09:30:00.000000Z`.
//! Fixed width makes the textual form sort in time order. Reading accepts
//! any RFC 3339 timestamp.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serializer};

/// `strftime` pattern for the wire format.
pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Render a timestamp in the wire format.
pub fn format(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(FORMAT).to_string()
}

/// Parse an RFC 3339 timestamp into UTC.
pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// Serde `serialize_with` adapter.
pub fn serialize<S>(timestamp: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&format(timestamp))
}

/// Serde `deserialize_with` adapter.
pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse(&raw).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2024, 11, 27, 9, 30, 0).unwrap();
        let fractional = whole + chrono::Duration::microseconds(1_234);

        assert_eq!(format(&whole), "2024-11-27T09:30:00.000000Z");
        assert_eq!(format(&fractional), "2024-11-27T09:30:00.001234Z");
        assert_eq!(format(&whole).len(), format(&fractional).len());
    }

    #[test]
    fn test_textual_order_matches_time_order() {
        let earlier = Utc.with_ymd_and_hms(2024, 1, 9, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        assert!(format(&earlier) < format(&later));
    }

    #[test]
    fn test_parse_accepts_offsets() {
        let parsed = parse("2024-11-27T18:30:00+09:00").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2024, 11, 27, 9, 30, 0).unwrap());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("yesterday").is_err());
    }
}
