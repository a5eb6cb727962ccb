mod side;

pub use side::{PositionSide, Side};

use chrono::{DateTime, TimeZone, Utc};

/// Milliseconds since the Unix epoch, as reported by the venue
pub type Timestamp = i64;

/// Convert a venue millisecond timestamp into a UTC datetime
pub fn timestamp_to_datetime(ts: Timestamp) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ts).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_to_datetime() {
        let dt = timestamp_to_datetime(1_718_179_273_230).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-06-12T08:01:13.230+00:00");
    }
}
