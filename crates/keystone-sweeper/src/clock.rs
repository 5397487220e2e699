//! Wall-clock timestamps stored as sorted-set scores.

use chrono::{DateTime, Utc};

/// Seconds since the Unix epoch, with millisecond precision.
#[allow(clippy::cast_precision_loss)]
pub fn unix_seconds(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn keeps_milliseconds() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_250).single();
        assert_eq!(now.map(unix_seconds), Some(1_700_000_000.25));
    }
}
