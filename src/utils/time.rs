use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Milliseconds since the Unix epoch, the unit session timestamps are stored in.
pub fn now_millis() -> i64 {
    millis(OffsetDateTime::now_utc())
}

/// Convert a point in time to milliseconds since the Unix epoch.
pub fn millis(datetime: OffsetDateTime) -> i64 {
    (datetime.unix_timestamp_nanos() / 1_000_000) as i64
}

/// Format a millisecond timestamp as RFC 3339, or `None` if it is out of range.
pub fn format_millis(millis: i64) -> Option<String> {
    let datetime =
        OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()?;
    datetime.format(&Rfc3339).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn millis_round_trip_through_rfc3339() {
        let at = datetime!(2024-03-01 12:30:00.250 UTC);
        let ms = millis(at);
        assert_eq!(ms, 1_709_296_200_250);
        assert_eq!(format_millis(ms).unwrap(), "2024-03-01T12:30:00.25Z");
    }

    #[test]
    fn now_is_after_2020() {
        assert!(now_millis() > 1_577_836_800_000);
    }
}
