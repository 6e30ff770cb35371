//! HTTP-date formatting and parsing (IMF-fixdate, second precision).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Format as `Sun, 06 Nov 1994 08:49:37 GMT`.
#[must_use]
pub fn format_http_date(at: SystemTime) -> String {
    let at: DateTime<Utc> = at.into();
    at.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an IMF-fixdate. Returns `None` for anything unparseable, which
/// callers treat as if the header were absent.
#[must_use]
pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    let parsed = DateTime::parse_from_rfc2822(value.trim()).ok()?;
    let secs = u64::try_from(parsed.timestamp()).ok()?;
    Some(UNIX_EPOCH + Duration::from_secs(secs))
}

/// Drop sub-second precision so a timestamp compares equal to its
/// formatted-then-parsed form.
#[must_use]
pub fn truncate_to_secs(at: SystemTime) -> SystemTime {
    match at.duration_since(UNIX_EPOCH) {
        Ok(since) => UNIX_EPOCH + Duration::from_secs(since.as_secs()),
        Err(_) => UNIX_EPOCH,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_imf_fixdate() {
        let at = UNIX_EPOCH + Duration::from_secs(784_111_777);
        assert_eq!(format_http_date(at), "Sun, 06 Nov 1994 08:49:37 GMT");
    }

    #[test]
    fn parse_round_trips_whole_seconds() {
        let at = UNIX_EPOCH + Duration::from_millis(1_700_000_000_750);
        let parsed = parse_http_date(&format_http_date(at)).unwrap();
        assert_eq!(parsed, truncate_to_secs(at));
    }

    #[test]
    fn garbage_is_none() {
        assert_eq!(parse_http_date("yesterday"), None);
        assert_eq!(parse_http_date(""), None);
    }
}
