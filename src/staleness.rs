//! staleness.rs — best-effort freshness annotation for browser-pushed data.

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};

/// Data older than this is flagged as stale on the card.
pub const STALE_THRESHOLD_SECS: i64 = 600; // 10 minutes

/// Returns a human-readable warning when `received_at` is older than the
/// threshold, else `None`. Unparsable or missing timestamps yield `None`:
/// this is an annotation, not a correctness check.
pub fn stale_warning(received_at: &str) -> Option<String> {
    stale_warning_at(received_at, Local::now())
}

pub(crate) fn stale_warning_at(received_at: &str, now: DateTime<Local>) -> Option<String> {
    let dt = parse_local(received_at)?;
    let age = (now - dt).num_seconds();
    if age > STALE_THRESHOLD_SECS {
        let mins = age / 60;
        Some(format!(
            "(no update for {mins} min; check that the browser page is still open)"
        ))
    } else {
        None
    }
}

/// Short `HH:MM:SS` display of a receipt timestamp; falls back to the raw
/// string when it cannot be parsed.
pub fn ts_display(received_at: &str) -> String {
    match parse_local(received_at) {
        Some(dt) => dt.format("%H:%M:%S").to_string(),
        None => received_at.to_string(),
    }
}

fn parse_local(s: &str) -> Option<DateTime<Local>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Local));
    }
    // Naive ISO timestamps (no offset) are read as local time.
    let naive = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
    Local.from_local_datetime(&naive).single()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn stamp(age_secs: i64) -> (String, DateTime<Local>) {
        let now = Local::now();
        let then = now - Duration::seconds(age_secs);
        (then.to_rfc3339(), now)
    }

    #[test]
    fn fresh_data_gets_no_warning() {
        let (ts, now) = stamp(300);
        assert_eq!(stale_warning_at(&ts, now), None);
    }

    #[test]
    fn old_data_gets_a_warning_with_minutes() {
        let (ts, now) = stamp(601);
        let warn = stale_warning_at(&ts, now).expect("601s is past the threshold");
        assert!(warn.contains("10 min"), "got: {warn}");
    }

    #[test]
    fn unparsable_timestamp_is_not_an_error() {
        let now = Local::now();
        assert_eq!(stale_warning_at("", now), None);
        assert_eq!(stale_warning_at("not-a-date", now), None);
    }

    #[test]
    fn ts_display_formats_or_passes_through() {
        let (ts, _) = stamp(0);
        let shown = ts_display(&ts);
        assert_eq!(shown.len(), 8, "HH:MM:SS, got: {shown}");
        assert_eq!(ts_display("garbage"), "garbage");
    }

    #[test]
    fn naive_iso_timestamps_parse_as_local() {
        // Offset-free ISO stamps must be accepted too.
        let naive = (Local::now() - Duration::seconds(30))
            .naive_local()
            .format("%Y-%m-%dT%H:%M:%S%.6f")
            .to_string();
        assert_eq!(stale_warning(&naive), None);
    }
}
