//! Common utilities and helper functions
//!
//! Character-safe truncation plus local-time conversion for the configured
//! UTC offset.

pub mod retry;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};

/// Truncate to at most `max_chars` characters, never splitting a code point
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Fixed offset for the configured local timezone
pub fn local_offset(offset_hours: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_hours.clamp(-23, 23) * 3600)
        .unwrap_or_else(|| Utc.fix())
}

/// Local calendar date of an instant
pub fn local_date(now: DateTime<Utc>, offset_hours: i32) -> NaiveDate {
    now.with_timezone(&local_offset(offset_hours)).date_naive()
}

/// Interpret a naive local date-time in the configured offset and convert to UTC
pub fn local_to_utc(local: NaiveDateTime, offset_hours: i32) -> Option<DateTime<Utc>> {
    local_offset(offset_hours)
        .from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Format an instant as `YYYY-MM-DD HH:MM` in local time
pub fn format_local(dt: DateTime<Utc>, offset_hours: i32) -> String {
    dt.with_timezone(&local_offset(offset_hours))
        .format("%Y-%m-%d %H:%M")
        .to_string()
}
