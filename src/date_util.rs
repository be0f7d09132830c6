use chrono::NaiveDateTime;

/// Timestamp layout used by the remote table API (`sys_created_on`,
/// `sys_updated_on`). Values are UTC wall-clock with no offset.
pub const REMOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Parse a remote timestamp string.
pub fn parse_remote_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s.trim(), REMOTE_TIMESTAMP_FORMAT).ok()
}

/// Format a timestamp the way the remote API and the local store expect it.
pub fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(REMOTE_TIMESTAMP_FORMAT).to_string()
}

/// Split a timestamp into the `(date, time)` pair used by encoded-query
/// date literals.
pub fn split_date_time(ts: NaiveDateTime) -> (String, String) {
    (
        ts.format(DATE_FORMAT).to_string(),
        ts.format(TIME_FORMAT).to_string(),
    )
}
