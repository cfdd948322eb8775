//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current time as an ISO-8601 string, as carried in API responses
pub fn iso_timestamp() -> String {
    now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Convert seconds to duration; zero means "no limit" and maps to `None`
pub fn secs_to_duration(secs: u64) -> Option<std::time::Duration> {
    (secs > 0).then(|| std::time::Duration::from_secs(secs))
}
