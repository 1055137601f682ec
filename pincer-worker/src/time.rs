//! Time helpers. Persisted instants are either epoch milliseconds (session
//! and lockout arithmetic) or millisecond-precision ISO-8601 strings, whose
//! fixed width makes lexicographic order equal to time order.

use chrono::{DateTime, TimeZone, Utc};

const ISO_MILLIS: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn now_unix_seconds() -> i64 {
    Utc::now().timestamp()
}

pub fn now_iso() -> String {
    format_iso(Utc::now())
}

pub fn iso_from_ms(ms: i64) -> String {
    match Utc.timestamp_millis_opt(ms).single() {
        Some(instant) => format_iso(instant),
        None => format_iso(Utc::now()),
    }
}

fn format_iso(instant: DateTime<Utc>) -> String {
    instant.format(ISO_MILLIS).to_string()
}
