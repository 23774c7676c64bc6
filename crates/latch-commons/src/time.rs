//! Epoch time helpers.
//!
//! Owner heartbeats, lock records and provider records all stamp seconds
//! since the Unix epoch; this module keeps that in one place.

use chrono::Utc;

/// Current time as seconds since the Unix epoch.
pub fn unix_now() -> i64 {
    Utc::now().timestamp()
}

/// Current time as milliseconds since the Unix epoch.
pub fn unix_now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
