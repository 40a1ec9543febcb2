//! Time and timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used for `last_seen` and similar bookkeeping.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// Milliseconds since the Unix epoch, the wire format for `last_seen`.
#[must_use]
pub fn epoch_millis(ts: Timestamp) -> i64 {
    ts.timestamp_millis()
}
