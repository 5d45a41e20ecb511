//! Timestamp helpers.
//!
//! Artifact staleness is decided purely on modification times, so every
//! store reports them through the same [`Timestamp`] type.

use chrono::{DateTime, Utc};
use std::time::SystemTime;

/// Represents a timestamp that can be serialized/deserialized.
pub type Timestamp = DateTime<Utc>;

/// Returns the current UTC timestamp.
#[must_use]
pub fn now_utc() -> Timestamp {
    Utc::now()
}

/// Converts a filesystem time into a [`Timestamp`], keeping full precision.
#[must_use]
pub fn from_system_time(time: SystemTime) -> Timestamp {
    DateTime::<Utc>::from(time)
}

/// Formats a timestamp as ISO 8601 string.
#[must_use]
pub fn format_iso8601(dt: &Timestamp) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6f+00:00").to_string()
}
