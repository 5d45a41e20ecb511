//! Small shared helpers.

pub mod timestamps;

pub use timestamps::{format_iso8601, from_system_time, now_utc, Timestamp};
