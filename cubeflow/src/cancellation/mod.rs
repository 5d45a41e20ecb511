//! Cooperative run cancellation.
//!
//! The stage runner checks the token before dispatching each work unit;
//! units already running are left to finish.

mod token;

pub use token::CancellationToken;
