//! Utility functions for string formatting and redaction.

pub mod format;

pub use format::{redact, truncate_body};
