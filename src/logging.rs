//! Logging macros that set target to "mysqltap" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "mysqltap::query_record::recorder"), which makes the env-filter
//! awkward to drive from a single --log-level flag. These macros keep every
//! log line from this crate under one "mysqltap" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "mysqltap", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "mysqltap", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "mysqltap", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "mysqltap", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "mysqltap", $($arg)*) };
}
