//! Query recording
//!
//! The client-to-server half of every relay is teed into a [`QueryRecorder`],
//! which re-frames the command stream off the relay's critical path and
//! appends reconstructed SQL (plain queries, prepares, and executed prepared
//! statements with their bound parameters interpolated) to a per-session log
//! file.

pub mod annotation;
pub mod interpolate;
pub mod recorder;
pub mod stmt_args;

pub use annotation::QueryAnnotation;
pub use recorder::{QueryRecorder, RecordTap};
pub use stmt_args::{BindArg, BindValue};
