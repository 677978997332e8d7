// mkv-common - Shared command and reply model for the metered KV client
//
// This crate defines the wire-agnostic shapes that flow between callers,
// the connection pool and the telemetry recorder.

pub mod command;
pub mod reply;

// Re-export for convenience
pub use command::*;
pub use reply::*;
