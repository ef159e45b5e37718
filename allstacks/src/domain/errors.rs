//! Structured error types for allstacks
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Neither error ever escapes `capture_all`: the collector turns them into an
//! empty result (enumeration) or an empty frame list (one thread).

use super::types::Tid;
use std::time::Duration;
use thiserror::Error;

/// The threads of the process could not be listed
#[derive(Error, Debug)]
pub enum EnumerationError {
    #[error("Failed to read {path}: {source}")]
    TaskDirUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Thread enumeration is not supported on {os}")]
    UnsupportedPlatform { os: &'static str },
}

/// A single thread could not be paused, inspected, or resumed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SuspendError {
    #[error("Failed to install handler for signal {signal} (errno {errno})")]
    HandlerInstallFailed { signal: i32, errno: i32 },

    #[error("Failed to signal thread {tid} (errno {errno})")]
    SignalFailed { tid: Tid, errno: i32 },

    #[error("Thread {tid} did not pause within {waited:?}")]
    Timeout { tid: Tid, waited: Duration },

    #[error("Stack capture is not supported on {os}/{arch}")]
    UnsupportedPlatform { os: &'static str, arch: &'static str },
}
