//! Domain model for allstacks
//!
//! This module contains core domain types and errors that provide:
//! - Compile-time safety via newtype pattern
//! - Self-documenting function signatures
//! - Structured error handling

pub mod errors;
pub mod types;

// Re-export common types for convenience
pub use types::{
    Backtrace, ImageInfo, LoadedImage, RawFrame, ResolvedSymbol, StackSymbol, Symbol,
    ThreadBacktrace, ThreadHandle, Tid, UNKNOWN_IMAGE, UNKNOWN_SYMBOL,
};

pub use errors::{EnumerationError, SuspendError};
