//! Turning resolved addresses into report lines

pub mod formatter;
pub mod stack_symbol;

pub use formatter::{FrameFormatter, PointerWidth};
