//! Capture configuration
//!
//! Library callers build a [`CaptureConfig`] directly; the binary maps its
//! command-line arguments onto one.

use std::time::Duration;

use crate::report::PointerWidth;

/// Frames kept per thread before the walk is silently truncated
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// How long to wait for a signalled thread to park
pub const DEFAULT_SUSPEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Signal used to park other threads
pub const DEFAULT_CAPTURE_SIGNAL: i32 = libc::SIGPROF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub max_depth: usize,
    pub suspend_timeout: Duration,
    /// Signal used to park other threads
    ///
    /// The capture handler replaces the existing handler for this signal and
    /// passes on every delivery that is not a capture request. A previous
    /// default action is dropped rather than taken.
    pub signal: i32,
    pub pointer_width: PointerWidth,
    /// Also read `.symtab` from each image file, not only the exported
    /// symbols already mapped in memory
    pub include_local_symbols: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            suspend_timeout: DEFAULT_SUSPEND_TIMEOUT,
            signal: DEFAULT_CAPTURE_SIGNAL,
            pointer_width: PointerWidth::native(),
            include_local_symbols: true,
        }
    }
}

impl CaptureConfig {
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    #[must_use]
    pub fn with_suspend_timeout(mut self, timeout: Duration) -> Self {
        self.suspend_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_signal(mut self, signal: i32) -> Self {
        self.signal = signal;
        self
    }

    #[must_use]
    pub fn with_pointer_width(mut self, width: PointerWidth) -> Self {
        self.pointer_width = width;
        self
    }

    #[must_use]
    pub fn with_local_symbols(mut self, include: bool) -> Self {
        self.include_local_symbols = include;
        self
    }
}
