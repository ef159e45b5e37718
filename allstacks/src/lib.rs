//! # allstacks - Call Stacks of Every Thread in the Running Process
//!
//! allstacks captures the return-address chain of every thread in the
//! current process and renders each frame as one fixed-column line:
//!
//! ```text
//! 0   allstacks                           0x000055d2c3a1b2c4 allstacks::baz + 52
//! 1   allstacks                           0x000055d2c3a1b310 allstacks::bar + 16
//! ```
//!
//! It is a diagnostic primitive for crash reporters and hang detectors: the
//! caller decides when to capture and what to do with the report.
//!
//! ## Architecture Overview
//!
//! ```text
//! ThreadEnumerator ──threads──▶ StackWalker ──raw frames──┐
//!  /proc/self/task               signal + fp walk         │
//!                                                         ▼
//! LiveImages ──snapshot──▶ SymbolResolver ◀──── BacktraceCollector
//!  dl_iterate_phdr          nearest symbol                │
//!                                                         ▼
//!                                   demangle ──▶ FrameFormatter ──▶ lines
//! ```
//!
//! ## Module Structure
//!
//! - [`threads`]: enumerate the threads of this process
//! - [`unwinding`]: pause a thread and walk its saved frame pointers
//! - [`symbolization`]: loaded images, symbol tables, nearest-symbol lookup,
//!   demangling
//! - [`report`]: fixed-column frame lines
//! - [`collector`]: ties the above together
//! - [`config`]: capture settings
//! - [`domain`]: core types and errors
//! - [`cli`]: arguments of the demo binary
//!
//! ## Requirements
//!
//! Frames are found by following saved frame pointers, so code must be built
//! with frame pointers (`-C force-frame-pointers=yes`, set for this workspace
//! in `.cargo/config.toml`). Frames of code built without them are skipped
//! or end the walk early.
//!
//! Exported symbols are read from each image's mapped dynamic section, so
//! capture needs no file access for them. Local symbols come from the
//! image's `.symtab` on disk unless [`CaptureConfig::include_local_symbols`]
//! is off. Separate debug files are never read.
//!
//! ## Typical Usage
//!
//! ```no_run
//! for (tid, lines) in allstacks::all() {
//!     println!("{tid}");
//!     for line in lines {
//!         println!("{line}");
//!     }
//! }
//! ```

pub mod cli;
pub mod collector;
pub mod config;
pub mod domain;
pub mod report;
pub mod symbolization;
pub mod threads;
pub mod unwinding;

use log::error;
use std::panic;

pub use collector::BacktraceCollector;
pub use config::CaptureConfig;
pub use domain::{Backtrace, StackSymbol, ThreadBacktrace, Tid};

/// Capture every thread of the process with the default configuration
///
/// Never panics and never fails; a thread that cannot be captured maps to
/// an empty sequence, and an empty map means threads could not be listed.
#[must_use]
pub fn all() -> Backtrace {
    panic::catch_unwind(|| BacktraceCollector::default().capture_all()).unwrap_or_else(|_| {
        error!("Stack capture panicked");
        Backtrace::new()
    })
}

/// Capture only the calling thread
#[must_use]
pub fn current_thread() -> Vec<String> {
    panic::catch_unwind(|| BacktraceCollector::default().capture_current_thread())
        .unwrap_or_else(|_| {
            error!("Stack capture panicked");
            Vec::new()
        })
}
