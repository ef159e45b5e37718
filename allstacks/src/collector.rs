//! Capture orchestration
//!
//! Enumerate, walk every thread, then symbolize. Walking happens before any
//! symbol table is opened so that threads are paused for as short a time as
//! possible and no ELF parsing runs between two pauses.

use log::{debug, warn};

use crate::config::CaptureConfig;
use crate::domain::{Backtrace, RawFrame, StackSymbol, ThreadBacktrace, ThreadHandle};
use crate::report::FrameFormatter;
use crate::symbolization::{CatalogSource, ImageCatalog, LiveImages, SymbolResolver};
use crate::threads::{current_tid, thread_name, ProcTaskEnumerator, ThreadEnumerator};
use crate::unwinding::{FramePointerWalker, StackWalker};

/// Composes enumeration, walking, resolution and formatting
pub struct BacktraceCollector<E = ProcTaskEnumerator, W = FramePointerWalker, S = LiveImages> {
    enumerator: E,
    walker: W,
    images: S,
    formatter: FrameFormatter,
    max_depth: usize,
}

impl BacktraceCollector {
    /// Collector over the live process
    #[must_use]
    pub fn new(config: &CaptureConfig) -> Self {
        Self::with_parts(
            ProcTaskEnumerator,
            FramePointerWalker::from_config(config),
            LiveImages::new(config.include_local_symbols),
            config,
        )
    }
}

impl Default for BacktraceCollector {
    fn default() -> Self {
        Self::new(&CaptureConfig::default())
    }
}

impl<E, W, S> BacktraceCollector<E, W, S>
where
    E: ThreadEnumerator,
    W: StackWalker,
    S: CatalogSource,
{
    pub fn with_parts(enumerator: E, walker: W, images: S, config: &CaptureConfig) -> Self {
        Self {
            enumerator,
            walker,
            images,
            formatter: FrameFormatter::new(config.pointer_width),
            max_depth: config.max_depth,
        }
    }

    /// Capture every thread, in enumeration order
    ///
    /// Never fails: if threads cannot be listed the result is empty, and a
    /// thread that cannot be captured is reported with no frames and an
    /// error message.
    pub fn capture_threads(&self) -> Vec<ThreadBacktrace> {
        let threads = match self.enumerator.list_threads() {
            Ok(threads) => threads,
            Err(e) => {
                warn!("Cannot enumerate threads: {e}");
                return Vec::new();
            }
        };

        let walked: Vec<_> = threads
            .into_iter()
            .map(|thread| {
                let frames = self.walker.capture_frames(&thread, self.max_depth);
                (thread, frames)
            })
            .collect();

        let resolver = SymbolResolver::new(self.images.snapshot());
        walked
            .into_iter()
            .map(|(thread, frames)| match frames {
                Ok(frames) => ThreadBacktrace {
                    frames: symbolize(&resolver, &frames),
                    tid: thread.tid,
                    name: thread.name,
                    error: None,
                },
                Err(e) => {
                    warn!("Skipping {} ({}): {e}", thread.tid, thread.name);
                    ThreadBacktrace {
                        tid: thread.tid,
                        name: thread.name,
                        frames: Vec::new(),
                        error: Some(e.to_string()),
                    }
                }
            })
            .collect()
    }

    /// Every thread's formatted frame lines, keyed by thread id
    pub fn capture_all(&self) -> Backtrace {
        let backtrace: Backtrace = self
            .capture_threads()
            .iter()
            .map(|thread| (thread.tid, self.render(&thread.frames)))
            .collect();
        debug!("Captured {} threads", backtrace.len());
        backtrace
    }

    /// The calling thread's formatted frame lines
    pub fn capture_current_thread(&self) -> Vec<String> {
        let tid = current_tid();
        let thread = ThreadHandle::new(tid, thread_name(tid));
        match self.walker.capture_frames(&thread, self.max_depth) {
            Ok(frames) => {
                let resolver = SymbolResolver::new(self.images.snapshot());
                self.render(&symbolize(&resolver, &frames))
            }
            Err(e) => {
                warn!("Cannot capture {tid}: {e}");
                Vec::new()
            }
        }
    }

    pub fn render(&self, frames: &[StackSymbol]) -> Vec<String> {
        frames.iter().map(|frame| self.formatter.format_symbol(frame)).collect()
    }
}

fn symbolize<C: ImageCatalog>(resolver: &SymbolResolver<C>, frames: &[RawFrame]) -> Vec<StackSymbol> {
    frames
        .iter()
        .map(|frame| StackSymbol::from_resolved(frame.frame_index, resolver.resolve(frame.address)))
        .collect()
}
