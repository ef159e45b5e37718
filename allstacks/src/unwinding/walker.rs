//! Capturing one thread's return-address chain

use log::debug;
use std::time::Duration;

use super::frame_chain::{walk_frame_chain, StackMemory};
use super::memory_maps::ReadableRegions;
use super::registers::read_frame_pointer;
use super::suspend;
use crate::config::CaptureConfig;
use crate::domain::{RawFrame, SuspendError, ThreadHandle, Tid};
use crate::threads::current_tid;

/// Produces the raw frames of one thread
pub trait StackWalker {
    /// Capture at most `max_depth` frames of `thread`, innermost first
    ///
    /// # Errors
    /// Returns an error if the thread could not be paused; the thread is
    /// never left paused.
    fn capture_frames(
        &self,
        thread: &ThreadHandle,
        max_depth: usize,
    ) -> Result<Vec<RawFrame>, SuspendError>;
}

/// Walks saved frame pointers; parks other threads with a signal
#[derive(Debug, Clone, Copy)]
pub struct FramePointerWalker {
    signal: i32,
    suspend_timeout: Duration,
}

impl Default for FramePointerWalker {
    fn default() -> Self {
        Self::from_config(&CaptureConfig::default())
    }
}

impl FramePointerWalker {
    #[must_use]
    pub fn new(signal: i32, suspend_timeout: Duration) -> Self {
        Self { signal, suspend_timeout }
    }

    #[must_use]
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self::new(config.signal, config.suspend_timeout)
    }

    fn capture_other(&self, tid: Tid, max_depth: usize) -> Result<Vec<RawFrame>, SuspendError> {
        // Everything that allocates happens before the target is parked
        let regions = ReadableRegions::snapshot();
        let mut addresses = Vec::with_capacity(max_depth);

        {
            let parked = suspend::park(tid, self.signal, self.suspend_timeout)?;
            let regs = parked.registers();
            let memory = StackMemory::new(regions.region_containing(regs.fp as u64));
            walk_frame_chain(Some(regs.pc), regs.fp, max_depth, &memory, &mut addresses);
        }

        debug!("Captured {} frames from {tid}", addresses.len());
        Ok(into_raw_frames(addresses))
    }
}

impl StackWalker for FramePointerWalker {
    fn capture_frames(
        &self,
        thread: &ThreadHandle,
        max_depth: usize,
    ) -> Result<Vec<RawFrame>, SuspendError> {
        if thread.tid == current_tid() {
            return capture_current(max_depth);
        }
        self.capture_other(thread.tid, max_depth)
    }
}

/// Capture the calling thread in place
///
/// Frame 0 is the return address into this function's caller.
///
/// # Errors
/// Returns an error on architectures without a supported frame pointer.
#[inline(never)]
pub fn capture_current(max_depth: usize) -> Result<Vec<RawFrame>, SuspendError> {
    let frame_ptr = read_frame_pointer().ok_or(SuspendError::UnsupportedPlatform {
        os: std::env::consts::OS,
        arch: std::env::consts::ARCH,
    })?;

    let regions = ReadableRegions::snapshot();
    let memory = StackMemory::new(regions.region_containing(frame_ptr as u64));
    let mut addresses = Vec::with_capacity(max_depth);
    walk_frame_chain(None, frame_ptr, max_depth, &memory, &mut addresses);

    Ok(into_raw_frames(addresses))
}

fn into_raw_frames(addresses: Vec<u64>) -> Vec<RawFrame> {
    addresses
        .into_iter()
        .enumerate()
        .map(|(frame_index, address)| RawFrame { address, frame_index })
        .collect()
}

#[cfg(all(test, target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
    use super::*;
    use std::hint::black_box;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{mpsc, Arc};

    #[inline(never)]
    fn outer(max_depth: usize) -> Vec<RawFrame> {
        black_box(inner(max_depth))
    }

    #[inline(never)]
    fn inner(max_depth: usize) -> Vec<RawFrame> {
        black_box(capture_current(max_depth).unwrap())
    }

    #[test]
    fn test_current_thread_respects_max_depth() {
        for depth in [1, 2, 5] {
            let frames = outer(depth);
            assert!(frames.len() <= depth);
            assert!(!frames.is_empty());
        }
        assert!(outer(0).is_empty());
    }

    #[test]
    fn test_frame_indices_are_sequential() {
        let frames = outer(64);
        assert!(frames.len() >= 3, "frame chain too shallow: {frames:?}");
        for (i, frame) in frames.iter().enumerate() {
            assert_eq!(frame.frame_index, i);
            assert_ne!(frame.address, 0);
        }
    }

    #[test]
    fn test_same_call_site_gives_same_innermost_frame() {
        let a = outer(4);
        let b = outer(4);
        assert_eq!(a[0], b[0]);
    }

    #[test]
    fn test_captures_other_thread_and_resumes_it() {
        let counter = Arc::new(AtomicU64::new(0));
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let handle = {
            let counter = Arc::clone(&counter);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                tx.send(current_tid()).unwrap();
                while !stop.load(Ordering::Relaxed) {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            })
        };
        let tid = rx.recv().unwrap();

        let walker = FramePointerWalker::new(libc::SIGPROF, Duration::from_secs(2));
        let frames = walker.capture_frames(&ThreadHandle::new(tid, "spinner"), 32).unwrap();
        assert!(!frames.is_empty());
        assert!(frames.len() <= 32);

        let seen = counter.load(Ordering::Relaxed);
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::Relaxed) == seen {
            assert!(std::time::Instant::now() < deadline, "thread stayed paused");
            std::thread::yield_now();
        }

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
