//! Thread enumeration
//!
//! Lists the threads of the current process by reading `/proc/self/task`.

#![allow(unsafe_code)] // gettid() requires unsafe

use log::debug;
use std::fs;

use crate::domain::{EnumerationError, ThreadHandle, Tid};

const TASK_DIR: &str = "/proc/self/task";

/// Source of the threads to capture
pub trait ThreadEnumerator {
    /// List every schedulable thread of the current process
    ///
    /// # Errors
    /// Returns an error if the operating system refuses to list threads
    fn list_threads(&self) -> Result<Vec<ThreadHandle>, EnumerationError>;
}

/// Enumerates threads through procfs
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcTaskEnumerator;

impl ThreadEnumerator for ProcTaskEnumerator {
    fn list_threads(&self) -> Result<Vec<ThreadHandle>, EnumerationError> {
        if !cfg!(target_os = "linux") {
            return Err(EnumerationError::UnsupportedPlatform { os: std::env::consts::OS });
        }

        // The ReadDir handle closes on every path out of this function
        let entries = fs::read_dir(TASK_DIR).map_err(|source| {
            EnumerationError::TaskDirUnreadable { path: TASK_DIR.to_string(), source }
        })?;

        let threads: Vec<ThreadHandle> = entries
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let tid = entry.file_name().to_string_lossy().parse::<u32>().ok()?;
                Some(ThreadHandle::new(Tid(tid), thread_name(Tid(tid))))
            })
            .collect();

        debug!("Enumerated {} threads", threads.len());
        Ok(threads)
    }
}

/// Read a thread's name from `/proc/self/task/<tid>/comm`
///
/// Returns an empty string if the thread has exited or the file is unreadable.
#[must_use]
pub fn thread_name(tid: Tid) -> String {
    fs::read_to_string(format!("{TASK_DIR}/{}/comm", tid.0))
        .map(|comm| comm.trim_end().to_string())
        .unwrap_or_default()
}

/// Kernel thread id of the calling thread
#[cfg(target_os = "linux")]
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn current_tid() -> Tid {
    // gettid is async-signal-safe and cannot fail
    Tid(unsafe { libc::syscall(libc::SYS_gettid) } as u32)
}

#[cfg(not(target_os = "linux"))]
#[must_use]
pub fn current_tid() -> Tid {
    Tid(0)
}
