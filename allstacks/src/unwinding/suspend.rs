//! Pausing another thread of this process
//!
//! Linux has no call to suspend a single thread, so the target is sent a
//! directed signal. Its handler publishes the interrupted registers and then
//! parks until the collector releases it:
//!
//! ```text
//!   collector                         target (in signal handler)
//!   ─────────                         ──────────────────────────
//!   state = REQUESTED
//!   tgkill(target, signal)  ───────▶  REQUESTED → CAPTURING
//!                                     publish pc, fp
//!   wait for PARKED         ◀───────  state = PARKED, spin
//!   walk stack from outside
//!   drop(ParkedThread)
//!   state = RESUMING        ───────▶  leave spin
//!   wait for IDLE           ◀───────  state = IDLE, return
//! ```
//!
//! While a thread is parked it may hold any lock in the process, including
//! the allocator's. Between [`park`] and dropping the returned guard the
//! collector must not allocate, log, or take locks.
//!
//! The target tid travels with the state in one word; a handler parks only
//! if the pending request names its own thread. Any other delivery of the
//! signal is passed on to the handler that was installed before ours.

#![allow(unsafe_code)] // sigaction, tgkill and errno require unsafe

use std::time::Duration;

use super::registers::FrameRegisters;
use crate::domain::{SuspendError, Tid};

#[cfg(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64")))]
mod imp {
    use super::{Duration, FrameRegisters, SuspendError, Tid};
    use crate::threads::current_tid;
    use crate::unwinding::registers;
    use std::sync::atomic::{AtomicI32, AtomicU64, AtomicUsize, Ordering};
    use std::sync::{Mutex, MutexGuard, PoisonError};
    use std::time::Instant;

    const IDLE: u8 = 0;
    const REQUESTED: u8 = 1;
    const CAPTURING: u8 = 2;
    const PARKED: u8 = 3;
    const RESUMING: u8 = 4;

    /// Highest signal number a handler can be installed for, plus one
    const SIGNAL_SLOTS: usize = 65;

    /// One signal-based capture in flight per process
    static CAPTURE_LOCK: Mutex<()> = Mutex::new(());

    /// Target tid and protocol state, packed so the handler claims both at once
    static REQUEST: AtomicU64 = AtomicU64::new(request(0, IDLE));
    static PARKED_PC: AtomicUsize = AtomicUsize::new(0);
    static PARKED_FP: AtomicUsize = AtomicUsize::new(0);

    /// Bit n set once the handler is installed for signal n
    static INSTALLED_SIGNALS: AtomicU64 = AtomicU64::new(0);
    static INSTALL_LOCK: Mutex<()> = Mutex::new(());

    /// Handlers that were installed before ours, per signal
    static PREVIOUS_HANDLER: [AtomicUsize; SIGNAL_SLOTS] =
        [const { AtomicUsize::new(libc::SIG_DFL) }; SIGNAL_SLOTS];
    static PREVIOUS_FLAGS: [AtomicI32; SIGNAL_SLOTS] = [const { AtomicI32::new(0) }; SIGNAL_SLOTS];

    const fn request(tid: u32, state: u8) -> u64 {
        ((tid as u64) << 8) | state as u64
    }

    #[allow(clippy::cast_possible_truncation)]
    fn state_of(word: u64) -> u8 {
        (word & 0xff) as u8
    }

    /// A thread stopped inside the capture signal handler
    ///
    /// Dropping the guard resumes the thread.
    pub struct ParkedThread {
        tid: Tid,
        registers: FrameRegisters,
        _lock: MutexGuard<'static, ()>,
    }

    impl ParkedThread {
        pub fn tid(&self) -> Tid {
            self.tid
        }

        pub fn registers(&self) -> FrameRegisters {
            self.registers
        }
    }

    impl Drop for ParkedThread {
        fn drop(&mut self) {
            REQUEST.store(request(self.tid.0, RESUMING), Ordering::Release);
            // The handler answers within one scheduling quantum
            while state_of(REQUEST.load(Ordering::Acquire)) != IDLE {
                std::thread::yield_now();
            }
        }
    }

    fn errno() -> i32 {
        unsafe { *libc::__errno_location() }
    }

    fn set_errno(value: i32) {
        unsafe { *libc::__errno_location() = value };
    }

    /// Take the pending request if it names `tid`
    pub(super) fn claim(tid: u32) -> bool {
        REQUEST
            .compare_exchange(
                request(tid, REQUESTED),
                request(tid, CAPTURING),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    extern "C" fn on_capture_signal(
        sig: libc::c_int,
        info: *mut libc::siginfo_t,
        context: *mut libc::c_void,
    ) {
        let saved_errno = errno();
        let tid = current_tid().0;

        if claim(tid) {
            let regs = unsafe { registers::from_ucontext(context) };
            PARKED_PC.store(regs.pc, Ordering::Relaxed);
            PARKED_FP.store(regs.fp, Ordering::Relaxed);
            REQUEST.store(request(tid, PARKED), Ordering::Release);

            while REQUEST.load(Ordering::Acquire) == request(tid, PARKED) {
                unsafe { libc::sched_yield() };
            }
            REQUEST.store(request(0, IDLE), Ordering::Release);
        } else {
            forward(sig, info, context);
        }

        set_errno(saved_errno);
    }

    /// Hand a signal that is not a capture request to the previous handler
    ///
    /// A previous default action is not taken: for the profiling signals it
    /// would terminate the process.
    fn forward(sig: libc::c_int, info: *mut libc::siginfo_t, context: *mut libc::c_void) {
        let Some(slot) = usize::try_from(sig).ok().filter(|&s| s < SIGNAL_SLOTS) else {
            return;
        };
        let handler = PREVIOUS_HANDLER[slot].load(Ordering::Acquire);
        if handler == libc::SIG_DFL || handler == libc::SIG_IGN {
            return;
        }

        if PREVIOUS_FLAGS[slot].load(Ordering::Acquire) & libc::SA_SIGINFO != 0 {
            let action: extern "C" fn(libc::c_int, *mut libc::siginfo_t, *mut libc::c_void) =
                unsafe { std::mem::transmute(handler) };
            action(sig, info, context);
        } else {
            let action: extern "C" fn(libc::c_int) = unsafe { std::mem::transmute(handler) };
            action(sig);
        }
    }

    fn ensure_handler(signal: i32) -> Result<(), SuspendError> {
        let (slot, bit) = usize::try_from(signal)
            .ok()
            .filter(|&s| (1..64).contains(&s))
            .map(|s| (s, 1u64 << s))
            .ok_or(SuspendError::HandlerInstallFailed { signal, errno: libc::EINVAL })?;

        if INSTALLED_SIGNALS.load(Ordering::Acquire) & bit != 0 {
            return Ok(());
        }

        let _guard = INSTALL_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        if INSTALLED_SIGNALS.load(Ordering::Acquire) & bit != 0 {
            return Ok(());
        }

        let mut previous: libc::sigaction = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            let mut sa: libc::sigaction = std::mem::zeroed();
            sa.sa_sigaction = on_capture_signal as *const () as usize;
            sa.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
            libc::sigemptyset(&mut sa.sa_mask);
            libc::sigaction(signal, &sa, &mut previous)
        };
        if rc != 0 {
            return Err(SuspendError::HandlerInstallFailed { signal, errno: errno() });
        }

        PREVIOUS_FLAGS[slot].store(previous.sa_flags, Ordering::Release);
        PREVIOUS_HANDLER[slot].store(previous.sa_sigaction, Ordering::Release);
        INSTALLED_SIGNALS.fetch_or(bit, Ordering::AcqRel);
        log::debug!("Installed capture handler for signal {signal}");
        Ok(())
    }

    pub fn park(tid: Tid, signal: i32, timeout: Duration) -> Result<ParkedThread, SuspendError> {
        ensure_handler(signal)?;

        // The handler would spin forever waiting for its own release
        if tid == current_tid() {
            return Err(SuspendError::SignalFailed { tid, errno: libc::EDEADLK });
        }

        let lock = lock_capture();
        REQUEST.store(request(tid.0, REQUESTED), Ordering::Release);

        let rc = unsafe {
            libc::syscall(
                libc::SYS_tgkill,
                libc::c_long::from(libc::getpid()),
                libc::c_long::from(tid.0),
                libc::c_long::from(signal),
            )
        };
        if rc != 0 {
            let errno = errno();
            REQUEST.store(request(0, IDLE), Ordering::Release);
            return Err(SuspendError::SignalFailed { tid, errno });
        }

        let deadline = Instant::now() + timeout;
        loop {
            match state_of(REQUEST.load(Ordering::Acquire)) {
                PARKED => break,
                REQUESTED if Instant::now() >= deadline => {
                    // A late signal finds the request withdrawn and returns at once
                    if REQUEST
                        .compare_exchange(
                            request(tid.0, REQUESTED),
                            request(0, IDLE),
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_ok()
                    {
                        return Err(SuspendError::Timeout { tid, waited: timeout });
                    }
                }
                _ => {}
            }
            std::thread::yield_now();
        }

        let registers = FrameRegisters {
            pc: PARKED_PC.load(Ordering::Relaxed),
            fp: PARKED_FP.load(Ordering::Relaxed),
        };
        Ok(ParkedThread { tid, registers, _lock: lock })
    }

    pub(super) fn lock_capture() -> MutexGuard<'static, ()> {
        CAPTURE_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(super) fn set_request(tid: u32, requested: bool) {
        let state = if requested { REQUESTED } else { IDLE };
        REQUEST.store(request(tid, state), Ordering::Release);
    }
}

#[cfg(not(all(target_os = "linux", any(target_arch = "x86_64", target_arch = "aarch64"))))]
mod imp {
    use super::{Duration, FrameRegisters, SuspendError, Tid};

    pub struct ParkedThread {
        tid: Tid,
        registers: FrameRegisters,
    }

    impl ParkedThread {
        pub fn tid(&self) -> Tid {
            self.tid
        }

        pub fn registers(&self) -> FrameRegisters {
            self.registers
        }
    }

    pub fn park(_tid: Tid, _signal: i32, _timeout: Duration) -> Result<ParkedThread, SuspendError> {
        Err(SuspendError::UnsupportedPlatform {
            os: std::env::consts::OS,
            arch: std::env::consts::ARCH,
        })
    }
}

pub use imp::ParkedThread;

/// Stop `tid` inside the capture signal handler and read its registers
///
/// The thread stays stopped until the returned guard is dropped.
///
/// # Errors
/// Fails if the handler cannot be installed, the signal cannot be delivered
/// (the thread exited), or the thread does not stop within `timeout` (for
/// example because it blocks the signal).
pub fn park(tid: Tid, signal: i32, timeout: Duration) -> Result<ParkedThread, SuspendError> {
    imp::park(tid, signal, timeout)
}
