//! Register access for the supported architectures

#![allow(unsafe_code)] // inline asm and ucontext access require unsafe

/// The two registers a frame-pointer walk starts from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameRegisters {
    pub pc: usize,
    pub fp: usize,
}

/// Frame pointer of the function this is inlined into
///
/// `None` on architectures without a supported frame-pointer register.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub fn read_frame_pointer() -> Option<usize> {
    let frame_ptr: usize;
    unsafe {
        core::arch::asm!(
            "mov {}, rbp",
            out(reg) frame_ptr,
            options(nomem, nostack, preserves_flags)
        );
    }
    Some(frame_ptr)
}

#[cfg(target_arch = "aarch64")]
#[inline(always)]
pub fn read_frame_pointer() -> Option<usize> {
    let frame_ptr: usize;
    unsafe {
        core::arch::asm!(
            "mov {}, x29",
            out(reg) frame_ptr,
            options(nomem, nostack, preserves_flags)
        );
    }
    Some(frame_ptr)
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
#[inline(always)]
pub fn read_frame_pointer() -> Option<usize> {
    None
}

/// Interrupted registers from a signal handler's context argument
///
/// # Safety
/// `context` must be the third argument of an `SA_SIGINFO` handler.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
pub unsafe fn from_ucontext(context: *mut libc::c_void) -> FrameRegisters {
    let uc = &*(context as *const libc::ucontext_t);
    let gregs = &uc.uc_mcontext.gregs;
    FrameRegisters {
        pc: gregs[libc::REG_RIP as usize] as usize,
        fp: gregs[libc::REG_RBP as usize] as usize,
    }
}

/// Interrupted registers from a signal handler's context argument
///
/// # Safety
/// `context` must be the third argument of an `SA_SIGINFO` handler.
#[cfg(all(target_os = "linux", target_arch = "aarch64"))]
#[allow(clippy::cast_possible_truncation)]
pub unsafe fn from_ucontext(context: *mut libc::c_void) -> FrameRegisters {
    let uc = &*(context as *const libc::ucontext_t);
    FrameRegisters { pc: uc.uc_mcontext.pc as usize, fp: uc.uc_mcontext.regs[29] as usize }
}
