//! Frame-pointer chain walking
//!
//! Each frame record on x86_64 and aarch64 is two words: the caller's frame
//! pointer followed by the return address into the caller.
//!
//! ```text
//! fp + 0     saved frame pointer ──┐
//! fp + WORD  return address        │
//!                                  ▼
//!                          caller's record (higher address)
//! ```

#![allow(unsafe_code)] // reading stack memory requires unsafe

use super::memory_maps::MemoryRange;

const WORD: usize = std::mem::size_of::<usize>();

/// Word-sized reads of memory that may not be valid
pub trait MemoryReader {
    /// Read the word at `addr`, or `None` if it must not be dereferenced
    fn read_word(&self, addr: usize) -> Option<usize>;
}

/// Reads limited to one mapping (the walked thread's stack)
#[derive(Debug, Clone, Copy)]
pub struct StackMemory {
    stack: Option<MemoryRange>,
}

impl StackMemory {
    #[must_use]
    pub fn new(stack: Option<MemoryRange>) -> Self {
        Self { stack }
    }
}

impl MemoryReader for StackMemory {
    fn read_word(&self, addr: usize) -> Option<usize> {
        let stack = self.stack?;
        let end = addr.checked_add(WORD)?;
        if addr % WORD != 0 || !stack.contains(addr as u64) || end as u64 > stack.end {
            return None;
        }
        // In bounds of a readable mapping and aligned
        Some(unsafe { std::ptr::read_volatile(addr as *const usize) })
    }
}

/// Walk the chain starting at `frame_ptr` into `out`
///
/// `first_pc` (the interrupted instruction of a parked thread) is recorded
/// before any return address. Stops at `max_depth` addresses, or when the
/// chain leaves readable memory, is misaligned, reaches a zero return
/// address, or stops growing towards higher addresses.
///
/// Never grows `out` beyond `max_depth`; with that much capacity reserved it
/// does not allocate, so it may run while another thread is parked.
pub fn walk_frame_chain<R: MemoryReader>(
    first_pc: Option<usize>,
    mut frame_ptr: usize,
    max_depth: usize,
    memory: &R,
    out: &mut Vec<u64>,
) {
    out.clear();
    if max_depth == 0 {
        return;
    }

    if let Some(pc) = first_pc.filter(|&pc| pc != 0) {
        out.push(pc as u64);
    }

    while out.len() < max_depth {
        if frame_ptr == 0 || frame_ptr % WORD != 0 {
            break;
        }

        let Some(next_frame_ptr) = memory.read_word(frame_ptr) else {
            break;
        };
        let Some(return_ip) = frame_ptr.checked_add(WORD).and_then(|a| memory.read_word(a)) else {
            break;
        };

        if return_ip == 0 {
            break;
        }
        out.push(return_ip as u64);

        if next_frame_ptr <= frame_ptr {
            break;
        }
        frame_ptr = next_frame_ptr;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// A fake stack: address -> word
    #[derive(Default)]
    struct SyntheticStack {
        words: HashMap<usize, usize>,
    }

    impl SyntheticStack {
        fn record(mut self, fp: usize, next_fp: usize, ret: usize) -> Self {
            self.words.insert(fp, next_fp);
            self.words.insert(fp + WORD, ret);
            self
        }
    }

    impl MemoryReader for SyntheticStack {
        fn read_word(&self, addr: usize) -> Option<usize> {
            self.words.get(&addr).copied()
        }
    }

    fn three_frames() -> SyntheticStack {
        SyntheticStack::default()
            .record(0x1000, 0x1100, 0xc0de_0003)
            .record(0x1100, 0x1200, 0xc0de_0002)
            .record(0x1200, 0, 0xc0de_0001)
    }

    #[test]
    fn test_walks_until_null_frame_pointer() {
        let mut out = Vec::new();
        walk_frame_chain(None, 0x1000, 128, &three_frames(), &mut out);
        assert_eq!(out, vec![0xc0de_0003, 0xc0de_0002, 0xc0de_0001]);
    }

    #[test]
    fn test_first_pc_comes_first() {
        let mut out = Vec::new();
        walk_frame_chain(Some(0xc0de_0004), 0x1000, 128, &three_frames(), &mut out);
        assert_eq!(out, vec![0xc0de_0004, 0xc0de_0003, 0xc0de_0002, 0xc0de_0001]);
    }

    #[test]
    fn test_zero_pc_is_skipped() {
        let mut out = Vec::new();
        walk_frame_chain(Some(0), 0x1000, 128, &three_frames(), &mut out);
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_truncates_at_max_depth() {
        let mut out = Vec::new();
        walk_frame_chain(Some(0xc0de_0004), 0x1000, 2, &three_frames(), &mut out);
        assert_eq!(out, vec![0xc0de_0004, 0xc0de_0003]);

        walk_frame_chain(None, 0x1000, 0, &three_frames(), &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_cycle_terminates() {
        let stack = SyntheticStack::default()
            .record(0x1000, 0x1100, 0xaaaa)
            .record(0x1100, 0x1000, 0xbbbb);
        let mut out = Vec::new();
        walk_frame_chain(None, 0x1000, 128, &stack, &mut out);
        assert_eq!(out, vec![0xaaaa, 0xbbbb]);
    }

    #[test]
    fn test_self_loop_terminates() {
        let stack = SyntheticStack::default().record(0x1000, 0x1000, 0xaaaa);
        let mut out = Vec::new();
        walk_frame_chain(None, 0x1000, 128, &stack, &mut out);
        assert_eq!(out, vec![0xaaaa]);
    }

    #[test]
    fn test_misaligned_frame_pointer_stops() {
        let stack = SyntheticStack::default().record(0x1000, 0x1103, 0xaaaa);
        let mut out = Vec::new();
        walk_frame_chain(None, 0x1000, 128, &stack, &mut out);
        assert_eq!(out, vec![0xaaaa]);

        walk_frame_chain(None, 0x1001, 128, &stack, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_unreadable_frame_stops() {
        let stack = SyntheticStack::default().record(0x1000, 0x9000, 0xaaaa);
        let mut out = Vec::new();
        walk_frame_chain(None, 0x1000, 128, &stack, &mut out);
        assert_eq!(out, vec![0xaaaa]);
    }

    #[test]
    fn test_zero_return_address_stops() {
        let stack = SyntheticStack::default().record(0x1000, 0x1100, 0).record(0x1100, 0, 0xbbbb);
        let mut out = Vec::new();
        walk_frame_chain(None, 0x1000, 128, &stack, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_does_not_reallocate_with_reserved_capacity() {
        let mut out = Vec::with_capacity(2);
        let before = out.as_ptr();
        walk_frame_chain(Some(1), 0x1000, 2, &three_frames(), &mut out);
        assert_eq!(out.len(), 2);
        assert_eq!(out.as_ptr(), before);
    }

    #[test]
    fn test_stack_memory_respects_bounds() {
        let words = [0x11usize, 0x22, 0x33];
        let start = words.as_ptr() as usize;
        let range = MemoryRange { start: start as u64, end: (start + 2 * WORD) as u64 };
        let memory = StackMemory::new(Some(range));

        assert_eq!(memory.read_word(start), Some(0x11));
        assert_eq!(memory.read_word(start + WORD), Some(0x22));
        assert_eq!(memory.read_word(start + 2 * WORD), None);
        assert_eq!(memory.read_word(start + 1), None);
        assert_eq!(StackMemory::new(None).read_word(start), None);
    }
}
