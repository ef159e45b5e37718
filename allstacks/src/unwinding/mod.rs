//! Stack capture
//!
//! - **`walker`**: the [`StackWalker`] seam and the frame-pointer implementation
//! - **`suspend`**: parking another thread in a signal handler
//! - **`frame_chain`**: the bounded frame-pointer walk itself
//! - **`memory_maps`**: readable regions from `/proc/self/maps`
//! - **`registers`**: frame pointer and interrupted-context access
//!
//! Walks are best effort. Code built without frame pointers truncates the
//! chain at the first such frame; truncation is never reported as an error.

pub mod frame_chain;
pub mod memory_maps;
pub mod registers;
pub mod suspend;
pub mod walker;

pub use memory_maps::{MemoryRange, ReadableRegions};
pub use walker::{capture_current, FramePointerWalker, StackWalker};
