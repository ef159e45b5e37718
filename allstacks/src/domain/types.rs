//! Domain types providing compile-time safety and self-documentation
//!
//! Every value here is built once per capture pass and never mutated
//! afterwards. Nothing in this module is retained across captures.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;

/// Image name rendered when no loaded image contains an address
pub const UNKNOWN_IMAGE: &str = "???";

/// Symbol name rendered when resolution found no symbol
pub const UNKNOWN_SYMBOL: &str = "unknown";

/// Thread ID
///
/// The kernel thread id of a thread in the current process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct Tid(pub u32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// A schedulable thread of the current process
///
/// Only valid for the duration of one capture pass: the thread may exit at
/// any time after enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadHandle {
    pub tid: Tid,
    pub name: String,
}

impl ThreadHandle {
    pub fn new(tid: Tid, name: impl Into<String>) -> Self {
        Self { tid, name: name.into() }
    }
}

/// One return address from a walked stack (index 0 = innermost)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFrame {
    pub address: u64,
    pub frame_index: usize,
}

/// A binary image mapped into the process
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageInfo {
    pub path: String,
    pub load_base: u64,
}

impl ImageInfo {
    pub fn new(path: impl Into<String>, load_base: u64) -> Self {
        Self { path: path.into(), load_base }
    }

    /// Last path component, or `???` for an empty path
    #[must_use]
    pub fn short_name(&self) -> &str {
        Path::new(&self.path)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .unwrap_or(UNKNOWN_IMAGE)
    }
}

/// A loaded image together with the address range it occupies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub info: ImageInfo,
    /// Union of the image's mapped segments
    pub range: Range<u64>,
    /// Difference between runtime addresses and the addresses in the file
    pub bias: u64,
    /// Position in the loader's list; later images win overlaps
    pub load_order: usize,
}

impl LoadedImage {
    #[must_use]
    pub fn contains(&self, address: u64) -> bool {
        self.range.contains(&address)
    }
}

/// A named address inside an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub address: u64,
}

impl Symbol {
    pub fn new(name: impl Into<String>, address: u64) -> Self {
        Self { name: name.into(), address }
    }
}

/// Outcome of resolving one address against the image catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSymbol {
    pub raw_address: u64,
    /// `None` when no loaded image contains the address
    pub image: Option<ImageInfo>,
    /// Empty when no symbol was found
    pub symbol_name: String,
    pub nearest_symbol_address: Option<u64>,
    /// Distance from the symbol start, or from the image base on a miss
    pub offset: u64,
}

impl ResolvedSymbol {
    /// The sentinel for an address outside every loaded image
    #[must_use]
    pub fn unmapped(raw_address: u64) -> Self {
        Self {
            raw_address,
            image: None,
            symbol_name: String::new(),
            nearest_symbol_address: None,
            offset: 0,
        }
    }

    /// True when no symbol name was found for the address
    #[must_use]
    pub fn is_miss(&self) -> bool {
        self.symbol_name.is_empty()
    }

    #[must_use]
    pub fn image_short_name(&self) -> &str {
        self.image.as_ref().map_or(UNKNOWN_IMAGE, ImageInfo::short_name)
    }
}

/// A fully rendered stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackSymbol {
    pub frame_index: usize,
    pub image_short_name: String,
    pub image_path: String,
    pub raw_address: u64,
    /// Symbol exactly as found in the table (mangled)
    pub symbol: String,
    pub demangled_name: String,
    pub offset: u64,
}

/// One thread's capture result
#[derive(Debug, Clone, Serialize)]
pub struct ThreadBacktrace {
    pub tid: Tid,
    pub name: String,
    pub frames: Vec<StackSymbol>,
    /// Why the capture failed; `frames` is empty when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Thread id to formatted frame lines, innermost frame first
pub type Backtrace = BTreeMap<Tid, Vec<String>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tid_display() {
        assert_eq!(Tid(42).to_string(), "TID:42");
    }

    #[test]
    fn test_short_name_takes_last_component() {
        let info = ImageInfo::new("/usr/lib/x86_64-linux-gnu/libc.so.6", 0x7f00_0000_0000);
        assert_eq!(info.short_name(), "libc.so.6");
    }

    #[test]
    fn test_short_name_without_directory() {
        assert_eq!(ImageInfo::new("linux-vdso.so.1", 0x1000).short_name(), "linux-vdso.so.1");
    }

    #[test]
    fn test_short_name_empty_path() {
        assert_eq!(ImageInfo::new("", 0x1000).short_name(), UNKNOWN_IMAGE);
    }

    #[test]
    fn test_unmapped_sentinel() {
        let resolved = ResolvedSymbol::unmapped(0xdead);
        assert!(resolved.is_miss());
        assert_eq!(resolved.offset, 0);
        assert_eq!(resolved.image_short_name(), "???");
    }

    #[test]
    fn test_loaded_image_range_is_half_open() {
        let image = LoadedImage {
            info: ImageInfo::new("/bin/app", 0x1000),
            range: 0x1000..0x2000,
            bias: 0,
            load_order: 0,
        };
        assert!(image.contains(0x1000));
        assert!(image.contains(0x1FFF));
        assert!(!image.contains(0x2000));
        assert!(!image.contains(0x0FFF));
    }
}
