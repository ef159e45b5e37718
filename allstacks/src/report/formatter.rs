//! Fixed-column frame lines
//!
//! ```text
//! 0   MyApp                               0x0000000102a3f000 MyApp.foo() + 12
//! └┬─┘└────────────────┬────────────────┘ └──────┬─────────┘ └────┬────┘ └─┬┘
//! index (4)      image short name (35)     address (ptr width)   symbol   offset
//! ```
//!
//! Downstream log parsers rely on the column widths and the `" + "`
//! separator; both are fixed.

use serde::Serialize;
use std::fmt;

use crate::domain::StackSymbol;

const INDEX_COLUMN: usize = 4;
const IMAGE_COLUMN: usize = 35;

/// Width of the address column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PointerWidth {
    Bits32,
    Bits64,
}

impl PointerWidth {
    /// Pointer width of the running process
    #[must_use]
    pub fn native() -> Self {
        if usize::BITS == 64 {
            Self::Bits64
        } else {
            Self::Bits32
        }
    }

    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            32 => Some(Self::Bits32),
            64 => Some(Self::Bits64),
            _ => None,
        }
    }

    #[must_use]
    pub fn hex_digits(self) -> usize {
        match self {
            Self::Bits32 => 8,
            Self::Bits64 => 16,
        }
    }
}

/// Renders one frame per line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameFormatter {
    width: PointerWidth,
}

impl Default for FrameFormatter {
    fn default() -> Self {
        Self::new(PointerWidth::native())
    }
}

impl FrameFormatter {
    #[must_use]
    pub fn new(width: PointerWidth) -> Self {
        Self { width }
    }

    #[must_use]
    pub fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    /// Image names longer than the column are cut on a char boundary;
    /// addresses wider than the column are printed in full.
    #[must_use]
    pub fn format(
        &self,
        frame_index: usize,
        image_short_name: &str,
        address: u64,
        demangled_name: &str,
        offset: u64,
    ) -> String {
        format!(
            "{frame_index:<index_width$}{image_short_name:<image_width$.image_width$} \
             0x{address:0digits$x} {demangled_name} + {offset}",
            index_width = INDEX_COLUMN,
            image_width = IMAGE_COLUMN,
            digits = self.width.hex_digits(),
        )
    }

    #[must_use]
    pub fn format_symbol(&self, symbol: &StackSymbol) -> String {
        self.format(
            symbol.frame_index,
            &symbol.image_short_name,
            symbol.raw_address,
            &symbol.demangled_name,
            symbol.offset,
        )
    }
}

impl fmt::Display for StackSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&FrameFormatter::default().format_symbol(self))
    }
}
