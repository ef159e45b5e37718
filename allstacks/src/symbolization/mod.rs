//! # Symbol Resolution
//!
//! Converts raw instruction addresses into an owning image and the nearest
//! preceding symbol, using only the symbol tables of the images already
//! loaded into the process.
//!
//! ## Address Translation Flow
//!
//! ```text
//! 1. Find the image whose mapped range contains the address
//!    0x55f3a2b4c780 in /usr/bin/app (0x55f3a2b4c000 - 0x55f3a2b5f000)
//!
//! 2. Nearest-preceding-symbol search in that image's table
//!    symbols relocated by the load bias, sorted by address
//!    greatest start <= 0x55f3a2b4c780 → _ZN3app4work17h...E at 0x55f3a2b4c700
//!
//! 3. Offset from the symbol start
//!    0x55f3a2b4c780 - 0x55f3a2b4c700 = 0x80 (128)
//!
//! 4. Demangle
//!    _ZN3app4work17h...E → app::work
//! ```
//!
//! With no symbol the offset is taken from the image's load base. With no
//! image the result is the `???` sentinel. Neither is an error.
//!
//! ## Module Structure
//!
//! - **`catalog`**: the [`ImageCatalog`] seam, symbol tables, a static catalog
//! - **`dynamic`**: exported symbols from an image's mapped dynamic section
//! - **`loaded_images`**: live catalog from the dynamic loader
//! - **`resolver`**: [`SymbolResolver`]
//! - **`demangle`**: Rust name demangling with fallback to the input

pub mod catalog;
pub mod demangle;
pub mod dynamic;
pub mod loaded_images;
pub mod resolver;

pub use catalog::{CatalogSource, ImageCatalog, StaticCatalog, SymbolTable};
pub use demangle::demangle;
pub use loaded_images::{LiveImages, LoadedImages};
pub use resolver::SymbolResolver;
