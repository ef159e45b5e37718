//! The image catalog seam
//!
//! The resolver never touches process-global loader state directly; it asks
//! an [`ImageCatalog`]. The live implementation lives in `loaded_images`,
//! [`StaticCatalog`] holds synthetic images for tests and embedders.

use std::ops::Range;

use crate::domain::{ImageInfo, LoadedImage, Symbol};

/// Read-only view of the images mapped into a process
pub trait ImageCatalog {
    /// Every known image, in load order
    fn images(&self) -> &[LoadedImage];

    /// The symbol with the greatest start address `<= address` in image
    /// `image` (an index into [`ImageCatalog::images`])
    fn nearest_symbol(&self, image: usize, address: u64) -> Option<&Symbol>;
}

/// Produces a fresh catalog for each capture pass
pub trait CatalogSource {
    type Catalog: ImageCatalog;

    fn snapshot(&self) -> Self::Catalog;
}

/// Symbols of one image, sorted by address
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
}

impl SymbolTable {
    /// Sort by address; of several names at one address the first one given wins
    #[must_use]
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.address);
        symbols.dedup_by_key(|s| s.address);
        Self { symbols }
    }

    /// Nearest-preceding-symbol search
    #[must_use]
    pub fn nearest(&self, address: u64) -> Option<&Symbol> {
        let idx = self.symbols.partition_point(|s| s.address <= address).checked_sub(1)?;
        self.symbols.get(idx)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}

/// A fixed set of images and symbols
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    images: Vec<LoadedImage>,
    tables: Vec<SymbolTable>,
}

impl StaticCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an image loaded at `range.start` with symbols at absolute addresses
    #[must_use]
    pub fn with_image(
        mut self,
        path: impl Into<String>,
        range: Range<u64>,
        symbols: Vec<Symbol>,
    ) -> Self {
        let load_order = self.images.len();
        self.images.push(LoadedImage {
            info: ImageInfo::new(path, range.start),
            range,
            bias: 0,
            load_order,
        });
        self.tables.push(SymbolTable::new(symbols));
        self
    }
}

impl ImageCatalog for StaticCatalog {
    fn images(&self) -> &[LoadedImage] {
        &self.images
    }

    fn nearest_symbol(&self, image: usize, address: u64) -> Option<&Symbol> {
        self.tables.get(image)?.nearest(address)
    }
}

impl CatalogSource for StaticCatalog {
    type Catalog = StaticCatalog;

    fn snapshot(&self) -> StaticCatalog {
        self.clone()
    }
}
