use log::trace;

use super::catalog::ImageCatalog;
use crate::domain::{LoadedImage, ResolvedSymbol};

/// Maps instruction addresses to the image and symbol that contain them
pub struct SymbolResolver<C> {
    catalog: C,
}

impl<C: ImageCatalog> SymbolResolver<C> {
    pub fn new(catalog: C) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    /// Resolve `address` against the catalog
    ///
    /// Never fails: an address outside every image yields
    /// [`ResolvedSymbol::unmapped`], an address with no preceding symbol is
    /// reported relative to its image's load base.
    pub fn resolve(&self, address: u64) -> ResolvedSymbol {
        let Some((index, image)) = self.containing_image(address) else {
            trace!("0x{address:x} is outside every loaded image");
            return ResolvedSymbol::unmapped(address);
        };

        let symbol = self
            .catalog
            .nearest_symbol(index, address)
            .filter(|s| s.address <= address && !s.name.is_empty());

        if let Some(symbol) = symbol {
            return ResolvedSymbol {
                raw_address: address,
                image: Some(image.info.clone()),
                symbol_name: symbol.name.clone(),
                nearest_symbol_address: Some(symbol.address),
                offset: address - symbol.address,
            };
        }

        // Clamped rather than wrapped; still a miss
        let offset = address.checked_sub(image.info.load_base).unwrap_or_else(|| {
            trace!("0x{address:x} is below the load base of {}", image.info.path);
            0
        });

        ResolvedSymbol {
            raw_address: address,
            image: Some(image.info.clone()),
            symbol_name: String::new(),
            nearest_symbol_address: None,
            offset,
        }
    }

    /// The containing image; on overlap the most recently loaded one
    fn containing_image(&self, address: u64) -> Option<(usize, &LoadedImage)> {
        self.catalog
            .images()
            .iter()
            .enumerate()
            .filter(|(_, image)| image.contains(address))
            .max_by_key(|(_, image)| image.load_order)
    }
}
