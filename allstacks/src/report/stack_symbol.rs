use crate::domain::{ResolvedSymbol, StackSymbol, UNKNOWN_SYMBOL};
use crate::symbolization::demangle;

impl StackSymbol {
    /// Build the rendered frame for a resolution result
    ///
    /// A miss renders as `unknown`; an address outside every image keeps
    /// the `???` image name.
    #[must_use]
    pub fn from_resolved(frame_index: usize, resolved: ResolvedSymbol) -> Self {
        let image_short_name = resolved.image_short_name().to_string();
        let demangled_name = if resolved.is_miss() {
            UNKNOWN_SYMBOL.to_string()
        } else {
            demangle(&resolved.symbol_name)
        };

        Self {
            frame_index,
            image_short_name,
            image_path: resolved.image.map(|image| image.path).unwrap_or_default(),
            raw_address: resolved.raw_address,
            symbol: resolved.symbol_name,
            demangled_name,
            offset: resolved.offset,
        }
    }
}
