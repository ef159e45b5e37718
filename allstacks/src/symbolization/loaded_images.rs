//! The live image catalog
//!
//! Images come from the dynamic loader's own list (`dl_iterate_phdr`), so
//! the snapshot reflects exactly what is mapped, in load order. Symbols come
//! from two places:
//!
//! - the exported symbols of the image's mapped dynamic section, read while
//!   the loader lock is held, so images without a file (the vdso) and files
//!   replaced on disk after loading still resolve correctly
//! - optionally `.symtab` from the image's file, for local symbols; read
//!   lazily, the first time an address lands in that image
//!
//! Separate debug files are never consulted.

#![allow(unsafe_code)] // dl_iterate_phdr requires unsafe

use anyhow::{Context, Result};
use log::debug;
use object::{Object, ObjectSymbol, SymbolKind};
use std::cell::OnceCell;
use std::ffi::{c_void, CStr};
use std::fs;
use std::ops::Range;
use std::path::Path;

use super::catalog::{CatalogSource, ImageCatalog, SymbolTable};
use super::dynamic::{exported_symbols, DynamicSection};
use crate::domain::{ImageInfo, LoadedImage, Symbol};

/// Source of [`LoadedImages`] snapshots
#[derive(Debug, Clone, Copy)]
pub struct LiveImages {
    include_local_symbols: bool,
}

impl LiveImages {
    #[must_use]
    pub fn new(include_local_symbols: bool) -> Self {
        Self { include_local_symbols }
    }
}

impl Default for LiveImages {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CatalogSource for LiveImages {
    type Catalog = LoadedImages;

    fn snapshot(&self) -> LoadedImages {
        LoadedImages::snapshot(self.include_local_symbols)
    }
}

/// Images mapped into this process at snapshot time
pub struct LoadedImages {
    images: Vec<LoadedImage>,
    exported: Vec<SymbolTable>,
    local: Vec<OnceCell<SymbolTable>>,
    include_local_symbols: bool,
}

impl LoadedImages {
    #[must_use]
    pub fn snapshot(include_local_symbols: bool) -> Self {
        let mut images = Vec::new();
        let mut exported = Vec::new();

        for (load_order, raw) in loader_images().into_iter().enumerate() {
            let path = if raw.name.is_empty() && load_order == 0 {
                main_executable_path()
            } else {
                raw.name
            };
            images.push(LoadedImage {
                info: ImageInfo::new(path, raw.range.start),
                range: raw.range,
                bias: raw.bias,
                load_order,
            });
            exported.push(SymbolTable::new(raw.exported));
        }

        debug!("Snapshot of {} loaded images", images.len());
        let local = images.iter().map(|_| OnceCell::new()).collect();
        Self { images, exported, local, include_local_symbols }
    }

    /// Exported symbols of one image, from its mapped dynamic section
    #[must_use]
    pub fn exported_symbols(&self, index: usize) -> Option<&SymbolTable> {
        self.exported.get(index)
    }

    fn local_table(&self, index: usize) -> Option<&SymbolTable> {
        if !self.include_local_symbols {
            return None;
        }
        let image = self.images.get(index)?;
        let cell = self.local.get(index)?;
        Some(cell.get_or_init(|| {
            load_local_symbols(Path::new(&image.info.path), image.bias).unwrap_or_else(|e| {
                debug!("No local symbols for {}: {e:#}", image.info.path);
                SymbolTable::default()
            })
        }))
    }
}

impl ImageCatalog for LoadedImages {
    fn images(&self) -> &[LoadedImage] {
        &self.images
    }

    /// The closer of the exported and local candidates; exported wins ties
    fn nearest_symbol(&self, image: usize, address: u64) -> Option<&Symbol> {
        let exported = self.exported.get(image).and_then(|table| table.nearest(address));
        let local = self.local_table(image).and_then(|table| table.nearest(address));
        match (exported, local) {
            (Some(e), Some(l)) if l.address > e.address => Some(l),
            (Some(e), _) => Some(e),
            (None, l) => l,
        }
    }
}

/// Read the `.symtab` text symbols of an image file, relocated by `bias`
///
/// # Errors
/// Returns an error if the file cannot be read or is not a parsable object
pub fn load_local_symbols(path: &Path, bias: u64) -> Result<SymbolTable> {
    let data = fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let obj = object::File::parse(&*data).context("Failed to parse object file")?;

    let symbols: Vec<Symbol> = obj.symbols().filter_map(|sym| text_symbol(&sym, bias)).collect();

    debug!("Loaded {} local symbols from {}", symbols.len(), path.display());
    Ok(SymbolTable::new(symbols))
}

fn text_symbol<'data, S: ObjectSymbol<'data>>(sym: &S, bias: u64) -> Option<Symbol> {
    if sym.kind() != SymbolKind::Text || !sym.is_definition() || sym.address() == 0 {
        return None;
    }
    let name = sym.name().ok().filter(|name| !name.is_empty())?;
    Some(Symbol::new(name, sym.address().wrapping_add(bias)))
}

fn main_executable_path() -> String {
    std::env::current_exe().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default()
}

struct RawImage {
    name: String,
    bias: u64,
    range: Range<u64>,
    exported: Vec<Symbol>,
}

#[cfg(target_os = "linux")]
fn loader_images() -> Vec<RawImage> {
    let mut images: Vec<RawImage> = Vec::new();
    unsafe {
        libc::dl_iterate_phdr(Some(collect_image), std::ptr::addr_of_mut!(images).cast::<c_void>());
    }
    images
}

#[cfg(not(target_os = "linux"))]
fn loader_images() -> Vec<RawImage> {
    Vec::new()
}

#[cfg(target_os = "linux")]
unsafe extern "C" fn collect_image(
    info: *mut libc::dl_phdr_info,
    _size: libc::size_t,
    data: *mut c_void,
) -> libc::c_int {
    let images = &mut *data.cast::<Vec<RawImage>>();
    let info = &*info;

    let name = if info.dlpi_name.is_null() {
        String::new()
    } else {
        CStr::from_ptr(info.dlpi_name).to_string_lossy().into_owned()
    };

    let headers = if info.dlpi_phdr.is_null() {
        &[][..]
    } else {
        std::slice::from_raw_parts(info.dlpi_phdr, usize::from(info.dlpi_phnum))
    };

    let bias = u64::from(info.dlpi_addr);
    let mut start = u64::MAX;
    let mut end = 0u64;
    let mut dynamic = None;
    for header in headers {
        let segment_start = bias.wrapping_add(u64::from(header.p_vaddr));
        let segment_end = segment_start.saturating_add(u64::from(header.p_memsz));
        if header.p_type == libc::PT_LOAD {
            start = start.min(segment_start);
            end = end.max(segment_end);
        } else if header.p_type == libc::PT_DYNAMIC {
            dynamic = Some(segment_start..segment_end);
        }
    }

    if start < end {
        let range = start..end;
        // The loader lock is held for the whole callback, so the image stays mapped
        let exported = dynamic.map_or_else(Vec::new, |entries| {
            exported_symbols(&DynamicSection { entries, bias, image: range.clone() })
        });
        images.push(RawImage { name, bias, range, exported });
    }

    // Keep iterating
    0
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;
    use std::io::Write;

    #[inline(never)]
    fn marker_function() -> u64 {
        std::hint::black_box(42)
    }

    #[test]
    fn test_snapshot_contains_main_executable() {
        let images = LoadedImages::snapshot(true);
        let exe = main_executable_path();
        let main = &images.images()[0];
        assert_eq!(main.info.path, exe);
        assert!(main.contains(marker_function as usize as u64));
    }

    #[test]
    fn test_libc_is_loaded() {
        let images = LoadedImages::snapshot(false);
        let malloc = libc::malloc as usize as u64;
        let owner = images.images().iter().filter(|i| i.contains(malloc)).last();
        assert!(owner.is_some(), "no image contains malloc");
    }

    #[test]
    fn test_exported_libc_symbol_resolves_from_memory() {
        let images = LoadedImages::snapshot(false);
        let getpid = libc::getpid as usize as u64;
        let (index, _) =
            images.images().iter().enumerate().filter(|(_, i)| i.contains(getpid)).last().unwrap();
        let symbol = images.exported_symbols(index).unwrap().nearest(getpid).unwrap();
        assert!(symbol.address <= getpid);
        assert!(getpid - symbol.address < 0x1000, "{symbol:?} too far from getpid");
        assert_eq!(images.nearest_symbol(index, getpid), Some(symbol));
    }

    #[test]
    fn test_vdso_symbols_resolve_without_a_file() {
        let base = unsafe { libc::getauxval(libc::AT_SYSINFO_EHDR) };
        if base == 0 {
            return;
        }
        let images = LoadedImages::snapshot(true);
        let (index, vdso) = images
            .images()
            .iter()
            .enumerate()
            .find(|(_, image)| image.contains(base))
            .expect("vdso missing from the loader list");
        let exported = images.exported_symbols(index).unwrap();
        assert!(!exported.is_empty(), "no symbols in {}", vdso.info.path);

        for name in [c"__vdso_clock_gettime", c"__kernel_clock_gettime"] {
            let address = unsafe { libc::dlsym(libc::RTLD_DEFAULT, name.as_ptr()) } as usize as u64;
            if address == 0 || !vdso.contains(address) {
                continue;
            }
            let symbol = images.nearest_symbol(index, address + 4).unwrap();
            assert_eq!(symbol.address, address);
            assert!(symbol.name.contains("clock_gettime"), "{symbol:?}");
        }
    }

    #[test]
    fn test_local_symbols_cover_private_functions() {
        let images = LoadedImages::snapshot(true);
        let address = marker_function as usize as u64;
        let symbol = images.nearest_symbol(0, address).unwrap();
        assert_eq!(symbol.address, address);
        assert!(symbol.name.contains("marker_function"), "{symbol:?}");
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not an ELF image").unwrap();
        assert!(load_local_symbols(file.path(), 0).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(load_local_symbols(Path::new("/nonexistent/libnothing.so"), 0).is_err());
    }
}
