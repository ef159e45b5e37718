//! Exported symbols read from an image's mapped dynamic section
//!
//! The loader keeps `.dynsym`, `.dynstr` and the hash tables of every image
//! mapped, the vdso included, so exported names are available without
//! touching the file system. The dynamic section records where they are but
//! not how many symbols there are; the count comes from `DT_HASH`, or from
//! walking the `DT_GNU_HASH` chains when only that table is present.

#![allow(unsafe_code)] // reads the loader's mapped tables

use log::trace;
use object::elf;
use object::read::elf::{Dyn as _, Sym as _};
use object::NativeEndian;
use std::mem::size_of;
use std::ops::Range;

use crate::domain::Symbol;

#[cfg(target_pointer_width = "64")]
type ElfDyn = elf::Dyn64<NativeEndian>;
#[cfg(target_pointer_width = "64")]
type ElfSym = elf::Sym64<NativeEndian>;
#[cfg(target_pointer_width = "32")]
type ElfDyn = elf::Dyn32<NativeEndian>;
#[cfg(target_pointer_width = "32")]
type ElfSym = elf::Sym32<NativeEndian>;

/// Largest symbol count accepted from the hash tables
const MAX_SYMBOLS: usize = 1 << 22;

/// Location of one image's `PT_DYNAMIC` segment in memory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicSection {
    /// Runtime address range of the dynamic array
    pub entries: Range<u64>,
    pub bias: u64,
    /// Mapped range of the owning image; every table must lie inside it
    pub image: Range<u64>,
}

#[derive(Debug, Default)]
struct Tables {
    symtab: Option<u64>,
    strtab: Option<u64>,
    strsz: Option<u64>,
    syment: Option<u64>,
    hash: Option<u64>,
    gnu_hash: Option<u64>,
}

/// Defined function symbols of the image, relocated by its bias
///
/// Returns an empty list when the section is missing a table or points
/// outside the image.
///
/// # Safety
/// `section` must describe a loaded image that stays mapped for the
/// duration of the call (for example, inside a `dl_iterate_phdr` callback).
pub unsafe fn exported_symbols(section: &DynamicSection) -> Vec<Symbol> {
    let Some(tables) = read_tables(section) else {
        return Vec::new();
    };
    let (Some(symtab), Some(strtab), Some(strsz)) = (tables.symtab, tables.strtab, tables.strsz)
    else {
        trace!("Dynamic section at 0x{:x} has no symbol table", section.entries.start);
        return Vec::new();
    };
    if tables.syment.is_some_and(|size| size != size_of::<ElfSym>() as u64) {
        return Vec::new();
    }

    let count = match (tables.hash, tables.gnu_hash) {
        (Some(hash), _) => hash_symbol_count(section, hash),
        (None, Some(gnu_hash)) => gnu_hash_symbol_count(section, gnu_hash),
        (None, None) => None,
    };
    let Some(count) = count.filter(|&n| n <= MAX_SYMBOLS) else {
        return Vec::new();
    };

    let Some(strings) = usize::try_from(strsz).ok().and_then(|len| bytes(section, strtab, len))
    else {
        return Vec::new();
    };
    let Some(raw) = bytes(section, symtab, count * size_of::<ElfSym>()) else {
        return Vec::new();
    };
    let Ok((symbols, _)) = object::pod::slice_from_bytes::<ElfSym>(raw, count) else {
        return Vec::new();
    };

    symbols.iter().filter_map(|sym| function_symbol(sym, strings, section.bias)).collect()
}

unsafe fn read_tables(section: &DynamicSection) -> Option<Tables> {
    let len = usize::try_from(section.entries.end.checked_sub(section.entries.start)?).ok()?;
    let raw = bytes(section, section.entries.start, len)?;
    let (entries, _) = object::pod::slice_from_bytes::<ElfDyn>(raw, len / size_of::<ElfDyn>()).ok()?;

    let endian = NativeEndian;
    let mut tables = Tables::default();
    for entry in entries {
        let tag: u64 = entry.d_tag(endian).into();
        let value: u64 = entry.d_val(endian).into();
        let Ok(tag) = u32::try_from(tag) else {
            continue;
        };
        match tag {
            elf::DT_NULL => break,
            elf::DT_SYMTAB => tables.symtab = Some(relocate(section, value)),
            elf::DT_STRTAB => tables.strtab = Some(relocate(section, value)),
            elf::DT_HASH => tables.hash = Some(relocate(section, value)),
            elf::DT_GNU_HASH => tables.gnu_hash = Some(relocate(section, value)),
            elf::DT_STRSZ => tables.strsz = Some(value),
            elf::DT_SYMENT => tables.syment = Some(value),
            _ => {}
        }
    }
    Some(tables)
}

/// Table addresses are already relocated by glibc for ordinary images, but
/// not for the vdso or under musl
fn relocate(section: &DynamicSection, value: u64) -> u64 {
    if section.image.contains(&value) {
        value
    } else {
        value.wrapping_add(section.bias)
    }
}

/// `nchain` of a SysV hash table equals the symbol count
unsafe fn hash_symbol_count(section: &DynamicSection, hash: u64) -> Option<usize> {
    let nchain = read_u32(section, hash.checked_add(4)?)?;
    usize::try_from(nchain).ok()
}

/// One past the last symbol reachable from any GNU hash bucket
unsafe fn gnu_hash_symbol_count(section: &DynamicSection, gnu_hash: u64) -> Option<usize> {
    let nbuckets = u64::from(read_u32(section, gnu_hash)?);
    let symoffset = read_u32(section, gnu_hash.checked_add(4)?)?;
    let bloom_size = u64::from(read_u32(section, gnu_hash.checked_add(8)?)?);

    let buckets = gnu_hash.checked_add(16)?.checked_add(bloom_size * size_of::<usize>() as u64)?;
    let chains = buckets.checked_add(nbuckets * 4)?;

    let mut last = 0u32;
    for i in 0..nbuckets {
        last = last.max(read_u32(section, buckets + i * 4)?);
    }
    if last < symoffset {
        return usize::try_from(symoffset).ok();
    }

    let mut index = last;
    loop {
        let offset = u64::from(index - symoffset) * 4;
        // The low bit marks the end of a chain
        if read_u32(section, chains.checked_add(offset)?)? & 1 == 1 {
            return usize::try_from(index).ok()?.checked_add(1);
        }
        index = index.checked_add(1)?;
        if index as usize > MAX_SYMBOLS {
            return None;
        }
    }
}

fn function_symbol(sym: &ElfSym, strings: &[u8], bias: u64) -> Option<Symbol> {
    let endian = NativeEndian;
    let kind = sym.st_type();
    if kind != elf::STT_FUNC && kind != elf::STT_GNU_IFUNC {
        return None;
    }
    let value: u64 = sym.st_value(endian).into();
    if sym.st_shndx(endian) == elf::SHN_UNDEF || value == 0 {
        return None;
    }

    let rest = strings.get(usize::try_from(sym.st_name(endian)).ok()?..)?;
    let end = rest.iter().position(|&b| b == 0)?;
    let name = std::str::from_utf8(&rest[..end]).ok().filter(|name| !name.is_empty())?;
    Some(Symbol::new(name, value.wrapping_add(bias)))
}

unsafe fn read_u32(section: &DynamicSection, address: u64) -> Option<u32> {
    let raw = bytes(section, address, 4)?;
    Some(u32::from_ne_bytes(raw.try_into().ok()?))
}

/// `len` bytes at `address`, if they lie inside the image
unsafe fn bytes<'a>(section: &DynamicSection, address: u64, len: usize) -> Option<&'a [u8]> {
    let end = address.checked_add(u64::try_from(len).ok()?)?;
    if address < section.image.start || end > section.image.end {
        return None;
    }
    let ptr = usize::try_from(address).ok()? as *const u8;
    Some(std::slice::from_raw_parts(ptr, len))
}

#[cfg(all(test, target_pointer_width = "64"))]
mod tests {
    use super::*;
    use object::{U16, U32, U64};

    const BIAS: u64 = 0x10_0000;

    fn sym(name: u32, kind: u8, shndx: u16, value: u64) -> ElfSym {
        let endian = NativeEndian;
        ElfSym {
            st_name: U32::new(endian, name),
            st_info: (elf::STB_GLOBAL << 4) | kind,
            st_other: 0,
            st_shndx: U16::new(endian, shndx),
            st_value: U64::new(endian, value),
            st_size: U64::new(endian, 0),
        }
    }

    fn dyn_entry(tag: u32, value: u64) -> ElfDyn {
        ElfDyn { d_tag: U64::new(NativeEndian, u64::from(tag)), d_val: U64::new(NativeEndian, value) }
    }

    fn addr<T>(data: &[T]) -> u64 {
        data.as_ptr() as usize as u64
    }

    fn end<T>(data: &[T]) -> u64 {
        addr(data) + std::mem::size_of_val(data) as u64
    }

    /// A fake image whose tables live in separate heap buffers
    struct Image {
        strings: Vec<u8>,
        symbols: Vec<ElfSym>,
        hash: Vec<u32>,
        entries: Vec<ElfDyn>,
    }

    impl Image {
        fn new(hash: Vec<u32>) -> Self {
            let strings = b"\0alpha\0beta\0undefined\0data\0".to_vec();
            let symbols = vec![
                sym(0, elf::STT_NOTYPE, elf::SHN_UNDEF, 0),
                sym(1, elf::STT_FUNC, 12, 0x2000),
                sym(7, elf::STT_GNU_IFUNC, 12, 0x2400),
                sym(12, elf::STT_FUNC, elf::SHN_UNDEF, 0),
                sym(22, elf::STT_OBJECT, 20, 0x9000),
            ];
            Self { strings, symbols, hash, entries: Vec::new() }
        }

        fn with_entries(mut self, hash_tag: u32) -> Self {
            self.entries = vec![
                dyn_entry(elf::DT_SYMTAB, addr(&self.symbols)),
                dyn_entry(elf::DT_STRTAB, addr(&self.strings)),
                dyn_entry(elf::DT_STRSZ, self.strings.len() as u64),
                dyn_entry(elf::DT_SYMENT, size_of::<ElfSym>() as u64),
                dyn_entry(hash_tag, addr(&self.hash)),
                dyn_entry(elf::DT_NULL, 0),
            ];
            self
        }

        fn section(&self) -> DynamicSection {
            let start = [addr(&self.strings), addr(&self.symbols), addr(&self.hash), addr(&self.entries)]
                .into_iter()
                .min()
                .unwrap();
            let stop = [end(&self.strings), end(&self.symbols), end(&self.hash), end(&self.entries)]
                .into_iter()
                .max()
                .unwrap();
            DynamicSection {
                entries: addr(&self.entries)..end(&self.entries),
                bias: BIAS,
                image: start..stop,
            }
        }
    }

    fn names(symbols: &[Symbol]) -> Vec<(&str, u64)> {
        symbols.iter().map(|s| (s.name.as_str(), s.address)).collect()
    }

    #[test]
    fn test_sysv_hash_table() {
        // nbucket, nchain, one bucket, five chain slots
        let image = Image::new(vec![1, 5, 1, 0, 0, 0, 0, 0]).with_entries(elf::DT_HASH);
        let symbols = unsafe { exported_symbols(&image.section()) };
        assert_eq!(names(&symbols), vec![("alpha", BIAS + 0x2000), ("beta", BIAS + 0x2400)]);
    }

    #[test]
    fn test_gnu_hash_table() {
        // nbuckets 2, symoffset 1, bloom 1 word (two u32 slots), buckets [1, 3],
        // chains for symbols 1..=4 ending at 2 and 4
        let image = Image::new(vec![2, 1, 1, 0, 0, 0, 1, 3, 0, 1, 0, 1])
            .with_entries(elf::DT_GNU_HASH);
        let symbols = unsafe { exported_symbols(&image.section()) };
        assert_eq!(names(&symbols), vec![("alpha", BIAS + 0x2000), ("beta", BIAS + 0x2400)]);
    }

    #[test]
    fn test_empty_gnu_hash_counts_only_skipped_symbols() {
        let image = Image::new(vec![1, 2, 1, 0, 0, 0, 0]).with_entries(elf::DT_GNU_HASH);
        let symbols = unsafe { exported_symbols(&image.section()) };
        assert_eq!(names(&symbols), vec![("alpha", BIAS + 0x2000)]);
    }

    #[test]
    fn test_no_hash_table_gives_nothing() {
        let mut image = Image::new(vec![1, 5]).with_entries(elf::DT_HASH);
        image.entries[4] = dyn_entry(elf::DT_DEBUG, 0);
        assert!(unsafe { exported_symbols(&image.section()) }.is_empty());
    }

    #[test]
    fn test_table_outside_image_gives_nothing() {
        let mut image = Image::new(vec![1, 5]).with_entries(elf::DT_HASH);
        // Relocates to just below the bias, far from any heap buffer
        image.entries[0] = dyn_entry(elf::DT_SYMTAB, u64::MAX - 0xfff);
        assert!(unsafe { exported_symbols(&image.section()) }.is_empty());
    }

    #[test]
    fn test_unrelocated_pointer_gets_bias() {
        let section =
            DynamicSection { entries: 0..0, bias: 0x7f00_0000, image: 0x7f00_0000..0x7f01_0000 };
        assert_eq!(relocate(&section, 0x1234), 0x7f00_1234);
        assert_eq!(relocate(&section, 0x7f00_1234), 0x7f00_1234);
    }
}
