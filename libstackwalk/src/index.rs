use log::debug;
use std::path::Path;

use crate::elf::{Elf64_Sym, Image, STT_FUNC, STT_OBJECT};
use crate::error::IndexError;

/// Inclusive address range of one retained symbol, relative to
/// [`SymbolIndex::addr_base`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRange {
    pub start: u32,
    pub end: u32,
}

/// A successful lookup: which retained symbol covers the address, and how far
/// into that symbol the address lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub symbol: usize,
    pub offset: u64,
}

/// Address-sorted index over the symbols of one executable image.
///
/// Built once from the on-disk file; afterwards it owns all of its storage
/// (the source mapping is released before the constructor returns) and is
/// immutable, so any number of threads or nested fault handlers may resolve
/// against it concurrently without locking.
#[derive(Debug)]
pub struct SymbolIndex {
    /// Sorted ascending by `start`, non-overlapping, ends inclusive.
    symbols: Vec<SymbolRange>,
    /// Byte offsets into `name_base`, parallel to `symbols`.
    names: Vec<u32>,
    /// Verbatim copy of the image's string table.
    name_base: Box<[u8]>,
    addr_base: u64,
    /// Inclusive.
    addr_end: u64,
}

impl SymbolIndex {
    /// Indexes the symbol table of the executable at `path`.
    ///
    /// The file is mapped read-only for the duration of the call and unmapped
    /// again before returning; the index holds no reference to it afterwards.
    /// Failures are terminal; no partial index is ever returned.
    pub fn build(path: &Path) -> Result<Self, IndexError> {
        Self::build_with_observer(path, &mut |_| {})
    }

    /// Same as [`SymbolIndex::build`], but invokes `observer` with the
    /// requested byte count if backing storage cannot be reserved, before
    /// `AllocationFailure` is returned. Lets a crash-reporting subsystem note
    /// the shortage without owning the allocation itself.
    pub fn build_with_observer(
        path: &Path,
        observer: &mut dyn FnMut(usize),
    ) -> Result<Self, IndexError> {
        let image = Image::open(path)?;
        let (addr_base, addr_end) = image.virtual_address_range()?;
        let span = u32::try_from(addr_end - addr_base).map_err(|_| IndexError::TooLarge {
            size: addr_end - addr_base,
        })?;
        let (symtab, strtab) = image.symbol_table()?;

        let mut name_base = Vec::new();
        reserve(&mut name_base, strtab.len(), observer)?;
        name_base.extend_from_slice(strtab);

        // One scratch word per candidate, ordered by (relative address,
        // table index) so a single generic sort yields address order while
        // the original entry stays reachable for its size and name.
        let mut scratch: Vec<(u32, u32)> = Vec::new();
        reserve(&mut scratch, symtab.len(), observer)?;
        for (i, sym) in symtab.iter().enumerate() {
            if sym.st_size == 0 {
                continue;
            }
            let symbol_type = sym.symbol_type();
            if symbol_type != STT_FUNC && symbol_type != STT_OBJECT {
                continue;
            }
            if sym.st_value < addr_base || sym.st_value > addr_end {
                continue;
            }
            scratch.push(((sym.st_value - addr_base) as u32, i as u32));
        }
        scratch.sort_unstable();

        let mut symbols = Vec::new();
        let mut names = Vec::new();
        reserve(&mut symbols, scratch.len(), observer)?;
        reserve(&mut names, scratch.len(), observer)?;
        collapse_ranges(&scratch, &symtab, span, &mut symbols, &mut names);

        debug!(
            "retained {} of {} symbol entries from {}, span {:#x}..={:#x}",
            symbols.len(),
            symtab.len(),
            path.display(),
            addr_base,
            addr_end
        );

        // Scratch and the image mapping drop here; the index owns everything
        // it needs from now on.
        Ok(Self {
            symbols,
            names,
            name_base: name_base.into_boxed_slice(),
            addr_base,
            addr_end,
        })
    }

    /// Number of retained symbols.
    pub fn count(&self) -> usize {
        self.symbols.len()
    }

    /// Lowest virtual address claimed by the image.
    pub fn addr_base(&self) -> u64 {
        self.addr_base
    }

    /// Highest virtual address claimed by the image, inclusive.
    pub fn addr_end(&self) -> u64 {
        self.addr_end
    }

    /// The retained ranges, sorted ascending by start.
    pub fn symbols(&self) -> &[SymbolRange] {
        &self.symbols
    }

    /// Finds the retained symbol whose range contains the absolute
    /// `address`. Addresses outside `[addr_base, addr_end]`, or inside a gap
    /// no symbol claims, resolve to `None`.
    pub fn resolve(&self, address: u64) -> Option<Resolution> {
        if address < self.addr_base || address > self.addr_end {
            return None;
        }
        let relative = (address - self.addr_base) as u32;
        let after = self
            .symbols
            .partition_point(|range| range.start <= relative);
        if after == 0 {
            return None;
        }
        let range = &self.symbols[after - 1];
        if relative > range.end {
            return None;
        }
        Some(Resolution {
            symbol: after - 1,
            offset: (relative - range.start) as u64,
        })
    }

    /// NUL-terminated name bytes of a retained symbol, raw. Symbol names are
    /// not guaranteed to be UTF-8. Out-of-range indices and string-table
    /// offsets yield an empty name rather than a wrong one.
    pub fn name(&self, symbol: usize) -> &[u8] {
        let Some(&offset) = self.names.get(symbol) else {
            return &[];
        };
        let tail = self.name_base.get(offset as usize..).unwrap_or(&[]);
        let len = tail
            .iter()
            .position(|&byte| byte == 0)
            .unwrap_or(tail.len());
        &tail[..len]
    }
}

fn reserve<T>(
    vec: &mut Vec<T>,
    additional: usize,
    observer: &mut dyn FnMut(usize),
) -> Result<(), IndexError> {
    vec.try_reserve_exact(additional).map_err(|_| {
        observer(additional.saturating_mul(std::mem::size_of::<T>()));
        IndexError::AllocationFailure
    })
}

/// Folds the address-ordered candidates into the final non-overlapping
/// ranges. On an exact duplicate start the later table entry replaces the
/// earlier one; an entry reaching past its successor's start is clamped to
/// end one byte before it. Entries with no recorded extent run to the end of
/// the image.
fn collapse_ranges(
    ordered: &[(u32, u32)],
    symtab: &[Elf64_Sym],
    span: u32,
    symbols: &mut Vec<SymbolRange>,
    names: &mut Vec<u32>,
) {
    for &(start, table_index) in ordered {
        let sym = &symtab[table_index as usize];
        if symbols.last().is_some_and(|prev| prev.start == start) {
            symbols.pop();
            names.pop();
        }
        if let Some(prev) = symbols.last_mut() {
            if prev.end >= start {
                prev.end = start - 1;
            }
        }
        let end = if sym.st_size != 0 {
            (start as u64 + sym.st_size - 1).min(span as u64) as u32
        } else {
            span
        };
        symbols.push(SymbolRange { start, end });
        names.push(sym.st_name);
    }
}
