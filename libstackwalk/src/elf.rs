// Intentionally not using a crate for this. The index only needs the symbol
// and string table sections of a well-known 64-bit layout, and parsing them
// directly keeps the build path free of third-party format abstractions.

// Struct names mirror the on-disk ELF64 spelling.
#![allow(non_camel_case_types)]

use log::debug;
use memmap2::{Mmap, MmapOptions};
use std::path::Path;

use crate::error::IndexError;

pub const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// Files larger than this cannot be indexed; relative offsets inside the
/// index are stored as 32-bit values.
pub const MAX_IMAGE_BYTES: u64 = i32::MAX as u64;

pub const SHT_SYMTAB: u32 = 2;
pub const SHT_DYNSYM: u32 = 11;
pub const SHF_ALLOC: u64 = 0x2;

pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

#[repr(C)]
#[derive(Debug)]
pub struct Elf64_Ehdr {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u64,
    pub e_phoff: u64,
    pub e_shoff: u64,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// Section header
#[repr(C)]
#[derive(Debug)]
pub struct Elf64_Shdr {
    pub sh_name: u32,
    pub sh_type: u32,
    pub sh_flags: u64,
    pub sh_addr: u64,
    pub sh_offset: u64,
    pub sh_size: u64,
    pub sh_link: u32,
    pub sh_info: u32,
    pub sh_addralign: u64,
    /// For sections that contain fixed-size entries, this field gives the size of each entry. Otherwise, it should be 0.
    pub sh_entsize: u64,
}

/// Symbol table entry
#[repr(C)]
#[derive(Debug, Clone)]
pub struct Elf64_Sym {
    pub st_name: u32,
    pub st_info: u8,
    pub st_other: u8,
    pub st_shndx: u16,
    pub st_value: u64,
    pub st_size: u64,
}

impl Elf64_Sym {
    /// Low nibble of `st_info` is the symbol type tag.
    /// See: https://refspecs.linuxbase.org/elf/gabi4+/ch4.symtab.html
    pub fn symbol_type(&self) -> u8 {
        self.st_info & 0x0F
    }
}

/// A read-only mapping of the executable being indexed. Only alive while the
/// index is under construction; dropping it unmaps the file.
#[derive(Debug)]
pub struct Image {
    mmap: Mmap,
    header: Elf64_Ehdr,
    section_headers: Vec<Elf64_Shdr>,
}

impl Image {
    pub fn open(path: &Path) -> Result<Self, IndexError> {
        const HEADER_SIZE: usize = std::mem::size_of::<Elf64_Ehdr>();

        let file_handle = std::fs::File::open(path).map_err(IndexError::OpenFailure)?;
        let file_size = file_handle
            .metadata()
            .map_err(IndexError::OpenFailure)?
            .len();
        if file_size > MAX_IMAGE_BYTES {
            return Err(IndexError::TooLarge { size: file_size });
        }
        if file_size < HEADER_SIZE as u64 {
            return Err(IndexError::MalformedImage(
                "file is too small to hold an ELF header",
            ));
        }
        // SAFETY: The file handle is valid and at least a header long; the
        // mapping is private and read-only, so outside writers cannot change
        // what this process observes mid-parse.
        let mmap =
            unsafe { MmapOptions::new().map(&file_handle) }.map_err(IndexError::OpenFailure)?;
        if mmap[..4] != ELF_MAGIC {
            return Err(IndexError::MalformedImage("missing ELF magic bytes"));
        }
        // SAFETY: We have verified that the file is large enough to contain
        // an ELF header, and the struct is a plain data structure.
        let header = unsafe { std::ptr::read_unaligned(mmap.as_ptr() as *const Elf64_Ehdr) };
        let section_headers = Self::parse_section_headers(&mmap, &header)?;
        debug!(
            "mapped {} ({} bytes, {} sections)",
            path.display(),
            file_size,
            section_headers.len()
        );
        Ok(Self {
            mmap,
            header,
            section_headers,
        })
        // The file handle drops here; the private mapping stays valid without it.
    }

    fn parse_section_headers(
        mmaped_file: &Mmap,
        header: &Elf64_Ehdr,
    ) -> Result<Vec<Elf64_Shdr>, IndexError> {
        const SECTION_HEADER_SIZE: usize = std::mem::size_of::<Elf64_Shdr>();
        let file_len = mmaped_file.len();
        if header.e_shoff > usize::MAX as u64 {
            return Err(IndexError::MalformedImage(
                "section header offset exceeds addressable memory",
            ));
        }
        let section_headers_offset = header.e_shoff as usize;
        let num_of_sections = {
            if header.e_shnum == 0 && header.e_shentsize != 0 {
                // Special case for files with 0xff00 or more sections: the
                // actual count lives in the sh_size field of section header 0.
                if section_headers_offset
                    .checked_add(SECTION_HEADER_SIZE)
                    .is_none_or(|end| end > file_len)
                {
                    return Err(IndexError::MalformedImage(
                        "section header zero exceeds file size",
                    ));
                }
                let first_section_header_ptr = unsafe {
                    mmaped_file.as_ptr().add(section_headers_offset) as *const Elf64_Shdr
                };
                // SAFETY: We have verified that section header zero is within
                // the bounds of the file.
                let first_section_header =
                    unsafe { std::ptr::read_unaligned(first_section_header_ptr) };
                if first_section_header.sh_size > usize::MAX as u64 {
                    return Err(IndexError::MalformedImage(
                        "section count exceeds addressable memory",
                    ));
                }
                first_section_header.sh_size as usize
            } else {
                header.e_shnum as usize
            }
        };

        let section_headers_size = num_of_sections
            .checked_mul(SECTION_HEADER_SIZE)
            .ok_or(IndexError::MalformedImage("section header table overflows"))?;
        if section_headers_offset
            .checked_add(section_headers_size)
            .is_none_or(|end| end > file_len)
        {
            return Err(IndexError::MalformedImage(
                "section header table exceeds file size",
            ));
        }

        let mut section_headers = Vec::with_capacity(num_of_sections);
        for i in 0..num_of_sections {
            let entry_offset = section_headers_offset + i * SECTION_HEADER_SIZE;
            // SAFETY: The whole table was verified to lie within the mapping,
            // and Elf64_Shdr is a plain data structure.
            section_headers.push(unsafe {
                std::ptr::read_unaligned(mmaped_file.as_ptr().add(entry_offset) as *const Elf64_Shdr)
            });
        }
        Ok(section_headers)
    }

    /// Copies the symbol table out of the mapping and returns it together
    /// with the raw bytes of its linked string table.
    ///
    /// Prefers SHT_SYMTAB and falls back to SHT_DYNSYM, so stripped binaries
    /// that still export dynamic symbols remain indexable.
    pub fn symbol_table(&self) -> Result<(Vec<Elf64_Sym>, &[u8]), IndexError> {
        const SYMBOL_TABLE_ENTRY_SIZE: usize = std::mem::size_of::<Elf64_Sym>();

        let symtab_header = self
            .section_of_type(SHT_SYMTAB)
            .or_else(|| self.section_of_type(SHT_DYNSYM))
            .ok_or(IndexError::IndexUnavailable)?;
        if symtab_header.sh_entsize as usize != SYMBOL_TABLE_ENTRY_SIZE {
            // The table cannot be walked safely with a foreign entry size.
            return Err(IndexError::IndexUnavailable);
        }
        let symtab_bytes = self
            .section_bytes(symtab_header)
            .ok_or(IndexError::IndexUnavailable)?;

        let strtab_header = self
            .section_headers
            .get(symtab_header.sh_link as usize)
            .ok_or(IndexError::IndexUnavailable)?;
        let strtab_bytes = self
            .section_bytes(strtab_header)
            .ok_or(IndexError::IndexUnavailable)?;

        let number_of_entries = symtab_bytes.len() / SYMBOL_TABLE_ENTRY_SIZE;
        let mut symbol_table: Vec<Elf64_Sym> = Vec::with_capacity(number_of_entries);
        for i in 0..number_of_entries {
            // SAFETY: Every entry lies inside the bounds-checked section
            // bytes, and Elf64_Sym is a plain data structure.
            symbol_table.push(unsafe {
                std::ptr::read_unaligned(
                    symtab_bytes.as_ptr().add(i * SYMBOL_TABLE_ENTRY_SIZE) as *const Elf64_Sym
                )
            });
        }
        Ok((symbol_table, strtab_bytes))
    }

    /// Inclusive virtual address bounds `[addr_base, addr_end]` covered by
    /// the allocated sections of the image.
    pub fn virtual_address_range(&self) -> Result<(u64, u64), IndexError> {
        let mut addr_base = u64::MAX;
        let mut addr_end = 0u64;
        for section_header in &self.section_headers {
            if section_header.sh_flags & SHF_ALLOC == 0 || section_header.sh_size == 0 {
                continue;
            }
            addr_base = addr_base.min(section_header.sh_addr);
            addr_end = addr_end.max(
                section_header
                    .sh_addr
                    .saturating_add(section_header.sh_size),
            );
        }
        if addr_base > addr_end {
            // Nothing is mapped at runtime, so no symbol could be in range.
            return Err(IndexError::IndexUnavailable);
        }
        // The scan produces an exclusive end; the index stores inclusive bounds.
        Ok((addr_base, addr_end - 1))
    }

    fn section_of_type(&self, sh_type: u32) -> Option<&Elf64_Shdr> {
        self.section_headers
            .iter()
            .find(|section_header| section_header.sh_type == sh_type)
    }

    fn section_bytes(&self, section_header: &Elf64_Shdr) -> Option<&[u8]> {
        let offset = usize::try_from(section_header.sh_offset).ok()?;
        let size = usize::try_from(section_header.sh_size).ok()?;
        let end = offset.checked_add(size)?;
        if end > self.mmap.len() {
            return None;
        }
        Some(&self.mmap[offset..end])
    }

    pub fn header(&self) -> &Elf64_Ehdr {
        &self.header
    }
}
