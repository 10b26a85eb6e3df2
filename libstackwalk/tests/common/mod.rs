//! Synthetic ELF64 images for exercising the indexer without shipping
//! prebuilt binaries: header, one allocated text section, a symbol table,
//! its string table, and the section name table, encoded byte by byte.

#![allow(dead_code)]

use std::path::PathBuf;

pub const STT_NOTYPE: u8 = 0;
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

const SHT_SYMTAB: u32 = 2;
const SHT_STRTAB: u32 = 3;
const SHT_NOBITS: u32 = 8;
const SHF_ALLOC: u64 = 0x2;
const SHF_EXECINSTR: u64 = 0x4;

// Name offsets into the fixed section name table below.
const SHSTRTAB: &[u8] = b"\0.text\0.symtab\0.strtab\0.shstrtab\0";
const NAME_TEXT: u32 = 1;
const NAME_SYMTAB: u32 = 7;
const NAME_STRTAB: u32 = 15;
const NAME_SHSTRTAB: u32 = 23;

pub struct FixtureSymbol {
    pub name: &'static str,
    pub address: u64,
    pub size: u64,
    pub kind: u8,
}

impl FixtureSymbol {
    pub fn func(name: &'static str, address: u64, size: u64) -> Self {
        Self {
            name,
            address,
            size,
            kind: STT_FUNC,
        }
    }
}

/// Encodes a complete image: a text section claiming
/// `[text_addr, text_addr + text_size)` and the given symbols (plus the
/// customary null entry at index zero).
pub fn image_bytes(text_addr: u64, text_size: u64, symbols: &[FixtureSymbol]) -> Vec<u8> {
    let (strtab, symtab) = encode_symbols(symbols);

    let strtab_off = 64u64;
    let symtab_off = strtab_off + strtab.len() as u64;
    let shstrtab_off = symtab_off + symtab.len() as u64;
    let shoff = shstrtab_off + SHSTRTAB.len() as u64;

    let mut image = encode_ehdr(text_addr, shoff, 5, 4);
    image.extend_from_slice(&strtab);
    image.extend_from_slice(&symtab);
    image.extend_from_slice(SHSTRTAB);
    push_shdr(&mut image, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
    push_shdr(
        &mut image,
        NAME_TEXT,
        SHT_NOBITS,
        SHF_ALLOC | SHF_EXECINSTR,
        text_addr,
        0,
        text_size,
        0,
        0,
        16,
        0,
    );
    push_shdr(
        &mut image,
        NAME_SYMTAB,
        SHT_SYMTAB,
        0,
        0,
        symtab_off,
        symtab.len() as u64,
        3,
        1,
        8,
        24,
    );
    push_shdr(
        &mut image,
        NAME_STRTAB,
        SHT_STRTAB,
        0,
        0,
        strtab_off,
        strtab.len() as u64,
        0,
        0,
        1,
        0,
    );
    push_shdr(
        &mut image,
        NAME_SHSTRTAB,
        SHT_STRTAB,
        0,
        0,
        shstrtab_off,
        SHSTRTAB.len() as u64,
        0,
        0,
        1,
        0,
    );
    image
}

/// Same layout, but without any symbol table section at all.
pub fn image_without_symtab(text_addr: u64, text_size: u64) -> Vec<u8> {
    let shstrtab_off = 64u64;
    let shoff = shstrtab_off + SHSTRTAB.len() as u64;
    let mut image = encode_ehdr(text_addr, shoff, 3, 2);
    image.extend_from_slice(SHSTRTAB);
    push_shdr(&mut image, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0);
    push_shdr(
        &mut image,
        NAME_TEXT,
        SHT_NOBITS,
        SHF_ALLOC | SHF_EXECINSTR,
        text_addr,
        0,
        text_size,
        0,
        0,
        16,
        0,
    );
    push_shdr(
        &mut image,
        NAME_SHSTRTAB,
        SHT_STRTAB,
        0,
        0,
        shstrtab_off,
        SHSTRTAB.len() as u64,
        0,
        0,
        1,
        0,
    );
    image
}

/// A symbol table whose string-table link points at a section that does not
/// exist.
pub fn image_with_dangling_strtab(text_addr: u64, text_size: u64) -> Vec<u8> {
    let mut image = image_bytes(
        text_addr,
        text_size,
        &[FixtureSymbol::func("orphan", text_addr, 8)],
    );
    // Section headers sit at the end; sh_link of .symtab (section 2) is at
    // byte offset 40 within its 64-byte header.
    let shoff = image.len() - 5 * 64;
    let link_at = shoff + 2 * 64 + 40;
    image[link_at..link_at + 4].copy_from_slice(&9u32.to_le_bytes());
    image
}

/// Writes the bytes into `dir` and returns the path.
pub fn write_image(dir: &tempfile::TempDir, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, bytes).expect("failed to write fixture image");
    path
}

fn encode_symbols(symbols: &[FixtureSymbol]) -> (Vec<u8>, Vec<u8>) {
    let mut strtab = vec![0u8];
    let mut symtab = vec![0u8; 24]; // reserved null entry
    for symbol in symbols {
        let name_offset = strtab.len() as u32;
        strtab.extend_from_slice(symbol.name.as_bytes());
        strtab.push(0);

        symtab.extend_from_slice(&name_offset.to_le_bytes()); // st_name
        symtab.push(0x10 | symbol.kind); // st_info: STB_GLOBAL, type tag
        symtab.push(0); // st_other
        symtab.extend_from_slice(&1u16.to_le_bytes()); // st_shndx: .text
        symtab.extend_from_slice(&symbol.address.to_le_bytes());
        symtab.extend_from_slice(&symbol.size.to_le_bytes());
    }
    (strtab, symtab)
}

fn encode_ehdr(entry: u64, shoff: u64, shnum: u16, shstrndx: u16) -> Vec<u8> {
    let mut ehdr = Vec::with_capacity(64);
    ehdr.extend_from_slice(&[
        0x7F, b'E', b'L', b'F', // magic
        2,    // ELFCLASS64
        1,    // little endian
        1,    // EV_CURRENT
        0,    // ELFOSABI_SYSV
        0,    // ABI version
        0, 0, 0, 0, 0, 0, 0, // padding
    ]);
    ehdr.extend_from_slice(&2u16.to_le_bytes()); // e_type: ET_EXEC
    ehdr.extend_from_slice(&62u16.to_le_bytes()); // e_machine: EM_X86_64
    ehdr.extend_from_slice(&1u32.to_le_bytes()); // e_version
    ehdr.extend_from_slice(&entry.to_le_bytes()); // e_entry
    ehdr.extend_from_slice(&0u64.to_le_bytes()); // e_phoff
    ehdr.extend_from_slice(&shoff.to_le_bytes()); // e_shoff
    ehdr.extend_from_slice(&0u32.to_le_bytes()); // e_flags
    ehdr.extend_from_slice(&64u16.to_le_bytes()); // e_ehsize
    ehdr.extend_from_slice(&0u16.to_le_bytes()); // e_phentsize
    ehdr.extend_from_slice(&0u16.to_le_bytes()); // e_phnum
    ehdr.extend_from_slice(&64u16.to_le_bytes()); // e_shentsize
    ehdr.extend_from_slice(&shnum.to_le_bytes()); // e_shnum
    ehdr.extend_from_slice(&shstrndx.to_le_bytes()); // e_shstrndx
    assert_eq!(ehdr.len(), 64);
    ehdr
}

#[allow(clippy::too_many_arguments)]
fn push_shdr(
    buf: &mut Vec<u8>,
    sh_name: u32,
    sh_type: u32,
    sh_flags: u64,
    sh_addr: u64,
    sh_offset: u64,
    sh_size: u64,
    sh_link: u32,
    sh_info: u32,
    sh_addralign: u64,
    sh_entsize: u64,
) {
    buf.extend_from_slice(&sh_name.to_le_bytes());
    buf.extend_from_slice(&sh_type.to_le_bytes());
    buf.extend_from_slice(&sh_flags.to_le_bytes());
    buf.extend_from_slice(&sh_addr.to_le_bytes());
    buf.extend_from_slice(&sh_offset.to_le_bytes());
    buf.extend_from_slice(&sh_size.to_le_bytes());
    buf.extend_from_slice(&sh_link.to_le_bytes());
    buf.extend_from_slice(&sh_info.to_le_bytes());
    buf.extend_from_slice(&sh_addralign.to_le_bytes());
    buf.extend_from_slice(&sh_entsize.to_le_bytes());
}
