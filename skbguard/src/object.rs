//! Static validation of bytecode objects before any kernel interaction.
//!
//! BPF objects are ELF64 little-endian relocatables with one section per
//! entry point and a `license` section. Kernels refuse GPL-only helper
//! calls from objects that are not GPL-compatible, so an object without
//! an acceptable license declaration is rejected at open time, with a
//! clearer message than the kernel would give later.

use thiserror::Error;

/// ELF magic number
const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class: 64-bit
const ELFCLASS64: u8 = 2;

/// ELF data encoding: little endian
const ELFDATA2LSB: u8 = 1;

/// ELF type: relocatable object
const ET_REL: u16 = 1;

/// Size of an ELF64 file header
const EHDR_SIZE: usize = 64;

/// Size of an ELF64 section header
const SHDR_SIZE: usize = 64;

/// License strings the kernel accepts as GPL-compatible.
const GPL_COMPATIBLE: [&str; 6] = [
    "GPL",
    "GPL v2",
    "GPL and additional rights",
    "Dual BSD/GPL",
    "Dual MIT/GPL",
    "Dual MPL/GPL",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ObjectError {
    #[error("file too small for an ELF header")]
    TooSmall,
    #[error("invalid ELF magic")]
    InvalidMagic,
    #[error("not a 64-bit ELF")]
    Not64Bit,
    #[error("not little endian")]
    NotLittleEndian,
    #[error("not a relocatable object")]
    NotRelocatable,
    #[error("section headers out of bounds")]
    Truncated,
    #[error("no license section")]
    MissingLicense,
    #[error("license `{0}` is not GPL-compatible")]
    IncompatibleLicense(String),
}

/// Checks structure and license of a bytecode object. No kernel
/// interaction; this runs before the object is submitted for loading.
pub fn validate(data: &[u8]) -> Result<(), ObjectError> {
    if data.len() < EHDR_SIZE {
        return Err(ObjectError::TooSmall);
    }
    if data[0..4] != ELF_MAGIC {
        return Err(ObjectError::InvalidMagic);
    }
    if data[4] != ELFCLASS64 {
        return Err(ObjectError::Not64Bit);
    }
    if data[5] != ELFDATA2LSB {
        return Err(ObjectError::NotLittleEndian);
    }

    let e_type = u16::from_le_bytes([data[16], data[17]]);
    if e_type != ET_REL {
        return Err(ObjectError::NotRelocatable);
    }

    let e_shoff = u64::from_le_bytes(data[40..48].try_into().unwrap()) as usize;
    let e_shentsize = u16::from_le_bytes([data[58], data[59]]) as usize;
    let e_shnum = u16::from_le_bytes([data[60], data[61]]) as usize;
    let e_shstrndx = u16::from_le_bytes([data[62], data[63]]) as usize;

    if e_shentsize < SHDR_SIZE || e_shstrndx >= e_shnum {
        return Err(ObjectError::Truncated);
    }

    let shstrtab = section_body(data, e_shoff, e_shentsize, e_shstrndx)?;

    for index in 0..e_shnum {
        let header = section_header(data, e_shoff, e_shentsize, index)?;
        let sh_name = u32::from_le_bytes(header[0..4].try_into().unwrap()) as usize;
        if section_name(shstrtab, sh_name) == Some("license") {
            let body = section_body(data, e_shoff, e_shentsize, index)?;
            return check_license(body);
        }
    }

    Err(ObjectError::MissingLicense)
}

fn section_header(
    data: &[u8],
    shoff: usize,
    shentsize: usize,
    index: usize,
) -> Result<&[u8], ObjectError> {
    let start = shoff
        .checked_add(index.checked_mul(shentsize).ok_or(ObjectError::Truncated)?)
        .ok_or(ObjectError::Truncated)?;
    let end = start.checked_add(shentsize).ok_or(ObjectError::Truncated)?;
    data.get(start..end).ok_or(ObjectError::Truncated)
}

fn section_body(
    data: &[u8],
    shoff: usize,
    shentsize: usize,
    index: usize,
) -> Result<&[u8], ObjectError> {
    let header = section_header(data, shoff, shentsize, index)?;
    let sh_offset = u64::from_le_bytes(header[24..32].try_into().unwrap()) as usize;
    let sh_size = u64::from_le_bytes(header[32..40].try_into().unwrap()) as usize;
    let end = sh_offset.checked_add(sh_size).ok_or(ObjectError::Truncated)?;
    data.get(sh_offset..end).ok_or(ObjectError::Truncated)
}

/// Name of a section given its offset into the section string table.
fn section_name(shstrtab: &[u8], offset: usize) -> Option<&str> {
    let tail = shstrtab.get(offset..)?;
    let len = tail.iter().position(|&byte| byte == 0)?;
    core::str::from_utf8(&tail[..len]).ok()
}

fn check_license(body: &[u8]) -> Result<(), ObjectError> {
    let len = body.iter().position(|&byte| byte == 0).unwrap_or(body.len());
    let Ok(license) = core::str::from_utf8(&body[..len]) else {
        let lossy = String::from_utf8_lossy(&body[..len]).into_owned();
        return Err(ObjectError::IncompatibleLicense(lossy));
    };
    if license.is_empty() {
        return Err(ObjectError::MissingLicense);
    }
    if GPL_COMPATIBLE.contains(&license) {
        Ok(())
    } else {
        Err(ObjectError::IncompatibleLicense(license.to_owned()))
    }
}
