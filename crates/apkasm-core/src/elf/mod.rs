//! Minimal ELF reading for Android native libraries.
//!
//! Only what this crate needs is parsed:
//!
//! - the file header (class, byte order, type, machine)
//! - program headers, to walk `PT_NOTE` segments for build identifiers
//! - section headers and the section name table, to locate the `payload`
//!   section that wraps assembly stores and per-assembly shared objects
//!
//! ## Example
//!
//! ```no_run
//! use apkasm_core::elf::ElfFile;
//!
//! let data = std::fs::read("libapp.so")?;
//! let elf = ElfFile::parse(&data)?;
//! if let Some(build_id) = elf.build_id()? {
//!     println!("{}", apkasm_core::elf::debug_id_from_build_id(&build_id));
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod note;

use crate::arch::TargetArch;
use crate::binary::{self, Endian};
use crate::error::{Error, Result};
use std::fmt;
use std::ops::Range;
use tracing::debug;

pub use note::{read_notes, NoteRecord, NoteSegment, GNU_NOTE_OWNER, NOTE_HEADER_SIZE, NT_GNU_BUILD_ID};

/// `\x7fELF` read as a little-endian `u32`
pub const ELF_MAGIC: u32 = 0x464C_457F;

/// Program header type of a note segment
pub const PT_NOTE: u32 = 4;

/// Name of the section wrapping embedded payloads
pub const PAYLOAD_SECTION: &str = "payload";

const ET_DYN: u16 = 3;

/// ELF class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
    /// 32-bit objects
    Elf32,
    /// 64-bit objects
    Elf64,
}

/// One program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramHeader {
    /// Segment type (`p_type`)
    pub kind: u32,
    /// File offset of the segment
    pub offset: u64,
    /// Size of the segment in the file
    pub file_size: u64,
}

/// One section header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionHeader {
    /// Section name, resolved through the section name table
    pub name: String,
    /// Section type (`sh_type`)
    pub kind: u32,
    /// File offset of the section
    pub offset: u64,
    /// Size of the section in the file
    pub size: u64,
}

/// A parsed ELF image borrowing its bytes
#[derive(Debug, Clone)]
pub struct ElfFile<'a> {
    data: &'a [u8],
    /// 32- or 64-bit
    pub class: ElfClass,
    /// Byte order
    pub endian: Endian,
    /// Object file type (`e_type`)
    pub file_type: u16,
    /// Machine (`e_machine`)
    pub machine: u16,
    /// Program headers, in table order
    pub program_headers: Vec<ProgramHeader>,
    /// Section headers, in table order
    pub sections: Vec<SectionHeader>,
}

/// Returns true if `data` starts with the ELF magic.
pub fn is_elf(data: &[u8]) -> bool {
    matches!(binary::le_u32(data, 0), Ok(ELF_MAGIC))
}

impl<'a> ElfFile<'a> {
    /// Parses the headers of an ELF image.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        if !is_elf(data) {
            return Err(Error::invalid_elf("missing \\x7fELF magic"));
        }

        let class = match binary::read_u8(data, 4)? {
            1 => ElfClass::Elf32,
            2 => ElfClass::Elf64,
            other => return Err(Error::invalid_elf(format!("unknown class {}", other))),
        };
        let endian = match binary::read_u8(data, 5)? {
            1 => Endian::Little,
            2 => Endian::Big,
            other => return Err(Error::invalid_elf(format!("unknown byte order {}", other))),
        };

        let file_type = binary::read_u16(data, 16, endian)?;
        let machine = binary::read_u16(data, 18, endian)?;

        let (ph_off, sh_off, tail) = match class {
            ElfClass::Elf32 => (
                u64::from(binary::read_u32(data, 28, endian)?),
                u64::from(binary::read_u32(data, 32, endian)?),
                42,
            ),
            ElfClass::Elf64 => (
                binary::read_u64(data, 32, endian)?,
                binary::read_u64(data, 40, endian)?,
                54,
            ),
        };
        let ph_entsize = binary::read_u16(data, tail, endian)? as usize;
        let ph_num = binary::read_u16(data, tail + 2, endian)? as usize;
        let sh_entsize = binary::read_u16(data, tail + 4, endian)? as usize;
        let sh_num = binary::read_u16(data, tail + 6, endian)? as usize;
        let sh_strndx = binary::read_u16(data, tail + 8, endian)? as usize;

        let mut elf = Self {
            data,
            class,
            endian,
            file_type,
            machine,
            program_headers: Vec::with_capacity(ph_num),
            sections: Vec::new(),
        };

        let (ph_min, sh_min) = match class {
            ElfClass::Elf32 => (32, 40),
            ElfClass::Elf64 => (56, 64),
        };

        let ph_off = binary::to_usize(ph_off, 28)?;
        if ph_num > 0 {
            if ph_entsize < ph_min {
                return Err(Error::invalid_elf(format!("program header size {} is too small", ph_entsize)));
            }
            binary::slice(data, ph_off, ph_num * ph_entsize)?;
        }
        for i in 0..ph_num {
            let header = elf.read_program_header(ph_off + i * ph_entsize)?;
            elf.program_headers.push(header);
        }

        let sh_off = binary::to_usize(sh_off, 32)?;
        if sh_off != 0 && sh_num > 0 {
            if sh_entsize < sh_min {
                return Err(Error::invalid_elf(format!("section header size {} is too small", sh_entsize)));
            }
            binary::slice(data, sh_off, sh_num * sh_entsize)?;
            elf.sections = elf.read_sections(sh_off, sh_entsize, sh_num, sh_strndx)?;
        }

        Ok(elf)
    }

    fn read_program_header(&self, at: usize) -> Result<ProgramHeader> {
        let e = self.endian;
        let d = self.data;
        Ok(match self.class {
            ElfClass::Elf32 => ProgramHeader {
                kind: binary::read_u32(d, at, e)?,
                offset: u64::from(binary::read_u32(d, at + 4, e)?),
                file_size: u64::from(binary::read_u32(d, at + 16, e)?),
            },
            ElfClass::Elf64 => ProgramHeader {
                kind: binary::read_u32(d, at, e)?,
                offset: binary::read_u64(d, at + 8, e)?,
                file_size: binary::read_u64(d, at + 32, e)?,
            },
        })
    }

    /// Reads `(name index, type, offset, size)` of one section header.
    fn read_raw_section(&self, at: usize) -> Result<(u32, u32, u64, u64)> {
        let e = self.endian;
        let d = self.data;
        Ok(match self.class {
            ElfClass::Elf32 => (
                binary::read_u32(d, at, e)?,
                binary::read_u32(d, at + 4, e)?,
                u64::from(binary::read_u32(d, at + 16, e)?),
                u64::from(binary::read_u32(d, at + 20, e)?),
            ),
            ElfClass::Elf64 => (
                binary::read_u32(d, at, e)?,
                binary::read_u32(d, at + 4, e)?,
                binary::read_u64(d, at + 24, e)?,
                binary::read_u64(d, at + 32, e)?,
            ),
        })
    }

    fn read_sections(
        &self,
        sh_off: usize,
        entsize: usize,
        count: usize,
        strndx: usize,
    ) -> Result<Vec<SectionHeader>> {
        let raw = (0..count)
            .map(|i| self.read_raw_section(sh_off + i * entsize))
            .collect::<Result<Vec<_>>>()?;

        let names = match raw.get(strndx) {
            Some(&(_, _, offset, size)) if strndx != 0 => {
                let offset = binary::to_usize(offset, sh_off)?;
                let size = binary::to_usize(size, sh_off)?;
                Some(binary::slice(self.data, offset, size)?)
            }
            _ => None,
        };

        Ok(raw
            .into_iter()
            .map(|(name_index, kind, offset, size)| SectionHeader {
                name: names
                    .map(|table| section_name(table, name_index as usize))
                    .unwrap_or_default(),
                kind,
                offset,
                size,
            })
            .collect())
    }

    /// The image bytes
    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Whether this is a shared object (`ET_DYN`)
    pub fn is_shared_object(&self) -> bool {
        self.file_type == ET_DYN
    }

    /// Architecture, when it is one Android ships
    pub fn target_arch(&self) -> Option<TargetArch> {
        TargetArch::from_elf_machine(self.machine)
    }

    /// Looks up a section by name.
    pub fn section(&self, name: &str) -> Option<&SectionHeader> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Walks every `PT_NOTE` segment.
    pub fn notes(&self) -> Result<Vec<NoteSegment>> {
        self.program_headers
            .iter()
            .filter(|ph| ph.kind == PT_NOTE)
            .map(|ph| read_notes(self.data, self.endian, ph.offset, ph.file_size))
            .collect()
    }

    /// Returns the description of the first GNU build-id note.
    pub fn build_id(&self) -> Result<Option<Vec<u8>>> {
        for segment in self.notes()? {
            if let Some(note) = segment.notes().iter().find(|n| n.is_gnu_build_id()) {
                return Ok(Some(note.description.clone()));
            }
        }
        Ok(None)
    }
}

fn section_name(table: &[u8], index: usize) -> String {
    let Some(tail) = table.get(index..) else {
        return String::new();
    };
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    String::from_utf8_lossy(&tail[..end]).into_owned()
}

/// Reason a `payload` section could not be located
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadError {
    /// The bytes are not an ELF image
    NotElf,
    /// The ELF headers could not be parsed
    LoadFailed,
    /// The image is not a shared library
    NotSharedLibrary,
    /// The image is big-endian
    NotLittleEndian,
    /// No section named `payload`
    NoPayloadSection,
}

impl fmt::Display for PayloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotElf => "is not a valid ELF binary",
            Self::LoadFailed => "could not be loaded",
            Self::NotSharedLibrary => "is not a shared ELF library",
            Self::NotLittleEndian => "is not a little-endian ELF image",
            Self::NoPayloadSection => "does not contain the 'payload' section",
        })
    }
}

impl std::error::Error for PayloadError {}

/// Locates the `payload` section of a little-endian shared object.
///
/// The returned range is validated against `data`.
pub fn find_payload_section(data: &[u8]) -> std::result::Result<Range<usize>, PayloadError> {
    if !is_elf(data) {
        return Err(PayloadError::NotElf);
    }

    let elf = ElfFile::parse(data).map_err(|e| {
        debug!("ELF parse failed: {}", e);
        PayloadError::LoadFailed
    })?;

    if !elf.is_shared_object() {
        return Err(PayloadError::NotSharedLibrary);
    }
    if elf.endian != Endian::Little {
        return Err(PayloadError::NotLittleEndian);
    }

    let section = elf
        .section(PAYLOAD_SECTION)
        .ok_or(PayloadError::NoPayloadSection)?;

    let start = usize::try_from(section.offset).map_err(|_| PayloadError::LoadFailed)?;
    let len = usize::try_from(section.size).map_err(|_| PayloadError::LoadFailed)?;
    let end = start.checked_add(len).ok_or(PayloadError::LoadFailed)?;
    if end > data.len() {
        return Err(PayloadError::LoadFailed);
    }

    Ok(start..end)
}

/// Converts a GNU build id into a debug identifier.
///
/// The first 16 bytes (zero padded) are read as a little-endian GUID, so the
/// first three fields are byte-swapped before formatting. Symbol servers key
/// Android native libraries by this value.
pub fn debug_id_from_build_id(build_id: &[u8]) -> String {
    let mut guid = [0u8; 16];
    let n = build_id.len().min(16);
    guid[..n].copy_from_slice(&build_id[..n]);

    guid[0..4].reverse();
    guid[4..6].reverse();
    guid[6..8].reverse();

    let hex: String = guid.iter().map(|b| format!("{:02x}", b)).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
