//! PE/COFF reading for decoded .NET assemblies.
//!
//! [`PeReader`] is what a successful lookup hands back: the decoded image
//! bytes plus the parsed headers a symbolicator needs.
//!
//! ## Layout Overview
//!
//! 1. DOS header (`MZ`), whose `e_lfanew` points at the PE signature
//! 2. `PE\0\0` signature followed by the 20-byte COFF file header
//! 3. Optional header (PE32 or PE32+), ending in the data directories
//! 4. Section table, used to map RVAs to file offsets
//!
//! The CLI header (data directory 14) points at the metadata root (`BSJB`),
//! and the debug directory (data directory 6) lists CodeView and related records.

use crate::binary;
use crate::error::{Error, Result};
use bytes::Bytes;

const DOS_MAGIC: u16 = 0x5A4D;
const PE_SIGNATURE: u32 = 0x0000_4550;
const PE32_MAGIC: u16 = 0x10B;
const PE32_PLUS_MAGIC: u16 = 0x20B;
const METADATA_SIGNATURE: u32 = 0x424A_5342;
const CODEVIEW_SIGNATURE: u32 = 0x5344_5352;

const IMAGE_FILE_DLL: u16 = 0x2000;
const DEBUG_DIRECTORY_INDEX: usize = 6;
const CLI_HEADER_INDEX: usize = 14;
const DEBUG_ENTRY_SIZE: usize = 28;
const SECTION_HEADER_SIZE: usize = 40;

/// An `(rva, size)` pair from the optional header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    /// Relative virtual address
    pub rva: u32,
    /// Size in bytes
    pub size: u32,
}

/// A section table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeSection {
    /// Section name, NUL padding removed
    pub name: String,
    /// Size once loaded
    pub virtual_size: u32,
    /// RVA of the first byte
    pub virtual_address: u32,
    /// Size in the file
    pub raw_size: u32,
    /// File offset of the first byte
    pub raw_offset: u32,
}

/// Parsed PE headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeHeaders {
    /// COFF machine
    pub machine: u16,
    /// COFF characteristics
    pub characteristics: u16,
    /// COFF time stamp
    pub timestamp: u32,
    /// True for PE32+ optional headers
    pub is_pe32_plus: bool,
    /// `SizeOfImage` from the optional header
    pub size_of_image: u32,
    /// Data directories
    pub data_directories: Vec<DataDirectory>,
    /// Section table
    pub sections: Vec<PeSection>,
    /// Size of the CLI metadata, zero for native images
    pub metadata_size: u32,
    /// File offset of the CLI metadata root, when present
    pub metadata_offset: Option<usize>,
}

impl PeHeaders {
    /// Whether the image is a DLL
    pub fn is_dll(&self) -> bool {
        self.characteristics & IMAGE_FILE_DLL != 0
    }

    /// Data directory by index, if the optional header declares it
    pub fn data_directory(&self, index: usize) -> Option<DataDirectory> {
        self.data_directories.get(index).copied()
    }

    /// Maps an RVA to a file offset through the section table.
    pub fn rva_to_offset(&self, rva: u32) -> Option<usize> {
        self.sections.iter().find_map(|s| {
            let extent = s.virtual_size.max(s.raw_size);
            let delta = rva.checked_sub(s.virtual_address)?;
            (delta < extent && delta < s.raw_size).then(|| s.raw_offset as usize + delta as usize)
        })
    }
}

/// Kind of a debug directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebugDirectoryKind {
    /// CodeView (PDB reference)
    CodeView,
    /// Reproducible build marker
    Reproducible,
    /// Portable PDB embedded in the image
    EmbeddedPortablePdb,
    /// PDB content checksum
    PdbChecksum,
    /// Any other type
    Other(u32),
}

impl From<u32> for DebugDirectoryKind {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::CodeView,
            16 => Self::Reproducible,
            17 => Self::EmbeddedPortablePdb,
            19 => Self::PdbChecksum,
            other => Self::Other(other),
        }
    }
}

/// One debug directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DebugDirectoryEntry {
    /// Entry type
    pub kind: DebugDirectoryKind,
    /// Time stamp, or the stamp half of a portable PDB id
    pub timestamp: u32,
    /// Major version
    pub major_version: u16,
    /// Minor version
    pub minor_version: u16,
    /// Size of the referenced data
    pub data_size: u32,
    /// File offset of the referenced data
    pub data_pointer: u32,
}

/// A CodeView `RSDS` record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeViewRecord {
    /// PDB GUID, in on-disk byte order
    pub guid: [u8; 16],
    /// PDB age
    pub age: u32,
    /// PDB path as recorded by the compiler
    pub path: String,
}

impl CodeViewRecord {
    /// Formats the GUID the way symbol servers expect it.
    pub fn debug_id(&self) -> String {
        let g = &self.guid;
        let d1 = u32::from_le_bytes([g[0], g[1], g[2], g[3]]);
        let d2 = u16::from_le_bytes([g[4], g[5]]);
        let d3 = u16::from_le_bytes([g[6], g[7]]);
        let tail: String = g[8..].iter().map(|b| format!("{:02x}", b)).collect();
        format!("{:08x}-{:04x}-{:04x}-{}-{}", d1, d2, d3, &tail[..4], &tail[4..])
    }
}

/// A decoded assembly image with parsed headers
#[derive(Debug, Clone)]
pub struct PeReader {
    name: String,
    data: Bytes,
    headers: PeHeaders,
}

impl PeReader {
    /// Parses the headers of `data`, an image resolved for assembly `name`.
    pub fn parse(name: impl Into<String>, data: Bytes) -> Result<Self> {
        let name = name.into();
        let headers = parse_headers(&data).map_err(|e| match e {
            Error::MalformedHeader { offset, details } => {
                Error::invalid_image(&name, format!("{} (at offset {})", details, offset))
            }
            other => other,
        })?;

        Ok(Self {
            name,
            data,
            headers,
        })
    }

    /// Assembly name this image was resolved for
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The decoded image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the reader, returning the image bytes
    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    /// Parsed headers
    pub fn headers(&self) -> &PeHeaders {
        &self.headers
    }

    /// Whether the image carries CLI metadata with a valid root signature
    pub fn has_metadata(&self) -> bool {
        self.headers.metadata_size > 0 && self.headers.metadata_offset.is_some()
    }

    /// Reads every debug directory entry.
    pub fn read_debug_directory(&self) -> Result<Vec<DebugDirectoryEntry>> {
        let Some(dir) = self.headers.data_directory(DEBUG_DIRECTORY_INDEX) else {
            return Ok(Vec::new());
        };
        if dir.rva == 0 || dir.size == 0 {
            return Ok(Vec::new());
        }

        let offset = self
            .headers
            .rva_to_offset(dir.rva)
            .ok_or_else(|| self.image_error(format!("debug directory RVA {:#x} is unmapped", dir.rva)))?;

        let count = dir.size as usize / DEBUG_ENTRY_SIZE;
        (0..count)
            .map(|i| {
                let at = offset + i * DEBUG_ENTRY_SIZE;
                let d = &self.data[..];
                Ok(DebugDirectoryEntry {
                    timestamp: binary::le_u32(d, at + 4)?,
                    major_version: binary::le_u16(d, at + 8)?,
                    minor_version: binary::le_u16(d, at + 10)?,
                    kind: binary::le_u32(d, at + 12)?.into(),
                    data_size: binary::le_u32(d, at + 16)?,
                    data_pointer: binary::le_u32(d, at + 24)?,
                })
            })
            .collect::<Result<Vec<_>>>()
            .map_err(|e| self.image_error(e.to_string()))
    }

    /// Reads the CodeView record a debug directory entry points to.
    pub fn read_codeview(&self, entry: &DebugDirectoryEntry) -> Result<CodeViewRecord> {
        if entry.kind != DebugDirectoryKind::CodeView {
            return Err(self.image_error("debug directory entry is not CodeView"));
        }

        let record = binary::slice(&self.data, entry.data_pointer as usize, entry.data_size as usize)
            .map_err(|e| self.image_error(e.to_string()))?;
        if record.len() < 24 || binary::le_u32(record, 0)? != CODEVIEW_SIGNATURE {
            return Err(self.image_error("CodeView record lacks the RSDS signature"));
        }

        let mut guid = [0u8; 16];
        guid.copy_from_slice(&record[4..20]);
        let age = binary::le_u32(record, 20)?;
        let path = &record[24..];
        let end = path.iter().position(|&b| b == 0).unwrap_or(path.len());

        Ok(CodeViewRecord {
            guid,
            age,
            path: String::from_utf8_lossy(&path[..end]).into_owned(),
        })
    }

    /// Returns the first CodeView record, if the image has one.
    pub fn codeview(&self) -> Result<Option<CodeViewRecord>> {
        self.read_debug_directory()?
            .iter()
            .find(|e| e.kind == DebugDirectoryKind::CodeView)
            .map(|e| self.read_codeview(e))
            .transpose()
    }

    fn image_error(&self, details: impl Into<String>) -> Error {
        Error::invalid_image(&self.name, details)
    }
}

fn parse_headers(data: &[u8]) -> Result<PeHeaders> {
    if binary::le_u16(data, 0)? != DOS_MAGIC {
        return Err(Error::malformed_header(0, "missing MZ signature"));
    }

    let pe_offset = binary::le_u32(data, 0x3C)? as usize;
    if binary::le_u32(data, pe_offset)? != PE_SIGNATURE {
        return Err(Error::malformed_header(pe_offset, "missing PE signature"));
    }

    let coff = pe_offset + 4;
    let machine = binary::le_u16(data, coff)?;
    let section_count = binary::le_u16(data, coff + 2)? as usize;
    let timestamp = binary::le_u32(data, coff + 4)?;
    let optional_size = binary::le_u16(data, coff + 16)? as usize;
    let characteristics = binary::le_u16(data, coff + 18)?;

    let optional = coff + 20;
    let is_pe32_plus = match binary::le_u16(data, optional)? {
        PE32_MAGIC => false,
        PE32_PLUS_MAGIC => true,
        other => {
            return Err(Error::malformed_header(
                optional,
                format!("unknown optional header magic {:#x}", other),
            ))
        }
    };

    let size_of_image = binary::le_u32(data, optional + 56)?;
    let (count_at, dirs_at) = if is_pe32_plus {
        (optional + 108, optional + 112)
    } else {
        (optional + 92, optional + 96)
    };

    let dir_count = binary::le_u32(data, count_at)? as usize;
    let dirs_end = optional + optional_size;
    let data_directories = (0..dir_count.min(16))
        .map(|i| dirs_at + i * 8)
        .take_while(|&at| at + 8 <= dirs_end)
        .map(|at| {
            Ok(DataDirectory {
                rva: binary::le_u32(data, at)?,
                size: binary::le_u32(data, at + 4)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let sections_at = dirs_end;
    let sections = (0..section_count)
        .map(|i| {
            let at = sections_at + i * SECTION_HEADER_SIZE;
            let raw_name = binary::slice(data, at, 8)?;
            let end = raw_name.iter().position(|&b| b == 0).unwrap_or(8);
            Ok(PeSection {
                name: String::from_utf8_lossy(&raw_name[..end]).into_owned(),
                virtual_size: binary::le_u32(data, at + 8)?,
                virtual_address: binary::le_u32(data, at + 12)?,
                raw_size: binary::le_u32(data, at + 16)?,
                raw_offset: binary::le_u32(data, at + 20)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut headers = PeHeaders {
        machine,
        characteristics,
        timestamp,
        is_pe32_plus,
        size_of_image,
        data_directories,
        sections,
        metadata_size: 0,
        metadata_offset: None,
    };

    if let Some(cli) = headers.data_directory(CLI_HEADER_INDEX).filter(|d| d.rva != 0) {
        let cli_at = headers
            .rva_to_offset(cli.rva)
            .ok_or_else(|| Error::malformed_header(dirs_at, "CLI header RVA is unmapped"))?;
        let metadata_rva = binary::le_u32(data, cli_at + 8)?;
        let metadata_size = binary::le_u32(data, cli_at + 12)?;

        if let Some(root) = headers.rva_to_offset(metadata_rva) {
            if binary::le_u32(data, root)? == METADATA_SIGNATURE {
                headers.metadata_offset = Some(root);
            }
        }
        headers.metadata_size = metadata_size;
    }

    Ok(headers)
}
