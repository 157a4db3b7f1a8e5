//! ELF note segment walking.
//!
//! A `PT_NOTE` segment is a sequence of self-describing records:
//!
//! ```text
//! [ u32 namesz ][ u32 descsz ][ u32 type ][ name, padded to 4 ][ desc, padded to 4 ]
//! ```
//!
//! Both 32- and 64-bit images use 4-byte words here, matching the GNU tools.

use crate::binary::{self, Endian};
use crate::error::{Error, Result};
use tracing::trace;

/// Size of the fixed note header (name size, description size, type)
pub const NOTE_HEADER_SIZE: u64 = 12;

const NOTE_ALIGN: u64 = 4;

/// Note type of a GNU build identifier (`NT_GNU_BUILD_ID`)
pub const NT_GNU_BUILD_ID: u32 = 3;

/// Owner name used by GNU notes
pub const GNU_NOTE_OWNER: &str = "GNU";

/// A single note record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteRecord {
    /// Owner name, without the terminating NUL
    pub name: String,
    /// Opaque description bytes
    pub description: Vec<u8>,
    /// Owner-specific type tag
    pub note_type: u32,
    /// File offset of the record header
    pub offset: u64,
    /// On-disk size of the record, padding included
    pub size: u64,
}

impl NoteRecord {
    /// Returns true for a GNU build-id note
    pub fn is_gnu_build_id(&self) -> bool {
        self.note_type == NT_GNU_BUILD_ID && self.name == GNU_NOTE_OWNER
    }
}

/// All note records of one segment, in on-disk order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteSegment {
    /// File offset of the segment
    pub offset: u64,
    /// Declared file size of the segment
    pub file_size: u64,
    notes: Vec<NoteRecord>,
}

impl NoteSegment {
    /// The first record of the segment
    pub fn first(&self) -> &NoteRecord {
        // A segment is only constructed after at least one record parsed.
        &self.notes[0]
    }

    /// Every record, in on-disk order
    pub fn notes(&self) -> &[NoteRecord] {
        &self.notes
    }

    /// Consumes the segment, returning its records
    pub fn into_notes(self) -> Vec<NoteRecord> {
        self.notes
    }
}

fn align(value: u64) -> u64 {
    value.div_ceil(NOTE_ALIGN) * NOTE_ALIGN
}

/// Parses the note record at `offset`, which must fit in `remaining` bytes.
fn read_note(data: &[u8], endian: Endian, offset: u64, remaining: u64) -> Result<NoteRecord> {
    let out_of_bounds = |needed: u64| Error::NoteOutOfBounds {
        offset,
        needed,
        remaining,
    };

    if remaining < NOTE_HEADER_SIZE {
        return Err(out_of_bounds(NOTE_HEADER_SIZE));
    }

    let start = binary::to_usize(offset, 0)?;
    let name_size = u64::from(binary::read_u32(data, start, endian)?);
    let desc_size = u64::from(binary::read_u32(data, start + 4, endian)?);
    let note_type = binary::read_u32(data, start + 8, endian)?;

    let size = NOTE_HEADER_SIZE + align(name_size) + align(desc_size);
    if size > remaining {
        return Err(out_of_bounds(size));
    }

    let name_start = start + NOTE_HEADER_SIZE as usize;
    let name_bytes = binary::slice(data, name_start, binary::to_usize(name_size, name_start)?)?;
    let name_end = name_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(name_bytes.len());
    let name = String::from_utf8_lossy(&name_bytes[..name_end]).into_owned();

    let desc_start = name_start + binary::to_usize(align(name_size), name_start)?;
    let description =
        binary::slice(data, desc_start, binary::to_usize(desc_size, desc_start)?)?.to_vec();

    Ok(NoteRecord {
        name,
        description,
        note_type,
        offset,
        size,
    })
}

/// Walks the note records of a segment.
///
/// Fails with [`Error::NoteOutOfBounds`] as soon as a record claims more bytes
/// than the segment has left; truncated segments are never partially returned.
pub fn read_notes(
    data: &[u8],
    endian: Endian,
    segment_offset: u64,
    segment_file_size: u64,
) -> Result<NoteSegment> {
    let segment_end = segment_offset.checked_add(segment_file_size);
    if segment_end.map_or(true, |end| end > data.len() as u64) {
        return Err(Error::NoteOutOfBounds {
            offset: segment_offset,
            needed: segment_file_size,
            remaining: (data.len() as u64).saturating_sub(segment_offset),
        });
    }

    let mut notes = Vec::new();
    let mut cursor = segment_offset;
    let mut remaining = segment_file_size;

    loop {
        let note = read_note(data, endian, cursor, remaining)?;
        trace!(
            "Note '{}' type {} at {:#x} ({} bytes)",
            note.name,
            note.note_type,
            note.offset,
            note.size
        );

        cursor += note.size;
        remaining -= note.size;
        notes.push(note);

        if remaining < NOTE_HEADER_SIZE {
            break;
        }
    }

    if remaining != 0 {
        trace!("Ignoring {} trailing bytes in note segment at {:#x}", remaining, segment_offset);
    }

    Ok(NoteSegment {
        offset: segment_offset,
        file_size: segment_file_size,
        notes,
    })
}
