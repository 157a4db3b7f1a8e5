//! Error types for the apkasm-core library.
//!
//! This module provides comprehensive error handling using the `thiserror` crate.
//! A missing assembly is never an error: lookups return `Ok(None)` for that case.
//! Everything in here describes either an I/O failure or a corrupt container.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for apkasm operations
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all apkasm operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The zip container could not be opened or an entry could not be located
    #[error("failed to access archive '{path}': {source}")]
    Archive {
        /// Archive path, or `archive!entry` for entry-level failures
        path: String,
        /// Underlying zip error
        #[source]
        source: zip::result::ZipError,
    },

    /// An archive entry was found but its bytes could not be read
    #[error("failed to read archive entry '{entry}': {source}")]
    EntryRead {
        /// Name of the entry inside the archive
        entry: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A fixed-layout header or table ran past the available bytes
    #[error("malformed header at offset {offset}: {details}")]
    MalformedHeader {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Decompression produced a different number of bytes than advertised
    #[error("decompressed {actual} bytes, but the envelope advertised {expected}")]
    DecodeMismatch {
        /// Length stored in the compression envelope
        expected: usize,
        /// Number of bytes the decoder actually produced
        actual: usize,
    },

    /// The LZ4 block decoder rejected the payload
    #[error("failed to decode LZ4 payload: {0}")]
    Lz4Decode(#[from] lz4_flex::block::DecompressError),

    /// A note record extends past the end of its segment
    #[error(
        "note record at offset {offset} needs {needed} bytes, but only {remaining} remain in the segment"
    )]
    NoteOutOfBounds {
        /// File offset of the offending note record
        offset: u64,
        /// Encoded size of the record, including padding
        needed: u64,
        /// Bytes left in the segment at that point
        remaining: u64,
    },

    /// The input is not a supported ELF image
    #[error("invalid ELF image: {0}")]
    InvalidElf(String),

    /// The assembly store tables are internally inconsistent
    #[error("invalid assembly store '{store}': {details}")]
    InvalidStore {
        /// Archive entry holding the store
        store: String,
        /// Detailed description of the issue
        details: String,
    },

    /// The decoded bytes are not a readable PE image
    #[error("invalid PE image '{name}': {details}")]
    InvalidImage {
        /// Assembly name the image was resolved for
        name: String,
        /// Detailed description of the issue
        details: String,
    },

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new archive error
    pub fn archive(path: impl Into<String>, source: zip::result::ZipError) -> Self {
        Self::Archive {
            path: path.into(),
            source,
        }
    }

    /// Creates a new entry read error
    pub fn entry_read(entry: impl Into<String>, source: std::io::Error) -> Self {
        Self::EntryRead {
            entry: entry.into(),
            source,
        }
    }

    /// Creates a new malformed header error
    pub fn malformed_header(offset: usize, details: impl Into<String>) -> Self {
        Self::MalformedHeader {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new ELF error
    pub fn invalid_elf(details: impl Into<String>) -> Self {
        Self::InvalidElf(details.into())
    }

    /// Creates a new store error
    pub fn invalid_store(store: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidStore {
            store: store.into(),
            details: details.into(),
        }
    }

    /// Creates a new PE image error
    pub fn invalid_image(name: impl Into<String>, details: impl Into<String>) -> Self {
        Self::InvalidImage {
            name: name.into(),
            details: details.into(),
        }
    }

    /// Creates a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true if this error means the container bytes cannot be trusted.
    ///
    /// Retrying never helps for these: archive contents are static once opened.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::MalformedHeader { .. }
                | Self::DecodeMismatch { .. }
                | Self::Lz4Decode(_)
                | Self::NoteOutOfBounds { .. }
                | Self::InvalidElf(_)
                | Self::InvalidStore { .. }
                | Self::InvalidImage { .. }
        )
    }
}
