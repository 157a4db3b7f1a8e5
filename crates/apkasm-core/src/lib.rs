//! # apkasm-core
//!
//! A library for reading .NET assemblies and native debug metadata out of
//! Android application packages (APK/AAB).
//!
//! This crate provides the core functionality for:
//! - Locating assemblies in either packaging layout (per-entry directory or
//!   consolidated assembly store)
//! - Reversing the `XALZ` LZ4 compression envelope
//! - Walking ELF note segments to recover GNU build ids
//! - Parsing PE headers, CLI metadata and debug directories of the decoded images
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`reader`]: Layout probing and assembly lookup
//! - [`compression`]: The `XALZ` envelope
//! - [`elf`]: ELF headers, note segments and `payload` sections
//! - [`pe`]: PE/COFF headers of decoded assemblies
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use apkasm_core::{AssemblyReader, ReaderConfig};
//!
//! let reader = AssemblyReader::open("./app-release.apk", ReaderConfig::new())?;
//! println!("layout: {}", reader.kind());
//!
//! if let Some(image) = reader.try_read("Mono.Android.dll")? {
//!     if let Some(codeview) = image.codeview()? {
//!         println!("{} -> {} ({})", image.name(), codeview.path, codeview.debug_id());
//!     }
//! }
//! # Ok::<(), apkasm_core::Error>(())
//! ```
//!
//! ## Logging
//!
//! Every diagnostic is emitted as a `tracing` event. Callers that keep their
//! own debug log can also pass a [`DiagnosticLogger`] through
//! [`ReaderConfig::logger`].
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod arch;
pub mod binary;
pub mod compression;
pub mod diagnostics;
pub mod elf;
pub mod error;
pub mod pe;
pub mod reader;

// Re-export primary types for convenience
pub use arch::TargetArch;
pub use diagnostics::{DiagnosticLogger, LogLevel};
pub use elf::{read_notes, ElfFile, NoteRecord, NoteSegment};
pub use error::{Error, Result};
pub use pe::{CodeViewRecord, DebugDirectoryEntry, DebugDirectoryKind, PeHeaders, PeReader};
pub use reader::{AssemblyReader, ReaderConfig, Strategy, StrategyKind};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
