//! Archive readers resolving assembly names to decoded images.
//!
//! Android packages ship managed assemblies in one of two layouts:
//!
//! - **Directory**: one zip entry per assembly, under `assemblies/` or (newer
//!   toolchains) as `lib/{abi}/lib_{name}.so` shared objects
//! - **Store**: one consolidated `libassemblies.{abi}.blob.so` per ABI holding
//!   an index, entry descriptors, names and the assembly bytes. Older
//!   toolchains write `assemblies/assemblies[.{abi}].blob` plus a text
//!   manifest instead; both generations are read by [`StoreReader`].
//!
//! [`AssemblyReader::open`] probes the archive once and picks a [`Strategy`].
//! When the archive has no store, per-ABI split archives next to it
//! (`split_config.{abi}.apk`) are searched before settling on the directory
//! layout.
//! Both strategies route the bytes through
//! [`decompress_bytes`](crate::compression::decompress_bytes) and hand back a
//! [`PeReader`].
//!
//! ## Example
//!
//! ```no_run
//! use apkasm_core::{AssemblyReader, ReaderConfig};
//!
//! let config = ReaderConfig::new().supported_abis(["arm64-v8a"]);
//! let reader = AssemblyReader::open("app.apk", config)?;
//! if let Some(image) = reader.try_read("Mono.Android.dll")? {
//!     println!("{} is a DLL: {}", image.name(), image.headers().is_dll());
//! }
//! # Ok::<(), apkasm_core::Error>(())
//! ```

mod directory;
mod legacy;
mod store;

use crate::arch::TargetArch;
use crate::diagnostics::{DiagnosticLogger, Diagnostics};
use crate::elf;
use crate::error::{Error, Result};
use crate::pe::PeReader;
use bytes::Bytes;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

pub use directory::DirectoryReader;
pub use legacy::{legacy_blob_path, LEGACY_MANIFEST};
pub use store::{
    candidate_names, name_hash, split_archive_paths, store_paths, HashAlgorithm, IndexEntry,
    StoreEntry, StoreReader, STORE_MAGIC,
};

/// Configuration for [`AssemblyReader`]
#[derive(Clone)]
pub struct ReaderConfig {
    /// ABI names to consider, in order of preference
    pub supported_abis: Vec<String>,
    /// Whether an assembly name that is an existing local path is read from disk
    pub check_loose_files: bool,
    logger: Option<Arc<dyn DiagnosticLogger>>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            supported_abis: TargetArch::ALL.iter().map(|a| a.abi().to_string()).collect(),
            check_loose_files: true,
            logger: None,
        }
    }
}

impl fmt::Debug for ReaderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReaderConfig")
            .field("supported_abis", &self.supported_abis)
            .field("check_loose_files", &self.check_loose_files)
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

impl ReaderConfig {
    /// Creates a new reader config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ABIs to consider, most preferred first
    pub fn supported_abis<I, S>(mut self, abis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supported_abis = abis.into_iter().map(Into::into).collect();
        self
    }

    /// Routes diagnostic messages to `logger` in addition to `tracing`
    pub fn logger(mut self, logger: impl DiagnosticLogger + 'static) -> Self {
        self.logger = Some(Arc::new(logger));
        self
    }

    /// Enables or disables reading assemblies from the local file system
    pub fn check_loose_files(mut self, enabled: bool) -> Self {
        self.check_loose_files = enabled;
        self
    }

    /// Configured ABIs with empty names and repeats removed, order kept.
    fn effective_abis(&self) -> Vec<String> {
        let mut abis: Vec<String> = Vec::with_capacity(self.supported_abis.len());
        for abi in &self.supported_abis {
            if !abi.is_empty() && !abis.contains(abi) {
                abis.push(abi.clone());
            }
        }
        abis
    }

    fn diagnostics(&self) -> Diagnostics {
        Diagnostics::new(self.logger.clone())
    }
}

/// The layout an [`AssemblyReader`] settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    /// One zip entry per assembly
    Directory,
    /// Consolidated assembly store
    Store,
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Directory => "directory",
            Self::Store => "store",
        })
    }
}

/// The lookup strategy chosen for an archive
#[derive(Debug)]
pub enum Strategy {
    /// Per-entry lookups against the open archive
    Directory(DirectoryReader),
    /// Lookups against buffered assembly stores
    Store(StoreReader),
}

/// Reads .NET assemblies out of an Android package
///
/// Safe to share between threads; every method takes `&self`.
#[derive(Debug)]
pub struct AssemblyReader {
    path: PathBuf,
    strategy: Strategy,
}

impl AssemblyReader {
    /// Opens `path` and selects the layout it uses.
    ///
    /// The store layout wins whenever a supported store exists for one of the
    /// configured ABIs, either in the archive itself or in a split archive
    /// beside it. The choice is never revisited.
    pub fn open(path: impl AsRef<Path>, config: ReaderConfig) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::file_read(path, e))?;
        let mut archive =
            ZipArchive::new(file).map_err(|e| Error::archive(path.display().to_string(), e))?;

        let diagnostics = config.diagnostics();
        let abis = config.effective_abis();
        debug!("Opened {} ({} entries)", path.display(), archive.len());

        let mut store = StoreReader::load(&mut archive, &abis, diagnostics.clone())?;
        if !store.is_supported() {
            store = StoreReader::load_split_archives(path, &abis, diagnostics.clone())?;
        }

        let strategy = if store.is_supported() {
            diagnostics.info(format_args!(
                "Using the assembly store reader for {} ({})",
                path.display(),
                store.stores().collect::<Vec<_>>().join(", ")
            ));
            Strategy::Store(store)
        } else {
            diagnostics.info(format_args!(
                "Using the directory reader for {}",
                path.display()
            ));
            Strategy::Directory(DirectoryReader::new(
                archive,
                abis,
                config.check_loose_files,
                diagnostics,
            ))
        };

        Ok(Self {
            path: path.to_path_buf(),
            strategy,
        })
    }

    /// Resolves `name` to a decoded image.
    ///
    /// `Ok(None)` means the archive does not contain the assembly; errors are
    /// reserved for I/O failures and corrupt data.
    pub fn try_read(&self, name: &str) -> Result<Option<PeReader>> {
        match &self.strategy {
            Strategy::Directory(reader) => reader.try_read(name),
            Strategy::Store(reader) => reader.try_read(name),
        }
    }

    /// The selected layout
    pub fn kind(&self) -> StrategyKind {
        match self.strategy {
            Strategy::Directory(_) => StrategyKind::Directory,
            Strategy::Store(_) => StrategyKind::Store,
        }
    }

    /// The selected strategy
    pub fn strategy(&self) -> &Strategy {
        &self.strategy
    }

    /// Path the reader was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a whole archive entry, or `Ok(None)` if there is no such entry.
fn read_entry<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Option<Bytes>> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(Error::archive(name, e)),
    };

    let mut data = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
    entry
        .read_to_end(&mut data)
        .map_err(|e| Error::entry_read(name, e))?;

    Ok(Some(Bytes::from(data)))
}

/// Returns the `payload` section of an ELF-wrapped entry, or `data` unchanged.
fn unwrap_payload(entry: &str, data: Bytes, diagnostics: &Diagnostics) -> Bytes {
    if !elf::is_elf(&data) {
        return data;
    }

    match elf::find_payload_section(&data) {
        Ok(range) => {
            diagnostics.debug(format_args!("Extracted content from ELF image '{}'", entry));
            data.slice(range)
        }
        Err(e) => {
            diagnostics.debug(format_args!("Entry '{}' {}", entry, e));
            data
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::LogLevel;
    use std::io::{Cursor, Write};
    use std::sync::Mutex;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn archive_with(entries: &[(&str, &[u8])]) -> ZipArchive<Cursor<Vec<u8>>> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
        ZipArchive::new(writer.finish().unwrap()).unwrap()
    }

    #[test]
    fn test_config_defaults() {
        let config = ReaderConfig::new();
        assert_eq!(
            config.supported_abis,
            vec!["arm64-v8a", "armeabi-v7a", "x86_64", "x86"]
        );
        assert!(config.check_loose_files);
        assert!(format!("{:?}", config).contains("logger: false"));
    }

    #[test]
    fn test_effective_abis_drop_empty_and_repeats() {
        let config = ReaderConfig::new().supported_abis(["x86", "", "arm64-v8a", "x86"]);
        assert_eq!(config.effective_abis(), vec!["x86", "arm64-v8a"]);
    }

    #[test]
    fn test_config_logger_is_used() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&seen);
        let config = ReaderConfig::new().logger(move |level: LogLevel, msg: &str| {
            captured.lock().unwrap().push((level, msg.to_string()));
        });

        config.diagnostics().info(format_args!("hello"));
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_read_entry() {
        let mut archive = archive_with(&[("assemblies/A.dll", b"MZ bytes")]);
        let data = read_entry(&mut archive, "assemblies/A.dll").unwrap().unwrap();
        assert_eq!(&data[..], b"MZ bytes");
        assert!(read_entry(&mut archive, "assemblies/B.dll").unwrap().is_none());
    }

    #[test]
    fn test_unwrap_payload_leaves_plain_bytes() {
        let data = Bytes::from_static(b"MZ not an ELF");
        let out = unwrap_payload("assemblies/A.dll", data.clone(), &Diagnostics::default());
        assert_eq!(out, data);
    }

    #[test]
    fn test_strategy_kind_display() {
        assert_eq!(StrategyKind::Store.to_string(), "store");
        assert_eq!(StrategyKind::Directory.to_string(), "directory");
    }
}
