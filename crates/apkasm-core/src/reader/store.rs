//! Store layout: consolidated per-ABI assembly stores.
//!
//! ## Store Format
//!
//! All fields are little-endian. Offsets in descriptors are relative to the
//! start of the store, which is the `payload` section when the store is
//! wrapped in an ELF shared object.
//!
//! ```text
//! header       magic "XABA", version, entry count, index entry count, index size
//! index        [ hash (u64 or u32) ][ descriptor index u32 ][ ignore u8, format 3+ ]
//! descriptors  [ mapping, data off, data size, debug off, debug size, config off, config size ]
//! names        [ length u32 ][ UTF-8 bytes ]
//! data         assembly images, optionally XALZ compressed
//! ```
//!
//! The version word packs the format number (low 16 bits), the ABI tag
//! (`0x00FF0000`) and a 64-bit flag (bit 31). 64-bit stores hash names with
//! XXH3-64, 32-bit stores with xxHash32.
//!
//! Packages without such a store may still carry a first-generation store
//! (`assemblies/assemblies.manifest`), which is read by the `legacy` module
//! into the same lookup tables.

use super::{legacy, read_entry, unwrap_payload};
use crate::arch::TargetArch;
use crate::binary;
use crate::compression;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::pe::PeReader;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use xxhash_rust::xxh32::xxh32;
use xxhash_rust::xxh3::xxh3_64;
use xxhash_rust::xxh64::xxh64;
use zip::ZipArchive;

/// `"XABA"` read as a little-endian `u32`
pub const STORE_MAGIC: u32 = 0x4142_4158;

const HEADER_SIZE: usize = 20;
const DESCRIPTOR_SIZE: usize = 28;

const VERSION_64BIT: u32 = 0x8000_0000;
const VERSION_ABI_MASK: u32 = 0x00FF_0000;
const VERSION_FORMAT_MASK: u32 = 0x0000_FFFF;
const VERSION_RESERVED_MASK: u32 = 0x7F00_0000;

/// Archive entry names probed for the store of `abi`, in order.
pub fn store_paths(abi: &str) -> [String; 2] {
    [
        format!("lib/{abi}/libassemblies.{abi}.blob.so"),
        format!("base/lib/{abi}/libassemblies.{abi}.blob.so"),
    ]
}

/// Split archives probed next to `path` for the stores of `abi`, in order.
///
/// App bundles installed on a device deliver native libraries, and with them
/// the assembly stores, in per-ABI splits such as `split_config.arm64_v8a.apk`.
pub fn split_archive_paths(path: &Path, abi: &str) -> Vec<PathBuf> {
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    let mut names = vec![format!("split_config.{}.apk", abi.replace('-', "_"))];
    let literal = format!("split_config.{}.apk", abi);
    if !names.contains(&literal) {
        names.push(literal);
    }
    names.into_iter().map(|name| dir.join(name)).collect()
}

/// Hash function behind an index entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    /// xxHash32, seed 0 (32-bit indexes of every store generation)
    Xxh32,
    /// XXH64, seed 0 (64-bit indexes of first-generation stores)
    Xxh64,
    /// XXH3-64 (64-bit indexes of current stores)
    Xxh3,
}

impl HashAlgorithm {
    /// Hashes `name` the way an index of this kind stores it.
    pub fn hash(self, name: &str) -> u64 {
        match self {
            Self::Xxh32 => u64::from(xxh32(name.as_bytes(), 0)),
            Self::Xxh64 => xxh64(name.as_bytes(), 0),
            Self::Xxh3 => xxh3_64(name.as_bytes()),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Xxh32 => "xxh32",
            Self::Xxh64 => "xxh64",
            Self::Xxh3 => "xxh3",
        })
    }
}

/// Hash of an assembly name as stored in the index of a store of the given bitness.
pub fn name_hash(name: &str, is_64bit: bool) -> u64 {
    if is_64bit {
        HashAlgorithm::Xxh3.hash(name)
    } else {
        HashAlgorithm::Xxh32.hash(name)
    }
}

/// Names tried for a lookup of `name`, in order.
///
/// `Foo.dll` also tries `Foo`; `Foo` also tries `Foo.dll`.
pub fn candidate_names(name: &str) -> [String; 2] {
    let stem = name
        .len()
        .checked_sub(4)
        .filter(|&cut| cut > 0)
        .and_then(|cut| name.get(cut..).map(|ext| (cut, ext)))
        .filter(|(_, ext)| ext.eq_ignore_ascii_case(".dll") || ext.eq_ignore_ascii_case(".exe"))
        .map(|(cut, _)| &name[..cut]);

    match stem {
        Some(stem) => [name.to_string(), stem.to_string()],
        None => [name.to_string(), format!("{}.dll", name)],
    }
}

/// Decoded store version word
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StoreFormat {
    version: u32,
    arch: TargetArch,
    is_64bit: bool,
}

impl StoreFormat {
    fn from_version(word: u32) -> Option<Self> {
        let version = word & VERSION_FORMAT_MASK;
        let is_64bit = word & VERSION_64BIT != 0;
        if word & VERSION_RESERVED_MASK != 0 || !(2..=3).contains(&version) {
            return None;
        }

        let arch = TargetArch::from_store_tag((word & VERSION_ABI_MASK) >> 16)?;
        (arch.is_64bit() == is_64bit).then_some(Self {
            version,
            arch,
            is_64bit,
        })
    }

    fn has_ignore_flag(&self) -> bool {
        self.version >= 3
    }

    fn index_entry_size(&self) -> usize {
        let hash = if self.is_64bit { 8 } else { 4 };
        hash + 4 + usize::from(self.has_ignore_flag())
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        if self.is_64bit {
            HashAlgorithm::Xxh3
        } else {
            HashAlgorithm::Xxh32
        }
    }
}

/// One row of a store index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    /// Hash of an assembly name
    pub name_hash: u64,
    /// Function that produced `name_hash`
    pub algorithm: HashAlgorithm,
    /// Position of the descriptor this hash resolves to
    pub descriptor_index: u32,
    /// Ignore flag (format 3 and later)
    pub ignore: bool,
}

/// One assembly in a store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    /// Assembly name as recorded in the store
    pub name: String,
    /// Archive entry of the store holding this assembly
    pub store: String,
    /// Architecture of the store, `None` for the architecture-neutral
    /// first-generation store
    pub arch: Option<TargetArch>,
    /// Whether the store is a 64-bit store
    pub is_64bit: bool,
    /// Set when every index entry for this assembly is flagged ignored
    pub ignore: bool,
    /// Runtime mapping slot
    pub mapping_index: u32,
    /// Offset of the image data
    pub data_offset: u32,
    /// Size of the image data
    pub data_size: u32,
    /// Offset of the debug data, zero if absent
    pub debug_offset: u32,
    /// Size of the debug data, zero if absent
    pub debug_size: u32,
    /// Offset of the config data, zero if absent
    pub config_offset: u32,
    /// Size of the config data, zero if absent
    pub config_size: u32,
    /// Index entries resolving to this assembly
    pub index_entries: Vec<IndexEntry>,
}

#[derive(Debug)]
pub(crate) struct Partition {
    entry: String,
    data: Bytes,
    entries: Vec<StoreEntry>,
}

impl Partition {
    /// Entries must have passed `check_ranges` against `data`.
    pub(super) fn new(entry: String, data: Bytes, entries: Vec<StoreEntry>) -> Self {
        Self {
            entry,
            data,
            entries,
        }
    }

    /// Prefixes the entry names with the archive they were read from.
    fn located_in(mut self, archive: &str) -> Self {
        self.entry = format!("{}!{}", archive, self.entry);
        for entry in &mut self.entries {
            entry.store = self.entry.clone();
        }
        self
    }

    #[cfg(test)]
    pub(super) fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    fn blob(&self, offset: u32, size: u32) -> Bytes {
        let start = offset as usize;
        self.data.slice(start..start + size as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntryRef {
    partition: usize,
    entry: usize,
}

/// Resolves assemblies from one or more buffered assembly stores
///
/// Each store is read into memory once. Lookups slice the shared buffers and
/// never lock, so any number of threads may read concurrently.
#[derive(Debug)]
pub struct StoreReader {
    partitions: Vec<Partition>,
    by_name: HashMap<String, EntryRef>,
    by_xxh3: HashMap<u64, EntryRef>,
    by_xxh32: HashMap<u64, EntryRef>,
    by_xxh64: HashMap<u64, EntryRef>,
    resolved: Vec<EntryRef>,
    diagnostics: Diagnostics,
}

impl StoreReader {
    /// Loads the store of every ABI in `abis` that the archive carries,
    /// falling back to a first-generation store when there is none.
    pub(crate) fn load<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        abis: &[String],
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        let mut partitions = load_partitions(archive, abis, &diagnostics)?;
        if partitions.is_empty() {
            partitions = legacy::load_partitions(archive, abis, &diagnostics)?;
        }

        if partitions.is_empty() {
            diagnostics.debug(format_args!(
                "Could not find an assembly store for the supported ABIs: {}",
                abis.join(", ")
            ));
        }

        Ok(Self::from_partitions(partitions, diagnostics))
    }

    /// Loads stores from the per-ABI split archives next to `path`.
    ///
    /// Missing or unreadable splits are skipped; corrupt stores inside a
    /// readable split are errors.
    pub(crate) fn load_split_archives(
        path: &Path,
        abis: &[String],
        diagnostics: Diagnostics,
    ) -> Result<Self> {
        let mut partitions = Vec::new();

        for abi in abis {
            for split in split_archive_paths(path, abi) {
                if !split.is_file() {
                    diagnostics.debug(format_args!(
                        "No split config detected at: '{}'",
                        split.display()
                    ));
                    continue;
                }

                let opened = File::open(&split)
                    .map_err(|e| e.to_string())
                    .and_then(|file| ZipArchive::new(file).map_err(|e| e.to_string()));
                let mut archive = match opened {
                    Ok(archive) => archive,
                    Err(e) => {
                        diagnostics.debug(format_args!(
                            "Unable to read store information for {}: {}",
                            split.display(),
                            e
                        ));
                        continue;
                    }
                };

                let label = split
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let found = load_partitions(&mut archive, std::slice::from_ref(abi), &diagnostics)?;
                partitions.extend(found.into_iter().map(|p| p.located_in(&label)));
                break;
            }
        }

        if partitions.is_empty() {
            diagnostics.debug(format_args!(
                "Could not find an assembly store in split archives for the supported ABIs: {}",
                abis.join(", ")
            ));
        }

        Ok(Self::from_partitions(partitions, diagnostics))
    }

    /// Builds the name and hash maps. Partitions come in preference order;
    /// the first non-ignored descriptor to claim a key keeps it.
    pub(crate) fn from_partitions(partitions: Vec<Partition>, diagnostics: Diagnostics) -> Self {
        let mut by_name = HashMap::new();
        let mut by_xxh3 = HashMap::new();
        let mut by_xxh32 = HashMap::new();
        let mut by_xxh64 = HashMap::new();
        let mut resolved = Vec::new();

        for (p, partition) in partitions.iter().enumerate() {
            for (e, entry) in partition.entries.iter().enumerate() {
                if entry.ignore {
                    continue;
                }

                let at = EntryRef {
                    partition: p,
                    entry: e,
                };
                for index in &entry.index_entries {
                    let hashes = match index.algorithm {
                        HashAlgorithm::Xxh3 => &mut by_xxh3,
                        HashAlgorithm::Xxh32 => &mut by_xxh32,
                        HashAlgorithm::Xxh64 => &mut by_xxh64,
                    };
                    hashes.entry(index.name_hash).or_insert(at);
                }

                if !entry.name.is_empty() && !by_name.contains_key(&entry.name) {
                    by_name.insert(entry.name.clone(), at);
                    resolved.push(at);
                }
            }
        }

        Self {
            partitions,
            by_name,
            by_xxh3,
            by_xxh32,
            by_xxh64,
            resolved,
            diagnostics,
        }
    }

    /// Whether at least one supported store was found
    pub fn is_supported(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Archive entries of the loaded stores, in preference order
    pub fn stores(&self) -> impl Iterator<Item = &str> + '_ {
        self.partitions.iter().map(|p| p.entry.as_str())
    }

    /// Assemblies reachable by name, in preference order
    pub fn entries(&self) -> impl Iterator<Item = &StoreEntry> + '_ {
        self.resolved.iter().map(move |&at| self.get(at))
    }

    /// Looks up the descriptor `name` resolves to.
    pub fn entry(&self, name: &str) -> Option<&StoreEntry> {
        self.find(name).map(|at| self.get(at))
    }

    /// Resolves `name` to a decoded image.
    pub fn try_read(&self, name: &str) -> Result<Option<PeReader>> {
        let Some(at) = self.find(name) else {
            self.diagnostics.debug(format_args!(
                "Couldn't find assembly {} in the assembly store",
                name
            ));
            return Ok(None);
        };

        let partition = &self.partitions[at.partition];
        let entry = &partition.entries[at.entry];
        match entry.arch {
            Some(arch) => self.diagnostics.debug(format_args!(
                "Resolved assembly {} in the {} assembly store",
                name, arch
            )),
            None => self.diagnostics.debug(format_args!(
                "Resolved assembly {} in the shared assembly store",
                name
            )),
        }

        let image = compression::decompress_bytes(partition.blob(entry.data_offset, entry.data_size))?;
        PeReader::parse(name, image).map(Some)
    }

    /// Debug data stored alongside `name`, if any.
    pub fn read_debug_data(&self, name: &str) -> Option<Bytes> {
        let at = self.find(name)?;
        let entry = self.get(at);
        self.optional_blob(at, entry.debug_offset, entry.debug_size)
    }

    /// Config data stored alongside `name`, if any.
    pub fn read_config_data(&self, name: &str) -> Option<Bytes> {
        let at = self.find(name)?;
        let entry = self.get(at);
        self.optional_blob(at, entry.config_offset, entry.config_size)
    }

    fn optional_blob(&self, at: EntryRef, offset: u32, size: u32) -> Option<Bytes> {
        (offset != 0 && size != 0).then(|| self.partitions[at.partition].blob(offset, size))
    }

    fn get(&self, at: EntryRef) -> &StoreEntry {
        &self.partitions[at.partition].entries[at.entry]
    }

    fn find(&self, name: &str) -> Option<EntryRef> {
        candidate_names(name).iter().find_map(|candidate| {
            self.by_name
                .get(candidate)
                .or_else(|| self.by_xxh3.get(&HashAlgorithm::Xxh3.hash(candidate)))
                .or_else(|| self.by_xxh32.get(&HashAlgorithm::Xxh32.hash(candidate)))
                .or_else(|| self.by_xxh64.get(&HashAlgorithm::Xxh64.hash(candidate)))
                .copied()
        })
    }
}

/// Finds and parses the current-generation store of each ABI in `abis`.
fn load_partitions<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    abis: &[String],
    diagnostics: &Diagnostics,
) -> Result<Vec<Partition>> {
    let mut partitions = Vec::new();

    for abi in abis {
        if TargetArch::from_abi(abi).is_none() {
            diagnostics.debug(format_args!("Skipping unknown ABI '{}'", abi));
            continue;
        }

        for entry in store_paths(abi) {
            let Some(data) = read_entry(archive, &entry)? else {
                continue;
            };

            if let Some(partition) = parse_partition(&entry, abi, data, diagnostics)? {
                partitions.push(partition);
            }
            break;
        }
    }

    Ok(partitions)
}

pub(super) fn table_len(count: usize, size: usize, offset: usize) -> Result<usize> {
    count
        .checked_mul(size)
        .ok_or_else(|| Error::malformed_header(offset, format!("{} table rows overflow", count)))
}

fn range_fits(len: usize, offset: u32, size: u32) -> bool {
    (offset as usize)
        .checked_add(size as usize)
        .map_or(false, |end| end <= len)
}

/// Rejects an entry whose data, debug or config range lies outside a store of `len` bytes.
pub(super) fn check_ranges(store: &str, entry: &StoreEntry, len: usize) -> Result<()> {
    let blobs = [
        ("data", entry.data_offset, entry.data_size, true),
        ("debug", entry.debug_offset, entry.debug_size, false),
        ("config", entry.config_offset, entry.config_size, false),
    ];
    for (what, off, size, required) in blobs {
        let present = required || (off != 0 && size != 0);
        if present && !range_fits(len, off, size) {
            return Err(Error::invalid_store(
                store,
                format!(
                    "{} range {}+{} of {} is outside the {} byte store",
                    what, off, size, entry.name, len
                ),
            ));
        }
    }
    Ok(())
}

/// Parses one store. `Ok(None)` means the bytes are not a store this crate supports.
pub(crate) fn parse_partition(
    entry: &str,
    abi: &str,
    data: Bytes,
    diagnostics: &Diagnostics,
) -> Result<Option<Partition>> {
    let data = unwrap_payload(entry, data, diagnostics);

    if binary::le_u32(&data, 0).ok() != Some(STORE_MAGIC) {
        diagnostics.debug(format_args!("Store '{}' has invalid header magic number", entry));
        return Ok(None);
    }

    let word = binary::le_u32(&data, 4)?;
    let Some(format) = StoreFormat::from_version(word) else {
        diagnostics.debug(format_args!("Store '{}' has unsupported version {:#x}", entry, word));
        return Ok(None);
    };

    if format.arch.abi() != abi {
        diagnostics.warn(format_args!(
            "Store '{}' declares ABI {}, expected {}",
            entry, format.arch, abi
        ));
    }

    let entry_count = binary::le_u32(&data, 8)? as usize;
    let index_count = binary::le_u32(&data, 12)? as usize;
    let index_size = binary::le_u32(&data, 16)? as usize;

    let mut offset = HEADER_SIZE;
    let row = format.index_entry_size();
    let index_len = table_len(index_count, row, offset)?;
    let table = binary::slice(&data, offset, index_len)?;
    if index_size != index_len {
        diagnostics.debug(format_args!(
            "Store '{}' declares a {} byte index, found {}",
            entry, index_size, index_len
        ));
    }

    let index = table
        .chunks_exact(row)
        .map(|chunk| {
            let (name_hash, rest) = if format.is_64bit {
                (binary::le_u64(chunk, 0)?, 8)
            } else {
                (u64::from(binary::le_u32(chunk, 0)?), 4)
            };
            Ok(IndexEntry {
                name_hash,
                algorithm: format.hash_algorithm(),
                descriptor_index: binary::le_u32(chunk, rest)?,
                ignore: format.has_ignore_flag() && binary::read_u8(chunk, rest + 4)? != 0,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    offset += index_len;

    let descriptors_len = table_len(entry_count, DESCRIPTOR_SIZE, offset)?;
    let descriptors = binary::slice(&data, offset, descriptors_len)?;
    offset += descriptors_len;

    let mut names = Vec::with_capacity(entry_count.min(index_count));
    for i in 0..entry_count {
        let len = binary::le_u32(&data, offset)? as usize;
        let bytes = binary::slice(&data, offset + 4, len)?;
        let name = String::from_utf8(bytes.to_vec()).map_err(|_| {
            Error::invalid_store(entry, format!("name of descriptor {} is not valid UTF-8", i))
        })?;
        names.push(name);
        offset += 4 + len;
    }

    let mut referrers: Vec<Vec<IndexEntry>> = vec![Vec::new(); entry_count];
    for index_entry in index {
        let slot = referrers
            .get_mut(index_entry.descriptor_index as usize)
            .ok_or_else(|| {
                Error::invalid_store(
                    entry,
                    format!(
                        "index entry refers to descriptor {}, but there are only {}",
                        index_entry.descriptor_index, entry_count
                    ),
                )
            })?;
        slot.push(index_entry);
    }

    let mut entries = Vec::with_capacity(entry_count);
    for (i, (name, index_entries)) in names.into_iter().zip(referrers).enumerate() {
        if index_entries.is_empty() {
            return Err(Error::invalid_store(
                entry,
                format!("descriptor {} ({}) is not referenced by the index", i, name),
            ));
        }

        let ignored = index_entries.iter().filter(|e| e.ignore).count();
        if ignored != 0 && ignored != index_entries.len() {
            diagnostics.debug(format_args!(
                "Store '{}': {} of {} index entries for {} are ignored; keeping it",
                entry,
                ignored,
                index_entries.len(),
                name
            ));
        }

        let field = |n: usize| binary::le_u32(descriptors, i * DESCRIPTOR_SIZE + n * 4);
        let store_entry = StoreEntry {
            mapping_index: field(0)?,
            data_offset: field(1)?,
            data_size: field(2)?,
            debug_offset: field(3)?,
            debug_size: field(4)?,
            config_offset: field(5)?,
            config_size: field(6)?,
            ignore: ignored == index_entries.len(),
            name,
            store: entry.to_string(),
            arch: Some(format.arch),
            is_64bit: format.is_64bit,
            index_entries,
        };

        check_ranges(entry, &store_entry, data.len())?;
        entries.push(store_entry);
    }

    diagnostics.debug(format_args!(
        "Store '{}': format {}, {} assemblies, {} index entries",
        entry,
        format.version,
        entries.len(),
        index_count
    ));

    Ok(Some(Partition::new(entry.to_string(), data, entries)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const V3_ARM64: u32 = 0x8001_0003;
    const V2_X86: u32 = 0x0004_0002;
    const ARM64_STORE: &str = "lib/arm64-v8a/libassemblies.arm64-v8a.blob.so";
    const X86_STORE: &str = "lib/x86/libassemblies.x86.blob.so";

    struct Item<'a> {
        name: &'a str,
        data: &'a [u8],
        index: Vec<(u64, bool)>,
    }

    fn item<'a>(name: &'a str, data: &'a [u8], is_64bit: bool, ignore: bool) -> Item<'a> {
        Item {
            name,
            data,
            index: vec![(name_hash(name, is_64bit), ignore)],
        }
    }

    fn build_store(version: u32, items: &[Item<'_>]) -> Vec<u8> {
        let format = StoreFormat::from_version(version).unwrap();
        let mut index = Vec::new();
        let mut index_count = 0u32;
        for (i, it) in items.iter().enumerate() {
            for &(hash, ignore) in &it.index {
                if format.is_64bit {
                    index.extend_from_slice(&hash.to_le_bytes());
                } else {
                    index.extend_from_slice(&(hash as u32).to_le_bytes());
                }
                index.extend_from_slice(&(i as u32).to_le_bytes());
                if format.has_ignore_flag() {
                    index.push(ignore as u8);
                }
                index_count += 1;
            }
        }

        let names_len: usize = items.iter().map(|it| 4 + it.name.len()).sum();
        let mut data_offset = HEADER_SIZE + index.len() + items.len() * DESCRIPTOR_SIZE + names_len;

        let mut out = Vec::new();
        for word in [STORE_MAGIC, version, items.len() as u32, index_count, index.len() as u32] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        out.extend_from_slice(&index);
        for (i, it) in items.iter().enumerate() {
            for word in [i as u32, data_offset as u32, it.data.len() as u32, 0, 0, 0, 0] {
                out.extend_from_slice(&word.to_le_bytes());
            }
            data_offset += it.data.len();
        }
        for it in items {
            out.extend_from_slice(&(it.name.len() as u32).to_le_bytes());
            out.extend_from_slice(it.name.as_bytes());
        }
        for it in items {
            out.extend_from_slice(it.data);
        }
        out
    }

    fn parse(entry: &str, abi: &str, store: Vec<u8>) -> Result<Option<Partition>> {
        parse_partition(entry, abi, Bytes::from(store), &Diagnostics::default())
    }

    fn reader(stores: Vec<(&str, &str, Vec<u8>)>) -> StoreReader {
        let partitions = stores
            .into_iter()
            .map(|(entry, abi, store)| parse(entry, abi, store).unwrap().unwrap())
            .collect();
        StoreReader::from_partitions(partitions, Diagnostics::default())
    }

    #[test]
    fn test_candidate_names() {
        assert_eq!(candidate_names("Foo.dll"), ["Foo.dll", "Foo"]);
        assert_eq!(candidate_names("Foo.EXE"), ["Foo.EXE", "Foo"]);
        assert_eq!(candidate_names("Foo"), ["Foo", "Foo.dll"]);
        assert_eq!(candidate_names(".dll"), [".dll", ".dll.dll"]);
        assert_eq!(candidate_names("Ünï"), ["Ünï", "Ünï.dll"]);
    }

    #[test]
    fn test_store_paths() {
        assert_eq!(
            store_paths("x86"),
            [
                "lib/x86/libassemblies.x86.blob.so",
                "base/lib/x86/libassemblies.x86.blob.so"
            ]
        );
    }

    #[test]
    fn test_split_archive_paths() {
        let base = Path::new("/data/app/base.apk");
        assert_eq!(
            split_archive_paths(base, "arm64-v8a"),
            vec![
                PathBuf::from("/data/app/split_config.arm64_v8a.apk"),
                PathBuf::from("/data/app/split_config.arm64-v8a.apk"),
            ]
        );
        assert_eq!(
            split_archive_paths(Path::new("base.apk"), "x86_64"),
            vec![PathBuf::from("split_config.x86_64.apk")]
        );
    }

    #[test]
    fn test_hash_algorithms_differ() {
        let name = "Mono.Android.dll";
        assert_eq!(name_hash(name, true), HashAlgorithm::Xxh3.hash(name));
        assert_eq!(name_hash(name, false), HashAlgorithm::Xxh32.hash(name));
        assert!(HashAlgorithm::Xxh32.hash(name) <= u64::from(u32::MAX));
        assert_ne!(HashAlgorithm::Xxh64.hash(name), HashAlgorithm::Xxh3.hash(name));
        assert_eq!(HashAlgorithm::Xxh64.to_string(), "xxh64");
    }

    #[test]
    fn test_located_in_relabels_entries() {
        let store = build_store(V3_ARM64, &[item("A.dll", b"a", true, false)]);
        let partition = parse(ARM64_STORE, "arm64-v8a", store)
            .unwrap()
            .unwrap()
            .located_in("split_config.arm64_v8a.apk");
        let expected = format!("split_config.arm64_v8a.apk!{}", ARM64_STORE);
        assert_eq!(partition.entry, expected);
        assert_eq!(partition.entries[0].store, expected);
    }

    #[test]
    fn test_version_word() {
        let format = StoreFormat::from_version(V3_ARM64).unwrap();
        assert_eq!(format.arch, TargetArch::Arm64);
        assert!(format.is_64bit);
        assert_eq!(format.index_entry_size(), 13);

        let format = StoreFormat::from_version(V2_X86).unwrap();
        assert_eq!(format.arch, TargetArch::X86);
        assert_eq!(format.index_entry_size(), 8);

        assert!(StoreFormat::from_version(0x8001_0001).is_none());
        assert!(StoreFormat::from_version(0x8001_0004).is_none());
        assert!(StoreFormat::from_version(0x0001_0002).is_none());
        assert!(StoreFormat::from_version(0x8004_0002).is_none());
        assert!(StoreFormat::from_version(0x8009_0002).is_none());
        assert!(StoreFormat::from_version(0x8101_0002).is_none());
    }

    #[test]
    fn test_resolve_by_name_and_stem() {
        let store = build_store(
            V3_ARM64,
            &[
                item("Mono.Android.dll", b"first", true, false),
                item("System.Runtime", b"second", true, false),
            ],
        );
        let reader = reader(vec![(ARM64_STORE, "arm64-v8a", store)]);

        assert!(reader.is_supported());
        assert_eq!(reader.entry("Mono.Android.dll").unwrap().data_size, 5);
        assert_eq!(reader.entry("Mono.Android").unwrap().name, "Mono.Android.dll");
        assert_eq!(reader.entry("System.Runtime.dll").unwrap().name, "System.Runtime");
        assert!(reader.entry("System.Console.dll").is_none());
        assert!(reader.try_read("System.Console.dll").unwrap().is_none());

        let names: Vec<&str> = reader.entries().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Mono.Android.dll", "System.Runtime"]);
    }

    #[test]
    fn test_resolve_by_hash() {
        let mut renamed = item("Renamed", b"bytes", true, false);
        renamed.index.push((name_hash("Foo.dll", true), false));
        let store = build_store(V3_ARM64, &[renamed]);
        let reader = reader(vec![(ARM64_STORE, "arm64-v8a", store)]);

        assert_eq!(reader.entry("Foo.dll").unwrap().name, "Renamed");
        assert_eq!(reader.entry("Foo").unwrap().name, "Renamed");
    }

    #[test]
    fn test_32bit_store_uses_xxh32() {
        let mut renamed = item("Renamed", b"bytes", false, false);
        renamed.index = vec![(name_hash("Bar.dll", false), false)];
        let store = build_store(V2_X86, &[renamed]);
        let reader = reader(vec![(X86_STORE, "x86", store)]);

        let entry = reader.entry("Bar.dll").unwrap();
        assert!(!entry.is_64bit);
        assert_eq!(entry.arch, Some(TargetArch::X86));
        assert_eq!(entry.index_entries[0].algorithm, HashAlgorithm::Xxh32);
        assert!(!entry.ignore);
    }

    #[test]
    fn test_ignore_requires_every_index_entry() {
        let mut mixed = item("Mixed.dll", b"m", true, true);
        mixed.index.push((name_hash("Mixed", true), false));
        let mut ignored = item("Gone.dll", b"g", true, true);
        ignored.index.push((name_hash("Gone", true), true));

        let store = build_store(V3_ARM64, &[mixed, ignored]);
        let reader = reader(vec![(ARM64_STORE, "arm64-v8a", store)]);

        assert!(!reader.entry("Mixed.dll").unwrap().ignore);
        assert!(reader.entry("Gone.dll").is_none());
        assert_eq!(reader.entries().count(), 1);
    }

    #[test]
    fn test_first_partition_wins() {
        let arm64 = build_store(
            V3_ARM64,
            &[
                item("A.dll", b"arm64", true, false),
                item("B.dll", b"arm64", true, true),
            ],
        );
        let x86 = build_store(
            V2_X86,
            &[item("A.dll", b"x86", false, false), item("B.dll", b"x86", false, false)],
        );
        let reader = reader(vec![(ARM64_STORE, "arm64-v8a", arm64), (X86_STORE, "x86", x86)]);

        assert_eq!(reader.entry("A.dll").unwrap().arch, Some(TargetArch::Arm64));
        assert_eq!(reader.entry("B.dll").unwrap().arch, Some(TargetArch::X86));
        assert_eq!(reader.stores().collect::<Vec<_>>(), vec![ARM64_STORE, X86_STORE]);

        let names: Vec<(&str, Option<TargetArch>)> =
            reader.entries().map(|e| (e.name.as_str(), e.arch)).collect();
        assert_eq!(
            names,
            vec![("A.dll", Some(TargetArch::Arm64)), ("B.dll", Some(TargetArch::X86))]
        );
    }

    #[test]
    fn test_unsupported_stores_are_skipped() {
        let mut store = build_store(V3_ARM64, &[item("A.dll", b"a", true, false)]);
        store[4..8].copy_from_slice(&0x8001_0001u32.to_le_bytes());
        assert!(parse(ARM64_STORE, "arm64-v8a", store).unwrap().is_none());

        assert!(parse(ARM64_STORE, "arm64-v8a", b"XABB....".to_vec()).unwrap().is_none());
        assert!(parse(ARM64_STORE, "arm64-v8a", Vec::new()).unwrap().is_none());
    }

    #[test]
    fn test_abi_mismatch_keeps_store_arch() {
        let store = build_store(V2_X86, &[item("A.dll", b"a", false, false)]);
        let partition = parse(ARM64_STORE, "arm64-v8a", store).unwrap().unwrap();
        assert_eq!(partition.entries[0].arch, Some(TargetArch::X86));
    }

    #[test]
    fn test_truncated_tables() {
        let store = build_store(V3_ARM64, &[item("A.dll", b"a", true, false)]);
        let err = parse(ARM64_STORE, "arm64-v8a", store[..30].to_vec()).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));

        let err = parse(ARM64_STORE, "arm64-v8a", store[..12].to_vec()).unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));
    }

    #[test]
    fn test_index_points_past_descriptors() {
        let mut store = build_store(V3_ARM64, &[item("A.dll", b"a", true, false)]);
        store[28..32].copy_from_slice(&9u32.to_le_bytes());
        let err = parse(ARM64_STORE, "arm64-v8a", store).unwrap_err();
        assert!(matches!(err, Error::InvalidStore { .. }));
    }

    #[test]
    fn test_unreferenced_descriptor() {
        let mut orphan = item("Orphan.dll", b"o", true, false);
        orphan.index.clear();
        let store = build_store(V3_ARM64, &[item("A.dll", b"a", true, false), orphan]);
        let err = parse(ARM64_STORE, "arm64-v8a", store).unwrap_err();
        assert!(err.to_string().contains("not referenced"));
    }

    #[test]
    fn test_data_range_outside_store() {
        let mut store = build_store(V3_ARM64, &[item("A.dll", b"abcd", true, false)]);
        store.pop();
        let err = parse(ARM64_STORE, "arm64-v8a", store).unwrap_err();
        assert!(matches!(err, Error::InvalidStore { .. }));
    }

    #[test]
    fn test_debug_and_config_data() {
        let mut store = build_store(V3_ARM64, &[item("A.dll", b"image", true, false)]);
        let descriptor = HEADER_SIZE + 13;
        let data_offset = u32::from_le_bytes(store[descriptor + 4..descriptor + 8].try_into().unwrap());
        store[descriptor + 12..descriptor + 16].copy_from_slice(&data_offset.to_le_bytes());
        store[descriptor + 16..descriptor + 20].copy_from_slice(&2u32.to_le_bytes());

        let reader = reader(vec![(ARM64_STORE, "arm64-v8a", store)]);
        assert_eq!(reader.read_debug_data("A.dll").unwrap(), Bytes::from_static(b"im"));
        assert!(reader.read_config_data("A.dll").is_none());
        assert!(reader.read_debug_data("Missing.dll").is_none());
    }

    #[test]
    fn test_try_read_routes_through_decompressor() {
        let store = build_store(
            V3_ARM64,
            &[
                item("Short.dll", b"XALZ\x01\0\0\0", true, false),
                item("Plain.dll", b"not a PE image", true, false),
            ],
        );
        let reader = reader(vec![(ARM64_STORE, "arm64-v8a", store)]);

        let err = reader.try_read("Short.dll").unwrap_err();
        assert!(matches!(err, Error::MalformedHeader { .. }));

        let err = reader.try_read("Plain.dll").unwrap_err();
        assert!(matches!(err, Error::InvalidImage { ref name, .. } if name == "Plain.dll"));
    }
}
