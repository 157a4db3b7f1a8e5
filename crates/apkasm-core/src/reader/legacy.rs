//! First-generation assembly stores.
//!
//! ```text
//! assemblies/assemblies.manifest    text; a header line, then one
//!                                   "hash32 hash64 store-id store-index name" line per assembly
//! assemblies/assemblies.blob        store 0: architecture-neutral assemblies and the global index
//! assemblies/assemblies.{abi}.blob  per-ABI assemblies, all sharing one store id
//!
//! header        magic "XABA", version 1, local count, global count, store id
//! local entry   [ data off, data size, debug off, debug size, config off, config size ]
//! global index  global count x [ hash u64, mapping u32, local index u32, store id u32 ],
//!               first for xxHash32, then for XXH64; store 0 only
//! ```
//!
//! The global index ties name hashes to `(store id, local index)` slots and
//! the manifest ties hashes to names. Offsets are relative to the blob.

use super::read_entry;
use super::store::{check_ranges, table_len, HashAlgorithm, IndexEntry, Partition, StoreEntry, STORE_MAGIC};
use crate::arch::TargetArch;
use crate::binary;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::io::{Read, Seek};
use zip::ZipArchive;

/// Archive entry whose presence marks a first-generation store
pub const LEGACY_MANIFEST: &str = "assemblies/assemblies.manifest";

const FORMAT_VERSION: u32 = 1;
const HEADER_SIZE: usize = 20;
const LOCAL_ENTRY_SIZE: usize = 24;
const HASH_ENTRY_SIZE: usize = 20;

/// Archive entry of the first-generation blob for `abi`, or of the shared blob.
pub fn legacy_blob_path(abi: Option<&str>) -> String {
    match abi {
        Some(abi) => format!("assemblies/assemblies.{}.blob", abi),
        None => "assemblies/assemblies.blob".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ManifestEntry {
    hash32: u32,
    hash64: u64,
    store_id: u32,
    store_index: u32,
    name: String,
}

fn hex_field(field: &str) -> u64 {
    u64::from_str_radix(field.strip_prefix("0x").unwrap_or(field), 16).unwrap_or(0)
}

/// Parses the manifest. Unparsable numbers read as zero.
fn parse_manifest(text: &str) -> Result<Vec<ManifestEntry>> {
    text.lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            let &[hash32, hash64, store_id, store_index, name] = fields.as_slice() else {
                return Err(Error::invalid_store(
                    LEGACY_MANIFEST,
                    format!("expected 5 fields, found {} in '{}'", fields.len(), line),
                ));
            };
            Ok(ManifestEntry {
                hash32: u32::try_from(hex_field(hash32)).unwrap_or(0),
                hash64: hex_field(hash64),
                store_id: u32::try_from(hex_field(store_id)).unwrap_or(0),
                store_index: u32::try_from(hex_field(store_index)).unwrap_or(0),
                name: name.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HashEntry {
    hash: u64,
    mapping_index: u32,
    local_index: u32,
    store_id: u32,
}

#[derive(Debug)]
struct LegacyBlob {
    entry: String,
    arch: Option<TargetArch>,
    store_id: u32,
    data: Bytes,
    locals: Vec<[u32; 6]>,
    index32: Vec<HashEntry>,
    index64: Vec<HashEntry>,
}

fn parse_blob(
    entry: &str,
    arch: Option<TargetArch>,
    data: Bytes,
    diagnostics: &Diagnostics,
) -> Result<Option<LegacyBlob>> {
    if binary::le_u32(&data, 0).ok() != Some(STORE_MAGIC) {
        diagnostics.debug(format_args!("Store '{}' has invalid header magic number", entry));
        return Ok(None);
    }

    let version = binary::le_u32(&data, 4)?;
    if version == 0 || version > FORMAT_VERSION {
        diagnostics.debug(format_args!("Store '{}' has unsupported version {}", entry, version));
        return Ok(None);
    }

    let local_count = binary::le_u32(&data, 8)? as usize;
    let global_count = binary::le_u32(&data, 12)? as usize;
    let store_id = binary::le_u32(&data, 16)?;

    let mut offset = HEADER_SIZE;
    let locals_len = table_len(local_count, LOCAL_ENTRY_SIZE, offset)?;
    let locals = binary::slice(&data, offset, locals_len)?
        .chunks_exact(LOCAL_ENTRY_SIZE)
        .map(|chunk| {
            let mut fields = [0u32; 6];
            for (i, field) in fields.iter_mut().enumerate() {
                *field = binary::le_u32(chunk, i * 4)?;
            }
            Ok(fields)
        })
        .collect::<Result<Vec<_>>>()?;
    offset += locals_len;

    let mut index32 = Vec::new();
    let mut index64 = Vec::new();
    if store_id == 0 {
        for index in [&mut index32, &mut index64] {
            let len = table_len(global_count, HASH_ENTRY_SIZE, offset)?;
            *index = binary::slice(&data, offset, len)?
                .chunks_exact(HASH_ENTRY_SIZE)
                .map(|chunk| {
                    Ok(HashEntry {
                        hash: binary::le_u64(chunk, 0)?,
                        mapping_index: binary::le_u32(chunk, 8)?,
                        local_index: binary::le_u32(chunk, 12)?,
                        store_id: binary::le_u32(chunk, 16)?,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            offset += len;
        }
    }

    diagnostics.debug(format_args!(
        "Store '{}': id {}, {} local entries, {} global entries",
        entry, store_id, local_count, global_count
    ));

    Ok(Some(LegacyBlob {
        entry: entry.to_string(),
        arch,
        store_id,
        data,
        locals,
        index32,
        index64,
    }))
}

/// Reads a first-generation store, if the archive has one.
///
/// The shared blob comes first, then one blob per configured ABI in order.
pub(super) fn load_partitions<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    abis: &[String],
    diagnostics: &Diagnostics,
) -> Result<Vec<Partition>> {
    let Some(manifest) = read_entry(archive, LEGACY_MANIFEST)? else {
        return Ok(Vec::new());
    };
    let text = std::str::from_utf8(&manifest)
        .map_err(|_| Error::invalid_store(LEGACY_MANIFEST, "manifest is not valid UTF-8"))?;
    let manifest = parse_manifest(text)?;
    diagnostics.debug(format_args!(
        "Found a first-generation assembly store manifest with {} entries",
        manifest.len()
    ));

    let mut blobs = Vec::new();
    for abi in std::iter::once(None).chain(abis.iter().map(|abi| Some(abi.as_str()))) {
        let arch = match abi {
            None => None,
            Some(abi) => match TargetArch::from_abi(abi) {
                Some(arch) => Some(arch),
                None => {
                    diagnostics.debug(format_args!("Skipping unknown ABI '{}'", abi));
                    continue;
                }
            },
        };

        let entry = legacy_blob_path(abi);
        let Some(data) = read_entry(archive, &entry)? else {
            continue;
        };
        if let Some(blob) = parse_blob(&entry, arch, data, diagnostics)? {
            blobs.push(blob);
        }
    }

    build_partitions(blobs, &manifest, diagnostics)
}

/// Resolves names and hashes for every blob and turns each into a partition.
fn build_partitions(
    mut blobs: Vec<LegacyBlob>,
    manifest: &[ManifestEntry],
    diagnostics: &Diagnostics,
) -> Result<Vec<Partition>> {
    let Some(global) = blobs.iter().position(|b| b.store_id == 0) else {
        if !blobs.is_empty() {
            diagnostics.debug(format_args!("No first-generation store carries the global index"));
        }
        return Ok(Vec::new());
    };

    for (i, blob) in blobs.iter().enumerate() {
        if let Some(other) = blobs[..i].iter().find(|b| b.store_id == blob.store_id) {
            if other.locals.len() != blob.locals.len() {
                return Err(Error::invalid_store(
                    &blob.entry,
                    format!(
                        "store id {} holds {} assemblies here but {} in '{}'",
                        blob.store_id,
                        blob.locals.len(),
                        other.locals.len(),
                        other.entry
                    ),
                ));
            }
        }
    }

    let index32 = std::mem::take(&mut blobs[global].index32);
    let index64 = std::mem::take(&mut blobs[global].index64);

    let mut referrers: Vec<Vec<Vec<IndexEntry>>> =
        blobs.iter().map(|b| vec![Vec::new(); b.locals.len()]).collect();
    let mut mappings: Vec<Vec<Option<u32>>> = blobs.iter().map(|b| vec![None; b.locals.len()]).collect();

    for (algorithm, index) in [(HashAlgorithm::Xxh32, &index32), (HashAlgorithm::Xxh64, &index64)] {
        for he in index {
            let mut known = false;
            for (b, blob) in blobs.iter().enumerate() {
                if blob.store_id != he.store_id {
                    continue;
                }
                known = true;

                let local = he.local_index as usize;
                let Some(slot) = referrers[b].get_mut(local) else {
                    diagnostics.debug(format_args!(
                        "{} index entry with hash {:#x} has invalid store {} index {} (maximum allowed is {})",
                        algorithm,
                        he.hash,
                        he.store_id,
                        he.local_index,
                        blob.locals.len()
                    ));
                    continue;
                };

                let name_hash = match algorithm {
                    HashAlgorithm::Xxh32 => he.hash & u64::from(u32::MAX),
                    _ => he.hash,
                };
                slot.push(IndexEntry {
                    name_hash,
                    algorithm,
                    descriptor_index: he.local_index,
                    ignore: false,
                });

                let mapping = &mut mappings[b][local];
                match *mapping {
                    None => *mapping = Some(he.mapping_index),
                    Some(seen) if seen != he.mapping_index => diagnostics.debug(format_args!(
                        "Assembly {} of store {} has runtime index {} but {} index says {}",
                        he.local_index, he.store_id, seen, algorithm, he.mapping_index
                    )),
                    Some(_) => {}
                }
            }

            if !known {
                diagnostics.debug(format_args!("Store with id {} not part of the set", he.store_id));
            }
        }
    }

    let by_hash32: HashMap<u32, &str> = manifest
        .iter()
        .filter(|m| m.hash32 != 0)
        .map(|m| (m.hash32, m.name.as_str()))
        .collect();
    let by_hash64: HashMap<u64, &str> = manifest
        .iter()
        .filter(|m| m.hash64 != 0)
        .map(|m| (m.hash64, m.name.as_str()))
        .collect();
    let by_slot: HashMap<(u32, u32), &str> = manifest
        .iter()
        .map(|m| ((m.store_id, m.store_index), m.name.as_str()))
        .collect();

    let mut partitions = Vec::with_capacity(blobs.len());
    for ((blob, referrers), mappings) in blobs.into_iter().zip(referrers).zip(mappings) {
        let mut entries = Vec::with_capacity(blob.locals.len());

        for (i, ((fields, index_entries), mapping)) in
            blob.locals.iter().zip(referrers).zip(mappings).enumerate()
        {
            let named = |algorithm: HashAlgorithm| {
                index_entries
                    .iter()
                    .filter(|e| e.algorithm == algorithm)
                    .find_map(|e| match algorithm {
                        HashAlgorithm::Xxh32 => by_hash32.get(&(e.name_hash as u32)).copied(),
                        _ => by_hash64.get(&e.name_hash).copied(),
                    })
            };
            let name32 = named(HashAlgorithm::Xxh32);
            let name64 = named(HashAlgorithm::Xxh64);
            if let (Some(a), Some(b)) = (name32, name64) {
                if a != b {
                    diagnostics.debug(format_args!(
                        "Assembly {} of '{}' is '{}' by its 32-bit hash but '{}' by its 64-bit hash",
                        i, blob.entry, a, b
                    ));
                }
            }

            let name = name32
                .or(name64)
                .or_else(|| by_slot.get(&(blob.store_id, i as u32)).copied())
                .unwrap_or_default();
            if name.is_empty() {
                diagnostics.debug(format_args!(
                    "Assembly {} of '{}' did not match any assembly name in the manifest",
                    i, blob.entry
                ));
            }

            let [data_offset, data_size, debug_offset, debug_size, config_offset, config_size] = *fields;
            let entry = StoreEntry {
                name: name.to_string(),
                store: blob.entry.clone(),
                arch: blob.arch,
                is_64bit: blob.arch.map_or(false, TargetArch::is_64bit),
                ignore: false,
                mapping_index: mapping.unwrap_or_default(),
                data_offset,
                data_size,
                debug_offset,
                debug_size,
                config_offset,
                config_size,
                index_entries,
            };
            check_ranges(&blob.entry, &entry, blob.data.len())?;
            entries.push(entry);
        }

        partitions.push(Partition::new(blob.entry, blob.data, entries));
    }

    Ok(partitions)
}
