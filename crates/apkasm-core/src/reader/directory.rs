//! Directory layout: one archive entry per assembly.

use super::{read_entry, unwrap_payload};
use crate::arch::TargetArch;
use crate::compression;
use crate::diagnostics::Diagnostics;
use crate::error::{Error, Result};
use crate::pe::PeReader;
use bytes::Bytes;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use zip::ZipArchive;

/// Resolves assemblies stored as individual archive entries
///
/// Entries are probed in this order, first hit wins:
///
/// 1. `assemblies/{name}`
/// 2. `assemblies/{abi}/{name}` for each configured ABI
/// 3. `lib/{abi}/lib_{name}.so` for each configured ABI, an ELF shared object
///    wrapping the assembly in its `payload` section
///
/// Satellite assemblies are named `{culture}/{file}`; in the `lib/` layout
/// they live at `lib/{abi}/lib-{culture}_{file}.so`. A leading ABI segment
/// (`{abi}/{file}`) pins the `lib/` lookup to that ABI.
///
/// Reading an entry needs exclusive access to the archive, so concurrent
/// lookups take turns while the entry bytes are read. Decompression and PE
/// parsing run outside the lock.
#[derive(Debug)]
pub struct DirectoryReader {
    archive: Mutex<ZipArchive<File>>,
    abis: Vec<String>,
    check_loose_files: bool,
    diagnostics: Diagnostics,
}

impl DirectoryReader {
    pub(crate) fn new(
        archive: ZipArchive<File>,
        abis: Vec<String>,
        check_loose_files: bool,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            archive: Mutex::new(archive),
            abis,
            check_loose_files,
            diagnostics,
        }
    }

    /// Archive entry names probed for `name`, in order.
    pub fn candidate_paths(&self, name: &str) -> Vec<String> {
        let mut paths = Vec::with_capacity(1 + 2 * self.abis.len());
        paths.push(format!("assemblies/{}", name));
        paths.extend(self.abis.iter().map(|abi| format!("assemblies/{}/{}", abi, name)));

        match name.split_once('/') {
            None => {
                paths.extend(self.abis.iter().map(|abi| format!("lib/{}/lib_{}.so", abi, name)));
            }
            Some((abi, file)) if TargetArch::from_abi(abi).is_some() && !file.contains('/') => {
                paths.push(format!("lib/{}/lib_{}.so", abi, file));
            }
            Some((culture, file)) if !culture.is_empty() && !file.is_empty() && !file.contains('/') => {
                paths.extend(
                    self.abis
                        .iter()
                        .map(|abi| format!("lib/{}/lib-{}_{}.so", abi, culture, file)),
                );
            }
            Some(_) => {}
        }
        paths
    }

    /// Resolves `name` to a decoded image.
    pub fn try_read(&self, name: &str) -> Result<Option<PeReader>> {
        if self.check_loose_files {
            let path = Path::new(name);
            if path.is_file() {
                let data = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
                self.diagnostics
                    .debug(format_args!("Read assembly {} from the file system", name));
                return decode(name, Bytes::from(data)).map(Some);
            }
        }

        for entry in self.candidate_paths(name) {
            let Some(data) = self.read_locked(&entry)? else {
                continue;
            };

            self.diagnostics
                .debug(format_args!("Resolved assembly {} in the APK at {}", name, entry));
            let data = unwrap_payload(&entry, data, &self.diagnostics);
            return decode(name, data).map(Some);
        }

        self.diagnostics
            .debug(format_args!("Couldn't find assembly {} in the APK", name));
        Ok(None)
    }

    fn read_locked(&self, entry: &str) -> Result<Option<Bytes>> {
        let mut archive = self
            .archive
            .lock()
            .map_err(|_| Error::internal("archive lock poisoned"))?;
        read_entry(&mut *archive, entry)
    }
}

fn decode(name: &str, data: Bytes) -> Result<PeReader> {
    let image = compression::decompress_bytes(data)?;
    PeReader::parse(name, image)
}
