//! Fixture builders shared by the integration tests.

#![allow(dead_code)]

use apkasm_core::compression::COMPRESSED_DATA_MAGIC;
use apkasm_core::reader::{name_hash, HashAlgorithm, STORE_MAGIC};
use apkasm_core::{AssemblyReader, ReaderConfig};
use std::fs::File;
use std::io::{Seek, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const ARM64: &str = "arm64-v8a";
pub const X86: &str = "x86";

/// Store version words
pub const V3_ARM64: u32 = 0x8001_0003;
pub const V2_ARM64: u32 = 0x8001_0002;
pub const V3_X86: u32 = 0x0004_0003;

pub fn store_entry(abi: &str) -> String {
    format!("lib/{abi}/libassemblies.{abi}.blob.so")
}

fn put16(out: &mut [u8], at: usize, v: u16) {
    out[at..at + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(out: &mut [u8], at: usize, v: u32) {
    out[at..at + 4].copy_from_slice(&v.to_le_bytes());
}

fn put64(out: &mut [u8], at: usize, v: u64) {
    out[at..at + 8].copy_from_slice(&v.to_le_bytes());
}

/// A PE32 DLL with CLI metadata and one CodeView debug entry naming `pdb`.
pub fn pe_image(pdb: &str) -> Vec<u8> {
    let mut out = vec![0u8; 0x400];
    out[0..2].copy_from_slice(b"MZ");
    put32(&mut out, 0x3C, 0x80);
    out[0x80..0x84].copy_from_slice(b"PE\0\0");
    put16(&mut out, 0x84, 0x14C);
    put16(&mut out, 0x86, 1);
    put16(&mut out, 0x94, 0xE0);
    put16(&mut out, 0x96, 0x2102);

    let opt = 0x98;
    put16(&mut out, opt, 0x10B);
    put32(&mut out, opt + 56, 0x4000);
    put32(&mut out, opt + 92, 16);
    let dirs = opt + 96;
    put32(&mut out, dirs + 6 * 8, 0x2100);
    put32(&mut out, dirs + 6 * 8 + 4, 28);
    put32(&mut out, dirs + 14 * 8, 0x2000);
    put32(&mut out, dirs + 14 * 8 + 4, 72);

    let sec = opt + 0xE0;
    out[sec..sec + 5].copy_from_slice(b".text");
    put32(&mut out, sec + 8, 0x200);
    put32(&mut out, sec + 12, 0x2000);
    put32(&mut out, sec + 16, 0x200);
    put32(&mut out, sec + 20, 0x200);

    put32(&mut out, 0x200, 72);
    put32(&mut out, 0x208, 0x2050);
    put32(&mut out, 0x20C, 0x40);
    out[0x250..0x254].copy_from_slice(b"BSJB");

    let path = format!("{}\0", pdb);
    assert!(path.len() <= 0x400 - 0x338, "pdb path too long for the fixture");
    put32(&mut out, 0x300 + 12, 2);
    put32(&mut out, 0x300 + 16, (24 + path.len()) as u32);
    put32(&mut out, 0x300 + 24, 0x320);

    out[0x320..0x324].copy_from_slice(b"RSDS");
    for (i, b) in out[0x324..0x334].iter_mut().enumerate() {
        *b = 0xA0 + i as u8;
    }
    put32(&mut out, 0x334, 1);
    out[0x338..0x338 + path.len()].copy_from_slice(path.as_bytes());
    out
}

/// Wraps `plain` in the XALZ envelope.
pub fn compress(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&COMPRESSED_DATA_MAGIC.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(plain.len() as i32).to_le_bytes());
    out.extend_from_slice(&lz4_flex::block::compress(plain));
    out
}

/// An assembly store holding `items`, each indexed by the hash of its name
/// and of its name without extension.
pub fn store(version: u32, items: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let is_64bit = version & 0x8000_0000 != 0;
    let has_ignore = version & 0xFFFF >= 3;

    let mut index = Vec::new();
    let mut index_count = 0u32;
    for (i, (name, _)) in items.iter().enumerate() {
        let name: &str = name;
        let stem = name.strip_suffix(".dll").unwrap_or(name);
        for key in [name, stem] {
            let hash = name_hash(key, is_64bit);
            if is_64bit {
                index.extend_from_slice(&hash.to_le_bytes());
            } else {
                index.extend_from_slice(&(hash as u32).to_le_bytes());
            }
            index.extend_from_slice(&(i as u32).to_le_bytes());
            if has_ignore {
                index.push(0);
            }
            index_count += 1;
        }
    }

    let names_len: usize = items.iter().map(|(name, _)| 4 + name.len()).sum();
    let mut data_offset = 20 + index.len() + items.len() * 28 + names_len;

    let mut out = Vec::new();
    for word in [STORE_MAGIC, version, items.len() as u32, index_count, index.len() as u32] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    out.extend_from_slice(&index);
    for (i, (_, data)) in items.iter().enumerate() {
        for word in [i as u32, data_offset as u32, data.len() as u32, 0, 0, 0, 0] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        data_offset += data.len();
    }
    for (name, _) in items {
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(name.as_bytes());
    }
    for (_, data) in items {
        out.extend_from_slice(data);
    }
    out
}

/// A first-generation store blob. `index` rows are `(name, store id, local
/// index)` and only land in the blob of store 0.
pub fn legacy_blob(store_id: u32, images: &[Vec<u8>], index: &[(&str, u32, u32)]) -> Vec<u8> {
    let global = if store_id == 0 { index.len() } else { 0 };
    let mut data_offset = 20 + images.len() * 24 + global * 40;

    let mut out = Vec::new();
    for word in [STORE_MAGIC, 1, images.len() as u32, global as u32, store_id] {
        out.extend_from_slice(&word.to_le_bytes());
    }
    for image in images {
        for word in [data_offset as u32, image.len() as u32, 0, 0, 0, 0] {
            out.extend_from_slice(&word.to_le_bytes());
        }
        data_offset += image.len();
    }
    if store_id == 0 {
        for algorithm in [HashAlgorithm::Xxh32, HashAlgorithm::Xxh64] {
            for (mapping, &(name, store, local)) in index.iter().enumerate() {
                out.extend_from_slice(&algorithm.hash(name).to_le_bytes());
                for word in [mapping as u32, local, store] {
                    out.extend_from_slice(&word.to_le_bytes());
                }
            }
        }
    }
    for image in images {
        out.extend_from_slice(image);
    }
    out
}

/// The text manifest listing `rows` as `(name, store id, local index)`.
pub fn legacy_manifest(rows: &[(&str, u32, u32)]) -> Vec<u8> {
    let mut text = String::from("Hash 32     Hash 64             Blob ID  Blob idx  Name\n");
    for &(name, store, local) in rows {
        text.push_str(&format!(
            "0x{:08x}  0x{:016x}  {:03}      {:04}      {}\n",
            HashAlgorithm::Xxh32.hash(name),
            HashAlgorithm::Xxh64.hash(name),
            store,
            local,
            name
        ));
    }
    text.into_bytes()
}

/// A little-endian ELF64 shared object for arm64 with a GNU build-id note
/// and `payload` as its `payload` section.
pub fn elf_shared_object(payload: &[u8], build_id: &[u8]) -> Vec<u8> {
    let mut note = Vec::new();
    note.extend_from_slice(&4u32.to_le_bytes());
    note.extend_from_slice(&(build_id.len() as u32).to_le_bytes());
    note.extend_from_slice(&3u32.to_le_bytes());
    note.extend_from_slice(b"GNU\0");
    note.extend_from_slice(build_id);
    while note.len() % 4 != 0 {
        note.push(0);
    }

    let shstrtab = b"\0.shstrtab\0payload\0";
    let ph_off = 64usize;
    let note_off = ph_off + 56;
    let payload_off = (note_off + note.len() + 15) & !15;
    let strtab_off = payload_off + payload.len();
    let sh_off = (strtab_off + shstrtab.len() + 7) & !7;

    let mut out = vec![0u8; sh_off + 3 * 64];
    out[0..4].copy_from_slice(b"\x7fELF");
    out[4] = 2;
    out[5] = 1;
    out[6] = 1;
    put16(&mut out, 16, 3);
    put16(&mut out, 18, 183);
    put32(&mut out, 20, 1);
    put64(&mut out, 32, ph_off as u64);
    put64(&mut out, 40, sh_off as u64);
    put16(&mut out, 52, 64);
    put16(&mut out, 54, 56);
    put16(&mut out, 56, 1);
    put16(&mut out, 58, 64);
    put16(&mut out, 60, 3);
    put16(&mut out, 62, 1);

    put32(&mut out, ph_off, 4);
    put64(&mut out, ph_off + 8, note_off as u64);
    put64(&mut out, ph_off + 32, note.len() as u64);

    out[note_off..note_off + note.len()].copy_from_slice(&note);
    out[payload_off..strtab_off].copy_from_slice(payload);
    out[strtab_off..strtab_off + shstrtab.len()].copy_from_slice(shstrtab);

    let sh1 = sh_off + 64;
    put32(&mut out, sh1, 1);
    put32(&mut out, sh1 + 4, 3);
    put64(&mut out, sh1 + 24, strtab_off as u64);
    put64(&mut out, sh1 + 32, shstrtab.len() as u64);

    let sh2 = sh_off + 128;
    put32(&mut out, sh2, 11);
    put32(&mut out, sh2 + 4, 1);
    put64(&mut out, sh2 + 24, payload_off as u64);
    put64(&mut out, sh2 + 32, payload.len() as u64);
    out
}

/// Writes a zip archive holding `entries`, stored uncompressed like Android
/// packages store native libraries.
pub fn write_apk(entries: &[(String, Vec<u8>)]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    write_zip(file.as_file_mut(), entries);
    file
}

/// Like [`write_apk`], but at a fixed path.
pub fn write_apk_at(path: &Path, entries: &[(String, Vec<u8>)]) {
    let mut file = File::create(path).unwrap();
    write_zip(&mut file, entries);
}

fn write_zip<W: Write + Seek>(out: W, entries: &[(String, Vec<u8>)]) {
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
    writer
        .start_file("AndroidManifest.xml", options)
        .unwrap();
    writer.write_all(b"<manifest/>").unwrap();
    for (name, data) in entries {
        writer.start_file(name.as_str(), options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

pub fn open(apk: &NamedTempFile, abis: &[&str]) -> AssemblyReader {
    open_path(apk.path(), abis)
}

pub fn open_path(path: &Path, abis: &[&str]) -> AssemblyReader {
    let config = ReaderConfig::new()
        .supported_abis(abis.iter().copied())
        .check_loose_files(false);
    AssemblyReader::open(path, config).unwrap()
}
