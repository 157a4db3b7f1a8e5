//! apkasm - Inspect .NET assemblies packed inside Android application archives
//!
//! This tool opens APK/AAB files, resolves managed assemblies in either
//! packaging layout, and reports PE and debug information for them. It also
//! dumps ELF notes (GNU build ids) of native libraries.

use anyhow::{bail, Context, Result};
use apkasm_core::elf::{debug_id_from_build_id, is_elf};
use apkasm_core::{AssemblyReader, ElfFile, PeReader, ReaderConfig, Strategy};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Inspect .NET assemblies and native build ids in Android packages
#[derive(Parser, Debug)]
#[command(name = "apkasm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show which layout an archive uses and list store contents
    Info {
        /// APK or AAB file
        archive: PathBuf,

        #[command(flatten)]
        abis: AbiArgs,
    },

    /// Decode one assembly and print its PE summary
    Read {
        /// APK or AAB file
        archive: PathBuf,

        /// Assembly name, e.g. Mono.Android.dll
        name: String,

        #[command(flatten)]
        abis: AbiArgs,

        /// Write the decoded image to this path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing output file
        #[arg(long)]
        force: bool,
    },

    /// Print ELF notes and GNU build ids of native libraries
    Notes {
        #[command(flatten)]
        input: InputMode,
    },
}

#[derive(Args, Debug)]
struct AbiArgs {
    /// ABIs to consider, most preferred first (repeatable)
    #[arg(
        long = "abi",
        value_name = "ABI",
        default_values_t = ["arm64-v8a".to_string(), "armeabi-v7a".to_string(), "x86_64".to_string(), "x86".to_string()]
    )]
    abis: Vec<String>,
}

impl AbiArgs {
    fn config(&self) -> ReaderConfig {
        ReaderConfig::new()
            .supported_abis(self.abis.iter().cloned())
            .check_loose_files(false)
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single ELF file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of ELF files
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    match &cli.command {
        Command::Info { archive, abis } => show_info(archive, abis),
        Command::Read {
            archive,
            name,
            abis,
            output,
            force,
        } => read_assembly(archive, name, abis, output.as_deref(), *force),
        Command::Notes { input } => {
            if let Some(ref file) = input.file {
                notes_single_file(file)
            } else if let Some(ref directory) = input.directory {
                notes_directory(directory)
            } else {
                bail!("Either --file or --directory must be specified")
            }
        }
    }
}

fn open_archive(archive: &Path, abis: &AbiArgs) -> Result<AssemblyReader> {
    if !archive.is_file() {
        bail!("Input file does not exist: {}", archive.display());
    }
    AssemblyReader::open(archive, abis.config())
        .with_context(|| format!("Failed to open archive: {}", archive.display()))
}

/// Print the selected layout and, for stores, every resolvable assembly
fn show_info(archive: &Path, abis: &AbiArgs) -> Result<()> {
    let reader = open_archive(archive, abis)?;
    println!("{}: {} layout", archive.display(), reader.kind());

    match reader.strategy() {
        Strategy::Store(store) => {
            for entry in store.stores() {
                println!("store {}", entry);
            }
            for entry in store.entries() {
                let arch = entry.arch.map_or_else(|| "shared".to_string(), |a| a.to_string());
                println!(
                    "  {:<48} {:<12} {:>10} bytes  debug {:>8}  config {:>8}",
                    entry.name, arch, entry.data_size, entry.debug_size, entry.config_size
                );
            }
            info!("{} assemblies", store.entries().count());
        }
        Strategy::Directory(directory) => {
            debug!(
                "Probe order for X.dll: {}",
                directory.candidate_paths("X.dll").join(", ")
            );
        }
    }

    Ok(())
}

/// Short content hash (first 16 hex chars of blake3)
fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex()[..16].to_string()
}

/// Decode one assembly and print a summary
fn read_assembly(
    archive: &Path,
    name: &str,
    abis: &AbiArgs,
    output: Option<&Path>,
    force: bool,
) -> Result<()> {
    let reader = open_archive(archive, abis)?;
    let Some(image) = reader
        .try_read(name)
        .with_context(|| format!("Failed to read {} from {}", name, archive.display()))?
    else {
        bail!("{} not found in {} ({} layout)", name, archive.display(), reader.kind());
    };

    print_summary(&image)?;

    if let Some(output) = output {
        write_image(output, image.as_bytes(), force)?;
        println!("Wrote {}", output.display());
    }

    Ok(())
}

fn print_summary(image: &PeReader) -> Result<()> {
    let headers = image.headers();
    println!("name          {}", image.name());
    println!("size          {} bytes", image.as_bytes().len());
    println!("blake3        {}", content_hash(image.as_bytes()));
    println!("dll           {}", headers.is_dll());
    println!("pe32+         {}", headers.is_pe32_plus);
    println!("image size    {:#x}", headers.size_of_image);
    println!("metadata      {} bytes", headers.metadata_size);

    let debug = image
        .read_debug_directory()
        .with_context(|| format!("Failed to read debug directory of {}", image.name()))?;
    println!("debug entries {}", debug.len());
    for entry in &debug {
        println!(
            "  {:?} v{}.{} ({} bytes at {:#x})",
            entry.kind, entry.major_version, entry.minor_version, entry.data_size, entry.data_pointer
        );
    }

    if let Some(codeview) = image.codeview()? {
        println!("pdb           {}", codeview.path);
        println!("debug id      {}-{:x}", codeview.debug_id(), codeview.age);
    }

    Ok(())
}

/// Write the decoded image, refusing to clobber unless forced
fn write_image(output_path: &Path, data: &[u8], force: bool) -> Result<()> {
    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!(
            "File already exists: {} (use --force to overwrite)",
            output_path.display()
        );
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;
    file.write_all(data)
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

fn notes_single_file(file: &Path) -> Result<()> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    print_notes(file)
}

/// Walk a directory and dump the notes of every ELF file in it
fn notes_directory(directory: &Path) -> Result<()> {
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());
    let mut processed = 0;

    for entry in WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        // Skip hidden files
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with('.'))
            .unwrap_or(false)
        {
            continue;
        }

        if !has_elf_magic(path) {
            trace!("Skipping non-ELF: {}", path.display());
            continue;
        }

        if let Err(e) = print_notes(path) {
            // Log error but continue with other files
            warn!("Error processing {}: {:#}", path.display(), e);
        }
        processed += 1;
    }

    info!("Processed {} ELF files", processed);
    Ok(())
}

fn has_elf_magic(path: &Path) -> bool {
    use std::io::Read;

    let mut magic = [0u8; 4];
    fs::File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|()| is_elf(&magic))
        .unwrap_or(false)
}

fn print_notes(path: &Path) -> Result<()> {
    trace!("Reading {}", path.display());
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    let elf = ElfFile::parse(&data).with_context(|| format!("Failed to parse ELF: {}", path.display()))?;
    let segments = elf
        .notes()
        .with_context(|| format!("Failed to walk notes of {}", path.display()))?;

    println!("{}", path.display());
    for segment in &segments {
        for note in segment.notes() {
            println!(
                "  {:<8} type {:<4} {} bytes at {:#x}",
                note.name,
                note.note_type,
                note.description.len(),
                note.offset
            );
            if note.is_gnu_build_id() {
                println!("    build id {}", hex(&note.description));
                println!("    debug id {}", debug_id_from_build_id(&note.description));
            }
        }
    }

    Ok(())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
