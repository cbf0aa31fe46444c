//! jpak-mount: Mount JPAK packages as read-only filesystems.
//!
//! # Usage
//!
//! ```bash
//! # Mount a package (blocks until unmounted)
//! jpak-mount mount assets.jpak /mnt/assets
//!
//! # Print the entry index
//! jpak-mount list assets.jpak
//!
//! # Build a package from a directory
//! jpak-mount pack ./assets assets.jpak
//! ```

use clap::{Parser, Subcommand};
use env_logger::Env;
use jpak_format::{DirectoryEntry, JpakArchive, JpakBuilder};
use jpak_fs::{fuse, MountConfig};
use log::{error, info};
use std::path::PathBuf;
use std::process;

/// Mount JPAK packages as read-only filesystems.
#[derive(Parser, Debug)]
#[command(name = "jpak-mount")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mount a package at a directory (blocks until unmounted)
    Mount {
        /// Path to the .jpak package
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Directory to mount on
        #[arg(value_name = "MOUNTPOINT")]
        mount_point: PathBuf,

        /// TOML mount configuration
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },

    /// Print the directories and files of a package
    List {
        /// Path to the .jpak package
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,
    },

    /// Build a package from a directory tree
    Pack {
        /// Directory to pack
        #[arg(value_name = "DIR")]
        dir: PathBuf,

        /// Output package path
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,
    },
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_timestamp_millis()
        .init();

    match args.command {
        Command::Mount {
            archive,
            mount_point,
            config,
        } => run_mount(archive, mount_point, config),
        Command::List { archive } => run_list(archive),
        Command::Pack { dir, output } => run_pack(dir, output),
    }
}

fn run_mount(archive: PathBuf, mount_point: PathBuf, config: Option<PathBuf>) {
    // Validate archive path
    if !archive.is_file() {
        error!("Archive not found: {}", archive.display());
        process::exit(1);
    }

    if !mount_point.is_dir() {
        error!("Mount point is not a directory: {}", mount_point.display());
        process::exit(1);
    }

    let config = match config {
        Some(path) => match MountConfig::from_toml_file(&path) {
            Ok(c) => c,
            Err(e) => {
                error!("Failed to read config {}: {}", path.display(), e);
                process::exit(1);
            }
        },
        None => MountConfig::default(),
    };

    info!(
        "Mounting {} at {}",
        archive.display(),
        mount_point.display()
    );
    info!("To stop it, run: fusermount -u {}", mount_point.display());

    if let Err(e) = fuse::mount(&archive, &mount_point, &config) {
        error!("Mount error: {}", e);
        process::exit(1);
    }
}

fn run_list(archive: PathBuf) {
    let archive = match JpakArchive::open(&archive) {
        Ok(a) => a,
        Err(e) => {
            error!("Failed to open archive: {}", e);
            process::exit(1);
        }
    };

    print_tree(archive.root(), "/", 0);
    info!(
        "{} entries, {} bytes of content",
        archive.entry_count(),
        archive.total_size()
    );
}

fn print_tree(dir: &DirectoryEntry, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{}{}", indent, name);
    for child in &dir.directories {
        print_tree(child, &format!("{}/", child.name), depth + 1);
    }
    for file in &dir.files {
        println!("{}  {} ({} bytes)", indent, file.name, file.size);
    }
}

fn run_pack(dir: PathBuf, output: PathBuf) {
    if !dir.is_dir() {
        error!("Not a directory: {}", dir.display());
        process::exit(1);
    }

    let result = JpakBuilder::from_dir(&dir).and_then(|builder| builder.write_to(&output));
    match result {
        Ok(()) => info!("Wrote {}", output.display()),
        Err(e) => {
            error!("Failed to pack {}: {}", dir.display(), e);
            process::exit(1);
        }
    }
}
