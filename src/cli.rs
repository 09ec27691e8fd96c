use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rtar")]
#[command(about = "Optionally encrypted tar archives for backup and restore")]
#[command(author, version, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Archive a directory tree
    Create {
        /// The archive file to write
        archive: PathBuf,

        /// The directory to archive
        source: PathBuf,

        /// Glob patterns to exclude, repeatable
        #[arg(short = 'x', long = "exclude", value_name = "PATTERN")]
        excludes: Vec<String>,

        /// AES key as hex (32, 48 or 64 hex chars)
        #[arg(short, long, value_name = "HEX")]
        key: Option<String>,

        /// Skip gzip compression
        #[arg(long)]
        plain: bool,
    },

    /// Extract an archive into a directory
    Extract {
        /// The archive file to read
        archive: PathBuf,

        /// The directory to extract into
        dest: PathBuf,

        /// AES key as hex (32, 48 or 64 hex chars)
        #[arg(short, long, value_name = "HEX")]
        key: Option<String>,

        /// The archive is not gzip compressed
        #[arg(long)]
        plain: bool,
    },

    /// Show the on disk size of an archive
    Info {
        /// The archive file to inspect
        archive: PathBuf,
    },
}
