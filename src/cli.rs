use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "pkgrepo", version, about = "Package repository index and metadata cache")]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, global = true, env = "PKGREPO_CONFIG")]
    pub config: Option<PathBuf>,
    /// Only operate on this repository.
    #[arg(short, long, global = true)]
    pub repo: Option<String>,
    /// Read everything, write nothing to the cache or the repository.
    #[arg(long, global = true)]
    pub dry_run: bool,
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register new or changed package files and extract their metadata.
    Resync,
    /// Pull from each repository's upstream, then resync.
    Mirror,
    /// Remove superseded package versions.
    Prune {
        /// Versions to keep per package; defaults to the configured retention.
        #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
        keep: Option<u32>,
    },
    /// List categories.
    Categories,
    /// List package files in a category (all packages by default).
    List { category: Option<String> },
    /// Print the package summary, or write it compressed.
    Summary {
        /// Compress as `gz` or `bz2`.
        #[arg(short, long)]
        format: Option<String>,
        /// Write to this file instead of standard output.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Remove package files from the index and from disk.
    Remove {
        #[arg(required = true)]
        filenames: Vec<String>,
    },
    /// Add a package file to a repository as if it had been uploaded.
    Upload {
        file: PathBuf,
        /// Name to store the file under; defaults to its current name.
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long, env = "PKGREPO_UPLOAD_TOKEN", hide_env_values = true)]
        token: Option<String>,
    },
    /// Show record counts.
    Stats,
}
