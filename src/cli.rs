use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub(crate) command: KegCommand,
}

#[derive(Debug, Subcommand, Clone, PartialEq)]
pub enum KegCommand {
    /// Install a formula: resolve a bottle or build from source, verify,
    /// install into the versioned prefix and run the smoke test
    Install {
        /// Path to the formula TOML file
        formula: PathBuf,
        /// Installation prefix (defaults to the per-user cellar)
        #[clap(long)]
        prefix: Option<PathBuf>,
        /// Staging directory for fetched artifacts
        #[clap(long)]
        staging: Option<PathBuf>,
        /// Resolve for this platform key instead of the running host,
        /// e.g. `linux-x86_64` or `macos-14-arm64`
        #[clap(long)]
        platform: Option<String>,
        /// Keep the build sandbox after the run for debugging
        #[clap(long)]
        keep_sandbox: bool,
        /// Suppress stage progress output
        #[clap(short, long)]
        quiet: bool,
    },
    /// Remove an installed formula and its receipt
    Uninstall {
        name: String,
        #[clap(long)]
        prefix: Option<PathBuf>,
    },
    /// List installed formulas with their receipts
    List {
        #[clap(long)]
        prefix: Option<PathBuf>,
        #[clap(short, long)]
        verbose: bool,
    },
    /// Print the current install directory of a formula
    Which {
        name: String,
        #[clap(long)]
        prefix: Option<PathBuf>,
    },
    /// Print a formula's metadata and bottle table without installing
    Info {
        formula: PathBuf,
    },
}
