//! Core CLI definitions

use clap::{ArgAction, Parser, Subcommand};
use esmtree::MetadataFormat;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "esmtree")]
#[command(about = "TES3 master/plugin to directory tree converter", long_about = None)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert an .esm/.esp file into one directory per record
    #[command(visible_alias = "x")]
    Convert {
        /// Path to the .esm or .esp file
        input: PathBuf,

        /// Output directory (uses configured default, then the input's name)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Metadata syntax: json or yaml
        #[arg(short, long)]
        format: Option<MetadataFormat>,

        /// Continue past failed records
        #[arg(long, conflicts_with = "fail_fast")]
        keep_going: bool,

        /// Stop at the first failed record
        #[arg(long)]
        fail_fast: bool,
    },

    /// Count records per type without writing anything
    Stats {
        /// Path to the .esm or .esp file
        input: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a converted tree for incomplete or missing records
    Verify {
        /// Output directory of an earlier conversion
        dir: PathBuf,
    },

    /// Configure default settings
    #[command(visible_alias = "c")]
    Configure {
        /// Set default output directory
        #[arg(long)]
        output: Option<PathBuf>,

        /// Set default metadata syntax
        #[arg(long)]
        format: Option<MetadataFormat>,

        /// Set whether conversions continue past failed records
        #[arg(long)]
        keep_going: Option<bool>,

        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}
