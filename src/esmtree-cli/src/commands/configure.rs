//! Configuration command handlers
//!
//! Handles the `configure` subcommand for setting up esmtree CLI defaults.

use crate::config::Config;
use anyhow::Result;
use esmtree::MetadataFormat;
use std::path::PathBuf;

/// Handle the configure command
///
/// # Arguments
/// * `output` - Optional default output directory
/// * `format` - Optional default metadata syntax
/// * `keep_going` - Optional default failure policy
/// * `show` - If true, show current configuration
pub fn handle(
    output: Option<PathBuf>,
    format: Option<MetadataFormat>,
    keep_going: Option<bool>,
    show: bool,
) -> Result<()> {
    let mut config = Config::load()?;

    if show {
        show_config(&config);
        return Ok(());
    }

    if apply(&mut config, output, format, keep_going) {
        config.save()?;
        show_config(&config);
    } else {
        show_usage();
    }

    Ok(())
}

/// Apply any provided settings; false when nothing was given
fn apply(
    config: &mut Config,
    output: Option<PathBuf>,
    format: Option<MetadataFormat>,
    keep_going: Option<bool>,
) -> bool {
    let changed = output.is_some() || format.is_some() || keep_going.is_some();

    if let Some(dir) = output {
        config.output_dir = Some(dir);
    }
    if let Some(format) = format {
        config.format = Some(format);
    }
    if let Some(keep_going) = keep_going {
        config.keep_going = Some(keep_going);
    }

    changed
}

/// Display current configuration
fn show_config(config: &Config) {
    match &config.output_dir {
        Some(dir) => println!("Output directory: {}", dir.display()),
        None => println!("Output directory: (next to input name)"),
    }
    println!("Format: {}", config.format());
    println!("Keep going: {}", config.keep_going.unwrap_or(true));

    if let Ok(path) = Config::config_path() {
        println!("Config file: {}", path.display());
    }
}

/// Show usage help for the configure command
fn show_usage() {
    println!("Usage: esmtree configure --output DIR --format json|yaml --keep-going true|false");
    println!("   or: esmtree configure --show");
}
