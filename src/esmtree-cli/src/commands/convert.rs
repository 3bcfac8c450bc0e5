//! Archive conversion command
//!
//! Streams an archive through the dispatcher into an output tree and writes
//! the `.lock` index alongside it.

use anyhow::{bail, Context, Result};
use esmtree::{
    Dispatcher, HandlerEnv, HandlerRegistry, LockFile, MetadataFormat, OnError, Report,
};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Resolved settings for one conversion
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub output: PathBuf,
    pub format: MetadataFormat,
    pub on_error: OnError,
}

impl Settings {
    /// Merge CLI flags over the stored configuration
    pub fn resolve(
        config: &Config,
        input: &Path,
        output: Option<PathBuf>,
        format: Option<MetadataFormat>,
        on_error: Option<OnError>,
    ) -> Self {
        let output = output.unwrap_or_else(|| {
            let name = input
                .file_stem()
                .map(|s| s.to_os_string())
                .unwrap_or_else(|| "esmtree-out".into());
            match &config.output_dir {
                Some(dir) => dir.join(name),
                None => PathBuf::from(name),
            }
        });

        Self {
            output,
            format: format.unwrap_or_else(|| config.format()),
            on_error: on_error.unwrap_or_else(|| config.on_error()),
        }
    }
}

/// Handle the convert command
pub fn handle(
    input: &Path,
    output: Option<PathBuf>,
    format: Option<MetadataFormat>,
    keep_going: bool,
    fail_fast: bool,
) -> Result<()> {
    let config = Config::load()?;
    let policy = if fail_fast {
        Some(OnError::Abort)
    } else if keep_going {
        Some(OnError::Continue)
    } else {
        None
    };
    let settings = Settings::resolve(&config, input, output, format, policy);

    let report = convert(input, &settings)?;
    print_summary(&report, &settings);

    if !report.is_success() {
        bail!(
            "{} record(s) failed; see {}",
            report.failures.len(),
            settings.output.display()
        );
    }

    Ok(())
}

/// Run the pipeline over `input`
pub fn convert(input: &Path, settings: &Settings) -> Result<Report> {
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;

    let mut lock = LockFile::create(&settings.output)
        .with_context(|| format!("Failed to create lock in {}", settings.output.display()))?;

    tracing::info!(
        input = %input.display(),
        output = %settings.output.display(),
        format = %settings.format,
        "converting"
    );

    let registry = HandlerRegistry::with_defaults();
    let env = HandlerEnv::new(&settings.output, settings.format);
    let report = Dispatcher::new(&registry, env)
        .on_error(settings.on_error)
        .run(BufReader::new(file), &mut lock);

    tracing::info!(
        records = report.records,
        converted = report.converted,
        failed = report.failures.len(),
        "conversion finished"
    );

    Ok(report)
}

fn print_summary(report: &Report, settings: &Settings) {
    println!("Output: {}", settings.output.display());
    println!("Records: {}", report.records);
    println!("Converted: {}", report.converted);
    println!("Skipped (no handler): {}", report.skipped);

    if report.aborted {
        println!("Stopped at first failure (--fail-fast)");
    }
    if report.truncated {
        println!("Archive ended mid-record after {} bytes", report.bytes);
    }

    if !report.failures.is_empty() {
        println!("\n=== Failures ({}) ===", report.failures.len());
        for failure in &report.failures {
            println!("  {}", failure);
        }
    }
}
