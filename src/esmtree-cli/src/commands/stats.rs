//! Record statistics command

use anyhow::{bail, Context, Result};
use esmtree::{tag, Dispatcher, HandlerEnv, HandlerRegistry, MemoryLock, MetadataFormat};
use serde::Serialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub description: Option<&'static str>,
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub records: u64,
    pub bytes: u64,
    pub truncated: bool,
    pub types: Vec<TagCount>,
    pub failures: Vec<String>,
}

/// Handle the stats command
pub fn handle(input: &Path, json: bool) -> Result<()> {
    let stats = collect(input)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print_stats(input, &stats);
    }

    if !stats.failures.is_empty() {
        bail!("{} framing error(s) in {}", stats.failures.len(), input.display());
    }
    Ok(())
}

/// Scan `input` with no handlers registered, so nothing is written
pub fn collect(input: &Path) -> Result<Stats> {
    let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;

    let registry = HandlerRegistry::new();
    let env = HandlerEnv::new(PathBuf::new(), MetadataFormat::default());
    let report =
        Dispatcher::new(&registry, env).run(BufReader::new(file), &mut MemoryLock::default());

    let mut types: Vec<TagCount> = report
        .counts
        .iter()
        .map(|(code, count)| TagCount {
            tag: code.to_string(),
            description: tag::describe(*code),
            count: *count,
        })
        .collect();
    types.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));

    Ok(Stats {
        records: report.records,
        bytes: report.bytes,
        truncated: report.truncated,
        types,
        failures: report.failures.iter().map(ToString::to_string).collect(),
    })
}

fn print_stats(input: &Path, stats: &Stats) {
    println!("File: {}", input.display());
    println!("Records: {}", stats.records);
    println!("Bytes: {}", stats.bytes);

    println!("\n=== Types ({}) ===", stats.types.len());
    for entry in &stats.types {
        println!(
            "  {:6} {:24} {}",
            entry.tag,
            entry.description.unwrap_or("-"),
            entry.count
        );
    }

    if !stats.failures.is_empty() {
        println!("\n=== Errors ===");
        for failure in &stats.failures {
            println!("  {}", failure);
        }
    }
}
