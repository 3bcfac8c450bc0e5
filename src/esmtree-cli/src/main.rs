mod cli;
mod commands;
mod config;
mod dispatch;
mod file_utils;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cli::Cli;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dispatch::dispatch(cli.command)
}

/// Install the stderr subscriber; `RUST_LOG` wins over `-v`
fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "esmtree=info,esmtree_cli=info",
        1 => "esmtree=debug,esmtree_cli=debug",
        _ => "esmtree=trace,esmtree_cli=trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
