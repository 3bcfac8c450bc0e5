//! Command dispatch

use anyhow::Result;

use crate::cli::Commands;
use crate::commands;

pub fn dispatch(command: Commands) -> Result<()> {
    match command {
        Commands::Convert {
            input,
            output,
            format,
            keep_going,
            fail_fast,
        } => commands::convert::handle(&input, output, format, keep_going, fail_fast),

        Commands::Stats { input, json } => commands::stats::handle(&input, json),

        Commands::Verify { dir } => commands::verify::handle(&dir),

        Commands::Configure {
            output,
            format,
            keep_going,
            show,
        } => commands::configure::handle(output, format, keep_going, show),
    }
}
