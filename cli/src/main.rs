use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod output;
pub mod ux_error;

use commands::{Cli, Commands};

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Get(args) => commands::get::run(&cli.layers, args),
        Commands::Names(args) => commands::names::run(&cli.layers, args),
        Commands::Sources(args) => commands::sources::run(&cli.layers, args),
    };

    // A UxError has already been shown to the user.
    if let Err(e) = &result {
        if e.downcast_ref::<ux_error::UxError>().is_some() {
            std::process::exit(1);
        }
    }
    result
}
