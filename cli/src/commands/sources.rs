use anyhow::Result;
use clap::Args;

use super::LayerArgs;
use crate::output;

#[derive(Args)]
pub struct SourcesArgs {
    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

pub fn run(layers: &LayerArgs, args: SourcesArgs) -> Result<()> {
    let engine = layers.build_engine()?;
    let sources = engine.source_info();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&sources)?);
        engine.close()?;
        return Ok(());
    }

    output::header("Configuration Sources");
    if sources.is_empty() {
        output::warn("No sources configured");
        output::hint("Drop --no-env or add --file <PATH>");
    } else {
        println!("  {:>8}  {:<32}  {}", "ORDINAL", "NAME", "KEYS");
        for source in &sources {
            println!(
                "  {:>8}  {:<32}  {}",
                source.ordinal, source.name, source.property_count
            );
        }
        println!();
        output::hint("Earlier sources win; `strata get <key>` shows the effective value");
    }

    engine.close()?;
    Ok(())
}
