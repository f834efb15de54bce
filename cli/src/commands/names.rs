use anyhow::Result;
use clap::Args;

use super::LayerArgs;
use crate::output;

#[derive(Args)]
pub struct NamesArgs {
    #[arg(long, help = "Only list keys starting with this prefix")]
    pub prefix: Option<String>,

    #[arg(long, help = "Also print each key's effective raw value")]
    pub values: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

pub fn run(layers: &LayerArgs, args: NamesArgs) -> Result<()> {
    let engine = layers.build_engine()?;
    let names: Vec<String> = engine
        .property_names()
        .into_iter()
        .filter(|name| {
            args.prefix
                .as_deref()
                .is_none_or(|prefix| name.starts_with(prefix))
        })
        .collect();

    if args.json {
        let output = if args.values {
            let entries: serde_json::Map<String, serde_json::Value> = names
                .iter()
                .map(|name| (name.clone(), serde_json::json!(engine.raw_value(name))))
                .collect();
            serde_json::Value::Object(entries)
        } else {
            serde_json::json!(names)
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else if names.is_empty() {
        output::hint("No keys defined. Add sources with --file or -D key=value");
    } else if args.values {
        let width = names.iter().map(String::len).max().unwrap_or(0);
        for name in &names {
            let value = engine.raw_value(name).unwrap_or_default();
            output::entry(name, &value, width);
        }
    } else {
        for name in &names {
            println!("{name}");
        }
    }

    engine.close()?;
    Ok(())
}
