use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, ValueEnum};
use config::{ConfigEngine, ConfigError, Configurable, ValueAccessor};
use tracing::debug;
use url::Url;

use super::LayerArgs;
use crate::ux_error;

#[derive(Args)]
pub struct GetArgs {
    #[arg(help = "Key to resolve")]
    pub key: String,

    #[arg(short = 't', long = "type", value_enum, default_value_t = ValueType::String)]
    pub value_type: ValueType,

    #[arg(long, help = "Fallback in string form, converted like a configured value")]
    pub default: Option<String>,

    #[arg(
        short = 's',
        long = "suffix",
        help = "Lookup-chain suffix, most specific last (repeatable)"
    )]
    pub suffixes: Vec<String>,

    #[arg(long, help = "Print the stored value without expansion or conversion")]
    pub raw: bool,

    #[arg(long, help = "Split the value on unescaped commas")]
    pub list: bool,

    #[arg(long, help = "Output as JSON")]
    pub json: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ValueType {
    String,
    Bool,
    Int,
    Float,
    Duration,
    Url,
    Path,
    Datetime,
}

/// A resolved value rendered for display.
#[derive(Debug)]
struct Resolved {
    resolved_key: Option<String>,
    values: Vec<String>,
}

pub fn run(layers: &LayerArgs, args: GetArgs) -> Result<()> {
    let engine = layers.build_engine()?;

    let resolved = if args.raw {
        raw(&engine, &args)
    } else {
        match args.value_type {
            ValueType::String => resolve::<String>(&engine, &args, String::clone),
            ValueType::Bool => resolve::<bool>(&engine, &args, bool::to_string),
            ValueType::Int => resolve::<i64>(&engine, &args, i64::to_string),
            ValueType::Float => resolve::<f64>(&engine, &args, f64::to_string),
            ValueType::Duration => resolve::<Duration>(&engine, &args, |d| format!("{d:?}")),
            ValueType::Url => resolve::<Url>(&engine, &args, Url::to_string),
            ValueType::Path => resolve::<PathBuf>(&engine, &args, |p| p.display().to_string()),
            ValueType::Datetime => {
                resolve::<DateTime<Utc>>(&engine, &args, DateTime::<Utc>::to_rfc3339)
            }
        }
    };

    let resolved = match resolved {
        Ok(resolved) => resolved,
        Err(e) => {
            debug!(key = %args.key, error = %e, "Failed to resolve config key");
            let ux = ux_error::from_config_error(&args.key, &e);
            ux.display();
            engine.close()?;
            return Err(ux.into());
        }
    };
    debug!(
        key = %args.key,
        resolved_key = resolved.resolved_key.as_deref().unwrap_or(&args.key),
        "Resolved config key"
    );

    if args.json {
        let value = if args.list {
            serde_json::json!(resolved.values)
        } else {
            serde_json::json!(resolved.values.first())
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "key": args.key,
                "resolved_key": resolved.resolved_key,
                "value": value,
            }))?
        );
    } else {
        for value in &resolved.values {
            println!("{value}");
        }
    }

    engine.close()?;
    Ok(())
}

fn with_suffixes(engine: &ConfigEngine, args: &GetArgs) -> ValueAccessor<String> {
    args.suffixes
        .iter()
        .fold(engine.accessor(&args.key), |accessor, suffix| {
            accessor.add_lookup_suffix(suffix.clone())
        })
}

fn raw(engine: &ConfigEngine, args: &GetArgs) -> config::Result<Resolved> {
    let accessor = with_suffixes(engine, args).evaluate_variables(false);
    let value = accessor
        .raw_value()?
        .or_else(|| args.default.clone())
        .ok_or_else(|| ConfigError::NotFound {
            key: args.key.clone(),
        })?;
    Ok(Resolved {
        resolved_key: accessor.resolved_key(),
        values: vec![value],
    })
}

fn resolve<T: Configurable>(
    engine: &ConfigEngine,
    args: &GetArgs,
    render: impl Fn(&T) -> String,
) -> config::Result<Resolved> {
    let accessor = with_suffixes(engine, args).as_type::<T>();

    if args.list {
        let mut accessor = accessor.as_list();
        if let Some(default) = &args.default {
            accessor = accessor.with_string_default(default)?;
        }
        let values = accessor.value()?;
        return Ok(Resolved {
            resolved_key: accessor.resolved_key(),
            values: values.iter().map(render).collect(),
        });
    }

    let mut accessor = accessor;
    if let Some(default) = &args.default {
        accessor = accessor.with_string_default(default)?;
    }
    let value = accessor.value()?;
    Ok(Resolved {
        resolved_key: accessor.resolved_key(),
        values: vec![render(&value)],
    })
}
