pub mod get;
pub mod names;
pub mod sources;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use config::{ConfigEngine, FileSource, MapSource, Source};
use tracing::{debug, warn};

use crate::ux_error;

/// Name of the source built from `-D key=value` flags.
pub const COMMAND_LINE_SOURCE: &str = "command-line";

/// Ordinal of the command-line source; above the environment.
pub const COMMAND_LINE_ORDINAL: i32 = 400;

#[derive(Parser)]
#[command(
    name = "strata",
    author,
    version,
    about = "Strata - typed, layered configuration",
    long_about = "Resolve configuration keys across layered sources.\n\nSources are merged by \
                  ordinal: -D overrides (400) > environment (300) > files (100, unless the file \
                  sets config_ordinal)."
)]
pub struct Cli {
    #[command(flatten)]
    pub layers: LayerArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Resolve the value of a key")]
    Get(get::GetArgs),

    #[command(about = "List every key defined by any source")]
    Names(names::NamesArgs),

    #[command(about = "List the sources in merge order")]
    Sources(sources::SourcesArgs),
}

#[derive(Args, Debug, Clone)]
pub struct LayerArgs {
    #[arg(
        long = "file",
        short = 'f',
        global = true,
        value_name = "PATH",
        help = "Add a .properties, .toml or .yaml file as a source (repeatable)"
    )]
    pub files: Vec<PathBuf>,

    #[arg(long, global = true, help = "Do not use environment variables as a source")]
    pub no_env: bool,

    #[arg(
        short = 'D',
        global = true,
        value_name = "KEY=VALUE",
        value_parser = parse_define,
        help = "Override a key (repeatable)"
    )]
    pub defines: Vec<(String, String)>,
}

impl LayerArgs {
    pub fn build_engine(&self) -> Result<ConfigEngine> {
        let mut builder = ConfigEngine::builder();
        if !self.no_env {
            builder = builder.add_default_sources();
        }

        for path in &self.files {
            let source = match FileSource::load(path) {
                Ok(source) => source,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Failed to load config file");
                    let ux = ux_error::file_error(&path.display().to_string(), &e.to_string());
                    ux.display();
                    return Err(ux.into());
                }
            };
            debug!(path = %path.display(), ordinal = source.ordinal(), "Loaded config file");
            builder = builder.with_source(Arc::new(source));
        }

        if !self.defines.is_empty() {
            let overrides = MapSource::new(COMMAND_LINE_SOURCE, COMMAND_LINE_ORDINAL)
                .with_entries(self.defines.iter().cloned());
            builder = builder.with_source(Arc::new(overrides) as Arc<dyn Source>);
        }

        let engine = builder.build()?;
        debug!(
            files = self.files.len(),
            overrides = self.defines.len(),
            env = !self.no_env,
            "Built config engine from command line"
        );
        Ok(engine)
    }
}

fn parse_define(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_define() {
        assert_eq!(
            parse_define("db.port=5432").unwrap(),
            ("db.port".to_string(), "5432".to_string())
        );
        assert_eq!(
            parse_define("url=a=b").unwrap(),
            ("url".to_string(), "a=b".to_string())
        );
        assert_eq!(parse_define("empty=").unwrap().1, "");
        assert!(parse_define("novalue").is_err());
        assert!(parse_define("=x").is_err());
    }

    #[test]
    fn test_cli_parses_global_layers() {
        let cli = Cli::parse_from([
            "strata", "get", "db.port", "--no-env", "-D", "db.port=1", "-f", "app.toml",
        ]);
        assert!(cli.layers.no_env);
        assert_eq!(cli.layers.defines.len(), 1);
        assert_eq!(cli.layers.files, vec![PathBuf::from("app.toml")]);
        assert!(matches!(cli.command, Commands::Get(_)));
    }

    #[test]
    fn test_overrides_win() {
        let layers = LayerArgs {
            files: Vec::new(),
            no_env: true,
            defines: vec![("mode".to_string(), "fast".to_string())],
        };
        let engine = layers.build_engine().unwrap();
        assert_eq!(engine.raw_value("mode").as_deref(), Some("fast"));
        assert_eq!(engine.sources()[0].name(), COMMAND_LINE_SOURCE);
    }
}
