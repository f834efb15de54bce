use colored::Colorize;
use config::ConfigError;

#[derive(Debug)]
pub struct UxError {
    pub what: String,
    pub why: Option<String>,
    pub how_to_fix: Vec<String>,
    pub suggested_command: Option<String>,
}

impl UxError {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: None,
            how_to_fix: Vec::new(),
            suggested_command: None,
        }
    }

    pub fn why(mut self, reason: impl Into<String>) -> Self {
        self.why = Some(reason.into());
        self
    }

    pub fn fix(mut self, suggestion: impl Into<String>) -> Self {
        self.how_to_fix.push(suggestion.into());
        self
    }

    pub fn suggest(mut self, cmd: impl Into<String>) -> Self {
        self.suggested_command = Some(cmd.into());
        self
    }

    pub fn display(&self) {
        eprintln!();
        eprintln!("{} {}", "error:".red().bold(), self.what.white().bold());

        if let Some(why) = &self.why {
            eprintln!("       {}", why.dimmed());
        }

        if !self.how_to_fix.is_empty() {
            eprintln!();
            eprintln!("{}", "How to fix:".yellow().bold());
            for (i, fix) in self.how_to_fix.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, fix);
            }
        }

        if let Some(cmd) = &self.suggested_command {
            eprintln!();
            eprintln!("{}", "Try this:".green().bold());
            eprintln!("  $ {}", cmd.cyan());
        }
        eprintln!();
    }
}

impl std::fmt::Display for UxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.what)
    }
}

impl std::error::Error for UxError {}

pub fn key_not_found(key: &str) -> UxError {
    UxError::new(format!("No configured value found for config key {key}"))
        .why("No source defines the key and no default was given")
        .fix("Define the key in a config file or as an environment variable")
        .fix("Or pass a fallback with --default")
        .suggest(format!("strata get {key} --default <value>"))
}

pub fn conversion_failed(key: &str, error: &ConfigError) -> UxError {
    UxError::new(format!("Cannot convert value of {key}"))
        .why(error.to_string())
        .fix("Check the value in the highest-ordinal source that defines the key")
        .fix("Or request a different --type")
        .suggest(format!("strata get {key} --raw"))
}

pub fn malformed_value(key: &str, error: &ConfigError) -> UxError {
    UxError::new(format!("Malformed list value for {key}"))
        .why(error.to_string())
        .fix("Escape literal commas as \\, and backslashes as \\\\")
        .suggest(format!("strata get {key} --raw"))
}

pub fn file_error(path: &str, reason: &str) -> UxError {
    UxError::new(format!("Cannot load config file '{path}'"))
        .why(reason.to_string())
        .fix("Check that the file exists and is readable")
        .fix("Supported formats are .properties, .toml, .yaml and .yml")
}

/// Map an engine error on `key` to the matching user-facing error.
pub fn from_config_error(key: &str, error: &ConfigError) -> UxError {
    match error {
        ConfigError::NotFound { .. } => key_not_found(key),
        ConfigError::MalformedInput { .. } => malformed_value(key, error),
        ConfigError::ConversionFailed { .. } | ConfigError::NoConverter { .. } => {
            conversion_failed(key, error)
        }
        other => UxError::new(other.to_string()),
    }
}
