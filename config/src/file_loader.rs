//! # Configuration File Source
//!
//! Loads `.properties`, TOML or YAML files into a flat [`Source`].
//!
//! Supports automatic format detection based on file extension. Nested tables
//! become dot-joined keys (`[db] port = 1` is `db.port`), arrays become comma
//! separated lists with embedded commas escaped as `\,`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::escape::join_list;
use crate::source::{CONFIG_ORDINAL, Source, ordinal_or};

pub const FILE_SOURCE_ORDINAL: i32 = 100;

/// Configuration file loading error.
#[derive(Debug, thiserror::Error)]
pub enum SourceFileError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlParse(String),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(String),

    #[error("Config file has no extension")]
    NoExtension,

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Properties,
    Toml,
    Yaml,
}

impl FileFormat {
    /// Detect the format from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, SourceFileError> {
        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or(SourceFileError::NoExtension)?;

        match extension.to_lowercase().as_str() {
            "properties" => Ok(Self::Properties),
            "toml" => Ok(Self::Toml),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(SourceFileError::UnsupportedFormat(other.to_string())),
        }
    }
}

/// Load a file into flat key/value pairs.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Reads a configuration file, detecting its format from the extension, and
/// flattens it into the key/value form every [`Source`] exposes.
///
/// ## Supported Formats
/// - `.properties`: `key=value` / `key: value` / `key value` lines, `#` and
///   `!` comments, trailing-backslash continuation
/// - `.toml`: TOML format
/// - `.yaml` / `.yml`: YAML format
///
/// ## Usage
/// ```rust,no_run
/// use config::file_loader::load_file;
/// use std::path::Path;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let entries = load_file(Path::new("app.toml"))?;
///     println!("db.port = {:?}", entries.get("db.port"));
///     Ok(())
/// }
/// ```
///
/// ## Error Handling
/// Returns `SourceFileError` for:
/// - File not found
/// - Invalid or unsupported file extension
/// - Parse errors for the detected format
pub fn load_file(path: &Path) -> Result<BTreeMap<String, String>, SourceFileError> {
    let format = FileFormat::from_path(path)?;
    let contents = read(path)?;
    match format {
        FileFormat::Properties => Ok(parse_properties(&contents)),
        FileFormat::Toml => parse_toml(&contents),
        FileFormat::Yaml => parse_yaml(&contents),
    }
}

fn read(path: &Path) -> Result<String, SourceFileError> {
    std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            SourceFileError::FileNotFound(path.display().to_string())
        } else {
            SourceFileError::Io(e)
        }
    })
}

/// Parse `.properties` text.
pub fn parse_properties(text: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    let mut lines = text.lines();

    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with(['#', '!']) {
            continue;
        }

        let mut logical = trimmed.to_string();
        while continues(&logical) {
            logical.pop();
            match lines.next() {
                Some(next) => logical.push_str(next.trim_start()),
                None => break,
            }
        }

        let (key, value) = split_property(&logical);
        entries.insert(unescape(key), unescape(value));
    }
    entries
}

/// An odd number of trailing backslashes continues the line.
fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|c| *c == '\\').count() % 2 == 1
}

fn split_property(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
                return (&line[..i], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push('u');
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

pub fn parse_toml(contents: &str) -> Result<BTreeMap<String, String>, SourceFileError> {
    let table: toml::Table =
        toml::from_str(contents).map_err(|e| SourceFileError::TomlParse(e.to_string()))?;

    let mut entries = BTreeMap::new();
    flatten_toml("", &toml::Value::Table(table), &mut entries);
    Ok(entries)
}

fn flatten_toml(prefix: &str, value: &toml::Value, entries: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, nested) in table {
                flatten_toml(&join_key(prefix, key), nested, entries);
            }
        }
        toml::Value::Array(items) => {
            let texts = items.iter().filter_map(toml_scalar);
            entries.insert(prefix.to_string(), join_list(texts));
        }
        scalar => {
            if let Some(text) = toml_scalar(scalar) {
                entries.insert(prefix.to_string(), text);
            }
        }
    }
}

fn toml_scalar(value: &toml::Value) -> Option<String> {
    match value {
        toml::Value::String(s) => Some(s.clone()),
        toml::Value::Integer(i) => Some(i.to_string()),
        toml::Value::Float(f) => Some(f.to_string()),
        toml::Value::Boolean(b) => Some(b.to_string()),
        toml::Value::Datetime(d) => Some(d.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => None,
    }
}

pub fn parse_yaml(contents: &str) -> Result<BTreeMap<String, String>, SourceFileError> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(contents).map_err(|e| SourceFileError::YamlParse(e.to_string()))?;

    let mut entries = BTreeMap::new();
    match document {
        serde_yaml::Value::Null => {}
        serde_yaml::Value::Mapping(_) => flatten_yaml("", &document, &mut entries),
        _ => {
            return Err(SourceFileError::YamlParse(
                "top-level YAML value must be a mapping".to_string(),
            ));
        }
    }
    Ok(entries)
}

fn flatten_yaml(prefix: &str, value: &serde_yaml::Value, entries: &mut BTreeMap<String, String>) {
    match value {
        serde_yaml::Value::Mapping(mapping) => {
            for (key, nested) in mapping {
                match yaml_scalar(key) {
                    Some(key) => flatten_yaml(&join_key(prefix, &key), nested, entries),
                    None => debug!(prefix, "Skipping YAML entry with a non-scalar key"),
                }
            }
        }
        serde_yaml::Value::Sequence(items) => {
            let texts = items.iter().filter_map(yaml_scalar);
            entries.insert(prefix.to_string(), join_list(texts));
        }
        serde_yaml::Value::Tagged(tagged) => flatten_yaml(prefix, &tagged.value, entries),
        scalar => {
            if let Some(text) = yaml_scalar(scalar) {
                entries.insert(prefix.to_string(), text);
            }
        }
    }
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::Null => Some(String::new()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Tagged(tagged) => yaml_scalar(&tagged.value),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => None,
    }
}

fn join_key(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// A configuration file exposed as a [`Source`].
///
/// The source is named after its path. Its ordinal defaults to
/// [`FILE_SOURCE_ORDINAL`] unless the file defines `config_ordinal`.
pub struct FileSource {
    path: PathBuf,
    name: String,
    ordinal: i32,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileSource {
    /// Load `path`. A missing or unreadable file gives an empty source.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_ordinal(path, FILE_SOURCE_ORDINAL)
    }

    pub fn with_ordinal(path: impl Into<PathBuf>, default_ordinal: i32) -> Self {
        let path = path.into();
        let entries = load_file(&path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Unable to read config file, using an empty source");
            BTreeMap::new()
        });
        Self::from_entries(path, default_ordinal, entries)
    }

    /// Load `path`, failing instead of falling back to an empty source.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, SourceFileError> {
        let path = path.into();
        let entries = load_file(&path)?;
        Ok(Self::from_entries(path, FILE_SOURCE_ORDINAL, entries))
    }

    fn from_entries(path: PathBuf, default_ordinal: i32, entries: BTreeMap<String, String>) -> Self {
        let ordinal = ordinal_or(entries.get(CONFIG_ORDINAL).map(String::as_str), default_ordinal);
        Self {
            name: path.display().to_string(),
            path,
            ordinal,
            entries: RwLock::new(entries),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Source for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    fn get(&self, key: &str) -> Option<String> {
        self.entries.read().get(key).cloned()
    }

    fn property_names(&self) -> BTreeSet<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Re-read the file. A deleted file empties the source; a file that fails
    /// to parse keeps the previous entries.
    fn reload(&self) {
        match load_file(&self.path) {
            Ok(entries) => {
                debug!(path = %self.path.display(), count = entries.len(), "Reloaded config file");
                *self.entries.write() = entries;
            }
            Err(SourceFileError::FileNotFound(_)) => {
                warn!(path = %self.path.display(), "Config file removed, clearing source");
                self.entries.write().clear();
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to reload config file, keeping previous values");
            }
        }
    }
}
