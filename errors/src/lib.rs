//! # Strata Errors
//!
//! Error taxonomy for the strata configuration engine.
//!
//! - Uses `thiserror` for structured error definitions
//! - Every variant carries named fields so callers can match on context
//! - Lookup and conversion errors are returned synchronously to the caller of
//!   the lookup that produced them

use std::fmt;

use thiserror::Error;

/// Boxed error returned by converters and sources.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised while resolving, converting or shutting down configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No configured value found for config key {key}")]
    NotFound { key: String },

    #[error("No converter registered for type {type_name}")]
    NoConverter { type_name: String },

    #[error("Cannot convert '{raw}' to {type_name}: {reason}")]
    ConversionFailed {
        raw: String,
        type_name: String,
        reason: String,
    },

    #[error(
        "Found 2 converters with the same priority {priority} for type {type_name}; aborting to avoid nondeterministic precedence"
    )]
    ConflictingPriority { type_name: String, priority: i32 },

    #[error("Incorrect escaping of key {key} value '{value}': {reason}")]
    MalformedInput {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Empty string supplied as string-default value for property {key}")]
    InvalidDefault { key: String },

    #[error("{}", ShutdownReport(.failures))]
    ShutdownAggregate { failures: Vec<CloseFailure> },
}

impl ConfigError {
    /// Wraps a converter failure together with the offending raw value.
    pub fn conversion(raw: &str, type_name: &str, reason: impl fmt::Display) -> Self {
        Self::ConversionFailed {
            raw: raw.to_string(),
            type_name: type_name.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Attach `key` to an error raised before the key was known.
    pub fn for_key(self, key: &str) -> Self {
        match self {
            Self::MalformedInput {
                key: unknown,
                value,
                reason,
            } if unknown.is_empty() => Self::MalformedInput {
                key: key.to_string(),
                value,
                reason,
            },
            other => other,
        }
    }
}

/// One resource that failed to close during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub component: String,
    pub message: String,
}

impl CloseFailure {
    pub fn new(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.message)
    }
}

struct ShutdownReport<'a>(&'a [CloseFailure]);

impl fmt::Display for ShutdownReport<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "The following {} errors got detected while shutting down the configuration:",
            self.0.len()
        )?;
        for failure in self.0 {
            write!(f, "\n  {failure}")?;
        }
        Ok(())
    }
}
