//! # Environment Variable Source
//!
//! Exposes the process environment as a [`Source`] so configuration can be
//! supplied the 12-factor way.
//!
//! # Key Mapping
//! A lookup of `db.pool-size` tries, in order:
//! 1. `db.pool-size` (exact)
//! 2. `db_pool_size` (every non-alphanumeric character replaced by `_`)
//! 3. `DB_POOL_SIZE` (the same, upper-cased)

use std::collections::{BTreeSet, HashMap};
use std::env;

use parking_lot::RwLock;
use tracing::debug;

use crate::source::{CONFIG_ORDINAL, Source, ordinal_or};

pub const ENV_SOURCE_NAME: &str = "environment-variables";

pub const ENV_SOURCE_ORDINAL: i32 = 300;

/// Snapshot of the process environment, refreshed by [`Source::reload`].
pub struct EnvSource {
    ordinal: i32,
    vars: RwLock<HashMap<String, String>>,
}

impl EnvSource {
    pub fn new() -> Self {
        let vars = snapshot();
        Self {
            ordinal: ordinal_or(
                vars.get(CONFIG_ORDINAL).map(String::as_str),
                ENV_SOURCE_ORDINAL,
            ),
            vars: RwLock::new(vars),
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Variables whose name and value are valid unicode. Others are skipped.
fn snapshot() -> HashMap<String, String> {
    env::vars_os()
        .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?)))
        .collect()
}

fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl Source for EnvSource {
    fn name(&self) -> &str {
        ENV_SOURCE_NAME
    }

    fn ordinal(&self) -> i32 {
        self.ordinal
    }

    fn get(&self, key: &str) -> Option<String> {
        let vars = self.vars.read();
        if let Some(value) = vars.get(key) {
            return Some(value.clone());
        }
        let sanitized = sanitize(key);
        if let Some(value) = vars.get(&sanitized) {
            return Some(value.clone());
        }
        vars.get(&sanitized.to_ascii_uppercase()).cloned()
    }

    fn property_names(&self) -> BTreeSet<String> {
        self.vars.read().keys().cloned().collect()
    }

    fn reload(&self) {
        let vars = snapshot();
        debug!(count = vars.len(), "Reloaded environment variables");
        *self.vars.write() = vars;
    }
}
