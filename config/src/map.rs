//! # In-Memory Source
//!
//! A mutable, in-memory [`Source`]. Used for explicit overrides (the CLI's
//! `-D key=value` flags) and in tests.

use std::collections::{BTreeSet, HashMap};

use parking_lot::{Mutex, RwLock};

use crate::change::ChangeReporter;
use crate::source::{CONFIG_ORDINAL, Source, ordinal_or};

pub struct MapSource {
    name: String,
    ordinal: i32,
    entries: RwLock<HashMap<String, String>>,
    reporter: Mutex<Option<ChangeReporter>>,
}

impl MapSource {
    pub fn new(name: impl Into<String>, ordinal: i32) -> Self {
        Self {
            name: name.into(),
            ordinal,
            entries: RwLock::new(HashMap::new()),
            reporter: Mutex::new(None),
        }
    }

    /// Seed entries before the source is registered.
    ///
    /// A `config_ordinal` entry overrides the ordinal passed to [`MapSource::new`].
    pub fn with_entries<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = self.entries.get_mut();
        map.extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        self.ordinal = ordinal_or(map.get(CONFIG_ORDINAL).map(String::as_str), self.ordinal);
        self
    }

    /// Set a value and report the change to the owning engine.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.write().insert(key.into(), value.into());
        self.report();
    }

    /// Remove a value and report the change to the owning engine.
    pub fn remove(&self, key: &str) -> Option<String> {
        let removed = self.entries.write().remove(key);
        if removed.is_some() {
            self.report();
        }
        removed
    }

    fn report(&self) {
        if let Some(reporter) = self.reporter.lock().as_ref() {
            reporter.report();
        }
    }
}

impl Source for MapSource {
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

    fn attach(&self, reporter: ChangeReporter) {
        *self.reporter.lock() = Some(reporter);
    }
}
