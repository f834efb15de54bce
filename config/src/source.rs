//! # Configuration Sources
//!
//! A [`Source`] is a named, prioritized mapping from key to raw string.
//! [`SourceSet`] keeps the registered sources in their merge order and runs
//! the raw lookup.
//!
//! # Merge Order
//! 1. Higher ordinal first
//! 2. Equal ordinals: source name, ascending
//!
//! The order depends only on `(ordinal, name)`, never on registration order.

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use errors::BoxError;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use crate::change::ChangeReporter;

/// Property inside a source that overrides its default ordinal.
pub const CONFIG_ORDINAL: &str = "config_ordinal";

/// A provider of raw configuration values.
///
/// `name` and `ordinal` must not change once the source has been added to an
/// engine; they are the sort keys of the merge order.
pub trait Source: Send + Sync {
    fn name(&self) -> &str;

    fn ordinal(&self) -> i32;

    /// Raw value for `key`, or `None` when this source does not define it.
    fn get(&self, key: &str) -> Option<String>;

    fn property_names(&self) -> BTreeSet<String>;

    /// Re-read the underlying data, if the source supports it.
    fn reload(&self) {}

    /// Release any resources held by the source.
    fn close(&self) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called once when the source joins an engine.
    fn attach(&self, _reporter: ChangeReporter) {}
}

/// Read-only description of a registered source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub name: String,
    pub ordinal: i32,
    pub property_count: usize,
}

impl SourceInfo {
    pub fn of(source: &dyn Source) -> Self {
        Self {
            name: source.name().to_string(),
            ordinal: source.ordinal(),
            property_count: source.property_names().len(),
        }
    }
}

/// Ordered, copy-on-write collection of sources.
///
/// Writers are serialized and publish a freshly sorted list by replacement;
/// readers clone the published `Arc` and never observe a partial sort.
pub struct SourceSet {
    published: RwLock<Arc<[Arc<dyn Source>]>>,
    writer: Mutex<()>,
}

impl SourceSet {
    pub fn new() -> Self {
        Self {
            published: RwLock::new(Arc::from(Vec::new())),
            writer: Mutex::new(()),
        }
    }

    /// Merge `sources` into the set and re-sort the whole list.
    pub fn add_sources<I>(&self, sources: I)
    where
        I: IntoIterator<Item = Arc<dyn Source>>,
    {
        let _guard = self.writer.lock();

        let mut merged: Vec<Arc<dyn Source>> = self.snapshot().iter().cloned().collect();
        merged.extend(sources);
        sort_descending(&mut merged);

        *self.published.write() = Arc::from(merged);
    }

    /// The currently published, sorted list.
    pub fn snapshot(&self) -> Arc<[Arc<dyn Source>]> {
        Arc::clone(&self.published.read())
    }

    pub fn len(&self) -> usize {
        self.published.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First value for `key` in merge order. Absence everywhere is not an error.
    pub fn lookup_raw(&self, key: &str) -> Option<String> {
        self.lookup_with_origin(key).map(|(value, _)| value)
    }

    /// Like [`SourceSet::lookup_raw`], also returning the source that answered.
    pub fn lookup_with_origin(&self, key: &str) -> Option<(String, Arc<dyn Source>)> {
        for source in self.snapshot().iter() {
            if let Some(value) = source.get(key) {
                debug!(key, source = source.name(), "Found config value");
                return Some((value, Arc::clone(source)));
            }
        }
        None
    }

    /// Union of the keys of every source.
    pub fn property_names(&self) -> BTreeSet<String> {
        self.snapshot()
            .iter()
            .flat_map(|source| source.property_names())
            .collect()
    }
}

impl Default for SourceSet {
    fn default() -> Self {
        Self::new()
    }
}

fn compare_sources(a: &dyn Source, b: &dyn Source) -> Ordering {
    b.ordinal()
        .cmp(&a.ordinal())
        .then_with(|| a.name().cmp(b.name()))
}

fn sort_descending(sources: &mut [Arc<dyn Source>]) {
    sources.sort_by(|a, b| compare_sources(a.as_ref(), b.as_ref()));
}

/// Ordinal from a source's own [`CONFIG_ORDINAL`] property, or `default`.
pub fn ordinal_or(value: Option<&str>, default: i32) -> i32 {
    value
        .and_then(|raw| raw.trim().parse::<i32>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapSource;

    fn source(name: &str, ordinal: i32, entries: &[(&str, &str)]) -> Arc<dyn Source> {
        Arc::new(MapSource::new(name, ordinal).with_entries(entries.iter().copied()))
    }

    fn names(set: &SourceSet) -> Vec<String> {
        set.snapshot().iter().map(|s| s.name().to_string()).collect()
    }

    #[test]
    fn test_highest_ordinal_wins() {
        let set = SourceSet::new();
        set.add_sources([
            source("low", 100, &[("key", "low")]),
            source("high", 400, &[("key", "high")]),
            source("mid", 300, &[("key", "mid"), ("only.mid", "m")]),
        ]);

        assert_eq!(set.lookup_raw("key").as_deref(), Some("high"));
        assert_eq!(set.lookup_raw("only.mid").as_deref(), Some("m"));
        assert_eq!(set.lookup_raw("missing"), None);
    }

    #[test]
    fn test_equal_ordinal_breaks_ties_by_name() {
        let set = SourceSet::new();
        set.add_sources([source("zeta", 100, &[("key", "zeta")])]);
        set.add_sources([source("alpha", 100, &[("key", "alpha")])]);

        assert_eq!(names(&set), vec!["alpha", "zeta"]);
        assert_eq!(set.lookup_raw("key").as_deref(), Some("alpha"));
    }

    #[test]
    fn test_order_independent_of_registration_order() {
        let forward = SourceSet::new();
        forward.add_sources([source("a", 1, &[]), source("b", 2, &[]), source("c", 2, &[])]);

        let backward = SourceSet::new();
        backward.add_sources([source("c", 2, &[])]);
        backward.add_sources([source("b", 2, &[]), source("a", 1, &[])]);

        assert_eq!(names(&forward), names(&backward));
        assert_eq!(names(&forward), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_snapshot_is_unaffected_by_later_additions() {
        let set = SourceSet::new();
        set.add_sources([source("first", 10, &[])]);
        let before = set.snapshot();

        set.add_sources([source("second", 20, &[])]);

        assert_eq!(before.len(), 1);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_property_names_is_union() {
        let set = SourceSet::new();
        set.add_sources([
            source("one", 1, &[("a", "1"), ("b", "2")]),
            source("two", 2, &[("b", "3"), ("c", "4")]),
        ]);

        let names: Vec<String> = set.property_names().into_iter().collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ordinal_or() {
        assert_eq!(ordinal_or(Some(" 250 "), 100), 250);
        assert_eq!(ordinal_or(Some("high"), 100), 100);
        assert_eq!(ordinal_or(None, 100), 100);
    }
}
