//! # Configuration Engine
//!
//! [`ConfigEngine`] is the aggregate root: it owns the ordered sources, the
//! converter registry and the "last changed" marker that accessors use to
//! decide whether a cached value is still fresh.
//!
//! Engines are cheap to clone; every clone shares the same state.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use errors::{BoxError, CloseFailure, ConfigError};
use tracing::{debug, error, info};

use crate::Result;
use crate::accessor::ValueAccessor;
use crate::change::{ChangeMarker, ChangeReporter};
use crate::converter::{Configurable, ConverterProvider, ConverterRegistry};
use crate::env::EnvSource;
use crate::placeholders;
use crate::source::{Source, SourceInfo, SourceSet};

#[derive(Clone)]
pub struct ConfigEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    sources: SourceSet,
    converters: ConverterRegistry,
    marker: Arc<ChangeMarker>,
    closed: AtomicBool,
}

impl ConfigEngine {
    pub fn builder() -> ConfigEngineBuilder {
        ConfigEngineBuilder::default()
    }

    fn from_parts(converters: ConverterRegistry) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                sources: SourceSet::new(),
                converters,
                marker: Arc::new(ChangeMarker::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// First value for `key` in merge order, exactly as the source holds it.
    pub fn raw_value(&self, key: &str) -> Option<String> {
        self.inner.sources.lookup_raw(key)
    }

    /// Typed value for `key`.
    ///
    /// The raw value is converted as-is; placeholders are only expanded by
    /// accessors. Fails with [`ConfigError::NotFound`] when the key is
    /// undefined or empty.
    pub fn value<T: Configurable>(&self, key: &str) -> Result<T> {
        self.optional_value(key)?.ok_or_else(|| ConfigError::NotFound {
            key: key.to_string(),
        })
    }

    /// Typed value for `key`; absence is `Ok(None)`, only conversion fails.
    pub fn optional_value<T: Configurable>(&self, key: &str) -> Result<Option<T>> {
        let raw = self.raw_value(key).filter(|value| !value.is_empty());
        self.inner
            .converters
            .convert(raw.as_deref())
            .map_err(|e| e.for_key(key))
    }

    /// Expand `${name}` / `${name:default}` references in `raw` against this engine.
    pub fn expand(&self, raw: &str) -> String {
        placeholders::expand(raw, |name| {
            self.raw_value(name).filter(|value| !value.is_empty())
        })
    }

    /// Start building a resolution pipeline for `key`.
    pub fn accessor(&self, key: impl Into<String>) -> ValueAccessor<String> {
        ValueAccessor::new(self.clone(), key.into())
    }

    /// Union of the keys defined by every source.
    pub fn property_names(&self) -> BTreeSet<String> {
        self.inner.sources.property_names()
    }

    /// The sources in merge order.
    pub fn sources(&self) -> Arc<[Arc<dyn Source>]> {
        self.inner.sources.snapshot()
    }

    pub fn source_info(&self) -> Vec<SourceInfo> {
        self.sources()
            .iter()
            .map(|source| SourceInfo::of(source.as_ref()))
            .collect()
    }

    pub fn converters(&self) -> &ConverterRegistry {
        &self.inner.converters
    }

    /// Add sources after construction.
    ///
    /// Each source is attached to this engine's change marker, the merge order
    /// is recomputed and the marker advances so cached values are re-read.
    pub fn add_sources<I>(&self, sources: I)
    where
        I: IntoIterator<Item = Arc<dyn Source>>,
    {
        let sources: Vec<Arc<dyn Source>> = sources.into_iter().collect();
        if sources.is_empty() {
            return;
        }

        for source in &sources {
            source.attach(ChangeReporter::new(&self.inner.marker));
        }
        let added = sources.len();
        self.inner.sources.add_sources(sources);
        self.inner.marker.advance();

        info!(
            added,
            total = self.inner.sources.len(),
            "Added config sources"
        );
    }

    /// Record that some source changed. Returns the new marker.
    pub fn on_external_change(&self) -> u64 {
        let marker = self.inner.marker.advance();
        debug!(marker, "Config change reported");
        marker
    }

    /// Marker of the most recent change; strictly increases with every change.
    pub fn last_changed(&self) -> u64 {
        self.inner.marker.current()
    }

    /// Ask every source to re-read its data, then record one change.
    pub fn reload(&self) -> u64 {
        let sources = self.sources();
        for source in sources.iter() {
            source.reload();
        }
        info!(sources = sources.len(), "Reloaded config sources");
        self.on_external_change()
    }

    /// Close every closeable converter, then every source.
    ///
    /// All of them are attempted even when some fail; the failures are
    /// reported together as [`ConfigError::ShutdownAggregate`]. Closing an
    /// already closed engine does nothing.
    pub fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut failures = Vec::new();
        self.inner.converters.close_all(&mut failures);
        for source in self.sources().iter() {
            if let Err(e) = source.close() {
                error!(source = source.name(), error = %e, "Failed to close config source");
                failures.push(CloseFailure::new(
                    format!("source {}", source.name()),
                    e.to_string(),
                ));
            }
        }

        if failures.is_empty() {
            info!("Config engine closed");
            Ok(())
        } else {
            Err(ConfigError::ShutdownAggregate { failures })
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ConfigEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigEngine")
            .field("sources", &self.inner.sources.len())
            .field("last_changed", &self.last_changed())
            .field("closed", &self.is_closed())
            .finish()
    }
}

type Registration = Box<dyn FnOnce(&ConverterRegistry) -> Result<()> + Send>;

/// Builder for [`ConfigEngine`].
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Collects sources and explicit converters, then builds an engine in one
/// step. Converter registrations are applied in `build()`, so two explicit
/// converters for the same type with the same priority fail there rather than
/// at lookup time.
///
/// ## Usage
/// ```rust,no_run
/// use std::sync::Arc;
/// use config::{ConfigEngine, MapSource};
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = ConfigEngine::builder()
///         .add_default_sources()
///         .with_source(Arc::new(
///             MapSource::new("overrides", 400).with_entries([("db.port", "6543")]),
///         ))
///         .build()?;
///     let port: u16 = engine.value("db.port")?;
///     println!("port = {port}");
///     Ok(())
/// }
/// ```
#[derive(Default)]
pub struct ConfigEngineBuilder {
    sources: Vec<Arc<dyn Source>>,
    registrations: Vec<Registration>,
    default_sources: bool,
}

impl ConfigEngineBuilder {
    pub fn with_source(mut self, source: Arc<dyn Source>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn with_sources<I>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Source>>,
    {
        self.sources.extend(sources);
        self
    }

    /// Include the process environment as a source.
    pub fn add_default_sources(mut self) -> Self {
        self.default_sources = true;
        self
    }

    pub fn with_converter<P: ConverterProvider>(mut self, provider: P) -> Self {
        self.registrations
            .push(Box::new(move |registry| registry.register_provider(provider)));
        self
    }

    pub fn with_converter_fn<T, F>(mut self, priority: i32, convert: F) -> Self
    where
        T: Configurable,
        F: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.registrations
            .push(Box::new(move |registry| registry.register::<T, _>(priority, convert)));
        self
    }

    pub fn build(self) -> Result<ConfigEngine> {
        let converters = ConverterRegistry::new();
        for register in self.registrations {
            register(&converters)?;
        }

        let engine = ConfigEngine::from_parts(converters);
        let mut sources = self.sources;
        if self.default_sources {
            sources.push(Arc::new(EnvSource::new()));
        }
        engine.add_sources(sources);

        info!(sources = engine.inner.sources.len(), "Config engine built");
        Ok(engine)
    }
}
