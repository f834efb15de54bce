//! # Value Accessors
//!
//! A [`ValueAccessor`] is a reusable resolution pipeline for one key:
//!
//! 1. Serve the cached value while the TTL holds and nothing changed
//! 2. Look the key up, trying lookup-chain suffixes most specific first
//! 3. Expand placeholders
//! 4. Empty or absent: fall back to the default
//! 5. Convert, splitting lists and sets on unescaped commas
//! 6. Cache the result and notify subscribers when it changed
//!
//! Accessors are configured builder-style and then read any number of times,
//! from any thread.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};

use errors::{BoxError, ConfigError};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::change::{ChangeSubscription, Listeners, Unsubscribe};
use crate::converter::{Configurable, Converter};
use crate::engine::ConfigEngine;
use crate::escape::split_list;

/// Suffixes beyond this are ignored; the chain tries `2^n - 1` keys.
pub const MAX_LOOKUP_SUFFIXES: usize = 16;

/// How a raw value maps onto the accessor's output.
pub trait Shape: Send + Sync + 'static {
    type Output<T: Configurable>: Clone + PartialEq + fmt::Debug + Send + Sync + 'static;

    const NAME: &'static str;

    /// Value used when nothing is configured and no default is set.
    fn empty<T: Configurable>() -> Option<Self::Output<T>>;

    fn decode<T: Configurable>(
        key: &str,
        raw: &str,
        converter: &Converter<T>,
    ) -> Result<Self::Output<T>>;
}

/// A single value.
#[derive(Debug, Clone, Copy)]
pub struct Scalar;

/// Comma separated values, in order.
#[derive(Debug, Clone, Copy)]
pub struct List;

/// Comma separated values without duplicates, in first-seen order.
#[derive(Debug, Clone, Copy)]
pub struct Set;

impl Shape for Scalar {
    type Output<T: Configurable> = T;

    const NAME: &'static str = "scalar";

    fn empty<T: Configurable>() -> Option<T> {
        None
    }

    fn decode<T: Configurable>(key: &str, raw: &str, converter: &Converter<T>) -> Result<T> {
        converter.convert(raw).map_err(|e| e.for_key(key))
    }
}

impl Shape for List {
    type Output<T: Configurable> = Vec<T>;

    const NAME: &'static str = "list";

    fn empty<T: Configurable>() -> Option<Vec<T>> {
        Some(Vec::new())
    }

    fn decode<T: Configurable>(key: &str, raw: &str, converter: &Converter<T>) -> Result<Vec<T>> {
        split_tokens(key, raw)?
            .iter()
            .map(|token| converter.convert(token))
            .collect()
    }
}

impl Shape for Set {
    type Output<T: Configurable> = Vec<T>;

    const NAME: &'static str = "set";

    fn empty<T: Configurable>() -> Option<Vec<T>> {
        Some(Vec::new())
    }

    fn decode<T: Configurable>(key: &str, raw: &str, converter: &Converter<T>) -> Result<Vec<T>> {
        let mut values: Vec<T> = Vec::new();
        for token in split_tokens(key, raw)? {
            let value = converter.convert(&token)?;
            if !values.contains(&value) {
                values.push(value);
            }
        }
        Ok(values)
    }
}

fn split_tokens(key: &str, raw: &str) -> Result<Vec<String>> {
    split_list(raw).map_err(|e| ConfigError::MalformedInput {
        key: key.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

enum LookupSuffix {
    Literal(String),
    Resolved(Box<ValueAccessor<String>>),
}

struct CacheState<V> {
    value: Option<V>,
    resolved_key: Option<String>,
    computed_at: Option<Instant>,
    marker: u64,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            value: None,
            resolved_key: None,
            computed_at: None,
            marker: 0,
        }
    }
}

/// Resolution pipeline for one configuration key.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Combines key lookup (with optional lookup-chain suffixes), placeholder
/// expansion, defaults, conversion into `T` (or a list/set of `T`) and TTL
/// caching tied to the engine's change marker.
///
/// ## Usage
/// ```rust,no_run
/// use std::time::Duration;
/// use config::ConfigEngine;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let engine = ConfigEngine::builder().add_default_sources().build()?;
///     let stage = engine.accessor("app.stage");
///     let port = engine
///         .accessor("db.port")
///         .as_type::<u16>()
///         .add_lookup_suffix_from(stage)
///         .with_default(5432)
///         .cache_for(Duration::from_secs(5));
///     println!("port = {}", port.value()?);
///     Ok(())
/// }
/// ```
pub struct ValueAccessor<T: Configurable, S: Shape = Scalar> {
    engine: ConfigEngine,
    key: String,
    suffixes: Vec<LookupSuffix>,
    evaluate_variables: bool,
    cache_ttl: Option<Duration>,
    default: Option<S::Output<T>>,
    converter: Option<Converter<T>>,
    state: Mutex<CacheState<S::Output<T>>>,
    listeners: Arc<Listeners<S::Output<T>>>,
    _shape: PhantomData<fn() -> S>,
}

impl ValueAccessor<String> {
    pub(crate) fn new(engine: ConfigEngine, key: String) -> Self {
        Self {
            engine,
            key,
            suffixes: Vec::new(),
            evaluate_variables: true,
            cache_ttl: None,
            default: None,
            converter: None,
            state: Mutex::new(CacheState::new()),
            listeners: Arc::new(Listeners::new()),
            _shape: PhantomData,
        }
    }
}

impl<T: Configurable> ValueAccessor<T, Scalar> {
    /// Resolve into a list of `T`. Without a default, absence yields an empty list.
    pub fn as_list(self) -> ValueAccessor<T, List> {
        let converter = self.converter.clone();
        self.reshape(converter)
    }

    /// Like [`ValueAccessor::as_list`], dropping duplicates.
    pub fn as_set(self) -> ValueAccessor<T, Set> {
        let converter = self.converter.clone();
        self.reshape(converter)
    }
}

impl<T: Configurable, S: Shape> ValueAccessor<T, S> {
    /// Change the target type. Resets the default, converter, cache and subscribers.
    pub fn as_type<N: Configurable>(self) -> ValueAccessor<N, S> {
        self.reshape(None)
    }

    fn reshape<N: Configurable, R: Shape>(self, converter: Option<Converter<N>>) -> ValueAccessor<N, R> {
        ValueAccessor {
            engine: self.engine,
            key: self.key,
            suffixes: self.suffixes,
            evaluate_variables: self.evaluate_variables,
            cache_ttl: self.cache_ttl,
            default: None,
            converter,
            state: Mutex::new(CacheState::new()),
            listeners: Arc::new(Listeners::new()),
            _shape: PhantomData,
        }
    }

    pub fn with_default(mut self, value: S::Output<T>) -> Self {
        self.default = Some(value);
        self
    }

    /// Default given in its string form: placeholders are expanded (unless
    /// disabled) and the result converted like a configured value.
    pub fn with_string_default(mut self, raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ConfigError::InvalidDefault {
                key: self.key.clone(),
            });
        }
        let expanded = self.expand(raw.to_string());
        self.default = Some(self.decode(&expanded)?);
        Ok(self)
    }

    /// Convert with `convert` instead of the registry. Applies per element for lists and sets.
    pub fn use_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.converter = Some(Converter::from_fn(convert));
        self
    }

    /// Keep a resolved value for `ttl`, as long as no change is reported meanwhile.
    pub fn cache_for(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Whether `${...}` references in the raw value are expanded. Defaults to true.
    pub fn evaluate_variables(mut self, evaluate: bool) -> Self {
        self.evaluate_variables = evaluate;
        self
    }

    /// Append a literal lookup-chain suffix. Empty suffixes are skipped at lookup.
    pub fn add_lookup_suffix(self, suffix: impl Into<String>) -> Self {
        self.push_suffix(LookupSuffix::Literal(suffix.into()))
    }

    /// Append a suffix whose value is itself resolved on every lookup.
    ///
    /// An absent or empty value drops the suffix for that lookup.
    pub fn add_lookup_suffix_from(self, suffix: ValueAccessor<String>) -> Self {
        self.push_suffix(LookupSuffix::Resolved(Box::new(suffix)))
    }

    fn push_suffix(mut self, suffix: LookupSuffix) -> Self {
        if self.suffixes.len() >= MAX_LOOKUP_SUFFIXES {
            warn!(
                key = %self.key,
                max = MAX_LOOKUP_SUFFIXES,
                "Too many lookup suffixes, ignoring suffix"
            );
            return self;
        }
        self.suffixes.push(suffix);
        self
    }

    /// Listen for changes of the resolved value.
    ///
    /// The listener runs after a resolution whose result differs from the
    /// previous one, with `(key, old, new)`.
    pub fn subscribe<F>(&self, listener: F) -> ChangeSubscription
    where
        F: Fn(&str, Option<&S::Output<T>>, Option<&S::Output<T>>) + Send + Sync + 'static,
    {
        let id = self.listeners.add(Arc::new(listener));
        let listeners: Arc<dyn Unsubscribe> = self.listeners.clone();
        ChangeSubscription::new(Arc::downgrade(&listeners), id)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key that produced the last resolved value, once resolved.
    pub fn resolved_key(&self) -> Option<String> {
        self.state.lock().resolved_key.clone()
    }

    pub fn default_value(&self) -> Option<&S::Output<T>> {
        self.default.as_ref()
    }

    /// Resolved string value, after placeholder expansion and without conversion.
    pub fn raw_value(&self) -> Result<Option<String>> {
        let (resolved_key, raw) = self.lookup()?;
        self.state.lock().resolved_key = Some(resolved_key);
        Ok(raw)
    }

    /// The resolved value, or its default; `None` when neither exists.
    pub fn optional_value(&self) -> Result<Option<S::Output<T>>> {
        let marker = self.engine.last_changed();
        if let Some(cached) = self.cached(marker) {
            return Ok(cached);
        }

        let (resolved_key, raw) = self.lookup()?;
        let value = match raw {
            Some(raw) => Some(self.decode(&raw)?),
            None => self.default.clone().or_else(S::empty::<T>),
        };
        self.store(resolved_key, value.clone(), marker);
        Ok(value)
    }

    /// The resolved value, or its default; fails with [`ConfigError::NotFound`].
    pub fn value(&self) -> Result<S::Output<T>> {
        self.optional_value()?.ok_or_else(|| ConfigError::NotFound {
            key: self.key.clone(),
        })
    }

    fn cached(&self, marker: u64) -> Option<Option<S::Output<T>>> {
        let ttl = self.cache_ttl?;
        let state = self.state.lock();
        let computed_at = state.computed_at?;
        if state.marker != marker || computed_at.elapsed() > ttl {
            return None;
        }
        debug!(key = %self.key, "Serving cached config value");
        Some(state.value.clone())
    }

    fn store(&self, resolved_key: String, value: Option<S::Output<T>>, marker: u64) {
        let previous = {
            let mut state = self.state.lock();
            state.resolved_key = Some(resolved_key);
            state.computed_at = Some(Instant::now());
            state.marker = marker;
            std::mem::replace(&mut state.value, value.clone())
        };
        if previous != value && !self.listeners.is_empty() {
            self.listeners
                .notify(&self.key, previous.as_ref(), value.as_ref());
        }
    }

    /// Walk the lookup chain. Returns the key that answered and its processed value.
    fn lookup(&self) -> Result<(String, Option<String>)> {
        let suffixes = self.present_suffixes()?;
        let count = suffixes.len();

        for mask in (1..(1u32 << count)).rev() {
            let mut candidate = self.key.clone();
            for (position, suffix) in suffixes.iter().enumerate() {
                if mask & (1 << (count - position - 1)) != 0 {
                    candidate.push('.');
                    candidate.push_str(suffix);
                }
            }
            let Some(raw) = self.engine.raw_value(&candidate).filter(|raw| !raw.is_empty())
            else {
                continue;
            };
            debug!(key = %self.key, resolved_key = %candidate, "Resolved config key through lookup chain");
            return Ok((candidate, self.process(raw)));
        }

        let value = self
            .engine
            .raw_value(&self.key)
            .and_then(|raw| self.process(raw));
        Ok((self.key.clone(), value))
    }

    fn present_suffixes(&self) -> Result<Vec<String>> {
        let mut present = Vec::with_capacity(self.suffixes.len());
        for suffix in &self.suffixes {
            let value = match suffix {
                LookupSuffix::Literal(literal) => Some(literal.clone()),
                LookupSuffix::Resolved(accessor) => accessor.optional_value()?,
            };
            if let Some(value) = value.filter(|value| !value.is_empty()) {
                present.push(value);
            }
        }
        Ok(present)
    }

    /// Expand placeholders; empty results count as absent.
    fn process(&self, raw: String) -> Option<String> {
        Some(self.expand(raw)).filter(|value| !value.is_empty())
    }

    fn expand(&self, raw: String) -> String {
        if self.evaluate_variables {
            self.engine.expand(&raw)
        } else {
            raw
        }
    }

    fn decode(&self, raw: &str) -> Result<S::Output<T>> {
        let converter = match &self.converter {
            Some(converter) => converter.clone(),
            None => self.engine.converters().resolve::<T>()?,
        };
        S::decode(&self.key, raw, &converter)
    }
}

impl<T: Configurable, S: Shape> fmt::Debug for ValueAccessor<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueAccessor")
            .field("key", &self.key)
            .field("type", &std::any::type_name::<T>())
            .field("shape", &S::NAME)
            .field("suffixes", &self.suffixes.len())
            .field("evaluate_variables", &self.evaluate_variables)
            .field("cache_ttl", &self.cache_ttl)
            .field("default", &self.default)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapSource;
    use crate::source::Source;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn engine_with(entries: &[(&str, &str)]) -> (ConfigEngine, Arc<MapSource>) {
        let source = Arc::new(MapSource::new("test", 100).with_entries(entries.iter().copied()));
        let engine = ConfigEngine::builder()
            .with_source(source.clone() as Arc<dyn Source>)
            .build()
            .unwrap();
        (engine, source)
    }

    #[test]
    fn test_lookup_chain_most_specific_first() {
        let (engine, source) = engine_with(&[
            ("db.url", "base"),
            ("db.url.prod", "prod"),
            ("db.url.eu", "eu"),
            ("db.url.prod.eu", "prod-eu"),
        ]);
        let url = engine
            .accessor("db.url")
            .add_lookup_suffix("prod")
            .add_lookup_suffix("eu");

        assert_eq!(url.value().unwrap(), "prod-eu");
        assert_eq!(url.resolved_key().as_deref(), Some("db.url.prod.eu"));

        source.remove("db.url.prod.eu");
        assert_eq!(url.value().unwrap(), "prod");

        source.remove("db.url.prod");
        assert_eq!(url.value().unwrap(), "eu");
        assert_eq!(url.resolved_key().as_deref(), Some("db.url.eu"));

        source.remove("db.url.eu");
        assert_eq!(url.value().unwrap(), "base");
        assert_eq!(url.resolved_key().as_deref(), Some("db.url"));
    }

    #[test]
    fn test_lookup_chain_skips_empty_candidates_and_absent_suffixes() {
        let (engine, _) = engine_with(&[
            ("app.stage", "dev"),
            ("timeout", "10"),
            ("timeout.dev", ""),
        ]);
        let timeout = engine
            .accessor("timeout")
            .as_type::<u32>()
            .add_lookup_suffix_from(engine.accessor("app.stage"))
            .add_lookup_suffix_from(engine.accessor("app.region"));

        assert_eq!(timeout.value().unwrap(), 10);
        assert_eq!(timeout.resolved_key().as_deref(), Some("timeout"));
    }

    #[test]
    fn test_lookup_chain_picks_candidate_that_expands_to_empty() {
        let (engine, _) = engine_with(&[("db.url", "base"), ("db.url.prod", "${unset:}")]);
        let url = engine
            .accessor("db.url")
            .add_lookup_suffix("prod")
            .with_default("fallback".to_string());

        assert_eq!(url.value().unwrap(), "fallback");
        assert_eq!(url.resolved_key().as_deref(), Some("db.url.prod"));
    }

    #[test]
    fn test_resolved_suffix_follows_source_changes() {
        let (engine, source) = engine_with(&[("app.stage", "dev"), ("url.dev", "d"), ("url.prod", "p")]);
        let url = engine
            .accessor("url")
            .add_lookup_suffix_from(engine.accessor("app.stage"));

        assert_eq!(url.value().unwrap(), "d");
        source.set("app.stage", "prod");
        assert_eq!(url.value().unwrap(), "p");
    }

    #[test]
    fn test_default_for_absent_and_empty() {
        let (engine, _) = engine_with(&[("blank", "")]);

        let missing = engine.accessor("missing").as_type::<u16>();
        assert!(matches!(
            missing.value().unwrap_err(),
            ConfigError::NotFound { ref key } if key == "missing"
        ));
        assert_eq!(missing.optional_value().unwrap(), None);

        let defaulted = engine.accessor("missing").as_type::<u16>().with_default(5432);
        assert_eq!(defaulted.value().unwrap(), 5432);
        assert_eq!(defaulted.default_value(), Some(&5432));

        let blank = engine.accessor("blank").with_default("fallback".to_string());
        assert_eq!(blank.value().unwrap(), "fallback");
    }

    #[test]
    fn test_conversion_errors_surface() {
        let (engine, _) = engine_with(&[("port", "eighty")]);
        let port = engine.accessor("port").as_type::<u16>().with_default(80);
        assert!(matches!(
            port.value().unwrap_err(),
            ConfigError::ConversionFailed { .. }
        ));
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Unconvertible;

    crate::configurable!(Unconvertible);

    #[test]
    fn test_no_converter() {
        let (engine, _) = engine_with(&[("thing", "x")]);
        let thing = engine.accessor("thing").as_type::<Unconvertible>();
        assert!(matches!(
            thing.value().unwrap_err(),
            ConfigError::NoConverter { .. }
        ));
    }

    #[test]
    fn test_list_and_set() {
        let (engine, _) = engine_with(&[("ports", "80, 443,80 ,, 8080"), ("names", "a\\,b,c")]);

        let ports = engine.accessor("ports").as_type::<u16>().as_list();
        assert_eq!(ports.value().unwrap(), vec![80, 443, 80, 8080]);

        let unique = engine.accessor("ports").as_type::<u16>().as_set();
        assert_eq!(unique.value().unwrap(), vec![80, 443, 8080]);

        let names = engine.accessor("names").as_list();
        assert_eq!(names.value().unwrap(), vec!["a,b".to_string(), "c".to_string()]);

        let none = engine.accessor("absent").as_type::<u16>().as_list();
        assert_eq!(none.value().unwrap(), Vec::<u16>::new());
    }

    #[test]
    fn test_dangling_escape_is_malformed() {
        let (engine, _) = engine_with(&[("list", "a,b\\")]);
        let list = engine.accessor("list").as_list();
        assert!(matches!(
            list.value().unwrap_err(),
            ConfigError::MalformedInput { ref key, .. } if key == "list"
        ));
    }

    #[test]
    fn test_custom_converter_applies_per_element() {
        let (engine, _) = engine_with(&[("sizes", "1k,2k"), ("size", "4k")]);
        let parse_kib = |raw: &str| -> std::result::Result<u64, BoxError> {
            let digits = raw.strip_suffix('k').ok_or("missing unit")?;
            Ok(digits.parse::<u64>()? * 1024)
        };

        let sizes = engine
            .accessor("sizes")
            .as_type::<u64>()
            .use_converter(parse_kib)
            .as_list();
        assert_eq!(sizes.value().unwrap(), vec![1024, 2048]);

        let size = engine.accessor("size").as_type::<u64>().use_converter(parse_kib);
        assert_eq!(size.value().unwrap(), 4096);
    }

    #[test]
    fn test_variables_expanded_unless_disabled() {
        let (engine, _) = engine_with(&[("host", "db"), ("url", "pg://${host}/${name:app}")]);

        assert_eq!(engine.accessor("url").value().unwrap(), "pg://db/app");
        assert_eq!(
            engine.accessor("url").evaluate_variables(false).value().unwrap(),
            "pg://${host}/${name:app}"
        );
        assert_eq!(
            engine.accessor("url").raw_value().unwrap().as_deref(),
            Some("pg://db/app")
        );
    }

    #[test]
    fn test_string_default() {
        let (engine, _) = engine_with(&[("base", "30")]);

        let timeout = engine
            .accessor("timeout")
            .as_type::<u32>()
            .with_string_default("${base}")
            .unwrap();
        assert_eq!(timeout.value().unwrap(), 30);

        let hosts = engine
            .accessor("hosts")
            .as_list()
            .with_string_default("a,b")
            .unwrap();
        assert_eq!(hosts.default_value().map(Vec::len), Some(2));

        let err = engine.accessor("timeout").with_string_default("").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidDefault { .. }));

        assert!(engine
            .accessor("timeout")
            .as_type::<u32>()
            .with_string_default("soon")
            .is_err());
    }

    #[test]
    fn test_as_type_resets_default() {
        let (engine, _) = engine_with(&[]);
        let accessor = engine
            .accessor("k")
            .with_default("x".to_string())
            .as_type::<u8>();
        assert_eq!(accessor.default_value(), None);
    }

    #[test]
    fn test_cache_until_change_reported() {
        let (engine, source) = engine_with(&[("level", "1")]);
        let level = engine
            .accessor("level")
            .as_type::<u8>()
            .cache_for(Duration::from_secs(60));
        assert_eq!(level.value().unwrap(), 1);

        // A reported change invalidates the cache even inside the TTL.
        source.set("level", "2");
        assert_eq!(level.value().unwrap(), 2);
    }

    #[test]
    fn test_uncached_reads_see_every_change() {
        let (engine, source) = engine_with(&[("level", "1")]);
        let level = engine.accessor("level").as_type::<u8>();
        assert_eq!(level.value().unwrap(), 1);
        source.set("level", "3");
        assert_eq!(level.value().unwrap(), 3);
    }

    #[test]
    fn test_subscribers_notified_on_change_only() {
        let (engine, source) = engine_with(&[("mode", "a")]);
        let mode = engine.accessor("mode");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&seen);
        let counter = Arc::clone(&calls);
        let subscription = mode.subscribe(move |key, old, new| {
            counter.fetch_add(1, Ordering::SeqCst);
            sink.lock()
                .push((key.to_string(), old.cloned(), new.cloned()));
        });

        mode.value().unwrap();
        mode.value().unwrap();
        source.set("mode", "b");
        mode.value().unwrap();
        source.remove("mode");
        mode.optional_value().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            seen.lock().clone(),
            vec![
                ("mode".to_string(), None, Some("a".to_string())),
                ("mode".to_string(), Some("a".to_string()), Some("b".to_string())),
                ("mode".to_string(), Some("b".to_string()), None),
            ]
        );

        subscription.unsubscribe();
        source.set("mode", "c");
        mode.value().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_too_many_suffixes_are_ignored() {
        let (engine, _) = engine_with(&[("k", "v")]);
        let accessor = (0..MAX_LOOKUP_SUFFIXES + 4)
            .fold(engine.accessor("k"), |accessor, i| accessor.add_lookup_suffix(format!("s{i}")));
        assert_eq!(accessor.suffixes.len(), MAX_LOOKUP_SUFFIXES);
    }
}
