//! # Converter Registry
//!
//! Maps a target type to the single active function turning a raw string into
//! that type.
//!
//! # Resolution Order
//! 1. Explicitly registered converter (built-in or user supplied)
//! 2. Implicit converter, discovered once from the type's string-construction
//!    capability and cached for good
//! 3. `Vec<T>`: derived from the element converter plus list splitting
//!
//! Anything else fails with [`ConfigError::NoConverter`].

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use errors::{BoxError, CloseFailure, ConfigError};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, error};

use crate::Result;
use crate::escape::{DanglingEscape, split_list};
use crate::typeref::{TypeRef, short_type_name};

/// Priority of a [`ConverterProvider`] that does not choose one.
pub const DEFAULT_PRIORITY: i32 = 100;

/// Priority of the converters every registry starts with.
pub const BUILTIN_PRIORITY: i32 = 1;

/// String constructor of a type (`From<String>`).
pub type StringConstructor<T> = fn(String) -> T;

/// Fallible string factory of a type (`FromStr`).
pub type StringParser<T> = fn(&str) -> std::result::Result<T, BoxError>;

/// A type that configuration values can be converted into.
///
/// The two hooks describe the type's own string-construction capability and
/// are consulted, in order, only when no converter is registered for the
/// type. Use the [`configurable!`](crate::configurable) macro to implement
/// this trait for your own types.
pub trait Configurable: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn string_constructor() -> Option<StringConstructor<Self>> {
        None
    }

    fn parser() -> Option<StringParser<Self>> {
        None
    }

    /// Build a converter for this type when none is registered.
    fn derive_converter(_registry: &ConverterRegistry) -> Option<ErasedConverter> {
        implicit_converter::<Self>()
    }
}

/// Implement [`Configurable`] for one or more types.
///
/// ```rust,ignore
/// configurable!(parse: Hostname, Port);     // via FromStr
/// configurable!(from_string: Label);        // via From<String>
/// configurable!(Opaque);                    // registered converters only
/// ```
#[macro_export]
macro_rules! configurable {
    (parse: $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Configurable for $ty {
                fn parser() -> ::std::option::Option<$crate::StringParser<Self>> {
                    ::std::option::Option::Some(|raw: &str| {
                        <$ty as ::std::str::FromStr>::from_str(raw)
                            .map_err(|e| ::std::string::ToString::to_string(&e).into())
                    })
                }
            }
        )+
    };
    (from_string: $($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Configurable for $ty {
                fn string_constructor() -> ::std::option::Option<$crate::StringConstructor<Self>> {
                    ::std::option::Option::Some(<$ty as ::std::convert::From<::std::string::String>>::from)
                }
            }
        )+
    };
    ($($ty:ty),+ $(,)?) => {
        $( impl $crate::Configurable for $ty {} )+
    };
}

impl<T: Configurable> Configurable for Vec<T> {
    fn derive_converter(registry: &ConverterRegistry) -> Option<ErasedConverter> {
        let element = registry.resolve::<T>().ok()?;
        Some(ErasedConverter::new::<Vec<T>, _>(move |raw| {
            split_list(raw)?
                .iter()
                .map(|token| element.convert(token).map_err(BoxError::from))
                .collect()
        }))
    }
}

fn implicit_converter<T: Configurable>() -> Option<ErasedConverter> {
    if let Some(construct) = T::string_constructor() {
        return Some(ErasedConverter::new::<T, _>(move |raw| {
            Ok(construct(raw.to_string()))
        }));
    }
    T::parser().map(|parse| ErasedConverter::new::<T, _>(move |raw| parse(raw)))
}

type ConvertFn =
    dyn Fn(&str) -> std::result::Result<Box<dyn Any + Send + Sync>, BoxError> + Send + Sync;

type CloseFn = dyn Fn() -> std::result::Result<(), BoxError> + Send + Sync;

/// A converter with its target type erased.
#[derive(Clone)]
pub struct ErasedConverter {
    type_name: &'static str,
    convert: Arc<ConvertFn>,
}

impl ErasedConverter {
    pub fn new<T, F>(convert: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            type_name: type_name::<T>(),
            convert: Arc::new(move |raw: &str| {
                convert(raw).map(|value| Box::new(value) as Box<dyn Any + Send + Sync>)
            }),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn convert_to<T: 'static>(&self, raw: &str) -> Result<T> {
        let boxed = (self.convert)(raw).map_err(|e| {
            if e.downcast_ref::<DanglingEscape>().is_some() {
                ConfigError::MalformedInput {
                    key: String::new(),
                    value: raw.to_string(),
                    reason: e.to_string(),
                }
            } else {
                ConfigError::conversion(raw, self.type_name, e)
            }
        })?;
        boxed.downcast::<T>().map(|value| *value).map_err(|_| {
            ConfigError::conversion(
                raw,
                type_name::<T>(),
                format!("converter produced a {}", self.type_name),
            )
        })
    }
}

impl fmt::Debug for ErasedConverter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasedConverter")
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// The active converter for `T`.
pub struct Converter<T> {
    inner: ErasedConverter,
    _target: PhantomData<fn() -> T>,
}

impl<T: 'static> Converter<T> {
    fn new(inner: ErasedConverter) -> Self {
        Self {
            inner,
            _target: PhantomData,
        }
    }

    /// Wrap a plain function as a converter for `T`.
    pub fn from_fn<F>(convert: F) -> Self
    where
        T: Send + Sync,
        F: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Self::new(ErasedConverter::new::<T, _>(convert))
    }

    pub fn convert(&self, raw: &str) -> Result<T> {
        self.inner.convert_to(raw)
    }
}

impl<T> Clone for Converter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _target: PhantomData,
        }
    }
}

/// An externally supplied converter.
pub trait ConverterProvider: Send + Sync + 'static {
    type Target: Configurable;

    fn priority(&self) -> i32 {
        DEFAULT_PRIORITY
    }

    fn convert(&self, raw: &str) -> std::result::Result<Self::Target, BoxError>;

    fn close(&self) -> std::result::Result<(), BoxError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Builtin,
    Explicit,
}

#[derive(Clone)]
struct ConverterEntry {
    converter: ErasedConverter,
    priority: i32,
    origin: Origin,
    closer: Option<Arc<CloseFn>>,
}

/// Holds at most one active converter per target type.
pub struct ConverterRegistry {
    explicit: RwLock<Arc<HashMap<TypeId, ConverterEntry>>>,
    implicit: DashMap<TypeId, ErasedConverter>,
    known: Arc<DashMap<String, TypeRef>>,
    writer: Mutex<()>,
}

impl ConverterRegistry {
    /// A registry holding the built-in converters.
    pub fn new() -> Self {
        let registry = Self::empty();
        crate::builtin::register_builtins(&registry);
        registry
    }

    /// A registry without any converter.
    pub fn empty() -> Self {
        Self {
            explicit: RwLock::new(Arc::new(HashMap::new())),
            implicit: DashMap::new(),
            known: Arc::new(DashMap::new()),
            writer: Mutex::new(()),
        }
    }

    /// Register `convert` for `T` at `priority`.
    ///
    /// Replaces the current converter only when `priority` is strictly higher
    /// (built-ins also yield on equal priority). Two explicit registrations
    /// with the same priority fail with [`ConfigError::ConflictingPriority`].
    pub fn register<T, F>(&self, priority: i32, convert: F) -> Result<()>
    where
        T: Configurable,
        F: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.insert::<T>(ConverterEntry {
            converter: ErasedConverter::new::<T, _>(convert),
            priority,
            origin: Origin::Explicit,
            closer: None,
        })
    }

    /// Register a [`ConverterProvider`]; it is closed with the engine.
    pub fn register_provider<P: ConverterProvider>(&self, provider: P) -> Result<()> {
        let provider = Arc::new(provider);
        let priority = provider.priority();
        let converting = Arc::clone(&provider);
        self.insert::<P::Target>(ConverterEntry {
            converter: ErasedConverter::new::<P::Target, _>(move |raw| converting.convert(raw)),
            priority,
            origin: Origin::Explicit,
            closer: Some(Arc::new(move || provider.close())),
        })
    }

    pub(crate) fn register_builtin<T, F>(&self, convert: F)
    where
        T: Configurable,
        F: Fn(&str) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        // Built-ins go into an empty slot and cannot conflict.
        let _ = self.insert::<T>(ConverterEntry {
            converter: ErasedConverter::new::<T, _>(convert),
            priority: BUILTIN_PRIORITY,
            origin: Origin::Builtin,
            closer: None,
        });
    }

    fn insert<T: Configurable>(&self, entry: ConverterEntry) -> Result<()> {
        let _guard = self.writer.lock();
        let id = TypeId::of::<T>();
        let current = self.explicit();

        if let Some(existing) = current.get(&id) {
            let replaces = match existing.origin {
                Origin::Builtin => entry.priority >= existing.priority,
                Origin::Explicit => {
                    if entry.priority == existing.priority {
                        return Err(ConfigError::ConflictingPriority {
                            type_name: type_name::<T>().to_string(),
                            priority: entry.priority,
                        });
                    }
                    entry.priority > existing.priority
                }
            };
            if !replaces {
                debug!(
                    type_name = type_name::<T>(),
                    priority = entry.priority,
                    active = existing.priority,
                    "Ignoring lower priority converter"
                );
                return Ok(());
            }
        }

        let mut next = HashMap::clone(&current);
        next.insert(id, entry);
        *self.explicit.write() = Arc::new(next);
        self.remember::<T>();
        Ok(())
    }

    fn explicit(&self) -> Arc<HashMap<TypeId, ConverterEntry>> {
        Arc::clone(&self.explicit.read())
    }

    fn remember<T: 'static>(&self) {
        let known = TypeRef::of::<T>();
        self.known.insert(known.name().to_string(), known);
        self.known.insert(short_type_name(known.name()), known);
    }

    /// Types with a registered or discovered converter, by full and short name.
    pub(crate) fn known_types(&self) -> Arc<DashMap<String, TypeRef>> {
        Arc::clone(&self.known)
    }

    /// The converter that applies to `T`.
    pub fn resolve<T: Configurable>(&self) -> Result<Converter<T>> {
        let id = TypeId::of::<T>();

        if let Some(entry) = self.explicit().get(&id) {
            return Ok(Converter::new(entry.converter.clone()));
        }
        if let Some(found) = self.implicit.get(&id) {
            return Ok(Converter::new(found.value().clone()));
        }

        let Some(derived) = T::derive_converter(self) else {
            return Err(ConfigError::NoConverter {
                type_name: type_name::<T>().to_string(),
            });
        };

        // Concurrent first lookups may both derive; the first insert wins.
        let winner = self.implicit.entry(id).or_insert(derived).value().clone();
        self.remember::<T>();
        debug!(type_name = type_name::<T>(), "Discovered implicit converter");
        Ok(Converter::new(winner))
    }

    /// Convert `raw` into `T`. Absent input stays absent.
    pub fn convert<T: Configurable>(&self, raw: Option<&str>) -> Result<Option<T>> {
        match raw {
            None => Ok(None),
            Some(raw) => self.resolve::<T>()?.convert(raw).map(Some),
        }
    }

    pub fn has_converter<T: Configurable>(&self) -> bool {
        self.resolve::<T>().is_ok()
    }

    /// Close every closeable converter, collecting failures.
    pub(crate) fn close_all(&self, failures: &mut Vec<CloseFailure>) {
        for entry in self.explicit().values() {
            let Some(close) = &entry.closer else {
                continue;
            };
            if let Err(e) = close() {
                error!(
                    type_name = entry.converter.type_name(),
                    error = %e,
                    "Failed to close converter"
                );
                failures.push(CloseFailure::new(
                    format!("converter for {}", entry.converter.type_name()),
                    e.to_string(),
                ));
            }
        }
    }
}

impl Default for ConverterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    struct Hostname(String);

    impl FromStr for Hostname {
        type Err = String;

        fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
            if s.contains(' ') {
                Err(format!("invalid hostname '{s}'"))
            } else {
                Ok(Self(s.to_lowercase()))
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Label(String);

    impl From<String> for Label {
        fn from(value: String) -> Self {
            Self(format!("<{value}>"))
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Opaque;

    configurable!(parse: Hostname);
    configurable!(from_string: Label);
    configurable!(Opaque);

    #[test]
    fn test_absent_input_converts_to_absent() {
        let registry = ConverterRegistry::new();
        assert_eq!(registry.convert::<i32>(None).unwrap(), None);
        // No converter needed when nothing is converted.
        assert_eq!(registry.convert::<Opaque>(None).unwrap(), None);
    }

    #[test]
    fn test_conflicting_priority_is_rejected() {
        let registry = ConverterRegistry::new();
        registry.register::<u16, _>(50, |_| Ok(1)).unwrap();

        let err = registry.register::<u16, _>(50, |_| Ok(2)).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ConflictingPriority { priority: 50, .. }
        ));
    }

    #[test]
    fn test_higher_priority_replaces_lower_is_ignored() {
        let registry = ConverterRegistry::new();
        registry.register::<u16, _>(50, |_| Ok(1)).unwrap();
        registry.register::<u16, _>(60, |_| Ok(2)).unwrap();
        registry.register::<u16, _>(10, |_| Ok(3)).unwrap();

        assert_eq!(registry.convert::<u16>(Some("7")).unwrap(), Some(2));
    }

    #[test]
    fn test_explicit_overrides_builtin() {
        let registry = ConverterRegistry::new();
        assert_eq!(registry.convert::<i64>(Some("5")).unwrap(), Some(5));

        registry
            .register::<i64, _>(BUILTIN_PRIORITY, |raw| Ok(raw.len() as i64))
            .unwrap();
        assert_eq!(registry.convert::<i64>(Some("12345")).unwrap(), Some(5));
    }

    #[test]
    fn test_implicit_parse_discovery() {
        let registry = ConverterRegistry::new();
        assert_eq!(
            registry.convert::<Hostname>(Some("Example.ORG")).unwrap(),
            Some(Hostname("example.org".to_string()))
        );

        let err = registry.convert::<Hostname>(Some("bad host")).unwrap_err();
        match err {
            ConfigError::ConversionFailed { raw, reason, .. } => {
                assert_eq!(raw, "bad host");
                assert!(reason.contains("invalid hostname"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_implicit_string_constructor_discovery() {
        let registry = ConverterRegistry::new();
        assert_eq!(
            registry.convert::<Label>(Some("x")).unwrap(),
            Some(Label("<x>".to_string()))
        );
    }

    #[test]
    fn test_no_converter() {
        let registry = ConverterRegistry::new();
        let err = registry.convert::<Opaque>(Some("anything")).unwrap_err();
        assert!(matches!(err, ConfigError::NoConverter { .. }));
        assert!(!registry.has_converter::<Opaque>());
    }

    #[test]
    fn test_array_converter_from_element() {
        let registry = ConverterRegistry::new();
        assert_eq!(
            registry.convert::<Vec<u8>>(Some("1, 2,3")).unwrap(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(
            registry.convert::<Vec<String>>(Some("a\\,b,c")).unwrap(),
            Some(vec!["a,b".to_string(), "c".to_string()])
        );
        assert!(registry.convert::<Vec<u8>>(Some("1,x")).is_err());
        assert!(!registry.has_converter::<Vec<Opaque>>());
    }

    #[test]
    fn test_array_converter_reports_dangling_escape_as_malformed() {
        let registry = ConverterRegistry::new();
        let err = registry
            .convert::<Vec<String>>(Some("a,b\\"))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MalformedInput { ref value, .. } if value == "a,b\\"
        ));
        assert!(matches!(
            registry.convert::<Vec<u8>>(Some("1,x")),
            Err(ConfigError::ConversionFailed { .. })
        ));
    }

    #[test]
    fn test_concurrent_implicit_discovery_converges() {
        let registry = Arc::new(ConverterRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.convert::<Hostname>(Some("Node")).unwrap())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), Some(Hostname("node".to_string())));
        }
        assert_eq!(registry.implicit.len(), 1);
    }

    struct ClosingProvider {
        closes: Arc<AtomicUsize>,
    }

    impl ConverterProvider for ClosingProvider {
        type Target = Hostname;

        fn convert(&self, raw: &str) -> std::result::Result<Hostname, BoxError> {
            Ok(Hostname(format!("provided-{raw}")))
        }

        fn close(&self) -> std::result::Result<(), BoxError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Err("socket already released".into())
        }
    }

    #[test]
    fn test_provider_takes_precedence_and_is_closed() {
        let closes = Arc::new(AtomicUsize::new(0));
        let registry = ConverterRegistry::new();
        registry
            .register_provider(ClosingProvider {
                closes: Arc::clone(&closes),
            })
            .unwrap();

        assert_eq!(
            registry.convert::<Hostname>(Some("a")).unwrap(),
            Some(Hostname("provided-a".to_string()))
        );

        let mut failures = Vec::new();
        registry.close_all(&mut failures);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.len(), 1);
        assert!(failures[0].component.contains("Hostname"));
    }
}
