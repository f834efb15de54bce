//! # Strata Configuration Engine
//!
//! Typed, multi-source configuration resolution.
//!
//! This crate provides:
//! - Prioritized configuration sources merged by ordinal (environment,
//!   `.properties`/TOML/YAML files, in-memory overrides)
//! - A converter registry with built-in, explicit and implicitly discovered
//!   converters
//! - `${name}` / `${name:default}` placeholder expansion
//! - Per-key accessors with lookup chains, defaults, list/set decomposition
//!   and TTL caching tied to a change marker
//! - Hot reload of file sources
//!
//! # Best Practices
//!
//! - Build one [`ConfigEngine`] per configuration root and pass it around;
//!   [`provider::default_engine`] exists for callers that cannot
//! - Reuse accessors for keys read repeatedly
//! - Close the engine on shutdown to release converters and sources

pub mod accessor;
pub mod builtin;
pub mod change;
pub mod converter;
pub mod engine;
pub mod env;
pub mod escape;
pub mod file_loader;
pub mod hot_reload;
pub mod map;
pub mod placeholders;
pub mod provider;
pub mod source;
pub mod typeref;

pub use accessor::{List, Scalar, Set, Shape, ValueAccessor};
pub use change::{ChangeListener, ChangeReporter, ChangeSubscription};
pub use converter::{
    BUILTIN_PRIORITY, Configurable, Converter, ConverterProvider, ConverterRegistry,
    DEFAULT_PRIORITY, ErasedConverter, StringConstructor, StringParser,
};
pub use engine::{ConfigEngine, ConfigEngineBuilder};
pub use env::EnvSource;
pub use errors::{BoxError, CloseFailure, ConfigError};
pub use escape::{join_list, split_list};
pub use file_loader::{FileSource, SourceFileError};
pub use hot_reload::watch_source;
pub use map::MapSource;
pub use source::{CONFIG_ORDINAL, Source, SourceInfo, SourceSet};
pub use typeref::TypeRef;

pub type Result<T> = std::result::Result<T, ConfigError>;
