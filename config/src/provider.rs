//! # Default Engine
//!
//! A process-wide engine for callers that do not want to pass one around.
//! The engine itself stays an ordinary value: any number of independent
//! engines can be built next to the default one.

use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::Result;
use crate::engine::ConfigEngine;

static DEFAULT_ENGINE: OnceLock<Mutex<Option<ConfigEngine>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<ConfigEngine>> {
    DEFAULT_ENGINE.get_or_init(|| Mutex::new(None))
}

/// The default engine, built with the default sources on first use.
pub fn default_engine() -> Result<ConfigEngine> {
    let mut slot = slot().lock();
    if let Some(engine) = slot.as_ref() {
        return Ok(engine.clone());
    }

    let engine = ConfigEngine::builder().add_default_sources().build()?;
    info!("Built default config engine");
    *slot = Some(engine.clone());
    Ok(engine)
}

/// Install `engine` as the default. Returns the engine it replaced, if any.
pub fn register_default(engine: ConfigEngine) -> Option<ConfigEngine> {
    slot().lock().replace(engine)
}

/// Remove the default engine and close it.
///
/// The next call to [`default_engine`] builds a fresh one.
pub fn release_default() -> Result<()> {
    let released = slot().lock().take();
    match released {
        Some(engine) => engine.close().inspect_err(|e| {
            warn!(error = %e, "Default config engine closed with errors");
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::MapSource;
    use crate::source::Source;
    use serial_test::serial;
    use std::sync::Arc;

    #[test]
    #[serial]
    fn test_default_engine_is_shared_until_released() {
        release_default().unwrap();

        let first = default_engine().unwrap();
        let second = default_engine().unwrap();
        let shared = MapSource::new("shared", 1).with_entries([("k", "v")]);
        first.add_sources([Arc::new(shared) as Arc<dyn Source>]);
        assert_eq!(second.raw_value("k").as_deref(), Some("v"));

        release_default().unwrap();
        assert!(first.is_closed());

        let fresh = default_engine().unwrap();
        assert!(!fresh.is_closed());
        assert_eq!(fresh.raw_value("k"), None);
        release_default().unwrap();
    }

    #[test]
    #[serial]
    fn test_register_default_replaces() {
        release_default().unwrap();

        let custom = ConfigEngine::builder()
            .with_source(Arc::new(MapSource::new("custom", 1).with_entries([("who", "custom")])))
            .build()
            .unwrap();
        assert!(register_default(custom).is_none());
        assert_eq!(
            default_engine().unwrap().raw_value("who").as_deref(),
            Some("custom")
        );

        release_default().unwrap();
    }
}
