//! # Source Hot Reload
//!
//! Watches the file behind a [`FileSource`] and reloads it when it changes,
//! reporting the change to the owning engine so cached values are re-read.

use std::path::PathBuf;
use std::sync::Arc;

use errors::BoxError;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::engine::ConfigEngine;
use crate::file_loader::FileSource;
use crate::source::Source;

/// Source reload event.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceReloadEvent {
    /// The watcher is running.
    Ready,

    /// The file was created or modified and the source reloaded.
    Changed(PathBuf),

    /// The file was removed; the source is now empty.
    Removed(PathBuf),

    Error {
        path: PathBuf,
        error: String,
    },
}

/// Watch a file source and reload it on change.
///
/// # M-CANONICAL-DOCS
///
/// ## Purpose
/// Monitors the file behind `source` with the `notify` crate. On create or
/// modify the source re-reads the file; on removal it empties. Either way the
/// engine records an external change, so accessors with a cache TTL re-read.
///
/// ## Usage
/// ```rust,no_run
/// use std::sync::Arc;
/// use config::{ConfigEngine, FileSource, Source};
/// use config::hot_reload::{SourceReloadEvent, watch_source};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///     let source = Arc::new(FileSource::new("app.toml"));
///     let engine = ConfigEngine::builder()
///         .with_source(source.clone() as Arc<dyn Source>)
///         .build()?;
///     let mut events = watch_source(engine.clone(), source).await?;
///
///     while let Some(event) = events.recv().await {
///         if let SourceReloadEvent::Changed(path) = event {
///             println!("reloaded {}", path.display());
///         }
///     }
///     Ok(())
/// }
/// ```
///
/// ## Event Types
/// - `Ready`: the watcher is running
/// - `Changed`: file content created or modified
/// - `Removed`: file deleted
/// - `Error`: the watcher could not be set up
///
/// The watcher stops once the receiver is dropped.
pub async fn watch_source(
    engine: ConfigEngine,
    source: Arc<FileSource>,
) -> Result<mpsc::Receiver<SourceReloadEvent>, BoxError> {
    let path = source.path().to_path_buf();
    if !path.exists() {
        return Err(Box::new(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Config file not found: {}", path.display()),
        )));
    }

    // Watch the directory so that replace-by-rename and re-creation are seen.
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = path.file_name().map(ToOwned::to_owned);

    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let (event_tx, mut event_rx) = mpsc::channel(100);
        let mut watcher = match RecommendedWatcher::new(
            move |res| {
                let _ = event_tx.blocking_send(res);
            },
            notify::Config::default(),
        ) {
            Ok(w) => w,
            Err(e) => {
                let error_msg = format!("Failed to create file watcher: {e}");
                error!(path = %path.display(), "{error_msg}");
                let _ = tx
                    .send(SourceReloadEvent::Error {
                        path,
                        error: error_msg,
                    })
                    .await;
                return;
            }
        };

        if let Err(e) = watcher.watch(&directory, RecursiveMode::NonRecursive) {
            let error_msg = format!("Failed to watch config file: {e}");
            error!(path = %path.display(), "{error_msg}");
            let _ = tx
                .send(SourceReloadEvent::Error {
                    path,
                    error: error_msg,
                })
                .await;
            return;
        }

        info!(path = %path.display(), "Watching config source");
        let _ = tx.send(SourceReloadEvent::Ready).await;

        loop {
            tokio::select! {
                () = tx.closed() => {
                    debug!(path = %path.display(), "Receiver dropped, stopping watcher");
                    break;
                }
                event_result = event_rx.recv() => {
                    let Some(event_result) = event_result else {
                        break;
                    };

                    let event = match event_result {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Watch error");
                            continue;
                        }
                    };

                    let concerns_source = event
                        .paths
                        .iter()
                        .any(|changed| changed.file_name() == file_name.as_deref());
                    if !concerns_source {
                        continue;
                    }

                    let reload_event = match event.kind {
                        EventKind::Create(_) | EventKind::Modify(_) => {
                            source.reload();
                            info!(path = %path.display(), "Config source reloaded");
                            SourceReloadEvent::Changed(path.clone())
                        }
                        EventKind::Remove(_) => {
                            source.reload();
                            warn!(path = %path.display(), "Config source file removed");
                            SourceReloadEvent::Removed(path.clone())
                        }
                        _ => {
                            debug!(kind = ?event.kind, "Ignoring event");
                            continue;
                        }
                    };
                    engine.on_external_change();

                    if let Err(e) = tx.send(reload_event).await {
                        error!(error = %e, "Failed to send source reload event");
                        break;
                    }
                }
            }
        }
    });

    Ok(rx)
}
