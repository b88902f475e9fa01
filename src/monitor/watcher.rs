//! Filesystem watch facade over the native change-notification service.
//!
//! [`FsWatcher`] manages a set of watch points keyed by the absolute path
//! they were installed with and multiplexes events from all of them onto a
//! single bounded channel. Directories are watched recursively, regular
//! files individually. A top-level symlink is followed once when the watch
//! is installed; links inside a watched tree are not followed.

use notify::{
    event::ModifyKind, Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;

/// Errors that can occur in the filesystem watch layer.
#[derive(Error, Debug)]
pub enum WatcherError {
    /// The underlying notifier could not be constructed.
    #[error("Failed to create watcher: {0}")]
    Creation(#[from] notify::Error),

    /// The watch target does not exist. Callers treat this as a soft
    /// failure for symlink targets.
    #[error("Watch target {} does not exist", .path.display())]
    NotFound {
        /// The path that was handed to [`WatchControl::watch`].
        path: PathBuf,
    },

    /// The watch target exists but could not be inspected.
    #[error("Failed to stat {}: {source}", .path.display())]
    Stat {
        /// The path that was handed to [`WatchControl::watch`].
        path: PathBuf,
        /// The stat error.
        source: io::Error,
    },

    /// The notifier rejected the watch point.
    #[error("Failed to watch path {}: {source}", .path.display())]
    WatchPath {
        /// The path the watch was installed on.
        path: PathBuf,
        /// The notifier error.
        source: notify::Error,
    },

    /// An unwatch was requested for a path no watch was installed on.
    #[error("No watch registered for {}", .path.display())]
    NotWatched {
        /// The path handed to [`WatchControl::unwatch`].
        path: PathBuf,
    },
}

/// A change event for a single real path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    /// The absolute path the change was reported against.
    pub path: PathBuf,
    /// Diagnostic classification of the change. Consumers that rescan
    /// recursively only need the path.
    pub kind: FsEventKind,
}

/// Simplified event kinds, kept for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Create,
    Modify,
    Remove,
    Rename,
    Other,
}

impl From<EventKind> for FsEventKind {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Create(_) => FsEventKind::Create,
            EventKind::Modify(ModifyKind::Name(_)) => FsEventKind::Rename,
            EventKind::Modify(_) => FsEventKind::Modify,
            EventKind::Remove(_) => FsEventKind::Remove,
            _ => FsEventKind::Other,
        }
    }
}

/// Watch-point control surface.
///
/// This is the engine's only polymorphism point: production code uses
/// [`FsWatcher`], tests drive the engine with an in-memory fake that
/// synthesizes events.
pub trait WatchControl: Send {
    /// Installs a watch on `path`. Idempotent for an identical path.
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError>;

    /// Removes a watch previously installed with the identical path.
    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError>;
}

/// Manages filesystem watch points and multiplexes their events.
///
/// Construction follows the `(control, receiver)` shape: the receiver is
/// the single ordered stream of events from every installed watch point.
pub struct FsWatcher {
    inner: RecommendedWatcher,
    watched: HashMap<PathBuf, RecursiveMode>,
}

impl FsWatcher {
    /// Creates a new watcher with a bounded event channel.
    ///
    /// The notifier callback forwards into the channel with a blocking send,
    /// so bursts beyond `buffer` apply backpressure to the notification
    /// layer instead of dropping events.
    pub fn new(buffer: usize) -> Result<(Self, mpsc::Receiver<FsEvent>), WatcherError> {
        let (tx, rx) = mpsc::channel(buffer);

        let config = Config::default().with_compare_contents(false);

        let inner = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Access(_)) {
                        return;
                    }
                    let kind = FsEventKind::from(event.kind);
                    for path in event.paths {
                        if tx.blocking_send(FsEvent { path, kind }).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => {
                    if err.paths.is_empty() {
                        tracing::warn!("watch error: {err}");
                    } else {
                        // Overflow and similar errors name the affected
                        // watch roots; surface them as changes there.
                        for path in err.paths {
                            let event = FsEvent {
                                path,
                                kind: FsEventKind::Other,
                            };
                            if tx.blocking_send(event).is_err() {
                                return;
                            }
                        }
                    }
                }
            },
            config,
        )?;

        Ok((
            Self {
                inner,
                watched: HashMap::new(),
            },
            rx,
        ))
    }
}

impl WatchControl for FsWatcher {
    fn watch(&mut self, path: &Path) -> Result<(), WatcherError> {
        // Stat follows a top-level symlink; the recursive watch below does
        // not follow links inside the tree.
        let meta = fs::metadata(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                WatcherError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                WatcherError::Stat {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        if self.watched.contains_key(path) {
            return Ok(());
        }

        let mode = if meta.is_dir() {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        self.inner
            .watch(path, mode)
            .map_err(|source| WatcherError::WatchPath {
                path: path.to_path_buf(),
                source,
            })?;
        self.watched.insert(path.to_path_buf(), mode);

        tracing::debug!(path = %path.display(), ?mode, "installed watch");
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<(), WatcherError> {
        if self.watched.remove(path).is_none() {
            return Err(WatcherError::NotWatched {
                path: path.to_path_buf(),
            });
        }
        self.inner
            .unwatch(path)
            .map_err(|source| WatcherError::WatchPath {
                path: path.to_path_buf(),
                source,
            })?;

        tracing::debug!(path = %path.display(), "removed watch");
        Ok(())
    }
}
