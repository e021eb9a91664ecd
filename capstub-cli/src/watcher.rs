//! File watcher for development mode.
//!
//! This module provides file system watching functionality to
//! automatically regenerate stubs when compiled schema graphs change.

use crate::error::{CliResult, WatchError};
use crate::scanner::is_schema_graph;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebouncedEvent, Debouncer};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver};
use std::time::Duration;

/// Event types for file changes.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// A schema graph was modified or created.
    Modified(PathBuf),
    /// A schema graph was deleted.
    Deleted(PathBuf),
    /// An error occurred.
    Error(String),
}

/// File watcher for monitoring compiled schema graphs.
pub struct FileWatcher {
    /// Root directory to watch.
    root: PathBuf,
    /// Debounce duration in milliseconds.
    debounce_ms: u64,
}

impl FileWatcher {
    /// Create a new file watcher for the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            debounce_ms: 500,
        }
    }

    /// Set the debounce duration in milliseconds.
    pub fn with_debounce(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    /// Start watching for schema graph changes.
    ///
    /// Returns the debouncer, which must stay alive for events to flow,
    /// and a receiver that yields watch events.
    pub fn watch(&self) -> CliResult<(Debouncer<RecommendedWatcher>, Receiver<WatchEvent>)> {
        let (tx, rx) = channel::<WatchEvent>();

        let mut debouncer = new_debouncer(
            Duration::from_millis(self.debounce_ms),
            move |result: Result<Vec<DebouncedEvent>, notify::Error>| match result {
                Ok(events) => {
                    for event in events {
                        let path = event.path;
                        if !is_schema_graph(&path) {
                            continue;
                        }

                        let watch_event = if path.exists() {
                            WatchEvent::Modified(path)
                        } else {
                            WatchEvent::Deleted(path)
                        };

                        let _ = tx.send(watch_event);
                    }
                }
                Err(e) => {
                    let _ = tx.send(WatchEvent::Error(e.to_string()));
                }
            },
        )
        .map_err(|e| WatchError::Init(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::Recursive)
            .map_err(|e| WatchError::Init(e.to_string()))?;

        Ok((debouncer, rx))
    }

    /// Get the root directory being watched.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl WatchEvent {
    /// Get the path associated with this event.
    pub fn path(&self) -> Option<&Path> {
        match self {
            WatchEvent::Modified(p) | WatchEvent::Deleted(p) => Some(p),
            WatchEvent::Error(_) => None,
        }
    }

    /// Check if this is an error event.
    pub fn is_error(&self) -> bool {
        matches!(self, WatchEvent::Error(_))
    }

    /// Get the error message if this is an error event.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            WatchEvent::Error(msg) => Some(msg),
            _ => None,
        }
    }
}
