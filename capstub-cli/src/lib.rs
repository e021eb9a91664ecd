//! # capstub-cli
//!
//! CLI library for generating Python type stubs from compiled Cap'n Proto
//! schema graphs.
//!
//! This crate provides the core functionality for the `capstub` CLI tool,
//! including schema graph discovery, document loading, configuration, and
//! file watching. Stub generation itself lives in the `capstub` library.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Configuration management and TOML parsing
//! - [`scanner`] - Schema graph discovery and filtering
//! - [`loader`] - Schema graph documents into loaded modules
//! - [`watcher`] - File system watching for development mode
//! - [`error`] - Error types and handling

pub mod config;
pub mod error;
pub mod loader;
pub mod scanner;
pub mod watcher;

// Re-export main types for convenience
pub use config::{CliArgs, Config, ConfigManager};
pub use error::{CliError, CliResult};
pub use loader::GraphLoader;
pub use scanner::{SchemaFile, SchemaScanner};
pub use watcher::{FileWatcher, WatchEvent};
