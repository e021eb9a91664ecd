//! Error types for the CLI.
//!
//! This module defines all error types used throughout the CLI,
//! providing detailed error messages with context for debugging.

use std::path::PathBuf;
use thiserror::Error;

use capstub::GenerateError;

/// Result type alias for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Main error type for CLI operations.
#[derive(Debug, Error)]
pub enum CliError {
    /// Error during schema graph discovery.
    #[error("Failed to scan directory: {0}")]
    Scan(#[from] ScanError),

    /// Error loading a compiled schema graph.
    #[error("Failed to load schema graph: {0}")]
    Load(#[from] LoadError),

    /// Error during stub generation.
    #[error("Failed to generate stubs: {0}")]
    Generate(#[from] GenerateError),

    /// Error loading configuration.
    #[error("Failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    /// Error during file watching.
    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    /// Validation failed: stubs out of date or checker findings.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Generic IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error during schema graph discovery.
#[derive(Debug, Error)]
pub enum ScanError {
    /// Directory does not exist.
    #[error("Directory not found: {path}")]
    DirectoryNotFound { path: PathBuf },

    /// No compiled schema graphs found in directory.
    #[error("No compiled schema graphs (*.capnp.json) found in: {path}")]
    NoSchemaGraphs { path: PathBuf },

    /// Invalid filter pattern.
    #[error("Invalid filter pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    /// Error from ignore crate walker.
    #[error("Walk error: {0}")]
    Walk(#[from] ignore::Error),
}

/// Error loading a compiled schema graph.
#[derive(Debug, Error)]
pub enum LoadError {
    /// Document is not a valid schema graph.
    #[error("Invalid schema graph in {path}: {message}")]
    Json { path: PathBuf, message: String },

    /// Document version this build does not understand.
    #[error("{path} has document version {found}, this build supports version {supported}")]
    UnsupportedVersion {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    /// IO error reading the document.
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("Configuration file not found: {path}")]
    NotFound { path: PathBuf },

    /// Invalid TOML syntax.
    #[error("Invalid TOML in {path}: {message}")]
    InvalidToml { path: PathBuf, message: String },

    /// IO error reading config.
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error during file watching.
#[derive(Debug, Error)]
pub enum WatchError {
    /// Failed to initialize watcher.
    #[error("Failed to initialize file watcher: {0}")]
    Init(String),

    /// Error from notify crate.
    #[error("Watch notification error: {0}")]
    Notify(String),
}

impl ScanError {
    /// Create a directory not found error.
    pub fn not_found(path: PathBuf) -> Self {
        Self::DirectoryNotFound { path }
    }

    /// Create a no schema graphs error.
    pub fn no_schema_graphs(path: PathBuf) -> Self {
        Self::NoSchemaGraphs { path }
    }

    /// Create an invalid pattern error.
    pub fn invalid_pattern(pattern: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPattern {
            pattern: pattern.into(),
            message: message.into(),
        }
    }
}

impl LoadError {
    /// Create an invalid JSON error.
    pub fn invalid_json(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Json {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create an unsupported version error.
    pub fn unsupported_version(path: impl Into<PathBuf>, found: u32, supported: u32) -> Self {
        Self::UnsupportedVersion {
            path: path.into(),
            found,
            supported,
        }
    }
}

impl ConfigError {
    /// Create a not found error.
    pub fn not_found(path: PathBuf) -> Self {
        Self::NotFound { path }
    }

    /// Create an invalid TOML error.
    pub fn invalid_toml(path: PathBuf, message: impl Into<String>) -> Self {
        Self::InvalidToml {
            path,
            message: message.into(),
        }
    }
}
