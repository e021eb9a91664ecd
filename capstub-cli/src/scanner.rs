//! Schema graph scanner.
//!
//! This module provides functionality to recursively scan directories for
//! compiled schema graphs (`*.capnp.json`), respecting `.gitignore`
//! patterns and custom filters.

use crate::error::{CliResult, ScanError};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};

/// File name suffix of a compiled schema graph.
pub const GRAPH_SUFFIX: &str = ".capnp.json";

/// Whether a path names a compiled schema graph.
pub(crate) fn is_schema_graph(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().ends_with(GRAPH_SUFFIX))
}

/// A discovered schema graph document.
#[derive(Debug, Clone)]
pub struct SchemaFile {
    /// Absolute path to the document.
    pub path: PathBuf,

    /// Path relative to the scan root.
    pub relative_path: PathBuf,
}

/// Scanner for discovering compiled schema graphs.
#[derive(Debug)]
pub struct SchemaScanner {
    /// Root directory to scan.
    root: PathBuf,

    /// Whether to respect .gitignore files.
    respect_gitignore: bool,

    /// Optional glob filter pattern.
    filter: Option<glob::Pattern>,
}

impl SchemaScanner {
    /// Create a new scanner for the given root directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            respect_gitignore: true,
            filter: None,
        }
    }

    /// Set whether to respect .gitignore files.
    pub fn with_gitignore(mut self, respect: bool) -> Self {
        self.respect_gitignore = respect;
        self
    }

    /// Set a glob filter pattern for files.
    ///
    /// Only graphs matching the pattern will be included.
    pub fn with_filter(mut self, pattern: &str) -> Result<Self, ScanError> {
        let glob_pattern = glob::Pattern::new(pattern)
            .map_err(|e| ScanError::invalid_pattern(pattern, e.to_string()))?;
        self.filter = Some(glob_pattern);
        Ok(self)
    }

    /// Scan the directory and return all discovered schema graphs.
    pub fn scan(&self) -> CliResult<Vec<SchemaFile>> {
        if !self.root.exists() {
            return Err(ScanError::not_found(self.root.clone()).into());
        }

        let mut files = Vec::new();

        let walker = WalkBuilder::new(&self.root)
            .git_ignore(self.respect_gitignore)
            .git_global(self.respect_gitignore)
            .git_exclude(self.respect_gitignore)
            .hidden(false)
            .build();

        for entry in walker {
            let entry = entry.map_err(ScanError::Walk)?;
            let path = entry.path();

            if !path.is_file() || !is_schema_graph(path) {
                continue;
            }

            if let Some(ref pattern) = self.filter {
                let relative = self.relative_path(path);
                if !pattern.matches_path(&relative) {
                    continue;
                }
            }

            files.push(SchemaFile {
                path: path.to_path_buf(),
                relative_path: self.relative_path(path),
            });
        }

        if files.is_empty() {
            return Err(ScanError::no_schema_graphs(self.root.clone()).into());
        }

        // Walk order is platform dependent; module order decides output
        // order downstream, so pin it here.
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(files)
    }

    /// Scan without failing on empty results.
    ///
    /// Returns an empty vector if no graphs are found.
    pub fn scan_allow_empty(&self) -> CliResult<Vec<SchemaFile>> {
        match self.scan() {
            Ok(files) => Ok(files),
            Err(crate::error::CliError::Scan(ScanError::NoSchemaGraphs { .. })) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// Get the relative path from root.
    fn relative_path(&self, path: &Path) -> PathBuf {
        path.strip_prefix(&self.root).unwrap_or(path).to_path_buf()
    }

    /// Get the root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }
}
