//! # capstub
//!
//! Python type-stub generation for compiled Cap'n Proto schemas.
//!
//! This crate turns compiled schema graphs into `.pyi` stub files for
//! [pycapnp](https://github.com/capnproto/pycapnp), one stub per schema
//! file, each paired with a `.py` module that loads the schema through
//! pycapnp at runtime. A `py.typed` marker is written alongside so type
//! checkers pick the package up.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`model`] - Loaded schema graph: modules, nodes, fields, type references
//! - [`walker`] - Concurrent reachability walk into a shared node registry
//! - [`resolver`] - Scoped naming, reserved-member renames, and import edges
//! - [`mapper`] - Python type expressions for every field and method position
//! - [`union`] - Union selector literals and default-value deviation checks
//! - [`emitter`] - `.pyi` and `.py` text assembly
//! - [`writer`] - Mirrored output tree and the `py.typed` marker
//! - [`validator`] - Optional type-checker pass over written stubs
//! - [`diagnostics`] - Warnings and checker findings surfaced to callers
//! - [`error`] - Error types and handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::path::Path;
//!
//! use capstub::{generate, GenerateOptions, LoadedModule};
//!
//! let modules: Vec<LoadedModule> = load_compiled_schemas()?;
//! let report = generate(modules, Path::new("stubs"), &GenerateOptions::default())?;
//!
//! for diagnostic in &report.diagnostics {
//!     eprintln!("{diagnostic}");
//! }
//! ```

use std::path::{Path, PathBuf};

pub mod diagnostics;
pub mod emitter;
pub mod error;
pub mod mapper;
pub mod model;
pub mod resolver;
pub mod union;
pub mod validator;
pub mod walker;
pub mod writer;

// Re-export main types for convenience
pub use diagnostics::{Diagnostic, DiagnosticKind, Severity};
pub use emitter::{EmittedModule, StubEmitter};
pub use error::{GenerateError, GenerateResult};
pub use model::{LoadedModule, Node, NodeId, NodeKind, SCHEMA_VERSION};
pub use resolver::{NameTable, ScopeResolver};
pub use validator::{CheckTarget, CheckerOptions};
pub use walker::{SchemaGraph, SchemaWalker};
pub use writer::{StubWriter, WriteResult};

/// Options controlling a [`generate`] run.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    /// Roots tried, in order, when resolving absolute schema imports.
    pub import_roots: Vec<PathBuf>,
    /// Plan the run without touching the filesystem.
    pub dry_run: bool,
    /// Type-checker pass over the written stubs.
    pub checker: CheckerOptions,
}

/// Outcome of a [`generate`] run.
#[derive(Debug)]
pub struct GenerateReport {
    /// Files produced by the run, in module order with the marker last.
    /// Under `dry_run` these are the files the run would have produced.
    pub written_files: Vec<PathBuf>,
    /// Warnings and checker findings collected across all phases.
    pub diagnostics: Vec<Diagnostic>,
}

impl GenerateReport {
    /// True when any diagnostic should fail the run.
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity() == Severity::Error)
    }
}

/// Generate stubs for every loaded module under `output_root`.
///
/// Phases run strictly in order: every module is walked into one shared
/// registry, names are resolved across the whole graph, module text is
/// emitted concurrently, and only then does anything touch the output
/// tree. Writes are module scoped: a failed pair cleans itself up while
/// the remaining modules still complete, and the first write error is
/// returned once every module has been attempted.
pub fn generate(
    modules: Vec<LoadedModule>,
    output_root: &Path,
    options: &GenerateOptions,
) -> GenerateResult<GenerateReport> {
    let graph = SchemaWalker::new(options.import_roots.clone()).walk(&modules)?;
    let (names, mut diagnostics) = ScopeResolver::new(&graph).resolve(&modules)?;

    let emitter = StubEmitter::new(&graph, &names);
    let outcomes: Vec<GenerateResult<EmittedModule>> = std::thread::scope(|scope| {
        let handles: Vec<_> = modules
            .iter()
            .map(|module| {
                let emitter = &emitter;
                scope.spawn(move || emitter.emit(module))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(outcome) => outcome,
                Err(payload) => std::panic::resume_unwind(payload),
            })
            .collect()
    });
    let mut emitted = Vec::with_capacity(modules.len());
    for outcome in outcomes {
        emitted.push(outcome?);
    }

    let writer = StubWriter::new(output_root, options.dry_run);
    let mut written_files = Vec::new();
    let mut check_targets = Vec::new();
    let mut first_write_error = None;
    let mut wrote_any = false;

    for (module, text) in modules.iter().zip(&emitted) {
        diagnostics.extend(text.diagnostics.iter().cloned());
        match writer.write_module(module, text) {
            Ok(results) => {
                wrote_any = true;
                if let Some(stub) = results.first() {
                    check_targets.push(CheckTarget::new(&module.path, stub.path()));
                }
                for result in results {
                    written_files.push(result.path().to_path_buf());
                }
            }
            Err(error) => {
                if first_write_error.is_none() {
                    first_write_error = Some(error);
                }
            }
        }
    }

    if wrote_any {
        match writer.write_marker() {
            Ok(marker) => written_files.push(marker.path().to_path_buf()),
            Err(error) => {
                if first_write_error.is_none() {
                    first_write_error = Some(error);
                }
            }
        }
    }

    if let Some(error) = first_write_error {
        return Err(error);
    }

    if !options.dry_run {
        diagnostics.extend(validator::check_files(&options.checker, &check_targets));
    }

    Ok(GenerateReport {
        written_files,
        diagnostics,
    })
}
