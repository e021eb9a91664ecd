//! File writer for generated stub modules.
//!
//! Places each module's `.pyi`/`.py` pair under the output root, mirroring
//! the schema's directory structure, and drops the `py.typed` marker next to
//! the top of the tree. Supports dry-run mode. A module whose pair cannot be
//! written completely leaves nothing behind: the partial file is removed
//! before the error propagates.

use std::path::{Component, Path, PathBuf};

use crate::emitter::EmittedModule;
use crate::error::{GenerateError, GenerateResult};
use crate::model::LoadedModule;
use crate::walker::normalize;

/// Marker file name that opts the output tree into PEP 561 typing.
const TYPED_MARKER: &str = "py.typed";

/// Result of writing one file.
#[derive(Debug)]
pub enum WriteResult {
    /// File was written.
    Written {
        /// Path of the written file.
        path: PathBuf,
        /// Number of bytes written.
        bytes: usize,
    },
    /// Dry run, nothing touched the filesystem.
    DryRun {
        /// Path the file would land at.
        path: PathBuf,
    },
}

impl WriteResult {
    /// The target path of this result.
    pub fn path(&self) -> &Path {
        match self {
            WriteResult::Written { path, .. } => path,
            WriteResult::DryRun { path } => path,
        }
    }

    /// Whether the file actually reached the filesystem.
    pub fn was_written(&self) -> bool {
        matches!(self, WriteResult::Written { .. })
    }
}

/// Stub writer with dry-run support.
#[derive(Debug)]
pub struct StubWriter {
    output_root: PathBuf,
    dry_run: bool,
}

impl StubWriter {
    /// Create a writer targeting the given output root.
    pub fn new(output_root: impl Into<PathBuf>, dry_run: bool) -> Self {
        Self {
            output_root: output_root.into(),
            dry_run,
        }
    }

    /// Whether this writer is in dry-run mode.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Target paths for one module's stub pair.
    pub fn module_paths(&self, module: &LoadedModule) -> (PathBuf, PathBuf) {
        let dir = self.output_root.join(mirrored_dir(&module.path));
        let stem = module.stub_stem();
        (
            dir.join(format!("{stem}.pyi")),
            dir.join(format!("{stem}.py")),
        )
    }

    /// Write one module's `.pyi` and `.py` files.
    ///
    /// The pair is all or nothing: if the second write fails, the first file
    /// is removed before the error is returned.
    pub fn write_module(
        &self,
        module: &LoadedModule,
        emitted: &EmittedModule,
    ) -> GenerateResult<Vec<WriteResult>> {
        let (pyi_path, py_path) = self.module_paths(module);
        if self.dry_run {
            return Ok(vec![
                WriteResult::DryRun { path: pyi_path },
                WriteResult::DryRun { path: py_path },
            ]);
        }

        let pyi = self.write_file(&pyi_path, &emitted.pyi)?;
        let py = match self.write_file(&py_path, &emitted.py) {
            Ok(result) => result,
            Err(err) => {
                remove_partial(&pyi_path);
                return Err(err);
            }
        };
        Ok(vec![pyi, py])
    }

    /// Write the empty `py.typed` marker at the output root.
    pub fn write_marker(&self) -> GenerateResult<WriteResult> {
        let path = self.output_root.join(TYPED_MARKER);
        if self.dry_run {
            return Ok(WriteResult::DryRun { path });
        }
        self.write_file(&path, "")
    }

    fn write_file(&self, path: &Path, content: &str) -> GenerateResult<WriteResult> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| GenerateError::write(parent, e))?;
            }
        }
        std::fs::write(path, content).map_err(|e| GenerateError::write(path, e))?;
        Ok(WriteResult::Written {
            path: path.to_path_buf(),
            bytes: content.len(),
        })
    }
}

/// Best-effort removal of a half-written pair member.
fn remove_partial(path: &Path) {
    let _ = std::fs::remove_file(path);
}

/// Directory of a module's outputs relative to the output root.
///
/// Relative schema paths mirror their directory; absolute ones flatten to
/// the root, since their ancestry has no meaning under the output tree.
fn mirrored_dir(schema_path: &Path) -> PathBuf {
    let normalized = normalize(schema_path);
    if normalized.is_absolute() {
        return PathBuf::new();
    }
    let mut dir = PathBuf::new();
    if let Some(parent) = normalized.parent() {
        for component in parent.components() {
            if let Component::Normal(segment) = component {
                dir.push(segment);
            }
        }
    }
    dir
}
