//! Schema graph loading.
//!
//! Reads compiled schema graph documents into [`LoadedModule`] values.
//! Paths inside a document reflect wherever the schema compiler ran;
//! [`GraphLoader::load_all`] re-anchors every module and node to the
//! document's location relative to the scan root, so generated stubs
//! mirror the tree that was actually scanned.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use capstub::{LoadedModule, SCHEMA_VERSION};

use crate::error::{CliResult, LoadError};
use crate::scanner::SchemaFile;

/// Loader for compiled schema graph documents.
#[derive(Debug)]
pub struct GraphLoader {
    /// Whether output paths keep the scan directory structure.
    preserve_structure: bool,
}

impl GraphLoader {
    /// Create a loader that mirrors the scan layout.
    pub fn new() -> Self {
        Self {
            preserve_structure: true,
        }
    }

    /// Set whether module paths keep their scan-relative directories.
    ///
    /// When off, every module lands at the output root. Schemas with
    /// cross-directory imports cannot be flattened this way.
    pub fn with_preserve_structure(mut self, preserve: bool) -> Self {
        self.preserve_structure = preserve;
        self
    }

    /// Load every document and re-anchor paths to the scan layout.
    pub fn load_all(&self, files: &[SchemaFile]) -> CliResult<Vec<LoadedModule>> {
        let mut loaded = Vec::with_capacity(files.len());
        for file in files {
            loaded.push((file, self.load_file(file)?));
        }

        // Compiler-spelled paths map onto scan-relative ones; imported
        // node copies in other documents use the same spellings, so the
        // rewrite has to be computed across the whole set first.
        let mapping: HashMap<PathBuf, PathBuf> = loaded
            .iter()
            .map(|(file, module)| (module.path.clone(), self.target_path(file)))
            .collect();

        Ok(loaded
            .into_iter()
            .map(|(_, mut module)| {
                if let Some(target) = mapping.get(&module.path) {
                    module.path = target.clone();
                }
                for node in &mut module.nodes {
                    if let Some(target) = mapping.get(&node.module) {
                        node.module = target.clone();
                    }
                }
                module
            })
            .collect())
    }

    /// Parse a single document, without re-anchoring its paths.
    pub fn load_file(&self, file: &SchemaFile) -> Result<LoadedModule, LoadError> {
        let content = std::fs::read_to_string(&file.path).map_err(|e| LoadError::Io {
            path: file.path.clone(),
            source: e,
        })?;

        let module: LoadedModule = serde_json::from_str(&content)
            .map_err(|e| LoadError::invalid_json(&file.path, e.to_string()))?;

        if module.schema_version != SCHEMA_VERSION {
            return Err(LoadError::unsupported_version(
                &file.path,
                module.schema_version,
                SCHEMA_VERSION,
            ));
        }

        Ok(module)
    }

    /// Scan-anchored schema path for a document.
    fn target_path(&self, file: &SchemaFile) -> PathBuf {
        let relative = if self.preserve_structure {
            file.relative_path.as_path()
        } else {
            Path::new(
                file.relative_path
                    .file_name()
                    .unwrap_or(file.relative_path.as_os_str()),
            )
        };
        strip_json_suffix(relative)
    }
}

impl Default for GraphLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `inc/common.capnp.json` names the schema `inc/common.capnp`.
fn strip_json_suffix(path: &Path) -> PathBuf {
    let spelled = path.to_string_lossy();
    match spelled.strip_suffix(".json") {
        Some(stem) => PathBuf::from(stem),
        None => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstub::NodeId;
    use std::fs;
    use tempfile::TempDir;

    fn graph_json(version: u32, path: &str, root: u64, node: u64, name: &str) -> String {
        format!(
            r#"{{
  "schemaVersion": {version},
  "rootId": {root},
  "path": "{path}",
  "nodes": [
    {{ "id": {root}, "module": "{path}", "nested": [{node}], "kind": {{ "type": "file" }} }},
    {{ "id": {node}, "name": "{name}", "module": "{path}", "parent": {root}, "kind": {{ "type": "struct", "fields": [ {{ "name": "value", "kind": {{ "type": "slot", "typeRef": {{ "type": "text" }} }} }} ] }} }}
  ]
}}"#
        )
    }

    fn schema_file(dir: &TempDir, relative: &str, content: &str) -> SchemaFile {
        let path = dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, content).unwrap();
        SchemaFile {
            path,
            relative_path: PathBuf::from(relative),
        }
    }

    #[test]
    fn test_load_file_parses_document() {
        let dir = TempDir::new().unwrap();
        let file = schema_file(
            &dir,
            "addressbook.capnp.json",
            &graph_json(1, "addressbook.capnp", 1, 2, "Person"),
        );

        let module = GraphLoader::new().load_file(&file).unwrap();

        assert_eq!(module.root_id, NodeId(1));
        assert_eq!(module.path, PathBuf::from("addressbook.capnp"));
        assert_eq!(module.nodes.len(), 2);
        assert_eq!(module.nodes[1].name, "Person");
    }

    #[test]
    fn test_load_all_pins_paths_to_scan_layout() {
        let dir = TempDir::new().unwrap();
        // The document spells a compile-time path that differs from
        // where the scan found it.
        let file = schema_file(
            &dir,
            "inc/common.capnp.json",
            &graph_json(1, "/build/tmp/common.capnp", 100, 101, "Address"),
        );

        let modules = GraphLoader::new().load_all(&[file]).unwrap();

        assert_eq!(modules[0].path, PathBuf::from("inc/common.capnp"));
        for node in &modules[0].nodes {
            assert_eq!(node.module, PathBuf::from("inc/common.capnp"));
        }
    }

    #[test]
    fn test_load_all_flattens_when_structure_off() {
        let dir = TempDir::new().unwrap();
        let file = schema_file(
            &dir,
            "inc/common.capnp.json",
            &graph_json(1, "inc/common.capnp", 100, 101, "Address"),
        );

        let loader = GraphLoader::new().with_preserve_structure(false);
        let modules = loader.load_all(&[file]).unwrap();

        assert_eq!(modules[0].path, PathBuf::from("common.capnp"));
    }

    #[test]
    fn test_load_rejects_unsupported_version() {
        let dir = TempDir::new().unwrap();
        let file = schema_file(
            &dir,
            "future.capnp.json",
            &graph_json(99, "future.capnp", 1, 2, "Thing"),
        );

        let error = GraphLoader::new().load_file(&file).unwrap_err();
        assert!(matches!(
            error,
            LoadError::UnsupportedVersion {
                found: 99,
                supported: SCHEMA_VERSION,
                ..
            }
        ));
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let file = schema_file(&dir, "broken.capnp.json", "not a schema graph");

        let error = GraphLoader::new().load_file(&file).unwrap_err();
        assert!(matches!(error, LoadError::Json { .. }));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let file = SchemaFile {
            path: dir.path().join("absent.capnp.json"),
            relative_path: PathBuf::from("absent.capnp.json"),
        };

        let error = GraphLoader::new().load_file(&file).unwrap_err();
        assert!(matches!(error, LoadError::Io { .. }));
    }
}
