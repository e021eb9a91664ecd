//! Integration tests for capstub.
//!
//! These tests drive the full [`capstub::generate`] pipeline end to end:
//! walking, name resolution, emission, output writing, and the optional
//! checker pass, all against a real temporary output tree.

use std::fs;

use tempfile::TempDir;

use capstub::model::{Field, Node, NodeKind, StructNode, TypeRef};
use capstub::{
    generate, CheckerOptions, DiagnosticKind, GenerateError, GenerateOptions, LoadedModule, NodeId,
    Severity,
};

/// Nodes of the shared `inc/common.capnp` schema.
fn common_nodes() -> Vec<Node> {
    vec![
        Node::new(100, "", "inc/common.capnp", NodeKind::File).with_nested(vec![NodeId(101)]),
        Node::new(
            101,
            "Address",
            "inc/common.capnp",
            NodeKind::Struct(StructNode::new(vec![
                Field::slot("street", TypeRef::Text),
                Field::slot("zip", TypeRef::UInt32),
            ])),
        )
        .with_parent(100),
    ]
}

/// A two-module set: `book.capnp` importing `inc/common.capnp`.
///
/// The book module carries the imported nodes in its own node list, the
/// same shape a loader produces for a compiled schema with imports.
fn address_book_modules() -> Vec<LoadedModule> {
    let common = LoadedModule::new(100, "inc/common.capnp", common_nodes());

    let mut book_nodes = vec![
        Node::new(1, "", "book.capnp", NodeKind::File).with_nested(vec![NodeId(2)]),
        Node::new(
            2,
            "Contact",
            "book.capnp",
            NodeKind::Struct(StructNode::new(vec![
                Field::slot("name", TypeRef::Text),
                Field::slot("address", TypeRef::struct_ref(101)),
            ])),
        )
        .with_parent(1),
    ];
    book_nodes.extend(common_nodes());
    let book =
        LoadedModule::new(1, "book.capnp", book_nodes).with_imports(vec!["inc/common.capnp"]);

    vec![common, book]
}

// =============================================================================
// Full Pipeline
// =============================================================================

#[test]
fn test_generate_writes_stub_pairs_and_marker() {
    let out = TempDir::new().unwrap();
    let report = generate(
        address_book_modules(),
        out.path(),
        &GenerateOptions::default(),
    )
    .unwrap();

    let expected = [
        out.path().join("inc/common_capnp.pyi"),
        out.path().join("inc/common_capnp.py"),
        out.path().join("book_capnp.pyi"),
        out.path().join("book_capnp.py"),
        out.path().join("py.typed"),
    ];
    assert_eq!(report.written_files, expected);
    for path in &expected {
        assert!(path.exists(), "missing output file {}", path.display());
    }
    assert_eq!(fs::read_to_string(out.path().join("py.typed")).unwrap(), "");

    let book_pyi = fs::read_to_string(out.path().join("book_capnp.pyi")).unwrap();
    assert!(book_pyi.contains("class _ContactModule(_StructModule):"));
    assert!(book_pyi.contains("from .inc.common_capnp import AddressBuilder, AddressReader"));

    let book_py = fs::read_to_string(out.path().join("book_capnp.py")).unwrap();
    assert!(book_py.contains(
        "import_path = [here, os.path.abspath(os.path.join(here, \"inc\"))]"
    ));
    assert!(book_py.contains("Contact = capnp.load(module_file, imports=import_path).Contact"));
}

#[test]
fn test_generate_reports_reserved_member_renames() {
    let out = TempDir::new().unwrap();
    let report = generate(
        address_book_modules(),
        out.path(),
        &GenerateOptions::default(),
    )
    .unwrap();

    let renamed = report.diagnostics.iter().any(|diagnostic| {
        matches!(
            &diagnostic.kind,
            DiagnosticKind::ReservedNameRename { original, emitted }
                if original == "name" && emitted == "name_"
        )
    });
    assert!(renamed, "expected a rename warning for the `name` field");
    assert!(!report.has_errors());

    let book_pyi = fs::read_to_string(out.path().join("book_capnp.pyi")).unwrap();
    assert!(book_pyi.contains("def name_(self) -> str: ..."));
}

#[test]
fn test_generate_rerun_is_byte_identical() {
    let out = TempDir::new().unwrap();
    let options = GenerateOptions::default();

    generate(address_book_modules(), out.path(), &options).unwrap();
    let first_pyi = fs::read(out.path().join("book_capnp.pyi")).unwrap();
    let first_py = fs::read(out.path().join("inc/common_capnp.py")).unwrap();

    generate(address_book_modules(), out.path(), &options).unwrap();
    assert_eq!(fs::read(out.path().join("book_capnp.pyi")).unwrap(), first_pyi);
    assert_eq!(
        fs::read(out.path().join("inc/common_capnp.py")).unwrap(),
        first_py
    );
}

#[test]
fn test_generate_empty_input_produces_nothing() {
    let out = TempDir::new().unwrap();
    let report = generate(Vec::new(), out.path(), &GenerateOptions::default()).unwrap();

    assert!(report.written_files.is_empty());
    assert!(report.diagnostics.is_empty());
    assert!(fs::read_dir(out.path()).unwrap().next().is_none());
}

// =============================================================================
// Dry Run
// =============================================================================

#[test]
fn test_generate_dry_run_touches_nothing() {
    let out = TempDir::new().unwrap();
    let options = GenerateOptions {
        dry_run: true,
        ..GenerateOptions::default()
    };
    let report = generate(address_book_modules(), out.path(), &options).unwrap();

    assert_eq!(report.written_files.len(), 5);
    assert!(fs::read_dir(out.path()).unwrap().next().is_none());
}

// =============================================================================
// Failure Handling
// =============================================================================

#[test]
fn test_generate_fails_on_unresolved_import() {
    let out = TempDir::new().unwrap();
    let modules = vec![LoadedModule::new(
        1,
        "solo.capnp",
        vec![Node::new(1, "", "solo.capnp", NodeKind::File)],
    )
    .with_imports(vec!["missing.capnp"])];

    let error = generate(modules, out.path(), &GenerateOptions::default()).unwrap_err();
    assert!(matches!(error, GenerateError::UnresolvedModule { .. }));
    assert!(fs::read_dir(out.path()).unwrap().next().is_none());
}

#[test]
fn test_failed_module_write_leaves_others_standing() {
    let out = TempDir::new().unwrap();
    // A directory squatting on the .py target makes that write fail.
    fs::create_dir_all(out.path().join("book_capnp.py")).unwrap();

    let error = generate(
        address_book_modules(),
        out.path(),
        &GenerateOptions::default(),
    )
    .unwrap_err();

    assert!(matches!(error, GenerateError::Write { .. }));
    assert!(out.path().join("inc/common_capnp.pyi").exists());
    assert!(out.path().join("inc/common_capnp.py").exists());
    assert!(out.path().join("py.typed").exists());
    // The failed module's half-written pair was cleaned up.
    assert!(!out.path().join("book_capnp.pyi").exists());
}

// =============================================================================
// Checker Pass
// =============================================================================

#[test]
fn test_generate_checker_failure_fails_the_report() {
    let out = TempDir::new().unwrap();
    let options = GenerateOptions {
        checker: CheckerOptions {
            enable: true,
            command: "false".to_owned(),
            workers: 2,
        },
        ..GenerateOptions::default()
    };
    let report = generate(address_book_modules(), out.path(), &options).unwrap();

    let reports: Vec<_> = report
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagnosticKind::CheckerReport { .. }))
        .collect();
    assert_eq!(reports.len(), 2, "one finding per generated stub");
    assert!(reports.iter().all(|d| d.severity() == Severity::Error));
    assert!(report.has_errors());
}

#[test]
fn test_generate_missing_checker_warns_once() {
    let out = TempDir::new().unwrap();
    let options = GenerateOptions {
        checker: CheckerOptions {
            enable: true,
            command: "capstub-no-such-checker".to_owned(),
            workers: 2,
        },
        ..GenerateOptions::default()
    };
    let report = generate(address_book_modules(), out.path(), &options).unwrap();

    let unavailable: Vec<_> = report
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagnosticKind::CheckerUnavailable { .. }))
        .collect();
    assert_eq!(unavailable.len(), 1);
    assert!(!report.has_errors());
}
