//! Non-fatal findings collected during a run.
//!
//! Diagnostics never stop generation. Warnings record deviations between the
//! schema and what the stub surface can express; checker reports carry the
//! external type checker's verdict and only influence the process exit
//! status.

use std::fmt;
use std::path::PathBuf;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Informational deviation; generation output stands.
    Warning,
    /// Check failure; output stands but the run should exit non-zero.
    Error,
}

/// A single non-fatal finding.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    /// Source module the finding applies to.
    pub module: PathBuf,
    /// What was found.
    pub kind: DiagnosticKind,
}

/// Kinds of non-fatal findings.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticKind {
    /// A schema name was rewritten to avoid a reserved spelling.
    ReservedNameRename {
        /// Name as written in the schema.
        original: String,
        /// Name as emitted in the stub.
        emitted: String,
    },

    /// A union branch default cannot be expressed in the stub.
    DefaultValueDeviation {
        /// Qualified field name.
        field: String,
    },

    /// The external checker reported problems for a generated file.
    CheckerReport {
        /// The checked file.
        file: PathBuf,
        /// Checker output, trimmed.
        detail: String,
    },

    /// The external checker could not be invoked at all.
    CheckerUnavailable {
        /// Configured checker command.
        command: String,
        /// Why the invocation failed.
        detail: String,
    },
}

impl Diagnostic {
    /// Record a reserved-name rewrite.
    pub fn reserved_name_rename(
        module: impl Into<PathBuf>,
        original: impl Into<String>,
        emitted: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            kind: DiagnosticKind::ReservedNameRename {
                original: original.into(),
                emitted: emitted.into(),
            },
        }
    }

    /// Record a dropped union-branch default.
    pub fn default_value_deviation(module: impl Into<PathBuf>, field: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            kind: DiagnosticKind::DefaultValueDeviation {
                field: field.into(),
            },
        }
    }

    /// Record a checker finding for one generated file.
    pub fn checker_report(
        module: impl Into<PathBuf>,
        file: impl Into<PathBuf>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            module: module.into(),
            kind: DiagnosticKind::CheckerReport {
                file: file.into(),
                detail: detail.into(),
            },
        }
    }

    /// Record a checker that could not run.
    pub fn checker_unavailable(command: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            module: PathBuf::new(),
            kind: DiagnosticKind::CheckerUnavailable {
                command: command.into(),
                detail: detail.into(),
            },
        }
    }

    /// Severity of this finding.
    pub fn severity(&self) -> Severity {
        match self.kind {
            DiagnosticKind::CheckerReport { .. } => Severity::Error,
            DiagnosticKind::ReservedNameRename { .. }
            | DiagnosticKind::DefaultValueDeviation { .. }
            | DiagnosticKind::CheckerUnavailable { .. } => Severity::Warning,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::ReservedNameRename { original, emitted } => write!(
                f,
                "{}: renamed `{original}` to `{emitted}` to avoid a reserved name",
                self.module.display()
            ),
            DiagnosticKind::DefaultValueDeviation { field } => write!(
                f,
                "{}: default value on union branch `{field}` is not representable in the stub",
                self.module.display()
            ),
            DiagnosticKind::CheckerReport { file, detail } => {
                write!(f, "checker found issues in {}: {detail}", file.display())
            }
            DiagnosticKind::CheckerUnavailable { command, detail } => {
                write!(f, "checker `{command}` could not run: {detail}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename_diagnostic_is_warning() {
        let diag = Diagnostic::reserved_name_rename("a.capnp", "import", "import_");
        assert_eq!(diag.severity(), Severity::Warning);
        let text = diag.to_string();
        assert!(text.contains("`import`"));
        assert!(text.contains("`import_`"));
    }

    #[test]
    fn test_checker_report_is_error_severity() {
        let diag = Diagnostic::checker_report("a.capnp", "out/a_capnp.pyi", "2 errors");
        assert_eq!(diag.severity(), Severity::Error);
        assert!(diag.to_string().contains("a_capnp.pyi"));
    }

    #[test]
    fn test_missing_checker_is_tolerated() {
        let diag = Diagnostic::checker_unavailable("pyright", "No such file or directory");
        assert_eq!(diag.severity(), Severity::Warning);
        assert!(diag.to_string().contains("pyright"));
    }
}
