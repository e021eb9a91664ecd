//! External stub validation.
//!
//! Optionally runs the configured type checker, pyright by default, over
//! every generated `.pyi` file on a bounded worker pool. Checker findings
//! become diagnostics and only influence the exit status; the generated
//! output always stands. A checker binary that cannot be launched is itself
//! a warning, never a panic.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex, MutexGuard};

use crate::diagnostics::Diagnostic;

/// External checker settings.
#[derive(Debug, Clone)]
pub struct CheckerOptions {
    /// Whether to run the checker at all.
    pub enable: bool,

    /// Checker executable, invoked once per generated stub.
    pub command: String,

    /// Worker threads for concurrent checks.
    pub workers: usize,
}

impl Default for CheckerOptions {
    fn default() -> Self {
        Self {
            enable: false,
            command: "pyright".to_owned(),
            workers: 4,
        }
    }
}

/// One stub file to check, with the schema module it came from.
#[derive(Debug, Clone)]
pub struct CheckTarget {
    /// Source schema module, for diagnostic attribution.
    pub module: PathBuf,

    /// Generated `.pyi` path to hand to the checker.
    pub file: PathBuf,
}

impl CheckTarget {
    /// Create a target pairing a stub file with its source module.
    pub fn new(module: impl Into<PathBuf>, file: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            file: file.into(),
        }
    }
}

/// Run the configured checker over the given stub files.
///
/// Returns one `CheckerReport` per failing file, sorted by source module. A
/// checker that cannot be launched yields a single `CheckerUnavailable`
/// warning and the remaining files are skipped.
pub fn check_files(options: &CheckerOptions, targets: &[CheckTarget]) -> Vec<Diagnostic> {
    if !options.enable || targets.is_empty() {
        return Vec::new();
    }

    let (sender, receiver) = mpsc::channel::<CheckTarget>();
    for target in targets {
        let _ = sender.send(target.clone());
    }
    drop(sender);

    let receiver = Mutex::new(receiver);
    let findings = Mutex::new(Vec::new());
    let unavailable = AtomicBool::new(false);
    let worker_count = options.workers.max(1).min(targets.len());

    std::thread::scope(|scope| {
        for _ in 0..worker_count {
            scope.spawn(|| loop {
                let next = lock(&receiver).recv();
                let Ok(target) = next else { break };
                if unavailable.load(Ordering::Relaxed) {
                    continue;
                }
                match check_one(&options.command, &target.file) {
                    CheckOutcome::Clean => {}
                    CheckOutcome::Findings(detail) => {
                        lock(&findings).push(Diagnostic::checker_report(
                            &target.module,
                            &target.file,
                            detail,
                        ));
                    }
                    CheckOutcome::Launch(detail) => {
                        if !unavailable.swap(true, Ordering::Relaxed) {
                            lock(&findings)
                                .push(Diagnostic::checker_unavailable(&options.command, detail));
                        }
                    }
                }
            });
        }
    });

    let mut collected = match findings.into_inner() {
        Ok(inner) => inner,
        Err(poisoned) => poisoned.into_inner(),
    };
    collected.sort_by(|a, b| a.module.cmp(&b.module));
    collected
}

enum CheckOutcome {
    Clean,
    Findings(String),
    Launch(String),
}

fn check_one(command: &str, file: &Path) -> CheckOutcome {
    match Command::new(command).arg(file).output() {
        Ok(output) if output.status.success() => CheckOutcome::Clean,
        Ok(output) => {
            let mut detail = String::from_utf8_lossy(&output.stdout).trim().to_owned();
            if detail.is_empty() {
                detail = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            }
            if detail.is_empty() {
                detail = format!("exited with {}", output.status);
            }
            CheckOutcome::Findings(detail)
        }
        Err(err) => CheckOutcome::Launch(err.to_string()),
    }
}

fn lock<'m, T>(mutex: &'m Mutex<T>) -> MutexGuard<'m, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
