//! # capstub-cli
//!
//! CLI tool for generating Python type stubs from compiled Cap'n Proto
//! schema graphs.
//!
//! ## Usage
//!
//! ```bash
//! # Generate stubs from graphs in the current directory
//! capstub generate
//!
//! # Generate stubs to a specific output root
//! capstub generate --output ./typings
//!
//! # Watch mode for development
//! capstub generate --watch
//!
//! # Dry run to preview changes
//! capstub generate --dry-run
//!
//! # Initialize configuration
//! capstub init
//!
//! # Check that stubs on disk are current
//! capstub validate
//! ```

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use capstub::{
    generate, Diagnostic, GenerateOptions, ScopeResolver, SchemaWalker, Severity, StubEmitter,
    StubWriter,
};
use capstub_cli::{
    config::{CliArgs, Config, ConfigManager},
    error::CliError,
    loader::GraphLoader,
    scanner::{SchemaFile, SchemaScanner},
    watcher::FileWatcher,
};

#[derive(Parser)]
#[command(name = "capstub")]
#[command(author, version, about = "Generate Python type stubs for Cap'n Proto schemas", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate Python stubs from compiled schema graphs
    Generate {
        /// Input directory containing *.capnp.json graphs
        #[arg(short, long, default_value = ".")]
        input: PathBuf,

        /// Output root for generated stub packages
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Root for absolute schema imports (repeatable)
        #[arg(long = "import-root")]
        import_roots: Vec<PathBuf>,

        /// Filter graphs by file path pattern (glob)
        #[arg(long)]
        filter: Option<String>,

        /// Watch for file changes and regenerate
        #[arg(short, long)]
        watch: bool,

        /// Preview changes without writing files
        #[arg(long)]
        dry_run: bool,

        /// Run a type checker over the generated stubs
        #[arg(long)]
        check: bool,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Initialize a new capstub configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "capstub.toml")]
        output: PathBuf,

        /// Overwrite existing configuration file
        #[arg(long)]
        force: bool,
    },

    /// Remove previously generated stubs from the output root
    Clean {
        /// Output root to clean
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Check that stubs on disk match the current schema graphs
    Validate {
        /// Input directory containing *.capnp.json graphs
        #[arg(short, long, default_value = ".")]
        input: PathBuf,

        /// Output root holding the generated stubs
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Root for absolute schema imports (repeatable)
        #[arg(long = "import-root")]
        import_roots: Vec<PathBuf>,

        /// Filter graphs by file path pattern (glob)
        #[arg(long)]
        filter: Option<String>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            match e {
                CliError::Validation(_) => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Generate {
            input,
            output,
            import_roots,
            filter,
            watch,
            dry_run,
            check,
            config,
        } => cmd_generate(
            input,
            output,
            import_roots,
            filter.as_deref(),
            watch,
            dry_run,
            check,
            config,
        ),

        Commands::Init { output, force } => cmd_init(output, force),

        Commands::Clean { output, config } => cmd_clean(output, config),

        Commands::Validate {
            input,
            output,
            import_roots,
            filter,
            config,
        } => cmd_validate(input, output, import_roots, filter.as_deref(), config),
    }
}

/// Generate command implementation.
#[allow(clippy::too_many_arguments)]
fn cmd_generate(
    input: PathBuf,
    output: Option<PathBuf>,
    import_roots: Vec<PathBuf>,
    filter: Option<&str>,
    watch: bool,
    dry_run: bool,
    check: bool,
    config_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = ConfigManager::load(config_path.as_deref())?;
    let config = ConfigManager::merge_cli_args(
        config,
        &CliArgs {
            output,
            check: check.then_some(true),
            ..Default::default()
        },
    );

    if watch {
        run_watch_mode(&input, &config, &import_roots, filter, dry_run)
    } else {
        run_generate(&input, &config, &import_roots, filter, dry_run)
    }
}

/// Run stub generation once.
fn run_generate(
    input: &Path,
    config: &Config,
    import_roots: &[PathBuf],
    filter: Option<&str>,
    dry_run: bool,
) -> Result<(), CliError> {
    println!("{}", "Scanning for compiled schema graphs...".cyan());

    let files = scan_graphs(input, filter)?;
    if files.is_empty() {
        println!("{}", "No compiled schema graphs (*.capnp.json) found.".yellow());
        return Ok(());
    }
    println!("  Found {} schema graph(s)", files.len().to_string().green());

    println!("{}", "Loading schema graphs...".cyan());
    let loader = GraphLoader::new().with_preserve_structure(config.output.preserve_structure);
    let modules = loader.load_all(&files)?;

    println!("{}", "Generating Python stubs...".cyan());
    let options = GenerateOptions {
        import_roots: import_roots.to_vec(),
        dry_run,
        checker: config.checker_options(),
    };
    let report = generate(modules, &config.output.dir, &options)?;

    print_diagnostics(&report.diagnostics);

    if dry_run {
        println!(
            "{} Would write {} file(s):",
            "[dry-run]".yellow(),
            report.written_files.len()
        );
        for path in &report.written_files {
            println!("  {}", path.display());
        }
    } else {
        println!(
            "{} Written {} file(s) under {}",
            "✓".green(),
            report.written_files.len(),
            config.output.dir.display()
        );
    }

    if report.has_errors() {
        return Err(CliError::Validation(
            "type checker reported errors".to_string(),
        ));
    }

    Ok(())
}

/// Run in watch mode.
fn run_watch_mode(
    input: &Path,
    config: &Config,
    import_roots: &[PathBuf],
    filter: Option<&str>,
    dry_run: bool,
) -> Result<(), CliError> {
    println!("{}", "Starting watch mode...".cyan());
    println!("  Watching: {}", input.display());
    println!("  Press Ctrl+C to stop\n");

    // Initial generation
    run_generate(input, config, import_roots, filter, dry_run)?;

    let watcher = FileWatcher::new(input);
    let (_debouncer, rx) = watcher.watch()?;

    println!("\n{}", "Watching for changes...".cyan());

    while let Ok(event) = rx.recv() {
        if event.is_error() {
            println!(
                "{} {}",
                "Watch error:".red(),
                event.error_message().unwrap_or("Unknown error")
            );
            continue;
        }

        if let Some(path) = event.path() {
            println!("\n{} {}", "Schema graph changed:".cyan(), path.display());
        }

        if let Err(e) = run_generate(input, config, import_roots, filter, dry_run) {
            println!("{} {}", "Generation error:".red(), e);
        }

        println!("\n{}", "Watching for changes...".cyan());
    }

    Ok(())
}

/// Init command implementation.
fn cmd_init(output: PathBuf, force: bool) -> Result<(), CliError> {
    if output.exists() && !force {
        println!(
            "{} Configuration file already exists: {}",
            "Error:".red(),
            output.display()
        );
        println!("  Use --force to overwrite");
        return Err(CliError::Validation(
            "Configuration file already exists".to_string(),
        ));
    }

    let content = ConfigManager::default_config_content();
    std::fs::write(&output, content)?;

    println!(
        "{} Created configuration file: {}",
        "✓".green(),
        output.display()
    );

    Ok(())
}

/// Clean command implementation.
fn cmd_clean(output: Option<PathBuf>, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = ConfigManager::load(config_path.as_deref())?;
    let root = output.unwrap_or(config.output.dir);

    if !root.exists() {
        println!("{}", "Output root does not exist, nothing to clean.".yellow());
        return Ok(());
    }

    println!("{}", "Cleaning generated stubs...".cyan());

    let mut removed = 0usize;
    for entry in walkdir::WalkDir::new(&root) {
        let entry = entry.map_err(|e| CliError::Io(e.into()))?;
        if !entry.file_type().is_file() || !is_generated(entry.path()) {
            continue;
        }
        std::fs::remove_file(entry.path())?;
        removed += 1;
    }

    println!(
        "{} Removed {} file(s) from {}",
        "✓".green(),
        removed,
        root.display()
    );

    Ok(())
}

/// Validate command implementation.
fn cmd_validate(
    input: PathBuf,
    output: Option<PathBuf>,
    import_roots: Vec<PathBuf>,
    filter: Option<&str>,
    config_path: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = ConfigManager::load(config_path.as_deref())?;
    let config = ConfigManager::merge_cli_args(
        config,
        &CliArgs {
            output,
            ..Default::default()
        },
    );

    println!("{}", "Validating generated stubs...".cyan());

    let files = scan_graphs(&input, filter)?;
    if files.is_empty() {
        println!("{}", "No compiled schema graphs (*.capnp.json) found.".yellow());
        return Ok(());
    }

    let loader = GraphLoader::new().with_preserve_structure(config.output.preserve_structure);
    let modules = loader.load_all(&files)?;

    // Regenerate in memory and diff against what is on disk.
    let graph = SchemaWalker::new(import_roots).walk(&modules)?;
    let (names, _) = ScopeResolver::new(&graph).resolve(&modules)?;
    let emitter = StubEmitter::new(&graph, &names);
    let writer = StubWriter::new(&config.output.dir, true);

    let mut stale: Vec<PathBuf> = Vec::new();
    for module in &modules {
        let emitted = emitter.emit(module)?;
        let (pyi_path, py_path) = writer.module_paths(module);
        if !file_matches(&pyi_path, &emitted.pyi)? {
            stale.push(pyi_path);
        }
        if !file_matches(&py_path, &emitted.py)? {
            stale.push(py_path);
        }
    }
    let marker = config.output.dir.join("py.typed");
    if !marker.exists() {
        stale.push(marker);
    }

    if stale.is_empty() {
        println!("{} Stubs are up-to-date", "✓".green());
        Ok(())
    } else {
        println!("{} {} file(s) out of date:", "✗".red(), stale.len());
        for path in &stale {
            println!("  {}", path.display());
        }
        println!("  Run 'capstub generate' to update");
        Err(CliError::Validation(format!(
            "{} file(s) out of date",
            stale.len()
        )))
    }
}

/// Discover schema graphs, tolerating an empty result.
fn scan_graphs(input: &Path, filter: Option<&str>) -> Result<Vec<SchemaFile>, CliError> {
    let mut scanner = SchemaScanner::new(input);
    if let Some(pattern) = filter {
        scanner = scanner.with_filter(pattern)?;
    }
    scanner.scan_allow_empty()
}

/// Whether a path was produced by a previous generate run.
fn is_generated(path: &Path) -> bool {
    path.file_name().is_some_and(|name| {
        let name = name.to_string_lossy();
        name == "py.typed" || name.ends_with("_capnp.pyi") || name.ends_with("_capnp.py")
    })
}

/// Print diagnostics with severity coloring.
fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity() {
            Severity::Warning => println!("  {} {}", "Warning:".yellow(), diagnostic),
            Severity::Error => println!("  {} {}", "Error:".red(), diagnostic),
        }
    }
}

/// Print an error with formatting.
fn print_error(error: &CliError) {
    eprintln!("{} {}", "Error:".red().bold(), error);
}

/// Read a file and compare it to the expected text.
fn file_matches(path: &Path, expected: &str) -> Result<bool, CliError> {
    match std::fs::read_to_string(path) {
        Ok(actual) => Ok(actual == expected),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(CliError::Io(e)),
    }
}
