//! Configuration management for the CLI.
//!
//! This module handles loading configuration from `capstub.toml` files
//! and merging with command-line arguments.

use crate::error::{CliResult, ConfigError};
use capstub::CheckerOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default configuration filename.
pub const CONFIG_FILENAME: &str = "capstub.toml";

/// Main configuration structure.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output configuration.
    pub output: OutputConfig,

    /// External checker configuration.
    pub checker: CheckerConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output root for generated stub packages.
    pub dir: PathBuf,

    /// Whether to mirror the schema directory structure under the root.
    pub preserve_structure: bool,
}

/// External checker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    /// Whether to run a type checker over each generated stub.
    pub enable: bool,

    /// Checker executable, invoked once per generated `.pyi` file.
    pub command: String,

    /// Worker threads for concurrent checks.
    pub workers: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./typings"),
            preserve_structure: true,
        }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            enable: false,
            command: "pyright".to_string(),
            workers: 4,
        }
    }
}

impl Config {
    /// Checker settings in the shape the library expects.
    pub fn checker_options(&self) -> CheckerOptions {
        CheckerOptions {
            enable: self.checker.enable,
            command: self.checker.command.clone(),
            workers: self.checker.workers,
        }
    }
}

/// Configuration manager for loading and merging configs.
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from a file path.
    ///
    /// An explicitly given path must exist. With no path, the default
    /// location is tried and missing files fall back to defaults.
    pub fn load(path: Option<&Path>) -> CliResult<Config> {
        let config_path = match path {
            Some(explicit) => {
                if !explicit.exists() {
                    return Err(ConfigError::not_found(explicit.to_path_buf()).into());
                }
                explicit.to_path_buf()
            }
            None => {
                let default = PathBuf::from(CONFIG_FILENAME);
                if !default.exists() {
                    return Ok(Config::default());
                }
                default
            }
        };

        let content = std::fs::read_to_string(&config_path).map_err(|e| ConfigError::Io {
            path: config_path.clone(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::invalid_toml(config_path, e.to_string()))?;

        Ok(config)
    }

    /// Merge CLI arguments into configuration.
    ///
    /// CLI arguments take precedence over config file values.
    pub fn merge_cli_args(mut config: Config, args: &CliArgs) -> Config {
        if let Some(ref output) = args.output {
            config.output.dir = output.clone();
        }

        if let Some(preserve_structure) = args.preserve_structure {
            config.output.preserve_structure = preserve_structure;
        }

        if let Some(check) = args.check {
            config.checker.enable = check;
        }

        if let Some(ref command) = args.checker_command {
            config.checker.command = command.clone();
        }

        if let Some(workers) = args.checker_workers {
            config.checker.workers = workers;
        }

        config
    }

    /// Generate default configuration file content with comments.
    pub fn default_config_content() -> &'static str {
        r#"# capstub configuration file

[output]
# Output root for generated stub packages
dir = "./typings"

# Mirror the schema directory structure under the output root.
# Turning this off flattens every stub into the root, which only
# works for schemas without cross-directory imports.
preserve_structure = true

[checker]
# Run a type checker over each generated .pyi file
enable = false

# Checker executable, invoked once per generated stub
command = "pyright"

# Worker threads for concurrent checks
workers = 4
"#
    }
}

/// CLI arguments that can override configuration.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Output root override.
    pub output: Option<PathBuf>,

    /// Structure mirroring override.
    pub preserve_structure: Option<bool>,

    /// Checker enable override.
    pub check: Option<bool>,

    /// Checker command override.
    pub checker_command: Option<String>,

    /// Checker worker count override.
    pub checker_workers: Option<usize>,
}
