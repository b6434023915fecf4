//! Configuration for the conterm runner
//!
//! Sources, highest priority first:
//! - CLI arguments
//! - Environment variables (`CONTERM_SHELL`, `CONTERM_PALETTE`, `CONTERM_FONT_SIZE`)
//! - Config file (`<config dir>/conterm/config.toml`, or `--config`)
//! - Defaults
//!
//! The merged result is validated before use.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use conterm_core::{GridSize, PaletteName, MAX_FONT_SIZE, MIN_FONT_SIZE};
use conterm_pty::CommandSpec;
use serde::{Deserialize, Serialize};

/// Longest run a session may be given, one day
const MAX_TIMEOUT_SECS: f64 = 86_400.0;

/// CLI arguments for conterm
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "conterm")]
#[command(version)]
#[command(
    about = "Run a program on a pseudoterminal and print the resulting screen",
    long_about = None
)]
pub struct CliArgs {
    /// Path to a config file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Shell program to run
    #[arg(short, long, value_name = "SHELL")]
    pub shell: Option<String>,

    /// TERM value exported to the child
    #[arg(long, value_name = "TERM")]
    pub term: Option<String>,

    /// Palette (xterm, solarized, solarized-black, solarized-white)
    #[arg(short, long, value_name = "PALETTE")]
    pub palette: Option<String>,

    /// Font size in pixels
    #[arg(long, value_name = "SIZE")]
    pub font_size: Option<f32>,

    /// Initial columns
    #[arg(long, value_name = "COLS")]
    pub columns: Option<u16>,

    /// Initial rows
    #[arg(long, value_name = "ROWS")]
    pub rows: Option<u16>,

    /// Scrollback lines
    #[arg(long, value_name = "LINES")]
    pub scrollback: Option<usize>,

    /// Surface width in pixels; resizes the grid after start
    #[arg(long, value_name = "PIXELS", requires = "height")]
    pub width: Option<u32>,

    /// Surface height in pixels
    #[arg(long, value_name = "PIXELS", requires = "width")]
    pub height: Option<u32>,

    /// Seconds to wait for the child before tearing the session down
    #[arg(short, long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Type a line into the session (repeatable)
    #[arg(long = "send-line", value_name = "LINE")]
    pub send_lines: Vec<String>,

    /// Print the final screen as JSON
    #[arg(long)]
    pub json: bool,

    /// Program and arguments to run instead of the shell
    #[arg(last = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Child program configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellConfig {
    /// Program to run (None = login shell from the environment)
    #[serde(default)]
    pub program: Option<String>,
    /// Arguments passed to `program`
    #[serde(default)]
    pub args: Vec<String>,
    /// TERM value exported to the child
    #[serde(default = "default_term")]
    pub term: String,
}

fn default_term() -> String {
    conterm_pty::DEFAULT_TERM.to_string()
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            term: default_term(),
        }
    }
}

/// Font metrics used for grid computation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontConfig {
    /// Font size in pixels
    #[serde(default = "default_font_size")]
    pub size: f32,
    /// Cell advance as a fraction of the font size
    #[serde(default = "default_advance_ratio")]
    pub advance_ratio: f32,
    /// Extra space between lines, clamped to 1.0
    #[serde(default = "default_line_spacing")]
    pub line_spacing: f32,
}

fn default_font_size() -> f32 {
    12.0
}
fn default_advance_ratio() -> f32 {
    0.6
}
fn default_line_spacing() -> f32 {
    1.0
}

impl Default for FontConfig {
    fn default() -> Self {
        Self {
            size: default_font_size(),
            advance_ratio: default_advance_ratio(),
            line_spacing: default_line_spacing(),
        }
    }
}

/// Runner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub shell: ShellConfig,

    #[serde(default)]
    pub font: FontConfig,

    #[serde(default)]
    pub palette: PaletteName,

    /// Initial grid (columns, rows)
    #[serde(default = "default_dimensions")]
    pub dimensions: (u16, u16),

    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,

    /// Surface size in pixels (width, height); None = sized to `dimensions`
    #[serde(default)]
    pub surface: Option<(u32, u32)>,

    /// Rows kept free at the bottom of the surface
    #[serde(default = "default_padding_rows")]
    pub padding_rows: u16,

    /// Seconds to run before closing the session
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: f64,
}

fn default_dimensions() -> (u16, u16) {
    (80, 24)
}
fn default_scrollback_lines() -> usize {
    conterm_core::engine::DEFAULT_SCROLLBACK_LINES
}
fn default_padding_rows() -> u16 {
    conterm_core::geometry::DEFAULT_PADDING_ROWS
}
fn default_timeout_secs() -> f64 {
    10.0
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: ShellConfig::default(),
            font: FontConfig::default(),
            palette: PaletteName::default(),
            dimensions: default_dimensions(),
            scrollback_lines: default_scrollback_lines(),
            surface: None,
            padding_rows: default_padding_rows(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Configuration error
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    pub message: String,
    pub field: Option<String>,
}

impl ConfigError {
    fn field(field: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field: Some(field.to_string()),
        }
    }
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(field) = &self.field {
            write!(f, "Config error in '{}': {}", field, self.message)
        } else {
            write!(f, "Config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration with full precedence:
    /// CLI args > environment variables > config file > defaults
    pub fn load_with_args(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config = match args.config.clone().or_else(Self::default_config_path) {
            // An explicitly named file must load; the default one may be absent
            Some(path) if args.config.is_some() => Self::load_from_file(&path)?,
            Some(path) if path.exists() => match Self::load_from_file(&path) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("Ignoring config file {:?}: {}", path, e);
                    Config::default()
                }
            },
            _ => Config::default(),
        };

        config.apply_env(|name| env::var(name).ok());
        config.apply_cli_args(args)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            message: format!("Failed to read config file: {}", e),
            field: None,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError {
            message: format!("Failed to parse config file: {}", e),
            field: None,
        })
    }

    /// Apply environment overrides read through `var`.
    ///
    /// Unparseable values are logged and skipped.
    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(shell) = var("CONTERM_SHELL") {
            self.shell.program = Some(shell);
            self.shell.args.clear();
        }
        if let Some(palette) = var("CONTERM_PALETTE") {
            match palette.parse() {
                Ok(palette) => self.palette = palette,
                Err(e) => log::warn!("Ignoring CONTERM_PALETTE: {}", e),
            }
        }
        if let Some(size) = var("CONTERM_FONT_SIZE") {
            match size.parse() {
                Ok(size) => self.font.size = size,
                Err(e) => log::warn!("Ignoring CONTERM_FONT_SIZE={:?}: {}", size, e),
            }
        }
    }

    /// Apply CLI arguments to config
    fn apply_cli_args(&mut self, args: &CliArgs) -> Result<(), ConfigError> {
        if let Some((program, rest)) = args.command.split_first() {
            self.shell.program = Some(program.clone());
            self.shell.args = rest.to_vec();
        } else if let Some(shell) = &args.shell {
            self.shell.program = Some(shell.clone());
            self.shell.args.clear();
        }
        if let Some(term) = &args.term {
            self.shell.term = term.clone();
        }
        if let Some(palette) = &args.palette {
            self.palette = palette
                .parse()
                .map_err(|e: String| ConfigError::field("palette", e))?;
        }
        if let Some(size) = args.font_size {
            self.font.size = size;
        }
        if let Some(cols) = args.columns {
            self.dimensions.0 = cols;
        }
        if let Some(rows) = args.rows {
            self.dimensions.1 = rows;
        }
        if let Some(scrollback) = args.scrollback {
            self.scrollback_lines = scrollback;
        }
        if let (Some(width), Some(height)) = (args.width, args.height) {
            self.surface = Some((width, height));
        }
        if let Some(timeout) = args.timeout {
            self.timeout_secs = timeout;
        }
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_FONT_SIZE..=MAX_FONT_SIZE).contains(&self.font.size) {
            return Err(ConfigError::field(
                "font.size",
                format!(
                    "Font size must be between {} and {}",
                    MIN_FONT_SIZE, MAX_FONT_SIZE
                ),
            ));
        }
        if !(self.font.advance_ratio > 0.0 && self.font.advance_ratio <= 2.0) {
            return Err(ConfigError::field(
                "font.advance_ratio",
                "Advance ratio must be in (0, 2]",
            ));
        }
        if !(self.font.line_spacing.is_finite() && self.font.line_spacing >= 0.0) {
            return Err(ConfigError::field(
                "font.line_spacing",
                "Line spacing must be a non-negative number",
            ));
        }

        if self.dimensions.0 == 0 || self.dimensions.1 == 0 {
            return Err(ConfigError::field(
                "dimensions",
                "Columns and rows must be at least 1",
            ));
        }
        if self.scrollback_lines > 10_000_000 {
            return Err(ConfigError::field(
                "scrollback_lines",
                "Scrollback lines must be at most 10,000,000",
            ));
        }
        if self.padding_rows > 16 {
            return Err(ConfigError::field(
                "padding_rows",
                "Padding rows must be at most 16",
            ));
        }
        if let Some((width, height)) = self.surface {
            if width == 0 || height == 0 {
                return Err(ConfigError::field("surface", "Surface must not be empty"));
            }
        }
        if !(self.timeout_secs > 0.0 && self.timeout_secs <= MAX_TIMEOUT_SECS) {
            return Err(ConfigError::field(
                "timeout_secs",
                "Timeout must be between 0 and 86400 seconds",
            ));
        }

        if self.shell.term.is_empty() {
            return Err(ConfigError::field("shell.term", "TERM must not be empty"));
        }
        if matches!(&self.shell.program, Some(program) if program.is_empty()) {
            return Err(ConfigError::field(
                "shell.program",
                "Shell program must not be empty",
            ));
        }

        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("conterm").join("config.toml"))
    }

    /// Command the session runs
    pub fn command(&self) -> CommandSpec {
        let command = match &self.shell.program {
            Some(program) => CommandSpec::new(program).args(self.shell.args.iter()),
            None => CommandSpec::default_shell(),
        };
        command.term(&self.shell.term)
    }

    pub fn grid(&self) -> GridSize {
        GridSize::new(self.dimensions.1, self.dimensions.0)
    }

    /// Run timeout, saturated to the accepted range
    pub fn timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.timeout_secs.clamp(0.0, MAX_TIMEOUT_SECS))
            .unwrap_or(Duration::ZERO)
    }
}
