//! Tracing Infrastructure
//!
//! Structured logging through `tracing` and `tracing-subscriber`:
//! - Spans around every generator operation, events for each command and reply
//! - Output formats: pretty, compact, JSON
//! - `RUST_LOG` overrides the configured level
//!
//! # Example
//! ```no_run
//! use hp33120a::{config::GeneratorConfig, tracing_setup};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GeneratorConfig::load()?;
//! tracing_setup::init_from_config(&config)?;
//! info!("generator control started");
//! # Ok(())
//! # }
//! ```

use crate::config::GeneratorConfig;
use crate::error::{GenResult, GeneratorError};
use std::io::IsTerminal;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line with colors, for interactive use
    Pretty,
    /// One line per event, no colors
    #[default]
    Compact,
    /// JSON, one object per line
    Json,
}

impl FromStr for OutputFormat {
    type Err = GeneratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(GeneratorError::Config(format!(
                "Invalid log format '{s}'. Must be one of: pretty, compact, json"
            ))),
        }
    }
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: Level,
    /// Output format
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub with_span_events: bool,
    /// Include file and line numbers
    pub with_file_and_line: bool,
    /// ANSI colors (Pretty only)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::default(),
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Level and format from the application section.
    ///
    /// At `trace` level span events and source locations are switched on.
    /// Colors are used only when stderr is a terminal.
    pub fn from_generator_config(config: &GeneratorConfig) -> GenResult<Self> {
        let level = parse_log_level(&config.application.log_level)?;
        let verbose = level == Level::TRACE;
        Ok(Self::new(level)
            .with_format(config.application.log_format.parse()?)
            .with_span_events(verbose)
            .with_file_and_line(verbose)
            .with_ansi(std::io::stderr().is_terminal()))
    }

    /// Default options at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Set output format
    #[must_use]
    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable span events
    #[must_use]
    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    /// Enable or disable file and line numbers
    #[must_use]
    pub fn with_file_and_line(mut self, enabled: bool) -> Self {
        self.with_file_and_line = enabled;
        self
    }

    /// Enable or disable ANSI colors
    #[must_use]
    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Initialize tracing from the loaded configuration.
pub fn init_from_config(config: &GeneratorConfig) -> GenResult<()> {
    init(TracingConfig::from_generator_config(config)?)
}

/// Initialize tracing with custom options.
///
/// Idempotent: a subscriber installed earlier (by a test or a host
/// application) is left in place and this returns `Ok(())`.
pub fn init(config: TracingConfig) -> GenResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    // Events go to stderr so command output on stdout stays clean
    let fmt_layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .boxed(),
    };

    match tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
    {
        Ok(()) => Ok(()),
        Err(e) if e.to_string().contains("already been set") => Ok(()),
        Err(e) => Err(GeneratorError::Config(format!(
            "Failed to initialize tracing: {e}"
        ))),
    }
}

fn parse_log_level(level: &str) -> GenResult<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(GeneratorError::Config(format!(
            "Invalid log level '{level}'. Must be one of: trace, debug, info, warn, error"
        ))),
    }
}
