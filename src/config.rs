//! Configuration using Figment
//!
//! Configuration is merged from, in order of increasing precedence:
//! 1. Built-in defaults
//! 2. `hp33120a.toml` (or the file given on the command line)
//! 3. Environment variables prefixed with `HP33120A_`, nested keys split on `__`
//!
//! Serial line parameters and protocol delays are constants of the instrument,
//! not configuration.
//!
//! # Example
//! ```no_run
//! use hp33120a::config::GeneratorConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = GeneratorConfig::load()?;
//! config.validate()?;
//! println!("ARB name: {}", config.arb.name);
//! # Ok(())
//! # }
//! ```

use crate::arb::DEFAULT_ARB_NAME;
use crate::error::{GenResult, GeneratorError};
use crate::scpi::ReplyStrategy;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Config file read by [`GeneratorConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "hp33120a.toml";

/// Prefix for environment overrides, e.g. `HP33120A_CONNECTION__PORT`.
pub const ENV_PREFIX: &str = "HP33120A_";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Logging settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Serial port selection
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Arbitrary waveform settings
    #[serde(default)]
    pub arb: ArbConfig,
    /// Query reply handling
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format (pretty, compact, json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Which serial port to claim
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Port name, e.g. `COM3` or `/dev/ttyUSB0`
    #[serde(default)]
    pub port: Option<String>,
}

/// ARB upload settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbConfig {
    /// Instrument-side waveform name used for selection and upload
    #[serde(default = "default_arb_name")]
    pub name: String,
}

/// Query protocol settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolConfig {
    /// How query replies are collected
    #[serde(default)]
    pub reply: ReplyStrategy,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_arb_name() -> String {
    DEFAULT_ARB_NAME.to_string()
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ArbConfig {
    fn default() -> Self {
        Self {
            name: default_arb_name(),
        }
    }
}

impl GeneratorConfig {
    /// Load from `hp33120a.toml` in the working directory and the environment.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> GenResult<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> GenResult<Self> {
        let config = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Ok(config)
    }

    /// Reject unknown log levels and formats and empty names.
    pub fn validate(&self) -> GenResult<()> {
        let level = self.application.log_level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(GeneratorError::Config(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                LOG_LEVELS.join(", ")
            )));
        }

        let format = self.application.log_format.to_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            return Err(GeneratorError::Config(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                LOG_FORMATS.join(", ")
            )));
        }

        if self.arb.name.trim().is_empty() {
            return Err(GeneratorError::Config("arb.name must not be empty".into()));
        }

        if let Some(port) = &self.connection.port {
            if port.trim().is_empty() {
                return Err(GeneratorError::Config(
                    "connection.port must not be empty when set".into(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = GeneratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.arb.name, "VOLATILE");
        assert_eq!(config.protocol.reply, ReplyStrategy::Settle);
        assert_eq!(config.connection.port, None);
    }

    #[test]
    fn missing_file_yields_defaults() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let config = GeneratorConfig::load_from(dir.path().join("absent.toml"))?;
        assert_eq!(config.arb, ArbConfig::default());
        Ok(())
    }

    #[test]
    fn file_overrides_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(
            file,
            r#"
[application]
log_level = "debug"

[connection]
port = "/dev/ttyUSB0"

[arb]
name = "RAMP2"

[protocol]
reply = "terminator"
"#
        )?;

        let config = GeneratorConfig::load_from(file.path())?;
        assert_eq!(config.application.log_level, "debug");
        assert_eq!(config.application.log_format, "compact");
        assert_eq!(config.connection.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.arb.name, "RAMP2");
        assert_eq!(config.protocol.reply, ReplyStrategy::Terminator);
        assert!(config.validate().is_ok());
        Ok(())
    }

    #[test]
    fn unknown_reply_strategy_fails_to_load() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "[protocol]\nreply = \"eventually\"")?;

        let result = GeneratorConfig::load_from(file.path());
        assert!(matches!(result, Err(GeneratorError::Config(_))));
        Ok(())
    }

    #[test]
    fn invalid_log_level() {
        let mut config = GeneratorConfig::default();
        config.application.log_level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_log_format() {
        let mut config = GeneratorConfig::default();
        config.application.log_format = "xml".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_names_are_rejected() {
        let mut config = GeneratorConfig::default();
        config.arb.name = "  ".into();
        assert!(config.validate().is_err());

        let mut config = GeneratorConfig::default();
        config.connection.port = Some(String::new());
        assert!(config.validate().is_err());
    }
}
