//! Configuration file loading and resolution.
//!
//! Loads configuration from `config.toml` in the platform config directory
//! (e.g. `~/.config/courier/config.toml`), or from `COURIER_CONFIG`.
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `COURIER_CONFIG`: Override config file path
//! - `COURIER_SHARED_URL`: Shared backend base URL
//! - `COURIER_MODE`: Routing mode for this run (auto, shared, direct)
//! - `COURIER_TIMEOUT`: Direct provider timeout in seconds
//! - `COURIER_DATA_DIR`: Directory holding the local store
//! - `COURIER_FORMAT`: Output format (human, json)
//! - `COURIER_NO_COLOR` or `NO_COLOR`: Disable colors
//! - `COURIER_PRETTY`: Pretty-print JSON output

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::paths::AppPaths;
use crate::cli::args::{Cli, OutputFormat};
use crate::core::logging::LogLevel;
use crate::core::mode::ModePreference;
use crate::core::provider::ProviderId;
use crate::core::service::{CourierSettings, DEFAULT_SHARED_URL};
use crate::error::{CourierError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

pub const ENV_CONFIG: &str = "COURIER_CONFIG";
pub const ENV_SHARED_URL: &str = "COURIER_SHARED_URL";
pub const ENV_MODE: &str = "COURIER_MODE";
pub const ENV_TIMEOUT: &str = "COURIER_TIMEOUT";
pub const ENV_DATA_DIR: &str = "COURIER_DATA_DIR";
pub const ENV_FORMAT: &str = "COURIER_FORMAT";
pub const ENV_NO_COLOR: &str = "COURIER_NO_COLOR";
pub const ENV_NO_COLOR_STD: &str = "NO_COLOR";
pub const ENV_PRETTY: &str = "COURIER_PRETTY";

const MAX_DIRECT_TIMEOUT_SECS: u64 = 600;

// =============================================================================
// Config File
// =============================================================================

/// On-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub shared: SharedConfig,
    pub direct: DirectConfig,
    pub queue: QueueConfig,
    pub providers: BTreeMap<String, ProviderSettings>,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SharedConfig {
    pub base_url: Option<String>,
    pub health_path: String,
    pub chat_path: String,
    pub probe_timeout_ms: u64,
    pub chat_timeout_secs: u64,
    pub reachability_ttl_ms: u64,
}

impl Default for SharedConfig {
    fn default() -> Self {
        let defaults = CourierSettings::default();
        Self {
            base_url: None,
            health_path: defaults.health_path,
            chat_path: defaults.chat_path,
            probe_timeout_ms: duration_ms(defaults.probe_timeout),
            chat_timeout_secs: defaults.shared_timeout.as_secs(),
            reachability_ttl_ms: duration_ms(defaults.reachability_ttl),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectConfig {
    pub timeout_secs: u64,
}

impl Default for DirectConfig {
    fn default() -> Self {
        Self {
            timeout_secs: CourierSettings::default().direct_timeout.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub max_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: CourierSettings::default().max_retries,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub format: Option<String>,
    pub color: bool,
    pub pretty: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: None,
            color: true,
            pretty: false,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Config {
    /// Load from the default location.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().config_file())
    }

    /// Load from `path`; a missing file yields defaults.
    ///
    /// # Errors
    /// Returns [`CourierError::ConfigParse`] for malformed TOML.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| CourierError::ConfigParse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Check bounds and names.
    ///
    /// # Errors
    /// Returns [`CourierError::Config`] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        if let Some(level) = &self.general.log_level {
            if LogLevel::from_arg(level).is_none() {
                return Err(CourierError::Config(format!(
                    "Invalid log_level \"{level}\". Valid levels: trace, debug, info, warn, error"
                )));
            }
        }

        if let Some(url) = &self.shared.base_url {
            validate_url("shared.base_url", url)?;
        }
        for (field, path) in [
            ("shared.health_path", &self.shared.health_path),
            ("shared.chat_path", &self.shared.chat_path),
        ] {
            if !path.starts_with('/') {
                return Err(CourierError::Config(format!(
                    "{field} must start with '/', got \"{path}\""
                )));
            }
        }
        if !(100..=30_000).contains(&self.shared.probe_timeout_ms) {
            return Err(CourierError::Config(
                "shared.probe_timeout_ms must be between 100 and 30000".to_string(),
            ));
        }
        if !(1..=300).contains(&self.shared.chat_timeout_secs) {
            return Err(CourierError::Config(
                "shared.chat_timeout_secs must be between 1 and 300".to_string(),
            ));
        }
        if self.shared.reachability_ttl_ms > 600_000 {
            return Err(CourierError::Config(
                "shared.reachability_ttl_ms must be at most 600000".to_string(),
            ));
        }
        validate_direct_timeout(self.direct.timeout_secs)?;
        if !(1..=100).contains(&self.queue.max_retries) {
            return Err(CourierError::Config(
                "queue.max_retries must be between 1 and 100".to_string(),
            ));
        }

        let valid_providers = ProviderId::ALL
            .iter()
            .map(|p| p.cli_name())
            .collect::<Vec<_>>()
            .join(", ");
        for (name, settings) in &self.providers {
            if ProviderId::parse(name).is_none() {
                return Err(CourierError::Config(format!(
                    "Unknown provider \"{name}\" in [providers]. Valid providers: {valid_providers}"
                )));
            }
            if let Some(url) = &settings.api_base {
                validate_url(&format!("providers.{name}.api_base"), url)?;
            }
        }

        if let Some(format) = &self.output.format {
            parse_format(format)?;
        }
        Ok(())
    }

    /// Per-provider API base overrides.
    #[must_use]
    pub fn api_bases(&self) -> BTreeMap<ProviderId, String> {
        self.providers
            .iter()
            .filter_map(|(name, s)| Some((ProviderId::parse(name)?, s.api_base.clone()?)))
            .collect()
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(CourierError::Config(format!(
            "{field} must be an http(s) URL, got \"{url}\""
        )))
    }
}

fn validate_direct_timeout(secs: u64) -> Result<()> {
    if secs == 0 || secs > MAX_DIRECT_TIMEOUT_SECS {
        return Err(CourierError::Config(format!(
            "Timeout must be between 1 and {MAX_DIRECT_TIMEOUT_SECS} seconds"
        )));
    }
    Ok(())
}

fn parse_format(s: &str) -> Result<OutputFormat> {
    match s.trim().to_lowercase().as_str() {
        "human" => Ok(OutputFormat::Human),
        "json" => Ok(OutputFormat::Json),
        _ => Err(CourierError::Config(format!(
            "Invalid format '{s}'. Valid formats: human, json"
        ))),
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    Cli,
    Env,
    ConfigFile,
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    pub shared_url: ConfigSource,
    pub mode: ConfigSource,
    pub timeout: ConfigSource,
    pub data_dir: ConfigSource,
    pub format: ConfigSource,
    pub no_color: ConfigSource,
    pub pretty: ConfigSource,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Service wiring settings.
    pub settings: CourierSettings,
    /// Mode for this run only; `None` means the stored preference.
    pub mode_override: Option<ModePreference>,
    pub data_dir: PathBuf,
    pub config_path: PathBuf,
    pub format: OutputFormat,
    pub no_color: bool,
    pub pretty: bool,
    /// Level from the config file; CLI and env are handled by logging.
    pub log_level: Option<LogLevel>,
    pub sources: ConfigSources,
}

impl ResolvedConfig {
    /// Resolve from CLI args, the process environment, and the config file.
    ///
    /// # Errors
    /// Returns an error if the config file is invalid or any resolved value
    /// is out of range.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        Self::resolve_with_env(cli, &|key| std::env::var(key).ok())
    }

    /// Resolve with an injected environment lookup.
    ///
    /// # Errors
    /// See [`ResolvedConfig::resolve`].
    pub fn resolve_with_env(cli: &Cli, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let env = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let paths = AppPaths::new();

        let config_path = cli
            .config
            .clone()
            .or_else(|| env(ENV_CONFIG).map(PathBuf::from))
            .unwrap_or_else(|| paths.config_file());
        let config = Config::load_from(&config_path)?;
        config.validate()?;

        let mut sources = ConfigSources::default();

        // Shared backend URL
        let shared_url = if let Some(url) = &cli.shared_url {
            sources.shared_url = ConfigSource::Cli;
            url.clone()
        } else if let Some(url) = env(ENV_SHARED_URL) {
            sources.shared_url = ConfigSource::Env;
            url
        } else if let Some(url) = &config.shared.base_url {
            sources.shared_url = ConfigSource::ConfigFile;
            url.clone()
        } else {
            DEFAULT_SHARED_URL.to_string()
        };
        validate_url("shared URL", &shared_url)?;

        // Session mode
        let mode_override = if let Some(mode) = &cli.mode {
            sources.mode = ConfigSource::Cli;
            Some(ModePreference::from_cli_name(mode)?)
        } else if let Some(mode) = env(ENV_MODE) {
            sources.mode = ConfigSource::Env;
            Some(ModePreference::from_cli_name(&mode)?)
        } else {
            None
        };

        // Direct timeout
        let timeout_secs = if let Some(secs) = cli.timeout {
            sources.timeout = ConfigSource::Cli;
            secs
        } else if let Some(raw) = env(ENV_TIMEOUT) {
            sources.timeout = ConfigSource::Env;
            raw.parse::<u64>().map_err(|_| {
                CourierError::Config(format!("{ENV_TIMEOUT} must be a number of seconds, got \"{raw}\""))
            })?
        } else {
            sources.timeout = ConfigSource::ConfigFile;
            config.direct.timeout_secs
        };
        validate_direct_timeout(timeout_secs)?;

        // Data directory
        let data_dir = if let Some(dir) = &cli.data_dir {
            sources.data_dir = ConfigSource::Cli;
            dir.clone()
        } else if let Some(dir) = env(ENV_DATA_DIR) {
            sources.data_dir = ConfigSource::Env;
            PathBuf::from(dir)
        } else {
            paths.data.clone()
        };

        // Output format
        let format = if cli.json {
            sources.format = ConfigSource::Cli;
            OutputFormat::Json
        } else if let Some(raw) = env(ENV_FORMAT) {
            sources.format = ConfigSource::Env;
            parse_format(&raw)?
        } else if cli.format != OutputFormat::Human {
            sources.format = ConfigSource::Cli;
            cli.format
        } else if let Some(raw) = &config.output.format {
            sources.format = ConfigSource::ConfigFile;
            parse_format(raw)?
        } else {
            OutputFormat::Human
        };

        // Colors
        let no_color = if cli.no_color {
            sources.no_color = ConfigSource::Cli;
            true
        } else if is_truthy(env(ENV_NO_COLOR).as_deref()) || env(ENV_NO_COLOR_STD).is_some() {
            sources.no_color = ConfigSource::Env;
            true
        } else if !config.output.color {
            sources.no_color = ConfigSource::ConfigFile;
            true
        } else {
            false
        };

        let pretty = if cli.pretty {
            sources.pretty = ConfigSource::Cli;
            true
        } else if is_truthy(env(ENV_PRETTY).as_deref()) {
            sources.pretty = ConfigSource::Env;
            true
        } else if config.output.pretty {
            sources.pretty = ConfigSource::ConfigFile;
            true
        } else {
            false
        };

        let settings = CourierSettings {
            shared_url,
            health_path: config.shared.health_path.clone(),
            chat_path: config.shared.chat_path.clone(),
            probe_timeout: Duration::from_millis(config.shared.probe_timeout_ms),
            shared_timeout: Duration::from_secs(config.shared.chat_timeout_secs),
            reachability_ttl: Duration::from_millis(config.shared.reachability_ttl_ms),
            direct_timeout: Duration::from_secs(timeout_secs),
            max_retries: config.queue.max_retries,
            api_bases: config.api_bases(),
            online: !cli.offline,
        };

        Ok(Self {
            settings,
            mode_override,
            data_dir,
            config_path,
            format,
            no_color,
            pretty,
            log_level: config
                .general
                .log_level
                .as_deref()
                .and_then(LogLevel::from_arg),
            sources,
        })
    }

    /// Local store location.
    #[must_use]
    pub fn database_file(&self) -> PathBuf {
        AppPaths::new()
            .with_data_dir(&self.data_dir)
            .database_file()
    }
}

fn is_truthy(value: Option<&str>) -> bool {
    value.is_some_and(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}
