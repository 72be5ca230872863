//! Configuration loading.
//!
//! Loads the monitor configuration from `./difc.toml` (or `$DIFC_CONFIG_PATH`).
//! Environment variables override file values; file values override defaults.
//!
//! Precedence: env vars > config file > defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

// ── Top-level config ────────────────────────────────────────────

/// Top-level monitor configuration loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Tracing output.
    pub logging: LoggingConfig,
    /// Audit trail.
    pub audit: AuditConfig,
    /// Enforcement switches.
    pub enforcement: EnforcementConfig,
}

impl MonitorConfig {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// Config file path: `$DIFC_CONFIG_PATH` or `./difc.toml`.
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let path = Self::config_path_with(|key| std::env::var(key).ok());
        Self::load_from(&path)
    }

    /// Load from an explicit path, then apply env overrides.
    ///
    /// # Errors
    ///
    /// Fails if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = Self::load_file(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                tracing::info!(path = %path.display(), "loading config from file");
                Self::from_toml(&contents)
                    .with_context(|| format!("invalid config {}", path.display()))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("no config file found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!("failed to read config file: {e}")),
        }
    }

    /// Resolve the config path using a custom env resolver.
    pub fn config_path_with(env: impl Fn(&str) -> Option<String>) -> PathBuf {
        env("DIFC_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("difc.toml"))
    }

    /// Apply environment variable overrides (env > config > defaults).
    ///
    /// Takes a resolver function so tests need not touch the process
    /// environment.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("DIFC_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env("DIFC_LOGS_DIR") {
            self.logging.logs_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env("DIFC_AUDIT_LOG") {
            self.audit.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env("DIFC_SAME_ORIGIN") {
            match v.parse() {
                Ok(b) => self.enforcement.same_origin_for_content = b,
                Err(_) => tracing::warn!(
                    var = "DIFC_SAME_ORIGIN",
                    value = %v,
                    "ignoring invalid env override"
                ),
            }
        }
    }

    /// Parse a TOML string into config.
    ///
    /// # Errors
    ///
    /// Fails on malformed TOML or mistyped values.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: MonitorConfig =
            toml::from_str(toml_str).context("failed to parse config TOML")?;
        Ok(config)
    }

    /// Directory for rotated log files.
    ///
    /// # Errors
    ///
    /// Fails if no directory is configured and the home directory is unknown.
    pub fn logs_dir(&self) -> Result<PathBuf> {
        match &self.logging.logs_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("logs")),
        }
    }
}

// ── Sections ────────────────────────────────────────────────────

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Tracing filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Write JSON log files instead of logging to stderr only.
    pub json: bool,
    /// Log file directory; `~/.difc/logs` when unset.
    pub logs_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            logs_dir: None,
        }
    }
}

/// `[audit]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines audit file; auditing is off when unset.
    pub path: Option<PathBuf>,
}

/// `[enforcement]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnforcementConfig {
    /// Run the same-origin check before the guards when two sandbox-mode
    /// compartments touch each other.
    pub same_origin_for_content: bool,
    /// URL schemes script source may be fetched from.
    pub allow_fetch_schemes: Vec<String>,
}

impl Default for EnforcementConfig {
    fn default() -> Self {
        Self {
            same_origin_for_content: true,
            allow_fetch_schemes: vec!["http".to_string(), "https".to_string()],
        }
    }
}

/// Resolve the base config directory (`~/.difc`).
///
/// # Errors
///
/// Fails if the home directory cannot be determined.
pub fn config_dir() -> Result<PathBuf> {
    let home = directories::BaseDirs::new()
        .ok_or_else(|| anyhow::anyhow!("cannot determine home directory"))?;
    Ok(home.home_dir().join(".difc"))
}
