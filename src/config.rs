//! Proxy configuration: structs, parsing, and validation.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::{KeyFormat, TargetRegistry};

/// Widest selector accepted; keeps keys within a `u32`-sized decimal.
const MAX_SELECTOR_DIGITS: usize = 10;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        message: message.into(),
    }
}

// ── Top-level config ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address the proxy listens on.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Exact digit count of a selector segment.
    #[serde(default = "default_selector_digits")]
    pub selector_digits: usize,

    /// Selector key to backend base URL.
    #[serde(default = "default_targets")]
    pub targets: BTreeMap<TargetKeyConfig, String>,

    #[serde(default)]
    pub audit: AuditConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ProxyConfig {
    /// Load config from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml_ng::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if self.selector_digits == 0 || self.selector_digits > MAX_SELECTOR_DIGITS {
            return Err(invalid(
                "selector_digits",
                format!("must be between 1 and {}", MAX_SELECTOR_DIGITS),
            ));
        }

        if self.targets.is_empty() {
            return Err(invalid("targets", "at least one target is required"));
        }
        self.target_registry()?;

        if !self.audit.endpoint.starts_with('/') {
            return Err(invalid("audit.endpoint", "must start with '/'"));
        }
        if self.audit.path.trim().is_empty() {
            return Err(invalid("audit.path", "must not be empty"));
        }
        Ok(())
    }

    /// Parses the listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|e| invalid("listen", format!("invalid address '{}': {}", self.listen, e)))
    }

    /// Builds the immutable target registry from the configured targets.
    pub fn target_registry(&self) -> Result<TargetRegistry, ConfigError> {
        TargetRegistry::new(
            KeyFormat::new(self.selector_digits),
            self.targets.iter().map(|(k, url)| (k.to_string(), url.as_str())),
        )
        .map_err(|message| invalid("targets", message))
    }
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            selector_digits: default_selector_digits(),
            targets: default_targets(),
            audit: AuditConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// A target key as written in YAML: quoted (`"0042"`) or a bare number (`8080`).
///
/// Bare numbers lose leading zeros, so keys like `0042` must be quoted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TargetKeyConfig {
    Text(String),
    Number(u64),
}

impl fmt::Display for TargetKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Number(n) => write!(f, "{}", n),
        }
    }
}

impl From<&str> for TargetKeyConfig {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

// ── Audit ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuditConfig {
    /// Newline-delimited JSON file that receives audit entries.
    #[serde(default = "default_audit_path")]
    pub path: String,

    /// Reserved request path that returns the audit log.
    #[serde(default = "default_audit_endpoint")]
    pub endpoint: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: default_audit_path(),
            endpoint: default_audit_endpoint(),
        }
    }
}

// ── Logging ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:6000".to_string()
}
fn default_selector_digits() -> usize {
    4
}
fn default_targets() -> BTreeMap<TargetKeyConfig, String> {
    BTreeMap::from([
        ("8080".into(), "http://127.0.0.1:8080".to_string()),
        ("5000".into(), "http://127.0.0.1:5000".to_string()),
    ])
}
fn default_audit_path() -> String {
    "requests.log".to_string()
}
fn default_audit_endpoint() -> String {
    "/logs".to_string()
}
fn default_log_level() -> LogLevel {
    LogLevel::Info
}
fn default_log_format() -> LogFormat {
    LogFormat::Text
}

// ── Log level ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            _ => Err(format!(
                "invalid log level '{s}': expected error|warn|info|debug|trace"
            )),
        }
    }
}

// ── Log format ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
