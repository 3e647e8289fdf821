mod bridge;
mod observability;
mod pairing;
mod router;
mod server;

pub use bridge::*;
pub use observability::*;
pub use pairing::*;
pub use router::*;
pub use server::*;

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pairing: PairingConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load from a TOML file.  A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&raw)?)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut error = |field: &str, message: &str| {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: field.into(),
                message: message.into(),
            });
        };

        if self.server.port == 0 {
            error("server.port", "port must be greater than 0");
        }
        if self.server.host.is_empty() {
            error("server.host", "host must not be empty");
        }
        if self.pairing.pending_ttl_secs == 0 {
            error("pairing.pending_ttl_secs", "pending TTL must be greater than 0");
        }
        if self.pairing.max_pending == 0 {
            error("pairing.max_pending", "max_pending must be greater than 0");
        }
        if self.router.interactive_timeout_ms == 0 || self.router.media_timeout_ms == 0 {
            error("router", "default timeouts must be greater than 0");
        }
        if self.router.interactive_timeout_ms > self.router.max_timeout_ms
            || self.router.media_timeout_ms > self.router.max_timeout_ms
        {
            error("router.max_timeout_ms", "max_timeout_ms must cover both default timeouts");
        }
        if self.bridge.hello_timeout_secs == 0 {
            error("bridge.hello_timeout_secs", "hello timeout must be greater than 0");
        }

        // Stale pruning faster than the heartbeat would drop healthy nodes.
        if self.bridge.stale_after_secs <= self.bridge.heartbeat_interval_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "bridge.stale_after_secs".into(),
                message: "stale_after_secs should exceed heartbeat_interval_secs".into(),
            });
        }
        if self.server.host == "0.0.0.0" && std::env::var(&self.server.node_token_env).is_err() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.node_token_env".into(),
                message: format!(
                    "listening on all interfaces without {} set; bridge admission is open",
                    self.server.node_token_env
                ),
            });
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_clean() {
        let cfg = Config::default();
        let errors: Vec<_> = cfg
            .validate()
            .into_iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|e| e.field == "server.port" && e.severity == ConfigSeverity::Error));
    }

    #[test]
    fn timeout_above_max_is_an_error() {
        let mut cfg = Config::default();
        cfg.router.media_timeout_ms = cfg.router.max_timeout_ms + 1;
        assert!(cfg.validate().iter().any(|e| e.field == "router.max_timeout_ms"));
    }

    #[test]
    fn load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.server.port, 3290);
    }

    #[test]
    fn load_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[server\nport = ").unwrap();
        assert!(matches!(Config::load(&path), Err(crate::Error::Toml(_))));
    }
}
