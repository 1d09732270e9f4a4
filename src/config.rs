//! TOML configuration for the harness.
//!
//! Every section is optional; a missing key takes its compiled-in default.
//! The file is looked up via `WSREGRESS_CONFIG`, then `./wsregress.toml`.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::scenarios::{BurstSettings, ScenarioSettings};
use crate::sequencer::Registry;

pub const CONFIG_ENV_VAR: &str = "WSREGRESS_CONFIG";
pub const LOCAL_CONFIG_FILE: &str = "wsregress.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub burst: BurstConfig,
    #[serde(default)]
    pub suite: SuiteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HarnessConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded harness configuration");
        Ok(config)
    }

    /// Try, in order: `$WSREGRESS_CONFIG`, `./wsregress.toml`, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "WSREGRESS_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let local = Path::new(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load(local) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %local.display(),
                        error = %e,
                        "local config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    pub fn scenario_settings(&self) -> ScenarioSettings {
        ScenarioSettings {
            connect_timeout: Duration::from_millis(self.probe.connect_timeout_ms),
            reply_timeout: self.probe.reply_timeout_ms.map(Duration::from_millis),
            burst: BurstSettings {
                messages: self.burst.messages,
                small_size: self.burst.small_size,
                large_size: self.burst.large_size,
                settle_window: Duration::from_millis(self.burst.settle_ms),
            },
        }
    }

    pub fn dispatch_delay(&self) -> Duration {
        Duration::from_millis(self.suite.dispatch_delay_ms)
    }

    /// Disable every test listed in `[suite] disabled`.
    pub fn apply_selection(&self, registry: &mut Registry) -> Result<()> {
        for name in &self.suite.disabled {
            registry
                .set_enabled(name, false)
                .with_context(|| format!("config disables unknown test '{}'", name))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// The server under test. TLS tests use `port + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    pub host: String,
    pub port: u16,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 44010,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub connect_timeout_ms: u64,
    /// Unset: wait for echoes indefinitely.
    pub reply_timeout_ms: Option<u64>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3000,
            reply_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BurstConfig {
    pub messages: usize,
    pub small_size: usize,
    pub large_size: usize,
    pub settle_ms: u64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            messages: 500,
            small_size: 50,
            large_size: 50_000,
            settle_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Test names to skip.
    pub disabled: Vec<String>,
    pub dispatch_delay_ms: u64,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            disabled: Vec::new(),
            dispatch_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// Emit diagnostics as JSON lines.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::default_suite;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = HarnessConfig::default();

        assert_eq!(cfg.target.host, "127.0.0.1");
        assert_eq!(cfg.target.port, 44010);
        assert_eq!(cfg.probe.connect_timeout_ms, 3000);
        assert!(cfg.probe.reply_timeout_ms.is_none());
        assert_eq!(cfg.burst.messages, 500);
        assert_eq!(cfg.burst.small_size, 50);
        assert_eq!(cfg.burst.large_size, 50_000);
        assert_eq!(cfg.burst.settle_ms, 2000);
        assert!(cfg.suite.disabled.is_empty());
        assert_eq!(cfg.suite.dispatch_delay_ms, 10);
        assert_eq!(cfg.logging.level, "info");
        assert!(!cfg.logging.json);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[target]
host = "ws.example.net"
port = 8080

[probe]
connect_timeout_ms = 1500
reply_timeout_ms = 10000

[burst]
messages = 100
small_size = 10
large_size = 1000
settle_ms = 250

[suite]
disabled = ["Websocket basic TLS connection test"]
dispatch_delay_ms = 0

[logging]
level = "debug"
json = true
"#;

        let cfg: HarnessConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.target.host, "ws.example.net");
        assert_eq!(cfg.target.port, 8080);
        assert_eq!(cfg.probe.reply_timeout_ms, Some(10_000));
        assert_eq!(cfg.burst.settle_ms, 250);
        assert_eq!(cfg.suite.disabled.len(), 1);
        assert!(cfg.logging.json);

        let settings = cfg.scenario_settings();
        assert_eq!(settings.connect_timeout, Duration::from_millis(1500));
        assert_eq!(settings.reply_timeout, Some(Duration::from_secs(10)));
        assert_eq!(settings.burst.messages, 100);
        assert_eq!(settings.burst.settle_window, Duration::from_millis(250));
        assert_eq!(cfg.dispatch_delay(), Duration::ZERO);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
[target]
port = 9000
"#;
        let cfg: HarnessConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.target.port, 9000);
        assert_eq!(cfg.target.host, "127.0.0.1");
        assert_eq!(cfg.probe.connect_timeout_ms, 3000);
        assert_eq!(cfg.burst.messages, 500);
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let cfg: HarnessConfig = toml::from_str("").unwrap();
        let defaults = HarnessConfig::default();
        assert_eq!(cfg.target.port, defaults.target.port);
        assert_eq!(cfg.burst.large_size, defaults.burst.large_size);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wsregress.toml");
        std::fs::write(
            &path,
            r#"
[target]
host = "10.0.0.5"
"#,
        )
        .unwrap();

        let cfg = HarnessConfig::load(&path).unwrap();
        assert_eq!(cfg.target.host, "10.0.0.5");
    }

    #[test]
    fn test_load_missing_file_errors() {
        assert!(HarnessConfig::load(Path::new("/nonexistent/path/wsregress.toml")).is_err());
    }

    #[test]
    fn test_load_malformed_file_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("wsregress.toml");
        std::fs::write(&path, "[target\nport = ").unwrap();
        assert!(HarnessConfig::load(&path).is_err());
    }

    #[test]
    fn test_serialization_roundtrip() {
        let cfg = HarnessConfig::default();
        let toml_str = toml::to_string_pretty(&cfg).unwrap();
        let back: HarnessConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(cfg.target.port, back.target.port);
        assert_eq!(cfg.probe.reply_timeout_ms, back.probe.reply_timeout_ms);
    }

    #[test]
    fn test_apply_selection() {
        let mut cfg = HarnessConfig::default();
        cfg.suite.disabled = vec!["Websocket intensive data transfer test".to_string()];
        let mut registry = default_suite().unwrap();
        cfg.apply_selection(&mut registry).unwrap();
        assert_eq!(
            registry.is_enabled("Websocket intensive data transfer test"),
            Some(false)
        );

        cfg.suite.disabled = vec!["no such test".to_string()];
        assert!(cfg.apply_selection(&mut registry).is_err());
    }
}
