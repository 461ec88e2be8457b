//! Configuration loading and types for the Azure upload store.
//!
//! Configuration is read from a YAML file and deserialized into the
//! [`Config`] struct.  Each subsection governs a different part of the
//! system: the Azure account and container, tombstone retention, the SAS
//! expiry watchdog, logging, and metrics.

use serde::Deserialize;
use std::path::Path;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Azure Blob Storage settings.
    #[serde(default)]
    pub azure: AzureSettings,

    /// Tombstone retention settings.
    #[serde(default)]
    pub tombstone: TombstoneConfig,

    /// SAS token expiry watchdog settings.
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Observability settings (metrics).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Azure Blob Storage settings.
///
/// This is the single source of truth for the account, container and
/// credentials; there is no separate per-tenant override.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AzureSettings {
    /// Whether uploads should be routed to Azure at all.
    #[serde(default)]
    pub enabled: bool,

    /// Azure storage account name.
    #[serde(default)]
    pub account_name: String,

    /// Container holding every upload.
    #[serde(default)]
    pub container_name: String,

    /// Base64 storage account key (Shared Key auth).
    #[serde(default)]
    pub access_key: Option<String>,

    /// SAS token query string, with or without the leading `?`.
    #[serde(default)]
    pub sas_token: Option<String>,

    /// CDN origin fronting the storage account (e.g. `https://cdn.example.com`).
    #[serde(default)]
    pub cdn_url: Option<String>,

    /// DNS suffix of the blob endpoint.
    #[serde(default = "default_endpoint_suffix")]
    pub endpoint_suffix: String,

    /// The host's own asset CDN, rewritten onto `cdn_url` for preloaded scripts.
    #[serde(default)]
    pub asset_cdn_url: Option<String>,
}

impl Default for AzureSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            account_name: String::new(),
            container_name: String::new(),
            access_key: None,
            sas_token: None,
            cdn_url: None,
            endpoint_suffix: default_endpoint_suffix(),
            asset_cdn_url: None,
        }
    }
}

impl AzureSettings {
    /// True when the store can be selected: enabled, account and container
    /// named, and at least one credential present.
    pub fn is_usable(&self) -> bool {
        self.enabled
            && !self.account_name.trim().is_empty()
            && !self.container_name.trim().is_empty()
            && (present(&self.sas_token) || present(&self.access_key))
    }

    /// CDN origin, if one is configured and non-blank.
    pub fn cdn(&self) -> Option<&str> {
        self.cdn_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

/// Returns true when `value` holds a non-blank string.
pub(crate) fn present(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

/// Tombstone retention settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TombstoneConfig {
    /// Days a quarantined blob is kept before the sweep purges it.
    #[serde(default = "default_grace_period_days")]
    pub grace_period_days: u32,
}

impl Default for TombstoneConfig {
    fn default() -> Self {
        Self {
            grace_period_days: default_grace_period_days(),
        }
    }
}

/// SAS expiry watchdog settings.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Days-before-expiry on which administrators are warned.
    #[serde(default = "default_warn_on_days")]
    pub warn_on_days: Vec<i64>,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            warn_on_days: default_warn_on_days(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: text or json.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Observability settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ObservabilityConfig {
    /// Install the Prometheus recorder in daemon mode.
    #[serde(default = "default_true")]
    pub metrics: bool,

    /// Address the Prometheus exporter listens on.
    #[serde(default = "default_metrics_listen")]
    pub metrics_listen: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics: true,
            metrics_listen: default_metrics_listen(),
        }
    }
}

// -- Defaults ----------------------------------------------------------------

fn default_true() -> bool {
    true
}

fn default_endpoint_suffix() -> String {
    "core.windows.net".to_string()
}

fn default_grace_period_days() -> u32 {
    30
}

/// Thresholds used when the configuration does not list any.
pub const DEFAULT_WARN_ON_DAYS: [i64; 6] = [30, 20, 10, 3, 2, 1];

fn default_warn_on_days() -> Vec<i64> {
    DEFAULT_WARN_ON_DAYS.to_vec()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

fn default_metrics_listen() -> String {
    "127.0.0.1:9464".to_string()
}

// -- Loader ------------------------------------------------------------------

/// Load and parse configuration from a YAML file at `path`.
pub fn load_config<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let config: Config = serde_yaml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn settings() -> AzureSettings {
        AzureSettings {
            enabled: true,
            account_name: "acct".to_string(),
            container_name: "uploads".to_string(),
            access_key: Some("a2V5".to_string()),
            ..AzureSettings::default()
        }
    }

    #[test]
    fn test_load_config_full() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
azure:
  enabled: true
  account_name: acct
  container_name: uploads
  sas_token: "sv=2023-11-03&se=2025-03-01&sig=abc"
  cdn_url: https://cdn.example.com
tombstone:
  grace_period_days: 7
watchdog:
  warn_on_days: [5, 1]
logging:
  format: json
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(config.azure.enabled);
        assert_eq!(config.azure.account_name, "acct");
        assert_eq!(config.azure.endpoint_suffix, "core.windows.net");
        assert_eq!(config.azure.cdn(), Some("https://cdn.example.com"));
        assert_eq!(config.tombstone.grace_period_days, 7);
        assert_eq!(config.watchdog.warn_on_days, vec![5, 1]);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert!(config.observability.metrics);
    }

    #[test]
    fn test_load_config_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{}}").unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(!config.azure.enabled);
        assert_eq!(config.tombstone.grace_period_days, 30);
        assert_eq!(config.watchdog.warn_on_days, vec![30, 20, 10, 3, 2, 1]);
    }

    #[test]
    fn test_load_config_missing_file() {
        assert!(load_config("/nonexistent/azure-upload-store.yaml").is_err());
    }

    #[test]
    fn test_is_usable() {
        assert!(settings().is_usable());

        let disabled = AzureSettings {
            enabled: false,
            ..settings()
        };
        assert!(!disabled.is_usable());

        let no_credentials = AzureSettings {
            access_key: Some("  ".to_string()),
            sas_token: None,
            ..settings()
        };
        assert!(!no_credentials.is_usable());

        let no_container = AzureSettings {
            container_name: String::new(),
            ..settings()
        };
        assert!(!no_container.is_usable());
    }

    #[test]
    fn test_blank_cdn_is_ignored() {
        let s = AzureSettings {
            cdn_url: Some("   ".to_string()),
            ..settings()
        };
        assert_eq!(s.cdn(), None);
    }
}
