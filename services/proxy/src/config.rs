//! Proxy configuration: a single `--config <file>` CLI flag pointing at a TOML file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;

#[derive(Clone)]
pub struct RedactedString(String);

impl RedactedString {
    pub fn new(value: String) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for RedactedString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<redacted>")
    }
}

/// `relayd --config <path>`.
#[derive(Debug, Parser)]
#[command(name = "relayd", about = "Dynamic-backend HTTP reverse proxy")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "RELAY_CONFIG")]
    pub config: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listener: ListenerConfig,
    pub store: StoreConfig,
    pub metrics: MetricsConfig,
    pub health_check: HealthCheckConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_addr: SocketAddr,
    pub send_request_start: bool,
    pub forwarded_proto: String,
    pub forward_client_ip: bool,
    pub redirect_no_hostname: String,
    pub redirect_no_backend: String,
    pub redirect_on_error: String,
}

#[derive(Clone)]
pub struct StoreConfig {
    pub endpoint: String,
    pub namespace: String,
    pub credential: Option<RedactedString>,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("namespace", &self.namespace)
            .field("credential", &self.credential)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub endpoint: String,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    listener: RawListener,
    #[serde(default)]
    store: RawStore,
    #[serde(default)]
    metrics: RawMetrics,
    #[serde(default)]
    health_check: RawHealthCheck,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Debug, Deserialize)]
struct RawListener {
    bind_addr: String,
    #[serde(default)]
    send_request_start: bool,
    #[serde(default)]
    forwarded_proto: String,
    #[serde(default)]
    forward_client_ip: bool,
    #[serde(default = "default_redirect")]
    redirect_no_hostname: String,
    #[serde(default = "default_redirect")]
    redirect_no_backend: String,
    #[serde(default = "default_redirect")]
    redirect_on_error: String,
}

impl Default for RawListener {
    fn default() -> Self {
        Self {
            bind_addr: String::new(),
            send_request_start: false,
            forwarded_proto: String::new(),
            forward_client_ip: false,
            redirect_no_hostname: default_redirect(),
            redirect_no_backend: default_redirect(),
            redirect_on_error: default_redirect(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawStore {
    #[serde(default)]
    endpoint: String,
    #[serde(default = "default_namespace")]
    namespace: String,
    #[serde(default)]
    credential: Option<String>,
}

impl Default for RawStore {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            namespace: default_namespace(),
            credential: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawMetrics {
    #[serde(default = "default_metrics_endpoint")]
    endpoint: String,
    #[serde(default = "default_metrics_prefix")]
    prefix: String,
}

impl Default for RawMetrics {
    fn default() -> Self {
        Self {
            endpoint: default_metrics_endpoint(),
            prefix: default_metrics_prefix(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawHealthCheck {
    #[serde(default = "default_health_interval_secs")]
    interval_secs: u64,
    #[serde(default = "default_health_timeout_secs")]
    timeout_secs: u64,
}

impl Default for RawHealthCheck {
    fn default() -> Self {
        Self {
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_redirect() -> String {
    "http://localhost/_error".to_string()
}
fn default_namespace() -> String {
    "relay".to_string()
}
fn default_metrics_endpoint() -> String {
    "127.0.0.1:8125".to_string()
}
fn default_metrics_prefix() -> String {
    "relay.".to_string()
}
fn default_health_interval_secs() -> u64 {
    5
}
fn default_health_timeout_secs() -> u64 {
    2
}

impl Config {
    /// Loads and validates configuration from a TOML file. `RUST_LOG` still takes precedence
    /// over `log_level` when initializing tracing (the teacher's own `RUST_LOG`-first
    /// convention).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let raw: RawConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;

        if raw.listener.bind_addr.is_empty() {
            anyhow::bail!("listener.bind_addr is required");
        }
        if raw.store.endpoint.is_empty() {
            anyhow::bail!("store.endpoint is required");
        }

        let bind_addr: SocketAddr = raw
            .listener
            .bind_addr
            .parse()
            .with_context(|| format!("invalid listener.bind_addr: {}", raw.listener.bind_addr))?;

        Ok(Self {
            listener: ListenerConfig {
                bind_addr,
                send_request_start: raw.listener.send_request_start,
                forwarded_proto: raw.listener.forwarded_proto,
                forward_client_ip: raw.listener.forward_client_ip,
                redirect_no_hostname: raw.listener.redirect_no_hostname,
                redirect_no_backend: raw.listener.redirect_no_backend,
                redirect_on_error: raw.listener.redirect_on_error,
            },
            store: StoreConfig {
                endpoint: raw.store.endpoint,
                namespace: raw.store.namespace,
                credential: raw.store.credential.map(RedactedString::new),
            },
            metrics: MetricsConfig {
                endpoint: raw.metrics.endpoint,
                prefix: raw.metrics.prefix,
            },
            health_check: HealthCheckConfig {
                interval: Duration::from_secs(raw.health_check.interval_secs.max(1)),
                timeout: Duration::from_secs(raw.health_check.timeout_secs.max(1)),
            },
            log_level: raw.log_level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_minimal_config_with_defaults() {
        let file = write_temp(
            r#"
            [listener]
            bind_addr = "127.0.0.1:8080"

            [store]
            endpoint = "127.0.0.1:2379"
            "#,
        );
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.listener.bind_addr.port(), 8080);
        assert_eq!(config.store.namespace, "relay");
        assert_eq!(config.health_check.interval, Duration::from_secs(5));
    }

    #[test]
    fn missing_bind_addr_is_fatal() {
        let file = write_temp(
            r#"
            [listener]
            bind_addr = ""

            [store]
            endpoint = "127.0.0.1:2379"
            "#,
        );
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn credential_is_redacted_in_debug_output() {
        let file = write_temp(
            r#"
            [listener]
            bind_addr = "127.0.0.1:8080"

            [store]
            endpoint = "127.0.0.1:2379"
            credential = "super-secret"
            "#,
        );
        let config = Config::load(file.path()).unwrap();
        let debug = format!("{:?}", config.store);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
