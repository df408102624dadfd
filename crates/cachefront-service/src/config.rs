use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use sentry::types::Dsn;
use serde::{de, Deserialize, Deserializer};
use tracing::level_filters::LevelFilter;
use url::Url;

/// Controls the log format
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect (pretty for tty, simplified for other)
    Auto,
    /// With colors
    Pretty,
    /// Simplified log output
    Simplified,
    /// Dump out JSON lines
    Json,
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// The log level for the service.
    #[serde(deserialize_with = "deserialize_level_filter")]
    pub level: LevelFilter,
    /// Controls the log format.
    pub format: LogFormat,
    /// When set to true, backtraces are forced on.
    pub enable_backtraces: bool,
}

impl Default for Logging {
    fn default() -> Self {
        Logging {
            level: LevelFilter::INFO,
            format: LogFormat::Auto,
            enable_backtraces: true,
        }
    }
}

/// Control the metrics.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Metrics {
    /// host/port of statsd instance
    pub statsd: Option<String>,
    /// The prefix that should be added to all metrics.
    pub prefix: String,
    /// A tag name to report the hostname to, for each metric. Defaults to not sending such a tag.
    pub hostname_tag: Option<String>,
    /// A map containing custom tags and their values.
    ///
    /// These tags will be appended to every metric.
    pub custom_tags: BTreeMap<String, String>,
}

impl Default for Metrics {
    fn default() -> Self {
        Metrics {
            statsd: match env::var("STATSD_SERVER") {
                Ok(metrics_statsd) => Some(metrics_statsd),
                Err(_) => None,
            },
            prefix: "cachefront".into(),
            hostname_tag: None,
            custom_tags: BTreeMap::new(),
        }
    }
}

/// Fine-tuning of the remote store connection pool.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct StoreSettings {
    /// Maximum number of pooled connections to the store.
    pub pool_size: usize,

    /// How long to wait for a free pool slot before the operation
    /// fails as unavailable.
    #[serde(with = "humantime_serde")]
    pub lease_timeout: Duration,

    /// Deadline for a single remote store operation.
    #[serde(with = "humantime_serde")]
    pub op_timeout: Duration,

    /// Deadline for establishing a new store connection.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            pool_size: 16,
            lease_timeout: Duration::from_millis(500),
            op_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

/// Fine-tuning of cache entry and single-flight behavior.
#[derive(Debug, Clone, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// Time-to-live assigned to cache entries populated on a miss.
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,

    /// Maximum hold time of the in-flight marker. A recomputation that dies
    /// without cleaning up blocks the key for at most this long.
    #[serde(with = "humantime_serde")]
    pub marker_ttl: Duration,

    /// How long a request waits for another in-flight recomputation of the
    /// same key before it fails as retriable.
    #[serde(with = "humantime_serde")]
    pub stampede_timeout: Duration,

    /// Initial delay between polls while waiting on another recomputation.
    #[serde(with = "humantime_serde")]
    pub initial_poll_interval: Duration,

    /// Upper bound for the poll backoff.
    #[serde(with = "humantime_serde")]
    pub max_poll_interval: Duration,

    /// Default time-to-live for dedup event keys.
    #[serde(with = "humantime_serde")]
    pub dedup_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(60),
            marker_ttl: Duration::from_secs(30),
            stampede_timeout: Duration::from_secs(10),
            initial_poll_interval: Duration::from_millis(20),
            max_poll_interval: Duration::from_millis(250),
            dedup_ttl: Duration::from_secs(86400),
        }
    }
}

/// See docs/index.md for more information on config values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host and port to bind the HTTP webserver to.
    pub bind: String,

    /// Connection string of the remote key-value store.
    pub store_url: String,

    /// Base URL of the origin that cache misses are computed from.
    pub origin_url: Url,

    /// Deadline for a single origin fetch.
    #[serde(with = "humantime_serde")]
    pub origin_timeout: Duration,

    /// Namespace prefixed to every key written to the store.
    pub namespace: String,

    /// Configuration for internal logging.
    pub logging: Logging,

    /// Configuration for reporting metrics to a statsd instance.
    pub metrics: Metrics,

    /// DSN to report internal errors to
    pub sentry_dsn: Option<Dsn>,

    /// Fine-tune the store connection pool.
    pub store: StoreSettings,

    /// Fine-tune cache expiry and single-flight coordination.
    pub cache: CacheSettings,

    /// Grace period for draining in-flight store operations on shutdown.
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

/// Checks if we are running in docker.
fn is_docker() -> bool {
    if fs::metadata("/.dockerenv").is_ok() {
        return true;
    }

    fs::read_to_string("/proc/self/cgroup")
        .map(|s| s.contains("/docker"))
        .unwrap_or(false)
}

/// Default value for the "bind" configuration.
fn default_bind() -> String {
    if is_docker() {
        // Docker images rely on this service being exposed
        "0.0.0.0:8000".to_owned()
    } else {
        "127.0.0.1:8000".to_owned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: default_bind(),
            store_url: "redis://127.0.0.1:6379/0".to_owned(),
            origin_url: Url::parse("http://127.0.0.1:3000/").unwrap(),
            origin_timeout: Duration::from_secs(10),
            namespace: "cachefront".to_owned(),
            logging: Logging::default(),
            metrics: Metrics::default(),
            sentry_dsn: None,
            store: StoreSettings::default(),
            cache: CacheSettings::default(),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn get(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_reader(
                fs::File::open(path).context("failed to open configuration file")?,
            ),
            None => Ok(Config::default()),
        }
    }

    fn from_reader(reader: impl std::io::Read) -> Result<Self> {
        serde_yaml::from_reader(reader).context("failed to parse YAML")
    }

    /// Validates the configuration before the service starts accepting traffic.
    pub fn validate(&self) -> Result<()> {
        self.bind
            .parse::<SocketAddr>()
            .context("`bind` is not a valid socket address")?;

        if self.store.pool_size == 0 {
            anyhow::bail!("`store.pool_size` must be at least 1");
        }
        if self.cache.default_ttl.is_zero() {
            anyhow::bail!("`cache.default_ttl` must be non-zero");
        }
        if self.cache.marker_ttl.is_zero() {
            anyhow::bail!("`cache.marker_ttl` must be non-zero");
        }
        if self.cache.initial_poll_interval.is_zero() {
            anyhow::bail!("`cache.initial_poll_interval` must be non-zero");
        }
        if self.cache.initial_poll_interval >= self.cache.stampede_timeout {
            anyhow::bail!("`cache.initial_poll_interval` must be shorter than `cache.stampede_timeout`");
        }
        if !matches!(self.origin_url.scheme(), "http" | "https") {
            anyhow::bail!("`origin_url` must be an http(s) URL");
        }
        if self.namespace.is_empty() || self.namespace.contains([':', '!']) {
            anyhow::bail!("`namespace` must be non-empty and must not contain `:` or `!`");
        }

        Ok(())
    }
}

struct LevelFilterVisitor;

impl<'de> de::Visitor<'de> for LevelFilterVisitor {
    type Value = LevelFilter;

    fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            formatter,
            r#"one of the strings "off", "error", "warn", "info", "debug", or "trace""#
        )
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match v {
            "off" => Ok(LevelFilter::OFF),
            "error" => Ok(LevelFilter::ERROR),
            "warn" => Ok(LevelFilter::WARN),
            "info" => Ok(LevelFilter::INFO),
            "debug" => Ok(LevelFilter::DEBUG),
            "trace" => Ok(LevelFilter::TRACE),
            _ => Err(de::Error::invalid_value(de::Unexpected::Str(v), &self)),
        }
    }
}

fn deserialize_level_filter<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<LevelFilter, D::Error> {
    deserializer.deserialize_str(LevelFilterVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_settings() {
        // It should be possible to set individual values in reasonable units
        // without affecting other defaults.
        let cfg = Config::get(None).unwrap();
        assert_eq!(cfg.cache.default_ttl, Duration::from_secs(60));

        let yaml = r#"
            cache:
              default_ttl: 5m
              stampede_timeout: 3s
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.cache.default_ttl, Duration::from_secs(300));
        assert_eq!(cfg.cache.stampede_timeout, Duration::from_secs(3));
        assert_eq!(
            cfg.cache.marker_ttl,
            CacheSettings::default().marker_ttl
        );
        assert_eq!(cfg.store, StoreSettings::default());
    }

    #[test]
    fn test_store_settings() {
        let yaml = r#"
            store_url: redis://cache.internal:6379/2
            store:
              pool_size: 4
              lease_timeout: 250ms
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert_eq!(cfg.store_url, "redis://cache.internal:6379/2");
        assert_eq!(cfg.store.pool_size, 4);
        assert_eq!(cfg.store.lease_timeout, Duration::from_millis(250));
        assert_eq!(cfg.store.op_timeout, StoreSettings::default().op_timeout);
    }

    #[test]
    fn test_validation() {
        let cfg = Config::default();
        cfg.validate().unwrap();

        let yaml = r#"
            store:
              pool_size: 0
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert!(cfg.validate().is_err());

        let yaml = r#"
            namespace: "bad:namespace"
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert!(cfg.validate().is_err());

        let yaml = r#"
            bind: "not a socket address"
        "#;
        let cfg = Config::from_reader(yaml.as_bytes()).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_unknown_fields() {
        // Unknown fields should not cause failure
        let yaml = r#"
            cache:
              not_a_setting: 1h
        "#;
        let cfg = Config::from_reader(yaml.as_bytes());
        assert!(cfg.is_ok());
    }

    #[test]
    fn test_empty_file() {
        // Empty files aren't supported
        let yaml = r#""#;
        let result = Config::from_reader(yaml.as_bytes());
        assert!(result.is_err());
    }
}
