//! Configuration Module
//!
//! Loads proxy configuration from defaults, an optional YAML or JSON file
//! and environment variables, in that order, then validates it.

use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::DEFAULT_MAX_SIZE;
use crate::error::{ProxyError, Result};
use crate::ratelimit::KeyStrategy;

/// Environment variable naming the config file when none is passed in
pub const CONFIG_FILE_ENV: &str = "PROXY_CONFIG_FILE";

/// Proxy configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub cache: CacheConfig,
    #[serde(alias = "ratelimit")]
    pub rate_limit: RateLimitConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Grace period for in-flight requests on shutdown, in seconds
    pub shutdown_timeout: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout: 30,
        }
    }
}

/// Upstream service settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub url: String,
    /// Request timeout in seconds
    pub timeout: u64,
    /// Request headers never forwarded upstream
    pub forbidden_headers: Vec<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8081".to_string(),
            timeout: 30,
            forbidden_headers: vec![
                "Authorization".to_string(),
                "Cookie".to_string(),
                "Set-Cookie".to_string(),
            ],
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Capacity in bytes
    pub max_size: u64,
    /// TTL in seconds when the response carries no freshness information
    pub default_ttl: u64,
    /// Request headers whose values participate in the cache key
    pub vary_headers: Vec<String>,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_MAX_SIZE,
            default_ttl: 300,
            vary_headers: Vec::new(),
        }
    }
}

/// Rate limiting settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_second: f64,
    pub burst: u32,
    pub key_strategy: KeyStrategy,
    pub api_key_header: String,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 100.0,
            burst: 200,
            key_strategy: KeyStrategy::Ip,
            api_key_header: "X-API-Key".to_string(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Console,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "console" | "text" => Ok(LogFormat::Console),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Metrics listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
            path: "/metrics".to_string(),
        }
    }
}

impl Config {
    // == Load ==
    /// Loads the full configuration.
    ///
    /// Starts from defaults, merges the file at `path` (or the one named by
    /// `PROXY_CONFIG_FILE` when `path` is `None`), applies environment
    /// overrides and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let from_env = env::var(CONFIG_FILE_ENV).ok().filter(|p| !p.is_empty());
        let path = path.map(Path::to_path_buf).or_else(|| from_env.map(Into::into));

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        config.apply_overrides(|name| env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    /// Reads a config file; missing fields keep their defaults.
    ///
    /// A `.json` extension selects JSON, anything else is read as YAML.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let parsed = if is_json {
            serde_json::from_str(&data).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&data).map_err(|e| e.to_string())
        };

        parsed.map_err(|e| ProxyError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    // == Overrides ==
    /// Applies `PROXY_*` overrides read through `lookup`.
    ///
    /// # Variables
    /// - `PROXY_SERVER_ADDRESS`, `PROXY_SERVER_PORT`
    /// - `PROXY_UPSTREAM_URL`, `PROXY_UPSTREAM_TIMEOUT`
    /// - `PROXY_CACHE_ENABLED`, `PROXY_CACHE_MAX_SIZE`, `PROXY_CACHE_DEFAULT_TTL`,
    ///   `PROXY_CACHE_VARY_HEADERS` (comma separated)
    /// - `PROXY_RATELIMIT_ENABLED`, `PROXY_RATELIMIT_RPS`, `PROXY_RATELIMIT_BURST`,
    ///   `PROXY_RATELIMIT_KEY` (`ip`, `api_key`, `composite`),
    ///   `PROXY_RATELIMIT_API_KEY_HEADER`
    /// - `PROXY_LOG_LEVEL`, `PROXY_LOG_FORMAT`
    /// - `PROXY_METRICS_ENABLED`, `PROXY_METRICS_PORT`
    ///
    /// Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup: &dyn Fn(&str) -> Option<String> = &lookup;
        let get = |name: &str| var(lookup, name);
        let flag = |name: &str| get(name).map(|v| v == "true" || v == "1");

        if let Some(v) = get("PROXY_SERVER_ADDRESS") {
            self.server.address = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_SERVER_PORT") {
            self.server.port = v;
        }

        if let Some(v) = get("PROXY_UPSTREAM_URL") {
            self.upstream.url = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_UPSTREAM_TIMEOUT") {
            self.upstream.timeout = v;
        }

        if let Some(v) = flag("PROXY_CACHE_ENABLED") {
            self.cache.enabled = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_CACHE_MAX_SIZE") {
            self.cache.max_size = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_CACHE_DEFAULT_TTL") {
            self.cache.default_ttl = v;
        }
        if let Some(v) = get("PROXY_CACHE_VARY_HEADERS") {
            self.cache.vary_headers = v
                .split(',')
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(v) = flag("PROXY_RATELIMIT_ENABLED") {
            self.rate_limit.enabled = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_RATELIMIT_RPS") {
            self.rate_limit.requests_per_second = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_RATELIMIT_BURST") {
            self.rate_limit.burst = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_RATELIMIT_KEY") {
            self.rate_limit.key_strategy = v;
        }
        if let Some(v) = get("PROXY_RATELIMIT_API_KEY_HEADER") {
            self.rate_limit.api_key_header = v;
        }

        if let Some(v) = get("PROXY_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_LOG_FORMAT") {
            self.logging.format = v;
        }

        if let Some(v) = flag("PROXY_METRICS_ENABLED") {
            self.metrics.enabled = v;
        }
        if let Some(v) = parsed(lookup, "PROXY_METRICS_PORT") {
            self.metrics.port = v;
        }
    }

    // == Validate ==
    /// Rejects settings the proxy cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ProxyError::Config("server port must be non-zero".into()));
        }
        if self.upstream.url.is_empty() {
            return Err(ProxyError::Config("upstream URL is required".into()));
        }
        if let Err(e) = reqwest::Url::parse(&self.upstream.url) {
            return Err(ProxyError::Config(format!(
                "invalid upstream URL {}: {}",
                self.upstream.url, e
            )));
        }
        if self.cache.enabled && self.cache.max_size == 0 {
            return Err(ProxyError::Config("cache max size must be positive".into()));
        }
        if self.rate_limit.enabled {
            let rps = self.rate_limit.requests_per_second;
            if !rps.is_finite() || rps <= 0.0 {
                return Err(ProxyError::Config(
                    "rate limit requests per second must be positive".into(),
                ));
            }
            if self.rate_limit.burst == 0 {
                return Err(ProxyError::Config("rate limit burst must be at least 1".into()));
            }
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(ProxyError::Config("metrics port must be non-zero".into()));
        }
        Ok(())
    }
}

fn var(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(lookup: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    var(lookup, name).and_then(|v| v.trim().parse().ok())
}
