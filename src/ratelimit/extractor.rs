//! Key Extractor Module
//!
//! Derives the rate limit key from a request's identity.
//!
//! Forwarding headers are trusted as given; the proxy is expected to sit
//! behind a trusted load balancer.

use std::str::FromStr;
use std::sync::Arc;

use axum::http::HeaderMap;
use serde::Deserialize;

/// Header carrying the original client chain
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Header carrying the original client address
pub const X_REAL_IP: &str = "x-real-ip";

/// Separator joining the parts of a composite key
const COMPOSITE_SEPARATOR: &str = ":";

// == Client Info ==
/// The identifying attributes of a request.
#[derive(Debug, Clone, Copy)]
pub struct ClientInfo<'a> {
    pub headers: &'a HeaderMap,
    /// Raw peer address, usually `host:port`
    pub remote_addr: &'a str,
}

// == Key Extractor ==
/// Maps a request to a limiter key.
pub trait KeyExtractor: Send + Sync {
    fn extract(&self, client: &ClientInfo<'_>) -> String;
}

/// Keys by client address: first `X-Forwarded-For` hop, then `X-Real-IP`,
/// then the host part of the peer address.
#[derive(Debug, Clone, Copy, Default)]
pub struct IpKeyExtractor;

impl KeyExtractor for IpKeyExtractor {
    fn extract(&self, client: &ClientInfo<'_>) -> String {
        if let Some(xff) = header_str(client.headers, X_FORWARDED_FOR) {
            let first = xff.split(',').next().unwrap_or(xff);
            return first.trim().to_string();
        }

        if let Some(real_ip) = header_str(client.headers, X_REAL_IP) {
            return real_ip.to_string();
        }

        split_host(client.remote_addr).to_string()
    }
}

/// Keys by API credential, falling back to the client address when the
/// header is missing or empty.
#[derive(Debug, Clone)]
pub struct ApiKeyExtractor {
    header: String,
}

impl ApiKeyExtractor {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into(),
        }
    }
}

impl KeyExtractor for ApiKeyExtractor {
    fn extract(&self, client: &ClientInfo<'_>) -> String {
        match header_str(client.headers, &self.header) {
            Some(api_key) => format!("apikey:{}", api_key),
            None => IpKeyExtractor.extract(client),
        }
    }
}

/// Joins the keys of several extractors with `:`, in order.
#[derive(Clone)]
pub struct CompositeKeyExtractor {
    extractors: Vec<Arc<dyn KeyExtractor>>,
}

impl CompositeKeyExtractor {
    pub fn new(extractors: Vec<Arc<dyn KeyExtractor>>) -> Self {
        Self { extractors }
    }
}

impl KeyExtractor for CompositeKeyExtractor {
    fn extract(&self, client: &ClientInfo<'_>) -> String {
        self.extractors
            .iter()
            .map(|extractor| extractor.extract(client))
            .collect::<Vec<_>>()
            .join(COMPOSITE_SEPARATOR)
    }
}

// == Key Strategy ==
/// Configured choice of key extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStrategy {
    #[default]
    Ip,
    ApiKey,
    /// Client address and API credential together.
    ///
    /// A caller without a credential keys as `<ip>:<ip>`, since the API-key
    /// part falls back to the address. Such callers share one bucket per
    /// address, distinct from any keyed caller at that address.
    Composite,
}

impl KeyStrategy {
    /// Builds the extractor for this strategy.
    ///
    /// # Arguments
    /// * `api_key_header` - Header holding the API credential
    pub fn extractor(self, api_key_header: &str) -> Arc<dyn KeyExtractor> {
        match self {
            KeyStrategy::Ip => Arc::new(IpKeyExtractor),
            KeyStrategy::ApiKey => Arc::new(ApiKeyExtractor::new(api_key_header)),
            KeyStrategy::Composite => Arc::new(CompositeKeyExtractor::new(vec![
                Arc::new(IpKeyExtractor),
                Arc::new(ApiKeyExtractor::new(api_key_header)),
            ])),
        }
    }
}

impl FromStr for KeyStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Ok(KeyStrategy::Ip),
            "api_key" | "apikey" => Ok(KeyStrategy::ApiKey),
            "composite" => Ok(KeyStrategy::Composite),
            other => Err(format!("unknown rate limit key strategy: {}", other)),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

/// Host part of `host:port` or `[v6]:port`; the input unchanged when it
/// carries no port.
fn split_host(addr: &str) -> &str {
    if let Some(rest) = addr.strip_prefix('[') {
        if let Some((host, _)) = rest.split_once(']') {
            return host;
        }
        return addr;
    }

    match addr.rsplit_once(':') {
        Some((host, _)) if !host.contains(':') => host,
        _ => addr,
    }
}
