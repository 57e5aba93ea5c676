//! HTTP Upstream
//!
//! reqwest-backed dispatcher that rewrites the request onto the configured
//! upstream origin.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{ConnectInfo, Request},
    http::{
        header::{self, HeaderName},
        HeaderMap, HeaderValue, Uri,
    },
};
use reqwest::{redirect::Policy, Client, Url};
use tracing::debug;

use super::{CapturedResponse, Upstream};
use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};

/// Connection-scoped headers that are never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

// == HTTP Upstream ==
/// Dispatches requests to a single upstream origin over HTTP.
#[derive(Debug, Clone)]
pub struct HttpUpstream {
    client: Client,
    /// Scheme, host and port requests are redirected to
    origin: Url,
    /// Request headers removed before forwarding
    forbidden_headers: Vec<HeaderName>,
}

impl HttpUpstream {
    // == Constructor ==
    /// Builds a dispatcher from configuration.
    ///
    /// Forbidden header names that are not valid header names are ignored.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let origin = Url::parse(&config.url)
            .map_err(|e| ProxyError::Config(format!("invalid upstream URL: {}", e)))?;

        // Redirects are relayed to the client, never followed here.
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .redirect(Policy::none())
            .build()?;

        let forbidden_headers = config
            .forbidden_headers
            .iter()
            .filter_map(|name| HeaderName::from_bytes(name.as_bytes()).ok())
            .collect();

        Ok(Self {
            client,
            origin,
            forbidden_headers,
        })
    }

    /// Upstream URL for an inbound URI: the origin with the inbound path
    /// and query.
    fn target_url(&self, uri: &Uri) -> Url {
        let mut url = self.origin.clone();
        url.set_path(uri.path());
        url.set_query(uri.query());
        url
    }

    fn outbound_headers(&self, mut headers: HeaderMap, peer: Option<SocketAddr>) -> HeaderMap {
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        for name in &self.forbidden_headers {
            headers.remove(name);
        }

        if let Some(peer) = peer {
            let client_ip = peer.ip().to_string();
            let chain = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
                Some(prior) => format!("{}, {}", prior, client_ip),
                None => client_ip,
            };
            if let Ok(value) = HeaderValue::from_str(&chain) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }

        headers
    }
}

#[async_trait]
impl Upstream for HttpUpstream {
    async fn dispatch(&self, request: Request) -> Result<CapturedResponse> {
        let (parts, body) = request.into_parts();
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);

        let body = axum::body::to_bytes(body, usize::MAX)
            .await
            .map_err(|e| ProxyError::Upstream(format!("failed to read request body: {}", e)))?;

        let url = self.target_url(&parts.uri);
        debug!(method = %parts.method, %url, "Dispatching upstream");

        let response = self
            .client
            .request(parts.method, url)
            .headers(self.outbound_headers(parts.headers, peer))
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let mut headers = response.headers().clone();
        strip_hop_by_hop(&mut headers);
        let body = response.bytes().await?;

        Ok(CapturedResponse::new(status, headers, body))
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in &HOP_BY_HOP {
        headers.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstream() -> HttpUpstream {
        HttpUpstream::new(&UpstreamConfig {
            url: "http://backend.internal:8081".to_string(),
            ..UpstreamConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_target_url_keeps_path_and_query() {
        let uri: Uri = "/api/items?page=2&sort=asc".parse().unwrap();
        let url = upstream().target_url(&uri);

        assert_eq!(url.as_str(), "http://backend.internal:8081/api/items?page=2&sort=asc");
    }

    #[test]
    fn test_outbound_headers_strip_forbidden_and_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer x"));
        headers.insert(header::COOKIE, HeaderValue::from_static("a=b"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::HOST, HeaderValue::from_static("proxy.example"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let out = upstream().outbound_headers(headers, None);

        assert!(out.get(header::AUTHORIZATION).is_none());
        assert!(out.get(header::COOKIE).is_none());
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::HOST).is_none());
        assert_eq!(out[header::ACCEPT], "application/json");
    }

    #[test]
    fn test_outbound_headers_append_forwarded_for() {
        let peer: SocketAddr = "192.168.1.1:1234".parse().unwrap();

        let out = upstream().outbound_headers(HeaderMap::new(), Some(peer));
        assert_eq!(out[&X_FORWARDED_FOR], "192.168.1.1");

        let mut headers = HeaderMap::new();
        headers.insert(X_FORWARDED_FOR, HeaderValue::from_static("203.0.113.1"));
        let out = upstream().outbound_headers(headers, Some(peer));
        assert_eq!(out[&X_FORWARDED_FOR], "203.0.113.1, 192.168.1.1");
    }

    #[test]
    fn test_invalid_url_is_config_error() {
        let result = HttpUpstream::new(&UpstreamConfig {
            url: "::not a url".to_string(),
            ..UpstreamConfig::default()
        });

        assert!(matches!(result, Err(ProxyError::Config(_))));
    }
}
