//! Cache Policy Module
//!
//! Stateless HTTP caching rules: key derivation, cacheability, freshness
//! lifetime and ETag computation.

use std::time::Duration;

use axum::http::{
    header::{CACHE_CONTROL, EXPIRES},
    HeaderMap, Method, StatusCode,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use sha2::{Digest, Sha256};

/// Separator between cache key components before hashing.
const KEY_SEPARATOR: &str = "|";

/// Number of digest bytes kept for a cache key (128 bits).
const KEY_DIGEST_BYTES: usize = 16;

// == Cache Key ==
/// Derives the cache key for a request.
///
/// Components are joined in a fixed order: method, path, raw query (only
/// when non-empty), then `name:value` for each vary header that is present.
/// The joined string is hashed and the first 128 bits are hex encoded.
///
/// # Arguments
/// * `method` - Request method
/// * `path` - Request path
/// * `raw_query` - Raw query string without the leading `?`
/// * `vary_values` - `(header name, value)` pairs, absent headers omitted
pub fn cache_key(
    method: &Method,
    path: &str,
    raw_query: &str,
    vary_values: &[(String, String)],
) -> String {
    let mut parts: Vec<String> = vec![method.as_str().to_string(), path.to_string()];

    if !raw_query.is_empty() {
        parts.push(raw_query.to_string());
    }

    for (name, value) in vary_values {
        parts.push(format!("{}:{}", name, value));
    }

    let digest = Sha256::digest(parts.join(KEY_SEPARATOR).as_bytes());
    hex::encode(&digest[..KEY_DIGEST_BYTES])
}

/// Collects the values of the configured vary headers present on a request.
///
/// Headers that are missing or empty contribute nothing.
pub fn vary_values(headers: &HeaderMap, vary_headers: &[String]) -> Vec<(String, String)> {
    vary_headers
        .iter()
        .filter_map(|name| {
            let value = headers.get(name.as_str())?.to_str().ok()?;
            if value.is_empty() {
                None
            } else {
                Some((name.clone(), value.to_string()))
            }
        })
        .collect()
}

// == Cacheability ==
/// Returns true if responses to this method may ever be cached.
pub fn is_cacheable_method(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD
}

/// Decides whether a response may be stored.
///
/// Only GET and HEAD are cached. Server errors and client errors other
/// than 404 are rejected, as is any response whose `Cache-Control`
/// carries `no-store`, `no-cache` or `private`.
pub fn is_cacheable(method: &Method, status: StatusCode, headers: &HeaderMap) -> bool {
    if !is_cacheable_method(method) {
        return false;
    }

    if status.is_server_error() || (status.is_client_error() && status != StatusCode::NOT_FOUND) {
        return false;
    }

    !cache_control_directives(headers).any(|directive| {
        directive.eq_ignore_ascii_case("no-store")
            || directive.eq_ignore_ascii_case("no-cache")
            || directive.eq_ignore_ascii_case("private")
    })
}

// == TTL ==
/// Derives the freshness lifetime of a response.
///
/// `max-age` wins over `Expires`; a malformed `max-age` is skipped. An
/// `Expires` date in the past, or one that does not parse, falls back to
/// `default_ttl`.
pub fn parse_ttl(headers: &HeaderMap, default_ttl: Duration) -> Duration {
    for directive in cache_control_directives(headers) {
        let Some((name, value)) = directive.split_once('=') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("max-age") {
            if let Ok(seconds) = value.trim().parse::<u64>() {
                return Duration::from_secs(seconds);
            }
        }
    }

    let expires = headers
        .get(EXPIRES)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_http_date);

    if let Some(expires) = expires {
        if let Ok(remaining) = (expires - Utc::now()).to_std() {
            if !remaining.is_zero() {
                return remaining;
            }
        }
    }

    default_ttl
}

/// Parses an HTTP date in any of the three formats RFC 9110 accepts.
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }

    // RFC 850 and asctime forms
    ["%A, %d-%b-%y %H:%M:%S GMT", "%a %b %e %H:%M:%S %Y"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
}

/// Iterates trimmed, non-empty `Cache-Control` directives across all values.
fn cache_control_directives(headers: &HeaderMap) -> impl Iterator<Item = &str> {
    headers
        .get_all(CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|d| !d.is_empty())
}

// == ETag ==
/// Computes a strong ETag for a body: the quoted hex SHA-256 digest.
pub fn generate_etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(name: &'static str, value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(name, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let a = cache_key(&Method::GET, "/api/users", "page=1", &[]);
        let b = cache_key(&Method::GET, "/api/users", "page=1", &[]);

        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_cache_key_differs_by_component() {
        let base = cache_key(&Method::GET, "/a", "", &[]);

        assert_ne!(base, cache_key(&Method::GET, "/b", "", &[]));
        assert_ne!(base, cache_key(&Method::HEAD, "/a", "", &[]));
        assert_ne!(base, cache_key(&Method::GET, "/a", "x=1", &[]));
        assert_ne!(
            base,
            cache_key(
                &Method::GET,
                "/a",
                "",
                &[("Accept".to_string(), "text/html".to_string())]
            )
        );
    }

    #[test]
    fn test_vary_values_skips_absent_headers() {
        let headers = headers_with("accept-language", "en");
        let vary = vec!["Accept-Language".to_string(), "Accept-Encoding".to_string()];

        let values = vary_values(&headers, &vary);
        assert_eq!(values, vec![("Accept-Language".to_string(), "en".to_string())]);

        // A missing vary header hashes the same as no vary header at all
        assert_eq!(
            cache_key(&Method::GET, "/", "", &vary_values(&HeaderMap::new(), &vary)),
            cache_key(&Method::GET, "/", "", &[])
        );
    }

    #[test]
    fn test_is_cacheable_methods() {
        let headers = HeaderMap::new();

        assert!(is_cacheable(&Method::GET, StatusCode::OK, &headers));
        assert!(is_cacheable(&Method::HEAD, StatusCode::OK, &headers));
        assert!(!is_cacheable(&Method::POST, StatusCode::OK, &headers));
        assert!(!is_cacheable(&Method::DELETE, StatusCode::OK, &headers));
    }

    #[test]
    fn test_is_cacheable_statuses() {
        let headers = HeaderMap::new();

        assert!(is_cacheable(&Method::GET, StatusCode::NOT_FOUND, &headers));
        assert!(is_cacheable(&Method::GET, StatusCode::MOVED_PERMANENTLY, &headers));
        assert!(!is_cacheable(&Method::GET, StatusCode::BAD_REQUEST, &headers));
        assert!(!is_cacheable(&Method::GET, StatusCode::FORBIDDEN, &headers));
        assert!(!is_cacheable(&Method::GET, StatusCode::INTERNAL_SERVER_ERROR, &headers));
        assert!(!is_cacheable(&Method::GET, StatusCode::BAD_GATEWAY, &headers));
    }

    #[test]
    fn test_is_cacheable_cache_control() {
        for value in ["no-store", "no-cache", "private", "public, No-Store", " PRIVATE "] {
            let headers = headers_with("cache-control", value);
            assert!(
                !is_cacheable(&Method::GET, StatusCode::OK, &headers),
                "{} should not be cacheable",
                value
            );
        }

        let headers = headers_with("cache-control", "public, max-age=60");
        assert!(is_cacheable(&Method::GET, StatusCode::OK, &headers));
    }

    #[test]
    fn test_parse_ttl_max_age() {
        let default = Duration::from_secs(300);

        assert_eq!(
            parse_ttl(&headers_with("cache-control", "max-age=60"), default),
            Duration::from_secs(60)
        );
        assert_eq!(
            parse_ttl(&headers_with("cache-control", "public, max-age=120"), default),
            Duration::from_secs(120)
        );
        assert_eq!(
            parse_ttl(&headers_with("cache-control", "MAX-AGE=5"), default),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_parse_ttl_default() {
        let default = Duration::from_secs(300);

        assert_eq!(parse_ttl(&HeaderMap::new(), default), default);
        assert_eq!(parse_ttl(&headers_with("cache-control", "public"), default), default);
        assert_eq!(
            parse_ttl(&headers_with("cache-control", "max-age=abc"), default),
            default
        );
        assert_eq!(
            parse_ttl(&headers_with("cache-control", "max-age=-5"), default),
            default
        );
    }

    #[test]
    fn test_parse_ttl_expires() {
        let default = Duration::from_secs(300);
        let future = (Utc::now() + chrono::Duration::seconds(600))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut headers = HeaderMap::new();
        headers.insert(EXPIRES, HeaderValue::from_str(&future).unwrap());

        let ttl = parse_ttl(&headers, default);
        assert!(ttl > Duration::from_secs(590));
        assert!(ttl <= Duration::from_secs(600));
    }

    #[test]
    fn test_parse_ttl_expires_in_past_or_malformed() {
        let default = Duration::from_secs(300);

        let past = headers_with("expires", "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(parse_ttl(&past, default), default);

        let garbage = headers_with("expires", "not a date");
        assert_eq!(parse_ttl(&garbage, default), default);
    }

    #[test]
    fn test_parse_ttl_max_age_beats_expires() {
        let future = (Utc::now() + chrono::Duration::seconds(3600))
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();

        let mut headers = headers_with("cache-control", "max-age=10");
        headers.insert(EXPIRES, HeaderValue::from_str(&future).unwrap());

        assert_eq!(
            parse_ttl(&headers, Duration::from_secs(300)),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_parse_http_date_formats() {
        let expected = parse_http_date("Sun, 06 Nov 1994 08:49:37 GMT").unwrap();

        assert_eq!(parse_http_date("Sunday, 06-Nov-94 08:49:37 GMT"), Some(expected));
        assert_eq!(parse_http_date("yesterday"), None);
    }

    #[test]
    fn test_generate_etag() {
        let a = generate_etag(b"hello");
        let b = generate_etag(b"hello");
        let c = generate_etag(b"world");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_eq!(a.len(), 66);
    }
}
