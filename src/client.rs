use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::utils::parse_headers_with_escapes;

/// Errors raised while building the HTTP client.
#[derive(Error, Debug)]
pub enum ClientBuildError {
    #[error("RESOLVE_TARGET_ADDR '{0}' is not in the expected format 'hostname:ip:port'")]
    ResolveFormat(String),

    #[error("RESOLVE_TARGET_ADDR: {0}")]
    ResolveValue(String),

    #[error("Invalid header in CUSTOM_HEADERS: {0}")]
    Header(String),

    #[error("Failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub timeout: Duration,
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub custom_headers: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            skip_tls_verify: false,
            resolve_target_addr: None,
            custom_headers: None,
        }
    }
}

/// Builds a reqwest client for one simulated user.
///
/// Every user gets its own client, so cookies set for one user are never
/// sent by another.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ClientBuildError> {
    let mut client_builder = reqwest::Client::builder()
        .cookie_store(true)
        .timeout(config.timeout);

    if let Some(resolve_str) = config.resolve_target_addr.as_deref() {
        if !resolve_str.is_empty() {
            let (hostname, socket_addr) = parse_dns_override(resolve_str)?;
            debug!(hostname = %hostname, addr = %socket_addr, "Applying DNS override");
            client_builder = client_builder.resolve(&hostname, socket_addr);
        }
    }

    let headers = parse_custom_headers(config.custom_headers.as_deref())?;
    if !headers.is_empty() {
        client_builder = client_builder.default_headers(headers);
    }

    if config.skip_tls_verify {
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    Ok(client_builder.build()?)
}

/// Parses a `hostname:ip:port` DNS override.
pub fn parse_dns_override(resolve_str: &str) -> Result<(String, SocketAddr), ClientBuildError> {
    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    let [hostname, ip, port] = parts.as_slice() else {
        return Err(ClientBuildError::ResolveFormat(resolve_str.to_string()));
    };

    if hostname.is_empty() || ip.is_empty() || port.is_empty() {
        return Err(ClientBuildError::ResolveFormat(resolve_str.to_string()));
    }

    let port: u16 = port.parse().map_err(|e| {
        ClientBuildError::ResolveValue(format!("Failed to parse port '{}': {}", port, e))
    })?;

    let socket_addr_str = format!("{}:{}", ip, port);
    let socket_addr: SocketAddr = socket_addr_str.parse().map_err(|e| {
        ClientBuildError::ResolveValue(format!(
            "Failed to parse '{}' as an address: {}",
            socket_addr_str, e
        ))
    })?;

    Ok((hostname.to_string(), socket_addr))
}

/// Parses `CUSTOM_HEADERS` into a header map.
pub fn parse_custom_headers(custom_headers_str: Option<&str>) -> Result<HeaderMap, ClientBuildError> {
    let mut parsed_headers = HeaderMap::new();

    let headers_str = match custom_headers_str {
        Some(s) if !s.is_empty() => s,
        _ => return Ok(parsed_headers),
    };

    for header_pair_str in parse_headers_with_escapes(headers_str) {
        let header_pair = header_pair_str.trim();

        let Some((name_str, value_str)) = header_pair.split_once(':') else {
            return Err(ClientBuildError::Header(format!(
                "'{}'. Expected 'Name:Value'.",
                header_pair
            )));
        };

        let name_str = name_str.trim();
        if name_str.is_empty() {
            return Err(ClientBuildError::Header(format!(
                "Header name cannot be empty in '{}'.",
                header_pair
            )));
        }

        let header_name = HeaderName::from_str(name_str)
            .map_err(|e| ClientBuildError::Header(format!("name '{}': {}", name_str, e)))?;
        let header_value = HeaderValue::from_str(value_str.trim())
            .map_err(|e| ClientBuildError::Header(format!("value for '{}': {}", name_str, e)))?;

        parsed_headers.insert(header_name, header_value);
    }

    Ok(parsed_headers)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns_override() {
        let (host, addr) = parse_dns_override("api.angple.local:127.0.0.1:8081").unwrap();
        assert_eq!(host, "api.angple.local");
        assert_eq!(addr, "127.0.0.1:8081".parse().unwrap());
    }

    #[test]
    fn test_dns_override_errors() {
        assert!(matches!(
            parse_dns_override("api.angple.local:127.0.0.1"),
            Err(ClientBuildError::ResolveFormat(_))
        ));
        assert!(matches!(
            parse_dns_override("api.angple.local::8081"),
            Err(ClientBuildError::ResolveFormat(_))
        ));
        assert!(matches!(
            parse_dns_override("api.angple.local:127.0.0.1:99999"),
            Err(ClientBuildError::ResolveValue(_))
        ));
        assert!(matches!(
            parse_dns_override("api.angple.local:not-an-ip:8081"),
            Err(ClientBuildError::ResolveValue(_))
        ));
    }

    #[test]
    fn test_custom_headers() {
        let headers =
            parse_custom_headers(Some("Accept:text/html\\,application/json,X-Load-Test:angple"))
                .unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers["accept"], "text/html,application/json");
        assert_eq!(headers["x-load-test"], "angple");
    }

    #[test]
    fn test_custom_headers_empty() {
        assert!(parse_custom_headers(None).unwrap().is_empty());
        assert!(parse_custom_headers(Some("")).unwrap().is_empty());
    }

    #[test]
    fn test_custom_headers_errors() {
        assert!(parse_custom_headers(Some("NoColonHere")).is_err());
        assert!(parse_custom_headers(Some(":value")).is_err());
        assert!(parse_custom_headers(Some("Bad Name:value")).is_err());
    }

    #[test]
    fn test_build_client_with_everything() {
        let config = ClientConfig {
            timeout: Duration::from_secs(5),
            skip_tls_verify: true,
            resolve_target_addr: Some("api.angple.local:127.0.0.1:8081".to_string()),
            custom_headers: Some("X-Load-Test:angple".to_string()),
        };
        assert!(build_client(&config).is_ok());
    }
}
