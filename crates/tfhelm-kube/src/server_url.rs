//! Server URL defaulting for host overrides
//!
//! A host override is applied after the kubeconfig has been loaded, so it must
//! already be the full `scheme://host:port` the REST client would have derived
//! on its own. These rules follow the REST client's default-server-URL logic:
//! a bare `host` or `host:port` gets `https://` when TLS is implied and
//! `http://` otherwise, and a path other than `/` is rejected. An explicit
//! trailing `/` and a query string are kept as written.

use url::{Position, Url};

use crate::error::{KubeError, Result};

/// Compute the server URL for a host override
///
/// `default_tls` is true when any TLS material (a CA, a client certificate or
/// the insecure flag) accompanies the override.
pub fn default_server_url(host: &str, default_tls: bool) -> Result<String> {
    if host.is_empty() {
        return Err(invalid(host, "host must be a URL or a host:port pair"));
    }

    let url = match Url::parse(host) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => url,
        _ => {
            let scheme = if default_tls { "https" } else { "http" };
            Url::parse(&format!("{}://{}", scheme, host)).map_err(|e| invalid(host, &e.to_string()))?
        }
    };

    if !url.path().is_empty() && url.path() != "/" {
        return Err(invalid(host, "host must be a URL or a host:port pair"));
    }

    let mut server = url[..Position::AfterPort].to_string();
    if has_root_path(host) {
        server.push('/');
    }
    if let Some(query) = url.query() {
        server.push('?');
        server.push_str(query);
    }
    Ok(server)
}

/// Whether `host` spells out the `/` path itself; `Url` always adds one
fn has_root_path(host: &str) -> bool {
    let before_query = host.split(['?', '#']).next().unwrap_or_default();
    let authority = before_query
        .split_once("://")
        .map_or(before_query, |(_, rest)| rest);
    authority.contains('/')
}

fn invalid(host: &str, reason: &str) -> KubeError {
    KubeError::InvalidHost {
        host: host.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_host_uses_tls_default() {
        assert_eq!(
            default_server_url("10.0.0.1:6443", true).unwrap(),
            "https://10.0.0.1:6443"
        );
        assert_eq!(
            default_server_url("10.0.0.1:6443", false).unwrap(),
            "http://10.0.0.1:6443"
        );
        assert_eq!(
            default_server_url("kubernetes.local", true).unwrap(),
            "https://kubernetes.local"
        );
    }

    #[test]
    fn test_host_port_without_scheme() {
        // `localhost:8080` parses as scheme "localhost" with no host
        assert_eq!(
            default_server_url("localhost:8080", false).unwrap(),
            "http://localhost:8080"
        );
        assert_eq!(
            default_server_url("[::1]:6443", true).unwrap(),
            "https://[::1]:6443"
        );
    }

    #[test]
    fn test_full_url_is_kept() {
        assert_eq!(
            default_server_url("http://example.com:8080", true).unwrap(),
            "http://example.com:8080"
        );
        assert_eq!(
            default_server_url("https://example.com/", false).unwrap(),
            "https://example.com/"
        );
        assert_eq!(
            default_server_url("https://example.com:6443?timeout=5s", false).unwrap(),
            "https://example.com:6443?timeout=5s"
        );
        assert_eq!(
            default_server_url("10.0.0.1:6443/", true).unwrap(),
            "https://10.0.0.1:6443/"
        );
    }

    #[test]
    fn test_path_is_rejected() {
        assert!(matches!(
            default_server_url("https://example.com/api", true),
            Err(KubeError::InvalidHost { .. })
        ));
        assert!(default_server_url("", true).is_err());
    }
}
