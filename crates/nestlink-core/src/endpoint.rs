//! HTTP and WebSocket endpoint derivation
//!
//! The WebSocket endpoint lives on the same host as the HTTP endpoint with
//! `/graphql` swapped for `/subscriptions`. An `https` endpoint always pairs
//! with `wss`; there is no override for that.

use url::Url;

use crate::{Error, Result};

const HTTP_SUFFIX: &str = "/graphql";
const WS_SUFFIX: &str = "/subscriptions";

/// Parse and check an HTTP GraphQL endpoint
pub fn parse_http_endpoint(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::config(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::config(format!(
            "Endpoint scheme must be http or https, got '{}'",
            other
        ))),
    }
}

/// Derive the subscriptions endpoint from the HTTP endpoint
pub fn subscription_url(http: &Url) -> Result<Url> {
    let scheme = match http.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(Error::config(format!(
                "Cannot derive a WebSocket endpoint from scheme '{}'",
                other
            )))
        }
    };

    let mut ws = http.clone();
    ws.set_scheme(scheme)
        .map_err(|_| Error::config(format!("Cannot switch '{}' to {}", http, scheme)))?;

    let path = http.path().trim_end_matches('/');
    let base = path.strip_suffix(HTTP_SUFFIX).unwrap_or(path);
    ws.set_path(&format!("{}{}", base, WS_SUFFIX));
    Ok(ws)
}

/// Check that an explicit WebSocket endpoint is compatible with the HTTP one
pub fn validate_pair(http: &Url, ws: &Url) -> Result<()> {
    match (http.scheme(), ws.scheme()) {
        ("https", "wss") | ("http", "ws") | ("http", "wss") => Ok(()),
        ("https", "ws") => Err(Error::config(
            "An https endpoint requires a wss subscription endpoint",
        )),
        (_, other) if other != "ws" && other != "wss" => Err(Error::config(format!(
            "Subscription endpoint scheme must be ws or wss, got '{}'",
            other
        ))),
        (other, _) => Err(Error::config(format!(
            "Endpoint scheme must be http or https, got '{}'",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn derive(endpoint: &str) -> String {
        subscription_url(&Url::parse(endpoint).unwrap()).unwrap().to_string()
    }

    #[test]
    fn test_suffix_and_scheme_are_swapped() {
        assert_eq!(derive("https://api.example.com/graphql"), "wss://api.example.com/subscriptions");
        assert_eq!(derive("http://localhost:4000/graphql"), "ws://localhost:4000/subscriptions");
        assert_eq!(derive("https://api.example.com/v2/graphql/"), "wss://api.example.com/v2/subscriptions");
    }

    #[test]
    fn test_suffix_is_appended_when_missing() {
        assert_eq!(derive("https://api.example.com"), "wss://api.example.com/subscriptions");
        assert_eq!(derive("https://api.example.com/api"), "wss://api.example.com/api/subscriptions");
    }

    #[test]
    fn test_query_string_is_kept() {
        assert_eq!(
            derive("https://api.example.com/graphql?tenant=7"),
            "wss://api.example.com/subscriptions?tenant=7"
        );
    }

    #[test]
    fn test_encrypted_pairing_is_enforced() {
        let https = Url::parse("https://api.example.com/graphql").unwrap();
        let ws = Url::parse("ws://api.example.com/subscriptions").unwrap();
        let wss = Url::parse("wss://api.example.com/subscriptions").unwrap();

        assert!(validate_pair(&https, &wss).is_ok());
        assert!(matches!(validate_pair(&https, &ws), Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_non_http_endpoint_rejected() {
        assert!(parse_http_endpoint("ftp://example.com/graphql").is_err());
        assert!(parse_http_endpoint("not a url").is_err());
        assert!(parse_http_endpoint("https://example.com/graphql").is_ok());
    }
}
