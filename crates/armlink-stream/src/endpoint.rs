//! Instance URL handling.
//!
//! Stream URLs are derived from the HTTP base address of the service; the
//! scheme mapping `http → ws`, `https → wss` is fixed.

use std::net::Ipv4Addr;

use armlink_types::ArmError;
use url::Url;

/// Parse a user-supplied instance address into a URL.
///
/// Addresses without a scheme default to `https://`, except bare IPv4
/// addresses and `host:port` forms, which are usually local development
/// instances and default to `http://`.
pub fn normalize_instance_url(raw: &str) -> Result<Url, ArmError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ArmError::Config("instance url is empty".to_string()));
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        let authority = raw.split('/').next().unwrap_or(raw);
        let plain_http = authority.contains(':') || authority.parse::<Ipv4Addr>().is_ok();
        if plain_http {
            format!("http://{raw}")
        } else {
            format!("https://{raw}")
        }
    };
    Url::parse(&with_scheme)
        .map_err(|e| ArmError::Config(format!("invalid instance url '{raw}': {e}")))
}

/// Map an `http(s)` URL onto the matching `ws(s)` scheme.
///
/// `ws://` and `wss://` URLs are returned unchanged; any other scheme is
/// rejected.
pub fn to_websocket_url(http_url: &Url) -> Result<Url, ArmError> {
    let scheme = match http_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(ArmError::Config(format!(
                "cannot derive a stream url from scheme '{other}'"
            )));
        }
    };
    let mut url = http_url.clone();
    url.set_scheme(scheme)
        .map_err(|_| ArmError::Config(format!("cannot switch '{http_url}' to {scheme}")))?;
    Ok(url)
}
