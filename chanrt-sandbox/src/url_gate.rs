//! §4.2.1 URL gate — `validateURL`, enforced on every `utils.httpRequest`
//! call made from inside a sandboxed adapter.

use ipnet::Ipv6Net;
use once_cell::sync::Lazy;
use std::net::IpAddr;

static UNIQUE_LOCAL_V6: Lazy<Ipv6Net> = Lazy::new(|| "fc00::/7".parse().expect("valid CIDR"));
static LINK_LOCAL_V6: Lazy<Ipv6Net> = Lazy::new(|| "fe80::/10".parse().expect("valid CIDR"));

/// Rejects non-`http`/`https` schemes, loopback/private/link-local
/// addresses, and the literal strings `localhost`/`127.0.0.1`/`::1`, plus any
/// hostname containing the substrings `localhost` or `local` when it does
/// not parse as an IP address. DNS rebinding is not mitigated here (§9).
pub fn validate_url(url: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(url).map_err(|e| format!("invalid URL: {e}"))?;

    match parsed.scheme() {
        "http" | "https" => {}
        other => return Err(format!("scheme '{other}' is not allowed; only http/https")),
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| "URL has no hostname".to_string())?;
    if host.is_empty() {
        return Err("URL has an empty hostname".to_string());
    }

    if host.eq_ignore_ascii_case("localhost") || host == "127.0.0.1" || host == "::1" {
        return Err("access to private networks is not allowed".to_string());
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_blocked_ip(&ip) {
            return Err("access to private networks is not allowed".to_string());
        }
    } else {
        let lower = host.to_ascii_lowercase();
        if lower.contains("localhost") || lower.contains("local") {
            return Err("access to private networks is not allowed".to_string());
        }
        if !host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        {
            return Err("hostname contains invalid characters".to_string());
        }
    }

    Ok(parsed)
}

fn is_blocked_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || UNIQUE_LOCAL_V6.contains(v6)
                || LINK_LOCAL_V6.contains(v6)
        }
    }
}
