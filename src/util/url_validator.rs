use std::net::IpAddr;
use thiserror::Error;
use url::Url;

/// Errors that can occur during URL validation.
///
/// These errors cover both parsing failures and security policy violations
/// designed to prevent SSRF (Server-Side Request Forgery) attacks.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    /// The URL string could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// The URL uses a scheme we cannot fetch over.
    #[error("Unsupported protocol: {0}")]
    UnsupportedScheme(String),
    /// The URL has no host component.
    #[error("URL has no host")]
    MissingHost,
    /// The URL points to a private/internal IP address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    /// The URL points to localhost.
    #[error("Localhost not allowed")]
    Localhost,
    /// The host is a shorthand numeric address such as `127.1` or
    /// `0x7f000001`, which resolvers expand to an IPv4 address.
    #[error("Numeric host not allowed: {0}")]
    NumericHost(String),
}

/// Transport selected for a feed URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `gemini://` over TLS on port 1965 by default.
    Gemini,
    /// `https://`, or plain `http://` against a loopback host.
    Http,
}

/// Validates a feed URL and picks the transport that will fetch it.
///
/// - `gemini` and `https` URLs must name a public host.
/// - `http` is only accepted for loopback hosts (local test servers).
/// - Every other scheme is rejected with [`UrlValidationError::UnsupportedScheme`].
///
/// # Examples
///
/// ```
/// use gemmit::util::{transport_for, Transport};
/// use url::Url;
///
/// let url = Url::parse("gemini://example.org/feed.gmi").unwrap();
/// assert_eq!(transport_for(&url).unwrap(), Transport::Gemini);
///
/// let url = Url::parse("ftp://example.org/feed").unwrap();
/// assert!(transport_for(&url).is_err());
/// ```
pub fn transport_for(url: &Url) -> Result<Transport, UrlValidationError> {
    match url.scheme() {
        "gemini" => {
            check_public_host(url)?;
            Ok(Transport::Gemini)
        }
        "https" => {
            check_public_host(url)?;
            Ok(Transport::Http)
        }
        "http" if is_loopback_host(url) => {
            tracing::warn!(url = %url, "Fetching over plain HTTP (localhost only)");
            Ok(Transport::Http)
        }
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Validates the base URL of an outbound JSON service.
///
/// HTTPS is required, except for loopback hosts which may use plain HTTP.
pub fn validate_service_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback_host(&url) => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => strip_brackets(host)
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false),
        None => false,
    }
}

fn check_public_host(url: &Url) -> Result<(), UrlValidationError> {
    let host = url.host_str().ok_or(UrlValidationError::MissingHost)?;
    if host == "localhost" {
        return Err(UrlValidationError::Localhost);
    }

    match strip_brackets(host).parse::<IpAddr>() {
        Ok(ip) => ensure_public_ip(&ip),
        // Non-special schemes such as gemini keep the host as opaque text
        Err(_) if is_numeric_host(host) => Err(UrlValidationError::NumericHost(host.to_owned())),
        Err(_) => Ok(()),
    }
}

/// Rejects addresses on the local host or a private network.
///
/// IPv4-mapped IPv6 addresses are classified as the IPv4 address they carry.
/// The Gemini transport applies this to every resolved address before
/// connecting.
pub fn ensure_public_ip(ip: &IpAddr) -> Result<(), UrlValidationError> {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(*ip, IpAddr::V4),
        IpAddr::V4(_) => *ip,
    };
    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    if is_private_ip(&ip) {
        return Err(UrlValidationError::PrivateIp(ip.to_string()));
    }
    Ok(())
}

/// Every dot-separated label is decimal or `0x` hex, as in `2130706433`,
/// `127.1` or `0x7f.0.0.1`.
fn is_numeric_host(host: &str) -> bool {
    let host = host.strip_suffix('.').unwrap_or(host);
    !host.is_empty()
        && host.split('.').all(|label| {
            match label.strip_prefix("0x").or_else(|| label.strip_prefix("0X")) {
                Some(hex) => hex.bytes().all(|b| b.is_ascii_hexdigit()),
                None => !label.is_empty() && label.bytes().all(|b| b.is_ascii_digit()),
            }
        })
}

// Strip brackets from IPv6 addresses for parsing
fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(ipv4) => {
            ipv4.is_private() || ipv4.is_loopback() || ipv4.is_link_local() || ipv4.is_unspecified()
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() || ipv6.is_unspecified() {
                return true;
            }
            let segments = ipv6.segments();
            // Unique Local (fc00::/7)
            let is_unique_local = (segments[0] & 0xfe00) == 0xfc00;
            // Link-Local (fe80::/10)
            let is_link_local = (segments[0] & 0xffc0) == 0xfe80;
            is_unique_local || is_link_local
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(s: &str) -> Result<Transport, UrlValidationError> {
        transport_for(&Url::parse(s).unwrap())
    }

    #[test]
    fn test_supported_schemes() {
        assert_eq!(transport("gemini://example.org/").unwrap(), Transport::Gemini);
        assert_eq!(transport("https://example.com/feed.xml").unwrap(), Transport::Http);
    }

    #[test]
    fn test_unsupported_schemes() {
        assert!(matches!(
            transport("ftp://example.com/feed"),
            Err(UrlValidationError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(transport("file:///etc/passwd").is_err());
        assert!(transport("gopher://example.com/").is_err());
    }

    #[test]
    fn test_plain_http_only_for_loopback() {
        assert_eq!(transport("http://127.0.0.1:8080/feed").unwrap(), Transport::Http);
        assert_eq!(transport("http://localhost/feed").unwrap(), Transport::Http);
        assert!(transport("http://example.com/feed").is_err());
    }

    #[test]
    fn test_localhost_rejected_for_remote_schemes() {
        assert!(matches!(
            transport("gemini://localhost/"),
            Err(UrlValidationError::Localhost)
        ));
        assert!(transport("https://127.0.0.1/feed").is_err());
        assert!(transport("https://[::1]/feed").is_err());
    }

    #[test]
    fn test_private_ips_rejected() {
        assert!(transport("gemini://192.168.1.1/feed").is_err());
        assert!(transport("https://10.0.0.1/feed").is_err());
        assert!(transport("https://172.16.0.1:8443/feed").is_err());
        assert!(transport("https://169.254.1.1/feed").is_err());
        assert!(transport("https://[fe80::1]/feed").is_err());
        assert!(transport("https://0.0.0.0/feed").is_err());
        assert!(matches!(
            transport("https://[::ffff:127.0.0.1]/feed"),
            Err(UrlValidationError::Localhost)
        ));
        assert!(matches!(
            transport("https://[::ffff:10.0.0.1]/feed"),
            Err(UrlValidationError::PrivateIp(_))
        ));
    }

    #[test]
    fn test_numeric_gemini_hosts_rejected() {
        for url in [
            "gemini://2130706433/feed",
            "gemini://127.1/feed",
            "gemini://0x7f000001/feed",
            "gemini://0x7f.0.0.1/feed",
            "gemini://10.1/feed",
        ] {
            assert!(
                matches!(transport(url), Err(UrlValidationError::NumericHost(_))),
                "accepted {url}"
            );
        }
        // Dotted quads are still classified normally
        assert!(matches!(
            transport("gemini://127.0.0.1/feed"),
            Err(UrlValidationError::Localhost)
        ));
        assert_eq!(transport("gemini://8.8.8.8/feed").unwrap(), Transport::Gemini);
        assert_eq!(transport("gemini://1965.example/feed").unwrap(), Transport::Gemini);
        assert_eq!(transport("gemini://cafe.example/feed").unwrap(), Transport::Gemini);
    }

    #[test]
    fn test_ensure_public_ip() {
        let ip = |s: &str| s.parse::<IpAddr>().unwrap();
        assert!(ensure_public_ip(&ip("93.184.216.34")).is_ok());
        assert!(ensure_public_ip(&ip("2606:4700::1111")).is_ok());
        assert!(matches!(
            ensure_public_ip(&ip("::ffff:127.0.0.1")),
            Err(UrlValidationError::Localhost)
        ));
        assert!(matches!(
            ensure_public_ip(&ip("::ffff:192.168.0.10")),
            Err(UrlValidationError::PrivateIp(_))
        ));
        assert!(ensure_public_ip(&ip("fd00::1")).is_err());
    }

    #[test]
    fn test_service_url_requires_https() {
        assert!(validate_service_url("https://api.mymonero.com:8443").is_ok());
        assert!(validate_service_url("http://127.0.0.1:9000").is_ok());
        assert!(validate_service_url("http://api.mymonero.com").is_err());
        assert!(validate_service_url("not a url").is_err());
    }
}
