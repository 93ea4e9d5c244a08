//! Endpoint guard for discovered backends
//!
//! Discovered endpoints come from an external marketplace and are attacker
//! input. Before the gateway will forward a call, the endpoint host must not
//! point (textually) at loopback, private ranges, link-local, carrier NAT,
//! or the cloud metadata service. Name resolution is deliberately not
//! performed here; a hostname that only *resolves* to a private address is
//! out of scope for this check.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::Url;

/// Hostname literals that are always blocked.
const BLOCKED_HOSTS: &[&str] = &["localhost", "metadata.google.internal"];

/// Why an endpoint was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EndpointBlocked {
    #[error("endpoint URL does not parse")]
    Unparseable,

    #[error("endpoint URL has no host")]
    NoHost,

    #[error("host '{0}' is a blocked name")]
    BlockedName(String),

    #[error("address {0} is in a private or reserved range")]
    PrivateAddress(IpAddr),
}

/// Validate a discovered endpoint URL. `Ok(())` means it may be called.
pub fn check_endpoint(endpoint: &str) -> Result<(), EndpointBlocked> {
    let url = Url::parse(endpoint).map_err(|_| EndpointBlocked::Unparseable)?;
    let host = url.host_str().ok_or(EndpointBlocked::NoHost)?;
    let host = host.trim_matches(|c| c == '[' || c == ']');

    let lowered = host.to_lowercase();
    if BLOCKED_HOSTS.contains(&lowered.as_str()) {
        return Err(EndpointBlocked::BlockedName(lowered));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private(ip) {
            return Err(EndpointBlocked::PrivateAddress(ip));
        }
    }

    Ok(())
}

fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let octets = ip.octets();
    ip.is_loopback()                                    // 127/8
        || ip.is_private()                              // 10/8, 172.16/12, 192.168/16
        || ip.is_link_local()                           // 169.254/16
        || (octets[0] == 100 && (64..128).contains(&octets[1])) // 100.64/10
        || ip.is_unspecified()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let segments = ip.segments();
    ip.is_loopback()
        || ip.is_unspecified()
        || (segments[0] & 0xfe00) == 0xfc00 // fc00::/7 unique-local
        || (segments[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
        || ip.to_ipv4_mapped().is_some_and(is_private_v4)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_public_endpoints_pass() {
        assert!(check_endpoint("https://api.example.com/scan").is_ok());
        assert!(check_endpoint("http://203.0.113.10:8080/x").is_ok());
    }

    #[test]
    fn test_loopback_blocked() {
        assert!(check_endpoint("http://127.0.0.1/x").is_err());
        assert!(check_endpoint("http://127.8.8.8/x").is_err());
        assert!(check_endpoint("http://localhost:9000/x").is_err());
        assert!(check_endpoint("http://[::1]/x").is_err());
    }

    #[test]
    fn test_private_ranges_blocked() {
        for addr in [
            "http://10.1.2.3/",
            "http://172.16.0.1/",
            "http://172.31.255.255/",
            "http://192.168.1.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.0.1/",
            "http://100.127.255.255/",
        ] {
            assert!(check_endpoint(addr).is_err(), "{addr} should be blocked");
        }
        // Near misses stay reachable.
        assert!(check_endpoint("http://172.32.0.1/").is_ok());
        assert!(check_endpoint("http://100.128.0.1/").is_ok());
    }

    #[test]
    fn test_ipv6_reserved_blocked() {
        assert!(check_endpoint("http://[fc00::1]/").is_err());
        assert!(check_endpoint("http://[fdab::1]/").is_err());
        assert!(check_endpoint("http://[fe80::1]/").is_err());
        assert!(check_endpoint("http://[::ffff:10.0.0.1]/").is_err());
        assert!(check_endpoint("http://[2001:db8::1]/").is_ok());
    }

    #[test]
    fn test_metadata_host_blocked() {
        assert!(matches!(
            check_endpoint("http://metadata.google.internal/computeMetadata/v1/"),
            Err(EndpointBlocked::BlockedName(_))
        ));
    }

    #[test]
    fn test_unparseable_blocked() {
        assert_eq!(check_endpoint("not a url"), Err(EndpointBlocked::Unparseable));
        assert!(check_endpoint("").is_err());
    }
}
