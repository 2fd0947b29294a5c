//! Private / LAN address detection.
//!
//! Private addresses always route `DIRECT`, before temporary overrides,
//! global mode and the ruleset. The ranges are compile-time constants.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// IPv4 private ranges as (network, mask) pairs in host byte order:
/// 10/8, 172.16/12, 192.168/16, 127/8 loopback, 169.254/16 link-local.
const PRIVATE_V4: &[(u32, u32)] = &[
    (0x0A00_0000, 0xFF00_0000),
    (0xAC10_0000, 0xFFF0_0000),
    (0xC0A8_0000, 0xFFFF_0000),
    (0x7F00_0000, 0xFF00_0000),
    (0xA9FE_0000, 0xFFFF_0000),
];

/// Returns true for private, loopback and link-local addresses.
///
/// IPv6 coverage: `::1/128`, `fe80::/10` and `fc00::/7`. IPv4-mapped
/// IPv6 addresses are checked against the IPv4 table.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

/// String-level helper; returns false when the input is not an IP literal.
pub fn is_private_str(input: &str) -> bool {
    input.parse::<IpAddr>().map(is_private).unwrap_or(false)
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let bits = u32::from(ip);
    PRIVATE_V4
        .iter()
        .any(|&(net, mask)| bits & mask == net)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if ip == Ipv6Addr::LOCALHOST {
        return true;
    }
    let o = ip.octets();
    // fe80::/10
    if o[0] == 0xFE && o[1] & 0xC0 == 0x80 {
        return true;
    }
    // fc00::/7 (unique local)
    o[0] & 0xFE == 0xFC
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v4_private_ranges() {
        for ip in [
            "10.0.0.1",
            "10.255.255.255",
            "172.16.0.1",
            "172.31.255.254",
            "192.168.1.1",
            "127.0.0.1",
            "169.254.10.20",
        ] {
            assert!(is_private_str(ip), "{ip} should be private");
        }
    }

    #[test]
    fn v4_public_addresses() {
        for ip in ["8.8.8.8", "1.1.1.1", "172.32.0.1", "11.0.0.1", "192.169.0.1"] {
            assert!(!is_private_str(ip), "{ip} should be public");
        }
    }

    #[test]
    fn v6_ranges() {
        assert!(is_private_str("::1"));
        assert!(is_private_str("fe80::1"));
        assert!(is_private_str("febf::1"));
        assert!(!is_private_str("fec0::1"));
        assert!(is_private_str("fc00::1"));
        assert!(is_private_str("fd12:3456::1"));
        assert!(!is_private_str("2001:db8::1"));
    }

    #[test]
    fn v4_mapped_v6() {
        assert!(is_private_str("::ffff:192.168.1.1"));
        assert!(!is_private_str("::ffff:8.8.8.8"));
    }

    #[test]
    fn non_ip_input() {
        assert!(!is_private_str("example.com"));
        assert!(!is_private_str(""));
    }
}
