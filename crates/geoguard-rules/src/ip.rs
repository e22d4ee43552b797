//! IP address matching.
//!
//! CIDR comparison works on the packed big-endian representation of the
//! address (4 bytes for IPv4, 16 bytes for IPv6) with a byte-aligned mask, so
//! both families share one code path. Every function here returns `false` on
//! malformed input instead of failing.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Parse an address, tolerating surrounding whitespace, IPv6 brackets and a
/// zone suffix (`fe80::1%eth0`).
pub fn parse_ip(raw: &str) -> Option<IpAddr> {
    let trimmed = raw.trim();
    let unbracketed = trimmed
        .strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .unwrap_or(trimmed);
    let without_zone = unbracketed.split('%').next().unwrap_or(unbracketed);
    without_zone.parse().ok()
}

/// Packed network-order bytes of an address.
fn packed(ip: &IpAddr) -> Vec<u8> {
    match ip {
        IpAddr::V4(v4) => v4.octets().to_vec(),
        IpAddr::V6(v6) => v6.octets().to_vec(),
    }
}

/// Check whether `ip` lies inside `subnet/mask_bits`.
///
/// Returns `false` when either address fails to parse, when the families
/// differ, or when `mask_bits` exceeds the address width.
pub fn cidr_match(ip: &str, subnet: &str, mask_bits: u32) -> bool {
    let (Some(ip), Some(subnet)) = (parse_ip(ip), parse_ip(subnet)) else {
        return false;
    };

    let ip_bytes = packed(&ip);
    let subnet_bytes = packed(&subnet);
    if ip_bytes.len() != subnet_bytes.len() {
        return false;
    }

    let width = ip_bytes.len() as u32 * 8;
    if mask_bits > width {
        return false;
    }

    let full_bytes = (mask_bits / 8) as usize;
    let remaining_bits = mask_bits % 8;

    if ip_bytes[..full_bytes] != subnet_bytes[..full_bytes] {
        return false;
    }

    if remaining_bits > 0 {
        let partial_mask: u8 = 0xFF << (8 - remaining_bits);
        if ip_bytes[full_bytes] & partial_mask != subnet_bytes[full_bytes] & partial_mask {
            return false;
        }
    }

    true
}

/// Match `ip` against a single rule pattern: exact address or CIDR block.
///
/// The pattern is expected without its `+`/`-` sign.
pub fn ip_matches(ip: &str, rule: &str) -> bool {
    let rule = rule.trim();
    if rule.is_empty() {
        return false;
    }

    if let Some((subnet, bits)) = rule.split_once('/') {
        return match bits.trim().parse::<u32>() {
            Ok(bits) => cidr_match(ip, subnet, bits),
            Err(_) => false,
        };
    }

    if ip.trim() == rule {
        return true;
    }

    // Textual forms of the same IPv6 address can differ ("::1" vs "0:0::1").
    matches!((parse_ip(ip), parse_ip(rule)), (Some(a), Some(b)) if a == b)
}

/// Returns `true` when `ip` is a globally routable unicast address.
///
/// Private, loopback, link-local, unspecified, documentation, shared
/// (CGNAT), benchmarking, multicast and broadcast ranges are not public.
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_public_v4(&mapped);
            }
            is_public_v6(v6)
        }
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || a == 0
        // 100.64.0.0/10 shared address space
        || (a == 100 && (64..=127).contains(&b))
        // 192.0.0.0/24 protocol assignments
        || (a == 192 && b == 0 && c == 0)
        // 198.18.0.0/15 benchmarking
        || (a == 198 && (b == 18 || b == 19))
        // 240.0.0.0/4 reserved
        || a >= 240)
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        // fc00::/7 unique local
        || (first & 0xfe00) == 0xfc00
        // fe80::/10 link local
        || (first & 0xffc0) == 0xfe80
        // 2001:db8::/32 documentation
        || (first == 0x2001 && ip.segments()[1] == 0x0db8))
}
