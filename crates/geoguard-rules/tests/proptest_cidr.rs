//! Property-based tests for CIDR matching and rule precedence.
//!
//! Verifies that the byte-aligned mask comparison agrees with a plain
//! integer prefix comparison for every mask length of both families.

use geoguard_rules::{cidr_match, evaluate_ip_rules, ip_matches, DefaultBehavior};
use proptest::prelude::*;
use std::net::{Ipv4Addr, Ipv6Addr};

fn prefix_eq_u32(a: u32, b: u32, bits: u32) -> bool {
    if bits == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - bits);
    a & mask == b & mask
}

fn prefix_eq_u128(a: u128, b: u128, bits: u32) -> bool {
    if bits == 0 {
        return true;
    }
    let mask = u128::MAX << (128 - bits);
    a & mask == b & mask
}

proptest! {
    #[test]
    fn cidr_v4_matches_integer_prefix(ip in any::<u32>(), subnet in any::<u32>(), bits in 0u32..=32) {
        let ip_s = Ipv4Addr::from(ip).to_string();
        let subnet_s = Ipv4Addr::from(subnet).to_string();
        prop_assert_eq!(cidr_match(&ip_s, &subnet_s, bits), prefix_eq_u32(ip, subnet, bits));
    }

    #[test]
    fn cidr_v6_matches_integer_prefix(ip in any::<u128>(), subnet in any::<u128>(), bits in 0u32..=128) {
        let ip_s = Ipv6Addr::from(ip).to_string();
        let subnet_s = Ipv6Addr::from(subnet).to_string();
        prop_assert_eq!(cidr_match(&ip_s, &subnet_s, bits), prefix_eq_u128(ip, subnet, bits));
    }

    #[test]
    fn address_is_inside_its_own_network(ip in any::<u32>(), bits in 0u32..=32) {
        let ip_s = Ipv4Addr::from(ip).to_string();
        let rule = format!("{ip_s}/{bits}");
        prop_assert!(ip_matches(&ip_s, &rule));
    }

    #[test]
    fn mixed_families_never_match(v4 in any::<u32>(), v6 in any::<u128>(), bits in 0u32..=32) {
        let v4_s = Ipv4Addr::from(v4).to_string();
        let v6_s = Ipv6Addr::from(v6).to_string();
        prop_assert!(!cidr_match(&v4_s, &v6_s, bits));
        prop_assert!(!cidr_match(&v6_s, &v4_s, bits));
    }

    #[test]
    fn exact_allow_always_overrides_covering_deny(ip in any::<u32>(), bits in 0u32..=32) {
        let ip_s = Ipv4Addr::from(ip).to_string();
        let rules = vec![format!("-{ip_s}/{bits}"), format!("+{ip_s}")];
        prop_assert!(evaluate_ip_rules(&ip_s, &rules, DefaultBehavior::Block).is_none());
    }

    #[test]
    fn garbage_never_panics(ip in "\\PC{0,40}", rule in "\\PC{0,40}") {
        let _ = ip_matches(&ip, &rule);
    }
}
