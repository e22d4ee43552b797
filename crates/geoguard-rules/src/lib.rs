//! # geoguard-rules
//!
//! Stateless building blocks for request access control:
//!
//! - Signed rule lists (`+pattern` allows, `-pattern` denies) and their merging
//! - Exact and CIDR IP matching for IPv4 and IPv6
//! - User-agent pattern matching (delimited regex, whole word, substring)
//! - Known crawler signatures and generic bot heuristics
//! - The IP rule evaluator shared by every IP-shaped filter
//!
//! Nothing in this crate performs I/O or holds mutable state besides a
//! process-wide cache of compiled user-agent regexes.
//!
//! ## Quick Start
//!
//! ```rust
//! use geoguard_rules::{evaluate_ip_rules, DefaultBehavior};
//!
//! let rules = vec!["-10.0.0.0/8".to_string(), "+10.1.2.3".to_string()];
//!
//! // Allow-list entries win over deny-list entries regardless of order.
//! assert!(evaluate_ip_rules("10.1.2.3", &rules, DefaultBehavior::Allow).is_none());
//!
//! let denied = evaluate_ip_rules("10.9.9.9", &rules, DefaultBehavior::Allow).unwrap();
//! assert!(!denied.allowed);
//! assert_eq!(denied.reason.as_deref(), Some("ip:10.0.0.0/8"));
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod crawler;
pub mod decision;
pub mod evaluate;
pub mod ip;
pub mod navigator;
pub mod signed;

pub use crawler::{is_known_crawler, looks_like_crawler};
pub use decision::{Category, Decision, DefaultBehavior};
pub use evaluate::evaluate_ip_rules;
pub use ip::{cidr_match, ip_matches, is_public_ip, parse_ip};
pub use navigator::{first_match, navigator_match, parse_delimited_regex};
pub use signed::{merge_rules, normalize_pattern, split_signed_rules, RuleSign, SignedRules};
