//! Requests that bypass the guard entirely.
//!
//! Path rules are prefixes, or regular expressions when written `~<regex>`.
//! IP rules are single addresses or CIDR ranges. User-agent rules use the
//! navigator pattern syntax. Path decisions are memoized.

use crate::config::ExclusionConfig;
use dashmap::DashMap;
use geoguard_rules::{navigator_match, parse_ip};
use ipnet::IpNet;
use regex::Regex;
use std::net::IpAddr;
use tracing::warn;

/// Upper bound on memoized path decisions.
const MAX_MEMO: usize = 10_000;

/// Why a request was excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionReason {
    Path(String),
    Ip(String),
    UserAgent(String),
}

#[derive(Debug)]
enum PathRule {
    Prefix(String),
    Pattern(Regex),
}

impl PathRule {
    fn matches(&self, path: &str) -> bool {
        match self {
            PathRule::Prefix(prefix) => path.starts_with(prefix.as_str()),
            PathRule::Pattern(re) => re.is_match(path),
        }
    }

    fn describe(&self) -> String {
        match self {
            PathRule::Prefix(p) => p.clone(),
            PathRule::Pattern(re) => format!("~{}", re.as_str()),
        }
    }
}

/// Compiled exclusion rules.
#[derive(Debug)]
pub struct ExclusionMatcher {
    paths: Vec<PathRule>,
    networks: Vec<IpNet>,
    user_agents: Vec<String>,
    memo: DashMap<String, Option<usize>>,
}

impl ExclusionMatcher {
    /// Compile `config`. Invalid entries are logged and skipped; startup
    /// validation reports them as errors beforehand.
    pub fn new(config: &ExclusionConfig) -> Self {
        let paths = config
            .paths
            .iter()
            .filter_map(|raw| match raw.strip_prefix('~') {
                Some(expr) => match Regex::new(expr) {
                    Ok(re) => Some(PathRule::Pattern(re)),
                    Err(e) => {
                        warn!(rule = %raw, error = %e, "Skipping invalid path exclusion");
                        None
                    }
                },
                None => Some(PathRule::Prefix(raw.clone())),
            })
            .collect();

        let networks = config
            .ips
            .iter()
            .filter_map(|raw| {
                let net = raw
                    .parse::<IpNet>()
                    .ok()
                    .or_else(|| parse_ip(raw).map(IpNet::from));
                if net.is_none() {
                    warn!(rule = %raw, "Skipping invalid IP exclusion");
                }
                net
            })
            .collect();

        Self {
            paths,
            networks,
            user_agents: config.user_agents.clone(),
            memo: DashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty() && self.networks.is_empty() && self.user_agents.is_empty()
    }

    fn path_rule(&self, path: &str) -> Option<&PathRule> {
        if self.paths.is_empty() {
            return None;
        }
        if let Some(hit) = self.memo.get(path).map(|entry| *entry) {
            return hit.map(|i| &self.paths[i]);
        }

        let hit = self.paths.iter().position(|rule| rule.matches(path));
        if self.memo.len() >= MAX_MEMO {
            self.memo.clear();
        }
        self.memo.insert(path.to_string(), hit);
        hit.map(|i| &self.paths[i])
    }

    /// Check a request. `user_agent` may be absent.
    pub fn check(
        &self,
        path: &str,
        client_ip: Option<IpAddr>,
        user_agent: Option<&str>,
    ) -> Option<ExclusionReason> {
        if let Some(rule) = self.path_rule(path) {
            return Some(ExclusionReason::Path(rule.describe()));
        }

        if let Some(ip) = client_ip
            && let Some(net) = self.networks.iter().find(|net| net.contains(&ip))
        {
            return Some(ExclusionReason::Ip(net.to_string()));
        }

        if let Some(ua) = user_agent.filter(|ua| !ua.is_empty())
            && let Some(pattern) = self.user_agents.iter().find(|p| navigator_match(ua, p))
        {
            return Some(ExclusionReason::UserAgent(pattern.clone()));
        }

        None
    }
}
