//! Host whitelist gating literal-URL routing.
//!
//! Callers may bypass discovery by naming an upstream URL directly, which
//! turns the gateway into an open proxy unless the target is vetted. The
//! whitelist is a closed set of IP rules; anything it cannot positively
//! match is rejected, including DNS names and the empty rule set.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::Url;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleParseError {
    #[error("empty whitelist rule")]
    Empty,

    #[error("invalid ip address in whitelist rule {0:?}")]
    BadAddress(String),

    #[error("invalid prefix length in whitelist rule {0:?}")]
    BadPrefix(String),
}

/// One vetted address or network. Keeping the forms closed means matching
/// is a single dispatch with no string handling on the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostRule {
    ExactV4(Ipv4Addr),
    ExactV6(Ipv6Addr),
    PrefixV4 { network: Ipv4Addr, bits: u8 },
    PrefixV6 { network: Ipv6Addr, bits: u8 },
}

impl HostRule {
    /// Parse `"10.1.2.3"`, `"10.0.0.0/8"`, `"::1"` or `"fd00::/8"`.
    pub fn parse(rule: &str) -> Result<Self, RuleParseError> {
        let rule = rule.trim();
        if rule.is_empty() {
            return Err(RuleParseError::Empty);
        }
        match rule.split_once('/') {
            None => match rule.parse::<IpAddr>() {
                Ok(IpAddr::V4(addr)) => Ok(HostRule::ExactV4(addr)),
                Ok(IpAddr::V6(addr)) => Ok(HostRule::ExactV6(addr)),
                Err(_) => Err(RuleParseError::BadAddress(rule.to_string())),
            },
            Some((addr, prefix)) => {
                let addr = addr
                    .parse::<IpAddr>()
                    .map_err(|_| RuleParseError::BadAddress(rule.to_string()))?;
                let bits = prefix
                    .parse::<u8>()
                    .map_err(|_| RuleParseError::BadPrefix(rule.to_string()))?;
                match addr {
                    IpAddr::V4(network) if bits <= 32 => Ok(HostRule::PrefixV4 { network, bits }),
                    IpAddr::V6(network) if bits <= 128 => Ok(HostRule::PrefixV6 { network, bits }),
                    _ => Err(RuleParseError::BadPrefix(rule.to_string())),
                }
            }
        }
    }
}

fn v4_prefix_matches(network: Ipv4Addr, bits: u8, ip: Ipv4Addr) -> bool {
    if bits == 0 {
        return true;
    }
    let shift = 32 - u32::from(bits);
    (u32::from(network) >> shift) == (u32::from(ip) >> shift)
}

fn v6_prefix_matches(network: Ipv6Addr, bits: u8, ip: Ipv6Addr) -> bool {
    if bits == 0 {
        return true;
    }
    let shift = 128 - u32::from(bits);
    (u128::from(network) >> shift) == (u128::from(ip) >> shift)
}

fn rule_matches(rule: &HostRule, ip: IpAddr) -> bool {
    match (rule, ip) {
        (HostRule::ExactV4(addr), IpAddr::V4(ip)) => *addr == ip,
        (HostRule::ExactV6(addr), IpAddr::V6(ip)) => *addr == ip,
        (HostRule::PrefixV4 { network, bits }, IpAddr::V4(ip)) => {
            v4_prefix_matches(*network, *bits, ip)
        }
        (HostRule::PrefixV6 { network, bits }, IpAddr::V6(ip)) => {
            v6_prefix_matches(*network, *bits, ip)
        }
        _ => false,
    }
}

/// Immutable set of vetted upstream addresses.
#[derive(Debug, Clone, Default)]
pub struct HostWhitelist {
    rules: Vec<HostRule>,
}

impl HostWhitelist {
    pub fn from_rules(raw: &[String]) -> Result<Self, RuleParseError> {
        let mut rules = Vec::with_capacity(raw.len());
        for entry in raw {
            rules.push(HostRule::parse(entry)?);
        }
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether a literal upstream URL may be dialed. Fails closed: URLs
    /// without an IP-literal host never match, and an empty whitelist
    /// rejects everything.
    pub fn is_host_allowed(&self, url: &Url) -> bool {
        let ip = match url.host() {
            Some(url::Host::Ipv4(ip)) => IpAddr::V4(ip),
            Some(url::Host::Ipv6(ip)) => IpAddr::V6(ip),
            _ => return false,
        };
        self.rules.iter().any(|rule| rule_matches(rule, ip))
    }
}
