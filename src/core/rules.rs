//! Rule set model
//!
//! A [`RuleSpec`] is one `(source, port)` pair to reject over TCP. The full
//! rule set is the cross product of the configured sources and ports, and each
//! role maps to either all of it or none of it.
//!
//! Rules are recomputed from configuration on every pass; nothing here keeps a
//! snapshot of what was applied before.

use crate::core::error::{Error, Result};
use crate::core::role::Role;
use crate::validators;
use ipnetwork::IpNetwork;
use std::fmt;

/// Prefix of every rule comment this agent writes
pub const RULE_TAG: &str = "roleguard";

/// Address family a rule needs to be installed in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V4,
    V6,
    /// Any-source rules match both families
    Any,
}

/// A single rejecting rule: TCP traffic from `source` to `port`.
///
/// `source == None` means any source address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleSpec {
    pub source: Option<IpNetwork>,
    pub port: u16,
}

impl RuleSpec {
    pub const fn new(source: Option<IpNetwork>, port: u16) -> Self {
        Self { source, port }
    }

    /// Canonical identity of this rule in either backend.
    ///
    /// Written as the rule comment and matched on lookups, so two backends
    /// holding the same keys enforce the same `(source, port)` pairs.
    pub fn presence_key(&self) -> String {
        match self.source {
            Some(src) => format!("{RULE_TAG}:{src}:{}", self.port),
            None => format!("{RULE_TAG}:any:{}", self.port),
        }
    }

    pub fn family(&self) -> Family {
        match self.source {
            Some(IpNetwork::V4(_)) => Family::V4,
            Some(IpNetwork::V6(_)) => Family::V6,
            None => Family::Any,
        }
    }
}

impl fmt::Display for RuleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.source {
            Some(src) => write!(f, "{src} -> tcp/{}", self.port),
            None => write!(f, "any -> tcp/{}", self.port),
        }
    }
}

/// Parses the `ports` parameter into an ordered list.
pub fn parse_ports(ports_csv: &str) -> Result<Vec<u16>> {
    validators::split_list(ports_csv)
        .map_err(|e| Error::configuration("ports", e))?
        .into_iter()
        .map(|entry| validators::parse_port(entry).map_err(|e| Error::configuration("ports", e)))
        .collect()
}

/// Parses the `source_ips` parameter into an ordered list.
pub fn parse_sources(sources_csv: &str) -> Result<Vec<IpNetwork>> {
    validators::split_list(sources_csv)
        .map_err(|e| Error::configuration("source_ips", e))?
        .into_iter()
        .map(|entry| {
            validators::parse_source(entry).map_err(|e| Error::configuration("source_ips", e))
        })
        .collect()
}

/// Builds the cross product of sources and ports.
///
/// Enumeration is source-major in insertion order. Without sources every port
/// gets one any-source rule.
pub fn cross_product(sources: &[IpNetwork], ports: &[u16]) -> Vec<RuleSpec> {
    if sources.is_empty() {
        return ports.iter().map(|&port| RuleSpec::new(None, port)).collect();
    }

    sources
        .iter()
        .flat_map(|&src| ports.iter().map(move |&port| RuleSpec::new(Some(src), port)))
        .collect()
}

/// Parses both parameters and returns the full rule list.
pub fn parse(ports_csv: &str, sources_csv: Option<&str>) -> Result<Vec<RuleSpec>> {
    let ports = parse_ports(ports_csv)?;
    let sources = match sources_csv {
        Some(csv) => parse_sources(csv)?,
        None => Vec::new(),
    };
    Ok(cross_product(&sources, &ports))
}

/// The full rule list plus the role it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSet {
    rules: Vec<RuleSpec>,
    blocking_role: Role,
}

impl RuleSet {
    pub fn new(rules: Vec<RuleSpec>, blocking_role: Role) -> Self {
        Self {
            rules,
            blocking_role,
        }
    }

    /// Every rule, regardless of role
    pub fn all(&self) -> &[RuleSpec] {
        &self.rules
    }

    pub fn blocking_role(&self) -> Role {
        self.blocking_role
    }

    /// Rules that must be present while holding `role`: all or nothing.
    pub fn target(&self, role: Role) -> &[RuleSpec] {
        if role == self.blocking_role {
            &self.rules
        } else {
            &[]
        }
    }
}
