//! Packet-filter backends
//!
//! [`FirewallBackend`] is the capability set the state machine needs. Two
//! adapters implement it, and [`detect`] picks one per invocation by probing
//! the execution path. `nft` wins when both tools are installed so every node
//! in a cluster lands on the same backend without extra configuration.
//!
//! Idempotence lives here: `apply_rule` checks `rule_exists` before mutating,
//! and `purge_all` treats "nothing to remove" as success. That lets the state
//! machine re-apply a whole rule set instead of computing a diff.

pub mod iptables;
pub mod nftables;
pub mod runner;

use crate::core::error::{Error, Result};
use crate::core::rules::RuleSpec;
use iptables::{IP6TABLES, IPTABLES, IptablesAdapter};
use nftables::{NFT, NftablesAdapter};
use runner::CommandRunner;
use tracing::info;

#[allow(async_fn_in_trait)]
pub trait FirewallBackend {
    /// Short name for logs and audit records
    fn name(&self) -> &'static str;

    /// Creates the grouping construct if absent.
    async fn ensure_container(&self) -> Result<()>;

    /// Whether an equivalent rule is installed. Never mutates.
    async fn rule_exists(&self, spec: &RuleSpec) -> Result<bool>;

    /// Installs a rule rejecting `spec`, or does nothing if it is present.
    async fn apply_rule(&self, spec: &RuleSpec) -> Result<()>;

    /// Removes every rule and the grouping construct.
    async fn purge_all(&self) -> Result<()>;
}

/// The closed set of supported backends
pub enum Backend<R> {
    Nftables(NftablesAdapter<R>),
    Iptables(IptablesAdapter<R>),
}

/// Picks the backend for this node.
///
/// `chain` names the nft table or iptables chain that scopes our rules.
pub fn detect<R: CommandRunner>(runner: R, chain: &str) -> Result<Backend<R>> {
    if runner.has_program(NFT) {
        info!("Using nftables backend");
        return Ok(Backend::Nftables(NftablesAdapter::new(runner, chain)));
    }

    if runner.has_program(IPTABLES) {
        let ipv6 = runner.has_program(IP6TABLES);
        info!("Using iptables backend (ip6tables available: {ipv6})");
        return Ok(Backend::Iptables(IptablesAdapter::new(runner, chain, ipv6)));
    }

    Err(Error::BackendUnavailable)
}

impl<R: CommandRunner> FirewallBackend for Backend<R> {
    fn name(&self) -> &'static str {
        match self {
            Backend::Nftables(b) => b.name(),
            Backend::Iptables(b) => b.name(),
        }
    }

    async fn ensure_container(&self) -> Result<()> {
        match self {
            Backend::Nftables(b) => b.ensure_container().await,
            Backend::Iptables(b) => b.ensure_container().await,
        }
    }

    async fn rule_exists(&self, spec: &RuleSpec) -> Result<bool> {
        match self {
            Backend::Nftables(b) => b.rule_exists(spec).await,
            Backend::Iptables(b) => b.rule_exists(spec).await,
        }
    }

    async fn apply_rule(&self, spec: &RuleSpec) -> Result<()> {
        match self {
            Backend::Nftables(b) => b.apply_rule(spec).await,
            Backend::Iptables(b) => b.apply_rule(spec).await,
        }
    }

    async fn purge_all(&self) -> Result<()> {
        match self {
            Backend::Nftables(b) => b.purge_all().await,
            Backend::Iptables(b) => b.purge_all().await,
        }
    }
}
