//! nftables adapter
//!
//! All rules live in a dedicated `inet` table named after the configured
//! chain, with a single `input` base chain hooked at filter priority. Deleting
//! the table removes everything this agent created and nothing else.

use super::FirewallBackend;
use super::runner::CommandRunner;
use crate::core::error::{Result, StderrPattern};
use crate::core::rules::{Family, RuleSpec};
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, info};

pub const NFT: &str = "nft";
const FAMILY: &str = "inet";
const BASE_CHAIN: &str = "input";

pub struct NftablesAdapter<R> {
    runner: R,
    table: String,
}

fn owned(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| (*s).to_string()).collect()
}

impl<R: CommandRunner> NftablesAdapter<R> {
    pub fn new(runner: R, table: impl Into<String>) -> Self {
        Self {
            runner,
            table: table.into(),
        }
    }

    /// Arguments for `nft add rule` rejecting `spec`
    pub fn rule_args(&self, spec: &RuleSpec) -> Vec<String> {
        let mut args = owned(&["add", "rule", FAMILY, self.table.as_str(), BASE_CHAIN]);

        if let Some(src) = spec.source {
            let proto = match spec.family() {
                Family::V6 => "ip6",
                Family::V4 | Family::Any => "ip",
            };
            args.extend([proto.to_string(), "saddr".to_string(), src.to_string()]);
        }

        args.extend(owned(&["tcp", "dport"]));
        args.push(spec.port.to_string());
        args.extend(owned(&["counter", "reject", "comment"]));
        args.push(format!("\"{}\"", spec.presence_key()));
        args
    }

    /// Comments of every rule currently in our chain.
    ///
    /// A missing table or chain yields an empty set.
    async fn present_keys(&self) -> Result<HashSet<String>> {
        let args = owned(&["--json", "list", "chain", FAMILY, self.table.as_str(), BASE_CHAIN]);
        let out = self.runner.run(NFT, &args).await?;

        if !out.success() && StderrPattern::classify(&out.stderr) == StderrPattern::Missing {
            debug!("Table {} not present", self.table);
            return Ok(HashSet::new());
        }

        let out = out.check(NFT, &args)?;
        Ok(parse_rule_comments(&out.stdout)?)
    }

    async fn run_tolerating(&self, args: &[&str], tolerated: StderrPattern) -> Result<bool> {
        let args = owned(args);
        let out = self.runner.run(NFT, &args).await?;
        if out.success() {
            return Ok(true);
        }
        if StderrPattern::classify(&out.stderr) == tolerated {
            return Ok(false);
        }
        out.check(NFT, &args).map(|_| true)
    }
}

/// Extracts rule comments from `nft --json list ...` output.
fn parse_rule_comments(stdout: &str) -> serde_json::Result<HashSet<String>> {
    let listing: Value = serde_json::from_str(stdout)?;

    Ok(listing
        .get("nftables")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("rule"))
                .filter_map(|rule| rule.get("comment").and_then(Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default())
}

impl<R: CommandRunner> FirewallBackend for NftablesAdapter<R> {
    fn name(&self) -> &'static str {
        "nftables"
    }

    async fn ensure_container(&self) -> Result<()> {
        // `add` is a no-op for existing objects with the same definition
        let table = self.table.as_str();
        self.run_tolerating(&["add", "table", FAMILY, table], StderrPattern::AlreadyExists)
            .await?;
        self.run_tolerating(
            &[
                "add", "chain", FAMILY, table, BASE_CHAIN, "{", "type", "filter", "hook", "input",
                "priority", "0", ";", "policy", "accept", ";", "}",
            ],
            StderrPattern::AlreadyExists,
        )
        .await?;
        Ok(())
    }

    async fn rule_exists(&self, spec: &RuleSpec) -> Result<bool> {
        Ok(self.present_keys().await?.contains(&spec.presence_key()))
    }

    async fn apply_rule(&self, spec: &RuleSpec) -> Result<()> {
        if self.rule_exists(spec).await? {
            debug!("Rule already present: {spec}");
            return Ok(());
        }

        let args = self.rule_args(spec);
        self.runner.run(NFT, &args).await?.check(NFT, &args)?;
        info!("Added nftables rule: {spec}");
        Ok(())
    }

    async fn purge_all(&self) -> Result<()> {
        let exists = self
            .run_tolerating(&["list", "table", FAMILY, self.table.as_str()], StderrPattern::Missing)
            .await?;
        if !exists {
            debug!("Nothing to purge: table {} absent", self.table);
            return Ok(());
        }

        if self
            .run_tolerating(
                &["delete", "table", FAMILY, self.table.as_str()],
                StderrPattern::Missing,
            )
            .await?
        {
            info!("Deleted nftables table {} {}", FAMILY, self.table);
        }
        Ok(())
    }
}
