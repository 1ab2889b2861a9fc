//! iptables adapter
//!
//! Rules live in a dedicated chain jumped to from `INPUT`. IPv4 rules go
//! through `iptables`, IPv6 rules through `ip6tables`; any-source rules are
//! installed in every family tool available on the node.

use super::FirewallBackend;
use super::runner::CommandRunner;
use crate::core::error::{Error, Result, StderrPattern};
use crate::core::rules::{Family, RuleSpec};
use tracing::{debug, info, warn};

pub const IPTABLES: &str = "iptables";
pub const IP6TABLES: &str = "ip6tables";

/// Upper bound on duplicate `INPUT` jumps removed during purge
const MAX_JUMP_DELETES: usize = 8;

pub struct IptablesAdapter<R> {
    runner: R,
    chain: String,
    ipv6: bool,
}

impl<R: CommandRunner> IptablesAdapter<R> {
    /// `ipv6` records whether `ip6tables` was found at detection time.
    pub fn new(runner: R, chain: impl Into<String>, ipv6: bool) -> Self {
        Self {
            runner,
            chain: chain.into(),
            ipv6,
        }
    }

    /// Every family tool this node has
    fn tools(&self) -> Vec<&'static str> {
        if self.ipv6 {
            vec![IPTABLES, IP6TABLES]
        } else {
            vec![IPTABLES]
        }
    }

    fn tools_for(&self, spec: &RuleSpec) -> Result<Vec<&'static str>> {
        match spec.family() {
            Family::V4 => Ok(vec![IPTABLES]),
            Family::V6 if self.ipv6 => Ok(vec![IP6TABLES]),
            Family::V6 => Err(Error::RuleMutation {
                command: format!("{IP6TABLES} (rule {spec})"),
                exit_code: None,
                stderr: "ip6tables not found, cannot enforce IPv6 source".to_string(),
            }),
            Family::Any => Ok(self.tools()),
        }
    }

    /// Match and target arguments shared by -C, -A and -D
    pub fn rule_args(&self, spec: &RuleSpec) -> Vec<String> {
        let mut args = Vec::with_capacity(12);
        if let Some(src) = spec.source {
            args.extend(["-s".to_string(), src.to_string()]);
        }
        args.extend(
            ["-p", "tcp", "-m", "tcp", "--dport"]
                .iter()
                .map(|s| (*s).to_string()),
        );
        args.push(spec.port.to_string());
        args.extend(["-m", "comment", "--comment"].iter().map(|s| (*s).to_string()));
        args.push(spec.presence_key());
        args.extend(["-j".to_string(), "REJECT".to_string()]);
        args
    }

    fn with_prefix(op: &str, chain: &str, rest: &[String]) -> Vec<String> {
        let mut args = vec!["-w".to_string(), op.to_string(), chain.to_string()];
        args.extend_from_slice(rest);
        args
    }

    /// Runs a check-style command: exit 0 is `true`, exit 1 or a missing
    /// chain is `false`, anything else is an error.
    async fn probe(&self, tool: &str, args: &[String]) -> Result<bool> {
        let out = self.runner.run(tool, args).await?;
        if out.success() {
            return Ok(true);
        }
        if out.status == Some(1) || StderrPattern::classify(&out.stderr) == StderrPattern::Missing
        {
            return Ok(false);
        }
        out.check(tool, args).map(|_| false)
    }

    async fn run_checked(
        &self,
        tool: &str,
        args: &[String],
        tolerated: StderrPattern,
    ) -> Result<()> {
        let out = self.runner.run(tool, args).await?;
        if out.success() || StderrPattern::classify(&out.stderr) == tolerated {
            return Ok(());
        }
        out.check(tool, args).map(|_| ())
    }

    async fn chain_exists(&self, tool: &str) -> Result<bool> {
        let args = vec![
            "-w".to_string(),
            "-n".to_string(),
            "-L".to_string(),
            self.chain.clone(),
        ];
        self.probe(tool, &args).await
    }

    fn jump_args(&self, op: &str) -> Vec<String> {
        Self::with_prefix(op, "INPUT", &["-j".to_string(), self.chain.clone()])
    }

    async fn exists_in(&self, tool: &str, spec: &RuleSpec) -> Result<bool> {
        let args = Self::with_prefix("-C", &self.chain, &self.rule_args(spec));
        self.probe(tool, &args).await
    }
}

impl<R: CommandRunner> FirewallBackend for IptablesAdapter<R> {
    fn name(&self) -> &'static str {
        "iptables"
    }

    async fn ensure_container(&self) -> Result<()> {
        for tool in self.tools() {
            if !self.chain_exists(tool).await? {
                let args = vec!["-w".to_string(), "-N".to_string(), self.chain.clone()];
                self.run_checked(tool, &args, StderrPattern::AlreadyExists).await?;
                info!("Created {tool} chain {}", self.chain);
            }

            if !self.probe(tool, &self.jump_args("-C")).await? {
                let mut args = self.jump_args("-I");
                args.insert(3, "1".to_string());
                self.run_checked(tool, &args, StderrPattern::AlreadyExists).await?;
                debug!("Hooked {} into {tool} INPUT", self.chain);
            }
        }
        Ok(())
    }

    async fn rule_exists(&self, spec: &RuleSpec) -> Result<bool> {
        for tool in self.tools_for(spec)? {
            if !self.exists_in(tool, spec).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn apply_rule(&self, spec: &RuleSpec) -> Result<()> {
        for tool in self.tools_for(spec)? {
            if self.exists_in(tool, spec).await? {
                debug!("Rule already present in {tool}: {spec}");
                continue;
            }

            let args = Self::with_prefix("-A", &self.chain, &self.rule_args(spec));
            self.runner.run(tool, &args).await?.check(tool, &args)?;
            info!("Added {tool} rule: {spec}");
        }
        Ok(())
    }

    async fn purge_all(&self) -> Result<()> {
        for tool in self.tools() {
            if !self.chain_exists(tool).await? {
                debug!("Nothing to purge in {tool}: chain {} absent", self.chain);
                continue;
            }

            let mut removed = 0;
            while self.probe(tool, &self.jump_args("-C")).await? {
                if removed == MAX_JUMP_DELETES {
                    warn!("Giving up removing INPUT jumps to {} after {removed}", self.chain);
                    break;
                }
                self.run_checked(tool, &self.jump_args("-D"), StderrPattern::Missing)
                    .await?;
                removed += 1;
            }

            let flush = vec!["-w".to_string(), "-F".to_string(), self.chain.clone()];
            self.run_checked(tool, &flush, StderrPattern::Missing).await?;
            let delete = vec!["-w".to_string(), "-X".to_string(), self.chain.clone()];
            self.run_checked(tool, &delete, StderrPattern::Missing).await?;
            info!("Removed {tool} chain {}", self.chain);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::runner::CommandOutput;
    use crate::core::test_helpers::{ScriptedRunner, exit, ok};

    fn spec(src: &str, port: u16) -> RuleSpec {
        RuleSpec::new(Some(src.parse().unwrap()), port)
    }

    #[test]
    fn test_rule_args() {
        let adapter = IptablesAdapter::new(ScriptedRunner::new(), "ROLEGUARD", true);
        assert_eq!(
            adapter.rule_args(&spec("10.0.0.0/24", 80)).join(" "),
            "-s 10.0.0.0/24 -p tcp -m tcp --dport 80 \
             -m comment --comment roleguard:10.0.0.0/24:80 -j REJECT"
        );
        assert!(
            !adapter
                .rule_args(&RuleSpec::new(None, 22))
                .contains(&"-s".to_string())
        );
    }

    #[tokio::test]
    async fn test_rule_exists_uses_check() {
        let runner = ScriptedRunner::new();
        runner.push(exit(1));
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", true);

        assert!(!adapter.rule_exists(&spec("10.0.0.1", 80)).await.unwrap());
        assert!(
            adapter.runner.calls()[0]
                .starts_with("iptables -w -C ROLEGUARD -s 10.0.0.1/32 -p tcp")
        );
    }

    #[tokio::test]
    async fn test_rule_exists_error_propagates() {
        let runner = ScriptedRunner::new();
        runner.push(CommandOutput {
            status: Some(4),
            stdout: String::new(),
            stderr: "Another app is currently holding the xtables lock".into(),
        });
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", true);
        assert!(adapter.rule_exists(&spec("10.0.0.1", 80)).await.is_err());
    }

    #[tokio::test]
    async fn test_ipv6_rule_goes_to_ip6tables() {
        let runner = ScriptedRunner::new();
        runner.push(exit(1));
        runner.push(ok());
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", true);

        adapter.apply_rule(&spec("2001:db8::1", 443)).await.unwrap();
        let calls = adapter.runner.calls();
        assert!(calls[0].starts_with("ip6tables -w -C ROLEGUARD"));
        assert!(calls[1].starts_with("ip6tables -w -A ROLEGUARD -s 2001:db8::1/128"));
    }

    #[tokio::test]
    async fn test_ipv6_rule_without_ip6tables_fails() {
        let adapter = IptablesAdapter::new(ScriptedRunner::new(), "ROLEGUARD", false);
        assert!(adapter.apply_rule(&spec("2001:db8::1", 443)).await.is_err());
        assert!(adapter.runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_any_source_rule_goes_to_both_families() {
        let runner = ScriptedRunner::new();
        runner.push(exit(1));
        runner.push(ok());
        runner.push(exit(1));
        runner.push(ok());
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", true);

        adapter.apply_rule(&RuleSpec::new(None, 22)).await.unwrap();
        let calls = adapter.runner.calls();
        assert!(calls[1].starts_with("iptables -w -A ROLEGUARD -p tcp"));
        assert!(calls[3].starts_with("ip6tables -w -A ROLEGUARD -p tcp"));
    }

    #[tokio::test]
    async fn test_apply_rule_is_idempotent() {
        let runner = ScriptedRunner::new();
        runner.push(ok());
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", false);

        adapter.apply_rule(&spec("10.0.0.1", 80)).await.unwrap();
        assert_eq!(adapter.runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_ensure_container_creates_chain_and_jump() {
        let runner = ScriptedRunner::new();
        runner.push(exit(1)); // -L: chain missing
        runner.push(ok()); // -N
        runner.push(exit(1)); // -C INPUT: jump missing
        runner.push(ok()); // -I
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", false);

        adapter.ensure_container().await.unwrap();
        let calls = adapter.runner.calls();
        assert_eq!(
            calls,
            vec![
                "iptables -w -n -L ROLEGUARD",
                "iptables -w -N ROLEGUARD",
                "iptables -w -C INPUT -j ROLEGUARD",
                "iptables -w -I INPUT 1 -j ROLEGUARD",
            ]
        );
    }

    #[tokio::test]
    async fn test_ensure_container_existing_is_noop() {
        let runner = ScriptedRunner::new();
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", false);
        adapter.ensure_container().await.unwrap();
        assert_eq!(adapter.runner.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_purge_all_without_chain() {
        let runner = ScriptedRunner::new();
        runner.push(exit(1));
        runner.push(exit(1));
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", true);

        adapter.purge_all().await.unwrap();
        assert_eq!(
            adapter.runner.calls(),
            vec!["iptables -w -n -L ROLEGUARD", "ip6tables -w -n -L ROLEGUARD"]
        );
    }

    #[tokio::test]
    async fn test_purge_all_removes_jump_flushes_and_deletes() {
        let runner = ScriptedRunner::new();
        runner.push(ok()); // -L
        runner.push(ok()); // -C INPUT
        runner.push(ok()); // -D INPUT
        runner.push(exit(1)); // -C INPUT
        runner.push(ok()); // -F
        runner.push(ok()); // -X
        let adapter = IptablesAdapter::new(runner, "ROLEGUARD", false);

        adapter.purge_all().await.unwrap();
        let calls = adapter.runner.calls();
        assert_eq!(calls[2], "iptables -w -D INPUT -j ROLEGUARD");
        assert_eq!(calls[4], "iptables -w -F ROLEGUARD");
        assert_eq!(calls[5], "iptables -w -X ROLEGUARD");
    }

    #[tokio::test]
    async fn test_purge_all_bounds_jump_removal() {
        // Default response is success, so the jump never appears to go away
        let adapter = IptablesAdapter::new(ScriptedRunner::new(), "ROLEGUARD", false);
        adapter.purge_all().await.unwrap();
        let deletes = adapter
            .runner
            .calls()
            .iter()
            .filter(|c| c.contains("-D INPUT"))
            .count();
        assert_eq!(deletes, MAX_JUMP_DELETES);
    }
}
