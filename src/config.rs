//! Instance configuration
//!
//! The cluster manager passes resource parameters as `OCF_RESKEY_*`
//! environment variables and per-call metadata as `OCF_RESKEY_CRM_meta_*`.
//! [`Params`] binds each of them (plus a long flag for running by hand), and
//! [`AgentConfig::load`] turns the raw strings into typed settings.
//!
//! Every value is taken as a string so that malformed input surfaces as a
//! configuration error (exit code 6) instead of a usage error.

use crate::core::agent::{Notification, Request};
use crate::core::error::{Error, Result};
use crate::core::role::{Outcome, Role};
use crate::core::rules::{self, RuleSet};
use crate::utils::{RUNTIME_FALLBACK_DIR, get_state_dir};
use crate::validators;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const DEFAULT_CHAIN: &str = "ROLEGUARD";
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_NOTIFY_DELAY_SECS: u64 = 0;

/// Instance name used when `OCF_RESOURCE_INSTANCE` is unset
const DEFAULT_INSTANCE: &str = "default";

#[derive(Debug, Clone, Default, clap::Args)]
pub struct Params {
    /// Comma-separated TCP ports to block
    #[arg(long, env = "OCF_RESKEY_ports")]
    pub ports: Option<String>,

    /// Comma-separated source addresses or CIDR networks (default: any source)
    #[arg(long, env = "OCF_RESKEY_source_ips")]
    pub source_ips: Option<String>,

    /// Path of the persisted role file
    #[arg(long, env = "OCF_RESKEY_state")]
    pub state: Option<PathBuf>,

    /// Seconds to wait on post-promote and post-demote notifications
    #[arg(long, env = "OCF_RESKEY_notify_delay")]
    pub notify_delay: Option<String>,

    /// Role in which the rules are enforced
    #[arg(long, env = "OCF_RESKEY_blocking_role")]
    pub blocking_role: Option<String>,

    /// nftables table or iptables chain holding the rules
    #[arg(long, env = "OCF_RESKEY_chain")]
    pub chain: Option<String>,

    /// Seconds before a firewall command is abandoned
    #[arg(long, env = "OCF_RESKEY_command_timeout")]
    pub command_timeout: Option<String>,

    #[arg(long, env = "OCF_RESKEY_CRM_meta_role", hide = true)]
    pub requested_role: Option<String>,

    #[arg(long, env = "OCF_RESKEY_CRM_meta_globally_unique", hide = true)]
    pub globally_unique: Option<String>,

    #[arg(long, env = "OCF_RESKEY_CRM_meta_notify_type", hide = true)]
    pub notify_type: Option<String>,

    #[arg(long, env = "OCF_RESKEY_CRM_meta_notify_operation", hide = true)]
    pub notify_operation: Option<String>,

    #[arg(long, env = "OCF_RESOURCE_INSTANCE", hide = true)]
    pub instance: Option<String>,

    #[arg(long, env = "HA_RSCTMP", hide = true)]
    pub rsctmp: Option<PathBuf>,
}

/// Validated settings for one invocation
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub instance: String,
    pub state_path: PathBuf,
    pub notify_delay: Duration,
    pub blocking_role: Role,
    pub chain: String,
    pub command_timeout: Duration,
    pub requested_role: Option<Role>,
    pub notification: Notification,
    ports: Option<String>,
    source_ips: Option<String>,
}

impl AgentConfig {
    /// Validates everything except the rule parameters, which only some
    /// actions need (see [`AgentConfig::rule_set`]).
    pub fn load(params: &Params) -> Result<Self> {
        let instance = non_empty(params.instance.as_deref())
            .unwrap_or(DEFAULT_INSTANCE)
            .to_string();

        let state_path = match params.state.as_ref().filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => path.clone(),
            None => default_state_path(
                &instance,
                is_true(params.globally_unique.as_deref()),
                params.rsctmp.as_ref(),
            ),
        };

        validate_state_path(&state_path)?;

        let chain = match non_empty(params.chain.as_deref()) {
            Some(name) => {
                validators::validate_chain_name(name).map_err(|e| Error::configuration("chain", e))?
            }
            None => DEFAULT_CHAIN.to_string(),
        };

        let blocking_role = match non_empty(params.blocking_role.as_deref()) {
            Some(raw) => Role::from_str(raw).map_err(|_| {
                Error::configuration(
                    "blocking_role",
                    format!("'{raw}' is not a role (expected Promoted or Unpromoted)"),
                )
            })?,
            None => Role::default(),
        };

        let notify_delay = parse_secs(
            "notify_delay",
            params.notify_delay.as_deref(),
            DEFAULT_NOTIFY_DELAY_SECS,
        )?;

        let command_timeout = parse_secs(
            "command_timeout",
            params.command_timeout.as_deref(),
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;
        if command_timeout.is_zero() {
            return Err(Error::configuration("command_timeout", "must be at least 1 second"));
        }

        let requested_role = non_empty(params.requested_role.as_deref()).and_then(|raw| {
            Role::from_str(raw)
                .inspect_err(|_| warn!("Ignoring unknown requested role '{raw}'"))
                .ok()
        });

        Ok(Self {
            instance,
            state_path,
            notify_delay,
            blocking_role,
            chain,
            command_timeout,
            requested_role,
            notification: Notification {
                kind: non_empty(params.notify_type.as_deref()).map(str::to_string),
                operation: non_empty(params.notify_operation.as_deref()).map(str::to_string),
            },
            ports: non_empty(params.ports.as_deref()).map(str::to_string),
            source_ips: non_empty(params.source_ips.as_deref()).map(str::to_string),
        })
    }

    /// Parses `ports` and `source_ips` into the rule set.
    pub fn rule_set(&self) -> Result<RuleSet> {
        let ports = self
            .ports
            .as_deref()
            .ok_or_else(|| Error::configuration("ports", "is required"))?;
        let specs = rules::parse(ports, self.source_ips.as_deref())?;
        Ok(RuleSet::new(specs, self.blocking_role))
    }

    pub fn request(&self) -> Request {
        Request {
            requested_role: self.requested_role,
            notification: self.notification.clone(),
        }
    }
}

/// Result reported when the command line itself cannot be parsed.
///
/// `--help` and `--version` succeed; anything else is a generic error, since
/// clap's own exit code means something different to the cluster manager.
pub fn usage_outcome(err: &clap::Error) -> Outcome {
    if err.use_stderr() {
        Outcome::GenericError
    } else {
        Outcome::Success
    }
}

/// `<dir>/roleguard-<instance>.state`, where `<dir>` is `HA_RSCTMP` when set.
///
/// Anonymous clone instances share one file per node, so the `:N` suffix is
/// dropped unless the clone is globally unique.
pub fn default_state_path(
    instance: &str,
    globally_unique: bool,
    rsctmp: Option<&PathBuf>,
) -> PathBuf {
    let name = if globally_unique {
        instance
    } else {
        instance.split_once(':').map_or(instance, |(base, _)| base)
    };

    let dir = rsctmp
        .filter(|p| !p.as_os_str().is_empty())
        .cloned()
        .or_else(get_state_dir)
        .unwrap_or_else(|| PathBuf::from(RUNTIME_FALLBACK_DIR));

    dir.join(format!("roleguard-{name}.state"))
}

/// The state file is written by rename inside its own directory, so it needs
/// an absolute path with a file name.
fn validate_state_path(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(Error::configuration(
            "state",
            format!("{} is not an absolute path", path.display()),
        ));
    }
    if path.file_name().is_none() || path.parent().is_none() {
        return Err(Error::configuration(
            "state",
            format!("{} does not name a file", path.display()),
        ));
    }
    Ok(())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// OCF boolean: `true`, `yes`, `on` or `1`
fn is_true(value: Option<&str>) -> bool {
    non_empty(value).is_some_and(|v| {
        ["true", "yes", "on", "1"]
            .iter()
            .any(|t| v.eq_ignore_ascii_case(t))
    })
}

fn parse_secs(field: &str, value: Option<&str>, default: u64) -> Result<Duration> {
    match non_empty(value) {
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| {
                Error::configuration(field, format!("'{raw}' is not a whole number of seconds"))
            }),
        None => Ok(Duration::from_secs(default)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        params: Params,
    }

    fn params(ports: &str) -> Params {
        Params {
            ports: Some(ports.to_string()),
            rsctmp: Some(PathBuf::from("/run/resource-agents")),
            ..Params::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load(&params("5432")).unwrap();
        assert_eq!(config.chain, DEFAULT_CHAIN);
        assert_eq!(config.blocking_role, Role::Unpromoted);
        assert_eq!(config.notify_delay, Duration::ZERO);
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.requested_role, None);
        assert_eq!(
            config.state_path,
            PathBuf::from("/run/resource-agents/roleguard-default.state")
        );
    }

    #[test]
    fn test_state_path_strips_clone_suffix() {
        let rsctmp = PathBuf::from("/var/run/rsc");
        assert_eq!(
            default_state_path("pg-guard:1", false, Some(&rsctmp)),
            PathBuf::from("/var/run/rsc/roleguard-pg-guard.state")
        );
        assert_eq!(
            default_state_path("pg-guard:1", true, Some(&rsctmp)),
            PathBuf::from("/var/run/rsc/roleguard-pg-guard:1.state")
        );
    }

    #[test]
    fn test_globally_unique_flag() {
        let mut p = params("5432");
        p.instance = Some("guard:2".into());
        p.globally_unique = Some("false".into());
        assert!(
            AgentConfig::load(&p)
                .unwrap()
                .state_path
                .ends_with("roleguard-guard.state")
        );

        p.globally_unique = Some("TRUE".into());
        assert!(
            AgentConfig::load(&p)
                .unwrap()
                .state_path
                .ends_with("roleguard-guard:2.state")
        );
    }

    #[test]
    fn test_explicit_state_wins() {
        let mut p = params("5432");
        p.state = Some(PathBuf::from("/tmp/x.state"));
        assert_eq!(
            AgentConfig::load(&p).unwrap().state_path,
            PathBuf::from("/tmp/x.state")
        );
    }

    #[test]
    fn test_state_path_must_be_absolute_file() {
        for bad in ["bare.state", "state/roleguard.state", "/"] {
            let mut p = params("5432");
            p.state = Some(PathBuf::from(bad));
            match AgentConfig::load(&p) {
                Err(Error::Configuration { field, .. }) => assert_eq!(field, "state", "{bad}"),
                other => panic!("{bad}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_relative_rsctmp_is_rejected() {
        let mut p = params("5432");
        p.rsctmp = Some(PathBuf::from("rsc"));
        let err = AgentConfig::load(&p).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("rsc/roleguard-default.state"), "{err}");
    }

    #[test]
    fn test_usage_errors_map_to_outcomes() {
        let unknown = TestCli::try_parse_from(["roleguard", "--bogus"]).err().unwrap();
        assert_eq!(usage_outcome(&unknown), Outcome::GenericError);
        assert_ne!(usage_outcome(&unknown).exit_code(), 2);

        let help = TestCli::try_parse_from(["roleguard", "--help"]).err().unwrap();
        assert_eq!(usage_outcome(&help), Outcome::Success);
    }

    #[test]
    fn test_rule_set_requires_ports() {
        let config = AgentConfig::load(&Params::default()).unwrap();
        match config.rule_set() {
            Err(Error::Configuration { field, .. }) => assert_eq!(field, "ports"),
            other => panic!("unexpected: {other:?}"),
        }

        let mut p = params("  ");
        p.source_ips = Some("10.0.0.1".into());
        assert!(AgentConfig::load(&p).unwrap().rule_set().is_err());
    }

    #[test]
    fn test_rule_set_uses_blocking_role() {
        let mut p = params("80,443");
        p.source_ips = Some("10.0.0.1,10.0.0.2".into());
        p.blocking_role = Some("Master".into());
        let set = AgentConfig::load(&p).unwrap().rule_set().unwrap();
        assert_eq!(set.all().len(), 4);
        assert_eq!(set.target(Role::Promoted).len(), 4);
        assert!(set.target(Role::Unpromoted).is_empty());
    }

    #[test]
    fn test_malformed_values_are_configuration_errors() {
        let cases: [(&str, fn(&mut Params)); 4] = [
            ("chain", |p| p.chain = Some("INPUT".into())),
            ("blocking_role", |p| p.blocking_role = Some("Started".into())),
            ("notify_delay", |p| p.notify_delay = Some("-3".into())),
            ("command_timeout", |p| p.command_timeout = Some("0".into())),
        ];

        for (expected, mutate) in cases {
            let mut p = params("5432");
            mutate(&mut p);
            match AgentConfig::load(&p) {
                Err(Error::Configuration { field, .. }) => assert_eq!(field, expected),
                other => panic!("{expected}: unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn test_requested_role_and_notification() {
        let mut p = params("5432");
        p.requested_role = Some("Promoted".into());
        p.notify_type = Some("post".into());
        p.notify_operation = Some("demote".into());
        let request = AgentConfig::load(&p).unwrap().request();
        assert_eq!(request.requested_role, Some(Role::Promoted));
        assert_eq!(request.notification.kind.as_deref(), Some("post"));
        assert_eq!(request.notification.operation.as_deref(), Some("demote"));

        p.requested_role = Some("Started".into());
        assert_eq!(AgentConfig::load(&p).unwrap().requested_role, None);
    }

    #[test]
    fn test_flags_bind_to_params() {
        let cli = TestCli::try_parse_from([
            "roleguard",
            "--ports",
            "5432",
            "--source-ips",
            "10.0.0.0/24",
            "--notify-delay",
            "3",
            "--chain",
            "PG_GUARD",
        ])
        .unwrap();
        let config = AgentConfig::load(&cli.params).unwrap();
        assert_eq!(config.notify_delay, Duration::from_secs(3));
        assert_eq!(config.chain, "PG_GUARD");
        assert_eq!(config.rule_set().unwrap().all().len(), 1);
    }
}
