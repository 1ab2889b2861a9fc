//! OCF `meta-data` manifest
//!
//! Printed on `meta-data` so the cluster manager knows the parameters,
//! defaults and supported actions. Produced without touching the environment
//! or the firewall.

use crate::config::{DEFAULT_CHAIN, DEFAULT_COMMAND_TIMEOUT_SECS, DEFAULT_NOTIFY_DELAY_SECS};
use std::fmt::Write;

struct Parameter {
    name: &'static str,
    required: bool,
    short: &'static str,
    long: &'static str,
    content: &'static str,
    default: Option<String>,
}

/// `(name, timeout, extra attributes)`
const ACTIONS: &[(&str, u32, &str)] = &[
    ("start", 60, ""),
    ("stop", 60, ""),
    ("promote", 60, ""),
    ("demote", 60, ""),
    ("notify", 60, ""),
    ("monitor", 30, r#" depth="0" interval="10s" role="Promoted""#),
    ("monitor", 30, r#" depth="0" interval="11s" role="Unpromoted""#),
    ("validate-all", 30, ""),
    ("meta-data", 5, ""),
];

fn parameters() -> Vec<Parameter> {
    vec![
        Parameter {
            name: "ports",
            required: true,
            short: "TCP ports to block",
            long: "Comma-separated list of TCP destination ports rejected while the \
                   instance holds the blocking role.",
            content: "string",
            default: None,
        },
        Parameter {
            name: "source_ips",
            required: false,
            short: "Source addresses",
            long: "Comma-separated IPv4/IPv6 addresses or CIDR networks whose traffic \
                   is rejected. Empty means any source.",
            content: "string",
            default: None,
        },
        Parameter {
            name: "state",
            required: false,
            short: "State file",
            long: "File holding the last role this node reached.",
            content: "string",
            default: Some("${HA_RSCTMP}/roleguard-${OCF_RESOURCE_INSTANCE}.state".to_string()),
        },
        Parameter {
            name: "notify_delay",
            required: false,
            short: "Notification delay",
            long: "Seconds to wait when notified after a promote or demote.",
            content: "integer",
            default: Some(DEFAULT_NOTIFY_DELAY_SECS.to_string()),
        },
        Parameter {
            name: "blocking_role",
            required: false,
            short: "Role that blocks",
            long: "Role in which the rules are enforced (Promoted or Unpromoted). \
                   The other role has no rules.",
            content: "string",
            default: Some("Unpromoted".to_string()),
        },
        Parameter {
            name: "chain",
            required: false,
            short: "Chain or table name",
            long: "Name of the nftables table or iptables chain that holds the rules.",
            content: "string",
            default: Some(DEFAULT_CHAIN.to_string()),
        },
        Parameter {
            name: "command_timeout",
            required: false,
            short: "Firewall command timeout",
            long: "Seconds before a single nft/iptables invocation is abandoned.",
            content: "integer",
            default: Some(DEFAULT_COMMAND_TIMEOUT_SECS.to_string()),
        },
    ]
}

/// Renders the resource-agent XML document.
pub fn render() -> String {
    let mut xml = String::new();
    let _ = writeln!(xml, r#"<?xml version="1.0"?>"#);
    let _ = writeln!(xml, r#"<!DOCTYPE resource-agent SYSTEM "ra-api-1.dtd">"#);
    let _ = writeln!(
        xml,
        r#"<resource-agent name="roleguard" version="{}">"#,
        crate::build::PKG_VERSION
    );
    let _ = writeln!(xml, "<version>1.1</version>");
    let _ = writeln!(
        xml,
        "<longdesc lang=\"en\">\n\
         Rejects TCP traffic to the configured ports while a promotable clone \
         instance holds one role and removes the rules in the other. \
         Uses nftables when available, iptables otherwise.\n\
         Build {} ({}).\n\
         </longdesc>",
        crate::build::SHORT_COMMIT,
        crate::build::BUILD_TIME
    );
    let _ = writeln!(
        xml,
        r#"<shortdesc lang="en">Role-dependent firewall rules</shortdesc>"#
    );

    let _ = writeln!(xml, "<parameters>");
    for p in parameters() {
        let _ = writeln!(
            xml,
            r#"<parameter name="{}" unique="0" required="{}">"#,
            p.name,
            u8::from(p.required)
        );
        let _ = writeln!(xml, r#"<longdesc lang="en">{}</longdesc>"#, p.long);
        let _ = writeln!(xml, r#"<shortdesc lang="en">{}</shortdesc>"#, p.short);
        match &p.default {
            Some(default) => {
                let _ = writeln!(xml, r#"<content type="{}" default="{default}"/>"#, p.content);
            }
            None => {
                let _ = writeln!(xml, r#"<content type="{}"/>"#, p.content);
            }
        }
        let _ = writeln!(xml, "</parameter>");
    }
    let _ = writeln!(xml, "</parameters>");

    let _ = writeln!(xml, "<actions>");
    for (name, timeout, extra) in ACTIONS {
        let _ = writeln!(xml, r#"<action name="{name}" timeout="{timeout}s"{extra}/>"#);
    }
    let _ = writeln!(xml, "</actions>");
    let _ = writeln!(xml, "</resource-agent>");
    xml
}
