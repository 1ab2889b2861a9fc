//! Input validation for resource parameters
//!
//! Every parameter arrives as a string from the cluster manager's environment.
//! These functions turn those strings into typed values and reject anything
//! malformed before a single firewall command runs.

use ipnetwork::IpNetwork;

/// Splits a comma-separated parameter into trimmed entries.
///
/// # Errors
///
/// Returns `Err` if the list is empty or contains an empty entry
/// (e.g. `"80,,443"` or a trailing comma).
pub fn split_list(input: &str) -> Result<Vec<&str>, String> {
    if input.trim().is_empty() {
        return Err("List cannot be empty".to_string());
    }

    input
        .split(',')
        .map(str::trim)
        .enumerate()
        .map(|(idx, entry)| {
            if entry.is_empty() {
                Err(format!("Empty entry at position {}", idx + 1))
            } else {
                Ok(entry)
            }
        })
        .collect()
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` if port is 0 (reserved).
pub fn validate_port(port: u16) -> Result<u16, String> {
    if port == 0 {
        Err("Port must be between 1 and 65535".to_string())
    } else {
        Ok(port)
    }
}

/// Parses and validates a port literal.
///
/// # Errors
///
/// Returns `Err` if the entry is not a decimal integer or falls outside 1-65535.
pub fn parse_port(entry: &str) -> Result<u16, String> {
    if !entry.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("'{entry}' is not a port number"));
    }

    let value: u32 = entry
        .parse()
        .map_err(|_| format!("'{entry}': Port must be between 1 and 65535"))?;

    u16::try_from(value)
        .map_err(|_| format!("'{entry}': Port must be between 1 and 65535"))
        .and_then(validate_port)
}

/// Parses an IPv4/IPv6 address or CIDR block.
///
/// # Errors
///
/// Returns `Err` for anything `ipnetwork` rejects, including out-of-range
/// octets such as `999.1.1.1` and prefixes longer than the address family.
pub fn parse_source(entry: &str) -> Result<IpNetwork, String> {
    entry
        .parse::<IpNetwork>()
        .map_err(|e| format!("'{entry}' is not a valid IP address or CIDR block: {e}"))
}

/// Validates the name of the grouping construct (nft table / iptables chain).
///
/// iptables limits chain names to 28 characters; nft identifiers must start
/// with a letter. Only ASCII alphanumerics, dash and underscore are accepted
/// so the name can never be mistaken for a flag or keyword.
///
/// # Errors
///
/// Returns `Err` if the name violates those constraints.
pub fn validate_chain_name(name: &str) -> Result<String, String> {
    if name.is_empty() {
        return Err("Chain name cannot be empty".to_string());
    }

    if name.len() > 28 {
        return Err("Chain name too long (max 28 characters)".to_string());
    }

    if !name.starts_with(|c: char| c.is_ascii_alphabetic()) {
        return Err("Chain name must start with a letter".to_string());
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err("Chain name contains invalid characters".to_string());
    }

    // Built-in chains would be purged on stop
    if matches!(name, "INPUT" | "OUTPUT" | "FORWARD" | "PREROUTING" | "POSTROUTING") {
        return Err(format!("'{name}' is a built-in chain"));
    }

    Ok(name.to_string())
}
