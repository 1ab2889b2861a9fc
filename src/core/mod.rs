//! Core agent functionality
//!
//! - [`rules`]: rule specs, the rule set and its role mapping
//! - [`role`]: roles and OCF outcomes
//! - [`backend`]: nftables and iptables adapters behind one trait
//! - [`agent`]: the role state machine driving a backend
//! - [`state`]: persisted last-known role
//! - [`promotion`]: promotion score reporting
//! - [`error`]: error types shared by all of the above

pub mod agent;
pub mod backend;
pub mod error;
pub mod promotion;
pub mod role;
pub mod rules;
pub mod state;

#[cfg(test)]
pub mod test_helpers;
