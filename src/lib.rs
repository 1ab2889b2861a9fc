//! roleguard - role-dependent firewall rules for promotable cluster resources
//!
//! An OCF resource agent that keeps a set of TCP reject rules installed while
//! a promotable clone instance holds one role and removes them in the other.
//!
//! # Architecture
//!
//! - [`core`] - Rule model, role state machine and packet-filter backends
//! - [`config`] - `OCF_RESKEY_*` parameters and their validation
//! - [`validators`] - Input validation for ports, addresses and chain names
//! - [`audit`] - JSON-lines record of every firewall-mutating action
//! - [`metadata`] - The `meta-data` manifest
//! - [`utils`] - Directory fallbacks and program lookup
//!
//! # Safety Properties
//!
//! - Monitoring never mutates the firewall
//! - Every transition is idempotent and re-applies the whole target set
//! - State writes are atomic (temp file then rename)
//! - Every external command is bounded by a timeout

#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_errors_doc)]

pub mod audit;
pub mod config;
pub mod core;
pub mod metadata;
pub mod utils;
pub mod validators;

shadow_rs::shadow!(build);

// Re-export commonly used types
pub use crate::core::agent::{Action, Agent, Notification, Request};
pub use crate::core::error::{Error, Result};
pub use crate::core::role::{Outcome, Role};
pub use crate::core::rules::{RuleSet, RuleSpec};
