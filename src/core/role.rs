//! Cluster roles and the outcomes reported back to the cluster manager

use serde::{Deserialize, Serialize};

/// Promotion score reported while Promoted
pub const PROMOTED_SCORE: u32 = 100;

/// Promotion score reported while Unpromoted
pub const UNPROMOTED_SCORE: u32 = 1;

/// One of the two mutually exclusive roles a resource instance holds.
///
/// Parsing accepts the legacy `Master`/`Slave` spellings that older cluster
/// managers still pass in `OCF_RESKEY_CRM_meta_role`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[strum(ascii_case_insensitive)]
pub enum Role {
    /// Standby instance (initial role on first start)
    #[default]
    #[strum(to_string = "Unpromoted", serialize = "Slave")]
    Unpromoted,
    /// The single active instance
    #[strum(to_string = "Promoted", serialize = "Master")]
    Promoted,
}

impl Role {
    /// Score written to the orchestrator after reaching this role
    pub const fn promotion_score(self) -> u32 {
        match self {
            Role::Unpromoted => UNPROMOTED_SCORE,
            Role::Promoted => PROMOTED_SCORE,
        }
    }
}

/// Status of a finished action, as the cluster manager understands it.
///
/// Every action ends in exactly one of these. The numeric values are the OCF
/// resource-agent exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Success,
    GenericError,
    Unimplemented,
    NotConfigured,
    NotRunning,
    RunningPromoted,
}

impl Outcome {
    pub const fn exit_code(self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::GenericError => 1,
            Outcome::Unimplemented => 3,
            Outcome::NotConfigured => 6,
            Outcome::NotRunning => 7,
            Outcome::RunningPromoted => 8,
        }
    }

    /// Healthy monitor result for a node holding `role`
    pub const fn running_as(role: Role) -> Self {
        match role {
            Role::Unpromoted => Outcome::Success,
            Role::Promoted => Outcome::RunningPromoted,
        }
    }
}

impl From<&crate::core::error::Error> for Outcome {
    fn from(err: &crate::core::error::Error) -> Self {
        if err.is_configuration() {
            Outcome::NotConfigured
        } else {
            Outcome::GenericError
        }
    }
}
