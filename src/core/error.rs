use thiserror::Error;

/// Core error types for roleguard
#[derive(Debug, Error)]
pub enum Error {
    /// A required parameter is missing or malformed
    #[error("Configuration error in {field}: {message}")]
    Configuration { field: String, message: String },

    /// Neither nft nor iptables is available on this node
    #[error("No supported packet filter found (looked for nft, iptables)")]
    BackendUnavailable,

    /// A firewall command failed for a reason other than "already satisfied"
    #[error("Backend command failed: {command}: {stderr}")]
    RuleMutation {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    /// The table or chain holding our rules cannot be created
    #[error("Cannot set up rule container: {0}")]
    ContainerUnavailable(Box<Error>),

    /// A backend call exceeded its time budget
    #[error("Backend command timed out after {secs}s: {command}")]
    Timeout { command: String, secs: u64 },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub fn configuration(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Wraps a failure from `ensure_container`.
    pub fn container(err: Self) -> Self {
        match err {
            Self::ContainerUnavailable(_) => err,
            other => Self::ContainerUnavailable(Box::new(other)),
        }
    }

    /// Returns true for errors that retrying the same action cannot fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::BackendUnavailable | Self::ContainerUnavailable(_)
        )
    }
}

/// Known shapes of packet-filter stderr output.
///
/// Both tools report "nothing to remove" and "already there" with a handful of
/// stable phrases; those two cases are success at the adapter boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StderrPattern {
    /// The table, chain or rule is not there
    Missing,
    /// The construct already exists
    AlreadyExists,
    /// Anything else
    Other,
}

impl StderrPattern {
    pub fn classify(stderr: &str) -> Self {
        let lower = stderr.to_lowercase();

        if lower.contains("no such file or directory")
            || lower.contains("does not exist")
            || lower.contains("no chain/target/match")
        {
            return Self::Missing;
        }

        if lower.contains("file exists") || lower.contains("already exists") {
            return Self::AlreadyExists;
        }

        Self::Other
    }
}

pub type Result<T> = std::result::Result<T, Error>;
