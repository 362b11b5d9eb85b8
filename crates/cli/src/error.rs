//! CLI error types.

use std::path::PathBuf;
use thiserror::Error;

/// CLI errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The policy file does not exist.
    #[error("policy file not found at {path}")]
    PolicyNotFound { path: PathBuf },

    /// The gate denied the request.
    #[error("denied: {0}")]
    Denied(#[from] policy::Denial),

    /// Capabilities given on the command line are not satisfied.
    #[error("unsatisfied: {0}")]
    Unsatisfied(String),

    /// A capability argument did not parse.
    #[error(transparent)]
    Capability(#[from] policy::ParseCapabilityError),

    /// An error occurred in the policy layer.
    #[error(transparent)]
    Policy(#[from] policy::Error),

    /// Output could not be serialized.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Process exit code: 2 for a decision that came out negative, 1 for
    /// anything that prevented a decision.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Denied(_) | Error::Unsatisfied(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
