//! Policy error types.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Why the gate refused an operation.
///
/// Every check returns one of these as a typed value; none of them is a
/// panic. Only [`DenialKind::SubsystemCompromised`] is critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// Trusted-only operation attempted outside the trusted context.
    Trust,
    /// Denied by name, absent from the allow list, or blocked as a write
    /// under a read-only policy.
    Policy,
    /// Allowed by name but the required capabilities are not granted.
    Capability,
    BudgetExceeded,
    NetExceeded,
    FsExceeded,
    ToolExceeded,
    TimeExceeded,
    /// Tool integrity verification failed.
    SubsystemCompromised,
}

impl DenialKind {
    /// Whether this kind must be routed through the critical-error sink.
    pub fn is_critical(self) -> bool {
        matches!(self, DenialKind::SubsystemCompromised)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DenialKind::Trust => "trust",
            DenialKind::Policy => "policy",
            DenialKind::Capability => "capability",
            DenialKind::BudgetExceeded => "budget_exceeded",
            DenialKind::NetExceeded => "net_exceeded",
            DenialKind::FsExceeded => "fs_exceeded",
            DenialKind::ToolExceeded => "tool_exceeded",
            DenialKind::TimeExceeded => "time_exceeded",
            DenialKind::SubsystemCompromised => "subsystem_compromised",
        }
    }
}

impl fmt::Display for DenialKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A denial with its diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {reason}")]
pub struct Denial {
    pub kind: DenialKind,
    pub reason: String,
}

impl Denial {
    pub fn new(kind: DenialKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_critical(&self) -> bool {
        self.kind.is_critical()
    }
}

/// Errors from parsing the `resource[:verbs][:scopes]` grammar.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseCapabilityError {
    #[error("empty resource in capability '{0}'")]
    EmptyResource(String),

    #[error("empty verb segment in capability '{0}'")]
    EmptyVerbSegment(String),

    #[error("empty verb in capability '{0}'")]
    EmptyVerb(String),

    #[error("separator inside a resource, verb or scope in capability '{0}'")]
    ReservedSeparator(String),
}

/// Errors from extracting typed fields out of a [`crate::Value`] map.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("missing field '{0}'")]
    Missing(String),

    #[error("field '{field}' must be {expected}, found {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("expected a table, found {0}")]
    NotATable(&'static str),
}

/// Policy errors.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An operation was denied by the gate.
    #[error("denied: {0}")]
    Denied(#[from] Denial),

    /// A capability string did not parse.
    #[error(transparent)]
    Capability(#[from] ParseCapabilityError),

    /// A configuration table had a missing or mis-typed field.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// The policy configuration is invalid.
    #[error("invalid policy: {0}")]
    Invalid(String),

    /// Failed to parse a policy file.
    #[error("failed to parse policy: {0}")]
    Parse(String),

    /// An I/O error occurred while reading policy.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_compromise_is_critical() {
        assert!(DenialKind::SubsystemCompromised.is_critical());
        assert!(!DenialKind::Policy.is_critical());
        assert!(!DenialKind::ToolExceeded.is_critical());
    }

    #[test]
    fn denial_display_and_json() {
        let denial = Denial::new(DenialKind::FsExceeded, "byte limit 10 reached");
        assert_eq!(denial.to_string(), "fs_exceeded: byte limit 10 reached");

        let json = serde_json::to_string(&denial).unwrap();
        assert!(json.contains("\"kind\":\"fs_exceeded\""));
    }
}
