//! Tool integrity verification.
//!
//! A policy may pin a tool to the checksum of its spec at authoring time. At
//! call time the live spec is fetched and re-hashed; any difference means the
//! implementation was swapped after the policy was written.

use crate::error::{Denial, DenialKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CHECKSUM_PREFIX: &str = "sha256:";

/// The stable, hashed fields of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub return_type: String,
    pub arg_count: usize,
}

/// Looks up the live spec for a tool.
pub trait SpecFetcher: Send + Sync {
    fn fetch(&self, name: &str) -> Option<ToolSpec>;
}

impl<F> SpecFetcher for F
where
    F: Fn(&str) -> Option<ToolSpec> + Send + Sync,
{
    fn fetch(&self, name: &str) -> Option<ToolSpec> {
        self(name)
    }
}

/// `sha256:` followed by the lowercase hex digest of the stable fields.
pub fn checksum(spec: &ToolSpec) -> String {
    let mut hasher = Sha256::new();
    hasher.update(spec.name.as_bytes());
    hasher.update(b"\n");
    hasher.update(spec.return_type.as_bytes());
    hasher.update(b"\n");
    hasher.update(spec.arg_count.to_string().as_bytes());
    format!("{CHECKSUM_PREFIX}{}", hex::encode(hasher.finalize()))
}

/// Non-empty ASCII alphanumerics plus `.`, `_` and `-`.
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Compare the live spec of `name` against `expected`.
///
/// Every failure is `SubsystemCompromised`.
pub fn verify(name: &str, expected: &str, fetcher: &dyn SpecFetcher) -> Result<(), Denial> {
    if !is_valid_tool_name(name) {
        return Err(compromised(format!("malformed tool name {name:?}")));
    }
    let Some(spec) = fetcher.fetch(name) else {
        return Err(compromised(format!("no live spec for tool '{name}'")));
    };
    let actual = checksum(&spec);
    if actual != expected {
        return Err(compromised(format!(
            "checksum mismatch for tool '{name}': expected {expected}, found {actual}"
        )));
    }
    Ok(())
}

fn compromised(reason: String) -> Denial {
    Denial::new(DenialKind::SubsystemCompromised, reason)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str) -> ToolSpec {
        ToolSpec {
            name: name.to_string(),
            return_type: "string".to_string(),
            arg_count: 2,
        }
    }

    #[test]
    fn checksum_format_is_stable() {
        let sum = checksum(&spec("fs.read"));
        assert!(sum.starts_with(CHECKSUM_PREFIX));
        assert_eq!(sum.len(), CHECKSUM_PREFIX.len() + 64);
        assert_eq!(sum, checksum(&spec("fs.read")));
    }

    #[test]
    fn checksum_covers_every_field() {
        let base = spec("fs.read");
        let mut other = base.clone();
        other.arg_count = 3;
        assert_ne!(checksum(&base), checksum(&other));

        let mut other = base.clone();
        other.return_type = "bytes".into();
        assert_ne!(checksum(&base), checksum(&other));
    }

    #[test]
    fn tool_names() {
        assert!(is_valid_tool_name("fs.read_all-v2"));
        assert!(!is_valid_tool_name(""));
        assert!(!is_valid_tool_name("fs read"));
        assert!(!is_valid_tool_name("../etc"));
    }

    #[test]
    fn verify_outcomes() {
        let fetch = |name: &str| (name == "fs.read").then(|| spec("fs.read"));
        let good = checksum(&spec("fs.read"));

        assert!(verify("fs.read", &good, &fetch).is_ok());

        let err = verify("fs.read", "sha256:00", &fetch).unwrap_err();
        assert_eq!(err.kind, DenialKind::SubsystemCompromised);
        assert!(err.reason.contains("mismatch"));

        let err = verify("fs.write", &good, &fetch).unwrap_err();
        assert!(err.reason.contains("no live spec"));

        let err = verify("bad name", &good, &fetch).unwrap_err();
        assert!(err.reason.contains("malformed"));
    }
}
