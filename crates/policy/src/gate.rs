//! The policy gate.
//!
//! Called by the dispatcher before every privileged operation. Stages run in
//! a fixed order and the first failure wins:
//!
//! 1. trust context
//! 2. tool integrity (only with a fetcher and a pinned checksum)
//! 3. deny/allow name rules, then read-only effects
//! 4. required capabilities
//! 5. admission charge against per-tool call limits

use crate::critical::CriticalSink;
use crate::error::{Denial, DenialKind};
use crate::exec::{
    ExecPolicy, TrustContext, is_write_effect, rule_matches, rule_matches_capability,
};
use crate::integrity::{self, SpecFetcher};
use crate::{Capability, ToolMeta};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Renders allow/deny decisions.
///
/// One gate serves every run in the process. Policies are passed per call;
/// `None` means no policy is configured and everything is denied.
#[derive(Clone)]
pub struct Gate {
    fetcher: Option<Arc<dyn SpecFetcher>>,
    critical: Arc<CriticalSink>,
}

impl Gate {
    pub fn new(critical: Arc<CriticalSink>) -> Self {
        Self {
            fetcher: None,
            critical,
        }
    }

    /// Enable integrity verification for tools with a pinned checksum.
    pub fn with_fetcher(mut self, fetcher: Arc<dyn SpecFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn critical(&self) -> &CriticalSink {
        &self.critical
    }

    /// Decide whether `tool` may run under `policy`.
    ///
    /// On success the tool's call counter has been charged. Critical
    /// denials are reported to the critical sink before being returned.
    pub fn can_call(&self, policy: Option<&ExecPolicy>, tool: &ToolMeta) -> Result<(), Denial> {
        let result = self.evaluate_call(policy, tool);
        if let Err(denial) = &result {
            debug!(
                tool = %tool.name,
                kind = %denial.kind,
                reason = %denial.reason,
                "tool call denied"
            );
            self.critical.report(&tool.name, denial);
        }
        result
    }

    /// Decide whether `capability` may be exercised under `policy`.
    ///
    /// Name rules are matched against the capability's resource and scopes.
    /// Nothing is charged.
    pub fn check(
        &self,
        policy: Option<&ExecPolicy>,
        capability: &Capability,
    ) -> Result<(), Denial> {
        let Some(policy) = policy else {
            return Err(no_policy());
        };
        let result = policy
            .check_names(&format!("capability '{capability}'"), |p| {
                rule_matches_capability(p, capability)
            })
            .and_then(|()| {
                if policy.check_capability(capability) {
                    Ok(())
                } else {
                    Err(Denial::new(
                        DenialKind::Capability,
                        format!(
                            "capability '{capability}' is not granted; possessed [{}]",
                            possessed(policy)
                        ),
                    ))
                }
            });
        if let Err(denial) = &result {
            debug!(
                capability = %capability,
                kind = %denial.kind,
                reason = %denial.reason,
                "capability denied"
            );
        }
        result
    }

    fn evaluate_call(&self, policy: Option<&ExecPolicy>, tool: &ToolMeta) -> Result<(), Denial> {
        let Some(policy) = policy else {
            return Err(no_policy());
        };

        if tool.requires_trust && policy.context() != TrustContext::Config {
            return Err(Denial::new(
                DenialKind::Trust,
                format!(
                    "tool '{}' requires a trusted context, current context is {}",
                    tool.name,
                    policy.context()
                ),
            ));
        }

        if let (Some(fetcher), Some(expected)) = (&self.fetcher, &tool.signature_checksum) {
            integrity::verify(&tool.name, expected, fetcher.as_ref())?;
        }

        policy.check_names(&format!("tool '{}'", tool.name), |p| {
            rule_matches(p, &tool.name)
        })?;

        if policy.read_only() {
            if let Some(effect) = tool.effects.iter().find(|e| is_write_effect(e)) {
                return Err(Denial::new(
                    DenialKind::Policy,
                    format!(
                        "tool '{}' has write effect '{effect}' under a read-only policy",
                        tool.name
                    ),
                ));
            }
        }

        if !policy.satisfies(&tool.required_caps) {
            return Err(Denial::new(
                DenialKind::Capability,
                format!(
                    "tool '{}' requires [{}]; possessed [{}]",
                    tool.name,
                    join(&tool.required_caps),
                    possessed(policy)
                ),
            ));
        }

        policy.count_tool_call(&tool.name)
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new(Arc::new(CriticalSink::default()))
    }
}

impl fmt::Debug for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gate")
            .field("integrity", &self.fetcher.is_some())
            .field("critical", &self.critical)
            .finish()
    }
}

fn no_policy() -> Denial {
    Denial::new(DenialKind::Policy, "no policy configured")
}

fn join(caps: &[Capability]) -> String {
    caps.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Grants of every layer, root first.
fn possessed(policy: &ExecPolicy) -> String {
    policy
        .layers()
        .iter()
        .map(|layer| join(layer.grants().grants()))
        .collect::<Vec<_>>()
        .join(" | ")
}
