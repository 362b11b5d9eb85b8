//! Per-run execution policy.

use crate::error::{Denial, DenialKind};
use crate::limits::{Charge, charge_layers};
use crate::{Capability, GrantSet, matcher};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Privilege level of the current execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustContext {
    /// Configuration time. The only trusted context.
    Config,
    #[default]
    Normal,
    Test,
    User,
}

impl fmt::Display for TrustContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrustContext::Config => "config",
            TrustContext::Normal => "normal",
            TrustContext::Test => "test",
            TrustContext::User => "user",
        };
        f.write_str(name)
    }
}

/// Whether a name rule matches `name`.
///
/// Case-insensitive; `*` matches everything and `*x*`, `*x`, `x*` are
/// substring, suffix and prefix patterns. Anything else is exact.
pub fn rule_matches(pattern: &str, name: &str) -> bool {
    matcher::wildcard_match(pattern, name)
}

/// Whether a name rule matches a capability's resource or any of its scopes.
///
/// Lets `tool.account.*` match a capability scoped to `tool.account.register`.
pub fn rule_matches_capability(pattern: &str, capability: &Capability) -> bool {
    rule_matches(pattern, capability.resource_name())
        || capability.scopes().iter().any(|s| rule_matches(pattern, s))
}

/// Whether an effect tag marks a write.
pub fn is_write_effect(effect: &str) -> bool {
    let effect = effect.to_ascii_lowercase();
    effect.starts_with("writes") || effect == "mutates" || effect == "destructive"
}

/// Policy for one run or one scope within it.
///
/// Immutable after [`ExecPolicyBuilder::build`] apart from the counters its
/// [`GrantSet`] owns. A scope layered under a parent is evaluated
/// most-restrictive-wins against every layer of the chain.
#[derive(Debug)]
pub struct ExecPolicy {
    context: TrustContext,
    allow: Option<Vec<String>>,
    deny: Vec<String>,
    grants: GrantSet,
    parent: Option<Arc<ExecPolicy>>,
    read_only: bool,
}

impl ExecPolicy {
    pub fn builder(context: TrustContext) -> ExecPolicyBuilder {
        ExecPolicyBuilder::new(context)
    }

    /// Start a scope layered under `parent`, inheriting its trust context.
    pub fn child(parent: &Arc<ExecPolicy>) -> ExecPolicyBuilder {
        ExecPolicyBuilder::new(parent.context).parent(Arc::clone(parent))
    }

    pub fn context(&self) -> TrustContext {
        self.context
    }

    /// `None` when no allow list was configured.
    pub fn allow(&self) -> Option<&[String]> {
        self.allow.as_deref()
    }

    pub fn deny(&self) -> &[String] {
        &self.deny
    }

    pub fn grants(&self) -> &GrantSet {
        &self.grants
    }

    pub fn parent(&self) -> Option<&Arc<ExecPolicy>> {
        self.parent.as_ref()
    }

    /// Whether this layer or any ancestor is read-only.
    pub fn read_only(&self) -> bool {
        self.layers().iter().any(|layer| layer.read_only)
    }

    /// The policy chain, root first.
    pub fn layers(&self) -> Vec<&ExecPolicy> {
        let mut layers = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent.as_deref() {
            layers.push(parent);
            current = parent;
        }
        layers.reverse();
        layers
    }

    /// Apply deny then allow rules of every layer to `subjects`.
    ///
    /// A subject matches a rule if the rule matches any one of them. Deny in
    /// any layer wins before allow is consulted. A missing or empty allow
    /// list denies.
    pub(crate) fn check_names<F>(&self, what: &str, matches: F) -> Result<(), Denial>
    where
        F: Fn(&str) -> bool,
    {
        let layers = self.layers();

        for layer in &layers {
            if let Some(pattern) = layer.deny.iter().find(|p| matches(p)) {
                return Err(Denial::new(
                    DenialKind::Policy,
                    format!("{what} is denied by rule '{pattern}'"),
                ));
            }
        }

        for layer in &layers {
            match layer.allow.as_deref() {
                None => {
                    return Err(Denial::new(
                        DenialKind::Policy,
                        format!("{what} is not allowed: no allow list configured"),
                    ));
                }
                Some([]) => {
                    return Err(Denial::new(
                        DenialKind::Policy,
                        format!("{what} is not allowed: allow list is empty"),
                    ));
                }
                Some(allow) if !allow.iter().any(|p| matches(p)) => {
                    return Err(Denial::new(
                        DenialKind::Policy,
                        format!("{what} is not in the allow list"),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    /// Whether every layer grants all of `needs`.
    pub fn satisfies(&self, needs: &[Capability]) -> bool {
        self.layers()
            .iter()
            .all(|layer| layer.grants.satisfies(needs))
    }

    /// Whether every layer grants `capability`.
    pub fn check_capability(&self, capability: &Capability) -> bool {
        self.satisfies(std::slice::from_ref(capability))
    }

    /// Charge every layer atomically.
    pub fn charge(&self, charge: &Charge) -> Result<(), Denial> {
        let layers: Vec<_> = self
            .layers()
            .into_iter()
            .map(|layer| (layer.grants.limits(), layer.grants.counters()))
            .collect();
        charge_layers(&layers, charge)
    }

    pub fn check_and_charge_budget(&self, currency: &str, cents: u64) -> Result<(), Denial> {
        self.charge(&Charge::budget(currency, cents))
    }

    pub fn count_net(&self, bytes: u64) -> Result<(), Denial> {
        self.charge(&Charge::Net { bytes })
    }

    pub fn count_fs(&self, bytes: u64) -> Result<(), Denial> {
        self.charge(&Charge::Fs { bytes })
    }

    pub fn count_tool_call(&self, name: &str) -> Result<(), Denial> {
        self.charge(&Charge::tool_call(name))
    }

    /// Bound a sleep against every layer's ceiling.
    pub fn check_sleep(&self, duration: Duration) -> Result<(), Denial> {
        self.layers()
            .iter()
            .try_for_each(|layer| layer.grants.check_sleep(duration))
    }
}

/// Assembles an [`ExecPolicy`] from configuration.
#[derive(Debug)]
pub struct ExecPolicyBuilder {
    context: TrustContext,
    allow: Option<Vec<String>>,
    deny: Vec<String>,
    grants: GrantSet,
    parent: Option<Arc<ExecPolicy>>,
    read_only: bool,
}

impl ExecPolicyBuilder {
    pub fn new(context: TrustContext) -> Self {
        Self {
            context,
            allow: None,
            deny: Vec::new(),
            grants: GrantSet::empty(),
            parent: None,
            read_only: false,
        }
    }

    pub fn context(mut self, context: TrustContext) -> Self {
        self.context = context;
        self
    }

    /// Merge allow patterns. Calling this with no patterns still sets an
    /// explicit, empty allow list.
    pub fn allow<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let list = self.allow.get_or_insert_with(Vec::new);
        merge_patterns(list, patterns);
        self
    }

    /// Merge deny patterns.
    pub fn deny<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        merge_patterns(&mut self.deny, patterns);
        self
    }

    pub fn grants(mut self, grants: GrantSet) -> Self {
        self.grants = grants;
        self
    }

    pub fn parent(mut self, parent: Arc<ExecPolicy>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn build(self) -> ExecPolicy {
        ExecPolicy {
            context: self.context,
            allow: self.allow,
            deny: self.deny,
            grants: self.grants,
            parent: self.parent,
            read_only: self.read_only,
        }
    }
}

/// Append patterns not already present, compared case-insensitively.
fn merge_patterns<I, S>(list: &mut Vec<String>, patterns: I)
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    for pattern in patterns {
        let pattern = pattern.into();
        if !list.iter().any(|p| p.eq_ignore_ascii_case(&pattern)) {
            list.push(pattern);
        }
    }
}
