//! Policy configuration loaded from TOML.
//!
//! ```toml
//! context = "normal"
//! allow = ["fs.*", "http.get"]
//! deny = ["fs.delete"]
//! grants = [
//!     "fs:read:/data/**",
//!     { resource = "net", verbs = ["get"], scopes = ["*.example.com:443"] },
//! ]
//!
//! [limits]
//! max_net_bytes = 1048576
//! [limits.budget_per_run]
//! USD = 500
//!
//! [[scopes]]
//! name = "plugin"
//! allow = ["fs.read"]
//! grants = ["fs:read:/data/plugin/*"]
//! ```

use crate::exec::{ExecPolicy, ExecPolicyBuilder, TrustContext};
use crate::value::Value;
use crate::{Capability, Error, GrantSet, Limits, Result, ToolMeta};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Root policy configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub context: TrustContext,

    #[serde(flatten)]
    pub rules: RuleConfig,

    /// Scopes layered under the root policy.
    #[serde(default)]
    pub scopes: Vec<ScopeConfig>,

    /// Tool descriptions, for dry runs.
    #[serde(default)]
    pub tools: Vec<ToolMeta>,
}

/// A named scope evaluated under the root policy.
#[derive(Debug, Clone, Deserialize)]
pub struct ScopeConfig {
    pub name: String,

    #[serde(flatten)]
    pub rules: RuleConfig,
}

/// Rules shared by the root and its scopes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleConfig {
    /// Absent means no allow list, which denies everything.
    #[serde(default)]
    pub allow: Option<Vec<String>>,

    #[serde(default)]
    pub deny: Vec<String>,

    #[serde(default)]
    pub read_only: bool,

    /// Capability strings or `{ resource, verbs, scopes }` tables.
    #[serde(default)]
    pub grants: Vec<toml::Value>,

    #[serde(default)]
    pub limits: Limits,
}

/// A built root policy and its named scopes.
#[derive(Debug)]
pub struct LoadedPolicy {
    pub root: Arc<ExecPolicy>,
    pub scopes: HashMap<String, Arc<ExecPolicy>>,
    pub tools: Vec<ToolMeta>,
}

impl LoadedPolicy {
    /// The named scope, or the root for `None`.
    pub fn select(&self, scope: Option<&str>) -> Result<&Arc<ExecPolicy>> {
        match scope {
            None => Ok(&self.root),
            Some(name) => self
                .scopes
                .get(name)
                .ok_or_else(|| Error::Invalid(format!("unknown scope '{name}'"))),
        }
    }

    pub fn tool(&self, name: &str) -> Option<&ToolMeta> {
        self.tools.iter().find(|t| t.name == name)
    }
}

impl PolicyConfig {
    /// Load policy configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    /// Parse policy configuration from a TOML string.
    pub fn parse(toml: &str) -> Result<Self> {
        toml::from_str(toml).map_err(|e| Error::Parse(e.to_string()))
    }

    /// Build the root policy and every scope under it.
    pub fn build(self) -> Result<LoadedPolicy> {
        let root = Arc::new(self.rules.apply(ExecPolicy::builder(self.context))?);

        let mut scopes = HashMap::new();
        for scope in self.scopes {
            if scopes.contains_key(&scope.name) {
                return Err(Error::Invalid(format!("duplicate scope '{}'", scope.name)));
            }
            let policy = scope.rules.apply(ExecPolicy::child(&root))?;
            scopes.insert(scope.name, Arc::new(policy));
        }

        Ok(LoadedPolicy {
            root,
            scopes,
            tools: self.tools,
        })
    }
}

impl RuleConfig {
    fn apply(self, builder: ExecPolicyBuilder) -> Result<ExecPolicy> {
        let grants = self
            .grants
            .into_iter()
            .map(grant_from_toml)
            .collect::<Result<Vec<_>>>()?;

        let mut builder = builder
            .deny(self.deny)
            .read_only(self.read_only)
            .grants(GrantSet::new(grants, self.limits));
        if let Some(allow) = self.allow {
            builder = builder.allow(allow);
        }
        Ok(builder.build())
    }
}

fn grant_from_toml(value: toml::Value) -> Result<Capability> {
    match value {
        toml::Value::String(spec) => Ok(Capability::parse(&spec)?),
        table @ toml::Value::Table(_) => Ok(Capability::from_value(&Value::from(table))?),
        other => Err(Error::Invalid(format!(
            "grant must be a string or table, found {}",
            other.type_str()
        ))),
    }
}
