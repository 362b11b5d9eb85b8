//! Static descriptions of callable operations.

use crate::Capability;
use serde::{Deserialize, Serialize};

/// What the gate needs to know about a tool before it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMeta {
    pub name: String,
    #[serde(default)]
    pub requires_trust: bool,
    #[serde(default)]
    pub required_caps: Vec<Capability>,
    /// Free-form tags such as `idempotent` or `readsNet`.
    #[serde(default)]
    pub effects: Vec<String>,
    /// `sha256:<hex>` of the tool's spec when the policy was authored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_checksum: Option<String>,
}

impl ToolMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn trusted(mut self) -> Self {
        self.requires_trust = true;
        self
    }

    pub fn requires(mut self, capability: Capability) -> Self {
        self.required_caps.push(capability);
        self
    }

    pub fn effect(mut self, effect: impl Into<String>) -> Self {
        self.effects.push(effect.into());
        self
    }

    pub fn signed(mut self, checksum: impl Into<String>) -> Self {
        self.signature_checksum = Some(checksum.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_from_toml() {
        let tool: ToolMeta = toml::from_str(
            r#"
name = "http.get"
required_caps = ["net:get:*.example.com:443"]
effects = ["readsNet", "idempotent"]
"#,
        )
        .unwrap();
        assert_eq!(tool.name, "http.get");
        assert!(!tool.requires_trust);
        assert_eq!(tool.required_caps.len(), 1);
        assert!(tool.signature_checksum.is_none());
    }

    #[test]
    fn builder_methods() {
        let tool = ToolMeta::new("fs.write")
            .trusted()
            .requires(Capability::parse("fs:write:/tmp/*").unwrap())
            .effect("writesFs");
        assert!(tool.requires_trust);
        assert_eq!(tool.effects, ["writesFs"]);
    }
}
