//! Capabilities: the smallest unit of authority.

use crate::error::ParseCapabilityError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capability string granting everything.
pub const ALLOW_ALL: &str = "*:*:*";

/// A `(resource, verbs, scopes)` triple.
///
/// String form is `resource[:verb,verb][:scope,scope]`. Scopes may contain
/// colons (`net:connect:[::1]:443`), so at most three segments are split off.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Capability {
    resource: String,
    verbs: Vec<String>,
    scopes: Vec<String>,
}

impl Capability {
    pub fn new<V, S>(resource: impl Into<String>, verbs: V, scopes: S) -> Self
    where
        V: IntoIterator,
        V::Item: Into<String>,
        S: IntoIterator,
        S::Item: Into<String>,
    {
        let mut verb_set: Vec<String> = Vec::new();
        for verb in verbs {
            let verb = verb.into();
            if !verb_set.iter().any(|v| v.eq_ignore_ascii_case(&verb)) {
                verb_set.push(verb);
            }
        }

        let mut scope_set: Vec<String> = Vec::new();
        for scope in scopes {
            let scope = scope.into();
            if !scope_set.contains(&scope) {
                scope_set.push(scope);
            }
        }

        Self {
            resource: resource.into(),
            verbs: verb_set,
            scopes: scope_set,
        }
    }

    /// A capability with a resource only.
    pub fn resource(resource: impl Into<String>) -> Self {
        Self::new(resource, Vec::<String>::new(), Vec::<String>::new())
    }

    /// The universal grant, `*:*:*`.
    pub fn allow_all() -> Self {
        Self::new("*", ["*"], ["*"])
    }

    /// Parse a capability string.
    pub fn parse(s: &str) -> Result<Self, ParseCapabilityError> {
        let mut parts = s.splitn(3, ':');
        let resource = parts.next().unwrap_or_default();
        if resource.is_empty() {
            return Err(ParseCapabilityError::EmptyResource(s.to_string()));
        }

        let verbs = match parts.next() {
            None => Vec::new(),
            Some("") => return Err(ParseCapabilityError::EmptyVerbSegment(s.to_string())),
            Some(segment) => {
                let verbs: Vec<&str> = segment.split(',').collect();
                if verbs.iter().any(|v| v.is_empty()) {
                    return Err(ParseCapabilityError::EmptyVerb(s.to_string()));
                }
                verbs
            }
        };

        // `env:read:` keeps one empty scope.
        let scopes: Vec<&str> = match parts.next() {
            None => Vec::new(),
            Some(segment) => segment.split(',').collect(),
        };

        Ok(Self::new(resource, verbs, scopes))
    }

    /// Build a capability from a `{ resource, verbs, scopes }` table.
    ///
    /// Tables obey the same grammar as strings: the result always displays
    /// as a string that parses back to it.
    pub fn from_value(value: &Value) -> crate::Result<Self> {
        let table = value.as_table()?;
        let resource = table.required_str("resource")?;
        let verbs = table.optional_str_list("verbs")?.unwrap_or_default();
        let scopes = table.optional_str_list("scopes")?.unwrap_or_default();

        let shown = format!("{resource}:{}:{}", verbs.join(","), scopes.join(","));
        if resource.is_empty() {
            return Err(ParseCapabilityError::EmptyResource(shown).into());
        }
        if verbs.iter().any(String::is_empty) {
            return Err(ParseCapabilityError::EmptyVerb(shown).into());
        }
        if verbs.is_empty() && !scopes.is_empty() {
            return Err(ParseCapabilityError::EmptyVerbSegment(shown).into());
        }
        if resource.contains(':')
            || verbs.iter().any(|v| v.contains([':', ',']))
            || scopes.iter().any(|s| s.contains(','))
        {
            return Err(ParseCapabilityError::ReservedSeparator(shown).into());
        }
        Ok(Self::new(resource, verbs, scopes))
    }

    pub fn resource_name(&self) -> &str {
        &self.resource
    }

    pub fn verbs(&self) -> &[String] {
        &self.verbs
    }

    pub fn scopes(&self) -> &[String] {
        &self.scopes
    }

    pub fn is_allow_all(&self) -> bool {
        self.resource == "*"
            && self.verbs.iter().any(|v| v == "*")
            && self.scopes.iter().any(|s| s == "*")
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        if !self.verbs.is_empty() || !self.scopes.is_empty() {
            write!(f, ":{}", self.verbs.join(","))?;
        }
        if !self.scopes.is_empty() {
            write!(f, ":{}", self.scopes.join(","))?;
        }
        Ok(())
    }
}

impl FromStr for Capability {
    type Err = ParseCapabilityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Capability {
    type Error = ParseCapabilityError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Capability> for String {
    fn from(cap: Capability) -> Self {
        cap.to_string()
    }
}

/// Parse a list of capability strings, stopping at the first error.
pub fn parse_all<I, S>(specs: I) -> Result<Vec<Capability>, ParseCapabilityError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    specs.into_iter().map(|s| Capability::parse(s.as_ref())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FieldError;

    #[test]
    fn parse_full_form() {
        let cap: Capability = "fs:read,write:/data/*,/tmp/*".parse().unwrap();
        assert_eq!(cap.resource_name(), "fs");
        assert_eq!(cap.verbs(), ["read", "write"]);
        assert_eq!(cap.scopes(), ["/data/*", "/tmp/*"]);
    }

    #[test]
    fn parse_resource_and_verbs_only() {
        let cap = Capability::parse("model:use").unwrap();
        assert_eq!(cap.verbs(), ["use"]);
        assert!(cap.scopes().is_empty());

        let bare = Capability::parse("clock").unwrap();
        assert!(bare.verbs().is_empty());
        assert!(bare.scopes().is_empty());
    }

    #[test]
    fn trailing_empty_scope_segment() {
        let cap = Capability::parse("env:read:").unwrap();
        assert_eq!(cap.scopes(), [""]);
        assert_eq!(cap.to_string(), "env:read:");
    }

    #[test]
    fn net_scope_keeps_colons() {
        let cap = Capability::parse("net:connect:[::1]:8080").unwrap();
        assert_eq!(cap.scopes(), ["[::1]:8080"]);
    }

    #[test]
    fn parse_errors() {
        assert!(matches!(
            Capability::parse(""),
            Err(ParseCapabilityError::EmptyResource(_))
        ));
        assert!(matches!(
            Capability::parse(":read"),
            Err(ParseCapabilityError::EmptyResource(_))
        ));
        assert!(matches!(
            Capability::parse("env::HOME"),
            Err(ParseCapabilityError::EmptyVerbSegment(_))
        ));
        assert!(matches!(
            Capability::parse("env:read,:HOME"),
            Err(ParseCapabilityError::EmptyVerb(_))
        ));
    }

    #[test]
    fn duplicates_collapse() {
        let cap = Capability::parse("env:read,READ:HOME,HOME").unwrap();
        assert_eq!(cap.verbs(), ["read"]);
        assert_eq!(cap.scopes(), ["HOME"]);
    }

    #[test]
    fn display_round_trips() {
        for spec in ["fs:read:/data/*", "model:use", "net:connect:*.example.com:443", ALLOW_ALL] {
            let cap = Capability::parse(spec).unwrap();
            assert_eq!(Capability::parse(&cap.to_string()).unwrap(), cap);
        }
    }

    #[test]
    fn allow_all_sentinel() {
        let cap = Capability::parse(ALLOW_ALL).unwrap();
        assert!(cap.is_allow_all());
        assert_eq!(cap, Capability::allow_all());
    }

    #[test]
    fn serde_uses_string_form() {
        let cap = Capability::parse("secrets:read:API_*").unwrap();
        let json = serde_json::to_string(&cap).unwrap();
        assert_eq!(json, "\"secrets:read:API_*\"");

        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
        assert!(serde_json::from_str::<Capability>("\"\"").is_err());
    }

    fn table(src: &str) -> Value {
        let parsed: toml::Table = toml::from_str(src).unwrap();
        Value::from(toml::Value::Table(parsed))
    }

    #[test]
    fn table_form_matches_string_form() {
        let cap = Capability::from_value(&table(
            "resource = \"fs\"\nverbs = [\"read\"]\nscopes = \"/data/*\"\n",
        ))
        .unwrap();
        assert_eq!(cap, Capability::parse("fs:read:/data/*").unwrap());

        let bare = Capability::from_value(&table("resource = \"clock\"\n")).unwrap();
        assert_eq!(bare.to_string(), "clock");
    }

    #[test]
    fn table_form_rejects_what_strings_reject() {
        let parse_error = |src: &str| match Capability::from_value(&table(src)) {
            Err(crate::Error::Capability(e)) => e,
            other => panic!("expected a capability error, got {other:?}"),
        };

        assert!(matches!(
            parse_error("resource = \"\"\n"),
            ParseCapabilityError::EmptyResource(_)
        ));
        assert!(matches!(
            parse_error("resource = \"env\"\nverbs = [\"read\", \"\"]\n"),
            ParseCapabilityError::EmptyVerb(_)
        ));
        assert!(matches!(
            parse_error("resource = \"fs\"\nscopes = [\"/data/*\"]\n"),
            ParseCapabilityError::EmptyVerbSegment(_)
        ));
        assert!(matches!(
            parse_error("resource = \"fs:read\"\n"),
            ParseCapabilityError::ReservedSeparator(_)
        ));
        assert!(matches!(
            parse_error("resource = \"env\"\nverbs = [\"read,write\"]\n"),
            ParseCapabilityError::ReservedSeparator(_)
        ));
    }

    #[test]
    fn table_form_field_errors() {
        assert!(matches!(
            Capability::from_value(&table("verbs = [\"read\"]\n")),
            Err(crate::Error::Field(FieldError::Missing(_)))
        ));
        assert!(matches!(
            Capability::from_value(&Value::from("fs:read")),
            Err(crate::Error::Field(FieldError::NotATable(_)))
        ));
    }

    #[test]
    fn table_grants_survive_a_serde_round_trip() {
        let cap = Capability::from_value(&table(
            r#"
resource = "net"
verbs = ["connect"]
scopes = ["[::1]:443", "*.example.com"]
"#,
        ))
        .unwrap();
        let json = serde_json::to_string(&cap).unwrap();
        let back: Capability = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cap);
    }
}
