//! Capability matching.
//!
//! A need is satisfied by a grant when the resource, every needed verb, and
//! every needed scope match. "Scope" means something different per resource
//! (a path, a host, an opaque token), so scope matching dispatches on the
//! resource name.

use crate::Capability;
use glob::{MatchOptions, Pattern};

const FS_GLOB: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

const HOST_GLOB: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// True iff every need is satisfied by at least one grant.
///
/// An empty `needs` list is vacuously satisfied.
pub fn satisfied(needs: &[Capability], grants: &[Capability]) -> bool {
    needs
        .iter()
        .all(|need| grants.iter().any(|grant| grant_satisfies(need, grant)))
}

/// Whether a single grant covers a single need.
pub fn grant_satisfies(need: &Capability, grant: &Capability) -> bool {
    resource_matches(need.resource_name(), grant.resource_name())
        && verbs_match(need.verbs(), grant.verbs())
        && scopes_match(need.resource_name(), need.scopes(), grant.scopes())
}

fn resource_matches(need: &str, grant: &str) -> bool {
    grant == "*" || need.eq_ignore_ascii_case(grant)
}

fn verbs_match(need: &[String], grant: &[String]) -> bool {
    if grant.iter().any(|v| v == "*") {
        return true;
    }
    need.iter()
        .all(|verb| grant.iter().any(|g| g.eq_ignore_ascii_case(verb)))
}

fn scopes_match(resource: &str, need: &[String], grant: &[String]) -> bool {
    need.iter()
        .all(|scope| grant.iter().any(|g| scope_match(resource, scope, g)))
}

/// Match one needed scope against one granted scope using the rules for
/// `resource`.
pub fn scope_match(resource: &str, need: &str, grant: &str) -> bool {
    match resource.to_ascii_lowercase().as_str() {
        "env" | "secrets" | "model" | "sandbox" | "proc" => wildcard_match(grant, need),
        "fs" => fs_match(need, grant),
        "net" => net_match(need, grant),
        _ => grant == "*" || grant.eq_ignore_ascii_case(need) || grant == "true",
    }
}

/// Case-insensitive token wildcard.
///
/// `*` matches anything; `*x*`, `*x` and `x*` are substring, suffix and
/// prefix patterns, tried in that order; anything else is exact.
pub fn wildcard_match(pattern: &str, value: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let pattern = pattern.to_lowercase();
    let value = value.to_lowercase();

    if pattern.len() >= 2 && pattern.starts_with('*') && pattern.ends_with('*') {
        return value.contains(&pattern[1..pattern.len() - 1]);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return value.ends_with(suffix);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}

fn fs_match(need: &str, grant: &str) -> bool {
    if grant == "*" {
        return true;
    }
    // Invalid patterns never match.
    Pattern::new(grant)
        .map(|p| p.matches_with(need, FS_GLOB))
        .unwrap_or(false)
}

fn net_match(need: &str, grant: &str) -> bool {
    let (need_host, need_port) = split_host_port(need);
    let (grant_host, grant_port) = split_host_port(grant);

    if let (Some(n), Some(g)) = (need_port, grant_port) {
        if g != "*" && n != g {
            return false;
        }
    }
    host_match(need_host, grant_host)
}

/// Split `host[:port]`, treating a bracketed IPv6 literal as the host.
///
/// Brackets are stripped from the returned host. An empty port is `None`.
pub fn split_host_port(value: &str) -> (&str, Option<&str>) {
    if let Some(close) = value.rfind(']') {
        let port = value[close + 1..]
            .strip_prefix(':')
            .filter(|p| !p.is_empty());
        let host = value[..close].trim_start_matches('[');
        return (host, port);
    }
    match value.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() => (host, Some(port)),
        Some((host, _)) => (host, None),
        None => (value, None),
    }
}

fn host_match(need: &str, grant: &str) -> bool {
    if grant == "*" || need.eq_ignore_ascii_case(grant) {
        return true;
    }
    if let Some(domain) = grant.strip_prefix("*.") {
        let need = need.to_ascii_lowercase();
        let domain = domain.to_ascii_lowercase();
        return need == domain || need.ends_with(&format!(".{domain}"));
    }
    if grant.contains(['*', '?', '[']) {
        return Pattern::new(grant)
            .map(|p| p.matches_with(need, HOST_GLOB))
            .unwrap_or(false);
    }
    false
}
