//! Runtime permission state consulted when the agent's tool set is resolved.
//!
//! The host decides which gated capabilities (calendar, contacts, ...) are usable right now.
//! The core only asks, once per agent construction, whether a permission key is granted.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Read-only view of the permissions granted at one point in time.
pub trait PermissionSnapshot: Send + Sync {
    fn is_granted(&self, permission: &str) -> bool;
}

impl<F> PermissionSnapshot for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_granted(&self, permission: &str) -> bool {
        self(permission)
    }
}

/// Explicit set of granted permission keys, as reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantedPermissions(HashSet<String>);

impl GrantedPermissions {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn grant(mut self, permission: impl Into<String>) -> Self {
        self.0.insert(permission.into());
        self
    }

    pub fn revoke(&mut self, permission: &str) -> bool {
        self.0.remove(permission)
    }
}

impl<S: Into<String>> FromIterator<S> for GrantedPermissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl PermissionSnapshot for GrantedPermissions {
    fn is_granted(&self, permission: &str) -> bool {
        self.0.contains(permission)
    }
}

/// Represents the effect of a permission rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionEffect {
    Allow,
    Deny,
}

/// A single rule matching permission keys (supports "*" wildcards, e.g. "calendar.*")
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRule {
    pub permission: String,
    pub effect: PermissionEffect,
}

impl PermissionRule {
    pub fn allow(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            effect: PermissionEffect::Allow,
        }
    }

    pub fn deny(permission: impl Into<String>) -> Self {
        Self {
            permission: permission.into(),
            effect: PermissionEffect::Deny,
        }
    }

    pub fn matches(&self, permission: &str) -> bool {
        wildcard_match(&self.permission, permission)
    }
}

/// Ordered rule list loaded from configuration.
///
/// Rules are evaluated in order and the first match decides. No match means deny.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionPolicy {
    #[serde(default)]
    pub rules: Vec<PermissionRule>,
}

impl PermissionPolicy {
    pub fn new(rules: Vec<PermissionRule>) -> Self {
        Self { rules }
    }

    pub fn allow_all() -> Self {
        Self::new(vec![PermissionRule::allow("*")])
    }

    pub fn add_rule(&mut self, rule: PermissionRule) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl PermissionSnapshot for PermissionPolicy {
    fn is_granted(&self, permission: &str) -> bool {
        self.rules
            .iter()
            .find(|rule| rule.matches(permission))
            .map(|rule| rule.effect == PermissionEffect::Allow)
            .unwrap_or(false)
    }
}

/// Simple wildcard matching
/// Supports "*" as a wildcard that matches any run of characters
fn wildcard_match(pattern: &str, text: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let first = parts[0];
    let last = parts[parts.len() - 1];
    if !text.starts_with(first) {
        return false;
    }

    let mut pos = first.len();
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match text[pos..].find(part) {
            Some(found) => pos += found + part.len(),
            None => return false,
        }
    }

    text.len() >= pos + last.len() && text[pos..].ends_with(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("*", "anything"));
        assert!(wildcard_match("calendar.*", "calendar.read"));
        assert!(wildcard_match("*.read", "calendar.read"));
        assert!(wildcard_match("cal*.r*d", "calendar.read"));
        assert!(wildcard_match("calendar.read", "calendar.read"));
        assert!(!wildcard_match("calendar.*", "contacts.read"));
        assert!(!wildcard_match("*.write", "calendar.read"));
        assert!(!wildcard_match("ab*ba", "aba"));
    }

    #[test]
    fn test_first_match_wins() {
        let policy = PermissionPolicy::new(vec![
            PermissionRule::deny("calendar.write"),
            PermissionRule::allow("calendar.*"),
        ]);

        assert!(policy.is_granted("calendar.read"));
        assert!(!policy.is_granted("calendar.write"));
    }

    #[test]
    fn test_default_deny() {
        let policy = PermissionPolicy::default();
        assert!(!policy.is_granted("calendar.read"));
        assert!(PermissionPolicy::allow_all().is_granted("calendar.read"));
    }

    #[test]
    fn test_granted_set_and_closure_snapshots() {
        let mut granted: GrantedPermissions = ["calendar.read"].into_iter().collect();
        assert!(granted.is_granted("calendar.read"));
        assert!(!granted.is_granted("calendar.write"));
        assert!(granted.revoke("calendar.read"));
        assert!(!granted.is_granted("calendar.read"));

        let only_reads = |permission: &str| permission.ends_with(".read");
        assert!(only_reads.is_granted("contacts.read"));
        assert!(!only_reads.is_granted("contacts.write"));
    }

    #[test]
    fn test_policy_deserializes_from_toml() {
        let policy: PermissionPolicy = toml::from_str(
            r#"
            [[rules]]
            permission = "calendar.*"
            effect = "allow"
            "#,
        )
        .unwrap();
        assert_eq!(policy.rules, vec![PermissionRule::allow("calendar.*")]);
    }
}
