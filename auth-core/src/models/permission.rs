//! Permission model - `resource:action` strings with `resource:*` wildcards.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::services::error::AuthError;

static PERMISSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z][a-z0-9_-]{0,63}:([a-z][a-z0-9_-]{0,63}|\*)$")
        .expect("permission pattern is a valid regex")
});

/// A single permission, e.g. `project:read` or `project:*`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission(String);

impl Permission {
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let raw = raw.trim();
        if PERMISSION_RE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(AuthError::Validation(format!(
                "invalid permission '{}', expected resource:action",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn resource(&self) -> &str {
        self.0.split_once(':').map(|(r, _)| r).unwrap_or(&self.0)
    }

    pub fn action(&self) -> &str {
        self.0.split_once(':').map(|(_, a)| a).unwrap_or("")
    }

    pub fn is_wildcard(&self) -> bool {
        self.action() == "*"
    }

    /// True when holding `self` grants `requested`.
    pub fn grants(&self, requested: &Permission) -> bool {
        self == requested || (self.is_wildcard() && self.resource() == requested.resource())
    }
}

impl FromStr for Permission {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::parse(s)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Permission {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Permission::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a list of raw strings, failing on the first invalid entry.
pub fn parse_permissions<I, S>(raw: I) -> Result<BTreeSet<Permission>, AuthError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    raw.into_iter().map(|p| Permission::parse(p.as_ref())).collect()
}

/// Effective permissions of a principal (or scopes of an API key).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet {
    all: bool,
    permissions: BTreeSet<Permission>,
}

impl PermissionSet {
    pub fn new(permissions: BTreeSet<Permission>) -> Self {
        Self {
            all: false,
            permissions,
        }
    }

    /// Grants every permission in every tenant (superadmin).
    pub fn unrestricted() -> Self {
        Self {
            all: true,
            permissions: BTreeSet::new(),
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        self.all
    }

    pub fn extend<'a>(&mut self, permissions: impl IntoIterator<Item = &'a Permission>) {
        self.permissions.extend(permissions.into_iter().cloned());
    }

    pub fn covers(&self, requested: &Permission) -> bool {
        self.all || self.permissions.iter().any(|held| held.grants(requested))
    }

    pub fn covers_all<'a>(&self, requested: impl IntoIterator<Item = &'a Permission>) -> bool {
        requested.into_iter().all(|p| self.covers(p))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.iter()
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.permissions.is_empty()
    }
}
