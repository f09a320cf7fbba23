//! Resource identities and typed store keys.
//!
//! Store keys are encoded as `namespace:kind:name`. Every component escapes
//! `%` and `:` before joining, so the encoding is injective and a
//! `KeyPrefix` for one kind can never match keys of another kind.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

const SEPARATOR: char = ':';

/// Errors raised while building or parsing identities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("resource {field} must not be empty")]
    Empty { field: &'static str },

    #[error("malformed resource key `{key}`: {reason}")]
    MalformedKey { key: String, reason: String },
}

fn require(field: &'static str, value: &str) -> Result<String, IdentityError> {
    if value.trim().is_empty() {
        return Err(IdentityError::Empty { field });
    }
    Ok(value.to_string())
}

/// Identity of a graph node: `(kind, name)`, unique across the graph.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawResourceRef", into = "RawResourceRef")]
pub struct ResourceRef {
    kind: String,
    name: String,
}

#[derive(Serialize, Deserialize)]
struct RawResourceRef {
    kind: String,
    name: String,
}

impl TryFrom<RawResourceRef> for ResourceRef {
    type Error = IdentityError;

    fn try_from(raw: RawResourceRef) -> Result<Self, Self::Error> {
        Self::new(&raw.kind, &raw.name)
    }
}

impl From<ResourceRef> for RawResourceRef {
    fn from(value: ResourceRef) -> Self {
        Self {
            kind: value.kind,
            name: value.name,
        }
    }
}

impl ResourceRef {
    /// Build a validated identity. Both components must be non-blank.
    pub fn new(kind: &str, name: &str) -> Result<Self, IdentityError> {
        Ok(Self {
            kind: require("kind", kind)?,
            name: require("name", name)?,
        })
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store key for this resource under `namespace`.
    pub fn key_in(&self, namespace: &str) -> Result<ResourceKey, IdentityError> {
        ResourceKey::new(namespace, &self.kind, &self.name)
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Typed store key: `(namespace, kind, name)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceKey {
    namespace: String,
    kind: String,
    name: String,
    encoded: String,
}

impl ResourceKey {
    pub fn new(namespace: &str, kind: &str, name: &str) -> Result<Self, IdentityError> {
        let namespace = require("namespace", namespace)?;
        let kind = require("kind", kind)?;
        let name = require("name", name)?;
        let encoded = format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}",
            escape(&namespace),
            escape(&kind),
            escape(&name)
        );
        Ok(Self {
            namespace,
            kind,
            name,
            encoded,
        })
    }

    /// Decode an encoded key produced by [`ResourceKey::as_str`].
    pub fn parse(encoded: &str) -> Result<Self, IdentityError> {
        let malformed = |reason: &str| IdentityError::MalformedKey {
            key: encoded.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
        let [namespace, kind, name] = parts.as_slice() else {
            return Err(malformed("expected exactly three components"));
        };

        let namespace = unescape(namespace).ok_or_else(|| malformed("bad escape in namespace"))?;
        let kind = unescape(kind).ok_or_else(|| malformed("bad escape in kind"))?;
        let name = unescape(name).ok_or_else(|| malformed("bad escape in name"))?;
        Self::new(&namespace, &kind, &name)
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }
}

impl AsRef<str> for ResourceKey {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.encoded)
    }
}

/// Literal key prefix for `list` scans.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct KeyPrefix {
    encoded: String,
}

impl KeyPrefix {
    /// Matches every key.
    pub fn all() -> Self {
        Self {
            encoded: String::new(),
        }
    }

    /// Matches every key in `namespace`.
    pub fn namespace(namespace: &str) -> Result<Self, IdentityError> {
        let namespace = require("namespace", namespace)?;
        Ok(Self {
            encoded: format!("{}{SEPARATOR}", escape(&namespace)),
        })
    }

    /// Matches every key of `kind` in `namespace`, and no other kind.
    pub fn kind(namespace: &str, kind: &str) -> Result<Self, IdentityError> {
        let namespace = require("namespace", namespace)?;
        let kind = require("kind", kind)?;
        Ok(Self {
            encoded: format!("{}{SEPARATOR}{}{SEPARATOR}", escape(&namespace), escape(&kind)),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn matches(&self, key: &str) -> bool {
        key.starts_with(&self.encoded)
    }
}

impl AsRef<str> for KeyPrefix {
    fn as_ref(&self) -> &str {
        &self.encoded
    }
}

fn escape(component: &str) -> String {
    let mut out = String::with_capacity(component.len());
    for ch in component.chars() {
        match ch {
            '%' => out.push_str("%25"),
            SEPARATOR => out.push_str("%3A"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(component: &str) -> Option<String> {
    let mut out = String::with_capacity(component.len());
    let mut rest = component;
    while let Some(idx) = rest.find('%') {
        out.push_str(&rest[..idx]);
        let code = rest.get(idx + 1..idx + 3)?;
        match code {
            "25" => out.push('%'),
            "3A" => out.push(SEPARATOR),
            _ => return None,
        }
        rest = &rest[idx + 3..];
    }
    out.push_str(rest);
    Some(out)
}
