//! Relation types: typed edges in the resource graph.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Relation type classification.
///
/// The set is open: any string that is not one of the well-known names
/// parses as `Custom`. Whether a relation blocks deletion is decided by a
/// [`RelationCatalog`], never by the resource kinds it connects.
///
/// Identity is the name: `Custom("member-of")` and `MemberOf` are the same
/// relation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RelationType {
    /// Policy associated with a principal (user, role, group).
    AssociatedWith,
    /// Generic attachment, e.g. a permissions boundary.
    AttachedTo,
    /// Containment, e.g. a role inside an instance profile.
    ContainedIn,
    /// Membership, e.g. a user in a group.
    MemberOf,
    /// Informational back-reference.
    References,
    Custom(String),
}

impl RelationType {
    /// Relation by name, resolving well-known names to their variant.
    pub fn custom(name: impl Into<String>) -> Self {
        Self::from(name.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            RelationType::AssociatedWith => "associated-with",
            RelationType::AttachedTo => "attached-to",
            RelationType::ContainedIn => "contained-in",
            RelationType::MemberOf => "member-of",
            RelationType::References => "references",
            RelationType::Custom(name) => name,
        }
    }

    /// Blocking classification used when no catalog override exists.
    pub fn default_blocking(&self) -> bool {
        matches!(
            self.as_str(),
            "associated-with" | "attached-to" | "contained-in" | "member-of"
        )
    }
}

impl PartialEq for RelationType {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl Eq for RelationType {}

impl PartialOrd for RelationType {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RelationType {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl Hash for RelationType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl FromStr for RelationType {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "associated-with" => RelationType::AssociatedWith,
            "attached-to" => RelationType::AttachedTo,
            "contained-in" => RelationType::ContainedIn,
            "member-of" => RelationType::MemberOf,
            "references" => RelationType::References,
            other => RelationType::Custom(other.to_string()),
        })
    }
}

impl From<String> for RelationType {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(relation) => relation,
            Err(never) => match never {},
        }
    }
}

impl From<RelationType> for String {
    fn from(value: RelationType) -> Self {
        match value {
            RelationType::Custom(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl Display for RelationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge direction relative to a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative blocking table, one entry per relation type.
///
/// Relation types without an entry fall back to
/// [`RelationType::default_blocking`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationCatalog {
    overrides: BTreeMap<RelationType, bool>,
}

impl RelationCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style override.
    pub fn with(mut self, relation: RelationType, blocking: bool) -> Self {
        self.set(relation, blocking);
        self
    }

    pub fn set(&mut self, relation: RelationType, blocking: bool) {
        self.overrides.insert(relation, blocking);
    }

    pub fn is_blocking(&self, relation: &RelationType) -> bool {
        self.overrides
            .get(relation)
            .copied()
            .unwrap_or_else(|| relation.default_blocking())
    }

    /// Explicit overrides in deterministic order.
    pub fn overrides(&self) -> impl Iterator<Item = (&RelationType, bool)> {
        self.overrides.iter().map(|(relation, blocking)| (relation, *blocking))
    }
}
