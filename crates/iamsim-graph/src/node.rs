//! Node and edge types of the resource graph.

use iamsim_kernel::{Direction, RelationType, ResourceRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

pub type Attributes = BTreeMap<String, String>;

/// A registered resource: identity plus free-form metadata (arn, path, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub resource: ResourceRef,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Attributes,
}

/// A typed, directed edge. Identity is the whole triple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relationship {
    pub from: ResourceRef,
    pub to: ResourceRef,
    pub relation: RelationType,
}

impl Relationship {
    pub fn new(from: ResourceRef, to: ResourceRef, relation: RelationType) -> Self {
        Self { from, to, relation }
    }

    /// The endpoint that is not `node`, seen from `node` in `direction`.
    pub fn other(&self, direction: Direction) -> &ResourceRef {
        match direction {
            Direction::Outgoing => &self.to,
            Direction::Incoming => &self.from,
        }
    }
}

impl Display for Relationship {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -[{}]-> {}", self.from, self.relation, self.to)
    }
}

/// One adjacency entry: relation plus the far endpoint.
pub(crate) type Adjacent = (RelationType, ResourceRef);

/// Lock-protected state of one node.
#[derive(Debug, Default)]
pub(crate) struct NodeState {
    pub(crate) attributes: Attributes,
    pub(crate) outgoing: BTreeSet<Adjacent>,
    pub(crate) incoming: BTreeSet<Adjacent>,
    /// Set once the node has been unregistered and its slot dropped from
    /// the index. Holders of a retired slot must treat the node as absent.
    pub(crate) retired: bool,
}

impl NodeState {
    pub(crate) fn neighbors(&self) -> BTreeSet<ResourceRef> {
        self.outgoing
            .iter()
            .chain(self.incoming.iter())
            .map(|(_, other)| other.clone())
            .collect()
    }

    pub(crate) fn edges(&self) -> impl Iterator<Item = (Direction, &Adjacent)> {
        self.outgoing
            .iter()
            .map(|adj| (Direction::Outgoing, adj))
            .chain(self.incoming.iter().map(|adj| (Direction::Incoming, adj)))
    }

    pub(crate) fn relationship(
        node: &ResourceRef,
        direction: Direction,
        (relation, other): &Adjacent,
    ) -> Relationship {
        match direction {
            Direction::Outgoing => Relationship::new(node.clone(), other.clone(), relation.clone()),
            Direction::Incoming => Relationship::new(other.clone(), node.clone(), relation.clone()),
        }
    }
}
