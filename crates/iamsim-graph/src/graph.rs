//! Process-lifetime resource graph.
//!
//! Each node owns a lock slot holding its attributes and both adjacency
//! sets. A mutation locks every node it touches in `ResourceRef` order, so
//! multi-node operations never deadlock and operations on disjoint nodes
//! proceed in parallel.

use crate::error::GraphError;
use crate::node::{Adjacent, Attributes, NodeState, Relationship, ResourceNode};
use dashmap::DashMap;
use iamsim_kernel::{Direction, GraphConfig, RelationCatalog, RelationType, ResourceRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type NodeSlot = Arc<Mutex<NodeState>>;

fn lock(slot: &Mutex<NodeState>) -> MutexGuard<'_, NodeState> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

fn not_found(resource: &ResourceRef) -> GraphError {
    GraphError::NotFound {
        resource: resource.clone(),
    }
}

/// Guards over a set of node slots, acquired in canonical order.
struct LockSet<'a> {
    guards: BTreeMap<ResourceRef, MutexGuard<'a, NodeState>>,
}

impl<'a> LockSet<'a> {
    /// `slots` must be sorted by id and free of duplicates.
    fn acquire(slots: &'a [(ResourceRef, NodeSlot)]) -> Self {
        let guards = slots
            .iter()
            .map(|(id, slot)| (id.clone(), lock(slot)))
            .collect();
        Self { guards }
    }

    fn any_retired(&self) -> bool {
        self.guards.values().any(|guard| guard.retired)
    }

    fn get(&self, id: &ResourceRef) -> Option<&NodeState> {
        self.guards.get(id).map(|guard| &**guard)
    }

    fn get_mut(&mut self, id: &ResourceRef) -> Option<&mut NodeState> {
        self.guards.get_mut(id).map(|guard| &mut **guard)
    }
}

/// Registry of resource nodes and typed edges between them.
///
/// Deletion protection is declared per relation type in the
/// [`RelationCatalog`]; the graph never special-cases resource kinds.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    nodes: DashMap<ResourceRef, NodeSlot>,
    catalog: RelationCatalog,
    allow_force_delete: bool,
    injected_add_failures: AtomicUsize,
}

impl ResourceGraph {
    pub fn new(catalog: RelationCatalog) -> Self {
        Self {
            catalog,
            ..Self::default()
        }
    }

    pub fn from_config(config: &GraphConfig) -> Self {
        Self::new(config.catalog()).with_force_delete(config.allow_force_delete)
    }

    pub fn with_force_delete(mut self, allow: bool) -> Self {
        self.allow_force_delete = allow;
        self
    }

    pub fn catalog(&self) -> &RelationCatalog {
        &self.catalog
    }

    pub fn is_blocking(&self, relation: &RelationType) -> bool {
        self.catalog.is_blocking(relation)
    }

    /// Make the next `count` calls to [`ResourceGraph::add_relationship`]
    /// fail with [`GraphError::Injected`].
    pub fn inject_add_failures(&self, count: usize) {
        self.injected_add_failures.store(count, Ordering::SeqCst);
    }

    fn take_injected_failure(&self) -> bool {
        self.injected_add_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn existing(&self, id: &ResourceRef) -> Option<NodeSlot> {
        self.nodes.get(id).map(|slot| Arc::clone(slot.value()))
    }

    fn read<R>(
        &self,
        kind: &str,
        name: &str,
        view: impl FnOnce(&ResourceRef, &NodeState) -> R,
    ) -> Option<R> {
        let id = ResourceRef::new(kind, name).ok()?;
        let slot = self.existing(&id)?;
        let guard = lock(&slot);
        if guard.retired {
            return None;
        }
        Some(view(&id, &*guard))
    }

    /// Idempotent upsert. Re-registration replaces the attributes and keeps
    /// existing edges.
    pub fn register_resource(
        &self,
        kind: &str,
        name: &str,
        attributes: Attributes,
    ) -> Result<(), GraphError> {
        let id = ResourceRef::new(kind, name)?;
        loop {
            let slot = Arc::clone(self.nodes.entry(id.clone()).or_default().value());
            let mut guard = lock(&slot);
            if guard.retired {
                // Unregistered between lookup and lock; its slot is already
                // gone from the index, so the next lookup creates a fresh one.
                continue;
            }
            guard.attributes = attributes;
            drop(guard);

            tracing::debug!(resource = %id, "resource registered");
            return Ok(());
        }
    }

    /// Remove a node that no blocking relationship touches.
    ///
    /// Non-blocking edges are removed with the node in the same critical
    /// section. Fails with `DeleteConflict` (first blocking edge, outgoing
    /// before incoming) or `NotFound`.
    pub fn unregister_resource(&self, kind: &str, name: &str) -> Result<(), GraphError> {
        let id = ResourceRef::new(kind, name)?;
        self.remove_node(&id, false).map(|_| ())
    }

    /// Remove a node and every edge touching it, blocking or not.
    ///
    /// Returns the removed edges. Requires a graph built with force delete
    /// enabled.
    pub fn force_unregister_resource(
        &self,
        kind: &str,
        name: &str,
    ) -> Result<Vec<Relationship>, GraphError> {
        let id = ResourceRef::new(kind, name)?;
        if !self.allow_force_delete {
            return Err(GraphError::ForceDeleteDisabled { resource: id });
        }
        self.remove_node(&id, true)
    }

    fn remove_node(&self, id: &ResourceRef, force: bool) -> Result<Vec<Relationship>, GraphError> {
        loop {
            let slot = self.existing(id).ok_or_else(|| not_found(id))?;
            let neighbors = {
                let guard = lock(&slot);
                if guard.retired {
                    continue;
                }
                guard.neighbors()
            };

            let mut slots = vec![(id.clone(), Arc::clone(&slot))];
            let mut complete = true;
            for neighbor in neighbors.iter().filter(|neighbor| *neighbor != id) {
                match self.existing(neighbor) {
                    Some(neighbor_slot) => slots.push((neighbor.clone(), neighbor_slot)),
                    None => {
                        complete = false;
                        break;
                    }
                }
            }
            if !complete {
                continue;
            }
            slots.sort_by(|a, b| a.0.cmp(&b.0));

            let mut locks = LockSet::acquire(&slots);
            if locks.any_retired() {
                continue;
            }
            let Some(node) = locks.get(id) else {
                continue;
            };
            if node.neighbors() != neighbors {
                // An edge was added or removed between snapshot and lock.
                continue;
            }

            if !force
                && let Some((direction, (relation, other))) = node
                    .edges()
                    .find(|(_, (relation, _))| self.is_blocking(relation))
            {
                return Err(GraphError::DeleteConflict {
                    resource: id.clone(),
                    relation: relation.clone(),
                    other: other.clone(),
                    direction,
                });
            }

            let edges: Vec<(Direction, Adjacent)> = node
                .edges()
                .map(|(direction, adjacent)| (direction, adjacent.clone()))
                .collect();

            let mut removed = Vec::with_capacity(edges.len());
            for (direction, adjacent) in edges {
                let is_self_edge = &adjacent.1 == id;
                // A self edge sits in both sets; report it once.
                if !(is_self_edge && direction == Direction::Incoming) {
                    removed.push(NodeState::relationship(id, direction, &adjacent));
                }
                if is_self_edge {
                    continue;
                }
                let (relation, other) = adjacent;
                if let Some(neighbor) = locks.get_mut(&other) {
                    let back = (relation, id.clone());
                    match direction {
                        Direction::Outgoing => neighbor.incoming.remove(&back),
                        Direction::Incoming => neighbor.outgoing.remove(&back),
                    };
                }
            }

            if let Some(node) = locks.get_mut(id) {
                node.outgoing.clear();
                node.incoming.clear();
                node.retired = true;
            }
            self.nodes
                .remove_if(id, |_, current| Arc::ptr_eq(current, &slot));
            drop(locks);

            tracing::debug!(
                resource = %id,
                force,
                edges_removed = removed.len(),
                "resource unregistered"
            );
            return Ok(removed);
        }
    }

    /// Run `apply` with both endpoints locked. Fails with `NotFound` if
    /// either endpoint is not registered.
    fn with_endpoints<R>(
        &self,
        from: &ResourceRef,
        to: &ResourceRef,
        mut apply: impl FnMut(&mut LockSet<'_>) -> R,
    ) -> Result<R, GraphError> {
        loop {
            let from_slot = self.existing(from).ok_or_else(|| not_found(from))?;
            let to_slot = self.existing(to).ok_or_else(|| not_found(to))?;

            let mut slots = vec![(from.clone(), from_slot)];
            if from != to {
                slots.push((to.clone(), to_slot));
            }
            slots.sort_by(|a, b| a.0.cmp(&b.0));

            let mut locks = LockSet::acquire(&slots);
            if locks.any_retired() {
                continue;
            }
            return Ok(apply(&mut locks));
        }
    }

    /// Add an edge between two registered nodes.
    ///
    /// Idempotent; returns whether a new edge was inserted.
    pub fn add_relationship(
        &self,
        from_kind: &str,
        from_name: &str,
        to_kind: &str,
        to_name: &str,
        relation: RelationType,
    ) -> Result<bool, GraphError> {
        let from = ResourceRef::new(from_kind, from_name)?;
        let to = ResourceRef::new(to_kind, to_name)?;
        if self.take_injected_failure() {
            return Err(GraphError::Injected {
                operation: "add_relationship",
            });
        }

        let inserted = self.with_endpoints(&from, &to, |locks| {
            let inserted = locks
                .get_mut(&from)
                .is_some_and(|node| node.outgoing.insert((relation.clone(), to.clone())));
            if let Some(node) = locks.get_mut(&to) {
                node.incoming.insert((relation.clone(), from.clone()));
            }
            inserted
        })?;

        if inserted {
            tracing::debug!(%from, %to, %relation, "relationship added");
        }
        Ok(inserted)
    }

    /// Remove an edge. Idempotent; returns whether an edge was removed.
    pub fn remove_relationship(
        &self,
        from_kind: &str,
        from_name: &str,
        to_kind: &str,
        to_name: &str,
        relation: RelationType,
    ) -> Result<bool, GraphError> {
        let from = ResourceRef::new(from_kind, from_name)?;
        let to = ResourceRef::new(to_kind, to_name)?;

        let outcome = self.with_endpoints(&from, &to, |locks| {
            let removed = locks
                .get_mut(&from)
                .is_some_and(|node| node.outgoing.remove(&(relation.clone(), to.clone())));
            if let Some(node) = locks.get_mut(&to) {
                node.incoming.remove(&(relation.clone(), from.clone()));
            }
            removed
        });

        match outcome {
            Ok(true) => {
                tracing::debug!(%from, %to, %relation, "relationship removed");
                Ok(true)
            }
            Ok(false) => Ok(false),
            // Edges never outlive their endpoints, so there is nothing to remove.
            Err(GraphError::NotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    pub fn is_registered(&self, kind: &str, name: &str) -> bool {
        self.read(kind, name, |_, _| ()).is_some()
    }

    pub fn resource(&self, kind: &str, name: &str) -> Option<ResourceNode> {
        self.read(kind, name, |id, node| ResourceNode {
            resource: id.clone(),
            attributes: node.attributes.clone(),
        })
    }

    /// All registered nodes of `kind`, sorted by name.
    pub fn resources_of_kind(&self, kind: &str) -> Vec<ResourceNode> {
        let slots: Vec<(ResourceRef, NodeSlot)> = self
            .nodes
            .iter()
            .filter(|item| item.key().kind() == kind)
            .map(|item| (item.key().clone(), Arc::clone(item.value())))
            .collect();

        let mut nodes: Vec<ResourceNode> = slots
            .into_iter()
            .filter_map(|(id, slot)| {
                let guard = lock(&slot);
                (!guard.retired).then(|| ResourceNode {
                    resource: id.clone(),
                    attributes: guard.attributes.clone(),
                })
            })
            .collect();
        nodes.sort_by(|a, b| a.resource.cmp(&b.resource));
        nodes
    }

    /// Outgoing edges of a node.
    pub fn relationships_of(&self, kind: &str, name: &str) -> Vec<Relationship> {
        self.read(kind, name, |id, node| {
            node.outgoing
                .iter()
                .map(|adjacent| NodeState::relationship(id, Direction::Outgoing, adjacent))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Incoming edges of a node.
    pub fn dependents_of(&self, kind: &str, name: &str) -> Vec<Relationship> {
        self.read(kind, name, |id, node| {
            node.incoming
                .iter()
                .map(|adjacent| NodeState::relationship(id, Direction::Incoming, adjacent))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Far endpoints of `relation` edges in `direction`.
    pub fn related(
        &self,
        kind: &str,
        name: &str,
        relation: &RelationType,
        direction: Direction,
    ) -> Vec<ResourceRef> {
        self.read(kind, name, |_, node| {
            let edges = match direction {
                Direction::Outgoing => &node.outgoing,
                Direction::Incoming => &node.incoming,
            };
            edges
                .iter()
                .filter(|(rel, _)| rel == relation)
                .map(|(_, other)| other.clone())
                .collect()
        })
        .unwrap_or_default()
    }

    pub fn has_relationship(
        &self,
        from: &ResourceRef,
        to: &ResourceRef,
        relation: &RelationType,
    ) -> bool {
        self.read(from.kind(), from.name(), |_, node| {
            node.outgoing.contains(&(relation.clone(), to.clone()))
        })
        .unwrap_or(false)
    }

    /// Blocking edges touching a node, outgoing first.
    pub fn blocking_relationships(&self, kind: &str, name: &str) -> Vec<Relationship> {
        self.read(kind, name, |id, node| {
            node.edges()
                .filter(|(_, (relation, _))| self.is_blocking(relation))
                .map(|(direction, adjacent)| NodeState::relationship(id, direction, adjacent))
                .collect()
        })
        .unwrap_or_default()
    }

    /// Read-only pre-check for `unregister_resource`.
    pub fn has_blocking_dependents(&self, kind: &str, name: &str) -> bool {
        self.read(kind, name, |_, node| {
            node.edges()
                .any(|(_, (relation, _))| self.is_blocking(relation))
        })
        .unwrap_or(false)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of edges. Not a consistent snapshot under concurrent writes.
    pub fn edge_count(&self) -> usize {
        let slots: Vec<NodeSlot> = self
            .nodes
            .iter()
            .map(|item| Arc::clone(item.value()))
            .collect();
        slots
            .iter()
            .map(|slot| {
                let guard = lock(slot);
                if guard.retired { 0 } else { guard.outgoing.len() }
            })
            .sum()
    }

    /// Distinct resource kinds currently registered, sorted.
    pub fn kinds(&self) -> BTreeSet<String> {
        self.nodes
            .iter()
            .map(|item| item.key().kind().to_string())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> ResourceGraph {
        let graph = ResourceGraph::new(RelationCatalog::new());
        for (kind, name) in [("policy", "P1"), ("user", "U1"), ("group", "G1")] {
            graph
                .register_resource(kind, name, Attributes::new())
                .expect("register");
        }
        graph
    }

    #[test]
    fn register_rejects_blank_identity() {
        let graph = ResourceGraph::default();
        let err = graph
            .register_resource("", "x", Attributes::new())
            .expect_err("blank kind");
        assert!(matches!(err, GraphError::InvalidIdentity(_)));
    }

    #[test]
    fn reregistration_replaces_attributes_and_keeps_edges() {
        let graph = graph();
        graph
            .add_relationship("policy", "P1", "user", "U1", RelationType::AssociatedWith)
            .expect("add");

        let attrs = Attributes::from([("path".to_string(), "/eng/".to_string())]);
        graph
            .register_resource("user", "U1", attrs.clone())
            .expect("re-register");

        let node = graph.resource("user", "U1").expect("node");
        assert_eq!(node.attributes, attrs);
        assert_eq!(graph.dependents_of("user", "U1").len(), 1);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn add_requires_registered_endpoints() {
        let graph = graph();
        let err = graph
            .add_relationship("policy", "P1", "role", "missing", RelationType::AttachedTo)
            .expect_err("missing endpoint");
        assert!(matches!(
            err,
            GraphError::NotFound { ref resource } if resource.name() == "missing"
        ));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn delete_conflict_names_relation_and_other_endpoint() {
        let graph = graph();
        graph
            .add_relationship("user", "U1", "group", "G1", RelationType::MemberOf)
            .expect("add");

        let err = graph
            .unregister_resource("group", "G1")
            .expect_err("member blocks group delete");
        let GraphError::DeleteConflict {
            resource,
            relation,
            other,
            direction,
        } = err
        else {
            panic!("expected DeleteConflict");
        };
        assert_eq!(resource.to_string(), "group/G1");
        assert_eq!(relation, RelationType::MemberOf);
        assert_eq!(other.to_string(), "user/U1");
        assert_eq!(direction, Direction::Incoming);
        assert!(graph.is_registered("group", "G1"));
    }

    #[test]
    fn unregister_sweeps_non_blocking_edges() {
        let graph = graph();
        graph
            .add_relationship("user", "U1", "policy", "P1", RelationType::References)
            .expect("add");

        assert!(!graph.has_blocking_dependents("policy", "P1"));
        graph.unregister_resource("policy", "P1").expect("unregister");

        assert!(!graph.is_registered("policy", "P1"));
        assert!(graph.relationships_of("user", "U1").is_empty());
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn unregister_of_absent_node_is_not_found() {
        let graph = graph();
        let err = graph
            .unregister_resource("role", "ghost")
            .expect_err("absent node");
        assert!(err.is_not_found());
    }

    #[test]
    fn force_delete_is_gated_and_returns_removed_edges() {
        let graph = graph();
        graph
            .add_relationship("policy", "P1", "user", "U1", RelationType::AssociatedWith)
            .expect("add");

        let err = graph
            .force_unregister_resource("policy", "P1")
            .expect_err("disabled by default");
        assert!(matches!(err, GraphError::ForceDeleteDisabled { .. }));

        let graph = graph.with_force_delete(true);
        let removed = graph
            .force_unregister_resource("policy", "P1")
            .expect("force delete");
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].to.to_string(), "user/U1");
        assert!(graph.dependents_of("user", "U1").is_empty());
    }

    #[test]
    fn self_edges_are_tracked_once_and_block_deletion() {
        let graph = graph();
        graph
            .add_relationship("group", "G1", "group", "G1", RelationType::ContainedIn)
            .expect("self edge");
        assert_eq!(graph.edge_count(), 1);
        assert!(graph.unregister_resource("group", "G1").is_err());

        graph
            .remove_relationship("group", "G1", "group", "G1", RelationType::ContainedIn)
            .expect("remove");
        graph.unregister_resource("group", "G1").expect("unregister");
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let graph = graph();
        graph.inject_add_failures(1);
        let err = graph
            .add_relationship("policy", "P1", "user", "U1", RelationType::AssociatedWith)
            .expect_err("injected");
        assert!(matches!(err, GraphError::Injected { .. }));
        assert!(
            graph
                .add_relationship("policy", "P1", "user", "U1", RelationType::AssociatedWith)
                .expect("second call succeeds")
        );
    }

    #[test]
    fn related_filters_by_relation_and_direction() {
        let graph = graph();
        graph
            .add_relationship("policy", "P1", "user", "U1", RelationType::AssociatedWith)
            .expect("add");
        graph
            .add_relationship("policy", "P1", "group", "G1", RelationType::AssociatedWith)
            .expect("add");
        graph
            .add_relationship("policy", "P1", "group", "G1", RelationType::References)
            .expect("add");

        let targets =
            graph.related("policy", "P1", &RelationType::AssociatedWith, Direction::Outgoing);
        let names: Vec<String> = targets.iter().map(ToString::to_string).collect();
        assert_eq!(names, vec!["group/G1", "user/U1"]);
        assert_eq!(graph.blocking_relationships("policy", "P1").len(), 2);
        assert_eq!(
            graph.kinds().into_iter().collect::<Vec<_>>(),
            vec!["group", "policy", "user"]
        );
    }
}
