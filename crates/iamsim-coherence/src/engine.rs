//! Composition root: one store, one graph, one coordinator.

use crate::coordinator::{ConsistencyCoordinator, Coupled, CoupledError, Divergence};
use crate::error::{EngineError, ErrorClass};
use crate::guard::DeleteGuard;
use iamsim_graph::{Attributes, GraphError, ResourceGraph};
use iamsim_kernel::{
    ConsistencyMode, Direction, EngineConfig, RelationType, ResourceKey, ResourceRef,
};
use dashmap::DashMap;
use iamsim_store::{MissCause, StateStore, StoreError, UpdateError};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, PoisonError};

/// Result of [`Engine::attach`] and [`Engine::detach`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkOutcome {
    /// Whether the edge set changed.
    pub changed: bool,
    /// Attachment counter after the operation.
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divergence: Option<Divergence>,
}

/// An isolated engine instance. Engines share nothing with each other.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    store: Arc<StateStore>,
    graph: Arc<ResourceGraph>,
    coordinator: ConsistencyCoordinator,
    /// One lock per attachment counter; attach/detach on a counter run one at a time.
    links: DashMap<String, Arc<Mutex<()>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let store = Arc::new(StateStore::new());
        let graph = Arc::new(ResourceGraph::from_config(&config.graph));
        Self::with_parts(config, store, graph)
    }

    /// Build around existing components, e.g. a store shared with a
    /// request-handling layer.
    pub fn with_parts(
        config: EngineConfig,
        store: Arc<StateStore>,
        graph: Arc<ResourceGraph>,
    ) -> Self {
        let coordinator = ConsistencyCoordinator::from_config(&config.coordinator);
        Self {
            config,
            store,
            graph,
            coordinator,
            links: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn graph(&self) -> &Arc<ResourceGraph> {
        &self.graph
    }

    pub fn coordinator(&self) -> &ConsistencyCoordinator {
        &self.coordinator
    }

    pub fn error_class(err: &EngineError) -> ErrorClass {
        err.class()
    }

    /// Store key for a resource in the configured namespace.
    pub fn key(&self, kind: &str, name: &str) -> Result<ResourceKey, EngineError> {
        Ok(ResourceRef::new(kind, name)?.key_in(&self.config.store.namespace)?)
    }

    /// Create a resource: its state entry and its graph node, both or neither.
    ///
    /// Fails with [`EngineError::AlreadyExists`] when the state key is taken
    /// or the node is already registered.
    pub fn create_resource<T: Serialize + ?Sized>(
        &self,
        kind: &str,
        name: &str,
        attributes: Attributes,
        state: &T,
    ) -> Result<u64, EngineError> {
        let resource = ResourceRef::new(kind, name)?;
        let key = resource.key_in(&self.config.store.namespace)?;
        if self.graph.is_registered(kind, name) {
            return Err(EngineError::AlreadyExists { resource });
        }
        let label = format!("create {resource}");

        let created = self.coordinator.run_coupled(
            &label,
            ConsistencyMode::Strict,
            || self.store.set_if_version(&key, state, 0),
            || self.graph.register_resource(kind, name, attributes),
            |_| {
                self.store.delete(&key);
                Ok(())
            },
        );

        match created {
            Ok(coupled) => Ok(coupled.value),
            Err(CoupledError::Store {
                source: StoreError::VersionConflict { actual: Some(_), .. },
                ..
            }) => Err(EngineError::AlreadyExists { resource }),
            Err(err) => Err(err.into()),
        }
    }

    /// Add `from -[relation]-> to` and count it under `counter_key`.
    ///
    /// Attaching an existing edge changes nothing.
    pub fn attach(
        &self,
        relation: RelationType,
        from: &ResourceRef,
        to: &ResourceRef,
        counter_key: &str,
        mode: ConsistencyMode,
    ) -> Result<LinkOutcome, EngineError> {
        let link = self.link(counter_key);
        let _serial = link.lock().unwrap_or_else(PoisonError::into_inner);
        if self.graph.has_relationship(from, to, &relation) {
            return Ok(LinkOutcome {
                changed: false,
                count: self.counter(counter_key)?,
                divergence: None,
            });
        }

        let label = format!("attach {from} -[{relation}]-> {to}");
        let inserted = Cell::new(false);
        let coupled = self.coordinator.run_coupled(
            &label,
            mode,
            || self.adjust(counter_key, Adjust::Increment),
            || {
                let added = self.graph.add_relationship(
                    from.kind(),
                    from.name(),
                    to.kind(),
                    to.name(),
                    relation.clone(),
                )?;
                inserted.set(added);
                Ok(())
            },
            |step| self.revert(step, counter_key, Adjust::Decrement),
        )?;

        self.settle(coupled, inserted.get(), counter_key, Adjust::Decrement)
    }

    /// Remove `from -[relation]-> to` and uncount it under `counter_key`.
    ///
    /// The counter saturates at zero. Detaching an absent edge changes nothing.
    pub fn detach(
        &self,
        relation: RelationType,
        from: &ResourceRef,
        to: &ResourceRef,
        counter_key: &str,
        mode: ConsistencyMode,
    ) -> Result<LinkOutcome, EngineError> {
        let link = self.link(counter_key);
        let _serial = link.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.graph.has_relationship(from, to, &relation) {
            return Ok(LinkOutcome {
                changed: false,
                count: self.counter(counter_key)?,
                divergence: None,
            });
        }

        let label = format!("detach {from} -[{relation}]-> {to}");
        let removed = Cell::new(false);
        let coupled = self.coordinator.run_coupled(
            &label,
            mode,
            || self.adjust(counter_key, Adjust::Decrement),
            || {
                let gone = self.graph.remove_relationship(
                    from.kind(),
                    from.name(),
                    to.kind(),
                    to.name(),
                    relation.clone(),
                )?;
                removed.set(gone);
                Ok(())
            },
            |step| self.revert(step, counter_key, Adjust::Increment),
        )?;

        self.settle(coupled, removed.get(), counter_key, Adjust::Increment)
    }

    /// Delete a resource after every protection layer agrees.
    ///
    /// Blocking graph edges are reported first, then `guard` checks in
    /// order. On success the node is unregistered, `cleanup_keys` are
    /// deleted and emptied store slots are compacted; returns how many of
    /// the cleanup keys existed.
    pub fn delete_resource(
        &self,
        kind: &str,
        name: &str,
        guard: &DeleteGuard,
        cleanup_keys: &[String],
    ) -> Result<usize, EngineError> {
        let resource = ResourceRef::new(kind, name)?;
        if !self.graph.is_registered(kind, name) {
            return Err(GraphError::NotFound { resource }.into());
        }

        if let Some(edge) = self.graph.blocking_relationships(kind, name).into_iter().next() {
            let direction = if edge.from == resource {
                Direction::Outgoing
            } else {
                Direction::Incoming
            };
            return Err(GraphError::DeleteConflict {
                other: edge.other(direction).clone(),
                relation: edge.relation,
                direction,
                resource,
            }
            .into());
        }

        if let Some(reason) = guard.first_conflict(&self.store) {
            return Err(EngineError::DeleteConflict {
                resource,
                reason: reason.to_string(),
            });
        }

        // Authoritative: a blocking edge added since the check still wins.
        self.graph.unregister_resource(kind, name)?;

        let removed = cleanup_keys
            .iter()
            .filter(|key| self.store.delete(key.as_str()))
            .count();
        let reclaimed = self.store.compact();
        tracing::debug!(%resource, removed, reclaimed, "resource deleted");
        Ok(removed)
    }

    /// Current value of an attachment counter; absent counts as zero.
    pub fn counter(&self, key: &str) -> Result<u64, EngineError> {
        match self.store.get::<u64>(key) {
            Ok(count) => Ok(count),
            Err(StoreError::NotFound {
                cause: MissCause::Absent,
                ..
            }) => Ok(0),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically add `by` to a counter, returning the new value.
    pub fn increment(&self, key: &str, by: u64) -> Result<u64, EngineError> {
        let updated = self
            .store
            .update::<u64, Infallible, _>(key, |count| {
                *count = count.saturating_add(by);
                Ok(())
            })
            .map_err(store_only)?;
        Ok(updated.value)
    }

    fn link(&self, counter_key: &str) -> Arc<Mutex<()>> {
        self.links
            .entry(counter_key.to_string())
            .or_default()
            .value()
            .clone()
    }

    fn adjust(&self, key: &str, adjust: Adjust) -> Result<Step, StoreError> {
        let applied = Cell::new(false);
        let updated = self
            .store
            .update::<u64, Infallible, _>(key, |count| {
                let next = match adjust {
                    Adjust::Increment => count.checked_add(1),
                    Adjust::Decrement => count.checked_sub(1),
                };
                if let Some(next) = next {
                    *count = next;
                    applied.set(true);
                }
                Ok(())
            })
            .map_err(store_only)?;
        Ok(Step {
            count: updated.value,
            applied: applied.get(),
        })
    }

    /// Inverse of a counter step. A step that saturated has nothing to undo.
    fn revert(&self, step: &Step, counter_key: &str, adjust: Adjust) -> Result<(), StoreError> {
        if step.applied {
            self.adjust(counter_key, adjust)?;
        }
        Ok(())
    }

    /// Undo the counter change when the edge change turned out to be a no-op,
    /// e.g. after a direct graph mutation raced with this call.
    fn settle(
        &self,
        coupled: Coupled<Step>,
        changed: bool,
        counter_key: &str,
        revert: Adjust,
    ) -> Result<LinkOutcome, EngineError> {
        let Coupled {
            value: step,
            divergence,
        } = coupled;
        if divergence.is_some() || changed || !step.applied {
            return Ok(LinkOutcome {
                changed,
                count: step.count,
                divergence,
            });
        }
        let count = self.adjust(counter_key, revert)?.count;
        Ok(LinkOutcome {
            changed: false,
            count,
            divergence: None,
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum Adjust {
    Increment,
    Decrement,
}

/// A counter step and whether it moved the counter.
#[derive(Debug, Clone, Copy)]
struct Step {
    count: u64,
    applied: bool,
}

fn store_only(err: UpdateError<Infallible>) -> StoreError {
    match err {
        UpdateError::Store(err) => err,
        UpdateError::Mutation(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        let engine = Engine::default();
        for (kind, name) in [("policy", "P1"), ("user", "U1")] {
            engine
                .graph()
                .register_resource(kind, name, Attributes::new())
                .expect("register");
        }
        engine
    }

    fn refs() -> (ResourceRef, ResourceRef) {
        (
            ResourceRef::new("policy", "P1").expect("ref"),
            ResourceRef::new("user", "U1").expect("ref"),
        )
    }

    #[test]
    fn create_resource_rejects_duplicates() {
        let engine = Engine::default();
        let version = engine
            .create_resource("role", "admin", Attributes::new(), &serde_json::json!({}))
            .expect("create");
        assert!(version > 0);
        assert!(engine.graph().is_registered("role", "admin"));

        let err = engine
            .create_resource("role", "admin", Attributes::new(), &serde_json::json!({}))
            .expect_err("duplicate");
        assert_eq!(err.class(), ErrorClass::EntityAlreadyExists);
    }

    #[test]
    fn create_resource_validates_identity_before_writing() {
        let engine = Engine::default();
        let err = engine
            .create_resource("role", " ", Attributes::new(), &1u8)
            .expect_err("blank name");
        assert_eq!(err.class(), ErrorClass::InvalidInput);
        assert!(engine.store().is_empty());
    }

    #[test]
    fn repeated_attach_counts_once() {
        let engine = engine();
        let (policy, user) = refs();

        let first = engine
            .attach(
                RelationType::AssociatedWith,
                &policy,
                &user,
                "iam:attachments:P1",
                ConsistencyMode::Strict,
            )
            .expect("attach");
        let second = engine
            .attach(
                RelationType::AssociatedWith,
                &policy,
                &user,
                "iam:attachments:P1",
                ConsistencyMode::Strict,
            )
            .expect("attach again");

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(second.count, 1);
    }

    #[test]
    fn detach_of_absent_edge_keeps_counter() {
        let engine = engine();
        let (policy, user) = refs();
        let outcome = engine
            .detach(
                RelationType::AssociatedWith,
                &policy,
                &user,
                "iam:attachments:P1",
                ConsistencyMode::Lenient,
            )
            .expect("detach");
        assert!(!outcome.changed);
        assert_eq!(outcome.count, 0);
        assert!(!engine.store().exists("iam:attachments:P1"));
    }

    #[test]
    fn detach_of_uncounted_edge_does_not_underflow() {
        let engine = engine();
        let (policy, user) = refs();
        engine
            .graph()
            .add_relationship("policy", "P1", "user", "U1", RelationType::AssociatedWith)
            .expect("relate directly");

        let detached = engine
            .detach(
                RelationType::AssociatedWith,
                &policy,
                &user,
                "iam:attachments:P1",
                ConsistencyMode::Strict,
            )
            .expect("detach");
        assert!(detached.changed);
        assert_eq!(detached.count, 0);

        let attached = engine
            .attach(
                RelationType::AssociatedWith,
                &policy,
                &user,
                "iam:attachments:P1",
                ConsistencyMode::Strict,
            )
            .expect("attach");
        assert_eq!(attached.count, 1);
    }

    #[test]
    fn delete_resource_reports_blocking_edge_before_guard() {
        let engine = engine();
        let (policy, user) = refs();
        engine
            .attach(
                RelationType::AssociatedWith,
                &policy,
                &user,
                "iam:attachments:P1",
                ConsistencyMode::Strict,
            )
            .expect("attach");
        let guard = DeleteGuard::new().check("always", |_| true);

        let err = engine
            .delete_resource("policy", "P1", &guard, &[])
            .expect_err("blocked");
        assert!(matches!(
            err,
            EngineError::Graph(GraphError::DeleteConflict {
                direction: Direction::Outgoing,
                ..
            })
        ));
    }

    #[test]
    fn delete_resource_cleans_up_state() {
        let engine = engine();
        let first = engine.store().set("iam:user:U1", &"state").expect("set");
        engine.store().set("iam:login-profile:U1", &true).expect("set");
        let guard = DeleteGuard::new().key_exists("login-profile", "iam:login-profile:U1");

        let err = engine
            .delete_resource("user", "U1", &guard, &[])
            .expect_err("login profile blocks");
        assert!(matches!(err, EngineError::DeleteConflict { ref reason, .. } if reason == "login-profile"));

        engine.store().delete("iam:login-profile:U1");
        let removed = engine
            .delete_resource(
                "user",
                "U1",
                &guard,
                &["iam:user:U1".to_string(), "iam:missing".to_string()],
            )
            .expect("delete");
        assert_eq!(removed, 1);
        assert!(!engine.graph().is_registered("user", "U1"));
        assert_eq!(engine.store().version("iam:user:U1"), None);
        let again = engine.store().set("iam:user:U1", &"state").expect("set after compaction");
        assert!(again > first);

        let err = engine
            .delete_resource("user", "U1", &guard, &[])
            .expect_err("already gone");
        assert_eq!(Engine::error_class(&err), ErrorClass::NoSuchEntity);
    }
}
