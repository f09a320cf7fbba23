//! Layered delete protection beyond graph edges.

use iamsim_store::StateStore;
use std::fmt::{Debug, Formatter};

type Check = Box<dyn Fn(&StateStore) -> bool + Send + Sync>;

/// Named store lookups that each may veto a delete.
///
/// The graph's blocking relations are always evaluated before these
/// checks; see [`crate::Engine::delete_resource`].
#[derive(Default)]
pub struct DeleteGuard {
    checks: Vec<(String, Check)>,
}

impl DeleteGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check. `has_dependent` returns true when the delete must fail.
    pub fn check<F>(mut self, reason: impl Into<String>, has_dependent: F) -> Self
    where
        F: Fn(&StateStore) -> bool + Send + Sync + 'static,
    {
        self.checks.push((reason.into(), Box::new(has_dependent)));
        self
    }

    /// Reject while `key` is present in the store.
    pub fn key_exists(self, reason: impl Into<String>, key: impl Into<String>) -> Self {
        let key = key.into();
        self.check(reason, move |store| store.exists(&key))
    }

    /// Reason of the first check that reports a dependent, in insertion order.
    pub fn first_conflict(&self, store: &StateStore) -> Option<&str> {
        self.checks
            .iter()
            .find(|(_, has_dependent)| has_dependent(store))
            .map(|(reason, _)| reason.as_str())
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}

impl Debug for DeleteGuard {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.checks.iter().map(|(reason, _)| reason))
            .finish()
    }
}
