//! Graph error types.

use iamsim_kernel::{Direction, IdentityError, RelationType, ResourceRef};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("invalid resource identity: {0}")]
    InvalidIdentity(#[from] IdentityError),

    #[error("resource not found: {resource}")]
    NotFound { resource: ResourceRef },

    /// A blocking relationship still touches the resource.
    #[error("cannot delete {resource}: {direction} {relation} relationship with {other}")]
    DeleteConflict {
        resource: ResourceRef,
        relation: RelationType,
        other: ResourceRef,
        direction: Direction,
    },

    #[error("force delete is disabled for this graph (resource {resource})")]
    ForceDeleteDisabled { resource: ResourceRef },

    /// Failure produced by [`crate::ResourceGraph::inject_add_failures`].
    #[error("injected failure in {operation}")]
    Injected { operation: &'static str },
}

impl GraphError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_delete_conflict(&self) -> bool {
        matches!(self, Self::DeleteConflict { .. })
    }
}
