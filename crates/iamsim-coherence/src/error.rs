//! Engine-level errors and their user-visible classification.

use crate::coordinator::CoupledError;
use iamsim_graph::GraphError;
use iamsim_kernel::{IdentityError, ResourceRef};
use iamsim_store::StoreError;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Coupled(#[from] CoupledError),

    /// A [`crate::DeleteGuard`] check vetoed the delete.
    #[error("cannot delete {resource}: {reason} still exists")]
    DeleteConflict {
        resource: ResourceRef,
        reason: String,
    },

    #[error("resource already exists: {resource}")]
    AlreadyExists { resource: ResourceRef },
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Identity(_) => ErrorClass::InvalidInput,
            Self::Store(err) => store_class(err),
            Self::Graph(err) => graph_class(err),
            Self::Coupled(CoupledError::Store { source, .. }) => store_class(source),
            Self::Coupled(CoupledError::RolledBack { source, .. }) => graph_class(source),
            Self::Coupled(CoupledError::RollbackFailed { .. }) => ErrorClass::ServiceFailure,
            Self::DeleteConflict { .. } => ErrorClass::DeleteConflict,
            Self::AlreadyExists { .. } => ErrorClass::EntityAlreadyExists,
        }
    }
}

fn store_class(err: &StoreError) -> ErrorClass {
    match err {
        StoreError::NotFound { .. } => ErrorClass::NoSuchEntity,
        StoreError::VersionConflict { .. } => ErrorClass::ConcurrentModification,
        StoreError::Encode { .. } => ErrorClass::InvalidInput,
    }
}

fn graph_class(err: &GraphError) -> ErrorClass {
    match err {
        GraphError::InvalidIdentity(_) | GraphError::ForceDeleteDisabled { .. } => {
            ErrorClass::InvalidInput
        }
        GraphError::NotFound { .. } => ErrorClass::NoSuchEntity,
        GraphError::DeleteConflict { .. } => ErrorClass::DeleteConflict,
        GraphError::Injected { .. } => ErrorClass::ServiceFailure,
    }
}

/// User-visible error classes surfaced by request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    NoSuchEntity,
    DeleteConflict,
    EntityAlreadyExists,
    InvalidInput,
    ConcurrentModification,
    ServiceFailure,
}

impl ErrorClass {
    /// Stable wire code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSuchEntity => "NoSuchEntity",
            Self::DeleteConflict => "DeleteConflict",
            Self::EntityAlreadyExists => "EntityAlreadyExists",
            Self::InvalidInput => "InvalidInput",
            Self::ConcurrentModification => "ConcurrentModification",
            Self::ServiceFailure => "ServiceFailure",
        }
    }
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Errors while reading an operation script.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("line {0}: I/O error: {1}")]
    Io(usize, String),

    #[error("line {0}: parse error: {1}")]
    Parse(usize, String),
}
