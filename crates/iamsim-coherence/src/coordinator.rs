//! Coupled store + graph operations.
//!
//! A coupled operation is two independent atomic steps, not a transaction:
//! the store write commits first, then the graph mutation runs. The
//! [`ConsistencyMode`] decides what a graph failure means.

use chrono::{DateTime, Utc};
use iamsim_graph::GraphError;
use iamsim_kernel::{ConsistencyMode, CoordinatorConfig, DEFAULT_DIVERGENCE_LOG_CAPACITY};
use iamsim_store::StoreError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, PoisonError};

/// A tolerated store/graph divergence recorded in lenient mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Divergence {
    pub label: String,
    pub error: String,
    pub occurred_at: DateTime<Utc>,
}

/// Successful outcome of a coupled operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupled<T> {
    /// Value produced by the store step.
    pub value: T,
    /// Set when the graph step failed and lenient mode kept the store write.
    pub divergence: Option<Divergence>,
}

impl<T> Coupled<T> {
    pub fn is_consistent(&self) -> bool {
        self.divergence.is_none()
    }
}

/// Failure of a coupled operation. `E` is the store-side error type.
#[derive(Debug)]
pub enum CoupledError<E = StoreError> {
    /// The store step failed; the graph was not touched.
    Store { label: String, source: E },
    /// Strict mode: the graph step failed and the store write was undone.
    RolledBack { label: String, source: GraphError },
    /// Strict mode: the graph step failed and so did the undo.
    RollbackFailed {
        label: String,
        graph: GraphError,
        undo: E,
    },
}

impl<E> CoupledError<E> {
    pub fn label(&self) -> &str {
        match self {
            Self::Store { label, .. }
            | Self::RolledBack { label, .. }
            | Self::RollbackFailed { label, .. } => label,
        }
    }

    pub fn graph_error(&self) -> Option<&GraphError> {
        match self {
            Self::Store { .. } => None,
            Self::RolledBack { source, .. } => Some(source),
            Self::RollbackFailed { graph, .. } => Some(graph),
        }
    }
}

impl<E: Display> Display for CoupledError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store { label, source } => write!(f, "{label}: store step failed: {source}"),
            Self::RolledBack { label, source } => {
                write!(f, "{label}: {source} (store write rolled back)")
            }
            Self::RollbackFailed { label, graph, undo } => write!(
                f,
                "{label}: {graph}; rollback of the store write also failed: {undo}"
            ),
        }
    }
}

impl<E> StdError for CoupledError<E>
where
    E: Display + std::fmt::Debug + StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Store { source, .. } => Some(source),
            Self::RolledBack { source, .. } => Some(source),
            Self::RollbackFailed { graph, .. } => Some(graph),
        }
    }
}

/// Runs coupled operations and keeps the lenient-mode divergence log.
#[derive(Debug)]
pub struct ConsistencyCoordinator {
    default_mode: ConsistencyMode,
    capacity: usize,
    divergences: Mutex<VecDeque<Divergence>>,
}

impl Default for ConsistencyCoordinator {
    fn default() -> Self {
        Self::new(ConsistencyMode::default())
    }
}

impl ConsistencyCoordinator {
    pub fn new(default_mode: ConsistencyMode) -> Self {
        Self {
            default_mode,
            capacity: DEFAULT_DIVERGENCE_LOG_CAPACITY,
            divergences: Mutex::new(VecDeque::new()),
        }
    }

    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            capacity: config.divergence_log_capacity.max(1),
            ..Self::new(config.default_mode)
        }
    }

    pub fn default_mode(&self) -> ConsistencyMode {
        self.default_mode
    }

    /// Run `store_step`, then `graph_step`, resolving a graph failure by `mode`.
    ///
    /// In strict mode `undo` receives the store step's value and must invert
    /// its write; it is never called otherwise.
    pub fn run_coupled<T, E, S, G, U>(
        &self,
        label: &str,
        mode: ConsistencyMode,
        store_step: S,
        graph_step: G,
        undo: U,
    ) -> Result<Coupled<T>, CoupledError<E>>
    where
        E: Display,
        S: FnOnce() -> Result<T, E>,
        G: FnOnce() -> Result<(), GraphError>,
        U: FnOnce(&T) -> Result<(), E>,
    {
        let value = store_step().map_err(|source| CoupledError::Store {
            label: label.to_string(),
            source,
        })?;

        let graph_err = match graph_step() {
            Ok(()) => {
                return Ok(Coupled {
                    value,
                    divergence: None,
                });
            }
            Err(err) => err,
        };

        match mode {
            ConsistencyMode::Strict => match undo(&value) {
                Ok(()) => {
                    tracing::warn!(label, error = %graph_err, "graph step failed; store write rolled back");
                    Err(CoupledError::RolledBack {
                        label: label.to_string(),
                        source: graph_err,
                    })
                }
                Err(undo_err) => {
                    tracing::error!(
                        label,
                        error = %graph_err,
                        undo_error = %undo_err,
                        "graph step failed and rollback failed"
                    );
                    Err(CoupledError::RollbackFailed {
                        label: label.to_string(),
                        graph: graph_err,
                        undo: undo_err,
                    })
                }
            },
            ConsistencyMode::Lenient => {
                tracing::warn!(label, error = %graph_err, "graph step failed; keeping store write");
                let divergence = Divergence {
                    label: label.to_string(),
                    error: graph_err.to_string(),
                    occurred_at: Utc::now(),
                };
                self.record(divergence.clone());
                Ok(Coupled {
                    value,
                    divergence: Some(divergence),
                })
            }
        }
    }

    /// [`ConsistencyCoordinator::run_coupled`] with the configured default mode.
    pub fn run_coupled_default<T, E, S, G, U>(
        &self,
        label: &str,
        store_step: S,
        graph_step: G,
        undo: U,
    ) -> Result<Coupled<T>, CoupledError<E>>
    where
        E: Display,
        S: FnOnce() -> Result<T, E>,
        G: FnOnce() -> Result<(), GraphError>,
        U: FnOnce(&T) -> Result<(), E>,
    {
        self.run_coupled(label, self.default_mode, store_step, graph_step, undo)
    }

    fn record(&self, divergence: Divergence) {
        let mut log = self
            .divergences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        log.push_back(divergence);
        while log.len() > self.capacity {
            log.pop_front();
        }
    }

    /// Recorded divergences, oldest first.
    pub fn divergences(&self) -> Vec<Divergence> {
        self.divergences
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear_divergences(&self) -> usize {
        let mut log = self
            .divergences
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let cleared = log.len();
        log.clear();
        cleared
    }
}
