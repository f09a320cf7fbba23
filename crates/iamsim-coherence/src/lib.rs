//! # iamsim-coherence
//!
//! Keeps the state store and the resource graph in step.
//!
//! - `ConsistencyCoordinator`: runs a store write followed by a graph
//!   mutation and decides, per `ConsistencyMode`, whether a graph failure
//!   rolls the write back (`Strict`) or is logged as a divergence (`Lenient`)
//! - `DeleteGuard`: store-backed delete vetoes layered after blocking edges
//! - `Engine`: composition root owning one store, one graph and one
//!   coordinator, plus the coupled operations request handlers use
//! - `script`: JSONL operation scripts and their replay report

pub mod coordinator;
pub mod engine;
pub mod error;
pub mod guard;
pub mod script;

pub use coordinator::{ConsistencyCoordinator, Coupled, CoupledError, Divergence};
pub use engine::{Engine, LinkOutcome};
pub use error::{EngineError, ErrorClass, ScriptError};
pub use guard::DeleteGuard;
pub use script::{
    ReplayReport, ScriptOp, StepOutcome, read_script, read_script_from_path, replay,
};
