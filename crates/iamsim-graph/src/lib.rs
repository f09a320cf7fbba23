//! # iamsim-graph
//!
//! Registry of resource nodes `(kind, name)` and typed, directed edges
//! between them, with referential integrity:
//! - edges may only join registered nodes
//! - a node touched by a blocking edge cannot be unregistered
//! - edge add/remove and node registration are idempotent
//!
//! Which relation types block deletion is declared once, in the
//! `RelationCatalog` the graph is built with.

pub mod error;
pub mod graph;
pub mod node;

pub use error::GraphError;
pub use graph::ResourceGraph;
pub use node::{Attributes, Relationship, ResourceNode};
