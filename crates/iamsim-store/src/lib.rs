//! # iamsim-store
//!
//! Keyed state store for per-resource state.
//!
//! This crate provides:
//! - `StateStore`: a map from opaque string keys to serde-encoded values
//! - per-key atomic read-modify-write (`update`, `update_existing`)
//! - store-wide monotonic versions and compare-and-set (`set_if_version`)
//! - point-in-time prefix scans (`list`, `list_resources`)
//!
//! It has no knowledge of resource kinds or relationships. Those live in
//! `iamsim-graph` and the coordination layer in `iamsim-coherence`.

pub mod entry;
pub mod error;
pub mod store;

pub use entry::{Entry, Versioned};
pub use error::{MissCause, StoreError, UpdateError};
pub use store::StateStore;
