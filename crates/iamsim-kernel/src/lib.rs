//! # iamsim-kernel
//!
//! Shared vocabulary for the resource relationship and state engine.
//!
//! This crate is **resource-kind agnostic**: it never knows what a user,
//! role or policy is. It only fixes how resources are named, how relation
//! types are classified for deletion protection, and how the engine is
//! configured.
//!
//! ## Architecture
//!
//! ```text
//! ResourceRef           ← graph node identity (kind, name)
//!     │
//! ResourceKey           ← typed store key (namespace, kind, name)
//!     │
//! RelationType          ← edge category, blocking per RelationCatalog
//!     │
//! EngineConfig          ← TOML configuration for store/graph/coordinator
//! ```

pub mod config;
pub mod identity;
pub mod relation;

pub use config::{
    ConfigError, ConsistencyMode, CoordinatorConfig, DEFAULT_DIVERGENCE_LOG_CAPACITY,
    DEFAULT_NAMESPACE, EngineConfig, GraphConfig, LogFormat, LoggingConfig, RelationSettings,
    StoreConfig,
};
pub use identity::{IdentityError, KeyPrefix, ResourceKey, ResourceRef};
pub use relation::{Direction, RelationCatalog, RelationType};
