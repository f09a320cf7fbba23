//! Engine configuration loaded from TOML.
//!
//! Every section and field is optional; an empty document yields
//! [`EngineConfig::default`].

use crate::relation::{RelationCatalog, RelationType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_NAMESPACE: &str = "iam";
pub const DEFAULT_DIVERGENCE_LOG_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid toml at {path}: {source}")]
    ParseToml {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure policy for a coupled store + graph operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyMode {
    /// Graph failure undoes the store write and fails the operation.
    Strict,
    /// Graph failure is logged and the store write is kept.
    #[default]
    Lenient,
}

impl ConsistencyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyMode::Strict => "strict",
            ConsistencyMode::Lenient => "lenient",
        }
    }
}

impl FromStr for ConsistencyMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(ConsistencyMode::Strict),
            "lenient" => Ok(ConsistencyMode::Lenient),
            other => Err(format!(
                "unknown consistency mode `{other}` (expected strict or lenient)"
            )),
        }
    }
}

impl Display for ConsistencyMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub default_mode: ConsistencyMode,
    pub divergence_log_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_mode: ConsistencyMode::default(),
            divergence_log_capacity: DEFAULT_DIVERGENCE_LOG_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelationSettings {
    pub blocking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GraphConfig {
    pub allow_force_delete: bool,
    /// Blocking overrides keyed by relation name.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub relations: BTreeMap<String, RelationSettings>,
}

impl GraphConfig {
    pub fn catalog(&self) -> RelationCatalog {
        let mut catalog = RelationCatalog::new();
        for (name, settings) in &self.relations {
            catalog.set(RelationType::from(name.clone()), settings.blocking);
        }
        catalog
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Namespace used by key helpers that are not given one explicitly.
    pub namespace: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// `tracing-subscriber` filter directive; `RUST_LOG` takes precedence.
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub coordinator: CoordinatorConfig,
    pub graph: GraphConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    /// Parse and validate a TOML document. `origin` names the source in errors.
    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = toml::from_str(text).map_err(|source| ConfigError::ParseToml {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::ReadFile {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, &path.display().to_string())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "store.namespace must not be empty".to_string(),
            ));
        }
        if self.coordinator.divergence_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "coordinator.divergence_log_capacity must be greater than zero".to_string(),
            ));
        }
        if let Some(name) = self.graph.relations.keys().find(|name| name.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "graph.relations contains an empty relation name (`{name}`)"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = EngineConfig::from_toml_str("", "inline").expect("empty config is valid");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.coordinator.default_mode, ConsistencyMode::Lenient);
        assert_eq!(config.store.namespace, DEFAULT_NAMESPACE);
        assert!(!config.graph.allow_force_delete);
    }

    #[test]
    fn relation_overrides_feed_the_catalog() {
        let config = EngineConfig::from_toml_str(
            r#"
            [coordinator]
            default_mode = "strict"

            [graph.relations]
            member-of = { blocking = false }
            trusted-by = { blocking = true }
            "#,
            "inline",
        )
        .expect("config should parse");

        assert_eq!(config.coordinator.default_mode, ConsistencyMode::Strict);
        let catalog = config.graph.catalog();
        assert!(!catalog.is_blocking(&RelationType::MemberOf));
        assert!(catalog.is_blocking(&RelationType::Custom("trusted-by".to_string())));
        assert!(catalog.is_blocking(&RelationType::AssociatedWith));
    }

    #[test]
    fn validation_rejects_zero_capacity_and_blank_namespace() {
        let err = EngineConfig::from_toml_str(
            "[coordinator]\ndivergence_log_capacity = 0\n",
            "inline",
        )
        .expect_err("zero capacity must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = EngineConfig::from_toml_str("[store]\nnamespace = \" \"\n", "inline")
            .expect_err("blank namespace must fail");
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = EngineConfig::from_toml_str("[graph]\nforce = true\n", "inline")
            .expect_err("unknown field must fail");
        assert!(matches!(err, ConfigError::ParseToml { .. }));
    }

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("STRICT".parse::<ConsistencyMode>(), Ok(ConsistencyMode::Strict));
        assert!("eventual".parse::<ConsistencyMode>().is_err());
    }
}
