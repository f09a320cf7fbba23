//! JSONL operation scripts replayed against an [`Engine`].
//!
//! One operation per line, tagged by `op`. Blank lines and lines starting
//! with `#` are skipped.

use crate::engine::Engine;
use crate::error::{EngineError, ScriptError};
use crate::guard::DeleteGuard;
use iamsim_graph::Attributes;
use iamsim_kernel::{ConsistencyMode, RelationType, ResourceRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::io::BufRead;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ScriptOp {
    Register {
        kind: String,
        name: String,
        #[serde(default)]
        attributes: Attributes,
    },
    /// State entry plus graph node, created together.
    Create {
        kind: String,
        name: String,
        #[serde(default)]
        attributes: Attributes,
        #[serde(default)]
        state: Value,
    },
    Unregister {
        kind: String,
        name: String,
    },
    ForceUnregister {
        kind: String,
        name: String,
    },
    /// Guarded delete through [`Engine::delete_resource`].
    DeleteResource {
        kind: String,
        name: String,
        /// Store keys that block the delete while present.
        #[serde(default)]
        blocked_by: Vec<String>,
        #[serde(default)]
        cleanup: Vec<String>,
    },
    Relate {
        from: ResourceRef,
        to: ResourceRef,
        relation: RelationType,
    },
    Unrelate {
        from: ResourceRef,
        to: ResourceRef,
        relation: RelationType,
    },
    Set {
        key: String,
        value: Value,
    },
    Delete {
        key: String,
    },
    Increment {
        key: String,
        #[serde(default = "default_increment")]
        by: u64,
    },
    Attach {
        from: ResourceRef,
        to: ResourceRef,
        relation: RelationType,
        counter: String,
        #[serde(default)]
        mode: Option<ConsistencyMode>,
    },
    Detach {
        from: ResourceRef,
        to: ResourceRef,
        relation: RelationType,
        counter: String,
        #[serde(default)]
        mode: Option<ConsistencyMode>,
    },
    /// Make the next `count` edge insertions fail.
    FailNextRelate {
        #[serde(default = "default_count")]
        count: usize,
    },
}

fn default_increment() -> u64 {
    1
}

fn default_count() -> usize {
    1
}

impl ScriptOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Create { .. } => "create",
            Self::Unregister { .. } => "unregister",
            Self::ForceUnregister { .. } => "force-unregister",
            Self::DeleteResource { .. } => "delete-resource",
            Self::Relate { .. } => "relate",
            Self::Unrelate { .. } => "unrelate",
            Self::Set { .. } => "set",
            Self::Delete { .. } => "delete",
            Self::Increment { .. } => "increment",
            Self::Attach { .. } => "attach",
            Self::Detach { .. } => "detach",
            Self::FailNextRelate { .. } => "fail-next-relate",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// 1-based position in the script.
    pub step: usize,
    pub op: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// The step succeeded with the store and graph out of step.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub divergence: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayReport {
    pub steps: Vec<StepOutcome>,
    pub failed: usize,
    pub divergences: usize,
    pub nodes: usize,
    pub edges: usize,
    pub keys: usize,
}

impl ReplayReport {
    pub fn succeeded(&self) -> bool {
        self.failed == 0
    }
}

pub fn read_script(reader: impl BufRead) -> Result<Vec<ScriptOp>, ScriptError> {
    let mut ops = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
        let line = line.map_err(|e| ScriptError::Io(line_no + 1, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let op: ScriptOp = serde_json::from_str(trimmed)
            .map_err(|e| ScriptError::Parse(line_no + 1, e.to_string()))?;
        ops.push(op);
    }
    Ok(ops)
}

pub fn read_script_from_path(path: impl AsRef<Path>) -> Result<Vec<ScriptOp>, ScriptError> {
    let file = File::open(path.as_ref())
        .map_err(|e| ScriptError::Io(0, format!("{}: {e}", path.as_ref().display())))?;
    read_script(std::io::BufReader::new(file))
}

/// Run every operation in order. A failing step is recorded and replay
/// moves on.
pub fn replay(engine: &Engine, ops: &[ScriptOp]) -> ReplayReport {
    let mut steps = Vec::with_capacity(ops.len());
    for (index, op) in ops.iter().enumerate() {
        let mut outcome = StepOutcome {
            step: index + 1,
            op: op.name().to_string(),
            ok: true,
            code: None,
            message: None,
            divergence: false,
            value: None,
        };
        match apply(engine, op) {
            Ok(applied) => {
                outcome.divergence = applied.divergence;
                outcome.value = applied.value;
            }
            Err(err) => {
                tracing::debug!(step = outcome.step, op = %outcome.op, error = %err, "script step failed");
                outcome.ok = false;
                outcome.code = Some(err.class().code().to_string());
                outcome.message = Some(err.to_string());
            }
        }
        steps.push(outcome);
    }

    ReplayReport {
        failed: steps.iter().filter(|step| !step.ok).count(),
        divergences: steps.iter().filter(|step| step.divergence).count(),
        steps,
        nodes: engine.graph().node_count(),
        edges: engine.graph().edge_count(),
        keys: engine.store().len(),
    }
}

#[derive(Default)]
struct Applied {
    divergence: bool,
    value: Option<Value>,
}

impl Applied {
    fn value(value: impl Into<Value>) -> Self {
        Self {
            divergence: false,
            value: Some(value.into()),
        }
    }
}

fn apply(engine: &Engine, op: &ScriptOp) -> Result<Applied, EngineError> {
    let graph = engine.graph();
    let store = engine.store();
    let default_mode = engine.coordinator().default_mode();

    match op {
        ScriptOp::Register {
            kind,
            name,
            attributes,
        } => {
            graph.register_resource(kind, name, attributes.clone())?;
            Ok(Applied::default())
        }
        ScriptOp::Create {
            kind,
            name,
            attributes,
            state,
        } => {
            let version = engine.create_resource(kind, name, attributes.clone(), state)?;
            Ok(Applied::value(version))
        }
        ScriptOp::Unregister { kind, name } => {
            graph.unregister_resource(kind, name)?;
            Ok(Applied::default())
        }
        ScriptOp::ForceUnregister { kind, name } => {
            let removed = graph.force_unregister_resource(kind, name)?;
            Ok(Applied::value(removed.len()))
        }
        ScriptOp::DeleteResource {
            kind,
            name,
            blocked_by,
            cleanup,
        } => {
            let guard = blocked_by
                .iter()
                .fold(DeleteGuard::new(), |guard, key| guard.key_exists(key.clone(), key.clone()));
            let removed = engine.delete_resource(kind, name, &guard, cleanup)?;
            Ok(Applied::value(removed))
        }
        ScriptOp::Relate { from, to, relation } => {
            let added = graph.add_relationship(
                from.kind(),
                from.name(),
                to.kind(),
                to.name(),
                relation.clone(),
            )?;
            Ok(Applied::value(added))
        }
        ScriptOp::Unrelate { from, to, relation } => {
            let removed = graph.remove_relationship(
                from.kind(),
                from.name(),
                to.kind(),
                to.name(),
                relation.clone(),
            )?;
            Ok(Applied::value(removed))
        }
        ScriptOp::Set { key, value } => {
            let version = store.set(key, value)?;
            Ok(Applied::value(version))
        }
        ScriptOp::Delete { key } => Ok(Applied::value(store.delete(key))),
        ScriptOp::Increment { key, by } => Ok(Applied::value(engine.increment(key, *by)?)),
        ScriptOp::Attach {
            from,
            to,
            relation,
            counter,
            mode,
        } => {
            let outcome = engine.attach(
                relation.clone(),
                from,
                to,
                counter,
                mode.unwrap_or(default_mode),
            )?;
            Ok(Applied {
                divergence: outcome.divergence.is_some(),
                value: Some(outcome.count.into()),
            })
        }
        ScriptOp::Detach {
            from,
            to,
            relation,
            counter,
            mode,
        } => {
            let outcome = engine.detach(
                relation.clone(),
                from,
                to,
                counter,
                mode.unwrap_or(default_mode),
            )?;
            Ok(Applied {
                divergence: outcome.divergence.is_some(),
                value: Some(outcome.count.into()),
            })
        }
        ScriptOp::FailNextRelate { count } => {
            graph.inject_add_failures(*count);
            Ok(Applied::default())
        }
    }
}
