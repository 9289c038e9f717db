//! Append-only spec registry.
//!
//! Layout under the registry root:
//!
//! ```text
//! specs/<spec-id>.json   one immutable record per spec, written once
//! events.jsonl           append-only lifecycle log
//! ```
//!
//! There is no mutable index file. The id → metadata view (status, best
//! score, parent/children) is rebuilt by scanning the records and replaying
//! the event log, so concurrent writers can only ever append, never clobber.
//! Spec records are content-addressed: re-registering identical content is a
//! no-op, and two different specs can never collide on a path.

use crate::ids::SpecId;
use crate::spec::{SpecError, StrategySpec};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry io: {0}")]
    Io(#[from] std::io::Error),

    #[error("registry record is not valid JSON: {0}")]
    Record(#[from] serde_json::Error),

    #[error("spec record failed validation: {0}")]
    Spec(#[from] SpecError),

    #[error("unknown spec id {id}")]
    UnknownSpec { id: SpecId },
}

/// Lifecycle stage of a registered spec. Events move a spec forward; the
/// index reports the latest stage seen in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecStatus {
    Registered,
    Compiled,
    Submitted,
    Completed,
    Failed,
    TimedOut,
    Validated,
    Ranked,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Registered,
    Status { status: SpecStatus },
    Scored { score: f64 },
}

/// One line in `events.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEvent {
    pub at: DateTime<Utc>,
    pub spec_id: SpecId,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Metadata view for one spec, rebuilt from records + events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecMeta {
    pub name: String,
    pub status: SpecStatus,
    pub best_score: Option<f64>,
    pub parent_id: Option<SpecId>,
    pub children: Vec<SpecId>,
}

pub struct Registry {
    root: PathBuf,
}

impl Registry {
    /// Open (creating if needed) a registry rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let root = root.into();
        fs::create_dir_all(root.join("specs"))?;
        Ok(Self { root })
    }

    fn spec_path(&self, id: &SpecId) -> PathBuf {
        self.root.join("specs").join(format!("{id}.json"))
    }

    fn events_path(&self) -> PathBuf {
        self.root.join("events.jsonl")
    }

    /// Register a spec: write its immutable record and log a `Registered`
    /// event. Registering the same content twice is a no-op.
    pub fn register(&self, spec: &StrategySpec) -> Result<SpecId, RegistryError> {
        let id = spec.id();
        let path = self.spec_path(&id);
        if path.exists() {
            return Ok(id);
        }
        let json = serde_json::to_string_pretty(spec)?;
        // Write-then-rename so a crashed writer never leaves a torn record.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        self.append(RegistryEvent {
            at: Utc::now(),
            spec_id: id.clone(),
            kind: EventKind::Registered,
        })?;
        Ok(id)
    }

    /// Load one spec record. Validates on the way in, so a hand-edited
    /// record that breaks the schema is rejected here.
    pub fn load(&self, id: &SpecId) -> Result<StrategySpec, RegistryError> {
        let path = self.spec_path(id);
        if !path.exists() {
            return Err(RegistryError::UnknownSpec { id: id.clone() });
        }
        let json = fs::read_to_string(path)?;
        Ok(StrategySpec::from_json(&json)?)
    }

    /// Log a status transition for a registered spec.
    pub fn record_status(&self, id: &SpecId, status: SpecStatus) -> Result<(), RegistryError> {
        self.require(id)?;
        self.append(RegistryEvent {
            at: Utc::now(),
            spec_id: id.clone(),
            kind: EventKind::Status { status },
        })
    }

    /// Log a score for a registered spec. The index keeps the best one.
    pub fn record_score(&self, id: &SpecId, score: f64) -> Result<(), RegistryError> {
        self.require(id)?;
        self.append(RegistryEvent {
            at: Utc::now(),
            spec_id: id.clone(),
            kind: EventKind::Scored { score },
        })
    }

    /// Rebuild the id → metadata index by scanning spec records and
    /// replaying the event log.
    pub fn index(&self) -> Result<BTreeMap<SpecId, SpecMeta>, RegistryError> {
        let mut index = BTreeMap::new();
        let mut parents: Vec<(SpecId, SpecId)> = Vec::new();

        for entry in fs::read_dir(self.root.join("specs"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let spec = StrategySpec::from_json(&fs::read_to_string(&path)?)?;
            let id = spec.id();
            if let Some(parent) = &spec.parent_id {
                parents.push((parent.clone(), id.clone()));
            }
            index.insert(
                id,
                SpecMeta {
                    name: spec.name,
                    status: SpecStatus::Registered,
                    best_score: None,
                    parent_id: spec.parent_id,
                    children: Vec::new(),
                },
            );
        }

        for (parent, child) in parents {
            if let Some(meta) = index.get_mut(&parent) {
                meta.children.push(child);
            }
        }

        for event in self.events()? {
            let Some(meta) = index.get_mut(&event.spec_id) else {
                continue;
            };
            match event.kind {
                EventKind::Registered => {}
                EventKind::Status { status } => meta.status = status,
                EventKind::Scored { score } => {
                    let best = meta.best_score.get_or_insert(score);
                    if score > *best {
                        *best = score;
                    }
                }
            }
        }

        Ok(index)
    }

    /// All logged events in append order.
    pub fn events(&self) -> Result<Vec<RegistryEvent>, RegistryError> {
        let path = self.events_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let reader = BufReader::new(fs::File::open(path)?);
        let mut events = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }

    fn require(&self, id: &SpecId) -> Result<(), RegistryError> {
        if self.spec_path(id).exists() {
            Ok(())
        } else {
            Err(RegistryError::UnknownSpec { id: id.clone() })
        }
    }

    fn append(&self, event: RegistryEvent) -> Result<(), RegistryError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.events_path())?;
        let mut line = serde_json::to_string(&event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

/// Convenience: path of the registry root inside a working directory.
pub fn default_root(workdir: &Path) -> PathBuf {
    workdir.join("registry")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::sweep;
    use crate::spec::test_fixtures::{rsi_reversion_spec, sma_cross_spec};
    use crate::spec::{ParameterRange, StrategySpec};

    fn open_temp() -> (tempfile::TempDir, Registry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::open(dir.path().join("registry")).unwrap();
        (dir, registry)
    }

    #[test]
    fn register_and_load_round_trip() {
        let (_dir, registry) = open_temp();
        let spec = rsi_reversion_spec();
        let id = registry.register(&spec).unwrap();
        let loaded = registry.load(&id).unwrap();
        assert_eq!(loaded.id(), id);
        assert_eq!(loaded, spec);
    }

    #[test]
    fn register_is_idempotent() {
        let (_dir, registry) = open_temp();
        let spec = rsi_reversion_spec();
        let a = registry.register(&spec).unwrap();
        let b = registry.register(&spec).unwrap();
        assert_eq!(a, b);
        // Only one Registered event despite two calls.
        let events = registry.events().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Registered);
    }

    #[test]
    fn index_reports_latest_status_and_best_score() {
        let (_dir, registry) = open_temp();
        let id = registry.register(&rsi_reversion_spec()).unwrap();
        registry.record_status(&id, SpecStatus::Compiled).unwrap();
        registry.record_status(&id, SpecStatus::Completed).unwrap();
        registry.record_score(&id, 0.4).unwrap();
        registry.record_score(&id, 0.7).unwrap();
        registry.record_score(&id, 0.5).unwrap();

        let index = registry.index().unwrap();
        let meta = &index[&id];
        assert_eq!(meta.status, SpecStatus::Completed);
        assert_eq!(meta.best_score, Some(0.7));
    }

    #[test]
    fn index_links_sweep_children_to_parent() {
        let (_dir, registry) = open_temp();
        let mut parent = rsi_reversion_spec();
        parent.parameter_ranges = vec![ParameterRange {
            path: "indicators/rsi_2/period".into(),
            values: vec![2.0, 3.0],
        }];
        let parent = StrategySpec::new(parent).unwrap();
        let parent_id = registry.register(&parent).unwrap();

        let children = sweep::expand(&parent).unwrap();
        assert_eq!(children.len(), 2);
        for child in &children {
            registry.register(child).unwrap();
        }

        let index = registry.index().unwrap();
        assert_eq!(index[&parent_id].children.len(), 2);
        for child in &children {
            assert_eq!(index[&child.id()].parent_id.as_ref(), Some(&parent_id));
        }
    }

    #[test]
    fn status_for_unknown_spec_is_rejected() {
        let (_dir, registry) = open_temp();
        let phantom = sma_cross_spec().id();
        let err = registry.record_status(&phantom, SpecStatus::Failed).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownSpec { .. }));
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("registry");
        let id = {
            let registry = Registry::open(&root).unwrap();
            let id = registry.register(&sma_cross_spec()).unwrap();
            registry.record_status(&id, SpecStatus::Validated).unwrap();
            id
        };

        let reopened = Registry::open(&root).unwrap();
        let index = reopened.index().unwrap();
        assert_eq!(index[&id].status, SpecStatus::Validated);
    }
}
