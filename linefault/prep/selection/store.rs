use std::{
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::ranking::FeatureImportanceRanking;
use crate::{atomic::write_atomic, error::PrepResult};

/// Identifies a persisted selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionKey {
    /// Production line code.
    pub production_line: i64,
    /// Fault code.
    pub fault_code: i64,
    /// Cumulative importance threshold.
    pub threshold: f64,
}

impl SelectionKey {
    /// Creates a key.
    #[must_use]
    pub fn new(production_line: i64, fault_code: i64, threshold: f64) -> Self {
        Self {
            production_line,
            fault_code,
            threshold,
        }
    }
}

impl fmt::Display for SelectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "line{}_fault{}_t{:.4}",
            self.production_line, self.fault_code, self.threshold
        )
    }
}

/// Selected feature set together with the ranking it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionArtifact {
    /// Production line code.
    pub production_line: i64,
    /// Fault code.
    pub fault_code: i64,
    /// Threshold used for selection.
    pub threshold: f64,
    /// Selected features, most important first.
    pub features: Vec<String>,
    /// Full ranking.
    pub ranking: FeatureImportanceRanking,
    /// When the selection was fitted.
    pub created_at: DateTime<Utc>,
}

impl SelectionArtifact {
    /// Key the artifact is stored under.
    #[must_use]
    pub fn key(&self) -> SelectionKey {
        SelectionKey::new(self.production_line, self.fault_code, self.threshold)
    }
}

/// Persistence for fitted selections.
pub trait SelectionStore {
    /// Returns the artifact stored for `key`, if any.
    fn load(&self, key: &SelectionKey) -> PrepResult<Option<SelectionArtifact>>;
    /// Stores `artifact` under `key`, replacing any previous one.
    fn save(&self, key: &SelectionKey, artifact: &SelectionArtifact) -> PrepResult<()>;
}

/// In-process store.
#[derive(Debug, Default, Clone)]
pub struct MemorySelectionStore {
    entries: Arc<RwLock<IndexMap<String, SelectionArtifact>>>,
}

impl MemorySelectionStore {
    /// Number of stored selections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl SelectionStore for MemorySelectionStore {
    fn load(&self, key: &SelectionKey) -> PrepResult<Option<SelectionArtifact>> {
        Ok(self.entries.read().get(&key.to_string()).cloned())
    }

    fn save(&self, key: &SelectionKey, artifact: &SelectionArtifact) -> PrepResult<()> {
        self.entries.write().insert(key.to_string(), artifact.clone());
        Ok(())
    }
}

/// One JSON file per key under a directory.
#[derive(Debug, Clone)]
pub struct FileSelectionStore {
    dir: PathBuf,
}

impl FileSelectionStore {
    /// Creates a store rooted at `dir`; the directory is created on first save.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the artifact for `key`.
    #[must_use]
    pub fn path_for(&self, key: &SelectionKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl SelectionStore for FileSelectionStore {
    fn load(&self, key: &SelectionKey) -> PrepResult<Option<SelectionArtifact>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn save(&self, key: &SelectionKey, artifact: &SelectionArtifact) -> PrepResult<()> {
        let bytes = serde_json::to_vec_pretty(artifact)?;
        write_atomic(&self.path_for(key), &bytes)?;
        Ok(())
    }
}
