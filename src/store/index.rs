//! The master index: a single document mapping snapshot
//! name → `Snapshot`, written atomically.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const CURRENT_VERSION: u32 = 1;

/// A named, immutable capture of a transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
    pub source_session_id: String,
    pub source_project_path: String,
    pub snapshot_dir: String,
    #[serde(default)]
    pub message_count: Option<u64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent_snapshot: Option<String>,
    pub session_active_at_capture: bool,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

/// A fresh continuation of a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub forked_session_id: String,
    pub created_at: String,
}

/// Single source of truth for snapshot lineage and branch ownership
///. `BTreeMap` keeps iteration order deterministic for
/// `list_snapshots`/`build_tree`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterIndex {
    pub version: u32,
    pub snapshots: BTreeMap<String, Snapshot>,
}

impl Default for MasterIndex {
    fn default() -> Self {
        Self {
            version: CURRENT_VERSION,
            snapshots: BTreeMap::new(),
        }
    }
}

impl MasterIndex {
    pub fn load_or_init(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let index = Self::default();
                index.write(path)?;
                Ok(index)
            }
            Err(e) => Err(EngineError::io(path, e)),
        }
    }

    /// Write-to-temp-then-rename, falling back to delete-then-rename when
    /// atomic replace fails.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| EngineError::io(parent, e))?;
        }
        let tmp_path = path.with_extension(format!("json.tmp-{}", uuid::Uuid::new_v4().simple()));
        let body = serde_json::to_string_pretty(self)?;
        fs::write(&tmp_path, body).map_err(|e| EngineError::io(&tmp_path, e))?;
        match fs::rename(&tmp_path, path) {
            Ok(()) => Ok(()),
            Err(_) => {
                let _ = fs::remove_file(path);
                fs::rename(&tmp_path, path).map_err(|e| EngineError::io(path, e))
            }
        }
    }

    pub fn get(&self, name: &str) -> Result<&Snapshot> {
        self.snapshots.get(name).ok_or_else(|| EngineError::SnapshotNotFound {
            name: name.to_string(),
        })
    }

    pub fn get_mut(&mut self, name: &str) -> Result<&mut Snapshot> {
        self.snapshots.get_mut(name).ok_or_else(|| EngineError::SnapshotNotFound {
            name: name.to_string(),
        })
    }

    /// Any snapshot whose branches include `source_session_id`, used to
    /// resolve `parent_snapshot` on create.
    pub fn find_parent_of(&self, source_session_id: &str) -> Option<String> {
        self.snapshots
            .values()
            .find(|s| s.branches.iter().any(|b| b.forked_session_id == source_session_id))
            .map(|s| s.name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_index_initializes_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let idx = MasterIndex::load_or_init(&path).unwrap();
        assert_eq!(idx.version, CURRENT_VERSION);
        assert!(idx.snapshots.is_empty());
        assert!(path.exists());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        let mut idx = MasterIndex::default();
        idx.snapshots.insert(
            "my-snap".into(),
            Snapshot {
                id: "snap_aaaaaaaa".into(),
                name: "my-snap".into(),
                description: None,
                created_at: "2026-01-01T00:00:00Z".into(),
                source_session_id: "s1".into(),
                source_project_path: "/tmp/p".into(),
                snapshot_dir: "snap_aaaaaaaa".into(),
                message_count: Some(3),
                tags: vec![],
                parent_snapshot: None,
                session_active_at_capture: false,
                branches: vec![],
            },
        );
        idx.write(&path).unwrap();
        let reloaded = MasterIndex::load_or_init(&path).unwrap();
        assert!(reloaded.snapshots.contains_key("my-snap"));
    }
}
