//! Snapshot/branch store: content-addressed snapshot
//! directories, an atomically-updated master index, and the branching
//! protocol that materializes a snapshot as a new host session file.
//!
//! `Store::open`'s bootstrap uses a tolerant-I/O pattern (missing index or
//! config files default rather than error), and branch creation follows a
//! fresh-id-per-branch / materialize-then-register ordering so a failure
//! partway through never leaves the host index pointing at a half-written
//! session file.

pub mod archive;
pub mod index;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::reader::{self, SessionEntry, SessionIndexEntry};
use crate::{paths, trim};
use index::{Branch, MasterIndex, Snapshot};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const NAME_MAX_LEN: usize = 100;

fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn new_snapshot_id() -> String {
    format!("snap_{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

fn new_session_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn validate_name(name: &str, existing: &MasterIndex) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX_LEN {
        return Err(EngineError::InvalidName {
            name: name.to_string(),
            reason: "must be 1-100 characters",
        });
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(EngineError::InvalidName {
            name: name.to_string(),
            reason: "must match [A-Za-z0-9_-]",
        });
    }
    if existing.snapshots.contains_key(name) {
        return Err(EngineError::SnapshotExists { name: name.to_string() });
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct CreateSnapshotParams {
    pub name: String,
    /// A specific session id (prefix-matched) or `None` for "most recently
    /// modified across all host projects".
    pub source_session_id: Option<String>,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CreateBranchParams {
    pub snapshot_name: String,
    pub branch_name: Option<String>,
    pub trim: bool,
    pub trim_threshold: Option<usize>,
    pub orientation_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BranchResult {
    pub branch: Branch,
    pub materialized_path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub rename: Option<String>,
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct ImportResult {
    pub snapshot: Snapshot,
    pub warnings: Vec<String>,
}

/// The open store: engine home directory plus the loaded master index and
/// config.
pub struct Store {
    pub home: PathBuf,
    pub index: MasterIndex,
    pub config: EngineConfig,
}

impl Store {
    /// Create `snapshots/`, `auto-backups/` if missing and load (or
    /// initialize) `index.json`/`config.json`.
    pub fn open(home: PathBuf) -> Result<Self> {
        fs::create_dir_all(home.join("snapshots")).map_err(|e| EngineError::io(&home, e))?;
        fs::create_dir_all(home.join("auto-backups")).map_err(|e| EngineError::io(&home, e))?;
        let index = MasterIndex::load_or_init(&home.join("index.json"))?;
        let config = EngineConfig::load(&home.join("config.json"))?;
        Ok(Self { home, index, config })
    }

    fn index_path(&self) -> PathBuf {
        self.home.join("index.json")
    }

    fn snapshot_dir(&self, snapshot_dir_name: &str) -> PathBuf {
        self.home.join("snapshots").join(snapshot_dir_name)
    }

    pub fn list_snapshots(&self) -> Vec<&Snapshot> {
        self.index.snapshots.values().collect()
    }

    pub fn get_snapshot(&self, name: &str) -> Result<&Snapshot> {
        self.index.get(name)
    }

    /// Resolve every `parent_snapshot` link into a tree, computed on
    /// demand from the index.
    pub fn build_tree(&self) -> Vec<(Snapshot, Vec<Snapshot>)> {
        let roots: Vec<&Snapshot> = self
            .index
            .snapshots
            .values()
            .filter(|s| s.parent_snapshot.is_none())
            .collect();
        roots
            .into_iter()
            .map(|root| {
                let children: Vec<Snapshot> = self
                    .index
                    .snapshots
                    .values()
                    .filter(|s| s.parent_snapshot.as_deref() == Some(root.name.as_str()))
                    .cloned()
                    .collect();
                (root.clone(), children)
            })
            .collect()
    }

    fn resolve_source(&self, source_session_id: &Option<String>) -> Result<SessionEntry> {
        match source_session_id {
            Some(id) => reader::find_session(id),
            None => reader::most_recent_session().ok_or_else(|| EngineError::SessionNotFound {
                query: "<most recent>".to_string(),
            }),
        }
    }

    /// Builds a new snapshot from the current state of a session (or an
    /// explicit parent snapshot), copying the transcript byte-for-byte.
    pub fn create_snapshot(&mut self, params: CreateSnapshotParams) -> Result<(Snapshot, Vec<String>)> {
        validate_name(&params.name, &self.index)?;
        let source = self.resolve_source(&params.source_session_id)?;

        let mut warnings = Vec::new();
        if reader::is_session_active(&source.full_path) {
            warnings.push(format!(
                "source session {} looked active at capture time",
                source.session_id
            ));
        }
        let user_assistant_count = crate::analyze::analyze(&source.full_path)
            .map(|a| a.message_count.user + a.message_count.assistant)
            .unwrap_or(0);
        if user_assistant_count == 0 {
            warnings.push("source session has zero user/assistant messages; branching from it will fail".to_string());
        }

        let id = new_snapshot_id();
        let snapshot_dir = id.clone();
        let dir = self.snapshot_dir(&snapshot_dir);
        let session_dir = dir.join("session");
        fs::create_dir_all(&session_dir).map_err(|e| EngineError::io(&session_dir, e))?;
        let dest = session_dir.join(format!("{}.jsonl", source.session_id));
        fs::copy(&source.full_path, &dest).map_err(|e| EngineError::io(&dest, e))?;

        let parent_snapshot = self.index.find_parent_of(&source.session_id);

        let snapshot = Snapshot {
            id: id.clone(),
            name: params.name.clone(),
            description: params.description,
            created_at: now_iso8601(),
            source_session_id: source.session_id.clone(),
            source_project_path: source.project_path.clone(),
            snapshot_dir,
            message_count: Some(user_assistant_count),
            tags: params.tags,
            parent_snapshot,
            session_active_at_capture: reader::is_session_active(&source.full_path),
            branches: Vec::new(),
        };

        let meta = archive::ArchiveMeta {
            cmv_version: archive::CURRENT_CMV_VERSION,
            snapshot_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            created_at: snapshot.created_at.clone(),
            source_session_id: snapshot.source_session_id.clone(),
            source_project_path: snapshot.source_project_path.clone(),
            tags: snapshot.tags.clone(),
            parent_snapshot: snapshot.parent_snapshot.clone(),
            claude_code_version: None,
            session_file_format: "jsonl".to_string(),
        };
        let meta_path = dir.join("meta.json");
        fs::write(&meta_path, serde_json::to_vec_pretty(&meta)?).map_err(|e| EngineError::io(&meta_path, e))?;

        self.index.snapshots.insert(snapshot.name.clone(), snapshot.clone());
        self.index.write(&self.index_path())?;

        Ok((snapshot, warnings))
    }

    /// Removes the snapshot directory and index entry only; branches are
    /// not cascade-deleted.
    pub fn delete_snapshot(&mut self, name: &str) -> Result<()> {
        let snapshot = self.index.get(name)?.clone();
        let dir = self.snapshot_dir(&snapshot.snapshot_dir);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        }
        self.index.snapshots.remove(name);
        self.index.write(&self.index_path())
    }

    /// Materializes a snapshot's transcript as a new, live host session so
    /// the assistant can resume from it.
    pub fn create_branch(&mut self, params: CreateBranchParams) -> Result<BranchResult> {
        let snapshot = self.index.get(&params.snapshot_name)?.clone();
        let session_path = self
            .snapshot_dir(&snapshot.snapshot_dir)
            .join("session")
            .join(format!("{}.jsonl", snapshot.source_session_id));

        let has_content = crate::analyze::analyze(&session_path)
            .map(|a| a.message_count.user + a.message_count.assistant > 0)
            .unwrap_or(false);
        if !has_content {
            return Err(EngineError::NoConversationContent);
        }

        let project_dir = paths::project_dir_for(Path::new(&snapshot.source_project_path));
        if !project_dir.exists() {
            return Err(EngineError::ProjectDirNotFound {
                source_project_path: snapshot.source_project_path.clone(),
            });
        }

        let new_id = new_session_id();
        let dest = project_dir.join(format!("{new_id}.jsonl"));
        let materialize_result = (|| -> Result<()> {
            if params.trim {
                let opts = trim::TrimOptions {
                    stub_threshold: params
                        .trim_threshold
                        .unwrap_or(trim::DEFAULT_STUB_THRESHOLD),
                };
                trim::trim(&session_path, &dest, opts)?;
            } else {
                let tmp = dest.with_extension(format!("jsonl.tmp-{}", uuid::Uuid::new_v4().simple()));
                fs::copy(&session_path, &tmp).map_err(|e| EngineError::io(&tmp, e))?;
                fs::rename(&tmp, &dest).map_err(|e| EngineError::io(&dest, e))?;
            }
            if let Some(orientation) = &params.orientation_message {
                append_orientation_message(&dest, orientation)?;
            }
            Ok(())
        })();

        if let Err(e) = materialize_result {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        let branch_name = params
            .branch_name
            .clone()
            .unwrap_or_else(|| format!("branch-{}", &new_id[..8]));

        if let Err(e) = register_host_index_entry(&project_dir, &new_id, &dest, &branch_name, &snapshot.source_project_path) {
            let _ = fs::remove_file(&dest);
            return Err(e);
        }

        let branch = Branch {
            name: branch_name,
            forked_session_id: new_id,
            created_at: now_iso8601(),
        };

        let stored = self.index.get_mut(&params.snapshot_name)?;
        stored.branches.push(branch.clone());
        self.index.write(&self.index_path())?;

        Ok(BranchResult {
            branch,
            materialized_path: dest,
        })
    }

    /// Removes the materialized file, the host-index entry, and the
    /// branch record, tolerating either being already missing.
    pub fn delete_branch(&mut self, snapshot_name: &str, branch_name: &str) -> Result<()> {
        let snapshot = self.index.get(snapshot_name)?.clone();
        let branch = snapshot
            .branches
            .iter()
            .find(|b| b.name == branch_name)
            .cloned();

        if let Some(branch) = &branch {
            let project_dir = paths::project_dir_for(Path::new(&snapshot.source_project_path));
            let file_path = project_dir.join(format!("{}.jsonl", branch.forked_session_id));
            if file_path.exists() {
                fs::remove_file(&file_path).map_err(|e| EngineError::io(&file_path, e))?;
            }
            if let Ok(mut idx) = reader::refresh_sessions_index(&project_dir) {
                idx.entries.retain(|e| e.session_id != branch.forked_session_id);
                let _ = reader::write_sessions_index(&project_dir, &idx);
            }
        }

        let stored = self.index.get_mut(snapshot_name)?;
        stored.branches.retain(|b| b.name != branch_name);
        self.index.write(&self.index_path())
    }

    /// Builds a `.cmv` archive for `name`.
    pub fn export_snapshot(&self, name: &str, out_path: Option<&Path>) -> Result<PathBuf> {
        let snapshot = self.index.get(name)?;
        let dir = self.snapshot_dir(&snapshot.snapshot_dir);
        let meta = archive::ArchiveMeta {
            cmv_version: archive::CURRENT_CMV_VERSION,
            snapshot_id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            description: snapshot.description.clone(),
            created_at: snapshot.created_at.clone(),
            source_session_id: snapshot.source_session_id.clone(),
            source_project_path: snapshot.source_project_path.clone(),
            tags: snapshot.tags.clone(),
            parent_snapshot: snapshot.parent_snapshot.clone(),
            claude_code_version: None,
            session_file_format: "jsonl".to_string(),
        };
        let default_out = self.home.join(format!("{name}.cmv"));
        let out = out_path.unwrap_or(&default_out);
        archive::export(&dir, &meta, out)?;
        Ok(out.to_path_buf())
    }

    /// Unpacks a `.cmv` archive and registers it as a new local snapshot
    ///.
    pub fn import_snapshot(&mut self, archive_path: &Path, opts: ImportOptions) -> Result<ImportResult> {
        let unpacked = archive::import(archive_path)?;
        let mut warnings = Vec::new();

        let mut name = unpacked.meta.name.clone();
        if self.index.snapshots.contains_key(&name) {
            if let Some(renamed) = &opts.rename {
                name = renamed.clone();
            } else if !opts.force {
                return Err(EngineError::SnapshotExists { name });
            }
        }

        let parent_snapshot = match &unpacked.meta.parent_snapshot {
            Some(p) if self.index.snapshots.contains_key(p) => Some(p.clone()),
            Some(p) => {
                warnings.push(format!("parent snapshot {p:?} not present locally; dropped"));
                None
            }
            None => None,
        };

        let id = new_snapshot_id();
        let dir = self.snapshot_dir(&id);
        let session_dir = dir.join("session");
        fs::create_dir_all(&session_dir).map_err(|e| EngineError::io(&session_dir, e))?;
        for (filename, bytes) in &unpacked.session_files {
            let dest = session_dir.join(filename);
            fs::write(&dest, bytes).map_err(|e| EngineError::io(&dest, e))?;
        }

        let snapshot = Snapshot {
            id: id.clone(),
            name: name.clone(),
            description: unpacked.meta.description.clone(),
            created_at: unpacked.meta.created_at.clone(),
            source_session_id: unpacked.meta.source_session_id.clone(),
            source_project_path: unpacked.meta.source_project_path.clone(),
            snapshot_dir: id,
            message_count: None,
            tags: unpacked.meta.tags.clone(),
            parent_snapshot,
            session_active_at_capture: false,
            branches: Vec::new(),
        };

        let meta_path = dir.join("meta.json");
        fs::write(&meta_path, serde_json::to_vec_pretty(&unpacked.meta)?).map_err(|e| EngineError::io(&meta_path, e))?;

        self.index.snapshots.insert(name, snapshot.clone());
        self.index.write(&self.index_path())?;

        Ok(ImportResult { snapshot, warnings })
    }
}

/// Append `text` as a trailing user-role JSONL line.
fn append_orientation_message(path: &Path, text: &str) -> Result<()> {
    use std::io::Write;
    let line = serde_json::json!({
        "type": "user",
        "message": {"role": "user", "content": text},
    });
    let mut file = fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| EngineError::io(path, e))?;
    writeln!(file, "{line}").map_err(|e| EngineError::io(path, e))
}

/// Update the host's per-project `sessions-index.json` with a new branch
/// entry.
fn register_host_index_entry(
    project_dir: &Path,
    new_id: &str,
    materialized_path: &Path,
    branch_name: &str,
    project_path: &str,
) -> Result<()> {
    let mut idx = reader::refresh_sessions_index(project_dir)?;
    if idx.original_path.is_none() {
        idx.original_path = Some(project_path.to_string());
    }
    let now = now_iso8601();
    idx.entries.push(SessionIndexEntry {
        session_id: new_id.to_string(),
        full_path: materialized_path.to_string_lossy().to_string(),
        file_mtime: Some(0),
        first_prompt: Some(branch_name.to_string()),
        summary: None,
        message_count: Some(0),
        created: Some(now.clone()),
        modified: Some(now),
        git_branch: None,
        project_path: Some(project_path.to_string()),
        is_sidechain: false,
    });
    reader::write_sessions_index(project_dir, &idx)
}
