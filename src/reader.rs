//! Transcript discovery across the host assistant's per-project storage
//!.

use crate::error::{EngineError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// `sessions-index.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsIndex {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(rename = "originalPath", default)]
    pub original_path: Option<String>,
    #[serde(default)]
    pub entries: Vec<SessionIndexEntry>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIndexEntry {
    pub session_id: String,
    pub full_path: String,
    #[serde(default)]
    pub file_mtime: Option<i64>,
    #[serde(default)]
    pub first_prompt: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub message_count: Option<u64>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub modified: Option<String>,
    #[serde(default)]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub project_path: Option<String>,
    #[serde(default)]
    pub is_sidechain: bool,
}

/// One discovered transcript, flattened from whichever source produced it
/// (a fresh `sessions-index.json` entry or a raw directory scan).
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub session_id: String,
    pub full_path: PathBuf,
    pub project_dir: PathBuf,
    pub project_path: String,
    pub file_mtime: Option<i64>,
    pub message_count: Option<u64>,
    pub first_prompt: Option<String>,
    pub is_sidechain: bool,
}

/// Filter applied by `discover_sessions`.
#[derive(Debug, Clone, Default)]
pub struct DiscoverFilter {
    pub project_path: Option<String>,
}

fn unix_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn read_index(project_dir: &Path) -> Option<SessionsIndex> {
    let path = project_dir.join("sessions-index.json");
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Count non-empty lines in a JSONL file without parsing them — a cheap
/// stand-in for `message_count` when the index is missing or stale
///.
fn cheap_line_count(path: &Path) -> Option<u64> {
    let file = fs::File::open(path).ok()?;
    let reader = BufReader::new(file);
    let mut count = 0u64;
    for line in reader.lines() {
        let line = line.ok()?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Some(count)
}

/// Discover every session across every host project directory, refreshing
/// each project's index opportunistically and falling back to a raw
/// `*.jsonl` scan when the index is missing or doesn't mention a file.
/// Per-project reads fan out on worker threads: each thread walks one project directory independently
/// and results are merged after the scope joins.
pub fn discover_sessions(filter: Option<&DiscoverFilter>) -> Vec<SessionEntry> {
    let project_dirs = paths::all_project_dirs();
    let mut results: Vec<Vec<SessionEntry>> = Vec::with_capacity(project_dirs.len());
    std::thread::scope(|scope| {
        let handles: Vec<_> = project_dirs
            .iter()
            .map(|dir| scope.spawn(move || discover_in_project(dir)))
            .collect();
        for h in handles {
            if let Ok(entries) = h.join() {
                results.push(entries);
            }
        }
    });
    let mut all: Vec<SessionEntry> = results.into_iter().flatten().collect();
    if let Some(f) = filter {
        if let Some(want) = &f.project_path {
            all.retain(|e| &e.project_path == want);
        }
    }
    all
}

fn discover_in_project(project_dir: &Path) -> Vec<SessionEntry> {
    let index = read_index(project_dir);
    let project_path = index
        .as_ref()
        .and_then(|i| i.original_path.clone())
        .unwrap_or_else(|| {
            paths::decode_project_dir_name(
                &project_dir.file_name().unwrap_or_default().to_string_lossy(),
                index.as_ref(),
            )
        });

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    if let Some(idx) = &index {
        for entry in &idx.entries {
            seen.insert(entry.session_id.clone());
            let full_path = PathBuf::from(&entry.full_path);
            out.push(SessionEntry {
                session_id: entry.session_id.clone(),
                full_path,
                project_dir: project_dir.to_path_buf(),
                project_path: entry.project_path.clone().unwrap_or_else(|| project_path.clone()),
                file_mtime: entry.file_mtime,
                message_count: entry.message_count,
                first_prompt: entry.first_prompt.clone(),
                is_sidechain: entry.is_sidechain,
            });
        }
    }

    let Ok(dir_entries) = fs::read_dir(project_dir) else {
        return out;
    };
    for dirent in dir_entries.flatten() {
        let path = dirent.path();
        if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
            continue;
        }
        let session_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        if seen.contains(&session_id) {
            continue;
        }
        let mtime = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map(unix_millis)
            .ok();
        out.push(SessionEntry {
            session_id,
            full_path: path.clone(),
            project_dir: project_dir.to_path_buf(),
            project_path: project_path.clone(),
            file_mtime: mtime,
            message_count: cheap_line_count(&path),
            first_prompt: None,
            is_sidechain: false,
        });
    }
    out
}

/// Find a session by exact id or an unambiguous ≥4-char prefix.
pub fn find_session(id_or_prefix: &str) -> Result<SessionEntry> {
    let all = discover_sessions(None);
    if let Some(exact) = all.iter().find(|e| e.session_id == id_or_prefix) {
        return Ok(exact.clone());
    }
    if id_or_prefix.len() < 4 {
        return Err(EngineError::SessionNotFound {
            query: id_or_prefix.to_string(),
        });
    }
    let matches: Vec<&SessionEntry> = all
        .iter()
        .filter(|e| e.session_id.starts_with(id_or_prefix))
        .collect();
    match matches.len() {
        0 => Err(EngineError::SessionNotFound {
            query: id_or_prefix.to_string(),
        }),
        1 => Ok(matches[0].clone()),
        _ => Err(EngineError::AmbiguousSession {
            query: id_or_prefix.to_string(),
            candidates: matches.iter().map(|e| e.session_id.clone()).collect(),
        }),
    }
}

/// The most recently modified session across every host project.
pub fn most_recent_session() -> Option<SessionEntry> {
    discover_sessions(None)
        .into_iter()
        .max_by_key(|e| e.file_mtime.unwrap_or(i64::MIN))
}

/// Reload `sessions-index.json` for one project, recomputing
/// `message_count` for any entry whose recorded `fileMtime` disagrees with
/// the file's actual mtime.
pub fn refresh_sessions_index(project_dir: &Path) -> Result<SessionsIndex> {
    let mut index = read_index(project_dir).unwrap_or_default();
    for entry in &mut index.entries {
        let path = PathBuf::from(&entry.full_path);
        let actual_mtime = fs::metadata(&path).and_then(|m| m.modified()).map(unix_millis).ok();
        if actual_mtime != entry.file_mtime {
            entry.file_mtime = actual_mtime;
            entry.message_count = cheap_line_count(&path);
        }
    }
    Ok(index)
}

/// Write `sessions-index.json` for a project atomically (write-temp, then
/// rename — spec.md §9 "Atomic file publication").
pub fn write_sessions_index(project_dir: &Path, index: &SessionsIndex) -> Result<()> {
    fs::create_dir_all(project_dir).map_err(|e| EngineError::io(project_dir, e))?;
    let final_path = project_dir.join("sessions-index.json");
    let tmp_path = project_dir.join(format!(
        ".sessions-index.json.tmp-{}",
        uuid::Uuid::new_v4().simple()
    ));
    let body = serde_json::to_string_pretty(index)?;
    fs::write(&tmp_path, body).map_err(|e| EngineError::io(&tmp_path, e))?;
    match fs::rename(&tmp_path, &final_path) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = fs::remove_file(&final_path);
            fs::rename(&tmp_path, &final_path).map_err(|e| EngineError::io(&final_path, e))
        }
    }
}

/// Whether a transcript looks like it's being actively written to: its
/// mtime is within the last 2 minutes *and* a sibling `<path>.lock` file
/// names a still-running process.
pub fn is_session_active(path: &Path) -> bool {
    let Ok(meta) = fs::metadata(path) else {
        return false;
    };
    let Ok(modified) = meta.modified() else {
        return false;
    };
    let recent = SystemTime::now()
        .duration_since(modified)
        .map(|age| age.as_secs() < 120)
        .unwrap_or(false);
    if !recent {
        return false;
    }
    lock_file_pid_alive(path)
}

fn lock_file_pid_alive(path: &Path) -> bool {
    let lock_path = path.with_extension("jsonl.lock");
    let Ok(contents) = fs::read_to_string(&lock_path) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        return false;
    };
    pid_alive(pid)
}

#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    // kill(pid, 0) checks existence/permission without sending a signal.
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_index_round_trips() {
        let idx = SessionsIndex {
            version: 1,
            original_path: Some("/Users/foo/project".into()),
            entries: vec![SessionIndexEntry {
                session_id: "abc123".into(),
                full_path: "/tmp/abc123.jsonl".into(),
                file_mtime: Some(1000),
                first_prompt: Some("hi".into()),
                summary: None,
                message_count: Some(3),
                created: None,
                modified: None,
                git_branch: None,
                project_path: Some("/Users/foo/project".into()),
                is_sidechain: false,
            }],
        };
        let json = serde_json::to_string(&idx).unwrap();
        let back: SessionsIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(back.entries[0].session_id, "abc123");
    }

    #[test]
    fn missing_index_defaults_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_index(dir.path()).is_none());
    }

    // Relies on `pid_alive` actually checking liveness, which only the
    // unix implementation does (the non-unix stub always returns false).
    #[cfg(unix)]
    #[test]
    fn active_session_needs_both_recent_mtime_and_a_live_lock_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        fs::write(&path, b"{}\n").unwrap();

        // No lock file at all: never active, however fresh the mtime.
        assert!(!is_session_active(&path));

        // A lock file naming this test process (definitely alive) but a
        // stale mtime: still not active — recency is required too.
        fs::write(path.with_extension("jsonl.lock"), std::process::id().to_string()).unwrap();
        let old = filetime::FileTime::from_unix_time(0, 0);
        filetime::set_file_mtime(&path, old).unwrap();
        assert!(!is_session_active(&path));

        // Fresh mtime plus a lock file naming this (alive) process: active.
        filetime::set_file_mtime(&path, filetime::FileTime::now()).unwrap();
        assert!(is_session_active(&path));
    }

    #[test]
    fn active_session_rejects_a_dead_pid_even_with_fresh_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sess.jsonl");
        fs::write(&path, b"{}\n").unwrap();
        // PID 1 is init/launchd on real systems but never this test's own
        // process; a huge out-of-range PID is a safer "definitely not us"
        // stand-in that still parses as an integer.
        fs::write(path.with_extension("jsonl.lock"), "999999999").unwrap();
        assert!(!is_session_active(&path));
    }
}
