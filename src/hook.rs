//! Auto-trim hook protocol: the one piece of host-assistant
//! glue that stays in scope, because the work it does — backup rotation,
//! trimming, logging — is all §4 engine behavior, not CLI/TUI plumbing.
//!
//! `run_hook` never returns an `Err`: every failure path is reported as
//! data (`HookOutcome`) so the thin `convoy-hook` binary can uniformly
//! `process::exit(0)` regardless of what happened inside, per §6.4 step 7
//! ("any error anywhere in the hook path, exit 0 — the hook must never
//! break the host") and §7's "Hook path, any: Swallowed" policy.

use crate::config::EngineConfig;
use crate::paths;
use crate::trim::{self, TrimOptions};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const LOG_CAP: usize = 50;

/// Which of the two host events fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum HookTrigger {
    PreCompact,
    PostToolUse,
}

impl HookTrigger {
    fn as_str(self) -> &'static str {
        match self {
            HookTrigger::PreCompact => "PreCompact",
            HookTrigger::PostToolUse => "PostToolUse",
        }
    }
}

/// The stdin payload: `{session_id, transcript_path,
/// trigger, cwd}`.
#[derive(Debug, Clone, Deserialize)]
pub struct HookTriggerInput {
    pub session_id: String,
    pub transcript_path: String,
    pub trigger: HookTrigger,
    #[serde(default)]
    pub cwd: String,
}

/// What happened inside `run_hook`. Never surfaced as an error — the
/// binary exits 0 either way; this is purely for the debug-mode `eprintln`.
#[derive(Debug)]
pub enum HookOutcome {
    /// Nothing to do (missing file, below the size gate, etc).
    Skipped(String),
    Trimmed {
        original_bytes: u64,
        trimmed_bytes: u64,
        reduction_percent: f64,
        backup_path: PathBuf,
    },
    Error(String),
}

/// One ring-buffer entry in `auto-trim-log.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoTrimLogEntry {
    pub timestamp: String,
    pub session_id: String,
    pub trigger: String,
    pub original_bytes: u64,
    pub trimmed_bytes: u64,
    pub reduction_percent: f64,
    pub backup_path: String,
}

fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .to_rfc3339()
}

fn now_compact_timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    chrono::DateTime::from_timestamp(secs as i64, 0)
        .unwrap_or_default()
        .format("%Y%m%dT%H%M%S")
        .to_string()
}

/// Write a timestamped copy of `transcript_path` into `<home>/auto-backups/`
/// and rotate, keeping the `max_backups` most recent per session id
///.
fn backup_and_rotate(home: &Path, session_id: &str, transcript_path: &Path, max_backups: u32) -> std::io::Result<PathBuf> {
    let backups_dir = home.join("auto-backups");
    fs::create_dir_all(&backups_dir)?;
    let backup_name = format!("{session_id}-{}.jsonl", now_compact_timestamp());
    let backup_path = backups_dir.join(&backup_name);
    fs::copy(transcript_path, &backup_path)?;

    let prefix = format!("{session_id}-");
    let mut existing: Vec<PathBuf> = fs::read_dir(&backups_dir)?
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    existing.sort();
    let keep = max_backups as usize;
    if existing.len() > keep {
        for stale in &existing[..existing.len() - keep] {
            let _ = fs::remove_file(stale);
        }
    }
    Ok(backup_path)
}

/// Append `entry` to the capped ring buffer at `<home>/auto-trim-log.json`
///.
fn append_log_entry(home: &Path, entry: AutoTrimLogEntry) -> std::io::Result<()> {
    let path = home.join("auto-trim-log.json");
    let mut entries: Vec<AutoTrimLogEntry> = fs::read_to_string(&path)
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default();
    entries.push(entry);
    if entries.len() > LOG_CAP {
        let excess = entries.len() - LOG_CAP;
        entries.drain(0..excess);
    }
    let tmp_path = home.join(format!("auto-trim-log.json.tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp_path, serde_json::to_string_pretty(&entries)?)?;
    match fs::rename(&tmp_path, &path) {
        Ok(()) => Ok(()),
        Err(_) => {
            let _ = fs::remove_file(&path);
            fs::rename(&tmp_path, &path)
        }
    }
}

/// Run the auto-trim protocol for one hook invocation. Bounded stdin reading (step 1) happens in the `convoy-hook`
/// binary, not here.
pub fn run_hook(input: &HookTriggerInput) -> HookOutcome {
    let transcript_path = Path::new(&input.transcript_path);
    if !transcript_path.exists() {
        return HookOutcome::Skipped("transcript file does not exist".into());
    }

    let home = paths::engine_home();
    let config = match EngineConfig::load(&home.join("config.json")) {
        Ok(c) => c,
        Err(e) => return HookOutcome::Error(e.to_string()),
    };

    if input.trigger == HookTrigger::PostToolUse {
        let size = match fs::metadata(transcript_path) {
            Ok(m) => m.len(),
            Err(e) => return HookOutcome::Error(e.to_string()),
        };
        if size < config.auto_trim.size_threshold_bytes {
            return HookOutcome::Skipped("below size threshold".into());
        }
    }

    let backup_path = match backup_and_rotate(
        &home,
        &input.session_id,
        transcript_path,
        config.auto_trim.max_backups,
    ) {
        Ok(p) => p,
        Err(e) => return HookOutcome::Error(e.to_string()),
    };

    let tmp_path = transcript_path.with_extension(format!("jsonl.tmp-{}", uuid::Uuid::new_v4().simple()));
    let opts = TrimOptions {
        stub_threshold: config.auto_trim.threshold as usize,
    };
    let metrics = match trim::trim(transcript_path, &tmp_path, opts) {
        Ok(m) => m,
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            return HookOutcome::Error(e.to_string());
        }
    };
    if let Err(e) = fs::rename(&tmp_path, transcript_path) {
        let _ = fs::remove_file(&tmp_path);
        return HookOutcome::Error(e.to_string());
    }

    let reduction_percent = if metrics.original_bytes == 0 {
        0.0
    } else {
        (1.0 - metrics.trimmed_bytes as f64 / metrics.original_bytes as f64) * 100.0
    };

    let log_entry = AutoTrimLogEntry {
        timestamp: now_iso8601(),
        session_id: input.session_id.clone(),
        trigger: input.trigger.as_str().to_string(),
        original_bytes: metrics.original_bytes,
        trimmed_bytes: metrics.trimmed_bytes,
        reduction_percent,
        backup_path: backup_path.to_string_lossy().to_string(),
    };
    if let Err(e) = append_log_entry(&home, log_entry) {
        return HookOutcome::Error(e.to_string());
    }

    HookOutcome::Trimmed {
        original_bytes: metrics.original_bytes,
        trimmed_bytes: metrics.trimmed_bytes,
        reduction_percent,
        backup_path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::sync::Mutex;

    // `CONVOY_HOME` is process-global; serialize the tests below so they
    // don't race on each other's value.
    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn write_transcript(dir: &Path, session_id: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(format!("{session_id}.jsonl"));
        let mut f = fs::File::create(&path).unwrap();
        for line in lines {
            writeln!(f, "{line}").unwrap();
        }
        path
    }

    #[test]
    fn skips_missing_transcript() {
        let input = HookTriggerInput {
            session_id: "nope".into(),
            transcript_path: "/nonexistent/path.jsonl".into(),
            trigger: HookTrigger::PreCompact,
            cwd: "/tmp".into(),
        };
        assert!(matches!(run_hook(&input), HookOutcome::Skipped(_)));
    }

    #[test]
    fn post_tool_use_skips_below_size_threshold() {
        let _guard = ENV_GUARD.lock().unwrap();
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("CONVOY_HOME", home.path()); }
        let path = write_transcript(project.path(), "sess-small", &[r#"{"type":"user","message":{"content":"hi"}}"#]);

        let input = HookTriggerInput {
            session_id: "sess-small".into(),
            transcript_path: path.to_string_lossy().to_string(),
            trigger: HookTrigger::PostToolUse,
            cwd: "/tmp".into(),
        };
        assert!(matches!(run_hook(&input), HookOutcome::Skipped(_)));
        unsafe { std::env::remove_var("CONVOY_HOME"); }
    }

    #[test]
    fn pre_compact_trims_and_backs_up_regardless_of_size() {
        let _guard = ENV_GUARD.lock().unwrap();
        let home = tempfile::tempdir().unwrap();
        let project = tempfile::tempdir().unwrap();
        unsafe { std::env::set_var("CONVOY_HOME", home.path()); }
        let path = write_transcript(
            project.path(),
            "sess-pre",
            &[
                r#"{"type":"file-history-snapshot","data":{}}"#,
                r#"{"type":"user","message":{"content":"hi"}}"#,
            ],
        );

        let input = HookTriggerInput {
            session_id: "sess-pre".into(),
            transcript_path: path.to_string_lossy().to_string(),
            trigger: HookTrigger::PreCompact,
            cwd: "/tmp".into(),
        };
        match run_hook(&input) {
            HookOutcome::Trimmed { backup_path, .. } => assert!(backup_path.exists()),
            other => panic!("expected Trimmed, got {other:?}"),
        }
        let rewritten = fs::read_to_string(&path).unwrap();
        assert!(!rewritten.contains("file-history-snapshot"));
        let log = fs::read_to_string(home.path().join("auto-trim-log.json")).unwrap();
        assert!(log.contains("sess-pre"));
        unsafe { std::env::remove_var("CONVOY_HOME"); }
    }
}
