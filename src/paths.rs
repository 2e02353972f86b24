//! Cross-platform path resolution for the host assistant's transcript
//! layout and this engine's own storage root (§4.5).

use crate::reader::SessionsIndex;
use std::path::{Path, PathBuf};

/// Root of the host assistant's per-project transcript storage, e.g.
/// `~/.claude`. Overridable via `CONVOY_HOST_HOME` so tests (and users
/// pointed at a non-default install) don't need to touch the real home
/// directory.
pub fn host_home() -> PathBuf {
    if let Ok(p) = std::env::var("CONVOY_HOST_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".claude")
}

/// Root of this engine's own storage: snapshots, master index, config,
/// auto-trim log and backups. Overridable via
/// `CONVOY_HOME` for the same reason as `host_home`.
pub fn engine_home() -> PathBuf {
    if let Ok(p) = std::env::var("CONVOY_HOME") {
        return PathBuf::from(p);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".convoy")
}

/// Encode a project filesystem path into the host's directory-name scheme:
/// strip a leading separator, drop colons, replace every remaining
/// separator with `--`. Lossy; callers that need
/// the original path back should prefer `sessions-index.json`'s
/// `originalPath` over decoding this name.
pub fn encode_project_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    let s = s.strip_prefix('/').unwrap_or(&s);
    let s = s.replace(':', "");
    s.replace(['/', '\\'], "--")
}

/// Best-effort reverse of `encode_project_path`, preferring the
/// `sessions-index.json`'s recorded original path when available since the
/// encoding is lossy.
pub fn decode_project_dir_name(name: &str, sessions_index: Option<&SessionsIndex>) -> String {
    if let Some(idx) = sessions_index {
        if let Some(original) = &idx.original_path {
            return original.clone();
        }
        if let Some(entry) = idx.entries.first() {
            if let Some(p) = &entry.project_path {
                return p.clone();
            }
        }
    }
    format!("/{}", name.replace("--", "/"))
}

/// The host project directory for an already-encoded project path.
pub fn project_dir_for_encoded(encoded: &str) -> PathBuf {
    host_home().join("projects").join(encoded)
}

/// The host project directory for a filesystem project path.
pub fn project_dir_for(project_path: &Path) -> PathBuf {
    project_dir_for_encoded(&encode_project_path(project_path))
}

/// All per-project directories currently present under the host's
/// `projects/` root, in arbitrary order.
pub fn all_project_dirs() -> Vec<PathBuf> {
    let root = host_home().join("projects");
    let Ok(entries) = std::fs::read_dir(&root) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_leading_slash_and_separators() {
        assert_eq!(
            encode_project_path(Path::new("/Users/foo/my-project")),
            "Users--foo--my-project"
        );
    }

    #[test]
    fn strips_colons() {
        assert_eq!(
            encode_project_path(Path::new("/c:/Users/foo")),
            "c--Users--foo"
        );
    }

    #[test]
    fn decode_without_index_best_effort() {
        assert_eq!(
            decode_project_dir_name("Users--foo--my-project", None),
            "/Users/foo/my-project"
        );
    }
}
