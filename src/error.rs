use std::path::PathBuf;
use thiserror::Error;

/// The closed error taxonomy surfaced at the library boundary.
///
/// `ParseError` (malformed JSONL line) and any error inside the auto-trim
/// hook path are deliberately absent here: both are recovered locally
/// rather than surfaced as an `Err` (see `transcript::ParseWarning` and
/// `hook::run_hook`).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no transcript found matching {query:?}")]
    SessionNotFound { query: String },

    #[error("{query:?} matches {} transcripts: {}", .candidates.len(), .candidates.join(", "))]
    AmbiguousSession {
        query: String,
        candidates: Vec<String>,
    },

    #[error("no snapshot named {name:?}")]
    SnapshotNotFound { name: String },

    #[error("a snapshot named {name:?} already exists")]
    SnapshotExists { name: String },

    #[error(
        "transcript has no user or assistant messages; nothing to branch from \
         (the source session may be empty or contain only file-history entries)"
    )]
    NoConversationContent,

    #[error(
        "could not find a host project directory for {source_project_path:?}; \
         has this project been opened in the host assistant yet?"
    )]
    ProjectDirNotFound { source_project_path: String },

    #[error("host assistant binary not found on PATH")]
    HostCliNotFound,

    #[error("{}: not a valid archive (missing meta.json)", .path.display())]
    InvalidArchive { path: PathBuf },

    #[error("invalid snapshot name {name:?}: {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl EngineError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
