//! Portable `.cmv` archive export/import.
//!
//! Grounded on `parecode`'s `extract_from_tar_gz` (iterate
//! `tar::Archive::new(GzDecoder::new(...)).entries()`, match by path) for
//! the read side; the write side is the natural dual using the same two
//! crates.

use crate::error::{EngineError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Read;
use std::path::Path;

/// `meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub cmv_version: u32,
    pub snapshot_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub created_at: String,
    pub source_session_id: String,
    pub source_project_path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub parent_snapshot: Option<String>,
    #[serde(default)]
    pub claude_code_version: Option<String>,
    pub session_file_format: String,
}

pub const CURRENT_CMV_VERSION: u32 = 1;

/// Build a gzipped tar containing `meta.json` and everything under
/// `snapshot_dir/session/`, excluding `branches` (they name local session
/// ids, which are only meaningful inside the local engine home).
pub fn export(snapshot_dir: &Path, meta: &ArchiveMeta, out_path: &Path) -> Result<()> {
    let file = fs::File::create(out_path).map_err(|e| EngineError::io(out_path, e))?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let meta_json = serde_json::to_vec_pretty(meta)?;
    let mut header = tar::Header::new_ustar();
    header.set_size(meta_json.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, "meta.json", meta_json.as_slice())
        .map_err(|e| EngineError::io(out_path, e))?;

    let session_dir = snapshot_dir.join("session");
    for entry in fs::read_dir(&session_dir).map_err(|e| EngineError::io(&session_dir, e))? {
        let entry = entry.map_err(|e| EngineError::io(&session_dir, e))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = format!("session/{}", path.file_name().unwrap().to_string_lossy());
        let mut f = fs::File::open(&path).map_err(|e| EngineError::io(&path, e))?;
        let metadata = f.metadata().map_err(|e| EngineError::io(&path, e))?;
        let mut header = tar::Header::new_ustar();
        header.set_size(metadata.len());
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, &name, &mut f)
            .map_err(|e| EngineError::io(out_path, e))?;
    }

    let encoder = builder.into_inner().map_err(|e| EngineError::io(out_path, e))?;
    encoder.finish().map_err(|e| EngineError::io(out_path, e))?;
    Ok(())
}

/// The result of unpacking a `.cmv` archive: its metadata and a map from
/// archived session filename to its raw bytes (only `session/*` entries).
pub struct UnpackedArchive {
    pub meta: ArchiveMeta,
    pub session_files: Vec<(String, Vec<u8>)>,
}

/// Gunzip + untar, requiring `meta.json` at the archive root. Tolerates any extra entries.
pub fn import(archive_path: &Path) -> Result<UnpackedArchive> {
    let file = fs::File::open(archive_path).map_err(|e| EngineError::io(archive_path, e))?;
    let decoder = GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);

    let mut meta: Option<ArchiveMeta> = None;
    let mut session_files = Vec::new();

    for entry in archive.entries().map_err(|e| EngineError::io(archive_path, e))? {
        let mut entry = entry.map_err(|e| EngineError::io(archive_path, e))?;
        let path = entry.path().map_err(|e| EngineError::io(archive_path, e))?.into_owned();
        let path_str = path.to_string_lossy().to_string();
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf).map_err(|e| EngineError::io(archive_path, e))?;

        if path_str == "meta.json" {
            meta = serde_json::from_slice(&buf).ok();
        } else if let Some(name) = path_str.strip_prefix("session/") {
            session_files.push((name.to_string(), buf));
        }
    }

    let meta = meta.ok_or_else(|| EngineError::InvalidArchive {
        path: archive_path.to_path_buf(),
    })?;

    Ok(UnpackedArchive { meta, session_files })
}
