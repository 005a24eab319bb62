//! Video asset lookup.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File extensions recognized as video, compared case-insensitively.
pub const VIDEO_EXTENSIONS: &[&str] = &["mp4", "avi", "mov", "mkv"];

pub fn is_video_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            VIDEO_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Find the first video file under `dir`.
///
/// The walk is top-down: files in a directory are checked before its
/// subdirectories, and entries are visited in name order so the choice is
/// stable across runs.
pub fn find_video(dir: &Path) -> Result<Option<PathBuf>> {
    let walker = WalkDir::new(dir)
        .follow_links(false)
        .sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        });

    for entry in walker {
        let entry = entry.with_context(|| format!("walk directory {}", dir.display()))?;
        if entry.file_type().is_file() && is_video_file(entry.path()) {
            return Ok(Some(entry.into_path()));
        }
    }

    Ok(None)
}
