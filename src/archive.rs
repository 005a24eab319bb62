//! Job archive extraction.

use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;

/// Extract a zip archive into `dest`. Returns the number of entries.
///
/// Entries whose names would escape `dest` are rejected by the zip reader.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("open archive {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("read zip archive {}", archive_path.display()))?;
    let entries = archive.len();
    archive
        .extract(dest)
        .with_context(|| format!("extract {} into {}", archive_path.display(), dest.display()))?;
    log::info!(
        "extracted {} entries from {}",
        entries,
        archive_path.display()
    );
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn extracts_nested_entries() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("job.zip");
        write_zip(
            &zip_path,
            &[("notes.txt", b"hello"), ("clips/cam1.MP4", b"not really video")],
        );

        let count = extract_archive(&zip_path, dir.path()).unwrap();

        assert_eq!(count, 2);
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"hello");
        assert!(dir.path().join("clips/cam1.MP4").is_file());
    }

    #[test]
    fn non_zip_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("job.zip");
        std::fs::write(&bogus, b"definitely not a zip").unwrap();

        assert!(extract_archive(&bogus, dir.path()).is_err());
    }

    #[test]
    fn missing_archive_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract_archive(&dir.path().join("absent.zip"), dir.path()).is_err());
    }
}
