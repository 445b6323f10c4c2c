//! Archive extraction
//!
//! Only members with the target extension are written out; everything
//! else in the archive is skipped. Members are streamed, never buffered
//! whole.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{IrcBookError, Result, TransferErrorKind};

/// Local file header signature
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Whether the file on disk is a zip archive
pub fn is_zip(path: &Path) -> bool {
    let mut magic = [0u8; 4];
    File::open(path)
        .and_then(|mut f| f.read_exact(&mut magic))
        .map(|_| &magic == ZIP_MAGIC)
        .unwrap_or(false)
}

/// Extract members ending in `.<extension>` into `dest_dir`.
/// Returns the written paths; an empty list means nothing matched.
pub fn extract_matching(archive_path: &Path, dest_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    info!("Extracting .{} members from {}", extension, archive_path.display());
    let suffix = format!(".{}", extension.to_ascii_lowercase());
    let mut archive = ZipArchive::new(File::open(archive_path)?)?;
    let mut written = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let Some(name) = entry
            .enclosed_name()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        else {
            warn!("Skipping archive member with unsafe path: {}", entry.name());
            continue;
        };
        if !name.to_ascii_lowercase().ends_with(&suffix) {
            debug!("Discarding archive member {}", name);
            continue;
        }

        let out_path = available_path(dest_dir, &name);
        let result = File::create(&out_path).and_then(|file| {
            let mut writer = BufWriter::new(file);
            io::copy(&mut entry, &mut writer)?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()
        });
        if let Err(e) = result {
            let _ = fs::remove_file(&out_path);
            for path in &written {
                let _ = fs::remove_file(path);
            }
            return Err(IrcBookError::transfer_error(
                TransferErrorKind::IoFailure,
                format!("Failed to extract {}: {}", name, e),
            ));
        }
        debug!("Extracted {}", out_path.display());
        written.push(out_path);
    }

    info!("Extracted {} member(s) from {}", written.len(), archive_path.display());
    Ok(written)
}

/// Async wrapper running the extraction on the blocking pool
pub async fn extract_archive(archive_path: PathBuf, dest_dir: PathBuf, extension: String) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || extract_matching(&archive_path, &dest_dir, &extension))
        .await
        .map_err(|e| IrcBookError::transfer_error(TransferErrorKind::IoFailure, format!("Extraction task failed: {}", e)))?
}

/// First path in `dir` named `name`, or `name (n)` when taken
pub fn available_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((s, e)) if !s.is_empty() => (s, format!(".{}", e)),
        _ => (name, String::new()),
    };
    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, ext)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
pub(crate) fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_only_target_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("book.epub", b"epub-bytes"), ("cover.jpg", b"jpeg-bytes")]);
        assert!(is_zip(&archive));

        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        let extracted = extract_matching(&archive, &out, "epub").unwrap();
        assert_eq!(extracted, vec![out.join("book.epub")]);
        assert_eq!(fs::read(out.join("book.epub")).unwrap(), b"epub-bytes");
        assert!(!out.join("cover.jpg").exists());
    }

    #[test]
    fn test_no_matching_members() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("cover.jpg", b"jpeg-bytes")]);
        let extracted = extract_matching(&archive, dir.path(), "epub").unwrap();
        assert!(extracted.is_empty());
    }

    #[test]
    fn test_nested_member_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("bundle.zip");
        write_zip(&archive, &[("inner/dir/Book.EPUB", b"x")]);
        let extracted = extract_matching(&archive, dir.path(), "epub").unwrap();
        assert_eq!(extracted, vec![dir.path().join("Book.EPUB")]);
    }

    #[test]
    fn test_available_path() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(available_path(dir.path(), "a.epub"), dir.path().join("a.epub"));
        fs::write(dir.path().join("a.epub"), b"").unwrap();
        assert_eq!(available_path(dir.path(), "a.epub"), dir.path().join("a (1).epub"));
    }

    #[test]
    fn test_is_zip_rejects_plain_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.epub.zip");
        fs::write(&path, b"not really a zip").unwrap();
        assert!(!is_zip(&path));
        assert!(!is_zip(&dir.path().join("missing")));
    }
}
