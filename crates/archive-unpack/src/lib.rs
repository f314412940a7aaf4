//! # archive-unpack
//!
//! Unpack the result archive produced by a document-conversion service and
//! find the Markdown file inside it.
//!
//! ## How it works
//!
//! 1. [`detect_format`] sniffs the first bytes: `PK\x03\x04` is a zip,
//!    `\x1f\x8b` is a gzip stream wrapping a tar.
//! 2. [`unpack`] extracts every entry below the destination directory.
//!    Both readers refuse entries whose path would escape that directory,
//!    and only regular files and directories are written: symlink and
//!    hard-link entries are skipped, so nothing extracted can point outside
//!    the destination.
//! 3. [`find_first_markdown`] walks the extracted tree depth-first, visiting
//!    siblings in lexicographic order, and returns the first `*.md` file.
//!
//! All functions are blocking. Async callers should run them inside
//! `tokio::task::spawn_blocking`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use archive_unpack::{find_first_markdown, unpack};
//! use std::path::Path;
//!
//! let bytes = std::fs::read("result.zip").unwrap();
//! let dest = Path::new("/tmp/extract");
//! unpack(&bytes, dest).unwrap();
//! let markdown = find_first_markdown(dest).unwrap();
//! println!("{}", markdown.display());
//! ```

use std::io::Cursor;
use std::path::{Path, PathBuf};

use thiserror::Error;

// ── Error type ───────────────────────────────────────────────────────────────

/// Errors returned by archive-unpack operations.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The bytes are neither a zip nor a gzip-compressed tar.
    #[error("Unsupported archive format (first bytes: {magic:02x?})")]
    UnsupportedFormat { magic: Vec<u8> },

    /// Could not create the destination or walk the extracted tree.
    #[error("I/O error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The archive reader rejected the archive or one of its entries.
    #[error("Archive extraction failed: {0}")]
    Extract(String),

    /// The extracted tree holds no `*.md` file.
    #[error("No Markdown file found under '{}'", root.display())]
    NoMarkdown { root: PathBuf },
}

// ── Format detection ─────────────────────────────────────────────────────────

/// Container formats this crate can unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// PKZIP archive (stored or deflated entries).
    Zip,
    /// POSIX tar stream compressed with gzip.
    TarGz,
}

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const ZIP_EMPTY_MAGIC: &[u8] = b"PK\x05\x06";
const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];

/// Identify the archive format from its leading bytes.
pub fn detect_format(bytes: &[u8]) -> Option<ArchiveFormat> {
    if bytes.starts_with(ZIP_MAGIC) || bytes.starts_with(ZIP_EMPTY_MAGIC) {
        Some(ArchiveFormat::Zip)
    } else if bytes.starts_with(GZIP_MAGIC) {
        Some(ArchiveFormat::TarGz)
    } else {
        None
    }
}

// ── Extraction ───────────────────────────────────────────────────────────────

/// Extract `archive_bytes` into `dest`, creating `dest` if needed.
///
/// Returns the detected format so callers can log it.
pub fn unpack(archive_bytes: &[u8], dest: &Path) -> Result<ArchiveFormat, ArchiveError> {
    let format = detect_format(archive_bytes).ok_or_else(|| ArchiveError::UnsupportedFormat {
        magic: archive_bytes.iter().take(4).copied().collect(),
    })?;

    std::fs::create_dir_all(dest).map_err(|source| ArchiveError::Io {
        path: dest.to_path_buf(),
        source,
    })?;

    match format {
        ArchiveFormat::Zip => unpack_zip(archive_bytes, dest)?,
        ArchiveFormat::TarGz => unpack_tar_gz(archive_bytes, dest)?,
    }

    Ok(format)
}

/// Read an archive from disk and extract it into `dest`.
pub fn unpack_file(archive_path: &Path, dest: &Path) -> Result<ArchiveFormat, ArchiveError> {
    let bytes = std::fs::read(archive_path).map_err(|source| ArchiveError::Io {
        path: archive_path.to_path_buf(),
        source,
    })?;
    unpack(&bytes, dest)
}

/// `st_mode` file-type bits as stored in a zip entry's external attributes.
const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

fn unpack_zip(archive_bytes: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(archive_bytes))
        .map_err(|e| ArchiveError::Extract(e.to_string()))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|e| ArchiveError::Extract(format!("zip: {e}")))?;
        if entry.unix_mode().is_some_and(|mode| mode & S_IFMT == S_IFLNK) {
            continue;
        }
        let relative = entry.enclosed_name().ok_or_else(|| {
            ArchiveError::Extract(format!("zip: entry '{}' escapes destination", entry.name()))
        })?;
        let out_path = dest.join(relative);

        if entry.is_dir() {
            create_dir(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            create_dir(parent)?;
        }
        let mut out = std::fs::File::create(&out_path).map_err(|source| ArchiveError::Io {
            path: out_path.clone(),
            source,
        })?;
        std::io::copy(&mut entry, &mut out).map_err(|source| ArchiveError::Io {
            path: out_path.clone(),
            source,
        })?;
    }
    Ok(())
}

fn unpack_tar_gz(archive_bytes: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let gz = GzDecoder::new(archive_bytes);
    let mut archive = Archive::new(gz);
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::Extract(format!("tar.gz: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::Extract(format!("tar.gz: {e}")))?;
        let kind = entry.header().entry_type();
        if !(kind.is_file() || kind.is_dir()) {
            continue;
        }
        let written = entry
            .unpack_in(dest)
            .map_err(|e| ArchiveError::Extract(format!("tar.gz: {e}")))?;
        if !written {
            let name = entry
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(ArchiveError::Extract(format!(
                "tar.gz: entry '{name}' escapes destination"
            )));
        }
    }
    Ok(())
}

fn create_dir(path: &Path) -> Result<(), ArchiveError> {
    std::fs::create_dir_all(path).map_err(|source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    })
}

// ── Markdown lookup ──────────────────────────────────────────────────────────

/// Depth-first search for the first file whose name ends in `.md`.
///
/// Siblings are visited in lexicographic order so the answer does not depend
/// on the order the filesystem happens to return directory entries in.
pub fn find_first_markdown(root: &Path) -> Result<PathBuf, ArchiveError> {
    match walk_for_markdown(root)? {
        Some(path) => Ok(path),
        None => Err(ArchiveError::NoMarkdown {
            root: root.to_path_buf(),
        }),
    }
}

fn walk_for_markdown(dir: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    let read_dir = std::fs::read_dir(dir).map_err(|source| ArchiveError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut entries: Vec<PathBuf> = Vec::new();
    for entry in read_dir {
        let entry = entry.map_err(|source| ArchiveError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        entries.push(entry.path());
    }
    entries.sort();

    for path in entries {
        if path.is_dir() {
            if let Some(found) = walk_for_markdown(&path)? {
                return Ok(Some(found));
            }
        } else if path.to_string_lossy().ends_with(".md") {
            return Ok(Some(path));
        }
    }

    Ok(None)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in files {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn detects_formats_from_magic() {
        assert_eq!(detect_format(b"PK\x03\x04rest"), Some(ArchiveFormat::Zip));
        assert_eq!(detect_format(&[0x1f, 0x8b, 0x08]), Some(ArchiveFormat::TarGz));
        assert_eq!(detect_format(b"%PDF-1.7"), None);
        assert_eq!(detect_format(b""), None);
    }

    #[test]
    fn unpacks_zip_and_finds_markdown() {
        let bytes = zip_bytes(&[
            ("out/images/a.png", b"png-bytes"),
            ("out/full.md", b"# Title\n![x](images/a.png)\n"),
        ]);
        let dir = tempfile::tempdir().unwrap();

        let format = unpack(&bytes, dir.path()).unwrap();
        assert_eq!(format, ArchiveFormat::Zip);
        assert_eq!(
            std::fs::read(dir.path().join("out/images/a.png")).unwrap(),
            b"png-bytes"
        );

        let md = find_first_markdown(dir.path()).unwrap();
        assert!(md.ends_with("out/full.md"), "got {}", md.display());
    }

    #[test]
    fn unpacks_tar_gz() {
        let bytes = tar_gz_bytes(&[("doc/result.md", b"hello"), ("doc/img/1.jpg", b"jpg")]);
        let dir = tempfile::tempdir().unwrap();

        assert_eq!(unpack(&bytes, dir.path()).unwrap(), ArchiveFormat::TarGz);
        let md = find_first_markdown(dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(md).unwrap(), "hello");
    }

    #[test]
    fn first_markdown_is_depth_first_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/nested")).unwrap();
        std::fs::create_dir_all(dir.path().join("b")).unwrap();
        std::fs::write(dir.path().join("a/nested/deep.md"), "deep").unwrap();
        std::fs::write(dir.path().join("b/shallow.md"), "shallow").unwrap();
        std::fs::write(dir.path().join("c.md"), "top").unwrap();

        let md = find_first_markdown(dir.path()).unwrap();
        assert!(md.ends_with("a/nested/deep.md"), "got {}", md.display());
    }

    #[test]
    fn missing_markdown_is_an_error() {
        let bytes = zip_bytes(&[("images/only.png", b"png")]);
        let dir = tempfile::tempdir().unwrap();
        unpack(&bytes, dir.path()).unwrap();

        let err = find_first_markdown(dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::NoMarkdown { .. }));
    }

    #[test]
    fn rejects_unknown_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack(b"not an archive", dir.path()).unwrap_err();
        assert!(err.to_string().contains("Unsupported archive format"));
    }

    #[test]
    fn corrupt_zip_is_an_extract_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = unpack(b"PK\x03\x04garbage", dir.path()).unwrap_err();
        assert!(matches!(err, ArchiveError::Extract(_)));
    }

    #[test]
    fn tar_links_are_not_extracted() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        builder
            .append_data(&mut header, "doc/full.md", &b"hello"[..])
            .unwrap();
        for (kind, name, target) in [
            (tar::EntryType::Symlink, "doc/images/leak.png", "/etc/passwd"),
            (tar::EntryType::Symlink, "doc/up", "../../.."),
            (tar::EntryType::Link, "doc/images/hard.png", "/etc/hostname"),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_entry_type(kind);
            header.set_size(0);
            header.set_mode(0o777);
            header.set_link_name(target).unwrap();
            builder
                .append_data(&mut header, name, std::io::empty())
                .unwrap();
        }
        let bytes = builder.into_inner().unwrap().finish().unwrap();

        let dir = tempfile::tempdir().unwrap();
        unpack(&bytes, dir.path()).unwrap();

        assert_eq!(
            std::fs::read_to_string(dir.path().join("doc/full.md")).unwrap(),
            "hello"
        );
        for name in ["doc/images/leak.png", "doc/up", "doc/images/hard.png"] {
            assert!(
                std::fs::symlink_metadata(dir.path().join(name)).is_err(),
                "{name} should not exist"
            );
        }
    }

    #[test]
    fn zip_symlinks_are_not_extracted() {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("out/full.md", options).unwrap();
        writer.write_all(b"# Title").unwrap();
        writer
            .add_symlink("out/images/leak.png", "/etc/passwd", options)
            .unwrap();
        let bytes = writer.finish().unwrap().into_inner();

        let dir = tempfile::tempdir().unwrap();
        unpack(&bytes, dir.path()).unwrap();

        assert!(dir.path().join("out/full.md").is_file());
        assert!(std::fs::symlink_metadata(dir.path().join("out/images/leak.png")).is_err());
    }

    #[test]
    fn zip_entry_escaping_destination_is_rejected() {
        let bytes = zip_bytes(&[("../escape.md", b"nope")]);
        let parent = tempfile::tempdir().unwrap();
        let dest = parent.path().join("dest");

        let err = unpack(&bytes, &dest).unwrap_err();
        assert!(matches!(err, ArchiveError::Extract(_)), "{err:?}");
        assert!(!parent.path().join("escape.md").exists());
    }
}
