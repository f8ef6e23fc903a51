//! Packs a staging directory into a single zstd-compressed tar archive.
//!
//! Only regular files are stored, under their path relative to the staged
//! directory; directories exist in the archive solely as path prefixes. The
//! archive is written next to the directory, never inside it.

use crate::fs::walker::{walk_directory, WalkOptions};
use crate::utils::errors::ArchiveError;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Suffix appended to the staged directory name
pub const ARCHIVE_EXTENSION: &str = "tar.zst";

/// Where the archive for `source_dir` is written: a sibling file named after
/// the directory.
pub fn archive_path_for(source_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let name = source_dir.file_name().ok_or_else(|| ArchiveError {
        path: source_dir.to_path_buf(),
        source: io::Error::new(
            io::ErrorKind::InvalidInput,
            "cannot derive an archive name from this path",
        ),
    })?;

    let mut file_name = name.to_os_string();
    file_name.push(".");
    file_name.push(ARCHIVE_EXTENSION);
    Ok(source_dir.with_file_name(file_name))
}

/// Build the archive for `source_dir` and return its path.
///
/// On failure the partially written file is removed.
pub fn build_archive(source_dir: &Path, compression_level: i32) -> Result<PathBuf, ArchiveError> {
    let archive_path = archive_path_for(source_dir)?;

    info!(
        source = %source_dir.display(),
        archive = %archive_path.display(),
        "Creating archive"
    );

    match write_archive(source_dir, &archive_path, compression_level) {
        Ok(entries) => {
            info!(entries, archive = %archive_path.display(), "Archive created");
            Ok(archive_path)
        }
        Err(e) => {
            if let Err(remove_err) = std::fs::remove_file(&archive_path) {
                if remove_err.kind() != io::ErrorKind::NotFound {
                    warn!(
                        archive = %archive_path.display(),
                        error = %remove_err,
                        "Failed to remove incomplete archive"
                    );
                }
            }
            Err(e)
        }
    }
}

fn write_archive(
    source_dir: &Path,
    archive_path: &Path,
    compression_level: i32,
) -> Result<usize, ArchiveError> {
    let at_archive = |source: io::Error| ArchiveError {
        path: archive_path.to_path_buf(),
        source,
    };

    let files = walk_directory(source_dir, &WalkOptions::default()).map_err(|e| ArchiveError {
        path: e.path,
        source: e.source,
    })?;

    let file = File::create(archive_path).map_err(at_archive)?;
    let encoder =
        zstd::Encoder::new(BufWriter::new(file), compression_level).map_err(at_archive)?;
    let mut builder = tar::Builder::new(encoder);

    for entry in &files {
        builder
            .append_path_with_name(&entry.path, &entry.relative_path)
            .map_err(|source| ArchiveError {
                path: entry.path.clone(),
                source,
            })?;
    }

    let encoder = builder.into_inner().map_err(at_archive)?;
    let mut writer = encoder.finish().map_err(at_archive)?;
    writer.flush().map_err(at_archive)?;
    let file = writer
        .into_inner()
        .map_err(|e| at_archive(e.into_error()))?;
    file.sync_all().map_err(at_archive)?;

    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use std::io::Read;
    use tempfile::TempDir;

    fn read_archive(path: &Path) -> BTreeMap<String, Vec<u8>> {
        let decoder = zstd::Decoder::new(File::open(path).unwrap()).unwrap();
        let mut archive = tar::Archive::new(decoder);
        let mut contents = BTreeMap::new();
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert!(entry.header().entry_type().is_file());
            let name = entry.path().unwrap().to_string_lossy().into_owned();
            let mut data = Vec::new();
            entry.read_to_end(&mut data).unwrap();
            contents.insert(name, data);
        }
        contents
    }

    #[test]
    fn test_archive_path_is_sibling() {
        let path = archive_path_for(Path::new("/var/dumps/2024-01-01_08-00-00")).unwrap();
        assert_eq!(path, PathBuf::from("/var/dumps/2024-01-01_08-00-00.tar.zst"));

        let trailing = archive_path_for(Path::new("/var/dumps/run/")).unwrap();
        assert_eq!(trailing, PathBuf::from("/var/dumps/run.tar.zst"));
    }

    #[test]
    fn test_archive_path_rejects_root() {
        assert!(archive_path_for(Path::new("/")).is_err());
    }

    #[test]
    fn test_round_trip_reproduces_files() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("run");
        fs::create_dir_all(staged.join("a")).unwrap();
        fs::create_dir_all(staged.join("b")).unwrap();
        fs::create_dir_all(staged.join("empty")).unwrap();
        fs::write(staged.join("a/x.txt"), b"first file").unwrap();
        fs::write(staged.join("b/y.txt"), vec![7u8; 100_000]).unwrap();

        let archive = build_archive(&staged, 3).unwrap();
        assert_eq!(archive, temp.path().join("run.tar.zst"));
        assert!(!archive.starts_with(&staged));

        let contents = read_archive(&archive);
        assert_eq!(contents.len(), 2);
        assert_eq!(contents["a/x.txt"], b"first file");
        assert_eq!(contents["b/y.txt"], vec![7u8; 100_000]);

        let out = temp.path().join("out");
        let decoder = zstd::Decoder::new(File::open(&archive).unwrap()).unwrap();
        tar::Archive::new(decoder).unpack(&out).unwrap();
        assert_eq!(fs::read(out.join("a/x.txt")).unwrap(), b"first file");
        assert_eq!(fs::read(out.join("b/y.txt")).unwrap(), vec![7u8; 100_000]);
    }

    #[test]
    fn test_missing_source_fails_without_leaving_archive() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("missing");

        let err = build_archive(&staged, 3).unwrap_err();
        assert_eq!(err.path, staged);
        assert!(!temp.path().join("missing.tar.zst").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_file_aborts_build() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("run");
        fs::create_dir_all(&staged).unwrap();
        let secret = staged.join("locked.txt");
        fs::write(&secret, b"nope").unwrap();
        fs::set_permissions(&secret, fs::Permissions::from_mode(0o000)).unwrap();

        // Root can read the file regardless of its mode.
        if File::open(&secret).is_ok() {
            return;
        }

        let err = build_archive(&staged, 3).unwrap_err();
        assert_eq!(err.path, secret);
        assert!(!temp.path().join("run.tar.zst").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_special_files_are_not_archived() {
        use std::os::unix::net::UnixListener;

        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("run");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("shop.sql"), b"--").unwrap();
        let _socket = UnixListener::bind(staged.join("pg.sock")).unwrap();

        let archive = build_archive(&staged, 3).unwrap();
        let contents = read_archive(&archive);
        assert_eq!(contents.keys().collect::<Vec<_>>(), vec!["shop.sql"]);
    }
}
