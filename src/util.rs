use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::{AppError, AppResult};

/// Write `bytes` to `path` through a sibling temp file so readers never see a
/// partial file. The parent directory must already exist.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> AppResult<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(parent).map_err(|err| {
        AppError::from(err)
            .with_context("operation", "write_atomic_tmp")
            .with_context("path", path.display().to_string())
    })?;
    tmp.write_all(bytes)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|err| {
            AppError::from(err)
                .with_context("operation", "write_atomic_write")
                .with_context("path", path.display().to_string())
        })?;
    tmp.persist(path).map_err(|err| {
        AppError::from(err.error)
            .with_context("operation", "write_atomic_persist")
            .with_context("path", path.display().to_string())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn commit_writes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        write_atomic(&path, b"hello").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn overwrite_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("file.txt");
        fs::write(&path, b"old").unwrap();
        write_atomic(&path, b"new").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn missing_parent_fails_without_creating_it() {
        let dir = tempdir().unwrap();
        let bad_path = dir.path().join("missing").join("file.txt");
        let err = write_atomic(&bad_path, b"data").expect_err("parent missing");
        assert_eq!(
            err.context().get("operation").map(String::as_str),
            Some("write_atomic_tmp")
        );
        assert!(!bad_path.parent().unwrap().exists());
    }
}
