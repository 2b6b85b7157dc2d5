//! File-system helpers for the database directory.
//!
//! Restrictive protection means owner-only permissions on Unix (0700 for
//! directories, 0600 for files). Other platforms rely on the per-user
//! profile directory ACLs.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::Result;

/// Creates `dir` (and its parents) if it does not exist yet.
///
/// # Errors
///
/// Returns an error if the directory cannot be created.
pub fn ensure_directory_exists(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Applies restrictive protection to `path` and, for directories, to every
/// file directly inside it.
///
/// # Errors
///
/// Returns an error if permissions cannot be read or changed.
pub fn protect(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = fs::metadata(path)?;
        if metadata.is_dir() {
            fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
            for entry in fs::read_dir(path)? {
                let entry = entry?;
                if entry.file_type()?.is_file() {
                    fs::set_permissions(entry.path(), fs::Permissions::from_mode(0o600))?;
                }
            }
        } else {
            fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
        }
    }
    #[cfg(not(unix))]
    {
        let _ = fs::metadata(path)?;
    }
    Ok(())
}

/// Deletes the file at `path`, treating a missing file as success.
///
/// Returns `true` if a file was removed.
///
/// # Errors
///
/// Returns an error for any failure other than the file not existing.
pub fn delete_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_directory_exists_creates_nested() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_directory_exists(&nested).unwrap();
        assert!(nested.is_dir());

        // Idempotent
        ensure_directory_exists(&nested).unwrap();
    }

    #[test]
    fn test_delete_if_exists() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, b"x").unwrap();

        assert!(delete_if_exists(&file).unwrap());
        assert!(!file.exists());
        assert!(!delete_if_exists(&file).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_protect_sets_owner_only_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let db_dir = dir.path().join("database");
        ensure_directory_exists(&db_dir).unwrap();
        let file = db_dir.join("db.sqlite");
        fs::write(&file, b"x").unwrap();

        protect(&db_dir).unwrap();

        let dir_mode = fs::metadata(&db_dir).unwrap().permissions().mode() & 0o777;
        let file_mode = fs::metadata(&file).unwrap().permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
        assert_eq!(file_mode, 0o600);
    }

    #[test]
    fn test_protect_missing_path_fails() {
        let dir = tempdir().unwrap();
        assert!(protect(&dir.path().join("missing")).is_err());
    }
}
