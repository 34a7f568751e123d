//! Atomic file replacement.
//!
//! Rewrites (file edits and the lock file) are committed with a
//! write-then-rename protocol: the content goes to a temp file created in
//! the target's directory, is synced to disk, gets the target's prior mode
//! (or 0644), and is renamed over the target. A reader never observes a
//! half-written file, and a failed write leaves the target untouched.

use std::io::Write;
use std::path::Path;

use crate::core::VbumpError;

/// Atomically replace `path` with `content`.
pub fn atomic_replace(path: &Path, content: &[u8]) -> Result<(), VbumpError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| VbumpError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| VbumpError::io(dir, e))?;
    tmp.write_all(content)
        .and_then(|()| tmp.as_file().sync_all())
        .map_err(|e| VbumpError::io(tmp.path(), e))?;

    // carry over the target's permissions when it is a regular file
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(path)
            .ok()
            .filter(std::fs::Metadata::is_file)
            .map_or(0o644, |m| m.permissions().mode());
        std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(mode))
            .map_err(|e| VbumpError::io(tmp.path(), e))?;
    }

    tmp.persist(path)
        .map_err(|e| VbumpError::io(path, e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn replaces_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file.txt");
        std::fs::write(&target, "old").unwrap();

        atomic_replace(&target, b"new").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "new");
    }

    #[test]
    fn creates_missing_target() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("fresh.txt");

        atomic_replace(&target, b"hello").unwrap();
        assert_eq!(std::fs::read_to_string(&target).unwrap(), "hello");
    }

    #[cfg(unix)]
    #[test]
    fn preserves_prior_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("script.sh");
        std::fs::write(&target, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&target, std::fs::Permissions::from_mode(0o755)).unwrap();

        atomic_replace(&target, b"#!/bin/sh\necho hi\n").unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn new_files_get_0644() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let target = dir.path().join("plain.txt");

        atomic_replace(&target, b"data").unwrap();
        let mode = std::fs::metadata(&target).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file.txt");
        atomic_replace(&target, b"x").unwrap();

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("file.txt")]);
    }
}
