//! Directory tree helpers

use std::fs;
use std::io;
use std::path::Path;

use tracing::warn;

/// Recursively copy `src` into `dst`, returning the number of bytes copied.
///
/// Symlinks are skipped so a vendored tree can never smuggle a link to a
/// host path into a session workspace.
pub fn copy_tree(src: &Path, dst: &Path) -> io::Result<u64> {
    fs::create_dir_all(dst)?;
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        let target = dst.join(entry.file_name());
        if file_type.is_symlink() {
            warn!(path = %entry.path().display(), "Skipping symlink in vendored tree");
        } else if file_type.is_dir() {
            copied += copy_tree(&entry.path(), &target)?;
        } else if file_type.is_file() {
            copied += fs::copy(entry.path(), &target)?;
        }
    }
    Ok(copied)
}

/// Total size of regular files under `path`, not following symlinks.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_copy_tree_and_size() {
        let src = tempdir().unwrap();
        fs::create_dir_all(src.path().join("pkg/sub")).unwrap();
        fs::write(src.path().join("pkg/__init__.py"), "x = 1\n").unwrap();
        fs::write(src.path().join("pkg/sub/mod.py"), "y = 2\n").unwrap();

        let dst = tempdir().unwrap();
        let target = dst.path().join("site-packages");
        let copied = copy_tree(src.path(), &target).unwrap();

        assert_eq!(copied, 12);
        assert_eq!(dir_size(&target).unwrap(), 12);
        assert_eq!(
            fs::read_to_string(target.join("pkg/sub/mod.py")).unwrap(),
            "y = 2\n"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_skips_symlinks() {
        let src = tempdir().unwrap();
        std::os::unix::fs::symlink("/etc", src.path().join("escape")).unwrap();
        fs::write(src.path().join("ok.py"), "").unwrap();

        let dst = tempdir().unwrap();
        copy_tree(src.path(), dst.path()).unwrap();

        assert!(dst.path().join("ok.py").exists());
        assert!(fs::symlink_metadata(dst.path().join("escape")).is_err());
    }
}
