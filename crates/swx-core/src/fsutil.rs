//! Directory-tree primitives shared by the backup engine and the mutator's
//! pre-patch backups: copy a file-or-tree, remove tolerantly, and the
//! `.before-restore` sibling convention.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Recursively copy `source` (file or directory) to `target`, creating
/// parent directories as needed. Symlinks inside the tree are skipped.
pub(crate) fn copy_path(source: &Path, target: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(source)
        .with_context(|| format!("failed to stat {}", source.display()))?;
    if meta.file_type().is_symlink() {
        return Ok(());
    }
    if meta.is_file() {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::copy(source, target).with_context(|| {
            format!("failed to copy {} -> {}", source.display(), target.display())
        })?;
        return Ok(());
    }

    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", source.display()))?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("failed to relativize {}", entry.path().display()))?;
        let destination = target.join(relative);
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            fs::create_dir_all(&destination)
                .with_context(|| format!("failed to create {}", destination.display()))?;
        } else {
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            fs::copy(entry.path(), &destination).with_context(|| {
                format!(
                    "failed to copy {} -> {}",
                    entry.path().display(),
                    destination.display()
                )
            })?;
        }
    }
    Ok(())
}

/// Remove a file or directory tree; a missing path is not an error.
pub(crate) fn remove_path(path: &Path) -> Result<()> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_context(|| format!("failed to stat {}", path.display())),
    };
    if meta.is_dir() {
        fs::remove_dir_all(path)
            .with_context(|| format!("failed to remove {}", path.display()))?;
    } else {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
    }
    Ok(())
}

/// Keep a copy of a live file next to itself before a restore overwrites
/// it. Directories are not preserved this way; they get replaced outright.
pub(crate) fn preserve_before_restore(live: &Path) -> Result<()> {
    if !live.is_file() {
        return Ok(());
    }
    let mut sibling = live.as_os_str().to_owned();
    sibling.push(".before-restore");
    fs::copy(live, Path::new(&sibling)).with_context(|| {
        format!("failed to preserve {} before restore", live.display())
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copy_path_reproduces_nested_trees() -> Result<()> {
        let tmp = tempdir()?;
        let source = tmp.path().join("src");
        fs::create_dir_all(source.join("a/b"))?;
        fs::write(source.join("top.txt"), b"top")?;
        fs::write(source.join("a/b/leaf.txt"), b"leaf")?;

        let target = tmp.path().join("dst");
        copy_path(&source, &target)?;

        assert_eq!(fs::read(target.join("top.txt"))?, b"top");
        assert_eq!(fs::read(target.join("a/b/leaf.txt"))?, b"leaf");
        Ok(())
    }

    #[test]
    fn copy_path_handles_single_files() -> Result<()> {
        let tmp = tempdir()?;
        let source = tmp.path().join("file.bin");
        fs::write(&source, b"payload")?;
        let target = tmp.path().join("nested/dir/file.bin");
        copy_path(&source, &target)?;
        assert_eq!(fs::read(target)?, b"payload");
        Ok(())
    }

    #[test]
    fn remove_path_tolerates_missing_targets() -> Result<()> {
        let tmp = tempdir()?;
        remove_path(&tmp.path().join("not-there"))?;
        let dir = tmp.path().join("tree");
        fs::create_dir_all(dir.join("inner"))?;
        fs::write(dir.join("inner/x"), b"x")?;
        remove_path(&dir)?;
        assert!(!dir.exists());
        Ok(())
    }

    #[test]
    fn preserve_before_restore_copies_files_only() -> Result<()> {
        let tmp = tempdir()?;
        let live = tmp.path().join("settings.json");
        fs::write(&live, b"{}")?;
        preserve_before_restore(&live)?;
        assert!(tmp.path().join("settings.json.before-restore").exists());

        let dir = tmp.path().join("tree");
        fs::create_dir_all(&dir)?;
        preserve_before_restore(&dir)?;
        assert!(!tmp.path().join("tree.before-restore").exists());
        Ok(())
    }
}
