//! Filesystem helpers shared by the jobs

use crate::cancel::CancelFlag;
use crate::error::{AegnuxError, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Copy the directory `src` into `dst`, merging with existing contents
///
/// Existing files are overwritten. Symlinks are recreated, not followed.
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, cancel: &CancelFlag) -> Result<u64> {
    let mut copied = 0;
    fs::create_dir_all(dst)?;

    for entry in WalkDir::new(src).follow_links(false) {
        cancel.check()?;
        let entry = entry.map_err(io::Error::from)?;
        let relative = pathdiff::diff_paths(entry.path(), src).ok_or_else(|| {
            AegnuxError::Config(format!("{:?} is not below {:?}", entry.path(), src))
        })?;
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(&relative);
        let kind = entry.file_type();

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
        } else if kind.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if fs::symlink_metadata(&target).is_ok() {
                fs::remove_file(&target)?;
            }
            std::os::unix::fs::symlink(link, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Copy a file or a directory to `dst`
pub fn copy_entry(src: &Path, dst: &Path, cancel: &CancelFlag) -> Result<u64> {
    if src.is_dir() {
        return copy_tree(src, dst, cancel);
    }
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(src, dst)?;
    Ok(1)
}

/// Copy every child of `src` into `dst`; returns `None` when `src` is absent
pub fn copy_children(src: &Path, dst: &Path, cancel: &CancelFlag) -> Result<Option<u64>> {
    if !src.is_dir() {
        return Ok(None);
    }
    let mut copied = 0;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        cancel.check()?;
        copied += copy_entry(&entry.path(), &dst.join(entry.file_name()), cancel)?;
    }
    Ok(Some(copied))
}

/// Remove a directory tree; returns false if it did not exist
pub fn remove_tree(path: &Path) -> Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// First file named `name` (case-insensitive) below `root`
pub fn find_file(root: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .flatten()
        .find(|entry| {
            entry.file_type().is_file()
                && entry.file_name().to_string_lossy().eq_ignore_ascii_case(name)
        })
        .map(|entry| entry.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_tree_merges_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("aex");
        fs::create_dir_all(src.join("Red Giant/Universe")).unwrap();
        fs::write(src.join("Red Giant/Universe/u.aex"), b"new").unwrap();
        fs::write(src.join("top.aex"), b"top").unwrap();

        let dst = dir.path().join("Plug-ins");
        fs::create_dir_all(dst.join("Red Giant/Universe")).unwrap();
        fs::write(dst.join("Red Giant/Universe/u.aex"), b"old").unwrap();
        fs::write(dst.join("keep.aex"), b"keep").unwrap();

        let copied = copy_tree(&src, &dst, &CancelFlag::new()).unwrap();

        assert_eq!(copied, 2);
        assert_eq!(fs::read(dst.join("Red Giant/Universe/u.aex")).unwrap(), b"new");
        assert!(dst.join("keep.aex").exists());
    }

    #[test]
    fn copy_children_skips_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            copy_children(&dir.path().join("nope"), dir.path(), &CancelFlag::new()).unwrap();
        assert_eq!(result, None);
    }

    #[test]
    fn cancelled_copy_stops() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), b"a").unwrap();
        let cancel = CancelFlag::new();
        cancel.cancel();

        let err = copy_tree(&src, &dir.path().join("dst"), &cancel).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn remove_and_find() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("msxml/x86");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("MSXML3.DLL"), b"dll").unwrap();

        assert_eq!(
            find_file(dir.path(), "msxml3.dll"),
            Some(nested.join("MSXML3.DLL"))
        );
        assert!(remove_tree(&dir.path().join("msxml")).unwrap());
        assert!(!remove_tree(&dir.path().join("msxml")).unwrap());
    }
}
