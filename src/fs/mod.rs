// src/fs/mod.rs

//! Filesystem abstraction.
//!
//! Source resolution, the built-in transforms and `clean` all go through
//! [`FileSystem`] so they can be exercised against [`mock::MockFileSystem`]
//! in tests.

use std::fmt::Debug;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};

pub mod mock;

/// Abstract filesystem interface.
pub trait FileSystem: Send + Sync + Debug {
    fn read(&self, path: &Path) -> Result<Vec<u8>>;

    fn read_to_string(&self, path: &Path) -> Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).with_context(|| format!("decoding {path:?} as UTF-8"))
    }

    /// Write a file, creating parent directories as needed.
    fn write(&self, path: &Path, contents: &[u8]) -> Result<()>;
    fn exists(&self, path: &Path) -> bool;
    fn is_file(&self, path: &Path) -> bool;
    fn is_dir(&self, path: &Path) -> bool;

    /// Return a list of entries in a directory.
    /// Returns full paths.
    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>>;

    /// Remove a file or a whole directory tree.
    ///
    /// Returns `Ok(false)` when nothing existed at `path`.
    fn remove_all(&self, path: &Path) -> Result<bool>;

    fn modified(&self, path: &Path) -> Result<SystemTime>;
}

/// Implementation that uses `std::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read(&self, path: &Path) -> Result<Vec<u8>> {
        fs::read(path).with_context(|| format!("reading file {path:?}"))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("creating dir {parent:?}"))?;
        }
        fs::write(path, contents).with_context(|| format!("writing to file {path:?}"))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_dir(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(path).with_context(|| format!("reading dir {path:?}"))? {
            let entry = entry?;
            entries.push(entry.path());
        }
        Ok(entries)
    }

    fn remove_all(&self, path: &Path) -> Result<bool> {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e).with_context(|| format!("inspecting {path:?}")),
        };

        let res = if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        };

        match res {
            Ok(()) => Ok(true),
            // Someone else removed it between the stat and the delete.
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("removing {path:?}")),
        }
    }

    fn modified(&self, path: &Path) -> Result<SystemTime> {
        fs::metadata(path)
            .and_then(|m| m.modified())
            .with_context(|| format!("reading mtime of {path:?}"))
    }
}

/// Lexically normalise a project-relative path: `./dist/./css` becomes
/// `dist/css`. Absolute paths and `..` components are rejected, so the
/// result always stays inside the project root.
pub fn normalize_relative(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir => anyhow::bail!("path {path:?} must not contain `..`"),
            Component::RootDir | Component::Prefix(_) => {
                anyhow::bail!("path {path:?} must be relative to the project root")
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_relative_drops_cur_dir_and_rejects_escapes() {
        assert_eq!(
            normalize_relative(Path::new("./dist/./images")).unwrap(),
            PathBuf::from("dist/images")
        );
        assert_eq!(normalize_relative(Path::new(".")).unwrap(), PathBuf::new());
        assert!(normalize_relative(Path::new("../outside")).is_err());
        assert!(normalize_relative(Path::new("/tmp/dist")).is_err());
    }

    #[test]
    fn real_remove_all_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("dist");
        let fs = RealFileSystem;
        fs.write(&out.join("css/style.css"), b"body{}").unwrap();

        assert!(fs.remove_all(&out).unwrap());
        assert!(!fs.remove_all(&out).unwrap());
        assert!(!out.exists());
    }
}
