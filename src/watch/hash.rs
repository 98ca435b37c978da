// src/watch/hash.rs

//! Content hashing for `use_hash = true`: a modify event whose file content
//! did not change (touch, editor save without edits) is dropped.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::debug;

use crate::fs::FileSystem;

/// Hash of a single file's content.
pub fn compute_file_hash(fs: &dyn FileSystem, path: &Path) -> Result<String> {
    let bytes = fs
        .read(path)
        .with_context(|| format!("reading file for hashing: {:?}", path))?;
    let mut hasher = Hasher::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().to_hex().to_string())
}

/// Last seen content hash per watched path. In memory only.
#[derive(Debug, Default)]
pub struct ContentHashes {
    seen: HashMap<String, String>,
}

impl ContentHashes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `hash` for `rel_path`; true if it differs from the last one
    /// (or the path is new).
    pub fn changed(&mut self, rel_path: &str, hash: String) -> bool {
        match self.seen.insert(rel_path.to_string(), hash) {
            Some(previous) => {
                let changed = self.seen.get(rel_path) != Some(&previous);
                if !changed {
                    debug!(path = rel_path, "content unchanged");
                }
                changed
            }
            None => true,
        }
    }

    pub fn forget(&mut self, rel_path: &str) {
        self.seen.remove(rel_path);
    }
}
