// src/watch/patterns.rs

//! Compiled glob pattern sets.
//!
//! Used both for transform sources (`source_glob`) and for watch rules
//! (`patterns`). Entries prefixed with `!` are exclusions:
//!
//! ```toml
//! source_glob = ["app/js/**/*.js", "!app/js/main.min.js"]
//! ```
//!
//! All patterns are relative to the project root and matched against
//! forward-slash relative paths such as `"app/scss/style.scss"`; a leading
//! `./` is ignored. A `*` never crosses a `/`; use `**` for that.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::fs::FileSystem;

#[derive(Clone)]
pub struct PatternSet {
    raw: Vec<String>,
    include: GlobSet,
    exclude: Option<GlobSet>,
    /// Literal directory prefix of each include pattern (`app/images` for
    /// `app/images/**/*.png`). Walking starts from these.
    bases: Vec<PathBuf>,
    /// Directory trees that never match, e.g. the distributable tree for
    /// transform sources.
    excluded_roots: Vec<PathBuf>,
}

impl fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatternSet")
            .field("raw", &self.raw)
            .finish_non_exhaustive()
    }
}

impl PatternSet {
    pub fn compile(patterns: &[String]) -> Result<Self> {
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        let mut has_exclude = false;
        let mut bases = Vec::new();

        for pat in patterns {
            let pat = pat.trim();
            if let Some(negated) = pat.strip_prefix('!') {
                exclude.add(compile_glob(strip_cur_dir(negated))?);
                has_exclude = true;
            } else {
                let pat = strip_cur_dir(pat);
                include.add(compile_glob(pat)?);
                bases.push(glob_base(pat));
            }
        }

        let exclude = if has_exclude {
            Some(exclude.build().context("building exclude globset")?)
        } else {
            None
        };

        Ok(Self {
            raw: patterns.to_vec(),
            include: include.build().context("building include globset")?,
            exclude,
            bases,
            excluded_roots: Vec::new(),
        })
    }

    /// Add a directory whose whole tree is excluded, regardless of the
    /// patterns.
    pub fn excluding_root(mut self, root: PathBuf) -> Self {
        if !root.as_os_str().is_empty() {
            self.excluded_roots.push(root);
        }
        self
    }

    /// Whether `rel` lies in an excluded directory tree.
    pub fn is_excluded_root(&self, rel: &Path) -> bool {
        self.excluded_roots.iter().any(|r| rel.starts_with(r))
    }

    /// The patterns as written in the config.
    pub fn raw(&self) -> &[String] {
        &self.raw
    }

    /// Literal base directories of the include patterns, in declaration order.
    pub fn bases(&self) -> &[PathBuf] {
        &self.bases
    }

    /// Returns true if `rel_path` (relative to project root) is included and
    /// not excluded.
    pub fn matches(&self, rel_path: &str) -> bool {
        let rel_path = strip_cur_dir(rel_path);
        if self.is_excluded_root(Path::new(rel_path)) {
            return false;
        }
        if !self.include.is_match(rel_path) {
            return false;
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(rel_path) {
                return false;
            }
        }
        true
    }
}

fn strip_cur_dir(mut pattern: &str) -> &str {
    while let Some(rest) = pattern.strip_prefix("./") {
        pattern = rest;
    }
    pattern
}

fn compile_glob(pattern: &str) -> Result<globset::Glob> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .with_context(|| format!("invalid glob pattern: {pattern}"))
}

/// Literal directory prefix of a glob, i.e. every leading path component
/// that contains no glob metacharacter.
///
/// `app/images/**/*.{png,jpg}` -> `app/images`, `app/js/main.js` -> `app/js`.
pub fn glob_base(pattern: &str) -> PathBuf {
    let components: Vec<&str> = pattern.split('/').collect();
    let mut base = PathBuf::new();
    // The last component is always a file name pattern.
    for comp in &components[..components.len().saturating_sub(1)] {
        if comp.is_empty() || comp.contains(['*', '?', '[', '{']) {
            break;
        }
        base.push(comp);
    }
    base
}

/// Convert a path relative to the project root into the forward-slash form
/// used for matching.
pub fn rel_string(rel: &Path) -> String {
    rel.to_string_lossy().replace('\\', "/")
}

/// Collect all files under `root` that match `patterns`, as root-relative
/// paths, sorted and de-duplicated.
///
/// Only the base directories of the include patterns are walked, so a
/// pattern like `app/scss/*.scss` never scans `node_modules`.
pub fn collect_matching_files(
    fs: &dyn FileSystem,
    root: &Path,
    patterns: &PatternSet,
) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    let mut visited = BTreeSet::new();

    for base in patterns.bases() {
        if patterns.is_excluded_root(base) {
            continue;
        }
        let start = if base.as_os_str().is_empty() {
            root.to_path_buf()
        } else {
            root.join(base)
        };
        if !visited.insert(start.clone()) {
            continue;
        }
        if fs.is_file(&start) {
            push_if_match(root, &start, patterns, &mut files);
            continue;
        }
        if !fs.is_dir(&start) {
            // Base does not exist yet: matches nothing.
            continue;
        }

        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            for path in fs.read_dir(&dir)? {
                if fs.is_dir(&path) {
                    let pruned = path
                        .strip_prefix(root)
                        .is_ok_and(|rel| patterns.is_excluded_root(rel));
                    if !pruned {
                        stack.push(path);
                    }
                } else if fs.is_file(&path) {
                    push_if_match(root, &path, patterns, &mut files);
                }
            }
        }
    }

    Ok(files.into_iter().collect())
}

fn push_if_match(root: &Path, path: &Path, patterns: &PatternSet, out: &mut BTreeSet<PathBuf>) {
    if let Ok(rel) = path.strip_prefix(root) {
        if patterns.matches(&rel_string(rel)) {
            out.insert(rel.to_path_buf());
        }
    }
}
