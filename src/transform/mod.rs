// src/transform/mod.rs

//! Transforms: the atomic "read sources, write artifacts" operations.
//!
//! The orchestration core only sees the [`Transform`] trait. Concrete kinds
//! (markup inclusion, style compilation, bundling, image encoding) are
//! plug-ins; the built-in ones are:
//!
//! - [`copy::CopyTransform`]: copy sources into the output tree.
//! - [`concat::ConcatTransform`]: concatenate sources into one file.
//! - [`command::CommandTransform`]: run an external command.
//!
//! The runner resolves `source_glob` before calling [`Transform::run`], so a
//! transform receives the concrete source file set.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;

use crate::config::model::{TransformConfig, TransformKind};
use crate::errors::{AssetflowError, Result, TransformError};
use crate::fs::{FileSystem, normalize_relative};
use crate::types::FailureAction;
use crate::watch::patterns::{PatternSet, collect_matching_files};

pub mod command;
pub mod concat;
pub mod copy;

pub use command::CommandTransform;
pub use concat::ConcatTransform;
pub use copy::CopyTransform;

/// Paths written by a transform, relative to the project root.
pub type Outputs = BTreeSet<PathBuf>;

pub type TransformFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<Outputs, TransformError>> + Send + 'a>>;

/// Options every transform kind recognises.
#[derive(Debug, Clone)]
pub struct TransformSettings {
    sources: PatternSet,
    output_path: PathBuf,
    output_file: Option<String>,
    compression_level: Option<u8>,
    target_environments: Vec<String>,
    failure_action: FailureAction,
}

impl TransformSettings {
    /// `output_path` is normalised lexically (`./dist` and `dist` are the
    /// same location) and must stay inside the project root.
    pub fn new(source_glob: &[String], output_path: impl AsRef<Path>) -> Result<Self> {
        let sources = PatternSet::compile(source_glob)
            .map_err(|e| AssetflowError::config(format!("{e:#}")))?;
        let output_path = normalize_relative(output_path.as_ref())
            .map_err(|e| AssetflowError::config(format!("output_path: {e:#}")))?;
        if output_path.as_os_str().is_empty() {
            return Err(AssetflowError::config(
                "output_path must name a directory below the project root",
            ));
        }
        Ok(Self {
            sources,
            output_path,
            output_file: None,
            compression_level: None,
            target_environments: Vec::new(),
            failure_action: FailureAction::default(),
        })
    }

    pub fn with_output_file(mut self, file: impl Into<String>) -> Self {
        self.output_file = Some(file.into());
        self
    }

    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = Some(level);
        self
    }

    pub fn with_target_environments(mut self, targets: Vec<String>) -> Self {
        self.target_environments = targets;
        self
    }

    pub fn with_failure_action(mut self, action: FailureAction) -> Self {
        self.failure_action = action;
        self
    }

    /// Never resolve sources below `root`, whatever the patterns say.
    pub fn with_excluded_root(mut self, root: &Path) -> Result<Self> {
        let root = normalize_relative(root)
            .map_err(|e| AssetflowError::config(format!("excluded root: {e:#}")))?;
        self.sources = self.sources.excluding_root(root);
        Ok(self)
    }

    pub fn sources(&self) -> &PatternSet {
        &self.sources
    }

    /// Output directory, relative to the project root.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn output_file(&self) -> Option<&str> {
        self.output_file.as_deref()
    }

    pub fn compression_level(&self) -> Option<u8> {
        self.compression_level
    }

    pub fn target_environments(&self) -> &[String] {
        &self.target_environments
    }

    pub fn failure_action(&self) -> FailureAction {
        self.failure_action
    }

    /// The artifact location this transform owns exclusively: the output
    /// file when one is named, otherwise the output directory.
    pub fn declared_output(&self) -> PathBuf {
        match &self.output_file {
            Some(file) => self.output_path.join(file),
            None => self.output_path.clone(),
        }
    }
}

/// Everything a transform gets for one invocation.
pub struct TransformInput<'a> {
    /// Project root; all relative paths are resolved against it.
    pub root: &'a Path,
    /// Matched source files, relative to `root`, sorted.
    pub sources: &'a [PathBuf],
    pub fs: &'a dyn FileSystem,
}

pub trait Transform: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn settings(&self) -> &TransformSettings;

    /// Read `input.sources`, write under the declared output location and
    /// return the written paths.
    fn run<'a>(&'a self, input: TransformInput<'a>) -> TransformFuture<'a>;
}

/// Resolve a transform's `source_glob` against the filesystem.
pub fn resolve_sources(
    transform: &dyn Transform,
    fs: &dyn FileSystem,
    root: &Path,
) -> std::result::Result<Vec<PathBuf>, TransformError> {
    collect_matching_files(fs, root, transform.settings().sources())
        .with_context(|| format!("resolving sources {:?}", transform.settings().sources().raw()))
        .map_err(|e| TransformError::from_anyhow(transform.name(), "sources", &e))
}

/// Instantiate the built-in transform described by a `[transform.<name>]`
/// section. The section has already passed static validation.
///
/// Nothing under `dist_root` is ever resolved as a source.
pub fn build_transform(
    name: &str,
    cfg: &TransformConfig,
    dist_root: &Path,
) -> Result<Arc<dyn Transform>> {
    let in_transform = |e: AssetflowError| match e {
        AssetflowError::Configuration(msg) => {
            AssetflowError::config(format!("transform '{name}': {msg}"))
        }
        other => other,
    };
    let mut settings = TransformSettings::new(&cfg.source_glob, &cfg.output_path)
        .and_then(|s| s.with_excluded_root(dist_root))
        .map_err(in_transform)?
        .with_target_environments(cfg.target_environments.clone())
        .with_failure_action(cfg.failure_action);
    if let Some(level) = cfg.compression_level {
        let level = u8::try_from(level)
            .map_err(|_| AssetflowError::config(format!("transform '{name}': bad compression_level")))?;
        settings = settings.with_compression_level(level);
    }
    if let Some(file) = &cfg.output_file {
        settings = settings.with_output_file(file.clone());
    }

    let transform: Arc<dyn Transform> = match cfg.kind {
        TransformKind::Copy => Arc::new(CopyTransform::new(name, settings, cfg.base.clone())),
        TransformKind::Concat => {
            let separator = cfg.separator.clone().unwrap_or_else(|| "\n".to_string());
            Arc::new(ConcatTransform::new(name, settings, separator)?)
        }
        TransformKind::Command => {
            let cmd = cfg.cmd.clone().ok_or_else(|| {
                AssetflowError::config(format!("transform '{name}': command kind requires `cmd`"))
            })?;
            Arc::new(CommandTransform::new(name, settings, cmd))
        }
    };
    Ok(transform)
}
