// src/errors.rs

//! Crate-wide error types.
//!
//! - [`AssetflowError::Configuration`] is raised while loading config or
//!   constructing the task graph, always before any task runs.
//! - [`TransformError`] describes a single transform failure.
//! - [`AggregateError`] collects every failure of a `concurrent` group.

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AssetflowError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AssetflowError {
    pub fn config(msg: impl Into<String>) -> Self {
        AssetflowError::Configuration(msg.into())
    }
}

/// A single transform run failed.
///
/// `stage` names the step that failed (`sources`, `run`, `output`, ...);
/// `cause` keeps the full underlying error chain as text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("transform '{transform}' failed during {stage}: {cause}")]
pub struct TransformError {
    pub transform: String,
    pub stage: String,
    pub cause: String,
}

impl TransformError {
    pub fn new(
        transform: impl Into<String>,
        stage: impl Into<String>,
        cause: impl fmt::Display,
    ) -> Self {
        Self {
            transform: transform.into(),
            stage: stage.into(),
            cause: cause.to_string(),
        }
    }

    /// Build from an `anyhow` error, keeping the whole context chain.
    pub fn from_anyhow(
        transform: impl Into<String>,
        stage: impl Into<String>,
        err: &anyhow::Error,
    ) -> Self {
        Self::new(transform, stage, format!("{err:#}"))
    }
}

/// One or more children of a `concurrent` group failed.
#[derive(Error, Debug)]
pub struct AggregateError {
    pub errors: Vec<AssetflowError>,
}

impl AggregateError {
    /// Collect child failures, flattening nested aggregates so callers
    /// always see the leaf errors.
    pub fn from_failures(failures: Vec<AssetflowError>) -> Self {
        let mut errors = Vec::with_capacity(failures.len());
        for err in failures {
            match err {
                AssetflowError::Aggregate(inner) => errors.extend(inner.errors),
                other => errors.push(other),
            }
        }
        Self { errors }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} task(s) failed", self.errors.len())?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{sep}{err}")?;
        }
        Ok(())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, AssetflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_flattens_nested_groups() {
        let inner = AggregateError::from_failures(vec![
            TransformError::new("a", "run", "boom").into(),
            TransformError::new("b", "run", "bang").into(),
        ]);
        let outer = AggregateError::from_failures(vec![
            inner.into(),
            AssetflowError::config("bad"),
        ]);

        assert_eq!(outer.len(), 3);
        let text = outer.to_string();
        assert!(text.starts_with("3 task(s) failed: "));
        assert!(text.contains("transform 'a' failed during run: boom"));
    }
}
