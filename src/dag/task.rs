// src/dag/task.rs

use std::path::PathBuf;
use std::time::Duration;

use regex::Regex;

use crate::errors::{AssetflowError, Result};
use crate::types::{CompositionMode, TaskName};

/// What a named task does when invoked.
#[derive(Debug, Clone)]
pub enum TaskSpec {
    /// Run the transform with this name.
    Transform(String),
    /// Run child tasks one after another, or all at once.
    Composite {
        mode: CompositionMode,
        children: Vec<TaskName>,
    },
    /// Recursively remove an output root (relative to the project root).
    Clean { root: PathBuf },
    /// Start a long-running process.
    Service(ServiceSpec),
}

impl TaskSpec {
    pub fn sequential<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        TaskSpec::Composite {
            mode: CompositionMode::Sequential,
            children: children.into_iter().map(Into::into).collect(),
        }
    }

    pub fn concurrent<I, S>(children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskName>,
    {
        TaskSpec::Composite {
            mode: CompositionMode::Concurrent,
            children: children.into_iter().map(Into::into).collect(),
        }
    }

    pub fn clean(root: impl Into<PathBuf>) -> Self {
        TaskSpec::Clean { root: root.into() }
    }

    /// Direct children of a composite; empty for every other kind.
    pub fn children(&self) -> &[TaskName] {
        match self {
            TaskSpec::Composite { children, .. } => children,
            _ => &[],
        }
    }

    pub fn kind_label(&self) -> &'static str {
        match self {
            TaskSpec::Transform(_) => "transform",
            TaskSpec::Composite {
                mode: CompositionMode::Sequential,
                ..
            } => "sequential",
            TaskSpec::Composite {
                mode: CompositionMode::Concurrent,
                ..
            } => "concurrent",
            TaskSpec::Clean { .. } => "clean",
            TaskSpec::Service(_) => "service",
        }
    }
}

/// A long-running process and its readiness condition.
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    cmd: String,
    ready_on_stdout: Option<Regex>,
    ready_after: Option<Duration>,
}

impl ServiceSpec {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            ready_on_stdout: None,
            ready_after: None,
        }
    }

    pub fn with_ready_on_stdout(mut self, pattern: &str) -> Result<Self> {
        let re = Regex::new(pattern)
            .map_err(|e| AssetflowError::config(format!("invalid ready_on_stdout regex: {e}")))?;
        self.ready_on_stdout = Some(re);
        Ok(self)
    }

    pub fn with_ready_after(mut self, after: Duration) -> Self {
        self.ready_after = Some(after);
        self
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    pub fn ready_on_stdout(&self) -> Option<&Regex> {
        self.ready_on_stdout.as_ref()
    }

    pub fn ready_after(&self) -> Option<Duration> {
        self.ready_after
    }
}
