use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// Canonical task name type used throughout the crate.
pub type TaskName = String;

/// How a composite task runs its children.
///
/// Fixed at definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionMode {
    /// Run children one after another; the first failure aborts the rest.
    Sequential,
    /// Start all children together and wait for every one of them.
    Concurrent,
}

impl fmt::Display for CompositionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompositionMode::Sequential => f.write_str("sequential"),
            CompositionMode::Concurrent => f.write_str("concurrent"),
        }
    }
}

/// Kind of filesystem event a watch rule can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchEventKind {
    Created,
    Modified,
    Deleted,
}

impl FromStr for WatchEventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "created" | "create" => Ok(WatchEventKind::Created),
            "modified" | "modify" | "change" => Ok(WatchEventKind::Modified),
            "deleted" | "delete" | "removed" => Ok(WatchEventKind::Deleted),
            other => Err(format!(
                "invalid watch event: {other} (expected \"created\", \"modified\" or \"deleted\")"
            )),
        }
    }
}

/// What to do when a transform fails.
///
/// - `Abort` (default): the task fails and the error propagates.
/// - `Notify`: the failure is pushed to the notification sink and the task
///   continues as if it had written nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureAction {
    #[default]
    Abort,
    Notify,
}

/// Why a task was submitted to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerReason {
    /// Explicit invocation (initial dev graph, CLI).
    Manual,
    /// Triggered by a filesystem event matching a watch rule.
    FileWatch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_event_kind_accepts_aliases() {
        assert_eq!("change".parse::<WatchEventKind>(), Ok(WatchEventKind::Modified));
        assert_eq!(" Deleted ".parse::<WatchEventKind>(), Ok(WatchEventKind::Deleted));
        assert!("renamed".parse::<WatchEventKind>().is_err());
    }
}
