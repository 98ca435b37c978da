// src/engine/mod.rs

//! Watch-rule engine.
//!
//! Turns filesystem changes and explicit requests into task runs:
//! - per-task slots (`idle → triggered → running → idle`) with debounce and
//!   at most one pending re-run while running ([`slots`]);
//! - self-trigger suppression and conflict-aware dispatch;
//! - graceful drain on shutdown.
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::time::Duration;

use crate::transform::Outputs;
use crate::types::{TaskName, TriggerReason, WatchEventKind};

pub mod core;
pub mod runtime;
pub mod slots;

pub use core::{CoreCommand, CoreRuntime, CoreStep};
pub use runtime::Runtime;
pub use slots::{SlotState, SlotTable};

/// Result of one task run, as reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { outputs: Outputs },
    Failed { error: String },
}

/// A task run handed to the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledRun {
    pub task: TaskName,
    pub run_id: u64,
    pub reason: TriggerReason,
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeOptions {
    /// Window between the first qualifying event and the run.
    pub debounce: Duration,
    /// How long shutdown waits for running tasks before aborting them.
    pub grace_period: Duration,
    /// Exit once nothing is triggered or running.
    pub exit_when_idle: bool,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            grace_period: Duration::from_secs(5),
            exit_when_idle: false,
        }
    }
}

/// Events flowing into the runtime from the watcher, executor, timers and
/// signal handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A filesystem change, path relative to the project root.
    FileChanged { path: String, kind: WatchEventKind },
    /// Explicit request to run a task.
    TaskRequested { task: TaskName, reason: TriggerReason },
    /// The debounce timer started for `ticket` fired.
    DebounceElapsed { task: TaskName, ticket: u64 },
    TaskCompleted {
        task: TaskName,
        run_id: u64,
        outcome: TaskOutcome,
    },
    /// Graceful shutdown requested (e.g. Ctrl-C). A second request aborts.
    ShutdownRequested,
}
