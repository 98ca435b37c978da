// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime hands scheduled runs to an `ExecutorBackend` instead of
//! running them itself. This makes it easy to swap in a fake executor in
//! tests while keeping the production executor here.
//!
//! - `RealExecutorBackend` runs each task through a [`TaskRunner`] on its
//!   own Tokio task and reports `TaskCompleted` back to the runtime.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::engine::{RuntimeEvent, ScheduledRun, TaskOutcome};
use crate::errors::Result;
use crate::exec::runner::TaskRunner;

/// Trait abstracting how scheduled runs are executed.
pub trait ExecutorBackend: Send {
    /// Start the given run. Completion is reported asynchronously as
    /// `RuntimeEvent::TaskCompleted`.
    fn dispatch(
        &mut self,
        run: ScheduledRun,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Stop every run that is still executing.
    fn abort_all(&mut self);
}

/// Real executor backend used in production.
#[derive(Debug)]
pub struct RealExecutorBackend {
    runner: Arc<TaskRunner>,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    running: JoinSet<()>,
}

impl RealExecutorBackend {
    pub fn new(runner: Arc<TaskRunner>, runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runner,
            runtime_tx,
            running: JoinSet::new(),
        }
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn dispatch(
        &mut self,
        run: ScheduledRun,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Reap finished runs so the set does not grow without bound.
        while self.running.try_join_next().is_some() {}

        let runner = Arc::clone(&self.runner);
        let tx = self.runtime_tx.clone();

        self.running.spawn(async move {
            let ScheduledRun { task, run_id, .. } = run;
            let outcome = match runner.run(&task).await {
                Ok(outputs) => TaskOutcome::Success { outputs },
                Err(err) => TaskOutcome::Failed {
                    error: err.to_string(),
                },
            };
            if tx
                .send(RuntimeEvent::TaskCompleted {
                    task: task.clone(),
                    run_id,
                    outcome,
                })
                .await
                .is_err()
            {
                debug!(task = %task, run_id, "runtime gone before completion was reported");
            }
        });

        Box::pin(async { Ok(()) })
    }

    fn abort_all(&mut self) {
        if !self.running.is_empty() {
            warn!(count = self.running.len(), "aborting running tasks");
        }
        self.running.abort_all();
    }
}
