use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use assetflow::engine::{RuntimeEvent, ScheduledRun, TaskOutcome};
use assetflow::errors::Result;
use assetflow::exec::ExecutorBackend;
use assetflow::transform::Outputs;
use assetflow::types::{TaskName, WatchEventKind};

/// A fake executor that:
/// - records which tasks were "run"
/// - immediately reports `TaskCompleted` for each dispatched run, with the
///   configured outputs (or a failure)
/// - optionally injects events "while" a task runs, before its completion
/// - optionally never completes a task, like a hung tool.
pub struct FakeExecutor {
    runtime_tx: tokio::sync::mpsc::Sender<RuntimeEvent>,
    executed: Arc<Mutex<Vec<String>>>,
    outputs: HashMap<TaskName, Outputs>,
    failing: HashSet<TaskName>,
    hanging: HashSet<TaskName>,
    during_first_run: HashMap<TaskName, Vec<RuntimeEvent>>,
    echo_outputs: bool,
    aborted: Arc<Mutex<usize>>,
}

impl FakeExecutor {
    pub fn new(
        runtime_tx: tokio::sync::mpsc::Sender<RuntimeEvent>,
        executed: Arc<Mutex<Vec<String>>>,
    ) -> Self {
        Self {
            runtime_tx,
            executed,
            outputs: HashMap::new(),
            failing: HashSet::new(),
            hanging: HashSet::new(),
            during_first_run: HashMap::new(),
            echo_outputs: false,
            aborted: Arc::new(Mutex::new(0)),
        }
    }

    /// Report these paths as written whenever `task` succeeds.
    pub fn with_outputs(mut self, task: &str, paths: &[&str]) -> Self {
        self.outputs
            .insert(task.to_string(), paths.iter().map(PathBuf::from).collect());
        self
    }

    pub fn failing(mut self, task: &str) -> Self {
        self.failing.insert(task.to_string());
        self
    }

    /// Never report completion for `task`.
    pub fn hanging(mut self, task: &str) -> Self {
        self.hanging.insert(task.to_string());
        self
    }

    /// Send `events` while the first run of `task` is in progress.
    pub fn during_first_run(mut self, task: &str, events: Vec<RuntimeEvent>) -> Self {
        self.during_first_run.insert(task.to_string(), events);
        self
    }

    /// Emit a `Modified` event for every output before completing, the way
    /// a real watcher sees a task's own writes.
    pub fn echo_outputs(mut self) -> Self {
        self.echo_outputs = true;
        self
    }

    pub fn abort_count(&self) -> Arc<Mutex<usize>> {
        Arc::clone(&self.aborted)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn dispatch(
        &mut self,
        run: ScheduledRun,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let mut injected = self.during_first_run.remove(&run.task).unwrap_or_default();
        let hangs = self.hanging.contains(&run.task);

        let outcome = if self.failing.contains(&run.task) {
            TaskOutcome::Failed {
                error: format!("{} failed", run.task),
            }
        } else {
            TaskOutcome::Success {
                outputs: self.outputs.get(&run.task).cloned().unwrap_or_default(),
            }
        };
        if self.echo_outputs {
            if let TaskOutcome::Success { outputs } = &outcome {
                injected.extend(outputs.iter().map(|p| RuntimeEvent::FileChanged {
                    path: p.to_string_lossy().into_owned(),
                    kind: WatchEventKind::Modified,
                }));
            }
        }

        Box::pin(async move {
            executed.lock().unwrap().push(run.task.clone());

            for event in injected {
                tx.send(event).await.map_err(anyhow::Error::from)?;
            }
            if hangs {
                return Ok(());
            }

            tx.send(RuntimeEvent::TaskCompleted {
                task: run.task,
                run_id: run.run_id,
                outcome,
            })
            .await
            .map_err(anyhow::Error::from)?;
            Ok(())
        })
    }

    fn abort_all(&mut self) {
        *self.aborted.lock().unwrap() += 1;
    }
}
