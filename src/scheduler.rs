// src/scheduler.rs

//! Entry points: [`Scheduler::run_once`] for one-shot builds and
//! [`Scheduler::run_forever`] for the interactive watch session.
//!
//! A `Scheduler` owns all mutable build state of one session (slots,
//! in-flight runs, services); several can coexist in one process.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::config::model::ConfigSection;
use crate::dag::Pipeline;
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::errors::{AssetflowError, Result};
use crate::exec::{RealExecutorBackend, ServiceSupervisor, TaskRunner};
use crate::fs::{FileSystem, RealFileSystem};
use crate::sink::{LogSink, NotifySink};
use crate::transform::Outputs;
use crate::types::{TaskName, TriggerReason};
use crate::watch::spawn_watcher;

#[derive(Debug, Clone, Copy)]
pub struct SchedulerSettings {
    pub debounce: Duration,
    pub grace_period: Duration,
    pub use_hash: bool,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&ConfigSection::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(cfg: &ConfigSection) -> Self {
        Self {
            debounce: Duration::from_millis(cfg.debounce_ms),
            grace_period: Duration::from_secs(cfg.grace_period_secs),
            use_hash: cfg.use_hash,
        }
    }
}

/// Summary of a successful [`Scheduler::run_once`].
#[derive(Debug, Clone)]
pub struct RunReport {
    pub task: TaskName,
    pub outputs: Outputs,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    sink: Arc<dyn NotifySink>,
    settings: SchedulerSettings,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, root: impl Into<PathBuf>) -> Self {
        Self {
            pipeline,
            root: root.into(),
            fs: Arc::new(RealFileSystem),
            sink: Arc::new(LogSink),
            settings: SchedulerSettings::default(),
        }
    }

    pub fn with_fs(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotifySink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_settings(mut self, settings: SchedulerSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    fn ensure_task(&self, task: &str) -> Result<()> {
        if self.pipeline.contains(task) {
            Ok(())
        } else {
            Err(AssetflowError::config(format!("unknown task '{task}'")))
        }
    }

    /// Run `task` to completion and return what it wrote.
    ///
    /// Graphs that start services are rejected: nothing would own the
    /// processes once this returns.
    pub async fn run_once(&self, task: &str) -> Result<RunReport> {
        self.ensure_task(task)?;
        if self.pipeline.has_service(task) {
            return Err(AssetflowError::config(format!(
                "task '{task}' starts a service and can only run in a watch session"
            )));
        }

        info!(task = %task, "running task once");
        let started = Instant::now();
        let runner = Arc::new(TaskRunner::new(
            Arc::clone(&self.pipeline),
            self.root.clone(),
            Arc::clone(&self.fs),
            Arc::clone(&self.sink),
        ));

        match runner.run(task).await {
            Ok(outputs) => {
                let elapsed = started.elapsed();
                info!(
                    task = %task,
                    outputs = outputs.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "task finished"
                );
                Ok(RunReport {
                    task: task.to_string(),
                    outputs,
                    elapsed,
                })
            }
            Err(err) => {
                error!(task = %task, "task failed: {err}");
                Err(err)
            }
        }
    }

    /// Watch the project and keep outputs up to date until `shutdown`
    /// resolves, then drain running tasks and stop services.
    ///
    /// `initial` (typically the dev task) is submitted as a manual trigger
    /// through the same engine as file-triggered runs.
    pub async fn run_forever<S>(&self, initial: Option<&str>, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        if let Some(task) = initial {
            self.ensure_task(task)?;
        }

        let services = Arc::new(ServiceSupervisor::new(self.root.clone()));
        let runner = Arc::new(
            TaskRunner::new(
                Arc::clone(&self.pipeline),
                self.root.clone(),
                Arc::clone(&self.fs),
                Arc::clone(&self.sink),
            )
            .with_services(Arc::clone(&services)),
        );

        let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(256);

        let _watcher = spawn_watcher(
            self.root.clone(),
            Arc::clone(&self.pipeline),
            rt_tx.clone(),
            self.settings.use_hash,
        )?;

        // First signal drains; a Ctrl-C after that aborts running tasks.
        let forwarder = {
            let tx = rt_tx.clone();
            tokio::spawn(async move {
                shutdown.await;
                if tx.send(RuntimeEvent::ShutdownRequested).await.is_err() {
                    return;
                }
                if tokio::signal::ctrl_c().await.is_ok() {
                    let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
                }
            })
        };

        if let Some(task) = initial {
            rt_tx
                .send(RuntimeEvent::TaskRequested {
                    task: task.to_string(),
                    reason: TriggerReason::Manual,
                })
                .await
                .map_err(|e| AssetflowError::Other(e.into()))?;
        }

        let options = RuntimeOptions {
            debounce: self.settings.debounce,
            grace_period: self.settings.grace_period,
            exit_when_idle: false,
        };
        let core = CoreRuntime::new(Arc::clone(&self.pipeline), options);
        let backend = RealExecutorBackend::new(runner, rt_tx.clone());
        let runtime = Runtime::new(core, &rt_tx, rt_rx, backend, Arc::clone(&self.sink));
        drop(rt_tx);

        let result = runtime.run().await;
        forwarder.abort();
        services.shutdown().await;
        result.map(|_| ())
    }
}
