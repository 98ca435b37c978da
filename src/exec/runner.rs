// src/exec/runner.rs

//! Executes one task invocation to completion.
//!
//! Composites expand recursively: `sequential` children run one by one and
//! the first failure is returned unchanged; `concurrent` children are spawned
//! on a `JoinSet` and every child runs to completion before failures are
//! reported together as an [`AggregateError`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, anyhow};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::dag::{Pipeline, ServiceSpec, TaskSpec};
use crate::errors::{AggregateError, AssetflowError, Result, TransformError};
use crate::exec::service::ServiceSupervisor;
use crate::fs::FileSystem;
use crate::sink::{Notification, NotifySink};
use crate::transform::{Outputs, Transform, TransformInput, resolve_sources};
use crate::types::{CompositionMode, FailureAction};

pub type RunFuture = Pin<Box<dyn Future<Output = Result<Outputs>> + Send>>;

#[derive(Debug)]
pub struct TaskRunner {
    pipeline: Arc<Pipeline>,
    root: PathBuf,
    fs: Arc<dyn FileSystem>,
    sink: Arc<dyn NotifySink>,
    services: Option<Arc<ServiceSupervisor>>,
}

impl TaskRunner {
    pub fn new(
        pipeline: Arc<Pipeline>,
        root: impl Into<PathBuf>,
        fs: Arc<dyn FileSystem>,
        sink: Arc<dyn NotifySink>,
    ) -> Self {
        Self {
            pipeline,
            root: root.into(),
            fs,
            sink,
            services: None,
        }
    }

    /// Allow service tasks, owned by `supervisor`.
    pub fn with_services(mut self, supervisor: Arc<ServiceSupervisor>) -> Self {
        self.services = Some(supervisor);
        self
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    /// Run `task` and everything below it. Resolves to the set of paths
    /// written, relative to the project root.
    pub fn run(self: &Arc<Self>, task: &str) -> RunFuture {
        let this = Arc::clone(self);
        let task = task.to_string();
        Box::pin(async move { this.run_task(&task).await })
    }

    async fn run_task(self: Arc<Self>, name: &str) -> Result<Outputs> {
        let spec = self
            .pipeline
            .task(name)
            .cloned()
            .ok_or_else(|| AssetflowError::config(format!("unknown task '{name}'")))?;

        debug!(task = %name, kind = spec.kind_label(), "running task");

        match spec {
            TaskSpec::Transform(transform) => self.run_transform(name, &transform).await,
            TaskSpec::Composite {
                mode: CompositionMode::Sequential,
                children,
            } => self.run_sequential(name, &children).await,
            TaskSpec::Composite {
                mode: CompositionMode::Concurrent,
                children,
            } => self.run_concurrent(name, &children).await,
            TaskSpec::Clean { root } => self.run_clean(name, &root),
            TaskSpec::Service(service) => self.run_service(name, &service).await,
        }
    }

    async fn run_sequential(self: &Arc<Self>, name: &str, children: &[String]) -> Result<Outputs> {
        let mut outputs = Outputs::new();
        for (i, child) in children.iter().enumerate() {
            match self.run(child).await {
                Ok(out) => outputs.extend(out),
                Err(err) => {
                    let skipped = &children[i + 1..];
                    warn!(
                        task = %name,
                        failed = %child,
                        ?skipped,
                        "sequential group aborted"
                    );
                    return Err(err);
                }
            }
        }
        Ok(outputs)
    }

    async fn run_concurrent(self: &Arc<Self>, name: &str, children: &[String]) -> Result<Outputs> {
        let mut set = JoinSet::new();
        for (idx, child) in children.iter().enumerate() {
            let fut = self.run(child);
            set.spawn(async move { (idx, fut.await) });
        }

        let mut results: Vec<Option<Result<Outputs>>> = children.iter().map(|_| None).collect();
        let mut panicked = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, res)) => results[idx] = Some(res),
                Err(e) => panicked.push(AssetflowError::Other(anyhow!("child task aborted: {e}"))),
            }
        }

        let mut outputs = Outputs::new();
        let mut failures = Vec::new();
        for res in results.into_iter().flatten() {
            match res {
                Ok(out) => outputs.extend(out),
                Err(err) => failures.push(err),
            }
        }
        failures.extend(panicked);

        if failures.is_empty() {
            Ok(outputs)
        } else {
            let aggregate = AggregateError::from_failures(failures);
            warn!(task = %name, failed = aggregate.len(), "concurrent group failed");
            Err(aggregate.into())
        }
    }

    async fn run_transform(&self, task: &str, name: &str) -> Result<Outputs> {
        let transform = self
            .pipeline
            .transform(name)
            .ok_or_else(|| AssetflowError::config(format!("unknown transform '{name}'")))?;

        match self.invoke(transform.as_ref()).await {
            Ok(outputs) => {
                for path in &outputs {
                    self.sink.notify(Notification::Changed(path.clone()));
                }
                Ok(outputs)
            }
            Err(err) if transform.settings().failure_action() == FailureAction::Notify => {
                warn!(task = %task, error = %err, "transform failed; notifying and continuing");
                self.sink.notify(Notification::Failed {
                    task: task.to_string(),
                    message: err.to_string(),
                });
                Ok(Outputs::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn invoke(&self, transform: &dyn Transform) -> std::result::Result<Outputs, TransformError> {
        let name = transform.name();
        let sources = resolve_sources(transform, self.fs.as_ref(), &self.root)?;
        if sources.is_empty() {
            debug!(transform = %name, "no matching sources; skipping");
            return Ok(Outputs::new());
        }

        let started = Instant::now();
        let outputs = transform
            .run(TransformInput {
                root: &self.root,
                sources: &sources,
                fs: self.fs.as_ref(),
            })
            .await?;

        let out_root = transform.settings().output_path();
        if let Some(stray) = outputs.iter().find(|p| !p.starts_with(out_root)) {
            return Err(TransformError::new(
                name,
                "output",
                format!(
                    "wrote '{}' outside its output location '{}'",
                    stray.display(),
                    out_root.display()
                ),
            ));
        }

        info!(
            transform = %name,
            sources = sources.len(),
            outputs = outputs.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "transform finished"
        );
        Ok(outputs)
    }

    fn run_clean(&self, task: &str, root: &Path) -> Result<Outputs> {
        let target = self.root.join(root);
        let removed = self
            .fs
            .remove_all(&target)
            .with_context(|| format!("removing {:?}", target))
            .map_err(|e| TransformError::from_anyhow(task, "clean", &e))?;
        if removed {
            info!(task = %task, root = %root.display(), "cleaned output tree");
        } else {
            debug!(task = %task, root = %root.display(), "nothing to clean");
        }
        Ok(Outputs::new())
    }

    async fn run_service(&self, task: &str, service: &ServiceSpec) -> Result<Outputs> {
        let supervisor = self.services.as_ref().ok_or_else(|| {
            AssetflowError::config(format!(
                "task '{task}' starts a service, which needs a long-running session (`dev`)"
            ))
        })?;
        supervisor.ensure_started(task, service).await?;
        Ok(Outputs::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::PipelineBuilder;
    use crate::fs::mock::MockFileSystem;
    use crate::sink::LogSink;
    use crate::transform::{CopyTransform, TransformSettings};

    fn copy(name: &str, glob: &str, out: &str) -> Arc<dyn Transform> {
        let settings = TransformSettings::new(&[glob.to_string()], out).unwrap();
        Arc::new(CopyTransform::new(name, settings, None))
    }

    #[tokio::test]
    async fn clean_then_copy_in_sequence() {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("./app/img/a.png", "a");
        fs.add_file("./dist/stale.txt", "old");

        let pipeline = PipelineBuilder::new()
            .transform(copy("images", "app/img/*.png", "dist/img"))
            .task("clean", TaskSpec::clean("dist"))
            .task("build", TaskSpec::sequential(["clean", "images"]))
            .build()
            .unwrap();

        let runner = Arc::new(TaskRunner::new(
            Arc::new(pipeline),
            ".",
            fs.clone(),
            Arc::new(LogSink),
        ));
        let outputs = runner.run("build").await.unwrap();

        assert_eq!(outputs, Outputs::from([PathBuf::from("dist/img/a.png")]));
        assert!(!fs.exists(Path::new("./dist/stale.txt")));
        assert!(fs.exists(Path::new("./dist/img/a.png")));
    }

    #[tokio::test]
    async fn zero_sources_is_a_noop_success() {
        let fs = Arc::new(MockFileSystem::new());
        let pipeline = PipelineBuilder::new()
            .transform(copy("fonts", "app/fonts/**/*", "dist/fonts"))
            .build()
            .unwrap();
        let runner = Arc::new(TaskRunner::new(
            Arc::new(pipeline),
            ".",
            fs,
            Arc::new(LogSink),
        ));

        assert!(runner.run("fonts").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn services_need_a_supervisor() {
        let pipeline = PipelineBuilder::new()
            .task("serve", TaskSpec::Service(ServiceSpec::new("sleep 5")))
            .build()
            .unwrap();
        let runner = Arc::new(TaskRunner::new(
            Arc::new(pipeline),
            ".",
            Arc::new(MockFileSystem::new()),
            Arc::new(LogSink),
        ));

        assert!(matches!(
            runner.run("serve").await,
            Err(AssetflowError::Configuration(_))
        ));
    }
}
