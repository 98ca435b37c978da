// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! [`CoreRuntime`] consumes [`RuntimeEvent`]s and produces:
//! - an updated core state
//! - a list of [`CoreCommand`]s describing what the IO shell should do next
//!
//! The async shell (`engine::runtime::Runtime`) owns the channels, timers,
//! executor and notification sink. The core has no Tokio types and does not
//! perform any IO, so every scheduling rule is unit tested here.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::dag::Pipeline;
use crate::engine::slots::{SlotState, SlotTable, TriggerOutcome};
use crate::engine::{RuntimeEvent, RuntimeOptions, ScheduledRun, TaskOutcome};
use crate::transform::Outputs;
use crate::types::{TaskName, TriggerReason, WatchEventKind};
use crate::watch::rules::RuleAction;

/// Command produced by the pure core, to be executed by the IO shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreCommand {
    /// Send this run to the executor.
    Dispatch(ScheduledRun),
    /// Start a debounce timer; deliver `DebounceElapsed { task, ticket }`.
    StartDebounce { task: TaskName, ticket: u64 },
    /// Push a changed path to the notification sink.
    Notify(PathBuf),
    /// Shutdown began with tasks still running: start the grace period.
    StartGracePeriod,
    /// Abort every running task now.
    AbortRunning,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone, Default)]
pub struct CoreStep {
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

#[derive(Debug)]
pub struct CoreRuntime {
    pipeline: Arc<Pipeline>,
    options: RuntimeOptions,
    slots: SlotTable,
    /// Paths written by each task's last successful run.
    last_outputs: HashMap<TaskName, Outputs>,
    dispatched: HashMap<TaskName, usize>,
    next_run_id: u64,
    next_ticket: u64,
    draining: bool,
}

impl CoreRuntime {
    pub fn new(pipeline: Arc<Pipeline>, options: RuntimeOptions) -> Self {
        Self {
            pipeline,
            options,
            slots: SlotTable::new(),
            last_outputs: HashMap::new(),
            dispatched: HashMap::new(),
            next_run_id: 1,
            next_ticket: 1,
            draining: false,
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    /// Number of task runs currently executing.
    pub fn in_flight(&self) -> usize {
        self.slots.in_flight()
    }

    /// How many times `task` has been dispatched.
    pub fn dispatch_count(&self, task: &str) -> usize {
        self.dispatched.get(task).copied().unwrap_or(0)
    }

    pub fn slot(&self, task: &str) -> SlotState {
        self.slots.state(task)
    }

    pub fn is_idle(&self) -> bool {
        self.slots.is_idle()
    }

    pub fn is_draining(&self) -> bool {
        self.draining
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        let mut commands = Vec::new();

        match event {
            RuntimeEvent::FileChanged { path, kind } => {
                self.handle_file_change(&path, kind, &mut commands);
            }
            RuntimeEvent::TaskRequested { task, reason } => {
                self.handle_request(&task, reason, &mut commands);
            }
            RuntimeEvent::DebounceElapsed { task, ticket } => {
                self.slots.debounce_elapsed(&task, ticket);
            }
            RuntimeEvent::TaskCompleted {
                task,
                run_id,
                outcome,
            } => {
                self.handle_completion(&task, run_id, outcome);
            }
            RuntimeEvent::ShutdownRequested => {
                return self.handle_shutdown();
            }
        }

        self.dispatch_ready(&mut commands);
        let keep_running = !self.should_exit();
        CoreStep {
            commands,
            keep_running,
        }
    }

    fn handle_file_change(&mut self, path: &str, kind: WatchEventKind, commands: &mut Vec<CoreCommand>) {
        if self.draining {
            debug!(path, "shutting down; ignoring file change");
            return;
        }

        // All matching rules fire, in declaration order.
        let pipeline = Arc::clone(&self.pipeline);
        for rule in pipeline.rules() {
            if !rule.accepts(path, kind) {
                continue;
            }
            match rule.action() {
                RuleAction::Notify => {
                    debug!(rule = rule.name(), path, "notify rule matched");
                    commands.push(CoreCommand::Notify(PathBuf::from(path)));
                }
                RuleAction::Task(task) => {
                    if self.is_self_trigger(task, path) {
                        debug!(
                            rule = rule.name(),
                            task = %task,
                            path,
                            "suppressed self-trigger on task output"
                        );
                        continue;
                    }
                    debug!(rule = rule.name(), task = %task, path, ?kind, "watch rule matched");
                    self.trigger(task, TriggerReason::FileWatch, Some(path), commands);
                }
            }
        }
    }

    fn handle_request(&mut self, task: &str, reason: TriggerReason, commands: &mut Vec<CoreCommand>) {
        if self.draining {
            debug!(task = %task, "shutting down; ignoring request");
            return;
        }
        if !self.pipeline.contains(task) {
            warn!(task = %task, "ignoring request for unknown task");
            return;
        }
        self.trigger(task, reason, None, commands);
    }

    fn trigger(
        &mut self,
        task: &str,
        reason: TriggerReason,
        path: Option<&str>,
        commands: &mut Vec<CoreCommand>,
    ) {
        let ticket = self.next_ticket;
        if let TriggerOutcome::StartDebounce(ticket) =
            self.slots.record_trigger(task, reason, path, ticket)
        {
            self.next_ticket += 1;
            commands.push(CoreCommand::StartDebounce {
                task: task.to_string(),
                ticket,
            });
        }
    }

    /// A path the task itself produces must not re-trigger it: either it was
    /// written by the task's last run, or it is the exact output file one of
    /// the task's transforms declares. Other files that merely live under a
    /// declared output directory (partials next to generated pages) still
    /// trigger.
    fn is_self_trigger(&self, task: &str, path: &str) -> bool {
        let rel = Path::new(path);
        if self
            .last_outputs
            .get(task)
            .is_some_and(|outputs| outputs.contains(rel))
        {
            return true;
        }

        let Some(footprint) = self.pipeline.footprint(task) else {
            return false;
        };
        footprint.transforms.iter().any(|name| {
            self.pipeline.transform(name).is_some_and(|t| {
                let settings = t.settings();
                settings.output_file().is_some()
                    && settings.declared_output() == rel
                    && !settings.sources().matches(path)
            })
        })
    }

    fn handle_completion(&mut self, task: &str, run_id: u64, outcome: TaskOutcome) {
        let written = match outcome {
            TaskOutcome::Success { outputs } => {
                info!(task = %task, run_id, outputs = outputs.len(), "task succeeded");
                self.last_outputs.insert(task.to_string(), outputs.clone());
                outputs
            }
            TaskOutcome::Failed { error } => {
                error!(task = %task, run_id, "task failed: {error}");
                Outputs::new()
            }
        };

        let Some(pending) = self.slots.complete(task, run_id) else {
            return;
        };
        if self.draining {
            return;
        }

        // Events for files this very run wrote are echoes, not new work.
        let genuine: BTreeSet<&String> = pending
            .paths
            .iter()
            .filter(|p| !written.contains(Path::new(p.as_str())))
            .collect();

        if pending.manual || !genuine.is_empty() {
            let reason = if pending.manual {
                TriggerReason::Manual
            } else {
                TriggerReason::FileWatch
            };
            debug!(task = %task, changed = genuine.len(), "running queued re-run");
            let ticket = self.next_ticket;
            self.next_ticket += 1;
            self.slots.requeue(task, reason, ticket);
        } else {
            debug!(task = %task, "dropping re-run triggered only by own outputs");
        }
    }

    fn handle_shutdown(&mut self) -> CoreStep {
        if self.draining {
            warn!(in_flight = self.in_flight(), "second shutdown request; aborting running tasks");
            return CoreStep {
                commands: vec![CoreCommand::AbortRunning],
                keep_running: false,
            };
        }

        self.draining = true;
        let cancelled = self.slots.cancel_queued();
        info!(
            in_flight = self.in_flight(),
            ?cancelled,
            "shutdown requested; waiting for running tasks"
        );

        if self.in_flight() == 0 {
            CoreStep {
                commands: Vec::new(),
                keep_running: false,
            }
        } else {
            CoreStep {
                commands: vec![CoreCommand::StartGracePeriod],
                keep_running: true,
            }
        }
    }

    /// Dispatch every ready slot whose footprint does not conflict with a
    /// running task.
    fn dispatch_ready(&mut self, commands: &mut Vec<CoreCommand>) {
        if self.draining {
            return;
        }

        for (task, reason) in self.slots.ready() {
            if let Some(blocker) = self.conflicting_run(&task) {
                debug!(task = %task, blocker = %blocker, "waiting for conflicting task");
                continue;
            }

            let run_id = self.next_run_id;
            self.next_run_id += 1;
            self.slots.mark_running(&task, run_id);
            *self.dispatched.entry(task.clone()).or_insert(0) += 1;

            info!(task = %task, run_id, ?reason, "dispatching task");
            commands.push(CoreCommand::Dispatch(ScheduledRun {
                task,
                run_id,
                reason,
            }));
        }
    }

    fn conflicting_run(&self, task: &str) -> Option<TaskName> {
        let fp = self.pipeline.footprint(task)?;
        self.slots
            .running()
            .find(|running| {
                self.pipeline
                    .footprint(running)
                    .is_some_and(|other| fp.conflicts_with(other))
            })
            .cloned()
    }

    fn should_exit(&self) -> bool {
        if self.draining {
            return self.in_flight() == 0;
        }
        self.options.exit_when_idle && self.slots.is_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::{PipelineBuilder, TaskSpec};
    use crate::transform::{CopyTransform, Transform, TransformSettings};
    use crate::watch::rules::WatchRule;

    fn copy(name: &str, glob: &str, out: &str) -> Arc<dyn Transform> {
        let settings = TransformSettings::new(&[glob.to_string()], out).unwrap();
        Arc::new(CopyTransform::new(name, settings, None))
    }

    fn task_rule(patterns: &[&str], task: &str) -> WatchRule {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        WatchRule::new(task, &patterns, RuleAction::Task(task.to_string()))
            .unwrap()
            .with_events([WatchEventKind::Created, WatchEventKind::Modified])
    }

    fn core() -> CoreRuntime {
        let styles_settings = TransformSettings::new(&["app/scss/**/*.scss".to_string()], "app/css")
            .unwrap()
            .with_output_file("style.min.css");
        let pipeline = PipelineBuilder::new()
            .transform(Arc::new(CopyTransform::new("styles", styles_settings, None)))
            .transform(copy("scripts", "app/js/**/*.js", "app/js/min"))
            .transform(copy("images", "app/img/**/*.png", "dist/img"))
            .task("clean", TaskSpec::clean("dist"))
            .task("build", TaskSpec::sequential(["clean", "images"]))
            .rule(task_rule(&["app/scss/**/*.scss", "app/css/*.css"], "styles"))
            .rule(task_rule(&["app/js/**/*.js"], "scripts"))
            .rule(
                WatchRule::new("reload", &["app/css/*.css".to_string()], RuleAction::Notify)
                    .unwrap()
                    .with_events([WatchEventKind::Created, WatchEventKind::Modified]),
            )
            .build()
            .unwrap();
        CoreRuntime::new(Arc::new(pipeline), RuntimeOptions::default())
    }

    fn changed(path: &str) -> RuntimeEvent {
        RuntimeEvent::FileChanged {
            path: path.to_string(),
            kind: WatchEventKind::Modified,
        }
    }

    fn debounce_ticket(step: &CoreStep) -> Option<u64> {
        step.commands.iter().find_map(|c| match c {
            CoreCommand::StartDebounce { ticket, .. } => Some(*ticket),
            _ => None,
        })
    }

    fn dispatched(step: &CoreStep) -> Vec<ScheduledRun> {
        step.commands
            .iter()
            .filter_map(|c| match c {
                CoreCommand::Dispatch(run) => Some(run.clone()),
                _ => None,
            })
            .collect()
    }

    fn success(task: &str, run_id: u64, outputs: &[&str]) -> RuntimeEvent {
        RuntimeEvent::TaskCompleted {
            task: task.to_string(),
            run_id,
            outcome: TaskOutcome::Success {
                outputs: outputs.iter().map(PathBuf::from).collect(),
            },
        }
    }

    /// Trigger `task` via `path` and let its debounce window pass.
    fn start(core: &mut CoreRuntime, task: &str, path: &str) -> ScheduledRun {
        let step = core.step(changed(path));
        let ticket = debounce_ticket(&step).expect("debounce should start");
        let step = core.step(RuntimeEvent::DebounceElapsed {
            task: task.to_string(),
            ticket,
        });
        let runs = dispatched(&step);
        assert_eq!(runs.len(), 1);
        runs.into_iter().next().unwrap()
    }

    #[test]
    fn events_during_debounce_coalesce() {
        let mut core = core();
        let first = core.step(changed("app/js/a.js"));
        assert!(debounce_ticket(&first).is_some());

        for path in ["app/js/b.js", "app/js/c.js"] {
            let step = core.step(changed(path));
            assert!(step.commands.is_empty());
        }

        let ticket = debounce_ticket(&first).unwrap();
        let step = core.step(RuntimeEvent::DebounceElapsed {
            task: "scripts".into(),
            ticket,
        });
        assert_eq!(dispatched(&step).len(), 1);
        assert_eq!(core.dispatch_count("scripts"), 1);
    }

    #[test]
    fn three_events_while_running_queue_exactly_one_rerun() {
        let mut core = core();
        let run = start(&mut core, "scripts", "app/js/a.js");

        for path in ["app/js/a.js", "app/js/b.js", "app/js/c.js"] {
            let step = core.step(changed(path));
            assert!(dispatched(&step).is_empty(), "must not run concurrently with itself");
        }

        let step = core.step(success("scripts", run.run_id, &["app/js/min/a.js"]));
        let reruns = dispatched(&step);
        assert_eq!(reruns.len(), 1);
        assert_eq!(reruns[0].task, "scripts");

        let step = core.step(success("scripts", reruns[0].run_id, &["app/js/min/a.js"]));
        assert!(dispatched(&step).is_empty());
        assert_eq!(core.dispatch_count("scripts"), 2);
        assert!(core.is_idle());
    }

    #[test]
    fn own_outputs_do_not_retrigger() {
        let mut core = core();
        let run = start(&mut core, "styles", "app/scss/main.scss");

        // Echo of the output while the task is still running.
        let step = core.step(changed("app/css/style.min.css"));
        assert!(dispatched(&step).is_empty());
        assert!(step.commands.contains(&CoreCommand::Notify(PathBuf::from("app/css/style.min.css"))));

        let step = core.step(success("styles", run.run_id, &["app/css/style.min.css"]));
        assert!(dispatched(&step).is_empty());

        // Late echo after completion.
        let step = core.step(changed("app/css/style.min.css"));
        assert!(debounce_ticket(&step).is_none());
        assert_eq!(core.dispatch_count("styles"), 1);
        assert!(core.is_idle());
    }

    #[test]
    fn partial_next_to_generated_pages_still_triggers() {
        // Pages are built from app/html/source.html straight into app/.
        let pipeline = PipelineBuilder::new()
            .transform(copy("html", "app/html/source.html", "app"))
            .rule(task_rule(&["app/html/*.html", "app/*.html"], "html"))
            .build()
            .unwrap();
        let mut core = CoreRuntime::new(Arc::new(pipeline), RuntimeOptions::default());

        let run = start(&mut core, "html", "app/html/header.html");
        let step = core.step(success("html", run.run_id, &["app/source.html"]));
        assert!(dispatched(&step).is_empty());

        let step = core.step(changed("app/source.html"));
        assert!(debounce_ticket(&step).is_none(), "generated page must not retrigger");

        let step = core.step(changed("app/html/footer.html"));
        assert!(debounce_ticket(&step).is_some(), "edited partial must trigger a rebuild");
    }

    #[test]
    fn conflicting_tasks_wait_for_each_other() {
        let mut core = core();
        let step = core.step(RuntimeEvent::TaskRequested {
            task: "build".into(),
            reason: TriggerReason::Manual,
        });
        let build = dispatched(&step).remove(0);

        let step = core.step(RuntimeEvent::TaskRequested {
            task: "images".into(),
            reason: TriggerReason::Manual,
        });
        assert!(dispatched(&step).is_empty());

        let step = core.step(success("build", build.run_id, &[]));
        let runs = dispatched(&step);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].task, "images");
    }

    #[test]
    fn failures_do_not_stop_watching() {
        let mut core = core();
        let run = start(&mut core, "scripts", "app/js/a.js");
        let step = core.step(RuntimeEvent::TaskCompleted {
            task: "scripts".into(),
            run_id: run.run_id,
            outcome: TaskOutcome::Failed {
                error: "syntax error".into(),
            },
        });
        assert!(step.keep_running);

        let again = start(&mut core, "scripts", "app/js/a.js");
        assert_eq!(again.task, "scripts");
    }

    #[test]
    fn shutdown_drains_running_and_drops_queued() {
        let mut core = core();
        let run = start(&mut core, "scripts", "app/js/a.js");
        core.step(changed("app/js/b.js"));
        core.step(changed("app/scss/x.scss"));

        let step = core.step(RuntimeEvent::ShutdownRequested);
        assert!(step.keep_running);
        assert_eq!(step.commands, vec![CoreCommand::StartGracePeriod]);

        let step = core.step(changed("app/js/c.js"));
        assert!(step.commands.is_empty());

        let step = core.step(success("scripts", run.run_id, &[]));
        assert!(dispatched(&step).is_empty());
        assert!(!step.keep_running);
        assert_eq!(core.dispatch_count("styles"), 0);
    }

    #[test]
    fn second_shutdown_aborts() {
        let mut core = core();
        start(&mut core, "scripts", "app/js/a.js");
        core.step(RuntimeEvent::ShutdownRequested);
        let step = core.step(RuntimeEvent::ShutdownRequested);
        assert_eq!(step.commands, vec![CoreCommand::AbortRunning]);
        assert!(!step.keep_running);
    }
}
