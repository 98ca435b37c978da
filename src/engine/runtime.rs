// src/engine/runtime.rs

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, warn};

use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::sink::{Notification, NotifySink};

use super::core::CoreRuntime;
use super::{CoreCommand, RuntimeEvent};

/// Drives [`CoreRuntime`] in response to `RuntimeEvent`s, and delegates task
/// execution to an [`ExecutorBackend`].
///
/// This is the IO shell: it reads events from the channel, runs debounce
/// timers, forwards notify-rule matches to the sink and enforces the
/// shutdown grace period. All scheduling decisions live in the core.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    /// Timers re-enter the loop through this; weak so it does not keep the
    /// channel open by itself.
    timer_tx: mpsc::WeakSender<RuntimeEvent>,
    executor: E,
    sink: Arc<dyn NotifySink>,
    grace_deadline: Option<Instant>,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .field("grace_deadline", &self.grace_deadline)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(
        core: CoreRuntime,
        event_tx: &mpsc::Sender<RuntimeEvent>,
        event_rx: mpsc::Receiver<RuntimeEvent>,
        executor: E,
        sink: Arc<dyn NotifySink>,
    ) -> Self {
        Self {
            core,
            event_rx,
            timer_tx: event_tx.downgrade(),
            executor,
            sink,
            grace_deadline: None,
        }
    }

    /// Main event loop. Returns the core for inspection once it asks to
    /// stop, the event channel closes, or the grace period runs out.
    pub async fn run(mut self) -> Result<CoreRuntime> {
        info!("assetflow runtime started");

        loop {
            let event = tokio::select! {
                maybe = self.event_rx.recv() => match maybe {
                    Some(e) => e,
                    None => {
                        info!("runtime event channel closed; exiting");
                        break;
                    }
                },
                _ = wait_for(self.grace_deadline) => {
                    warn!(
                        in_flight = self.core.in_flight(),
                        "grace period expired; aborting running tasks"
                    );
                    self.executor.abort_all();
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            for command in step.commands {
                self.execute_command(command).await?;
            }

            if !step.keep_running {
                info!("core requested exit; stopping runtime");
                break;
            }
        }

        info!("runtime exiting");
        Ok(self.core)
    }

    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::Dispatch(run) => {
                debug!(task = %run.task, run_id = run.run_id, "dispatching to executor");
                self.executor.dispatch(run).await?;
            }
            CoreCommand::StartDebounce { task, ticket } => {
                let delay = self.core.options().debounce;
                let tx = self.timer_tx.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(RuntimeEvent::DebounceElapsed { task, ticket }).await;
                    }
                });
            }
            CoreCommand::Notify(path) => {
                self.sink.notify(Notification::Changed(path));
            }
            CoreCommand::StartGracePeriod => {
                let grace = self.core.options().grace_period;
                info!(grace_ms = grace.as_millis() as u64, "draining running tasks");
                self.grace_deadline = Some(Instant::now() + grace);
            }
            CoreCommand::AbortRunning => {
                self.executor.abort_all();
            }
        }
        Ok(())
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}
