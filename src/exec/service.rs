// src/exec/service.rs

//! Long-running service tasks (preview servers, live-reload daemons).
//!
//! A service task "completes" once its process is up and ready; the process
//! itself keeps running and is owned by the [`ServiceSupervisor`] of the
//! `run_forever` invocation that started it. Shutting the supervisor down
//! kills every service it owns.
//!
//! Each service has its own slot lock, so different services become ready
//! in parallel while two requests for the same service start it only once.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::dag::ServiceSpec;
use crate::errors::TransformError;
use crate::transform::command::shell_command;
use crate::types::TaskName;

const KILL_TIMEOUT: Duration = Duration::from_secs(2);

type ServiceSlot = Arc<Mutex<Option<Child>>>;

#[derive(Debug)]
pub struct ServiceSupervisor {
    root: PathBuf,
    slots: Mutex<HashMap<TaskName, ServiceSlot>>,
}

impl ServiceSupervisor {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, name: &str) -> ServiceSlot {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(name.to_string()).or_default())
    }

    /// Start the service unless it is already running, and wait until it is
    /// ready:
    ///
    /// - `ready_on_stdout` set: a stdout line matched (or `ready_after`
    ///   elapsed, if also set);
    /// - only `ready_after` set: the delay elapsed and the process is alive;
    /// - neither: as soon as the process is spawned.
    pub async fn ensure_started(&self, name: &str, spec: &ServiceSpec) -> Result<(), TransformError> {
        let fail = |cause: String| TransformError::new(name, "service", cause);
        let slot = self.slot(name).await;
        let mut current = slot.lock().await;

        if let Some(child) = current.as_mut() {
            match child.try_wait() {
                Ok(None) => {
                    debug!(task = %name, "service already running; nothing to start");
                    return Ok(());
                }
                Ok(Some(status)) => {
                    warn!(task = %name, %status, "service had exited; restarting");
                }
                Err(e) => {
                    warn!(task = %name, error = %e, "could not poll service; restarting");
                }
            }
            *current = None;
        }

        info!(task = %name, cmd = %spec.cmd(), "starting service");

        let mut cmd = shell_command(spec.cmd());
        cmd.current_dir(&self.root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| fail(format!("spawning `{}`: {e}", spec.cmd())))?;

        let (ready_tx, ready_rx) = oneshot::channel::<()>();

        if let Some(stdout) = child.stdout.take() {
            let task_name = name.to_string();
            let ready_re = spec.ready_on_stdout().cloned();
            tokio::spawn(async move {
                let mut ready_tx = Some(ready_tx);
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task_name, "stdout: {}", line);
                    if let Some(re) = &ready_re {
                        if re.is_match(&line) {
                            if let Some(tx) = ready_tx.take() {
                                debug!(task = %task_name, "stdout matched ready_on_stdout");
                                let _ = tx.send(());
                            }
                        }
                    }
                }
                debug!(task = %task_name, "service stdout closed");
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let task_name = name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(task = %task_name, "stderr: {}", line);
                }
            });
        }

        match (spec.ready_on_stdout().is_some(), spec.ready_after()) {
            (true, Some(after)) => {
                if let Ok(Err(_)) = timeout(after, ready_rx).await {
                    return Err(fail("exited before becoming ready".to_string()));
                }
            }
            (true, None) => {
                if ready_rx.await.is_err() {
                    return Err(fail("exited before becoming ready".to_string()));
                }
            }
            (false, Some(after)) => {
                sleep(after).await;
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(fail(format!("exited during startup with {status}")));
                }
            }
            (false, None) => {}
        }

        info!(task = %name, pid = child.id(), "service ready");
        *current = Some(child);
        Ok(())
    }

    /// Names of services whose process is currently owned.
    pub async fn running(&self) -> Vec<TaskName> {
        let slots: Vec<(TaskName, ServiceSlot)> = self
            .slots
            .lock()
            .await
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        let mut names = Vec::new();
        for (name, slot) in slots {
            if slot.lock().await.is_some() {
                names.push(name);
            }
        }
        names.sort();
        names
    }

    /// Kill every owned service process.
    pub async fn shutdown(&self) {
        let slots: Vec<(TaskName, ServiceSlot)> = self.slots.lock().await.drain().collect();
        for (name, slot) in slots {
            let Some(mut child) = slot.lock().await.take() else {
                continue;
            };
            info!(task = %name, "stopping service");
            if let Err(e) = child.start_kill() {
                debug!(task = %name, error = %e, "service already gone");
                continue;
            }
            if timeout(KILL_TIMEOUT, child.wait()).await.is_err() {
                warn!(task = %name, "service did not exit after kill");
            }
        }
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;

    match unit_part.trim().to_lowercase().as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        unit => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_durations() {
        assert_eq!(parse_duration("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse_duration(" 3s "), Ok(Duration::from_secs(3)));
        assert_eq!(parse_duration("2m"), Ok(Duration::from_secs(120)));
        assert!(parse_duration("3").is_err());
        assert!(parse_duration("ms").is_err());
        assert!(parse_duration("3d").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn waits_for_ready_line_and_starts_once() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ServiceSupervisor::new(dir.path());
        let spec = ServiceSpec::new("echo booting; echo listening on 3000; sleep 30")
            .with_ready_on_stdout("^listening")
            .unwrap();

        sup.ensure_started("preview", &spec).await.unwrap();
        sup.ensure_started("preview", &spec).await.unwrap();
        assert_eq!(sup.running().await, vec!["preview".to_string()]);

        sup.shutdown().await;
        assert!(sup.running().await.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn different_services_become_ready_in_parallel() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ServiceSupervisor::new(dir.path());
        let spec = ServiceSpec::new("sleep 30").with_ready_after(Duration::from_millis(400));

        let started = tokio::time::Instant::now();
        let (preview, reload) = tokio::join!(
            sup.ensure_started("preview", &spec),
            sup.ensure_started("livereload", &spec),
        );
        preview.unwrap();
        reload.unwrap();

        assert!(started.elapsed() < Duration::from_millis(750), "{:?}", started.elapsed());
        assert_eq!(
            sup.running().await,
            vec!["livereload".to_string(), "preview".to_string()]
        );
        sup.shutdown().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_before_ready_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let sup = ServiceSupervisor::new(dir.path());
        let spec = ServiceSpec::new("echo nope")
            .with_ready_on_stdout("^listening")
            .unwrap();

        let err = sup.ensure_started("preview", &spec).await.unwrap_err();
        assert_eq!(err.stage, "service");
        assert!(sup.running().await.is_empty());
    }
}
