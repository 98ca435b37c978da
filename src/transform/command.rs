// src/transform/command.rs

//! External-command transform.
//!
//! This is the plug-in point for real asset tools (style compilers,
//! bundlers, image encoders). The command runs through the platform shell
//! in the project root with the transform settings exported as environment
//! variables:
//!
//! | variable | value |
//! |---|---|
//! | `ASSETFLOW_SOURCES` | matched sources, newline separated |
//! | `ASSETFLOW_OUTPUT` | declared output location |
//! | `ASSETFLOW_COMPRESSION_LEVEL` | `compression_level`, if set |
//! | `ASSETFLOW_TARGETS` | `target_environments`, comma separated |
//!
//! Exit status 0 is success. The reported outputs are the files under the
//! declared output location that the command created or changed: the
//! location is fingerprinted (mtime + blake3 content hash) before the
//! command starts and compared afterwards.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::{Outputs, Transform, TransformFuture, TransformInput, TransformSettings};
use crate::errors::TransformError;
use crate::fs::FileSystem;
use crate::watch::hash::compute_file_hash;

/// Number of trailing stderr lines kept for the error message.
const STDERR_TAIL: usize = 20;

#[derive(Debug)]
pub struct CommandTransform {
    name: String,
    settings: TransformSettings,
    cmd: String,
}

impl CommandTransform {
    pub fn new(name: impl Into<String>, settings: TransformSettings, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings,
            cmd: cmd.into(),
        }
    }

    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    fn build_command(&self, root: &Path, sources: &[PathBuf]) -> Command {
        let mut cmd = shell_command(&self.cmd);
        let sources: Vec<String> = sources
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();

        cmd.current_dir(root)
            .env("ASSETFLOW_SOURCES", sources.join("\n"))
            .env("ASSETFLOW_OUTPUT", self.settings.declared_output())
            .env("ASSETFLOW_TARGETS", self.settings.target_environments().join(","))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(level) = self.settings.compression_level() {
            cmd.env("ASSETFLOW_COMPRESSION_LEVEL", level.to_string());
        }
        cmd
    }

    async fn execute(&self, input: &TransformInput<'_>) -> Result<(), TransformError> {
        info!(transform = %self.name, cmd = %self.cmd, "starting command");

        let mut child = self
            .build_command(input.root, input.sources)
            .spawn()
            .with_context(|| format!("spawning `{}`", self.cmd))
            .map_err(|e| TransformError::from_anyhow(&self.name, "spawn", &e))?;

        if let Some(stdout) = child.stdout.take() {
            let name = self.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(transform = %name, "stdout: {}", line);
                }
            });
        }

        // Keep the tail of stderr so a failure carries the tool's message.
        let stderr_tail = child.stderr.take().map(|stderr| {
            let name = self.name.clone();
            tokio::spawn(async move {
                let mut tail = VecDeque::with_capacity(STDERR_TAIL);
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(transform = %name, "stderr: {}", line);
                    if tail.len() == STDERR_TAIL {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
                tail.into_iter().collect::<Vec<_>>().join("\n")
            })
        });

        let status = child
            .wait()
            .await
            .with_context(|| format!("waiting for `{}`", self.cmd))
            .map_err(|e| TransformError::from_anyhow(&self.name, "run", &e))?;

        let stderr = match stderr_tail {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        info!(
            transform = %self.name,
            exit_code = status.code().unwrap_or(-1),
            success = status.success(),
            "command exited"
        );

        if status.success() {
            Ok(())
        } else {
            let code = status.code().unwrap_or(-1);
            let cause = if stderr.is_empty() {
                format!("`{}` exited with status {code}", self.cmd)
            } else {
                format!("`{}` exited with status {code}: {stderr}", self.cmd)
            };
            Err(TransformError::new(&self.name, "run", cause))
        }
    }
}

impl Transform for CommandTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    fn run<'a>(&'a self, input: TransformInput<'a>) -> TransformFuture<'a> {
        Box::pin(async move {
            let location = self.settings.declared_output();
            let before = fingerprint(input.fs, input.root, &location)
                .map_err(|e| TransformError::from_anyhow(&self.name, "outputs", &e))?;
            self.execute(&input).await?;
            let after = fingerprint(input.fs, input.root, &location)
                .map_err(|e| TransformError::from_anyhow(&self.name, "outputs", &e))?;
            Ok(changed_files(&before, after))
        })
    }
}

/// Build a shell command appropriate for the platform.
pub(crate) fn shell_command(line: &str) -> Command {
    if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(line);
        c
    }
}

type Fingerprints = BTreeMap<PathBuf, (SystemTime, String)>;

/// Modification time and content hash of every file under `location` (a
/// file or a directory, relative to `root`), keyed by root-relative path.
fn fingerprint(fs: &dyn FileSystem, root: &Path, location: &Path) -> Result<Fingerprints> {
    let mut prints = Fingerprints::new();
    let mut stack = vec![root.join(location)];

    while let Some(path) = stack.pop() {
        if fs.is_dir(&path) {
            stack.extend(fs.read_dir(&path)?);
        } else if fs.is_file(&path) {
            if let Ok(rel) = path.strip_prefix(root) {
                let print = (fs.modified(&path)?, compute_file_hash(fs, &path)?);
                prints.insert(rel.to_path_buf(), print);
            }
        }
    }
    Ok(prints)
}

/// Paths that are new in `after` or whose mtime or content differs.
fn changed_files(before: &Fingerprints, after: Fingerprints) -> Outputs {
    after
        .into_iter()
        .filter(|(path, print)| before.get(path) != Some(print))
        .map(|(path, _)| path)
        .collect()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::fs::RealFileSystem;

    fn settings(out: &str) -> TransformSettings {
        TransformSettings::new(&["src/*.txt".to_string()], out)
            .unwrap()
            .with_compression_level(75)
    }

    #[tokio::test]
    async fn reports_files_written_under_output() {
        let dir = tempfile::tempdir().unwrap();
        let t = CommandTransform::new(
            "shout",
            settings("out"),
            "mkdir -p \"$ASSETFLOW_OUTPUT\" && echo \"$ASSETFLOW_COMPRESSION_LEVEL\" > \"$ASSETFLOW_OUTPUT/level.txt\"",
        );
        let sources = vec![PathBuf::from("src/a.txt")];

        let out = t
            .run(TransformInput { root: dir.path(), sources: &sources, fs: &RealFileSystem })
            .await
            .unwrap();

        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![PathBuf::from("out/level.txt")]);
        let level = std::fs::read_to_string(dir.path().join("out/level.txt")).unwrap();
        assert_eq!(level.trim(), "75");
    }

    #[tokio::test]
    async fn files_left_from_earlier_runs_are_not_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("out/nested")).unwrap();
        std::fs::write(dir.path().join("out/previous.css"), "old").unwrap();
        std::fs::write(dir.path().join("out/nested/sibling.css"), "other").unwrap();
        let sources = vec![PathBuf::from("src/a.txt")];

        let idle = CommandTransform::new("lint", settings("./out"), "true");
        let out = idle
            .run(TransformInput { root: dir.path(), sources: &sources, fs: &RealFileSystem })
            .await
            .unwrap();
        assert!(out.is_empty(), "{out:?}");

        let writer = CommandTransform::new(
            "rewrite",
            settings("./out"),
            "echo new > \"$ASSETFLOW_OUTPUT/previous.css\"",
        );
        let out = writer
            .run(TransformInput { root: dir.path(), sources: &sources, fs: &RealFileSystem })
            .await
            .unwrap();
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![PathBuf::from("out/previous.css")]);
    }

    #[tokio::test]
    async fn non_zero_exit_carries_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let t = CommandTransform::new("broken", settings("out"), "echo 'syntax error' >&2; exit 3");
        let sources = vec![PathBuf::from("src/a.txt")];

        let err = t
            .run(TransformInput { root: dir.path(), sources: &sources, fs: &RealFileSystem })
            .await
            .unwrap_err();

        assert_eq!(err.stage, "run");
        assert!(err.cause.contains("status 3"), "cause: {}", err.cause);
        assert!(err.cause.contains("syntax error"), "cause: {}", err.cause);
    }
}
