// src/config/validate.rs

//! Static validation of a deserialised config.
//!
//! Everything here can be decided from the config text alone. Checks that
//! need the whole task graph (references, cycles, output ownership, clean
//! ordering) run in [`crate::dag::PipelineBuilder::build`].

use std::path::Path;

use regex::Regex;

use crate::config::model::{
    ConfigFile, RawConfigFile, TaskConfig, TransformConfig, TransformKind, WatchConfig,
};
use crate::errors::{AssetflowError, Result};
use crate::exec::service::parse_duration;
use crate::fs::normalize_relative;
use crate::types::WatchEventKind;

const MAX_DEBOUNCE_MS: u64 = 10_000;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = AssetflowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

pub fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_names(cfg)?;
    for (name, t) in &cfg.transform {
        validate_transform(name, t, &cfg.layout.dist_root)?;
    }
    for (name, t) in &cfg.task {
        validate_task(name, t)?;
    }
    for (i, w) in cfg.watch.iter().enumerate() {
        validate_watch(i, w)?;
    }
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.transform.is_empty() && cfg.task.is_empty() {
        return Err(AssetflowError::config(
            "config must contain at least one [transform.<name>] or [task.<name>] section",
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.debounce_ms > MAX_DEBOUNCE_MS {
        return Err(AssetflowError::config(format!(
            "[config].debounce_ms must be <= {MAX_DEBOUNCE_MS} (got {})",
            cfg.config.debounce_ms
        )));
    }
    Ok(())
}

fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    for name in cfg.task.keys() {
        if cfg.transform.contains_key(name) {
            return Err(AssetflowError::config(format!(
                "'{name}' is defined both as [transform.{name}] and [task.{name}]"
            )));
        }
    }
    for name in cfg.transform.keys().chain(cfg.task.keys()) {
        if name.trim().is_empty() {
            return Err(AssetflowError::config("task names must not be empty"));
        }
    }
    Ok(())
}

fn validate_transform(name: &str, t: &TransformConfig, dist_root: &str) -> Result<()> {
    let err = |msg: String| AssetflowError::config(format!("transform '{name}': {msg}"));

    if t.output_path.trim().is_empty() {
        return Err(err("`output_path` must not be empty".to_string()));
    }

    if let Some(level) = t.compression_level {
        if level > 100 {
            return Err(err(format!("`compression_level` must be 0..=100 (got {level})")));
        }
    }

    match t.kind {
        TransformKind::Copy => {
            reject_option(name, "separator", t.separator.is_some(), "concat")?;
            reject_option(name, "cmd", t.cmd.is_some(), "command")?;
        }
        TransformKind::Concat => {
            if t.output_file.is_none() {
                return Err(err("kind = \"concat\" requires `output_file`".to_string()));
            }
            reject_option(name, "base", t.base.is_some(), "copy")?;
            reject_option(name, "cmd", t.cmd.is_some(), "command")?;
        }
        TransformKind::Command => {
            if t.cmd.as_deref().is_none_or(|c| c.trim().is_empty()) {
                return Err(err("kind = \"command\" requires a non-empty `cmd`".to_string()));
            }
            reject_option(name, "base", t.base.is_some(), "copy")?;
            reject_option(name, "separator", t.separator.is_some(), "concat")?;
        }
    }

    // The distributable tree is output only. Patterns that merely could
    // reach it (`**/*.css`) are fenced off at resolution time instead.
    let dist = normalize_relative(Path::new(dist_root.trim()))
        .map_err(|e| AssetflowError::config(format!("[layout].dist_root: {e:#}")))?;
    if dist.as_os_str().is_empty() {
        return Err(AssetflowError::config(
            "[layout].dist_root must name a directory below the project root",
        ));
    }
    for pattern in t.source_glob.iter().filter(|p| !p.trim_start().starts_with('!')) {
        let literal = normalize_relative(Path::new(pattern.trim())).map_err(|e| {
            err(format!("source pattern '{pattern}' leaves the project root: {e:#}"))
        })?;
        if literal.starts_with(&dist) {
            return Err(err(format!(
                "source pattern '{pattern}' reads from the distributable tree '{dist_root}'"
            )));
        }
    }

    Ok(())
}

fn reject_option(name: &str, option: &str, present: bool, valid_kind: &str) -> Result<()> {
    if present {
        return Err(AssetflowError::config(format!(
            "transform '{name}': option `{option}` is only valid for kind = \"{valid_kind}\""
        )));
    }
    Ok(())
}

fn validate_task(name: &str, t: &TaskConfig) -> Result<()> {
    let err = |msg: String| AssetflowError::config(format!("task '{name}': {msg}"));

    match t.body_count() {
        1 => {}
        0 => {
            return Err(err(
                "needs one of `sequential`, `concurrent`, `clean` or `service`".to_string(),
            ));
        }
        _ => {
            return Err(err(
                "only one of `sequential`, `concurrent`, `clean` or `service` may be set"
                    .to_string(),
            ));
        }
    }

    for children in [&t.sequential, &t.concurrent].into_iter().flatten() {
        if children.is_empty() {
            return Err(err("composite must list at least one task".to_string()));
        }
    }

    if let Some(root) = &t.clean {
        if !is_safe_clean_root(root) {
            return Err(err(format!(
                "refusing to clean '{root}': must be a relative path below the project root"
            )));
        }
    }

    if t.service.is_none() && (t.ready_on_stdout.is_some() || t.ready_after.is_some()) {
        return Err(err(
            "`ready_on_stdout` / `ready_after` are only valid for `service` tasks".to_string(),
        ));
    }
    if let Some(pattern) = &t.ready_on_stdout {
        Regex::new(pattern).map_err(|e| err(format!("invalid `ready_on_stdout` regex: {e}")))?;
    }
    if let Some(dur) = &t.ready_after {
        parse_duration(dur).map_err(|e| err(format!("invalid `ready_after`: {e}")))?;
    }

    Ok(())
}

fn is_safe_clean_root(root: &str) -> bool {
    normalize_relative(Path::new(root.trim())).is_ok_and(|p| !p.as_os_str().is_empty())
}

fn validate_watch(index: usize, w: &WatchConfig) -> Result<()> {
    let label = w.name.clone().unwrap_or_else(|| format!("#{}", index + 1));
    let err = |msg: String| AssetflowError::config(format!("watch rule {label}: {msg}"));

    if w.patterns.is_empty() {
        return Err(err("`patterns` must not be empty".to_string()));
    }
    match (&w.task, w.notify) {
        (Some(_), true) => return Err(err("set either `task` or `notify`, not both".to_string())),
        (None, false) => return Err(err("needs a `task` or `notify = true`".to_string())),
        _ => {}
    }
    if let Some(events) = &w.events {
        if events.is_empty() {
            return Err(err("`events` must not be empty".to_string()));
        }
        for e in events {
            e.parse::<WatchEventKind>().map_err(err)?;
        }
    }
    Ok(())
}
