// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod scheduler;
pub mod sink;
pub mod transform;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::loader::load_and_validate;
use crate::dag::{Pipeline, TaskSpec};
use crate::errors::Result;
use crate::scheduler::{Scheduler, SchedulerSettings};
use crate::watch::RuleAction;

pub use crate::scheduler::RunReport;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and graph validation
/// - the scheduler (one-shot or watch session)
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)?;
    let pipeline = Arc::new(Pipeline::from_config(&cfg)?);

    if args.dry_run {
        print_dry_run(&pipeline);
        return Ok(());
    }

    let root = config_root_dir(&config_path);
    let scheduler = Scheduler::new(Arc::clone(&pipeline), root)
        .with_settings(SchedulerSettings::from_config(&cfg.config));

    match args.command() {
        Command::Build => {
            let report = scheduler.run_once(&cfg.config.build_task).await?;
            info!(
                task = %report.task,
                outputs = report.outputs.len(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "build finished"
            );
        }
        Command::Run { task } => {
            scheduler.run_once(&task).await?;
        }
        Command::Dev => {
            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
            };
            scheduler
                .run_forever(Some(&cfg.config.dev_task), shutdown)
                .await?;
        }
    }
    Ok(())
}

/// Figure out the project root.
///
/// - If the config path has a non-empty parent (e.g. "web/Assetflow.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Assetflow.toml" (parent = ""),
///   we fall back to the current working directory "."
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Simple dry-run output: transforms, tasks and watch rules.
pub fn print_dry_run(pipeline: &Pipeline) {
    println!("assetflow dry-run");
    println!();

    let transforms: Vec<_> = pipeline.transforms().collect();
    println!("transforms ({}):", transforms.len());
    for t in transforms {
        let settings = t.settings();
        println!("  - {}", t.name());
        println!("      sources: {:?}", settings.sources().raw());
        println!("      output: {}", settings.declared_output().display());
        if let Some(level) = settings.compression_level() {
            println!("      compression_level: {level}");
        }
        if !settings.target_environments().is_empty() {
            println!("      targets: {:?}", settings.target_environments());
        }
    }
    println!();

    println!("tasks (children first):");
    for name in pipeline.order() {
        let Some(spec) = pipeline.task(name) else {
            continue;
        };
        match spec {
            TaskSpec::Transform(_) => continue,
            TaskSpec::Composite { mode, children } => {
                println!("  - {name}: {mode} {children:?}");
            }
            TaskSpec::Clean { root } => println!("  - {name}: clean {}", root.display()),
            TaskSpec::Service(service) => println!("  - {name}: service `{}`", service.cmd()),
        }
    }
    println!();

    println!("watch rules ({}):", pipeline.rules().len());
    for rule in pipeline.rules() {
        let action = match rule.action() {
            RuleAction::Task(task) => format!("run {task}"),
            RuleAction::Notify => "notify".to_string(),
        };
        println!(
            "  - {}: {:?} on {:?} -> {action}",
            rule.name(),
            rule.patterns().raw(),
            rule.events()
        );
    }

    debug!("dry-run complete (no execution)");
}
