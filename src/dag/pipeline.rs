// src/dag/pipeline.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::dag::graph::{
    Footprint, compute_footprints, topological_order, validate_composites, validate_references,
    validate_rules, validate_unique_outputs,
};
use crate::dag::task::{ServiceSpec, TaskSpec};
use crate::errors::{AssetflowError, Result};
use crate::exec::service::parse_duration;
use crate::fs::normalize_relative;
use crate::transform::{Transform, build_transform};
use crate::types::TaskName;
use crate::watch::rules::{WatchRule, rules_from_config};

/// A validated task graph: transforms, named tasks and watch rules.
///
/// Only obtainable through [`PipelineBuilder::build`] (or
/// [`Pipeline::from_config`]), so holding one means every graph-level check
/// passed. Immutable once built; shared as `Arc<Pipeline>`.
#[derive(Debug)]
pub struct Pipeline {
    transforms: BTreeMap<String, Arc<dyn Transform>>,
    tasks: BTreeMap<TaskName, TaskSpec>,
    rules: Vec<WatchRule>,
    footprints: BTreeMap<TaskName, Footprint>,
    order: Vec<TaskName>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    /// Build the pipeline described by a validated config file.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut builder = PipelineBuilder::new();
        let dist_root = Path::new(cfg.layout.dist_root.trim());

        for (name, t) in &cfg.transform {
            builder = builder.transform(build_transform(name, t, dist_root)?);
        }

        for (name, t) in &cfg.task {
            let spec = if let Some(children) = &t.sequential {
                TaskSpec::sequential(children.iter().cloned())
            } else if let Some(children) = &t.concurrent {
                TaskSpec::concurrent(children.iter().cloned())
            } else if let Some(root) = &t.clean {
                TaskSpec::clean(PathBuf::from(root.trim()))
            } else if let Some(cmd) = &t.service {
                let mut service = ServiceSpec::new(cmd.clone());
                if let Some(pattern) = &t.ready_on_stdout {
                    service = service.with_ready_on_stdout(pattern)?;
                }
                if let Some(after) = &t.ready_after {
                    let after = parse_duration(after).map_err(|e| {
                        AssetflowError::config(format!("task '{name}': invalid `ready_after`: {e}"))
                    })?;
                    service = service.with_ready_after(after);
                }
                TaskSpec::Service(service)
            } else {
                return Err(AssetflowError::config(format!("task '{name}' has no body")));
            };
            builder = builder.task(name.clone(), spec);
        }

        for rule in rules_from_config(&cfg.watch)? {
            builder = builder.rule(rule);
        }

        builder.build()
    }

    pub fn transform(&self, name: &str) -> Option<&Arc<dyn Transform>> {
        self.transforms.get(name)
    }

    pub fn transforms(&self) -> impl Iterator<Item = &Arc<dyn Transform>> {
        self.transforms.values()
    }

    pub fn task(&self, name: &str) -> Option<&TaskSpec> {
        self.tasks.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// All tasks by name, transform tasks included.
    pub fn tasks(&self) -> impl Iterator<Item = (&TaskName, &TaskSpec)> {
        self.tasks.iter()
    }

    /// Watch rules in declaration order.
    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    pub fn footprint(&self, name: &str) -> Option<&Footprint> {
        self.footprints.get(name)
    }

    /// Whether running `name` would start a service.
    pub fn has_service(&self, name: &str) -> bool {
        self.footprints.get(name).is_some_and(|fp| fp.has_service)
    }

    /// Tasks ordered so every composite comes after its children.
    pub fn order(&self) -> &[TaskName] {
        &self.order
    }
}

/// Collects transforms, tasks and rules, then validates them as a whole.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    transforms: Vec<Arc<dyn Transform>>,
    tasks: Vec<(TaskName, TaskSpec)>,
    rules: Vec<WatchRule>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transform. It becomes a task of the same name.
    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transforms.push(transform);
        self
    }

    pub fn task(mut self, name: impl Into<TaskName>, spec: TaskSpec) -> Self {
        self.tasks.push((name.into(), spec));
        self
    }

    pub fn rule(mut self, rule: WatchRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        let mut transforms: BTreeMap<String, Arc<dyn Transform>> = BTreeMap::new();
        for t in self.transforms {
            let name = t.name().to_string();
            if name.trim().is_empty() {
                return Err(AssetflowError::config("transform names must not be empty"));
            }
            if transforms.insert(name.clone(), t).is_some() {
                return Err(AssetflowError::config(format!(
                    "transform '{name}' is defined twice"
                )));
            }
        }

        let mut tasks: BTreeMap<TaskName, TaskSpec> = transforms
            .keys()
            .map(|name| (name.clone(), TaskSpec::Transform(name.clone())))
            .collect();
        for (name, mut spec) in self.tasks {
            if name.trim().is_empty() {
                return Err(AssetflowError::config("task names must not be empty"));
            }
            if let TaskSpec::Clean { root } = &mut spec {
                *root = normalize_relative(root).map_err(|e| {
                    AssetflowError::config(format!("task '{name}': clean root: {e:#}"))
                })?;
                if root.as_os_str().is_empty() {
                    return Err(AssetflowError::config(format!(
                        "task '{name}': refusing to clean the project root"
                    )));
                }
            }
            if transforms.contains_key(&name) {
                return Err(AssetflowError::config(format!(
                    "task '{name}' clashes with the transform of the same name"
                )));
            }
            if tasks.insert(name.clone(), spec).is_some() {
                return Err(AssetflowError::config(format!("task '{name}' is defined twice")));
            }
        }

        validate_unique_outputs(&transforms)?;
        validate_references(&tasks)?;
        let order = topological_order(&tasks)?;
        let footprints = compute_footprints(&tasks, &transforms, &order)?;
        validate_composites(&tasks, &footprints)?;
        validate_rules(&self.rules, &footprints)?;

        debug!(
            transforms = transforms.len(),
            tasks = tasks.len(),
            rules = self.rules.len(),
            "pipeline built"
        );

        Ok(Pipeline {
            transforms,
            tasks,
            rules: self.rules,
            footprints,
            order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_str;

    fn pipeline(toml: &str) -> Result<Pipeline> {
        let cfg = ConfigFile::try_from(parse_str(toml)?)?;
        Pipeline::from_config(&cfg)
    }

    fn config_msg(res: Result<Pipeline>) -> String {
        match res {
            Err(AssetflowError::Configuration(msg)) => msg,
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    const BASE: &str = r#"
[transform.styles]
kind = "copy"
source_glob = ["app/css/**/*.css"]
output_path = "dist/css"

[transform.scripts]
kind = "concat"
source_glob = ["app/js/**/*.js"]
output_path = "dist/js"
output_file = "main.min.js"

[task.clean_dist]
clean = "dist"
"#;

    #[test]
    fn builds_gulp_like_graph() {
        let p = pipeline(&format!(
            r#"{BASE}
[task.assets]
concurrent = ["styles", "scripts"]

[task.build]
sequential = ["clean_dist", "assets"]

[[watch]]
patterns = ["app/css/**/*.css"]
task = "styles"
"#
        ))
        .unwrap();

        assert!(p.contains("styles"));
        let fp = p.footprint("build").unwrap();
        assert_eq!(fp.transforms.len(), 2);
        assert!(fp.cleans.contains(&PathBuf::from("dist")));
        assert!(fp.writes.contains(&PathBuf::from("dist/js/main.min.js")));
        assert_eq!(p.rules().len(), 1);
    }

    #[test]
    fn duplicate_outputs_are_rejected() {
        let msg = config_msg(pipeline(&format!(
            r#"{BASE}
[transform.more_styles]
kind = "copy"
source_glob = ["vendor/**/*.css"]
output_path = "dist/css"
"#
        )));
        assert!(msg.contains("both declare output"), "{msg}");
    }

    #[test]
    fn output_paths_are_compared_after_normalisation() {
        let msg = config_msg(pipeline(&format!(
            r#"{BASE}
[transform.more_styles]
kind = "copy"
source_glob = ["vendor/**/*.css"]
output_path = "./dist/./css"
"#
        )));
        assert!(msg.contains("both declare output 'dist/css'"), "{msg}");

        let built = Pipeline::builder()
            .task("wipe", TaskSpec::clean("./dist/"))
            .build()
            .unwrap();
        assert!(matches!(
            built.task("wipe"),
            Some(TaskSpec::Clean { root }) if root == Path::new("dist")
        ));
        let msg = config_msg(Pipeline::builder().task("wipe", TaskSpec::clean("../site")).build());
        assert!(msg.contains("must not contain `..`"), "{msg}");
    }

    #[test]
    fn sources_never_resolve_from_the_distributable_tree() {
        let p = pipeline(
            r#"
[transform.styles]
kind = "copy"
source_glob = ["**/*.css"]
output_path = "build/css"
"#,
        )
        .unwrap();
        let sources = p.transform("styles").unwrap().settings().sources();
        assert!(sources.matches("app/a.css"));
        assert!(!sources.matches("dist/a.css"));
    }

    #[test]
    fn custom_dist_root_is_fenced_off() {
        let p = pipeline(
            r#"
[layout]
dist_root = "./public"

[transform.pages]
kind = "copy"
source_glob = ["**/*.html"]
output_path = "public"
"#,
        )
        .unwrap();
        let sources = p.transform("pages").unwrap().settings().sources();
        assert!(sources.matches("app/index.html"));
        assert!(!sources.matches("public/index.html"));
        assert!(sources.matches("dist/index.html"));
    }

    #[test]
    fn unknown_children_and_cycles_are_rejected() {
        let msg = config_msg(pipeline(&format!("{BASE}\n[task.x]\nsequential = [\"nope\"]\n")));
        assert!(msg.contains("unknown task 'nope'"), "{msg}");

        let msg = config_msg(pipeline(&format!(
            "{BASE}\n[task.a]\nsequential = [\"b\"]\n[task.b]\nconcurrent = [\"styles\", \"a\"]\n"
        )));
        assert!(msg.contains("cycle"), "{msg}");
    }

    #[test]
    fn clean_must_not_race_or_follow_writers() {
        let msg = config_msg(pipeline(&format!(
            "{BASE}\n[task.bad]\nconcurrent = [\"clean_dist\", \"styles\"]\n"
        )));
        assert!(msg.contains("use `sequential`"), "{msg}");

        let msg = config_msg(pipeline(&format!(
            "{BASE}\n[task.bad]\nsequential = [\"styles\", \"clean_dist\"]\n"
        )));
        assert!(msg.contains("after 'styles' wrote into it"), "{msg}");
    }

    #[test]
    fn transform_shared_between_concurrent_branches_is_rejected() {
        let msg = config_msg(pipeline(&format!(
            r#"{BASE}
[task.left]
sequential = ["styles"]

[task.both]
concurrent = ["left", "styles"]
"#
        )));
        assert!(msg.contains("reachable from both"), "{msg}");
    }

    #[test]
    fn watch_rules_must_bind_finite_known_tasks() {
        let msg = config_msg(pipeline(&format!(
            "{BASE}\n[[watch]]\npatterns = [\"app/**\"]\ntask = \"missing\"\n"
        )));
        assert!(msg.contains("unknown task 'missing'"), "{msg}");

        let msg = config_msg(pipeline(&format!(
            "{BASE}\n[task.serve]\nservice = \"python3 -m http.server\"\n\n[[watch]]\npatterns = [\"app/**\"]\ntask = \"serve\"\n"
        )));
        assert!(msg.contains("starts a service"), "{msg}");
    }
}
