// src/dag/graph.rs

//! Whole-graph checks run while a [`Pipeline`](super::Pipeline) is built.
//!
//! Everything here fails with a configuration error before any task runs.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::dag::task::TaskSpec;
use crate::errors::{AssetflowError, Result};
use crate::transform::Transform;
use crate::types::{CompositionMode, TaskName};
use crate::watch::rules::WatchRule;

/// Everything a task may touch when it runs, children included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Footprint {
    /// Transforms the task (transitively) invokes.
    pub transforms: BTreeSet<String>,
    /// Declared output locations of those transforms.
    pub writes: BTreeSet<PathBuf>,
    /// Roots removed by clean tasks.
    pub cleans: BTreeSet<PathBuf>,
    pub has_service: bool,
}

impl Footprint {
    fn merge(&mut self, other: &Footprint) {
        self.transforms.extend(other.transforms.iter().cloned());
        self.writes.extend(other.writes.iter().cloned());
        self.cleans.extend(other.cleans.iter().cloned());
        self.has_service |= other.has_service;
    }

    /// Two tasks conflict when they share a transform, or when one cleans a
    /// tree the other writes into or cleans.
    pub fn conflicts_with(&self, other: &Footprint) -> bool {
        !self.transforms.is_disjoint(&other.transforms)
            || cleans_touch(&self.cleans, other)
            || cleans_touch(&other.cleans, self)
    }
}

fn cleans_touch(cleans: &BTreeSet<PathBuf>, other: &Footprint) -> bool {
    cleans.iter().any(|root| {
        other
            .writes
            .iter()
            .chain(other.cleans.iter())
            .any(|p| paths_overlap(root, p))
    })
}

/// One path is an ancestor of (or equal to) the other.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

/// Every composite child must name a known task.
pub fn validate_references(tasks: &BTreeMap<TaskName, TaskSpec>) -> Result<()> {
    for (name, spec) in tasks {
        if let TaskSpec::Composite { mode, children } = spec {
            if children.is_empty() {
                return Err(AssetflowError::config(format!(
                    "{mode} task '{name}' has no children"
                )));
            }
            for child in children {
                if !tasks.contains_key(child) {
                    return Err(AssetflowError::config(format!(
                        "task '{name}' references unknown task '{child}'"
                    )));
                }
            }
        }
    }
    Ok(())
}

/// Topological order of all tasks, children before parents.
///
/// A task that contains itself, directly or through other composites, is
/// a cycle.
pub fn topological_order(tasks: &BTreeMap<TaskName, TaskSpec>) -> Result<Vec<TaskName>> {
    // Edge direction: composite -> child.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();
    for name in tasks.keys() {
        graph.add_node(name.as_str());
    }
    for (name, spec) in tasks {
        for child in spec.children() {
            if child == name {
                return Err(AssetflowError::config(format!(
                    "cycle detected: task '{name}' contains itself"
                )));
            }
            graph.add_edge(name.as_str(), child.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().rev().map(str::to_string).collect()),
        Err(cycle) => Err(AssetflowError::config(format!(
            "cycle detected in task graph involving task '{}'",
            cycle.node_id()
        ))),
    }
}

/// No two transforms may declare the same output location.
pub fn validate_unique_outputs(transforms: &BTreeMap<String, Arc<dyn Transform>>) -> Result<()> {
    let mut owners: BTreeMap<PathBuf, &str> = BTreeMap::new();
    for (name, transform) in transforms {
        let declared = transform.settings().declared_output();
        if let Some(owner) = owners.insert(declared.clone(), name.as_str()) {
            return Err(AssetflowError::config(format!(
                "transforms '{owner}' and '{name}' both declare output '{}'",
                declared.display()
            )));
        }
    }
    Ok(())
}

/// Compute footprints for every task, visiting `order` (children first).
pub fn compute_footprints(
    tasks: &BTreeMap<TaskName, TaskSpec>,
    transforms: &BTreeMap<String, Arc<dyn Transform>>,
    order: &[TaskName],
) -> Result<BTreeMap<TaskName, Footprint>> {
    let mut footprints: BTreeMap<TaskName, Footprint> = BTreeMap::new();

    for name in order {
        let Some(spec) = tasks.get(name) else {
            continue;
        };
        let mut fp = Footprint::default();
        match spec {
            TaskSpec::Transform(t) => {
                let transform = transforms.get(t).ok_or_else(|| {
                    AssetflowError::config(format!("task '{name}' references unknown transform '{t}'"))
                })?;
                fp.transforms.insert(t.clone());
                fp.writes.insert(transform.settings().declared_output());
            }
            TaskSpec::Composite { .. } => {
                for child in spec.children() {
                    if let Some(child_fp) = footprints.get(child) {
                        fp.merge(child_fp);
                    }
                }
            }
            TaskSpec::Clean { root } => {
                fp.cleans.insert(root.clone());
            }
            TaskSpec::Service(_) => fp.has_service = true,
        }
        footprints.insert(name.clone(), fp);
    }

    Ok(footprints)
}

/// Ordering and overlap rules inside composites.
///
/// - `concurrent`: siblings must not share a transform, and a clean must not
///   overlap what a sibling writes or cleans.
/// - `sequential`: a clean must not come after a child writing into the
///   same tree.
pub fn validate_composites(
    tasks: &BTreeMap<TaskName, TaskSpec>,
    footprints: &BTreeMap<TaskName, Footprint>,
) -> Result<()> {
    let empty = Footprint::default();
    let fp = |name: &str| footprints.get(name).unwrap_or(&empty);

    for (name, spec) in tasks {
        let TaskSpec::Composite { mode, children } = spec else {
            continue;
        };

        match mode {
            CompositionMode::Concurrent => {
                for (i, a) in children.iter().enumerate() {
                    for b in &children[i + 1..] {
                        let (fa, fb) = (fp(a.as_str()), fp(b.as_str()));
                        if let Some(shared) = fa.transforms.intersection(&fb.transforms).next() {
                            return Err(AssetflowError::config(format!(
                                "concurrent task '{name}': transform '{shared}' is reachable from both '{a}' and '{b}'"
                            )));
                        }
                        if cleans_touch(&fa.cleans, fb) || cleans_touch(&fb.cleans, fa) {
                            return Err(AssetflowError::config(format!(
                                "concurrent task '{name}': '{a}' and '{b}' clean and write the same tree; use `sequential`"
                            )));
                        }
                    }
                }
            }
            CompositionMode::Sequential => {
                for (i, later) in children.iter().enumerate() {
                    for root in &fp(later.as_str()).cleans {
                        if let Some(writer) = children[..i]
                            .iter()
                            .find(|earlier| fp(earlier.as_str()).writes.iter().any(|w| paths_overlap(root, w)))
                        {
                            return Err(AssetflowError::config(format!(
                                "sequential task '{name}': '{later}' cleans '{}' after '{writer}' wrote into it",
                                root.display()
                            )));
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Watch rules must bind known, finite tasks.
pub fn validate_rules(
    rules: &[WatchRule],
    footprints: &BTreeMap<TaskName, Footprint>,
) -> Result<()> {
    for rule in rules {
        let Some(task) = rule.task() else {
            continue;
        };
        match footprints.get(task) {
            None => {
                return Err(AssetflowError::config(format!(
                    "watch rule {} is bound to unknown task '{task}'",
                    rule.name()
                )));
            }
            Some(fp) if fp.has_service => {
                return Err(AssetflowError::config(format!(
                    "watch rule {} is bound to '{task}', which starts a service",
                    rule.name()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tasks(entries: Vec<(&str, TaskSpec)>) -> BTreeMap<TaskName, TaskSpec> {
        entries
            .into_iter()
            .map(|(n, s)| (n.to_string(), s))
            .collect()
    }

    #[test]
    fn order_puts_children_first() {
        let t = tasks(vec![
            ("build", TaskSpec::sequential(["clean", "assets"])),
            ("assets", TaskSpec::concurrent(["css", "js"])),
            ("clean", TaskSpec::clean("dist")),
            ("css", TaskSpec::Transform("css".into())),
            ("js", TaskSpec::Transform("js".into())),
        ]);
        let order = topological_order(&t).unwrap();
        let pos = |n: &str| order.iter().position(|x| x == n).unwrap();
        assert!(pos("css") < pos("assets"));
        assert!(pos("assets") < pos("build"));
        assert!(pos("clean") < pos("build"));
    }

    #[test]
    fn self_and_transitive_cycles_are_rejected() {
        let direct = tasks(vec![("a", TaskSpec::sequential(["a"]))]);
        assert!(matches!(
            topological_order(&direct),
            Err(AssetflowError::Configuration(_))
        ));

        let transitive = tasks(vec![
            ("a", TaskSpec::sequential(["b"])),
            ("b", TaskSpec::concurrent(["c"])),
            ("c", TaskSpec::sequential(["a"])),
        ]);
        assert!(matches!(
            topological_order(&transitive),
            Err(AssetflowError::Configuration(_))
        ));
    }

    #[test]
    fn footprints_conflict_on_clean_overlap() {
        let mut writer = Footprint::default();
        writer.writes.insert(PathBuf::from("dist/css"));
        let mut cleaner = Footprint::default();
        cleaner.cleans.insert(PathBuf::from("dist"));
        let mut unrelated = Footprint::default();
        unrelated.writes.insert(PathBuf::from("app/css"));

        assert!(writer.conflicts_with(&cleaner));
        assert!(cleaner.conflicts_with(&writer));
        assert!(!unrelated.conflicts_with(&cleaner));
        assert!(!writer.conflicts_with(&unrelated));
    }
}
