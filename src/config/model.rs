// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::FailureAction;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [config]
/// debounce_ms = 200
///
/// [layout]
/// dist_root = "dist"
///
/// [transform.styles]
/// kind = "command"
/// source_glob = ["app/scss/style.scss"]
/// output_path = "app/css"
/// cmd = "sass app/scss/style.scss app/css/style.min.css"
///
/// [task.build]
/// sequential = ["clean_dist", "images", "copy_dist"]
///
/// [[watch]]
/// patterns = ["app/scss/*.scss"]
/// task = "styles"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    #[serde(default)]
    pub config: ConfigSection,

    #[serde(default)]
    pub layout: LayoutSection,

    /// Transforms from `[transform.<name>]`. Each is also a task of the
    /// same name.
    #[serde(default)]
    pub transform: BTreeMap<String, TransformConfig>,

    /// Non-transform tasks from `[task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,

    /// Watch rules from `[[watch]]`, in declaration order.
    #[serde(default)]
    pub watch: Vec<WatchConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `ConfigFile::try_from(RawConfigFile)`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub layout: LayoutSection,
    pub transform: BTreeMap<String, TransformConfig>,
    pub task: BTreeMap<String, TaskConfig>,
    pub watch: Vec<WatchConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            config: raw.config,
            layout: raw.layout,
            transform: raw.transform,
            task: raw.task,
            watch: raw.watch,
        }
    }

    /// Whether `name` refers to a transform or a task.
    pub fn has_task(&self, name: &str) -> bool {
        self.transform.contains_key(name) || self.task.contains_key(name)
    }
}

/// `[config]` section: global behaviour.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    /// Task run by `assetflow build`.
    #[serde(default = "default_build_task")]
    pub build_task: String,

    /// Task submitted when `assetflow dev` starts.
    #[serde(default = "default_dev_task")]
    pub dev_task: String,

    /// Window during which file events for one task coalesce before it runs.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long a shutdown waits for running tasks before aborting them.
    #[serde(default = "default_grace_period_secs")]
    pub grace_period_secs: u64,

    /// Drop watch events for files whose content hash did not change.
    #[serde(default)]
    pub use_hash: bool,
}

fn default_build_task() -> String {
    "build".to_string()
}

fn default_dev_task() -> String {
    "default".to_string()
}

fn default_debounce_ms() -> u64 {
    200
}

fn default_grace_period_secs() -> u64 {
    5
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            build_task: default_build_task(),
            dev_task: default_dev_task(),
            debounce_ms: default_debounce_ms(),
            grace_period_secs: default_grace_period_secs(),
            use_hash: false,
        }
    }
}

/// `[layout]` section.
///
/// Editable sources and development artifacts may share a directory (the
/// usual `app/`), so only the distributable tree needs declaring: it is
/// output only and never resolved as a source.
#[derive(Debug, Clone, Deserialize)]
pub struct LayoutSection {
    #[serde(default = "default_dist_root")]
    pub dist_root: String,
}

fn default_dist_root() -> String {
    "dist".to_string()
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            dist_root: default_dist_root(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransformKind {
    Copy,
    Concat,
    Command,
}

/// `[transform.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TransformConfig {
    pub kind: TransformKind,

    /// Which files to read. Entries starting with `!` exclude.
    #[serde(default)]
    pub source_glob: Vec<String>,

    /// Where to write, relative to the project root.
    pub output_path: String,

    /// Single output file name inside `output_path` (concat, command).
    #[serde(default)]
    pub output_file: Option<String>,

    /// Quality/size trade-off for binary transforms, 0..=100.
    #[serde(default)]
    pub compression_level: Option<u32>,

    /// Compatibility matrix for code-generation transforms.
    #[serde(default)]
    pub target_environments: Vec<String>,

    #[serde(default)]
    pub failure_action: FailureAction,

    /// copy: directory whose relative layout is preserved.
    #[serde(default)]
    pub base: Option<String>,

    /// concat: text inserted between sources (default newline).
    #[serde(default)]
    pub separator: Option<String>,

    /// command: shell command line.
    #[serde(default)]
    pub cmd: Option<String>,
}

/// `[task.<name>]` section. Exactly one body field must be set.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskConfig {
    #[serde(default)]
    pub sequential: Option<Vec<String>>,

    #[serde(default)]
    pub concurrent: Option<Vec<String>>,

    /// Output root to remove recursively.
    #[serde(default)]
    pub clean: Option<String>,

    /// Long-running command (e.g. a preview server).
    #[serde(default)]
    pub service: Option<String>,

    /// service: regex on stdout that marks the service as ready.
    #[serde(default)]
    pub ready_on_stdout: Option<String>,

    /// service: duration (e.g. `"2s"`) after which it counts as ready.
    #[serde(default)]
    pub ready_after: Option<String>,
}

impl TaskConfig {
    /// Number of body fields set (valid configs have exactly one).
    pub fn body_count(&self) -> usize {
        [
            self.sequential.is_some(),
            self.concurrent.is_some(),
            self.clean.is_some(),
            self.service.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count()
    }
}

/// `[[watch]]` entry.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct WatchConfig {
    #[serde(default)]
    pub name: Option<String>,

    /// Globs relative to the project root; `!` excludes.
    pub patterns: Vec<String>,

    /// Subset of `created`, `modified`, `deleted`. Default: `["modified"]`.
    #[serde(default)]
    pub events: Option<Vec<String>>,

    /// Task to run on a match.
    #[serde(default)]
    pub task: Option<String>,

    /// Push the matched path to the notification sink instead.
    #[serde(default)]
    pub notify: bool,
}
