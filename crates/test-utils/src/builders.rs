use assetflow::config::{
    ConfigFile, RawConfigFile, TaskConfig, TransformConfig, TransformKind, WatchConfig,
};
use assetflow::errors::Result;
use assetflow::types::FailureAction;

/// Builder for `ConfigFile` to simplify test setup.
#[derive(Debug, Default)]
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transform(mut self, name: &str, transform: TransformConfig) -> Self {
        self.config.transform.insert(name.to_string(), transform);
        self
    }

    pub fn with_task(mut self, name: &str, task: TaskConfig) -> Self {
        self.config.task.insert(name.to_string(), task);
        self
    }

    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.config.watch.push(watch);
        self
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.config.config.debounce_ms = ms;
        self
    }

    /// Validate; for tests that expect a configuration error.
    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// Builder for `TransformConfig`.
#[derive(Debug)]
pub struct TransformConfigBuilder {
    transform: TransformConfig,
}

impl TransformConfigBuilder {
    fn new(kind: TransformKind, source_glob: &str, output_path: &str) -> Self {
        Self {
            transform: TransformConfig {
                kind,
                source_glob: vec![source_glob.to_string()],
                output_path: output_path.to_string(),
                output_file: None,
                compression_level: None,
                target_environments: Vec::new(),
                failure_action: FailureAction::Abort,
                base: None,
                separator: None,
                cmd: None,
            },
        }
    }

    pub fn copy(source_glob: &str, output_path: &str) -> Self {
        Self::new(TransformKind::Copy, source_glob, output_path)
    }

    pub fn concat(source_glob: &str, output_path: &str, output_file: &str) -> Self {
        Self::new(TransformKind::Concat, source_glob, output_path).output_file(output_file)
    }

    pub fn command(source_glob: &str, output_path: &str, cmd: &str) -> Self {
        let mut b = Self::new(TransformKind::Command, source_glob, output_path);
        b.transform.cmd = Some(cmd.to_string());
        b
    }

    pub fn source(mut self, pattern: &str) -> Self {
        self.transform.source_glob.push(pattern.to_string());
        self
    }

    pub fn output_file(mut self, file: &str) -> Self {
        self.transform.output_file = Some(file.to_string());
        self
    }

    pub fn base(mut self, base: &str) -> Self {
        self.transform.base = Some(base.to_string());
        self
    }

    pub fn failure_action(mut self, action: FailureAction) -> Self {
        self.transform.failure_action = action;
        self
    }

    pub fn build(self) -> TransformConfig {
        self.transform
    }
}

/// Shorthands for `TaskConfig` bodies.
pub struct TaskConfigBuilder;

impl TaskConfigBuilder {
    pub fn sequential(children: &[&str]) -> TaskConfig {
        TaskConfig {
            sequential: Some(children.iter().map(|c| c.to_string()).collect()),
            ..TaskConfig::default()
        }
    }

    pub fn concurrent(children: &[&str]) -> TaskConfig {
        TaskConfig {
            concurrent: Some(children.iter().map(|c| c.to_string()).collect()),
            ..TaskConfig::default()
        }
    }

    pub fn clean(root: &str) -> TaskConfig {
        TaskConfig {
            clean: Some(root.to_string()),
            ..TaskConfig::default()
        }
    }

    pub fn service(cmd: &str) -> TaskConfig {
        TaskConfig {
            service: Some(cmd.to_string()),
            ..TaskConfig::default()
        }
    }
}

/// `[[watch]]` entry running `task` on modifications of `patterns`.
pub fn watch_task(patterns: &[&str], task: &str) -> WatchConfig {
    WatchConfig {
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        task: Some(task.to_string()),
        ..WatchConfig::default()
    }
}

/// `[[watch]]` entry pushing matches on `patterns` to the sink.
pub fn watch_notify(patterns: &[&str]) -> WatchConfig {
    WatchConfig {
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        notify: true,
        ..WatchConfig::default()
    }
}
