use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assetflow::errors::TransformError;
use assetflow::sink::{Notification, NotifySink};
use assetflow::transform::{Outputs, Transform, TransformFuture, TransformInput, TransformSettings};
use assetflow::types::FailureAction;

/// Shared, ordered log of what fakes did (`start:<name>`, `end:<name>`).
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// How many times `name` was started.
    pub fn starts(&self, name: &str) -> usize {
        let key = format!("start:{name}");
        self.entries().iter().filter(|e| **e == key).count()
    }

    /// Position of `entry` in the log, if present.
    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Transform double: writes one file per configured output (default
/// `<output_path>/<name>.out`) containing its joined sources, optionally
/// after a delay or failing instead.
#[derive(Debug)]
pub struct FakeTransform {
    name: String,
    settings: TransformSettings,
    journal: Journal,
    outputs: Vec<PathBuf>,
    failure: Option<String>,
    delay: Option<Duration>,
}

impl FakeTransform {
    pub fn new(name: &str, source_glob: &str, output_path: &str) -> Self {
        let settings = TransformSettings::new(&[source_glob.to_string()], output_path)
            .expect("valid fake source glob");
        Self {
            name: name.to_string(),
            settings,
            journal: Journal::new(),
            outputs: Vec::new(),
            failure: None,
            delay: None,
        }
    }

    pub fn with_journal(mut self, journal: &Journal) -> Self {
        self.journal = journal.clone();
        self
    }

    /// Write (and report) this path, relative to the project root.
    pub fn with_output(mut self, path: &str) -> Self {
        self.outputs.push(PathBuf::from(path));
        self
    }

    pub fn with_output_file(mut self, file: &str) -> Self {
        self.settings = self.settings.with_output_file(file);
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.failure = Some(message.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_failure_action(mut self, action: FailureAction) -> Self {
        self.settings = self.settings.with_failure_action(action);
        self
    }

    pub fn into_arc(self) -> Arc<dyn Transform> {
        Arc::new(self)
    }
}

impl Transform for FakeTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &TransformSettings {
        &self.settings
    }

    fn run<'a>(&'a self, input: TransformInput<'a>) -> TransformFuture<'a> {
        Box::pin(async move {
            self.journal.push(format!("start:{}", self.name));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            if let Some(message) = &self.failure {
                self.journal.push(format!("fail:{}", self.name));
                return Err(TransformError::new(&self.name, "run", message));
            }

            let targets = if self.outputs.is_empty() {
                vec![self.settings.output_path().join(format!("{}.out", self.name))]
            } else {
                self.outputs.clone()
            };

            let body = input
                .sources
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("\n");

            let mut written = Outputs::new();
            for rel in targets {
                input
                    .fs
                    .write(&input.root.join(&rel), body.as_bytes())
                    .map_err(|e| TransformError::from_anyhow(&self.name, "write", &e))?;
                written.insert(rel);
            }

            self.journal.push(format!("end:{}", self.name));
            Ok(written)
        })
    }
}

/// Sink that keeps every notification it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.received.lock().unwrap().clone()
    }

    pub fn changed(&self) -> Vec<PathBuf> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Changed(path) => Some(path),
                Notification::Failed { .. } => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<(String, String)> {
        self.notifications()
            .into_iter()
            .filter_map(|n| match n {
                Notification::Failed { task, message } => Some((task, message)),
                Notification::Changed(_) => None,
            })
            .collect()
    }
}

impl NotifySink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.received.lock().unwrap().push(notification);
    }
}
