// src/watch/rules.rs

//! Compiled `[[watch]]` rules.

use std::collections::BTreeSet;

use crate::config::model::WatchConfig;
use crate::errors::{AssetflowError, Result};
use crate::types::{TaskName, WatchEventKind};
use crate::watch::patterns::PatternSet;

/// What a rule does when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Trigger the named task.
    Task(TaskName),
    /// Push the matched path to the notification sink.
    Notify,
}

#[derive(Debug, Clone)]
pub struct WatchRule {
    name: String,
    patterns: PatternSet,
    events: BTreeSet<WatchEventKind>,
    action: RuleAction,
}

impl WatchRule {
    /// New rule reacting to `modified` events only.
    pub fn new(name: impl Into<String>, patterns: &[String], action: RuleAction) -> Result<Self> {
        let name = name.into();
        let patterns = PatternSet::compile(patterns)
            .map_err(|e| AssetflowError::config(format!("watch rule {name}: {e:#}")))?;
        Ok(Self {
            name,
            patterns,
            events: BTreeSet::from([WatchEventKind::Modified]),
            action,
        })
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = WatchEventKind>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn events(&self) -> &BTreeSet<WatchEventKind> {
        &self.events
    }

    pub fn action(&self) -> &RuleAction {
        &self.action
    }

    /// The bound task, if this is not a notify rule.
    pub fn task(&self) -> Option<&str> {
        match &self.action {
            RuleAction::Task(t) => Some(t),
            RuleAction::Notify => None,
        }
    }

    /// Whether an event of `kind` on `rel_path` qualifies for this rule.
    pub fn accepts(&self, rel_path: &str, kind: WatchEventKind) -> bool {
        self.events.contains(&kind) && self.patterns.matches(rel_path)
    }
}

/// Compile `[[watch]]` sections in declaration order.
pub fn rules_from_config(watch: &[WatchConfig]) -> Result<Vec<WatchRule>> {
    watch
        .iter()
        .enumerate()
        .map(|(i, w)| {
            let name = w.name.clone().unwrap_or_else(|| format!("#{}", i + 1));
            let action = match &w.task {
                Some(task) => RuleAction::Task(task.clone()),
                None => RuleAction::Notify,
            };
            let rule = WatchRule::new(name, &w.patterns, action)?;
            match &w.events {
                Some(events) => {
                    let kinds = events
                        .iter()
                        .map(|e| e.parse::<WatchEventKind>())
                        .collect::<std::result::Result<Vec<_>, _>>()
                        .map_err(AssetflowError::config)?;
                    Ok(rule.with_events(kinds))
                }
                None => Ok(rule),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_is_modified_only() {
        let rule = WatchRule::new(
            "html",
            &["app/*.html".to_string()],
            RuleAction::Task("html".to_string()),
        )
        .unwrap();

        assert!(rule.accepts("app/index.html", WatchEventKind::Modified));
        assert!(!rule.accepts("app/index.html", WatchEventKind::Created));
        assert!(!rule.accepts("app/partials/nav.html", WatchEventKind::Modified));
    }

    #[test]
    fn config_rules_keep_declaration_order_and_events() {
        let watch = vec![
            WatchConfig {
                patterns: vec!["app/scss/**/*.scss".to_string()],
                task: Some("styles".to_string()),
                events: Some(vec!["created".to_string(), "change".to_string()]),
                ..Default::default()
            },
            WatchConfig {
                name: Some("reload".to_string()),
                patterns: vec!["app/*.html".to_string()],
                notify: true,
                ..Default::default()
            },
        ];

        let rules = rules_from_config(&watch).unwrap();
        assert_eq!(rules[0].name(), "#1");
        assert_eq!(rules[0].task(), Some("styles"));
        assert!(rules[0].accepts("app/scss/a/b.scss", WatchEventKind::Created));
        assert!(!rules[0].accepts("app/scss/a/b.scss", WatchEventKind::Deleted));
        assert_eq!(rules[1].name(), "reload");
        assert_eq!(rules[1].action(), &RuleAction::Notify);
    }
}
