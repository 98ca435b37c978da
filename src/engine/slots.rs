// src/engine/slots.rs

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::types::{TaskName, TriggerReason};

/// A trigger that arrived while the task was running.
///
/// Any number of events collapse into one `Pending`, so a running task has
/// at most one queued re-run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pending {
    /// Paths whose change caused the re-run.
    pub paths: BTreeSet<String>,
    /// At least one trigger was an explicit request.
    pub manual: bool,
}

/// Lifecycle of one task: `Idle → Triggered → Running → Idle`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SlotState {
    #[default]
    Idle,
    /// Waiting for the debounce window (`ready = false`) or for a
    /// conflicting task to finish (`ready = true`).
    Triggered {
        ready: bool,
        ticket: u64,
        reason: TriggerReason,
    },
    Running {
        run_id: u64,
        pending: Option<Pending>,
    },
}

/// What recording a trigger did to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Slot went `Idle → Triggered`; a debounce timer with this ticket must
    /// be started.
    StartDebounce(u64),
    /// Slot is triggered and may run as soon as nothing conflicts.
    Ready,
    /// Merged into an existing trigger.
    Coalesced,
    /// Task is running; recorded as its pending re-run.
    Pending,
}

/// Per-task slot states. Watch rules bound to the same task share a slot.
#[derive(Debug, Default)]
pub struct SlotTable {
    slots: BTreeMap<TaskName, SlotState>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, task: &str) -> SlotState {
        self.slots.get(task).cloned().unwrap_or_default()
    }

    /// Record a trigger for `task`. `ticket` is used only if a new debounce
    /// window starts.
    pub fn record_trigger(
        &mut self,
        task: &str,
        reason: TriggerReason,
        path: Option<&str>,
        ticket: u64,
    ) -> TriggerOutcome {
        let manual = reason == TriggerReason::Manual;
        let slot = self.slots.entry(task.to_string()).or_default();

        match slot {
            SlotState::Idle => {
                *slot = SlotState::Triggered {
                    ready: manual,
                    ticket,
                    reason,
                };
                if manual {
                    TriggerOutcome::Ready
                } else {
                    debug!(task = %task, ticket, "debounce window opened");
                    TriggerOutcome::StartDebounce(ticket)
                }
            }
            SlotState::Triggered {
                ready,
                reason: slot_reason,
                ..
            } => {
                if manual && !*ready {
                    *ready = true;
                    *slot_reason = TriggerReason::Manual;
                    TriggerOutcome::Ready
                } else {
                    debug!(task = %task, "coalesced into pending trigger");
                    TriggerOutcome::Coalesced
                }
            }
            SlotState::Running { run_id, pending } => {
                let pending = pending.get_or_insert_with(Pending::default);
                if let Some(path) = path {
                    pending.paths.insert(path.to_string());
                }
                pending.manual |= manual;
                debug!(task = %task, run_id = *run_id, "task running; re-run queued");
                TriggerOutcome::Pending
            }
        }
    }

    /// Mark the debounce window for `ticket` as over. Stale tickets are
    /// ignored. Returns whether the slot became ready.
    pub fn debounce_elapsed(&mut self, task: &str, ticket: u64) -> bool {
        match self.slots.get_mut(task) {
            Some(SlotState::Triggered {
                ready,
                ticket: current,
                ..
            }) if *current == ticket => {
                *ready = true;
                true
            }
            _ => {
                debug!(task = %task, ticket, "ignoring stale debounce timer");
                false
            }
        }
    }

    /// Triggered slots whose debounce window is over, with their reasons.
    pub fn ready(&self) -> Vec<(TaskName, TriggerReason)> {
        self.slots
            .iter()
            .filter_map(|(name, state)| match state {
                SlotState::Triggered {
                    ready: true,
                    reason,
                    ..
                } => Some((name.clone(), *reason)),
                _ => None,
            })
            .collect()
    }

    pub fn mark_running(&mut self, task: &str, run_id: u64) {
        self.slots.insert(
            task.to_string(),
            SlotState::Running {
                run_id,
                pending: None,
            },
        );
    }

    /// Move a running slot back to `Idle`, returning its pending re-run.
    ///
    /// Completions for any other run id are ignored (`None`).
    pub fn complete(&mut self, task: &str, run_id: u64) -> Option<Pending> {
        let Some(SlotState::Running {
            run_id: current,
            pending,
        }) = self.slots.get_mut(task)
        else {
            return None;
        };
        if *current != run_id {
            debug!(task = %task, run_id, current = *current, "completion for unknown run");
            return None;
        }
        let pending = pending.take();
        self.slots.insert(task.to_string(), SlotState::Idle);
        pending
    }

    /// Re-trigger a task that just completed; it may run immediately.
    pub fn requeue(&mut self, task: &str, reason: TriggerReason, ticket: u64) {
        self.slots.insert(
            task.to_string(),
            SlotState::Triggered {
                ready: true,
                ticket,
                reason,
            },
        );
    }

    /// Drop every queued-but-unstarted run. Returns the affected tasks.
    pub fn cancel_queued(&mut self) -> Vec<TaskName> {
        let mut cancelled = Vec::new();
        for (name, state) in self.slots.iter_mut() {
            match state {
                SlotState::Triggered { .. } => {
                    *state = SlotState::Idle;
                    cancelled.push(name.clone());
                }
                SlotState::Running { pending, .. } if pending.is_some() => {
                    *pending = None;
                    cancelled.push(name.clone());
                }
                _ => {}
            }
        }
        cancelled
    }

    /// Names of tasks currently running.
    pub fn running(&self) -> impl Iterator<Item = &TaskName> {
        self.slots
            .iter()
            .filter(|(_, s)| matches!(s, SlotState::Running { .. }))
            .map(|(name, _)| name)
    }

    pub fn in_flight(&self) -> usize {
        self.running().count()
    }

    /// No slot is triggered or running.
    pub fn is_idle(&self) -> bool {
        self.slots.values().all(|s| *s == SlotState::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_while_running_collapse_into_one_pending_run() {
        let mut slots = SlotTable::new();
        assert_eq!(
            slots.record_trigger("css", TriggerReason::FileWatch, Some("app/a.scss"), 1),
            TriggerOutcome::StartDebounce(1)
        );
        assert!(slots.debounce_elapsed("css", 1));
        slots.mark_running("css", 7);

        for path in ["app/a.scss", "app/b.scss", "app/a.scss"] {
            assert_eq!(
                slots.record_trigger("css", TriggerReason::FileWatch, Some(path), 2),
                TriggerOutcome::Pending
            );
        }

        let pending = slots.complete("css", 7).unwrap();
        assert_eq!(pending.paths.len(), 2);
        assert!(!pending.manual);
        assert!(slots.is_idle());
    }

    #[test]
    fn stale_tickets_and_run_ids_are_ignored() {
        let mut slots = SlotTable::new();
        slots.record_trigger("js", TriggerReason::FileWatch, None, 3);
        assert!(!slots.debounce_elapsed("js", 2));
        assert!(slots.ready().is_empty());

        slots.mark_running("js", 10);
        assert_eq!(slots.complete("js", 9), None);
        assert_eq!(slots.in_flight(), 1);
    }

    #[test]
    fn manual_trigger_skips_debounce() {
        let mut slots = SlotTable::new();
        slots.record_trigger("build", TriggerReason::FileWatch, None, 1);
        assert_eq!(
            slots.record_trigger("build", TriggerReason::Manual, None, 2),
            TriggerOutcome::Ready
        );
        assert_eq!(
            slots.ready(),
            vec![("build".to_string(), TriggerReason::Manual)]
        );
    }
}
