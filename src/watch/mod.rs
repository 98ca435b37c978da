// src/watch/mod.rs

//! File watching and change detection.
//!
//! This module is responsible for:
//! - Compiling glob pattern sets with `!` exclusions ([`patterns`]).
//! - Compiling `[[watch]]` rules ([`rules`]).
//! - Wiring up a cross-platform filesystem watcher (`notify`) that turns
//!   changes into `RuntimeEvent::FileChanged` ([`watcher`]).
//! - Optional content hashing to drop no-op modifications ([`hash`]).
//!
//! It does **not** decide which task runs; the engine evaluates the rules.

pub mod hash;
pub mod patterns;
pub mod rules;
pub mod watcher;

pub use patterns::{PatternSet, collect_matching_files};
pub use rules::{RuleAction, WatchRule, rules_from_config};
pub use watcher::{WatcherHandle, spawn_watcher};
