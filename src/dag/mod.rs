// src/dag/mod.rs

//! Task model and graph construction.
//!
//! - [`task`] defines what a named task does (`TaskSpec`).
//! - [`pipeline`] turns transforms, tasks and watch rules into a validated
//!   [`Pipeline`].
//! - [`graph`] holds the whole-graph checks (references, cycles, output
//!   ownership, composite ordering) and per-task [`Footprint`]s.

pub mod graph;
pub mod pipeline;
pub mod task;

pub use graph::Footprint;
pub use pipeline::{Pipeline, PipelineBuilder};
pub use task::{ServiceSpec, TaskSpec};
