// src/exec/mod.rs

//! Execution layer.
//!
//! - [`runner`] runs one task invocation to completion, expanding
//!   `sequential` / `concurrent` composites.
//! - [`service`] owns long-running service processes.
//! - [`backend`] provides the `ExecutorBackend` trait the watch engine uses,
//!   and the production `RealExecutorBackend`. Tests replace it with a fake.

pub mod backend;
pub mod runner;
pub mod service;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use runner::{RunFuture, TaskRunner};
pub use service::{ServiceSupervisor, parse_duration};
