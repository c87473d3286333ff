// src/engine/mod.rs

//! Scheduling primitives for watchbuild.
//!
//! This module provides:
//! - [`coalesce`]: a debounced executor that never overlaps with itself and
//!   merges triggers that arrive while it is busy
//! - [`lifecycle`]: an open/close switch for long-lived resources built on
//!   top of the executor
//! - [`limiter`]: a FIFO concurrency limiter handing out task slots
//! - [`queue`]: an awaitable, priority-ordered set of pending keys
//!
//! The orchestrator composes these; none of them know about projects.

pub mod coalesce;
pub mod lifecycle;
pub mod limiter;
pub mod queue;

pub use coalesce::{CoalescingExecutor, ReasonSet};
pub use lifecycle::{closer, Closer, LifecycleSwitch, SwitchPhase, Tagged};
pub use limiter::{ConcurrencyLimiter, TaskHandle};
pub use queue::WorkQueue;
