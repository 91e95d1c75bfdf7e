#![forbid(unsafe_code)]

//! Cooperative task scheduling for arbor.
//!
//! # Role in arbor
//! `arbor-scheduler` decides *when* reconciliation work runs. Render passes
//! and passive-effect flushes are submitted as prioritized tasks; the drain
//! loop runs them in deadline order on host turns and hands control back to
//! the host once its slice budget is spent.
//!
//! # Primary responsibilities
//! - **TaskHeap**: min-heap of tasks ordered by `(deadline, id)`.
//! - **Scheduler**: schedule / cancel / current priority / should-yield.
//! - **EventLoop**: in-process [`YieldPoint`] with macrotask and microtask
//!   queues.
//! - **Clock**: injectable time source ([`ManualClock`] for tests).
//!
//! # How it fits in the system
//! The reconciler holds a [`Scheduler`] and a [`YieldPoint`]; the facade
//! crate `arbor` wires both to one [`EventLoop`] and exposes
//! `run_until_idle` to embedders.

pub mod clock;
pub mod debug_trace;
pub mod event_loop;
pub mod heap;
pub mod priority;
pub mod scheduler;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use event_loop::{EventLoop, LoopTask, YieldPoint};
pub use heap::{HeapNode, TaskHeap};
pub use priority::PriorityLevel;
pub use scheduler::{
    Scheduler, SchedulerConfig, SchedulerStats, TaskCallback, TaskError, TaskHandle, TaskResult,
};
