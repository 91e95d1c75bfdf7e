#![forbid(unsafe_code)]

//! Arbor reconciler
//!
//! Turns declarative element trees into minimal host mutations.
//!
//! # Key Components
//!
//! - [`Element`] / [`Node`] - immutable descriptions of what to render
//! - [`Component`], [`ClassType`], [`MemoType`], [`Context`] - element types
//! - [`RenderCx`] - hooks available to function components
//! - [`Root`] - a mounted tree, driven by an `arbor_scheduler::Scheduler`
//! - [`Host`] - the mutation primitives a rendering target implements
//! - [`MemoryHost`] - an in-memory host for tests and headless use
//!
//! # Role in arbor
//! `arbor-reconciler` owns the dual-buffered fiber tree. A render pass
//! builds a work-in-progress tree beside the committed one, diffing children
//! by key and bailing out of unchanged subtrees. The commit applies the
//! collected flags to the host in one uninterruptible pass, runs layout
//! effects, swaps the trees, and queues passive effects as a separate task.
//!
//! # How it fits in the system
//! `arbor-scheduler` decides when render passes run; this crate decides what
//! they do. The `arbor` facade wires a [`Root`] to an event loop.

mod begin_work;
mod child_fiber;
mod commit_work;
mod complete_work;
pub mod context;
pub mod element;
pub mod error;
pub mod fiber;
pub mod flags;
pub mod hooks;
pub mod host;
pub mod lanes;
pub mod memory_host;
pub mod root;
mod update_queue;
mod work_loop;

pub use context::{Context, ContextId};
pub use element::{
    Callback, ClassComponent, ClassType, Component, Element, ElementType, Key, MemoType, Node,
    PropValue, Props, ProviderType, memo,
};
pub use error::{ReconcileError, Result};
pub use fiber::{Fiber, FiberArena, FiberId, FiberKind};
pub use flags::Flags;
pub use hooks::{Deps, Dispatch, EffectPhase, RenderCx, Setter, StateAction, Teardown};
pub use host::{Host, HostError, HostHandle};
pub use lanes::{
    Lanes, UpdatePriorityGuard, current_update_priority, lanes_to_priority, priority_to_lane,
    with_update_priority,
};
pub use memory_host::{HostOp, MemoryHost};
pub use root::{Root, RootConfig};
pub use work_loop::RootStats;
