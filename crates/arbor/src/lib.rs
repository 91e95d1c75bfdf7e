#![forbid(unsafe_code)]

//! Arbor public facade crate.
//!
//! This crate provides the stable surface area for embedders. It re-exports
//! the element, hook and root types of `arbor-reconciler`, the scheduling
//! types of `arbor-scheduler`, and bundles an event loop, a clock and a
//! scheduler into a [`Runtime`].
//!
//! ```
//! use arbor::prelude::*;
//!
//! let runtime = Runtime::new();
//! let mut host = MemoryHost::new();
//! let container = host.create_container();
//! let root = runtime.create_root(host, container, RootConfig::default());
//!
//! root.render(Element::host("p", Props::new().with_children("hello")));
//! runtime.run_until_idle().unwrap();
//! assert_eq!(
//!     root.with_host(|host| host.to_markup(container)),
//!     "<root><p>hello</p></root>"
//! );
//! ```

use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::debug;

// --- Reconciler re-exports -------------------------------------------------

pub use arbor_reconciler::{
    Callback, ClassComponent, ClassType, Component, Context, ContextId, Deps, Dispatch,
    EffectPhase, Element, ElementType, Fiber, FiberArena, FiberId, FiberKind, Flags, Host,
    HostError, HostHandle, HostOp, Key, Lanes, MemoType, MemoryHost, Node, PropValue, Props,
    ProviderType, ReconcileError, RenderCx, Root, RootConfig, RootStats, Setter, StateAction,
    Teardown, UpdatePriorityGuard, current_update_priority, deps, lanes_to_priority, memo,
    priority_to_lane, with_update_priority,
};

// --- Scheduler re-exports --------------------------------------------------

pub use arbor_scheduler::{
    Clock, EventLoop, ManualClock, MonotonicClock, PriorityLevel, Scheduler, SchedulerConfig,
    SchedulerStats, TaskCallback, TaskError, TaskHandle, TaskResult, YieldPoint,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for arbor embedders.
#[derive(Debug)]
pub enum Error {
    /// A render or commit pass failed.
    Reconcile(ReconcileError),
    /// A scheduled task failed with an error of another kind.
    Task(TaskError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reconcile(err) => write!(f, "{err}"),
            Self::Task(err) => write!(f, "task failed: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Reconcile(err) => Some(err),
            Self::Task(err) => Some(err.as_ref()),
        }
    }
}

impl From<ReconcileError> for Error {
    fn from(err: ReconcileError) -> Self {
        Self::Reconcile(err)
    }
}

impl From<TaskError> for Error {
    /// Recovers the [`ReconcileError`] a root task failed with.
    fn from(err: TaskError) -> Self {
        match err.downcast::<ReconcileError>() {
            Ok(err) => Self::Reconcile(*err),
            Err(err) => Self::Task(err),
        }
    }
}

/// Standard result type for arbor APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Runtime ----------------------------------------------------------------

/// An event loop, a clock and a scheduler wired together.
///
/// Roots created from one runtime share its scheduler, so their tasks are
/// interleaved by priority and deadline.
pub struct Runtime {
    event_loop: Rc<EventLoop>,
    clock: Rc<dyn Clock>,
    scheduler: Scheduler,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("event_loop", &self.event_loop)
            .field("scheduler", &self.scheduler)
            .field("now", &self.now())
            .finish()
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Runtime on the monotonic clock, configured from the environment.
    pub fn new() -> Self {
        Self::with_clock(Rc::new(MonotonicClock::new()), SchedulerConfig::from_env())
    }

    /// Runtime reading time from `clock`.
    pub fn with_clock(clock: Rc<dyn Clock>, config: SchedulerConfig) -> Self {
        let event_loop = Rc::new(EventLoop::new());
        let scheduler = Scheduler::new(config, clock.clone(), event_loop.clone());
        debug!(frame_interval = ?scheduler.config().frame_interval, "runtime created");
        Self {
            event_loop,
            clock,
            scheduler,
        }
    }

    /// Runtime on a [`ManualClock`] with default settings, for tests.
    pub fn manual() -> (Self, Rc<ManualClock>) {
        let clock = Rc::new(ManualClock::new());
        (Self::with_clock(clock.clone(), SchedulerConfig::default()), clock)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn event_loop(&self) -> &Rc<EventLoop> {
        &self.event_loop
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    /// Mount a root rendering into `container`.
    pub fn create_root<H: Host + 'static>(
        &self,
        host: H,
        container: HostHandle,
        config: RootConfig,
    ) -> Root<H> {
        Root::new(
            host,
            container,
            self.scheduler.clone(),
            self.event_loop.clone(),
            config,
        )
    }

    /// Run one host turn. Returns `false` when nothing was pending.
    pub fn tick(&self) -> Result<bool> {
        Ok(self.event_loop.tick()?)
    }

    /// Run host turns until no work is queued. Returns the turns run.
    pub fn run_until_idle(&self) -> Result<u64> {
        Ok(self.event_loop.run_until_idle()?)
    }

    /// Run at most `max_turns` host turns.
    pub fn run_turns(&self, max_turns: u64) -> Result<u64> {
        Ok(self.event_loop.run_turns(max_turns)?)
    }

    /// Whether the event loop has queued work.
    pub fn has_pending(&self) -> bool {
        self.event_loop.has_pending()
    }
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        ClassComponent, ClassType, Component, Context, Deps, Element, Error, Host, HostHandle,
        Lanes, MemoType, MemoryHost, Node, PriorityLevel, PropValue, Props, RenderCx, Result,
        Root, RootConfig, Runtime, Setter, deps, memo, with_update_priority,
    };

    pub use crate::{reconciler, scheduler};
}

pub use arbor_reconciler as reconciler;
pub use arbor_scheduler as scheduler;
