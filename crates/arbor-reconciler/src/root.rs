#![forbid(unsafe_code)]

//! Roots: the entry point that turns updates into scheduled render passes.
//!
//! Every update (a root render or a hook dispatch) lands in the root's
//! [`UpdateQueue`](crate::update_queue). Its listener arranges one microtask
//! per batch; the microtask either renders synchronously (`SYNC` lane) or
//! schedules a concurrent pass at the priority of the most urgent pending
//! lane. Rendering is therefore never re-entrant: a dispatch made while a pass
//! runs only queues work.
//!
//! ```text
//! enqueue ──► listener ──► microtask: process_root_schedule
//!                               ├─ SYNC lane ─► perform_sync_work_on_root
//!                               └─ otherwise ─► scheduler task (lanes_to_priority)
//!                                                   └─► perform_concurrent_work_on_root
//!                                                        (continuation while yielded)
//! commit ─► passive effects task (passive_effects_priority)
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use arbor_scheduler::{PriorityLevel, Scheduler, TaskCallback, TaskError, TaskHandle, TaskResult, YieldPoint};
use tracing::{debug, error, warn};

use crate::element::Node;
use crate::error::{ReconcileError, Result};
use crate::fiber::FiberArena;
use crate::host::{Host, HostHandle};
use crate::lanes::{Lanes, lanes_to_priority, request_root_lane};
use crate::update_queue::{UpdateQueue, UpdateRequest};
use crate::work_loop::{FiberRoot, RootStats};

/// Default label used in logs.
pub const DEFAULT_ROOT_LABEL: &str = "root";

/// Per-root settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootConfig {
    /// Name attached to this root's log events.
    pub label: String,
    /// Scheduler priority of the task that runs passive effects after a
    /// commit.
    pub passive_effects_priority: PriorityLevel,
    /// Yield to the host between units of a non-`SYNC` pass. When off, every
    /// pass runs to completion in one task.
    pub time_slicing: bool,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            label: DEFAULT_ROOT_LABEL.to_string(),
            passive_effects_priority: PriorityLevel::Normal,
            time_slicing: true,
        }
    }
}

impl RootConfig {
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    #[must_use]
    pub fn with_passive_effects_priority(mut self, priority: PriorityLevel) -> Self {
        self.passive_effects_priority = priority;
        self
    }

    #[must_use]
    pub fn with_time_slicing(mut self, enabled: bool) -> Self {
        self.time_slicing = enabled;
        self
    }
}

struct RootShared<H: Host> {
    fiber_root: RefCell<FiberRoot<H>>,
    updates: Rc<UpdateQueue>,
    scheduler: Scheduler,
    yield_point: Rc<dyn YieldPoint>,
    /// Concurrent render task currently scheduled, with its priority.
    callback_node: RefCell<Option<(TaskHandle, PriorityLevel)>>,
    passive_task: RefCell<Option<TaskHandle>>,
    microtask_scheduled: Cell<bool>,
    unmounted: Cell<bool>,
}

fn into_task_error(err: ReconcileError) -> TaskError {
    Box::new(err)
}

impl<H: Host + 'static> RootShared<H> {
    fn ensure_root_is_scheduled(self: &Rc<Self>) {
        if self.microtask_scheduled.replace(true) {
            return;
        }
        let weak = Rc::downgrade(self);
        self.yield_point.defer_micro(Box::new(move || match weak.upgrade() {
            Some(shared) => shared.process_root_schedule(),
            None => Ok(()),
        }));
    }

    fn process_root_schedule(self: &Rc<Self>) -> std::result::Result<(), TaskError> {
        self.microtask_scheduled.set(false);
        let next_lanes = self.fiber_root.borrow().next_lanes();
        if next_lanes.is_empty() {
            self.cancel_render_task();
            return Ok(());
        }
        if next_lanes.includes_blocking() {
            self.cancel_render_task();
            return self.perform_sync_work_on_root();
        }

        let priority = lanes_to_priority(next_lanes);
        let existing = self
            .callback_node
            .borrow()
            .as_ref()
            .is_some_and(|(handle, existing)| *existing == priority && !handle.is_inert());
        if existing {
            return Ok(());
        }
        self.cancel_render_task();
        let weak = Rc::downgrade(self);
        let handle = self.scheduler.schedule_callback(priority, move |did_timeout| {
            Self::run_concurrent(&weak, did_timeout)
        });
        debug!(?priority, task = handle.id(), "render task scheduled");
        *self.callback_node.borrow_mut() = Some((handle, priority));
        Ok(())
    }

    fn cancel_render_task(&self) {
        if let Some((handle, _)) = self.callback_node.borrow_mut().take() {
            self.scheduler.cancel_callback(&handle);
        }
    }

    fn run_concurrent(weak: &Weak<Self>, did_timeout: bool) -> TaskResult {
        match weak.upgrade() {
            Some(shared) => shared.perform_concurrent_work_on_root(did_timeout),
            None => Ok(None),
        }
    }

    /// Run pending passive effects before new render work.
    fn flush_passive_effects(&self) -> Result<()> {
        if let Some(handle) = self.passive_task.borrow_mut().take() {
            self.scheduler.cancel_callback(&handle);
        }
        self.fiber_root.borrow_mut().flush_passive_effects()?;
        Ok(())
    }

    fn perform_sync_work_on_root(self: &Rc<Self>) -> std::result::Result<(), TaskError> {
        self.flush_passive_effects().map_err(into_task_error)?;
        let result = {
            let mut root = self.fiber_root.borrow_mut();
            if !root.has_work() {
                return Ok(());
            }
            Self::render_and_commit_sync(&mut root)
        };
        self.after_pass(result)
    }

    fn render_and_commit_sync(root: &mut FiberRoot<H>) -> Result<()> {
        root.prepare_fresh_stack()?;
        root.work_loop_sync()?;
        root.commit_root()
    }

    fn perform_concurrent_work_on_root(self: &Rc<Self>, did_timeout: bool) -> TaskResult {
        self.flush_passive_effects().map_err(into_task_error)?;
        let yielded = {
            let mut root = self.fiber_root.borrow_mut();
            if root.should_restart() {
                debug!("more urgent update queued; restarting render pass");
                root.abandon_pass();
            }
            if !root.is_rendering() && !root.has_work() {
                drop(root);
                self.callback_node.borrow_mut().take();
                return Ok(None);
            }
            Self::render_concurrent(&mut root, &self.scheduler, did_timeout)
        };
        match yielded {
            Ok(true) => {
                let weak = Rc::downgrade(self);
                Ok(Some(TaskCallback::new(move |did_timeout| {
                    Self::run_concurrent(&weak, did_timeout)
                })))
            }
            Ok(false) => {
                self.callback_node.borrow_mut().take();
                self.after_pass(Ok(())).map(|()| None)
            }
            Err(err) => {
                self.callback_node.borrow_mut().take();
                self.after_pass(Err(err)).map(|()| None)
            }
        }
    }

    /// Advance the pass. `Ok(true)` when it yielded before completing.
    fn render_concurrent(root: &mut FiberRoot<H>, scheduler: &Scheduler, did_timeout: bool) -> Result<bool> {
        if !root.is_rendering() {
            root.prepare_fresh_stack()?;
        }
        let time_slice =
            root.config.time_slicing && !did_timeout && !root.render_lanes().includes_blocking();
        if time_slice {
            root.work_loop_concurrent(scheduler)?;
        } else {
            root.work_loop_sync()?;
        }
        if root.has_remaining_work() {
            return Ok(true);
        }
        root.commit_root()?;
        Ok(false)
    }

    /// Handle the outcome of a finished or failed pass.
    fn after_pass(self: &Rc<Self>, result: Result<()>) -> std::result::Result<(), TaskError> {
        let (has_passive, has_work, label, priority) = {
            let mut root = self.fiber_root.borrow_mut();
            if let Err(err) = &result {
                root.fail_pass();
                error!(label = %root.config.label, error = %err, "render pass failed; keeping previous tree");
            }
            (
                root.has_pending_passive(),
                root.has_work(),
                root.config.label.clone(),
                root.config.passive_effects_priority,
            )
        };
        if has_passive && self.passive_task.borrow().is_none() {
            let weak = Rc::downgrade(self);
            let handle = self.scheduler.schedule_callback(priority, move |_| {
                let Some(shared) = weak.upgrade() else {
                    return Ok(None);
                };
                shared.passive_task.borrow_mut().take();
                shared
                    .fiber_root
                    .borrow_mut()
                    .flush_passive_effects()
                    .map_err(into_task_error)?;
                Ok(None)
            });
            debug!(label = %label, task = handle.id(), "passive effects scheduled");
            *self.passive_task.borrow_mut() = Some(handle);
        }
        if has_work {
            self.ensure_root_is_scheduled();
        }
        result.map_err(into_task_error)
    }
}

/// Handle to a mounted tree.
///
/// Dropping the last handle releases the tree; tasks still queued for it
/// become no-ops.
pub struct Root<H: Host> {
    shared: Rc<RootShared<H>>,
}

impl<H: Host> fmt::Debug for Root<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.fiber_root.try_borrow() {
            Ok(root) => f
                .debug_struct("Root")
                .field("label", &root.config.label)
                .field("container", &root.container())
                .field("fibers", &root.arena().len())
                .field("stats", &root.stats)
                .finish(),
            Err(_) => f.write_str("Root(<rendering>)"),
        }
    }
}

impl<H: Host> Drop for Root<H> {
    fn drop(&mut self) {
        self.shared.updates.clear_listener();
        if let Some((handle, _)) = self.shared.callback_node.borrow_mut().take() {
            self.shared.scheduler.cancel_callback(&handle);
        }
        if let Some(handle) = self.shared.passive_task.borrow_mut().take() {
            self.shared.scheduler.cancel_callback(&handle);
        }
    }
}

impl<H: Host + 'static> Root<H> {
    /// Create a root rendering into `container`, an object owned by `host`.
    pub fn new(
        host: H,
        container: HostHandle,
        scheduler: Scheduler,
        yield_point: Rc<dyn YieldPoint>,
        config: RootConfig,
    ) -> Self {
        let updates = UpdateQueue::new();
        let shared = Rc::new(RootShared {
            fiber_root: RefCell::new(FiberRoot::new(host, container, updates.clone(), config)),
            updates: updates.clone(),
            scheduler,
            yield_point,
            callback_node: RefCell::new(None),
            passive_task: RefCell::new(None),
            microtask_scheduled: Cell::new(false),
            unmounted: Cell::new(false),
        });
        let weak = Rc::downgrade(&shared);
        updates.set_listener(move |_lane| {
            if let Some(shared) = weak.upgrade() {
                shared.ensure_root_is_scheduled();
            }
        });
        Self { shared }
    }

    /// Replace the rendered tree. Work happens on later host turns.
    pub fn render(&self, element: impl Into<Node>) {
        if self.shared.unmounted.get() {
            warn!("render called on an unmounted root");
            return;
        }
        self.shared.updates.enqueue(UpdateRequest::Root {
            element: element.into(),
            lane: request_root_lane(),
        });
    }

    /// Remove the tree. Teardowns run as the deletion commits; later
    /// `render` calls are ignored.
    pub fn unmount(&self) {
        if self.shared.unmounted.replace(true) {
            return;
        }
        self.shared.updates.enqueue(UpdateRequest::Root {
            element: Node::Empty,
            lane: Lanes::SYNC,
        });
    }

    pub fn is_unmounted(&self) -> bool {
        self.shared.unmounted.get()
    }

    /// Borrow the host.
    ///
    /// # Panics
    ///
    /// When called from inside a component render or an effect.
    pub fn with_host<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.shared.fiber_root.borrow().host)
    }

    /// Mutably borrow the host, e.g. to dispatch events.
    ///
    /// # Panics
    ///
    /// When called from inside a component render or an effect.
    pub fn with_host_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        f(&mut self.shared.fiber_root.borrow_mut().host)
    }

    pub fn container(&self) -> HostHandle {
        self.shared.fiber_root.borrow().container()
    }

    pub fn stats(&self) -> RootStats {
        self.shared.fiber_root.borrow().stats
    }

    pub fn commit_count(&self) -> u64 {
        self.stats().commits
    }

    /// Live fibers in both buffers.
    pub fn fiber_count(&self) -> usize {
        self.shared.fiber_root.borrow().arena().len()
    }

    /// Whether updates are queued or a pass is in progress.
    pub fn has_pending_work(&self) -> bool {
        let root = self.shared.fiber_root.borrow();
        root.has_work() || root.is_rendering() || root.has_pending_passive()
    }

    /// Render and commit everything queued right now, then run passive
    /// effects, without going through the scheduler.
    pub fn flush_sync(&self) -> Result<()> {
        self.shared.flush_passive_effects()?;
        self.shared.cancel_render_task();
        {
            let mut root = self.shared.fiber_root.borrow_mut();
            if root.has_work() || root.is_rendering() {
                if let Err(err) = RootShared::render_and_commit_sync(&mut root) {
                    root.fail_pass();
                    return Err(err);
                }
            }
        }
        self.shared.flush_passive_effects()
    }

    /// Inspect the committed fiber tree.
    pub fn inspect<R>(&self, f: impl FnOnce(&FiberArena, crate::fiber::FiberId) -> R) -> R {
        let root = self.shared.fiber_root.borrow();
        f(root.arena(), root.current())
    }
}
