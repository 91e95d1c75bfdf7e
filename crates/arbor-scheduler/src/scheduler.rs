#![forbid(unsafe_code)]

//! Cooperative, priority-aware work scheduler.
//!
//! Tasks are kept in a [`TaskHeap`] ordered by deadline. A drain loop runs
//! them in order on a host macrotask, handing control back to the host once a
//! slice budget is spent, unless the next task has already expired.
//!
//! # Algorithm
//!
//! ```text
//! schedule_callback(p, cb):
//!     deadline = now + timeout(p)
//!     heap.push(task)
//!     if no drain loop is scheduled or running: host.defer(drain)
//!
//! drain (one slice):
//!     while let Some(task) = heap.peek():
//!         if task.deadline > now && slice spent: break       (yield)
//!         cb = task.callback.take()
//!         None           => heap.pop()                       (cancelled)
//!         Some(cb)       => match cb(task.deadline <= now) {
//!             Some(next) => task.callback = next; return more (continuation)
//!             None       => pop task if still at the root
//!         }
//!     if heap is non-empty: host.defer(drain)
//! ```
//!
//! # Invariants
//!
//! 1. A callback never runs inside `schedule_callback`.
//! 2. At most one drain loop is queued on the host at any time.
//! 3. `current_priority_level` is `NoPriority` outside a running task.
//! 4. A failing callback leaves the heap intact (the failing task is dropped).
//!
//! # Failure Modes
//!
//! | Condition | Behavior |
//! |-----------|----------|
//! | Callback returns `Err` | Bookkeeping restored, loop rescheduled if tasks remain, error returned to the host loop |
//! | Callback never returns | Loop blocks; there is no preemption |
//! | Cancelled task reaches the root | Popped without running |

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, trace};

use crate::clock::Clock;
use crate::event_loop::YieldPoint;
use crate::heap::{HeapNode, TaskHeap};
use crate::priority::PriorityLevel;

/// Error returned by a task callback.
pub type TaskError = Box<dyn std::error::Error + 'static>;

/// Result of running a task callback.
pub type TaskResult = Result<Option<TaskCallback>, TaskError>;

/// Default slice budget before yielding to the host.
const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_millis(5);

/// Default timeout for `UserBlocking` tasks.
const DEFAULT_USER_BLOCKING_TIMEOUT: Duration = Duration::from_millis(250);

/// Default timeout for `Normal` tasks.
const DEFAULT_NORMAL_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Default timeout for `Low` tasks.
const DEFAULT_LOW_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Default timeout for `Idle` tasks (2^30 - 1 ms, roughly twelve days).
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_millis(1_073_741_823);

/// Environment variable overriding the slice budget, in milliseconds.
pub const FRAME_INTERVAL_ENV: &str = "ARBOR_FRAME_INTERVAL_MS";

/// Configuration for the scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time a drain loop may run before yielding to the host.
    /// Default: 5ms.
    pub frame_interval: Duration,

    /// Timeout for `UserBlocking` tasks. Default: 250ms.
    pub user_blocking_timeout: Duration,

    /// Timeout for `Normal` tasks. Default: 5s.
    pub normal_timeout: Duration,

    /// Timeout for `Low` tasks. Default: 10s.
    pub low_timeout: Duration,

    /// Timeout for `Idle` tasks. Default: 2^30 - 1 ms.
    pub idle_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            frame_interval: DEFAULT_FRAME_INTERVAL,
            user_blocking_timeout: DEFAULT_USER_BLOCKING_TIMEOUT,
            normal_timeout: DEFAULT_NORMAL_TIMEOUT,
            low_timeout: DEFAULT_LOW_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl SchedulerConfig {
    /// Defaults, with the slice budget overridable via `ARBOR_FRAME_INTERVAL_MS`.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = std::env::var(FRAME_INTERVAL_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.frame_interval = Duration::from_millis(ms);
        }
        config
    }

    /// Time until a task of `priority` expires.
    ///
    /// `Immediate` tasks are expired as soon as they are scheduled.
    pub fn timeout(&self, priority: PriorityLevel) -> Duration {
        match priority.effective() {
            PriorityLevel::Immediate => Duration::ZERO,
            PriorityLevel::UserBlocking => self.user_blocking_timeout,
            PriorityLevel::Low => self.low_timeout,
            PriorityLevel::Idle => self.idle_timeout,
            PriorityLevel::Normal | PriorityLevel::NoPriority => self.normal_timeout,
        }
    }
}

/// Scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Tasks scheduled.
    pub scheduled: u64,

    /// Tasks whose callback ran to completion.
    pub completed: u64,

    /// Cancellation requests.
    pub cancelled: u64,

    /// Continuations returned by callbacks.
    pub continuations: u64,

    /// Slices that ended because the budget ran out.
    pub yields: u64,

    /// Drain slices run.
    pub slices: u64,

    /// Callbacks that returned an error.
    pub failures: u64,
}

/// Boxed task callback.
///
/// Receives whether the task had already expired when it started, and may
/// return a continuation that keeps the task scheduled.
pub struct TaskCallback(Box<dyn FnOnce(bool) -> TaskResult>);

impl TaskCallback {
    pub fn new(f: impl FnOnce(bool) -> TaskResult + 'static) -> Self {
        Self(Box::new(f))
    }

    fn call(self, did_timeout: bool) -> TaskResult {
        (self.0)(did_timeout)
    }
}

impl fmt::Debug for TaskCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskCallback(..)")
    }
}

struct Task {
    id: u64,
    priority: PriorityLevel,
    callback: RefCell<Option<TaskCallback>>,
    created_at: Duration,
    deadline: Duration,
}

impl HeapNode for Task {
    fn sort_index(&self) -> Duration {
        self.deadline
    }

    fn id(&self) -> u64 {
        self.id
    }
}

/// Handle to a scheduled task.
#[derive(Clone)]
pub struct TaskHandle(Rc<Task>);

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    pub fn priority(&self) -> PriorityLevel {
        self.0.priority
    }

    /// Time the task was scheduled at.
    pub fn created_at(&self) -> Duration {
        self.0.created_at
    }

    pub fn deadline(&self) -> Duration {
        self.0.deadline
    }

    /// Whether the task has no callback left to run (cancelled or finished).
    pub fn is_inert(&self) -> bool {
        self.0.callback.borrow().is_none()
    }
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.0.id)
            .field("priority", &self.0.priority)
            .field("deadline", &self.0.deadline)
            .field("inert", &self.is_inert())
            .finish()
    }
}

struct Inner {
    config: SchedulerConfig,
    clock: Rc<dyn Clock>,
    host: Rc<dyn YieldPoint>,
    heap: RefCell<TaskHeap<Rc<Task>>>,
    next_id: Cell<u64>,
    current_task: RefCell<Option<Rc<Task>>>,
    current_priority: Cell<PriorityLevel>,
    /// A drain slice is queued on the host.
    loop_scheduled: Cell<bool>,
    /// A drain slice is executing right now.
    performing_work: Cell<bool>,
    slice_start: Cell<Duration>,
    stats: Cell<SchedulerStats>,
}

/// Cloneable handle to a scheduler.
///
/// All clones share one heap. The scheduler is single-threaded and `!Send`.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<Inner>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending", &self.pending())
            .field("current_priority", &self.inner.current_priority.get())
            .field("loop_scheduled", &self.inner.loop_scheduled.get())
            .field("performing_work", &self.inner.performing_work.get())
            .finish()
    }
}

impl Scheduler {
    /// Create a scheduler that reads time from `clock` and resumes through `host`.
    pub fn new(config: SchedulerConfig, clock: Rc<dyn Clock>, host: Rc<dyn YieldPoint>) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                clock,
                host,
                heap: RefCell::new(TaskHeap::new()),
                next_id: Cell::new(1),
                current_task: RefCell::new(None),
                current_priority: Cell::new(PriorityLevel::NoPriority),
                loop_scheduled: Cell::new(false),
                performing_work: Cell::new(false),
                slice_start: Cell::new(Duration::ZERO),
                stats: Cell::new(SchedulerStats::default()),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Current time on the scheduler's clock.
    pub fn now(&self) -> Duration {
        self.inner.clock.now()
    }

    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.get()
    }

    /// Tasks in the heap, cancelled ones included.
    pub fn pending(&self) -> usize {
        self.inner.heap.borrow().len()
    }

    /// Priority of the task that is running, `NoPriority` otherwise.
    pub fn current_priority_level(&self) -> PriorityLevel {
        self.inner.current_priority.get()
    }

    /// Schedule `callback` at `priority`.
    ///
    /// The callback runs on a later host turn, never inside this call.
    pub fn schedule_callback(
        &self,
        priority: PriorityLevel,
        callback: impl FnOnce(bool) -> TaskResult + 'static,
    ) -> TaskHandle {
        let priority = priority.effective();
        let now = self.now();
        let deadline = now.saturating_add(self.inner.config.timeout(priority));
        let id = self.inner.next_id.get();
        self.inner.next_id.set(id + 1);

        let task = Rc::new(Task {
            id,
            priority,
            callback: RefCell::new(Some(TaskCallback::new(callback))),
            created_at: now,
            deadline,
        });
        self.inner.heap.borrow_mut().push(task.clone());
        self.bump(|s| s.scheduled += 1);
        trace!(task = id, priority = priority.as_str(), ?deadline, "task scheduled");

        if !self.inner.loop_scheduled.get() && !self.inner.performing_work.get() {
            self.request_host_callback();
        }
        TaskHandle(task)
    }

    /// Soft-cancel a task: its callback is dropped and the task is discarded
    /// when it reaches the root of the heap.
    pub fn cancel_callback(&self, handle: &TaskHandle) {
        let dropped = handle.0.callback.borrow_mut().take();
        if dropped.is_some() {
            self.bump(|s| s.cancelled += 1);
            trace!(task = handle.0.id, "task cancelled");
        }
    }

    /// Soft-cancel the task that is running right now, if any.
    ///
    /// Only a continuation returned by the running callback can revive it.
    pub fn cancel_current(&self) {
        let current = self.inner.current_task.borrow().clone();
        if let Some(task) = current {
            self.cancel_callback(&TaskHandle(task));
        }
    }

    /// Whether the current slice has used up its budget.
    pub fn should_yield_to_host(&self) -> bool {
        let elapsed = self.now().saturating_sub(self.inner.slice_start.get());
        elapsed >= self.inner.config.frame_interval
    }

    /// Run one drain slice. Normally invoked by the host through
    /// [`YieldPoint::defer`]; exposed for hosts that drive the scheduler
    /// from their own loop.
    pub fn perform_work_until_deadline(&self) -> Result<(), TaskError> {
        self.inner.loop_scheduled.set(false);
        let start = self.now();
        self.inner.slice_start.set(start);
        self.bump(|s| s.slices += 1);
        crate::debug_trace!("scheduler slice start: pending={}", self.pending());

        let result = self.flush_work(start);
        let has_more = match &result {
            Ok(more) => *more,
            Err(_) => !self.inner.heap.borrow().is_empty(),
        };
        if has_more {
            self.request_host_callback();
        }
        result.map(|_| ())
    }

    fn request_host_callback(&self) {
        if self.inner.loop_scheduled.replace(true) {
            return;
        }
        let weak: Weak<Inner> = Rc::downgrade(&self.inner);
        self.inner.host.defer(Box::new(move || match weak.upgrade() {
            Some(inner) => Scheduler { inner }.perform_work_until_deadline(),
            None => Ok(()),
        }));
    }

    fn flush_work(&self, initial_time: Duration) -> Result<bool, TaskError> {
        self.inner.performing_work.set(true);
        let previous_priority = self.inner.current_priority.get();
        let result = self.work_loop(initial_time);
        *self.inner.current_task.borrow_mut() = None;
        self.inner.current_priority.set(previous_priority);
        self.inner.performing_work.set(false);
        if result.is_err() {
            self.bump(|s| s.failures += 1);
        }
        result
    }

    fn work_loop(&self, initial_time: Duration) -> Result<bool, TaskError> {
        let mut current_time = initial_time;
        let mut current = self.peek_task();

        while let Some(task) = current {
            *self.inner.current_task.borrow_mut() = Some(task.clone());
            if task.deadline > current_time && self.should_yield_to_host() {
                self.bump(|s| s.yields += 1);
                debug!(task = task.id, pending = self.pending(), "scheduler yielding to host");
                return Ok(true);
            }

            let callback = task.callback.borrow_mut().take();
            match callback {
                Some(callback) => {
                    self.inner.current_priority.set(task.priority);
                    let did_timeout = task.deadline <= current_time;
                    trace!(task = task.id, did_timeout, "running task");

                    let continuation = match callback.call(did_timeout) {
                        Ok(continuation) => continuation,
                        Err(err) => {
                            self.pop_if_root(&task);
                            return Err(err);
                        }
                    };
                    current_time = self.now();

                    if let Some(next) = continuation {
                        *task.callback.borrow_mut() = Some(next);
                        self.bump(|s| s.continuations += 1);
                        return Ok(true);
                    }
                    self.bump(|s| s.completed += 1);
                    self.pop_if_root(&task);
                }
                None => {
                    self.inner.heap.borrow_mut().pop();
                }
            }
            current = self.peek_task();
        }
        Ok(false)
    }

    fn peek_task(&self) -> Option<Rc<Task>> {
        self.inner.heap.borrow().peek().cloned()
    }

    /// Tasks scheduled from inside a callback may now sit above `task`.
    fn pop_if_root(&self, task: &Rc<Task>) {
        let mut heap = self.inner.heap.borrow_mut();
        if heap.peek().is_some_and(|top| Rc::ptr_eq(top, task)) {
            heap.pop();
        }
    }

    fn bump(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.inner.stats.get();
        f(&mut stats);
        self.inner.stats.set(stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::event_loop::EventLoop;

    struct Harness {
        clock: Rc<ManualClock>,
        event_loop: Rc<EventLoop>,
        scheduler: Scheduler,
        log: Rc<RefCell<Vec<String>>>,
    }

    fn harness() -> Harness {
        let clock = Rc::new(ManualClock::new());
        let event_loop = Rc::new(EventLoop::new());
        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            clock.clone(),
            event_loop.clone(),
        );
        Harness {
            clock,
            event_loop,
            scheduler,
            log: Rc::new(RefCell::new(Vec::new())),
        }
    }

    impl Harness {
        fn logger(&self, name: &str) -> impl FnOnce(bool) -> TaskResult + 'static {
            let log = self.log.clone();
            let name = name.to_string();
            move |_| {
                log.borrow_mut().push(name);
                Ok(None)
            }
        }

        fn entries(&self) -> Vec<String> {
            self.log.borrow().clone()
        }
    }

    #[test]
    fn default_timeouts() {
        let config = SchedulerConfig::default();
        assert_eq!(config.timeout(PriorityLevel::Immediate), Duration::ZERO);
        assert_eq!(
            config.timeout(PriorityLevel::UserBlocking),
            Duration::from_millis(250)
        );
        assert_eq!(config.timeout(PriorityLevel::Normal), Duration::from_secs(5));
        assert_eq!(config.timeout(PriorityLevel::NoPriority), Duration::from_secs(5));
        assert_eq!(config.timeout(PriorityLevel::Low), Duration::from_secs(10));
        assert!(config.timeout(PriorityLevel::Idle) > Duration::from_secs(86_400));
        assert_eq!(config.frame_interval, Duration::from_millis(5));
    }

    #[test]
    fn schedule_never_runs_inline() {
        let h = harness();
        h.scheduler.schedule_callback(PriorityLevel::Immediate, h.logger("a"));
        assert!(h.entries().is_empty());
        assert_eq!(h.event_loop.pending_macrotasks(), 1);
        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["a"]);
    }

    #[test]
    fn one_drain_loop_for_many_tasks() {
        let h = harness();
        for name in ["a", "b", "c"] {
            h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger(name));
        }
        assert_eq!(h.event_loop.pending_macrotasks(), 1);
        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["a", "b", "c"]);
        assert_eq!(h.scheduler.stats().completed, 3);
    }

    #[test]
    fn runs_in_priority_then_fifo_order() {
        let h = harness();
        h.scheduler.schedule_callback(PriorityLevel::Low, h.logger("low"));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("normal-1"));
        h.scheduler.schedule_callback(PriorityLevel::Immediate, h.logger("immediate"));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("normal-2"));
        h.scheduler.schedule_callback(PriorityLevel::UserBlocking, h.logger("user"));
        h.event_loop.run_until_idle().unwrap();
        assert_eq!(
            h.entries(),
            ["immediate", "user", "normal-1", "normal-2", "low"]
        );
    }

    #[test]
    fn cancelled_task_is_skipped() {
        let h = harness();
        let handle = h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("a"));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("b"));
        h.scheduler.cancel_callback(&handle);
        assert!(handle.is_inert());
        assert_eq!(h.scheduler.pending(), 2);

        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["b"]);
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.scheduler.stats().cancelled, 1);
    }

    #[test]
    fn current_priority_is_ambient_only_while_running() {
        let h = harness();
        let seen = Rc::new(Cell::new(PriorityLevel::NoPriority));
        let s = h.scheduler.clone();
        let seen_in = seen.clone();
        h.scheduler.schedule_callback(PriorityLevel::UserBlocking, move |_| {
            seen_in.set(s.current_priority_level());
            Ok(None)
        });
        assert_eq!(h.scheduler.current_priority_level(), PriorityLevel::NoPriority);
        h.event_loop.run_until_idle().unwrap();
        assert_eq!(seen.get(), PriorityLevel::UserBlocking);
        assert_eq!(h.scheduler.current_priority_level(), PriorityLevel::NoPriority);
    }

    #[test]
    fn continuation_keeps_task_and_runs_on_later_turn() {
        let h = harness();
        let log = h.log.clone();
        h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            log.borrow_mut().push("first".into());
            let log = log.clone();
            Ok(Some(TaskCallback::new(move |_| {
                log.borrow_mut().push("second".into());
                Ok(None)
            })))
        });

        assert!(h.event_loop.tick().unwrap());
        assert_eq!(h.entries(), ["first"]);
        assert_eq!(h.scheduler.pending(), 1);

        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["first", "second"]);
        assert_eq!(h.scheduler.pending(), 0);
        assert_eq!(h.scheduler.stats().continuations, 1);
    }

    #[test]
    fn yields_when_slice_budget_is_spent() {
        let h = harness();
        let clock = h.clock.clone();
        let log = h.log.clone();
        h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            clock.advance(Duration::from_millis(6));
            log.borrow_mut().push("slow".into());
            Ok(None)
        });
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("next"));

        h.event_loop.tick().unwrap();
        assert_eq!(h.entries(), ["slow"]);
        assert_eq!(h.scheduler.stats().yields, 1);
        assert_eq!(h.event_loop.pending_macrotasks(), 1);

        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["slow", "next"]);
    }

    #[test]
    fn expired_tasks_do_not_yield() {
        let h = harness();
        let clock = h.clock.clone();
        let flags = Rc::new(RefCell::new(Vec::new()));
        let f = flags.clone();
        h.scheduler.schedule_callback(PriorityLevel::Immediate, move |did_timeout| {
            clock.advance(Duration::from_millis(20));
            f.borrow_mut().push(did_timeout);
            Ok(None)
        });
        let f = flags.clone();
        h.scheduler.schedule_callback(PriorityLevel::Immediate, move |did_timeout| {
            f.borrow_mut().push(did_timeout);
            Ok(None)
        });

        h.event_loop.tick().unwrap();
        assert_eq!(*flags.borrow(), [true, true]);
        assert_eq!(h.scheduler.stats().yields, 0);
    }

    #[test]
    fn cancel_current_drops_running_task() {
        let h = harness();
        let s = h.scheduler.clone();
        let handle = h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            s.cancel_current();
            Ok(None)
        });
        h.event_loop.run_until_idle().unwrap();
        assert!(handle.is_inert());
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn failing_task_propagates_and_preserves_queue() {
        let h = harness();
        h.scheduler
            .schedule_callback(PriorityLevel::Immediate, |_| Err("task failed".into()));
        h.scheduler.schedule_callback(PriorityLevel::Normal, h.logger("survivor"));

        let err = h.event_loop.run_until_idle().unwrap_err();
        assert_eq!(err.to_string(), "task failed");
        assert_eq!(h.scheduler.current_priority_level(), PriorityLevel::NoPriority);
        assert_eq!(h.scheduler.stats().failures, 1);

        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["survivor"]);
    }

    #[test]
    fn task_scheduled_from_callback_waits_for_next_slice_slot() {
        let h = harness();
        let s = h.scheduler.clone();
        let log = h.log.clone();
        h.scheduler.schedule_callback(PriorityLevel::Normal, move |_| {
            let log_inner = log.clone();
            s.schedule_callback(PriorityLevel::Immediate, move |_| {
                log_inner.borrow_mut().push("nested".into());
                Ok(None)
            });
            log.borrow_mut().push("outer".into());
            Ok(None)
        });
        h.event_loop.run_until_idle().unwrap();
        assert_eq!(h.entries(), ["outer", "nested"]);
        assert_eq!(h.scheduler.pending(), 0);
    }

    #[test]
    fn from_env_without_override_is_default() {
        if std::env::var(FRAME_INTERVAL_ENV).is_err() {
            assert_eq!(SchedulerConfig::from_env(), SchedulerConfig::default());
        }
    }
}
