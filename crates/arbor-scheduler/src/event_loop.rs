#![forbid(unsafe_code)]

//! Single-threaded host event loop.
//!
//! The scheduler never runs work synchronously from inside a call to
//! `schedule_callback`; it asks the host to resume it later through
//! [`YieldPoint`]. [`EventLoop`] is the in-process implementation: a FIFO
//! macrotask queue plus a microtask queue that is drained after every
//! macrotask, the same turn structure a browser or a UI message loop has.
//!
//! ```
//! use arbor_scheduler::{EventLoop, YieldPoint};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let event_loop = EventLoop::new();
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! let l = log.clone();
//! event_loop.defer(Box::new(move || { l.borrow_mut().push("macro"); Ok(()) }));
//! let l = log.clone();
//! event_loop.defer_micro(Box::new(move || { l.borrow_mut().push("micro"); Ok(()) }));
//!
//! event_loop.run_until_idle().unwrap();
//! assert_eq!(*log.borrow(), ["micro", "macro"]);
//! ```

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;

use crate::scheduler::TaskError;

/// A unit of deferred host work.
pub type LoopTask = Box<dyn FnOnce() -> Result<(), TaskError>>;

/// Deferred-execution capability supplied by the embedding host.
pub trait YieldPoint {
    /// Run `task` on a later macrotask turn. Never runs it inline.
    fn defer(&self, task: LoopTask);

    /// Run `task` once the current turn finishes, before the next macrotask.
    fn defer_micro(&self, task: LoopTask);
}

/// FIFO macrotask/microtask loop.
#[derive(Default)]
pub struct EventLoop {
    macrotasks: RefCell<VecDeque<LoopTask>>,
    microtasks: RefCell<VecDeque<LoopTask>>,
    turns: Cell<u64>,
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("macrotasks", &self.macrotasks.borrow().len())
            .field("microtasks", &self.microtasks.borrow().len())
            .field("turns", &self.turns.get())
            .finish()
    }
}

impl EventLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued macrotasks.
    pub fn pending_macrotasks(&self) -> usize {
        self.macrotasks.borrow().len()
    }

    /// Queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.microtasks.borrow().len()
    }

    /// Whether anything is queued.
    pub fn has_pending(&self) -> bool {
        self.pending_macrotasks() > 0 || self.pending_microtasks() > 0
    }

    /// Macrotasks executed so far.
    pub fn turns(&self) -> u64 {
        self.turns.get()
    }

    /// Drain the microtask queue, including microtasks queued while draining.
    pub fn run_microtasks(&self) -> Result<(), TaskError> {
        loop {
            // Release the borrow before running: tasks enqueue more tasks.
            let next = self.microtasks.borrow_mut().pop_front();
            match next {
                Some(task) => task()?,
                None => return Ok(()),
            }
        }
    }

    /// Run one turn: pending microtasks, one macrotask, then its microtasks.
    ///
    /// Returns `false` when there was nothing to do.
    pub fn tick(&self) -> Result<bool, TaskError> {
        let had_micro = self.pending_microtasks() > 0;
        self.run_microtasks()?;
        let next = self.macrotasks.borrow_mut().pop_front();
        let Some(task) = next else {
            return Ok(had_micro);
        };
        self.turns.set(self.turns.get() + 1);
        crate::debug_trace!("event loop turn {}", self.turns.get());
        task()?;
        self.run_microtasks()?;
        Ok(true)
    }

    /// Run turns until both queues are empty. Returns the number of turns run.
    ///
    /// An error from a task stops the loop; tasks still queued stay queued.
    pub fn run_until_idle(&self) -> Result<u64, TaskError> {
        let start = self.turns.get();
        while self.tick()? {}
        Ok(self.turns.get() - start)
    }

    /// Run at most `max_turns` macrotask turns.
    pub fn run_turns(&self, max_turns: u64) -> Result<u64, TaskError> {
        let start = self.turns.get();
        while self.turns.get() - start < max_turns {
            if !self.tick()? {
                break;
            }
        }
        Ok(self.turns.get() - start)
    }
}

impl YieldPoint for EventLoop {
    fn defer(&self, task: LoopTask) {
        self.macrotasks.borrow_mut().push_back(task);
    }

    fn defer_micro(&self, task: LoopTask) {
        self.microtasks.borrow_mut().push_back(task);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    fn recorder() -> (Rc<RefCell<Vec<&'static str>>>, impl Fn(&'static str) -> LoopTask) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        let make = move |name: &'static str| -> LoopTask {
            let l = l.clone();
            Box::new(move || {
                l.borrow_mut().push(name);
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn microtasks_run_before_next_macrotask() {
        let event_loop = Rc::new(EventLoop::new());
        let (log, make) = recorder();

        let inner_loop = event_loop.clone();
        let inner = make("micro-from-a");
        event_loop.defer(Box::new(move || {
            inner_loop.defer_micro(inner);
            Ok(())
        }));
        event_loop.defer(make("b"));

        assert_eq!(event_loop.run_until_idle().unwrap(), 2);
        assert_eq!(*log.borrow(), ["micro-from-a", "b"]);
    }

    #[test]
    fn defer_never_runs_inline() {
        let event_loop = EventLoop::new();
        let (log, make) = recorder();
        event_loop.defer(make("a"));
        assert!(log.borrow().is_empty());
        assert!(event_loop.has_pending());
        event_loop.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), ["a"]);
        assert!(!event_loop.has_pending());
    }

    #[test]
    fn error_stops_the_loop_and_keeps_the_rest() {
        let event_loop = EventLoop::new();
        let (log, make) = recorder();
        event_loop.defer(Box::new(|| Err("boom".into())));
        event_loop.defer(make("after"));

        let err = event_loop.run_until_idle().unwrap_err();
        assert_eq!(err.to_string(), "boom");
        assert_eq!(event_loop.pending_macrotasks(), 1);
        event_loop.run_until_idle().unwrap();
        assert_eq!(*log.borrow(), ["after"]);
    }

    #[test]
    fn run_turns_is_bounded() {
        let event_loop = EventLoop::new();
        let (_log, make) = recorder();
        for name in ["a", "b", "c"] {
            event_loop.defer(make(name));
        }
        assert_eq!(event_loop.run_turns(2).unwrap(), 2);
        assert_eq!(event_loop.pending_macrotasks(), 1);
    }
}
