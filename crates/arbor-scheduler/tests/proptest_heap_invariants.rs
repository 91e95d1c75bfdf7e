//! Property-based invariant tests for the task heap and scheduler ordering.
//!
//! Verifies:
//! 1. Every pop returns the smallest remaining `(deadline, id)` pair
//! 2. After any push/pop sequence the backing array satisfies the heap property
//! 3. Pop order equals the fully sorted order of everything pushed
//! 4. Tasks run in `(deadline, id)` order regardless of scheduling order
//! 5. Cancelled tasks never run and never block the tasks behind them

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use arbor_scheduler::heap::compare;
use arbor_scheduler::{
    EventLoop, HeapNode, ManualClock, PriorityLevel, Scheduler, SchedulerConfig, TaskHeap,
};
use proptest::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline_ms: u64,
    id: u64,
}

impl HeapNode for Entry {
    fn sort_index(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Push(u64),
    Pop,
}

// ── Strategies ────────────────────────────────────────────────────────

fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(
        prop_oneof![
            3 => (0u64..50).prop_map(Op::Push),
            1 => Just(Op::Pop),
        ],
        0..200,
    )
}

fn arb_priority() -> impl Strategy<Value = PriorityLevel> {
    prop_oneof![
        Just(PriorityLevel::Immediate),
        Just(PriorityLevel::UserBlocking),
        Just(PriorityLevel::Normal),
        Just(PriorityLevel::Low),
        Just(PriorityLevel::Idle),
    ]
}

fn assert_heap_property(heap: &TaskHeap<Entry>) {
    let nodes = heap.as_slice();
    for i in 1..nodes.len() {
        let parent = (i - 1) / 2;
        assert_ne!(
            compare(&nodes[parent], &nodes[i]),
            std::cmp::Ordering::Greater,
            "heap property violated at index {i}"
        );
    }
}

// ── Heap ──────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn pop_returns_minimum_and_heap_property_holds(ops in arb_ops()) {
        let mut heap = TaskHeap::new();
        let mut model: Vec<Entry> = Vec::new();
        let mut next_id = 0;

        for op in ops {
            match op {
                Op::Push(deadline_ms) => {
                    let entry = Entry { deadline_ms, id: next_id };
                    next_id += 1;
                    heap.push(entry);
                    model.push(entry);
                }
                Op::Pop => {
                    model.sort_by(compare);
                    let expected = if model.is_empty() { None } else { Some(model.remove(0)) };
                    prop_assert_eq!(heap.pop(), expected);
                }
            }
            prop_assert_eq!(heap.len(), model.len());
            assert_heap_property(&heap);
        }
    }

    #[test]
    fn drain_order_is_sorted(deadlines in prop::collection::vec(0u64..20, 0..100)) {
        let mut heap = TaskHeap::new();
        let mut expected = Vec::new();
        for (id, deadline_ms) in deadlines.into_iter().enumerate() {
            let entry = Entry { deadline_ms, id: id as u64 };
            heap.push(entry);
            expected.push(entry);
        }
        expected.sort_by(compare);
        let drained: Vec<Entry> = std::iter::from_fn(|| heap.pop()).collect();
        prop_assert_eq!(drained, expected);
    }
}

// ── Scheduler ─────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn scheduler_runs_tasks_in_deadline_order(
        priorities in prop::collection::vec(arb_priority(), 1..40),
        cancel_mask in prop::collection::vec(any::<bool>(), 40),
    ) {
        let clock = Rc::new(ManualClock::new());
        let event_loop = Rc::new(EventLoop::new());
        let scheduler = Scheduler::new(SchedulerConfig::default(), clock, event_loop.clone());
        let ran = Rc::new(RefCell::new(Vec::new()));

        let mut handles = Vec::new();
        for (index, priority) in priorities.iter().copied().enumerate() {
            let ran = ran.clone();
            handles.push(scheduler.schedule_callback(priority, move |_| {
                ran.borrow_mut().push(index);
                Ok(None)
            }));
        }
        let mut expected: Vec<(Duration, u64, usize)> = Vec::new();
        for (index, handle) in handles.iter().enumerate() {
            if cancel_mask[index] {
                scheduler.cancel_callback(handle);
            } else {
                expected.push((handle.deadline(), handle.id(), index));
            }
        }
        expected.sort();

        event_loop.run_until_idle().unwrap();
        let expected: Vec<usize> = expected.into_iter().map(|(_, _, index)| index).collect();
        prop_assert_eq!(ran.borrow().clone(), expected);
        prop_assert_eq!(scheduler.pending(), 0);
    }
}
