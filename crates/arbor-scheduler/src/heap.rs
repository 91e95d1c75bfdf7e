#![forbid(unsafe_code)]

//! Array-backed binary min-heap keyed by `(sort_index, id)`.
//!
//! The scheduler keeps its pending tasks here ordered by deadline. Ties on
//! the deadline fall back to the monotonic task id, which keeps tasks that
//! share a deadline in FIFO order.
//!
//! # Invariants
//!
//! 1. For every index `i > 0`, `nodes[(i - 1) / 2] <= nodes[i]` under
//!    [`compare`].
//! 2. [`TaskHeap::peek`] always returns the smallest node.
//!
//! There is no removal by reference. Callers that need to withdraw an entry
//! mark it inert and drop it once it surfaces at the root.

use std::cmp::Ordering;
use std::rc::Rc;
use std::time::Duration;

/// Ordering key of a heap entry.
pub trait HeapNode {
    /// Primary ordering key (the task deadline).
    fn sort_index(&self) -> Duration;

    /// Tie-break key; unique and monotonically increasing per entry.
    fn id(&self) -> u64;
}

impl<T: HeapNode + ?Sized> HeapNode for Rc<T> {
    fn sort_index(&self) -> Duration {
        (**self).sort_index()
    }

    fn id(&self) -> u64 {
        (**self).id()
    }
}

/// Compare two entries by `sort_index`, then by `id`.
#[inline]
pub fn compare<T: HeapNode>(a: &T, b: &T) -> Ordering {
    a.sort_index()
        .cmp(&b.sort_index())
        .then_with(|| a.id().cmp(&b.id()))
}

/// Binary min-heap.
#[derive(Debug)]
pub struct TaskHeap<T> {
    nodes: Vec<T>,
}

impl<T> Default for TaskHeap<T> {
    fn default() -> Self {
        Self { nodes: Vec::new() }
    }
}

impl<T: HeapNode> TaskHeap<T> {
    /// Create an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Smallest entry, if any.
    #[inline]
    pub fn peek(&self) -> Option<&T> {
        self.nodes.first()
    }

    /// Insert an entry and restore heap order.
    pub fn push(&mut self, node: T) {
        self.nodes.push(node);
        let last = self.nodes.len() - 1;
        self.sift_up(last);
    }

    /// Remove and return the smallest entry.
    pub fn pop(&mut self) -> Option<T> {
        if self.nodes.is_empty() {
            return None;
        }
        let first = self.nodes.swap_remove(0);
        if !self.nodes.is_empty() {
            self.sift_down(0);
        }
        Some(first)
    }

    /// Backing array in heap order (not sorted order).
    pub fn as_slice(&self) -> &[T] {
        &self.nodes
    }

    /// Drop every entry.
    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn sift_up(&mut self, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) >> 1;
            if compare(&self.nodes[parent], &self.nodes[index]) == Ordering::Greater {
                self.nodes.swap(parent, index);
                index = parent;
            } else {
                return;
            }
        }
    }

    fn sift_down(&mut self, mut index: usize) {
        let length = self.nodes.len();
        let half = length >> 1;
        while index < half {
            let left = (index << 1) + 1;
            let right = left + 1;

            // Pick the smaller child; the right one only exists when in bounds.
            let smaller = if right < length
                && compare(&self.nodes[right], &self.nodes[left]) == Ordering::Less
            {
                right
            } else {
                left
            };

            if compare(&self.nodes[smaller], &self.nodes[index]) == Ordering::Less {
                self.nodes.swap(smaller, index);
                index = smaller;
            } else {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
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

    fn entry(deadline_ms: u64, id: u64) -> Entry {
        Entry { deadline_ms, id }
    }

    #[test]
    fn empty_heap_peeks_and_pops_none() {
        let mut heap: TaskHeap<Entry> = TaskHeap::new();
        assert!(heap.peek().is_none());
        assert!(heap.pop().is_none());
        assert!(heap.is_empty());
    }

    #[test]
    fn pops_in_deadline_order() {
        let mut heap = TaskHeap::new();
        heap.push(entry(30, 1));
        heap.push(entry(10, 2));
        heap.push(entry(20, 3));

        assert_eq!(heap.peek().map(|e| e.id), Some(2));
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.id).collect();
        assert_eq!(order, vec![2, 3, 1]);
    }

    #[test]
    fn equal_deadlines_are_fifo_by_id() {
        let mut heap = TaskHeap::new();
        for id in [4, 1, 3, 2] {
            heap.push(entry(5, id));
        }
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.id).collect();
        assert_eq!(order, vec![1, 2, 3, 4]);
    }

    #[test]
    fn rc_entries_share_ordering() {
        let mut heap = TaskHeap::new();
        heap.push(Rc::new(entry(2, 1)));
        heap.push(Rc::new(entry(1, 2)));
        assert_eq!(heap.pop().map(|e| e.id), Some(2));
        assert_eq!(heap.len(), 1);
    }
}
