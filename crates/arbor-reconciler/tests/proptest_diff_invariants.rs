//! Property-based invariant tests for keyed child reconciliation.
//!
//! Verifies, for any sequence of keyed lists rendered into one root:
//! 1. After each commit the host children appear in exactly the rendered order
//! 2. A key present in consecutive renders keeps its host object
//! 3. Host elements are created only for keys that were not rendered before
//! 4. Host removals equal the keys dropped since the previous render
//! 5. The fiber count stays bounded by two slots per rendered child plus the root pair

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use arbor_reconciler::{
    Element, HostHandle, HostOp, MemoryHost, Node, Props, Root, RootConfig,
};
use arbor_scheduler::{EventLoop, ManualClock, Scheduler, SchedulerConfig};
use proptest::prelude::*;

fn harness() -> (Rc<EventLoop>, Root<MemoryHost>) {
    let event_loop = Rc::new(EventLoop::new());
    let scheduler = Scheduler::new(
        SchedulerConfig::default(),
        Rc::new(ManualClock::new()),
        event_loop.clone(),
    );
    let mut host = MemoryHost::new();
    let container = host.create_container();
    let root = Root::new(host, container, scheduler, event_loop.clone(), RootConfig::default());
    (event_loop, root)
}

fn list(keys: &[u32]) -> Node {
    keys.iter()
        .map(|key| Node::from(Element::host("li", Props::new().with_children(format!("k{key}"))).keyed(*key)))
        .collect()
}

/// Committed host children of the container, as `(key, handle)` pairs.
fn committed(root: &Root<MemoryHost>) -> Vec<(u32, HostHandle)> {
    let container = root.container();
    root.with_host(|host| {
        host.children(container)
            .iter()
            .map(|&child| {
                let text = host.text_content(child);
                let key = text.trim_start_matches('k').parse().expect("rendered key");
                (key, child)
            })
            .collect()
    })
}

// ── Strategies ────────────────────────────────────────────────────────

fn arb_keys() -> impl Strategy<Value = Vec<u32>> {
    prop::sample::subsequence((0u32..12).collect::<Vec<_>>(), 0..=12).prop_shuffle()
}

fn arb_renders() -> impl Strategy<Value = Vec<Vec<u32>>> {
    prop::collection::vec(arb_keys(), 1..8)
}

proptest! {
    #[test]
    fn keyed_lists_commit_in_order(renders in arb_renders()) {
        let (event_loop, root) = harness();
        let mut previous: HashMap<u32, HostHandle> = HashMap::new();

        for keys in &renders {
            root.with_host_mut(MemoryHost::take_ops);
            root.render(list(keys));
            event_loop.run_until_idle().unwrap();

            let now = committed(&root);
            let order: Vec<u32> = now.iter().map(|(key, _)| *key).collect();
            prop_assert_eq!(&order, keys);

            for (key, handle) in &now {
                if let Some(before) = previous.get(key) {
                    prop_assert_eq!(before, handle, "key {} lost its host object", key);
                }
            }

            let ops = root.with_host_mut(MemoryHost::take_ops);
            let created = ops.iter().filter(|op| matches!(op, HostOp::CreateElement { .. })).count();
            let fresh = keys.iter().filter(|key| !previous.contains_key(key)).count();
            prop_assert_eq!(created, fresh);

            let current: HashSet<u32> = keys.iter().copied().collect();
            let dropped = previous.keys().filter(|key| !current.contains(key)).count();
            let removed = ops.iter().filter(|op| matches!(op, HostOp::Remove { .. })).count();
            prop_assert_eq!(removed, dropped);

            prop_assert!(root.fiber_count() <= 2 * (keys.len() + 1));
            previous = now.into_iter().collect();
        }
    }

    #[test]
    fn moves_never_touch_unmoved_prefix(keys in arb_keys(), split in 0usize..12) {
        let (event_loop, root) = harness();
        root.render(list(&keys));
        event_loop.run_until_idle().unwrap();
        root.with_host_mut(MemoryHost::take_ops);

        // Keep a prefix in place and reverse the rest.
        let split = split.min(keys.len());
        let mut next = keys[..split].to_vec();
        next.extend(keys[split..].iter().rev());
        root.render(list(&next));
        event_loop.run_until_idle().unwrap();

        let order: Vec<u32> = committed(&root).into_iter().map(|(key, _)| key).collect();
        prop_assert_eq!(&order, &next);

        let prefix: HashSet<HostHandle> = committed(&root)[..split].iter().map(|(_, h)| *h).collect();
        let ops = root.with_host_mut(MemoryHost::take_ops);
        for op in &ops {
            match op {
                HostOp::Append { child, .. } | HostOp::InsertBefore { child, .. } => {
                    prop_assert!(!prefix.contains(child), "prefix node moved: {:?}", op);
                }
                _ => {}
            }
        }
    }
}
