#![forbid(unsafe_code)]

//! Work loop: the interruptible depth-first walk over the work-in-progress
//! tree, plus the commit that swaps it in.
//!
//! ```text
//! perform_unit_of_work(w):
//!     next = begin_work(current(w), w)
//!     w.memoized_props = w.pending_props
//!     if next: wip = next
//!     else:    complete_unit_of_work(w)
//!
//! complete_unit_of_work(w):
//!     loop:
//!         complete_work(current(w), w)
//!         if w is the root:  wip = None; return
//!         if w.sibling:      wip = w.sibling; return
//!         w = w.parent
//! ```
//!
//! A concurrent pass checks `should_yield_to_host` between units and resumes
//! where it stopped. A pass is abandoned (fresh slots freed, context cells
//! restored) on error or when a strictly more urgent update arrives.

use std::rc::Rc;

use arbor_scheduler::Scheduler;
use tracing::{debug, debug_span, trace, warn};

use crate::begin_work::RenderScope;
use crate::commit_work::{
    commit_mutation_effects, commit_passive_mount_effects, commit_passive_unmount_effects,
};
use crate::context::ContextStack;
use crate::element::{Node, Props};
use crate::error::Result;
use crate::fiber::{FiberArena, FiberId, FiberTag};
use crate::flags::Flags;
use crate::hooks::TeardownSlot;
use crate::host::{Host, HostHandle};
use crate::lanes::{Lanes, is_higher_priority};
use crate::root::RootConfig;
use crate::update_queue::{UpdateQueue, UpdateRequest};

/// Passive work left behind by the latest commit.
pub(crate) struct PendingPassive {
    root: FiberId,
    unmounts: Vec<TeardownSlot>,
}

/// Counters for one root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RootStats {
    /// Render passes started, restarts included.
    pub passes: u64,
    /// Passes discarded before commit.
    pub abandoned: u64,
    pub commits: u64,
    /// Units of work performed.
    pub units: u64,
    /// Passive effect setups and teardowns run.
    pub passive_effects: u64,
}

/// All render state of one root.
pub(crate) struct FiberRoot<H: Host> {
    pub(crate) host: H,
    container: HostHandle,
    arena: FiberArena,
    current: FiberId,
    wip_root: Option<FiberId>,
    work_in_progress: Option<FiberId>,
    render_lanes: Lanes,
    pending_lanes: Lanes,
    contexts: ContextStack,
    element: Node,
    updates: Rc<UpdateQueue>,
    pub(crate) config: RootConfig,
    pending_passive: Option<PendingPassive>,
    pub(crate) stats: RootStats,
}

impl<H: Host> FiberRoot<H> {
    pub(crate) fn new(host: H, container: HostHandle, updates: Rc<UpdateQueue>, config: RootConfig) -> Self {
        let mut arena = FiberArena::new();
        let current = arena.create_root();
        if let Some(root) = arena.try_get_mut(current) {
            root.host_handle = Some(container);
            root.memoized_props = Some(Props::new());
        }
        Self {
            host,
            container,
            arena,
            current,
            wip_root: None,
            work_in_progress: None,
            render_lanes: Lanes::NONE,
            pending_lanes: Lanes::NONE,
            contexts: ContextStack::default(),
            element: Node::Empty,
            updates,
            config,
            pending_passive: None,
            stats: RootStats::default(),
        }
    }

    pub(crate) fn container(&self) -> HostHandle {
        self.container
    }

    pub(crate) fn arena(&self) -> &FiberArena {
        &self.arena
    }

    pub(crate) fn current(&self) -> FiberId {
        self.current
    }

    pub(crate) fn is_rendering(&self) -> bool {
        self.wip_root.is_some()
    }

    /// Queued or drained-but-uncommitted work exists.
    pub(crate) fn has_work(&self) -> bool {
        !self.pending_lanes.is_empty() || !self.updates.is_empty()
    }

    /// Lanes a pass would render right now.
    pub(crate) fn next_lanes(&self) -> Lanes {
        self.pending_lanes | self.updates.queued_lanes()
    }

    pub(crate) fn has_pending_passive(&self) -> bool {
        self.pending_passive.is_some()
    }

    /// A pass is in progress and an update more urgent than it is queued.
    pub(crate) fn should_restart(&self) -> bool {
        self.wip_root.is_some()
            && is_higher_priority(
                self.updates.queued_lanes().highest_priority_lane(),
                self.render_lanes.highest_priority_lane(),
            )
    }

    pub(crate) fn render_lanes(&self) -> Lanes {
        self.render_lanes
    }

    /// Drain queued updates and start a pass from the root.
    pub(crate) fn prepare_fresh_stack(&mut self) -> Result<()> {
        if self.wip_root.is_some() {
            self.abandon_pass();
        }
        for request in self.updates.drain() {
            self.pending_lanes |= request.lane();
            match request {
                UpdateRequest::Root { element, .. } => self.element = element,
                UpdateRequest::Fiber { fiber, lane } => self.mark_update_lane_from_fiber_to_root(fiber, lane),
            }
        }
        self.render_lanes = self.pending_lanes;

        let wip = self.arena.create_work_in_progress(self.current, Props::new())?;
        let root = self.arena.get_mut(wip)?;
        root.tag = FiberTag::Root {
            element: self.element.clone(),
        };
        self.wip_root = Some(wip);
        self.work_in_progress = Some(wip);
        self.stats.passes += 1;
        debug!(lanes = ?self.render_lanes, "render pass started");
        arbor_scheduler::debug_trace!("render pass #{} lanes={:?}", self.stats.passes, self.render_lanes);
        Ok(())
    }

    /// Flag `fiber` and every ancestor's child lanes, on both buffers.
    fn mark_update_lane_from_fiber_to_root(&mut self, fiber: FiberId, lane: Lanes) {
        let Some(node) = self.arena.try_get_mut(fiber) else {
            warn!(?fiber, "state update on an unmounted component ignored");
            return;
        };
        node.lanes |= lane;
        let alternate = node.alternate;
        let mut parent = node.parent;
        if let Some(alternate) = alternate
            && let Some(alt) = self.arena.try_get_mut(alternate)
        {
            alt.lanes |= lane;
        }

        let mut top = fiber;
        while let Some(id) = parent {
            let Some(node) = self.arena.try_get_mut(id) else {
                break;
            };
            node.child_lanes |= lane;
            let alternate = node.alternate;
            parent = node.parent;
            if let Some(alternate) = alternate
                && let Some(alt) = self.arena.try_get_mut(alternate)
            {
                alt.child_lanes |= lane;
            }
            top = id;
        }

        let reached_root = top == self.current
            || self
                .arena
                .get(self.current)
                .is_ok_and(|root| root.alternate == Some(top));
        if !reached_root {
            warn!(?fiber, "state update on a detached component ignored");
        }
    }

    /// Run units until the pass completes.
    pub(crate) fn work_loop_sync(&mut self) -> Result<()> {
        let _span = debug_span!("arbor.render.sync", label = %self.config.label).entered();
        self.contexts.resume();
        while let Some(unit) = self.work_in_progress {
            self.perform_unit_of_work(unit)?;
        }
        Ok(())
    }

    /// Run units until the pass completes or the scheduler asks to yield.
    pub(crate) fn work_loop_concurrent(&mut self, scheduler: &Scheduler) -> Result<()> {
        let _span = debug_span!("arbor.render.concurrent", label = %self.config.label).entered();
        self.contexts.resume();
        while let Some(unit) = self.work_in_progress {
            if scheduler.should_yield_to_host() {
                debug!(?unit, contexts = self.contexts.depth(), "render pass yielding");
                self.contexts.suspend();
                break;
            }
            self.perform_unit_of_work(unit)?;
        }
        Ok(())
    }

    /// Whether the pass still has units to run.
    pub(crate) fn has_remaining_work(&self) -> bool {
        self.work_in_progress.is_some()
    }

    fn scope(&mut self) -> (RenderScope<'_>, &mut H) {
        (
            RenderScope {
                arena: &mut self.arena,
                contexts: &mut self.contexts,
                updates: &self.updates,
                render_lanes: self.render_lanes,
            },
            &mut self.host,
        )
    }

    fn perform_unit_of_work(&mut self, unit: FiberId) -> Result<()> {
        self.stats.units += 1;
        let fiber = self.arena.get(unit)?;
        let current = fiber.alternate;
        trace!(fiber = ?unit, ty = %fiber.type_name(), mount = current.is_none(), "begin work");
        let next = {
            let (mut scope, _) = self.scope();
            scope.begin_work(current, unit)?
        };
        let fiber = self.arena.get_mut(unit)?;
        fiber.memoized_props = Some(fiber.pending_props.clone());
        match next {
            Some(next) => self.work_in_progress = Some(next),
            None => self.complete_unit_of_work(unit)?,
        }
        Ok(())
    }

    fn complete_unit_of_work(&mut self, unit: FiberId) -> Result<()> {
        let mut completed = unit;
        loop {
            let current = self.arena.get(completed)?.alternate;
            {
                let (mut scope, host) = self.scope();
                scope.complete_work(host, current, completed)?;
            }
            if Some(completed) == self.wip_root {
                self.work_in_progress = None;
                return Ok(());
            }
            let fiber = self.arena.get(completed)?;
            if let Some(sibling) = fiber.sibling {
                self.work_in_progress = Some(sibling);
                return Ok(());
            }
            match fiber.parent {
                Some(parent) => completed = parent,
                None => {
                    self.work_in_progress = None;
                    return Ok(());
                }
            }
        }
    }

    /// Drop the pass in progress: free its fresh slots, restore contexts.
    pub(crate) fn abandon_pass(&mut self) {
        if self.wip_root.is_none() {
            return;
        }
        let contexts = self.contexts.depth();
        self.contexts.unwind();
        let freed = self.arena.discard_fresh();
        self.wip_root = None;
        self.work_in_progress = None;
        self.stats.abandoned += 1;
        debug!(freed, contexts, "render pass abandoned");
    }

    /// Abandon the pass and forget the lanes it was rendering.
    pub(crate) fn fail_pass(&mut self) {
        self.abandon_pass();
        self.pending_lanes = Lanes::NONE;
        self.render_lanes = Lanes::NONE;
    }

    /// Apply the finished tree and make it current.
    pub(crate) fn commit_root(&mut self) -> Result<()> {
        let Some(finished) = self.wip_root else {
            return Ok(());
        };
        let _span = debug_span!("arbor.commit", label = %self.config.label).entered();
        let output = commit_mutation_effects(&mut self.arena, &mut self.host, finished)?;

        self.current = finished;
        self.wip_root = None;
        self.work_in_progress = None;
        for deleted in &output.deleted {
            self.arena.free_subtree(*deleted);
        }
        self.arena.commit_fresh();
        self.pending_lanes = Lanes::NONE;
        self.render_lanes = Lanes::NONE;
        self.stats.commits += 1;

        let has_passive = self
            .arena
            .get(finished)?
            .subtree_flags
            .intersects(Flags::PASSIVE)
            || !output.passive_unmounts.is_empty();
        if has_passive {
            self.pending_passive = Some(PendingPassive {
                root: finished,
                unmounts: output.passive_unmounts,
            });
        }
        debug!(
            label = %self.config.label,
            commit = self.stats.commits,
            fibers = self.arena.len(),
            "commit"
        );
        arbor_scheduler::debug_trace!("commit #{} fibers={}", self.stats.commits, self.arena.len());
        Ok(())
    }

    /// Run passive work of the latest commit. Returns `false` when there was
    /// none.
    pub(crate) fn flush_passive_effects(&mut self) -> Result<bool> {
        let Some(pending) = self.pending_passive.take() else {
            return Ok(false);
        };
        let _span = debug_span!("arbor.commit.passive").entered();
        let unmounted = commit_passive_unmount_effects(pending.unmounts);
        let mounted = if self.arena.contains(pending.root) {
            commit_passive_mount_effects(&mut self.arena, pending.root)?
        } else {
            0
        };
        self.stats.passive_effects += (unmounted + mounted) as u64;
        debug!(unmounted, mounted, "passive effects flushed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::Element;
    use crate::memory_host::MemoryHost;

    fn fiber_root() -> FiberRoot<MemoryHost> {
        let mut host = MemoryHost::new();
        let container = host.create_container();
        FiberRoot::new(host, container, UpdateQueue::new(), RootConfig::default())
    }

    fn render_sync(root: &mut FiberRoot<MemoryHost>, element: impl Into<Node>) {
        root.updates.enqueue(UpdateRequest::Root {
            element: element.into(),
            lane: Lanes::SYNC,
        });
        root.prepare_fresh_stack().unwrap();
        root.work_loop_sync().unwrap();
        root.commit_root().unwrap();
    }

    #[test]
    fn sync_pass_commits_and_swaps_current() {
        let mut root = fiber_root();
        let before = root.current();
        render_sync(
            &mut root,
            Element::host("div", Props::new().with("id", "a").with_children("hello")),
        );
        assert_ne!(root.current(), before);
        assert_eq!(root.arena().get(root.current()).unwrap().alternate(), Some(before));
        assert_eq!(
            root.host.to_markup(root.container()),
            r#"<root><div id="a">hello</div></root>"#
        );
        assert_eq!(root.stats.commits, 1);
        assert!(!root.has_work());
    }

    #[test]
    fn deleted_subtrees_are_freed() {
        let mut root = fiber_root();
        let list = |n: usize| -> Node {
            (0..n)
                .map(|i| Node::from(Element::host("li", Props::new().with_children(i.to_string())).keyed(i)))
                .collect()
        };
        render_sync(&mut root, list(5));
        render_sync(&mut root, list(5));
        let steady = root.arena().len();
        render_sync(&mut root, list(2));
        assert!(root.arena().len() < steady);
        assert_eq!(
            root.host.to_markup(root.container()),
            "<root><li>0</li><li>1</li></root>"
        );
    }

    #[test]
    fn abandon_restores_previous_tree() {
        let mut root = fiber_root();
        render_sync(&mut root, Element::host("p", Props::new()));
        let current = root.current();
        let fibers = root.arena().len();

        root.updates.enqueue(UpdateRequest::Root {
            element: Node::list([Element::host("a", Props::new()).into(), "x".into()]),
            lane: Lanes::DEFAULT,
        });
        root.prepare_fresh_stack().unwrap();
        root.work_loop_sync().unwrap();
        root.abandon_pass();

        assert_eq!(root.current(), current);
        assert!(!root.is_rendering());
        assert!(root.arena().len() <= fibers + 1);
        assert_eq!(root.host.to_markup(root.container()), "<root><p></p></root>");
    }
}
