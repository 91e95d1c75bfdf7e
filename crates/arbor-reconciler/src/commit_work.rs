#![forbid(unsafe_code)]

//! Commit phase: apply a finished tree's flags to the host.
//!
//! # Mutation pass
//!
//! Depth first. For each fiber: listed deletions are removed from the nearest
//! host parent (unmount teardowns run or are queued), a host property diff is
//! applied, children are visited when their subtree carries mutation flags,
//! then the fiber's own placement and update are applied. Layout effects run
//! as part of the update, after the fiber's subtree is in place.
//!
//! # Passive pass
//!
//! Runs later, as its own scheduler task. Teardowns of deleted fibers run
//! first, then every pending passive effect in post order.
//!
//! Flags are cleared as they are consumed. Errors abort the pass; the caller
//! keeps the previous tree as current.

use tracing::{debug, trace};

use crate::error::{ReconcileError, Result};
use crate::fiber::{FiberArena, FiberId, FiberTag, PropChange};
use crate::flags::Flags;
use crate::hooks::{EffectPhase, EffectRecord, TeardownSlot, run_teardown};
use crate::host::{Host, HostHandle};

/// Side products of a mutation pass, acted on once it succeeded.
#[derive(Default)]
pub(crate) struct CommitOutput {
    /// Roots of deleted subtrees, to free from the arena.
    pub(crate) deleted: Vec<FiberId>,
    /// Passive teardowns of deleted fibers.
    pub(crate) passive_unmounts: Vec<TeardownSlot>,
    pub(crate) placements: usize,
    pub(crate) updates: usize,
}

pub(crate) fn commit_mutation_effects<H: Host>(
    arena: &mut FiberArena,
    host: &mut H,
    finished: FiberId,
) -> Result<CommitOutput> {
    let mut out = CommitOutput::default();
    commit_mutation_effects_on_fiber(arena, host, finished, &mut out)?;
    debug!(
        placements = out.placements,
        updates = out.updates,
        deletions = out.deleted.len(),
        "mutation pass complete"
    );
    Ok(out)
}

fn commit_mutation_effects_on_fiber<H: Host>(
    arena: &mut FiberArena,
    host: &mut H,
    fiber: FiberId,
    out: &mut CommitOutput,
) -> Result<()> {
    let deletions = std::mem::take(&mut arena.get_mut(fiber)?.deletions);
    for deleted in deletions {
        commit_deletion(arena, host, fiber, deleted, out)?;
    }

    commit_host_payload(arena, host, fiber)?;

    let subtree_flags = arena.get(fiber)?.subtree_flags;
    if subtree_flags.intersects(Flags::MUTATION_MASK) {
        let mut next = arena.get(fiber)?.child;
        while let Some(child) = next {
            arena.get_mut(child)?.parent = Some(fiber);
            commit_mutation_effects_on_fiber(arena, host, child, out)?;
            next = arena.get(child)?.sibling;
        }
    }

    let flags = arena.get(fiber)?.flags;
    if flags.contains(Flags::PLACEMENT) {
        commit_placement(arena, host, fiber)?;
        out.placements += 1;
    }
    if flags.contains(Flags::UPDATE) {
        commit_update(arena, host, fiber)?;
        out.updates += 1;
    }
    arena
        .get_mut(fiber)?
        .flags
        .remove(Flags::PLACEMENT | Flags::UPDATE | Flags::CHILD_DELETION);
    Ok(())
}

/// Property diff of an updated host element. Applied before children are
/// placed so a text reset cannot clobber them.
fn commit_host_payload<H: Host>(arena: &mut FiberArena, host: &mut H, fiber: FiberId) -> Result<()> {
    let f = arena.get_mut(fiber)?;
    if !f.flags.contains(Flags::UPDATE) {
        return Ok(());
    }
    let handle = f.host_handle;
    let FiberTag::Host { update_payload, .. } = &mut f.tag else {
        return Ok(());
    };
    let (Some(payload), Some(handle)) = (update_payload.take(), handle) else {
        return Ok(());
    };
    for change in payload {
        match change {
            PropChange::Set(key, value) => host.set_property(handle, &key, &value)?,
            PropChange::Text(text) => host.set_text_content(handle, &text)?,
        }
    }
    Ok(())
}

fn commit_update<H: Host>(arena: &mut FiberArena, host: &mut H, fiber: FiberId) -> Result<()> {
    let f = arena.get_mut(fiber)?;
    match &f.tag {
        FiberTag::Text { text } => {
            if let Some(handle) = f.host_handle {
                host.set_text_content(handle, text)?;
            }
        }
        FiberTag::Function { .. } | FiberTag::SimpleMemo { .. } => {
            run_effects(&mut f.effects, EffectPhase::Layout);
        }
        _ => {}
    }
    Ok(())
}

fn run_effects(effects: &mut [EffectRecord], phase: EffectPhase) {
    for effect in effects.iter_mut().filter(|effect| effect.phase == phase) {
        effect.run();
    }
}

/// Nearest ancestor that owns host children.
fn get_host_parent(arena: &FiberArena, fiber: FiberId) -> Result<HostHandle> {
    let mut next = arena.get(fiber)?.parent;
    while let Some(id) = next {
        let parent = arena.get(id)?;
        if parent.is_host_parent()
            && let Some(handle) = parent.host_handle
        {
            return Ok(handle);
        }
        next = parent.parent;
    }
    let kind = arena.get(fiber)?.kind();
    Err(ReconcileError::MissingHostParent { fiber, kind })
}

/// Host object the placed fiber must be inserted before, if any.
///
/// Walks forward through siblings (and up through host-less ancestors),
/// descending into components, skipping fibers that are themselves placed.
fn get_host_sibling(arena: &mut FiberArena, fiber: FiberId) -> Result<Option<HostHandle>> {
    let mut node = fiber;
    'siblings: loop {
        loop {
            let current = arena.get(node)?;
            if current.sibling.is_some() {
                break;
            }
            match current.parent {
                None => return Ok(None),
                Some(parent) if arena.get(parent)?.is_host_parent() => return Ok(None),
                Some(parent) => node = parent,
            }
        }
        let (sibling, parent) = {
            let current = arena.get(node)?;
            (current.sibling, current.parent)
        };
        let Some(sibling) = sibling else {
            return Ok(None);
        };
        arena.get_mut(sibling)?.parent = parent;
        node = sibling;

        loop {
            let current = arena.get(node)?;
            if current.is_host() {
                break;
            }
            if current.flags.contains(Flags::PLACEMENT) {
                continue 'siblings;
            }
            let Some(child) = current.child else {
                continue 'siblings;
            };
            arena.get_mut(child)?.parent = Some(node);
            node = child;
        }

        let current = arena.get(node)?;
        if !current.flags.contains(Flags::PLACEMENT) {
            return Ok(current.host_handle);
        }
    }
}

fn commit_placement<H: Host>(arena: &mut FiberArena, host: &mut H, fiber: FiberId) -> Result<()> {
    let parent = get_host_parent(arena, fiber)?;
    let before = get_host_sibling(arena, fiber)?;
    trace!(fiber = ?fiber, %parent, ?before, "placement");
    insert_or_append(arena, host, fiber, before, parent)
}

fn insert_or_append<H: Host>(
    arena: &FiberArena,
    host: &mut H,
    fiber: FiberId,
    before: Option<HostHandle>,
    parent: HostHandle,
) -> Result<()> {
    let node = arena.get(fiber)?;
    if node.is_host() {
        let handle = node.host_handle.ok_or(ReconcileError::UnexpectedKind {
            fiber,
            kind: node.kind(),
            phase: "placement without a host object",
        })?;
        match before {
            Some(before) => host.insert_before(parent, handle, before)?,
            None => host.append_child(parent, handle)?,
        }
        return Ok(());
    }
    let mut next = node.child;
    while let Some(child) = next {
        insert_or_append(arena, host, child, before, parent)?;
        next = arena.get(child)?.sibling;
    }
    Ok(())
}

fn commit_deletion<H: Host>(
    arena: &mut FiberArena,
    host: &mut H,
    parent: FiberId,
    deleted: FiberId,
    out: &mut CommitOutput,
) -> Result<()> {
    let host_parent = if arena.get(parent)?.is_host_parent() {
        arena.get(parent)?.host_handle
    } else {
        None
    };
    let host_parent = match host_parent {
        Some(handle) => handle,
        None => get_host_parent(arena, parent)?,
    };
    trace!(fiber = ?deleted, parent = %host_parent, "deletion");
    delete_subtree(arena, host, host_parent, deleted, true, out)?;
    out.deleted.push(deleted);
    Ok(())
}

/// Unmount `fiber` and its descendants. Host objects directly under the
/// removed boundary are detached; deeper ones leave with their ancestor.
fn delete_subtree<H: Host>(
    arena: &mut FiberArena,
    host: &mut H,
    host_parent: HostHandle,
    fiber: FiberId,
    remove_host: bool,
    out: &mut CommitOutput,
) -> Result<()> {
    unmount_fiber(arena, fiber, out)?;

    let node = arena.get(fiber)?;
    let is_host = node.is_host();
    let handle = node.host_handle;
    let mut next = node.child;
    while let Some(child) = next {
        delete_subtree(arena, host, host_parent, child, remove_host && !is_host, out)?;
        next = arena.get(child)?.sibling;
    }

    if is_host
        && remove_host
        && let Some(handle) = handle
    {
        host.remove_child(host_parent, handle)?;
    }
    Ok(())
}

fn unmount_fiber(arena: &FiberArena, fiber: FiberId, out: &mut CommitOutput) -> Result<()> {
    let node = arena.get(fiber)?;
    for (phase, destroy) in node.hooks().iter().filter_map(|hook| hook.effect_teardown()) {
        match phase {
            EffectPhase::Layout => run_teardown(destroy),
            EffectPhase::Passive => out.passive_unmounts.push(destroy.clone()),
        }
    }
    if let FiberTag::Class {
        instance: Some(instance),
        ..
    } = &node.tag
    {
        instance.borrow_mut().will_unmount();
    }
    Ok(())
}

/// Run pending passive effects below and at `fiber`, children first.
pub(crate) fn commit_passive_mount_effects(arena: &mut FiberArena, fiber: FiberId) -> Result<usize> {
    let mut ran = 0;
    let node = arena.get(fiber)?;
    if node.subtree_flags.contains(Flags::PASSIVE) {
        let mut next = node.child;
        while let Some(child) = next {
            ran += commit_passive_mount_effects(arena, child)?;
            next = arena.get(child)?.sibling;
        }
    }

    let node = arena.get_mut(fiber)?;
    if node.flags.contains(Flags::PASSIVE) {
        node.flags.remove(Flags::PASSIVE);
        let pending = node
            .effects
            .iter()
            .filter(|effect| effect.phase == EffectPhase::Passive && effect.is_pending())
            .count();
        run_effects(&mut node.effects, EffectPhase::Passive);
        ran += pending;
    }
    node.subtree_flags.remove(Flags::PASSIVE);
    Ok(ran)
}

/// Teardowns queued by deletions.
pub(crate) fn commit_passive_unmount_effects(unmounts: Vec<TeardownSlot>) -> usize {
    let count = unmounts.len();
    for destroy in &unmounts {
        run_teardown(destroy);
    }
    count
}
