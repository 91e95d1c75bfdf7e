#![forbid(unsafe_code)]

//! Child reconciliation: diff a parent's previous children against the
//! newly described ones.
//!
//! # Algorithm
//!
//! A single described element scans the previous siblings for its key. A key
//! and type match is reused and every other sibling deleted; a key match with
//! another type deletes that sibling and everything after it.
//!
//! A described list runs in three phases:
//!
//! ```text
//! 1. aligned prefix: walk both lists by position while keys line up
//! 2. one list ran out: delete the old leftovers, or create the new ones
//! 3. keyed remainder: index old leftovers by key (else position), match
//!    each new entry against the index, delete what stays unmatched
//! ```
//!
//! Reused fibers whose previous index is below the highest previous index
//! placed so far are flagged `PLACEMENT` (moved). New fibers are always
//! flagged.
//!
//! # Invariants
//!
//! 1. With side-effect tracking off (first mount of a subtree) no flag and no
//!    deletion is recorded.
//! 2. Deletions are recorded on the parent in previous sibling order.
//! 3. Every returned child has `parent` set to the reconciling fiber and a
//!    sibling chain ending in `None`.

use std::collections::HashMap;
use std::rc::Rc;

use crate::element::{Element, ElementType, Key, Node, Props};
use crate::error::Result;
use crate::fiber::{FiberArena, FiberId, FiberKind, FiberTag};
use crate::flags::Flags;

/// Lookup key for the keyed remainder phase.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum SlotKey {
    Key(Key),
    Index(usize),
}

impl SlotKey {
    fn of(key: Option<&Key>, index: usize) -> Self {
        match key {
            Some(key) => Self::Key(key.clone()),
            None => Self::Index(index),
        }
    }
}

/// Previous siblings not matched by the aligned prefix, in sibling order.
struct RemainingChildren {
    slots: Vec<Option<FiberId>>,
    lookup: HashMap<SlotKey, usize>,
}

impl RemainingChildren {
    fn collect(arena: &FiberArena, first: Option<FiberId>) -> Result<Self> {
        let mut slots = Vec::new();
        let mut lookup = HashMap::new();
        let mut next = first;
        while let Some(id) = next {
            let fiber = arena.get(id)?;
            lookup.insert(SlotKey::of(fiber.key.as_ref(), fiber.index), slots.len());
            slots.push(Some(id));
            next = fiber.sibling;
        }
        Ok(Self { slots, lookup })
    }

    fn get(&self, key: &SlotKey) -> Option<FiberId> {
        self.lookup.get(key).and_then(|&slot| self.slots[slot])
    }

    fn remove(&mut self, key: &SlotKey) {
        if let Some(slot) = self.lookup.remove(key) {
            self.slots[slot] = None;
        }
    }

    fn leftovers(self) -> impl Iterator<Item = FiberId> {
        self.slots.into_iter().flatten()
    }
}

/// Diffs one parent's children.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ChildReconciler {
    track_side_effects: bool,
}

impl ChildReconciler {
    /// For a parent that has committed children.
    pub(crate) const UPDATE: Self = Self {
        track_side_effects: true,
    };

    /// For a parent mounting for the first time.
    pub(crate) const MOUNT: Self = Self {
        track_side_effects: false,
    };

    pub(crate) fn for_parent(has_current: bool) -> Self {
        if has_current { Self::UPDATE } else { Self::MOUNT }
    }

    /// Reconcile `new_child` under `return_fiber`, returning the first child.
    pub(crate) fn reconcile_child_fibers(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_child: &Node,
    ) -> Result<Option<FiberId>> {
        // An unkeyed top-level fragment is transparent.
        let new_child = match new_child {
            Node::Element(element)
                if element.key.is_none() && matches!(element.ty, ElementType::Fragment) =>
            {
                element.props.children()
            }
            other => other,
        };

        match new_child {
            Node::Element(element) => {
                let child =
                    self.reconcile_single_element(arena, return_fiber, current_first_child, element)?;
                self.place_single_child(arena, child)?;
                Ok(Some(child))
            }
            Node::Text(text) if !text.is_empty() => {
                let child =
                    self.reconcile_single_text(arena, return_fiber, current_first_child, text)?;
                self.place_single_child(arena, child)?;
                Ok(Some(child))
            }
            Node::List(items) => {
                self.reconcile_children_array(arena, return_fiber, current_first_child, items)
            }
            _ => {
                self.delete_remaining_children(arena, return_fiber, current_first_child)?;
                Ok(None)
            }
        }
    }

    fn delete_child(&self, arena: &mut FiberArena, return_fiber: FiberId, child: FiberId) -> Result<()> {
        if !self.track_side_effects {
            return Ok(());
        }
        let parent = arena.get_mut(return_fiber)?;
        parent.deletions.push(child);
        parent.flags |= Flags::CHILD_DELETION;
        Ok(())
    }

    fn delete_remaining_children(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        first: Option<FiberId>,
    ) -> Result<()> {
        if !self.track_side_effects {
            return Ok(());
        }
        let mut next = first;
        while let Some(child) = next {
            next = arena.get(child)?.sibling;
            self.delete_child(arena, return_fiber, child)?;
        }
        Ok(())
    }

    /// Record the new position of `fiber` and decide whether it moves.
    fn place_child(
        &self,
        arena: &mut FiberArena,
        fiber: FiberId,
        last_placed_index: usize,
        new_index: usize,
    ) -> Result<usize> {
        let alternate = {
            let f = arena.get_mut(fiber)?;
            f.index = new_index;
            if !self.track_side_effects {
                return Ok(last_placed_index);
            }
            f.alternate
        };
        let old_index = match alternate {
            Some(current) => Some(arena.get(current)?.index),
            None => None,
        };
        match old_index {
            Some(old_index) if old_index >= last_placed_index => Ok(old_index),
            _ => {
                arena.get_mut(fiber)?.flags |= Flags::PLACEMENT;
                Ok(last_placed_index)
            }
        }
    }

    fn place_single_child(&self, arena: &mut FiberArena, fiber: FiberId) -> Result<()> {
        let f = arena.get_mut(fiber)?;
        if self.track_side_effects && f.alternate.is_none() {
            f.flags |= Flags::PLACEMENT;
        }
        Ok(())
    }

    /// Work-in-progress copy of `current` positioned as an only child.
    fn use_fiber(
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: FiberId,
        props: Props,
    ) -> Result<FiberId> {
        let wip = arena.create_work_in_progress(current, props)?;
        let fiber = arena.get_mut(wip)?;
        fiber.index = 0;
        fiber.sibling = None;
        fiber.parent = Some(return_fiber);
        Ok(wip)
    }

    fn adopt(arena: &mut FiberArena, return_fiber: FiberId, child: FiberId) -> Result<FiberId> {
        arena.get_mut(child)?.parent = Some(return_fiber);
        Ok(child)
    }

    fn reconcile_single_element(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        element: &Rc<Element>,
    ) -> Result<FiberId> {
        let mut child = current_first_child;
        while let Some(id) = child {
            let fiber = arena.get(id)?;
            let next = fiber.sibling;
            if fiber.key == element.key {
                let same_type = fiber
                    .element_type
                    .as_ref()
                    .is_some_and(|ty| ty.same_type(&element.ty));
                if same_type {
                    self.delete_remaining_children(arena, return_fiber, next)?;
                    return Self::use_fiber(arena, return_fiber, id, element.props.clone());
                }
                self.delete_remaining_children(arena, return_fiber, Some(id))?;
                break;
            }
            self.delete_child(arena, return_fiber, id)?;
            child = next;
        }
        let created = arena.create_from_element(element);
        Self::adopt(arena, return_fiber, created)
    }

    fn reconcile_single_text(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        text: &Rc<str>,
    ) -> Result<FiberId> {
        if let Some(first) = current_first_child
            && arena.get(first)?.kind() == FiberKind::TextLeaf
        {
            let next = arena.get(first)?.sibling;
            self.delete_remaining_children(arena, return_fiber, next)?;
            let wip = Self::use_fiber(arena, return_fiber, first, Props::new())?;
            arena.get_mut(wip)?.tag = FiberTag::Text { text: text.clone() };
            return Ok(wip);
        }
        self.delete_remaining_children(arena, return_fiber, current_first_child)?;
        let created = arena.create_from_text(text.clone());
        Self::adopt(arena, return_fiber, created)
    }

    fn update_text_node(
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        text: &Rc<str>,
    ) -> Result<FiberId> {
        if let Some(current) = current
            && arena.get(current)?.kind() == FiberKind::TextLeaf
        {
            let wip = Self::use_fiber(arena, return_fiber, current, Props::new())?;
            arena.get_mut(wip)?.tag = FiberTag::Text { text: text.clone() };
            return Ok(wip);
        }
        let created = arena.create_from_text(text.clone());
        Self::adopt(arena, return_fiber, created)
    }

    fn update_element(
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        element: &Rc<Element>,
    ) -> Result<FiberId> {
        if let Some(current) = current
            && arena
                .get(current)?
                .element_type
                .as_ref()
                .is_some_and(|ty| ty.same_type(&element.ty))
        {
            return Self::use_fiber(arena, return_fiber, current, element.props.clone());
        }
        let created = arena.create_from_element(element);
        Self::adopt(arena, return_fiber, created)
    }

    fn update_fragment(
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current: Option<FiberId>,
        children: &Node,
    ) -> Result<FiberId> {
        let props = Props::new().with_children(children.clone());
        if let Some(current) = current
            && arena.get(current)?.kind() == FiberKind::Fragment
        {
            return Self::use_fiber(arena, return_fiber, current, props);
        }
        let created = arena.create_from_fragment(children.clone(), None);
        Self::adopt(arena, return_fiber, created)
    }

    fn create_child(arena: &mut FiberArena, return_fiber: FiberId, new_child: &Node) -> Result<Option<FiberId>> {
        let created = match new_child {
            Node::Text(text) if !text.is_empty() => arena.create_from_text(text.clone()),
            Node::Element(element) => arena.create_from_element(element),
            Node::List(_) => arena.create_from_fragment(new_child.clone(), None),
            _ => return Ok(None),
        };
        Self::adopt(arena, return_fiber, created).map(Some)
    }

    /// Reuse `old` for `new_child` when their keys line up.
    fn update_slot(
        arena: &mut FiberArena,
        return_fiber: FiberId,
        old: Option<FiberId>,
        new_child: &Node,
    ) -> Result<Option<FiberId>> {
        let old_key = match old {
            Some(id) => arena.get(id)?.key.clone(),
            None => None,
        };
        match new_child {
            Node::Text(text) if !text.is_empty() => {
                if old_key.is_some() {
                    return Ok(None);
                }
                Self::update_text_node(arena, return_fiber, old, text).map(Some)
            }
            Node::Element(element) => {
                if element.key != old_key {
                    return Ok(None);
                }
                Self::update_element(arena, return_fiber, old, element).map(Some)
            }
            Node::List(_) => {
                if old_key.is_some() {
                    return Ok(None);
                }
                Self::update_fragment(arena, return_fiber, old, new_child).map(Some)
            }
            _ => Ok(None),
        }
    }

    fn update_from_map(
        arena: &mut FiberArena,
        remaining: &mut RemainingChildren,
        return_fiber: FiberId,
        new_index: usize,
        new_child: &Node,
    ) -> Result<Option<FiberId>> {
        let slot = match new_child {
            Node::Text(text) if !text.is_empty() => SlotKey::Index(new_index),
            Node::Element(element) => SlotKey::of(element.key.as_ref(), new_index),
            Node::List(_) => SlotKey::Index(new_index),
            _ => return Ok(None),
        };
        let matched = remaining.get(&slot);
        let fiber = match new_child {
            Node::Text(text) => Self::update_text_node(arena, return_fiber, matched, text)?,
            Node::Element(element) => Self::update_element(arena, return_fiber, matched, element)?,
            _ => Self::update_fragment(arena, return_fiber, matched, new_child)?,
        };
        if arena.get(fiber)?.alternate.is_some() {
            remaining.remove(&slot);
        }
        Ok(Some(fiber))
    }

    fn reconcile_children_array(
        &self,
        arena: &mut FiberArena,
        return_fiber: FiberId,
        current_first_child: Option<FiberId>,
        new_children: &[Node],
    ) -> Result<Option<FiberId>> {
        let mut chain = SiblingChain::default();
        let mut old_fiber = current_first_child;
        let mut last_placed_index = 0;
        let mut new_index = 0;

        // Phase 1: aligned prefix.
        while let Some(old) = old_fiber {
            if new_index >= new_children.len() {
                break;
            }
            let (slot_fiber, next_old) = {
                let fiber = arena.get(old)?;
                if fiber.index > new_index {
                    (None, Some(old))
                } else {
                    (Some(old), fiber.sibling)
                }
            };
            let Some(new_fiber) =
                Self::update_slot(arena, return_fiber, slot_fiber, &new_children[new_index])?
            else {
                break;
            };
            if let Some(slot_fiber) = slot_fiber
                && arena.get(new_fiber)?.alternate.is_none()
            {
                // Matched the slot but built a fresh fiber.
                self.delete_child(arena, return_fiber, slot_fiber)?;
            }
            last_placed_index = self.place_child(arena, new_fiber, last_placed_index, new_index)?;
            chain.push(arena, new_fiber)?;
            old_fiber = next_old;
            new_index += 1;
        }

        // Phase 2: one side ran out.
        if new_index == new_children.len() {
            self.delete_remaining_children(arena, return_fiber, old_fiber)?;
            return Ok(chain.first);
        }
        if old_fiber.is_none() {
            for (index, new_child) in new_children.iter().enumerate().skip(new_index) {
                let Some(new_fiber) = Self::create_child(arena, return_fiber, new_child)? else {
                    continue;
                };
                last_placed_index = self.place_child(arena, new_fiber, last_placed_index, index)?;
                chain.push(arena, new_fiber)?;
            }
            return Ok(chain.first);
        }

        // Phase 3: keyed remainder.
        let mut remaining = RemainingChildren::collect(arena, old_fiber)?;
        for (index, new_child) in new_children.iter().enumerate().skip(new_index) {
            let Some(new_fiber) =
                Self::update_from_map(arena, &mut remaining, return_fiber, index, new_child)?
            else {
                continue;
            };
            last_placed_index = self.place_child(arena, new_fiber, last_placed_index, index)?;
            chain.push(arena, new_fiber)?;
        }
        for leftover in remaining.leftovers() {
            self.delete_child(arena, return_fiber, leftover)?;
        }
        Ok(chain.first)
    }
}

/// Builds the new sibling chain.
#[derive(Default)]
struct SiblingChain {
    first: Option<FiberId>,
    last: Option<FiberId>,
}

impl SiblingChain {
    fn push(&mut self, arena: &mut FiberArena, fiber: FiberId) -> Result<()> {
        arena.get_mut(fiber)?.sibling = None;
        match self.last {
            Some(last) => arena.get_mut(last)?.sibling = Some(fiber),
            None => self.first = Some(fiber),
        }
        self.last = Some(fiber);
        Ok(())
    }
}
