#![forbid(unsafe_code)]

//! Render phase, top-down half: render one fiber and reconcile its children.
//!
//! Returns the next fiber to begin, or `None` when the fiber has no child
//! work in this pass. A fiber whose props object is unchanged and which has
//! no pending update bails out: its committed children are reused, cloned
//! only when some descendant has pending work.

use std::rc::Rc;

use tracing::trace;

use crate::child_fiber::ChildReconciler;
use crate::context::{ContextId, ContextStack};
use crate::element::{Component, Element, Node};
use crate::error::Result;
use crate::fiber::{FiberArena, FiberId, FiberTag};
use crate::hooks::render_with_hooks;
use crate::lanes::Lanes;
use crate::update_queue::UpdateQueue;

/// Mutable state of one render pass, shared by `begin_work` and
/// `complete_work`.
pub(crate) struct RenderScope<'a> {
    pub(crate) arena: &'a mut FiberArena,
    pub(crate) contexts: &'a mut ContextStack,
    pub(crate) updates: &'a Rc<UpdateQueue>,
    pub(crate) render_lanes: Lanes,
}

impl RenderScope<'_> {
    pub(crate) fn begin_work(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<Option<FiberId>> {
        let had_lanes = {
            let fiber = self.arena.get(wip)?;
            fiber.lanes.includes_some(self.render_lanes)
        };

        if let Some(current) = current {
            let fiber = self.arena.get(wip)?;
            let props_unchanged = self
                .arena
                .get(current)?
                .memoized_props
                .as_ref()
                .is_some_and(|old| old.ptr_eq(&fiber.pending_props));
            let is_root = matches!(fiber.tag, FiberTag::Root { .. });
            if props_unchanged && !had_lanes && !is_root {
                if let FiberTag::Provider { provider } = &fiber.tag {
                    let context = provider.context.clone();
                    let props = fiber.pending_props.clone();
                    self.contexts.push(&context, &props);
                }
                trace!(fiber = ?wip, "bailout: props and lanes unchanged");
                return self.bailout_on_already_finished_work(wip);
            }
        }

        self.arena.get_mut(wip)?.lanes = Lanes::NONE;
        let tag = self.arena.get(wip)?.tag.clone();
        match tag {
            FiberTag::Root { element } => self.reconcile_children(current, wip, &element),
            FiberTag::Host { .. } => self.update_host_component(current, wip),
            FiberTag::Text { .. } => Ok(None),
            FiberTag::Fragment => {
                let children = self.arena.get(wip)?.pending_props.children().clone();
                self.reconcile_children(current, wip, &children)
            }
            FiberTag::Function { component, .. } => {
                self.update_function_component(current, wip, &component)
            }
            FiberTag::Class { class, instance } => {
                let props = self.arena.get(wip)?.pending_props.clone();
                let instance = match instance {
                    Some(instance) => instance,
                    None => {
                        let instance = class.construct(&props);
                        self.arena.get_mut(wip)?.tag = FiberTag::Class {
                            class: class.clone(),
                            instance: Some(instance.clone()),
                        };
                        instance
                    }
                };
                let children = instance.borrow_mut().render(&props);
                self.reconcile_children(current, wip, &children)
            }
            FiberTag::Memo { memo } => match current {
                None => {
                    if let Some(component) = memo.simple_component() {
                        let component = component.clone();
                        self.arena.get_mut(wip)?.tag = FiberTag::SimpleMemo {
                            memo: memo.clone(),
                            component: component.clone(),
                            hooks: Vec::new(),
                        };
                        return self.update_function_component(None, wip, &component);
                    }
                    let props = memo.resolve_props(&self.arena.get(wip)?.pending_props);
                    let child = self
                        .arena
                        .create_from_element(&Element::new(memo.wrapped().clone(), props));
                    self.arena.get_mut(child)?.parent = Some(wip);
                    self.arena.get_mut(wip)?.child = Some(child);
                    Ok(Some(child))
                }
                Some(current) => {
                    let (previous, current_child) = {
                        let fiber = self.arena.get(current)?;
                        (fiber.memoized_props.clone(), fiber.child)
                    };
                    let next = memo.resolve_props(&self.arena.get(wip)?.pending_props);
                    let unchanged = previous
                        .map(|previous| memo.resolve_props(&previous))
                        .is_some_and(|previous| memo.props_equal(&previous, &next));
                    if unchanged && !had_lanes {
                        trace!(fiber = ?wip, "memo bailout");
                        return self.bailout_on_already_finished_work(wip);
                    }
                    let child = match current_child {
                        Some(current_child) => self.arena.create_work_in_progress(current_child, next)?,
                        None => self
                            .arena
                            .create_from_element(&Element::new(memo.wrapped().clone(), next)),
                    };
                    let fiber = self.arena.get_mut(child)?;
                    fiber.parent = Some(wip);
                    fiber.sibling = None;
                    fiber.index = 0;
                    self.arena.get_mut(wip)?.child = Some(child);
                    Ok(Some(child))
                }
            },
            FiberTag::SimpleMemo { memo, component, .. } => {
                if let Some(current) = current
                    && !had_lanes
                {
                    let unchanged = {
                        let previous = &self.arena.get(current)?.memoized_props;
                        let next = &self.arena.get(wip)?.pending_props;
                        previous
                            .as_ref()
                            .is_some_and(|previous| memo.props_equal(previous, next))
                    };
                    if unchanged {
                        trace!(fiber = ?wip, "simple memo bailout");
                        return self.bailout_on_already_finished_work(wip);
                    }
                }
                self.update_function_component(current, wip, &component)
            }
            FiberTag::Provider { provider } => {
                let context = provider.context.clone();
                let props = self.arena.get(wip)?.pending_props.clone();
                let previous = match current {
                    Some(current) => self.arena.get(current)?.memoized_props.clone(),
                    None => None,
                };
                self.contexts.push(&context, &props);
                if let Some(previous) = previous {
                    let changed = context.value_changed(&previous, &props);
                    if !changed && !had_lanes && previous.children().is_same(props.children()) {
                        return self.bailout_on_already_finished_work(wip);
                    }
                    if changed {
                        self.propagate_context_change(wip, context.context_id())?;
                    }
                }
                let children = props.children().clone();
                self.reconcile_children(current, wip, &children)
            }
        }
    }

    fn reconcile_children(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        children: &Node,
    ) -> Result<Option<FiberId>> {
        let current_child = match current {
            Some(current) => self.arena.get(current)?.child,
            None => None,
        };
        let first = ChildReconciler::for_parent(current.is_some()).reconcile_child_fibers(
            self.arena,
            wip,
            current_child,
            children,
        )?;
        self.arena.get_mut(wip)?.child = first;
        Ok(first)
    }

    fn update_host_component(&mut self, current: Option<FiberId>, wip: FiberId) -> Result<Option<FiberId>> {
        let children = self.arena.get(wip)?.pending_props.children().clone();
        if children.as_text().is_some() {
            // Direct text is applied as content in complete_work.
            self.reconcile_children(current, wip, &Node::Empty)?;
            return Ok(None);
        }
        self.reconcile_children(current, wip, &children)
    }

    fn update_function_component(
        &mut self,
        current: Option<FiberId>,
        wip: FiberId,
        component: &Component,
    ) -> Result<Option<FiberId>> {
        let (props, previous) = {
            let fiber = self.arena.get_mut(wip)?;
            let previous = fiber.hooks_mut().map(std::mem::take).unwrap_or_default();
            (fiber.pending_props.clone(), previous)
        };
        let output = render_with_hooks(
            wip,
            component,
            &props,
            previous,
            current.is_none(),
            self.updates.clone(),
        )?;

        let fiber = self.arena.get_mut(wip)?;
        if let Some(hooks) = fiber.hooks_mut() {
            *hooks = output.hooks;
        }
        fiber.effects = output.effects;
        fiber.flags |= output.flags;
        fiber.dependencies = output.dependencies;
        self.reconcile_children(current, wip, &output.children)
    }

    fn bailout_on_already_finished_work(&mut self, wip: FiberId) -> Result<Option<FiberId>> {
        let child_lanes = self.arena.get(wip)?.child_lanes;
        if !child_lanes.includes_some(self.render_lanes) {
            return Ok(None);
        }
        self.clone_child_fibers(wip)
    }

    /// Give every committed child of `wip` a work-in-progress copy.
    fn clone_child_fibers(&mut self, wip: FiberId) -> Result<Option<FiberId>> {
        let mut next_current = self.arena.get(wip)?.child;
        let mut first = None;
        let mut previous: Option<FiberId> = None;
        while let Some(current_child) = next_current {
            let (props, sibling) = {
                let fiber = self.arena.get(current_child)?;
                (fiber.pending_props.clone(), fiber.sibling)
            };
            let clone = self.arena.create_work_in_progress(current_child, props)?;
            let fiber = self.arena.get_mut(clone)?;
            fiber.parent = Some(wip);
            fiber.sibling = None;
            match previous {
                Some(previous) => self.arena.get_mut(previous)?.sibling = Some(clone),
                None => first = Some(clone),
            }
            previous = Some(clone);
            next_current = sibling;
        }
        self.arena.get_mut(wip)?.child = first;
        Ok(first)
    }

    /// Schedule every consumer of `context` under `provider` for this pass.
    fn propagate_context_change(&mut self, provider_fiber: FiberId, context: ContextId) -> Result<()> {
        let render_lanes = self.render_lanes;
        // (fiber, depth) in pre-order; `path` holds the ancestors below the provider.
        let mut stack: Vec<(FiberId, usize)> = Vec::new();
        let mut path: Vec<FiberId> = Vec::new();
        if let Some(child) = self.arena.get(provider_fiber)?.child {
            stack.push((child, 0));
        }
        while let Some((id, depth)) = stack.pop() {
            path.truncate(depth);
            let fiber = self.arena.get(id)?;
            if let Some(sibling) = fiber.sibling {
                stack.push((sibling, depth));
            }
            let nested_same_provider = matches!(
                &fiber.tag,
                FiberTag::Provider { provider } if provider.context.context_id() == context
            );
            let depends = fiber.dependencies.contains(&context);
            let child = fiber.child;

            if depends {
                self.mark_lanes(id, render_lanes)?;
                for &ancestor in &path {
                    self.mark_child_lanes(ancestor, render_lanes)?;
                }
                trace!(fiber = ?id, "context consumer scheduled");
            }
            if !nested_same_provider && let Some(child) = child {
                path.push(id);
                stack.push((child, depth + 1));
            }
        }
        Ok(())
    }

    fn mark_lanes(&mut self, id: FiberId, lanes: Lanes) -> Result<()> {
        let fiber = self.arena.get_mut(id)?;
        fiber.lanes |= lanes;
        if let Some(alternate) = fiber.alternate
            && let Some(alternate) = self.arena.try_get_mut(alternate)
        {
            alternate.lanes |= lanes;
        }
        Ok(())
    }

    fn mark_child_lanes(&mut self, id: FiberId, lanes: Lanes) -> Result<()> {
        let fiber = self.arena.get_mut(id)?;
        fiber.child_lanes |= lanes;
        if let Some(alternate) = fiber.alternate
            && let Some(alternate) = self.arena.try_get_mut(alternate)
        {
            alternate.child_lanes |= lanes;
        }
        Ok(())
    }
}
