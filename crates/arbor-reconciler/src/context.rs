#![forbid(unsafe_code)]

//! Context values scoped by provider nesting.
//!
//! A [`Context`] owns one live value cell. Entering a provider during
//! `begin_work` pushes the cell's old value onto the [`ContextStack`] and
//! writes the provider's value; leaving it during `complete_work` pops and
//! restores. Reads are a plain cell read, no tree walk.
//!
//! # Invariants
//!
//! 1. Pushes and pops are strictly nested with the depth-first render walk.
//! 2. Outside a render pass every cell holds its default value.
//! 3. [`ContextStack::unwind`] restores every cell when a pass is abandoned.
//! 4. While a pass is yielded its providers are suspended: the cells hold the
//!    values from before the pass, and [`ContextStack::resume`] re-enters them.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::element::{Element, ElementType, Node, PropValue, Props, ProviderType};

/// Identifies a context across clones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Prop carrying a provider's value.
pub(crate) const PROVIDER_VALUE_PROP: &str = "value";

struct ContextInner<T> {
    id: ContextId,
    current: RefCell<T>,
}

/// A context carrying values of type `T` down the tree.
pub struct Context<T> {
    inner: Rc<ContextInner<T>>,
}

impl<T> Clone for Context<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Context<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("current", &*self.inner.current.borrow())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> Context<T> {
    /// New context whose value is `default` outside any provider.
    pub fn new(default: T) -> Self {
        Self {
            inner: Rc::new(ContextInner {
                id: ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed)),
                current: RefCell::new(default),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    /// Value visible at the current point of the render walk.
    pub fn current(&self) -> T {
        self.inner.current.borrow().clone()
    }

    /// Provider element supplying `value` to `children`.
    pub fn provider(&self, value: T, children: impl Into<Node>) -> Element {
        let ty = ElementType::Provider(ProviderType {
            context: Rc::new(self.clone()),
        });
        let props = Props::new()
            .with(PROVIDER_VALUE_PROP, PropValue::opaque(value))
            .with_children(children);
        Element::new(ty, props)
    }
}

/// Type-erased context operations used by the render walk.
pub(crate) trait AnyContext {
    fn context_id(&self) -> ContextId;

    /// Write the provider value from `props`, returning the value it replaced.
    fn push_value(&self, props: &Props) -> Box<dyn Any>;

    /// Put back a value returned by `push_value`.
    fn restore_value(&self, previous: Box<dyn Any>);

    /// Write `value` into the cell and return what it held.
    fn swap_value(&self, value: Box<dyn Any>) -> Box<dyn Any>;

    /// Whether the provider value differs between two props objects.
    fn value_changed(&self, previous: &Props, next: &Props) -> bool;
}

impl<T: Clone + PartialEq + 'static> Context<T> {
    fn value_in(props: &Props) -> Option<Rc<T>> {
        props.get(PROVIDER_VALUE_PROP).and_then(PropValue::downcast::<T>)
    }
}

impl<T: Clone + PartialEq + 'static> AnyContext for Context<T> {
    fn context_id(&self) -> ContextId {
        self.inner.id
    }

    fn push_value(&self, props: &Props) -> Box<dyn Any> {
        let mut cell = self.inner.current.borrow_mut();
        let next = match Self::value_in(props) {
            Some(value) => (*value).clone(),
            None => cell.clone(),
        };
        Box::new(std::mem::replace(&mut *cell, next))
    }

    fn restore_value(&self, previous: Box<dyn Any>) {
        if let Ok(previous) = previous.downcast::<T>() {
            *self.inner.current.borrow_mut() = *previous;
        }
    }

    fn swap_value(&self, value: Box<dyn Any>) -> Box<dyn Any> {
        match value.downcast::<T>() {
            Ok(value) => Box::new(std::mem::replace(&mut *self.inner.current.borrow_mut(), *value)),
            Err(value) => value,
        }
    }

    fn value_changed(&self, previous: &Props, next: &Props) -> bool {
        match (Self::value_in(previous), Self::value_in(next)) {
            (Some(a), Some(b)) => *a != *b,
            (None, None) => false,
            _ => true,
        }
    }
}

/// Saved context values of the providers currently entered.
///
/// Each entry holds the value its cell had before the provider was entered,
/// or the provider's own value while the stack is suspended.
#[derive(Default)]
pub(crate) struct ContextStack {
    entries: Vec<(Rc<dyn AnyContext>, Box<dyn Any>)>,
    suspended: bool,
}

impl ContextStack {
    pub(crate) fn push(&mut self, context: &Rc<dyn AnyContext>, props: &Props) {
        let previous = context.push_value(props);
        self.entries.push((context.clone(), previous));
    }

    /// Pop the innermost provider of `context`.
    pub(crate) fn pop(&mut self, context: &Rc<dyn AnyContext>) {
        if let Some((entered, previous)) = self.entries.pop() {
            debug_assert_eq!(entered.context_id(), context.context_id());
            entered.restore_value(previous);
        }
    }

    /// Restore every cell, innermost first.
    pub(crate) fn unwind(&mut self) {
        if std::mem::take(&mut self.suspended) {
            self.entries.clear();
            return;
        }
        while let Some((context, previous)) = self.entries.pop() {
            context.restore_value(previous);
        }
    }

    /// Leave every entered provider without forgetting it, so code running
    /// while the pass is yielded reads the values from outside the pass.
    pub(crate) fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        for (context, saved) in self.entries.iter_mut().rev() {
            let value = std::mem::replace(saved, Box::new(()));
            *saved = context.swap_value(value);
        }
        self.suspended = true;
    }

    /// Re-enter the providers left by [`ContextStack::suspend`], outermost first.
    pub(crate) fn resume(&mut self) {
        if !std::mem::take(&mut self.suspended) {
            return;
        }
        for (context, saved) in self.entries.iter_mut() {
            let value = std::mem::replace(saved, Box::new(()));
            *saved = context.swap_value(value);
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for ContextStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStack")
            .field("depth", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_parts<T: Clone + PartialEq + 'static>(
        context: &Context<T>,
        value: T,
    ) -> (Rc<dyn AnyContext>, Props) {
        let element = context.provider(value, Node::Empty);
        match element.ty {
            ElementType::Provider(provider) => (provider.context, element.props),
            _ => unreachable!("provider() builds a provider element"),
        }
    }

    #[test]
    fn nested_providers_restore_in_stack_order() {
        let theme = Context::new("default".to_string());
        let mut stack = ContextStack::default();
        let mut trace = vec![theme.current()];

        let (outer_cx, outer) = provider_parts(&theme, "outer".to_string());
        let (inner_cx, inner) = provider_parts(&theme, "inner".to_string());

        stack.push(&outer_cx, &outer);
        trace.push(theme.current());
        stack.push(&inner_cx, &inner);
        trace.push(theme.current());
        stack.pop(&inner_cx);
        trace.push(theme.current());
        stack.pop(&outer_cx);
        trace.push(theme.current());

        assert_eq!(trace, ["default", "outer", "inner", "outer", "default"]);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn unwind_restores_defaults() {
        let depth = Context::new(0);
        let mut stack = ContextStack::default();
        for value in 1..=3 {
            let (cx, props) = provider_parts(&depth, value);
            stack.push(&cx, &props);
        }
        assert_eq!(depth.current(), 3);
        stack.unwind();
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn suspended_providers_are_invisible_until_resumed() {
        let depth = Context::new(0);
        let mut stack = ContextStack::default();
        for value in 1..=2 {
            let (cx, props) = provider_parts(&depth, value);
            stack.push(&cx, &props);
        }
        assert_eq!(depth.current(), 2);

        stack.suspend();
        assert_eq!(depth.current(), 0);
        stack.suspend();
        assert_eq!(depth.current(), 0);

        stack.resume();
        assert_eq!(depth.current(), 2);
        let (cx, _) = provider_parts(&depth, 0);
        stack.pop(&cx);
        assert_eq!(depth.current(), 1);
        stack.pop(&cx);
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn unwinding_a_suspended_stack_keeps_defaults() {
        let depth = Context::new(0);
        let mut stack = ContextStack::default();
        let (cx, props) = provider_parts(&depth, 7);
        stack.push(&cx, &props);
        stack.suspend();
        stack.unwind();
        assert_eq!(depth.current(), 0);
        assert_eq!(stack.depth(), 0);
        stack.resume();
        assert_eq!(depth.current(), 0);
    }

    #[test]
    fn value_change_compares_by_value() {
        let count = Context::new(0);
        let (cx, a) = provider_parts(&count, 1);
        let (_, b) = provider_parts(&count, 1);
        let (_, c) = provider_parts(&count, 2);
        assert!(!cx.value_changed(&a, &b));
        assert!(cx.value_changed(&a, &c));
    }

    #[test]
    fn providers_of_one_context_share_type() {
        let count = Context::new(0);
        let a = count.provider(1, Node::Empty);
        let b = count.clone().provider(2, Node::Empty);
        assert!(a.ty.same_type(&b.ty));
        let other = Context::new(0);
        assert!(!a.ty.same_type(&other.provider(1, Node::Empty).ty));
    }
}
