#![forbid(unsafe_code)]

//! Hook engine: per-component state that survives across renders.
//!
//! A component receives a [`RenderCx`] for the duration of one render. Each
//! `use_*` call consumes the next hook slot: on mount a record is allocated,
//! on update the record at the same position in the previous render's list is
//! read and carried into the new list. The list must have the same length and
//! call order on every render; a mismatch fails the render pass with
//! [`ReconcileError::HookOrderMismatch`].
//!
//! State lives in shared cells owned by the fiber pair. A [`Dispatch`]
//! writes the next value into its cell immediately and queues an update for
//! the owning fiber; the render it triggers reads the new value.
//!
//! Effects whose dependencies did not change are neither re-registered nor
//! flagged. Changed effects are appended to the fiber's effect list and the
//! fiber is flagged `UPDATE` (layout) or `PASSIVE` (passive).

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use smallvec::SmallVec;
use tracing::warn;

use crate::context::{Context, ContextId};
use crate::element::{Callback, Component, Node, PropValue, Props};
use crate::error::{ReconcileError, Result};
use crate::fiber::FiberId;
use crate::flags::Flags;
use crate::lanes::request_update_lane;
use crate::update_queue::{UpdateQueue, UpdateRequest};

/// Cleanup returned by an effect setup.
pub type Teardown = Box<dyn FnOnce()>;

pub(crate) type TeardownSlot = Rc<RefCell<Option<Teardown>>>;

type Setup = Box<dyn FnOnce() -> Option<Teardown>>;

/// When an effect runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectPhase {
    /// During the mutation pass, right after host changes are applied.
    Layout,
    /// In a separate task after the commit.
    Passive,
}

impl EffectPhase {
    fn flag(self) -> Flags {
        match self {
            Self::Layout => Flags::UPDATE,
            Self::Passive => Flags::PASSIVE,
        }
    }
}

/// An effect registered by the latest render.
pub(crate) struct EffectRecord {
    pub(crate) phase: EffectPhase,
    setup: Option<Setup>,
    destroy: TeardownSlot,
}

impl EffectRecord {
    /// Run the previous teardown, then the setup. Runs at most once.
    pub(crate) fn run(&mut self) {
        let Some(setup) = self.setup.take() else {
            return;
        };
        run_teardown(&self.destroy);
        let teardown = setup();
        *self.destroy.borrow_mut() = teardown;
    }

    pub(crate) fn is_pending(&self) -> bool {
        self.setup.is_some()
    }
}

/// Take and run the teardown stored in `slot`, if any.
pub(crate) fn run_teardown(slot: &TeardownSlot) {
    let teardown = slot.borrow_mut().take();
    if let Some(teardown) = teardown {
        teardown();
    }
}

/// Dependency list gating memoized values and effects.
///
/// [`Deps::every_render`] (the default) never matches, so the hook re-runs
/// on every render. An empty list always matches after the first render.
#[derive(Clone, Default)]
pub struct Deps(Option<SmallVec<[PropValue; 4]>>);

impl Deps {
    /// Re-run on every render.
    pub fn every_render() -> Self {
        Self(None)
    }

    pub fn from_values(values: impl IntoIterator<Item = PropValue>) -> Self {
        Self(Some(values.into_iter().collect()))
    }

    /// Element-wise identity comparison. An absent list never matches.
    pub fn matches(&self, previous: &Deps) -> bool {
        match (&self.0, &previous.0) {
            (Some(next), Some(prev)) => {
                next.len() == prev.len() && next.iter().zip(prev.iter()).all(|(a, b)| a.is_same(b))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(values) => f.debug_list().entries(values.iter()).finish(),
            None => f.write_str("EveryRender"),
        }
    }
}

impl<T: Into<PropValue>> FromIterator<T> for Deps {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_values(iter.into_iter().map(Into::into))
    }
}

/// Build a [`Deps`] list from values convertible to [`PropValue`].
///
/// `deps![]` is the empty list (run once); `deps![a, b]` compares `a` and `b`.
#[macro_export]
macro_rules! deps {
    () => {
        $crate::hooks::Deps::from_values(::std::iter::empty())
    };
    ($($value:expr),+ $(,)?) => {
        $crate::hooks::Deps::from_values([$($crate::element::PropValue::from($value)),+])
    };
}

/// Stable handle that applies actions to a reducer cell.
pub struct Dispatch<A> {
    inner: Rc<dyn Fn(A)>,
}

impl<A> Clone for Dispatch<A> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<A> fmt::Debug for Dispatch<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatch(..)")
    }
}

impl<A> Dispatch<A> {
    /// Apply `action` and schedule a re-render of the owning component.
    ///
    /// Dispatching after the component unmounted does nothing.
    pub fn dispatch(&self, action: A) {
        (self.inner)(action)
    }

    /// Same dispatcher (same hook of the same component instance).
    pub fn ptr_eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.inner), Rc::as_ptr(&other.inner))
    }
}

/// Action accepted by a [`Setter`].
pub enum StateAction<S> {
    Replace(S),
    Update(Box<dyn FnOnce(&S) -> S>),
}

/// Setter half of [`RenderCx::use_state`].
pub struct Setter<S>(Dispatch<StateAction<S>>);

impl<S> Clone for Setter<S> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<S> fmt::Debug for Setter<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Setter(..)")
    }
}

impl<S: 'static> Setter<S> {
    pub fn set(&self, value: S) {
        self.0.dispatch(StateAction::Replace(value));
    }

    /// Compute the next value from the latest one.
    pub fn update(&self, f: impl FnOnce(&S) -> S + 'static) {
        self.0.dispatch(StateAction::Update(Box::new(f)));
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

fn basic_state_reducer<S>(state: &S, action: StateAction<S>) -> S {
    match action {
        StateAction::Replace(value) => value,
        StateAction::Update(f) => f(state),
    }
}

type Reducer<S, A> = Rc<dyn Fn(&S, A) -> S>;

struct StateSlot<S, A> {
    value: RefCell<S>,
    reducer: RefCell<Reducer<S, A>>,
    dispatch: Dispatch<A>,
}

/// One hook slot.
#[derive(Clone)]
pub(crate) enum HookRecord {
    State(Rc<dyn Any>),
    Memo { value: Rc<dyn Any>, deps: Deps },
    Callback { callback: Callback, deps: Deps },
    Ref(Rc<dyn Any>),
    Effect {
        phase: EffectPhase,
        deps: Deps,
        destroy: TeardownSlot,
    },
}

impl HookRecord {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::State(_) => "state",
            Self::Memo { .. } => "memo",
            Self::Callback { .. } => "callback",
            Self::Ref(_) => "ref",
            Self::Effect {
                phase: EffectPhase::Layout,
                ..
            } => "layout effect",
            Self::Effect {
                phase: EffectPhase::Passive,
                ..
            } => "passive effect",
        }
    }

    /// Teardown slot and phase of an effect hook.
    pub(crate) fn effect_teardown(&self) -> Option<(EffectPhase, &TeardownSlot)> {
        match self {
            Self::Effect { phase, destroy, .. } => Some((*phase, destroy)),
            _ => None,
        }
    }
}

/// Everything a function component render produced.
pub(crate) struct RenderOutput {
    pub(crate) children: Node,
    pub(crate) hooks: Vec<HookRecord>,
    pub(crate) effects: Vec<EffectRecord>,
    pub(crate) flags: Flags,
    pub(crate) dependencies: SmallVec<[ContextId; 2]>,
}

/// Per-render hook context handed to a function component.
pub struct RenderCx {
    fiber: FiberId,
    component: Component,
    previous: Vec<HookRecord>,
    hooks: Vec<HookRecord>,
    is_mount: bool,
    effects: Vec<EffectRecord>,
    flags: Flags,
    updates: Rc<UpdateQueue>,
    dependencies: SmallVec<[ContextId; 2]>,
    mismatch: Option<ReconcileError>,
}

impl fmt::Debug for RenderCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderCx")
            .field("fiber", &self.fiber)
            .field("component", &self.component.name())
            .field("cursor", &self.hooks.len())
            .field("is_mount", &self.is_mount)
            .finish()
    }
}

/// Render `component` for `fiber`, reading `previous` hooks unless mounting.
pub(crate) fn render_with_hooks(
    fiber: FiberId,
    component: &Component,
    props: &Props,
    previous: Vec<HookRecord>,
    is_mount: bool,
    updates: Rc<UpdateQueue>,
) -> Result<RenderOutput> {
    let mut cx = RenderCx {
        fiber,
        component: component.clone(),
        hooks: Vec::with_capacity(previous.len()),
        previous,
        is_mount,
        effects: Vec::new(),
        flags: Flags::empty(),
        updates,
        dependencies: SmallVec::new(),
        mismatch: None,
    };
    let children = component.render(&mut cx, props);
    cx.finish(children)
}

impl RenderCx {
    /// Fiber being rendered.
    pub fn fiber(&self) -> FiberId {
        self.fiber
    }

    /// Whether this is the component's first render.
    pub fn is_mount(&self) -> bool {
        self.is_mount
    }

    fn finish(mut self, children: Node) -> Result<RenderOutput> {
        if let Some(err) = self.mismatch.take() {
            return Err(err);
        }
        if !self.is_mount && self.hooks.len() != self.previous.len() {
            let index = self.hooks.len().min(self.previous.len());
            let expected = self.previous.get(index).map_or("nothing", HookRecord::kind_name);
            let found = self.hooks.get(index).map_or("nothing", HookRecord::kind_name);
            return Err(self.mismatch_error(index, expected, found));
        }
        Ok(RenderOutput {
            children,
            hooks: self.hooks,
            effects: self.effects,
            flags: self.flags,
            dependencies: self.dependencies,
        })
    }

    fn mismatch_error(&self, index: usize, expected: &'static str, found: &'static str) -> ReconcileError {
        ReconcileError::HookOrderMismatch {
            component: self.component.name().to_string(),
            index,
            expected,
            found,
        }
    }

    fn record_mismatch(&mut self, expected: &'static str, found: &'static str) {
        if self.mismatch.is_none() {
            let err = self.mismatch_error(self.hooks.len(), expected, found);
            warn!(error = %err, "hook order changed between renders");
            self.mismatch = Some(err);
        }
    }

    /// Previous record at the cursor, or `None` when mounting.
    fn previous_hook(&mut self, found: &'static str) -> Option<HookRecord> {
        if self.is_mount {
            return None;
        }
        let record = self.previous.get(self.hooks.len()).cloned();
        if record.is_none() {
            self.record_mismatch("nothing", found);
        }
        record
    }

    /// Reducer-backed state. `reducer` from the latest render is the one
    /// dispatches apply.
    pub fn use_reducer<S, A>(
        &mut self,
        reducer: impl Fn(&S, A) -> S + 'static,
        initial: S,
    ) -> (S, Dispatch<A>)
    where
        S: Clone + 'static,
        A: 'static,
    {
        let reducer: Reducer<S, A> = Rc::new(reducer);
        let existing = match self.previous_hook("state") {
            Some(HookRecord::State(slot)) => match slot.downcast::<StateSlot<S, A>>() {
                Ok(slot) => Some(slot),
                Err(_) => {
                    self.record_mismatch("state", "state of another type");
                    None
                }
            },
            Some(other) => {
                self.record_mismatch(other.kind_name(), "state");
                None
            }
            None => None,
        };

        let slot = match existing {
            Some(slot) => {
                *slot.reducer.borrow_mut() = reducer;
                slot
            }
            None => self.mount_state_slot(reducer, initial),
        };
        let value = slot.value.borrow().clone();
        let dispatch = slot.dispatch.clone();
        self.hooks.push(HookRecord::State(slot));
        (value, dispatch)
    }

    fn mount_state_slot<S, A>(&self, reducer: Reducer<S, A>, initial: S) -> Rc<StateSlot<S, A>>
    where
        S: 'static,
        A: 'static,
    {
        let fiber = self.fiber;
        let updates = Rc::downgrade(&self.updates);
        Rc::new_cyclic(|weak: &Weak<StateSlot<S, A>>| {
            let weak = weak.clone();
            let dispatch = Dispatch {
                inner: Rc::new(move |action: A| {
                    let Some(slot) = weak.upgrade() else {
                        return;
                    };
                    let reducer = slot.reducer.borrow().clone();
                    let next = reducer(&slot.value.borrow(), action);
                    *slot.value.borrow_mut() = next;
                    if let Some(updates) = updates.upgrade() {
                        updates.enqueue(UpdateRequest::Fiber {
                            fiber,
                            lane: request_update_lane(),
                        });
                    }
                }),
            };
            StateSlot {
                value: RefCell::new(initial),
                reducer: RefCell::new(reducer),
                dispatch,
            }
        })
    }

    /// Plain state: a reducer whose action replaces (or maps) the value.
    pub fn use_state<S: Clone + 'static>(&mut self, initial: S) -> (S, Setter<S>) {
        let (value, dispatch) = self.use_reducer(basic_state_reducer::<S>, initial);
        (value, Setter(dispatch))
    }

    /// Value recomputed only when `deps` change.
    pub fn use_memo<T: 'static>(&mut self, compute: impl FnOnce() -> T, deps: Deps) -> Rc<T> {
        if let Some(previous) = self.previous_hook("memo") {
            match previous {
                HookRecord::Memo {
                    value,
                    deps: prev_deps,
                } => match value.downcast::<T>() {
                    Ok(value) if deps.matches(&prev_deps) => {
                        self.hooks.push(HookRecord::Memo {
                            value: value.clone(),
                            deps: prev_deps,
                        });
                        return value;
                    }
                    Ok(_) => {}
                    Err(_) => self.record_mismatch("memo", "memo of another type"),
                },
                other => self.record_mismatch(other.kind_name(), "memo"),
            }
        }
        let value = Rc::new(compute());
        self.hooks.push(HookRecord::Memo {
            value: value.clone(),
            deps,
        });
        value
    }

    /// Callback whose identity only changes when `deps` change.
    pub fn use_callback(&mut self, f: impl Fn(&PropValue) + 'static, deps: Deps) -> Callback {
        if let Some(previous) = self.previous_hook("callback") {
            match previous {
                HookRecord::Callback {
                    callback,
                    deps: prev_deps,
                } if deps.matches(&prev_deps) => {
                    self.hooks.push(HookRecord::Callback {
                        callback: callback.clone(),
                        deps: prev_deps,
                    });
                    return callback;
                }
                HookRecord::Callback { .. } => {}
                other => self.record_mismatch(other.kind_name(), "callback"),
            }
        }
        let callback = Callback::new(f);
        self.hooks.push(HookRecord::Callback {
            callback: callback.clone(),
            deps,
        });
        callback
    }

    /// Mutable cell allocated on mount and stable for the component's life.
    pub fn use_ref<T: 'static>(&mut self, initial: impl FnOnce() -> T) -> Rc<RefCell<T>> {
        if let Some(previous) = self.previous_hook("ref") {
            match previous {
                HookRecord::Ref(cell) => match cell.clone().downcast::<RefCell<T>>() {
                    Ok(cell) => {
                        self.hooks.push(HookRecord::Ref(cell.clone()));
                        return cell;
                    }
                    Err(_) => self.record_mismatch("ref", "ref of another type"),
                },
                other => self.record_mismatch(other.kind_name(), "ref"),
            }
        }
        let cell = Rc::new(RefCell::new(initial()));
        self.hooks.push(HookRecord::Ref(cell.clone()));
        cell
    }

    /// Effect run after the commit, in the passive pass.
    pub fn use_effect(&mut self, setup: impl FnOnce() -> Option<Teardown> + 'static, deps: Deps) {
        self.push_effect(EffectPhase::Passive, Box::new(setup), deps);
    }

    /// Effect run during the mutation pass, right after host changes.
    pub fn use_layout_effect(
        &mut self,
        setup: impl FnOnce() -> Option<Teardown> + 'static,
        deps: Deps,
    ) {
        self.push_effect(EffectPhase::Layout, Box::new(setup), deps);
    }

    fn push_effect(&mut self, phase: EffectPhase, setup: Setup, deps: Deps) {
        let found = match phase {
            EffectPhase::Layout => "layout effect",
            EffectPhase::Passive => "passive effect",
        };
        let mut destroy: Option<TeardownSlot> = None;
        if let Some(previous) = self.previous_hook(found) {
            match previous {
                HookRecord::Effect {
                    phase: prev_phase,
                    deps: prev_deps,
                    destroy: prev_destroy,
                } if prev_phase == phase => {
                    if deps.matches(&prev_deps) {
                        self.hooks.push(HookRecord::Effect {
                            phase,
                            deps: prev_deps,
                            destroy: prev_destroy,
                        });
                        return;
                    }
                    destroy = Some(prev_destroy);
                }
                other => self.record_mismatch(other.kind_name(), found),
            }
        }
        let destroy = destroy.unwrap_or_default();
        self.flags |= phase.flag();
        self.effects.push(EffectRecord {
            phase,
            setup: Some(setup),
            destroy: destroy.clone(),
        });
        self.hooks.push(HookRecord::Effect {
            phase,
            deps,
            destroy,
        });
    }

    /// Value of `context` at this point of the tree. Re-renders the
    /// component when an enclosing provider's value changes.
    pub fn use_context<T: Clone + PartialEq + 'static>(&mut self, context: &Context<T>) -> T {
        let id = context.id();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        context.current()
    }
}
