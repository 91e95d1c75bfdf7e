#![forbid(unsafe_code)]

//! Fiber arena: the dual-buffered tree.
//!
//! Fibers live in a generational [`SlotMap`] and refer to each other by
//! [`FiberId`]. Each logical component instance owns at most two slots, the
//! committed (`current`) fiber and its work-in-progress copy, linked both ways
//! through `alternate`. A commit swaps the roles of the pair by switching the
//! root's `current` pointer; nothing is copied.
//!
//! # Invariants
//!
//! 1. `a.alternate == Some(b)` implies `b.alternate == Some(a)`.
//! 2. Sibling chains never cycle; a child's `parent` names the fiber that
//!    reconciled it in the latest pass that visited it.
//! 3. Slots allocated during a render pass are recorded until the pass
//!    commits, so a discarded pass can free them.

use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::context::ContextId;
use crate::element::{
    ClassInstance, ClassType, Component, Element, ElementType, Key, MemoType, Node, PropValue,
    Props, ProviderType,
};
use crate::error::{ReconcileError, Result};
use crate::flags::Flags;
use crate::hooks::{EffectRecord, HookRecord};
use crate::host::HostHandle;
use crate::lanes::Lanes;

new_key_type! {
    /// Arena index of a fiber.
    pub struct FiberId;
}

/// Kind of a fiber, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiberKind {
    RootContainer,
    HostElement,
    TextLeaf,
    FunctionComponent,
    ClassComponent,
    Fragment,
    MemoComponent,
    SimpleMemoComponent,
    ContextProvider,
}

/// One property change computed by `complete_work` for the commit pass.
#[derive(Debug, Clone)]
pub(crate) enum PropChange {
    /// Set (or with `Null`, remove) an attribute.
    Set(Rc<str>, PropValue),
    /// Replace the element's direct text.
    Text(Rc<str>),
}

/// Per-kind payload.
#[derive(Clone)]
pub(crate) enum FiberTag {
    Root {
        element: Node,
    },
    Host {
        tag: Rc<str>,
        update_payload: Option<Vec<PropChange>>,
    },
    Text {
        text: Rc<str>,
    },
    Function {
        component: Component,
        hooks: Vec<HookRecord>,
    },
    Class {
        class: ClassType,
        instance: Option<ClassInstance>,
    },
    Fragment,
    Memo {
        memo: MemoType,
    },
    SimpleMemo {
        memo: MemoType,
        component: Component,
        hooks: Vec<HookRecord>,
    },
    Provider {
        provider: ProviderType,
    },
}

impl FiberTag {
    pub(crate) fn kind(&self) -> FiberKind {
        match self {
            Self::Root { .. } => FiberKind::RootContainer,
            Self::Host { .. } => FiberKind::HostElement,
            Self::Text { .. } => FiberKind::TextLeaf,
            Self::Function { .. } => FiberKind::FunctionComponent,
            Self::Class { .. } => FiberKind::ClassComponent,
            Self::Fragment => FiberKind::Fragment,
            Self::Memo { .. } => FiberKind::MemoComponent,
            Self::SimpleMemo { .. } => FiberKind::SimpleMemoComponent,
            Self::Provider { .. } => FiberKind::ContextProvider,
        }
    }

    fn from_type(ty: &ElementType) -> Self {
        match ty {
            ElementType::Host(tag) => Self::Host {
                tag: tag.clone(),
                update_payload: None,
            },
            ElementType::Function(component) => Self::Function {
                component: component.clone(),
                hooks: Vec::new(),
            },
            ElementType::Class(class) => Self::Class {
                class: class.clone(),
                instance: None,
            },
            ElementType::Fragment => Self::Fragment,
            ElementType::Memo(memo) => Self::Memo { memo: memo.clone() },
            ElementType::Provider(provider) => Self::Provider {
                provider: provider.clone(),
            },
        }
    }
}

/// A node of the current or work-in-progress tree.
pub struct Fiber {
    pub(crate) tag: FiberTag,
    pub(crate) key: Option<Key>,
    /// `None` for the root and text leaves.
    pub(crate) element_type: Option<ElementType>,
    pub(crate) pending_props: Props,
    /// `None` until the fiber has rendered once.
    pub(crate) memoized_props: Option<Props>,
    pub(crate) host_handle: Option<HostHandle>,

    pub(crate) parent: Option<FiberId>,
    pub(crate) child: Option<FiberId>,
    pub(crate) sibling: Option<FiberId>,
    pub(crate) index: usize,

    pub(crate) flags: Flags,
    pub(crate) subtree_flags: Flags,
    pub(crate) alternate: Option<FiberId>,
    pub(crate) deletions: Vec<FiberId>,

    pub(crate) lanes: Lanes,
    pub(crate) child_lanes: Lanes,

    /// Effects registered by the latest render, oldest first.
    pub(crate) effects: Vec<EffectRecord>,
    pub(crate) dependencies: SmallVec<[ContextId; 2]>,
}

impl Fiber {
    fn new(tag: FiberTag, key: Option<Key>, element_type: Option<ElementType>, props: Props) -> Self {
        Self {
            tag,
            key,
            element_type,
            pending_props: props,
            memoized_props: None,
            host_handle: None,
            parent: None,
            child: None,
            sibling: None,
            index: 0,
            flags: Flags::empty(),
            subtree_flags: Flags::empty(),
            alternate: None,
            deletions: Vec::new(),
            lanes: Lanes::NONE,
            child_lanes: Lanes::NONE,
            effects: Vec::new(),
            dependencies: SmallVec::new(),
        }
    }

    pub fn kind(&self) -> FiberKind {
        self.tag.kind()
    }

    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn alternate(&self) -> Option<FiberId> {
        self.alternate
    }

    pub fn child(&self) -> Option<FiberId> {
        self.child
    }

    pub fn sibling(&self) -> Option<FiberId> {
        self.sibling
    }

    pub fn parent(&self) -> Option<FiberId> {
        self.parent
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn host_handle(&self) -> Option<HostHandle> {
        self.host_handle
    }

    pub fn deletions(&self) -> &[FiberId] {
        &self.deletions
    }

    /// Whether the fiber materializes a host object of its own.
    pub fn is_host(&self) -> bool {
        matches!(self.tag, FiberTag::Host { .. } | FiberTag::Text { .. })
    }

    /// Whether the fiber can serve as the parent of host objects.
    pub(crate) fn is_host_parent(&self) -> bool {
        matches!(self.tag, FiberTag::Host { .. } | FiberTag::Root { .. })
    }

    /// Text of a text leaf.
    pub fn text(&self) -> Option<&str> {
        match &self.tag {
            FiberTag::Text { text } => Some(text),
            _ => None,
        }
    }

    /// Display name of the fiber's type.
    pub fn type_name(&self) -> String {
        match (&self.tag, &self.element_type) {
            (FiberTag::Root { .. }, _) => "Root".to_string(),
            (FiberTag::Text { .. }, _) => "#text".to_string(),
            (_, Some(ty)) => ty.name().into_owned(),
            (_, None) => format!("{:?}", self.kind()),
        }
    }

    pub(crate) fn hooks_mut(&mut self) -> Option<&mut Vec<HookRecord>> {
        match &mut self.tag {
            FiberTag::Function { hooks, .. } | FiberTag::SimpleMemo { hooks, .. } => Some(hooks),
            _ => None,
        }
    }

    pub(crate) fn hooks(&self) -> &[HookRecord] {
        match &self.tag {
            FiberTag::Function { hooks, .. } | FiberTag::SimpleMemo { hooks, .. } => hooks,
            _ => &[],
        }
    }
}

/// Generational storage for every fiber of a root.
#[derive(Default)]
pub struct FiberArena {
    fibers: SlotMap<FiberId, Fiber>,
    /// Slots allocated since the last commit.
    fresh: Vec<FiberId>,
}

impl FiberArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live fibers, both buffers included.
    pub fn len(&self) -> usize {
        self.fibers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }

    pub fn contains(&self, id: FiberId) -> bool {
        self.fibers.contains_key(id)
    }

    pub fn get(&self, id: FiberId) -> Result<&Fiber> {
        self.fibers.get(id).ok_or(ReconcileError::MissingFiber(id))
    }

    pub(crate) fn get_mut(&mut self, id: FiberId) -> Result<&mut Fiber> {
        self.fibers.get_mut(id).ok_or(ReconcileError::MissingFiber(id))
    }

    pub(crate) fn try_get_mut(&mut self, id: FiberId) -> Option<&mut Fiber> {
        self.fibers.get_mut(id)
    }

    /// Children of `id` in sibling order.
    pub fn children(&self, id: FiberId) -> Result<Vec<FiberId>> {
        let mut out = Vec::new();
        let mut next = self.get(id)?.child;
        while let Some(child) = next {
            out.push(child);
            next = self.get(child)?.sibling;
        }
        Ok(out)
    }

    fn insert_fresh(&mut self, fiber: Fiber) -> FiberId {
        let id = self.fibers.insert(fiber);
        self.fresh.push(id);
        id
    }

    /// Root fiber with no alternate yet.
    pub(crate) fn create_root(&mut self) -> FiberId {
        self.fibers.insert(Fiber::new(
            FiberTag::Root {
                element: Node::Empty,
            },
            None,
            None,
            Props::new(),
        ))
    }

    pub(crate) fn create_from_element(&mut self, element: &Element) -> FiberId {
        let fiber = Fiber::new(
            FiberTag::from_type(&element.ty),
            element.key.clone(),
            Some(element.ty.clone()),
            element.props.clone(),
        );
        self.insert_fresh(fiber)
    }

    pub(crate) fn create_from_text(&mut self, text: Rc<str>) -> FiberId {
        let fiber = Fiber::new(FiberTag::Text { text }, None, None, Props::new());
        self.insert_fresh(fiber)
    }

    /// Implicit fragment for a nested list of children.
    pub(crate) fn create_from_fragment(&mut self, children: Node, key: Option<Key>) -> FiberId {
        let fiber = Fiber::new(
            FiberTag::Fragment,
            key,
            Some(ElementType::Fragment),
            Props::new().with_children(children),
        );
        self.insert_fresh(fiber)
    }

    /// Work-in-progress copy of `current` with `props` pending.
    ///
    /// Reuses the alternate slot when there is one; otherwise allocates a
    /// slot and links the pair.
    pub(crate) fn create_work_in_progress(&mut self, current: FiberId, props: Props) -> Result<FiberId> {
        let cur = self.get(current)?;
        let mut tag = cur.tag.clone();
        if let FiberTag::Host { update_payload, .. } = &mut tag {
            *update_payload = None;
        }
        let key = cur.key.clone();
        let element_type = cur.element_type.clone();
        let memoized_props = cur.memoized_props.clone();
        let host_handle = cur.host_handle;
        let parent = cur.parent;
        let child = cur.child;
        let sibling = cur.sibling;
        let index = cur.index;
        let lanes = cur.lanes;
        let child_lanes = cur.child_lanes;
        let dependencies = cur.dependencies.clone();
        let existing = cur.alternate.filter(|alt| self.fibers.contains_key(*alt));

        let wip = match existing {
            Some(wip) => {
                let fiber = self.get_mut(wip)?;
                fiber.tag = tag;
                fiber.key = key;
                fiber.element_type = element_type;
                fiber.pending_props = props;
                fiber.flags = Flags::empty();
                fiber.subtree_flags = Flags::empty();
                fiber.deletions.clear();
                fiber.effects.clear();
                wip
            }
            None => {
                let mut fiber = Fiber::new(tag, key, element_type, props);
                fiber.alternate = Some(current);
                let wip = self.insert_fresh(fiber);
                self.get_mut(current)?.alternate = Some(wip);
                wip
            }
        };

        let fiber = self.get_mut(wip)?;
        fiber.memoized_props = memoized_props;
        fiber.host_handle = host_handle;
        fiber.parent = parent;
        fiber.child = child;
        fiber.sibling = sibling;
        fiber.index = index;
        fiber.lanes = lanes;
        fiber.child_lanes = child_lanes;
        fiber.dependencies = dependencies;
        Ok(wip)
    }

    /// Forget the slots allocated by the pass that just committed.
    pub(crate) fn commit_fresh(&mut self) {
        self.fresh.clear();
    }

    /// Free every slot allocated by an abandoned pass, unlinking the
    /// committed fibers they were paired with.
    pub(crate) fn discard_fresh(&mut self) -> usize {
        let fresh = std::mem::take(&mut self.fresh);
        let mut freed = 0;
        for id in fresh {
            let Some(fiber) = self.fibers.remove(id) else {
                continue;
            };
            freed += 1;
            if let Some(alternate) = fiber.alternate
                && let Some(other) = self.fibers.get_mut(alternate)
                && other.alternate == Some(id)
            {
                other.alternate = None;
            }
        }
        freed
    }

    /// Free `root`, all of its descendants, and their alternates.
    pub(crate) fn free_subtree(&mut self, root: FiberId) -> usize {
        let mut freed = 0;
        let mut stack = vec![(root, false)];
        while let Some((id, follow_sibling)) = stack.pop() {
            let Some(fiber) = self.fibers.remove(id) else {
                continue;
            };
            freed += 1;
            if let Some(alternate) = fiber.alternate
                && self.fibers.remove(alternate).is_some()
            {
                freed += 1;
            }
            if follow_sibling && let Some(sibling) = fiber.sibling {
                stack.push((sibling, true));
            }
            if let Some(child) = fiber.child {
                stack.push((child, true));
            }
        }
        freed
    }
}
