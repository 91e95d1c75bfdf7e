#![forbid(unsafe_code)]

//! Pending update requests of one root.
//!
//! State dispatches and root renders never run the work loop. They append a
//! request here and poke the root's scheduling hook; the next render pass
//! drains the queue before it starts walking the tree.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::element::Node;
use crate::fiber::FiberId;
use crate::lanes::Lanes;

/// A requested update.
#[derive(Debug)]
pub(crate) enum UpdateRequest {
    /// Replace the root's described tree.
    Root { element: Node, lane: Lanes },
    /// A hook owned by `fiber` changed its state.
    Fiber { fiber: FiberId, lane: Lanes },
}

impl UpdateRequest {
    pub(crate) fn lane(&self) -> Lanes {
        match self {
            Self::Root { lane, .. } | Self::Fiber { lane, .. } => *lane,
        }
    }
}

type Listener = Rc<dyn Fn(Lanes)>;

/// Shared between a root and every dispatch closure created under it.
#[derive(Default)]
pub(crate) struct UpdateQueue {
    pending: RefCell<Vec<UpdateRequest>>,
    lanes: Cell<Lanes>,
    listener: RefCell<Option<Listener>>,
}

impl UpdateQueue {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// Called with the request's lane after every enqueue.
    pub(crate) fn set_listener(&self, listener: impl Fn(Lanes) + 'static) {
        *self.listener.borrow_mut() = Some(Rc::new(listener));
    }

    pub(crate) fn clear_listener(&self) {
        self.listener.borrow_mut().take();
    }

    pub(crate) fn enqueue(&self, request: UpdateRequest) {
        let lane = request.lane();
        self.pending.borrow_mut().push(request);
        self.lanes.set(self.lanes.get() | lane);
        // Clone out so the listener may enqueue again.
        let listener = self.listener.borrow().clone();
        if let Some(listener) = listener {
            listener(lane);
        }
    }

    /// Lanes of the requests not yet drained.
    pub(crate) fn queued_lanes(&self) -> Lanes {
        self.lanes.get()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.borrow().is_empty()
    }

    pub(crate) fn drain(&self) -> Vec<UpdateRequest> {
        self.lanes.set(Lanes::NONE);
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl fmt::Debug for UpdateQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateQueue")
            .field("pending", &self.pending.borrow().len())
            .field("lanes", &self.lanes.get())
            .finish()
    }
}
