#![forbid(unsafe_code)]

//! Errors raised while rendering or committing a tree.

use std::fmt;

use crate::fiber::{FiberId, FiberKind};
use crate::host::HostError;

/// Failure of a render or commit pass.
///
/// Every variant aborts the pass in progress: the work-in-progress tree is
/// discarded and the committed tree stays as it was.
#[derive(Debug)]
pub enum ReconcileError {
    /// A fiber id did not resolve in the arena.
    MissingFiber(FiberId),
    /// A placement found no host-producing ancestor.
    MissingHostParent { fiber: FiberId, kind: FiberKind },
    /// A fiber reached a phase that cannot handle its kind.
    UnexpectedKind {
        fiber: FiberId,
        kind: FiberKind,
        phase: &'static str,
    },
    /// A component called hooks in a different order or number than on its
    /// previous render.
    HookOrderMismatch {
        component: String,
        index: usize,
        expected: &'static str,
        found: &'static str,
    },
    /// A host primitive failed.
    Host(HostError),
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingFiber(id) => write!(f, "fiber {id:?} is not in the arena"),
            Self::MissingHostParent { fiber, kind } => {
                write!(f, "no host parent found for {kind:?} fiber {fiber:?}")
            }
            Self::UnexpectedKind { fiber, kind, phase } => {
                write!(f, "{phase} cannot handle {kind:?} fiber {fiber:?}")
            }
            Self::HookOrderMismatch {
                component,
                index,
                expected,
                found,
            } => write!(
                f,
                "hook #{index} of `{component}` changed between renders: expected {expected}, found {found}"
            ),
            Self::Host(err) => write!(f, "host operation failed: {err}"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HostError> for ReconcileError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

/// Result type for render and commit operations.
pub type Result<T> = std::result::Result<T, ReconcileError>;
