#![forbid(unsafe_code)]

//! Contract between the commit engine and the environment a tree renders into.
//!
//! The reconciler never touches host objects directly. It asks a [`Host`] to
//! create them, set their properties, and link them together, and it refers
//! to them only through opaque [`HostHandle`]s.

use std::fmt;

use crate::element::PropValue;

/// Opaque reference to a host object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostHandle(pub u64);

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure reported by a host primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostError {
    op: &'static str,
    message: String,
}

impl HostError {
    /// Error for primitive `op`.
    pub fn new(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
        }
    }

    /// Name of the failing primitive.
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.op, self.message)
    }
}

impl std::error::Error for HostError {}

/// Mutation primitives an embedding target provides.
///
/// Every call is made from the commit pass (or from `complete_work` for
/// objects that are not attached yet); none is made while a component renders.
pub trait Host {
    /// Create a detached element for `tag`.
    fn create_host_object(&mut self, tag: &str) -> Result<HostHandle, HostError>;

    /// Create a detached text node.
    fn create_text_object(&mut self, content: &str) -> Result<HostHandle, HostError>;

    /// Set (or, with [`PropValue::Null`], remove) a property.
    fn set_property(
        &mut self,
        handle: HostHandle,
        key: &str,
        value: &PropValue,
    ) -> Result<(), HostError>;

    /// Replace the text of an element or text node.
    fn set_text_content(&mut self, handle: HostHandle, content: &str) -> Result<(), HostError>;

    /// Append `child` as the last child of `parent`, moving it if attached.
    fn append_child(&mut self, parent: HostHandle, child: HostHandle) -> Result<(), HostError>;

    /// Insert `child` before `before`, moving it if attached.
    fn insert_before(
        &mut self,
        parent: HostHandle,
        child: HostHandle,
        before: HostHandle,
    ) -> Result<(), HostError>;

    /// Detach `child` from `parent`.
    fn remove_child(&mut self, parent: HostHandle, child: HostHandle) -> Result<(), HostError>;
}
