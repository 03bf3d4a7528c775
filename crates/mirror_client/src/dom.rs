//! The document seam
//!
//! Bindings never touch a real document directly; they go through [`Dom`].
//! A browser host implements it over its DOM, tests and the headless runtime
//! use [`MemoryDom`](crate::memory::MemoryDom).

use mirror_core::Value;
use mirror_reactive::ComputationError;
use std::fmt;
use thiserror::Error;

/// Handle to a document node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomNodeId(pub u64);

impl fmt::Display for DomNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dom#{}", self.0)
    }
}

/// Errors raised by a document implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("unknown DOM node {0}")]
    UnknownNode(DomNodeId),

    #[error("{0} is not an element")]
    NotAnElement(DomNodeId),

    #[error("child index {index} (+{count}) out of bounds for {parent} with {len} children")]
    IndexOutOfBounds {
        parent: DomNodeId,
        index: usize,
        count: usize,
        len: usize,
    },

    #[error("{0} already has a parent")]
    AlreadyAttached(DomNodeId),

    #[error("DOM operation failed: {0}")]
    Failed(String),
}

/// Result type for document operations
pub type DomResult<T> = Result<T, DomError>;

/// Operations the binding layer needs from a document
pub trait Dom {
    /// Element the tree root is rendered into
    fn root(&self) -> DomNodeId;

    fn create_element(&mut self, tag: &str) -> DomNodeId;

    fn create_text(&mut self, text: &str) -> DomNodeId;

    fn set_text(&mut self, node: DomNodeId, text: &str) -> DomResult<()>;

    fn set_property(&mut self, node: DomNodeId, name: &str, value: &Value) -> DomResult<()>;

    fn remove_property(&mut self, node: DomNodeId, name: &str) -> DomResult<()>;

    /// Current value of a property, including edits made by the user
    fn property(&self, node: DomNodeId, name: &str) -> Option<Value>;

    fn set_attribute(&mut self, node: DomNodeId, name: &str, value: &str) -> DomResult<()>;

    fn remove_attribute(&mut self, node: DomNodeId, name: &str) -> DomResult<()>;

    /// Start reporting `event_type` on `node`
    fn add_event_listener(&mut self, node: DomNodeId, event_type: &str) -> DomResult<()>;

    fn remove_event_listener(&mut self, node: DomNodeId, event_type: &str) -> DomResult<()>;

    /// Remove `remove_count` children at `index` and insert `added` there, in
    /// one operation
    fn splice_children(
        &mut self,
        parent: DomNodeId,
        index: usize,
        remove_count: usize,
        added: &[DomNodeId],
    ) -> DomResult<()>;

    fn child_count(&self, node: DomNodeId) -> usize;

    /// Forget a node that left the tree
    fn release(&mut self, node: DomNodeId);
}

impl From<DomError> for ComputationError {
    fn from(e: DomError) -> Self {
        ComputationError::new(e.to_string())
    }
}
