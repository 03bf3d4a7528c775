//! Explicit read tracking

use crate::graph::ComputationId;

/// Records the sources a computation reads during one run.
///
/// Reads made through a detached scope ([`TrackingScope::untracked`]) are
/// collected but never turned into dependencies.
#[derive(Debug)]
pub struct TrackingScope<S> {
    computation: Option<ComputationId>,
    reads: Vec<S>,
}

impl<S: PartialEq> TrackingScope<S> {
    pub(crate) fn for_computation(id: ComputationId) -> Self {
        Self {
            computation: Some(id),
            reads: Vec::new(),
        }
    }

    /// Scope for reads made outside any computation
    pub fn untracked() -> Self {
        Self {
            computation: None,
            reads: Vec::new(),
        }
    }

    /// Register a read of `source`
    pub fn track(&mut self, source: S) {
        if !self.reads.contains(&source) {
            self.reads.push(source);
        }
    }

    /// Computation this scope belongs to
    pub fn computation(&self) -> Option<ComputationId> {
        self.computation
    }

    /// Sources read so far, in first-read order
    pub fn sources(&self) -> &[S] {
        &self.reads
    }

    pub(crate) fn into_sources(self) -> Vec<S> {
        self.reads
    }
}
