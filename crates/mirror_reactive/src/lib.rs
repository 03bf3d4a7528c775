#![forbid(unsafe_code)]

//! # Mirror Reactive - dependency-tracking computations
//!
//! A [`ReactiveGraph`] owns re-runnable computations. While a computation
//! runs it receives an explicit [`TrackingScope`]; every reactive read made
//! through that scope registers the computation as a dependent of the read
//! source. Mutating a source invalidates its dependents, which are queued and
//! re-run only at the next [`ReactiveGraph::flush`].
//!
//! ## Architecture
//!
//! ```text
//! mutation ──► context outbox ──► flush ──► invalidate(source) ──► dirty queue
//!                                               │
//!                                               └──► run each dirty computation once
//! ```
//!
//! The graph is generic over the source key `S` and the context `C` handed to
//! every computation body. The context reports which sources changed through
//! [`InvalidationSource`], so the graph never needs a global "current
//! computation".
//!
//! ## Invariants
//!
//! 1. A computation is never run inside a mutation, only inside `flush`.
//! 2. A computation runs at most once per flush pass, no matter how many of
//!    its sources changed since the previous flush.
//! 3. A computation that never read a source is never scheduled by it.
//! 4. `stop` removes every dependency edge of the computation; a stopped
//!    computation never runs again.
//! 5. A failing body is reported and does not prevent the remaining dirty
//!    computations from running.

pub mod error;
pub mod graph;
pub mod scope;

pub use error::{ComputationError, ReactiveError};
pub use graph::{
    ComputationBody, ComputationFailure, ComputationId, FlushReport, GraphStats,
    InvalidationSource, ReactiveConfig, ReactiveGraph,
};
pub use scope::TrackingScope;
