//! # Mirror Tree - the authoritative UI state tree
//!
//! Server-side data model plus everything needed to turn its mutations into
//! an ordered, minimal batch for one client.
//!
//! ## Architecture
//!
//! ```text
//! put / remove / splice
//!        │
//!        ▼
//!   StateTree ──► per-node ChangeTracker (coalescing)
//!        │                    │
//!        │ invalidations      ▼
//!        ▼            TransactionLogBuilder ──► MetadataOptimizer ──► ChangePruner
//!  ReactiveGraph                                                          │
//!                                                                         ▼
//!                                                                   TransactionLog
//! ```
//!
//! ## Key Concepts
//!
//! - **NodeKey**: arena handle to a node, valid before the node has an id
//! - **NodeState**: detached, attached (registered with an id) or unregistered
//! - **Dirty order**: nodes are visited by the builder in the order they were
//!   first touched since the previous batch
//! - **SourceKey**: what a reactive computation can depend on; one property,
//!   or the shape of one namespace
//! - **Atomic update**: [`StateTree::atomically`] undoes everything a failed
//!   closure changed
//! - **Server-only key**: a map key whose values, and the nodes below them,
//!   never reach the client

pub mod arena;
pub mod error;
pub mod handle;
mod journal;
pub mod namespace;
pub mod node;
pub mod optimizer;
pub mod pruner;
pub mod source;
pub mod templates;
pub mod tracker;
pub mod transaction;
pub mod tree;

pub use arena::{Arena, ArenaKey};
pub use error::{BuildError, TreeError, TreeResult};
pub use handle::{ListHandle, MapHandle, PropertyHandle};
pub use namespace::{ListNamespace, MapNamespace, Namespace, NamespaceTable, OutOfRange, SpliceOutcome};
pub use node::{NodeKey, NodeState, NodeValue, TreeId, UnregisterListener};
pub use optimizer::MetadataOptimizer;
pub use pruner::ChangePruner;
pub use source::SourceKey;
pub use templates::TemplateRegistry;
pub use tracker::NodeChange;
pub use transaction::{LogStats, TransactionLog, TransactionLogBuilder};
pub use tree::{StateTree, TreeConfig, TreeScope, TreeSource};
