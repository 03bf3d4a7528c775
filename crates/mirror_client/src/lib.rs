//! # Mirror Client - the replica side
//!
//! A [`ClientReplica`] receives [`ServerMessage`]s, replays their batches
//! into a [`ClientTree`] and keeps a document in step with it through
//! reactive bindings. User interaction flows back as property syncs and
//! events in [`ClientMessage`]s.
//!
//! ## Architecture
//!
//! ```text
//!   ServerMessage
//!        │
//!        ▼
//!   ServerSequencer ──► Replicator ──► ClientTree ──► Binder ──► Dom
//!                            │                          ▲
//!                            └──── Attachment ──────────┘
//! ```
//!
//! ## Key Concepts
//!
//! - **Replay**: attaches first, then records in order; a record referencing
//!   a node pulls that node's later records ahead of it.
//! - **Lazy rendering**: a node gets document nodes when a rendered parent
//!   adopts it, and children are spliced into the document in one call.
//! - **Fatal errors**: anything that breaks replay makes the replica ask
//!   for a resync and ignore ordinary batches until it arrives.
//!
//! [`ServerMessage`]: mirror_protocol::ServerMessage
//! [`ClientMessage`]: mirror_protocol::ClientMessage

pub mod binder;
pub mod config;
pub mod dom;
pub mod error;
pub mod memory;
pub mod replica;
pub mod replicator;
pub mod tree;
pub mod view;

pub use binder::{Attachment, Binder, BindingGraph};
pub use config::ClientConfig;
pub use dom::{Dom, DomError, DomNodeId, DomResult};
pub use error::{ReplicaError, ReplicaResult};
pub use memory::MemoryDom;
pub use replica::{ClientReplica, ClientStats};
pub use replicator::{apply_batch, ApplyObserver, ApplyStats, Replicator, Unobserved};
pub use tree::{AddedKey, ClientScope, ClientSource, ClientTree, SpliceEvent};
pub use view::{BindContext, View};
