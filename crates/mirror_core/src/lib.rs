//! # Mirror Core - shared vocabulary for tree replication
//!
//! Types both replicas agree on: node and template identifiers, the dynamic
//! [`Value`] carried by properties, the closed namespace catalogue and the
//! change records that describe one mutation.
//!
//! ## Architecture
//!
//! ```text
//! StateTree ──► ChangeRecord ──► wire JSON ──► ChangeRecord ──► ClientTree
//!  (server)                                                     (client)
//! ```
//!
//! ## Key Concepts
//!
//! - **NodeId**: wire address of an attached node, never reused
//! - **NamespaceId**: one of a fixed set of map or list containers per node
//! - **NodeRole**: decides which namespaces a node may carry
//! - **ChangeRecord**: one put/remove/splice/attach/detach on one node

pub mod change;
pub mod id;
pub mod namespace;
pub mod snapshot;
pub mod template;
pub mod value;

pub use change::{ChangeKind, ChangeRecord, ChangeValue};
pub use id::{NodeId, TemplateId};
pub use namespace::{
    NamespaceId, NamespaceKind, NodeRole, UnknownNamespace, TAG_KEY, TEMPLATE_KEY, TEXT_KEY,
};
pub use snapshot::{NamespaceSnapshot, NodeSnapshot, TreeSnapshot};
pub use template::TemplateDefinition;
pub use value::Value;
