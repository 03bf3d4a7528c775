//! # Mirror Server - UI sessions
//!
//! A [`UiSession`] owns one client's authoritative [`StateTree`], the
//! server-side computations over it and the event handlers registered by the
//! application. Each inbound [`ClientMessage`] is processed as one turn that
//! ends with the [`ServerMessage`] describing what changed.
//!
//! ## Architecture
//!
//! ```text
//!   transport ──► SessionHandle (mutex) ──► UiSession
//!                                              │
//!                ┌─────────────────┬───────────┼────────────┐
//!                ▼                 ▼           ▼            ▼
//!           EventRouter       StateTree   ServerGraph   InboundSequencer
//!                                 │
//!                                 ▼
//!              TransactionLogBuilder ─► optimizer ─► pruner ─► codec
//! ```
//!
//! ## Key Concepts
//!
//! - **Turn**: validate, sequence, apply invocations, flush computations,
//!   build and encode the batch. Turns never interleave.
//! - **Resync**: a full snapshot batch, sent on request, after lost client
//!   messages, and in production mode when a batch cannot be built.
//! - **Ownership**: computations and event handlers belong to a node and go
//!   away when it is unregistered.
//!
//! [`StateTree`]: mirror_tree::StateTree
//! [`ClientMessage`]: mirror_protocol::ClientMessage
//! [`ServerMessage`]: mirror_protocol::ServerMessage

pub mod config;
pub mod error;
pub mod events;
pub mod handle;
pub mod session;

pub use config::SessionConfig;
pub use error::{SessionError, SessionResult};
pub use events::{DispatchOutcome, EventHandler, EventRouter, Navigation, NavigationHandler, UiEvent};
pub use handle::SessionHandle;
pub use session::{ResyncReason, ServerGraph, SessionStats, TurnOutcome, UiSession};
