//! # Mirror Protocol - JSON envelopes for tree replication
//!
//! Converts transaction logs into the wire format and back, and keeps both
//! directions in sequence.
//!
//! ## Key Concepts
//!
//! - **WireChange**: flat JSON object per change; node references are plain
//!   integers, distinguished from data by the change type
//! - **ServerMessage / ClientMessage**: the two envelopes, each numbered
//! - **InboundSequencer**: server-side duplicate and gap detection
//! - **ServerSequencer**: client-side reorder buffer with a resync fallback

pub mod codec;
pub mod error;
pub mod message;
pub mod sequence;
pub mod wire;

pub use codec::{decode_change, decode_changes, encode_change, encode_changes};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{ClientMessage, Invocation, ServerMessage};
pub use sequence::{Delivery, InboundSequencer, SequenceVerdict, ServerSequencer};
pub use wire::{WireChange, WireChangeType};
