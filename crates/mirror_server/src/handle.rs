//! Shared session handle
//!
//! Transports call into a session from whatever thread received the message.
//! The handle serializes turns: inbound messages and server-initiated access
//! never interleave.

use crate::config::SessionConfig;
use crate::error::SessionResult;
use crate::session::{TurnOutcome, UiSession};
use mirror_protocol::{ClientMessage, ServerMessage};
use parking_lot::Mutex;
use std::sync::Arc;

/// Cloneable, thread-safe handle to one [`UiSession`]
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<Mutex<UiSession>>,
}

impl SessionHandle {
    /// Wrap a new session
    pub fn new(config: SessionConfig) -> Self {
        Self::from_session(UiSession::new(config))
    }

    /// Wrap an existing session
    pub fn from_session(session: UiSession) -> Self {
        Self {
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Process one client message as a turn
    pub fn handle_message(&self, message: ClientMessage) -> SessionResult<TurnOutcome> {
        self.inner.lock().handle_message(message)
    }

    /// Process one JSON client message, returning the JSON reply
    pub fn handle_json(&self, json: &str) -> SessionResult<Option<String>> {
        self.inner.lock().handle_json(json)
    }

    /// Server-initiated turn; see [`UiSession::access`]
    pub fn access<R, F>(&self, f: F) -> SessionResult<(R, Option<ServerMessage>)>
    where
        F: FnOnce(&mut UiSession) -> R,
    {
        self.inner.lock().access(f)
    }

    /// Full snapshot for a (re)connecting client
    pub fn resynchronize(&self) -> SessionResult<ServerMessage> {
        self.inner.lock().resynchronize()
    }

    /// Inspect the session without running a turn
    pub fn with_session<R>(&self, f: impl FnOnce(&UiSession) -> R) -> R {
        f(&self.inner.lock())
    }
}
