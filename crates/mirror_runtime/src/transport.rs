//! In-process transport
//!
//! ## Architecture
//!
//! ```text
//!   client thread                         server thread
//!   ─────────────                         ─────────────
//!   ClientDriver ──── to_server (JSON) ───► serve()
//!        ▲                                     │
//!        └────────── to_client (JSON) ◄────────┘  SessionHandle::handle_json
//!                         ▲
//!                         └── server push (SessionHandle::access)
//! ```
//!
//! Both directions carry the JSON envelopes so the demo exercises the same
//! encoding a network transport would.

use crate::config::DemoConfig;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use mirror_client::{ClientReplica, Dom, DomNodeId, MemoryDom, ReplicaError};
use mirror_core::Value;
use mirror_protocol::{ProtocolError, ServerMessage};
use mirror_server::{SessionError, SessionHandle};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Errors raised while running the demo
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Replica error: {0}")]
    Replica(#[from] ReplicaError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to start the session thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("the other end hung up")]
    Disconnected,

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("no <{0}> element is rendered")]
    MissingElement(&'static str),
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Serve `handle` on its own thread: answer every inbound message until the
/// client hangs up. The initial snapshot is pushed first.
pub fn spawn_server(
    handle: SessionHandle,
    inbound: Receiver<String>,
    outbound: Sender<String>,
) -> TransportResult<JoinHandle<()>> {
    let thread = thread::Builder::new()
        .name("mirror-session".into())
        .spawn(move || {
            if let Err(e) = serve(&handle, &inbound, &outbound) {
                log::error!("Session thread stopped: {}", e);
            }
        })?;
    Ok(thread)
}

fn serve(handle: &SessionHandle, inbound: &Receiver<String>, outbound: &Sender<String>) -> TransportResult<()> {
    let boot = handle.resynchronize()?.to_json()?;
    outbound.send(boot).map_err(|_| TransportError::Disconnected)?;

    for json in inbound.iter() {
        match handle.handle_json(&json) {
            Ok(Some(reply)) => outbound.send(reply).map_err(|_| TransportError::Disconnected)?,
            Ok(None) => log::debug!("Duplicate client message dropped"),
            Err(SessionError::InvalidCsrfToken) => log::warn!("Rejected client message with a bad token"),
            Err(SessionError::Protocol(e)) => log::warn!("Rejected malformed client message: {}", e),
            Err(e) => return Err(e.into()),
        }
    }
    log::info!("Client disconnected");
    Ok(())
}

/// Push the result of a server-initiated turn to the client
pub fn push(outbound: &Sender<String>, message: Option<ServerMessage>) -> TransportResult<()> {
    if let Some(message) = message {
        outbound
            .send(message.to_json()?)
            .map_err(|_| TransportError::Disconnected)?;
    }
    Ok(())
}

/// Client end: a replica plus its channels
pub struct ClientDriver {
    pub replica: ClientReplica<MemoryDom>,
    to_server: Sender<String>,
    from_server: Receiver<String>,
    timeout: Duration,
}

impl ClientDriver {
    pub fn new(
        replica: ClientReplica<MemoryDom>,
        to_server: Sender<String>,
        from_server: Receiver<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            replica,
            to_server,
            from_server,
            timeout,
        }
    }

    /// Wait for one server message and apply it
    pub fn receive(&mut self) -> TransportResult<()> {
        let json = self.from_server.recv_timeout(self.timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => TransportError::Timeout(self.timeout),
            RecvTimeoutError::Disconnected => TransportError::Disconnected,
        })?;
        if let Err(e) = self.replica.receive_json(&json) {
            // The replica already asked for a resync; send it and take the snapshot
            log::warn!("Replica rejected a batch: {}", e);
            self.send()?;
        }
        Ok(())
    }

    /// Send the pending invocations and apply the reply
    pub fn send(&mut self) -> TransportResult<()> {
        let Some(message) = self.replica.take_message() else {
            return Ok(());
        };
        self.to_server
            .send(message.to_json()?)
            .map_err(|_| TransportError::Disconnected)?;
        self.receive()
    }

    fn element(&self, tag: &'static str) -> TransportResult<DomNodeId> {
        self.replica
            .dom()
            .find(tag)
            .ok_or(TransportError::MissingElement(tag))
    }

    /// Type `text` into the input and fire its change event
    pub fn type_text(&mut self, text: &str) -> TransportResult<()> {
        let input = self.element("input")?;
        self.replica
            .dom_mut()
            .set_property(input, "value", &Value::from(text))
            .map_err(ReplicaError::from)?;
        self.replica.dom_event(input, "change", Value::Null)?;
        self.send()
    }

    pub fn click(&mut self, tag: &'static str) -> TransportResult<()> {
        let target = self.element(tag)?;
        self.replica.dom_event(target, "click", Value::Null)?;
        self.send()
    }

    pub fn navigate(&mut self, location: &str) -> TransportResult<()> {
        self.replica.navigate(location, Value::Null);
        self.send()
    }

    /// Run the scripted interaction
    pub fn run_script(&mut self, demo: &DemoConfig) -> TransportResult<()> {
        for item in &demo.items {
            log::info!("Adding '{}'", item);
            self.type_text(item)?;
            self.click("button")?;
        }
        log::info!("Navigating to {}", demo.navigate_to);
        self.navigate(&demo.navigate_to)
    }
}
