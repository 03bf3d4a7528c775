//! UI session turns
//!
//! A turn is one inbound client message or one server-initiated
//! [`UiSession::access`]. It runs to completion before the next one starts:
//!
//! ```text
//! csrf ─► sequence ─► property syncs ─► events / navigation ─► flush
//!                                                                │
//!   ServerMessage ◄── encode ◄── prune ◄── optimize ◄── build ◄──┘
//! ```
//!
//! A resync re-sends every attached node with its full state and forgets
//! which templates the client has seen.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::events::{EventRouter, Navigation, UiEvent};
use mirror_core::{NamespaceId, TreeSnapshot, Value};
use mirror_protocol::{
    encode_changes, ClientMessage, InboundSequencer, Invocation, SequenceVerdict, ServerMessage,
};
use mirror_reactive::{ComputationError, ComputationId, ReactiveConfig, ReactiveGraph};
use mirror_tree::{
    BuildError, ChangePruner, MetadataOptimizer, NodeKey, NodeState, StateTree, TransactionLog,
    TransactionLogBuilder, TreeConfig, TreeError, TreeResult, TreeScope, TreeSource,
};
use std::collections::HashMap;
use std::time::Instant;

/// Reactive graph running server-side computations over the tree
pub type ServerGraph = ReactiveGraph<TreeSource, StateTree>;

/// Why a full resync was sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// Client messages went missing
    Gap { expected: u64, received: u64 },
    /// The client asked for one
    Requested,
    /// The incremental batch could not be built
    BatchFailure,
}

/// Result of one inbound message
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Invocations applied; the message carries the resulting changes
    Applied(ServerMessage),
    /// A retransmission; nothing happened and nothing is sent
    Duplicate,
    /// The client must drop its tree and apply `message`
    Resync {
        reason: ResyncReason,
        message: ServerMessage,
    },
}

impl TurnOutcome {
    /// Message to send back, if any
    pub fn message(&self) -> Option<&ServerMessage> {
        match self {
            Self::Applied(message) | Self::Resync { message, .. } => Some(message),
            Self::Duplicate => None,
        }
    }

    /// Take the message to send back
    pub fn into_message(self) -> Option<ServerMessage> {
        match self {
            Self::Applied(message) | Self::Resync { message, .. } => Some(message),
            Self::Duplicate => None,
        }
    }
}

/// Counters over the session's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub turns: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub resyncs: u64,
    pub property_syncs: u64,
    pub events: u64,
    pub navigations: u64,
    pub skipped_invocations: u64,
    pub handler_failures: u64,
    pub computation_failures: u64,
    pub messages_sent: u64,
    pub changes_sent: u64,
    pub pruned: u64,
}

/// One client's view of the application
pub struct UiSession {
    config: SessionConfig,
    tree: StateTree,
    graph: ServerGraph,
    owners: HashMap<NodeKey, Vec<ComputationId>>,
    events: EventRouter,
    optimizer: MetadataOptimizer,
    pruner: ChangePruner,
    sequencer: InboundSequencer,
    next_sync_id: u64,
    processing_ms: u64,
    stats: SessionStats,
}

impl UiSession {
    /// Create a session with an empty tree
    pub fn new(config: SessionConfig) -> Self {
        let tree = StateTree::new(TreeConfig {
            root_tag: config.root_tag.clone(),
        });
        let graph = ReactiveGraph::new(ReactiveConfig {
            max_flush_passes: config.max_flush_passes,
        });
        log::debug!(
            "Created UI session (production mode: {}, validate sync ids: {})",
            config.production_mode,
            config.validate_sync_ids
        );
        Self {
            config,
            tree,
            graph,
            owners: HashMap::new(),
            events: EventRouter::new(),
            optimizer: MetadataOptimizer::new(),
            pruner: ChangePruner::new(),
            sequencer: InboundSequencer::new(),
            next_sync_id: 0,
            processing_ms: 0,
            stats: SessionStats::default(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn tree(&self) -> &StateTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut StateTree {
        &mut self.tree
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Sync id the next outgoing message will carry
    pub fn next_sync_id(&self) -> u64 {
        self.next_sync_id
    }

    /// Wire-level picture of the attached tree
    pub fn snapshot(&self) -> TreeSnapshot {
        self.tree.snapshot()
    }

    // ---- application API ------------------------------------------------

    /// Listen to `event_type` on `node`.
    ///
    /// The client syncs the listed element properties before delivering the
    /// event, so the handler sees their current values.
    pub fn add_event_listener<F>(
        &mut self,
        node: NodeKey,
        event_type: &str,
        sync_properties: &[&str],
        handler: F,
    ) -> SessionResult<()>
    where
        F: FnMut(&mut StateTree, &UiEvent) -> TreeResult<()> + Send + 'static,
    {
        let properties = sync_properties.iter().map(|p| Value::from(*p)).collect();
        self.tree.put(
            node,
            NamespaceId::ElementListeners,
            event_type,
            Value::Array(properties),
        )?;
        self.events.add(node, event_type, handler);
        Ok(())
    }

    /// Install the navigation handler
    pub fn set_navigation_handler<F>(&mut self, handler: F)
    where
        F: FnMut(&mut StateTree, &Navigation) -> TreeResult<()> + Send + 'static,
    {
        self.events.set_navigation(handler);
    }

    /// Run `body` reactively for as long as `owner` lives. The first run
    /// happens at the end of the current turn.
    pub fn create_computation<F>(
        &mut self,
        owner: NodeKey,
        name: impl Into<String>,
        body: F,
    ) -> SessionResult<ComputationId>
    where
        F: FnMut(&mut StateTree, &mut TreeScope) -> Result<(), ComputationError> + Send + 'static,
    {
        match self.tree.state(owner) {
            None => return Err(TreeError::NodeNotFound(owner).into()),
            Some(NodeState::Unregistered) => return Err(TreeError::NodeUnregistered(owner).into()),
            Some(_) => {}
        }
        let id = self.graph.create(name, body);
        self.owners.entry(owner).or_default().push(id);
        Ok(id)
    }

    /// Stop a computation before its owner goes away
    pub fn stop_computation(&mut self, id: ComputationId) -> SessionResult<()> {
        self.graph.stop(id)?;
        for owned in self.owners.values_mut() {
            owned.retain(|c| *c != id);
        }
        Ok(())
    }

    /// Number of live computations
    pub fn computation_count(&self) -> usize {
        self.graph.len()
    }

    /// Number of event handlers registered on `node`
    pub fn handler_count(&self, node: NodeKey) -> usize {
        self.events.handler_count(node)
    }

    // ---- turns ----------------------------------------------------------

    /// Process one client message
    pub fn handle_message(&mut self, message: ClientMessage) -> SessionResult<TurnOutcome> {
        let started = Instant::now();
        if message.csrf_token != self.config.csrf_token {
            self.stats.rejected += 1;
            log::warn!(
                "Rejecting client message {}: CSRF token mismatch",
                message.client_message_id
            );
            return Err(SessionError::InvalidCsrfToken);
        }

        if self.config.validate_sync_ids {
            match self.sequencer.check(message.client_message_id)? {
                SequenceVerdict::Accept => {}
                SequenceVerdict::Duplicate => {
                    self.stats.duplicates += 1;
                    return Ok(TurnOutcome::Duplicate);
                }
                SequenceVerdict::Gap { expected, received } => {
                    log::warn!(
                        "Client message {} arrived while expecting {}; sending a resync",
                        received,
                        expected
                    );
                    self.sequencer.resume_after(received)?;
                    self.stats.turns += 1;
                    self.settle()?;
                    let message = self.resync_message(started)?;
                    return Ok(TurnOutcome::Resync {
                        reason: ResyncReason::Gap { expected, received },
                        message,
                    });
                }
            }
        } else {
            self.sequencer.resume_after(message.client_message_id)?;
        }

        self.stats.turns += 1;
        self.apply_invocations(message.invocations);
        self.settle()?;

        if message.resynchronize {
            let message = self.resync_message(started)?;
            return Ok(TurnOutcome::Resync {
                reason: ResyncReason::Requested,
                message,
            });
        }

        match self.next_batch() {
            Ok(log) => Ok(TurnOutcome::Applied(self.envelope(log, false, started))),
            Err(e) => self.recover(e, started),
        }
    }

    /// Parse, process and answer a JSON client message
    pub fn handle_json(&mut self, json: &str) -> SessionResult<Option<String>> {
        let message = ClientMessage::from_json(json)?;
        match self.handle_message(message)?.into_message() {
            Some(reply) => Ok(Some(reply.to_json()?)),
            None => Ok(None),
        }
    }

    /// Run server-initiated code against the session.
    ///
    /// Returns the batch to push, or `None` when nothing visible changed.
    pub fn access<R, F>(&mut self, f: F) -> SessionResult<(R, Option<ServerMessage>)>
    where
        F: FnOnce(&mut UiSession) -> R,
    {
        let started = Instant::now();
        let result = f(self);
        self.settle()?;

        match self.next_batch() {
            Ok(log) if log.is_empty() => Ok((result, None)),
            Ok(log) => {
                let message = self.envelope(log, false, started);
                Ok((result, Some(message)))
            }
            Err(e) => {
                let outcome = self.recover(e, started)?;
                Ok((result, outcome.into_message()))
            }
        }
    }

    /// Full snapshot of the tree; also the initial load of a new client
    pub fn resynchronize(&mut self) -> SessionResult<ServerMessage> {
        let started = Instant::now();
        self.settle()?;
        self.resync_message(started)
    }

    // ---- internals ------------------------------------------------------

    fn apply_invocations(&mut self, invocations: Vec<Invocation>) {
        let (syncs, others): (Vec<_>, Vec<_>) = invocations
            .into_iter()
            .partition(Invocation::is_property_sync);

        for invocation in syncs.into_iter().chain(others) {
            match invocation {
                Invocation::PropertySync {
                    node_id,
                    property,
                    value,
                } => {
                    let Some(node) = self.tree.get_node(node_id) else {
                        log::warn!("Skipping sync of '{}' for unknown {}", property, node_id);
                        self.stats.skipped_invocations += 1;
                        continue;
                    };
                    match self.tree.put_synced(
                        node,
                        NamespaceId::ElementProperties,
                        &property,
                        value.clone(),
                    ) {
                        Ok(_) => {
                            self.pruner
                                .ignore(node_id, NamespaceId::ElementProperties, property, value);
                            self.stats.property_syncs += 1;
                        }
                        Err(e) => {
                            log::warn!("Skipping sync of '{}' on {}: {}", property, node_id, e);
                            self.stats.skipped_invocations += 1;
                        }
                    }
                }
                Invocation::Event {
                    node_id,
                    event_type,
                    event_data,
                } => {
                    let Some(node) = self.tree.get_node(node_id) else {
                        log::warn!("Skipping '{}' event for unknown {}", event_type, node_id);
                        self.stats.skipped_invocations += 1;
                        continue;
                    };
                    let event = UiEvent {
                        node,
                        node_id,
                        event_type,
                        data: event_data,
                    };
                    let outcome = self.events.dispatch(&mut self.tree, &event);
                    self.stats.events += 1;
                    self.stats.handler_failures += outcome.failed as u64;
                }
                Invocation::Navigation { state, location } => {
                    let navigation = Navigation { location, state };
                    let outcome = self.events.navigate(&mut self.tree, &navigation);
                    self.stats.navigations += 1;
                    self.stats.handler_failures += outcome.failed as u64;
                }
            }
        }
    }

    /// Run pending computations and drop whatever belonged to nodes that
    /// left the tree
    fn settle(&mut self) -> SessionResult<()> {
        self.release_unregistered();
        match self.graph.flush(&mut self.tree) {
            Ok(report) => {
                self.stats.computation_failures += report.failures.len() as u64;
            }
            Err(e) if self.config.production_mode => {
                log::error!("Reactive flush aborted: {}", e);
            }
            Err(e) => return Err(e.into()),
        }
        self.release_unregistered();
        Ok(())
    }

    fn release_unregistered(&mut self) {
        for (key, id) in self.tree.take_unregistered() {
            if let Some(owned) = self.owners.remove(&key) {
                for computation in owned {
                    if let Err(e) = self.graph.stop(computation) {
                        log::debug!("Computation of {} already gone: {}", id, e);
                    }
                }
            }
            let dropped = self.events.remove_node(key);
            if dropped > 0 {
                log::trace!("Dropped {} handlers of {}", dropped, id);
            }
        }
    }

    fn next_batch(&mut self) -> Result<TransactionLog, BuildError> {
        let mut log = TransactionLogBuilder::new(&mut self.tree).build()?;
        self.optimizer.optimize(&mut log);
        self.stats.pruned += self.pruner.prune(&mut log) as u64;
        Ok(log)
    }

    fn resync_message(&mut self, started: Instant) -> SessionResult<ServerMessage> {
        self.tree.reset_reporting();
        self.optimizer.reset();
        self.pruner.clear();
        let log = self.next_batch()?;
        self.stats.resyncs += 1;
        log::info!("Sending full resync of {} records", log.len());
        Ok(self.envelope(log, true, started))
    }

    fn recover(&mut self, error: BuildError, started: Instant) -> SessionResult<TurnOutcome> {
        if !self.config.production_mode {
            log::error!("Failed to build batch: {}", error);
            return Err(error.into());
        }
        log::error!("Failed to build batch, falling back to a resync: {}", error);
        let message = self.resync_message(started)?;
        Ok(TurnOutcome::Resync {
            reason: ResyncReason::BatchFailure,
            message,
        })
    }

    fn envelope(&mut self, log: TransactionLog, resync: bool, started: Instant) -> ServerMessage {
        let elapsed = started.elapsed().as_millis() as u64;
        self.processing_ms += elapsed;

        let message = ServerMessage {
            sync_id: self.next_sync_id,
            client_ack: self.sequencer.expected(),
            resync,
            changes: encode_changes(&log.changes),
            new_metadata: log.new_metadata,
            timing: [self.processing_ms, elapsed],
        };
        self.next_sync_id += 1;
        self.stats.messages_sent += 1;
        self.stats.changes_sent += message.changes.len() as u64;
        message
    }
}

impl Default for UiSession {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
