//! The client endpoint
//!
//! ## Architecture
//!
//! ```text
//!  ServerMessage ─► ServerSequencer ─► decode ─► Replicator ─► ClientTree
//!                                                    │              │
//!                                              Attachment     invalidations
//!                                                    ▼              ▼
//!                                                   Dom ◄──────── Binder
//!
//!  Dom event ─► property syncs + event ─► outbox ─► ClientMessage
//! ```

use crate::binder::{Attachment, Binder};
use crate::config::ClientConfig;
use crate::dom::{Dom, DomNodeId};
use crate::error::ReplicaResult;
use crate::replicator::apply_batch;
use crate::tree::ClientTree;
use crate::view::{BindContext, View};
use mirror_core::{ChangeValue, NamespaceId, NodeId, TreeSnapshot, Value};
use mirror_protocol::{decode_changes, ClientMessage, Delivery, Invocation, ServerMessage, ServerSequencer};
use mirror_reactive::ReactiveConfig;

/// Counters over the replica's lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStats {
    pub messages_applied: u64,
    pub records_applied: u64,
    pub resyncs: u64,
    pub duplicates: u64,
    pub skipped: u64,
    pub fatal_errors: u64,
    pub binding_failures: u64,
    pub messages_sent: u64,
}

/// Client replica of one UI session rendered into a [`Dom`]
pub struct ClientReplica<D> {
    config: ClientConfig,
    ctx: BindContext<D>,
    binder: Binder<D>,
    sequencer: ServerSequencer,
    outbox: Vec<Invocation>,
    next_message_id: u64,
    resync_requested: bool,
    /// Set after a fatal error; ordinary batches are skipped until a resync
    awaiting_resync: bool,
    stats: ClientStats,
}

impl<D: Dom + 'static> ClientReplica<D> {
    /// Empty replica rendering into `dom`
    pub fn new(config: ClientConfig, dom: D) -> Self {
        let binder = Binder::new(ReactiveConfig {
            max_flush_passes: config.max_flush_passes,
        });
        Self {
            sequencer: ServerSequencer::new(config.max_pending_messages),
            ctx: BindContext::new(dom),
            binder,
            config,
            outbox: Vec::new(),
            next_message_id: 0,
            resync_requested: false,
            awaiting_resync: false,
            stats: ClientStats::default(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn tree(&self) -> &ClientTree {
        &self.ctx.tree
    }

    pub fn view(&self) -> &View<D> {
        &self.ctx.view
    }

    pub fn dom(&self) -> &D {
        self.ctx.view.dom()
    }

    /// Mutable access to the document, e.g. to simulate user edits
    pub fn dom_mut(&mut self) -> &mut D {
        self.ctx.view.dom_mut()
    }

    /// Document node rendering `id`, if rendered
    pub fn dom_node(&self, id: NodeId) -> Option<DomNodeId> {
        self.ctx.view.element(id)
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        self.ctx.tree.snapshot()
    }

    pub fn stats(&self) -> &ClientStats {
        &self.stats
    }

    /// Number of live binding computations
    pub fn binding_count(&self) -> usize {
        self.binder.computation_count()
    }

    /// Whether the next outgoing message asks for a resync
    pub fn resync_requested(&self) -> bool {
        self.resync_requested
    }

    /// Offer a message from the server. Returns how many messages were applied.
    pub fn receive(&mut self, message: ServerMessage) -> ReplicaResult<usize> {
        match self.sequencer.offer(message)? {
            Delivery::Ready(ready) => {
                let count = ready.len();
                for message in ready {
                    self.apply_message(message)?;
                }
                Ok(count)
            }
            Delivery::Buffered => Ok(0),
            Delivery::Duplicate => {
                self.stats.duplicates += 1;
                Ok(0)
            }
            Delivery::ResyncNeeded => {
                self.request_resync();
                Ok(0)
            }
        }
    }

    /// Parse and offer a JSON message
    pub fn receive_json(&mut self, json: &str) -> ReplicaResult<usize> {
        let message = ServerMessage::from_json(json)?;
        self.receive(message)
    }

    fn apply_message(&mut self, message: ServerMessage) -> ReplicaResult<()> {
        if self.awaiting_resync && !message.resync {
            log::debug!("Skipping server message {} while waiting for a resync", message.sync_id);
            self.stats.skipped += 1;
            return Ok(());
        }
        match self.apply_changes(message) {
            Ok(()) => Ok(()),
            Err(e) => {
                log::error!("Failed to apply server message: {}", e);
                self.stats.fatal_errors += 1;
                self.awaiting_resync = true;
                self.request_resync();
                Err(e)
            }
        }
    }

    fn apply_changes(&mut self, message: ServerMessage) -> ReplicaResult<()> {
        let records = decode_changes(&message.changes)?;

        if message.resync {
            log::info!("Resynchronizing from server message {}", message.sync_id);
            self.binder.reset(&mut self.ctx.view);
            self.ctx.tree.clear();
            self.stats.resyncs += 1;
            self.awaiting_resync = false;
            self.resync_requested = false;
        }
        self.ctx.view.add_templates(message.new_metadata);

        let BindContext { tree, view } = &mut self.ctx;
        let mut attachment = Attachment {
            binder: &mut self.binder,
            view: &mut *view,
        };
        let applied = apply_batch(tree, &mut attachment, &records)?;

        self.binder.bind_root(tree, view)?;
        let added = tree.take_added_keys();
        self.binder.bind_added_keys(view, added);
        self.flush()?;

        self.stats.messages_applied += 1;
        self.stats.records_applied += applied.records as u64;
        Ok(())
    }

    fn flush(&mut self) -> ReplicaResult<()> {
        let report = self.binder.flush(&mut self.ctx)?;
        self.stats.binding_failures += report.failures.len() as u64;
        Ok(())
    }

    /// Report a DOM event fired on `target`.
    ///
    /// Properties the server listens to along with the event are read from
    /// the document; changed ones are written to the local tree and queued as
    /// property syncs ahead of the event. Returns whether anything was queued.
    pub fn dom_event(&mut self, target: DomNodeId, event_type: &str, data: Value) -> ReplicaResult<bool> {
        let Some(node) = self.ctx.view.node_for(target) else {
            log::debug!("Ignoring {} on unbound {}", event_type, target);
            return Ok(false);
        };
        let Some(listener) = self
            .ctx
            .tree
            .get(node, NamespaceId::ElementListeners, event_type)
            .cloned()
        else {
            log::debug!("{} has no '{}' listener", node, event_type);
            return Ok(false);
        };

        let synced: Vec<String> = listener
            .as_literal()
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        for property in synced {
            let Some(value) = self.ctx.view.dom().property(target, &property) else {
                continue;
            };
            if self.ctx.tree.literal(node, NamespaceId::ElementProperties, &property) == Some(&value) {
                continue;
            }
            self.ctx.tree.put(
                node,
                NamespaceId::ElementProperties,
                &property,
                ChangeValue::Literal(value.clone()),
            )?;
            self.outbox.push(Invocation::PropertySync {
                node_id: node,
                property,
                value,
            });
        }

        self.outbox.push(Invocation::Event {
            node_id: node,
            event_type: event_type.to_string(),
            event_data: data,
        });
        let added = self.ctx.tree.take_added_keys();
        self.binder.bind_added_keys(&self.ctx.view, added);
        self.flush()?;
        Ok(true)
    }

    /// Queue a navigation
    pub fn navigate(&mut self, location: impl Into<String>, state: Value) {
        self.outbox.push(Invocation::Navigation {
            state,
            location: location.into(),
        });
    }

    /// Ask the server for a full snapshot with the next message
    pub fn request_resync(&mut self) {
        if !self.resync_requested {
            log::warn!("Requesting resynchronization");
        }
        self.resync_requested = true;
    }

    /// Whether a message is waiting to be sent
    pub fn has_outgoing(&self) -> bool {
        !self.outbox.is_empty() || self.resync_requested
    }

    /// Next message for the server, if there is anything to send
    pub fn take_message(&mut self) -> Option<ClientMessage> {
        if !self.has_outgoing() {
            return None;
        }
        let message = ClientMessage {
            csrf_token: self.config.csrf_token.clone(),
            sync_id: self.sequencer.expected(),
            client_message_id: self.next_message_id,
            resynchronize: self.resync_requested,
            invocations: std::mem::take(&mut self.outbox),
        };
        self.next_message_id += 1;
        self.resync_requested = false;
        self.stats.messages_sent += 1;
        Some(message)
    }
}
