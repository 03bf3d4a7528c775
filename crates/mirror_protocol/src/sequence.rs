//! Message sequencing
//!
//! Both directions number their messages. The server processes client
//! messages strictly in order and cannot buffer them: a lower id is a
//! retransmission, a higher id means something was lost. The client may see
//! server messages out of order and holds a bounded number of early ones.

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::ServerMessage;
use std::collections::BTreeMap;

fn successor(id: u64) -> ProtocolResult<u64> {
    id.checked_add(1).ok_or(ProtocolError::SequenceExhausted(id))
}

/// What to do with an inbound client message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceVerdict {
    /// The expected message; process it
    Accept,
    /// Already processed; drop it silently
    Duplicate,
    /// Messages were lost in between; a resynchronization is needed
    Gap { expected: u64, received: u64 },
}

/// Server-side check of `clientMessageId`
#[derive(Debug, Clone, Default)]
pub struct InboundSequencer {
    expected: u64,
}

impl InboundSequencer {
    /// Sequencer expecting id 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id expected
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Classify `id`; an accepted id advances the sequence
    pub fn check(&mut self, id: u64) -> ProtocolResult<SequenceVerdict> {
        if id == self.expected {
            self.expected = successor(id)?;
            Ok(SequenceVerdict::Accept)
        } else if id < self.expected {
            log::debug!("Dropping duplicate client message {} (expected {})", id, self.expected);
            Ok(SequenceVerdict::Duplicate)
        } else {
            Ok(SequenceVerdict::Gap {
                expected: self.expected,
                received: id,
            })
        }
    }

    /// Continue after `id`, e.g. once a resynchronization accepted it
    pub fn resume_after(&mut self, id: u64) -> ProtocolResult<()> {
        self.expected = successor(id)?;
        Ok(())
    }
}

/// Outcome of offering a server message to the client sequencer
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Messages ready to apply, in order
    Ready(Vec<ServerMessage>),
    /// Held until the missing messages arrive
    Buffered,
    /// Already applied
    Duplicate,
    /// Too many messages are missing; ask the server for a resync
    ResyncNeeded,
}

/// Client-side reordering of server messages by `syncId`
#[derive(Debug, Clone)]
pub struct ServerSequencer {
    expected: u64,
    pending: BTreeMap<u64, ServerMessage>,
    max_pending: usize,
}

impl ServerSequencer {
    /// Sequencer holding at most `max_pending` early messages
    pub fn new(max_pending: usize) -> Self {
        Self {
            expected: 0,
            pending: BTreeMap::new(),
            max_pending,
        }
    }

    /// Next sync id expected
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Number of buffered messages
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Offer a message as it arrives
    pub fn offer(&mut self, message: ServerMessage) -> ProtocolResult<Delivery> {
        let id = message.sync_id;

        if message.resync {
            let next = successor(id)?;
            // A snapshot supersedes everything numbered before it
            self.pending.retain(|pending, _| *pending > id);
            self.expected = next;
            let mut ready = vec![message];
            self.drain_into(&mut ready)?;
            return Ok(Delivery::Ready(ready));
        }

        if id < self.expected || self.pending.contains_key(&id) {
            log::debug!("Dropping duplicate server message {}", id);
            return Ok(Delivery::Duplicate);
        }
        if id > self.expected {
            if self.pending.len() >= self.max_pending {
                log::warn!(
                    "Server message {} arrived while waiting for {} with {} buffered; requesting resync",
                    id,
                    self.expected,
                    self.pending.len()
                );
                self.pending.clear();
                return Ok(Delivery::ResyncNeeded);
            }
            self.pending.insert(id, message);
            return Ok(Delivery::Buffered);
        }

        self.expected = successor(id)?;
        let mut ready = vec![message];
        self.drain_into(&mut ready)?;
        Ok(Delivery::Ready(ready))
    }

    fn drain_into(&mut self, ready: &mut Vec<ServerMessage>) -> ProtocolResult<()> {
        while let Some(next) = self.pending.remove(&self.expected) {
            ready.push(next);
            self.expected = successor(self.expected)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn message(sync_id: u64) -> ServerMessage {
        ServerMessage {
            sync_id,
            client_ack: 0,
            resync: false,
            changes: Vec::new(),
            new_metadata: Map::new(),
            timing: [0, 0],
        }
    }

    fn ids(delivery: ProtocolResult<Delivery>) -> Vec<u64> {
        match delivery.unwrap() {
            Delivery::Ready(messages) => messages.iter().map(|m| m.sync_id).collect(),
            other => panic!("expected ready, got {:?}", other),
        }
    }

    #[test]
    fn test_inbound_sequencing() {
        let mut sequencer = InboundSequencer::new();
        assert_eq!(sequencer.check(0).unwrap(), SequenceVerdict::Accept);
        assert_eq!(sequencer.check(0).unwrap(), SequenceVerdict::Duplicate);
        assert_eq!(
            sequencer.check(3).unwrap(),
            SequenceVerdict::Gap { expected: 1, received: 3 }
        );
        assert_eq!(sequencer.expected(), 1);
        sequencer.resume_after(3).unwrap();
        assert_eq!(sequencer.check(4).unwrap(), SequenceVerdict::Accept);
    }

    #[test]
    fn test_last_id_cannot_be_followed() {
        let mut inbound = InboundSequencer::new();
        assert!(matches!(
            inbound.check(u64::MAX).unwrap(),
            SequenceVerdict::Gap { received: u64::MAX, .. }
        ));
        assert!(matches!(
            inbound.resume_after(u64::MAX),
            Err(ProtocolError::SequenceExhausted(u64::MAX))
        ));
        assert_eq!(inbound.expected(), 0);

        let mut outbound = ServerSequencer::new(4);
        let mut snapshot = message(u64::MAX);
        snapshot.resync = true;
        assert!(matches!(
            outbound.offer(snapshot),
            Err(ProtocolError::SequenceExhausted(u64::MAX))
        ));
        assert_eq!(outbound.expected(), 0);
    }

    #[test]
    fn test_out_of_order_messages_are_released_in_order() {
        let mut sequencer = ServerSequencer::new(4);
        assert_eq!(ids(sequencer.offer(message(0))), vec![0]);
        assert_eq!(sequencer.offer(message(2)).unwrap(), Delivery::Buffered);
        assert_eq!(sequencer.offer(message(2)).unwrap(), Delivery::Duplicate);
        assert_eq!(ids(sequencer.offer(message(1))), vec![1, 2]);
        assert_eq!(sequencer.offer(message(1)).unwrap(), Delivery::Duplicate);
        assert_eq!(sequencer.expected(), 3);
    }

    #[test]
    fn test_overflow_requests_resync() {
        let mut sequencer = ServerSequencer::new(1);
        assert_eq!(sequencer.offer(message(1)).unwrap(), Delivery::Buffered);
        assert_eq!(sequencer.offer(message(2)).unwrap(), Delivery::ResyncNeeded);
        assert_eq!(sequencer.pending(), 0);

        let mut snapshot = message(5);
        snapshot.resync = true;
        assert_eq!(ids(sequencer.offer(snapshot)), vec![5]);
        assert_eq!(sequencer.expected(), 6);
    }
}
