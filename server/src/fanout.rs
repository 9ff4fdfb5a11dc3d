//! Outbound fan-out to one, all, or all-but-some slots
//!
//! Code that produces messages (handlers and the simulation) writes into an
//! [`Outbox`]; the session flushes it through [`FanOut`] in emission order.
//! Each flushed message is encoded and length-prefixed exactly once, then the
//! same frame bytes go to every target on the transport the message picks.

use crate::datagram::DatagramSink;
use crate::slots::{Slot, SlotId, SlotRegistry};
use log::{debug, error, trace};
use shared::{ServerMessage, Transport, WireError};
use std::collections::HashSet;
use std::sync::Arc;

/// Who receives a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    One(SlotId),
    All,
    AllExcept(HashSet<SlotId>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub target: Target,
    pub message: ServerMessage,
}

/// Ordered buffer of messages waiting for the next flush
#[derive(Debug, Default)]
pub struct Outbox {
    pending: Vec<Outgoing>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send_to(&mut self, slot: SlotId, message: ServerMessage) {
        self.pending.push(Outgoing {
            target: Target::One(slot),
            message,
        });
    }

    pub fn send_to_all(&mut self, message: ServerMessage) {
        self.pending.push(Outgoing {
            target: Target::All,
            message,
        });
    }

    pub fn send_to_all_except(
        &mut self,
        message: ServerMessage,
        excluded: impl IntoIterator<Item = SlotId>,
    ) {
        self.pending.push(Outgoing {
            target: Target::AllExcept(excluded.into_iter().collect()),
            message,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Outgoing> {
        self.pending.drain(..)
    }
}

/// Encodes a message into a complete frame shared by every recipient.
pub fn encode_frame(message: &ServerMessage) -> Result<Arc<[u8]>, WireError> {
    let mut buffer = message.encode();
    buffer.write_length()?;
    Ok(Arc::from(buffer.into_bytes()))
}

/// Routes frames to slots over their stream or datagram endpoint
pub struct FanOut<'a> {
    slots: &'a SlotRegistry,
    datagrams: &'a dyn DatagramSink,
}

impl<'a> FanOut<'a> {
    pub fn new(slots: &'a SlotRegistry, datagrams: &'a dyn DatagramSink) -> Self {
        Self { slots, datagrams }
    }

    pub fn deliver(&self, outgoing: &Outgoing) {
        match &outgoing.target {
            Target::One(slot) => self.send_to(*slot, &outgoing.message),
            Target::All => self.send_to_all(&outgoing.message),
            Target::AllExcept(excluded) => self.send_to_all_except(&outgoing.message, excluded),
        }
    }

    pub fn send_to(&self, slot_id: SlotId, message: &ServerMessage) {
        let Some(frame) = self.frame(message) else {
            return;
        };
        match self.slots.lookup(slot_id) {
            Ok(slot) => self.route(slot, message.transport(), &frame, true),
            Err(_) => debug!("Dropping {:?} for unbound slot {}", message.opcode(), slot_id),
        }
    }

    pub fn send_to_all(&self, message: &ServerMessage) {
        let Some(frame) = self.frame(message) else {
            return;
        };
        for slot in self.slots.iter() {
            self.route(slot, message.transport(), &frame, false);
        }
    }

    pub fn send_to_all_except(&self, message: &ServerMessage, excluded: &HashSet<SlotId>) {
        let Some(frame) = self.frame(message) else {
            return;
        };
        for slot in self.slots.iter().filter(|slot| !excluded.contains(&slot.id)) {
            self.route(slot, message.transport(), &frame, false);
        }
    }

    fn frame(&self, message: &ServerMessage) -> Option<Arc<[u8]>> {
        match encode_frame(message) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!("Failed to encode {:?}: {}", message.opcode(), e);
                None
            }
        }
    }

    fn route(&self, slot: &Slot, transport: Transport, frame: &Arc<[u8]>, direct: bool) {
        match transport {
            Transport::Reliable => {
                if let Some(connection) = slot.connection() {
                    if !connection.send(Arc::clone(frame)) {
                        debug!("Slot {} writer is gone, frame dropped", slot.id);
                    }
                }
            }
            Transport::Datagram => match slot.endpoint() {
                Some(endpoint) => {
                    if let Err(e) = self.datagrams.send_datagram(frame, endpoint) {
                        debug!("Datagram to slot {} at {} failed: {}", slot.id, endpoint, e);
                    }
                }
                None if direct => debug!("Slot {} has no datagram endpoint yet", slot.id),
                None => trace!("Slot {} has no datagram endpoint yet", slot.id),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use shared::Vec3;
    use std::io;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    /// Records datagrams instead of sending them.
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub sent: Mutex<Vec<(SocketAddr, Vec<u8>)>>,
    }

    impl RecordingSink {
        pub fn take(&self) -> Vec<(SocketAddr, ServerMessage)> {
            std::mem::take(&mut *self.sent.lock())
                .into_iter()
                .map(|(addr, bytes)| (addr, ServerMessage::from_frame(&bytes).unwrap()))
                .collect()
        }
    }

    impl DatagramSink for RecordingSink {
        fn send_datagram(&self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
            self.sent.lock().push((to, bytes.to_vec()));
            Ok(())
        }
    }

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn received(rx: &mut mpsc::UnboundedReceiver<Arc<[u8]>>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            messages.push(ServerMessage::from_frame(&frame).unwrap());
        }
        messages
    }

    fn registry_with(
        count: usize,
    ) -> (SlotRegistry, Vec<mpsc::UnboundedReceiver<Arc<[u8]>>>) {
        let mut registry = SlotRegistry::new(count + 1);
        let mut receivers = Vec::new();
        for port in 0..count as u16 {
            let (tx, rx) = mpsc::unbounded_channel();
            registry.acquire(test_addr(5000 + port), tx).unwrap();
            receivers.push(rx);
        }
        (registry, receivers)
    }

    #[test]
    fn test_encode_frame_has_single_length_prefix() {
        let message = ServerMessage::PlayerDisconnected { id: 3 };
        let frame = encode_frame(&message).unwrap();
        assert_eq!(&frame[..], &[8, 0, 0, 0, 5, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_send_to_one_reliable() {
        let (registry, mut receivers) = registry_with(2);
        let sink = RecordingSink::default();
        let fan_out = FanOut::new(&registry, &sink);

        let message = ServerMessage::PlayerRespawned { id: 2 };
        fan_out.send_to(2, &message);
        fan_out.send_to(3, &message);

        assert!(received(&mut receivers[0]).is_empty());
        assert_eq!(received(&mut receivers[1]), vec![message]);
        assert!(sink.take().is_empty());
    }

    #[test]
    fn test_send_to_all_reaches_every_bound_slot() {
        let (registry, mut receivers) = registry_with(3);
        let sink = RecordingSink::default();
        let message = ServerMessage::ItemSpawned { spawner_id: 4 };
        FanOut::new(&registry, &sink).send_to_all(&message);

        for rx in receivers.iter_mut() {
            assert_eq!(received(rx), vec![message.clone()]);
        }
    }

    #[test]
    fn test_send_to_all_except_skips_excluded() {
        let (registry, mut receivers) = registry_with(3);
        let sink = RecordingSink::default();
        let excluded: HashSet<SlotId> = [1, 3].into_iter().collect();
        let message = ServerMessage::PlayerHealth { id: 2, health: 75.0 };
        FanOut::new(&registry, &sink).send_to_all_except(&message, &excluded);

        assert!(received(&mut receivers[0]).is_empty());
        assert_eq!(received(&mut receivers[1]), vec![message]);
        assert!(received(&mut receivers[2]).is_empty());
    }

    #[test]
    fn test_datagram_messages_use_bound_endpoints_only() {
        let (mut registry, mut receivers) = registry_with(2);
        registry.lookup_mut(1).unwrap().bind_endpoint(test_addr(7001));
        let sink = RecordingSink::default();

        let message = ServerMessage::PlayerPosition {
            id: 1,
            position: Vec3::new(1.0, 2.0, 3.0),
        };
        FanOut::new(&registry, &sink).send_to_all(&message);

        assert_eq!(sink.take(), vec![(test_addr(7001), message)]);
        assert!(received(&mut receivers[0]).is_empty());
        assert!(received(&mut receivers[1]).is_empty());
    }

    #[test]
    fn test_outbox_preserves_order() {
        let (registry, mut receivers) = registry_with(1);
        let sink = RecordingSink::default();
        let mut outbox = Outbox::new();
        outbox.send_to(1, ServerMessage::ItemSpawned { spawner_id: 1 });
        outbox.send_to_all(ServerMessage::ItemSpawned { spawner_id: 2 });
        outbox.send_to_all_except(ServerMessage::ItemSpawned { spawner_id: 3 }, [2]);
        outbox.send_to_all_except(ServerMessage::ItemSpawned { spawner_id: 4 }, [1]);
        assert_eq!(outbox.len(), 4);

        let fan_out = FanOut::new(&registry, &sink);
        for outgoing in outbox.drain() {
            fan_out.deliver(&outgoing);
        }
        assert!(outbox.is_empty());

        let ids: Vec<i32> = received(&mut receivers[0])
            .into_iter()
            .map(|message| match message {
                ServerMessage::ItemSpawned { spawner_id } => spawner_id,
                other => panic!("Unexpected message: {:?}", other),
            })
            .collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
