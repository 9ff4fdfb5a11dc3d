//! Fixed-capacity slot table joining both channels to the simulation
//!
//! This module owns the server-side view of who is connected:
//! - Slot lifecycle (pre-allocated, bound to a stream, entity attached, released)
//! - Stream connection handles used for outbound frames
//! - Datagram endpoint bindings
//! - Connection generations so work queued for a previous occupant is discarded
//!
//! The registry is owned by the simulation loop, which is its only writer.

use crate::error::SessionError;
use log::{debug, info};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Slot identity as it appears on the wire, in `1..=max_slots`
pub type SlotId = i32;

/// Channel feeding encoded frames to a connection's writer task
pub type FrameSender = mpsc::UnboundedSender<Arc<[u8]>>;

/// Generation number distinguishing successive connections on the same slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A live stream connection attached to a slot
///
/// Dropping the handle closes the outbound channel (ending the writer task)
/// and aborts the reader task if one was registered.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    sender: FrameSender,
    reader: Option<AbortHandle>,
}

impl Connection {
    pub fn new(id: ConnectionId, peer: SocketAddr, sender: FrameSender) -> Self {
        Self {
            id,
            peer,
            sender,
            reader: None,
        }
    }

    /// Queues a frame for the writer task. Returns false once the writer
    /// has gone away.
    pub fn send(&self, frame: Arc<[u8]>) -> bool {
        self.sender.send(frame).is_ok()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// One reusable player slot
#[derive(Debug)]
pub struct Slot {
    pub id: SlotId,
    connection: Option<Connection>,
    endpoint: Option<SocketAddr>,
    entity: Option<i32>,
}

impl Slot {
    fn new(id: SlotId) -> Self {
        Self {
            id,
            connection: None,
            endpoint: None,
            entity: None,
        }
    }

    /// True while a stream connection is attached.
    pub fn is_bound(&self) -> bool {
        self.connection.is_some()
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    /// Simulation entity, present only after a completed handshake.
    pub fn entity(&self) -> Option<i32> {
        self.entity
    }

    pub(crate) fn bind_endpoint(&mut self, addr: SocketAddr) {
        self.endpoint = Some(addr);
    }
}

/// The fixed table of slots
pub struct SlotRegistry {
    slots: Vec<Slot>,
    next_connection: u64,
}

impl SlotRegistry {
    /// Pre-allocates `capacity` unbound slots with ids `1..=capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: (1..=capacity as SlotId).map(Slot::new).collect(),
            next_connection: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots with a live stream connection.
    pub fn bound_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_bound()).count()
    }

    /// Binds a new stream connection to the first free slot.
    ///
    /// Fails with [`SessionError::ServerFull`] when every slot is taken, in
    /// which case nothing is allocated and the caller should close the stream.
    pub fn acquire(
        &mut self,
        peer: SocketAddr,
        sender: FrameSender,
    ) -> Result<(SlotId, ConnectionId), SessionError> {
        let capacity = self.capacity();
        let connection_id = ConnectionId(self.next_connection);
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| !slot.is_bound())
            .ok_or(SessionError::ServerFull(capacity))?;

        self.next_connection += 1;
        slot.connection = Some(Connection::new(connection_id, peer, sender));
        slot.endpoint = None;
        slot.entity = None;
        info!("Slot {} bound to {} ({})", slot.id, peer, connection_id);
        Ok((slot.id, connection_id))
    }

    /// Clears entity, stream connection and datagram binding.
    ///
    /// Idempotent: returns the released entity (if any) the first time and
    /// `None` for a slot that is already unbound.
    pub fn release(&mut self, slot_id: SlotId) -> Option<Released> {
        let slot = self.slot_mut(slot_id)?;
        let connection = slot.connection.take()?;
        slot.endpoint = None;
        let entity = slot.entity.take();
        debug!("Slot {} released ({})", slot_id, connection.id);
        Some(Released {
            peer: connection.peer,
            entity,
        })
    }

    /// Returns a bound slot, or [`SessionError::SlotNotFound`].
    pub fn lookup(&self, slot_id: SlotId) -> Result<&Slot, SessionError> {
        self.slot(slot_id)
            .filter(|slot| slot.is_bound())
            .ok_or(SessionError::SlotNotFound(slot_id))
    }

    pub fn lookup_mut(&mut self, slot_id: SlotId) -> Result<&mut Slot, SessionError> {
        self.slot_mut(slot_id)
            .filter(|slot| slot.is_bound())
            .ok_or(SessionError::SlotNotFound(slot_id))
    }

    /// Like [`lookup`](Self::lookup), but also requires the slot to still
    /// belong to `connection`.
    pub fn lookup_connection(
        &self,
        slot_id: SlotId,
        connection: ConnectionId,
    ) -> Result<&Slot, SessionError> {
        let slot = self.lookup(slot_id)?;
        match slot.connection() {
            Some(current) if current.id == connection => Ok(slot),
            _ => Err(SessionError::StaleConnection {
                slot: slot_id,
                connection,
            }),
        }
    }

    /// Registers the reader task so releasing the slot stops it.
    pub fn set_reader(&mut self, slot_id: SlotId, connection: ConnectionId, reader: AbortHandle) {
        match self.slot_mut(slot_id).and_then(|slot| slot.connection.as_mut()) {
            Some(current) if current.id == connection => current.reader = Some(reader),
            _ => reader.abort(),
        }
    }

    pub fn set_entity(&mut self, slot_id: SlotId, entity: i32) -> Result<(), SessionError> {
        self.lookup_mut(slot_id)?.entity = Some(entity);
        Ok(())
    }

    /// All slots in id order, bound or not.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    /// Slots whose handshake has attached an entity, in id order.
    pub fn in_game(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter().filter(|slot| slot.entity.is_some())
    }

    fn slot(&self, slot_id: SlotId) -> Option<&Slot> {
        let index = usize::try_from(slot_id).ok()?.checked_sub(1)?;
        self.slots.get(index)
    }

    fn slot_mut(&mut self, slot_id: SlotId) -> Option<&mut Slot> {
        let index = usize::try_from(slot_id).ok()?.checked_sub(1)?;
        self.slots.get_mut(index)
    }
}

/// What a slot held when it was released
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Released {
    pub peer: SocketAddr,
    pub entity: Option<i32>,
}
