//! Per-tick session state owned by the simulation loop
//!
//! A [`Session`] ties the slot table, the handler table and the simulation
//! together. The network layer feeds it tasks drained from the queue; it
//! validates their origin, dispatches decoded messages, and flushes whatever
//! the handlers and the simulation emitted through the fan-out.

use crate::config::ServerConfig;
use crate::datagram::{self, Admission, DatagramSink};
use crate::dispatch::{DispatchError, DispatchTable};
use crate::error::SessionError;
use crate::fanout::{FanOut, Outbox};
use crate::simulation::{PlayerSnapshot, Simulation};
use crate::slots::{ConnectionId, FrameSender, SlotId, SlotRegistry};
use log::{debug, info, trace, warn};
use shared::{Buffer, ClientPacket, ServerMessage};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::AbortHandle;

pub struct Session<S> {
    welcome_message: String,
    slots: SlotRegistry,
    simulation: S,
    handlers: DispatchTable<S>,
    outbox: Outbox,
    datagrams: Arc<dyn DatagramSink>,
}

impl<S: Simulation> Session<S> {
    /// Fails if the handler table does not cover every client opcode.
    pub fn new(
        config: &ServerConfig,
        simulation: S,
        datagrams: Arc<dyn DatagramSink>,
    ) -> Result<Self, DispatchError> {
        Ok(Self {
            welcome_message: config.welcome_message.clone(),
            slots: SlotRegistry::new(config.max_slots),
            simulation,
            handlers: DispatchTable::standard()?,
            outbox: Outbox::new(),
            datagrams,
        })
    }

    pub fn slots(&self) -> &SlotRegistry {
        &self.slots
    }

    pub fn simulation(&self) -> &S {
        &self.simulation
    }

    pub fn simulation_mut(&mut self) -> &mut S {
        &mut self.simulation
    }

    pub(crate) fn simulation_and_outbox(&mut self) -> (&mut S, &mut Outbox) {
        (&mut self.simulation, &mut self.outbox)
    }

    /// True when the slot is bound and has completed its handshake.
    pub fn in_game(&self, slot: SlotId) -> bool {
        self.slots
            .lookup(slot)
            .map_or(false, |slot| slot.entity().is_some())
    }

    /// Binds a new stream connection and greets it.
    pub fn attach(
        &mut self,
        peer: SocketAddr,
        sender: FrameSender,
    ) -> Result<(SlotId, ConnectionId), SessionError> {
        let (slot, connection) = self.slots.acquire(peer, sender)?;
        self.outbox.send_to(
            slot,
            ServerMessage::Welcome {
                message: self.welcome_message.clone(),
                client_id: slot,
            },
        );
        Ok((slot, connection))
    }

    pub fn set_reader(&mut self, slot: SlotId, connection: ConnectionId, reader: AbortHandle) {
        self.slots.set_reader(slot, connection, reader);
    }

    /// Dispatches one stream frame. Frames from a replaced connection are
    /// dropped; a frame that fails to decode disconnects the slot.
    pub fn handle_frame(&mut self, slot: SlotId, connection: ConnectionId, payload: Vec<u8>) {
        if let Err(e) = self.slots.lookup_connection(slot, connection) {
            trace!("Dropping frame: {}", e);
            return;
        }
        if let Err(e) = self.dispatch(slot, payload) {
            warn!("Slot {} sent a bad frame: {}", slot, e);
            self.disconnect(slot, Some(connection));
        }
    }

    /// Validates a datagram's source and dispatches it.
    ///
    /// The first datagram for a bound slot only records its endpoint. Later
    /// datagrams must come from that endpoint; anything else is dropped.
    pub fn handle_datagram(&mut self, slot: SlotId, from: SocketAddr, payload: Vec<u8>) {
        let Ok(slot_ref) = self.slots.lookup_mut(slot) else {
            trace!("Dropping datagram for unbound slot {} from {}", slot, from);
            return;
        };

        match datagram::admit(slot_ref, from) {
            Admission::Bound => debug!("Slot {} datagram endpoint is {}", slot, from),
            Admission::Rejected => trace!("Dropping datagram for slot {} from {}", slot, from),
            Admission::Accepted => {
                let result =
                    datagram::unwrap_frame(payload).and_then(|frame| self.dispatch(slot, frame));
                if let Err(e) = result {
                    warn!("Slot {} sent a bad datagram: {}", slot, e);
                    self.disconnect(slot, None);
                }
            }
        }
    }

    /// Releases a slot and tells everyone it left.
    ///
    /// With `Some(connection)` nothing happens unless the slot still belongs
    /// to that connection. Disconnecting an unbound slot is a no-op.
    pub fn disconnect(&mut self, slot: SlotId, connection: Option<ConnectionId>) {
        if let Some(connection) = connection {
            if let Err(e) = self.slots.lookup_connection(slot, connection) {
                trace!("Ignoring disconnect: {}", e);
                return;
            }
        }
        let Some(released) = self.slots.release(slot) else {
            return;
        };

        if released.entity.is_some() {
            self.simulation.despawn_player(slot);
        }
        info!("{} has disconnected (slot {})", released.peer, slot);
        self.outbox
            .send_to_all(ServerMessage::PlayerDisconnected { id: slot });
    }

    /// Creates the slot's entity and replicates the world to it.
    ///
    /// Order: existing players to the newcomer, the newcomer to every player
    /// in game (itself included), then item spawners and enemies to the
    /// newcomer. A repeated handshake is ignored.
    pub fn send_into_game(&mut self, slot: SlotId, username: &str) -> Result<(), SessionError> {
        if self.slots.lookup(slot)?.entity().is_some() {
            debug!("Slot {} repeated its handshake", slot);
            return Ok(());
        }

        let player = self.simulation.spawn_player(slot, username);
        self.slots.set_entity(slot, player.id)?;
        let in_game: Vec<SlotId> = self.slots.in_game().map(|other| other.id).collect();

        for &other in in_game.iter().filter(|&&other| other != slot) {
            if let Some(existing) = self.simulation.player(other) {
                self.outbox.send_to(slot, spawn_message(&existing));
            }
        }
        for &other in &in_game {
            self.outbox.send_to(other, spawn_message(&player));
        }
        for spawner in self.simulation.item_spawners() {
            self.outbox.send_to(
                slot,
                ServerMessage::CreateItemSpawner {
                    spawner_id: spawner.id,
                    position: spawner.position,
                    has_item: spawner.has_item,
                },
            );
        }
        for enemy in self.simulation.enemies() {
            self.outbox.send_to(
                slot,
                ServerMessage::SpawnEnemy {
                    id: enemy.id,
                    position: enemy.position,
                },
            );
        }
        Ok(())
    }

    /// Advances the simulation and sends what it produced.
    pub fn tick(&mut self, dt: f32) {
        self.simulation.tick(dt, &mut self.outbox);
        self.flush();
    }

    /// Sends every pending message in emission order.
    pub fn flush(&mut self) {
        let fan_out = FanOut::new(&self.slots, self.datagrams.as_ref());
        for outgoing in self.outbox.drain() {
            fan_out.deliver(&outgoing);
        }
    }

    fn dispatch(&mut self, slot: SlotId, payload: Vec<u8>) -> Result<(), SessionError> {
        let mut packet = Buffer::from_bytes(payload);
        let opcode = ClientPacket::try_from(packet.read_i32()?)?;
        let handler = self
            .handlers
            .get(opcode)
            .ok_or(DispatchError::MissingHandler(opcode))?;
        handler(self, slot, &mut packet)?;

        if packet.unread_len() > 0 {
            debug!(
                "Slot {} {:?} left {} trailing bytes",
                slot,
                opcode,
                packet.unread_len()
            );
        }
        Ok(())
    }
}

fn spawn_message(player: &PlayerSnapshot) -> ServerMessage {
    ServerMessage::SpawnPlayer {
        id: player.id,
        username: player.username.clone(),
        position: player.position,
        rotation: player.rotation,
    }
}
