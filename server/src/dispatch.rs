//! Opcode → handler table for client messages
//!
//! The table is an explicit list built once at startup. Every
//! [`ClientPacket`] must map to exactly one handler; a gap or a duplicate is a
//! configuration fault that stops the server from starting.
//!
//! Each handler receives the originating slot and a cursor positioned just
//! after the opcode, and reads exactly the fields its message declares.

use crate::error::SessionError;
use crate::session::Session;
use crate::simulation::Simulation;
use crate::slots::SlotId;
use log::{info, warn};
use shared::{Buffer, ClientPacket, WireError};
use std::collections::HashMap;
use thiserror::Error;

pub type Handler<S> = fn(&mut Session<S>, SlotId, &mut Buffer) -> Result<(), SessionError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no handler registered for {0:?}")]
    MissingHandler(ClientPacket),

    #[error("more than one handler registered for {0:?}")]
    DuplicateHandler(ClientPacket),
}

pub struct DispatchTable<S> {
    handlers: HashMap<ClientPacket, Handler<S>>,
}

impl<S: Simulation> DispatchTable<S> {
    /// Builds a table, requiring one handler per client opcode.
    pub fn new(
        entries: impl IntoIterator<Item = (ClientPacket, Handler<S>)>,
    ) -> Result<Self, DispatchError> {
        let mut handlers = HashMap::new();
        for (opcode, handler) in entries {
            if handlers.insert(opcode, handler).is_some() {
                return Err(DispatchError::DuplicateHandler(opcode));
            }
        }
        if let Some(missing) = ClientPacket::ALL
            .into_iter()
            .find(|opcode| !handlers.contains_key(opcode))
        {
            return Err(DispatchError::MissingHandler(missing));
        }
        Ok(Self { handlers })
    }

    /// The server's handler set.
    pub fn standard() -> Result<Self, DispatchError> {
        let entries: [(ClientPacket, Handler<S>); 4] = [
            (ClientPacket::WelcomeReceived, welcome_received::<S>),
            (ClientPacket::PlayerMovement, player_movement::<S>),
            (ClientPacket::PlayerShoot, player_shoot::<S>),
            (ClientPacket::PlayerThrowItem, player_throw_item::<S>),
        ];
        Self::new(entries)
    }

    pub fn get(&self, opcode: ClientPacket) -> Option<Handler<S>> {
        self.handlers.get(&opcode).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Handshake: `i32 claimed id | string username`.
fn welcome_received<S: Simulation>(
    session: &mut Session<S>,
    slot: SlotId,
    packet: &mut Buffer,
) -> Result<(), SessionError> {
    let claimed = packet.read_i32()?;
    let username = packet.read_string()?;

    if let Some(connection) = session.slots().lookup(slot)?.connection() {
        info!("{} connected as {} in slot {}", connection.peer, username, slot);
    }
    if claimed != slot {
        warn!(
            "Player \"{}\" (slot {}) has assumed the wrong id ({})",
            username, slot, claimed
        );
    }
    session.send_into_game(slot, &username)
}

/// `i32 count | count × bool | quat rotation`.
fn player_movement<S: Simulation>(
    session: &mut Session<S>,
    slot: SlotId,
    packet: &mut Buffer,
) -> Result<(), SessionError> {
    let count = packet.read_i32()?;
    let count = usize::try_from(count).map_err(|_| WireError::NegativeLength(count))?;
    let mut inputs = Vec::with_capacity(count.min(packet.unread_len()));
    for _ in 0..count {
        inputs.push(packet.read_bool()?);
    }
    let rotation = packet.read_quat()?;

    if session.in_game(slot) {
        session.simulation_mut().set_input(slot, &inputs, rotation);
    }
    Ok(())
}

/// `vec3 direction`.
fn player_shoot<S: Simulation>(
    session: &mut Session<S>,
    slot: SlotId,
    packet: &mut Buffer,
) -> Result<(), SessionError> {
    let direction = packet.read_vec3()?;
    if session.in_game(slot) {
        let (simulation, outbox) = session.simulation_and_outbox();
        simulation.shoot(slot, direction, outbox);
    }
    Ok(())
}

/// `vec3 direction`.
fn player_throw_item<S: Simulation>(
    session: &mut Session<S>,
    slot: SlotId,
    packet: &mut Buffer,
) -> Result<(), SessionError> {
    let direction = packet.read_vec3()?;
    if session.in_game(slot) {
        let (simulation, outbox) = session.simulation_and_outbox();
        simulation.throw_item(slot, direction, outbox);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::fanout::tests::RecordingSink;
    use crate::game::World;
    use shared::{ClientMessage, Quat, Vec3};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn noop<S: Simulation>(
        _: &mut Session<S>,
        _: SlotId,
        _: &mut Buffer,
    ) -> Result<(), SessionError> {
        Ok(())
    }

    #[test]
    fn test_standard_table_covers_every_opcode() {
        let table = DispatchTable::<World>::standard().unwrap();
        assert_eq!(table.len(), ClientPacket::ALL.len());
        for opcode in ClientPacket::ALL {
            assert!(table.get(opcode).is_some());
        }
    }

    #[test]
    fn test_missing_handler_is_startup_error() {
        let entries: Vec<(ClientPacket, Handler<World>)> = vec![
            (ClientPacket::WelcomeReceived, noop::<World>),
            (ClientPacket::PlayerMovement, noop::<World>),
            (ClientPacket::PlayerShoot, noop::<World>),
        ];
        assert_eq!(
            DispatchTable::new(entries).err(),
            Some(DispatchError::MissingHandler(ClientPacket::PlayerThrowItem))
        );
    }

    #[test]
    fn test_duplicate_handler_is_startup_error() {
        let entries: Vec<(ClientPacket, Handler<World>)> = vec![
            (ClientPacket::PlayerShoot, noop::<World>),
            (ClientPacket::PlayerShoot, noop::<World>),
        ];
        assert_eq!(
            DispatchTable::new(entries).err(),
            Some(DispatchError::DuplicateHandler(ClientPacket::PlayerShoot))
        );
    }

    /// Runs the registered handler for `message` and returns the bytes it
    /// left unread.
    fn unread_after(session: &mut Session<World>, slot: SlotId, message: &ClientMessage) -> usize {
        let mut packet = message.encode();
        let opcode = ClientPacket::try_from(packet.read_i32().unwrap()).unwrap();
        let handler = DispatchTable::<World>::standard().unwrap().get(opcode).unwrap();
        handler(session, slot, &mut packet).unwrap();
        packet.unread_len()
    }

    #[test]
    fn test_handlers_consume_exactly_their_fields() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(
            &ServerConfig::default(),
            World::with_layout(Vec::new(), None),
            sink,
        )
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let peer: SocketAddr = "127.0.0.1:5000".parse().unwrap();
        let (slot, _) = session.attach(peer, tx).unwrap();

        let messages = [
            ClientMessage::WelcomeReceived {
                client_id: slot,
                username: "Ann".to_string(),
            },
            ClientMessage::PlayerMovement {
                inputs: vec![true, false, true, false, false],
                rotation: Quat::new(0.0, 0.38, 0.0, 0.92),
            },
            ClientMessage::PlayerShoot {
                direction: Vec3::new(0.0, 0.0, 1.0),
            },
            ClientMessage::PlayerThrowItem {
                direction: Vec3::new(0.0, 0.5, 1.0),
            },
        ];
        for message in &messages {
            assert_eq!(unread_after(&mut session, slot, message), 0, "{:?}", message);
        }
    }

    #[test]
    fn test_truncated_movement_is_wire_error() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(
            &ServerConfig::default(),
            World::with_layout(Vec::new(), None),
            sink,
        )
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (slot, _) = session
            .attach("127.0.0.1:5000".parse().unwrap(), tx)
            .unwrap();

        // declares 200 inputs but carries 2
        let mut packet = Buffer::new();
        packet.write_i32(200);
        packet.write_bool(true);
        packet.write_bool(false);
        let mut packet = Buffer::from_bytes(packet.into_bytes());

        let result = player_movement(&mut session, slot, &mut packet);
        assert!(matches!(result, Err(SessionError::Wire(WireError::OverRead { .. }))));
    }

    #[test]
    fn test_intents_without_entity_are_noops() {
        let sink = Arc::new(RecordingSink::default());
        let mut session = Session::new(
            &ServerConfig::default(),
            World::with_layout(Vec::new(), None),
            sink,
        )
        .unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        let (slot, _) = session
            .attach("127.0.0.1:5000".parse().unwrap(), tx)
            .unwrap();

        let message = ClientMessage::PlayerShoot {
            direction: Vec3::UP,
        };
        assert_eq!(unread_after(&mut session, slot, &message), 0);
        assert!(session.simulation().player(slot).is_none());
    }
}
