//! Opcode enumerations and typed messages for both directions
//!
//! The numeric values are part of the wire contract: renumbering an opcode
//! breaks every deployed client.

use crate::math::{Quat, Vec3};
use crate::wire::{Buffer, WireError};

/// Which transport a message travels on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// Ordered stream, used for anything that changes state.
    Reliable,
    /// Send-and-forget, used for high-frequency position updates.
    Datagram,
}

/// Client → server opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ClientPacket {
    WelcomeReceived = 1,
    PlayerMovement = 2,
    PlayerShoot = 3,
    PlayerThrowItem = 4,
}

impl ClientPacket {
    pub const ALL: [ClientPacket; 4] = [
        ClientPacket::WelcomeReceived,
        ClientPacket::PlayerMovement,
        ClientPacket::PlayerShoot,
        ClientPacket::PlayerThrowItem,
    ];
}

impl TryFrom<i32> for ClientPacket {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        ClientPacket::ALL
            .into_iter()
            .find(|packet| *packet as i32 == value)
            .ok_or(WireError::UnknownOpcode(value))
    }
}

/// Server → client opcodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ServerPacket {
    Welcome = 1,
    SpawnPlayer = 2,
    PlayerPosition = 3,
    PlayerRotation = 4,
    PlayerDisconnected = 5,
    PlayerHealth = 6,
    PlayerRespawned = 7,
    CreateItemSpawner = 8,
    ItemSpawned = 9,
    ItemPickedUp = 10,
    SpawnProjectile = 11,
    ProjectilePosition = 12,
    ProjectileExploded = 13,
    SpawnEnemy = 14,
    EnemyPosition = 15,
    EnemyHealth = 16,
}

impl ServerPacket {
    pub const ALL: [ServerPacket; 16] = [
        ServerPacket::Welcome,
        ServerPacket::SpawnPlayer,
        ServerPacket::PlayerPosition,
        ServerPacket::PlayerRotation,
        ServerPacket::PlayerDisconnected,
        ServerPacket::PlayerHealth,
        ServerPacket::PlayerRespawned,
        ServerPacket::CreateItemSpawner,
        ServerPacket::ItemSpawned,
        ServerPacket::ItemPickedUp,
        ServerPacket::SpawnProjectile,
        ServerPacket::ProjectilePosition,
        ServerPacket::ProjectileExploded,
        ServerPacket::SpawnEnemy,
        ServerPacket::EnemyPosition,
        ServerPacket::EnemyHealth,
    ];
}

impl TryFrom<i32> for ServerPacket {
    type Error = WireError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        ServerPacket::ALL
            .into_iter()
            .find(|packet| *packet as i32 == value)
            .ok_or(WireError::UnknownOpcode(value))
    }
}

/// Messages a client sends to the server
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    WelcomeReceived { client_id: i32, username: String },
    PlayerMovement { inputs: Vec<bool>, rotation: Quat },
    PlayerShoot { direction: Vec3 },
    PlayerThrowItem { direction: Vec3 },
}

impl ClientMessage {
    pub fn opcode(&self) -> ClientPacket {
        match self {
            ClientMessage::WelcomeReceived { .. } => ClientPacket::WelcomeReceived,
            ClientMessage::PlayerMovement { .. } => ClientPacket::PlayerMovement,
            ClientMessage::PlayerShoot { .. } => ClientPacket::PlayerShoot,
            ClientMessage::PlayerThrowItem { .. } => ClientPacket::PlayerThrowItem,
        }
    }

    /// Opcode and fields, without the length prefix.
    pub fn encode(&self) -> Buffer {
        let mut buffer = Buffer::with_opcode(self.opcode() as i32);
        match self {
            ClientMessage::WelcomeReceived {
                client_id,
                username,
            } => {
                buffer.write_i32(*client_id);
                buffer.write_str(username);
            }
            ClientMessage::PlayerMovement { inputs, rotation } => {
                buffer.write_i32(inputs.len() as i32);
                for input in inputs {
                    buffer.write_bool(*input);
                }
                buffer.write_quat(*rotation);
            }
            ClientMessage::PlayerShoot { direction }
            | ClientMessage::PlayerThrowItem { direction } => buffer.write_vec3(*direction),
        }
        buffer
    }

    /// A complete stream frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, WireError> {
        let mut buffer = self.encode();
        buffer.write_length()?;
        Ok(buffer.into_bytes())
    }

    /// A complete datagram: the sender's slot id followed by a frame.
    pub fn to_datagram(&self, slot: i32) -> Result<Vec<u8>, WireError> {
        let mut buffer = Buffer::new();
        buffer.write_i32(slot);
        buffer.write_bytes(&self.to_frame()?);
        Ok(buffer.into_bytes())
    }
}

/// Messages the server sends to clients
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Welcome { message: String, client_id: i32 },
    SpawnPlayer { id: i32, username: String, position: Vec3, rotation: Quat },
    PlayerPosition { id: i32, position: Vec3 },
    PlayerRotation { id: i32, rotation: Quat },
    PlayerDisconnected { id: i32 },
    PlayerHealth { id: i32, health: f32 },
    PlayerRespawned { id: i32 },
    CreateItemSpawner { spawner_id: i32, position: Vec3, has_item: bool },
    ItemSpawned { spawner_id: i32 },
    ItemPickedUp { spawner_id: i32, by_player: i32 },
    SpawnProjectile { id: i32, position: Vec3, thrown_by: i32 },
    ProjectilePosition { id: i32, position: Vec3 },
    ProjectileExploded { id: i32, position: Vec3 },
    SpawnEnemy { id: i32, position: Vec3 },
    EnemyPosition { id: i32, position: Vec3 },
    EnemyHealth { id: i32, health: f32 },
}

impl ServerMessage {
    pub fn opcode(&self) -> ServerPacket {
        match self {
            ServerMessage::Welcome { .. } => ServerPacket::Welcome,
            ServerMessage::SpawnPlayer { .. } => ServerPacket::SpawnPlayer,
            ServerMessage::PlayerPosition { .. } => ServerPacket::PlayerPosition,
            ServerMessage::PlayerRotation { .. } => ServerPacket::PlayerRotation,
            ServerMessage::PlayerDisconnected { .. } => ServerPacket::PlayerDisconnected,
            ServerMessage::PlayerHealth { .. } => ServerPacket::PlayerHealth,
            ServerMessage::PlayerRespawned { .. } => ServerPacket::PlayerRespawned,
            ServerMessage::CreateItemSpawner { .. } => ServerPacket::CreateItemSpawner,
            ServerMessage::ItemSpawned { .. } => ServerPacket::ItemSpawned,
            ServerMessage::ItemPickedUp { .. } => ServerPacket::ItemPickedUp,
            ServerMessage::SpawnProjectile { .. } => ServerPacket::SpawnProjectile,
            ServerMessage::ProjectilePosition { .. } => ServerPacket::ProjectilePosition,
            ServerMessage::ProjectileExploded { .. } => ServerPacket::ProjectileExploded,
            ServerMessage::SpawnEnemy { .. } => ServerPacket::SpawnEnemy,
            ServerMessage::EnemyPosition { .. } => ServerPacket::EnemyPosition,
            ServerMessage::EnemyHealth { .. } => ServerPacket::EnemyHealth,
        }
    }

    /// Positions and rotations go out as datagrams; everything else is
    /// state-affecting and rides the stream.
    pub fn transport(&self) -> Transport {
        match self {
            ServerMessage::PlayerPosition { .. }
            | ServerMessage::PlayerRotation { .. }
            | ServerMessage::ProjectilePosition { .. }
            | ServerMessage::EnemyPosition { .. } => Transport::Datagram,
            _ => Transport::Reliable,
        }
    }

    /// Opcode and fields, without the length prefix.
    pub fn encode(&self) -> Buffer {
        let mut buffer = Buffer::with_opcode(self.opcode() as i32);
        match self {
            ServerMessage::Welcome { message, client_id } => {
                buffer.write_str(message);
                buffer.write_i32(*client_id);
            }
            ServerMessage::SpawnPlayer {
                id,
                username,
                position,
                rotation,
            } => {
                buffer.write_i32(*id);
                buffer.write_str(username);
                buffer.write_vec3(*position);
                buffer.write_quat(*rotation);
            }
            ServerMessage::PlayerRotation { id, rotation } => {
                buffer.write_i32(*id);
                buffer.write_quat(*rotation);
            }
            ServerMessage::PlayerDisconnected { id }
            | ServerMessage::PlayerRespawned { id }
            | ServerMessage::ItemSpawned { spawner_id: id } => buffer.write_i32(*id),
            ServerMessage::PlayerHealth { id, health }
            | ServerMessage::EnemyHealth { id, health } => {
                buffer.write_i32(*id);
                buffer.write_f32(*health);
            }
            ServerMessage::CreateItemSpawner {
                spawner_id,
                position,
                has_item,
            } => {
                buffer.write_i32(*spawner_id);
                buffer.write_vec3(*position);
                buffer.write_bool(*has_item);
            }
            ServerMessage::ItemPickedUp {
                spawner_id,
                by_player,
            } => {
                buffer.write_i32(*spawner_id);
                buffer.write_i32(*by_player);
            }
            ServerMessage::SpawnProjectile {
                id,
                position,
                thrown_by,
            } => {
                buffer.write_i32(*id);
                buffer.write_vec3(*position);
                buffer.write_i32(*thrown_by);
            }
            ServerMessage::PlayerPosition { id, position }
            | ServerMessage::ProjectilePosition { id, position }
            | ServerMessage::ProjectileExploded { id, position }
            | ServerMessage::SpawnEnemy { id, position }
            | ServerMessage::EnemyPosition { id, position } => {
                buffer.write_i32(*id);
                buffer.write_vec3(*position);
            }
        }
        buffer
    }

    /// Decodes one message from a frame payload (cursor at the opcode).
    pub fn decode(buffer: &mut Buffer) -> Result<Self, WireError> {
        let opcode = ServerPacket::try_from(buffer.read_i32()?)?;
        let message = match opcode {
            ServerPacket::Welcome => ServerMessage::Welcome {
                message: buffer.read_string()?,
                client_id: buffer.read_i32()?,
            },
            ServerPacket::SpawnPlayer => ServerMessage::SpawnPlayer {
                id: buffer.read_i32()?,
                username: buffer.read_string()?,
                position: buffer.read_vec3()?,
                rotation: buffer.read_quat()?,
            },
            ServerPacket::PlayerPosition => ServerMessage::PlayerPosition {
                id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
            },
            ServerPacket::PlayerRotation => ServerMessage::PlayerRotation {
                id: buffer.read_i32()?,
                rotation: buffer.read_quat()?,
            },
            ServerPacket::PlayerDisconnected => ServerMessage::PlayerDisconnected {
                id: buffer.read_i32()?,
            },
            ServerPacket::PlayerHealth => ServerMessage::PlayerHealth {
                id: buffer.read_i32()?,
                health: buffer.read_f32()?,
            },
            ServerPacket::PlayerRespawned => ServerMessage::PlayerRespawned {
                id: buffer.read_i32()?,
            },
            ServerPacket::CreateItemSpawner => ServerMessage::CreateItemSpawner {
                spawner_id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
                has_item: buffer.read_bool()?,
            },
            ServerPacket::ItemSpawned => ServerMessage::ItemSpawned {
                spawner_id: buffer.read_i32()?,
            },
            ServerPacket::ItemPickedUp => ServerMessage::ItemPickedUp {
                spawner_id: buffer.read_i32()?,
                by_player: buffer.read_i32()?,
            },
            ServerPacket::SpawnProjectile => ServerMessage::SpawnProjectile {
                id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
                thrown_by: buffer.read_i32()?,
            },
            ServerPacket::ProjectilePosition => ServerMessage::ProjectilePosition {
                id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
            },
            ServerPacket::ProjectileExploded => ServerMessage::ProjectileExploded {
                id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
            },
            ServerPacket::SpawnEnemy => ServerMessage::SpawnEnemy {
                id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
            },
            ServerPacket::EnemyPosition => ServerMessage::EnemyPosition {
                id: buffer.read_i32()?,
                position: buffer.read_vec3()?,
            },
            ServerPacket::EnemyHealth => ServerMessage::EnemyHealth {
                id: buffer.read_i32()?,
                health: buffer.read_f32()?,
            },
        };
        Ok(message)
    }

    /// Decodes a complete frame, length prefix included.
    pub fn from_frame(frame: &[u8]) -> Result<Self, WireError> {
        let mut buffer = Buffer::from_bytes(frame.to_vec());
        let length = buffer.read_i32()?;
        let length = usize::try_from(length).map_err(|_| WireError::NegativeLength(length))?;
        let mut payload = Buffer::from_bytes(buffer.read_bytes(length)?.to_vec());
        Self::decode(&mut payload)
    }
}
