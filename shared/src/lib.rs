//! Wire contract shared between the session server and its clients
//!
//! - [`wire`]: the little-endian [`Buffer`] codec and frame layout
//! - [`math`]: vector and quaternion value types
//! - [`protocol`]: opcode enumerations and typed messages for both directions

pub mod math;
pub mod protocol;
pub mod wire;

pub use math::{Quat, Vec3};
pub use protocol::{ClientMessage, ClientPacket, ServerMessage, ServerPacket, Transport};
pub use wire::{Buffer, WireError, LENGTH_PREFIX_SIZE};

/// Port used for both the stream listener and the datagram socket
pub const DEFAULT_PORT: u16 = 3000;

/// Number of movement flags a client sends: forward, back, left, right, jump
pub const MOVEMENT_INPUTS: usize = 5;
