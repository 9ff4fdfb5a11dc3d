//! Error taxonomy for the session layer

use crate::dispatch::DispatchError;
use crate::slots::{ConnectionId, SlotId};
use shared::WireError;
use thiserror::Error;

/// Errors raised while accepting, decoding or routing traffic for a slot.
///
/// Everything except [`SessionError::Dispatch`] and [`SessionError::Io`] during
/// startup is local to one slot and never aborts the server.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The slot id is out of range or has no live stream connection.
    #[error("slot {0} is not bound")]
    SlotNotFound(SlotId),

    /// A queued task belongs to a connection that has since been replaced.
    #[error("slot {slot} no longer belongs to connection {connection}")]
    StaleConnection {
        slot: SlotId,
        connection: ConnectionId,
    },

    /// Every slot already has a live connection.
    #[error("all {0} slots are occupied")]
    ServerFull(usize),

    /// A length prefix of zero or less.
    #[error("invalid frame length {0}")]
    InvalidFrameLength(i32),

    #[error("frame of {length} bytes exceeds limit of {limit}")]
    FrameTooLarge { length: usize, limit: usize },

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Framing-class faults are fatal to the connection that produced them.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            SessionError::InvalidFrameLength(_)
                | SessionError::FrameTooLarge { .. }
                | SessionError::Wire(_)
        )
    }
}
