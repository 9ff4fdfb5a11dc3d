//! Handoff from channel tasks to the simulation loop
//!
//! Channel tasks push tagged [`Task`] values; the simulation loop takes the
//! whole batch once per tick. The lock is held only for the push or the
//! swap, so channel tasks never wait on simulation work.

use crate::slots::{ConnectionId, SlotId};
use parking_lot::Mutex;
use std::net::SocketAddr;
use tokio::net::TcpStream;

/// Work for the simulation loop, in arrival order
#[derive(Debug)]
pub enum Task {
    /// A stream connection was accepted and needs a slot.
    Connected { stream: TcpStream, peer: SocketAddr },
    /// One complete stream frame payload (opcode + fields).
    Frame {
        slot: SlotId,
        connection: ConnectionId,
        payload: Vec<u8>,
    },
    /// A datagram with its slot id already stripped.
    Datagram {
        slot: SlotId,
        from: SocketAddr,
        payload: Vec<u8>,
    },
    /// The stream for this connection failed or closed.
    Disconnected {
        slot: SlotId,
        connection: ConnectionId,
    },
}

/// FIFO queue guarded by a single lock
#[derive(Debug, Default)]
pub struct TaskQueue {
    tasks: Mutex<Vec<Task>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: Task) {
        self.tasks.lock().push(task);
    }

    /// Takes every queued task and leaves the queue empty.
    pub fn drain(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock())
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}
