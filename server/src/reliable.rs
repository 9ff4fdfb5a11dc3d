//! Per-slot stream channel: frame reassembly plus reader and writer tasks

use crate::error::SessionError;
use crate::queue::{Task, TaskQueue};
use crate::slots::{ConnectionId, SlotId};
use log::{debug, trace, warn};
use shared::{Buffer, LENGTH_PREFIX_SIZE};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Size of each raw socket read
pub const RECEIVE_BUFFER_SIZE: usize = 4096;

/// Rebuilds length-prefixed frames from arbitrarily chunked stream reads
///
/// Bytes are appended as they arrive; [`next_frame`](Self::next_frame) yields
/// complete frame payloads one at a time and keeps any partial trailing frame
/// buffered for the next read.
#[derive(Debug)]
pub struct FrameAssembler {
    pending: Buffer,
    max_frame_len: usize,
}

impl FrameAssembler {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            pending: Buffer::new(),
            max_frame_len,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.pending.extend_from_slice(data);
    }

    /// Bytes received but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.pending.unread_len()
    }

    /// Returns the next complete payload, `Ok(None)` when more bytes are
    /// needed, or an error for a corrupt length prefix.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        if self.pending.unread_len() < LENGTH_PREFIX_SIZE {
            self.pending.reset(true);
            return Ok(None);
        }

        let length = self.pending.peek_i32()?;
        if length <= 0 {
            return Err(SessionError::InvalidFrameLength(length));
        }
        let length = length as usize;
        if length > self.max_frame_len {
            return Err(SessionError::FrameTooLarge {
                length,
                limit: self.max_frame_len,
            });
        }
        if length > self.pending.unread_len() - LENGTH_PREFIX_SIZE {
            self.pending.reset(true);
            return Ok(None);
        }

        self.pending.read_i32()?;
        let payload = self.pending.read_bytes(length)?.to_vec();
        Ok(Some(payload))
    }
}

/// Spawns the task that reads one connection and queues its frames in order.
///
/// Any read error, end of stream or framing fault queues a
/// [`Task::Disconnected`] and ends the task.
pub fn spawn_reader(
    mut reader: OwnedReadHalf,
    slot: SlotId,
    connection: ConnectionId,
    queue: Arc<TaskQueue>,
    max_frame_len: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut assembler = FrameAssembler::new(max_frame_len);
        let mut chunk = vec![0u8; RECEIVE_BUFFER_SIZE];

        'read: loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    debug!("Slot {} closed its stream", slot);
                    break;
                }
                Ok(n) => {
                    assembler.extend(&chunk[..n]);
                    loop {
                        match assembler.next_frame() {
                            Ok(Some(payload)) => {
                                trace!("Slot {} frame of {} bytes", slot, payload.len());
                                queue.push(Task::Frame {
                                    slot,
                                    connection,
                                    payload,
                                });
                            }
                            Ok(None) => break,
                            Err(e) => {
                                warn!("Slot {} sent a corrupt frame: {}", slot, e);
                                break 'read;
                            }
                        }
                    }
                }
                Err(e) => {
                    debug!("Slot {} read failed: {}", slot, e);
                    break;
                }
            }
        }

        queue.push(Task::Disconnected { slot, connection });
    })
}

/// Spawns the task that writes queued frames to one connection.
///
/// The task ends quietly when the slot drops its sender; a write failure
/// queues a [`Task::Disconnected`].
pub fn spawn_writer(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Arc<[u8]>>,
    slot: SlotId,
    connection: ConnectionId,
    queue: Arc<TaskQueue>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if let Err(e) = writer.write_all(&frame).await {
                debug!("Slot {} write failed: {}", slot, e);
                queue.push(Task::Disconnected { slot, connection });
                return;
            }
        }
        let _ = writer.shutdown().await;
    })
}
