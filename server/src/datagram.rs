//! Shared datagram channel: endpoint binding, validation and the receive task

use crate::error::SessionError;
use crate::queue::{Task, TaskQueue};
use crate::slots::{Slot, SlotId};
use log::{debug, trace};
use shared::{Buffer, LENGTH_PREFIX_SIZE};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Largest datagram the receive task accepts
pub const DATAGRAM_BUFFER_SIZE: usize = 4096;

/// Outbound half of the datagram channel
///
/// Sends never block and never fail the caller beyond the returned error;
/// a datagram that cannot be sent right now is simply lost.
pub trait DatagramSink: Send + Sync {
    fn send_datagram(&self, bytes: &[u8], to: SocketAddr) -> io::Result<()>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, bytes: &[u8], to: SocketAddr) -> io::Result<()> {
        self.try_send_to(bytes, to).map(|_| ())
    }
}

/// Outcome of checking a datagram's source against its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// First contact: the slot is now bound to this address. Not dispatched.
    Bound,
    /// Source matches the bound endpoint.
    Accepted,
    /// Source differs from the bound endpoint. Dropped without rebinding.
    Rejected,
}

/// Binds the slot on first contact, then only admits its bound address.
pub fn admit(slot: &mut Slot, from: SocketAddr) -> Admission {
    match slot.endpoint() {
        None => {
            slot.bind_endpoint(from);
            Admission::Bound
        }
        Some(bound) if bound == from => Admission::Accepted,
        Some(_) => Admission::Rejected,
    }
}

/// Splits the leading slot id from a raw datagram.
///
/// Datagrams too short to carry a slot id, or carrying slot 0, are ignored.
pub fn split_slot(datagram: &[u8]) -> Option<(SlotId, Vec<u8>)> {
    if datagram.len() < LENGTH_PREFIX_SIZE {
        return None;
    }
    let (id, rest) = datagram.split_at(LENGTH_PREFIX_SIZE);
    let slot = SlotId::from_le_bytes(id.try_into().ok()?);
    if slot == 0 {
        return None;
    }
    Some((slot, rest.to_vec()))
}

/// Extracts the single length-prefixed frame a datagram carries after its
/// slot id, returning the payload (opcode + fields).
pub fn unwrap_frame(payload: Vec<u8>) -> Result<Vec<u8>, SessionError> {
    let mut buffer = Buffer::from_bytes(payload);
    let length = buffer.read_i32()?;
    if length <= 0 {
        return Err(SessionError::InvalidFrameLength(length));
    }
    Ok(buffer.read_bytes(length as usize)?.to_vec())
}

/// Spawns the task receiving every datagram sent to the server.
pub fn spawn_receiver(socket: Arc<UdpSocket>, queue: Arc<TaskQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buffer = vec![0u8; DATAGRAM_BUFFER_SIZE];

        loop {
            match socket.recv_from(&mut buffer).await {
                Ok((len, from)) => match split_slot(&buffer[..len]) {
                    Some((slot, payload)) => queue.push(Task::Datagram {
                        slot,
                        from,
                        payload,
                    }),
                    None => trace!("Ignoring {} byte datagram from {}", len, from),
                },
                Err(e) => {
                    debug!("Error receiving datagram: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::SlotRegistry;
    use shared::{ClientMessage, Quat};
    use tokio::sync::mpsc;

    fn test_addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_first_contact_binds_then_validates() {
        let mut registry = SlotRegistry::new(1);
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.acquire(test_addr(5000), tx).unwrap();
        let slot = registry.lookup_mut(1).unwrap();

        assert_eq!(admit(slot, test_addr(6000)), Admission::Bound);
        assert_eq!(slot.endpoint(), Some(test_addr(6000)));
        assert_eq!(admit(slot, test_addr(6000)), Admission::Accepted);
        assert_eq!(admit(slot, test_addr(6001)), Admission::Rejected);
        assert_eq!(slot.endpoint(), Some(test_addr(6000)));
    }

    #[test]
    fn test_split_slot() {
        let datagram = ClientMessage::PlayerMovement {
            inputs: vec![false; 5],
            rotation: Quat::IDENTITY,
        }
        .to_datagram(2)
        .unwrap();

        let (slot, payload) = split_slot(&datagram).unwrap();
        assert_eq!(slot, 2);
        assert_eq!(payload.len(), datagram.len() - 4);

        assert!(split_slot(&[1, 0, 0]).is_none());
        assert!(split_slot(&[0, 0, 0, 0, 9]).is_none());
    }

    #[test]
    fn test_unwrap_frame() {
        let message = ClientMessage::PlayerShoot {
            direction: shared::Vec3::UP,
        };
        let frame = message.to_frame().unwrap();
        assert_eq!(unwrap_frame(frame).unwrap(), message.encode().into_bytes());

        assert!(matches!(
            unwrap_frame(vec![0, 0, 0, 0]),
            Err(SessionError::InvalidFrameLength(0))
        ));
        assert!(matches!(
            unwrap_frame(vec![8, 0, 0, 0, 1]),
            Err(SessionError::Wire(_))
        ));
        assert!(unwrap_frame(vec![1, 0]).is_err());
    }

    #[tokio::test]
    async fn test_receiver_queues_datagrams() {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let server_addr = socket.local_addr().unwrap();
        let queue = Arc::new(TaskQueue::new());
        let receiver = spawn_receiver(Arc::clone(&socket), Arc::clone(&queue));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let client_addr = client.local_addr().unwrap();
        client.send_to(&[3, 0, 0, 0], server_addr).await.unwrap();

        let mut waited = 0;
        while queue.is_empty() && waited < 100 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            waited += 1;
        }
        receiver.abort();

        let tasks = queue.drain();
        assert_eq!(tasks.len(), 1);
        match &tasks[0] {
            Task::Datagram {
                slot,
                from,
                payload,
            } => {
                assert_eq!(*slot, 3);
                assert_eq!(*from, client_addr);
                assert!(payload.is_empty());
            }
            other => panic!("Unexpected task: {:?}", other),
        }
    }
}
