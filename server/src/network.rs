//! Server network layer: sockets, channel tasks and the simulation loop
//!
//! The stream listener and the datagram socket share one port. Channel tasks
//! only ever push into the [`TaskQueue`]; everything that touches slots or
//! the simulation happens on the loop in [`Server::run`], one batch per tick.

use crate::config::ServerConfig;
use crate::error::SessionError;
use crate::queue::{Task, TaskQueue};
use crate::reliable::{spawn_reader, spawn_writer};
use crate::session::Session;
use crate::simulation::Simulation;
use crate::{datagram, datagram::DatagramSink};
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Largest time step handed to the simulation after a stall.
const MAX_DELTA_TIME: f32 = 1.0 / 20.0;

/// Main server coordinating networking and game simulation
pub struct Server<S> {
    listener: TcpListener,
    socket: Arc<UdpSocket>,
    queue: Arc<TaskQueue>,
    session: Session<S>,
    tick_duration: Duration,
    max_frame_len: usize,
}

impl<S: Simulation> Server<S> {
    /// Binds both sockets. Fails before anything is accepted if a socket
    /// cannot be bound or the handler table is incomplete.
    pub async fn bind(config: &ServerConfig, simulation: S) -> Result<Self, SessionError> {
        let listener = TcpListener::bind(config.bind_addr()).await?;
        let tcp_addr = listener.local_addr()?;
        // an ephemeral stream port is shared with the datagram socket
        let socket = Arc::new(UdpSocket::bind(tcp_addr).await?);
        info!("Server listening on {} (stream and datagram)", tcp_addr);

        let datagrams: Arc<dyn DatagramSink> = socket.clone();
        let session = Session::new(config, simulation, datagrams)?;

        Ok(Self {
            listener,
            socket,
            queue: Arc::new(TaskQueue::new()),
            session,
            tick_duration: config.tick_duration(),
            max_frame_len: config.max_frame_len,
        })
    }

    pub fn tcp_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn udp_addr(&self) -> Result<SocketAddr, SessionError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn session(&self) -> &Session<S> {
        &self.session
    }

    /// Runs until the process is stopped.
    pub async fn run(self) -> Result<(), SessionError> {
        let Server {
            listener,
            socket,
            queue,
            mut session,
            tick_duration,
            max_frame_len,
        } = self;

        let acceptor = spawn_acceptor(listener, Arc::clone(&queue));
        let receiver = datagram::spawn_receiver(socket, Arc::clone(&queue));

        let mut tick_interval = interval(tick_duration);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last_tick = Instant::now();
        let mut tick: u64 = 0;

        info!("Server started successfully");

        loop {
            tick_interval.tick().await;
            if acceptor.is_finished() || receiver.is_finished() {
                warn!("A network task stopped, shutting down");
                break;
            }

            let now = Instant::now();
            let mut dt = now.duration_since(last_tick).as_secs_f32();
            last_tick = now;
            if dt > MAX_DELTA_TIME {
                debug!(
                    "Large delta time detected ({:.3}s), capping to {:.3}s",
                    dt, MAX_DELTA_TIME
                );
                dt = MAX_DELTA_TIME;
            }

            for task in queue.drain() {
                process(&mut session, &queue, task, max_frame_len);
                session.flush();
            }
            session.tick(dt);

            tick += 1;
            if tick % 300 == 0 {
                debug!(
                    "Tick {}: {} connected, {} in game",
                    tick,
                    session.slots().bound_count(),
                    session.slots().in_game().count()
                );
            }
        }

        acceptor.abort();
        receiver.abort();
        Ok(())
    }
}

/// Applies one queued task to the session.
fn process<S: Simulation>(
    session: &mut Session<S>,
    queue: &Arc<TaskQueue>,
    task: Task,
    max_frame_len: usize,
) {
    match task {
        Task::Connected { stream, peer } => accept(session, queue, stream, peer, max_frame_len),
        Task::Frame {
            slot,
            connection,
            payload,
        } => session.handle_frame(slot, connection, payload),
        Task::Datagram {
            slot,
            from,
            payload,
        } => session.handle_datagram(slot, from, payload),
        Task::Disconnected { slot, connection } => session.disconnect(slot, Some(connection)),
    }
}

/// Gives a new stream a slot and starts its reader and writer, or drops it
/// when the server is full.
fn accept<S: Simulation>(
    session: &mut Session<S>,
    queue: &Arc<TaskQueue>,
    stream: TcpStream,
    peer: SocketAddr,
    max_frame_len: usize,
) {
    let (sender, frames) = mpsc::unbounded_channel();
    let (slot, connection) = match session.attach(peer, sender) {
        Ok(bound) => bound,
        Err(e) => {
            warn!("{} failed to connect: {}", peer, e);
            return;
        }
    };

    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", peer, e);
    }
    let (read_half, write_half) = stream.into_split();
    spawn_writer(write_half, frames, slot, connection, Arc::clone(queue));
    let reader = spawn_reader(read_half, slot, connection, Arc::clone(queue), max_frame_len);
    session.set_reader(slot, connection, reader.abort_handle());
}

/// Spawns the task accepting stream connections.
fn spawn_acceptor(listener: TcpListener, queue: Arc<TaskQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("Incoming connection from {}", peer);
                    queue.push(Task::Connected { stream, peer });
                }
                Err(e) => {
                    warn!("Error accepting connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    })
}
