//! # Game Server Library
//!
//! Authoritative server core for a small multiplayer shooter. Clients hold a
//! reliable stream for anything that changes state and send high-frequency
//! movement over a shared datagram socket; the server owns the only copy of
//! the world and replicates it back over the same two channels.
//!
//! ## Architecture Design
//!
//! ### Channel Tasks
//! One task accepts stream connections, one reader and one writer task serve
//! each open stream, and one task receives every datagram. None of them touch
//! game state: readers rebuild length-prefixed frames and push them, in
//! stream order, onto the shared task queue.
//!
//! ### Single Simulation Loop
//! Exactly one loop owns the slot table and the simulation. Once per tick it
//! takes the whole task queue under a single short lock, applies each task,
//! advances the world and flushes outbound messages. Because nothing else
//! mutates session state there are no locks around it.
//!
//! ### Slots
//! A fixed number of reusable slots with ids `1..=max_slots`. A slot is bound
//! when a stream attaches, joins the game after the client's handshake, and
//! learns its datagram endpoint from the first datagram that names it. Any
//! fault on a slot releases it without affecting the others.
//!
//! ## Module Organization
//!
//! - `config`: TOML-backed [`ServerConfig`]
//! - `slots`: slot table, connection generations and endpoint bindings
//! - `queue`: the task queue shared by channel tasks and the loop
//! - `reliable`: stream frame reassembly and per-connection tasks
//! - `datagram`: datagram receive task, endpoint binding and validation
//! - `dispatch`: opcode → handler table, validated at startup
//! - `fanout`: outbox and routing to one, all, or all-but-some slots
//! - `session`: the per-loop state tying the above together
//! - `simulation`: the trait the session drives, with [`World`] in `game`
//! - `network`: socket setup and the loop itself
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::{Server, ServerConfig, World};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(&config, World::new()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod datagram;
pub mod dispatch;
pub mod error;
pub mod fanout;
pub mod game;
pub mod network;
pub mod queue;
pub mod reliable;
pub mod session;
pub mod simulation;
pub mod slots;

pub use config::{ConfigError, ServerConfig};
pub use dispatch::{DispatchError, DispatchTable};
pub use error::SessionError;
pub use fanout::Outbox;
pub use game::World;
pub use network::Server;
pub use session::Session;
pub use simulation::Simulation;
pub use slots::{ConnectionId, SlotId};
