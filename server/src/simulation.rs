//! Contract between the session layer and the game simulation
//!
//! The session treats the simulation as an opaque owner of entities. It asks
//! for an entity when a slot finishes its handshake, enumerates existing
//! state to replicate it to newcomers, forwards decoded intents, and ticks it
//! once per frame. The simulation reports every state change through the
//! [`Outbox`] it is handed.

use crate::fanout::Outbox;
use crate::slots::SlotId;
use shared::{Quat, Vec3};

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerSnapshot {
    pub id: i32,
    pub username: String,
    pub position: Vec3,
    pub rotation: Quat,
    pub health: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemSpawnerSnapshot {
    pub id: i32,
    pub position: Vec3,
    pub has_item: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnemySnapshot {
    pub id: i32,
    pub position: Vec3,
    pub health: f32,
}

/// Game state owned by the simulation loop
///
/// Intent methods must tolerate ids with no live entity (the slot may have
/// disconnected while its messages were still queued) by doing nothing.
pub trait Simulation {
    /// Creates the player entity for a slot and returns its initial state.
    fn spawn_player(&mut self, slot: SlotId, username: &str) -> PlayerSnapshot;

    fn despawn_player(&mut self, slot: SlotId);

    fn player(&self, slot: SlotId) -> Option<PlayerSnapshot>;

    fn players(&self) -> Vec<PlayerSnapshot>;

    fn item_spawners(&self) -> Vec<ItemSpawnerSnapshot>;

    fn enemies(&self) -> Vec<EnemySnapshot>;

    fn set_input(&mut self, slot: SlotId, inputs: &[bool], rotation: Quat);

    fn shoot(&mut self, slot: SlotId, direction: Vec3, outbox: &mut Outbox);

    fn throw_item(&mut self, slot: SlotId, direction: Vec3, outbox: &mut Outbox);

    /// Advances the world by `dt` seconds.
    fn tick(&mut self, dt: f32, outbox: &mut Outbox);
}
