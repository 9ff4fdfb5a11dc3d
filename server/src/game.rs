//! Reference game world driven by the session
//!
//! Players walk with five directional inputs relative to their facing and
//! fall under gravity. Shooting is an instant ray test; thrown items become
//! projectiles that explode with radius damage. Item spawners refill on a
//! timer and an optional enemy spawner keeps a capped number of enemies on
//! the field.

use crate::fanout::Outbox;
use crate::simulation::{EnemySnapshot, ItemSpawnerSnapshot, PlayerSnapshot, Simulation};
use crate::slots::SlotId;
use log::{debug, info};
use rand::Rng;
use shared::{Quat, ServerMessage, Vec3, MOVEMENT_INPUTS};
use std::collections::BTreeMap;

pub const GRAVITY: f32 = -9.81;
pub const MOVE_SPEED: f32 = 5.0;
pub const JUMP_SPEED: f32 = 5.0;
pub const FLOOR_Y: f32 = 0.0;

pub const MAX_HEALTH: f32 = 100.0;
pub const RESPAWN_DELAY: f32 = 5.0;
pub const MAX_ITEMS: u32 = 3;

pub const SHOOT_RANGE: f32 = 25.0;
pub const SHOOT_DAMAGE: f32 = 25.0;
/// Radius of the sphere a shot must pass through to hit a body.
pub const HIT_RADIUS: f32 = 1.0;

pub const ITEM_RESPAWN_DELAY: f32 = 10.0;
pub const PICKUP_RADIUS: f32 = 1.0;

pub const THROW_SPEED: f32 = 12.0;
pub const PROJECTILE_FUSE: f32 = 10.0;
pub const EXPLOSION_RADIUS: f32 = 1.5;
pub const EXPLOSION_DAMAGE: f32 = 75.0;

pub const MAX_ENEMIES: usize = 10;
pub const ENEMY_SPAWN_INTERVAL: f32 = 3.0;
pub const ENEMY_MAX_HEALTH: f32 = 100.0;
const ENEMY_SPAWN_JITTER: f32 = 2.0;

pub const SPAWN_POINT: Vec3 = Vec3::new(0.0, 0.5, 0.0);
/// Where dead players wait out their respawn delay.
pub const DEATH_POSITION: Vec3 = Vec3::new(0.0, 25.0, 0.0);
/// Height of the shot and throw origin above a player's feet.
const EYE_HEIGHT: f32 = 1.5;
/// Height of a body's hit sphere centre above its feet.
const BODY_CENTER: f32 = 1.0;

// Input order on the wire
const FORWARD: usize = 0;
const BACK: usize = 1;
const LEFT: usize = 2;
const RIGHT: usize = 3;
const JUMP: usize = 4;

#[derive(Debug, Clone)]
struct Player {
    id: i32,
    username: String,
    position: Vec3,
    rotation: Quat,
    inputs: [bool; MOVEMENT_INPUTS],
    y_velocity: f32,
    grounded: bool,
    health: f32,
    items: u32,
    respawn_in: f32,
}

impl Player {
    fn new(id: i32, username: &str) -> Self {
        Self {
            id,
            username: username.to_string(),
            position: SPAWN_POINT,
            rotation: Quat::IDENTITY,
            inputs: [false; MOVEMENT_INPUTS],
            y_velocity: 0.0,
            grounded: false,
            health: MAX_HEALTH,
            items: 0,
            respawn_in: 0.0,
        }
    }

    fn is_alive(&self) -> bool {
        self.health > 0.0
    }

    fn eye(&self) -> Vec3 {
        self.position + Vec3::UP * EYE_HEIGHT
    }

    fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            id: self.id,
            username: self.username.clone(),
            position: self.position,
            rotation: self.rotation,
            health: self.health,
        }
    }

    fn step(&mut self, dt: f32) {
        let mut x = 0.0;
        let mut z = 0.0;
        if self.inputs[FORWARD] {
            z += 1.0;
        }
        if self.inputs[BACK] {
            z -= 1.0;
        }
        if self.inputs[LEFT] {
            x -= 1.0;
        }
        if self.inputs[RIGHT] {
            x += 1.0;
        }

        let mut movement = self.rotation.right() * x + self.rotation.forward() * z;
        movement.y = 0.0;
        let movement = movement * (MOVE_SPEED * dt);

        if self.grounded {
            self.y_velocity = 0.0;
            if self.inputs[JUMP] {
                self.y_velocity = JUMP_SPEED;
            }
        }
        self.y_velocity += GRAVITY * dt;

        self.position += movement + Vec3::UP * (self.y_velocity * dt);
        self.grounded = self.position.y <= FLOOR_Y;
        if self.grounded {
            self.position.y = FLOOR_Y;
        }
    }

    fn take_damage(&mut self, damage: f32, outbox: &mut Outbox) {
        if !self.is_alive() {
            return;
        }

        self.health -= damage;
        if self.health <= 0.0 {
            self.health = 0.0;
            self.position = DEATH_POSITION;
            self.y_velocity = 0.0;
            self.grounded = false;
            self.respawn_in = RESPAWN_DELAY;
            info!("Player {} died", self.id);
            outbox.send_to_all(ServerMessage::PlayerPosition {
                id: self.id,
                position: self.position,
            });
        }
        outbox.send_to_all(ServerMessage::PlayerHealth {
            id: self.id,
            health: self.health,
        });
    }
}

#[derive(Debug, Clone)]
struct ItemSpawner {
    id: i32,
    position: Vec3,
    has_item: bool,
    refill_in: f32,
}

#[derive(Debug, Clone)]
struct Projectile {
    id: i32,
    position: Vec3,
    velocity: Vec3,
    fuse: f32,
}

#[derive(Debug, Clone)]
struct Enemy {
    id: i32,
    position: Vec3,
    y_velocity: f32,
    health: f32,
}

impl Enemy {
    fn take_damage(&mut self, damage: f32, outbox: &mut Outbox) {
        self.health = (self.health - damage).max(0.0);
        outbox.send_to_all(ServerMessage::EnemyHealth {
            id: self.id,
            health: self.health,
        });
    }
}

#[derive(Debug, Clone)]
struct EnemySpawner {
    position: Vec3,
    next_in: f32,
}

/// Something a shot can hit
#[derive(Debug, Clone, Copy, PartialEq)]
enum Body {
    Player(SlotId),
    Enemy(i32),
}

#[derive(Debug)]
pub struct World {
    players: BTreeMap<SlotId, Player>,
    item_spawners: Vec<ItemSpawner>,
    projectiles: Vec<Projectile>,
    enemies: BTreeMap<i32, Enemy>,
    enemy_spawner: Option<EnemySpawner>,
    next_projectile_id: i32,
    next_enemy_id: i32,
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

impl World {
    /// The standard arena: three item spawners and one enemy spawner.
    pub fn new() -> Self {
        Self::with_layout(
            vec![
                Vec3::new(5.0, 0.0, 5.0),
                Vec3::new(-5.0, 0.0, 5.0),
                Vec3::new(0.0, 0.0, -8.0),
            ],
            Some(Vec3::new(10.0, 1.0, 10.0)),
        )
    }

    pub fn with_layout(item_spawners: Vec<Vec3>, enemy_spawner: Option<Vec3>) -> Self {
        let item_spawners = item_spawners
            .into_iter()
            .zip(1..)
            .map(|(position, id)| ItemSpawner {
                id,
                position,
                has_item: false,
                refill_in: ITEM_RESPAWN_DELAY,
            })
            .collect();

        Self {
            players: BTreeMap::new(),
            item_spawners,
            projectiles: Vec::new(),
            enemies: BTreeMap::new(),
            enemy_spawner: enemy_spawner.map(|position| EnemySpawner {
                position,
                next_in: ENEMY_SPAWN_INTERVAL,
            }),
            next_projectile_id: 1,
            next_enemy_id: 1,
        }
    }

    /// Items a player is carrying.
    pub fn items(&self, slot: SlotId) -> Option<u32> {
        self.players.get(&slot).map(|player| player.items)
    }

    pub fn projectile_count(&self) -> usize {
        self.projectiles.len()
    }

    /// Places a player directly, bypassing movement.
    pub fn teleport(&mut self, slot: SlotId, position: Vec3) {
        if let Some(player) = self.players.get_mut(&slot) {
            player.position = position;
            player.y_velocity = 0.0;
            player.grounded = position.y <= FLOOR_Y;
        }
    }

    /// Adds an enemy at `position` if the field is not full.
    pub fn spawn_enemy(&mut self, position: Vec3, outbox: &mut Outbox) -> Option<i32> {
        if self.enemies.len() >= MAX_ENEMIES {
            return None;
        }

        let id = self.next_enemy_id;
        self.next_enemy_id += 1;
        self.enemies.insert(
            id,
            Enemy {
                id,
                position,
                y_velocity: 0.0,
                health: ENEMY_MAX_HEALTH,
            },
        );
        debug!("Enemy {} spawned at {:?}", id, position);
        outbox.send_to_all(ServerMessage::SpawnEnemy { id, position });
        Some(id)
    }

    /// Nearest body along the ray within [`SHOOT_RANGE`], ignoring the shooter.
    fn raycast(&self, shooter: SlotId, origin: Vec3, direction: Vec3) -> Option<Body> {
        let direction = direction.normalized();
        if direction == Vec3::ZERO {
            return None;
        }

        let hit_distance = |feet: Vec3| -> Option<f32> {
            let center = feet + Vec3::UP * BODY_CENTER;
            let along = (center - origin).dot(direction);
            if !(0.0..=SHOOT_RANGE).contains(&along) {
                return None;
            }
            let closest = origin + direction * along;
            (closest.distance(center) <= HIT_RADIUS).then_some(along)
        };

        let players = self
            .players
            .values()
            .filter(|player| player.id != shooter && player.is_alive())
            .filter_map(|player| Some((hit_distance(player.position)?, Body::Player(player.id))));
        let enemies = self
            .enemies
            .values()
            .filter_map(|enemy| Some((hit_distance(enemy.position)?, Body::Enemy(enemy.id))));

        players
            .chain(enemies)
            .min_by(|a, b| a.0.total_cmp(&b.0))
            .map(|(_, body)| body)
    }

    fn damage(&mut self, body: Body, amount: f32, outbox: &mut Outbox) {
        match body {
            Body::Player(id) => {
                if let Some(player) = self.players.get_mut(&id) {
                    player.take_damage(amount, outbox);
                }
            }
            Body::Enemy(id) => {
                if let Some(enemy) = self.enemies.get_mut(&id) {
                    enemy.take_damage(amount, outbox);
                    if enemy.health <= 0.0 {
                        debug!("Enemy {} destroyed", id);
                        self.enemies.remove(&id);
                    }
                }
            }
        }
    }

    fn explode(&mut self, projectile: &Projectile, outbox: &mut Outbox) {
        outbox.send_to_all(ServerMessage::ProjectileExploded {
            id: projectile.id,
            position: projectile.position,
        });

        let in_range = |feet: Vec3| feet.distance(projectile.position) <= EXPLOSION_RADIUS;
        let mut hit: Vec<Body> = self
            .players
            .values()
            .filter(|player| in_range(player.position))
            .map(|player| Body::Player(player.id))
            .collect();
        hit.extend(
            self.enemies
                .values()
                .filter(|enemy| in_range(enemy.position))
                .map(|enemy| Body::Enemy(enemy.id)),
        );
        for body in hit {
            self.damage(body, EXPLOSION_DAMAGE, outbox);
        }
    }

    fn update_players(&mut self, dt: f32, outbox: &mut Outbox) {
        for player in self.players.values_mut() {
            if !player.is_alive() {
                player.respawn_in -= dt;
                if player.respawn_in <= 0.0 {
                    player.health = MAX_HEALTH;
                    info!("Player {} respawned", player.id);
                    outbox.send_to_all(ServerMessage::PlayerRespawned { id: player.id });
                }
                continue;
            }

            player.step(dt);
            outbox.send_to_all(ServerMessage::PlayerPosition {
                id: player.id,
                position: player.position,
            });
            outbox.send_to_all_except(
                ServerMessage::PlayerRotation {
                    id: player.id,
                    rotation: player.rotation,
                },
                [player.id],
            );
        }
    }

    fn update_item_spawners(&mut self, dt: f32, outbox: &mut Outbox) {
        for spawner in &mut self.item_spawners {
            if !spawner.has_item {
                spawner.refill_in -= dt;
                if spawner.refill_in <= 0.0 {
                    spawner.has_item = true;
                    outbox.send_to_all(ServerMessage::ItemSpawned {
                        spawner_id: spawner.id,
                    });
                }
                continue;
            }

            let collector = self.players.values_mut().find(|player| {
                player.is_alive()
                    && player.items < MAX_ITEMS
                    && player.position.distance(spawner.position) <= PICKUP_RADIUS
            });
            if let Some(player) = collector {
                player.items += 1;
                spawner.has_item = false;
                spawner.refill_in = ITEM_RESPAWN_DELAY;
                outbox.send_to_all(ServerMessage::ItemPickedUp {
                    spawner_id: spawner.id,
                    by_player: player.id,
                });
            }
        }
    }

    fn update_projectiles(&mut self, dt: f32, outbox: &mut Outbox) {
        let mut exploded = Vec::new();
        for projectile in &mut self.projectiles {
            projectile.velocity.y += GRAVITY * dt;
            projectile.position += projectile.velocity * dt;
            projectile.fuse -= dt;

            if projectile.position.y <= FLOOR_Y {
                projectile.position.y = FLOOR_Y;
                exploded.push(projectile.id);
            } else if projectile.fuse <= 0.0 {
                exploded.push(projectile.id);
            } else {
                outbox.send_to_all(ServerMessage::ProjectilePosition {
                    id: projectile.id,
                    position: projectile.position,
                });
            }
        }

        if exploded.is_empty() {
            return;
        }
        let (done, live): (Vec<Projectile>, Vec<Projectile>) = std::mem::take(&mut self.projectiles)
            .into_iter()
            .partition(|projectile| exploded.contains(&projectile.id));
        self.projectiles = live;
        for projectile in &done {
            self.explode(projectile, outbox);
        }
    }

    fn update_enemies(&mut self, dt: f32, outbox: &mut Outbox) {
        let due = self.enemy_spawner.as_mut().and_then(|spawner| {
            spawner.next_in -= dt;
            if spawner.next_in > 0.0 {
                return None;
            }
            spawner.next_in += ENEMY_SPAWN_INTERVAL;
            let mut rng = rand::thread_rng();
            Some(
                spawner.position
                    + Vec3::new(
                        rng.gen_range(-ENEMY_SPAWN_JITTER..=ENEMY_SPAWN_JITTER),
                        0.0,
                        rng.gen_range(-ENEMY_SPAWN_JITTER..=ENEMY_SPAWN_JITTER),
                    ),
            )
        });
        if let Some(position) = due {
            self.spawn_enemy(position, outbox);
        }

        for enemy in self.enemies.values_mut() {
            if enemy.position.y <= FLOOR_Y {
                continue;
            }
            enemy.y_velocity += GRAVITY * dt;
            enemy.position.y = (enemy.position.y + enemy.y_velocity * dt).max(FLOOR_Y);
            outbox.send_to_all(ServerMessage::EnemyPosition {
                id: enemy.id,
                position: enemy.position,
            });
        }
    }
}

impl Simulation for World {
    fn spawn_player(&mut self, slot: SlotId, username: &str) -> PlayerSnapshot {
        let player = Player::new(slot, username);
        let snapshot = player.snapshot();
        self.players.insert(slot, player);
        info!("Added player {} ({}) at {:?}", slot, username, SPAWN_POINT);
        snapshot
    }

    fn despawn_player(&mut self, slot: SlotId) {
        if self.players.remove(&slot).is_some() {
            info!("Removed player {}", slot);
        }
    }

    fn player(&self, slot: SlotId) -> Option<PlayerSnapshot> {
        self.players.get(&slot).map(Player::snapshot)
    }

    fn players(&self) -> Vec<PlayerSnapshot> {
        self.players.values().map(Player::snapshot).collect()
    }

    fn item_spawners(&self) -> Vec<ItemSpawnerSnapshot> {
        self.item_spawners
            .iter()
            .map(|spawner| ItemSpawnerSnapshot {
                id: spawner.id,
                position: spawner.position,
                has_item: spawner.has_item,
            })
            .collect()
    }

    fn enemies(&self) -> Vec<EnemySnapshot> {
        self.enemies
            .values()
            .map(|enemy| EnemySnapshot {
                id: enemy.id,
                position: enemy.position,
                health: enemy.health,
            })
            .collect()
    }

    fn set_input(&mut self, slot: SlotId, inputs: &[bool], rotation: Quat) {
        if let Some(player) = self.players.get_mut(&slot) {
            player.inputs = [false; MOVEMENT_INPUTS];
            for (held, &input) in player.inputs.iter_mut().zip(inputs) {
                *held = input;
            }
            player.rotation = rotation;
        }
    }

    fn shoot(&mut self, slot: SlotId, direction: Vec3, outbox: &mut Outbox) {
        let Some(shooter) = self.players.get(&slot).filter(|player| player.is_alive()) else {
            return;
        };
        if let Some(body) = self.raycast(slot, shooter.eye(), direction) {
            debug!("Player {} hit {:?}", slot, body);
            self.damage(body, SHOOT_DAMAGE, outbox);
        }
    }

    fn throw_item(&mut self, slot: SlotId, direction: Vec3, outbox: &mut Outbox) {
        let Some(thrower) = self
            .players
            .get_mut(&slot)
            .filter(|player| player.is_alive() && player.items > 0)
        else {
            return;
        };
        thrower.items -= 1;

        let projectile = Projectile {
            id: self.next_projectile_id,
            position: thrower.eye(),
            velocity: direction.normalized() * THROW_SPEED,
            fuse: PROJECTILE_FUSE,
        };
        self.next_projectile_id += 1;
        outbox.send_to_all(ServerMessage::SpawnProjectile {
            id: projectile.id,
            position: projectile.position,
            thrown_by: slot,
        });
        self.projectiles.push(projectile);
    }

    fn tick(&mut self, dt: f32, outbox: &mut Outbox) {
        self.update_players(dt, outbox);
        self.update_item_spawners(dt, outbox);
        self.update_projectiles(dt, outbox);
        self.update_enemies(dt, outbox);
    }
}
