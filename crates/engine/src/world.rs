//! Seams to the external world client: block/entity/player queries and the
//! movement subsystem.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::geometry::BlockPos;
use crate::scheduler::BoxFuture;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Horizontal Manhattan distance to a block position.
    pub fn manhattan_xz(&self, p: BlockPos) -> f64 {
        (self.x - p.x as f64).abs() + (self.z - p.z as f64).abs()
    }

    pub fn rounded(&self) -> BlockPos {
        BlockPos::new(
            self.x.round() as i64,
            self.y.round() as i64,
            self.z.round() as i64,
        )
    }
}

impl From<BlockPos> for Vec3 {
    fn from(p: BlockPos) -> Self {
        Self::new(p.x as f64, p.y as f64, p.z as f64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
}

impl BlockInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn is_air(&self) -> bool {
        matches!(self.name.as_str(), "air" | "cave_air" | "void_air")
    }

    pub fn is_liquid(&self) -> bool {
        self.name.contains("water") || self.name.contains("lava")
    }

    /// Something that can be stood on.
    pub fn is_solid(&self) -> bool {
        !self.is_air() && !self.is_liquid()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub id: i64,
    pub position: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSnapshot {
    pub username: String,
    /// `None` when the player is online but out of tracking range.
    pub position: Option<Vec3>,
}

/// Read access to the world as the agent's client currently sees it.
pub trait WorldQuery: Send + Sync {
    /// `None` when the chunk is not loaded or the world is not ready.
    fn block_at(&self, at: BlockPos) -> BoxFuture<'_, Option<BlockInfo>>;

    fn entities_by_kind<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Vec<EntitySnapshot>>;

    fn players_online(&self) -> BoxFuture<'_, Vec<PlayerSnapshot>>;

    fn agent_position(&self) -> BoxFuture<'_, Option<Vec3>>;

    /// Highest buildable y, inclusive.
    fn max_height(&self) -> i64 {
        255
    }
}

/// Fire-and-forget movement goals for the external pathing subsystem.
pub trait Pathing: Send + Sync {
    fn set_goal(&self, at: BlockPos, exact: bool);
}

/// In-memory world: explicit blocks over an optional default block. With no
/// default, unlisted positions read as not loaded.
#[derive(Debug, Clone, Default)]
pub struct BlockMap {
    inner: Arc<Mutex<BlockMapInner>>,
}

#[derive(Debug, Default)]
struct BlockMapInner {
    blocks: HashMap<BlockPos, String>,
    default_block: Option<String>,
    entities: HashMap<String, Vec<EntitySnapshot>>,
    players: Vec<PlayerSnapshot>,
    agent: Option<Vec3>,
    max_height: Option<i64>,
}

impl BlockMap {
    /// Everything not set explicitly is air.
    pub fn open_air() -> Self {
        let map = Self::default();
        map.with(|m| m.default_block = Some("air".to_string()));
        map
    }

    fn with<R>(&self, f: impl FnOnce(&mut BlockMapInner) -> R) -> Option<R> {
        self.inner.lock().ok().map(|mut m| f(&mut m))
    }

    pub fn set(&self, at: BlockPos, name: &str) {
        self.with(|m| m.blocks.insert(at, name.to_string()));
    }

    /// Fills a column from `y1` to `y2` inclusive.
    pub fn column(&self, x: i64, z: i64, y1: i64, y2: i64, name: &str) {
        self.with(|m| {
            for y in y1.min(y2)..=y1.max(y2) {
                m.blocks.insert(BlockPos::new(x, y, z), name.to_string());
            }
        });
    }

    /// Lays a horizontal layer of `name` at `y` over an inclusive rectangle.
    pub fn layer(&self, x1: i64, z1: i64, x2: i64, z2: i64, y: i64, name: &str) {
        self.with(|m| {
            for x in x1.min(x2)..=x1.max(x2) {
                for z in z1.min(z2)..=z1.max(z2) {
                    m.blocks.insert(BlockPos::new(x, y, z), name.to_string());
                }
            }
        });
    }

    pub fn set_max_height(&self, y: i64) {
        self.with(|m| m.max_height = Some(y));
    }

    pub fn set_agent(&self, at: Vec3) {
        self.with(|m| m.agent = Some(at));
    }

    pub fn set_entities(&self, kind: &str, entities: Vec<EntitySnapshot>) {
        self.with(|m| m.entities.insert(kind.to_string(), entities));
    }

    pub fn set_players(&self, players: Vec<PlayerSnapshot>) {
        self.with(|m| m.players = players);
    }

    fn lookup(&self, at: BlockPos) -> Option<BlockInfo> {
        self.with(|m| {
            m.blocks
                .get(&at)
                .or(m.default_block.as_ref())
                .map(|n| BlockInfo::new(n.clone()))
        })
        .flatten()
    }
}

impl WorldQuery for BlockMap {
    fn block_at(&self, at: BlockPos) -> BoxFuture<'_, Option<BlockInfo>> {
        Box::pin(async move { self.lookup(at) })
    }

    fn entities_by_kind<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Vec<EntitySnapshot>> {
        Box::pin(async move {
            self.with(|m| m.entities.get(kind).cloned().unwrap_or_default())
                .unwrap_or_default()
        })
    }

    fn players_online(&self) -> BoxFuture<'_, Vec<PlayerSnapshot>> {
        Box::pin(async move { self.with(|m| m.players.clone()).unwrap_or_default() })
    }

    fn agent_position(&self) -> BoxFuture<'_, Option<Vec3>> {
        Box::pin(async move { self.with(|m| m.agent).flatten() })
    }

    fn max_height(&self) -> i64 {
        self.with(|m| m.max_height).flatten().unwrap_or(255)
    }
}

/// Remembers every goal it was given.
#[derive(Debug, Clone, Default)]
pub struct GoalLog {
    goals: Arc<Mutex<Vec<(BlockPos, bool)>>>,
}

impl GoalLog {
    pub fn goals(&self) -> Vec<(BlockPos, bool)> {
        self.goals.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl Pathing for GoalLog {
    fn set_goal(&self, at: BlockPos, exact: bool) {
        if let Ok(mut goals) = self.goals.lock() {
            goals.push((at, exact));
        }
    }
}
