use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How layout-local coordinates are translated into world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnchorPolicy {
    /// The frame's minimum corner lands on the world anchor.
    #[default]
    FrameCorner,
    /// The corridor's center cell lands on the world anchor.
    CorridorCenter,
}

/// Tunables for the command lane, the builder and the patrol loop.
///
/// Every field has a default so partial config files and CLI overrides are
/// always complete after deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command_delay_ms: u64,
    pub heavy_delay_ms: u64,
    pub door_delay_ms: u64,
    pub clearance_delay_ms: u64,
    pub teleport_delay_ms: u64,

    pub door_width: i64,
    pub door_height: i64,

    pub flat: bool,
    pub base_y: Option<i64>,
    pub build_offset: i64,
    pub anchor: AnchorPolicy,
    pub origin_x: i64,
    pub origin_z: i64,
    pub auto_ground: Option<bool>,
    pub clear_height: i64,
    pub spawn_search_radius: i64,

    pub arrival_threshold: f64,
    pub dwell_limit: u32,
    pub wander_every: u64,
    pub wander_amplitude: i64,
    pub tick_period_ms: u64,
    pub sync_period_ms: u64,
    pub environment_period_ms: u64,

    pub agent_name: String,
    pub occupant_kind: String,
    pub ground_block: String,
    pub clearance_block: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command_delay_ms: 600,
            heavy_delay_ms: 900,
            door_delay_ms: 200,
            clearance_delay_ms: 800,
            teleport_delay_ms: 800,
            door_width: 1,
            door_height: 2,
            flat: false,
            base_y: None,
            build_offset: 0,
            anchor: AnchorPolicy::default(),
            origin_x: 0,
            origin_z: 0,
            auto_ground: None,
            clear_height: 10,
            spawn_search_radius: 6,
            arrival_threshold: 1.2,
            dwell_limit: 8,
            wander_every: 80,
            wander_amplitude: 2,
            tick_period_ms: 300,
            sync_period_ms: 2000,
            environment_period_ms: 15_000,
            agent_name: "sweeper".to_string(),
            occupant_kind: "villager".to_string(),
            ground_block: "grass_block".to_string(),
            clearance_block: "blue_concrete".to_string(),
        }
    }
}

impl EngineConfig {
    /// Ground elevation before any detection: explicit `base_y`, else 4 on
    /// superflat worlds and 64 otherwise.
    pub fn base_y(&self) -> i64 {
        self.base_y.unwrap_or(if self.flat { 4 } else { 64 })
    }

    /// Elevation of the construction floor layer.
    pub fn layout_y(&self) -> i64 {
        self.base_y() + self.build_offset
    }

    /// Ground detection runs unless disabled explicitly or the world is flat.
    pub fn auto_ground(&self) -> bool {
        self.auto_ground.unwrap_or(true) && !self.flat
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn heavy_delay(&self) -> Duration {
        Duration::from_millis(self.heavy_delay_ms)
    }

    pub fn door_delay(&self) -> Duration {
        Duration::from_millis(self.door_delay_ms)
    }

    pub fn clearance_delay(&self) -> Duration {
        Duration::from_millis(self.clearance_delay_ms)
    }

    pub fn teleport_delay(&self) -> Duration {
        Duration::from_millis(self.teleport_delay_ms)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms.max(1))
    }

    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_period_ms.max(1))
    }

    pub fn environment_period(&self) -> Duration {
        Duration::from_millis(self.environment_period_ms.max(1))
    }
}
