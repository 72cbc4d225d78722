//! Typed remote commands and their slash-command text.
//!
//! [`Command`]'s `Display` renders the command without the leading `/`;
//! transports add whatever framing their channel needs.

use std::fmt;

use crate::geometry::{BlockBox, BlockPos};

pub const AIR: &str = "air";

/// Entity kinds removed by cleanup: drops, projectiles and vehicles. Anything
/// not listed here, occupants included, survives a clean.
pub const EPHEMERAL_KINDS: &[&str] = &[
    "item",
    "experience_orb",
    "arrow",
    "spectral_arrow",
    "trident",
    "snowball",
    "egg",
    "minecart",
    "chest_minecart",
    "boat",
    "falling_block",
    "tnt",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Fill { region: BlockBox, block: String },
    SetBlock { at: BlockPos, block: String },
    /// Teleports the issuing agent.
    Teleport { to: BlockPos },
    /// Teleports a named player or selector.
    TeleportTarget { target: String, to: BlockPos },
    /// Moves the single entity of `kind` nearest to `near` onto `to`.
    NudgeNearest { kind: String, near: BlockPos, to: BlockPos },
    Summon { kind: String, at: BlockPos },
    KillKind { kind: String },
    GameRule { rule: &'static str, value: bool },
    GameMode { mode: &'static str, target: String },
    Difficulty(&'static str),
    TimeSetDay,
    WeatherClear { seconds: u64 },
    SetWorldSpawn { at: BlockPos },
}

impl Command {
    pub fn fill(region: BlockBox, block: impl Into<String>) -> Self {
        Self::Fill {
            region,
            block: block.into(),
        }
    }

    pub fn set_block(at: BlockPos, block: impl Into<String>) -> Self {
        Self::SetBlock {
            at,
            block: block.into(),
        }
    }

    /// Whether the command rewrites a large region and deserves the heavy delay.
    pub fn is_heavy(&self) -> bool {
        match self {
            Self::Fill { region, .. } => region.volume() > HEAVY_VOLUME,
            _ => false,
        }
    }
}

const HEAVY_VOLUME: i64 = 4096;

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fill { region, block } => write!(f, "fill {} {} {block}", region.from, region.to),
            Self::SetBlock { at, block } => write!(f, "setblock {at} {block}"),
            Self::Teleport { to } => write!(f, "tp {to}"),
            Self::TeleportTarget { target, to } => write!(f, "tp {target} {to}"),
            Self::NudgeNearest { kind, near, to } => write!(
                f,
                "tp @e[type={kind},limit=1,sort=nearest,x={},y={},z={}] {to}",
                near.x, near.y, near.z
            ),
            Self::Summon { kind, at } => write!(f, "summon {kind} {at}"),
            Self::KillKind { kind } => write!(f, "kill @e[type={kind}]"),
            Self::GameRule { rule, value } => write!(f, "gamerule {rule} {value}"),
            Self::GameMode { mode, target } => write!(f, "gamemode {mode} {target}"),
            Self::Difficulty(level) => write!(f, "difficulty {level}"),
            Self::TimeSetDay => f.write_str("time set day"),
            Self::WeatherClear { seconds } => write!(f, "weather clear {seconds}"),
            Self::SetWorldSpawn { at } => write!(f, "setworldspawn {at}"),
        }
    }
}
