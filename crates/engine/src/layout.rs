//! Declarative building descriptions.
//!
//! Files are parsed into a permissive raw shape first and then validated into
//! [`LayoutDescription`], where every optional field has an explicit value.
//! Individual rooms with a non-positive size are dropped; a malformed frame or
//! corridor rejects the whole description so callers fall back to
//! [`LayoutDescription::baseline`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{EngineError, Result};

pub const DEFAULT_LAYOUT: &str = "baseline";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub x1: i64,
    pub z1: i64,
    pub x2: i64,
    pub z2: i64,
}

/// Axis-aligned footprint in layout-local coordinates: `w` columns starting at
/// `x`, `h` rows starting at `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i64,
    pub z: i64,
    pub w: i64,
    pub h: i64,
}

impl Rect {
    pub fn is_valid(&self) -> bool {
        self.w > 0 && self.h > 0
    }

    pub fn max_x(&self) -> i64 {
        self.x + self.w - 1
    }

    pub fn max_z(&self) -> i64 {
        self.z + self.h - 1
    }

    /// Center cell, rounding toward the minimum corner.
    pub fn center(&self) -> (i64, i64) {
        (self.x + self.w.div_euclid(2), self.z + self.h.div_euclid(2))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    #[serde(flatten)]
    pub rect: Rect,
    pub block: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Doors {
    /// Layout-local z of the top rooms' boundary wall.
    pub top_z: i64,
    /// Layout-local z of the bottom rooms' boundary wall.
    pub bottom_z: i64,
    pub xs: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wall {
    pub material: String,
    pub height: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutDescription {
    pub name: String,
    pub frame: Frame,
    pub corridor: Rect,
    pub rooms_top: Vec<Room>,
    pub rooms_bottom: Vec<Room>,
    pub doors: Doors,
    pub wall: Wall,
    pub corridor_floor: String,
    pub exit_marker: String,
    pub occupants: usize,
}

impl LayoutDescription {
    /// Built-in description used whenever a named layout cannot be loaded.
    pub fn baseline() -> Self {
        let room = |x, z, w, h, block: &str| Room {
            rect: Rect { x, z, w, h },
            block: block.to_string(),
        };
        Self {
            name: DEFAULT_LAYOUT.to_string(),
            frame: Frame {
                x1: 0,
                z1: 0,
                x2: 100,
                z2: 40,
            },
            corridor: Rect {
                x: 5,
                z: 16,
                w: 90,
                h: 8,
            },
            rooms_top: vec![
                room(8, 24, 24, 12, "orange_wool"),
                room(40, 24, 24, 12, "green_wool"),
                room(72, 24, 24, 12, "pink_wool"),
            ],
            rooms_bottom: vec![
                room(8, 1, 24, 15, "cyan_wool"),
                room(40, 1, 24, 15, "purple_wool"),
                room(72, 1, 24, 15, "blue_wool"),
            ],
            doors: Doors {
                top_z: 24,
                bottom_z: 15,
                xs: vec![20, 52, 84],
            },
            wall: Wall {
                material: DEFAULT_WALL.to_string(),
                height: DEFAULT_WALL_HEIGHT,
            },
            corridor_floor: DEFAULT_FLOOR.to_string(),
            exit_marker: DEFAULT_EXIT_MARKER.to_string(),
            occupants: DEFAULT_OCCUPANTS,
        }
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms_top.iter().chain(self.rooms_bottom.iter())
    }

    pub fn from_json(name: &str, text: &str) -> Result<Self> {
        let raw: RawLayout = serde_json::from_str(text).map_err(|e| EngineError::layout(name, e))?;
        raw.validate(name)
    }

    pub fn from_yaml(name: &str, text: &str) -> Result<Self> {
        let raw: RawLayout = serde_yaml::from_str(text).map_err(|e| EngineError::layout(name, e))?;
        raw.validate(name)
    }
}

const DEFAULT_WALL: &str = "white_concrete";
const DEFAULT_WALL_HEIGHT: i64 = 3;
const DEFAULT_FLOOR: &str = "white_concrete";
const DEFAULT_EXIT_MARKER: &str = "green_wool";
const DEFAULT_OCCUPANTS: usize = 3;
const DEFAULT_DOOR_XS: [i64; 3] = [20, 52, 84];
const DEFAULT_TOP_Z: i64 = 24;
const DEFAULT_BOTTOM_Z: i64 = 15;

#[derive(Debug, Deserialize)]
struct RawLayout {
    #[serde(default)]
    name: Option<String>,
    frame: Frame,
    corridor: Rect,
    #[serde(default, alias = "roomsTop")]
    rooms_top: Vec<RawRoom>,
    #[serde(default, alias = "roomsBottom")]
    rooms_bottom: Vec<RawRoom>,
    #[serde(default)]
    doors: Option<RawDoors>,
    #[serde(default)]
    wall: Option<RawWall>,
    #[serde(default, alias = "corridorFloor")]
    corridor_floor: Option<String>,
    #[serde(default, alias = "exitMarker")]
    exit_marker: Option<String>,
    #[serde(default)]
    occupants: Option<RawOccupants>,
}

#[derive(Debug, Deserialize)]
struct RawRoom {
    x: i64,
    z: i64,
    w: i64,
    h: i64,
    #[serde(alias = "blockId")]
    block: String,
}

#[derive(Debug, Deserialize)]
struct RawDoors {
    #[serde(default, rename = "topZ", alias = "top_z")]
    top_z: Option<i64>,
    #[serde(default, rename = "bottomZ", alias = "bottom_z")]
    bottom_z: Option<i64>,
    #[serde(default)]
    xs: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct RawWall {
    #[serde(default)]
    material: Option<String>,
    #[serde(default)]
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawOccupants {
    #[serde(default)]
    num: Option<usize>,
}

fn non_empty(value: Option<String>, default: &str) -> String {
    match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => default.to_string(),
    }
}

impl RawLayout {
    fn validate(self, name: &str) -> Result<LayoutDescription> {
        let frame = self.frame;
        if frame.x2 < frame.x1 || frame.z2 < frame.z1 {
            return Err(EngineError::layout(
                name,
                EngineError::geometry("frame", "maximum corner precedes minimum corner"),
            ));
        }
        if !self.corridor.is_valid() {
            return Err(EngineError::layout(
                name,
                EngineError::geometry("corridor", "width and height must be positive"),
            ));
        }

        let rooms = |list: Vec<RawRoom>, side: &str| -> Vec<Room> {
            list.into_iter()
                .enumerate()
                .filter_map(|(i, r)| {
                    let rect = Rect {
                        x: r.x,
                        z: r.z,
                        w: r.w,
                        h: r.h,
                    };
                    if rect.is_valid() {
                        Some(Room {
                            rect,
                            block: r.block,
                        })
                    } else {
                        let err = EngineError::geometry(
                            format!("{side} room #{i}"),
                            format!("non-positive size {}x{}", r.w, r.h),
                        );
                        warn!(target: "sweeper::layout", layout = name, "{err}; skipped");
                        None
                    }
                })
                .collect()
        };
        let rooms_top = rooms(self.rooms_top, "top");
        let rooms_bottom = rooms(self.rooms_bottom, "bottom");

        let doors = match self.doors {
            Some(d) => Doors {
                top_z: d.top_z.unwrap_or(DEFAULT_TOP_Z),
                bottom_z: d.bottom_z.unwrap_or(DEFAULT_BOTTOM_Z),
                xs: d.xs.unwrap_or_else(|| DEFAULT_DOOR_XS.to_vec()),
            },
            None => Doors {
                top_z: DEFAULT_TOP_Z,
                bottom_z: DEFAULT_BOTTOM_Z,
                xs: DEFAULT_DOOR_XS.to_vec(),
            },
        };

        let (material, height) = match self.wall {
            Some(w) => (w.material, w.height),
            None => (None, None),
        };
        let height = match height {
            Some(h) if h > 0 => h,
            Some(h) => {
                warn!(
                    target: "sweeper::layout",
                    layout = name,
                    height = h,
                    "non-positive wall height; using default"
                );
                DEFAULT_WALL_HEIGHT
            }
            None => DEFAULT_WALL_HEIGHT,
        };

        Ok(LayoutDescription {
            name: self.name.unwrap_or_else(|| name.to_string()),
            frame,
            corridor: self.corridor,
            rooms_top,
            rooms_bottom,
            doors,
            wall: Wall {
                material: non_empty(material, DEFAULT_WALL),
                height,
            },
            corridor_floor: non_empty(self.corridor_floor, DEFAULT_FLOOR),
            exit_marker: non_empty(self.exit_marker, DEFAULT_EXIT_MARKER),
            occupants: self
                .occupants
                .and_then(|o| o.num)
                .unwrap_or(DEFAULT_OCCUPANTS),
        })
    }
}

/// Named lookup of layout descriptions.
pub trait LayoutSource: Send + Sync {
    fn load(&self, name: &str) -> Result<LayoutDescription>;
}

/// Searches directories in order for `<name>.json`, `<name>.yaml`, `<name>.yml`.
#[derive(Debug, Clone, Default)]
pub struct DirLayoutSource {
    dirs: Vec<PathBuf>,
}

impl DirLayoutSource {
    pub fn new(dirs: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            dirs: dirs.into_iter().collect(),
        }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    fn candidates(&self, name: &str) -> Vec<PathBuf> {
        let mut out = Vec::with_capacity(self.dirs.len() * 3);
        for dir in &self.dirs {
            for ext in ["json", "yaml", "yml"] {
                out.push(dir.join(format!("{name}.{ext}")));
            }
        }
        out
    }
}

fn parse_file(name: &str, path: &Path) -> Result<LayoutDescription> {
    let text = std::fs::read_to_string(path).map_err(|e| EngineError::layout(name, e))?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => LayoutDescription::from_json(name, &text),
        _ => LayoutDescription::from_yaml(name, &text),
    }
}

impl LayoutSource for DirLayoutSource {
    fn load(&self, name: &str) -> Result<LayoutDescription> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(EngineError::layout(name, "invalid layout name"));
        }
        for path in self.candidates(name) {
            if path.is_file() {
                let layout = parse_file(name, &path)?;
                info!(
                    target: "sweeper::layout",
                    layout = name,
                    path = %path.display(),
                    "layout loaded"
                );
                return Ok(layout);
            }
        }
        Err(EngineError::layout(name, "not found in any layout directory"))
    }
}

/// Loads `name`, falling back to the built-in baseline on any failure. The
/// flag reports whether the fallback was taken.
pub fn load_or_default(source: &dyn LayoutSource, name: &str) -> (LayoutDescription, bool) {
    match source.load(name) {
        Ok(layout) => (layout, false),
        Err(err) => {
            warn!(target: "sweeper::layout", "{err}; using built-in baseline");
            (LayoutDescription::baseline(), true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> PathBuf {
        let p = std::env::temp_dir().join(format!(
            "sweeper-layout-{tag}-{}",
            time::OffsetDateTime::now_utc().unix_timestamp_nanos()
        ));
        std::fs::create_dir_all(&p).unwrap();
        p
    }

    #[test]
    fn minimal_json_gets_defaults() {
        let layout = LayoutDescription::from_json(
            "tiny",
            r#"{"frame":{"x1":0,"z1":0,"x2":20,"z2":10},"corridor":{"x":1,"z":4,"w":18,"h":2}}"#,
        )
        .unwrap();
        assert_eq!(layout.name, "tiny");
        assert_eq!(layout.doors.xs, vec![20, 52, 84]);
        assert_eq!(layout.wall.height, 3);
        assert_eq!(layout.corridor_floor, "white_concrete");
        assert_eq!(layout.exit_marker, "green_wool");
        assert_eq!(layout.occupants, 3);
    }

    #[test]
    fn invalid_rooms_are_skipped_not_fatal() {
        let layout = LayoutDescription::from_json(
            "rooms",
            r#"{
                "frame":{"x1":0,"z1":0,"x2":20,"z2":10},
                "corridor":{"x":1,"z":4,"w":18,"h":2},
                "rooms_top":[{"x":1,"z":6,"w":0,"h":3,"block":"red_wool"},
                             {"x":5,"z":6,"w":4,"h":3,"block":"blue_wool"}],
                "roomsBottom":[{"x":1,"z":0,"w":4,"h":-1,"blockId":"cyan_wool"}],
                "doors":{"topZ":6,"bottomZ":3,"xs":[3]},
                "wall":{"height":0},
                "occupants":{"num":5}
            }"#,
        )
        .unwrap();
        assert_eq!(layout.rooms_top.len(), 1);
        assert_eq!(layout.rooms_top[0].block, "blue_wool");
        assert!(layout.rooms_bottom.is_empty());
        assert_eq!(layout.doors.top_z, 6);
        assert_eq!(layout.wall.height, 3);
        assert_eq!(layout.occupants, 5);
    }

    #[test]
    fn inverted_frame_is_rejected() {
        let err = LayoutDescription::from_json(
            "bad",
            r#"{"frame":{"x1":10,"z1":0,"x2":0,"z2":10},"corridor":{"x":1,"z":4,"w":8,"h":2}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::LayoutLoadFailure { .. }));
    }

    #[test]
    fn dir_source_prefers_json_then_yaml() {
        let dir = temp_dir("source");
        std::fs::write(
            dir.join("wide.yaml"),
            "frame: {x1: 0, z1: 0, x2: 60, z2: 30}\ncorridor: {x: 2, z: 12, w: 56, h: 6}\n",
        )
        .unwrap();
        let source = DirLayoutSource::new([dir.clone()]);
        let layout = source.load("wide").unwrap();
        assert_eq!(layout.frame.x2, 60);

        std::fs::write(
            dir.join("wide.json"),
            r#"{"frame":{"x1":0,"z1":0,"x2":61,"z2":30},"corridor":{"x":2,"z":12,"w":56,"h":6}}"#,
        )
        .unwrap();
        assert_eq!(source.load("wide").unwrap().frame.x2, 61);
    }

    #[test]
    fn missing_layout_falls_back_to_baseline() {
        let source = DirLayoutSource::new([temp_dir("missing")]);
        let (layout, fell_back) = load_or_default(&source, "nope");
        assert!(fell_back);
        assert_eq!(layout, LayoutDescription::baseline());

        let (_, fell_back) = load_or_default(&source, "../etc/passwd");
        assert!(fell_back);
    }
}
