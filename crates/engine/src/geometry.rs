//! World-space geometry derived from a [`LayoutDescription`].
//!
//! [`DerivedGeometry`] is a pure function of the layout, the anchor policy and
//! the construction elevation. [`WorldBuildContext`] pairs the two and is only
//! ever replaced as a whole, so derived coordinates can never mix one layout's
//! dimensions with another layout's origin.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{AnchorPolicy, EngineConfig};
use crate::layout::{LayoutDescription, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl BlockPos {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }

    pub const fn offset(self, dx: i64, dy: i64, dz: i64) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }

    pub const fn below(self) -> Self {
        self.offset(0, -1, 0)
    }

    pub const fn above(self) -> Self {
        self.offset(0, 1, 0)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.x, self.y, self.z)
    }
}

/// Inclusive block region, stored with `from <= to` on every axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockBox {
    pub from: BlockPos,
    pub to: BlockPos,
}

impl BlockBox {
    pub fn new(a: BlockPos, b: BlockPos) -> Self {
        Self {
            from: BlockPos::new(a.x.min(b.x), a.y.min(b.y), a.z.min(b.z)),
            to: BlockPos::new(a.x.max(b.x), a.y.max(b.y), a.z.max(b.z)),
        }
    }

    pub fn contains(&self, p: BlockPos) -> bool {
        (self.from.x..=self.to.x).contains(&p.x)
            && (self.from.y..=self.to.y).contains(&p.y)
            && (self.from.z..=self.to.z).contains(&p.z)
    }

    pub fn volume(&self) -> i64 {
        (self.to.x - self.from.x + 1) * (self.to.y - self.from.y + 1) * (self.to.z - self.from.z + 1)
    }
}

/// Inclusive rectangle on the horizontal plane, in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Footprint {
    pub x1: i64,
    pub z1: i64,
    pub x2: i64,
    pub z2: i64,
}

impl Footprint {
    pub fn contains(&self, x: i64, z: i64) -> bool {
        (self.x1..=self.x2).contains(&x) && (self.z1..=self.z2).contains(&z)
    }

    pub fn clamp(&self, x: i64, z: i64) -> (i64, i64) {
        (x.clamp(self.x1, self.x2), z.clamp(self.z1, self.z2))
    }

    /// Box spanning this footprint between two elevations.
    pub fn slab(&self, y1: i64, y2: i64) -> BlockBox {
        BlockBox::new(
            BlockPos::new(self.x1, y1, self.z1),
            BlockPos::new(self.x2, y2, self.z2),
        )
    }
}

/// Horizontal translation from layout-local to world coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Shift {
    pub x: i64,
    pub z: i64,
}

impl Shift {
    pub fn for_layout(layout: &LayoutDescription, anchor: AnchorPolicy, origin: (i64, i64)) -> Self {
        let (ax, az) = match anchor {
            AnchorPolicy::FrameCorner => (layout.frame.x1, layout.frame.z1),
            AnchorPolicy::CorridorCenter => layout.corridor.center(),
        };
        Self {
            x: origin.0 - ax,
            z: origin.1 - az,
        }
    }

    pub fn to_world(&self, x: i64, z: i64) -> (i64, i64) {
        (x + self.x, z + self.z)
    }

    pub fn to_local(&self, x: i64, z: i64) -> (i64, i64) {
        (x - self.x, z - self.z)
    }

    pub fn rect(&self, rect: &Rect) -> Footprint {
        let (x1, z1) = self.to_world(rect.x, rect.z);
        let (x2, z2) = self.to_world(rect.max_x(), rect.max_z());
        Footprint { x1, z1, x2, z2 }
    }
}

/// Everything the builder and patrol need in world coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedGeometry {
    pub shift: Shift,
    pub layout_y: i64,
    pub spawn_point: BlockPos,
    /// Wall z of the top rooms' boundary, where top doors are carved.
    pub top_wall_z: i64,
    /// Wall z of the bottom rooms' boundary, where bottom doors are carved.
    pub bottom_wall_z: i64,
    /// Door x positions in world coordinates, in layout order.
    pub door_xs: Vec<i64>,
    /// Corridor-side cell in front of every door: all top doors, then all
    /// bottom doors. These are the patrol checkpoints.
    pub door_positions: Vec<BlockPos>,
    pub exits: [BlockPos; 2],
    pub frame: Footprint,
    pub corridor: Footprint,
}

impl DerivedGeometry {
    pub fn derive(layout: &LayoutDescription, anchor: AnchorPolicy, origin: (i64, i64), layout_y: i64) -> Self {
        let shift = Shift::for_layout(layout, anchor, origin);
        let corridor = &layout.corridor;

        let (mid_x, mid_z) = corridor.center();
        let (spawn_x, spawn_z) = shift.to_world(mid_x, mid_z);

        let (_, top_wall_z) = shift.to_world(0, layout.doors.top_z);
        let (_, bottom_wall_z) = shift.to_world(0, layout.doors.bottom_z);
        let door_xs: Vec<i64> = layout.doors.xs.iter().map(|&x| x + shift.x).collect();

        let door_positions = door_xs
            .iter()
            .map(|&x| BlockPos::new(x, layout_y, top_wall_z - 1))
            .chain(
                door_xs
                    .iter()
                    .map(|&x| BlockPos::new(x, layout_y, bottom_wall_z + 1)),
            )
            .collect();

        let (west_x, exit_z) = shift.to_world(corridor.x, mid_z);
        let (east_x, _) = shift.to_world(corridor.max_x(), mid_z);

        let frame = Footprint {
            x1: layout.frame.x1 + shift.x,
            z1: layout.frame.z1 + shift.z,
            x2: layout.frame.x2 + shift.x,
            z2: layout.frame.z2 + shift.z,
        };

        Self {
            shift,
            layout_y,
            spawn_point: BlockPos::new(spawn_x, layout_y + 1, spawn_z),
            top_wall_z,
            bottom_wall_z,
            door_xs,
            door_positions,
            exits: [
                BlockPos::new(west_x, layout_y, exit_z),
                BlockPos::new(east_x, layout_y, exit_z),
            ],
            frame,
            corridor: shift.rect(corridor),
        }
    }
}

/// A layout together with the geometry derived from it.
#[derive(Debug, Clone, PartialEq)]
pub struct WorldBuildContext {
    layout: LayoutDescription,
    derived: DerivedGeometry,
    anchor: AnchorPolicy,
    origin: (i64, i64),
}

impl WorldBuildContext {
    pub fn new(layout: LayoutDescription, cfg: &EngineConfig) -> Self {
        Self::with_elevation(layout, cfg.anchor, (cfg.origin_x, cfg.origin_z), cfg.layout_y())
    }

    pub fn with_elevation(
        layout: LayoutDescription,
        anchor: AnchorPolicy,
        origin: (i64, i64),
        layout_y: i64,
    ) -> Self {
        let derived = DerivedGeometry::derive(&layout, anchor, origin, layout_y);
        Self {
            layout,
            derived,
            anchor,
            origin,
        }
    }

    pub fn layout(&self) -> &LayoutDescription {
        &self.layout
    }

    pub fn derived(&self) -> &DerivedGeometry {
        &self.derived
    }

    /// Same layout at a different construction elevation. Returns a new
    /// context; callers swap it in wholesale.
    pub fn at_elevation(&self, layout_y: i64) -> Self {
        Self::with_elevation(self.layout.clone(), self.anchor, self.origin, layout_y)
    }

    /// A different layout under the same anchoring and elevation.
    pub fn with_layout(&self, layout: LayoutDescription) -> Self {
        Self::with_elevation(layout, self.anchor, self.origin, self.derived.layout_y)
    }

    pub fn rect(&self, rect: &Rect) -> Footprint {
        self.derived.shift.rect(rect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn baseline_ctx() -> WorldBuildContext {
        WorldBuildContext::with_elevation(
            LayoutDescription::baseline(),
            AnchorPolicy::FrameCorner,
            (0, 0),
            64,
        )
    }

    #[test]
    fn frame_corner_maps_to_anchor() {
        let mut layout = LayoutDescription::baseline();
        layout.frame.x1 = 7;
        layout.frame.z1 = -3;
        let shift = Shift::for_layout(&layout, AnchorPolicy::FrameCorner, (0, 0));
        assert_eq!(shift, Shift { x: -7, z: 3 });
        assert_eq!(shift.to_world(7, -3), (0, 0));

        let shift = Shift::for_layout(&layout, AnchorPolicy::FrameCorner, (100, -50));
        assert_eq!(shift.to_world(7, -3), (100, -50));
    }

    #[test]
    fn local_world_round_trip() {
        let layout = LayoutDescription::baseline();
        for anchor in [AnchorPolicy::FrameCorner, AnchorPolicy::CorridorCenter] {
            let shift = Shift::for_layout(&layout, anchor, (13, -9));
            for (x, z) in [(0, 0), (20, 24), (-5, 99), (100, 40)] {
                let (wx, wz) = shift.to_world(x, z);
                assert_eq!(shift.to_local(wx, wz), (x, z));
            }
        }
    }

    #[test]
    fn corridor_center_anchor_centers_spawn() {
        let ctx = WorldBuildContext::with_elevation(
            LayoutDescription::baseline(),
            AnchorPolicy::CorridorCenter,
            (0, 0),
            64,
        );
        let d = ctx.derived();
        assert_eq!(d.shift, Shift { x: -50, z: -20 });
        assert_eq!(d.spawn_point, BlockPos::new(0, 65, 0));
    }

    #[test]
    fn baseline_checkpoints_and_exits() {
        let ctx = baseline_ctx();
        let d = ctx.derived();
        assert_eq!(d.top_wall_z, 24);
        assert_eq!(d.bottom_wall_z, 15);
        assert_eq!(
            d.door_positions,
            vec![
                BlockPos::new(20, 64, 23),
                BlockPos::new(52, 64, 23),
                BlockPos::new(84, 64, 23),
                BlockPos::new(20, 64, 16),
                BlockPos::new(52, 64, 16),
                BlockPos::new(84, 64, 16),
            ]
        );
        assert_eq!(d.exits, [BlockPos::new(5, 64, 20), BlockPos::new(94, 64, 20)]);
        assert_eq!(d.spawn_point, BlockPos::new(50, 65, 20));
        assert_eq!(
            d.corridor,
            Footprint {
                x1: 5,
                z1: 16,
                x2: 94,
                z2: 23
            }
        );
    }

    #[test]
    fn relevel_recomputes_every_derived_field() {
        let ctx = baseline_ctx();
        let low = ctx.at_elevation(4);
        assert_eq!(low.derived().layout_y, 4);
        assert!(low.derived().door_positions.iter().all(|p| p.y == 4));
        assert_eq!(low.derived().spawn_point.y, 5);
        assert!(low.derived().exits.iter().all(|p| p.y == 4));
        assert_eq!(low.derived().shift, ctx.derived().shift);
    }

    #[test]
    fn block_box_normalizes_corners() {
        let b = BlockBox::new(BlockPos::new(5, 3, 9), BlockPos::new(1, 7, 2));
        assert_eq!(b.from, BlockPos::new(1, 3, 2));
        assert_eq!(b.to, BlockPos::new(5, 7, 9));
        assert_eq!(b.volume(), 5 * 5 * 8);
        assert!(b.contains(BlockPos::new(3, 5, 2)));
    }
}
