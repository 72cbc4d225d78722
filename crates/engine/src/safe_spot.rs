//! Standable-position search and ground detection over a [`WorldQuery`].
//!
//! A position is standable when the block below is solid (not air, not a
//! liquid) and the blocks at and above it are air. Unloaded blocks never
//! qualify.

use std::collections::HashSet;

use tracing::debug;

use crate::geometry::{BlockPos, Footprint};
use crate::world::WorldQuery;

/// Fractions along the corridor centerline where ground is sampled.
const GROUND_SAMPLES: [f64; 5] = [0.1, 0.3, 0.5, 0.7, 0.9];

pub async fn is_standable(world: &dyn WorldQuery, at: BlockPos) -> bool {
    let Some(below) = world.block_at(at.below()).await else {
        return false;
    };
    if !below.is_solid() {
        return false;
    }
    let Some(feet) = world.block_at(at).await else {
        return false;
    };
    if !feet.is_air() {
        return false;
    }
    matches!(world.block_at(at.above()).await, Some(head) if head.is_air())
}

/// Cells at Chebyshev distance `r` from `(x, z)`: the two fixed-z rows first
/// (low z, then high z, each swept by increasing x), then the two fixed-x
/// columns (low x, then high x, each swept by increasing z) without corners.
pub fn ring(x: i64, z: i64, r: i64) -> Vec<(i64, i64)> {
    if r <= 0 {
        return vec![(x, z)];
    }
    let mut out = Vec::with_capacity((8 * r) as usize);
    for row in [z - r, z + r] {
        for cx in x - r..=x + r {
            out.push((cx, row));
        }
    }
    for col in [x - r, x + r] {
        for cz in z - r + 1..z + r {
            out.push((col, cz));
        }
    }
    out
}

/// First standable position in expanding rings around `origin`, at
/// `origin.y`, out to `max_radius` inclusive.
pub async fn find_standable(
    world: &dyn WorldQuery,
    origin: BlockPos,
    max_radius: i64,
) -> Option<BlockPos> {
    for r in 0..=max_radius.max(0) {
        for (x, z) in ring(origin.x, origin.z, r) {
            let at = BlockPos::new(x, origin.y, z);
            if is_standable(world, at).await {
                return Some(at);
            }
        }
    }
    None
}

/// Like [`find_standable`] but only accepts cells inside `area`. When `area`
/// yields nothing, searches again with twice the radius, clamping every ring
/// cell into `frame`.
pub async fn find_standable_within(
    world: &dyn WorldQuery,
    origin: BlockPos,
    max_radius: i64,
    area: Footprint,
    frame: Footprint,
) -> Option<BlockPos> {
    for r in 0..=max_radius.max(0) {
        for (x, z) in ring(origin.x, origin.z, r) {
            if !area.contains(x, z) {
                continue;
            }
            let at = BlockPos::new(x, origin.y, z);
            if is_standable(world, at).await {
                return Some(at);
            }
        }
    }

    debug!(
        target: "sweeper::safe_spot",
        x = origin.x,
        z = origin.z,
        "nothing standable in area; widening into frame"
    );
    let mut seen = HashSet::new();
    for r in 0..=max_radius.max(1) * 2 {
        for (x, z) in ring(origin.x, origin.z, r) {
            let (x, z) = frame.clamp(x, z);
            if !seen.insert((x, z)) {
                continue;
            }
            let at = BlockPos::new(x, origin.y, z);
            if is_standable(world, at).await {
                return Some(at);
            }
        }
    }
    None
}

/// Elevation of the first air layer above the highest solid block in the
/// column, scanning down from the world's top. Unloaded blocks are skipped;
/// `None` when the whole column is unloaded, air or liquid.
pub async fn estimate_surface_elevation(world: &dyn WorldQuery, x: i64, z: i64) -> Option<i64> {
    let top = world.max_height();
    for y in (0..=top).rev() {
        let Some(block) = world.block_at(BlockPos::new(x, y, z)).await else {
            continue;
        };
        if block.is_solid() {
            return Some(y + 1);
        }
    }
    None
}

/// Median of the successful samples (upper median for even counts).
pub fn median(samples: &mut [i64]) -> Option<i64> {
    if samples.is_empty() {
        return None;
    }
    samples.sort_unstable();
    Some(samples[samples.len() / 2])
}

/// Ground elevation along the corridor: five samples on the centerline,
/// failed samples dropped, median of the rest.
pub async fn median_ground_near(world: &dyn WorldQuery, corridor: Footprint) -> Option<i64> {
    let cz = (corridor.z1 + corridor.z2).div_euclid(2);
    let span = (corridor.x2 - corridor.x1) as f64;
    let mut samples = Vec::with_capacity(GROUND_SAMPLES.len());
    for t in GROUND_SAMPLES {
        let x = (corridor.x1 as f64 + t * span).round() as i64;
        match estimate_surface_elevation(world, x, cz).await {
            Some(y) => samples.push(y),
            None => debug!(target: "sweeper::safe_spot", x, z = cz, "ground sample failed"),
        }
    }
    median(&mut samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::BlockMap;

    fn floor_world(y: i64) -> BlockMap {
        let world = BlockMap::open_air();
        world.layer(-20, -20, 20, 20, y - 1, "stone");
        world
    }

    #[test]
    fn ring_order_is_fixed_z_rows_then_fixed_x_columns() {
        assert_eq!(ring(0, 0, 0), vec![(0, 0)]);
        assert_eq!(
            ring(0, 0, 1),
            vec![
                (-1, -1),
                (0, -1),
                (1, -1),
                (-1, 1),
                (0, 1),
                (1, 1),
                (-1, 0),
                (1, 0),
            ]
        );
        let r2 = ring(5, 5, 2);
        assert_eq!(r2.len(), 16);
        let unique: HashSet<_> = r2.iter().collect();
        assert_eq!(unique.len(), 16);
    }

    #[tokio::test]
    async fn origin_is_returned_when_standable() {
        let world = floor_world(64);
        let spot = find_standable(&world, BlockPos::new(0, 64, 0), 4).await;
        assert_eq!(spot, Some(BlockPos::new(0, 64, 0)));
    }

    #[tokio::test]
    async fn rejects_liquid_floor_and_blocked_head() {
        let world = floor_world(64);
        world.set(BlockPos::new(0, 63, 0), "water");
        world.set(BlockPos::new(-1, 65, -1), "oak_leaves");
        world.set(BlockPos::new(0, 64, -1), "stone");
        world.set(BlockPos::new(1, 63, -1), "lava");
        let spot = find_standable(&world, BlockPos::new(0, 64, 0), 4).await;
        assert_eq!(spot, Some(BlockPos::new(-1, 64, 1)));
    }

    #[tokio::test]
    async fn exhausted_search_returns_none() {
        let world = BlockMap::open_air();
        assert_eq!(find_standable(&world, BlockPos::new(0, 64, 0), 3).await, None);

        let unloaded = BlockMap::default();
        assert_eq!(find_standable(&unloaded, BlockPos::new(0, 64, 0), 3).await, None);
    }

    #[tokio::test]
    async fn confined_search_widens_into_frame() {
        let world = BlockMap::open_air();
        world.layer(8, 0, 9, 0, 63, "stone");
        let area = Footprint {
            x1: -2,
            z1: -2,
            x2: 2,
            z2: 2,
        };
        let frame = Footprint {
            x1: -10,
            z1: 0,
            x2: 10,
            z2: 0,
        };
        let spot = find_standable_within(&world, BlockPos::new(0, 64, 0), 4, area, frame).await;
        assert_eq!(spot, Some(BlockPos::new(8, 64, 0)));
    }

    #[tokio::test]
    async fn surface_is_first_solid_from_the_top() {
        let world = BlockMap::open_air();
        world.set_max_height(100);
        world.column(3, 3, 0, 62, "stone");
        world.column(3, 3, 63, 66, "water");
        assert_eq!(estimate_surface_elevation(&world, 3, 3).await, Some(63));
        assert_eq!(estimate_surface_elevation(&world, 4, 4).await, None);
    }

    #[test]
    fn median_resists_a_single_outlier() {
        assert_eq!(median(&mut [10, 12, 11, 9, 100]), Some(11));
        assert_eq!(median(&mut [70, 64]), Some(70));
        assert_eq!(median(&mut []), None);
    }

    #[tokio::test]
    async fn median_ground_skips_failed_samples() {
        let world = BlockMap::default();
        world.set_max_height(90);
        let corridor = Footprint {
            x1: 0,
            z1: 0,
            x2: 40,
            z2: 6,
        };
        // xs sampled: 4, 12, 20, 28, 36 on z = 3. Only three columns load.
        world.column(4, 3, 0, 69, "stone");
        world.column(12, 3, 0, 71, "dirt");
        world.column(20, 3, 0, 89, "oak_log");
        assert_eq!(median_ground_near(&world, corridor).await, Some(72));

        let empty = BlockMap::default();
        assert_eq!(median_ground_near(&empty, corridor).await, None);
    }
}
