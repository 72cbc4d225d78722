//! The geometry engine: turns the current [`WorldBuildContext`] into an
//! ordered stream of fills and sets on the command lane.
//!
//! Every structural placement goes through the [`PlacementTracker`] before it
//! is queued, so [`GeometryEngine::clean`] can revert exactly what was built.
//! Site preparation (clearing air, resurfacing ground) and entity spawns are
//! not tracked.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::command::{Command, AIR, EPHEMERAL_KINDS};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::geometry::{BlockBox, BlockPos, DerivedGeometry, Footprint, Shift, WorldBuildContext};
use crate::layout::Room;
use crate::safe_spot::{find_standable_within, median_ground_near};
use crate::scheduler::{Outcome, Scheduler};
use crate::store::{self, LastBuild, Store};
use crate::tracker::PlacementTracker;
use crate::world::WorldQuery;

/// Height cleared by [`GeometryEngine::clear_above`].
pub const CLEAR_ABOVE_HEIGHT: i64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildPhase {
    #[default]
    Idle,
    Clearing,
    LayingCorridor,
    LayingRooms,
    CarvingDoors,
    MarkingExits,
    RelocatingSpawn,
}

/// Collaborators a build talks to.
#[derive(Clone, Copy)]
pub struct BuildIo<'a> {
    pub lane: &'a Scheduler,
    pub world: &'a dyn WorldQuery,
    pub store: Option<&'a Store>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildReport {
    pub layout: String,
    pub layout_y: i64,
    pub shift: Shift,
    pub spawn: BlockPos,
    /// The spawn search found nothing and the fallback spot was used.
    pub spawn_fallback: bool,
    pub doors: usize,
    pub placements: usize,
    pub cleaned_previous: bool,
}

pub struct GeometryEngine {
    cfg: EngineConfig,
    ctx: WorldBuildContext,
    tracker: PlacementTracker,
    phase: BuildPhase,
    last_spawn: Option<BlockPos>,
    /// Frame and elevation of the most recent build by this engine.
    last_site: Option<(Footprint, i64)>,
}

impl GeometryEngine {
    pub fn new(ctx: WorldBuildContext, cfg: EngineConfig) -> Self {
        Self {
            cfg,
            ctx,
            tracker: PlacementTracker::default(),
            phase: BuildPhase::Idle,
            last_spawn: None,
            last_site: None,
        }
    }

    pub fn context(&self) -> &WorldBuildContext {
        &self.ctx
    }

    pub fn derived(&self) -> &DerivedGeometry {
        self.ctx.derived()
    }

    /// Swaps in a new context. Nothing is issued until the next build. The
    /// remembered spawn only survives when layout and shift are unchanged.
    pub fn replace_context(&mut self, ctx: WorldBuildContext) {
        if ctx.layout() != self.ctx.layout() || ctx.derived().shift != self.ctx.derived().shift {
            self.last_spawn = None;
        }
        self.ctx = ctx;
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    pub fn tracker(&self) -> &PlacementTracker {
        &self.tracker
    }

    /// Where the agent was last sent by a build.
    pub fn spawn(&self) -> BlockPos {
        self.last_spawn.unwrap_or(self.ctx.derived().spawn_point)
    }

    pub async fn build(&mut self, io: BuildIo<'_>) -> BuildReport {
        self.build_with(io, |_| {}).await
    }

    /// Runs a full build. `on_geometry` sees the final derived geometry once
    /// the construction elevation is settled and before anything is placed.
    pub async fn build_with<F>(&mut self, io: BuildIo<'_>, on_geometry: F) -> BuildReport
    where
        F: FnOnce(&DerivedGeometry) + Send,
    {
        let layout_name = self.ctx.layout().name.clone();
        info!(target: "sweeper::build", layout = %layout_name, "build begin");
        store::note(io.store, "build.begin", json!({ "layout": layout_name }));

        self.settle_elevation(io).await;
        on_geometry(self.ctx.derived());

        self.phase = BuildPhase::Clearing;
        let cleaned_previous = self.clear_previous(io).await;
        self.prepare_site(io.lane).await;

        self.phase = BuildPhase::LayingCorridor;
        self.lay_corridor(io.lane).await;

        self.phase = BuildPhase::LayingRooms;
        self.lay_rooms(io.lane).await;

        self.phase = BuildPhase::CarvingDoors;
        self.carve_doors(io.lane).await;

        self.phase = BuildPhase::MarkingExits;
        self.mark_exits(io.lane).await;

        self.phase = BuildPhase::RelocatingSpawn;
        let (spawn, spawn_fallback) = self.relocate_spawn(io).await;

        let derived = self.ctx.derived();
        self.last_site = Some((derived.frame, derived.layout_y));
        if let Some(store) = io.store {
            let record = LastBuild {
                shift_x: derived.shift.x,
                shift_z: derived.shift.z,
                layout_y: derived.layout_y,
                layout_name: layout_name.clone(),
                frame: Some(derived.frame),
                built_at_ms: store::now_ms(),
            };
            if let Err(err) = store.record_build(&record) {
                warn!(target: "sweeper::build", "last build not recorded: {err:#}");
            }
        }

        let report = BuildReport {
            layout: layout_name,
            layout_y: derived.layout_y,
            shift: derived.shift,
            spawn,
            spawn_fallback,
            doors: derived.door_positions.len(),
            placements: self.tracker.len(),
            cleaned_previous,
        };
        store::note(
            io.store,
            "build.done",
            serde_json::to_value(&report).unwrap_or_default(),
        );
        info!(
            target: "sweeper::build",
            layout = %report.layout,
            layout_y = report.layout_y,
            spawn = %report.spawn,
            placements = report.placements,
            "build done"
        );
        self.phase = BuildPhase::Idle;
        report
    }

    /// Re-levels the context onto detected ground when enabled. With no usable
    /// samples, the agent's feet are the next best guess; failing that the
    /// configured elevation stays.
    ///
    /// A previous build (or its resurfaced ground) under the corridor reads as
    /// ground one block above its own elevation; that elevation is kept.
    async fn settle_elevation(&mut self, io: BuildIo<'_>) {
        if !self.cfg.auto_ground() {
            return;
        }
        let world = io.world;
        let corridor = self.ctx.derived().corridor;
        let mut detected = match median_ground_near(world, corridor).await {
            Some(y) => Some(y),
            None => world
                .agent_position()
                .await
                .map(|p| ((p.y - 1.0).floor() as i64).max(0)),
        };
        if let (Some(y), Some((footprint, prev_y))) = (detected, self.previous_site(io.store)) {
            let covered = footprint.contains(corridor.x1, corridor.z1)
                && footprint.contains(corridor.x2, corridor.z2);
            if covered && y == prev_y + 1 {
                debug!(
                    target: "sweeper::build",
                    layout_y = prev_y,
                    "own floor detected; keeping elevation"
                );
                detected = Some(prev_y);
            }
        }
        match detected {
            Some(y) if y != self.ctx.derived().layout_y => {
                info!(target: "sweeper::build", layout_y = y, "ground detected; re-leveling");
                self.ctx = self.ctx.at_elevation(y);
            }
            Some(_) => {}
            None => debug!(
                target: "sweeper::build",
                layout_y = self.ctx.derived().layout_y,
                "ground not detected; keeping elevation"
            ),
        }
    }

    /// This engine's last build, else the one on record.
    fn previous_site(&self, store: Option<&Store>) -> Option<(Footprint, i64)> {
        if self.last_site.is_some() {
            return self.last_site;
        }
        match store?.last_build() {
            Ok(Some(last)) => Some((self.recorded_footprint(&last), last.layout_y)),
            Ok(None) => None,
            Err(err) => {
                warn!(target: "sweeper::build", "previous build unknown: {err:#}");
                None
            }
        }
    }

    /// Stored frame, or the current frame moved by the stored shift for rows
    /// written before frames were kept.
    fn recorded_footprint(&self, last: &LastBuild) -> Footprint {
        last.frame.unwrap_or_else(|| {
            let frame = &self.ctx.layout().frame;
            Footprint {
                x1: frame.x1 + last.shift_x,
                z1: frame.z1 + last.shift_z,
                x2: frame.x2 + last.shift_x,
                z2: frame.z2 + last.shift_z,
            }
        })
    }

    /// Clears the air above the previous build's footprint and restores its
    /// ground layer. Skipped when the previous build sits exactly where this
    /// one goes, since site preparation covers it.
    async fn clear_previous(&self, io: BuildIo<'_>) -> bool {
        let Some(store) = io.store else {
            return false;
        };
        let last = match store.last_build() {
            Ok(Some(last)) => last,
            Ok(None) => return false,
            Err(err) => {
                warn!(target: "sweeper::build", "previous build unknown: {err:#}");
                return false;
            }
        };

        let derived = self.ctx.derived();
        let footprint = self.recorded_footprint(&last);
        if footprint == derived.frame && last.layout_y == derived.layout_y {
            return false;
        }

        info!(
            target: "sweeper::build",
            layout = %last.layout_name,
            layout_y = last.layout_y,
            "clearing previous footprint"
        );
        let y = last.layout_y;
        self.heavy(io.lane, &Command::fill(footprint.slab(y + 1, y + self.cfg.clear_height), AIR))
            .await;
        self.heavy(io.lane, &Command::fill(footprint.slab(y, y), &self.cfg.ground_block))
            .await;
        true
    }

    async fn prepare_site(&self, lane: &Scheduler) {
        let d = self.ctx.derived();
        let y = d.layout_y;
        self.heavy(lane, &Command::fill(d.frame.slab(y + 1, y + self.cfg.clear_height), AIR))
            .await;
        self.heavy(lane, &Command::fill(d.frame.slab(y, y), &self.cfg.ground_block))
            .await;
    }

    async fn lay_corridor(&mut self, lane: &Scheduler) {
        let d = self.ctx.derived();
        let region = d.corridor.slab(d.layout_y, d.layout_y);
        let block = self.ctx.layout().corridor_floor.clone();
        self.place_fill(lane, region, block, None).await;
    }

    async fn lay_rooms(&mut self, lane: &Scheduler) {
        let rooms: Vec<Room> = self.ctx.layout().rooms().cloned().collect();
        let wall = self.ctx.layout().wall.clone();
        let y = self.ctx.derived().layout_y;

        for (i, room) in rooms.iter().enumerate() {
            if !room.rect.is_valid() {
                let err = EngineError::geometry(
                    format!("room #{i}"),
                    format!("non-positive size {}x{}", room.rect.w, room.rect.h),
                );
                warn!(target: "sweeper::build", "{err}; skipped");
                continue;
            }
            let f = self.ctx.rect(&room.rect);
            self.place_fill(lane, f.slab(y, y), room.block.clone(), None).await;

            if wall.height <= 0 {
                continue;
            }
            let (y1, y2) = (y + 1, y + wall.height);
            for side in [
                Footprint { z2: f.z1, ..f },
                Footprint { z1: f.z2, ..f },
                Footprint { x2: f.x1, ..f },
                Footprint { x1: f.x2, ..f },
            ] {
                self.place_fill(lane, side.slab(y1, y2), wall.material.clone(), None)
                    .await;
            }
        }
    }

    /// Opens a door-sized air shaft through the top wall at every door x, then
    /// through the bottom wall. Even widths lean toward +x.
    pub async fn carve_doors(&mut self, lane: &Scheduler) {
        let d = self.ctx.derived();
        let width = self.cfg.door_width.max(1);
        let height = self.cfg.door_height.max(1);
        let (y1, y2) = (d.layout_y + 1, d.layout_y + height);
        let left = (width - 1).div_euclid(2);
        let right = width.div_euclid(2);

        let mut shafts = Vec::with_capacity(d.door_xs.len() * 2);
        for z in [d.top_wall_z, d.bottom_wall_z] {
            for &x in &d.door_xs {
                shafts.push(BlockBox::new(
                    BlockPos::new(x - left, y1, z),
                    BlockPos::new(x + right, y2, z),
                ));
            }
        }
        let delay = self.cfg.door_delay();
        for shaft in shafts {
            self.place_fill(lane, shaft, AIR.to_string(), Some(delay)).await;
        }
    }

    async fn mark_exits(&mut self, lane: &Scheduler) {
        let exits = self.ctx.derived().exits;
        let marker = self.ctx.layout().exit_marker.clone();
        for exit in exits {
            self.tracker.record_set(exit, marker.clone());
            lane.command(&Command::set_block(exit, marker.clone())).await;
        }
    }

    /// Moves the world spawn and the agent onto a standable cell near the
    /// corridor center.
    async fn relocate_spawn(&mut self, io: BuildIo<'_>) -> (BlockPos, bool) {
        let d = self.ctx.derived();
        let radius = self.cfg.spawn_search_radius;
        let found =
            find_standable_within(io.world, d.spawn_point, radius, d.corridor, d.frame).await;

        let (spawn, fallback) = match found {
            Some(at) => (at, false),
            None => {
                let origin = d.spawn_point;
                let err = EngineError::NoSafeSpotFound {
                    x: origin.x,
                    y: origin.y,
                    z: origin.z,
                    radius,
                };
                let at = self.last_spawn.unwrap_or(origin).above();
                warn!(target: "sweeper::build", spawn = %at, "{err}; using fallback");
                (at, true)
            }
        };
        if !fallback {
            self.last_spawn = Some(spawn);
        }

        io.lane.command(&Command::SetWorldSpawn { at: spawn }).await;
        io.lane
            .command_with_delay(&Command::Teleport { to: spawn }, self.cfg.teleport_delay())
            .await;
        (spawn, fallback)
    }

    /// Reverts everything the last builds placed. Spawning is switched off
    /// first and only ephemeral entities are removed; occupants stay.
    pub async fn clean(&mut self, io: BuildIo<'_>) {
        info!(target: "sweeper::build", records = self.tracker.len(), "clean begin");
        let records = self.tracker.len();
        for rule in ["doMobSpawning", "doPatrolSpawning", "doTraderSpawning"] {
            io.lane.command(&Command::GameRule { rule, value: false }).await;
        }
        for kind in EPHEMERAL_KINDS {
            io.lane
                .command(&Command::KillKind {
                    kind: (*kind).to_string(),
                })
                .await;
        }

        self.tracker.clear_all(io.lane).await;

        let d = self.ctx.derived();
        self.heavy(io.lane, &Command::fill(d.frame.slab(d.layout_y, d.layout_y), &self.cfg.ground_block))
            .await;
        store::note(io.store, "clean", json!({ "records": records }));
        info!(target: "sweeper::build", "clean done");
    }

    /// Summons occupants until the layout's count is reached, cycling through
    /// the door checkpoints. Returns how many were summoned.
    pub async fn place_occupants(&self, io: BuildIo<'_>) -> usize {
        let kind = self.cfg.occupant_kind.clone();
        let wanted = self.ctx.layout().occupants;
        let existing = io.world.entities_by_kind(&kind).await.len();
        let missing = wanted.saturating_sub(existing);
        if missing == 0 {
            debug!(target: "sweeper::build", existing, wanted, "occupants already present");
            return 0;
        }

        let d = self.ctx.derived();
        let spots: Vec<BlockPos> = if d.door_positions.is_empty() {
            vec![d.spawn_point]
        } else {
            d.door_positions.iter().map(|p| p.above()).collect()
        };
        for i in 0..missing {
            let at = spots[(existing + i) % spots.len()];
            io.lane
                .command(&Command::Summon {
                    kind: kind.clone(),
                    at,
                })
                .await;
        }
        store::note(
            io.store,
            "occupants.spawn",
            json!({ "kind": kind, "existing": existing, "summoned": missing }),
        );
        info!(target: "sweeper::build", existing, summoned = missing, "occupants topped up");
        missing
    }

    /// One heavy air fill over the frame, well above the construction.
    pub async fn clear_above(&self, lane: &Scheduler) -> Outcome {
        let d = self.ctx.derived();
        let region = d.frame.slab(d.layout_y + 1, d.layout_y + CLEAR_ABOVE_HEIGHT);
        self.heavy(lane, &Command::fill(region, AIR)).await
    }

    async fn place_fill(
        &mut self,
        lane: &Scheduler,
        region: BlockBox,
        block: String,
        delay: Option<Duration>,
    ) -> Outcome {
        self.tracker.record_fill(region, block.clone());
        let cmd = Command::fill(region, block);
        let delay = delay.unwrap_or_else(|| self.delay_for(&cmd));
        lane.command_with_delay(&cmd, delay).await
    }

    async fn heavy(&self, lane: &Scheduler, cmd: &Command) -> Outcome {
        lane.command_with_delay(cmd, self.cfg.heavy_delay()).await
    }

    fn delay_for(&self, cmd: &Command) -> Duration {
        if cmd.is_heavy() {
            self.cfg.heavy_delay()
        } else {
            self.cfg.command_delay()
        }
    }
}
