//! Checkpoint patrol.
//!
//! [`PatrolMachine`] is pure: each [`PatrolMachine::step`] takes the agent's
//! position and pushes the effects the tick calls for. The session turns those
//! into pathing goals and lane commands.

use rand::Rng;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::geometry::BlockPos;
use crate::world::Vec3;
use sweeper_protocol::DoorView;

/// One door checkpoint and whether it has been cleared since the last build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoorState {
    pub index: usize,
    pub at: BlockPos,
    pub cleared: bool,
    pub cleared_at_tick: Option<u64>,
}

impl DoorState {
    pub fn view(&self) -> DoorView {
        DoorView {
            index: self.index,
            x: self.at.x,
            y: self.at.y,
            z: self.at.z,
            cleared: self.cleared,
            cleared_at_tick: self.cleared_at_tick.map_or(-1, |t| t as i64),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PatrolCursor {
    pub checkpoint: usize,
    pub dwell: u32,
    pub tick: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatrolEffect {
    /// Walk to the checkpoint. Emitted once per approach, not every tick.
    Goal { at: BlockPos },
    /// The door was reached for the first time; mark it.
    Clear { door: usize, at: BlockPos, tick: u64 },
    /// Time to nudge the occupants.
    Wander { tick: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatrolSettings {
    pub arrival_threshold: f64,
    pub dwell_limit: u32,
    pub wander_every: u64,
}

impl From<&EngineConfig> for PatrolSettings {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            arrival_threshold: cfg.arrival_threshold,
            dwell_limit: cfg.dwell_limit.max(1),
            wander_every: cfg.wander_every,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PatrolMachine {
    settings: PatrolSettings,
    doors: Vec<DoorState>,
    cursor: PatrolCursor,
    /// Checkpoint the outstanding goal points at.
    goal: Option<usize>,
}

impl PatrolMachine {
    pub fn new(settings: PatrolSettings, checkpoints: &[BlockPos]) -> Self {
        let mut machine = Self {
            settings,
            doors: Vec::new(),
            cursor: PatrolCursor::default(),
            goal: None,
        };
        machine.reset_doors(checkpoints);
        machine
    }

    /// Fresh, uncleared door list for a new build. The cursor is kept.
    pub fn reset_doors(&mut self, checkpoints: &[BlockPos]) {
        self.doors = checkpoints
            .iter()
            .enumerate()
            .map(|(index, &at)| DoorState {
                index,
                at,
                cleared: false,
                cleared_at_tick: None,
            })
            .collect();
        self.goal = None;
    }

    /// Back to the first checkpoint with counters zeroed.
    pub fn restart(&mut self) {
        self.cursor = PatrolCursor::default();
        self.goal = None;
    }

    pub fn doors(&self) -> &[DoorState] {
        &self.doors
    }

    pub fn cursor(&self) -> PatrolCursor {
        self.cursor
    }

    pub fn cleared_count(&self) -> usize {
        self.doors.iter().filter(|d| d.cleared).count()
    }

    pub fn target(&self) -> Option<&DoorState> {
        if self.doors.is_empty() {
            return None;
        }
        self.doors.get(self.cursor.checkpoint % self.doors.len())
    }

    /// Advances one tick. An unknown agent position counts as not arrived.
    pub fn step(&mut self, agent: Option<Vec3>, out: &mut Vec<PatrolEffect>) {
        self.cursor.tick += 1;
        let tick = self.cursor.tick;

        if !self.doors.is_empty() {
            let slot = self.cursor.checkpoint % self.doors.len();
            let at = self.doors[slot].at;
            let arrived = agent
                .map(|p| p.manhattan_xz(at) <= self.settings.arrival_threshold)
                .unwrap_or(false);

            if arrived {
                self.goal = None;
                self.cursor.dwell += 1;
                let door = &mut self.doors[slot];
                if self.cursor.dwell == 1 && !door.cleared {
                    door.cleared = true;
                    door.cleared_at_tick = Some(tick);
                    out.push(PatrolEffect::Clear {
                        door: slot,
                        at,
                        tick,
                    });
                }
                if self.cursor.dwell >= self.settings.dwell_limit {
                    self.cursor.checkpoint = (slot + 1) % self.doors.len();
                    self.cursor.dwell = 0;
                }
            } else {
                self.cursor.dwell = 0;
                if self.goal != Some(slot) {
                    self.goal = Some(slot);
                    out.push(PatrolEffect::Goal { at });
                }
            }
        }

        if self.settings.wander_every > 0 && tick % self.settings.wander_every == 0 {
            out.push(PatrolEffect::Wander { tick });
        }
    }
}

/// Where to nudge an occupant standing at `from`: a diagonal step of
/// `amplitude` blocks with a random sign per axis. Returns the rounded
/// selector anchor and the rounded destination.
pub fn wander_step<R: Rng>(from: Vec3, amplitude: i64, rng: &mut R) -> (BlockPos, BlockPos) {
    let near = from.rounded();
    let mut sign = || if rng.gen_bool(0.5) { -1 } else { 1 };
    let dx = sign() * amplitude;
    let dz = sign() * amplitude;
    let to = Vec3::new(from.x + dx as f64, from.y, from.z + dz as f64).rounded();
    (near, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn settings() -> PatrolSettings {
        PatrolSettings {
            arrival_threshold: 1.2,
            dwell_limit: 8,
            wander_every: 80,
        }
    }

    fn checkpoints() -> Vec<BlockPos> {
        vec![
            BlockPos::new(20, 64, 23),
            BlockPos::new(52, 64, 23),
            BlockPos::new(20, 64, 16),
        ]
    }

    #[test]
    fn stationary_agent_clears_once_and_advances_on_eighth_dwell() {
        let mut m = PatrolMachine::new(settings(), &checkpoints());
        let here = Some(Vec3::new(20.0, 64.0, 23.0));
        let mut out = Vec::new();

        m.step(here, &mut out);
        assert_eq!(
            out,
            vec![PatrolEffect::Clear {
                door: 0,
                at: BlockPos::new(20, 64, 23),
                tick: 1
            }]
        );
        assert!(m.doors()[0].cleared);
        assert_eq!(m.doors()[0].cleared_at_tick, Some(1));

        for tick in 2..=7 {
            out.clear();
            m.step(here, &mut out);
            assert!(out.is_empty(), "tick {tick}");
            assert_eq!(m.cursor().checkpoint, 0);
        }

        out.clear();
        m.step(here, &mut out);
        assert!(out.is_empty());
        assert_eq!(m.cursor().checkpoint, 1);
        assert_eq!(m.cursor().dwell, 0);
        assert_eq!(m.cleared_count(), 1);

        out.clear();
        m.step(here, &mut out);
        assert_eq!(
            out,
            vec![PatrolEffect::Goal {
                at: BlockPos::new(52, 64, 23)
            }]
        );
    }

    #[test]
    fn goal_is_not_reissued_while_walking() {
        let mut m = PatrolMachine::new(settings(), &checkpoints());
        let mut out = Vec::new();
        for _ in 0..5 {
            m.step(Some(Vec3::new(0.0, 64.0, 0.0)), &mut out);
        }
        assert_eq!(out.len(), 1);

        m.step(None, &mut out);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn returning_to_a_cleared_door_does_not_clear_again() {
        let mut m = PatrolMachine::new(
            PatrolSettings {
                dwell_limit: 1,
                ..settings()
            },
            &[BlockPos::new(0, 64, 0)],
        );
        let here = Some(Vec3::new(0.4, 64.0, 0.4));
        let mut out = Vec::new();
        for _ in 0..4 {
            m.step(here, &mut out);
        }
        let clears = out
            .iter()
            .filter(|e| matches!(e, PatrolEffect::Clear { .. }))
            .count();
        assert_eq!(clears, 1);
    }

    #[test]
    fn arrival_uses_horizontal_manhattan_distance() {
        let mut m = PatrolMachine::new(settings(), &checkpoints());
        let mut out = Vec::new();
        m.step(Some(Vec3::new(20.5, 70.0, 22.5)), &mut out);
        assert!(matches!(out[0], PatrolEffect::Clear { .. }));

        // Euclidean distance would be under 1.0 here.
        let mut m = PatrolMachine::new(settings(), &checkpoints());
        out.clear();
        m.step(Some(Vec3::new(20.9, 64.0, 22.4)), &mut out);
        assert!(matches!(out[0], PatrolEffect::Goal { .. }));
    }

    #[test]
    fn wander_fires_every_nth_tick_even_without_doors() {
        let mut m = PatrolMachine::new(settings(), &[]);
        let mut out = Vec::new();
        for _ in 0..160 {
            m.step(None, &mut out);
        }
        assert_eq!(
            out,
            vec![
                PatrolEffect::Wander { tick: 80 },
                PatrolEffect::Wander { tick: 160 }
            ]
        );
    }

    #[test]
    fn rebuild_resets_doors_and_restart_resets_cursor() {
        let mut m = PatrolMachine::new(settings(), &checkpoints());
        let mut out = Vec::new();
        m.step(Some(Vec3::new(20.0, 64.0, 23.0)), &mut out);
        assert_eq!(m.cleared_count(), 1);

        m.reset_doors(&checkpoints()[..2]);
        assert_eq!(m.doors().len(), 2);
        assert_eq!(m.cleared_count(), 0);
        assert_eq!(m.cursor().tick, 1);

        m.restart();
        assert_eq!(m.cursor(), PatrolCursor::default());
    }

    #[test]
    fn wander_step_moves_diagonally_by_amplitude() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..20 {
            let (near, to) = wander_step(Vec3::new(10.4, 65.0, -3.6), 2, &mut rng);
            assert_eq!(near, BlockPos::new(10, 65, -4));
            assert_eq!((to.x - 10).abs(), 2);
            assert_eq!((to.z + 4).abs(), 2);
            assert_eq!(to.y, 65);
        }
    }
}
