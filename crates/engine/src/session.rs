//! One connected agent: the command lane, the geometry engine, the patrol
//! machine and the background timers, behind the command surface the control
//! API and chat collaborators call.
//!
//! Builds and cleans serialize on the geometry mutex. Patrol, lock and status
//! state sit behind a short-lived std mutex so status stays answerable while a
//! build is in progress.

use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::builder::{BuildIo, BuildReport, GeometryEngine};
use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::Result;
use crate::geometry::{BlockPos, WorldBuildContext};
use crate::layout::{load_or_default, LayoutDescription, LayoutSource};
use crate::patrol::{wander_step, PatrolEffect, PatrolMachine, PatrolSettings};
use crate::periodic::PeriodicTask;
use crate::scheduler::{Outcome, Scheduler};
use crate::store::{self, Store};
use crate::world::{Pathing, WorldQuery};
use sweeper_protocol::{LockMode, StatusReport};

/// Pause after each follow-the-player teleport.
const FOLLOW_DELAY: Duration = Duration::from_millis(1500);

/// External collaborators a session is wired to.
#[derive(Clone)]
pub struct SessionParts {
    pub lane: Scheduler,
    pub world: Arc<dyn WorldQuery>,
    pub pathing: Arc<dyn Pathing>,
    pub layouts: Arc<dyn LayoutSource>,
    pub store: Option<Store>,
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    cfg: EngineConfig,
    parts: SessionParts,
    geometry: tokio::sync::Mutex<GeometryEngine>,
    state: Mutex<Shared>,
}

struct Shared {
    patrol: PatrolMachine,
    lock: LockMode,
    layout_name: String,
    spawn: BlockPos,
    rng: StdRng,
    patrol_task: Option<PeriodicTask>,
    sync_task: Option<PeriodicTask>,
    environment_task: Option<PeriodicTask>,
}

impl Session {
    pub fn new(cfg: EngineConfig, parts: SessionParts, layout: LayoutDescription) -> Self {
        let ctx = WorldBuildContext::new(layout, &cfg);
        let derived = ctx.derived();
        let shared = Shared {
            patrol: PatrolMachine::new(PatrolSettings::from(&cfg), &derived.door_positions),
            lock: LockMode::Unlocked,
            layout_name: ctx.layout().name.clone(),
            spawn: derived.spawn_point,
            rng: StdRng::from_entropy(),
            patrol_task: None,
            sync_task: None,
            environment_task: None,
        };
        let geometry = GeometryEngine::new(ctx, cfg.clone());
        Self {
            inner: Arc::new(Inner {
                cfg,
                parts,
                geometry: tokio::sync::Mutex::new(geometry),
                state: Mutex::new(shared),
            }),
        }
    }

    /// Starts with the named layout, or the built-in one if it cannot be
    /// loaded.
    pub fn open(cfg: EngineConfig, parts: SessionParts, layout_name: &str) -> Self {
        let (layout, fell_back) = load_or_default(parts.layouts.as_ref(), layout_name);
        if fell_back {
            info!(target: "sweeper::layout", requested = layout_name, "starting with baseline layout");
        }
        Self::new(cfg, parts, layout)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub fn lane(&self) -> &Scheduler {
        &self.inner.parts.lane
    }

    pub fn store(&self) -> Option<&Store> {
        self.inner.parts.store.as_ref()
    }

    fn state(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn io(&self) -> BuildIo<'_> {
        let parts = &self.inner.parts;
        BuildIo {
            lane: &parts.lane,
            world: parts.world.as_ref(),
            store: parts.store.as_ref(),
        }
    }

    pub async fn build(&self) -> BuildReport {
        let mut geo = self.inner.geometry.lock().await;
        self.build_locked(&mut geo).await
    }

    async fn build_locked(&self, geo: &mut GeometryEngine) -> BuildReport {
        let report = geo
            .build_with(self.io(), |derived| {
                self.state().patrol.reset_doors(&derived.door_positions);
            })
            .await;
        let mut st = self.state();
        st.spawn = report.spawn;
        st.layout_name = report.layout.clone();
        report
    }

    /// Loads `name` and rebuilds with it. When the layout cannot be loaded the
    /// current one stays and nothing is issued.
    pub async fn switch_layout(&self, name: &str) -> Result<BuildReport> {
        let layout = match self.inner.parts.layouts.load(name) {
            Ok(layout) => layout,
            Err(err) => {
                warn!(target: "sweeper::layout", "{err}; keeping current layout");
                return Err(err);
            }
        };
        let mut geo = self.inner.geometry.lock().await;
        let ctx = geo.context().with_layout(layout);
        {
            let mut st = self.state();
            st.patrol.reset_doors(&ctx.derived().door_positions);
            st.layout_name = ctx.layout().name.clone();
            st.spawn = ctx.derived().spawn_point;
        }
        geo.replace_context(ctx);
        info!(target: "sweeper::layout", layout = name, "layout switched");
        Ok(self.build_locked(&mut geo).await)
    }

    pub async fn clean(&self) {
        let mut geo = self.inner.geometry.lock().await;
        geo.clean(self.io()).await;
    }

    pub async fn clear_above(&self) -> Outcome {
        let geo = self.inner.geometry.lock().await;
        geo.clear_above(&self.inner.parts.lane).await
    }

    pub async fn place_occupants(&self) -> usize {
        let geo = self.inner.geometry.lock().await;
        geo.place_occupants(self.io()).await
    }

    /// Starts (or restarts) the patrol timer from the first checkpoint.
    /// Refused while the agent is locked; returns whether it started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_patrol(&self) -> bool {
        let mut st = self.state();
        if st.lock.is_locked() {
            info!(target: "sweeper::patrol", lock = ?st.lock, "locked; patrol refused");
            return false;
        }
        if let Some(task) = st.patrol_task.take() {
            task.stop();
        }
        st.patrol.restart();
        let weak = Arc::downgrade(&self.inner);
        st.patrol_task = Some(PeriodicTask::spawn(
            "patrol",
            self.inner.cfg.tick_period(),
            move || with_session(weak.clone(), |s| async move { s.patrol_tick().await }),
        ));
        let doors = st.patrol.doors().len();
        drop(st);

        info!(target: "sweeper::patrol", doors, "patrol started");
        store::note(self.store(), "patrol.start", json!({ "doors": doors }));
        true
    }

    /// Returns whether a patrol was running.
    pub fn stop_patrol(&self) -> bool {
        let task = self.state().patrol_task.take();
        let Some(task) = task else {
            return false;
        };
        task.stop();
        let tick = self.state().patrol.cursor().tick;
        info!(target: "sweeper::patrol", tick, "patrol stopped");
        store::note(self.store(), "patrol.stop", json!({ "tick": tick }));
        true
    }

    pub fn is_patrolling(&self) -> bool {
        self.state().patrol_task.is_some()
    }

    /// One patrol tick: read the agent, step the machine, act on its effects.
    pub async fn patrol_tick(&self) {
        let agent = self.inner.parts.world.agent_position().await;
        let mut effects = Vec::new();
        self.state().patrol.step(agent, &mut effects);

        let cfg = &self.inner.cfg;
        for effect in effects {
            match effect {
                PatrolEffect::Goal { at } => {
                    debug!(target: "sweeper::patrol", goal = %at, "heading to checkpoint");
                    self.inner.parts.pathing.set_goal(at, true);
                }
                PatrolEffect::Clear { door, at, tick } => {
                    let mark = Command::set_block(at, cfg.clearance_block.clone());
                    let _queued = self.lane().command_with_delay(&mark, cfg.clearance_delay());
                    info!(target: "sweeper::patrol", door, tick, "door cleared");
                    store::note(
                        self.store(),
                        "door.cleared",
                        json!({ "door": door, "tick": tick, "x": at.x, "y": at.y, "z": at.z }),
                    );
                }
                PatrolEffect::Wander { tick } => self.wander(tick).await,
            }
        }
    }

    async fn wander(&self, tick: u64) {
        let cfg = &self.inner.cfg;
        let occupants = self
            .inner
            .parts
            .world
            .entities_by_kind(&cfg.occupant_kind)
            .await;
        if occupants.is_empty() {
            return;
        }
        let steps: Vec<_> = {
            let mut st = self.state();
            occupants
                .iter()
                .map(|o| (o.id, wander_step(o.position, cfg.wander_amplitude, &mut st.rng)))
                .collect()
        };
        for (id, (near, to)) in steps {
            let nudge = Command::NudgeNearest {
                kind: cfg.occupant_kind.clone(),
                near,
                to,
            };
            let _queued = self.lane().command_with_delay(&nudge, cfg.clearance_delay());
            store::note(
                self.store(),
                "occupant.step",
                json!({ "id": id, "tick": tick, "x": to.x, "y": to.y, "z": to.z }),
            );
        }
        debug!(target: "sweeper::patrol", tick, count = occupants.len(), "occupants nudged");
    }

    /// Pins the agent to the spawn point. An active patrol or player sync is
    /// stopped.
    pub async fn lock_to_origin(&self) -> Outcome {
        let spawn = {
            let mut st = self.state();
            st.lock = LockMode::Origin;
            stop_task(&mut st.sync_task);
            st.spawn
        };
        self.stop_patrol();
        info!(target: "sweeper::patrol", spawn = %spawn, "locked to origin");
        self.lane()
            .command_with_delay(&Command::Teleport { to: spawn }, self.inner.cfg.teleport_delay())
            .await
    }

    /// Follows the first online non-agent player: once now, then every sync
    /// period. With nobody online the timer keeps trying.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn lock_to_nearest_player(&self) -> bool {
        {
            let mut st = self.state();
            st.lock = LockMode::NearestPlayer;
            stop_task(&mut st.sync_task);
        }
        self.stop_patrol();

        let found = self.follow_player(self.inner.cfg.teleport_delay()).await;
        if !found {
            info!(target: "sweeper::patrol", "no player online; will keep trying");
        }

        let weak = Arc::downgrade(&self.inner);
        let task = PeriodicTask::spawn("player-sync", self.inner.cfg.sync_period(), move || {
            with_session(weak.clone(), |s| async move {
                s.follow_player(FOLLOW_DELAY).await;
            })
        });
        let mut st = self.state();
        if st.lock == LockMode::NearestPlayer {
            st.sync_task = Some(task);
        } else {
            task.stop();
        }
        found
    }

    async fn follow_player(&self, delay: Duration) -> bool {
        let agent = &self.inner.cfg.agent_name;
        let players = self.inner.parts.world.players_online().await;
        let Some(pos) = players
            .iter()
            .filter(|p| &p.username != agent)
            .find_map(|p| p.position)
        else {
            return false;
        };
        let _queued = self
            .lane()
            .command_with_delay(&Command::Teleport { to: pos.rounded() }, delay);
        true
    }

    pub fn unlock(&self) {
        let mut st = self.state();
        st.lock = LockMode::Unlocked;
        stop_task(&mut st.sync_task);
        info!(target: "sweeper::patrol", "unlocked");
    }

    pub fn lock_mode(&self) -> LockMode {
        self.state().lock
    }

    pub fn status(&self) -> StatusReport {
        let st = self.state();
        StatusReport {
            cleared_count: st.patrol.cleared_count(),
            total_doors: st.patrol.doors().len(),
            tick: st.patrol.cursor().tick,
            patrolling: st.patrol_task.is_some(),
            lock: st.lock,
            layout: Some(st.layout_name.clone()),
            doors: st.patrol.doors().iter().map(|d| d.view()).collect(),
        }
    }

    /// World rules for a calm, always-day session. Run once after connecting.
    pub async fn prepare_environment(&self) {
        let cfg = &self.inner.cfg;
        let delay = cfg.teleport_delay();
        let directives = [
            Command::GameMode {
                mode: "creative",
                target: format!("@a[name=!{}]", cfg.agent_name),
            },
            Command::Difficulty("peaceful"),
            Command::GameRule {
                rule: "doMobSpawning",
                value: false,
            },
            Command::GameRule {
                rule: "doDaylightCycle",
                value: false,
            },
            Command::TimeSetDay,
            Command::GameRule {
                rule: "doWeatherCycle",
                value: false,
            },
            Command::WeatherClear { seconds: 1_000_000 },
        ];
        for directive in &directives {
            self.lane().command_with_delay(directive, delay).await;
        }
        info!(target: "sweeper::session", "environment prepared");
    }

    /// Turns the day-and-clear-weather heartbeat on or off.
    ///
    /// Must be called from within a tokio runtime.
    pub fn keep_environment(&self, enabled: bool) {
        let mut st = self.state();
        stop_task(&mut st.environment_task);
        if !enabled {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        st.environment_task = Some(PeriodicTask::spawn(
            "environment",
            self.inner.cfg.environment_period(),
            move || {
                with_session(weak.clone(), |s| async move {
                    let delay = s.inner.cfg.command_delay();
                    s.lane().command_with_delay(&Command::TimeSetDay, delay).await;
                    s.lane()
                        .command_with_delay(&Command::WeatherClear { seconds: 1_000_000 }, delay)
                        .await;
                })
            },
        ));
    }

    /// Creative mode and a teleport to the spawn point for a player who just
    /// joined. The agent itself is ignored.
    pub async fn welcome_player(&self, username: &str) {
        if username.is_empty() || username == self.inner.cfg.agent_name {
            return;
        }
        let spawn = self.state().spawn;
        let delay = self.inner.cfg.command_delay();
        self.lane()
            .command_with_delay(
                &Command::GameMode {
                    mode: "creative",
                    target: username.to_string(),
                },
                delay,
            )
            .await;
        self.lane()
            .command_with_delay(
                &Command::TeleportTarget {
                    target: username.to_string(),
                    to: spawn,
                },
                delay,
            )
            .await;
        info!(target: "sweeper::session", player = username, "player welcomed");
    }

    /// Stops every background timer. Queued commands still drain.
    pub fn shutdown(&self) {
        let mut st = self.state();
        stop_task(&mut st.patrol_task);
        stop_task(&mut st.sync_task);
        stop_task(&mut st.environment_task);
    }
}

fn stop_task(slot: &mut Option<PeriodicTask>) {
    if let Some(task) = slot.take() {
        task.stop();
        debug!(target: "sweeper::session", task = task.name(), "timer stopped");
    }
}

/// Runs `f` against the session if it is still alive. Timers hold only a weak
/// reference so they never keep a dropped session running.
async fn with_session<F, Fut>(weak: Weak<Inner>, f: F)
where
    F: FnOnce(Session) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    if let Some(inner) = weak.upgrade() {
        f(Session { inner }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::scheduler::{MemoryTransport, TransportChain};
    use crate::world::{BlockMap, GoalLog, PlayerSnapshot, Vec3};
    use std::collections::HashMap;

    #[derive(Default)]
    struct Layouts(HashMap<String, LayoutDescription>);

    impl LayoutSource for Layouts {
        fn load(&self, name: &str) -> Result<LayoutDescription> {
            self.0
                .get(name)
                .cloned()
                .ok_or_else(|| EngineError::layout(name, "not found"))
        }
    }

    struct Rig {
        session: Session,
        memory: MemoryTransport,
        world: BlockMap,
        goals: GoalLog,
    }

    fn rig(layouts: Layouts) -> Rig {
        let memory = MemoryTransport::default();
        let world = BlockMap::open_air();
        world.layer(-10, -10, 110, 50, 64, "grass_block");
        let goals = GoalLog::default();
        let cfg = EngineConfig {
            auto_ground: Some(false),
            ..EngineConfig::default()
        };
        let parts = SessionParts {
            lane: Scheduler::spawn(
                TransportChain::new(vec![Arc::new(memory.clone())]),
                cfg.command_delay(),
            ),
            world: Arc::new(world.clone()),
            pathing: Arc::new(goals.clone()),
            layouts: Arc::new(layouts),
            store: None,
        };
        Rig {
            session: Session::open(cfg, parts, "baseline"),
            memory,
            world,
            goals,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn patrol_clears_the_first_door_once() {
        let r = rig(Layouts::default());
        r.session.build().await;
        r.memory.take();
        r.world.set_agent(Vec3::new(20.0, 64.0, 23.0));

        assert!(r.session.start_patrol());
        tokio::time::sleep(Duration::from_millis(350)).await;
        let status = r.session.status();
        assert_eq!(status.cleared_count, 1);
        assert_eq!(status.total_doors, 6);
        assert_eq!(status.tick, 1);
        assert!(status.patrolling);
        assert_eq!(status.doors[0].cleared_at_tick, 1);
        assert_eq!(status.doors[1].cleared_at_tick, -1);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(r.memory.lines(), vec!["setblock 20 64 23 blue_concrete"]);
        assert_eq!(r.goals.goals(), vec![(BlockPos::new(52, 64, 23), true)]);

        assert!(r.session.stop_patrol());
        let tick = r.session.status().tick;
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(r.session.status().tick, tick);
        assert!(!r.session.stop_patrol());
    }

    #[tokio::test(start_paused = true)]
    async fn rebuild_resets_door_state() {
        let r = rig(Layouts::default());
        r.session.build().await;
        r.world.set_agent(Vec3::new(20.0, 64.0, 23.0));
        r.session.patrol_tick().await;
        assert_eq!(r.session.status().cleared_count, 1);

        r.session.build().await;
        assert_eq!(r.session.status().cleared_count, 0);
        assert_eq!(r.session.status().total_doors, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn locked_agent_refuses_patrol_until_unlocked() {
        let r = rig(Layouts::default());
        r.world.set_players(vec![
            PlayerSnapshot {
                username: "sweeper".into(),
                position: Some(Vec3::new(0.0, 64.0, 0.0)),
            },
            PlayerSnapshot {
                username: "alice".into(),
                position: Some(Vec3::new(10.4, 70.0, 5.6)),
            },
        ]);

        assert!(r.session.lock_to_nearest_player().await);
        assert_eq!(r.session.lock_mode(), LockMode::NearestPlayer);
        assert!(!r.session.start_patrol());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(r.memory.lines(), vec!["tp 10 70 6"]);

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert_eq!(r.memory.lines().len(), 2);

        r.session.unlock();
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(r.memory.lines().len(), 2);
        assert!(r.session.start_patrol());
        r.session.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn lock_to_origin_stops_patrol_and_teleports_home() {
        let r = rig(Layouts::default());
        assert!(r.session.start_patrol());
        assert!(r.session.lock_to_origin().await.is_delivered());
        assert!(!r.session.is_patrolling());
        assert_eq!(r.memory.lines(), vec!["tp 50 65 20"]);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_to_missing_layout_keeps_current() {
        let mut layouts = Layouts::default();
        let mut small = LayoutDescription::baseline();
        small.name = "small".into();
        small.doors.xs = vec![20];
        layouts.0.insert("small".into(), small);
        let r = rig(layouts);

        let err = r.session.switch_layout("nope").await;
        assert!(matches!(err, Err(EngineError::LayoutLoadFailure { .. })));
        assert!(r.memory.lines().is_empty());
        assert_eq!(r.session.status().layout.as_deref(), Some("baseline"));

        let report = r.session.switch_layout("small").await.unwrap();
        assert_eq!(report.layout, "small");
        assert_eq!(report.doors, 2);
        let status = r.session.status();
        assert_eq!(status.total_doors, 2);
        assert_eq!(status.layout.as_deref(), Some("small"));
    }

    #[tokio::test(start_paused = true)]
    async fn environment_setup_and_welcome() {
        let r = rig(Layouts::default());
        r.session.prepare_environment().await;
        assert_eq!(
            r.memory.take(),
            vec![
                "gamemode creative @a[name=!sweeper]",
                "difficulty peaceful",
                "gamerule doMobSpawning false",
                "gamerule doDaylightCycle false",
                "time set day",
                "gamerule doWeatherCycle false",
                "weather clear 1000000",
            ]
        );

        r.session.welcome_player("sweeper").await;
        assert!(r.memory.lines().is_empty());
        r.session.welcome_player("bob").await;
        assert_eq!(
            r.memory.take(),
            vec!["gamemode creative bob", "tp bob 50 65 20"]
        );

        r.session.keep_environment(true);
        tokio::time::sleep(Duration::from_millis(16_500)).await;
        assert_eq!(r.memory.take(), vec!["time set day", "weather clear 1000000"]);
        r.session.keep_environment(false);
        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert!(r.memory.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wander_nudges_each_occupant() {
        let r = rig(Layouts::default());
        r.world.set_entities(
            "villager",
            vec![crate::world::EntitySnapshot {
                id: 3,
                position: Vec3::new(30.2, 65.0, 20.0),
            }],
        );
        r.session.wander(80).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        let lines = r.memory.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("tp @e[type=villager,limit=1,sort=nearest,x=30,y=65,z=20] "));
    }
}
