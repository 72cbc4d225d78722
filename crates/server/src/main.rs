use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use sweeper_engine::world::BlockMap;
use sweeper_engine::{
    AnchorPolicy, DirLayoutSource, EngineConfig, Pathing, Scheduler, Session, SessionParts, Store,
    TransportChain, WorldQuery, DEFAULT_LAYOUT,
};
use sweeper_server::bridge::{route_events, Bridge, DryRun};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Anchor {
    FrameCorner,
    CorridorCenter,
}

impl From<Anchor> for AnchorPolicy {
    fn from(a: Anchor) -> Self {
        match a {
            Anchor::FrameCorner => Self::FrameCorner,
            Anchor::CorridorCenter => Self::CorridorCenter,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "sweeper-server", about = "Builds and patrols a layout in a live world")]
struct Args {
    /// Control API address.
    #[arg(long, env = "SWEEPER_LISTEN", default_value = "127.0.0.1:39333")]
    listen: SocketAddr,

    /// World-client relay address.
    #[arg(long, env = "SWEEPER_BRIDGE", default_value = "127.0.0.1:7878")]
    bridge: String,

    /// Log commands instead of sending them.
    #[arg(long)]
    dry_run: bool,

    /// Layout to start with.
    #[arg(long, env = "BUILDING", default_value = DEFAULT_LAYOUT)]
    layout: String,

    /// Extra layout directories, searched before `./layout` and `~/.sweeper/layouts`.
    #[arg(long, env = "SWEEPER_LAYOUT_DIR", value_delimiter = ',')]
    layout_dir: Vec<PathBuf>,

    #[arg(long, env = "SWEEPER_DB")]
    db: Option<PathBuf>,

    #[arg(long, env = "CMD_DELAY_MS", default_value_t = 600)]
    cmd_delay_ms: u64,

    /// Pause after heavy region fills.
    #[arg(long, env = "CMD_HEAVY_PAD_MS", default_value_t = 900)]
    heavy_pad_ms: u64,

    /// Superflat world: build at y=4 and skip ground detection.
    #[arg(long, env = "FLAT")]
    flat: bool,

    #[arg(long, env = "BASE_Y", allow_negative_numbers = true)]
    base_y: Option<i64>,

    #[arg(long, env = "BUILD_OFFSET", default_value_t = 0, allow_negative_numbers = true)]
    build_offset: i64,

    #[arg(long, env = "ORIGIN_X", default_value_t = 0, allow_negative_numbers = true)]
    origin_x: i64,

    #[arg(long, env = "ORIGIN_Z", default_value_t = 0, allow_negative_numbers = true)]
    origin_z: i64,

    #[arg(long, env = "SWEEPER_ANCHOR", value_enum, default_value_t = Anchor::FrameCorner)]
    anchor: Anchor,

    #[arg(long, env = "AUTO_GROUND", value_parser = clap::builder::BoolishValueParser::new())]
    auto_ground: Option<bool>,

    /// Username the agent plays as.
    #[arg(long, env = "SWEEPER_AGENT", default_value = "sweeper")]
    agent: String,

    /// Build once right after startup.
    #[arg(long, env = "SWEEPER_AUTO_BUILD")]
    auto_build: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            command_delay_ms: self.cmd_delay_ms,
            heavy_delay_ms: self.heavy_pad_ms,
            flat: self.flat,
            base_y: self.base_y,
            build_offset: self.build_offset,
            anchor: self.anchor.into(),
            origin_x: self.origin_x,
            origin_z: self.origin_z,
            auto_ground: self.auto_ground,
            agent_name: self.agent.clone(),
            ..EngineConfig::default()
        }
    }

    fn layout_dirs(&self, data_dir: &std::path::Path) -> Vec<PathBuf> {
        let mut dirs = self.layout_dir.clone();
        dirs.push(PathBuf::from("layout"));
        dirs.push(data_dir.join("layouts"));
        dirs
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let cfg = args.engine_config();

    let data_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sweeper");
    let db_path = args
        .db
        .clone()
        .unwrap_or_else(|| data_dir.join("sweeper.db"));
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create {}", parent.display()))?;
    }
    let store = Store::new(db_path);
    store.open().context("open sweeper db")?;

    let (chain, world, pathing, relay): (
        TransportChain,
        Arc<dyn WorldQuery>,
        Arc<dyn Pathing>,
        Option<_>,
    ) = if args.dry_run {
        info!(target: "sweeper::session", "dry run; commands are only logged");
        (
            TransportChain::new(vec![Arc::new(DryRun)]),
            Arc::new(BlockMap::default()),
            Arc::new(DryRun),
            None,
        )
    } else {
        let (bridge, events) = Bridge::connect(&args.bridge).await?;
        (
            TransportChain::new(bridge.transports()),
            Arc::new(bridge.clone()),
            Arc::new(bridge.clone()),
            Some((bridge, events)),
        )
    };

    let parts = SessionParts {
        lane: Scheduler::spawn(chain, cfg.command_delay()),
        world,
        pathing,
        layouts: Arc::new(DirLayoutSource::new(args.layout_dirs(&data_dir))),
        store: Some(store),
    };
    let session = Session::open(cfg, parts, &args.layout);

    if let Some((bridge, events)) = relay {
        tokio::spawn(route_events(session.clone(), bridge, events));
    }

    session.prepare_environment().await;
    session.keep_environment(true);
    if args.auto_build {
        let s = session.clone();
        tokio::spawn(async move {
            s.build().await;
        });
    }

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("bind {}", args.listen))?;
    info!(target: "sweeper::api", addr = %args.listen, "control api listening");
    sweeper_server::serve_listener(listener, session.clone(), async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await?;

    session.shutdown();
    info!(target: "sweeper::session", "stopped");
    Ok(())
}
