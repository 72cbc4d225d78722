use super::*;
use axum::body::Body;
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderValue, Request};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;
use sweeper_engine::scheduler::MemoryTransport;
use sweeper_engine::world::{BlockMap, GoalLog};
use sweeper_engine::{DirLayoutSource, EngineConfig, Scheduler, SessionParts, TransportChain};
use sweeper_protocol::{LockMode, Verdict};
use tower::ServiceExt;

const LOBBY: &str = r#"{
  "frame": {"x1": 0, "z1": 0, "x2": 30, "z2": 20},
  "corridor": {"x": 2, "z": 8, "w": 26, "h": 4},
  "roomsTop": [{"x": 4, "z": 12, "w": 10, "h": 6, "block": "orange_wool"}],
  "doors": {"topZ": 12, "bottomZ": 7, "xs": [9]}
}"#;

fn temp_layout_dir() -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "sweeper-server-test-{}",
        time::OffsetDateTime::now_utc().unix_timestamp_nanos()
    ));
    std::fs::create_dir_all(&p).unwrap();
    std::fs::write(p.join("lobby.json"), LOBBY).unwrap();
    p
}

fn temp_state() -> (Arc<AppState>, MemoryTransport) {
    let memory = MemoryTransport::default();
    let world = BlockMap::open_air();
    world.layer(-10, -10, 110, 50, 64, "grass_block");
    let cfg = EngineConfig {
        auto_ground: Some(false),
        ..EngineConfig::default()
    };
    let parts = SessionParts {
        lane: Scheduler::spawn(
            TransportChain::new(vec![Arc::new(memory.clone())]),
            cfg.command_delay(),
        ),
        world: Arc::new(world),
        pathing: Arc::new(GoalLog::default()),
        layouts: Arc::new(DirLayoutSource::new([temp_layout_dir()])),
        store: None,
    };
    let session = Session::open(cfg, parts, "baseline");
    (Arc::new(AppState { session }), memory)
}

#[tokio::test(start_paused = true)]
async fn status_before_any_build_lists_baseline_doors() {
    let (state, _memory) = temp_state();
    let status = api_status(axum::extract::State(state)).await;
    assert_eq!(status.0.layout.as_deref(), Some("baseline"));
    assert_eq!(status.0.total_doors, 6);
    assert_eq!(status.0.cleared_count, 0);
    assert!(!status.0.patrolling);
}

#[tokio::test(start_paused = true)]
async fn build_handler_reports_the_build() {
    let (state, memory) = temp_state();
    let reply = api_build(axum::extract::State(state)).await;
    assert_eq!(reply.0.verdict, Verdict::Done);
    let payload = reply.0.payload.unwrap();
    assert_eq!(payload["layout"], "baseline");
    assert_eq!(payload["layout_y"], 64);
    assert!(memory
        .lines()
        .iter()
        .any(|l| l == "fill 0 65 0 100 74 40 air"));
}

#[tokio::test(start_paused = true)]
async fn switch_to_unknown_layout_is_404_and_keeps_current() {
    let (state, memory) = temp_state();
    let err = api_build_switch(
        axum::extract::State(state.clone()),
        Json(SwitchLayout {
            name: "nope".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.0, StatusCode::NOT_FOUND);
    assert!(memory.lines().is_empty());
    assert_eq!(state.session.status().layout.as_deref(), Some("baseline"));
}

#[tokio::test(start_paused = true)]
async fn switch_loads_layout_from_directory_and_rebuilds() {
    let (state, memory) = temp_state();
    let reply = api_build_switch(
        axum::extract::State(state.clone()),
        Json(SwitchLayout {
            name: "lobby".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(reply.0.verdict, Verdict::Done);
    assert_eq!(reply.0.payload.unwrap()["layout"], "lobby");
    assert!(!memory.lines().is_empty());

    let status = state.session.status();
    assert_eq!(status.layout.as_deref(), Some("lobby"));
    assert_eq!(status.total_doors, 2);
}

#[tokio::test(start_paused = true)]
async fn patrol_is_refused_while_locked() {
    let (state, _memory) = temp_state();
    let locked = api_lock_origin(axum::extract::State(state.clone())).await;
    assert_eq!(locked.0.verdict, Verdict::Done);
    assert_eq!(state.session.lock_mode(), LockMode::Origin);

    let refused = api_patrol_start(axum::extract::State(state.clone())).await;
    assert_eq!(refused.0.verdict, Verdict::Refused);
    assert!(!state.session.is_patrolling());

    api_unlock(axum::extract::State(state.clone())).await;
    let started = api_patrol_start(axum::extract::State(state.clone())).await;
    assert_eq!(started.0.verdict, Verdict::Done);
    assert!(state.session.is_patrolling());

    let stopped = api_patrol_stop(axum::extract::State(state.clone())).await;
    assert!(stopped.0.detail.is_none());
    let again = api_patrol_stop(axum::extract::State(state)).await;
    assert_eq!(again.0.detail.as_deref(), Some("patrol was not running"));
}

#[tokio::test(start_paused = true)]
async fn player_lock_without_players_keeps_waiting() {
    let (state, _memory) = temp_state();
    let reply = api_lock_player(axum::extract::State(state.clone())).await;
    assert_eq!(reply.0.verdict, Verdict::Done);
    assert_eq!(reply.0.payload.unwrap()["found"], false);
    assert_eq!(state.session.lock_mode(), LockMode::NearestPlayer);
    state.session.unlock();
    assert_eq!(state.session.lock_mode(), LockMode::Unlocked);
}

#[tokio::test(start_paused = true)]
async fn dead_transport_fails_commands() {
    let (state, _memory) = temp_state();
    state.session.lane().liveness().on_kicked("test");
    let reply = api_clear_above(axum::extract::State(state)).await;
    assert_eq!(reply.0.verdict, Verdict::Failed);
    assert_eq!(reply.0.detail.as_deref(), Some("transport is down"));
}

#[tokio::test]
async fn router_rejects_non_local_peers() {
    let (state, _memory) = temp_state();
    let local = build_router((*state).clone())
        .layer(MockConnectInfo(SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))));
    let res = local
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let remote = build_router((*state).clone())
        .layer(MockConnectInfo(SocketAddr::from(([8, 8, 8, 8], 4000))));
    let res = remote
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn status_route_serves_json() {
    let (state, _memory) = temp_state();
    let app = build_router((*state).clone())
        .layer(MockConnectInfo(SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))));
    let res = app
        .oneshot(Request::get("/api/status").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    let status: StatusReport = serde_json::from_slice(&body).unwrap();
    assert_eq!(status.total_doors, 6);
    assert_eq!(status.lock, LockMode::Unlocked);
}

#[test]
fn peer_allowlist_is_loopback_and_tailscale() {
    assert!(is_allowed_peer_ip(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert!(is_allowed_peer_ip(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    assert!(is_allowed_peer_ip("100.64.0.1".parse().unwrap()));
    assert!(is_allowed_peer_ip("100.127.255.254".parse().unwrap()));
    assert!(!is_allowed_peer_ip("100.128.0.1".parse().unwrap()));
    assert!(!is_allowed_peer_ip("192.168.1.10".parse().unwrap()));
    assert!(is_allowed_peer_ip("::ffff:127.0.0.1".parse().unwrap()));
}

#[test]
fn cors_accepts_only_local_http_origins() {
    let ok = |s: &'static str| is_allowed_local_origin(&HeaderValue::from_static(s));
    assert!(ok("http://localhost"));
    assert!(ok("http://localhost:5173"));
    assert!(ok("https://127.0.0.1:8443"));
    assert!(!ok("http://localhost.evil.example"));
    assert!(!ok("tauri://localhost"));
    assert!(!ok("null"));
}
