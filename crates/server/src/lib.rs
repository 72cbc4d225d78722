use axum::{
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use sweeper_engine::{EngineError, Outcome, Session};
use sweeper_protocol::{actions, ActionReply, StatusReport, SwitchLayout};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub mod bridge;
pub mod chat;

#[derive(Clone)]
pub struct AppState {
    pub session: Session,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(api_status))
        .route("/api/build", post(api_build))
        .route("/api/build/switch", post(api_build_switch))
        .route("/api/clean", post(api_clean))
        .route("/api/clear-above", post(api_clear_above))
        .route("/api/occupants", post(api_occupants))
        .route("/api/patrol/start", post(api_patrol_start))
        .route("/api/patrol/stop", post(api_patrol_stop))
        .route("/api/lock/origin", post(api_lock_origin))
        .route("/api/lock/player", post(api_lock_player))
        .route("/api/unlock", post(api_unlock))
        .with_state(Arc::new(state))
        // Local security: allow only loopback + Tailscale by default.
        .layer(middleware::from_fn(ip_allowlist))
        // The API drives an agent in a live world. Never answer with
        // `Access-Control-Allow-Origin: *`.
        .layer(local_only_cors())
}

type SharedState = axum::extract::State<Arc<AppState>>;

async fn health() -> &'static str {
    "ok"
}

async fn api_status(axum::extract::State(state): SharedState) -> Json<StatusReport> {
    Json(state.session.status())
}

async fn api_build(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    let report = state.session.build().await;
    Json(ActionReply::done(actions::BUILD).with_payload(payload(&report)))
}

async fn api_build_switch(
    axum::extract::State(state): SharedState,
    Json(input): Json<SwitchLayout>,
) -> ApiResult<ActionReply> {
    match state.session.switch_layout(input.name.trim()).await {
        Ok(report) => Ok(Json(
            ActionReply::done(actions::SWITCH_LAYOUT).with_payload(payload(&report)),
        )),
        Err(err @ EngineError::LayoutLoadFailure { .. }) => {
            Err((StatusCode::NOT_FOUND, err.to_string()))
        }
        Err(err) => Err((StatusCode::INTERNAL_SERVER_ERROR, err.to_string())),
    }
}

async fn api_clean(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    state.session.clean().await;
    Json(ActionReply::done(actions::CLEAN))
}

async fn api_clear_above(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    let outcome = state.session.clear_above().await;
    Json(outcome_reply(actions::CLEAR_ABOVE, &outcome))
}

async fn api_occupants(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    let summoned = state.session.place_occupants().await;
    Json(ActionReply::done(actions::OCCUPANTS).with_payload(json!({ "summoned": summoned })))
}

async fn api_patrol_start(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    if state.session.start_patrol() {
        Json(ActionReply::done(actions::PATROL_START))
    } else {
        let lock = state.session.lock_mode();
        Json(
            ActionReply::refused(actions::PATROL_START, "agent is locked")
                .with_payload(json!({ "lock": lock })),
        )
    }
}

async fn api_patrol_stop(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    let reply = ActionReply::done(actions::PATROL_STOP);
    if state.session.stop_patrol() {
        Json(reply)
    } else {
        Json(reply.with_detail("patrol was not running"))
    }
}

async fn api_lock_origin(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    let outcome = state.session.lock_to_origin().await;
    Json(outcome_reply(actions::LOCK_ORIGIN, &outcome))
}

async fn api_lock_player(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    let found = state.session.lock_to_nearest_player().await;
    let reply = ActionReply::done(actions::LOCK_PLAYER).with_payload(json!({ "found": found }));
    if found {
        Json(reply)
    } else {
        Json(reply.with_detail("no player online yet"))
    }
}

async fn api_unlock(axum::extract::State(state): SharedState) -> Json<ActionReply> {
    state.session.unlock();
    Json(ActionReply::done(actions::UNLOCK))
}

fn payload<T: serde::Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or_default()
}

fn outcome_reply(action: &str, outcome: &Outcome) -> ActionReply {
    match outcome {
        Outcome::Sent { via } => ActionReply::done(action).with_payload(json!({ "via": via })),
        Outcome::Completed => ActionReply::done(action),
        Outcome::Failed(reason) => ActionReply::failed(action, reason.clone()),
        Outcome::Skipped => ActionReply::failed(action, "transport is down"),
    }
}

pub async fn serve(addr: SocketAddr, session: Session) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    serve_listener(listener, session, async {
        std::future::pending::<()>().await
    })
    .await?;
    Ok(())
}

pub async fn serve_listener(
    listener: tokio::net::TcpListener,
    session: Session,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<SocketAddr> {
    let app = build_router(AppState { session });
    let addr = listener.local_addr()?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    Ok(addr)
}

async fn ip_allowlist(
    axum::extract::ConnectInfo(peer): axum::extract::ConnectInfo<SocketAddr>,
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let ip = peer.ip();
    if is_allowed_peer_ip(ip) {
        return next.run(req).await;
    }
    tracing::warn!(target: "sweeper::api", %ip, "rejected non-local peer");
    (StatusCode::FORBIDDEN, "forbidden").into_response()
}

fn is_allowed_peer_ip(ip: IpAddr) -> bool {
    if ip.is_loopback() {
        return true;
    }

    // Tailscale CGNAT range (100.64.0.0/10).
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (64..=127).contains(&o[1])
        }
        IpAddr::V6(v6) => v6.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback()),
    }
}

fn local_only_cors() -> CorsLayer {
    use axum::http::header;
    use axum::http::HeaderValue;
    use axum::http::Method;

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _req| {
            is_allowed_local_origin(origin)
        }))
}

fn is_allowed_local_origin(origin: &axum::http::HeaderValue) -> bool {
    let Ok(s) = origin.to_str() else {
        return false;
    };
    is_http_origin_for_host(s, "localhost") || is_http_origin_for_host(s, "127.0.0.1")
}

fn is_http_origin_for_host(origin: &str, host: &str) -> bool {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = origin.strip_prefix(scheme) {
            if let Some(after) = rest.strip_prefix(host) {
                // scheme://host[:port] only
                return after.is_empty() || after.starts_with(':');
            }
        }
    }
    false
}

#[cfg(test)]
mod tests;
