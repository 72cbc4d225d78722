//! Client for the world-client relay.
//!
//! The relay speaks newline-delimited JSON over TCP. Requests carry an `id`
//! and an `op`; the matching reply echoes the `id` with `"ok": true|false`.
//! Lines with an `event` field and no `id` are unsolicited relay events.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;
use serde_json::{json, Value};
use sweeper_engine::geometry::BlockPos;
use sweeper_engine::scheduler::{BoxFuture, TransportStrategy};
use sweeper_engine::world::{BlockInfo, EntitySnapshot, PlayerSnapshot, Vec3};
use sweeper_engine::{Pathing, Session, WorldQuery};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chat::{dispatch, ChatCommand};

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Something the relay reported on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Disconnected(String),
    Kicked(String),
    Errored(String),
    PlayerJoined(String),
    Chat { username: String, message: String },
}

impl RelayEvent {
    fn parse(v: &Value) -> Option<Self> {
        let kind = v.get("event")?.as_str()?;
        let text = |key: &str| {
            v.get(key)
                .and_then(|s| s.as_str())
                .unwrap_or_default()
                .to_string()
        };
        match kind {
            "disconnected" | "end" => Some(Self::Disconnected(text("reason"))),
            "kicked" => Some(Self::Kicked(text("reason"))),
            "error" => Some(Self::Errored(text("reason"))),
            "player_joined" => Some(Self::PlayerJoined(text("username"))),
            "chat" => Some(Self::Chat {
                username: text("username"),
                message: text("message"),
            }),
            _ => None,
        }
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Shared handle to one relay connection. Cheap to clone.
#[derive(Clone)]
pub struct Bridge {
    outbound: mpsc::UnboundedSender<String>,
    pending: Pending,
    next_id: Arc<AtomicU64>,
    max_height: Arc<AtomicI64>,
}

impl Bridge {
    /// Connects and starts the reader and writer tasks. Relay events arrive on
    /// the returned receiver; a closed socket is reported as a disconnect.
    pub async fn connect(addr: &str) -> anyhow::Result<(Self, mpsc::UnboundedReceiver<RelayEvent>)> {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connect relay {addr}"))?;
        let (read, write) = stream.into_split();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pending: Pending = Arc::default();

        tokio::spawn(write_loop(write, outbound_rx));
        tokio::spawn(read_loop(read, pending.clone(), events_tx));

        let bridge = Self {
            outbound,
            pending,
            next_id: Arc::new(AtomicU64::new(1)),
            max_height: Arc::new(AtomicI64::new(255)),
        };
        match bridge.request("height", json!({})).await {
            Ok(v) => {
                if let Some(h) = v.get("max_height").and_then(|h| h.as_i64()) {
                    bridge.max_height.store(h, Ordering::Relaxed);
                }
            }
            Err(err) => debug!(target: "sweeper::bridge", error = %err, "height query failed; assuming 255"),
        }
        info!(target: "sweeper::bridge", addr, "relay connected");
        Ok((bridge, events_rx))
    }

    /// Sends one request and waits for its reply. Replies with `ok: false` are
    /// errors.
    pub async fn request(&self, op: &str, args: Value) -> anyhow::Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut req = match args {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        req.insert("id".into(), json!(id));
        req.insert("op".into(), json!(op));

        let (tx, rx) = oneshot::channel();
        self.pending_map().insert(id, tx);
        if self.outbound.send(Value::Object(req).to_string()).is_err() {
            self.pending_map().remove(&id);
            bail!("relay connection closed");
        }

        let reply = match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(v)) => v,
            Ok(Err(_)) => bail!("relay connection closed"),
            Err(_) => {
                self.pending_map().remove(&id);
                bail!("relay did not answer `{op}` in time");
            }
        };
        if reply.get("ok").and_then(|v| v.as_bool()) != Some(true) {
            bail!("{op} failed: {reply}");
        }
        Ok(reply)
    }

    /// Sends without waiting for the reply.
    fn notify(&self, op: &str, args: Value) {
        let mut req = match args {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        req.insert("op".into(), json!(op));
        if self.outbound.send(Value::Object(req).to_string()).is_err() {
            debug!(target: "sweeper::bridge", op, "relay connection closed; dropped");
        }
    }

    fn pending_map(&self) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Plain chat line from the agent, for replies. Not a command route.
    pub fn say(&self, text: &str) {
        self.notify("say", json!({ "text": text }));
    }

    /// The three chat routes in priority order.
    pub fn transports(&self) -> Vec<Arc<dyn TransportStrategy>> {
        [ChatRoute::Chat, ChatRoute::ChatMessage, ChatRoute::ChatCommand]
            .into_iter()
            .map(|route| {
                Arc::new(ChatTransport {
                    bridge: self.clone(),
                    route,
                }) as Arc<dyn TransportStrategy>
            })
            .collect()
    }
}

async fn write_loop(mut write: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(line) = rx.recv().await {
        let framed = format!("{line}\n");
        if let Err(err) = write.write_all(framed.as_bytes()).await {
            warn!(target: "sweeper::bridge", error = %err, "relay write failed");
            break;
        }
        write.flush().await.ok();
    }
}

async fn read_loop(read: OwnedReadHalf, pending: Pending, events: mpsc::UnboundedSender<RelayEvent>) {
    let mut reader = BufReader::new(read);
    let mut line = String::new();
    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "relay closed the connection".to_string(),
            Ok(_) => {}
            Err(err) => break format!("relay read failed: {err}"),
        }
        let v: Value = match serde_json::from_str(line.trim()) {
            Ok(v) => v,
            Err(err) => {
                warn!(target: "sweeper::bridge", error = %err, "invalid relay json");
                continue;
            }
        };
        if let Some(id) = v.get("id").and_then(|id| id.as_u64()) {
            let waiter = pending
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&id);
            if let Some(tx) = waiter {
                let _ = tx.send(v);
            }
            continue;
        }
        match RelayEvent::parse(&v) {
            Some(event) => {
                debug!(target: "sweeper::bridge", ?event, "relay event");
                let _ = events.send(event);
            }
            None => debug!(target: "sweeper::bridge", line = line.trim(), "ignored relay line"),
        }
    };
    // Dropping the senders fails every outstanding request.
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clear();
    let _ = events.send(RelayEvent::Disconnected(reason));
}

/// Applies relay events to the session until the relay goes away. Player
/// and chat events run on their own tasks.
pub async fn route_events(
    session: Session,
    bridge: Bridge,
    mut events: mpsc::UnboundedReceiver<RelayEvent>,
) {
    while let Some(event) = events.recv().await {
        let liveness = session.lane().liveness();
        match event {
            RelayEvent::Disconnected(reason) => liveness.on_disconnected(&reason),
            RelayEvent::Kicked(reason) => liveness.on_kicked(&reason),
            RelayEvent::Errored(reason) => liveness.on_errored(&reason),
            RelayEvent::PlayerJoined(name) => {
                let session = session.clone();
                tokio::spawn(async move { session.welcome_player(&name).await });
            }
            RelayEvent::Chat { username, message } => {
                if username.is_empty() || username == session.config().agent_name {
                    continue;
                }
                let command = ChatCommand::parse(&message);
                info!(target: "sweeper::bridge", player = %username, ?command, "chat command");
                let session = session.clone();
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    let reply = dispatch(&session, command).await;
                    bridge.say(&reply);
                });
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatRoute {
    /// High-level chat call on the world client.
    Chat,
    /// Raw chat-message packet carrying the slash command.
    ChatMessage,
    /// Raw chat-command packet, no leading slash.
    ChatCommand,
}

struct ChatTransport {
    bridge: Bridge,
    route: ChatRoute,
}

impl ChatTransport {
    fn payload(&self, line: &str) -> (&'static str, Value) {
        match self.route {
            ChatRoute::Chat => ("chat", json!({ "text": format!("/{line}") })),
            ChatRoute::ChatMessage => (
                "packet",
                json!({ "packet": "chat_message", "message": format!("/{line}") }),
            ),
            ChatRoute::ChatCommand => (
                "packet",
                json!({ "packet": "chat_command", "command": line }),
            ),
        }
    }
}

impl TransportStrategy for ChatTransport {
    fn name(&self) -> &str {
        match self.route {
            ChatRoute::Chat => "chat",
            ChatRoute::ChatMessage => "chat_message",
            ChatRoute::ChatCommand => "chat_command",
        }
    }

    fn send<'a>(&'a self, line: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let (op, args) = self.payload(line);
            self.bridge.request(op, args).await.map(|_| ())
        })
    }
}

#[derive(Deserialize)]
struct BlockReply {
    block: Option<BlockInfo>,
}

#[derive(Deserialize)]
struct EntitiesReply {
    #[serde(default)]
    entities: Vec<EntitySnapshot>,
}

#[derive(Deserialize)]
struct PlayersReply {
    #[serde(default)]
    players: Vec<PlayerSnapshot>,
}

#[derive(Deserialize)]
struct PositionReply {
    position: Option<Vec3>,
}

impl Bridge {
    async fn query<T: serde::de::DeserializeOwned>(&self, op: &str, args: Value) -> Option<T> {
        let reply = match self.request(op, args).await {
            Ok(v) => v,
            Err(err) => {
                debug!(target: "sweeper::bridge", op, error = %err, "world query failed");
                return None;
            }
        };
        match serde_json::from_value(reply) {
            Ok(v) => Some(v),
            Err(err) => {
                warn!(target: "sweeper::bridge", op, error = %err, "unexpected relay reply");
                None
            }
        }
    }
}

impl WorldQuery for Bridge {
    fn block_at(&self, at: BlockPos) -> BoxFuture<'_, Option<BlockInfo>> {
        Box::pin(async move {
            self.query::<BlockReply>("block_at", json!({ "x": at.x, "y": at.y, "z": at.z }))
                .await
                .and_then(|r| r.block)
        })
    }

    fn entities_by_kind<'a>(&'a self, kind: &'a str) -> BoxFuture<'a, Vec<EntitySnapshot>> {
        Box::pin(async move {
            self.query::<EntitiesReply>("entities", json!({ "kind": kind }))
                .await
                .map(|r| r.entities)
                .unwrap_or_default()
        })
    }

    fn players_online(&self) -> BoxFuture<'_, Vec<PlayerSnapshot>> {
        Box::pin(async move {
            self.query::<PlayersReply>("players", json!({}))
                .await
                .map(|r| r.players)
                .unwrap_or_default()
        })
    }

    fn agent_position(&self) -> BoxFuture<'_, Option<Vec3>> {
        Box::pin(async move {
            self.query::<PositionReply>("position", json!({}))
                .await
                .and_then(|r| r.position)
        })
    }

    fn max_height(&self) -> i64 {
        self.max_height.load(Ordering::Relaxed)
    }
}

impl Pathing for Bridge {
    fn set_goal(&self, at: BlockPos, exact: bool) {
        self.notify(
            "goal",
            json!({ "x": at.x, "y": at.y, "z": at.z, "exact": exact }),
        );
    }
}

/// Stand-in for the relay under `--dry-run`: logs commands and goals and
/// accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRun;

impl TransportStrategy for DryRun {
    fn name(&self) -> &str {
        "dry-run"
    }

    fn send<'a>(&'a self, line: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            info!(target: "sweeper::bridge", line, "dry-run command");
            Ok(())
        })
    }
}

impl Pathing for DryRun {
    fn set_goal(&self, at: BlockPos, exact: bool) {
        info!(target: "sweeper::bridge", %at, exact, "dry-run goal");
    }
}
