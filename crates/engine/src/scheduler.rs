//! Throttled command lane.
//!
//! Every mutation sent to the remote world goes through one [`Scheduler`]. Jobs
//! run strictly in submission order on a single lane task, and the lane sleeps
//! for the job's delay after each one before picking up the next. Each command
//! is offered to an ordered [`TransportChain`]; if every strategy fails the
//! error is logged and the lane moves on. Once the transport reports
//! disconnect, kick or error, the lane skips all remaining and future jobs.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::command::Command;
use crate::error::EngineError;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One way of delivering command text to the remote world.
pub trait TransportStrategy: Send + Sync {
    fn name(&self) -> &str;

    fn send<'a>(&'a self, line: &'a str) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Strategies tried in order until one accepts the line.
#[derive(Clone, Default)]
pub struct TransportChain {
    strategies: Vec<Arc<dyn TransportStrategy>>,
}

impl TransportChain {
    pub fn new(strategies: Vec<Arc<dyn TransportStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn push(mut self, strategy: Arc<dyn TransportStrategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Returns the name of the strategy that accepted the line.
    pub async fn issue(&self, line: &str) -> Result<String, EngineError> {
        let mut reasons = Vec::new();
        for strategy in &self.strategies {
            match strategy.send(line).await {
                Ok(()) => return Ok(strategy.name().to_string()),
                Err(err) => {
                    debug!(
                        target: "sweeper::scheduler",
                        transport = strategy.name(),
                        "send failed: {err:#}"
                    );
                    reasons.push(format!("{}: {err:#}", strategy.name()));
                }
            }
        }
        if reasons.is_empty() {
            reasons.push("no transports configured".to_string());
        }
        Err(EngineError::TransportFailure {
            command: line.to_string(),
            reasons: reasons.join("; "),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Disconnected,
    Kicked,
    Errored,
}

impl DeathCause {
    fn code(self) -> u8 {
        match self {
            Self::Disconnected => 1,
            Self::Kicked => 2,
            Self::Errored => 3,
        }
    }

    fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Disconnected),
            2 => Some(Self::Kicked),
            3 => Some(Self::Errored),
            _ => None,
        }
    }
}

/// Shared alive/dead flag fed by the transport's liveness events. The first
/// event wins; there is no way back to alive.
#[derive(Debug, Clone, Default)]
pub struct Liveness {
    state: Arc<AtomicU8>,
}

impl Liveness {
    pub fn is_alive(&self) -> bool {
        self.state.load(Ordering::Acquire) == 0
    }

    pub fn cause(&self) -> Option<DeathCause> {
        DeathCause::from_code(self.state.load(Ordering::Acquire))
    }

    pub fn on_disconnected(&self, reason: &str) {
        self.mark_dead(DeathCause::Disconnected, reason);
    }

    pub fn on_kicked(&self, reason: &str) {
        self.mark_dead(DeathCause::Kicked, reason);
    }

    pub fn on_errored(&self, reason: &str) {
        self.mark_dead(DeathCause::Errored, reason);
    }

    fn mark_dead(&self, cause: DeathCause, reason: &str) {
        if self
            .state
            .compare_exchange(0, cause.code(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(target: "sweeper::scheduler", ?cause, reason, "transport dead; lane muted");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Command text accepted by the named transport.
    Sent { via: String },
    /// A custom action ran to completion.
    Completed,
    /// The action or every transport failed; the lane continued.
    Failed(String),
    /// The lane was dead when the job came up.
    Skipped,
}

impl Outcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Sent { .. } | Self::Completed)
    }
}

type Action = Box<dyn FnOnce() -> BoxFuture<'static, anyhow::Result<()>> + Send>;

enum Work {
    Command(String),
    Action(Action),
}

struct Job {
    work: Work,
    delay: Duration,
    done: oneshot::Sender<Outcome>,
}

/// Completion handle for an enqueued job. Awaiting it resolves once the job
/// has run and its delay has elapsed; dropping it does not cancel the job.
#[derive(Debug)]
pub struct Ticket(oneshot::Receiver<Outcome>);

impl Future for Ticket {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|r| r.unwrap_or(Outcome::Skipped))
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LaneStats {
    pub sent: u64,
    pub completed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Clone)]
pub struct Scheduler {
    tx: mpsc::UnboundedSender<Job>,
    liveness: Liveness,
    default_delay: Duration,
    stats: Arc<Mutex<LaneStats>>,
}

impl Scheduler {
    /// Starts the lane on the current tokio runtime. The lane exits once every
    /// handle has been dropped and the backlog is drained.
    pub fn spawn(chain: TransportChain, default_delay: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let liveness = Liveness::default();
        let stats = Arc::new(Mutex::new(LaneStats::default()));
        tokio::spawn(run_lane(rx, chain, liveness.clone(), stats.clone()));
        Self {
            tx,
            liveness,
            default_delay,
            stats,
        }
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub fn default_delay(&self) -> Duration {
        self.default_delay
    }

    pub fn stats(&self) -> LaneStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }

    /// Queues an arbitrary action. It is not started until every earlier job
    /// has finished and paused.
    pub fn enqueue<F, Fut>(&self, action: F, delay: Option<Duration>) -> Ticket
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: Action = Box::new(move || Box::pin(action()));
        self.submit(Work::Action(boxed), delay.unwrap_or(self.default_delay))
    }

    pub fn command(&self, command: &Command) -> Ticket {
        self.command_with_delay(command, self.default_delay)
    }

    pub fn command_with_delay(&self, command: &Command, delay: Duration) -> Ticket {
        self.submit(Work::Command(command.to_string()), delay)
    }

    /// Raw command text, for collaborators that already hold a rendered line.
    pub fn line(&self, line: impl Into<String>, delay: Option<Duration>) -> Ticket {
        self.submit(Work::Command(line.into()), delay.unwrap_or(self.default_delay))
    }

    fn submit(&self, work: Work, delay: Duration) -> Ticket {
        let (done, rx) = oneshot::channel();
        // A closed lane drops the job, and with it `done`, which the ticket
        // reports as skipped.
        let _ = self.tx.send(Job { work, delay, done });
        Ticket(rx)
    }
}

async fn run_lane(
    mut rx: mpsc::UnboundedReceiver<Job>,
    chain: TransportChain,
    liveness: Liveness,
    stats: Arc<Mutex<LaneStats>>,
) {
    while let Some(job) = rx.recv().await {
        if !liveness.is_alive() {
            bump(&stats, |s| s.skipped += 1);
            let _ = job.done.send(Outcome::Skipped);
            continue;
        }

        let outcome = match job.work {
            Work::Command(line) => match chain.issue(&line).await {
                Ok(via) => {
                    info!(target: "sweeper::scheduler", via = %via, "/{line}");
                    bump(&stats, |s| s.sent += 1);
                    Outcome::Sent { via }
                }
                Err(err) => {
                    warn!(target: "sweeper::scheduler", "{err}");
                    bump(&stats, |s| s.failed += 1);
                    Outcome::Failed(err.to_string())
                }
            },
            Work::Action(action) => match action().await {
                Ok(()) => {
                    bump(&stats, |s| s.completed += 1);
                    Outcome::Completed
                }
                Err(err) => {
                    warn!(target: "sweeper::scheduler", "action failed: {err:#}");
                    bump(&stats, |s| s.failed += 1);
                    Outcome::Failed(format!("{err:#}"))
                }
            },
        };

        tokio::time::sleep(job.delay).await;
        let _ = job.done.send(outcome);
    }
    debug!(target: "sweeper::scheduler", "lane closed");
}

fn bump(stats: &Mutex<LaneStats>, f: impl FnOnce(&mut LaneStats)) {
    if let Ok(mut s) = stats.lock() {
        f(&mut s);
    }
}

/// Accepts every line and keeps it in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemoryTransport {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn take(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut l| std::mem::take(&mut *l))
            .unwrap_or_default()
    }
}

impl TransportStrategy for MemoryTransport {
    fn name(&self) -> &str {
        "memory"
    }

    fn send<'a>(&'a self, line: &'a str) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(line.to_string());
            }
            Ok(())
        })
    }
}
