//! In-game chat commands.

use sweeper_engine::Session;

pub const HELP: &str = "commands: build / spawn / patrol / stop / status / clear / origin / syncme / unlock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Build,
    Occupants,
    Patrol,
    Stop,
    ClearAbove,
    Origin,
    SyncMe,
    Unlock,
    Status,
    Help,
}

impl ChatCommand {
    /// Keyword match, first rule wins. `build` is checked before `stop`, so
    /// "stop building" builds.
    pub fn parse(message: &str) -> Self {
        let msg = message.trim().to_lowercase();
        if msg.contains("build") {
            Self::Build
        } else if msg.contains("spawn") {
            Self::Occupants
        } else if msg.contains("patrol") || msg.contains("demo") {
            Self::Patrol
        } else if msg.contains("stop") {
            Self::Stop
        } else if msg == "clear" || msg == "clearabove" {
            Self::ClearAbove
        } else if msg == "home" || msg == "origin" || msg.contains("lockorigin") {
            Self::Origin
        } else if msg.contains("syncme") {
            Self::SyncMe
        } else if msg.contains("unlock") {
            Self::Unlock
        } else if msg.contains("status") {
            Self::Status
        } else {
            Self::Help
        }
    }
}

/// Runs the command and returns the line to say back.
pub async fn dispatch(session: &Session, command: ChatCommand) -> String {
    match command {
        ChatCommand::Build => {
            let report = session.build().await;
            format!("built {} ({} doors)", report.layout, report.doors)
        }
        ChatCommand::Occupants => {
            let summoned = session.place_occupants().await;
            format!("summoned {summoned}")
        }
        ChatCommand::Patrol => {
            if session.start_patrol() {
                "patrolling".to_string()
            } else {
                "locked; unlock first".to_string()
            }
        }
        ChatCommand::Stop => {
            session.stop_patrol();
            "patrol stopped".to_string()
        }
        ChatCommand::ClearAbove => {
            if session.clear_above().await.is_delivered() {
                "cleared above ground".to_string()
            } else {
                "clear failed".to_string()
            }
        }
        ChatCommand::Origin => {
            session.lock_to_origin().await;
            "back at origin and locked".to_string()
        }
        ChatCommand::SyncMe => {
            if session.lock_to_nearest_player().await {
                "following you".to_string()
            } else {
                "nobody in range yet; will keep looking".to_string()
            }
        }
        ChatCommand::Unlock => {
            session.unlock();
            "unlocked".to_string()
        }
        ChatCommand::Status => session.status().summary(),
        ChatCommand::Help => HELP.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use sweeper_engine::scheduler::MemoryTransport;
    use sweeper_engine::world::{BlockMap, GoalLog};
    use sweeper_engine::{DirLayoutSource, EngineConfig, Scheduler, SessionParts, TransportChain};

    fn session() -> (Session, MemoryTransport) {
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
            layouts: Arc::new(DirLayoutSource::default()),
            store: None,
        };
        (Session::open(cfg, parts, "baseline"), memory)
    }

    #[test]
    fn keywords_match_in_priority_order() {
        assert_eq!(ChatCommand::parse("please BUILD it"), ChatCommand::Build);
        assert_eq!(ChatCommand::parse("stop building"), ChatCommand::Build);
        assert_eq!(ChatCommand::parse("spawn"), ChatCommand::Occupants);
        assert_eq!(ChatCommand::parse("demo"), ChatCommand::Patrol);
        assert_eq!(ChatCommand::parse("stop patrol"), ChatCommand::Patrol);
        assert_eq!(ChatCommand::parse("stop"), ChatCommand::Stop);
        assert_eq!(ChatCommand::parse(" Clear "), ChatCommand::ClearAbove);
        assert_eq!(ChatCommand::parse("clear it all"), ChatCommand::Help);
        assert_eq!(ChatCommand::parse("home"), ChatCommand::Origin);
        assert_eq!(ChatCommand::parse("lockorigin"), ChatCommand::Origin);
        assert_eq!(ChatCommand::parse("syncme"), ChatCommand::SyncMe);
        assert_eq!(ChatCommand::parse("unlock"), ChatCommand::Unlock);
        assert_eq!(ChatCommand::parse("status?"), ChatCommand::Status);
        assert_eq!(ChatCommand::parse("hello"), ChatCommand::Help);
    }

    #[tokio::test(start_paused = true)]
    async fn status_reply_uses_the_summary_line() {
        let (session, memory) = session();
        let reply = dispatch(&session, ChatCommand::Status).await;
        assert_eq!(reply, "cleared 0/6, tick=0");
        assert!(memory.lines().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn patrol_after_origin_lock_is_refused() {
        let (session, memory) = session();
        assert_eq!(
            dispatch(&session, ChatCommand::Origin).await,
            "back at origin and locked"
        );
        assert!(memory.lines().iter().any(|l| l.starts_with("tp ")));
        assert_eq!(
            dispatch(&session, ChatCommand::Patrol).await,
            "locked; unlock first"
        );
        dispatch(&session, ChatCommand::Unlock).await;
        assert_eq!(dispatch(&session, ChatCommand::Patrol).await, "patrolling");
        session.shutdown();
    }
}
