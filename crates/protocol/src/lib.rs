use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LockMode {
    #[default]
    Unlocked,
    Origin,
    NearestPlayer,
}

impl LockMode {
    pub fn is_locked(self) -> bool {
        !matches!(self, Self::Unlocked)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoorView {
    pub index: usize,
    pub x: i64,
    pub y: i64,
    pub z: i64,
    pub cleared: bool,
    /// Patrol tick at which the door was cleared, `-1` while uncleared.
    pub cleared_at_tick: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub cleared_count: usize,
    pub total_doors: usize,
    pub tick: u64,
    #[serde(default)]
    pub patrolling: bool,
    #[serde(default)]
    pub lock: LockMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub doors: Vec<DoorView>,
}

impl StatusReport {
    /// One-line summary in the form the chat/menu collaborators print.
    pub fn summary(&self) -> String {
        format!(
            "cleared {}/{}, tick={}",
            self.cleared_count, self.total_doors, self.tick
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Done,
    Refused,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionReply {
    pub action: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl ActionReply {
    pub fn done(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            verdict: Verdict::Done,
            detail: None,
            payload: None,
        }
    }

    pub fn refused(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            verdict: Verdict::Refused,
            detail: Some(detail.into()),
            payload: None,
        }
    }

    pub fn failed(action: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            verdict: Verdict::Failed,
            detail: Some(detail.into()),
            payload: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchLayout {
    pub name: String,
}

pub mod actions {
    pub const BUILD: &str = "build";
    pub const SWITCH_LAYOUT: &str = "build.switch";
    pub const CLEAN: &str = "clean";
    pub const CLEAR_ABOVE: &str = "clear-above";
    pub const OCCUPANTS: &str = "occupants";
    pub const PATROL_START: &str = "patrol.start";
    pub const PATROL_STOP: &str = "patrol.stop";
    pub const LOCK_ORIGIN: &str = "lock.origin";
    pub const LOCK_PLAYER: &str = "lock.player";
    pub const UNLOCK: &str = "unlock";
}
