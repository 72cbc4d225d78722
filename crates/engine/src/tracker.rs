use serde::{Deserialize, Serialize};
use tracing::info;

use crate::command::{Command, AIR};
use crate::geometry::{BlockBox, BlockPos};
use crate::scheduler::{Scheduler, Ticket};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PlacementRecord {
    Box { region: BlockBox, block: String },
    Point { at: BlockPos, block: String },
}

impl PlacementRecord {
    pub fn command(&self) -> Command {
        match self {
            Self::Box { region, block } => Command::fill(*region, block.clone()),
            Self::Point { at, block } => Command::set_block(*at, block.clone()),
        }
    }

    /// The command that turns this placement back into air.
    pub fn inverse(&self) -> Command {
        match self {
            Self::Box { region, .. } => Command::fill(*region, AIR),
            Self::Point { at, .. } => Command::set_block(*at, AIR),
        }
    }
}

/// Append-only log of the fills and sets the builder issued, replayed as air
/// on cleanup. Only what is passed in explicitly is tracked.
#[derive(Debug, Default, Clone)]
pub struct PlacementTracker {
    records: Vec<PlacementRecord>,
}

impl PlacementTracker {
    pub fn record_fill(&mut self, region: BlockBox, block: impl Into<String>) {
        self.records.push(PlacementRecord::Box {
            region,
            block: block.into(),
        });
    }

    pub fn record_set(&mut self, at: BlockPos, block: impl Into<String>) {
        self.records.push(PlacementRecord::Point {
            at,
            block: block.into(),
        });
    }

    pub fn records(&self) -> &[PlacementRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Issues one inverse command per record, in recording order, then empties
    /// the log. Resolves once the last inverse has gone through the lane.
    pub async fn clear_all(&mut self, scheduler: &Scheduler) {
        let records = std::mem::take(&mut self.records);
        if records.is_empty() {
            return;
        }
        info!(target: "sweeper::tracker", count = records.len(), "reverting placements");
        let tickets: Vec<Ticket> = records
            .iter()
            .map(|r| scheduler.command(&r.inverse()))
            .collect();
        for ticket in tickets {
            ticket.await;
        }
    }
}
