//! Simulated stage progress for long-running requests
//!
//! The external services expose no real progress channel, so the client-side
//! orchestrator animates a list of named stages on a timer while a request is
//! in flight. The timer can finish every stage except the last one: the final
//! stage is completed only by the real response, which keeps the display from
//! ever showing a finished run that is still executing.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Stages of the stock research workflow, in execution order.
pub const STOCK_RESEARCH_STAGES: [&str; 7] = [
    "Company introduction",
    "Sector analysis",
    "Company research",
    "Policy check",
    "Investor sentiment",
    "Technical analysis",
    "Investment suggestion",
];

/// Stages of the trip planning workflow, in execution order.
pub const TRIP_PLANNING_STAGES: [&str; 4] = [
    "Researching the destination",
    "Drafting an itinerary",
    "Collecting preferences",
    "Finalizing the plan",
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Active,
    Done,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSnapshot {
    pub name: String,
    pub status: StageStatus,
}

/// Stage display driven by a timer, with the final stage reserved for the
/// real completion.
#[derive(Debug)]
pub struct ProgressSimulator {
    stages: Vec<String>,
    current: usize,
    finished: bool,
    halted: bool,
}

impl ProgressSimulator {
    pub fn new(stages: &[&str]) -> Self {
        Self {
            stages: stages.iter().map(|s| s.to_string()).collect(),
            current: 0,
            finished: false,
            halted: false,
        }
    }

    /// One timer tick. The last stage can become active but never done here.
    pub fn advance(&mut self) {
        if self.halted || self.finished || self.stages.is_empty() {
            return;
        }
        if self.current + 1 < self.stages.len() {
            self.current += 1;
        }
    }

    /// The real response arrived: every stage is done.
    pub fn complete_all(&mut self) {
        if self.halted {
            return;
        }
        self.finished = true;
    }

    /// Failure or cancellation: freeze the display where it is.
    pub fn halt(&mut self) {
        self.halted = true;
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    pub fn active_stage(&self) -> Option<&str> {
        if self.finished {
            return None;
        }
        self.stages.get(self.current).map(String::as_str)
    }

    pub fn snapshot(&self) -> Vec<StageSnapshot> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let status = if self.finished || i < self.current {
                    StageStatus::Done
                } else if i == self.current {
                    StageStatus::Active
                } else {
                    StageStatus::Pending
                };
                StageSnapshot {
                    name: name.clone(),
                    status,
                }
            })
            .collect()
    }
}

/// Drives a shared simulator from a background task until the run settles.
/// The loop exits on its own once the simulator is finished or halted.
pub fn spawn_ticker(
    simulator: Arc<Mutex<ProgressSimulator>>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            let mut sim = simulator.lock().await;
            if sim.is_finished() || sim.is_halted() {
                break;
            }
            sim.advance();
        }
    })
}
