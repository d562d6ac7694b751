// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Process-wide lifecycle state.
///
/// Transitions only move forward: `Starting -> Running -> Draining -> Stopped`.
/// Skipping a state is allowed (a fatal stop goes straight to `Stopped`),
/// re-entering one is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Starting => write!(f, "starting"),
            AgentState::Running => write!(f, "running"),
            AgentState::Draining => write!(f, "draining"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Owner's handle on the lifecycle state.
///
/// Held by the shutdown coordinator; everyone else gets a read-only
/// `watch::Receiver` via [`StateHandle::subscribe`].
pub struct StateHandle {
    tx: watch::Sender<AgentState>,
}

impl StateHandle {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AgentState::Starting);
        Self { tx }
    }

    pub fn current(&self) -> AgentState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    /// Advance to `next`. Backward transitions are ignored.
    ///
    /// Returns whether the state actually changed.
    pub fn advance(&self, next: AgentState) -> bool {
        self.tx.send_if_modified(|state| {
            if next > *state {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}

impl Default for StateHandle {
    fn default() -> Self {
        Self::new()
    }
}
