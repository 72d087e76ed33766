//! Engine state machine.
//!
//! State transitions for one unit of work:
//! ```text
//! IDLE → FETCHING → RESOLVING → INVOKING → PUBLISHING → COMMITTING → IDLE
//!           ↓                       ↓            ↓
//!         IDLE (empty)        COMMITTING    RESOLVING (next batch member)
//!                               (sink)
//! any non-IDLE state → FAILED
//! ```
//! `FAILED` is absorbing: a failed unit is abandoned and the next unit starts
//! from a fresh machine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Idle,
    Fetching,
    Resolving,
    Invoking,
    Publishing,
    Committing,
    Failed,
}

impl EngineState {
    pub fn is_terminal(self) -> bool {
        self == EngineState::Failed
    }

    /// Check if transition is valid.
    pub fn can_transition_to(self, to: EngineState) -> bool {
        use EngineState::*;
        match (self, to) {
            (Failed, _) => false,
            (Idle, Failed) => false,
            (_, Failed) => true,
            // IDLE
            (Idle, Fetching) => true,
            // FETCHING
            (Fetching, Resolving) => true,
            (Fetching, Idle) => true, // nothing to do
            // RESOLVING
            (Resolving, Invoking) => true,
            // INVOKING
            (Invoking, Publishing) => true,
            (Invoking, Committing) => true, // sink: nothing to publish
            (Invoking, Resolving) => true,  // sink: next batch member
            // PUBLISHING
            (Publishing, Committing) => true,
            (Publishing, Resolving) => true, // next batch member
            // COMMITTING
            (Committing, Idle) => true,
            _ => false,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineState::Idle => "IDLE",
            EngineState::Fetching => "FETCHING",
            EngineState::Resolving => "RESOLVING",
            EngineState::Invoking => "INVOKING",
            EngineState::Publishing => "PUBLISHING",
            EngineState::Committing => "COMMITTING",
            EngineState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Tracks the state of the unit currently in flight.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: EngineState,
    history: Vec<EngineState>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: EngineState::Idle,
            history: vec![EngineState::Idle],
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Every state visited, in order, starting with `IDLE`.
    pub fn history(&self) -> &[EngineState] {
        &self.history
    }

    pub fn transition(&mut self, to: EngineState) -> Result<()> {
        if !self.state.can_transition_to(to) {
            return Err(Error::internal(format!(
                "illegal engine transition {} → {}",
                self.state, to
            )));
        }
        tracing::trace!(from = %self.state, to = %to, "engine_state");
        self.state = to;
        self.history.push(to);
        Ok(())
    }

    /// Enter `FAILED` unless already there. A machine still in `IDLE` has no
    /// unit to fail and stays put.
    pub fn fail(&mut self) {
        if self.state.can_transition_to(EngineState::Failed) {
            self.state = EngineState::Failed;
            self.history.push(EngineState::Failed);
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}
