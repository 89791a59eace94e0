//! State machine for the publish lifecycle
//!
//! `Start → RepoEnsured → Pruned → Packaged → Dropped → Published`, with
//! `Aborted(reason)` reachable from every non-terminal state. Any other
//! transition is rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::error::AbortReason;

/// Publishing state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishState {
    Start,
    RepoEnsured,
    Pruned,
    Packaged,
    Dropped,
    Published,
    Aborted(AbortReason),
}

impl PublishState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Published | Self::Aborted(_))
    }

    /// The single forward successor of this state
    fn next(&self) -> Option<Self> {
        match self {
            Self::Start => Some(Self::RepoEnsured),
            Self::RepoEnsured => Some(Self::Pruned),
            Self::Pruned => Some(Self::Packaged),
            Self::Packaged => Some(Self::Dropped),
            Self::Dropped => Some(Self::Published),
            Self::Published | Self::Aborted(_) => None,
        }
    }
}

impl fmt::Display for PublishState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Aborted(reason) => write!(f, "Aborted({})", reason),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Rejected transition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Illegal state transition {from} → {to}")]
pub struct StateError {
    pub from: PublishState,
    pub to: PublishState,
}

/// State transition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateTransition {
    /// From state
    pub from: PublishState,

    /// To state
    pub to: PublishState,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

/// State machine for tracking one run
#[derive(Debug, Clone)]
pub struct PublishStateMachine {
    current_state: PublishState,
    transitions: Vec<StateTransition>,
}

impl Default for PublishStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PublishStateMachine {
    pub fn new() -> Self {
        Self {
            current_state: PublishState::Start,
            transitions: Vec::new(),
        }
    }

    /// Transition to a new state
    pub fn transition(&mut self, to: PublishState) -> Result<(), StateError> {
        let legal = match to {
            PublishState::Aborted(_) => !self.current_state.is_terminal(),
            forward => self.current_state.next() == Some(forward),
        };

        if !legal {
            return Err(StateError {
                from: self.current_state,
                to,
            });
        }

        self.transitions.push(StateTransition {
            from: self.current_state,
            to,
            timestamp: Utc::now(),
        });
        self.current_state = to;

        Ok(())
    }

    /// Get current state
    pub fn get_state(&self) -> PublishState {
        self.current_state
    }

    pub fn transitions(&self) -> &[StateTransition] {
        &self.transitions
    }

    /// Get elapsed time between the first and the last transition
    pub fn get_elapsed_time(&self) -> i64 {
        match (self.transitions.first(), self.transitions.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        }
    }

    /// Get transition history as human-readable string
    pub fn get_history(&self) -> String {
        self.transitions
            .iter()
            .map(|t| format!("{}: {} → {}", t.timestamp.to_rfc3339(), t.from, t.to))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
