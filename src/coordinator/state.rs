use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::trace;

use crate::domain::TaskId;

/// Phases a single move request passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovePhase {
    /// Loading the row and comparing version stamps
    Validating,
    /// Asking the WIP enforcer about the destination column
    CapacityChecking,
    /// Asking the engine for a key at the insertion point
    Computing,
    /// Conditional write in flight
    Committing,
    /// Durable; event emitted
    Committed,
    /// Stale version, stale reference or retries exhausted
    Conflict,
    /// Refused: destination full or task not on the board
    Rejected,
}

impl MovePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovePhase::Validating => "VALIDATING",
            MovePhase::CapacityChecking => "CAPACITY_CHECKING",
            MovePhase::Computing => "COMPUTING",
            MovePhase::Committing => "COMMITTING",
            MovePhase::Committed => "COMMITTED",
            MovePhase::Conflict => "CONFLICT",
            MovePhase::Rejected => "REJECTED",
        }
    }

    /// Check if this phase can transition to another phase
    pub fn can_transition_to(&self, target: MovePhase) -> bool {
        use MovePhase::*;

        match (self, target) {
            (Validating, CapacityChecking) => true,
            (Validating, Conflict) => true, // Version mismatch or retries exhausted
            (Validating, Rejected) => true, // Row missing or already present

            (CapacityChecking, Computing) => true,
            (CapacityChecking, Rejected) => true, // Column full

            (Computing, Committing) => true,
            (Computing, Validating) => true, // Rebalanced, start over
            (Computing, Conflict) => true,   // Reference sibling gone

            (Committing, Committed) => true,
            (Committing, Validating) => true, // Lost a race, retry
            (Committing, Conflict) => true,   // Task moved under the write
            (Committing, Rejected) => true,   // Capacity re-check failed

            _ => false,
        }
    }

    /// Is this a terminal phase?
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MovePhase::Committed | MovePhase::Conflict | MovePhase::Rejected
        )
    }
}

impl fmt::Display for MovePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks one request's walk through [`MovePhase`].
#[derive(Debug)]
pub struct MoveStateMachine {
    task_id: TaskId,
    phase: MovePhase,
    attempt: u32,
}

impl MoveStateMachine {
    pub fn new(task_id: &TaskId) -> Self {
        Self {
            task_id: task_id.clone(),
            phase: MovePhase::Validating,
            attempt: 1,
        }
    }

    pub fn phase(&self) -> MovePhase {
        self.phase
    }

    /// Attempt number, starting at 1
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn advance(&mut self, next: MovePhase) {
        debug_assert!(
            self.phase.can_transition_to(next),
            "invalid move transition {} -> {}",
            self.phase,
            next
        );
        trace!(task = %self.task_id, from = %self.phase, to = %next, attempt = self.attempt, "move phase");
        self.phase = next;
    }

    /// Back to validating for another attempt
    pub fn retry(&mut self) {
        self.advance(MovePhase::Validating);
        self.attempt += 1;
    }
}
