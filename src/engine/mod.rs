//! Position Engine
//!
//! Pure key arithmetic for card ordering. Never touches the store: callers
//! hand it cell snapshots and get keys back.

pub mod keys;
pub mod placement;
pub mod spacing;

pub use keys::{compute_key, KeyError};
pub use placement::{resolve, Neighbors, PlacementError};
pub use spacing::spaced_keys;

use crate::config::EngineConfig;
use crate::domain::{CellSnapshot, OrderKey, Placement, TaskPosition};
use tracing::debug;

/// Outcome of asking for a key at a placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyDecision {
    Key(OrderKey),
    /// Cell must be rebalanced before a key can be issued
    RebalanceNeeded,
}

#[derive(Debug, Clone)]
pub struct PositionEngine {
    max_key_len: usize,
}

impl PositionEngine {
    pub fn new(max_key_len: usize) -> Self {
        Self {
            max_key_len: max_key_len.max(2),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.max_key_len)
    }

    pub fn max_key_len(&self) -> usize {
        self.max_key_len
    }

    /// Key for `placement` within `cell` (which must exclude the moving task).
    pub fn key_for(
        &self,
        cell: &CellSnapshot,
        placement: &Placement,
    ) -> Result<KeyDecision, PlacementError> {
        let neighbors = placement::resolve(cell, placement)?;
        match compute_key(
            neighbors.prev.as_ref(),
            neighbors.next.as_ref(),
            self.max_key_len,
        ) {
            Ok(key) => {
                debug!(
                    prev = ?neighbors.prev.as_ref().map(|k| k.as_str()),
                    next = ?neighbors.next.as_ref().map(|k| k.as_str()),
                    key = %key,
                    "computed order key"
                );
                Ok(KeyDecision::Key(key))
            }
            Err(KeyError::RebalanceNeeded { len, max }) => {
                debug!(len, max, "neighbors exhausted, rebalance needed");
                Ok(KeyDecision::RebalanceNeeded)
            }
            // A snapshot is sorted and unique, so neighbors arrive misordered
            // only if the store returned a corrupted cell.
            Err(KeyError::Misordered { .. }) => Ok(KeyDecision::RebalanceNeeded),
        }
    }

    /// Fresh evenly spaced keys for every row of `cell`, preserving order.
    pub fn plan_rebalance(&self, cell: &CellSnapshot) -> Vec<(TaskPosition, OrderKey)> {
        let keys = spaced_keys(cell.positions.len());
        cell.positions.iter().cloned().zip(keys).collect()
    }
}

impl Default for PositionEngine {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{TaskId, UserId};
    use chrono::Utc;

    fn cell(entries: &[(&str, &str)]) -> CellSnapshot {
        CellSnapshot {
            generation: 3,
            positions: entries
                .iter()
                .map(|(task, key)| TaskPosition {
                    task_id: TaskId::from(*task),
                    board_id: "b1".into(),
                    column_id: "todo".into(),
                    swimlane: None,
                    key: OrderKey::parse(key).unwrap(),
                    version: 2,
                    modified_by: UserId::from("u1"),
                    modified_at: Utc::now(),
                })
                .collect(),
        }
    }

    #[test]
    fn key_for_lands_between_neighbors() {
        let engine = PositionEngine::default();
        let c = cell(&[("a", "F"), ("b", "V")]);
        let KeyDecision::Key(key) = engine.key_for(&c, &Placement::after("a")).unwrap() else {
            panic!("expected key");
        };
        assert!(key.as_str() > "F" && key.as_str() < "V");
    }

    #[test]
    fn tight_neighbors_ask_for_rebalance() {
        let engine = PositionEngine::new(3);
        let c = cell(&[("a", "VVV"), ("b", "VVW")]);
        assert_eq!(
            engine.key_for(&c, &Placement::after("a")).unwrap(),
            KeyDecision::RebalanceNeeded
        );
    }

    #[test]
    fn rebalance_plan_keeps_order() {
        let engine = PositionEngine::default();
        let c = cell(&[("a", "VVV"), ("m", "VVVV1"), ("b", "VVW")]);
        let plan = engine.plan_rebalance(&c);

        let ids: Vec<_> = plan.iter().map(|(p, _)| p.task_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "m", "b"]);
        assert!(plan[0].1 < plan[1].1 && plan[1].1 < plan[2].1);
        assert!(plan.iter().all(|(_, k)| k.len() <= 2));
    }
}
