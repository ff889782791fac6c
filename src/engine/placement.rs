//! Translating a requested placement into neighbor keys.

use thiserror::Error;

use crate::domain::{CellSnapshot, OrderKey, Placement, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlacementError {
    /// A reference sibling is no longer in the destination cell
    #[error("reference task {0} is not in the destination cell")]
    StaleReference(TaskId),
}

/// Keys immediately around the insertion point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Neighbors {
    pub prev: Option<OrderKey>,
    pub next: Option<OrderKey>,
}

/// Resolve `placement` against a cell that no longer contains the moving task.
///
/// When both siblings are named but something was inserted between them in
/// the meantime, `after` wins and the card goes directly behind it.
pub fn resolve(cell: &CellSnapshot, placement: &Placement) -> Result<Neighbors, PlacementError> {
    let keys: Vec<&OrderKey> = cell.positions.iter().map(|p| &p.key).collect();

    let at = |index: usize| Neighbors {
        prev: index.checked_sub(1).and_then(|i| keys.get(i)).map(|k| (*k).clone()),
        next: keys.get(index).map(|k| (*k).clone()),
    };

    match placement {
        Placement::End => Ok(at(keys.len())),
        Placement::Index { index } => Ok(at((*index).min(keys.len()))),
        Placement::Between { after, before } => {
            let lookup = |task: &TaskId| {
                cell.index_of(task)
                    .ok_or_else(|| PlacementError::StaleReference(task.clone()))
            };
            match (after, before) {
                (Some(after), before) => {
                    let i = lookup(after)?;
                    if let Some(before) = before {
                        // Still validated so a vanished sibling is reported.
                        lookup(before)?;
                    }
                    Ok(at(i + 1))
                }
                (None, Some(before)) => Ok(at(lookup(before)?)),
                (None, None) => Ok(at(0)),
            }
        }
    }
}
