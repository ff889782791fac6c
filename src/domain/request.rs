use serde::{Deserialize, Serialize};

use super::ids::{BoardId, ColumnId, Swimlane, TaskId};

/// Where in the destination cell the card should land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Placement {
    /// Between two reference siblings. Either side may be omitted to mean
    /// the start or end of the cell.
    Between {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        after: Option<TaskId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        before: Option<TaskId>,
    },
    /// Zero-based index among the other cards of the cell, clamped to its length
    Index { index: usize },
    /// After the last card
    #[default]
    End,
}

impl Placement {
    pub fn after(task: impl Into<TaskId>) -> Self {
        Self::Between {
            after: Some(task.into()),
            before: None,
        }
    }

    pub fn before(task: impl Into<TaskId>) -> Self {
        Self::Between {
            after: None,
            before: Some(task.into()),
        }
    }

    pub fn between(after: impl Into<TaskId>, before: impl Into<TaskId>) -> Self {
        Self::Between {
            after: Some(after.into()),
            before: Some(before.into()),
        }
    }
}

/// A client's request to move one task. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub task_id: TaskId,
    pub board_id: BoardId,
    pub column_id: ColumnId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swimlane: Option<Swimlane>,
    #[serde(default)]
    pub placement: Placement,
    /// Version stamp the client last saw for this task's position
    pub expected_version: i64,
}

impl MoveRequest {
    pub fn new(
        task_id: impl Into<TaskId>,
        board_id: impl Into<BoardId>,
        column_id: impl Into<ColumnId>,
        expected_version: i64,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            board_id: board_id.into(),
            column_id: column_id.into(),
            swimlane: None,
            placement: Placement::End,
            expected_version,
        }
    }

    pub fn in_swimlane(mut self, swimlane: impl Into<Swimlane>) -> Self {
        self.swimlane = Some(swimlane.into());
        self
    }

    pub fn placed(mut self, placement: Placement) -> Self {
        self.placement = placement;
        self
    }

    /// Shape checks that need no stored state.
    pub fn validate(&self) -> Result<(), String> {
        if self.task_id.is_blank() {
            return Err("task_id is required".to_string());
        }
        if self.board_id.is_blank() {
            return Err("board_id is required".to_string());
        }
        if self.column_id.is_blank() {
            return Err("column_id is required".to_string());
        }
        if self.swimlane.as_ref().is_some_and(|s| s.is_blank()) {
            return Err("swimlane must not be blank".to_string());
        }
        if self.expected_version < 1 {
            return Err(format!(
                "expected_version must be positive, got {}",
                self.expected_version
            ));
        }
        if let Placement::Between { after, before } = &self.placement {
            if after.as_ref() == Some(&self.task_id) || before.as_ref() == Some(&self.task_id) {
                return Err("a task cannot be placed relative to itself".to_string());
            }
            if after.is_some() && after == before {
                return Err("after and before must name different tasks".to_string());
            }
        }
        Ok(())
    }
}

/// Request to put a task on a board for the first time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceRequest {
    pub task_id: TaskId,
    pub board_id: BoardId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swimlane: Option<Swimlane>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_placement_is_end() {
        let req: MoveRequest = serde_json::from_str(
            r#"{"task_id":"t1","board_id":"b1","column_id":"done","expected_version":3}"#,
        )
        .unwrap();
        assert_eq!(req.placement, Placement::End);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn placement_wire_format() {
        let json = serde_json::to_value(Placement::between("a", "b")).unwrap();
        assert_eq!(json["mode"], "between");
        assert_eq!(json["after"], "a");
        assert_eq!(json["before"], "b");

        let idx: Placement = serde_json::from_str(r#"{"mode":"index","index":2}"#).unwrap();
        assert_eq!(idx, Placement::Index { index: 2 });
    }

    #[test]
    fn validate_rejects_malformed_requests() {
        let base = MoveRequest::new("t1", "b1", "done", 1);

        assert!(MoveRequest::new("", "b1", "done", 1).validate().is_err());
        assert!(MoveRequest::new("t1", "b1", " ", 1).validate().is_err());
        assert!(MoveRequest::new("t1", "b1", "done", 0).validate().is_err());
        assert!(base.clone().placed(Placement::after("t1")).validate().is_err());
        assert!(base
            .clone()
            .placed(Placement::between("t2", "t2"))
            .validate()
            .is_err());
        assert!(base.clone().in_swimlane("").validate().is_err());
        assert!(base.placed(Placement::between("t2", "t3")).validate().is_ok());
    }
}
