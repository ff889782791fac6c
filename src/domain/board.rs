use serde::{Deserialize, Serialize};

use super::ids::{BoardId, ColumnId};

/// Board metadata supplied by the board-administration subsystem.
///
/// Read-only from the point of view of the positioning core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    pub id: BoardId,
    pub name: String,
    /// Columns sorted by ordinal
    pub columns: Vec<Column>,
    #[serde(default)]
    pub filters: Vec<SavedFilter>,
}

impl Board {
    pub fn new(id: impl Into<BoardId>, name: impl Into<String>, mut columns: Vec<Column>) -> Self {
        columns.sort_by_key(|c| c.ordinal);
        Self {
            id: id.into(),
            name: name.into(),
            columns,
            filters: Vec::new(),
        }
    }

    pub fn column(&self, id: &ColumnId) -> Option<&Column> {
        self.columns.iter().find(|c| &c.id == id)
    }

    /// Column a task lands in when it first enters the board
    pub fn default_column(&self) -> Option<&Column> {
        self.columns.iter().min_by_key(|c| c.ordinal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: ColumnId,
    pub board_id: BoardId,
    pub name: String,
    /// WIP limit; `None` means unlimited
    pub wip_limit: Option<u32>,
    pub ordinal: i32,
}

impl Column {
    pub fn new(
        id: impl Into<ColumnId>,
        board_id: impl Into<BoardId>,
        name: impl Into<String>,
        ordinal: i32,
    ) -> Self {
        Self {
            id: id.into(),
            board_id: board_id.into(),
            name: name.into(),
            wip_limit: None,
            ordinal,
        }
    }

    pub fn with_wip_limit(mut self, limit: u32) -> Self {
        self.wip_limit = Some(limit);
        self
    }
}

/// Saved board filter. Carried as passive data only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedFilter {
    pub name: String,
    pub definition: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn columns_are_sorted_and_default_is_first() {
        let board = Board::new(
            "b1",
            "Sprint",
            vec![
                Column::new("done", "b1", "Done", 2),
                Column::new("todo", "b1", "To Do", 0),
                Column::new("doing", "b1", "In Progress", 1).with_wip_limit(2),
            ],
        );

        let ids: Vec<_> = board.columns.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["todo", "doing", "done"]);
        assert_eq!(board.default_column().unwrap().id.as_str(), "todo");
        assert_eq!(
            board.column(&ColumnId::from("doing")).unwrap().wip_limit,
            Some(2)
        );
        assert!(board.column(&ColumnId::from("nope")).is_none());
    }
}
