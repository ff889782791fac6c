//! Board positioning domain types

pub mod board;
pub mod events;
pub mod ids;
pub mod key;
pub mod position;
pub mod request;

pub use board::{Board, Column, SavedFilter};
pub use events::{
    BoardEvent, ColumnRebalanced, CommittedMove, DragPhase, DragSignal, PresenceChange,
    PresenceChanged, RebalancedRow,
};
pub use ids::{BoardId, ColumnId, Identity, SessionId, Swimlane, TaskId, UserId};
pub use key::{InvalidKey, OrderKey};
pub use position::{CellSnapshot, TaskPosition};
pub use request::{MoveRequest, PlaceRequest, Placement};
