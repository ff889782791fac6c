pub mod adapters;
pub mod api;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod engine;
pub mod error;
pub mod runtime;
pub mod session;
pub mod store;
pub mod wip;

pub use config::AppConfig;
pub use coordinator::{CommitResult, EventPublisher, MoveCoordinator};
pub use domain::{
    Board, BoardEvent, BoardId, Column, ColumnId, Identity, MoveRequest, OrderKey, PlaceRequest,
    Placement, Swimlane, TaskId, TaskPosition, UserId,
};
pub use engine::PositionEngine;
pub use error::{CardflowError, MoveError, Result};
pub use runtime::{Backends, Services};
pub use session::SessionManager;
pub use store::{BoardDirectory, PositionStore};
pub use wip::WipLimitEnforcer;
