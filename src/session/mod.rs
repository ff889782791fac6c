//! Presence and Session Manager
//!
//! Owns the live connections: which sessions watch which boards, who is
//! dragging what, and the fan-out of board events to subscribers.

pub mod manager;
pub mod protocol;

pub use manager::SessionManager;
pub use protocol::{ClientMessage, MoveOutcome, ServerMessage};
