//! Move Transaction Coordinator
//!
//! Single chokepoint for every position mutation. Validates against the
//! store, enforces WIP limits, asks the engine for keys and publishes each
//! commit to board subscribers in commit order.

pub mod coordinator;
pub mod publisher;
pub mod retry;
pub mod state;

pub use coordinator::{CommitResult, MoveCoordinator};
pub use publisher::EventPublisher;
pub use retry::RetryPolicy;
pub use state::{MovePhase, MoveStateMachine};
