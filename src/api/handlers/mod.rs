pub mod positions;
pub mod system;

pub use positions::*;
pub use system::*;
