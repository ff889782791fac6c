pub mod admin_client;
pub mod api_server;
pub mod memory;
pub mod postgres;

pub use admin_client::AdminClient;
pub use api_server::{serve_api, start_api_server};
pub use memory::MemoryStore;
pub use postgres::PostgresStore;
