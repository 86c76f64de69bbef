pub mod store;
pub mod window;

pub use store::{InMemoryStore, SqliteStore};
pub use window::MemoryWindow;
