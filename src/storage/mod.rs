// Storage module
// Raw key-value backends and the JSON-aware store layered on top

mod backend;
mod local;
mod sqlite;

pub use backend::{MemoryStorage, Storage, StorageError};
pub use local::LocalStore;
pub use sqlite::SqliteStorage;
