pub mod client_storage;

pub use client_storage::{ClientStorage, InMemoryClientStorage, SqliteClientStorage};
