//! Storage engine for Memoria
//!
//! Handles SQLite database operations, WAL mode, and schema management.

mod audit;
mod connection;
mod migrations;
pub mod queries;

pub use audit::*;
pub use connection::Storage;
pub use migrations::SCHEMA_VERSION;
