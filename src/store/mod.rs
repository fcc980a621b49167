//! Persistence layer: libSQL-backed storage for notes, study artifacts and chat.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
