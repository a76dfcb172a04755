//! Store implementations using `SQLite`.
//!
//! These implementations encapsulate all SQL queries and database access.
//! The `SqlitePool` is confined to this module and never exposed through
//! the port trait signatures.

mod sqlite_file_store;
mod sqlite_package_store;
mod sqlite_queue_store;

pub use sqlite_file_store::SqliteFileStore;
pub use sqlite_package_store::SqlitePackageStore;
pub use sqlite_queue_store::SqliteQueueStore;
