//! Persistence layer — libSQL-backed storage for emails, templates, and drafts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlStore;
pub use traits::Store;
