//! PostgreSQL-backed task store.
//!
//! Tasks carry an author, an optional assignee, open/close timestamps, and a
//! set of deduplicated tags. All persistence goes through the [`db::Database`]
//! trait; [`db::connect_from_config`] builds the default backend.

pub mod config;
pub mod db;
pub mod error;
