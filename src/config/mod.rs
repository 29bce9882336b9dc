//! Runtime configuration resolved from the environment.

mod database;
pub(crate) mod helpers;

pub use database::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_POOL_SIZE, DEFAULT_STATEMENT_TIMEOUT_MS, DatabaseConfig,
    redact_database_url,
};
