//! Database initialization and schema

pub mod init;

pub use init::{create_schema, init_database, PoolSettings};
