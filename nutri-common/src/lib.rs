//! # Nutri Common Library
//!
//! Shared code for the nutrition nomination services:
//! - Error and result types
//! - TOML configuration and data folder resolution
//! - SQLite pool initialization and schema
//! - Text normalization used for header and catalog matching

pub mod config;
pub mod db;
pub mod error;
pub mod text;

pub use error::{Error, Result};
