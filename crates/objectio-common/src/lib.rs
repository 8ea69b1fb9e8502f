//! ObjectIO Common - Shared types and utilities
//!
//! This crate provides common types, error definitions, and configuration
//! used across the metadata service and the placement service.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;
