//! # Grove Common Library
//!
//! Shared code for the Grove services:
//! - Error type used across crates
//! - TOML configuration and root folder resolution
//! - Notification event types (progress, result, error, enrichment updates)

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
