//! Utility modules for grove-ai

pub mod retry;

pub use retry::retry_attempts;
