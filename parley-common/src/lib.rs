//! Parley Common - Shared configuration, errors, and logging for the Parley chat service.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Error types and handling utilities
//! - Logging setup and structured logging helpers

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod logging;

pub use config::{
    AuthConfig, Config, DatabaseConfig, LlmConfig, MemoryConfig, ObservabilityConfig, ServerConfig,
};
pub use error::{Error, Result};
