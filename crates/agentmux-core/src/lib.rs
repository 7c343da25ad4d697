//! `agentmux` Core Library
//!
//! Shared functionality for agentmux components:
//! - NDJSON codec for the agent's stream-json protocol
//! - Logical event and command vocabulary exchanged with subscribers
//! - Configuration resolution and hierarchy
//! - Common error types

pub mod command;
pub mod config;
pub mod downstream;
pub mod error;
pub mod event;
pub mod ndjson;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
