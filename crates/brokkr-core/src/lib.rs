//! # brokkr-core
//!
//! Core library shared by the Brokkr crates:
//! - Runtime configuration types and the hierarchical loader (brokkr-runtime.yaml)
//! - Error type for configuration and IO failures
//! - Retry execution engine with policy-based configuration
//! - Tracing initialisation

pub mod config;
pub mod error;
pub mod logging;
pub mod retry;
pub mod types;

pub use config::HierarchicalConfigLoader;
pub use error::{Error, Result};
pub use types::BrokkrRuntimeConfig;
