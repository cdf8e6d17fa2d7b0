//! Type definitions shared across Brokkr crates

mod runtime_config;

pub use runtime_config::*;
