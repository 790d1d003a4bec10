//! aleph-bridge - Paper-to-live execution bridge
//! Gate, kill switch, venue adapters and durable order lifecycle

// Public modules
pub mod core;
pub mod exchanges;
pub mod execution;
pub mod risk;

// Re-exports
pub use core::{Error, Result, Settings};
