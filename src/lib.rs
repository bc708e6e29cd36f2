//! DIFFER: Autonomous digit-differ tick trading engine
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod error;
pub mod model;
pub mod strategy;
pub mod engine;
pub mod venue;
pub mod notify;
pub mod dashboard;
