pub mod config;
pub mod constants;
pub mod error;
pub mod observability;
pub mod pipeline;
pub mod types;

// Capability ports and use cases, and the adapters that back them
pub mod app;
pub mod infra;
