//! HTTP API handlers for raf-gateway

pub mod health;
pub mod process;

pub use health::{health_check, health_routes, root};
pub use process::{process_data, ProcessResponse};
