//! Shapes shared with the coordination backend and the training server.

pub mod config;
pub mod model;
pub mod server;
pub mod telemetry;
