pub mod config;
pub mod error;
pub mod registry;
pub mod service;
pub mod session;
pub mod transport;

pub use config::{ClientConfig, SessionOptions};
pub use error::{ClientErr, Result};
pub use registry::{HttpRegistry, ModelRegistry};
pub use service::{ServiceHandle, ServiceOutcome};
pub use session::{Session, StateKind, TrainerHandle};
pub use transport::Connection;
