//! The coordination backend, as seen by a session.

mod http;

use comms::specs::{
    model::ModelDescriptor,
    server::ServerAssignment,
    telemetry::{EvaluateTelemetry, FitTelemetry},
};

pub use http::HttpRegistry;

use crate::Result;

/// Model advertisement, server assignment and telemetry upload.
///
/// Every call is a unary request, failures surface as `ClientErr::BackendUnavailable`.
#[async_trait::async_trait]
pub trait ModelRegistry: Send + Sync {
    /// Returns the model to train for the given data type.
    async fn advertise(&self, data_type: &str) -> Result<ModelDescriptor>;

    /// Requests a training server for the given model.
    async fn server_assignment(&self, model_id: i64, start_fresh: bool)
    -> Result<ServerAssignment>;

    async fn report_fit(&self, event: FitTelemetry) -> Result<()>;

    async fn report_evaluate(&self, event: EvaluateTelemetry) -> Result<()>;

    /// Downloads a model artifact from its storage location.
    async fn download(&self, location: &str) -> Result<Vec<u8>>;
}
