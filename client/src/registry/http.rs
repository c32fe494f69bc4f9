use std::time::Duration;

use comms::specs::{
    model::{AdvertiseRequest, ModelDescriptor},
    server::{ServerAssignment, ServerRequest},
    telemetry::{EvaluateTelemetry, FitTelemetry},
};
use log::debug;
use reqwest::{Client, Url};
use serde::{Serialize, de::DeserializeOwned};

use super::ModelRegistry;
use crate::{ClientErr, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// A `ModelRegistry` talking JSON over HTTP to the coordination backend.
#[derive(Debug, Clone)]
pub struct HttpRegistry {
    client: Client,
    base_url: Url,
}

impl HttpRegistry {
    /// Creates a new `HttpRegistry`.
    ///
    /// # Arguments
    /// * `base_url` - The backend's base URL, e.g. `http://10.0.0.2:8000`.
    ///
    /// # Errors
    /// Returns `ClientErr::Io` if `base_url` isn't a valid URL and
    /// `ClientErr::BackendUnavailable` if the HTTP client can't be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base_url = Url::parse(base_url).map_err(|e| {
            ClientErr::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid backend url {base_url:?}: {e}"),
            ))
        })?;

        // Relative joins drop the last segment unless the path ends with a slash.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| {
            ClientErr::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("invalid backend path {path:?}: {e}"),
            ))
        })
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url(path)?;
        debug!("POST {url}");

        let res = self
            .client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(res.json().await?)
    }

    async fn post_ignoring<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let url = self.url(path)?;
        debug!("POST {url}");

        self.client
            .post(url)
            .json(body)
            .send()
            .await?
            .error_for_status()?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl ModelRegistry for HttpRegistry {
    async fn advertise(&self, data_type: &str) -> Result<ModelDescriptor> {
        let body = AdvertiseRequest {
            data_type: data_type.to_string(),
        };
        self.post("train/advertised", &body).await
    }

    async fn server_assignment(
        &self,
        model_id: i64,
        start_fresh: bool,
    ) -> Result<ServerAssignment> {
        let body = ServerRequest {
            id: model_id,
            start_fresh,
        };
        self.post("train/server", &body).await
    }

    async fn report_fit(&self, event: FitTelemetry) -> Result<()> {
        self.post_ignoring("telemetry/fit_ins", &event).await
    }

    async fn report_evaluate(&self, event: EvaluateTelemetry) -> Result<()> {
        self.post_ignoring("telemetry/evaluate_ins", &event).await
    }

    async fn download(&self, location: &str) -> Result<Vec<u8>> {
        // Absolute URLs are kept, paths resolve against the backend.
        let url = self.url(location.trim_start_matches('/'))?;
        debug!("GET {url}");

        let res = self.client.get(url).send().await?.error_for_status()?;
        Ok(res.bytes().await?.to_vec())
    }
}
