use std::{env, path::PathBuf, str::FromStr, time::Duration};

use serde::Deserialize;

use crate::{ClientErr, Result};

const ENV_PREFIX: &str = "FEDKIT_";

/// Everything the client needs to run one federated session.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the coordination backend, e.g. `http://10.0.0.2:8000`.
    pub backend_url: String,
    /// The kind of data this device holds, used to pick a model.
    pub data_type: String,
    /// Where downloaded models are stored.
    pub storage_root: PathBuf,
    /// Host of the training servers, the backend only hands out ports.
    pub server_host: String,
    pub use_tls: bool,
    pub start_fresh: bool,
    /// Enables telemetry under this device id when present.
    pub device_id: Option<i64>,
    pub telemetry_timeout_secs: u64,
    pub max_msg_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".into(),
            data_type: "toy_regression".into(),
            storage_root: PathBuf::from("models"),
            server_host: "127.0.0.1".into(),
            use_tls: false,
            start_fresh: false,
            device_id: None,
            telemetry_timeout_secs: 30,
            max_msg_size: comms::DEFAULT_MAX_MSG_SIZE,
        }
    }
}

impl ClientConfig {
    /// Reads the configuration from `FEDKIT_*` environment variables,
    /// falling back to the defaults for the unset ones.
    ///
    /// # Errors
    /// Returns `ClientErr::Io` if a variable can't be parsed.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = var("BACKEND_URL") {
            config.backend_url = v;
        }
        if let Some(v) = var("DATA_TYPE") {
            config.data_type = v;
        }
        if let Some(v) = var("STORAGE_ROOT") {
            config.storage_root = PathBuf::from(v);
        }
        if let Some(v) = var("SERVER_HOST") {
            config.server_host = v;
        }
        if let Some(v) = parsed_var("USE_TLS")? {
            config.use_tls = v;
        }
        if let Some(v) = parsed_var("START_FRESH")? {
            config.start_fresh = v;
        }
        if let Some(v) = parsed_var("DEVICE_ID")? {
            config.device_id = Some(v);
        }
        if let Some(v) = parsed_var("TELEMETRY_TIMEOUT_SECS")? {
            config.telemetry_timeout_secs = v;
        }
        if let Some(v) = parsed_var("MAX_MSG_SIZE")? {
            config.max_msg_size = v;
        }

        Ok(config)
    }

    /// The session tunables derived from this configuration.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            telemetry_timeout: Duration::from_secs(self.telemetry_timeout_secs),
            max_msg_size: self.max_msg_size,
        }
    }
}

fn var(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{name}")).ok()
}

fn parsed_var<T: FromStr>(name: &str) -> Result<Option<T>> {
    let Some(raw) = var(name) else {
        return Ok(None);
    };

    raw.parse().map(Some).map_err(|_| {
        ClientErr::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid value {raw:?} for {ENV_PREFIX}{name}"),
        ))
    })
}

/// Tunables of a single `Session`.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Upper bound for each telemetry report.
    pub telemetry_timeout: Duration,
    /// The largest frame accepted from the training server.
    pub max_msg_size: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        ClientConfig::default().session_options()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"backend_url":"http://10.0.0.2:8000","device_id":42}"#)
                .unwrap();

        assert_eq!(config.backend_url, "http://10.0.0.2:8000");
        assert_eq!(config.device_id, Some(42));
        assert_eq!(config.telemetry_timeout_secs, 30);
        assert_eq!(config.max_msg_size, 100 * 1024 * 1024);
        assert!(!config.use_tls);
    }

    #[test]
    fn session_options_from_config() {
        let config = ClientConfig {
            telemetry_timeout_secs: 5,
            ..Default::default()
        };

        let options = config.session_options();
        assert_eq!(options.telemetry_timeout, Duration::from_secs(5));
        assert_eq!(options.max_msg_size, comms::DEFAULT_MAX_MSG_SIZE);
    }
}
