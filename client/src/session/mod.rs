//! The lifecycle of one federated training session.

mod state;

use std::{
    mem,
    path::{Path, PathBuf},
    sync::Arc,
};

use comms::specs::{model::ModelDescriptor, server::ServerAssignment};
use log::{debug, info};
use machine_learning::{Trainer, TrainerBuilder};
use parking_lot::Mutex;
use tokio::{fs, runtime::Handle};

pub use state::{SessionState, StateKind, TrainerHandle};

use crate::{
    ClientErr, Result, SessionOptions,
    registry::ModelRegistry,
    service::{Progress, ServiceHandle, Telemetry, TrainingService},
    transport::Connection,
};

/// A federated training session.
///
/// Every operation is only legal from some states, calling it from any other
/// fails with `ClientErr::InvalidState`:
///
/// `Uninitialized -> WithModel -> Connected -> Running`
pub struct Session<B: TrainerBuilder> {
    registry: Arc<dyn ModelRegistry>,
    builder: B,
    options: SessionOptions,
    state: SessionState<B::Trainer>,
    session_id: Option<i64>,
    device_id: Option<i64>,
}

impl<B: TrainerBuilder> Session<B> {
    /// Creates a new `Session` in the `Uninitialized` state.
    ///
    /// # Arguments
    /// * `registry` - The coordination backend.
    /// * `builder` - Builds the trainer from the downloaded model.
    /// * `options` - The session's tunables.
    pub fn new(registry: Arc<dyn ModelRegistry>, builder: B, options: SessionOptions) -> Self {
        Self {
            registry,
            builder,
            options,
            state: SessionState::Uninitialized,
            session_id: None,
            device_id: None,
        }
    }

    pub fn state(&self) -> StateKind {
        self.state.kind()
    }

    /// The model descriptor, once fetched.
    pub fn model(&self) -> Option<&ModelDescriptor> {
        self.state.model()
    }

    /// The session id of the last server assignment, if any.
    pub fn session_id(&self) -> Option<i64> {
        self.session_id
    }

    /// The handle of the running session.
    pub fn handle(&self) -> Option<&ServiceHandle> {
        match &self.state {
            SessionState::Running { handle, .. } => Some(handle),
            _ => None,
        }
    }

    fn invalid_state(&self, op: &'static str, expected: &'static [StateKind]) -> ClientErr {
        ClientErr::InvalidState {
            op,
            expected,
            actual: self.state.kind(),
        }
    }

    fn with_model(&self, op: &'static str) -> Result<&ModelDescriptor> {
        match &self.state {
            SessionState::WithModel(model) => Ok(model),
            _ => Err(self.invalid_state(op, &[StateKind::WithModel])),
        }
    }

    /// Asks the backend for the model to train on `data_type`.
    ///
    /// Legal from `Uninitialized` or `WithModel`, a second call replaces the descriptor.
    pub async fn fetch_model(&mut self, data_type: &str) -> Result<ModelDescriptor> {
        if !matches!(
            self.state,
            SessionState::Uninitialized | SessionState::WithModel(_)
        ) {
            let expected = &[StateKind::Uninitialized, StateKind::WithModel];
            return Err(self.invalid_state("fetch_model", expected));
        }

        let model = self.registry.advertise(data_type).await?;
        info!("advertised model {} ({}), layers {:?}", model.id, model.name, model.layer_sizes);

        self.state = SessionState::WithModel(model.clone());
        Ok(model)
    }

    /// Stores the model artifact at `{storage_root}/{model_name}/{file_name}`,
    /// skipping the download if it's already there.
    ///
    /// Legal from `WithModel`.
    ///
    /// # Returns
    /// The path of the stored artifact.
    pub async fn download_model(&self, storage_root: &Path) -> Result<PathBuf> {
        let model = self.with_model("download_model")?;
        let path = model.local_path(storage_root);

        if fs::try_exists(&path).await? {
            debug!("model already stored at {}", path.display());
            return Ok(path);
        }

        let bytes = self.registry.download(&model.storage_location).await?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, &bytes).await?;

        info!("downloaded {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }

    /// `fetch_model` followed by `download_model`.
    pub async fn prepare_model(
        &mut self,
        data_type: &str,
        storage_root: &Path,
    ) -> Result<(ModelDescriptor, PathBuf)> {
        let model = self.fetch_model(data_type).await?;
        let path = self.download_model(storage_root).await?;
        Ok((model, path))
    }

    /// Asks the backend for a training server for the current model.
    ///
    /// Legal from `WithModel`, the state is left as is. A `None` port means no
    /// server is assigned right now and is left for the caller to check.
    pub async fn fetch_server_assignment(&mut self, start_fresh: bool) -> Result<ServerAssignment> {
        let model_id = self.with_model("fetch_server_assignment")?.id;

        let assignment = self.registry.server_assignment(model_id, start_fresh).await?;
        info!(
            "server assignment: status {:?}, session {:?}, port {:?}",
            assignment.status, assignment.session_id, assignment.port
        );

        self.session_id = assignment.session_id;
        Ok(assignment)
    }

    /// Builds the trainer from `model_buffer` and connects to the training server.
    ///
    /// Legal from `WithModel`, moves to `Connected`.
    ///
    /// # Returns
    /// The trainer, for the caller to load its samples before `start`.
    pub async fn open_session(
        &mut self,
        model_buffer: &[u8],
        address: &str,
        use_tls: bool,
    ) -> Result<TrainerHandle<B::Trainer>> {
        let model = self.with_model("open_session")?;
        let trainer = self.builder.build(model, model_buffer)?;

        let conn = Connection::connect(address, use_tls, self.options.max_msg_size).await?;
        Ok(self.connected(trainer, conn))
    }

    /// Same as `open_session` over an already open connection.
    pub fn open_session_with(
        &mut self,
        model_buffer: &[u8],
        conn: Connection,
    ) -> Result<TrainerHandle<B::Trainer>> {
        let model = self.with_model("open_session")?;
        let trainer = self.builder.build(model, model_buffer)?;
        Ok(self.connected(trainer, conn))
    }

    /// Moves from `WithModel` to `Connected`, the callers check the state.
    fn connected(&mut self, trainer: B::Trainer, conn: Connection) -> TrainerHandle<B::Trainer> {
        let trainer = Arc::new(Mutex::new(trainer));

        self.state = match mem::replace(&mut self.state, SessionState::Uninitialized) {
            SessionState::WithModel(model) => SessionState::Connected {
                model,
                trainer: trainer.clone(),
                conn,
            },
            other => other,
        };

        trainer
    }

    /// Starts answering the training server's instructions.
    ///
    /// Legal from `Connected`, moves to `Running`. Both the training and the
    /// test samples must be loaded, otherwise fails with `ClientErr::NoData`
    /// and the session stays `Connected`. The protocol loop is spawned on the
    /// caller's tokio runtime, without one fails with `ClientErr::NoRuntime`
    /// and the session stays `Connected` as well.
    ///
    /// # Arguments
    /// * `progress` - Called with a status line after every stage of an instruction.
    pub fn start<F>(&mut self, progress: F) -> Result<ServiceHandle>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let (model, trainer, conn) = match mem::replace(&mut self.state, SessionState::Uninitialized) {
            SessionState::Connected {
                model,
                trainer,
                conn,
            } => (model, trainer, conn),
            other => {
                self.state = other;
                return Err(self.invalid_state("start", &[StateKind::Connected]));
            }
        };

        let (training, test) = {
            let trainer = trainer.lock();
            (trainer.training_sample_count(), trainer.test_sample_count())
        };

        let runtime = if training == 0 || test == 0 {
            Err(ClientErr::NoData { training, test })
        } else {
            Handle::try_current().map_err(|_| ClientErr::NoRuntime)
        };

        let runtime = match runtime {
            Ok(runtime) => runtime,
            Err(e) => {
                self.state = SessionState::Connected {
                    model,
                    trainer,
                    conn,
                };
                return Err(e);
            }
        };

        let telemetry = self.device_id.map(|device_id| {
            Telemetry::new(
                self.registry.clone(),
                device_id,
                self.session_id,
                self.options.telemetry_timeout,
            )
        });

        let progress: Progress = Arc::new(progress);
        let handle = TrainingService::spawn(
            &runtime,
            model.clone(),
            trainer.clone(),
            conn,
            progress,
            telemetry,
        );

        info!("session running, {training} training and {test} test samples");
        self.state = SessionState::Running {
            model,
            trainer,
            handle: handle.clone(),
        };

        Ok(handle)
    }

    /// Reports fit and evaluate rounds under `device_id` for sessions started afterwards.
    pub fn enable_telemetry(&mut self, device_id: i64) {
        self.device_id = Some(device_id);
    }

    pub fn disable_telemetry(&mut self) {
        self.device_id = None;
    }

    pub fn telemetry_enabled(&self) -> bool {
        self.device_id.is_some()
    }
}
