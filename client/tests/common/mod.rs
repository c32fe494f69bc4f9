#![allow(dead_code)]

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use client::{
    ClientErr, Connection, ModelRegistry, ServiceHandle, ServiceOutcome, Session, SessionOptions,
    TrainerHandle,
};
use comms::{
    OnoReceiver, OnoSender,
    msg::{ClientMsg, ServerMsg},
    specs::{
        model::ModelDescriptor,
        server::ServerAssignment,
        telemetry::{EvaluateTelemetry, FitTelemetry},
    },
};
use machine_learning::{MlErr, Trainer, TrainerBuilder};
use parking_lot::Mutex;
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

pub const LAYER_SIZES: [usize; 2] = [16, 16];
pub const TRAINING: usize = 100;
pub const TEST: usize = 20;

pub fn descriptor() -> ModelDescriptor {
    ModelDescriptor {
        id: 1,
        name: "toy".into(),
        storage_location: "/static/toy.bin".into(),
        layer_sizes: LAYER_SIZES.to_vec(),
    }
}

/// Two layers of four floats, `[0, 1, 2, 3]` and `[4, 5, 6, 7]`.
pub fn model_buffer() -> Vec<u8> {
    let values: Vec<f32> = (0..8).map(|v| v as f32).collect();
    f32_bytes(&values)
}

fn f32_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

#[derive(Debug)]
pub struct StubTrainer {
    pub params: Vec<Vec<f32>>,
    pub training: usize,
    pub test: usize,
    pub fail_evaluate: bool,
    epochs: Arc<Mutex<Vec<usize>>>,
}

impl Trainer for StubTrainer {
    fn get_parameters(&self) -> Vec<Vec<f32>> {
        self.params.clone()
    }

    fn update_parameters(&mut self, params: Vec<Vec<f32>>) -> machine_learning::Result<()> {
        if params.len() != self.params.len() {
            return Err(MlErr::SizeMismatch {
                a: "received layers",
                b: "stub layers",
                got: params.len(),
                expected: self.params.len(),
            });
        }

        self.params = params;
        Ok(())
    }

    fn fit(
        &mut self,
        epochs: usize,
        _batch_size: Option<usize>,
        on_loss: &mut dyn FnMut(&[f32]),
    ) -> machine_learning::Result<()> {
        self.epochs.lock().push(epochs);

        for _ in 0..epochs {
            self.params.iter_mut().flatten().for_each(|p| *p += 1.0);
            on_loss(&[1.0, 3.0]);
        }

        Ok(())
    }

    fn evaluate(&mut self) -> machine_learning::Result<(f32, f32)> {
        if self.fail_evaluate {
            return Err(MlErr::EmptyDataset("test"));
        }

        Ok((0.5, 0.75))
    }

    fn training_sample_count(&self) -> usize {
        self.training
    }

    fn test_sample_count(&self) -> usize {
        self.test
    }
}

/// Builds `StubTrainer`s without samples, recording the epochs of every fit.
#[derive(Default)]
pub struct StubBuilder {
    pub epochs: Arc<Mutex<Vec<usize>>>,
}

impl TrainerBuilder for StubBuilder {
    type Trainer = StubTrainer;

    fn build(&self, model: &ModelDescriptor, buffer: &[u8]) -> machine_learning::Result<StubTrainer> {
        let expected: usize = model.layer_sizes.iter().sum();
        if buffer.len() != expected {
            return Err(MlErr::InvalidModelBuffer {
                got: buffer.len(),
                expected,
            });
        }

        let mut values = comms::f32s_from_le(buffer).into_iter();

        let params: Vec<Vec<f32>> = model
            .layer_sizes
            .iter()
            .map(|size| values.by_ref().take(size / 4).collect())
            .collect();

        Ok(StubTrainer {
            params,
            training: 0,
            test: 0,
            fail_evaluate: false,
            epochs: self.epochs.clone(),
        })
    }
}

/// Records every telemetry report it gets.
pub struct StubRegistry {
    pub session_id: Option<i64>,
    pub port: Option<u16>,
    /// Fit reports never complete.
    pub hang_fits: bool,
    pub fits: Mutex<Vec<FitTelemetry>>,
    pub evaluates: Mutex<Vec<EvaluateTelemetry>>,
    pub downloads: AtomicUsize,
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self {
            session_id: Some(11),
            port: Some(8080),
            hang_fits: false,
            fits: Mutex::default(),
            evaluates: Mutex::default(),
            downloads: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ModelRegistry for StubRegistry {
    async fn advertise(&self, _data_type: &str) -> client::Result<ModelDescriptor> {
        Ok(descriptor())
    }

    async fn server_assignment(
        &self,
        _model_id: i64,
        _start_fresh: bool,
    ) -> client::Result<ServerAssignment> {
        Ok(ServerAssignment {
            status: "started".into(),
            session_id: self.session_id,
            port: self.port,
        })
    }

    async fn report_fit(&self, event: FitTelemetry) -> client::Result<()> {
        if self.hang_fits {
            std::future::pending::<()>().await;
        }

        self.fits.lock().push(event);
        Ok(())
    }

    async fn report_evaluate(&self, event: EvaluateTelemetry) -> client::Result<()> {
        self.evaluates.lock().push(event);
        Ok(())
    }

    async fn download(&self, _location: &str) -> client::Result<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(model_buffer())
    }
}

/// The training server's side of an in-memory connection.
pub struct MockServer {
    rx: OnoReceiver<ReadHalf<DuplexStream>>,
    tx: OnoSender<WriteHalf<DuplexStream>>,
    buf: Vec<u8>,
}

impl MockServer {
    pub async fn send(&mut self, msg: &ServerMsg<'_>) {
        self.tx.send(msg).await.unwrap();
    }

    pub async fn recv(&mut self) -> io::Result<ClientMsg<'_>> {
        tokio::time::timeout(Duration::from_secs(5), self.rx.recv_into(&mut self.buf))
            .await
            .expect("no response from the client")
    }
}

/// An in-memory connection and the server's side of it.
pub fn connection() -> (Connection, MockServer) {
    let (client, server) = tokio::io::duplex(1 << 16);
    let (rx, tx) = tokio::io::split(server);
    let (rx, tx) = comms::channel(rx, tx);

    let server = MockServer {
        rx,
        tx,
        buf: Vec::new(),
    };

    (
        Connection::from_stream(client, "mock", comms::DEFAULT_MAX_MSG_SIZE),
        server,
    )
}

/// An in-memory connection and the raw stream of the server's side, for frames
/// the `comms` channel would never write.
pub fn raw_connection() -> (Connection, DuplexStream) {
    let (client, server) = tokio::io::duplex(1 << 16);
    (
        Connection::from_stream(client, "mock", comms::DEFAULT_MAX_MSG_SIZE),
        server,
    )
}

pub type Progress = Arc<Mutex<Vec<String>>>;

pub struct Fixture {
    pub session: Session<StubBuilder>,
    pub registry: Arc<StubRegistry>,
    pub epochs: Arc<Mutex<Vec<usize>>>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_registry(StubRegistry::default())
    }

    pub fn with_registry(registry: StubRegistry) -> Self {
        let options = SessionOptions {
            telemetry_timeout: Duration::from_secs(1),
            ..Default::default()
        };

        Self::with_options(registry, options)
    }

    pub fn with_options(registry: StubRegistry, options: SessionOptions) -> Self {
        let registry = Arc::new(registry);
        let builder = StubBuilder::default();
        let epochs = builder.epochs.clone();

        let session = Session::new(registry.clone(), builder, options);

        Self {
            session,
            registry,
            epochs,
        }
    }

    /// Fetches the model and opens an in-memory connection.
    pub async fn connect(&mut self) -> (TrainerHandle<StubTrainer>, MockServer) {
        self.session.fetch_model("toy").await.unwrap();

        let (conn, server) = connection();
        let trainer = self
            .session
            .open_session_with(&model_buffer(), conn)
            .unwrap();

        (trainer, server)
    }

    /// Connects, loads samples and starts the session.
    pub async fn running(&mut self) -> (ServiceHandle, MockServer, Progress) {
        let (trainer, server) = self.connect().await;
        load_samples(&trainer);

        let progress = Progress::default();
        let sink = progress.clone();
        let handle = self
            .session
            .start(move |status| sink.lock().push(status.to_string()))
            .unwrap();

        (handle, server, progress)
    }
}

pub fn load_samples(trainer: &TrainerHandle<StubTrainer>) {
    let mut trainer = trainer.lock();
    trainer.training = TRAINING;
    trainer.test = TEST;
}

/// Waits for the session to shut down, failing the test if it doesn't.
pub async fn finished(handle: &ServiceHandle) -> ServiceOutcome {
    tokio::time::timeout(Duration::from_secs(5), handle.wait())
        .await
        .expect("the session did not finish")
}

pub fn failure(outcome: ServiceOutcome) -> Arc<ClientErr> {
    match outcome {
        ServiceOutcome::Failed(e) => e,
        other => panic!("expected a failure, got {other:?}"),
    }
}
