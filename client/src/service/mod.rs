//! The protocol loop of a running session.

mod handle;
mod telemetry;

use std::{io, sync::Arc};

use comms::{
    ParamCodec,
    msg::{ClientMsg, ServerMsg},
    specs::{config::Scalar, model::ModelDescriptor},
};
use log::{debug, error, info};
use machine_learning::Trainer;
use tokio::{runtime::Handle, sync::watch};

use handle::Latch;
pub use handle::{ServiceHandle, ServiceOutcome};
pub(crate) use telemetry::Telemetry;
use telemetry::{TelemetryJobs, now_millis};

use crate::{ClientErr, Result, session::TrainerHandle, transport::Connection};

/// Receives a human readable status line after every stage of an instruction.
pub type Progress = Arc<dyn Fn(&str) + Send + Sync>;

const DEFAULT_LOCAL_EPOCHS: usize = 1;

/// What the loop does after an instruction was handled.
enum Step {
    Continue,
    Reconnect,
}

/// Owns the connection to the training server and answers its instructions,
/// one at a time, with the session's trainer.
pub(crate) struct TrainingService<T: Trainer> {
    model: ModelDescriptor,
    trainer: TrainerHandle<T>,
    conn: Connection,
    progress: Progress,
    telemetry: Option<Telemetry>,
    jobs: TelemetryJobs,
    latch: Arc<Latch>,
}

impl<T: Trainer> TrainingService<T> {
    /// Spawns the protocol loop on `runtime`.
    ///
    /// # Arguments
    /// * `runtime` - The runtime to run the loop on.
    /// * `model` - The session's model, its layer count is checked on every exchange.
    /// * `trainer` - The trainer to answer with.
    /// * `conn` - The open connection to the training server.
    /// * `progress` - The caller's status callback.
    /// * `telemetry` - Where to report fit and evaluate rounds, if anywhere.
    ///
    /// # Returns
    /// The handle to wait for or close the session.
    pub fn spawn(
        runtime: &Handle,
        model: ModelDescriptor,
        trainer: TrainerHandle<T>,
        conn: Connection,
        progress: Progress,
        telemetry: Option<Telemetry>,
    ) -> ServiceHandle {
        let latch = Arc::new(Latch::default());
        let (finished_tx, finished_rx) = watch::channel(None);

        let service = Self {
            model,
            trainer,
            conn,
            progress,
            telemetry,
            jobs: TelemetryJobs::default(),
            latch: latch.clone(),
        };

        runtime.spawn(service.run(finished_tx));
        ServiceHandle::new(latch, finished_rx)
    }

    /// Runs the receive loop and then the shutdown sequence, which is only
    /// ever run here so it happens exactly once.
    async fn run(mut self, finished: watch::Sender<Option<ServiceOutcome>>) {
        info!("training session with {} started", self.conn.peer());
        let outcome = self.receive_loop().await;

        match &outcome {
            ServiceOutcome::Failed(e) => error!("training session failed: {e}"),
            other => info!("training session ended: {other:?}"),
        }

        // Wakes an instruction still waiting on the trainer, a no-op after `close`.
        self.latch.fire();

        let Self { conn, jobs, .. } = self;
        conn.close().await;
        jobs.join_all().await;

        finished.send_replace(Some(outcome));
    }

    async fn receive_loop(&mut self) -> ServiceOutcome {
        let mut rx_buf = Vec::new();

        loop {
            let received = tokio::select! {
                _ = self.latch.fired() => return ServiceOutcome::Closed,
                received = self.conn.rx.recv_into::<ServerMsg>(&mut rx_buf) => received,
            };

            let msg = match received {
                Ok(msg) => msg,
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    return ServiceOutcome::ServerClosed;
                }
                Err(e) => return ServiceOutcome::Failed(Arc::new(ClientErr::Transport(e))),
            };

            let name = msg.name();
            debug!("received {name} instruction");

            match self.handle(msg).await {
                Ok(Step::Continue) => {}
                Ok(Step::Reconnect) => return ServiceOutcome::Reconnect,
                Err(ClientErr::Closed) => return ServiceOutcome::Closed,
                Err(e) if e.is_fatal() => return ServiceOutcome::Failed(Arc::new(e)),
                Err(e) => error!("failed to handle {name} instruction: {e}"),
            }
        }
    }

    async fn handle(&mut self, msg: ServerMsg<'_>) -> Result<Step> {
        match msg {
            ServerMsg::GetParameters => {
                self.report("Handling GetParameters message from the server.");

                let trainer = self.trainer.clone();
                let params =
                    run_blocking(&self.latch, move || Ok(trainer.lock().get_parameters())).await?;

                let parameters = ParamCodec::encode(&params);
                self.reply(&ClientMsg::ParametersRes { parameters }).await?;
            }
            ServerMsg::Fit { parameters, config } => {
                self.report("Handling Fit request from the server.");

                let layers = ParamCodec::decode_layers(&parameters, self.layer_count())?;
                let epochs = config
                    .get("local_epochs")
                    .and_then(Scalar::as_count)
                    .unwrap_or(DEFAULT_LOCAL_EPOCHS);
                let batch_size = config.get("batch_size").and_then(Scalar::as_count);
                debug!("fitting for {epochs} epochs, batch size {batch_size:?}");

                let start = now_millis();
                let trainer = self.trainer.clone();
                let progress = self.progress.clone();

                let (params, num_examples) = run_blocking(&self.latch, move || {
                    let mut trainer = trainer.lock();
                    trainer.update_parameters(layers)?;
                    trainer.fit(epochs, batch_size, &mut |losses| {
                        let avg = losses.iter().sum::<f32>() / losses.len().max(1) as f32;
                        progress(&format!("Average loss: {avg}."));
                    })?;

                    Ok((trainer.get_parameters(), trainer.training_sample_count()))
                })
                .await?;
                let end = now_millis();

                let msg = ClientMsg::FitRes {
                    parameters: ParamCodec::encode(&params),
                    num_examples: num_examples as u64,
                };
                self.reply(&msg).await?;

                if let Some(telemetry) = &self.telemetry {
                    self.jobs.launch("fit", telemetry.fit(start, end));
                }
            }
            ServerMsg::Evaluate { parameters, .. } => {
                self.report("Handling Evaluate request from the server");

                let layers = ParamCodec::decode_layers(&parameters, self.layer_count())?;

                let start = now_millis();
                let trainer = self.trainer.clone();

                let (loss, accuracy, test_size) = run_blocking(&self.latch, move || {
                    let mut trainer = trainer.lock();
                    trainer.update_parameters(layers)?;
                    let (loss, accuracy) = trainer.evaluate()?;

                    Ok((loss, accuracy, trainer.test_sample_count()))
                })
                .await?;
                let end = now_millis();

                self.report(&format!("Test Accuracy after this round = {accuracy}"));

                let msg = ClientMsg::EvaluateRes {
                    loss,
                    num_examples: test_size as u64,
                };
                self.reply(&msg).await?;

                if let Some(telemetry) = &self.telemetry {
                    let report = telemetry.evaluate(start, end, loss, accuracy, test_size);
                    self.jobs.launch("evaluate", report);
                }
            }
            ServerMsg::Reconnect => {
                info!("server asked to reconnect");
                return Ok(Step::Reconnect);
            }
            ServerMsg::Unknown { kind } => return Err(ClientErr::UnknownInstruction { kind }),
        }

        Ok(Step::Continue)
    }

    fn layer_count(&self) -> usize {
        self.model.layer_sizes.len()
    }

    fn report(&self, status: &str) {
        (self.progress)(status);
    }

    async fn reply(&mut self, msg: &ClientMsg<'_>) -> Result<()> {
        self.conn.tx.send(msg).await.map_err(ClientErr::Transport)?;
        self.report("Response sent to the server");
        Ok(())
    }
}

/// Runs `f` off the runtime's worker threads, giving up if the latch fires meanwhile.
async fn run_blocking<R, F>(latch: &Latch, f: F) -> Result<R>
where
    F: FnOnce() -> Result<R> + Send + 'static,
    R: Send + 'static,
{
    let task = tokio::task::spawn_blocking(f);

    tokio::select! {
        _ = latch.fired() => Err(ClientErr::Closed),
        res = task => res.map_err(|e| ClientErr::Io(io::Error::other(e)))?,
    }
}
