use std::{
    future::Future,
    sync::Arc,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use comms::specs::telemetry::{EvaluateTelemetry, FitTelemetry};
use log::{debug, warn};
use tokio::task::JoinHandle;

use crate::{ClientErr, Result, registry::ModelRegistry};

/// Milliseconds since the unix epoch.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// The telemetry settings of one session, fixed when it starts.
#[derive(Clone)]
pub(crate) struct Telemetry {
    registry: Arc<dyn ModelRegistry>,
    device_id: i64,
    session_id: Option<i64>,
    timeout: Duration,
}

impl Telemetry {
    pub fn new(
        registry: Arc<dyn ModelRegistry>,
        device_id: i64,
        session_id: Option<i64>,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            device_id,
            session_id,
            timeout,
        }
    }

    /// A report of a fit round that ran between `start` and `end`.
    pub fn fit(&self, start: i64, end: i64) -> impl Future<Output = Result<()>> + Send + 'static {
        let this = self.clone();

        async move {
            let event = FitTelemetry {
                device_id: this.device_id,
                session_id: this.session_id.ok_or(ClientErr::MissingSessionId)?,
                start,
                end,
            };

            this.bounded(this.registry.report_fit(event)).await
        }
    }

    /// A report of an evaluate round that ran between `start` and `end`.
    pub fn evaluate(
        &self,
        start: i64,
        end: i64,
        loss: f32,
        accuracy: f32,
        test_size: usize,
    ) -> impl Future<Output = Result<()>> + Send + 'static {
        let this = self.clone();

        async move {
            let event = EvaluateTelemetry {
                device_id: this.device_id,
                session_id: this.session_id.ok_or(ClientErr::MissingSessionId)?,
                start,
                end,
                loss,
                accuracy,
                test_size,
            };

            this.bounded(this.registry.report_evaluate(event)).await
        }
    }

    async fn bounded(&self, report: impl Future<Output = Result<()>>) -> Result<()> {
        tokio::time::timeout(self.timeout, report)
            .await
            .map_err(|_| ClientErr::TelemetryTimeout)?
    }
}

/// The in-flight telemetry reports of a session.
///
/// Only the session's protocol task touches it.
#[derive(Default)]
pub(crate) struct TelemetryJobs {
    jobs: Vec<JoinHandle<()>>,
}

impl TelemetryJobs {
    /// Spawns `report` as a fire-and-forget job, dropping the finished ones first.
    ///
    /// A failed report is logged and goes no further.
    pub fn launch<F>(&mut self, what: &'static str, report: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.jobs.retain(|job| !job.is_finished());

        self.jobs.push(tokio::spawn(async move {
            match report.await {
                Ok(()) => debug!("{what} telemetry reported"),
                Err(e) => warn!("{what} telemetry report failed: {e}"),
            }
        }));
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Waits for every outstanding job to finish or fail.
    pub async fn join_all(self) {
        if self.jobs.is_empty() {
            return;
        }

        debug!("waiting for {} telemetry jobs", self.jobs.len());
        for res in futures::future::join_all(self.jobs).await {
            if let Err(e) = res {
                warn!("telemetry job did not complete: {e}");
            }
        }
    }
}
