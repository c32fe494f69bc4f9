use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use log::{info, warn};
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::ClientErr;

/// How a training session ended.
#[derive(Debug, Clone)]
pub enum ServiceOutcome {
    /// The server closed the stream.
    ServerClosed,
    /// The server asked the client to reconnect.
    Reconnect,
    /// The session was closed through its handle.
    Closed,
    /// A fatal error ended the session.
    Failed(Arc<ClientErr>),
}

impl ServiceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, ServiceOutcome::Failed(_))
    }
}

/// A single-fire latch, the first `fire` wins and wakes every waiter.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    fired: AtomicBool,
    token: CancellationToken,
}

impl Latch {
    /// Fires the latch.
    ///
    /// # Returns
    /// `true` only for the call that fired it.
    pub fn fire(&self) -> bool {
        let first = !self.fired.swap(true, Ordering::AcqRel);
        self.token.cancel();
        first
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Resolves once the latch has been fired.
    pub fn fired(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// The caller's handle on a running session.
///
/// Clones observe the same session.
#[derive(Debug, Clone)]
pub struct ServiceHandle {
    latch: Arc<Latch>,
    finished: watch::Receiver<Option<ServiceOutcome>>,
}

impl ServiceHandle {
    pub(crate) fn new(latch: Arc<Latch>, finished: watch::Receiver<Option<ServiceOutcome>>) -> Self {
        Self { latch, finished }
    }

    /// Waits until the session has shut down, its telemetry jobs included.
    pub async fn wait(&self) -> ServiceOutcome {
        let mut finished = self.finished.clone();

        let outcome = finished
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|outcome| (*outcome).clone());

        // The sender only goes away without an outcome if the session task panicked.
        outcome.unwrap_or(ServiceOutcome::Closed)
    }

    /// Same as `wait`, for callers outside of the async runtime.
    ///
    /// Must not be called from within the runtime's own threads.
    pub fn blocking_wait(&self) -> ServiceOutcome {
        futures::executor::block_on(self.wait())
    }

    /// Asks the session to shut down.
    ///
    /// Safe to call from anywhere and any number of times, the shutdown runs once.
    ///
    /// # Returns
    /// `true` if this call started the shutdown.
    pub fn close(&self) -> bool {
        if self.latch.fire() {
            info!("closing the training session");
            true
        } else {
            warn!("close called on a session that is already shutting down");
            false
        }
    }

    /// Whether the session has fully shut down.
    pub fn is_finished(&self) -> bool {
        self.finished.borrow().is_some()
    }
}
