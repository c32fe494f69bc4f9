use std::{error::Error, fmt, io};

use comms::CodecErr;
use machine_learning::MlErr;

use crate::session::StateKind;

/// The client module's result type.
pub type Result<T> = std::result::Result<T, ClientErr>;

/// Client failures, from session setup through the running protocol.
#[derive(Debug)]
pub enum ClientErr {
    /// A session operation was called from a state that doesn't allow it.
    InvalidState {
        op: &'static str,
        expected: &'static [StateKind],
        actual: StateKind,
    },
    BackendUnavailable(reqwest::Error),
    NoData {
        training: usize,
        test: usize,
    },
    LayerCountMismatch {
        expected: usize,
        got: usize,
    },
    UnsupportedTensorType(String),
    MalformedTensor {
        layer: usize,
        len: usize,
    },
    UnknownInstruction {
        kind: u32,
    },
    Transport(io::Error),
    Trainer(MlErr),
    TelemetryDisabled,
    MissingSessionId,
    TelemetryTimeout,
    /// The session was closed while the operation was in flight.
    Closed,
    /// `start` was called outside of a tokio runtime.
    NoRuntime,
    Io(io::Error),
}

impl ClientErr {
    /// Whether this error ends a running session.
    ///
    /// Trainer failures only drop the instruction that caused them, telemetry
    /// failures never reach the protocol loop at all.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ClientErr::LayerCountMismatch { .. }
                | ClientErr::UnsupportedTensorType(_)
                | ClientErr::MalformedTensor { .. }
                | ClientErr::UnknownInstruction { .. }
                | ClientErr::Transport(_)
                | ClientErr::Closed
        )
    }
}

impl fmt::Display for ClientErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientErr::InvalidState {
                op,
                expected,
                actual,
            } => {
                write!(f, "{op} requires the session to be ")?;
                for (i, state) in expected.iter().enumerate() {
                    if i > 0 {
                        write!(f, " or ")?;
                    }
                    write!(f, "{state}")?;
                }
                write!(f, ", but it is {actual}")
            }
            ClientErr::BackendUnavailable(e) => write!(f, "backend unavailable: {e}"),
            ClientErr::NoData { training, test } => write!(
                f,
                "no data to train on: {training} training samples and {test} test samples"
            ),
            ClientErr::LayerCountMismatch { expected, got } => {
                write!(f, "layer count mismatch: got {got} tensors, expected {expected}")
            }
            ClientErr::UnsupportedTensorType(tag) => write!(f, "unsupported tensor type {tag:?}"),
            ClientErr::MalformedTensor { layer, len } => {
                write!(f, "tensor {layer} has {len} bytes, not a whole number of values")
            }
            ClientErr::UnknownInstruction { kind } => {
                write!(f, "unknown instruction of kind {kind}")
            }
            ClientErr::Transport(e) => write!(f, "transport error: {e}"),
            ClientErr::Trainer(e) => write!(f, "trainer error: {e}"),
            ClientErr::TelemetryDisabled => write!(f, "telemetry is disabled"),
            ClientErr::MissingSessionId => {
                write!(f, "no session id to report telemetry for, fetch a server assignment first")
            }
            ClientErr::TelemetryTimeout => write!(f, "telemetry report timed out"),
            ClientErr::Closed => write!(f, "the session was closed"),
            ClientErr::NoRuntime => {
                write!(f, "a session can only be started within a tokio runtime")
            }
            ClientErr::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl Error for ClientErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClientErr::BackendUnavailable(e) => Some(e),
            ClientErr::Transport(e) | ClientErr::Io(e) => Some(e),
            ClientErr::Trainer(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ClientErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<reqwest::Error> for ClientErr {
    fn from(value: reqwest::Error) -> Self {
        Self::BackendUnavailable(value)
    }
}

impl From<MlErr> for ClientErr {
    fn from(value: MlErr) -> Self {
        Self::Trainer(value)
    }
}

impl From<CodecErr> for ClientErr {
    fn from(value: CodecErr) -> Self {
        match value {
            CodecErr::UnsupportedTensorType(tag) => Self::UnsupportedTensorType(tag),
            CodecErr::LayerCountMismatch { expected, got } => {
                Self::LayerCountMismatch { expected, got }
            }
            CodecErr::MalformedTensor { layer, len } => Self::MalformedTensor { layer, len },
        }
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<ClientErr> for io::Error {
    fn from(value: ClientErr) -> Self {
        match value {
            ClientErr::Io(e) | ClientErr::Transport(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
