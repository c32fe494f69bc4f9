use std::{fmt, sync::Arc};

use comms::specs::model::ModelDescriptor;
use parking_lot::Mutex;

use crate::{service::ServiceHandle, transport::Connection};

/// Shared access to the session's trainer.
///
/// The caller uses it to load samples before `start`, afterwards only the
/// protocol loop touches the parameters.
pub type TrainerHandle<T> = Arc<Mutex<T>>;

/// The lifecycle of a `Session`, each variant owns what its stage needs.
pub enum SessionState<T> {
    Uninitialized,
    WithModel(ModelDescriptor),
    Connected {
        model: ModelDescriptor,
        trainer: TrainerHandle<T>,
        conn: Connection,
    },
    Running {
        model: ModelDescriptor,
        trainer: TrainerHandle<T>,
        handle: ServiceHandle,
    },
}

impl<T> SessionState<T> {
    pub fn kind(&self) -> StateKind {
        match self {
            SessionState::Uninitialized => StateKind::Uninitialized,
            SessionState::WithModel(_) => StateKind::WithModel,
            SessionState::Connected { .. } => StateKind::Connected,
            SessionState::Running { .. } => StateKind::Running,
        }
    }

    /// The model descriptor, present from `WithModel` onwards.
    pub fn model(&self) -> Option<&ModelDescriptor> {
        match self {
            SessionState::Uninitialized => None,
            SessionState::WithModel(model)
            | SessionState::Connected { model, .. }
            | SessionState::Running { model, .. } => Some(model),
        }
    }
}

/// The payload-free tag of a `SessionState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    Uninitialized,
    WithModel,
    Connected,
    Running,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Uninitialized => "Uninitialized",
            StateKind::WithModel => "WithModel",
            StateKind::Connected => "Connected",
            StateKind::Running => "Running",
        };

        f.write_str(name)
    }
}
