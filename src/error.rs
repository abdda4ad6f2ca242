use crate::identity::{ConnectionId, ModelId};

/// Errors returned when resolving connections or borrowing models.
///
/// Failures are never retried by `warren`: they are returned to the caller that triggered
/// the operation, and the next call starts from a clean slate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid configuration")]
    Configuration(#[source] anyhow::Error),
    #[error("No connection has been registered as `{0}`")]
    UnknownConnection(ConnectionId),
    #[error("No model has been registered as `{0}`")]
    UnknownModel(ModelId),
    #[error("Failed to connect to the broker for connection `{connection}`")]
    Connect {
        connection: ConnectionId,
        #[source]
        source: anyhow::Error,
    },
    #[error("Failed to open a channel for model `{model}`")]
    CreateModel {
        model: ModelId,
        #[source]
        source: anyhow::Error,
    },
    #[error("The pool for model `{0}` has been closed")]
    PoolClosed(ModelId),
    #[error("Failed to bootstrap model `{model}`")]
    Bootstrap {
        model: ModelId,
        #[source]
        source: anyhow::Error,
    },
}

impl Error {
    pub(crate) fn configuration(message: impl std::fmt::Display) -> Self {
        Self::Configuration(anyhow::anyhow!("{message}"))
    }
}
