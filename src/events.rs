//! Translates connection and model lifecycle notifications into structured events.
//!
//! Every event is emitted as a [`tracing`] event whose `target` is the event category
//! ([`CONNECTION_CATEGORY`] or [`MODEL_CATEGORY`]) and which carries a stable numeric
//! `event_id`. Levels per category are therefore tuned with the subscriber's filter
//! (e.g. `RUST_LOG=warren::model=debug,warren::connection=warn`).
//!
//! Events are also forwarded to the listeners registered with
//! [`WarrenBuilder::on_event`](crate::WarrenBuilder::on_event).
use std::fmt;
use std::sync::Arc;

use tracing::Level;

use crate::identity::{ConnectionId, ModelId};

/// Category of connection lifecycle events.
pub const CONNECTION_CATEGORY: &str = "warren::connection";
/// Category of model lifecycle events.
pub const MODEL_CATEGORY: &str = "warren::model";

/// Stable numeric identifier of a [`LifecycleEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum EventId {
    ConnectionCreated = 1000,
    ConnectionBlocked = 1001,
    ConnectionUnblocked = 1002,
    ConnectionShutdown = 1003,
    ModelCreated = 2000,
    ModelReturned = 2001,
    ModelBootstrapError = 2002,
}

impl EventId {
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// Something that happened to a connection or a model.
#[derive(Clone, Debug)]
pub enum LifecycleEvent {
    ConnectionCreated {
        connection: ConnectionId,
    },
    ConnectionBlocked {
        connection: ConnectionId,
        reason: String,
    },
    ConnectionUnblocked {
        connection: ConnectionId,
    },
    ConnectionShutdown {
        connection: ConnectionId,
        reason: String,
    },
    ModelCreated {
        model: ModelId,
        connection: ConnectionId,
    },
    /// A model went back to its pool (`returned: true`) or was discarded (`returned: false`).
    ModelReturned {
        model: ModelId,
        returned: bool,
    },
    ModelBootstrapError {
        model: ModelId,
        /// The bootstrap failure, including its chain of causes.
        error: String,
    },
}

impl LifecycleEvent {
    pub fn id(&self) -> EventId {
        match self {
            Self::ConnectionCreated { .. } => EventId::ConnectionCreated,
            Self::ConnectionBlocked { .. } => EventId::ConnectionBlocked,
            Self::ConnectionUnblocked { .. } => EventId::ConnectionUnblocked,
            Self::ConnectionShutdown { .. } => EventId::ConnectionShutdown,
            Self::ModelCreated { .. } => EventId::ModelCreated,
            Self::ModelReturned { .. } => EventId::ModelReturned,
            Self::ModelBootstrapError { .. } => EventId::ModelBootstrapError,
        }
    }

    pub fn category(&self) -> &'static str {
        match self {
            Self::ConnectionCreated { .. }
            | Self::ConnectionBlocked { .. }
            | Self::ConnectionUnblocked { .. }
            | Self::ConnectionShutdown { .. } => CONNECTION_CATEGORY,
            Self::ModelCreated { .. }
            | Self::ModelReturned { .. }
            | Self::ModelBootstrapError { .. } => MODEL_CATEGORY,
        }
    }

    pub fn level(&self) -> Level {
        match self {
            Self::ConnectionCreated { .. } | Self::ConnectionUnblocked { .. } => Level::INFO,
            Self::ConnectionBlocked { .. } | Self::ConnectionShutdown { .. } => Level::WARN,
            Self::ModelCreated { .. } | Self::ModelReturned { .. } => Level::DEBUG,
            Self::ModelBootstrapError { .. } => Level::ERROR,
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionCreated { connection } => {
                write!(f, "Connection {connection} created")
            }
            Self::ConnectionBlocked { connection, reason } => {
                write!(f, "Connection {connection} blocked: {reason}")
            }
            Self::ConnectionUnblocked { connection } => {
                write!(f, "Connection {connection} unblocked")
            }
            Self::ConnectionShutdown { connection, reason } => {
                write!(f, "Connection {connection} shut down: {reason}")
            }
            Self::ModelCreated { model, connection } => {
                write!(f, "Model {model} created on connection {connection}")
            }
            Self::ModelReturned { model, returned } => {
                write!(f, "Model {model} returned to pool: {returned}")
            }
            Self::ModelBootstrapError { model, error } => {
                write!(f, "Failed to bootstrap model {model}: {error}")
            }
        }
    }
}

/// Callback invoked for every emitted [`LifecycleEvent`].
pub type EventListener = Arc<dyn Fn(&LifecycleEvent) + Send + Sync + 'static>;

/// Emits [`LifecycleEvent`]s to `tracing` and to the registered listeners.
#[derive(Clone)]
pub struct EventBridge {
    listeners: Arc<[EventListener]>,
}

impl EventBridge {
    pub fn new(listeners: Vec<EventListener>) -> Self {
        Self {
            listeners: listeners.into(),
        }
    }

    pub fn emit(&self, event: LifecycleEvent) {
        log(&event);
        for listener in self.listeners.iter() {
            listener(&event);
        }
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl fmt::Debug for EventBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBridge")
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

// `tracing` needs the target and the level to be constants at the callsite.
fn log(event: &LifecycleEvent) {
    let event_id = event.id().code();
    match event {
        LifecycleEvent::ConnectionCreated { connection } => tracing::info!(
            target: CONNECTION_CATEGORY,
            event_id,
            %connection,
            "{event}"
        ),
        LifecycleEvent::ConnectionBlocked { connection, .. } => tracing::warn!(
            target: CONNECTION_CATEGORY,
            event_id,
            %connection,
            "{event}"
        ),
        LifecycleEvent::ConnectionUnblocked { connection } => tracing::info!(
            target: CONNECTION_CATEGORY,
            event_id,
            %connection,
            "{event}"
        ),
        LifecycleEvent::ConnectionShutdown { connection, .. } => tracing::warn!(
            target: CONNECTION_CATEGORY,
            event_id,
            %connection,
            "{event}"
        ),
        LifecycleEvent::ModelCreated { model, connection } => tracing::debug!(
            target: MODEL_CATEGORY,
            event_id,
            %model,
            %connection,
            "{event}"
        ),
        LifecycleEvent::ModelReturned { model, returned } => tracing::debug!(
            target: MODEL_CATEGORY,
            event_id,
            %model,
            returned,
            "{event}"
        ),
        LifecycleEvent::ModelBootstrapError { model, .. } => tracing::error!(
            target: MODEL_CATEGORY,
            event_id,
            %model,
            "{event}"
        ),
    }
}
