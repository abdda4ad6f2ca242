//! The interface `warren` expects from a broker client library.
//!
//! `warren` does not speak AMQP itself: it only manages the lifecycle of connections and
//! channels ("models") handed out by a client library. [`Broker`], [`Connection`] and
//! [`Model`] describe what that library must provide.
//! An implementation on top of [`lapin`] lives in [`crate::amqp`].
use std::sync::Arc;

/// Whether a connection or a model can still be used.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Notifications raised by a broker connection over its lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The broker stopped accepting publishes on this connection (e.g. a resource alarm).
    Blocked { reason: String },
    /// The broker resumed accepting publishes.
    Unblocked,
    /// The connection has been shut down, either by the broker or because of a transport error.
    Shutdown { reason: String },
}

/// Callback invoked for every [`ConnectionEvent`] raised by a [`Connection`].
pub type ConnectionListener = Arc<dyn Fn(ConnectionEvent) + Send + Sync + 'static>;

/// Opens connections to a broker.
///
/// # Note
///
/// A `Broker` is not expected to cache anything: `warren` calls [`Broker::connect`] at most
/// once per registered connection and keeps the result around.
#[async_trait::async_trait]
pub trait Broker: Send + Sync + 'static {
    /// The parameters required to open a connection.
    type Settings: Send + Sync + 'static;

    /// A connection to the broker.
    type Connection: Connection<Model = Self::Model>;

    /// A channel opened on [`Self::Connection`].
    type Model: Model;

    /// Open a new connection.
    ///
    /// Fails if the broker cannot be reached or refuses the connection.
    async fn connect(&self, settings: &Self::Settings) -> Result<Self::Connection, anyhow::Error>;
}

/// A long-lived connection to the broker, shared across many models.
#[async_trait::async_trait]
pub trait Connection: Send + Sync + 'static {
    /// The channel type opened on this connection.
    type Model: Model;

    /// Open a new channel on this connection.
    async fn create_model(&self) -> Result<Self::Model, anyhow::Error>;

    /// Register a callback for blocked/unblocked/shutdown notifications.
    fn subscribe(&self, listener: ConnectionListener);

    /// An unhealthy connection is closed and replaced the next time it is asked for.
    fn status(&self) -> HealthStatus;

    /// Close the connection, releasing its resources on the broker.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// A short-lived channel opened on a [`Connection`].
#[async_trait::async_trait]
pub trait Model: Send + Sync + 'static {
    /// A model is recycled by the pool only while it reports itself as healthy.
    fn status(&self) -> HealthStatus;

    /// Close the model, releasing its resources on the broker.
    async fn close(&self) -> Result<(), anyhow::Error>;
}

/// assert it's object safe
type _CHECK = Box<dyn Connection<Model = Box<dyn Model>>>;

#[async_trait::async_trait]
impl<M: Model + ?Sized> Model for Box<M> {
    fn status(&self) -> HealthStatus {
        (**self).status()
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        (**self).close().await
    }
}
