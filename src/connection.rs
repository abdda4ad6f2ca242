//! One lazily created, shared connection per registered [`ConnectionId`].
use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::broker::{Broker, Connection, ConnectionEvent, HealthStatus};
use crate::events::{EventBridge, LifecycleEvent};
use crate::identity::ConnectionId;
use crate::Error;

/// Builds the parameters used to open a connection.
///
/// It is invoked when the connection is first needed, not when it is registered.
pub type SettingsCallback<S> = Arc<dyn Fn() -> Result<S, anyhow::Error> + Send + Sync + 'static>;

struct Slot<B: Broker> {
    settings: SettingsCallback<B::Settings>,
    connection: RwLock<Option<Arc<B::Connection>>>,
}

/// `ConnectionRegistry` owns the connections of every registered [`ConnectionId`].
///
/// The first caller asking for a connection opens it; every other caller gets the same
/// instance. Concurrent first calls are serialized so that a single connection is ever opened
/// per identity.
///
/// # Failures
///
/// If the connection cannot be opened, the error is returned to the caller and the identity
/// stays unbound: the next call tries again.
///
/// Connections that report themselves as [`HealthStatus::Unhealthy`] are replaced on the
/// next access.
pub struct ConnectionRegistry<B: Broker> {
    broker: Arc<B>,
    slots: HashMap<ConnectionId, Slot<B>>,
    events: EventBridge,
}

impl<B: Broker> ConnectionRegistry<B> {
    pub(crate) fn new(
        broker: Arc<B>,
        settings: HashMap<ConnectionId, SettingsCallback<B::Settings>>,
        events: EventBridge,
    ) -> Self {
        let slots = settings
            .into_iter()
            .map(|(id, settings)| {
                let slot = Slot {
                    settings,
                    connection: RwLock::new(None),
                };
                (id, slot)
            })
            .collect();
        Self {
            broker,
            slots,
            events,
        }
    }

    /// Is `id` a registered connection?
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.slots.contains_key(id)
    }

    /// Get the connection registered as `id`, opening it if needed.
    pub async fn get_or_create(&self, id: &ConnectionId) -> Result<Arc<B::Connection>, Error> {
        let slot = self
            .slots
            .get(id)
            .ok_or_else(|| Error::UnknownConnection(id.clone()))?;

        if let Some(connection) = healthy(&*slot.connection.read().await) {
            return Ok(connection);
        }

        let mut guard = slot.connection.write().await;
        // Someone else might have connected while we were waiting for the lock.
        if let Some(connection) = healthy(&*guard) {
            return Ok(connection);
        }
        if let Some(stale) = guard.take() {
            tracing::info!(connection = %id, "Replacing unhealthy connection");
            if let Err(e) = stale.close().await {
                tracing::debug!(connection = %id, error = ?e, "Failed to close stale connection");
            }
        }

        let connection = Arc::new(self.connect(id, slot).await?);
        *guard = Some(Arc::clone(&connection));
        Ok(connection)
    }

    /// Get the connection registered as `id`, if it has been opened already.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<B::Connection>> {
        self.slots.get(id)?.connection.read().await.clone()
    }

    async fn connect(&self, id: &ConnectionId, slot: &Slot<B>) -> Result<B::Connection, Error> {
        let settings = (slot.settings)().map_err(Error::Configuration)?;
        let connection = self
            .broker
            .connect(&settings)
            .await
            .map_err(|source| Error::Connect {
                connection: id.clone(),
                source,
            })?;

        let events = self.events.clone();
        let connection_id = id.clone();
        connection.subscribe(Arc::new(move |event: ConnectionEvent| {
            let connection = connection_id.clone();
            events.emit(match event {
                ConnectionEvent::Blocked { reason } => {
                    LifecycleEvent::ConnectionBlocked { connection, reason }
                }
                ConnectionEvent::Unblocked => LifecycleEvent::ConnectionUnblocked { connection },
                ConnectionEvent::Shutdown { reason } => {
                    LifecycleEvent::ConnectionShutdown { connection, reason }
                }
            });
        }));
        self.events.emit(LifecycleEvent::ConnectionCreated {
            connection: id.clone(),
        });
        Ok(connection)
    }

    /// Close every open connection.
    ///
    /// Identities are unbound: a later [`ConnectionRegistry::get_or_create`] opens a new connection.
    pub async fn close(&self) {
        for (id, slot) in &self.slots {
            let Some(connection) = slot.connection.write().await.take() else {
                continue;
            };
            if let Err(e) = connection.close().await {
                tracing::warn!(connection = %id, error = ?e, "Failed to close connection");
            }
        }
    }
}

fn healthy<C: Connection>(connection: &Option<Arc<C>>) -> Option<Arc<C>> {
    connection
        .as_ref()
        .filter(|c| c.status() == HealthStatus::Healthy)
        .cloned()
}
