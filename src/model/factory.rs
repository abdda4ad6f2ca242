use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::{Broker, Connection, Model};
use crate::connection::ConnectionRegistry;
use crate::events::{EventBridge, LifecycleEvent};
use crate::identity::{ConnectionId, ModelId};
use crate::model::Bootstrap;
use crate::Error;

/// What a [`ModelId`] is bound to: the connection its channels are opened on and the
/// action bootstrapping every new channel.
pub struct ModelBinding<B: Broker> {
    pub connection: ConnectionId,
    pub bootstrap: Arc<dyn Bootstrap<B::Model>>,
}

impl<B: Broker> Clone for ModelBinding<B> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            bootstrap: Arc::clone(&self.bootstrap),
        }
    }
}

/// `ModelFactory` opens new, bootstrapped models.
///
/// The underlying connection is resolved through the [`ConnectionRegistry`], which opens it
/// on first use.
pub struct ModelFactory<B: Broker> {
    connections: Arc<ConnectionRegistry<B>>,
    bindings: HashMap<ModelId, ModelBinding<B>>,
    events: EventBridge,
}

impl<B: Broker> ModelFactory<B> {
    pub(crate) fn new(
        connections: Arc<ConnectionRegistry<B>>,
        bindings: HashMap<ModelId, ModelBinding<B>>,
        events: EventBridge,
    ) -> Self {
        Self {
            connections,
            bindings,
            events,
        }
    }

    /// The connection `model` is bound to.
    pub fn connection_of(&self, model: &ModelId) -> Option<&ConnectionId> {
        self.bindings.get(model).map(|binding| &binding.connection)
    }

    /// Open a new channel for `model` and run its bootstrap action.
    ///
    /// If the bootstrap action fails, the channel is closed and the failure is returned:
    /// a half-configured channel never leaves the factory.
    #[tracing::instrument(name = "warren_create_model", skip_all, fields(model = %model))]
    pub async fn create_model(&self, model: &ModelId) -> Result<B::Model, Error> {
        let binding = self
            .bindings
            .get(model)
            .ok_or_else(|| Error::UnknownModel(model.clone()))?;

        let connection = self.connections.get_or_create(&binding.connection).await?;
        let instance = connection
            .create_model()
            .await
            .map_err(|source| Error::CreateModel {
                model: model.clone(),
                source,
            })?;

        if let Err(source) = binding.bootstrap.run(&instance).await {
            self.events.emit(LifecycleEvent::ModelBootstrapError {
                model: model.clone(),
                error: format!("{source:#}"),
            });
            if let Err(e) = instance.close().await {
                tracing::debug!(error = ?e, "Failed to close model after a bootstrap failure");
            }
            return Err(Error::Bootstrap {
                model: model.clone(),
                source,
            });
        }

        self.events.emit(LifecycleEvent::ModelCreated {
            model: model.clone(),
            connection: binding.connection.clone(),
        });
        Ok(instance)
    }
}
