use std::collections::HashMap;
use std::sync::Arc;

use crate::broker::Broker;
use crate::connection::{ConnectionRegistry, SettingsCallback};
use crate::events::{EventBridge, EventListener, LifecycleEvent};
use crate::identity::{ConnectionId, ModelId};
use crate::model::{Bootstrap, ModelBinding, ModelFactory};
use crate::pool::{LazyModel, ModelPool, PoolSettings, PooledModel};
use crate::Error;

/// `Warren` owns the connections and the model pools of an application.
///
/// Connections and models are registered once, at startup, using [`Warren::builder`].
/// Nothing is opened until it is needed: the first borrow of a model opens the connection
/// it is bound to, and every later borrow reuses it.
///
/// `Warren` is cheap to clone: all clones share the same connections and pools.
///
/// # Example
///
/// ```rust,no_run
/// use warren::amqp::bootstrap::DeclareExchange;
/// use warren::amqp::configuration::ConnectionSettings;
/// use warren::amqp::{ExchangeKind, LapinBroker};
/// use warren::{PoolSettings, Warren};
///
/// pub fn get_warren() -> Result<Warren<LapinBroker>, warren::Error> {
///     Warren::builder(LapinBroker)
///         .connection("C1", || {
///             Ok(ConnectionSettings {
///                 client_provided_name: Some("orders-api".into()),
///                 ..Default::default()
///             })
///         })
///         .model("Exc1", "C1", DeclareExchange::durable("myExc", ExchangeKind::Topic))
///         .pool_settings("Exc1", PoolSettings { max_outstanding: Some(32) })
///         .on_event(|event| println!("{event}"))
///         .build()
/// }
/// ```
pub struct Warren<B: Broker> {
    connections: Arc<ConnectionRegistry<B>>,
    pools: Arc<HashMap<ModelId, ModelPool<B>>>,
}

impl<B: Broker> Clone for Warren<B> {
    fn clone(&self) -> Self {
        Self {
            connections: Arc::clone(&self.connections),
            pools: Arc::clone(&self.pools),
        }
    }
}

impl<B: Broker> Warren<B> {
    /// Start building a [`Warren`] on top of a [`Broker`].
    pub fn builder(broker: B) -> WarrenBuilder<B> {
        WarrenBuilder::new(broker)
    }

    /// The shared connection registered as `id`, opened on first use.
    pub async fn connection(
        &self,
        id: impl Into<ConnectionId>,
    ) -> Result<Arc<B::Connection>, Error> {
        self.connections.get_or_create(&id.into()).await
    }

    /// The registry holding every registered connection, e.g. to inspect which ones are open.
    pub fn connections(&self) -> &ConnectionRegistry<B> {
        &self.connections
    }

    /// The pool of `model`, to borrow and give back models by hand.
    pub fn pool(&self, model: impl Into<ModelId>) -> Result<ModelPool<B>, Error> {
        let model = model.into();
        self.pools
            .get(&model)
            .cloned()
            .ok_or(Error::UnknownModel(model))
    }

    /// Borrow a `model` that goes back to its pool when dropped.
    pub async fn get(&self, model: impl Into<ModelId>) -> Result<PooledModel<B>, Error> {
        self.pool(model)?.get().await
    }

    /// A scoped `model` that is only borrowed when first accessed.
    pub fn lazy(&self, model: impl Into<ModelId>) -> Result<LazyModel<B>, Error> {
        Ok(self.pool(model)?.lazy())
    }

    /// Close every pool, then every connection.
    pub async fn close(&self) {
        for pool in self.pools.values() {
            pool.close().await;
        }
        self.connections.close().await;
    }
}

/// A builder for [`Warren`]: the registration surface for connections and models.
///
/// Use [`Warren::builder`] as entrypoint.
pub struct WarrenBuilder<B: Broker> {
    broker: B,
    connections: Vec<(ConnectionId, SettingsCallback<B::Settings>)>,
    models: Vec<(ModelId, ModelBinding<B>)>,
    pool_settings: Vec<(ModelId, PoolSettings)>,
    listeners: Vec<EventListener>,
}

impl<B: Broker> WarrenBuilder<B> {
    fn new(broker: B) -> Self {
        Self {
            broker,
            connections: vec![],
            models: vec![],
            pool_settings: vec![],
            listeners: vec![],
        }
    }

    /// Register a connection.
    ///
    /// `settings` is invoked when the connection is first needed, and again if a previous
    /// attempt to connect failed.
    #[must_use]
    pub fn connection<F>(mut self, id: impl Into<ConnectionId>, settings: F) -> Self
    where
        F: Fn() -> Result<B::Settings, anyhow::Error> + Send + Sync + 'static,
    {
        let settings: SettingsCallback<B::Settings> = Arc::new(settings);
        self.connections.push((id.into(), settings));
        self
    }

    /// Register a model, bound to `connection`.
    ///
    /// `bootstrap` runs once against every new model, before it is handed out.
    #[must_use]
    pub fn model<A>(
        mut self,
        id: impl Into<ModelId>,
        connection: impl Into<ConnectionId>,
        bootstrap: A,
    ) -> Self
    where
        A: Bootstrap<B::Model>,
    {
        let binding = ModelBinding {
            connection: connection.into(),
            bootstrap: Arc::new(bootstrap),
        };
        self.models.push((id.into(), binding));
        self
    }

    /// Configure the pool of a registered model.
    ///
    /// Pools are unbounded by default.
    #[must_use]
    pub fn pool_settings(mut self, model: impl Into<ModelId>, settings: PoolSettings) -> Self {
        self.pool_settings.push((model.into(), settings));
        self
    }

    /// Get notified of every [`LifecycleEvent`], on top of it being logged.
    #[must_use]
    pub fn on_event<F>(mut self, listener: F) -> Self
    where
        F: Fn(&LifecycleEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Finalise the builder and get an instance of [`Warren`].
    ///
    /// Fails if an identity is registered twice, if a model is bound to a connection that was
    /// not registered, or if pool settings are invalid.
    pub fn build(self) -> Result<Warren<B>, Error> {
        let mut connections = HashMap::with_capacity(self.connections.len());
        for (id, settings) in self.connections {
            if connections.insert(id.clone(), settings).is_some() {
                return Err(Error::configuration(format!(
                    "connection `{id}` is registered more than once"
                )));
            }
        }

        let mut bindings = HashMap::with_capacity(self.models.len());
        for (id, binding) in self.models {
            if !connections.contains_key(&binding.connection) {
                return Err(Error::configuration(format!(
                    "model `{id}` is bound to connection `{}`, which is not registered",
                    binding.connection
                )));
            }
            if bindings.insert(id.clone(), binding).is_some() {
                return Err(Error::configuration(format!(
                    "model `{id}` is registered more than once"
                )));
            }
        }

        let mut pool_settings = HashMap::new();
        for (id, settings) in self.pool_settings {
            if !bindings.contains_key(&id) {
                return Err(Error::configuration(format!(
                    "pool settings provided for model `{id}`, which is not registered"
                )));
            }
            if settings.max_outstanding == Some(0) {
                return Err(Error::configuration(format!(
                    "the pool of model `{id}` must allow at least one outstanding model"
                )));
            }
            pool_settings.insert(id, settings);
        }

        let events = EventBridge::new(self.listeners);
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(self.broker),
            connections,
            events.clone(),
        ));
        let model_ids: Vec<ModelId> = bindings.keys().cloned().collect();
        let factory = Arc::new(ModelFactory::new(
            Arc::clone(&registry),
            bindings,
            events.clone(),
        ));
        let pools = model_ids
            .into_iter()
            .map(|id| {
                let settings = pool_settings.remove(&id).unwrap_or_default();
                let pool =
                    ModelPool::new(id.clone(), Arc::clone(&factory), &settings, events.clone());
                (id, pool)
            })
            .collect();

        Ok(Warren {
            connections: registry,
            pools: Arc::new(pools),
        })
    }
}
