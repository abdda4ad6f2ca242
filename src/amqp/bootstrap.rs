//! A collection of bootstrap actions for [`Channel`]s.
//!
//! ```
//! use warren::amqp::bootstrap::{Bind, DeclareExchange, DeclareQueue, Headers, RoutingKey};
//! use warren::amqp::ExchangeKind;
//!
//! // a model used to publish on a durable topic exchange
//! let bootstrap = DeclareExchange::durable("orders", ExchangeKind::Topic);
//! # drop(bootstrap);
//!
//! // a model used to consume from a queue bound to that exchange with a few routing keys
//! let bootstrap = Bind {
//!     exchange: DeclareExchange::durable("orders", ExchangeKind::Topic),
//!     queue: DeclareQueue::durable("orders.created"),
//!     binding: vec![RoutingKey::from("order.created"), RoutingKey::from("order.updated")],
//! };
//! # drop(bootstrap);
//!
//! // a queue bound to a headers exchange when all the headers match
//! let bootstrap = Bind {
//!     exchange: DeclareExchange::durable("payments", ExchangeKind::Headers),
//!     queue: DeclareQueue::durable("payments.eur.fr"),
//!     binding: Headers::All(vec![
//!         ("currency".to_owned(), "EUR".to_owned()),
//!         ("country".to_owned(), "FR".to_owned()),
//!     ]),
//! };
//! # drop(bootstrap);
//! ```
use std::collections::BTreeMap;

use crate::model::Bootstrap;
use amq_protocol_types::{AMQPValue, FieldTable, LongString, ShortString};
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::{Channel, ExchangeKind};

/// Declares an exchange.
#[derive(Clone, Debug)]
pub struct DeclareExchange {
    pub name: String,
    pub kind: ExchangeKind,
    /// Durable exchanges survive broker restarts.
    pub durable: bool,
}

impl DeclareExchange {
    pub fn durable(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: true,
        }
    }

    pub fn transient(name: impl Into<String>, kind: ExchangeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            durable: false,
        }
    }
}

#[async_trait::async_trait]
impl Bootstrap<Channel> for DeclareExchange {
    #[tracing::instrument(name = "rabbitmq_declare_exchange", skip(self, channel), fields(exchange = %self.name))]
    async fn run(&self, channel: &Channel) -> Result<(), anyhow::Error> {
        channel
            .exchange_declare(
                &self.name,
                self.kind.clone(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable: self.durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

/// Declares a queue.
#[derive(Clone, Debug)]
pub struct DeclareQueue {
    pub name: String,
    /// Durable queues survive broker restarts.
    pub durable: bool,
    /// Optional queue arguments, e.g. `x-dead-letter-exchange` or `x-max-priority`.
    pub arguments: FieldTable,
}

impl DeclareQueue {
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            arguments: FieldTable::default(),
        }
    }

    pub fn transient(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: false,
            arguments: FieldTable::default(),
        }
    }

    /// Enable [priority queue](https://www.rabbitmq.com/priority.html) support.
    ///
    /// Warning: queue arguments are immutable, changing the value requires rolling a new queue.
    #[must_use]
    pub fn with_max_priority(mut self, priority: u8) -> Self {
        self.arguments
            .insert("x-max-priority".into(), AMQPValue::ShortShortUInt(priority));
        self
    }
}

#[async_trait::async_trait]
impl Bootstrap<Channel> for DeclareQueue {
    #[tracing::instrument(name = "rabbitmq_declare_queue", skip(self, channel), fields(queue = %self.name))]
    async fn run(&self, channel: &Channel) -> Result<(), anyhow::Error> {
        channel
            .queue_declare(
                &self.name,
                QueueDeclareOptions {
                    passive: false,
                    durable: self.durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                self.arguments.clone(),
            )
            .await?;
        Ok(())
    }
}

/// Declares an exchange and a queue, then binds them together using the [`Binding`] method specified.
pub struct Bind<B: Binding> {
    pub exchange: DeclareExchange,
    pub queue: DeclareQueue,
    pub binding: B,
}

#[async_trait::async_trait]
impl<B: Binding> Bootstrap<Channel> for Bind<B> {
    async fn run(&self, channel: &Channel) -> Result<(), anyhow::Error> {
        self.exchange.run(channel).await?;
        self.queue.run(channel).await?;
        self.binding
            .bind(channel, &self.exchange.name, &self.queue.name)
            .await
    }
}

#[async_trait::async_trait]
/// Defines how to bind an exchange to a queue
///
/// Example implementations:
/// * [`Headers`] - binds the queue to a [header exchange](https://www.rabbitmq.com/tutorials/amqp-concepts.html#exchange-headers)
/// * [`RoutingKey`] - binds the queue to an exchange using a routing key.
/// * [`Vec<_>`] - binds the queue using many bindings, eg `Vec<RoutingKey>` will bind using many routing keys.
pub trait Binding: Send + Sync + 'static {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error>;
}

#[derive(Clone, Debug)]
/// Binds a header exchange to a queue.
///
/// The header values are registered as `(Key, Value)` pairs.
pub enum Headers {
    /// All the headers must match for the message to be routed
    All(Vec<(String, String)>),
    /// Any of the headers must match for the message to be routed
    Any(Vec<(String, String)>),
}

impl Headers {
    fn arguments(&self) -> FieldTable {
        let (headers, match_type) = match self {
            Self::All(headers) => (headers, LongString::from("all")),
            Self::Any(headers) => (headers, LongString::from("any")),
        };
        let mut args: BTreeMap<ShortString, AMQPValue> = headers
            .iter()
            .cloned()
            .map(|(key, value)| (key.into(), LongString::from(value).into()))
            .collect();
        args.insert("x-match".into(), match_type.into());
        args.into()
    }
}

#[async_trait::async_trait]
impl Binding for Headers {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        channel
            .queue_bind(
                queue_name,
                exchange_name,
                "",
                QueueBindOptions { nowait: false },
                self.arguments(),
            )
            .await?;
        Ok(())
    }
}

/// Binds an exchange to a queue using a routing key.
#[derive(Clone, Debug)]
pub struct RoutingKey(pub String);

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        Self(value.into())
    }
}

impl From<String> for RoutingKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[async_trait::async_trait]
impl Binding for RoutingKey {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        channel
            .queue_bind(
                queue_name,
                exchange_name,
                &self.0,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl<B: Binding> Binding for Vec<B> {
    async fn bind(
        &self,
        channel: &Channel,
        exchange_name: &str,
        queue_name: &str,
    ) -> Result<(), anyhow::Error> {
        for b in self {
            b.bind(channel, exchange_name, queue_name).await?;
        }
        Ok(())
    }
}
