use crate::amqp::configuration::ConnectionSettings;
use crate::broker::{self, ConnectionEvent, ConnectionListener, HealthStatus};
use anyhow::Context;
use lapin::{
    tcp::{AMQPUriTcpExt, NativeTlsConnector},
    uri::{AMQPScheme, AMQPUri},
    ConnectionProperties,
};
use std::sync::{Arc, Weak};
use tokio::time::timeout;
use tracing::warn;

/// How often a connection is checked for `connection.blocked`/`connection.unblocked` transitions.
const BLOCKED_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

#[derive(Clone)]
/// All the information required to connect to a RabbitMq broker.
pub struct ConnectionFactory {
    uri: AMQPUri,
    /// The timeout observed when trying to connect to RabbitMq.
    connection_timeout: std::time::Duration,
    /// TLS configuration for the connection to RabbitMq.
    /// If `None`, the connection will not be encrypted.
    tls: Option<Arc<Tls>>,
    client_provided_name: Option<String>,
    dispatch_async: bool,
}

#[derive(Clone)]
struct Tls {
    connector: NativeTlsConnector,
    domain_name: String,
}

impl ConnectionFactory {
    /// Create a new connection factory from settings.
    ///
    /// A connection timeout can be (optionally) specified in `settings`.
    /// If the connection timeout is left unspecified, it will be defaulted to 10 seconds.
    pub fn new_from_config(settings: &ConnectionSettings) -> Result<Self, anyhow::Error> {
        let tls = settings
            .tls
            .as_ref()
            .map::<Result<Tls, anyhow::Error>, _>(|tls_settings| {
                let server_domain_name = tls_settings
                    .domain
                    .clone()
                    .unwrap_or_else(|| settings.amqp_uri().authority.host);

                let mut connector_builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    connector_builder.add_root_certificate(certificate);
                }

                let connector = connector_builder
                    .build()
                    .context("TLS configuration failed")?;
                Ok(Tls {
                    domain_name: server_domain_name,
                    connector,
                })
            })
            .transpose()?;
        let connection_timeout = settings
            .connection_timeout()
            .unwrap_or_else(|| std::time::Duration::from_secs(10));
        Ok(Self {
            uri: settings.amqp_uri(),
            connection_timeout,
            tls: tls.map(Arc::new),
            client_provided_name: settings.client_provided_name.clone(),
            dispatch_async: settings.dispatch_async,
        })
    }

    /// Create a new connection to a RabbitMq broker.
    ///
    /// It establishes an encrypted connection if `self.tls` is `Some`.
    /// It establishes an unencrypted connection if `self.tls` is `None`.
    #[tracing::instrument(name = "rabbitmq_connect", skip(self))]
    pub async fn new_connection(&self) -> Result<lapin::Connection, anyhow::Error> {
        let mut properties = ConnectionProperties::default();
        if self.dispatch_async {
            properties = properties.with_executor(tokio_executor_trait::Tokio::current());
        }
        if let Some(name) = &self.client_provided_name {
            properties = properties.with_connection_name(name.clone().into());
        }
        let connection = match timeout(self.connection_timeout, async {
            match &self.tls {
                None => self.connect_without_tls(properties).await,
                Some(tls) => self.connect_with_tls(properties, Arc::clone(tls)).await,
            }
        })
        .await
        {
            Ok(result) => result.context("Failed to connect to RabbitMQ.")?,
            Err(_) => anyhow::bail!("Timed out while trying to connect to RabbitMQ."),
        };
        // Connection errors are logged by the handler registered in `AmqpConnection::subscribe`:
        // lapin keeps a single error handler per connection.
        Ok(connection)
    }

    /// Establish a new unencrypted connection to a RabbitMq broker.
    async fn connect_without_tls(
        &self,
        properties: ConnectionProperties,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connect_uri(self.uri.clone(), properties).await
    }

    /// Establish a new TLS connection to a RabbitMq broker.
    async fn connect_with_tls(
        &self,
        properties: ConnectionProperties,
        tls_configuration: Arc<Tls>,
    ) -> Result<lapin::Connection, lapin::Error> {
        lapin::Connection::connector(
            self.uri.clone(),
            Box::new(move |uri| {
                // First establish a plain TCP connection using the AMQP protocol
                let mut amqp_uri = uri.clone();
                amqp_uri.scheme = AMQPScheme::AMQP;
                amqp_uri
                    .connect()
                    // Then perform a TLS handshake with custom settings
                    // including customisation of the expected domain for the server certificate
                    .and_then(|tcp| {
                        tcp.into_native_tls(
                            &tls_configuration.connector,
                            &tls_configuration.domain_name,
                        )
                    })
            }),
            properties,
        )
        .await
    }
}

/// [`Broker`](crate::broker::Broker) implementation backed by [`lapin`].
///
/// Every call to `connect` builds a [`ConnectionFactory`] from the given settings and opens a
/// brand new connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct LapinBroker;

#[async_trait::async_trait]
impl broker::Broker for LapinBroker {
    type Settings = ConnectionSettings;
    type Connection = AmqpConnection;
    type Model = lapin::Channel;

    async fn connect(&self, settings: &ConnectionSettings) -> Result<AmqpConnection, anyhow::Error> {
        let connection = ConnectionFactory::new_from_config(settings)?
            .new_connection()
            .await?;
        Ok(AmqpConnection(Arc::new(connection)))
    }
}

/// A connection to a RabbitMq broker.
pub struct AmqpConnection(Arc<lapin::Connection>);

impl AmqpConnection {
    /// Get access to the underlying raw connection
    pub fn raw(&self) -> &lapin::Connection {
        &self.0
    }
}

#[async_trait::async_trait]
impl broker::Connection for AmqpConnection {
    type Model = lapin::Channel;

    #[tracing::instrument(name = "rabbitmq_create_channel", skip(self))]
    async fn create_model(&self) -> Result<lapin::Channel, anyhow::Error> {
        Ok(self.0.create_channel().await?)
    }

    fn subscribe(&self, listener: ConnectionListener) {
        let on_error = Arc::clone(&listener);
        self.0.on_error(move |e| {
            warn!("RabbitMQ broken connection: {:?}", e);
            on_error(ConnectionEvent::Shutdown {
                reason: e.to_string(),
            });
        });
        // lapin tracks `connection.blocked` in the connection status without raising a callback.
        tokio::spawn(watch_blocked(Arc::downgrade(&self.0), listener));
    }

    fn status(&self) -> HealthStatus {
        if self.0.status().connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        if self.0.status().connected() {
            self.0.close(200, "OK").await?;
        }
        Ok(())
    }
}

async fn watch_blocked(connection: Weak<lapin::Connection>, listener: ConnectionListener) {
    let mut interval = tokio::time::interval(BLOCKED_POLL_INTERVAL);
    let mut blocked = false;
    loop {
        interval.tick().await;
        let Some(connection) = connection.upgrade() else {
            return;
        };
        let status = connection.status();
        if !status.connected() {
            return;
        }
        match (blocked, status.blocked()) {
            (false, true) => {
                blocked = true;
                listener(ConnectionEvent::Blocked {
                    reason: "blocked by the broker".into(),
                });
            }
            (true, false) => {
                blocked = false;
                listener(ConnectionEvent::Unblocked);
            }
            _ => {}
        }
    }
}

#[async_trait::async_trait]
impl broker::Model for lapin::Channel {
    fn status(&self) -> HealthStatus {
        if self.status().connected() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        }
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        if self.status().connected() {
            lapin::Channel::close(self, 200, "OK").await?;
        }
        Ok(())
    }
}
