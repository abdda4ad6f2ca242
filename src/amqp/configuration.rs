//! Connection parameters for [`LapinBroker`](crate::amqp::LapinBroker).
//!
//! They are usually deserialized from the application configuration and handed to
//! [`WarrenBuilder::connection`](crate::WarrenBuilder::connection) through a callback.
use anyhow::Context;
use lapin::uri::{AMQPAuthority, AMQPScheme, AMQPUri, AMQPUserInfo};
use native_tls::Certificate;
use redact::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

/// Where and how to open a broker connection.
///
/// `Default` matches a stock RabbitMq node on the local machine: `guest`/`guest` on
/// `localhost:5672`, virtual host `/`.
#[derive(Debug, Deserialize, Clone)]
pub struct ConnectionSettings {
    /// Host name of the broker, without scheme nor port.
    pub uri: String,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    /// [Virtual host](https://www.rabbitmq.com/vhosts.html) the connection is scoped to.
    pub vhost: String,
    pub username: String,
    /// Never printed by `Debug`.
    pub password: Secret<String>,
    /// Give up opening the connection after this many seconds (10 if unset).
    pub connection_timeout_seconds: Option<u64>,
    /// Plain TCP if unset.
    #[serde(default)]
    pub tls: Option<TlsSettings>,
    /// Name reported to the broker for this connection, shown in the management UI.
    #[serde(default)]
    pub client_provided_name: Option<String>,
    /// Dispatch consumer deliveries on the current tokio runtime.
    ///
    /// If `false`, lapin's own default executor is used instead.
    #[serde(default = "default_dispatch_async")]
    pub dispatch_async: bool,
}

fn default_dispatch_async() -> bool {
    true
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            uri: "localhost".into(),
            port: 5672,
            vhost: "/".into(),
            username: "guest".into(),
            password: "guest".to_owned().into(),
            connection_timeout_seconds: Some(10),
            tls: None,
            client_provided_name: None,
            dispatch_async: true,
        }
    }
}

impl ConnectionSettings {
    /// The `amqp://` uri these settings point to.
    pub fn amqp_uri(&self) -> AMQPUri {
        let userinfo = AMQPUserInfo {
            username: self.username.clone(),
            password: self.password.expose_secret().clone(),
        };
        AMQPUri {
            scheme: AMQPScheme::AMQP,
            authority: AMQPAuthority {
                userinfo,
                host: self.uri.clone(),
                port: self.port,
            },
            vhost: self.vhost.clone(),
            query: Default::default(),
        }
    }

    pub fn connection_timeout(&self) -> Option<std::time::Duration> {
        self.connection_timeout_seconds
            .map(std::time::Duration::from_secs)
    }
}

/// TLS parameters of a [`ConnectionSettings`].
#[derive(Debug, Deserialize, Clone)]
pub struct TlsSettings {
    /// Name expected on the server certificate; the broker host if unset.
    pub domain: Option<String>,
    /// PEM-encoded CA chain to trust on top of the system roots.
    pub ca_certificate_chain_pem: Option<String>,
}

impl TlsSettings {
    pub fn ca_certificate_chain(&self) -> Result<Option<Certificate>, anyhow::Error> {
        let Some(pem) = &self.ca_certificate_chain_pem else {
            return Ok(None);
        };
        let certificate = Certificate::from_pem(pem.as_bytes())
            .context("Invalid PEM in the TLS CA certificate chain")?;
        Ok(Some(certificate))
    }
}
